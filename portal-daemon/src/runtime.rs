use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use portal_core::config::{self, PortalConfig, ProviderConfig};
use portal_core::types::ProviderId;
use portal_sync::{
    history, pipeline, status, CatalogConnection, FileCatalog, PassObserver, PassOutcome,
    ScheduledProvider, SchedulingDriver, TaskFuture,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{portal_root, socket_path, LOG_FORMAT_ENV};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::scheduler::IntervalScheduler;

/// One configured provider as the daemon runs it.
pub struct DaemonProvider {
    pub config: ProviderConfig,
    pub scheduled: ScheduledProvider,
}

/// Everything socket handlers need, shared behind an `Arc`.
pub struct DaemonState {
    home: PathBuf,
    providers: Vec<DaemonProvider>,
    catalog: Arc<FileCatalog>,
    started_at: DateTime<Utc>,
    shutdown: broadcast::Sender<()>,
}

impl DaemonState {
    /// Build providers from `config` over the shared file catalog. Nothing is scheduled yet.
    pub fn build(
        home: &Path,
        config: &PortalConfig,
        shutdown: broadcast::Sender<()>,
    ) -> Result<Self, DaemonError> {
        let scheduled = pipeline::build_providers_at(home, config)?;
        let providers = config
            .providers
            .iter()
            .cloned()
            .zip(scheduled)
            .map(|(config, scheduled)| DaemonProvider {
                config,
                scheduled: scheduled.with_observer(history_observer(home.to_path_buf())),
            })
            .collect();
        Ok(Self::from_parts(home, providers, shutdown))
    }

    pub fn from_parts(
        home: &Path,
        providers: Vec<DaemonProvider>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            home: home.to_path_buf(),
            providers,
            catalog: Arc::new(FileCatalog::at_home(home)),
            started_at: Utc::now(),
            shutdown,
        }
    }

    pub fn providers(&self) -> &[DaemonProvider] {
        &self.providers
    }

    /// Connect every provider to the catalog; this is where tasks get scheduled.
    pub fn connect_all(&self, driver: &dyn SchedulingDriver) -> Result<(), DaemonError> {
        for provider in &self.providers {
            let catalog: Arc<dyn CatalogConnection> = self.catalog.clone();
            provider.scheduled.connect(catalog, driver)?;
        }
        Ok(())
    }
}

/// Records every pass in the provider history file, off the async workers.
pub fn history_observer(home: PathBuf) -> PassObserver {
    Arc::new(move |provider: &ProviderId, outcome: &PassOutcome| -> TaskFuture {
        let provider = provider.clone();
        let write = history::record_in_background(&home, &provider, outcome, Utc::now());
        Box::pin(async move {
            if let Err(err) = write.await {
                tracing::warn!(provider = %provider, error = %err, "failed to record provider history");
            }
        })
    })
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon: schedule every provider, serve the socket, wait for shutdown.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = {
        let home = home.clone();
        tokio::task::spawn_blocking(move || config::load_at(&home))
            .await
            .map_err(|err| DaemonError::Protocol(format!("config load join error: {err}")))??
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let scheduler = IntervalScheduler::with_shutdown(shutdown_tx.clone());
    let state = Arc::new(DaemonState::build(&home, &config, shutdown_tx.clone())?);
    state.connect_all(&scheduler)?;
    tracing::info!(
        providers = state.providers.len(),
        tasks = ?scheduler.task_ids(),
        "daemon started"
    );

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let result = socket_server_task(state, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    scheduler.shutdown();
    scheduler.join().await;

    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Accept socket clients until shutdown. Removes the socket file on exit.
pub async fn socket_server_task(
    state: Arc<DaemonState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let root = portal_root(&state.home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }

    let socket = socket_path(&state.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, state: Arc<DaemonState>) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };
        let stop = request.is_stop();
        let response = handle_request(&state, request).await;
        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }
    Ok(())
}

/// Dispatch one protocol command.
pub async fn handle_request(state: &DaemonState, request: DaemonRequest) -> DaemonResponse {
    match request {
        DaemonRequest::Status => DaemonResponse::ok(build_status_payload(state)),
        DaemonRequest::Refresh { provider } => match refresh(state, provider.as_deref()).await {
            Ok(results) => DaemonResponse::ok(results),
            Err(err) => DaemonResponse::error(err.to_string()),
        },
        DaemonRequest::Stop => {
            let _ = state.shutdown.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
    }
}

/// Run a pass now for `provider`, or for every provider when `None`.
async fn refresh(state: &DaemonState, provider: Option<&str>) -> Result<Value, DaemonError> {
    let selected: Vec<&DaemonProvider> = state
        .providers
        .iter()
        .filter(|p| provider.map_or(true, |id| p.config.id.as_str() == id))
        .collect();
    if let (Some(id), true) = (provider, selected.is_empty()) {
        return Err(DaemonError::UnknownProvider(id.to_string()));
    }

    let mut results = Vec::with_capacity(selected.len());
    for provider in selected {
        let outcome = provider.scheduled.run_once().await;
        results.push(outcome_json(&provider.config, &outcome));
    }
    Ok(Value::Array(results))
}

fn outcome_json(config: &ProviderConfig, outcome: &PassOutcome) -> Value {
    let mut payload = json!({
        "provider": config.id,
        "outcome": outcome.label(),
    });
    match outcome {
        PassOutcome::Applied(report) => payload["report"] = json!(report),
        PassOutcome::Failed(err) => payload["error"] = json!(err.to_string()),
        PassOutcome::SkippedEmpty | PassOutcome::Busy => {}
    }
    payload
}

pub fn build_status_payload(state: &DaemonState) -> Value {
    let now = Utc::now();
    let providers: Vec<Value> = state
        .providers
        .iter()
        .map(|provider| {
            let mut entry = json!({
                "id": provider.config.id,
                "location_key": provider.config.effective_location_key(),
                "state": provider.scheduled.reconciler().state(),
                "scheduled": provider.scheduled.is_scheduled(),
                "frequency_secs": provider.config.schedule.frequency_secs,
            });
            match status::check_at(&state.home, &provider.config, now) {
                Ok((signal, history)) => {
                    entry["status"] = json!(signal);
                    if let Some(history) = history {
                        entry["last_attempt_at"] = json!(history.last_attempt_at);
                        entry["last_success_at"] = json!(history.last_success_at);
                        entry["entity_count"] = json!(history.entity_count);
                    }
                }
                Err(err) => entry["status"] = json!({ "status": "unknown", "error": err.to_string() }),
            }
            entry
        })
        .collect();

    json!({
        "running": true,
        "started_at": state.started_at.to_rfc3339(),
        "socket": socket_path(&state.home).display().to_string(),
        "catalog": state.catalog.path().display().to_string(),
        "providers": providers,
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }
    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }
    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the global subscriber. `RUST_LOG` filters (default `info`);
/// `PORTAL_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        let _ = fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
