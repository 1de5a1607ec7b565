//! YAML configuration for providers and declared feature flags.
//!
//! # Storage layout
//!
//! ```text
//! ~/.portal/
//!   config.yaml   (mode 0600, created by `portal init`)
//! ```
//!
//! # API pattern
//!
//! Every filesystem function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{FeatureFlag, FlagName, FlagPersistence, LocationKey, PluginId, ProviderId};

pub const CONFIG_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// 1. Shape
// ---------------------------------------------------------------------------

/// Root of `~/.portal/config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalConfig {
    pub version: u32,
    /// Turns silent degraded behaviour (unknown flags, duplicate flags) into diagnostics.
    #[serde(default)]
    pub strict_mode: bool,
    #[serde(default)]
    pub flags: Vec<FlagDecl>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            strict_mode: false,
            flags: vec![],
            providers: vec![],
        }
    }
}

impl PortalConfig {
    pub fn provider(&self, id: &str) -> Result<&ProviderConfig, ConfigError> {
        self.providers
            .iter()
            .find(|p| p.id.0 == id)
            .ok_or_else(|| ConfigError::UnknownProvider { id: id.to_string() })
    }

    /// Enforce provider id uniqueness, location key uniqueness and sane schedules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        let mut location_keys: HashMap<LocationKey, &ProviderId> = HashMap::new();
        for provider in &self.providers {
            if !ids.insert(&provider.id) {
                return Err(ConfigError::DuplicateProvider {
                    id: provider.id.0.clone(),
                });
            }
            let key = provider.effective_location_key();
            if let Some(first) = location_keys.get(&key) {
                return Err(ConfigError::DuplicateLocationKey {
                    location_key: key.0,
                    first: first.0.clone(),
                    second: provider.id.0.clone(),
                });
            }
            location_keys.insert(key, &provider.id);
            provider.schedule.validate(&provider.id)?;
        }
        Ok(())
    }

    pub fn feature_flags(&self) -> Vec<FeatureFlag> {
        self.flags.iter().map(FlagDecl::to_feature_flag).collect()
    }
}

/// A flag declared in configuration on behalf of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagDecl {
    pub name: FlagName,
    pub plugin_id: PluginId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub persisted: bool,
}

impl FlagDecl {
    pub fn to_feature_flag(&self) -> FeatureFlag {
        FeatureFlag {
            name: self.name.clone(),
            plugin_id: self.plugin_id.clone(),
            description: self.description.clone(),
            persistence: if self.persisted {
                FlagPersistence::Persisted
            } else {
                FlagPersistence::Session
            },
        }
    }
}

/// One entity provider: where to fetch, how to map, how often.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: ProviderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_key: Option<LocationKey>,
    pub source: SourceConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default)]
    pub empty_fetch: EmptyFetchPolicy,
    #[serde(default = "default_true")]
    pub refresh_after_apply: bool,
}

impl ProviderConfig {
    pub fn effective_location_key(&self) -> LocationKey {
        self.location_key
            .clone()
            .unwrap_or_else(|| LocationKey::for_provider(&self.id))
    }
}

/// Remote endpoint description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// JSON pointer selecting the item array (e.g. `/value`); root when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_pointer: Option<String>,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default)]
    pub required_fields: Vec<String>,
}

/// How the remote source authenticates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    Bearer {
        token: Secret,
    },
    Basic {
        username: String,
        password: Secret,
    },
    ClientCredentials {
        /// Issuer base URL; the token endpoint is discovered from it.
        issuer: String,
        client_id: String,
        client_secret: Secret,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
    },
}

/// A secret given inline or as `{ env: NAME }`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Secret {
    Env { env: String },
    Literal(String),
}

impl Secret {
    pub fn resolve(&self) -> Result<String, ConfigError> {
        match self {
            Secret::Env { env } => {
                std::env::var(env).map_err(|_| ConfigError::MissingSecret { name: env.clone() })
            }
            Secret::Literal(value) => Ok(value.clone()),
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Env { env } => f.debug_struct("Env").field("env", env).finish(),
            Secret::Literal(_) => f.write_str("Literal(<redacted>)"),
        }
    }
}

/// Frequency/timeout policy handed to the scheduling driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_frequency_secs")]
    pub frequency_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub initial_delay_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            frequency_secs: default_frequency_secs(),
            timeout_secs: default_timeout_secs(),
            initial_delay_secs: 0,
        }
    }
}

impl ScheduleConfig {
    pub fn frequency(&self) -> Duration {
        Duration::from_secs(self.frequency_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    fn validate(&self, id: &ProviderId) -> Result<(), ConfigError> {
        if self.frequency_secs == 0 {
            return Err(ConfigError::InvalidSchedule {
                id: id.0.clone(),
                reason: "frequency_secs must be greater than zero".to_string(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidSchedule {
                id: id.0.clone(),
                reason: "timeout_secs must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// What to do when the remote returns zero records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmptyFetchPolicy {
    /// Leave the catalog untouched and log loudly.
    #[default]
    Skip,
    /// Treat the empty list as authoritative and remove everything owned.
    Apply,
}

fn default_true() -> bool {
    true
}

fn default_template() -> String {
    "component".to_string()
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_frequency_secs() -> u64 {
    30 * 60
}

fn default_timeout_secs() -> u64 {
    10 * 60
}

// ---------------------------------------------------------------------------
// 2. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.portal/`
///
/// Creates the directory (mode `0700`) if it does not yet exist.
pub fn portal_dir_at(home: &Path) -> Result<PathBuf, ConfigError> {
    let dir = home.join(".portal");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.portal/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".portal").join("config.yaml")
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load and validate `<home>/.portal/config.yaml`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<PortalConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: PortalConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<PortalConfig, ConfigError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 4. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the config to `<home>/.portal/config.yaml`.
///
/// Write flow: validate → serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &PortalConfig) -> Result<(), ConfigError> {
    config.validate()?;
    portal_dir_at(home)?;
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &PortalConfig) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// 5. Init
// ---------------------------------------------------------------------------

/// Create `<home>/.portal/config.yaml` with an empty default config.
///
/// Idempotent: if the file already exists, loads and returns it unchanged.
pub fn init_at(home: &Path) -> Result<PortalConfig, ConfigError> {
    if config_path_at(home).exists() {
        return load_at(home);
    }
    let config = PortalConfig::default();
    save_at(home, &config)?;
    Ok(config)
}

/// `init_at` convenience wrapper.
pub fn init() -> Result<PortalConfig, ConfigError> {
    init_at(&home()?)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
