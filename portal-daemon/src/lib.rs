//! Long-running daemon: interval scheduling of every configured provider plus
//! a Unix-socket control server.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod scheduler;

pub use error::DaemonError;
pub use protocol::{
    request_refresh, request_status, request_stop, DaemonClient, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{
    build_status_payload, handle_request, history_observer, init_tracing, run,
    socket_server_task, start_blocking, DaemonProvider, DaemonState,
};
pub use scheduler::IntervalScheduler;
