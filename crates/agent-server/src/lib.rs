pub mod dispatch;
pub mod error;
pub mod http;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::ControlServer;
pub use state::{AgentState, JobSlot};

/// Version reported on `/status`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
