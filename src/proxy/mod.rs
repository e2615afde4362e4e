//! Failover-aware Redis proxy for Resque workers.

mod auth;
mod config;
mod error;
mod framing;
mod history;
pub mod offline;
mod server;
mod session;

pub use auth::AuthState;
pub use config::{ConfigError, FramingMode, ProxyConfig, ServerConfig, TimeoutConfig};
pub use error::ProxyError;
pub use framing::{first_byte_deadline, read_reply, read_request};
pub use history::CommandHistory;
pub use server::{BoundProxyServer, ProxyServer};
pub use session::{run_session, ProxySession};
