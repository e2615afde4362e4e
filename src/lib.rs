pub mod proxy;
pub mod redis;

pub use proxy::{run_session, ProxyConfig, ProxyServer, ServerConfig};
pub use redis::{Command, DecodeError, RespParser, RespValue};
