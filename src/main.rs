//! Resque Redis Proxy
//!
//! Sits between Resque workers and Redis. While Redis is reachable, bytes pass
//! through untouched; while it is not, workers get canned "empty queue"
//! replies instead of connection errors.
//!
//! ## Usage
//!
//! ```bash
//! resque-proxy --listen 127.0.0.1:9000 --redis 127.0.0.1:6379 --auth s3cret
//! RUST_LOG=debug resque-proxy --config proxy.toml --log-format json
//! ```

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use clap::{Parser, ValueEnum};
use resque_proxy::proxy::{FramingMode, ProxyServer, ServerConfig};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "resque-proxy",
    version,
    about = "Redis proxy that fakes empty queues for Resque workers when Redis is down"
)]
struct Args {
    /// TOML config file; flags and PROXY_* variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Local address to accept workers on
    #[arg(long)]
    listen: Option<String>,

    /// Redis address
    #[arg(long)]
    redis: Option<String>,

    /// AUTH password for offline emulation and re-authentication
    #[arg(long)]
    auth: Option<String>,

    /// How replies are framed: read-timeout or resp
    #[arg(long)]
    framing: Option<FramingMode>,

    /// Maximum concurrent client sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_toml_file(path)?,
            None => ServerConfig::default(),
        }
        .apply_env()?;

        if let Some(listen) = self.listen {
            config.listen_address = listen;
        }
        if let Some(redis) = self.redis {
            config.proxy.upstream_address = redis;
        }
        if let Some(auth) = self.auth {
            config.proxy.auth_secret = Some(auth).filter(|s| !s.is_empty());
        }
        if let Some(framing) = self.framing {
            config.proxy.framing = framing;
        }
        if let Some(max) = self.max_sessions {
            config.max_sessions = Some(max);
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_format);

    let config = args.into_config()?;
    info!(
        listen = %config.listen_address,
        redis = %config.proxy.upstream_address,
        framing = ?config.proxy.framing,
        auth = config.proxy.auth_secret.is_some(),
        "Starting proxy"
    );

    let server = ProxyServer::new(config).bind().await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = &result {
                error!("Proxy stopped: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
