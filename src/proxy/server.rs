use super::config::ServerConfig;
use super::session::run_session;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info};

/// Accepts workers and runs one session task per connection.
pub struct ProxyServer {
    config: ServerConfig,
}

/// A server whose listener is already bound.
pub struct BoundProxyServer {
    config: ServerConfig,
    listener: TcpListener,
}

impl ProxyServer {
    pub fn new(config: ServerConfig) -> Self {
        ProxyServer { config }
    }

    pub async fn bind(self) -> std::io::Result<BoundProxyServer> {
        let listener = TcpListener::bind(&self.config.listen_address).await?;
        Ok(BoundProxyServer {
            config: self.config,
            listener,
        })
    }

    pub async fn run(self) -> std::io::Result<()> {
        self.bind().await?.run().await
    }
}

impl BoundProxyServer {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept forever. Accept errors are logged and the loop carries on.
    pub async fn run(self) -> std::io::Result<()> {
        let proxy = Arc::new(self.config.proxy);
        let limit = self.config.max_sessions.map(|n| Arc::new(Semaphore::new(n)));

        info!(
            listen = %self.listener.local_addr()?,
            upstream = %proxy.upstream_address,
            "Proxy listening"
        );

        loop {
            // Waiting for a permit before accepting leaves excess clients in
            // the kernel backlog.
            let permit = match &limit {
                Some(limit) => match limit.clone().acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return Ok(()),
                },
                None => None,
            };

            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let proxy = proxy.clone();
                    tokio::spawn(async move {
                        run_session(stream, proxy).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
