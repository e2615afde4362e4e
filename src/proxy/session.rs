//! One client's proxy session.
//!
//! A session starts with no upstream connection and dials lazily before each
//! request until a dial succeeds. While connected, client bytes are forwarded
//! verbatim. When the dial fails or the connection breaks, the session answers
//! from the offline table instead, so the worker always gets a well-formed
//! reply. An accepted AUTH is remembered and replayed on every reconnect.
//!
//! Both sockets are owned by the session and closed when it is dropped, which
//! happens on every exit path out of [`ProxySession::run`].

use super::auth::AuthState;
use super::config::ProxyConfig;
use super::error::ProxyError;
use super::framing::{first_byte_deadline, read_reply, read_request};
use super::history::CommandHistory;
use super::offline;
use crate::redis::Command;
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};

const AUTH_OK: &[u8] = b"+OK\r\n";

/// Run one proxy session to completion. Never fails; every error is logged.
pub async fn run_session(client: TcpStream, config: Arc<ProxyConfig>) {
    let client_addr = client
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let _ = client.set_nodelay(true);

    ProxySession::new(client, client_addr, config).run().await;
}

pub struct ProxySession<C> {
    client: C,
    client_addr: String,
    config: Arc<ProxyConfig>,
    upstream: Option<TcpStream>,
    auth: AuthState,
    history: CommandHistory,
}

impl<C> ProxySession<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(client: C, client_addr: String, config: Arc<ProxyConfig>) -> Self {
        let history = CommandHistory::new(config.history_capacity);
        ProxySession {
            client,
            client_addr,
            config,
            upstream: None,
            auth: AuthState::default(),
            history,
        }
    }

    /// Serve requests until the client leaves or the session cannot continue.
    pub async fn run(mut self) {
        let span = info_span!("session", client = %self.client_addr);
        async move {
            info!("Client connected");

            let err = loop {
                if let Err(e) = self.serve_one().await {
                    break e;
                }
            };

            if err.is_disconnect() {
                info!("Client disconnected");
                debug!(history = ?self.history.dump(), "recent commands");
            } else {
                error!(error = %err, "Session terminated");
                error!(history = ?self.history.dump(), "recent commands");
            }

            if let Some(mut upstream) = self.upstream.take() {
                let _ = upstream.shutdown().await;
            }
            let _ = self.client.shutdown().await;
        }
        .instrument(span)
        .await
    }

    /// One request/response round trip.
    async fn serve_one(&mut self) -> Result<(), ProxyError> {
        let msg = read_request(&mut self.client, &self.config).await?;
        debug!(bytes = msg.len(), "Read from client");
        self.history.push(&msg);

        let cmd = match Command::decode(&msg) {
            Ok(cmd) => {
                debug!(command = %cmd.name, args = cmd.arguments.len(), "Decoded command");
                Some(cmd)
            }
            Err(e) => {
                warn!(error = %e, bytes = msg.len(), "Failed to decode client request");
                None
            }
        };

        if self.upstream.is_none() {
            self.connect().await?;
        }

        let reply = match self.forward(&msg, cmd.as_ref()).await {
            Some(reply) => reply,
            None => {
                debug!("Using offline response");
                self.offline_reply(cmd.as_ref()).await
            }
        };

        self.write_to_client(&reply).await
    }

    /// Forward to upstream if connected. `None` means the caller should
    /// answer offline; the upstream is dropped if it failed.
    async fn forward(&mut self, msg: &[u8], cmd: Option<&Command>) -> Option<BytesMut> {
        let upstream = self.upstream.as_mut()?;

        let first_byte = first_byte_deadline(cmd, &self.config);
        match exchange(upstream, msg, &self.config, first_byte).await {
            Ok(reply) => {
                debug!(bytes = reply.len(), "Read from redis");
                if let Some(cmd) = cmd.filter(|c| c.is("AUTH")) {
                    if &reply[..] == AUTH_OK {
                        self.auth.accept(&cmd.arguments);
                    }
                }
                Some(reply)
            }
            Err(e) => {
                warn!(error = %e, "Lost redis connection, falling back to offline mode");
                self.upstream = None;
                None
            }
        }
    }

    async fn offline_reply(&mut self, cmd: Option<&Command>) -> BytesMut {
        let reply = match cmd {
            Some(cmd) => offline::respond(cmd, &self.config, &mut self.auth).await,
            None => offline::unavailable_reply(),
        };
        BytesMut::from(&reply[..])
    }

    /// Dial upstream once. A failed dial leaves the session offline; only a
    /// rejected credential replay is an error.
    async fn connect(&mut self) -> Result<(), ProxyError> {
        debug!(addr = %self.config.upstream_address, "Dialing redis");

        let dial = TcpStream::connect(self.config.upstream_address.as_str());
        let mut upstream = match timeout(self.config.timeouts.upstream_dial, dial).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!(error = %e, "Failed to dial redis");
                return Ok(());
            }
            Err(_) => {
                debug!("Timed out dialing redis");
                return Ok(());
            }
        };
        let _ = upstream.set_nodelay(true);
        debug!("Connected to redis");

        if let Some(auth) = self.auth.replay_command(&self.config) {
            info!("Transparently re-authenticating");
            if let Err(e) = replay_auth(&mut upstream, &auth, &self.config).await {
                let _ = upstream.shutdown().await;
                return Err(e);
            }
        }

        self.upstream = Some(upstream);
        Ok(())
    }

    async fn write_to_client(&mut self, reply: &[u8]) -> Result<(), ProxyError> {
        self.client
            .write_all(reply)
            .await
            .map_err(ProxyError::ClientWrite)?;
        self.client.flush().await.map_err(ProxyError::ClientWrite)?;
        debug!(bytes = reply.len(), "Wrote to client");
        Ok(())
    }
}

/// Write a request upstream and read back its reply.
async fn exchange<U>(
    upstream: &mut U,
    msg: &[u8],
    config: &ProxyConfig,
    first_byte: Duration,
) -> Result<BytesMut, ProxyError>
where
    U: AsyncRead + AsyncWrite + Unpin,
{
    upstream.write_all(msg).await.map_err(ProxyError::upstream)?;
    upstream.flush().await.map_err(ProxyError::upstream)?;
    debug!(bytes = msg.len(), "Wrote to redis");
    read_reply(upstream, config, first_byte).await
}

async fn replay_auth<U>(
    upstream: &mut U,
    auth: &Command,
    config: &ProxyConfig,
) -> Result<(), ProxyError>
where
    U: AsyncRead + AsyncWrite + Unpin,
{
    let first_byte = first_byte_deadline(Some(auth), config);
    let reply = exchange(upstream, &auth.encode(), config, first_byte)
        .await
        .map_err(|e| ProxyError::ReauthFailed(Box::new(e)))?;
    if &reply[..] != AUTH_OK {
        return Err(ProxyError::ReauthRejected(reply.to_vec()));
    }
    Ok(())
}
