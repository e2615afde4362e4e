//! Deciding where a client request or an upstream reply ends.
//!
//! In [`FramingMode::ReadTimeout`] nothing is parsed. A client request is
//! whatever arrives until a read comes back shorter than a full chunk. An
//! upstream reply is whatever arrives until a read times out with no new data.
//! This relies on Resque clients being strictly request/response and can cut
//! a reply short on a slow link. [`FramingMode::Resp`] reads until the buffer
//! holds whole RESP values instead.

use super::config::{FramingMode, ProxyConfig};
use super::error::ProxyError;
use super::offline::blocking_timeout;
use crate::redis::{Command, FrameScanner};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::debug;

const UPSTREAM_READ_SIZE: usize = 4096;

/// Commands whose reply may be held back for their trailing timeout argument.
const BLOCKING_COMMANDS: &[&str] = &["BLPOP", "BRPOP", "BRPOPLPUSH"];

/// Read one client request.
pub async fn read_request<R>(reader: &mut R, config: &ProxyConfig) -> Result<BytesMut, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(config.chunk_size);
    let mut chunk = vec![0u8; config.chunk_size];
    let mut scanner = FrameScanner::new();

    loop {
        let n = match timeout(config.timeouts.client_idle, reader.read(&mut chunk)).await {
            Err(_) => return Err(ProxyError::ClientIdle),
            Ok(Err(e)) => return Err(ProxyError::client(e)),
            Ok(Ok(0)) => return Err(ProxyError::ClientDisconnected),
            Ok(Ok(n)) => n,
        };
        if buf.len() + n > config.max_request_size {
            return Err(ProxyError::RequestTooLarge(config.max_request_size));
        }
        buf.extend_from_slice(&chunk[..n]);

        let done = match config.framing {
            FramingMode::ReadTimeout => n < chunk.len(),
            FramingMode::Resp => scanner.is_complete(&buf),
        };
        if done {
            return Ok(buf);
        }
    }
}

/// How long the first byte of the reply to `cmd` may take. Only blocking
/// pops get longer than `upstream_read`, so a backend that accepts but never
/// answers is noticed quickly.
pub fn first_byte_deadline(cmd: Option<&Command>, config: &ProxyConfig) -> Duration {
    let blocking = cmd.filter(|cmd| BLOCKING_COMMANDS.iter().any(|name| cmd.is(name)));
    match blocking {
        Some(cmd) => match blocking_timeout(cmd) {
            Some(wait) => wait + config.timeouts.upstream_read,
            None => config.timeouts.upstream_reply,
        },
        None => config.timeouts.upstream_read,
    }
}

/// Read one upstream reply. `first_byte` bounds the wait before any data
/// arrives; see [`first_byte_deadline`].
pub async fn read_reply<R>(
    reader: &mut R,
    config: &ProxyConfig,
    first_byte: Duration,
) -> Result<BytesMut, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(UPSTREAM_READ_SIZE);
    let mut chunk = [0u8; UPSTREAM_READ_SIZE];
    let mut scanner = FrameScanner::new();

    loop {
        if config.framing == FramingMode::Resp && scanner.is_complete(&buf) {
            return Ok(buf);
        }

        let deadline = reply_deadline(&buf, config, first_byte);
        match timeout(deadline, reader.read(&mut chunk)).await {
            Err(_) if buf.is_empty() => return Err(ProxyError::UpstreamTimeout),
            Err(_) => match config.framing {
                FramingMode::ReadTimeout => {
                    debug!(bytes = buf.len(), "redis read timed out, reply complete");
                    return Ok(buf);
                }
                FramingMode::Resp => return Err(ProxyError::UpstreamTimeout),
            },
            Ok(Err(e)) => return Err(ProxyError::upstream(e)),
            Ok(Ok(0)) => return Err(ProxyError::UpstreamDisconnected),
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Once data is flowing, the short read deadline marks the end of the reply,
/// unless replies are parsed, in which case a stalled frame gets the long one.
fn reply_deadline(buf: &BytesMut, config: &ProxyConfig, first_byte: Duration) -> Duration {
    if buf.is_empty() {
        return first_byte;
    }
    match config.framing {
        FramingMode::ReadTimeout => config.timeouts.upstream_read,
        FramingMode::Resp => config.timeouts.upstream_reply,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    const FIRST_BYTE: Duration = Duration::from_millis(200);

    fn config(framing: FramingMode) -> ProxyConfig {
        let mut config = ProxyConfig::new("127.0.0.1:6379", None);
        config.framing = framing;
        config.chunk_size = 8;
        config.timeouts.upstream_read = Duration::from_millis(20);
        config.timeouts.upstream_reply = Duration::from_millis(200);
        config
    }

    #[tokio::test]
    async fn test_request_short_read_ends_message() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();

        let buf = read_request(&mut server, &config(FramingMode::ReadTimeout))
            .await
            .unwrap();
        assert_eq!(&buf[..], b"*1\r\n$4\r\nPING\r\n");
    }

    #[tokio::test]
    async fn test_request_eof_is_disconnect() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let err = read_request(&mut server, &config(FramingMode::ReadTimeout))
            .await
            .unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_request_resp_waits_for_whole_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let reader = tokio::spawn(async move {
            read_request(&mut server, &config(FramingMode::Resp)).await
        });

        client.write_all(b"*2\r\n$3\r\nGET\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.write_all(b"$5\r\nhello\r\n").await.unwrap();

        let buf = reader.await.unwrap().unwrap();
        assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$5\r\nhello\r\n");
    }

    #[tokio::test]
    async fn test_reply_ends_on_read_timeout() {
        let (mut upstream, mut proxy) = tokio::io::duplex(64);
        upstream.write_all(b"+OK\r\n").await.unwrap();

        let buf = read_reply(&mut proxy, &config(FramingMode::ReadTimeout), FIRST_BYTE)
            .await
            .unwrap();
        assert_eq!(&buf[..], b"+OK\r\n");
    }

    #[tokio::test]
    async fn test_reply_with_no_bytes_times_out() {
        let (_upstream, mut proxy) = tokio::io::duplex(64);

        let err = read_reply(&mut proxy, &config(FramingMode::ReadTimeout), FIRST_BYTE)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamTimeout));
    }

    #[tokio::test]
    async fn test_reply_eof_is_disconnect() {
        let (upstream, mut proxy) = tokio::io::duplex(64);
        drop(upstream);

        let err = read_reply(&mut proxy, &config(FramingMode::Resp), FIRST_BYTE)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamDisconnected));
    }

    #[tokio::test]
    async fn test_reply_resp_returns_without_waiting() {
        let (mut upstream, mut proxy) = tokio::io::duplex(64);
        upstream.write_all(b"$5\r\nhello\r\n").await.unwrap();

        let mut config = config(FramingMode::Resp);
        config.timeouts.upstream_reply = Duration::from_secs(60);

        let buf = read_reply(&mut proxy, &config, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(&buf[..], b"$5\r\nhello\r\n");
    }

    #[tokio::test]
    async fn test_reply_resp_partial_frame_times_out() {
        let (mut upstream, mut proxy) = tokio::io::duplex(64);
        upstream.write_all(b"$5\r\nhel").await.unwrap();

        let err = read_reply(&mut proxy, &config(FramingMode::Resp), FIRST_BYTE)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamTimeout));
    }
    #[tokio::test]
    async fn test_request_over_limit_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut config = config(FramingMode::Resp);
        config.max_request_size = 16;

        // Declares a huge bulk string and keeps trickling bytes
        let writer = tokio::spawn(async move {
            client.write_all(b"*1\r\n$4000000000\r\n").await.unwrap();
            for _ in 0..8 {
                if client.write_all(b"xxxxxxxx").await.is_err() {
                    break;
                }
            }
            client
        });

        let err = read_request(&mut server, &config).await.unwrap_err();
        assert!(matches!(err, ProxyError::RequestTooLarge(16)));
        drop(server);
        let _ = writer.await;
    }

    #[tokio::test]
    async fn test_request_at_limit_is_accepted() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let request = b"*1\r\n$4\r\nPING\r\n";
        client.write_all(request).await.unwrap();

        let mut config = config(FramingMode::Resp);
        config.max_request_size = request.len();

        let buf = read_request(&mut server, &config).await.unwrap();
        assert_eq!(&buf[..], request);
    }

    #[tokio::test]
    async fn test_request_deep_nesting_does_not_overflow() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let mut config = config(FramingMode::Resp);
        config.chunk_size = 1024;
        config.max_request_size = 1 << 20;

        let mut request = b"*1\r\n".repeat(100_000);
        request.extend_from_slice(b":1\r\n");
        let writer = tokio::spawn(async move {
            client.write_all(&request).await.unwrap();
            client
        });

        let buf = read_request(&mut server, &config).await.unwrap();
        assert_eq!(buf.len(), 100_000 * 4 + 4);
        let _ = writer.await;
    }

    #[test]
    fn test_first_byte_deadline() {
        let mut config = ProxyConfig::new("127.0.0.1:6379", None);
        config.timeouts.upstream_read = Duration::from_millis(250);
        config.timeouts.upstream_reply = Duration::from_secs(30);

        let get = Command::new("GET", ["foo"]);
        assert_eq!(first_byte_deadline(Some(&get), &config), Duration::from_millis(250));
        assert_eq!(first_byte_deadline(None, &config), Duration::from_millis(250));

        let blpop = Command::new("blpop", ["queue:default", "5"]);
        assert_eq!(
            first_byte_deadline(Some(&blpop), &config),
            Duration::from_millis(5250)
        );

        let forever = Command::new("BRPOP", ["queue:default", "0"]);
        assert_eq!(first_byte_deadline(Some(&forever), &config), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_silent_redis_noticed_after_read_deadline() {
        let (_upstream, mut proxy) = tokio::io::duplex(64);
        let config = config(FramingMode::ReadTimeout);
        let get = Command::new("GET", ["foo"]);

        let started = tokio::time::Instant::now();
        let err = read_reply(&mut proxy, &config, first_byte_deadline(Some(&get), &config))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamTimeout));
        assert!(started.elapsed() < config.timeouts.upstream_reply);
    }
}
