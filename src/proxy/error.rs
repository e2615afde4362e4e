//! Session error taxonomy.
//!
//! Upstream trouble is normally absorbed by switching to offline replies; only
//! client failures and a rejected credential replay end a session.

use std::io::{Error as IoError, ErrorKind};

#[derive(Debug)]
pub enum ProxyError {
    /// Clean EOF from the client
    ClientDisconnected,
    /// No client bytes within the idle deadline
    ClientIdle,
    /// Any other client read failure
    ClientIo(IoError),
    /// Writing a reply back to the client failed
    ClientWrite(IoError),
    /// Client request grew past the configured limit (bytes)
    RequestTooLarge(usize),
    /// Upstream closed the connection
    UpstreamDisconnected,
    /// No reply byte before the first-byte deadline, or a RESP reply stalled
    UpstreamTimeout,
    /// Any other upstream read/write failure
    UpstreamIo(IoError),
    /// Replayed AUTH got something other than `+OK`
    ReauthRejected(Vec<u8>),
    /// Replayed AUTH could not be written or its reply could not be read
    ReauthFailed(Box<ProxyError>),
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyError::ClientDisconnected => write!(f, "client disconnected"),
            ProxyError::ClientIdle => write!(f, "client idle timeout"),
            ProxyError::ClientIo(e) => write!(f, "client I/O error: {}", e),
            ProxyError::ClientWrite(e) => write!(f, "failed to write to client: {}", e),
            ProxyError::RequestTooLarge(limit) => {
                write!(f, "client request exceeds {} bytes", limit)
            }
            ProxyError::UpstreamDisconnected => write!(f, "redis disconnected"),
            ProxyError::UpstreamTimeout => write!(f, "redis reply timed out"),
            ProxyError::UpstreamIo(e) => write!(f, "redis I/O error: {}", e),
            ProxyError::ReauthRejected(reply) => write!(
                f,
                "redis rejected re-authentication: {:?}",
                String::from_utf8_lossy(reply)
            ),
            ProxyError::ReauthFailed(e) => write!(f, "re-authentication failed: {}", e),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::ClientIo(e) | ProxyError::ClientWrite(e) | ProxyError::UpstreamIo(e) => {
                Some(e)
            }
            ProxyError::ReauthFailed(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl ProxyError {
    /// Classify an upstream I/O error.
    pub fn upstream(e: IoError) -> Self {
        match e.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => ProxyError::UpstreamDisconnected,
            _ => ProxyError::UpstreamIo(e),
        }
    }

    /// Classify a client read error.
    pub fn client(e: IoError) -> Self {
        match e.kind() {
            ErrorKind::UnexpectedEof => ProxyError::ClientDisconnected,
            _ => ProxyError::ClientIo(e),
        }
    }

    /// True for errors that end the session; false for ones that only drop
    /// the upstream connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProxyError::UpstreamDisconnected
                | ProxyError::UpstreamTimeout
                | ProxyError::UpstreamIo(_)
        )
    }

    /// True for the normal way a session ends.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProxyError::ClientDisconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_classification() {
        let err = ProxyError::upstream(IoError::new(ErrorKind::ConnectionReset, "reset"));
        assert!(matches!(err, ProxyError::UpstreamDisconnected));
        assert!(!err.is_fatal());

        let err = ProxyError::upstream(IoError::new(ErrorKind::Other, "boom"));
        assert!(matches!(err, ProxyError::UpstreamIo(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(ProxyError::ClientDisconnected.is_fatal());
        assert!(ProxyError::ClientDisconnected.is_disconnect());
        assert!(ProxyError::ReauthRejected(b"-ERR invalid password\r\n".to_vec()).is_fatal());
        assert!(
            ProxyError::ClientWrite(IoError::new(ErrorKind::BrokenPipe, "pipe")).is_fatal()
        );
        assert!(ProxyError::RequestTooLarge(1024).is_fatal());
        assert!(!ProxyError::RequestTooLarge(1024).is_disconnect());
    }

    #[test]
    fn test_reauth_failure_keeps_cause() {
        use std::error::Error;

        let err = ProxyError::ReauthFailed(Box::new(ProxyError::UpstreamTimeout));
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "re-authentication failed: redis reply timed out");
        assert_eq!(err.source().unwrap().to_string(), "redis reply timed out");
    }

    #[test]
    fn test_display() {
        let err = ProxyError::ReauthRejected(b"-ERR invalid password\r\n".to_vec());
        assert_eq!(
            err.to_string(),
            "redis rejected re-authentication: \"-ERR invalid password\\r\\n\""
        );
    }
}
