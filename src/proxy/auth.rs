//! Per-session authentication state used for transparent re-authentication.

use super::config::ProxyConfig;
use crate::redis::Command;

/// Set once a password is accepted; only cleared when the session ends.
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    authenticated: bool,
    credentials: Option<Vec<String>>,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Remember the arguments of an AUTH that was accepted.
    pub fn accept(&mut self, arguments: &[String]) {
        self.authenticated = true;
        self.credentials = Some(arguments.to_vec());
    }

    /// The AUTH to send a freshly dialed upstream, if the session needs one.
    ///
    /// The configured secret wins; otherwise the client's own accepted
    /// credentials are replayed.
    pub fn replay_command(&self, config: &ProxyConfig) -> Option<Command> {
        if !self.authenticated {
            return None;
        }
        match (&config.auth_secret, &self.credentials) {
            (Some(secret), _) => Some(Command::new("AUTH", [secret.as_str()])),
            (None, Some(args)) if !args.is_empty() => Some(Command::new("AUTH", args.clone())),
            _ => None,
        }
    }
}
