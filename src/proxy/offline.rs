//! Canned replies used while no upstream is reachable.
//!
//! The table covers the commands Resque's data store issues for queue polling
//! and worker bookkeeping. Replies are what an empty Redis would send, so
//! workers see "no jobs" rather than connection errors.

use super::auth::AuthState;
use super::config::ProxyConfig;
use crate::redis::{Command, RespParser, RespValue};
use std::time::Duration;
use tracing::debug;

pub const ERR_NO_PASSWORD: &str = "ERR Client sent AUTH, but no password is set";
pub const ERR_INVALID_PASSWORD: &str = "ERR invalid password";
pub const ERR_AUTH_ARITY: &str = "ERR wrong number of arguments for 'auth' command";
pub const ERR_UNAVAILABLE: &str = "ERR Redis Server Unavailable";

/// Behaviour for one offline command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineReply {
    /// Check the password against the configured secret
    Auth,
    /// `$-1`
    NullBulk,
    /// `:0`
    Zero,
    /// `:1`
    One,
    /// `+OK`
    Ok,
    /// `*0`
    EmptyArray,
    /// Sleep for the trailing timeout argument, then `*-1`
    BlockingPop,
}

static OFFLINE_TABLE: &[(&str, OfflineReply)] = &[
    ("AUTH", OfflineReply::Auth),
    ("LPOP", OfflineReply::NullBulk),
    ("GET", OfflineReply::NullBulk),
    ("LLEN", OfflineReply::Zero),
    ("DEL", OfflineReply::Zero),
    ("SREM", OfflineReply::Zero),
    ("SISMEMBER", OfflineReply::Zero),
    ("SADD", OfflineReply::One),
    ("SET", OfflineReply::Ok),
    ("SMEMBERS", OfflineReply::EmptyArray),
    ("BLPOP", OfflineReply::BlockingPop),
];

impl OfflineReply {
    /// Look up a command name, ignoring case.
    pub fn lookup(name: &str) -> Option<OfflineReply> {
        OFFLINE_TABLE
            .iter()
            .find(|(cmd, _)| cmd.eq_ignore_ascii_case(name))
            .map(|(_, reply)| *reply)
    }
}

/// Blocking-pop timeout in whole seconds, if the last argument is a positive
/// integer.
pub fn blocking_timeout(cmd: &Command) -> Option<Duration> {
    cmd.arguments
        .last()
        .and_then(|arg| arg.parse::<i64>().ok())
        .filter(|secs| *secs > 0)
        .map(|secs| Duration::from_secs(secs as u64))
}

/// Produce the synthetic reply for `cmd`.
///
/// A successful offline AUTH marks `auth` as authenticated. BLPOP sleeps on
/// the tokio timer, so dropping the returned future cancels the wait.
pub async fn respond(cmd: &Command, config: &ProxyConfig, auth: &mut AuthState) -> Vec<u8> {
    let value = match OfflineReply::lookup(&cmd.name) {
        Some(OfflineReply::Auth) => authenticate(cmd, config, auth),
        Some(OfflineReply::NullBulk) => RespValue::nil(),
        Some(OfflineReply::Zero) => RespValue::Integer(0),
        Some(OfflineReply::One) => RespValue::Integer(1),
        Some(OfflineReply::Ok) => RespValue::ok(),
        Some(OfflineReply::EmptyArray) => RespValue::empty_array(),
        Some(OfflineReply::BlockingPop) => {
            if let Some(wait) = blocking_timeout(cmd) {
                debug!(seconds = wait.as_secs(), "emulating blocking pop timeout");
                tokio::time::sleep(wait).await;
            }
            RespValue::nil_array()
        }
        None => {
            debug!(command = %cmd.name.to_uppercase(), "no offline reply for command");
            unavailable()
        }
    };
    RespParser::encode(&value)
}

/// Reply for a request that could not be decoded at all.
pub fn unavailable_reply() -> Vec<u8> {
    RespParser::encode(&unavailable())
}

fn unavailable() -> RespValue {
    RespValue::err(ERR_UNAVAILABLE)
}

fn authenticate(cmd: &Command, config: &ProxyConfig, auth: &mut AuthState) -> RespValue {
    let Some(password) = cmd.arguments.last() else {
        return RespValue::err(ERR_AUTH_ARITY);
    };
    match &config.auth_secret {
        None => RespValue::err(ERR_NO_PASSWORD),
        Some(secret) if secret == password => {
            auth.accept(&cmd.arguments);
            RespValue::ok()
        }
        Some(_) => RespValue::err(ERR_INVALID_PASSWORD),
    }
}
