mod command;
mod resp;
#[cfg(test)]
mod tests;

pub use command::{Command, DecodeError};
pub use resp::{FrameScanner, RespError, RespParser, RespValue, MAX_NESTING};
