//! Generic RESP2 value parser and encoder.
//!
//! The proxy never interprets upstream replies beyond framing, so this parser
//! only has to answer two questions: "is this buffer a complete reply yet?"
//! and "what bytes does this synthetic reply encode to?".

#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Option<Vec<u8>>),
    Array(Option<Vec<RespValue>>),
}

/// Why a buffer could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespError {
    /// More bytes may complete the value.
    Incomplete,
    /// No amount of additional bytes will make this valid RESP.
    Invalid(String),
}

impl std::fmt::Display for RespError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RespError::Incomplete => write!(f, "incomplete RESP value"),
            RespError::Invalid(msg) => write!(f, "invalid RESP: {}", msg),
        }
    }
}

impl std::error::Error for RespError {}

/// Arrays nested deeper than this are rejected by [`RespParser::parse`].
pub const MAX_NESTING: usize = 512;

pub struct RespParser;

impl RespParser {
    pub fn parse(input: &[u8]) -> Result<(RespValue, usize), RespError> {
        Self::parse_nested(input, 0)
    }

    fn parse_nested(input: &[u8], depth: usize) -> Result<(RespValue, usize), RespError> {
        if input.is_empty() {
            return Err(RespError::Incomplete);
        }

        match input[0] {
            b'+' => Self::parse_simple_string(input),
            b'-' => Self::parse_error(input),
            b':' => Self::parse_integer(input),
            b'$' => Self::parse_bulk_string(input),
            b'*' => Self::parse_array(input, depth),
            other => Err(RespError::Invalid(format!(
                "unknown RESP type: {}",
                other as char
            ))),
        }
    }

    /// True when `input` holds one or more whole values and nothing else, or
    /// when it can never become valid RESP and should be passed on as-is.
    pub fn frame_complete(input: &[u8]) -> bool {
        FrameScanner::default().is_complete(input)
    }

    fn parse_simple_string(input: &[u8]) -> Result<(RespValue, usize), RespError> {
        let pos = Self::find_crlf(input).ok_or(RespError::Incomplete)?;
        let s = String::from_utf8_lossy(&input[1..pos]).to_string();
        Ok((RespValue::SimpleString(s), pos + 2))
    }

    fn parse_error(input: &[u8]) -> Result<(RespValue, usize), RespError> {
        let pos = Self::find_crlf(input).ok_or(RespError::Incomplete)?;
        let s = String::from_utf8_lossy(&input[1..pos]).to_string();
        Ok((RespValue::Error(s), pos + 2))
    }

    fn parse_integer(input: &[u8]) -> Result<(RespValue, usize), RespError> {
        let pos = Self::find_crlf(input).ok_or(RespError::Incomplete)?;
        let n = Self::parse_len(&input[1..pos])?;
        Ok((RespValue::Integer(n), pos + 2))
    }

    fn parse_bulk_string(input: &[u8]) -> Result<(RespValue, usize), RespError> {
        let pos = Self::find_crlf(input).ok_or(RespError::Incomplete)?;
        let len = Self::parse_len(&input[1..pos])?;

        if len == -1 {
            return Ok((RespValue::BulkString(None), pos + 2));
        }
        if len < 0 {
            return Err(RespError::Invalid(format!("negative bulk length {}", len)));
        }

        let start = pos + 2;
        let end = start
            .checked_add(len as usize)
            .ok_or_else(|| RespError::Invalid(format!("bulk length {} too large", len)))?;

        if end + 2 > input.len() {
            return Err(RespError::Incomplete);
        }
        if &input[end..end + 2] != b"\r\n" {
            return Err(RespError::Invalid("bulk string not CRLF terminated".to_string()));
        }

        let data = input[start..end].to_vec();
        Ok((RespValue::BulkString(Some(data)), end + 2))
    }

    fn parse_array(input: &[u8], depth: usize) -> Result<(RespValue, usize), RespError> {
        if depth >= MAX_NESTING {
            return Err(RespError::Invalid(format!(
                "arrays nested deeper than {}",
                MAX_NESTING
            )));
        }
        let pos = Self::find_crlf(input).ok_or(RespError::Incomplete)?;
        let len = Self::parse_len(&input[1..pos])?;

        if len == -1 {
            return Ok((RespValue::Array(None), pos + 2));
        }
        if len < 0 {
            return Err(RespError::Invalid(format!("negative array length {}", len)));
        }

        let mut elements = Vec::new();
        let mut offset = pos + 2;

        for _ in 0..len {
            let (value, consumed) = Self::parse_nested(&input[offset..], depth + 1)?;
            elements.push(value);
            offset += consumed;
        }

        Ok((RespValue::Array(Some(elements)), offset))
    }

    fn parse_len(digits: &[u8]) -> Result<i64, RespError> {
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| {
                RespError::Invalid(format!(
                    "bad length or integer: {:?}",
                    String::from_utf8_lossy(digits)
                ))
            })
    }

    #[inline]
    fn find_crlf(input: &[u8]) -> Option<usize> {
        memchr::memchr_iter(b'\r', input).find(|&pos| input.get(pos + 1) == Some(&b'\n'))
    }

    pub fn encode(value: &RespValue) -> Vec<u8> {
        match value {
            RespValue::SimpleString(s) => format!("+{}\r\n", s).into_bytes(),
            RespValue::Error(s) => format!("-{}\r\n", s).into_bytes(),
            RespValue::Integer(n) => format!(":{}\r\n", n).into_bytes(),
            RespValue::BulkString(None) => b"$-1\r\n".to_vec(),
            RespValue::BulkString(Some(data)) => {
                let mut result = format!("${}\r\n", data.len()).into_bytes();
                result.extend_from_slice(data);
                result.extend_from_slice(b"\r\n");
                result
            }
            RespValue::Array(None) => b"*-1\r\n".to_vec(),
            RespValue::Array(Some(elements)) => {
                let mut result = format!("*{}\r\n", elements.len()).into_bytes();
                for element in elements {
                    result.extend_from_slice(&Self::encode(element));
                }
                result
            }
        }
    }
}

/// Incremental check for "does this buffer end on a value boundary?".
///
/// Walks the buffer header by header with a count of elements still owed,
/// so nesting depth costs no stack. State is kept between calls: feed it the
/// same buffer as it grows and each call resumes at the first unfinished
/// element instead of rescanning from the start.
#[derive(Debug, Default, Clone)]
pub struct FrameScanner {
    /// Start of the first element not yet fully seen
    offset: usize,
    /// Elements still owed by the values opened so far
    pending: u64,
    /// Buffer length below which another scan cannot make progress
    needed: usize,
}

/// Outcome of examining one header.
enum Step {
    /// Header (and body, for bulk strings) spans `consumed` bytes and opens
    /// `children` further elements
    Element { consumed: usize, children: u64 },
    /// At least `needed` bytes are required from the element start
    Incomplete { needed: usize },
    Invalid,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `input` holds only whole values, or can never be valid.
    ///
    /// `input` must extend the buffer passed on the previous call.
    pub fn is_complete(&mut self, input: &[u8]) -> bool {
        if input.len() < self.needed {
            return false;
        }

        loop {
            if self.pending == 0 {
                if self.offset >= input.len() {
                    return self.offset > 0;
                }
                self.pending = 1;
            }

            match Self::step(&input[self.offset..]) {
                Step::Element { consumed, children } => {
                    self.offset += consumed;
                    match (self.pending - 1).checked_add(children) {
                        Some(pending) => self.pending = pending,
                        None => return true,
                    }
                }
                Step::Incomplete { needed } => {
                    self.needed = self.offset + needed;
                    return false;
                }
                Step::Invalid => return true,
            }
        }
    }

    fn step(input: &[u8]) -> Step {
        let Some(&kind) = input.first() else {
            return Step::Incomplete { needed: 1 };
        };
        if !matches!(kind, b'+' | b'-' | b':' | b'$' | b'*') {
            return Step::Invalid;
        }
        let Some(pos) = RespParser::find_crlf(input) else {
            return Step::Incomplete {
                needed: input.len() + 1,
            };
        };
        let header = pos + 2;

        match kind {
            b'+' | b'-' => Step::Element {
                consumed: header,
                children: 0,
            },
            _ => {
                let Ok(len) = RespParser::parse_len(&input[1..pos]) else {
                    return Step::Invalid;
                };
                match kind {
                    b':' => Step::Element {
                        consumed: header,
                        children: 0,
                    },
                    _ if len == -1 => Step::Element {
                        consumed: header,
                        children: 0,
                    },
                    _ if len < 0 => Step::Invalid,
                    b'*' => Step::Element {
                        consumed: header,
                        children: len as u64,
                    },
                    _ => {
                        let Some(end) = header
                            .checked_add(len as usize)
                            .and_then(|end| end.checked_add(2))
                        else {
                            return Step::Invalid;
                        };
                        if end > input.len() {
                            Step::Incomplete { needed: end }
                        } else if &input[end - 2..end] != b"\r\n" {
                            Step::Invalid
                        } else {
                            Step::Element {
                                consumed: end,
                                children: 0,
                            }
                        }
                    }
                }
            }
        }
    }
}

impl RespValue {
    #[inline]
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    #[inline]
    pub fn err(msg: &str) -> Self {
        RespValue::Error(msg.to_string())
    }

    #[inline]
    pub fn nil() -> Self {
        RespValue::BulkString(None)
    }

    #[inline]
    pub fn nil_array() -> Self {
        RespValue::Array(None)
    }

    #[inline]
    pub fn empty_array() -> Self {
        RespValue::Array(Some(Vec::new()))
    }
}
