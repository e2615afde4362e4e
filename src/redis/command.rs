//! Client request model and the minimal RESP request codec.
//!
//! Decoding is deliberately permissive: it only checks that the buffer looks
//! like a flat multi-bulk array and then trusts the payload blocks, ignoring
//! the declared bulk lengths. The proxy exists to keep workers answered, not
//! to police their framing.

/// A single client request: command name plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub arguments: Vec<String>,
}

/// Reasons a buffer could not be decoded into a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer than three CRLF-separated blocks.
    TooShort,
    /// First block is not the `*<n>` header of a bulk string array.
    NotBulkArray,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::TooShort => write!(f, "RESP too short"),
            DecodeError::NotBulkArray => write!(f, "not an array of bulk strings"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl Command {
    pub fn new<N, I, A>(name: N, arguments: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Command {
            name: name.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
        }
    }

    /// Case-insensitive command name check.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Decode exactly one already-assembled client request.
    ///
    /// Blocks are split on CRLF; block 0 must be `*<(blocks - 2) / 2>`, block 2
    /// is the name and every even block from 4 onwards is an argument.
    pub fn decode(input: &[u8]) -> Result<Command, DecodeError> {
        if input.first() != Some(&b'*') {
            return Err(DecodeError::NotBulkArray);
        }

        let blocks = split_crlf(input);
        if blocks.len() < 3 {
            return Err(DecodeError::TooShort);
        }

        let array_len = (blocks.len() - 2) / 2;
        let header = format!("*{}", array_len);
        if blocks[0] != header.as_bytes() {
            return Err(DecodeError::NotBulkArray);
        }

        let arguments = blocks
            .iter()
            .enumerate()
            .skip(4)
            .filter(|(i, _)| i % 2 == 0)
            .map(|(_, block)| String::from_utf8_lossy(block).into_owned())
            .collect();

        Ok(Command {
            name: String::from_utf8_lossy(blocks[2]).into_owned(),
            arguments,
        })
    }

    /// Encode as a canonical multi-bulk array.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("*{}\r\n", self.arguments.len() + 1).into_bytes();
        for part in std::iter::once(&self.name).chain(self.arguments.iter()) {
            out.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
            out.extend_from_slice(part.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.arguments {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Split on every CRLF, keeping the (possibly empty) trailing block.
fn split_crlf(input: &[u8]) -> Vec<&[u8]> {
    let mut blocks = Vec::new();
    let mut start = 0;
    for pos in memchr::memmem::find_iter(input, b"\r\n") {
        blocks.push(&input[start..pos]);
        start = pos + 2;
    }
    blocks.push(&input[start..]);
    blocks
}
