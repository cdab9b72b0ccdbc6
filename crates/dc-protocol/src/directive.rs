//! In-band shell directives
//!
//! Shell progress chunks are raw terminal input, except for the resize
//! directive `SIZE:<cols>:<rows>` which is consumed by the agent and never
//! reaches the shell.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix marking a resize directive
pub const RESIZE_PREFIX: &[u8] = b"SIZE:";

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Default terminal size (24x80)
    pub fn default_size() -> Self {
        Self { rows: 24, cols: 80 }
    }

    /// Render as a resize directive
    pub fn to_directive(&self) -> String {
        format!("SIZE:{}:{}", self.cols, self.rows)
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::default_size()
    }
}

/// A malformed resize directive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectiveError {
    /// Directive did not have the `SIZE:<cols>:<rows>` shape
    #[error("malformed resize directive")]
    Malformed,

    /// Dimensions outside the 16-bit range
    #[error("invalid size")]
    OutOfRange,
}

/// One inbound shell chunk, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellInput<'a> {
    /// Change the terminal dimensions
    Resize(TerminalSize),
    /// Raw bytes for the shell's stdin
    Data(&'a [u8]),
}

impl<'a> ShellInput<'a> {
    /// Classify a chunk. Anything starting with `SIZE:` must be a valid
    /// directive; everything else is data.
    pub fn parse(chunk: &'a [u8]) -> Result<Self, DirectiveError> {
        match chunk.strip_prefix(RESIZE_PREFIX) {
            Some(rest) => parse_dimensions(rest).map(ShellInput::Resize),
            None => Ok(ShellInput::Data(chunk)),
        }
    }
}

fn parse_dimensions(rest: &[u8]) -> Result<TerminalSize, DirectiveError> {
    let text = std::str::from_utf8(rest).map_err(|_| DirectiveError::Malformed)?;
    let text = text.trim_end_matches(['\r', '\n']);

    let (cols, rows) = text.split_once(':').ok_or(DirectiveError::Malformed)?;
    let cols = parse_dimension(cols)?;
    let rows = parse_dimension(rows)?;

    Ok(TerminalSize::new(rows, cols))
}

fn parse_dimension(field: &str) -> Result<u16, DirectiveError> {
    let field = field.trim();
    let is_number = field
        .strip_prefix(['-', '+'])
        .unwrap_or(field)
        .bytes()
        .all(|b| b.is_ascii_digit());
    if field.is_empty() || !is_number {
        return Err(DirectiveError::Malformed);
    }

    // Any syntactically valid integer that does not fit is out of range,
    // including values too large for i64.
    let value: i64 = field.parse().map_err(|_| DirectiveError::OutOfRange)?;
    u16::try_from(value).map_err(|_| DirectiveError::OutOfRange)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resize() {
        assert_eq!(
            ShellInput::parse(b"SIZE:120:40"),
            Ok(ShellInput::Resize(TerminalSize::new(40, 120)))
        );
    }

    #[test]
    fn test_parse_data() {
        assert_eq!(ShellInput::parse(b"ls\r"), Ok(ShellInput::Data(b"ls\r")));
        assert_eq!(ShellInput::parse(b"SIZ"), Ok(ShellInput::Data(b"SIZ")));
    }

    #[test]
    fn test_bounds() {
        assert_eq!(
            ShellInput::parse(b"SIZE:65535:0"),
            Ok(ShellInput::Resize(TerminalSize::new(0, 65535)))
        );
        assert_eq!(
            ShellInput::parse(b"SIZE:65536:24"),
            Err(DirectiveError::OutOfRange)
        );
        assert_eq!(
            ShellInput::parse(b"SIZE:80:-1"),
            Err(DirectiveError::OutOfRange)
        );
        assert_eq!(
            ShellInput::parse(b"SIZE:99999999999999999999999:24"),
            Err(DirectiveError::OutOfRange)
        );
    }

    #[test]
    fn test_malformed() {
        for chunk in [&b"SIZE:"[..], b"SIZE:80", b"SIZE:a:b", b"SIZE:80:", b"SIZE:\xff:1"] {
            assert_eq!(ShellInput::parse(chunk), Err(DirectiveError::Malformed));
        }
    }

    #[test]
    fn test_directive_render() {
        assert_eq!(TerminalSize::new(24, 80).to_directive(), "SIZE:80:24");
    }
}
