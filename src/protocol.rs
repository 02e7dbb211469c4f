//! Control signal parsing.
//!
//! Client to server messages carry a requested group count as ASCII decimal
//! text, e.g. `1000`. The server multiplies it by the session's group width
//! to get the frame length in samples. Any other content is a protocol fault
//! for the demand-driven policy.
//!
//! ```text
//! Client:  "3"
//! Server:  <60 bytes: 15 little-endian f32 samples>
//! ```

use thiserror::Error;

/// Malformed or out-of-range control signal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("control signal is not valid UTF-8")]
    NotUtf8,
    #[error("control signal {0:?} is not a base-10 integer")]
    NotInteger(String),
    #[error("requested group count {0} is negative")]
    Negative(i64),
    #[error("requested group count {requested} exceeds maximum {max}")]
    TooLarge { requested: i64, max: usize },
}

/// Parse a control signal as a signed base-10 integer.
///
/// No whitespace trimming: `" 3"` is as malformed as `"abc"`.
pub fn parse_group_count(input: &[u8]) -> Result<i64, SignalError> {
    let text = std::str::from_utf8(input).map_err(|_| SignalError::NotUtf8)?;
    text.parse::<i64>()
        .map_err(|_| SignalError::NotInteger(truncate(text)))
}

/// Check a parsed count against `[0, max]`.
pub fn validate_group_count(requested: i64, max: usize) -> Result<usize, SignalError> {
    if requested < 0 {
        return Err(SignalError::Negative(requested));
    }
    match usize::try_from(requested) {
        Ok(groups) if groups <= max => Ok(groups),
        _ => Err(SignalError::TooLarge { requested, max }),
    }
}

/// Parse and validate a control signal in one step.
pub fn parse_request(input: &[u8], max: usize) -> Result<usize, SignalError> {
    validate_group_count(parse_group_count(input)?, max)
}

/// Render a group count as a control signal.
pub fn format_request(groups: usize) -> String {
    groups.to_string()
}

/// Keep error messages bounded for oversized garbage.
fn truncate(text: &str) -> String {
    const MAX_ECHO: usize = 32;
    match text.char_indices().nth(MAX_ECHO) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
