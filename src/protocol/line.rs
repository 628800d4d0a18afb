//! Line parsing and encoding
//!
//! Handles the text framing of protocol lines and correlation id generation.

use std::fmt;
use thiserror::Error;

use super::{VERB_DONE, VERB_ERR, VERB_METRIC, VERB_REGISTER};

/// Protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("empty line")]
    Empty,
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Token linking a request to its eventual response across the
/// interleaved stream. Chosen by whichever side initiates the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh, unguessable id for a self-initiated exchange
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One wire unit: a correlation id followed by verb and argument tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Correlation id of the exchange this line belongs to
    pub id: CorrelationId,
    /// Verb and arguments, in order
    pub tokens: Vec<String>,
}

impl Line {
    pub fn new(id: CorrelationId, tokens: Vec<String>) -> Self {
        Self { id, tokens }
    }

    /// Parse a raw line as received from the controller.
    ///
    /// The trailing newline (and carriage return) is stripped before
    /// splitting. A line with an id but no further tokens parses
    /// successfully; the dispatcher decides what to do with it.
    pub fn parse(raw: &str) -> ProtocolResult<Self> {
        let mut parts = raw.trim_end_matches(['\r', '\n']).split_whitespace();

        let id = parts.next().ok_or(ProtocolError::Empty)?;
        let tokens = parts.map(str::to_string).collect();

        Ok(Self {
            id: CorrelationId::from(id),
            tokens,
        })
    }

    /// Encode into the wire format, including the terminating newline
    pub fn encode(&self) -> String {
        format!("{} {}\n", self.id, self.tokens.join(" "))
    }

    /// First token, if any. By convention this is the verb.
    pub fn verb(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }

    /// Registration announcement sent once at session start
    pub fn register(id: &CorrelationId, role: &str, description: &str) -> Self {
        Self::new(
            id.clone(),
            vec![
                VERB_REGISTER.to_string(),
                role.to_string(),
                description.to_string(),
            ],
        )
    }

    /// Periodic measurement report
    pub fn metric(id: &CorrelationId, name: &str, value: f64) -> Self {
        Self::new(
            id.clone(),
            vec![
                VERB_METRIC.to_string(),
                name.to_string(),
                format!("{value:.3}"),
            ],
        )
    }

    /// Positive reply to a completed command
    pub fn done(id: &CorrelationId) -> Self {
        Self::new(id.clone(), vec![VERB_DONE.to_string()])
    }

    /// Negative reply to a failed or malformed command
    pub fn err(id: &CorrelationId) -> Self {
        Self::new(id.clone(), vec![VERB_ERR.to_string()])
    }
}
