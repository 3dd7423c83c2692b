//! Payload validation.
//!
//! Parsing is purely a validity gate: the parsed tree is dropped and the
//! payload is stored verbatim.

use thiserror::Error;

/// The payload failed to parse.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct ValidationError {
    pub reason: String,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Syntactic check of a configuration payload.
pub trait PayloadValidator: Send + Sync {
    /// Accept or reject the payload. Must never accept a partial parse.
    fn validate(&self, payload: &str) -> Result<(), ValidationError>;
}

/// Accepts exactly one well-formed YAML document.
///
/// An empty payload is a valid (null) document. Multi-document streams are
/// rejected since only one document would be applied. Duplicate mapping
/// keys are rejected too, since one of the values would be silently lost.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlValidator;

impl PayloadValidator for YamlValidator {
    fn validate(&self, payload: &str) -> Result<(), ValidationError> {
        serde_yaml::from_str::<serde_yaml::Value>(payload)
            .map(drop)
            .map_err(|e| ValidationError::new(e.to_string()))
    }
}
