//! The pluggable extraction step.

use serde::Serialize;

use crate::failure::{Classify, FailureKind};

/// Turns a job payload into a structured result.
///
/// Implementations are pure and synchronous; the workflow runs them on the blocking thread pool.
pub trait Extract: Send + Sync + 'static {
    /// Result published in the `message` field of a success envelope. The default value is
    /// published with failure envelopes.
    type Output: Serialize + Default + Send + Sync + 'static;

    /// Human-readable name of the step, used in failure reasons, e.g. `"EXIF extraction"`.
    fn description(&self) -> &str;

    fn extract(&self, payload: &[u8]) -> Result<Self::Output, ExtractError>;
}

/// Category of an extraction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractErrorKind {
    /// The payload is not acceptable input
    InvalidInput,
    /// The payload could not be decoded
    Decode,
    /// The step failed for reasons that may not recur
    Runtime,
    /// The step produced a result that failed validation
    ResultValidation,
}

/// Error returned by an [`Extract`] implementation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ExtractError {
    kind: ExtractErrorKind,
    message: String,
}

impl ExtractError {
    pub fn new(kind: ExtractErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ExtractErrorKind::InvalidInput, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ExtractErrorKind::Decode, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ExtractErrorKind::Runtime, message)
    }

    pub fn result_validation(message: impl Into<String>) -> Self {
        Self::new(ExtractErrorKind::ResultValidation, message)
    }

    pub fn kind(&self) -> ExtractErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Failure reason published downstream for this error.
    pub fn reason(&self, description: &str) -> String {
        match self.kind {
            ExtractErrorKind::InvalidInput => {
                format!("Bad input or parsing error: {}", self.message)
            }
            ExtractErrorKind::Decode => format!("failed to decode payload: {}", self.message),
            ExtractErrorKind::Runtime => format!("{description} failed: {}", self.message),
            ExtractErrorKind::ResultValidation => {
                format!("{description} validation failed: {}", self.message)
            }
        }
    }
}

impl Classify for ExtractError {
    fn failure_kind(&self) -> FailureKind {
        match self.kind {
            ExtractErrorKind::InvalidInput => FailureKind::MalformedInput,
            ExtractErrorKind::Decode => FailureKind::Decode,
            ExtractErrorKind::Runtime => FailureKind::ExtractionRuntime,
            ExtractErrorKind::ResultValidation => FailureKind::ResultValidation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_name_the_step() {
        assert_eq!(
            ExtractError::runtime("model not loaded").reason("classification"),
            "classification failed: model not loaded"
        );
        assert_eq!(
            ExtractError::result_validation("no labels").reason("classification"),
            "classification validation failed: no labels"
        );
        assert_eq!(
            ExtractError::invalid_input("truncated header").reason("classification"),
            "Bad input or parsing error: truncated header"
        );
    }

    #[test]
    fn kinds_map_to_failure_kinds() {
        let cases = [
            (ExtractError::invalid_input("x"), FailureKind::MalformedInput),
            (ExtractError::decode("x"), FailureKind::Decode),
            (ExtractError::runtime("x"), FailureKind::ExtractionRuntime),
            (ExtractError::result_validation("x"), FailureKind::ResultValidation),
        ];

        for (err, expected) in cases {
            assert_eq!(err.failure_kind(), expected, "{:?}", err.kind());
        }
    }
}
