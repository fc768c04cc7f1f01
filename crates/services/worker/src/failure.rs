//! Classification of job failures.

/// Why a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Correlation id or credential header missing
    MissingCredentials,
    /// The job or its payload is unusable as input
    MalformedInput,
    /// The payload could not be decoded
    Decode,
    /// Fetching the payload failed
    Transport,
    /// The extraction step failed at runtime
    ExtractionRuntime,
    /// The extraction result failed validation
    ResultValidation,
    /// Publishing the result failed
    Publish,
    /// Anything else
    Unclassified,
}

/// Whether redelivering a failed job can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Terminal,
    Retryable,
}

impl FailureKind {
    pub const fn disposition(self) -> Disposition {
        match self {
            Self::MissingCredentials
            | Self::MalformedInput
            | Self::Decode
            | Self::ResultValidation => Disposition::Terminal,
            Self::Transport | Self::ExtractionRuntime | Self::Publish | Self::Unclassified => {
                Disposition::Retryable
            }
        }
    }

    /// Whether a job failing this way goes back to the queue.
    pub const fn requeue(self) -> bool {
        matches!(self.disposition(), Disposition::Retryable)
    }
}

/// Errors that know their [`FailureKind`].
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;
}

/// A classified job failure with the reason published downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    /// Classifies `err`, using its message and source chain as the reason.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + Classify,
    {
        Self::new(err.failure_kind(), error_chain(err))
    }
}

/// Renders an error followed by its sources, separated by `": "`.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut reason = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        reason.push_str(": ");
        reason.push_str(&source.to_string());
        current = source.source();
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_kinds_are_requeued() {
        let requeued: Vec<_> = [
            FailureKind::MissingCredentials,
            FailureKind::MalformedInput,
            FailureKind::Decode,
            FailureKind::Transport,
            FailureKind::ExtractionRuntime,
            FailureKind::ResultValidation,
            FailureKind::Publish,
            FailureKind::Unclassified,
        ]
        .into_iter()
        .filter(|kind| kind.requeue())
        .collect();

        assert_eq!(
            requeued,
            [
                FailureKind::Transport,
                FailureKind::ExtractionRuntime,
                FailureKind::Publish,
                FailureKind::Unclassified,
            ]
        );
    }

    #[test]
    fn error_chain_appends_sources() {
        #[derive(Debug, thiserror::Error)]
        #[error("failed to stream data for a.jpg")]
        struct Outer(#[source] Inner);

        #[derive(Debug, thiserror::Error)]
        #[error("connection reset")]
        struct Inner;

        assert_eq!(
            error_chain(&Outer(Inner)),
            "failed to stream data for a.jpg: connection reset"
        );
    }
}
