use thiserror::Error;

/// Errors that abort the run before any tailing starts. Streaming failures
/// are handled per container task and never surface here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("{kind} {name:?} has no usable pod selector")]
    InvalidSelector { kind: &'static str, name: String },

    #[error("{kind} {name:?} not found")]
    ResourceNotFound { kind: &'static str, name: String },

    #[error("unsupported resource kind {0:?}")]
    UnsupportedResourceKind(String),

    #[error("failed to resolve {target}: {detail}")]
    ResolutionFailed { target: String, detail: String },
}
