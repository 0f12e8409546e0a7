use thiserror::Error;

use crate::job::Stage;

/// Deterministic canonical conversion failures.
/// Any of these hands the input over to the fallback path.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no deterministic decoder for \"{0}\" inputs")]
    UnsupportedFormat(String),

    #[error("RINEX parsing error: {0}")]
    Rinex(String),

    #[error("no canonical record produced")]
    NoRecords,

    #[error("validity gate: {valid}/{total} valid records")]
    ValidityGate { valid: usize, total: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Deterministic location extraction failures.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no valid location record ({rejected}/{total} rejected)")]
    NoValidRecords { total: usize, rejected: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Code generation capability failures.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("capability unreachable: {0}")]
    Unavailable(String),

    #[error("capability refused credentials (HTTP {0})")]
    Unauthorized(u16),

    #[error("rate limited by capability")]
    RateLimited,

    #[error("capability error (HTTP {status}): {body}")]
    Http { status: u16, body: String },

    #[error("malformed capability response: {0}")]
    Malformed(String),
}

impl GenerationError {
    /// True when retrying cannot help: the capability is either
    /// unreachable or rejects our credentials.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Unauthorized(_))
    }
}

/// Generated procedure execution failures.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("procedure produced no records")]
    NoOutput,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("generation failed: {0}")]
    GenerationFailed(#[from] GenerationError),

    #[error("execution failed: {0}")]
    ExecutionFailed(#[from] SandboxError),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("gave up after {attempts} attempts, last failure: {last}")]
    MaxAttemptsExceeded {
        attempts: usize,
        last: Box<FallbackError>,
    },

    #[error("code generation capability unavailable: {0}")]
    CapabilityUnavailable(String),
}

/// Job scoped failure, always tagged with the [Stage] it happened in.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("{stage} failed: {source}")]
    Fallback {
        stage: Stage,
        #[source]
        source: FallbackError,
    },

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: Stage, to: Stage },

    #[error("worker pool is closed")]
    PoolClosed,
}
