//! Error types for the synthesis core
//!
//! Nothing inside the retry loop is fatal: generation, test and experience
//! failures are folded into attempt results or logged. These types surface
//! only at the edges (building an orchestrator, loading configuration) or as
//! values the loop converts.

use regsynth_oracle::OracleError;
use regsynth_registers::FunctionClass;
use regsynth_tester::TesterError;

/// Errors building or running the orchestrator outside the retry loop
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Tester could not be set up
    #[error("tester error: {0}")]
    Tester(#[from] TesterError),

    /// Oracle could not be started
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Retry budget of zero
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    /// Zero test timeout
    #[error("test_timeout_ms must be greater than zero")]
    ZeroTimeout,

    /// Superset admits no address in any class
    #[error("safety superset is empty")]
    EmptySuperset,

    /// Superset admits no address for a class the server serves
    #[error("safety superset has no {0} addresses")]
    EmptySupersetClass(FunctionClass),

    /// Config file unreadable
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Environment override did not parse
    #[error("invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },
}

/// Code generation failures, recorded as failed attempts
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The generator itself failed
    #[error("generation failed: {0}")]
    Failed(String),

    /// Generator returned only whitespace
    #[error("generator returned an empty candidate")]
    Empty,

    /// Generator did not answer in time
    #[error("generation timed out after {0} ms")]
    Timeout(u64),
}

/// Spec parsing failures; the orchestrator proceeds with an empty map
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecParseError {
    /// Extraction patterns could not be built
    #[error("extraction pattern invalid: {0}")]
    Pattern(String),

    /// Parser-specific failure
    #[error("spec parsing failed: {0}")]
    Failed(String),
}

/// Experience store failures; logged and ignored by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExperienceError {
    /// Store unreachable or refused the operation
    #[error("experience store unavailable: {0}")]
    Unavailable(String),

    /// Record could not be encoded
    #[error("experience record invalid: {0}")]
    Invalid(String),
}
