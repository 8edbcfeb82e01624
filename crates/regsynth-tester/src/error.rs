//! Tester errors

/// Failures setting up a tester
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TesterError {
    /// No runtime with this name
    #[error("unknown candidate runtime `{0}` (expected script or python)")]
    UnknownRuntime(String),

    /// A zero timeout would fail every attempt
    #[error("test timeout must be greater than zero")]
    ZeroTimeout,
}
