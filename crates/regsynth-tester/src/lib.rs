//! Candidate testing against the register oracle
//!
//! - [`runtime`]: how candidate source is loaded and self-tested
//!   ([`ScriptRuntime`] in-process, [`PythonRuntime`] in a subprocess)
//! - [`Tester`]: one test run under a hard timeout
//! - [`diagnosis`]: classification into a single [`DiagnosisKind`]
//!
//! # Example
//!
//! ```rust,no_run
//! use regsynth_oracle::Oracle;
//! use regsynth_registers::ValidAddressSet;
//! use regsynth_tester::{ScriptRuntime, TestRequest, Tester};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let oracle = Oracle::ephemeral(ValidAddressSet::uniform(30000..30100)).await?;
//! let session = oracle.session().await;
//! let tester = Tester::new(Arc::new(ScriptRuntime::new()));
//! let request = TestRequest::new("self_test:\n  read holding 5 uint16\n", session.epoch());
//! let result = tester.run(&session, &request).await;
//! assert!(!result.success);
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]

pub mod attempt;
pub mod diagnosis;
pub mod error;
pub mod fallback;
pub mod runtime;
pub mod tester;

pub use attempt::AttemptResult;
pub use diagnosis::{extract, Diagnosis, DiagnosisKind, Execution, RawTestOutcome};
pub use error::TesterError;
pub use fallback::{ExpectedRegister, SENTINEL_ADDRESSES};
pub use runtime::{
    CandidateFault, CandidateRuntime, CompileDiagnostic, LoadedCandidate, PythonRuntime,
    ScriptRuntime, SelfTest, SelfTestReport, SelfTestValue, TestTarget,
};
pub use tester::{TestRequest, Tester, DEFAULT_TEST_TIMEOUT};

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Candidate languages the tester can load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    #[default]
    Script,
    Python,
}

impl RuntimeKind {
    /// Instantiate the runtime
    #[must_use]
    pub fn build(self) -> Arc<dyn CandidateRuntime> {
        match self {
            RuntimeKind::Script => Arc::new(ScriptRuntime::new()),
            RuntimeKind::Python => Arc::new(PythonRuntime::new()),
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = TesterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "script" | "register-script" => Ok(RuntimeKind::Script),
            "python" | "py" => Ok(RuntimeKind::Python),
            other => Err(TesterError::UnknownRuntime(other.to_string())),
        }
    }
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
