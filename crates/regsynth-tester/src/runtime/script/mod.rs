//! Register script runtime
//!
//! The built-in candidate language. A script declares registers and may open
//! a `self_test:` block of reads, writes, waits and a final verdict. The
//! interpreter can only issue protocol requests and bounded waits, so
//! candidates run in-process without reaching anything else.
//!
//! ```text
//! driver "SMA Sunny Boy"
//! register status holding 30000 uint16
//! self_test:
//!     read status expect 1
//!     return true
//! ```

mod interpreter;
pub mod parser;

use super::{CandidateRuntime, CompileDiagnostic, LoadedCandidate, SelfTest};
use regsynth_registers::{RegisterSpec, RegisterValue};

pub use parser::{compile, MAX_WAIT_MS, STEP_LIMIT};

/// One self-test statement
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Read {
        register: RegisterSpec,
        expect: Option<RegisterValue>,
        line: u32,
    },
    Write {
        register: RegisterSpec,
        value: RegisterValue,
        line: u32,
    },
    Wait {
        millis: u64,
    },
    Return(bool),
}

/// Compiled script
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub driver: Option<String>,
    pub registers: Vec<RegisterSpec>,
    /// `None` when the script has no `self_test:` block
    pub self_test: Option<Vec<Step>>,
}

/// Runtime for register scripts
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptRuntime;

impl ScriptRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CandidateRuntime for ScriptRuntime {
    fn name(&self) -> &'static str {
        "register-script"
    }

    fn load(&self, source: &str) -> Result<Box<dyn LoadedCandidate>, CompileDiagnostic> {
        let script = compile(source)?;
        tracing::debug!(
            driver = script.driver.as_deref().unwrap_or("<unnamed>"),
            registers = script.registers.len(),
            self_test = script.self_test.is_some(),
            "script compiled"
        );
        Ok(Box::new(ScriptCandidate { script }))
    }
}

/// A compiled script ready to run
#[derive(Debug, Clone)]
pub struct ScriptCandidate {
    script: Script,
}

impl ScriptCandidate {
    #[must_use]
    pub fn script(&self) -> &Script {
        &self.script
    }
}

impl LoadedCandidate for ScriptCandidate {
    fn self_test(&self) -> Option<&dyn SelfTest> {
        self.script.self_test.as_ref().map(|_| self as &dyn SelfTest)
    }

    fn describe(&self) -> String {
        format!(
            "script `{}` ({} registers)",
            self.script.driver.as_deref().unwrap_or("unnamed"),
            self.script.registers.len()
        )
    }
}
