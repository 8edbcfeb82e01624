//! Candidate runtime contract
//!
//! A runtime turns candidate source into a [`LoadedCandidate`]. Loading never
//! executes anything; a load failure is a [`CompileDiagnostic`]. A loaded
//! candidate either exposes the [`SelfTest`] capability or it does not, in
//! which case the tester falls back to its own connectivity test.

pub mod python;
pub mod script;

use regsynth_oracle::{ClientError, ExceptionCode};
use regsynth_registers::FunctionClass;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

pub use python::PythonRuntime;
pub use script::ScriptRuntime;

/// Where a self-test should connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestTarget {
    pub endpoint: SocketAddr,
}

/// Why a candidate could not be loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileDiagnostic {
    pub message: String,
    /// 1-based
    pub line: Option<u32>,
    /// 1-based
    pub column: Option<u32>,
}

impl CompileDiagnostic {
    /// Diagnostic with a source position
    #[must_use]
    pub fn at(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }

    /// Diagnostic without a position
    #[must_use]
    pub fn general(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }
}

impl fmt::Display for CompileDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "line {line}, column {column}: {}", self.message),
            (Some(line), None) => write!(f, "line {line}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for CompileDiagnostic {}

/// A value the candidate read that differs from the expected one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedMismatch {
    pub register: String,
    pub address: Option<u16>,
    /// Canonical big-endian bytes
    pub expected_bytes: Vec<u8>,
    pub actual_bytes: Vec<u8>,
    pub detail: String,
}

/// Structured self-test result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfTestReport {
    pub success: bool,
    pub message: Option<String>,
    pub tested_registers: Vec<String>,
    pub mismatch: Option<ObservedMismatch>,
}

/// What a self-test returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelfTestValue {
    /// Plain pass/fail
    Verdict(bool),
    /// Detailed result
    Report(SelfTestReport),
    /// Anything else; counts as success without detail
    Opaque,
}

/// How a self-test failed instead of returning
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CandidateFault {
    /// The server answered with a protocol exception
    #[error("{code} on {} request {start}+{count}", .class.map_or("unknown", FunctionClass::keyword))]
    Protocol {
        code: ExceptionCode,
        class: Option<FunctionClass>,
        start: u16,
        count: u16,
        /// Offending address when the candidate reported it directly
        address: Option<u16>,
    },

    /// Connecting or talking to the server failed
    #[error("transport failure: {0}")]
    Transport(String),

    /// The candidate itself failed
    #[error("{0}")]
    Runtime(String),
}

impl From<ClientError> for CandidateFault {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Exception {
                function,
                code,
                start,
                count,
            } => CandidateFault::Protocol {
                code,
                class: class_of_function(function),
                start,
                count,
                address: (count == 1).then_some(start),
            },
            e if e.is_transport() => CandidateFault::Transport(e.to_string()),
            e => CandidateFault::Runtime(e.to_string()),
        }
    }
}

/// Allow-list class a function code is validated against
#[must_use]
pub fn class_of_function(function: u8) -> Option<FunctionClass> {
    match function {
        0x06 | 0x10 => Some(FunctionClass::ReadHolding),
        fc => FunctionClass::from_function_code(fc),
    }
}

/// Entry point a candidate exposes for testing itself
#[async_trait::async_trait]
pub trait SelfTest: Send + Sync {
    /// Run against `target`
    async fn run(&self, target: TestTarget) -> Result<SelfTestValue, CandidateFault>;
}

/// A candidate that loaded successfully
pub trait LoadedCandidate: Send + Sync + fmt::Debug {
    /// Self-test capability, if the candidate has one
    fn self_test(&self) -> Option<&dyn SelfTest>;

    /// Short human-readable label
    fn describe(&self) -> String;
}

/// Loads candidate source
pub trait CandidateRuntime: Send + Sync + fmt::Debug {
    /// Runtime name used in logs
    fn name(&self) -> &'static str;

    /// Load `source` without executing it
    ///
    /// # Errors
    /// `CompileDiagnostic` when the source does not compile
    fn load(&self, source: &str) -> Result<Box<dyn LoadedCandidate>, CompileDiagnostic>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_diagnostic_display() {
        assert_eq!(
            CompileDiagnostic::at(3, 7, "unexpected token").to_string(),
            "line 3, column 7: unexpected token"
        );
        assert_eq!(CompileDiagnostic::general("empty").to_string(), "empty");
    }

    #[test]
    fn client_exception_becomes_protocol_fault() {
        let fault = CandidateFault::from(ClientError::Exception {
            function: 0x04,
            code: ExceptionCode::IllegalDataAddress,
            start: 5,
            count: 1,
        });
        assert_eq!(
            fault,
            CandidateFault::Protocol {
                code: ExceptionCode::IllegalDataAddress,
                class: Some(FunctionClass::ReadInput),
                start: 5,
                count: 1,
                address: Some(5),
            }
        );
    }

    #[test]
    fn multi_register_exception_has_no_direct_address() {
        let fault = CandidateFault::from(ClientError::Exception {
            function: 0x10,
            code: ExceptionCode::IllegalDataAddress,
            start: 5,
            count: 2,
        });
        assert!(matches!(
            fault,
            CandidateFault::Protocol {
                class: Some(FunctionClass::ReadHolding),
                address: None,
                ..
            }
        ));
    }

    #[test]
    fn closed_connection_is_transport() {
        assert!(matches!(
            CandidateFault::from(ClientError::Closed),
            CandidateFault::Transport(_)
        ));
    }
}
