//! Diagnostic extraction
//!
//! [`extract`] is pure: it folds whatever a test run observed into exactly
//! one [`DiagnosisKind`]. Precedence, highest first:
//!
//! 1. `CompileError` (nothing ran)
//! 2. `IllegalAddress` (a register that does not exist has no correct value)
//! 3. `ValueMismatch`
//! 4. `ConnectionFailure`, only if no protocol exception was seen
//! 5. `Unknown`

use crate::runtime::{CandidateFault, CompileDiagnostic, ObservedMismatch};
use regsynth_oracle::{ExceptionCode, Rejection};
use regsynth_registers::{
    locate_byte_mismatch, ByteMismatch, FunctionClass, ValidAddressSet, SUGGESTION_LIMIT,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Normalized classification of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosisKind {
    Success,
    CompileError,
    IllegalAddress,
    ValueMismatch,
    ConnectionFailure,
    Unknown,
}

impl DiagnosisKind {
    #[inline]
    #[must_use]
    pub fn is_success(self) -> bool {
        self == DiagnosisKind::Success
    }
}

impl fmt::Display for DiagnosisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosisKind::Success => "Success",
            DiagnosisKind::CompileError => "CompileError",
            DiagnosisKind::IllegalAddress => "IllegalAddress",
            DiagnosisKind::ValueMismatch => "ValueMismatch",
            DiagnosisKind::ConnectionFailure => "ConnectionFailure",
            DiagnosisKind::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// What one execution of a candidate (self-test or fallback) observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    /// Explicit pass/fail, if the run produced one
    pub verdict: Option<bool>,
    /// Free-text message the candidate reported
    pub message: Option<String>,
    /// Registers read, in order
    pub tested_registers: Vec<String>,
    /// First expected-value mismatch
    pub mismatch: Option<ObservedMismatch>,
    /// How the run failed instead of returning
    pub fault: Option<CandidateFault>,
    /// Illegal-address rejections the server recorded during the run
    pub rejections: Vec<Rejection>,
}

/// Raw tester output before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawTestOutcome {
    /// The source did not load; nothing ran
    CompileFailed(CompileDiagnostic),
    /// The self-test or fallback ran to completion
    Executed(Execution),
    /// The run exceeded the tester's hard timeout
    TimedOut {
        after: Duration,
        /// `self-test` or `connectivity test`
        phase: &'static str,
    },
    /// The allow-list changed between configuration and test
    StaleConfiguration {
        /// Epoch the request was configured under
        expected: u64,
        /// Epoch the session held when the test started
        actual: u64,
    },
}

impl RawTestOutcome {
    /// Registers the run touched
    #[must_use]
    pub fn tested_registers(&self) -> &[String] {
        match self {
            RawTestOutcome::Executed(execution) => &execution.tested_registers,
            _ => &[],
        }
    }
}

/// Classified result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub kind: DiagnosisKind,
    /// Human-readable explanation fed back to the generator
    pub message: String,
    /// Address the server rejected or the mismatching register's address
    pub problematic_address: Option<u16>,
    pub byte_mismatch: Option<ByteMismatch>,
    /// Ascending, at most `SUGGESTION_LIMIT`; only for `IllegalAddress`
    pub suggested_addresses: Vec<u16>,
    /// Class the suggestions were drawn from; `None` when classes were unioned
    #[serde(default)]
    pub suggestion_class: Option<FunctionClass>,
}

impl Diagnosis {
    fn plain(kind: DiagnosisKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            problematic_address: None,
            byte_mismatch: None,
            suggested_addresses: Vec::new(),
            suggestion_class: None,
        }
    }
}

/// Classify a raw outcome; `valid` only feeds suggestions
#[must_use]
pub fn extract(outcome: &RawTestOutcome, valid: &ValidAddressSet) -> Diagnosis {
    match outcome {
        RawTestOutcome::CompileFailed(diag) => {
            Diagnosis::plain(DiagnosisKind::CompileError, format!("Compile error: {diag}"))
        }
        RawTestOutcome::TimedOut { after, phase } => Diagnosis::plain(
            DiagnosisKind::Unknown,
            format!("{phase} timed out after {} ms", after.as_millis()),
        ),
        RawTestOutcome::StaleConfiguration { expected, actual } => Diagnosis::plain(
            DiagnosisKind::Unknown,
            format!("allow-list changed before the test ran (configured epoch {expected}, found {actual})"),
        ),
        RawTestOutcome::Executed(execution) => classify_execution(execution, valid),
    }
}

fn classify_execution(execution: &Execution, valid: &ValidAddressSet) -> Diagnosis {
    if let Some(diagnosis) = illegal_address(execution, valid) {
        return diagnosis;
    }

    if let Some(observed) = &execution.mismatch {
        if let Some(mismatch) = locate_byte_mismatch(&observed.expected_bytes, &observed.actual_bytes) {
            let message = if observed.detail.is_empty() {
                format!(
                    "{} mismatch: expected bytes {}, actual bytes {} (first difference at byte {})",
                    observed.register,
                    mismatch.expected_hex(),
                    mismatch.actual_hex(),
                    mismatch.first_differing_offset
                )
            } else {
                observed.detail.clone()
            };
            return Diagnosis {
                kind: DiagnosisKind::ValueMismatch,
                message,
                problematic_address: observed.address,
                byte_mismatch: Some(mismatch),
                suggested_addresses: Vec::new(),
                suggestion_class: None,
            };
        }
    }

    match &execution.fault {
        Some(CandidateFault::Protocol { code, start, count, .. }) => {
            return Diagnosis {
                problematic_address: (*count == 1).then_some(*start),
                ..Diagnosis::plain(
                    DiagnosisKind::Unknown,
                    format!("protocol exception {code} at {start}+{count}"),
                )
            };
        }
        Some(CandidateFault::Transport(message)) => {
            return Diagnosis::plain(DiagnosisKind::ConnectionFailure, format!("Connection failure: {message}"));
        }
        Some(CandidateFault::Runtime(message)) => {
            return Diagnosis::plain(DiagnosisKind::Unknown, format!("Driver test failed: {message}"));
        }
        None => {}
    }

    match execution.verdict {
        Some(false) => Diagnosis::plain(
            DiagnosisKind::Unknown,
            execution
                .message
                .clone()
                .unwrap_or_else(|| "self-test reported failure".to_string()),
        ),
        _ => Diagnosis::plain(
            DiagnosisKind::Success,
            execution
                .message
                .clone()
                .unwrap_or_else(|| "all checks passed".to_string()),
        ),
    }
}

fn illegal_address(execution: &Execution, valid: &ValidAddressSet) -> Option<Diagnosis> {
    let from_fault = match &execution.fault {
        Some(CandidateFault::Protocol {
            code: ExceptionCode::IllegalDataAddress,
            class,
            start,
            count,
            address,
        }) => Some((*class, *start, *count, *address)),
        _ => None,
    };
    if from_fault.is_none() && execution.rejections.is_empty() {
        return None;
    }

    let (class, address) = match from_fault {
        Some((class, _, _, Some(address))) => (class, Some(address)),
        Some((class, start, count, None)) => {
            // Multi-register request: trust the server's journal only if it
            // rejected something inside the requested range
            let journal = execution
                .rejections
                .iter()
                .rev()
                .find(|r| count == 0 || r.covers(start, count));
            match journal {
                Some(r) => (class.or(Some(r.class)), Some(r.first_offending)),
                None => (class, None),
            }
        }
        None => {
            let last = execution.rejections.last()?;
            (Some(last.class), Some(last.first_offending))
        }
    };

    let suggested = valid.suggestions(class, SUGGESTION_LIMIT);
    let message = match address {
        Some(a) => format!(
            "ILLEGAL DATA ADDRESS: Register 0x{a:04X} ({a}) does not exist{}. Valid addresses include: {suggested:?}",
            class.map(|c| format!(" as a {c} register")).unwrap_or_default()
        ),
        None => format!(
            "ILLEGAL DATA ADDRESS: Driver tried to access an invalid register. Valid addresses include: {suggested:?}"
        ),
    };

    Some(Diagnosis {
        kind: DiagnosisKind::IllegalAddress,
        message,
        problematic_address: address,
        byte_mismatch: None,
        suggested_addresses: suggested,
        suggestion_class: class,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn valid() -> ValidAddressSet {
        ValidAddressSet::uniform(30000..30100)
    }

    fn protocol(code: ExceptionCode, start: u16, count: u16) -> CandidateFault {
        CandidateFault::Protocol {
            code,
            class: Some(FunctionClass::ReadHolding),
            start,
            count,
            address: (count == 1).then_some(start),
        }
    }

    fn mismatch() -> ObservedMismatch {
        ObservedMismatch {
            register: "status".to_string(),
            address: Some(30001),
            expected_bytes: vec![0x00, 0x64],
            actual_bytes: vec![0x00, 0xC8],
            detail: String::new(),
        }
    }

    #[test]
    fn compile_error_preempts_everything() {
        let d = extract(
            &RawTestOutcome::CompileFailed(CompileDiagnostic::at(2, 5, "unexpected token")),
            &valid(),
        );
        assert_eq!(d.kind, DiagnosisKind::CompileError);
        assert!(d.message.contains("line 2, column 5"));
        assert!(d.suggested_addresses.is_empty());
    }

    #[test]
    fn illegal_address_with_suggestions() {
        let execution = Execution {
            fault: Some(protocol(ExceptionCode::IllegalDataAddress, 5, 1)),
            ..Execution::default()
        };
        let d = extract(&RawTestOutcome::Executed(execution), &valid());
        assert_eq!(d.kind, DiagnosisKind::IllegalAddress);
        assert_eq!(d.problematic_address, Some(5));
        assert_eq!(d.suggested_addresses, (30000..30010).collect::<Vec<u16>>());
        assert_eq!(d.suggestion_class, Some(FunctionClass::ReadHolding));
    }

    #[test]
    fn suggestions_follow_failing_class() {
        let valid = ValidAddressSet::default()
            .with_class(FunctionClass::ReadHolding, 40000..40050)
            .with_class(FunctionClass::ReadInput, 30000..30100);
        let execution = Execution {
            fault: Some(CandidateFault::Protocol {
                code: ExceptionCode::IllegalDataAddress,
                class: Some(FunctionClass::ReadInput),
                start: 5,
                count: 1,
                address: Some(5),
            }),
            ..Execution::default()
        };
        let d = extract(&RawTestOutcome::Executed(execution), &valid);
        assert_eq!(d.suggestion_class, Some(FunctionClass::ReadInput));
        assert_eq!(d.suggested_addresses, (30000..30010).collect::<Vec<u16>>());

        let execution = Execution {
            fault: Some(CandidateFault::Protocol {
                code: ExceptionCode::IllegalDataAddress,
                class: None,
                start: 5,
                count: 1,
                address: Some(5),
            }),
            ..Execution::default()
        };
        let d = extract(&RawTestOutcome::Executed(execution), &valid);
        assert_eq!(d.suggestion_class, None);
        assert_eq!(d.suggested_addresses, (30000..30010).collect::<Vec<u16>>());
    }

    #[test]
    fn illegal_address_preempts_mismatch() {
        let execution = Execution {
            mismatch: Some(mismatch()),
            fault: Some(protocol(ExceptionCode::IllegalDataAddress, 5, 1)),
            ..Execution::default()
        };
        let d = extract(&RawTestOutcome::Executed(execution), &valid());
        assert_eq!(d.kind, DiagnosisKind::IllegalAddress);
    }

    #[test]
    fn multi_register_address_comes_from_journal() {
        let rejection = Rejection {
            class: FunctionClass::ReadHolding,
            function: 0x03,
            start: 30098,
            count: 4,
            first_offending: 30100,
            epoch: 1,
        };
        let execution = Execution {
            fault: Some(protocol(ExceptionCode::IllegalDataAddress, 30098, 4)),
            rejections: vec![rejection],
            ..Execution::default()
        };
        let d = extract(&RawTestOutcome::Executed(execution), &valid());
        assert_eq!(d.problematic_address, Some(30100));

        let execution = Execution {
            fault: Some(protocol(ExceptionCode::IllegalDataAddress, 10, 4)),
            ..Execution::default()
        };
        let d = extract(&RawTestOutcome::Executed(execution), &valid());
        assert_eq!(d.kind, DiagnosisKind::IllegalAddress);
        assert_eq!(d.problematic_address, None);
    }

    #[test]
    fn swallowed_rejection_still_counts() {
        let execution = Execution {
            verdict: Some(true),
            rejections: vec![Rejection {
                class: FunctionClass::ReadInput,
                function: 0x04,
                start: 7,
                count: 1,
                first_offending: 7,
                epoch: 0,
            }],
            ..Execution::default()
        };
        let d = extract(&RawTestOutcome::Executed(execution), &valid());
        assert_eq!(d.kind, DiagnosisKind::IllegalAddress);
        assert_eq!(d.problematic_address, Some(7));
    }

    #[test]
    fn value_mismatch_is_localized() {
        let execution = Execution {
            verdict: Some(false),
            mismatch: Some(mismatch()),
            ..Execution::default()
        };
        let d = extract(&RawTestOutcome::Executed(execution), &valid());
        assert_eq!(d.kind, DiagnosisKind::ValueMismatch);
        let m = d.byte_mismatch.unwrap();
        assert_eq!(m.first_differing_offset, 1);
        assert_eq!(m.expected_hex(), "0064");
        assert_eq!(m.actual_hex(), "00c8");
        assert!(d.suggested_addresses.is_empty());
    }

    #[test]
    fn transport_failure_is_connection_failure() {
        let execution = Execution {
            fault: Some(CandidateFault::Transport("refused".to_string())),
            ..Execution::default()
        };
        let d = extract(&RawTestOutcome::Executed(execution), &valid());
        assert_eq!(d.kind, DiagnosisKind::ConnectionFailure);
    }

    #[test]
    fn other_exception_is_unknown() {
        let execution = Execution {
            fault: Some(protocol(ExceptionCode::IllegalDataValue, 30000, 200)),
            ..Execution::default()
        };
        let d = extract(&RawTestOutcome::Executed(execution), &valid());
        assert_eq!(d.kind, DiagnosisKind::Unknown);
    }

    #[test]
    fn negative_verdict_without_detail() {
        let execution = Execution {
            verdict: Some(false),
            ..Execution::default()
        };
        let d = extract(&RawTestOutcome::Executed(execution), &valid());
        assert_eq!(d.kind, DiagnosisKind::Unknown);
        assert_eq!(d.message, "self-test reported failure");
    }

    #[test]
    fn opaque_result_is_success() {
        let d = extract(&RawTestOutcome::Executed(Execution::default()), &valid());
        assert_eq!(d.kind, DiagnosisKind::Success);
    }

    #[test]
    fn timeout_is_unknown() {
        let d = extract(
            &RawTestOutcome::TimedOut {
                after: Duration::from_secs(5),
                phase: "self-test",
            },
            &valid(),
        );
        assert_eq!(d.kind, DiagnosisKind::Unknown);
        assert!(d.message.contains("5000 ms"));
    }
}
