//! Attempt results

use crate::diagnosis::{Diagnosis, DiagnosisKind};
use regsynth_registers::{ByteMismatch, FunctionClass};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of one generate/test cycle
///
/// The tester leaves `attempt_number` at 0; the orchestrator numbers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptResult {
    /// 1-based once numbered
    pub attempt_number: u32,
    pub success: bool,
    pub diagnosis_kind: DiagnosisKind,
    pub message: String,
    pub problematic_address: Option<u16>,
    pub byte_mismatch: Option<ByteMismatch>,
    pub suggested_addresses: Vec<u16>,
    /// Class of `suggested_addresses`; `None` when classes were unioned
    #[serde(default)]
    pub suggestion_class: Option<FunctionClass>,
    pub tested_registers: Vec<String>,
    pub duration_ms: u64,
}

impl AttemptResult {
    /// Build from a classified diagnosis
    #[must_use]
    pub fn from_diagnosis(diagnosis: Diagnosis, tested_registers: Vec<String>, elapsed: Duration) -> Self {
        Self {
            attempt_number: 0,
            success: diagnosis.kind.is_success(),
            diagnosis_kind: diagnosis.kind,
            message: diagnosis.message,
            problematic_address: diagnosis.problematic_address,
            byte_mismatch: diagnosis.byte_mismatch,
            suggested_addresses: diagnosis.suggested_addresses,
            suggestion_class: diagnosis.suggestion_class,
            tested_registers,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Failed attempt that never reached the oracle
    #[must_use]
    pub fn failure(kind: DiagnosisKind, message: impl Into<String>) -> Self {
        Self {
            attempt_number: 0,
            success: false,
            diagnosis_kind: kind,
            message: message.into(),
            problematic_address: None,
            byte_mismatch: None,
            suggested_addresses: Vec::new(),
            suggestion_class: None,
            tested_registers: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Same result with its position in the attempt sequence
    #[inline]
    #[must_use]
    pub fn numbered(mut self, attempt_number: u32) -> Self {
        self.attempt_number = attempt_number;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// The diagnosis this result was built from
    #[must_use]
    pub fn diagnosis(&self) -> Diagnosis {
        Diagnosis {
            kind: self.diagnosis_kind,
            message: self.message.clone(),
            problematic_address: self.problematic_address,
            byte_mismatch: self.byte_mismatch.clone(),
            suggested_addresses: self.suggested_addresses.clone(),
            suggestion_class: self.suggestion_class,
        }
    }
}
