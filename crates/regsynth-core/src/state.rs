//! Synthesis state and its reducer
//!
//! [`SynthesisState`] is a value: every stage output produces the next state
//! through [`reduce`], and [`next_stage`] reads the transition table off the
//! state alone. The driver in [`crate::orchestrator`] is the only place with
//! side effects.
//!
//! ```text
//! Specify -> Generate -> Validate -> Finalize            (success)
//!                 ^          |
//!                 |          +-> Finalize                (budget spent)
//!                 +- Retry <-+
//! ```

use chrono::{DateTime, Utc};
use regsynth_registers::{FunctionClass, RegisterMap, ValidAddressSet};
use regsynth_tester::{AttemptResult, DiagnosisKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Confidence for a success on the first attempt
pub const BASE_CONFIDENCE: f64 = 0.9;
/// Deducted per attempt beyond the first
pub const RETRY_PENALTY: f64 = 0.1;
/// Lowest confidence a success can get
pub const MIN_SUCCESS_CONFIDENCE: f64 = 0.5;
/// Confidence of a failed synthesis
pub const FAILURE_CONFIDENCE: f64 = 0.1;

/// Heuristic confidence score
///
/// Not a calibrated probability: a success loses 0.1 per extra attempt down
/// to 0.5, a failure is always 0.1.
#[must_use]
pub fn confidence(success: bool, attempts: u32) -> f64 {
    if success {
        let penalty = RETRY_PENALTY * f64::from(attempts.saturating_sub(1));
        (BASE_CONFIDENCE - penalty).max(MIN_SUCCESS_CONFIDENCE)
    } else {
        FAILURE_CONFIDENCE
    }
}

/// Loop stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Specify,
    Generate,
    Validate,
    Retry,
    Finalize,
}

/// Which collaborator a log entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentName {
    Parser,
    Coder,
    Tester,
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgentName::Parser => "Parser",
            AgentName::Coder => "Coder",
            AgentName::Tester => "Tester",
        })
    }
}

/// One stage execution, for observability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptLogEntry {
    pub attempt_number: u32,
    pub agent_name: AgentName,
    pub action: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl AttemptLogEntry {
    #[must_use]
    pub fn new(attempt_number: u32, agent_name: AgentName, action: impl Into<String>) -> Self {
        Self {
            attempt_number,
            agent_name,
            action: action.into(),
            success: true,
            error_message: None,
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }

    #[inline]
    #[must_use]
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(message.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// What a stage produced
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    /// Parsed map and the allow-list derived from it
    Specified {
        registers: RegisterMap,
        valid: ValidAddressSet,
        log: AttemptLogEntry,
    },
    /// A candidate to test
    Generated { source: String, log: AttemptLogEntry },
    /// Generation failed; becomes this attempt's result
    GenerationFailed {
        result: AttemptResult,
        log: AttemptLogEntry,
    },
    /// Test finished (or the tester failed and was converted)
    Validated {
        result: AttemptResult,
        log: AttemptLogEntry,
    },
    /// Move to the next attempt
    Retried,
}

/// Everything the loop knows after some number of stages
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisState {
    pub specification: String,
    pub device_name: Option<String>,
    pub experience_context: Option<String>,
    pub max_attempts: u32,
    /// 1-based attempt in progress
    pub attempt: u32,
    pub specified: bool,
    /// Map for the attempt in progress
    pub registers: RegisterMap,
    /// Allow-list configured before every test
    pub valid_addresses: ValidAddressSet,
    /// Candidate of the attempt in progress
    pub candidate: Option<String>,
    /// Strictly ordered by attempt number
    pub attempts: Vec<AttemptResult>,
    pub stage_log: Vec<AttemptLogEntry>,
}

impl SynthesisState {
    /// Fresh state; `max_attempts` is clamped to at least 1
    #[must_use]
    pub fn new(specification: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            specification: specification.into(),
            device_name: None,
            experience_context: None,
            max_attempts: max_attempts.max(1),
            attempt: 1,
            specified: false,
            registers: RegisterMap::new(),
            valid_addresses: ValidAddressSet::default(),
            candidate: None,
            attempts: Vec::new(),
            stage_log: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_device_name(mut self, device_name: Option<String>) -> Self {
        self.device_name = device_name;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_experience_context(mut self, context: Option<String>) -> Self {
        self.experience_context = context;
        self
    }

    /// Result of the attempt in progress, if it has one
    #[must_use]
    pub fn current_result(&self) -> Option<&AttemptResult> {
        self.attempts
            .last()
            .filter(|r| r.attempt_number == self.attempt)
    }

    /// Most recent result
    #[inline]
    #[must_use]
    pub fn last_result(&self) -> Option<&AttemptResult> {
        self.attempts.last()
    }

    /// Whether the latest attempt passed
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.last_result().is_some_and(|r| r.success)
    }

    /// Most recent failure, if any
    #[must_use]
    pub fn last_failure(&self) -> Option<&AttemptResult> {
        self.attempts.iter().rev().find(|r| !r.success)
    }

    #[must_use]
    pub fn confidence(&self) -> f64 {
        confidence(self.succeeded(), self.total_attempts())
    }

    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }
}

/// Transition table
#[must_use]
pub fn next_stage(state: &SynthesisState) -> Stage {
    if !state.specified {
        return Stage::Specify;
    }
    if state.total_attempts() >= state.max_attempts && state.current_result().is_some() {
        return Stage::Finalize;
    }
    match state.current_result() {
        Some(result) if result.success => Stage::Finalize,
        Some(_) if state.attempt >= state.max_attempts => Stage::Finalize,
        Some(_) => Stage::Retry,
        None if state.candidate.is_some() => Stage::Validate,
        None => Stage::Generate,
    }
}

/// Fold one stage output into the next state
#[must_use]
pub fn reduce(state: &SynthesisState, output: StageOutput) -> SynthesisState {
    let mut next = state.clone();
    match output {
        StageOutput::Specified {
            registers,
            valid,
            log,
        } => {
            next.specified = true;
            next.registers = registers;
            next.valid_addresses = valid;
            next.stage_log.push(log);
        }
        StageOutput::Generated { source, log } => {
            next.candidate = Some(source);
            next.stage_log.push(log);
        }
        StageOutput::GenerationFailed { result, log } | StageOutput::Validated { result, log } => {
            next.attempts.push(result.numbered(state.attempt));
            next.stage_log.push(log);
        }
        StageOutput::Retried => {
            next.attempt = state.attempt + 1;
            next.candidate = None;
            next.registers = match state.current_result() {
                Some(failed) if !failed.suggested_addresses.is_empty() => {
                    let class = failed.suggestion_class.unwrap_or(FunctionClass::ReadHolding);
                    state
                        .registers
                        .replaced_by_suggestions(class, &failed.suggested_addresses)
                }
                _ => state.registers.next_generation(),
            };
        }
    }
    next
}

/// Failed attempt recorded when generation did not produce a candidate
#[must_use]
pub fn generation_failure(message: impl Into<String>) -> AttemptResult {
    AttemptResult::failure(DiagnosisKind::Unknown, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use regsynth_registers::{FunctionClass, RegisterKind, RegisterSpec};

    fn specified(max_attempts: u32) -> SynthesisState {
        let registers = RegisterMap::from_specs([RegisterSpec::new(
            5,
            RegisterKind::Uint16,
            FunctionClass::ReadHolding,
            "status",
        )])
        .unwrap();
        reduce(
            &SynthesisState::new("spec", max_attempts),
            StageOutput::Specified {
                registers,
                valid: ValidAddressSet::uniform(30000..30100),
                log: AttemptLogEntry::new(1, AgentName::Parser, "parse_protocol"),
            },
        )
    }

    fn generated(state: &SynthesisState) -> SynthesisState {
        reduce(
            state,
            StageOutput::Generated {
                source: "self_test:\n".to_string(),
                log: AttemptLogEntry::new(state.attempt, AgentName::Coder, "generate_code"),
            },
        )
    }

    fn validated(state: &SynthesisState, result: AttemptResult) -> SynthesisState {
        reduce(
            state,
            StageOutput::Validated {
                result,
                log: AttemptLogEntry::new(state.attempt, AgentName::Tester, "test_driver"),
            },
        )
    }

    fn illegal(suggested: Vec<u16>) -> AttemptResult {
        let mut result = AttemptResult::failure(DiagnosisKind::IllegalAddress, "ILLEGAL DATA ADDRESS");
        result.suggested_addresses = suggested;
        result
    }

    fn passed() -> AttemptResult {
        let mut result = AttemptResult::failure(DiagnosisKind::Success, "ok");
        result.success = true;
        result
    }

    #[test]
    fn confidence_heuristic() {
        assert!((confidence(true, 1) - 0.9).abs() < 1e-9);
        assert!((confidence(true, 2) - 0.8).abs() < 1e-9);
        assert!((confidence(true, 9) - 0.5).abs() < 1e-9);
        assert!((confidence(false, 1) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn fresh_state_specifies_first() {
        let state = SynthesisState::new("spec", 3);
        assert_eq!(next_stage(&state), Stage::Specify);
        assert_eq!(next_stage(&specified(3)), Stage::Generate);
    }

    #[test]
    fn max_attempts_is_at_least_one() {
        assert_eq!(SynthesisState::new("spec", 0).max_attempts, 1);
    }

    #[test]
    fn reduce_does_not_touch_input() {
        let before = specified(3);
        let after = generated(&before);
        assert!(before.candidate.is_none());
        assert!(after.candidate.is_some());
        assert_eq!(next_stage(&after), Stage::Validate);
    }

    #[test]
    fn success_finalizes() {
        let state = validated(&generated(&specified(3)), passed());
        assert_eq!(next_stage(&state), Stage::Finalize);
        assert_eq!(state.attempts[0].attempt_number, 1);
        assert!(state.succeeded());
    }

    #[test]
    fn failure_retries_until_budget() {
        let mut state = specified(2);
        state = validated(&generated(&state), illegal(vec![]));
        assert_eq!(next_stage(&state), Stage::Retry);
        state = reduce(&state, StageOutput::Retried);
        assert_eq!(state.attempt, 2);
        assert_eq!(next_stage(&state), Stage::Generate);
        state = validated(&generated(&state), illegal(vec![]));
        assert_eq!(next_stage(&state), Stage::Finalize);
        assert_eq!(state.total_attempts(), 2);
        assert!((state.confidence() - FAILURE_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn retry_replaces_map_with_suggestions() {
        let state = validated(&generated(&specified(3)), illegal(vec![30000, 30001]));
        let next = reduce(&state, StageOutput::Retried);
        let addresses: Vec<u16> = next.registers.iter().map(|s| s.address).collect();
        assert_eq!(addresses, vec![30000, 30001]);
        assert_eq!(next.registers.generation(), 1);
        assert!(next.candidate.is_none());
        assert!(next
            .registers
            .iter()
            .all(|s| s.function_class == FunctionClass::ReadHolding));
    }

    #[test]
    fn retry_keeps_failing_register_class() {
        let mut failed = illegal(vec![30000, 30001]);
        failed.suggestion_class = Some(FunctionClass::ReadInput);
        let state = validated(&generated(&specified(3)), failed);
        let next = reduce(&state, StageOutput::Retried);
        assert_eq!(
            next.registers.addresses(FunctionClass::ReadInput).into_iter().collect::<Vec<_>>(),
            vec![30000, 30001]
        );
        assert!(next.registers.addresses(FunctionClass::ReadHolding).is_empty());
    }

    #[test]
    fn retry_without_suggestions_keeps_map() {
        let state = validated(&generated(&specified(3)), generation_failure("boom"));
        let next = reduce(&state, StageOutput::Retried);
        assert_eq!(next.registers.specs(), state.registers.specs());
        assert_eq!(next.registers.generation(), 1);
    }

    #[test]
    fn generation_failure_counts_as_attempt() {
        let state = reduce(
            &specified(1),
            StageOutput::GenerationFailed {
                result: generation_failure("generator unavailable"),
                log: AttemptLogEntry::new(1, AgentName::Coder, "generate_code").failed("generator unavailable"),
            },
        );
        assert_eq!(state.attempts.len(), 1);
        assert_eq!(state.attempts[0].diagnosis_kind, DiagnosisKind::Unknown);
        assert_eq!(next_stage(&state), Stage::Finalize);
    }

    #[test]
    fn last_failure_survives_success() {
        let mut state = validated(&generated(&specified(3)), illegal(vec![30000]));
        state = reduce(&state, StageOutput::Retried);
        state = validated(&generated(&state), passed());
        assert_eq!(state.last_failure().unwrap().attempt_number, 1);
        assert!((state.confidence() - 0.8).abs() < 1e-9);
    }
}
