//! The synthesis driver
//!
//! Runs the side effects for each stage [`next_stage`] names and folds the
//! outputs back through [`reduce`]. Every failure inside the loop becomes an
//! attempt result; `synthesize` always returns an outcome.

use crate::collaborators::{
    format_context, protocol_features, protocol_signature, CodeGenerator, ExperienceRecord,
    ExperienceStore, GenerationContext, InMemoryExperienceStore, ProblemType, RegexSpecParser,
    SpecParser,
};
use crate::config::SynthesisConfig;
use crate::error::{GenerationError, SynthesisError};
use crate::state::{
    generation_failure, next_stage, reduce, AgentName, AttemptLogEntry, Stage, StageOutput,
    SynthesisState,
};
use chrono::Utc;
use futures::FutureExt;
use regsynth_oracle::Oracle;
use regsynth_registers::{RegisterMap, ValidAddressSet};
use regsynth_tester::{AttemptResult, Diagnosis, DiagnosisKind, ExpectedRegister, TestRequest, Tester};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use ulid::Ulid;

/// Characters of a passing candidate kept in its experience record
pub const SNIPPET_LIMIT: usize = 500;

/// Terminal record of one synthesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOutcome {
    pub synthesis_id: String,
    /// Only set when the last attempt passed
    pub final_code: Option<String>,
    pub confidence_score: f64,
    pub total_attempts: u32,
    pub attempt_log: Vec<AttemptResult>,
    pub stage_log: Vec<AttemptLogEntry>,
    /// Diagnosis of the last attempt
    pub last_diagnosis: Option<Diagnosis>,
    /// Map used by the last attempt
    pub registers: RegisterMap,
    pub experience_id: Option<String>,
}

impl SynthesisOutcome {
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.final_code.is_some()
    }
}

/// Bounded generate, test, retry loop
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: SynthesisConfig,
    oracle: Arc<Oracle>,
    tester: Tester,
    parser: Arc<dyn SpecParser>,
    generator: Arc<dyn CodeGenerator>,
    experience: Arc<dyn ExperienceStore>,
}

impl Orchestrator {
    /// Create with the default parser and an in-memory experience store
    ///
    /// # Errors
    /// `SynthesisError::Config` if the configuration does not validate
    pub fn new(
        config: SynthesisConfig,
        oracle: Arc<Oracle>,
        generator: Arc<dyn CodeGenerator>,
    ) -> Result<Self, SynthesisError> {
        config.validate()?;
        let tester = Tester::new(config.runtime.build()).with_timeout(config.test_timeout())?;
        let experience = Arc::new(InMemoryExperienceStore::new(config.experience_capacity));
        Ok(Self {
            config,
            oracle,
            tester,
            parser: Arc::new(RegexSpecParser::new()),
            generator,
            experience,
        })
    }

    #[inline]
    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn SpecParser>) -> Self {
        self.parser = parser;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_experience_store(mut self, store: Arc<dyn ExperienceStore>) -> Self {
        self.experience = store;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_tester(mut self, tester: Tester) -> Self {
        self.tester = tester;
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn oracle(&self) -> &Arc<Oracle> {
        &self.oracle
    }

    /// Run one synthesis to completion
    ///
    /// Dropping the returned future cancels the attempt in progress, closes
    /// its oracle connection and releases the oracle session.
    pub async fn synthesize(
        &self,
        specification: &str,
        device_name: Option<&str>,
        prior_context: Option<String>,
    ) -> SynthesisOutcome {
        let synthesis_id = Ulid::new().to_string();
        tracing::info!(
            %synthesis_id,
            device = device_name,
            text_length = specification.len(),
            max_attempts = self.config.max_attempts,
            "starting synthesis"
        );

        let experience_context = match prior_context {
            Some(context) => Some(context),
            None => self.recall(specification).await,
        };

        let mut state = SynthesisState::new(specification, self.config.max_attempts)
            .with_device_name(device_name.map(str::to_string))
            .with_experience_context(experience_context);

        loop {
            let stage = next_stage(&state);
            tracing::debug!(?stage, attempt = state.attempt, "stage");
            let output = match stage {
                Stage::Specify => self.specify(&state).await,
                Stage::Generate => self.generate(&state).await,
                Stage::Validate => self.validate(&state).await,
                Stage::Retry => {
                    tracing::warn!(
                        attempt = state.attempt,
                        max_attempts = state.max_attempts,
                        "attempt failed, retrying"
                    );
                    StageOutput::Retried
                }
                Stage::Finalize => break,
            };
            state = reduce(&state, output);
        }

        self.finalize(synthesis_id, state).await
    }

    async fn recall(&self, specification: &str) -> Option<String> {
        match self
            .experience
            .recall(specification, self.config.recall_limit)
            .await
        {
            Ok(records) => {
                if !records.is_empty() {
                    tracing::info!(count = records.len(), "recalled similar experiences");
                }
                format_context(&records)
            }
            Err(e) => {
                tracing::warn!(error = %e, "experience recall failed");
                None
            }
        }
    }

    async fn specify(&self, state: &SynthesisState) -> StageOutput {
        let started = Instant::now();
        let log = AttemptLogEntry::new(state.attempt, AgentName::Parser, "parse_protocol");

        let (specs, log) = match self.parser.parse(&state.specification).await {
            Ok(specs) => (specs, log),
            Err(e) => {
                tracing::warn!(error = %e, "spec parsing failed, continuing with no registers");
                (Vec::new(), log.failed(e.to_string()))
            }
        };

        let mut registers = RegisterMap::new();
        for spec in specs {
            if let Err(e) = registers.push(spec) {
                tracing::debug!(error = %e, "duplicate register dropped");
            }
        }
        let valid = ValidAddressSet::derive(
            &registers,
            &self.config.superset,
            self.config.plausibility_floor,
        );
        let plausible = registers
            .iter()
            .filter(|s| s.address >= self.config.plausibility_floor)
            .count();
        if plausible == 0 {
            tracing::warn!(parsed = registers.len(), "no plausible register addresses in specification");
        }
        tracing::info!(
            registers = registers.len(),
            plausible,
            allow_list = valid.len(),
            "specification parsed"
        );

        StageOutput::Specified {
            registers,
            valid,
            log: log.with_duration_ms(elapsed_ms(started)),
        }
    }

    async fn generate(&self, state: &SynthesisState) -> StageOutput {
        let started = Instant::now();
        let context = GenerationContext {
            attempt_number: state.attempt,
            registers: state.registers.clone(),
            previous: state.last_result().cloned(),
            experience: state.experience_context.clone(),
            device_name: state.device_name.clone(),
        };
        tracing::info!(
            attempt = state.attempt,
            generation = state.registers.generation(),
            registers = state.registers.len(),
            "generating candidate"
        );

        let generated = tokio::time::timeout(
            self.config.generation_timeout(),
            self.generator.generate(&state.specification, &context),
        )
        .await
        .unwrap_or_else(|_| Err(GenerationError::Timeout(self.config.generation_timeout_ms)));

        let log = AttemptLogEntry::new(state.attempt, AgentName::Coder, "generate_code");
        match generated {
            Ok(source) if !source.trim().is_empty() => StageOutput::Generated {
                source,
                log: log.with_duration_ms(elapsed_ms(started)),
            },
            Ok(_) => generation_failed(GenerationError::Empty, log, started),
            Err(e) => generation_failed(e, log, started),
        }
    }

    async fn validate(&self, state: &SynthesisState) -> StageOutput {
        let started = Instant::now();
        let source = state.candidate.clone().unwrap_or_default();
        let expected: Vec<ExpectedRegister> = state
            .registers
            .iter()
            .cloned()
            .map(ExpectedRegister::unchecked)
            .collect();

        // Configure and test under one session so no other flow can swap
        // the allow-list in between
        let session = self.oracle.session().await;
        let epoch = session.configure(state.valid_addresses.clone());
        let request = TestRequest::new(source, epoch).with_expected(expected);

        let result = match AssertUnwindSafe(self.tester.run(&session, &request))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(attempt = state.attempt, %message, "tester panicked");
                AttemptResult::failure(DiagnosisKind::Unknown, format!("tester failed unexpectedly: {message}"))
                    .with_duration(started.elapsed())
            }
        };
        drop(session);

        let mut log = AttemptLogEntry::new(state.attempt, AgentName::Tester, "test_driver")
            .with_duration_ms(elapsed_ms(started));
        if result.success {
            tracing::info!(attempt = state.attempt, tested = ?result.tested_registers, "candidate validated");
        } else {
            log = log.failed(result.message.clone());
        }
        StageOutput::Validated { result, log }
    }

    async fn finalize(&self, synthesis_id: String, state: SynthesisState) -> SynthesisOutcome {
        let success = state.succeeded();
        let confidence_score = state.confidence();
        let final_code = success.then(|| state.candidate.clone()).flatten();

        let record = experience_record(&state, success);
        let record_id = record.id.clone();
        let experience_id = match self.experience.remember(record).await {
            Ok(()) => Some(record_id),
            Err(e) => {
                tracing::warn!(error = %e, "failed to store experience");
                None
            }
        };

        tracing::info!(
            %synthesis_id,
            success,
            attempts = state.total_attempts(),
            confidence = confidence_score,
            experience_id = experience_id.as_deref(),
            "synthesis finalized"
        );

        SynthesisOutcome {
            synthesis_id,
            final_code,
            confidence_score,
            total_attempts: state.total_attempts(),
            last_diagnosis: state.last_result().map(AttemptResult::diagnosis),
            attempt_log: state.attempts,
            stage_log: state.stage_log,
            registers: state.registers,
            experience_id,
        }
    }
}

fn generation_failed(error: GenerationError, log: AttemptLogEntry, started: Instant) -> StageOutput {
    tracing::warn!(error = %error, "candidate generation failed");
    let message = error.to_string();
    StageOutput::GenerationFailed {
        result: generation_failure(message.clone()).with_duration(started.elapsed()),
        log: log.failed(message).with_duration_ms(elapsed_ms(started)),
    }
}

fn experience_record(state: &SynthesisState, success: bool) -> ExperienceRecord {
    let features = protocol_features(&state.specification);
    let failure = state.last_failure();
    let mismatch = failure.and_then(|f| f.byte_mismatch.as_ref());

    let solution_applied = match failure {
        Some(f) if success && !f.suggested_addresses.is_empty() => format!(
            "Replaced register map with suggested addresses {:?}",
            state.registers.all_addresses()
        ),
        _ => format!("Generated code version {}", state.total_attempts()),
    };

    ExperienceRecord {
        id: Ulid::new().to_string(),
        protocol_signature: protocol_signature(&features),
        protocol_features: features,
        device_type: state.device_name.clone(),
        problem_type: failure.map_or(ProblemType::General, |f| ProblemType::from_kind(f.diagnosis_kind)),
        error_message: failure.map_or_else(|| "Success".to_string(), |f| f.message.clone()),
        problematic_bytes: mismatch.map(|m| format!("expected {} actual {}", m.expected_hex(), m.actual_hex())),
        byte_position: mismatch.map(|m| m.first_differing_offset),
        solution_applied,
        successful_code_snippet: if success {
            state
                .candidate
                .as_ref()
                .map(|c| c.chars().take(SNIPPET_LIMIT).collect())
        } else {
            None
        },
        success,
        created_at: Utc::now(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use regsynth_registers::FunctionClass;

    #[test]
    fn panic_payloads_render() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn record_describes_replacement_fix() {
        let mut state = SynthesisState::new("register 5 uint16", 3);
        let mut failed = AttemptResult::failure(DiagnosisKind::IllegalAddress, "ILLEGAL DATA ADDRESS").numbered(1);
        failed.suggested_addresses = vec![30000];
        let mut passed = AttemptResult::failure(DiagnosisKind::Success, "ok").numbered(2);
        passed.success = true;
        state.attempts = vec![failed, passed];
        state.registers = RegisterMap::new().replaced_by_suggestions(FunctionClass::ReadHolding, &[30000]);
        state.candidate = Some("x".repeat(600));

        let record = experience_record(&state, true);
        assert_eq!(record.problem_type, ProblemType::IllegalAddress);
        assert_eq!(record.error_message, "ILLEGAL DATA ADDRESS");
        assert_eq!(record.solution_applied, "Replaced register map with suggested addresses {30000}");
        assert_eq!(record.successful_code_snippet.unwrap().len(), SNIPPET_LIMIT);
        assert_eq!(record.protocol_signature.len(), 16);
    }

    #[test]
    fn record_of_clean_success_is_general() {
        let mut state = SynthesisState::new("spec", 3);
        let mut passed = AttemptResult::failure(DiagnosisKind::Success, "ok").numbered(1);
        passed.success = true;
        state.attempts = vec![passed];
        let record = experience_record(&state, true);
        assert_eq!(record.problem_type, ProblemType::General);
        assert_eq!(record.error_message, "Success");
        assert_eq!(record.solution_applied, "Generated code version 1");
    }
}
