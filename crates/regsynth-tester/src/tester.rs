//! The Tester
//!
//! Loads a candidate, runs its self-test (or the fallback connectivity test)
//! against the oracle under a hard timeout, and classifies what happened.

use crate::attempt::AttemptResult;
use crate::diagnosis::{extract, Execution, RawTestOutcome};
use crate::error::TesterError;
use crate::fallback::{connectivity_test, ExpectedRegister};
use crate::runtime::{CandidateRuntime, SelfTest, SelfTestValue, TestTarget};
use regsynth_oracle::OracleSession;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default limit for one self-test or fallback run
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One thing to test
#[derive(Debug, Clone, PartialEq)]
pub struct TestRequest {
    /// Candidate driver source
    pub source: String,
    /// Registers whose raw bytes the result must match
    pub expected: Vec<ExpectedRegister>,
    /// Allow-list epoch the caller configured for this test
    pub epoch: u64,
}

impl TestRequest {
    #[must_use]
    pub fn new(source: impl Into<String>, epoch: u64) -> Self {
        Self {
            source: source.into(),
            expected: Vec::new(),
            epoch,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_expected(mut self, expected: Vec<ExpectedRegister>) -> Self {
        self.expected = expected;
        self
    }
}

/// Runs candidates against an oracle session
#[derive(Debug, Clone)]
pub struct Tester {
    runtime: Arc<dyn CandidateRuntime>,
    timeout: Duration,
}

impl Tester {
    #[must_use]
    pub fn new(runtime: Arc<dyn CandidateRuntime>) -> Self {
        Self {
            runtime,
            timeout: DEFAULT_TEST_TIMEOUT,
        }
    }

    /// Set the per-run timeout
    ///
    /// # Errors
    /// `TesterError::ZeroTimeout` for a zero duration
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, TesterError> {
        if timeout.is_zero() {
            return Err(TesterError::ZeroTimeout);
        }
        self.timeout = timeout;
        Ok(self)
    }

    #[inline]
    #[must_use]
    pub fn runtime(&self) -> &dyn CandidateRuntime {
        self.runtime.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Test and classify
    pub async fn run(&self, session: &OracleSession<'_>, request: &TestRequest) -> AttemptResult {
        let started = Instant::now();
        let snapshot = session.snapshot();
        let outcome = self.execute(session, request).await;
        let diagnosis = extract(&outcome, &snapshot.addresses);

        if diagnosis.kind.is_success() {
            tracing::info!(
                runtime = self.runtime.name(),
                tested = outcome.tested_registers().len(),
                "candidate passed"
            );
        } else {
            tracing::warn!(
                runtime = self.runtime.name(),
                kind = %diagnosis.kind,
                address = ?diagnosis.problematic_address,
                suggested = ?diagnosis.suggested_addresses,
                message = %diagnosis.message,
                "candidate failed"
            );
        }

        let tested = outcome.tested_registers().to_vec();
        AttemptResult::from_diagnosis(diagnosis, tested, started.elapsed())
    }

    /// Run without classifying
    pub async fn execute(&self, session: &OracleSession<'_>, request: &TestRequest) -> RawTestOutcome {
        let actual = session.epoch();
        if actual != request.epoch {
            return RawTestOutcome::StaleConfiguration {
                expected: request.epoch,
                actual,
            };
        }

        let candidate = match self.runtime.load(&request.source) {
            Ok(candidate) => candidate,
            Err(diagnostic) => {
                tracing::warn!(runtime = self.runtime.name(), %diagnostic, "candidate did not compile");
                return RawTestOutcome::CompileFailed(diagnostic);
            }
        };
        tracing::debug!(candidate = %candidate.describe(), "candidate loaded");

        let target = TestTarget {
            endpoint: session.endpoint(),
        };
        let rejections_before = session.stats().illegal_address_rejections;

        let (phase, run) = match candidate.self_test() {
            Some(test) => (
                "self-test",
                tokio::time::timeout(self.timeout, run_self_test(test, target)).await,
            ),
            None => {
                tracing::info!("no self-test entry point, running connectivity test");
                (
                    "connectivity test",
                    tokio::time::timeout(self.timeout, connectivity_test(target, &request.expected)).await,
                )
            }
        };

        let Ok(mut execution) = run else {
            tracing::warn!(phase, timeout_ms = self.timeout.as_millis(), "candidate timed out");
            return RawTestOutcome::TimedOut {
                after: self.timeout,
                phase,
            };
        };

        let new = session
            .stats()
            .illegal_address_rejections
            .saturating_sub(rejections_before);
        if new > 0 {
            let journal = session.rejections_since(request.epoch);
            let keep = usize::try_from(new).unwrap_or(usize::MAX).min(journal.len());
            execution.rejections = journal[journal.len() - keep..].to_vec();
        }

        RawTestOutcome::Executed(execution)
    }
}

async fn run_self_test(test: &dyn SelfTest, target: TestTarget) -> Execution {
    match test.run(target).await {
        Ok(SelfTestValue::Verdict(verdict)) => Execution {
            verdict: Some(verdict),
            ..Execution::default()
        },
        Ok(SelfTestValue::Report(report)) => Execution {
            verdict: Some(report.success),
            message: report.message,
            tested_registers: report.tested_registers,
            mismatch: report.mismatch,
            ..Execution::default()
        },
        Ok(SelfTestValue::Opaque) => Execution::default(),
        Err(fault) => Execution {
            verdict: Some(false),
            fault: Some(fault),
            ..Execution::default()
        },
    }
}
