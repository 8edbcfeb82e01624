//! Test utilities for regsynth
//!
//! Fixtures and fake collaborators shared by the integration tests of the
//! workspace crates.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use regsynth_core::{
    CodeGenerator, ExperienceError, ExperienceRecord, ExperienceStore, GenerationContext,
    GenerationError, InMemoryExperienceStore, Orchestrator, SynthesisConfig,
};
use regsynth_oracle::Oracle;
use regsynth_registers::{AddressRange, AddressSuperset, FunctionClass, ValidAddressSet};
use regsynth_tester::{CandidateRuntime, CompileDiagnostic, LoadedCandidate};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// First address the strict fixture accepts
pub const STRICT_START: u16 = 30000;
/// One past the last address the strict fixture accepts
pub const STRICT_END: u16 = 30100;

/// Superset containing exactly `30000..30100` for both read classes
pub fn strict_superset() -> AddressSuperset {
    let range = AddressRange::new(STRICT_START, STRICT_END);
    AddressSuperset::empty()
        .with_range(FunctionClass::ReadHolding, range)
        .with_range(FunctionClass::ReadInput, range)
}

/// Configuration whose allow-list is always the strict superset
pub fn strict_config() -> SynthesisConfig {
    SynthesisConfig::new()
        .with_superset(strict_superset())
        .with_test_timeout(Duration::from_secs(2))
}

/// Oracle on an ephemeral port accepting `30000..30100`
pub async fn strict_oracle() -> Arc<Oracle> {
    let oracle = Oracle::ephemeral(ValidAddressSet::uniform(STRICT_START..STRICT_END))
        .await
        .expect("failed to start test oracle");
    Arc::new(oracle)
}

/// Orchestrator over a strict oracle with the given generator
pub async fn setup_orchestrator(
    config: SynthesisConfig,
    generator: Arc<dyn CodeGenerator>,
) -> Orchestrator {
    Orchestrator::new(config, strict_oracle().await, generator)
        .expect("test configuration should validate")
}

/// Script candidate reading the given holding addresses
pub fn script_reading(addresses: &[u16]) -> String {
    let mut source = String::from("driver \"fixture\"\n");
    for address in addresses {
        source.push_str(&format!("register r{address} holding {address} uint16\n"));
    }
    source.push_str("\nself_test:\n");
    for address in addresses {
        source.push_str(&format!("    read r{address}\n"));
    }
    source
}

/// One scripted generator reply
#[derive(Debug, Clone)]
pub enum Reply {
    Source(String),
    Fail(GenerationError),
    /// Never completes
    Hang,
}

/// Generator replaying canned replies; the last one repeats
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<Reply>>,
    contexts: Mutex<Vec<GenerationContext>>,
}

impl ScriptedGenerator {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Generator returning the same source every time
    pub fn repeating(source: impl Into<String>) -> Self {
        Self::new([Reply::Source(source.into())])
    }

    /// Contexts received so far
    pub fn contexts(&self) -> Vec<GenerationContext> {
        self.contexts.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.contexts.lock().len()
    }

    fn next_reply(&self) -> Reply {
        let next = self.replies.lock().pop_front();
        let mut last = self.last.lock();
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => last.clone().unwrap_or(Reply::Fail(GenerationError::Empty)),
        }
    }
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        _specification: &str,
        context: &GenerationContext,
    ) -> Result<String, GenerationError> {
        self.contexts.lock().push(context.clone());
        match self.next_reply() {
            Reply::Source(source) => Ok(source),
            Reply::Fail(e) => Err(e),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Runtime whose loader panics
#[derive(Debug, Default)]
pub struct PanickingRuntime;

impl CandidateRuntime for PanickingRuntime {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn load(&self, _source: &str) -> Result<Box<dyn LoadedCandidate>, CompileDiagnostic> {
        panic!("runtime exploded while loading");
    }
}

/// Experience store that records every call and can be told to fail
#[derive(Debug, Default)]
pub struct RecordingExperienceStore {
    inner: InMemoryExperienceStore,
    fail_recall: bool,
    fail_remember: bool,
    recalls: Mutex<Vec<String>>,
    remembered: Mutex<Vec<ExperienceRecord>>,
}

impl RecordingExperienceStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing_recall(mut self) -> Self {
        self.fail_recall = true;
        self
    }

    #[must_use]
    pub fn failing_remember(mut self) -> Self {
        self.fail_remember = true;
        self
    }

    pub fn recalls(&self) -> Vec<String> {
        self.recalls.lock().clone()
    }

    pub fn remembered(&self) -> Vec<ExperienceRecord> {
        self.remembered.lock().clone()
    }
}

#[async_trait]
impl ExperienceStore for RecordingExperienceStore {
    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<ExperienceRecord>, ExperienceError> {
        self.recalls.lock().push(query.to_string());
        if self.fail_recall {
            return Err(ExperienceError::Unavailable("store offline".to_string()));
        }
        self.inner.recall(query, limit).await
    }

    async fn remember(&self, record: ExperienceRecord) -> Result<(), ExperienceError> {
        self.remembered.lock().push(record.clone());
        if self.fail_remember {
            return Err(ExperienceError::Unavailable("store offline".to_string()));
        }
        self.inner.remember(record).await
    }
}
