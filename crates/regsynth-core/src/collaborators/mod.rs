//! Collaborators the orchestrator drives but does not own
//!
//! Spec parsing, code generation and the experience store sit behind
//! async traits so an LLM-backed implementation can replace the defaults.

pub mod experience;
pub mod generator;
pub mod parser;

pub use experience::{format_context, protocol_features, protocol_signature, InMemoryExperienceStore};
pub use generator::TemplateGenerator;
pub use parser::RegexSpecParser;

use crate::error::{ExperienceError, GenerationError, SpecParseError};
use chrono::{DateTime, Utc};
use regsynth_registers::{RegisterMap, RegisterSpec};
use regsynth_tester::{AttemptResult, DiagnosisKind};
use serde::{Deserialize, Serialize};

/// Free text to register declarations
#[async_trait::async_trait]
pub trait SpecParser: Send + Sync + std::fmt::Debug {
    /// Extract registers; duplicates are tolerated and dropped by the caller
    async fn parse(&self, text: &str) -> Result<Vec<RegisterSpec>, SpecParseError>;
}

/// Everything a generator sees for one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationContext {
    /// 1-based
    pub attempt_number: u32,
    pub registers: RegisterMap,
    /// Result of the attempt before this one
    pub previous: Option<AttemptResult>,
    /// Recalled experience block
    pub experience: Option<String>,
    pub device_name: Option<String>,
}

impl GenerationContext {
    /// Retry guidance derived from the previous attempt, if it failed
    #[must_use]
    pub fn feedback(&self) -> Option<String> {
        let previous = self.previous.as_ref().filter(|p| !p.success)?;
        let mut text = format!(
            "Attempt {} failed ({}): {}",
            previous.attempt_number, previous.diagnosis_kind, previous.message
        );
        if let Some(mismatch) = &previous.byte_mismatch {
            text.push_str(&format!(
                "\nExpected bytes {} but read {} (first difference at byte {})",
                mismatch.expected_hex(),
                mismatch.actual_hex(),
                mismatch.first_differing_offset
            ));
        }
        if !previous.suggested_addresses.is_empty() {
            text.push_str(&format!(
                "\nUse only these addresses: {:?}",
                previous.suggested_addresses
            ));
        }
        Some(text)
    }
}

/// Produces candidate source
#[async_trait::async_trait]
pub trait CodeGenerator: Send + Sync + std::fmt::Debug {
    /// Generate one candidate
    async fn generate(
        &self,
        specification: &str,
        context: &GenerationContext,
    ) -> Result<String, GenerationError>;
}

/// Classification of what an experience is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    ByteMismatch,
    IllegalAddress,
    CompileError,
    General,
}

impl ProblemType {
    /// Problem type for a diagnosis kind
    #[must_use]
    pub fn from_kind(kind: DiagnosisKind) -> Self {
        match kind {
            DiagnosisKind::ValueMismatch => ProblemType::ByteMismatch,
            DiagnosisKind::IllegalAddress => ProblemType::IllegalAddress,
            DiagnosisKind::CompileError => ProblemType::CompileError,
            _ => ProblemType::General,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProblemType::ByteMismatch => "byte_mismatch",
            ProblemType::IllegalAddress => "illegal_address",
            ProblemType::CompileError => "compile_error",
            ProblemType::General => "general",
        }
    }
}

/// What one synthesis taught us
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceRecord {
    pub id: String,
    /// Short hash over [`protocol_features`]
    pub protocol_signature: String,
    pub protocol_features: Vec<String>,
    pub device_type: Option<String>,
    pub problem_type: ProblemType,
    pub error_message: String,
    /// `expected <hex> actual <hex>` for byte mismatches
    pub problematic_bytes: Option<String>,
    pub byte_position: Option<usize>,
    pub solution_applied: String,
    /// First 500 characters of the passing candidate
    pub successful_code_snippet: Option<String>,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

/// Long-term memory consulted before and updated after a synthesis
#[async_trait::async_trait]
pub trait ExperienceStore: Send + Sync + std::fmt::Debug {
    /// Records most relevant to `query`, best first
    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<ExperienceRecord>, ExperienceError>;

    /// Persist one record
    async fn remember(&self, record: ExperienceRecord) -> Result<(), ExperienceError>;
}
