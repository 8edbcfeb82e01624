//! regsynth core - feedback-directed synthesis of register-protocol clients
//!
//! The orchestrator drives a bounded loop:
//! - parse the free-text specification into a register map
//! - generate a candidate for the current map generation
//! - configure the oracle and test the candidate against it
//! - retry with the diagnosis (and, after an illegal address, a map built
//!   only from suggested addresses) or finalize
//!
//! State lives in an immutable [`SynthesisState`] advanced by the pure
//! [`reduce`] function; [`Orchestrator`] performs the side effects.
//!
//! # Example
//!
//! ```rust,no_run
//! use regsynth_core::{Orchestrator, SynthesisConfig, TemplateGenerator};
//! use regsynth_oracle::Oracle;
//! use regsynth_registers::ValidAddressSet;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let oracle = Arc::new(Oracle::ephemeral(ValidAddressSet::uniform(30000..30100)).await?);
//! let orchestrator = Orchestrator::new(
//!     SynthesisConfig::new(),
//!     oracle,
//!     Arc::new(TemplateGenerator::new()),
//! )?;
//!
//! let outcome = orchestrator
//!     .synthesize("Device status: register 0x0005 uint16", Some("inverter"), None)
//!     .await;
//! println!("{} attempts, confidence {}", outcome.total_attempts, outcome.confidence_score);
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]

pub mod collaborators;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod state;

pub use collaborators::{
    CodeGenerator, ExperienceRecord, ExperienceStore, GenerationContext, InMemoryExperienceStore,
    ProblemType, RegexSpecParser, SpecParser, TemplateGenerator,
};
pub use config::{SynthesisConfig, DEFAULT_MAX_ATTEMPTS};
pub use error::{ConfigError, ExperienceError, GenerationError, SpecParseError, SynthesisError};
pub use orchestrator::{Orchestrator, SynthesisOutcome};
pub use state::{
    confidence, next_stage, reduce, AgentName, AttemptLogEntry, Stage, StageOutput, SynthesisState,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a synthesis
    pub use crate::{
        CodeGenerator, GenerationContext, Orchestrator, SynthesisConfig, SynthesisOutcome,
        TemplateGenerator,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
