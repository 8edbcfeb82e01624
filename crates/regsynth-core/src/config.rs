//! Synthesis configuration
//!
//! Defaults, then an optional TOML file, then `REGSYNTH_*` environment
//! variables. Call [`SynthesisConfig::validate`] before handing it to the
//! orchestrator.

use crate::error::ConfigError;
use regsynth_registers::{AddressSuperset, DEFAULT_PLAUSIBILITY_FLOOR};
use regsynth_tester::{RuntimeKind, DEFAULT_TEST_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default retry budget
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Attempts per synthesis, including the first
    pub max_attempts: u32,
    /// Hard limit for one self-test or fallback run
    pub test_timeout_ms: u64,
    /// Hard limit for one generator call
    pub generation_timeout_ms: u64,
    /// Addresses the oracle always serves
    pub superset: AddressSuperset,
    /// Parsed addresses below this are not admitted to the allow-list
    pub plausibility_floor: u16,
    /// Candidate language
    pub runtime: RuntimeKind,
    /// Test server listen address for `serve`
    pub bind: SocketAddr,
    /// Experience records kept in memory
    pub experience_capacity: u64,
    /// Records recalled before the first attempt
    pub recall_limit: usize,
}

impl SynthesisConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With retry budget
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// With test timeout
    #[inline]
    #[must_use]
    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With generation timeout
    #[inline]
    #[must_use]
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With safety superset
    #[inline]
    #[must_use]
    pub fn with_superset(mut self, superset: AddressSuperset) -> Self {
        self.superset = superset;
        self
    }

    /// With plausibility floor
    #[inline]
    #[must_use]
    pub fn with_plausibility_floor(mut self, floor: u16) -> Self {
        self.plausibility_floor = floor;
        self
    }

    /// With candidate runtime
    #[inline]
    #[must_use]
    pub fn with_runtime(mut self, runtime: RuntimeKind) -> Self {
        self.runtime = runtime;
        self
    }

    /// With server bind address
    #[inline]
    #[must_use]
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    #[inline]
    #[must_use]
    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    /// Parse TOML; missing keys keep their defaults
    ///
    /// # Errors
    /// `ConfigError::Parse` on malformed input
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read a TOML file
    ///
    /// # Errors
    /// `ConfigError::Read` or `ConfigError::Parse`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `REGSYNTH_*` overrides from the process environment
    ///
    /// # Errors
    /// `ConfigError::Env` if a set variable does not parse
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from any variable lookup
    ///
    /// # Errors
    /// `ConfigError::Env` if a set variable does not parse
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            var: &'static str,
        ) -> Result<Option<T>, ConfigError> {
            match lookup(var) {
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::Env { var, value }),
                None => Ok(None),
            }
        }

        if let Some(v) = parsed(&lookup, "REGSYNTH_MAX_ATTEMPTS")? {
            self.max_attempts = v;
        }
        if let Some(v) = parsed(&lookup, "REGSYNTH_TEST_TIMEOUT_MS")? {
            self.test_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, "REGSYNTH_GENERATION_TIMEOUT_MS")? {
            self.generation_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, "REGSYNTH_PLAUSIBILITY_FLOOR")? {
            self.plausibility_floor = v;
        }
        if let Some(v) = parsed(&lookup, "REGSYNTH_RUNTIME")? {
            self.runtime = v;
        }
        if let Some(v) = parsed(&lookup, "REGSYNTH_BIND")? {
            self.bind = v;
        }
        Ok(self)
    }

    /// Reject configurations the retry loop cannot run with
    ///
    /// # Errors
    /// The first violated constraint
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.test_timeout_ms == 0 || self.generation_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.superset.is_empty() {
            return Err(ConfigError::EmptySuperset);
        }
        if let Some(class) = self.superset.empty_class() {
            return Err(ConfigError::EmptySupersetClass(class));
        }
        Ok(())
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            test_timeout_ms: u64::try_from(DEFAULT_TEST_TIMEOUT.as_millis()).unwrap_or(5_000),
            generation_timeout_ms: 60_000,
            superset: AddressSuperset::default(),
            plausibility_floor: DEFAULT_PLAUSIBILITY_FLOOR,
            runtime: RuntimeKind::default(),
            bind: SocketAddr::from(([127, 0, 0, 1], 5020)),
            experience_capacity: 1_000,
            recall_limit: 3,
        }
    }
}
