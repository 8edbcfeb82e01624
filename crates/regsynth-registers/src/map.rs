//! Generation-versioned register maps
//!
//! Each retry produces generation N+1. A replacement map is built entirely
//! from oracle suggestions and never merged with the map it replaces, so the
//! next candidate cannot keep using a bad address next to the good ones.

use crate::error::RegisterError;
use crate::kind::FunctionClass;
use crate::spec::RegisterSpec;
use crate::SUGGESTION_LIMIT;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ordered, per-class unique collection of register declarations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMap {
    generation: u32,
    specs: Vec<RegisterSpec>,
}

impl RegisterMap {
    /// Empty generation-0 map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a generation-0 map, rejecting per-class duplicates
    ///
    /// # Errors
    /// `RegisterError::DuplicateRegister` on the first clash
    pub fn from_specs(specs: impl IntoIterator<Item = RegisterSpec>) -> Result<Self, RegisterError> {
        let mut map = Self::new();
        for spec in specs {
            map.push(spec)?;
        }
        Ok(map)
    }

    /// Append a declaration
    ///
    /// # Errors
    /// `RegisterError::DuplicateRegister` if the class already holds the address
    pub fn push(&mut self, spec: RegisterSpec) -> Result<(), RegisterError> {
        if self.contains(spec.function_class, spec.address) {
            return Err(RegisterError::DuplicateRegister {
                class: spec.function_class,
                address: spec.address,
            });
        }
        self.specs.push(spec);
        Ok(())
    }

    /// Generation number (0 = the parsed map)
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Declarations in insertion order
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &RegisterSpec> {
        self.specs.iter()
    }

    /// Declarations as a slice
    #[inline]
    #[must_use]
    pub fn specs(&self) -> &[RegisterSpec] {
        &self.specs
    }

    /// Number of declarations
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether the map declares nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Whether `class` declares `address`
    #[must_use]
    pub fn contains(&self, class: FunctionClass, address: u16) -> bool {
        self.specs
            .iter()
            .any(|s| s.function_class == class && s.address == address)
    }

    /// Declared start addresses for one class
    #[must_use]
    pub fn addresses(&self, class: FunctionClass) -> BTreeSet<u16> {
        self.specs
            .iter()
            .filter(|s| s.function_class == class)
            .map(|s| s.address)
            .collect()
    }

    /// Declared start addresses across every class
    #[must_use]
    pub fn all_addresses(&self) -> BTreeSet<u16> {
        self.specs.iter().map(|s| s.address).collect()
    }

    /// Next generation with identical content
    #[must_use]
    pub fn next_generation(&self) -> Self {
        Self {
            generation: self.generation + 1,
            specs: self.specs.clone(),
        }
    }

    /// Next generation built only from suggested addresses of one class
    ///
    /// Keeps suggestion order, drops repeats, and caps at the suggestion limit.
    #[must_use]
    pub fn replaced_by_suggestions(&self, class: FunctionClass, suggestions: &[u16]) -> Self {
        let mut seen = BTreeSet::new();
        let specs = suggestions
            .iter()
            .copied()
            .filter(|addr| seen.insert(*addr))
            .take(SUGGESTION_LIMIT)
            .map(|address| RegisterSpec::synthetic_in(class, address))
            .collect();

        Self {
            generation: self.generation + 1,
            specs,
        }
    }
}

impl<'a> IntoIterator for &'a RegisterMap {
    type Item = &'a RegisterSpec;
    type IntoIter = std::slice::Iter<'a, RegisterSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.specs.iter()
    }
}
