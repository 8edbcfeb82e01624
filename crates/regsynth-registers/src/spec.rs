//! A single register declaration

use crate::error::RegisterError;
use crate::kind::{FunctionClass, RegisterKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One protocol register: where it lives and how to decode it
///
/// Immutable once placed in a [`RegisterMap`](crate::RegisterMap).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterSpec {
    /// Start address
    pub address: u16,
    /// Decoded data kind
    pub kind: RegisterKind,
    /// Access class; address uniqueness is per class
    pub function_class: FunctionClass,
    /// Human-readable name
    pub name: String,
}

impl RegisterSpec {
    /// Create a register declaration
    #[inline]
    #[must_use]
    pub fn new(
        address: u16,
        kind: RegisterKind,
        function_class: FunctionClass,
        name: impl Into<String>,
    ) -> Self {
        Self {
            address,
            kind,
            function_class,
            name: name.into(),
        }
    }

    /// Placeholder holding-register declaration
    #[inline]
    #[must_use]
    pub fn synthetic(address: u16) -> Self {
        Self::synthetic_in(FunctionClass::ReadHolding, address)
    }

    /// Placeholder declaration built from an oracle-suggested address
    #[inline]
    #[must_use]
    pub fn synthetic_in(function_class: FunctionClass, address: u16) -> Self {
        Self::new(
            address,
            RegisterKind::Uint16,
            function_class,
            format!("Register_{address}"),
        )
    }

    /// Address rendered as `0xNNNN`
    #[inline]
    #[must_use]
    pub fn address_hex(&self) -> String {
        format!("0x{:04X}", self.address)
    }

    /// Number of registers the value occupies
    #[inline]
    #[must_use]
    pub fn register_count(&self) -> u16 {
        self.kind.register_count()
    }

    /// Every address the value touches
    ///
    /// # Errors
    /// `RegisterError::AddressOverflow` if the span leaves the address space
    pub fn span(&self) -> Result<std::ops::RangeInclusive<u16>, RegisterError> {
        let count = self.register_count();
        let last = self
            .address
            .checked_add(count - 1)
            .ok_or(RegisterError::AddressOverflow {
                address: self.address,
                count,
            })?;
        Ok(self.address..=last)
    }
}

impl fmt::Display for RegisterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {} [{}]",
            self.address_hex(),
            self.address,
            self.name,
            self.kind
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_defaults() {
        let spec = RegisterSpec::synthetic(30000);
        assert_eq!(spec.name, "Register_30000");
        assert_eq!(spec.kind, RegisterKind::Uint16);
        assert_eq!(spec.function_class, FunctionClass::ReadHolding);
        assert_eq!(spec.address_hex(), "0x7530");
    }

    #[test]
    fn span_covers_wide_kinds() {
        let spec = RegisterSpec::new(100, RegisterKind::Uint32, FunctionClass::ReadInput, "energy");
        assert_eq!(spec.span().unwrap(), 100..=101);
    }

    #[test]
    fn span_overflow() {
        let spec = RegisterSpec::new(u16::MAX, RegisterKind::Float, FunctionClass::ReadHolding, "f");
        assert!(spec.span().is_err());
    }
}
