//! Register model shared by the oracle and the orchestrator
//!
//! - [`RegisterSpec`] / [`RegisterMap`]: what a candidate should talk to
//! - [`ValidAddressSet`]: what the oracle will actually serve
//! - [`RegisterValue`] and [`locate_byte_mismatch`]: canonical big-endian
//!   encoding and byte-level diffing for precise fix guidance
//!
//! # Example
//!
//! ```rust
//! use regsynth_registers::{FunctionClass, RegisterMap, RegisterSpec, RegisterKind};
//!
//! let map = RegisterMap::from_specs([
//!     RegisterSpec::new(30000, RegisterKind::Uint16, FunctionClass::ReadHolding, "status"),
//! ]).unwrap();
//! let next = map.replaced_by_suggestions(FunctionClass::ReadHolding, &[30001]);
//! assert_eq!(next.generation(), 1);
//! ```

#![allow(missing_docs)]

pub mod address_set;
pub mod error;
pub mod kind;
pub mod map;
pub mod mismatch;
pub mod spec;
pub mod synthetic;

pub use address_set::{AddressRange, AddressSuperset, ValidAddressSet, DEFAULT_PLAUSIBILITY_FLOOR};
pub use error::RegisterError;
pub use kind::{FunctionClass, RegisterKind, RegisterValue};
pub use map::RegisterMap;
pub use mismatch::{compare_values, locate_byte_mismatch, ByteMismatch};
pub use spec::RegisterSpec;
pub use synthetic::synthetic_value;

/// Maximum suggested addresses carried into diagnostics and replacement maps
pub const SUGGESTION_LIMIT: usize = 10;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
