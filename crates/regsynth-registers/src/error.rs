//! Error types for the register model

use crate::kind::{FunctionClass, RegisterKind};

/// Errors raised while building register maps or decoding register values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    /// Same address declared twice within one function class
    #[error("duplicate register {address} in {class}")]
    DuplicateRegister {
        /// Function class of the clash
        class: FunctionClass,
        /// Clashing address
        address: u16,
    },

    /// Data kind keyword not recognised
    #[error("unknown register kind: '{0}'")]
    UnknownKind(String),

    /// Function class keyword not recognised
    #[error("unknown function class: '{0}'")]
    UnknownFunctionClass(String),

    /// Wrong number of 16-bit words for the kind
    #[error("{kind} needs {expected} register(s), got {actual}")]
    WordCount {
        /// Kind being decoded
        kind: RegisterKind,
        /// Words the kind occupies
        expected: usize,
        /// Words supplied
        actual: usize,
    },

    /// Literal does not parse as a value of the kind
    #[error("'{text}' is not a valid {kind} value")]
    InvalidValue {
        /// Target kind
        kind: RegisterKind,
        /// Offending literal
        text: String,
    },

    /// Register span runs past the end of the 16-bit address space
    #[error("register span {address}+{count} exceeds the address space")]
    AddressOverflow {
        /// First address of the span
        address: u16,
        /// Register count
        count: u16,
    },
}
