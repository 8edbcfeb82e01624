//! Function classes, data kinds and decoded register values
//!
//! Multi-register values are big-endian words, high word first. The
//! canonical byte form of a value (`RegisterValue::to_be_bytes`) is what
//! mismatch localization compares.

use crate::error::RegisterError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category of register access
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionClass {
    /// Read holding registers (function code 0x03)
    ReadHolding,
    /// Read input registers (function code 0x04)
    ReadInput,
}

impl FunctionClass {
    /// Every class the oracle serves
    pub const ALL: [FunctionClass; 2] = [FunctionClass::ReadHolding, FunctionClass::ReadInput];

    /// Protocol function code of the read request
    #[inline]
    #[must_use]
    pub fn function_code(self) -> u8 {
        match self {
            FunctionClass::ReadHolding => 0x03,
            FunctionClass::ReadInput => 0x04,
        }
    }

    /// Class addressed by a read function code
    #[inline]
    #[must_use]
    pub fn from_function_code(code: u8) -> Option<Self> {
        match code {
            0x03 => Some(FunctionClass::ReadHolding),
            0x04 => Some(FunctionClass::ReadInput),
            _ => None,
        }
    }

    /// Short keyword used by the register script language
    #[inline]
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            FunctionClass::ReadHolding => "holding",
            FunctionClass::ReadInput => "input",
        }
    }
}

impl fmt::Display for FunctionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for FunctionClass {
    type Err = RegisterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "holding" | "read_holding" | "hr" | "3" => Ok(FunctionClass::ReadHolding),
            "input" | "read_input" | "ir" | "4" => Ok(FunctionClass::ReadInput),
            other => Err(RegisterError::UnknownFunctionClass(other.to_string())),
        }
    }
}

/// Data kind stored at a register address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    /// Unsigned 16-bit
    Uint16,
    /// Signed 16-bit
    Int16,
    /// Unsigned 32-bit across two registers
    Uint32,
    /// Signed 32-bit across two registers
    Int32,
    /// IEEE-754 single across two registers
    Float,
    /// Two ASCII characters per register
    String,
}

impl RegisterKind {
    /// Number of consecutive 16-bit registers one value occupies
    #[inline]
    #[must_use]
    pub fn register_count(self) -> u16 {
        match self {
            RegisterKind::Uint16 | RegisterKind::Int16 | RegisterKind::String => 1,
            RegisterKind::Uint32 | RegisterKind::Int32 | RegisterKind::Float => 2,
        }
    }

    /// Whether the canonical encoding has a fixed byte width
    #[inline]
    #[must_use]
    pub fn is_fixed_width(self) -> bool {
        !matches!(self, RegisterKind::String)
    }

    /// Keyword form
    #[inline]
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            RegisterKind::Uint16 => "uint16",
            RegisterKind::Int16 => "int16",
            RegisterKind::Uint32 => "uint32",
            RegisterKind::Int32 => "int32",
            RegisterKind::Float => "float",
            RegisterKind::String => "string",
        }
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for RegisterKind {
    type Err = RegisterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uint16" | "u16" | "word" => Ok(RegisterKind::Uint16),
            "int16" | "i16" => Ok(RegisterKind::Int16),
            "uint32" | "u32" => Ok(RegisterKind::Uint32),
            "int32" | "i32" => Ok(RegisterKind::Int32),
            "float" | "float32" | "f32" => Ok(RegisterKind::Float),
            "string" | "str" | "ascii" => Ok(RegisterKind::String),
            other => Err(RegisterError::UnknownKind(other.to_string())),
        }
    }
}

/// A decoded register value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RegisterValue {
    /// Unsigned 16-bit
    U16(u16),
    /// Signed 16-bit
    I16(i16),
    /// Unsigned 32-bit
    U32(u32),
    /// Signed 32-bit
    I32(i32),
    /// IEEE-754 single
    F32(f32),
    /// ASCII text, trailing NULs stripped
    Str(String),
}

impl RegisterValue {
    /// Kind of this value
    #[must_use]
    pub fn kind(&self) -> RegisterKind {
        match self {
            RegisterValue::U16(_) => RegisterKind::Uint16,
            RegisterValue::I16(_) => RegisterKind::Int16,
            RegisterValue::U32(_) => RegisterKind::Uint32,
            RegisterValue::I32(_) => RegisterKind::Int32,
            RegisterValue::F32(_) => RegisterKind::Float,
            RegisterValue::Str(_) => RegisterKind::String,
        }
    }

    /// Canonical big-endian byte representation
    #[must_use]
    pub fn to_be_bytes(&self) -> Vec<u8> {
        match self {
            RegisterValue::U16(v) => v.to_be_bytes().to_vec(),
            RegisterValue::I16(v) => v.to_be_bytes().to_vec(),
            RegisterValue::U32(v) => v.to_be_bytes().to_vec(),
            RegisterValue::I32(v) => v.to_be_bytes().to_vec(),
            RegisterValue::F32(v) => v.to_be_bytes().to_vec(),
            RegisterValue::Str(s) => s.as_bytes().to_vec(),
        }
    }

    /// Encode as 16-bit register words for a write request
    #[must_use]
    pub fn to_registers(&self) -> Vec<u16> {
        self.to_be_bytes()
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
            .collect()
    }

    /// Decode words read from the wire
    ///
    /// # Errors
    /// `RegisterError::WordCount` when `words` does not match the kind's width
    pub fn decode(kind: RegisterKind, words: &[u16]) -> Result<Self, RegisterError> {
        let expected = usize::from(kind.register_count());
        let fixed = kind.is_fixed_width();
        if (fixed && words.len() != expected) || words.is_empty() {
            return Err(RegisterError::WordCount {
                kind,
                expected,
                actual: words.len(),
            });
        }

        let wide = || (u32::from(words[0]) << 16) | u32::from(words[1]);
        Ok(match kind {
            RegisterKind::Uint16 => RegisterValue::U16(words[0]),
            RegisterKind::Int16 => RegisterValue::I16(i16::from_be_bytes(words[0].to_be_bytes())),
            RegisterKind::Uint32 => RegisterValue::U32(wide()),
            RegisterKind::Int32 => RegisterValue::I32(i32::from_be_bytes(wide().to_be_bytes())),
            RegisterKind::Float => RegisterValue::F32(f32::from_bits(wide())),
            RegisterKind::String => {
                let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
                let text = String::from_utf8_lossy(&bytes);
                RegisterValue::Str(text.trim_end_matches('\0').to_string())
            }
        })
    }

    /// Parse a literal as a value of `kind` (decimal or `0x` hex for integers)
    ///
    /// # Errors
    /// `RegisterError::InvalidValue` when the literal does not fit the kind
    pub fn parse(kind: RegisterKind, text: &str) -> Result<Self, RegisterError> {
        let invalid = || RegisterError::InvalidValue {
            kind,
            text: text.to_string(),
        };
        let trimmed = text.trim();
        let integer = || -> Result<i64, RegisterError> {
            match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
                Some(hex) => i64::from_str_radix(hex, 16).map_err(|_| invalid()),
                None => trimmed.parse::<i64>().map_err(|_| invalid()),
            }
        };

        Ok(match kind {
            RegisterKind::Uint16 => RegisterValue::U16(u16::try_from(integer()?).map_err(|_| invalid())?),
            RegisterKind::Int16 => RegisterValue::I16(i16::try_from(integer()?).map_err(|_| invalid())?),
            RegisterKind::Uint32 => RegisterValue::U32(u32::try_from(integer()?).map_err(|_| invalid())?),
            RegisterKind::Int32 => RegisterValue::I32(i32::try_from(integer()?).map_err(|_| invalid())?),
            RegisterKind::Float => RegisterValue::F32(trimmed.parse::<f32>().map_err(|_| invalid())?),
            RegisterKind::String => RegisterValue::Str(trimmed.trim_matches('"').to_string()),
        })
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::U16(v) => write!(f, "{v} (0x{v:04X})"),
            RegisterValue::I16(v) => write!(f, "{v}"),
            RegisterValue::U32(v) => write!(f, "{v} (0x{v:08X})"),
            RegisterValue::I32(v) => write!(f, "{v}"),
            RegisterValue::F32(v) => write!(f, "{v}"),
            RegisterValue::Str(s) => write!(f, "\"{s}\""),
        }
    }
}
