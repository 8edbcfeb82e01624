//! Byte-level mismatch localization

use crate::kind::RegisterValue;
use serde::{Deserialize, Serialize};

/// Where an expected and an actual value first diverge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteMismatch {
    /// Canonical big-endian bytes of the expected value
    pub expected_bytes: Vec<u8>,
    /// Canonical big-endian bytes of the value read
    pub actual_bytes: Vec<u8>,
    /// Index of the first differing byte
    pub first_differing_offset: usize,
}

impl ByteMismatch {
    /// Expected bytes as lowercase hex
    #[inline]
    #[must_use]
    pub fn expected_hex(&self) -> String {
        hex::encode(&self.expected_bytes)
    }

    /// Actual bytes as lowercase hex
    #[inline]
    #[must_use]
    pub fn actual_hex(&self) -> String {
        hex::encode(&self.actual_bytes)
    }
}

/// Diff two byte strings; `None` when equal
///
/// When one side is a strict prefix of the other the offset is the shorter length.
#[must_use]
pub fn locate_byte_mismatch(expected: &[u8], actual: &[u8]) -> Option<ByteMismatch> {
    let offset = expected
        .iter()
        .zip(actual)
        .position(|(e, a)| e != a)
        .or_else(|| (expected.len() != actual.len()).then(|| expected.len().min(actual.len())))?;

    Some(ByteMismatch {
        expected_bytes: expected.to_vec(),
        actual_bytes: actual.to_vec(),
        first_differing_offset: offset,
    })
}

/// Compare two decoded values by their canonical bytes
#[inline]
#[must_use]
pub fn compare_values(expected: &RegisterValue, actual: &RegisterValue) -> Option<ByteMismatch> {
    locate_byte_mismatch(&expected.to_be_bytes(), &actual.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hundred_vs_two_hundred_differs_at_offset_one() {
        let m = compare_values(&RegisterValue::U16(100), &RegisterValue::U16(200)).unwrap();
        assert_eq!(m.expected_bytes, vec![0x00, 0x64]);
        assert_eq!(m.actual_bytes, vec![0x00, 0xC8]);
        assert_eq!(m.first_differing_offset, 1);
        assert_eq!(m.expected_hex(), "0064");
        assert_eq!(m.actual_hex(), "00c8");
    }

    #[test]
    fn equal_values_have_no_mismatch() {
        assert!(compare_values(&RegisterValue::U32(7), &RegisterValue::U32(7)).is_none());
    }

    #[test]
    fn high_byte_difference() {
        let m = compare_values(&RegisterValue::U16(0x0100), &RegisterValue::U16(0x0200)).unwrap();
        assert_eq!(m.first_differing_offset, 0);
    }

    #[test]
    fn prefix_difference() {
        let m = locate_byte_mismatch(b"AB", b"ABC").unwrap();
        assert_eq!(m.first_differing_offset, 2);
    }

    #[test]
    fn serde_keeps_raw_bytes() {
        let m = compare_values(&RegisterValue::U16(100), &RegisterValue::U16(200)).unwrap();
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["first_differing_offset"], 1);
        let back: ByteMismatch = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }
}
