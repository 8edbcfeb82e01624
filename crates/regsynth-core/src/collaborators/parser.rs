//! Line-based register extraction
//!
//! One register per line at most: the first `0x<hex>`, `address <n>` or
//! `register <n>` on a line is its address, the first kind keyword its kind
//! (default `uint16`), and `input` / `fc 4` selects input registers.

use super::SpecParser;
use crate::error::SpecParseError;
use regex::Regex;
use regsynth_registers::{FunctionClass, RegisterKind, RegisterSpec};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Longest register name kept from a line
pub const NAME_LIMIT: usize = 100;

struct Patterns {
    address: Regex,
    kind: Regex,
}

fn patterns() -> Result<&'static Patterns, SpecParseError> {
    static PATTERNS: OnceLock<Result<Patterns, regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Ok(Patterns {
                address: Regex::new(r"(?i)(?:0x([0-9a-f]+)|address[:\s]+(\d+)\b|register[:\s]+(\d+)\b)")?,
                kind: Regex::new(r"(?i)\b(uint16|int16|uint32|int32|float32|float|string)\b")?,
            })
        })
        .as_ref()
        .map_err(|e| SpecParseError::Pattern(e.to_string()))
}

/// Regex-driven [`SpecParser`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexSpecParser;

impl RegexSpecParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Synchronous extraction
    ///
    /// # Errors
    /// `SpecParseError::Pattern` only if the built-in patterns fail to compile
    pub fn extract(&self, text: &str) -> Result<Vec<RegisterSpec>, SpecParseError> {
        let patterns = patterns()?;
        let mut seen = HashSet::new();
        let mut specs = Vec::new();

        for line in text.lines() {
            let Some(caps) = patterns.address.captures(line) else {
                continue;
            };
            let address = match (caps.get(1), caps.get(2).or_else(|| caps.get(3))) {
                (Some(hex), _) => u16::from_str_radix(hex.as_str(), 16).ok(),
                (None, Some(dec)) => dec.as_str().parse::<u16>().ok(),
                (None, None) => None,
            };
            let Some(address) = address else {
                tracing::debug!(line, "address outside the register space, skipped");
                continue;
            };

            let kind = patterns
                .kind
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<RegisterKind>().ok())
                .unwrap_or(RegisterKind::Uint16);

            let lower = line.to_lowercase();
            let class = if lower.contains("input") || lower.contains("fc 4") {
                FunctionClass::ReadInput
            } else {
                FunctionClass::ReadHolding
            };

            if !seen.insert((class, address)) {
                continue;
            }
            let name: String = line.trim().chars().take(NAME_LIMIT).collect();
            specs.push(RegisterSpec::new(address, kind, class, name));
        }

        tracing::info!(
            count = specs.len(),
            sample = ?specs.iter().take(10).map(|s| s.address).collect::<Vec<_>>(),
            "registers extracted"
        );
        Ok(specs)
    }
}

#[async_trait::async_trait]
impl SpecParser for RegexSpecParser {
    async fn parse(&self, text: &str) -> Result<Vec<RegisterSpec>, SpecParseError> {
        self.extract(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn extract(text: &str) -> Vec<RegisterSpec> {
        RegexSpecParser::new().extract(text).unwrap()
    }

    #[test]
    fn hex_and_decimal_addresses() {
        let specs = extract(
            "0x7530 Device status uint16\n\
             Active power: address 30010 int32\n\
             register: 40001 float32 setpoint\n",
        );
        let got: Vec<(u16, RegisterKind)> = specs.iter().map(|s| (s.address, s.kind)).collect();
        assert_eq!(
            got,
            vec![
                (30000, RegisterKind::Uint16),
                (30010, RegisterKind::Int32),
                (40001, RegisterKind::Float),
            ]
        );
    }

    #[test]
    fn input_hint_selects_class() {
        let specs = extract("Grid voltage input register 0x7532\nTemperature FC 4 0x7533\nSetpoint 0x9C41");
        assert_eq!(specs[0].function_class, FunctionClass::ReadInput);
        assert_eq!(specs[1].function_class, FunctionClass::ReadInput);
        assert_eq!(specs[2].function_class, FunctionClass::ReadHolding);
        assert_eq!(specs[0].address, 0x7532);
    }

    #[test]
    fn duplicates_per_class_are_skipped() {
        let specs = extract("0x0010 status\n0x0010 status again\n0x0010 input copy");
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "0x0010 status");
    }

    #[test]
    fn empty_or_addressless_text_yields_nothing() {
        assert!(extract("").is_empty());
        assert!(extract("This inverter reports power and energy.").is_empty());
    }

    #[test]
    fn oversized_addresses_are_dropped() {
        assert!(extract("0x1FFFF huge").is_empty());
    }

    #[test]
    fn names_are_truncated() {
        let line = format!("0x0001 {}", "x".repeat(300));
        assert_eq!(extract(&line)[0].name.chars().count(), NAME_LIMIT);
    }

    #[tokio::test]
    async fn trait_parse_matches_extract() {
        let parser = RegexSpecParser::new();
        let specs = parser.parse("address 30001").await.unwrap();
        assert_eq!(specs[0].address, 30001);
    }
}
