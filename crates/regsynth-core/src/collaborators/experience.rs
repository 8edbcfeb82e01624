//! In-memory experience store
//!
//! Protocols are compared by features pulled from their text: register
//! addresses, function codes and data kind keywords. The signature is a short
//! blake3 hash over those features, so two specs naming the same registers
//! land on the same signature regardless of wording.

use super::{ExperienceRecord, ExperienceStore};
use crate::error::ExperienceError;
use moka::future::Cache;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

/// Hex characters kept from the signature hash
pub const SIGNATURE_LEN: usize = 16;

const KIND_KEYWORDS: [&str; 6] = ["int16", "int32", "uint16", "uint32", "float", "string"];

struct FeaturePatterns {
    register: Regex,
    function: Regex,
}

fn feature_patterns() -> Option<&'static FeaturePatterns> {
    static PATTERNS: OnceLock<Result<FeaturePatterns, regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Ok(FeaturePatterns {
                register: Regex::new(r"(?:register|address|addr)[:\s]*(?:0x)?([0-9a-f]+)")?,
                function: Regex::new(r"(?:function|func)[:\s]*(?:code)?[:\s]*(\d+)")?,
            })
        })
        .as_ref()
        .ok()
}

/// Features identifying a protocol: up to 10 register tokens, function codes, kind keywords
#[must_use]
pub fn protocol_features(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut features = Vec::new();

    if let Some(patterns) = feature_patterns() {
        let registers: BTreeSet<&str> = patterns
            .register
            .captures_iter(&lower)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        features.extend(registers.into_iter().take(10).map(str::to_string));

        let functions: BTreeSet<&str> = patterns
            .function
            .captures_iter(&lower)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        features.extend(functions.into_iter().map(str::to_string));
    } else {
        tracing::warn!("feature patterns unavailable, signature uses kind keywords only");
    }

    features.extend(
        KIND_KEYWORDS
            .iter()
            .filter(|kw| lower.contains(*kw))
            .map(|kw| (*kw).to_string()),
    );
    features
}

/// Signature over a feature list
#[must_use]
pub fn protocol_signature(features: &[String]) -> String {
    let joined = if features.is_empty() {
        "generic".to_string()
    } else {
        features.join("_")
    };
    let hash = blake3::hash(joined.as_bytes());
    hash.to_hex().as_str()[..SIGNATURE_LEN].to_string()
}

/// Render recalled records as a context block for the generator
#[must_use]
pub fn format_context(records: &[ExperienceRecord]) -> Option<String> {
    if records.is_empty() {
        return None;
    }
    let mut out = String::from("## Relevant Past Experiences:\n");
    for (i, record) in records.iter().enumerate() {
        let _ = write!(
            out,
            "\n### Experience {}:\n\
             - Problem Type: {}\n\
             - Error: {}\n\
             - Problematic Bytes: {}\n\
             - Byte Position: {}\n\
             - Solution Applied: {}\n\
             - Was Successful: {}\n",
            i + 1,
            record.problem_type.as_str(),
            record.error_message,
            record.problematic_bytes.as_deref().unwrap_or("N/A"),
            record
                .byte_position
                .map_or_else(|| "N/A".to_string(), |p| p.to_string()),
            record.solution_applied,
            record.success,
        );
    }
    Some(out)
}

/// Bounded, process-local [`ExperienceStore`]
#[derive(Debug, Clone)]
pub struct InMemoryExperienceStore {
    records: Cache<String, Arc<ExperienceRecord>>,
}

impl InMemoryExperienceStore {
    /// Store keeping at most `capacity` records
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            records: Cache::builder().max_capacity(capacity).build(),
        }
    }

    /// Every record, oldest first
    #[must_use]
    pub fn records(&self) -> Vec<ExperienceRecord> {
        let mut all: Vec<ExperienceRecord> = self
            .records
            .iter()
            .map(|(_, record)| record.as_ref().clone())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }
}

impl Default for InMemoryExperienceStore {
    fn default() -> Self {
        Self::new(1_000)
    }
}

#[async_trait::async_trait]
impl ExperienceStore for InMemoryExperienceStore {
    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<ExperienceRecord>, ExperienceError> {
        let features = protocol_features(query);
        let signature = protocol_signature(&features);
        let wanted: HashSet<&str> = features.iter().map(String::as_str).collect();

        let mut scored: Vec<(bool, usize, Arc<ExperienceRecord>)> = self
            .records
            .iter()
            .filter_map(|(_, record)| {
                let same = record.protocol_signature == signature;
                let shared = record
                    .protocol_features
                    .iter()
                    .filter(|f| wanted.contains(f.as_str()))
                    .count();
                (same || shared > 0).then_some((same, shared, record))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.cmp(&a.1))
                .then_with(|| b.2.created_at.cmp(&a.2.created_at))
        });

        tracing::debug!(signature, matched = scored.len(), "experience recall");
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, _, record)| record.as_ref().clone())
            .collect())
    }

    async fn remember(&self, record: ExperienceRecord) -> Result<(), ExperienceError> {
        if record.id.is_empty() {
            return Err(ExperienceError::Invalid("record id is empty".to_string()));
        }
        tracing::info!(
            id = %record.id,
            signature = %record.protocol_signature,
            problem = record.problem_type.as_str(),
            success = record.success,
            "experience stored"
        );
        self.records.insert(record.id.clone(), Arc::new(record)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ProblemType;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    fn record(id: &str, text: &str, age_secs: i64) -> ExperienceRecord {
        let features = protocol_features(text);
        ExperienceRecord {
            id: id.to_string(),
            protocol_signature: protocol_signature(&features),
            protocol_features: features,
            device_type: None,
            problem_type: ProblemType::IllegalAddress,
            error_message: "ILLEGAL DATA ADDRESS".to_string(),
            problematic_bytes: None,
            byte_position: None,
            solution_applied: "replaced register map".to_string(),
            successful_code_snippet: None,
            success: true,
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn features_are_sorted_and_typed() {
        let features = protocol_features("Register 0x7531 uint16\nregister 0x7530\nFunction code 3");
        assert_eq!(features, vec!["7530", "7531", "3", "int16", "uint16"]);
    }

    #[test]
    fn signature_is_stable_and_short() {
        let a = protocol_signature(&protocol_features("register 30000 uint16"));
        let b = protocol_signature(&protocol_features("REGISTER 30000 UINT16"));
        assert_eq!(a, b);
        assert_eq!(a.len(), SIGNATURE_LEN);
        assert_ne!(a, protocol_signature(&[]));
    }

    #[tokio::test]
    async fn recall_ranks_signature_then_overlap() {
        let store = InMemoryExperienceStore::new(16);
        store.remember(record("partial", "register 30000\nregister 30005", 30)).await.unwrap();
        store.remember(record("exact", "register 30000 uint16", 60)).await.unwrap();
        store.remember(record("unrelated", "register 40000", 0)).await.unwrap();

        let recalled = store.recall("register 30000 uint16", 3).await.unwrap();
        let ids: Vec<&str> = recalled.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "partial"]);
    }

    #[tokio::test]
    async fn recall_respects_limit() {
        let store = InMemoryExperienceStore::new(16);
        for i in 0..5 {
            store
                .remember(record(&format!("r{i}"), "register 30000", i))
                .await
                .unwrap();
        }
        assert_eq!(store.recall("register 30000", 3).await.unwrap().len(), 3);
        assert_eq!(store.records().len(), 5);
    }

    #[tokio::test]
    async fn remember_rejects_missing_id() {
        let store = InMemoryExperienceStore::default();
        let err = store.remember(record("", "register 1", 0)).await.unwrap_err();
        assert!(matches!(err, ExperienceError::Invalid(_)));
    }

    #[test]
    fn context_block_lists_records() {
        assert!(format_context(&[]).is_none());
        let block = format_context(&[record("a", "register 1", 0)]).unwrap();
        assert!(block.starts_with("## Relevant Past Experiences:"));
        assert!(block.contains("- Problem Type: illegal_address"));
        assert!(block.contains("- Byte Position: N/A"));
    }
}
