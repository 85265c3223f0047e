//! Cache key helpers.
//!
//! The live cache is keyed by pipeline position (`inputId:stageId`).
//! [`compute_cache_key`] is a separate content fingerprint for
//! deduplication; `get`/`put` never consult it.

use sha2::{Digest, Sha256};

use crate::model::{CacheKey, Stage};

/// Hex characters kept from each digest step.
const KEY_HEX_LEN: usize = 16;

/// Builds the composite storage key for a stage result.
#[must_use]
pub fn composite_key(input_id: &str, stage_id: &str) -> String {
    format!("{input_id}:{stage_id}")
}

/// Computes a Merkle-chain fingerprint of `stages[..=target_index]`.
///
/// Starting from `input_id`, each stage folds
/// `previous | operation_name | JSON(args) | enabled` into a SHA-256 digest
/// truncated to 16 hex characters. Any upstream change alters every
/// downstream key. An out-of-range `target_index` is clamped to the last
/// stage.
#[must_use]
pub fn compute_cache_key(input_id: &str, stages: &[Stage], target_index: usize) -> CacheKey {
    let mut parent_key = input_id.to_string();
    let end = target_index.saturating_add(1).min(stages.len());

    for stage in &stages[..end] {
        let args = serde_json::to_string(&stage.config.args).unwrap_or_default();
        let data = [
            parent_key.as_str(),
            stage.config.operation_name.as_str(),
            args.as_str(),
            if stage.config.enabled { "true" } else { "false" },
        ]
        .join("|");

        let digest = Sha256::digest(data.as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(KEY_HEX_LEN);
        parent_key = encoded;
    }

    parent_key
}

/// Turns a composite key into a filesystem-safe file stem.
#[must_use]
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
