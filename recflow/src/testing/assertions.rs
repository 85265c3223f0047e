//! Test assertions for cached results.

use serde_json::Value;

use crate::model::{CachedResult, PipelineState};

/// Asserts the values of `field` across a result's records, in order.
pub fn assert_field_values(result: &CachedResult, field: &str, expected: &[Value]) {
    let actual: Vec<Value> = result
        .records
        .iter()
        .map(|r| r.get(field).cloned().unwrap_or(Value::Null))
        .collect();
    assert_eq!(
        actual, expected,
        "Unexpected values for field '{field}' in stage {}",
        result.stage_id
    );
}

/// Asserts a result's record count and that it matches its records.
pub fn assert_record_count(result: &CachedResult, expected: usize) {
    assert_eq!(
        result.record_count, expected,
        "Expected {expected} records from stage {}, got {}",
        result.stage_id, result.record_count
    );
    if !result.is_spilled() {
        assert_eq!(result.records.len(), result.record_count);
    }
}

/// Asserts that the state caches a result for `stage_id` under its active input.
pub fn assert_cached(state: &PipelineState, stage_id: &str) {
    assert!(
        crate::model::get_stage_output(state, stage_id).is_some(),
        "Expected stage {stage_id} to be cached. Cached keys: {:?}",
        state.cache.keys().collect::<Vec<_>>()
    );
}

/// Asserts that the state caches nothing for `stage_id` under its active input.
pub fn assert_not_cached(state: &PipelineState, stage_id: &str) {
    assert!(
        crate::model::get_stage_output(state, stage_id).is_none(),
        "Expected stage {stage_id} not to be cached"
    );
}
