//! Read-only views derived from [`PipelineState`].

use std::collections::HashSet;
use std::sync::Arc;

use super::types::{CachedResult, PipelineState, Stage, StageDelta, StageKind};
use crate::cache::composite_key;

/// Stages of the active fork in path order.
#[must_use]
pub fn get_active_path(state: &PipelineState) -> Vec<&Stage> {
    state.active_fork().map_or_else(Vec::new, |fork| {
        fork.stage_ids
            .iter()
            .filter_map(|id| state.stages.get(id))
            .collect()
    })
}

/// Enabled stages of the active fork, e.g. for export.
#[must_use]
pub fn get_enabled_stages(state: &PipelineState) -> Vec<&Stage> {
    get_active_path(state)
        .into_iter()
        .filter(|s| s.config.enabled)
        .collect()
}

/// Returns true if `stage_id` comes after the last error's stage in the
/// active fork.
#[must_use]
pub fn is_downstream_of_error(state: &PipelineState, stage_id: &str) -> bool {
    let (Some(error), Some(fork)) = (&state.last_error, state.active_fork()) else {
        return false;
    };
    match (fork.index_of(&error.stage_id), fork.index_of(stage_id)) {
        (Some(error_idx), Some(stage_idx)) => stage_idx > error_idx,
        _ => false,
    }
}

/// Cached output of a stage for the active input.
#[must_use]
pub fn get_stage_output<'a>(state: &'a PipelineState, stage_id: &str) -> Option<&'a Arc<CachedResult>> {
    state
        .cache
        .get(&composite_key(&state.active_input_id, stage_id))
}

/// The stage under the cursor.
#[must_use]
pub fn get_cursor_stage(state: &PipelineState) -> Option<&Stage> {
    state
        .cursor_stage_id
        .as_ref()
        .and_then(|id| state.stages.get(id))
}

/// Cached output of the stage under the cursor.
#[must_use]
pub fn get_cursor_output(state: &PipelineState) -> Option<&Arc<CachedResult>> {
    state
        .cursor_stage_id
        .as_deref()
        .and_then(|id| get_stage_output(state, id))
}

/// Stages strictly after `stage_id` in the active fork.
#[must_use]
pub fn get_downstream_stages<'a>(state: &'a PipelineState, stage_id: &str) -> Vec<&'a Stage> {
    let Some(fork) = state.active_fork() else {
        return Vec::new();
    };
    let Some(index) = fork.index_of(stage_id) else {
        return Vec::new();
    };
    fork.stage_ids[index + 1..]
        .iter()
        .filter_map(|id| state.stages.get(id))
        .collect()
}

/// Sum of `size_bytes` over every cached result in the state.
#[must_use]
pub fn get_total_cache_size(state: &PipelineState) -> u64 {
    state.cache.values().map(|r| r.size_bytes).sum()
}

/// Classifies an operation name.
#[must_use]
pub fn get_stage_kind(operation_name: &str) -> StageKind {
    if operation_name.starts_with("from") {
        return StageKind::Input;
    }
    match operation_name {
        "sort" => StageKind::Reorder,
        "grep" => StageKind::Filter,
        "collate" | "substream" => StageKind::Aggregate,
        _ => StageKind::Transform,
    }
}

/// Compares a stage's cached output with its parent's.
///
/// Returns `None` when the stage is unknown or has no cached output.
#[must_use]
pub fn get_stage_delta(state: &PipelineState, stage_id: &str) -> Option<StageDelta> {
    let cached = get_stage_output(state, stage_id)?;
    let stage = state.stages.get(stage_id)?;
    let parent = stage
        .parent_id
        .as_deref()
        .and_then(|id| get_stage_output(state, id));

    let (fields_added, fields_removed) = parent.map_or((0, 0), |parent| {
        let before: HashSet<&str> = parent.field_names.iter().map(String::as_str).collect();
        let after: HashSet<&str> = cached.field_names.iter().map(String::as_str).collect();
        (after.difference(&before).count(), before.difference(&after).count())
    });

    let is_text_output = cached.is_text_output();
    let output_count = if is_text_output {
        cached.lines.len()
    } else {
        cached.record_count
    };

    Some(StageDelta {
        kind: get_stage_kind(&stage.config.operation_name),
        parent_count: parent.map(|p| p.record_count),
        output_count,
        fields_added,
        fields_removed,
        is_text_output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{reduce, DeltaChange, LastError, PipelineAction};
    use crate::testing::fixtures::{cached_result, PipelineFixture};

    #[test]
    fn test_stage_kind_table() {
        assert_eq!(get_stage_kind("fromcsv"), StageKind::Input);
        assert_eq!(get_stage_kind("fromps"), StageKind::Input);
        assert_eq!(get_stage_kind("grep"), StageKind::Filter);
        assert_eq!(get_stage_kind("sort"), StageKind::Reorder);
        assert_eq!(get_stage_kind("collate"), StageKind::Aggregate);
        assert_eq!(get_stage_kind("substream"), StageKind::Aggregate);
        assert_eq!(get_stage_kind("xform"), StageKind::Transform);
    }

    #[test]
    fn test_active_path_and_downstream() {
        let fixture = PipelineFixture::new()
            .with_stage("grep", &["{{x}} > 1"])
            .with_stage("sort", &["--key", "x=n"])
            .with_stage("totable", &[]);
        let state = fixture.state();
        let ids = fixture.stage_ids();

        let path: Vec<_> = get_active_path(state).iter().map(|s| s.id.clone()).collect();
        assert_eq!(path, ids);

        let downstream: Vec<_> = get_downstream_stages(state, &ids[0])
            .iter()
            .map(|s| s.id.clone())
            .collect();
        assert_eq!(downstream, ids[1..].to_vec());
        assert!(get_downstream_stages(state, "missing").is_empty());
    }

    #[test]
    fn test_enabled_stages_skip_disabled() {
        let fixture = PipelineFixture::new()
            .with_stage("grep", &["{{x}} > 1"])
            .with_stage("sort", &[]);
        let ids = fixture.stage_ids();
        let state = reduce(
            fixture.arc(),
            PipelineAction::ToggleStage {
                stage_id: ids[0].clone(),
            },
        );

        let enabled: Vec<_> = get_enabled_stages(&state).iter().map(|s| s.id.clone()).collect();
        assert_eq!(enabled, vec![ids[1].clone()]);
    }

    #[test]
    fn test_downstream_of_error() {
        let fixture = PipelineFixture::new()
            .with_stage("grep", &[])
            .with_stage("sort", &[])
            .with_stage("totable", &[]);
        let ids = fixture.stage_ids();
        let state = reduce(
            fixture.arc(),
            PipelineAction::SetError {
                stage_id: ids[1].clone(),
                message: "boom".to_string(),
            },
        );

        assert!(!is_downstream_of_error(&state, &ids[0]));
        assert!(!is_downstream_of_error(&state, &ids[1]));
        assert!(is_downstream_of_error(&state, &ids[2]));

        let mut unrelated = PipelineState::clone(&state);
        unrelated.last_error = Some(LastError {
            stage_id: "elsewhere".to_string(),
            message: String::new(),
        });
        assert!(!is_downstream_of_error(&unrelated, &ids[2]));
    }

    #[test]
    fn test_stage_output_and_cursor_output() {
        let fixture = PipelineFixture::new().with_stage("grep", &[]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();
        let input = state.active_input_id.clone();
        let result = cached_result(&input, &ids[0], 2, 100);
        state.cache.insert(result.key.clone(), Arc::new(result));

        assert_eq!(get_stage_output(&state, &ids[0]).map(|r| r.record_count), Some(2));
        assert_eq!(get_cursor_stage(&state).map(|s| s.id.clone()), Some(ids[0].clone()));
        assert!(get_cursor_output(&state).is_some());
        assert_eq!(get_total_cache_size(&state), 100);
    }

    #[test]
    fn test_stage_delta_fields_and_counts() {
        let fixture = PipelineFixture::new()
            .with_stage("fromcsv", &["--header"])
            .with_stage("xform", &[]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();
        let input = state.active_input_id.clone();

        let mut parent = cached_result(&input, &ids[0], 5, 10);
        parent.field_names = vec!["a".to_string(), "b".to_string()];
        let mut child = cached_result(&input, &ids[1], 3, 10);
        child.field_names = vec!["b".to_string(), "c".to_string(), "d".to_string()];
        state.cache.insert(parent.key.clone(), Arc::new(parent));
        state.cache.insert(child.key.clone(), Arc::new(child));

        let delta = get_stage_delta(&state, &ids[1]).unwrap();
        assert_eq!(delta.kind, StageKind::Transform);
        assert_eq!(delta.parent_count, Some(5));
        assert_eq!(delta.output_count, 3);
        assert_eq!(delta.fields_added, 2);
        assert_eq!(delta.fields_removed, 1);
        assert_eq!(delta.change(), DeltaChange::Shrank);

        let root = get_stage_delta(&state, &ids[0]).unwrap();
        assert_eq!(root.kind, StageKind::Input);
        assert_eq!(root.parent_count, None);
        assert_eq!(root.fields_added, 0);
    }

    #[test]
    fn test_stage_delta_text_output() {
        let fixture = PipelineFixture::new().with_stage("tocsv", &[]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();
        let input = state.active_input_id.clone();

        let mut result = cached_result(&input, &ids[0], 0, 0);
        result.records.clear();
        result.record_count = 0;
        result.lines = vec!["a,b".to_string(), "1,2".to_string()];
        state.cache.insert(result.key.clone(), Arc::new(result));

        let delta = get_stage_delta(&state, &ids[0]).unwrap();
        assert!(delta.is_text_output);
        assert_eq!(delta.output_count, 2);
        assert!(get_stage_delta(&state, "unknown").is_none());
    }

    #[test]
    fn test_selectors_do_not_mutate() {
        let fixture = PipelineFixture::new().with_stage("grep", &[]);
        let state = fixture.arc();
        let before = crate::model::undo::extract_snapshot(state);
        let _ = get_active_path(state);
        let _ = get_stage_delta(state, &fixture.stage_ids()[0]);
        assert_eq!(crate::model::undo::extract_snapshot(state), before);
    }
}
