//! Snapshot-based undo/redo support.

use std::sync::Arc;

use super::actions::{Direction, PipelineAction};
use super::types::{PipelineSnapshot, PipelineState, UndoEntry};
use crate::utils::now_millis;

/// Maximum number of entries kept on the undo stack.
pub const MAX_UNDO_ENTRIES: usize = 200;

/// Returns true for the structural actions that push undo history.
#[must_use]
pub const fn is_undoable(action: &PipelineAction) -> bool {
    matches!(
        action,
        PipelineAction::AddStage { .. }
            | PipelineAction::DeleteStage { .. }
            | PipelineAction::UpdateStageArgs { .. }
            | PipelineAction::ToggleStage { .. }
            | PipelineAction::InsertStageBefore { .. }
            | PipelineAction::CreateFork { .. }
            | PipelineAction::DeleteFork { .. }
            | PipelineAction::AddInput { .. }
            | PipelineAction::RemoveInput { .. }
            | PipelineAction::ReorderStage { .. }
    )
}

/// Copies the snapshot-covered fields of a state.
///
/// Cache, cache config and inspector state are deliberately left out.
#[must_use]
pub fn extract_snapshot(state: &PipelineState) -> PipelineSnapshot {
    PipelineSnapshot {
        stages: state.stages.clone(),
        forks: state.forks.clone(),
        inputs: state.inputs.clone(),
        active_input_id: state.active_input_id.clone(),
        active_fork_id: state.active_fork_id.clone(),
        cursor_stage_id: state.cursor_stage_id.clone(),
    }
}

/// Overwrites the snapshot-covered fields of a state.
pub fn restore_snapshot(state: &mut PipelineState, snapshot: PipelineSnapshot) {
    state.stages = snapshot.stages;
    state.forks = snapshot.forks;
    state.inputs = snapshot.inputs;
    state.active_input_id = snapshot.active_input_id;
    state.active_fork_id = snapshot.active_fork_id;
    state.cursor_stage_id = snapshot.cursor_stage_id;
}

/// Creates an entry capturing the current state under `label`.
#[must_use]
pub fn checkpoint(state: &PipelineState, label: impl Into<String>) -> Arc<UndoEntry> {
    Arc::new(UndoEntry {
        label: label.into(),
        snapshot: extract_snapshot(state),
        timestamp: now_millis(),
    })
}

/// Pushes an entry, dropping the oldest ones beyond [`MAX_UNDO_ENTRIES`].
pub fn push_capped(stack: &mut Vec<Arc<UndoEntry>>, entry: Arc<UndoEntry>) {
    stack.push(entry);
    if stack.len() > MAX_UNDO_ENTRIES {
        let excess = stack.len() - MAX_UNDO_ENTRIES;
        stack.drain(..excess);
    }
}

/// Human readable label for an undoable action.
#[must_use]
pub fn describe_action(action: &PipelineAction) -> String {
    match action {
        PipelineAction::AddStage { config, .. } => {
            format!("Add {} stage", config.operation_name)
        }
        PipelineAction::DeleteStage { .. } => "Delete stage".to_string(),
        PipelineAction::UpdateStageArgs { .. } => "Update stage arguments".to_string(),
        PipelineAction::ToggleStage { .. } => "Toggle stage enabled".to_string(),
        PipelineAction::InsertStageBefore { config, .. } => {
            format!("Insert {} stage", config.operation_name)
        }
        PipelineAction::CreateFork { name, .. } => format!("Create fork \"{name}\""),
        PipelineAction::DeleteFork { .. } => "Delete fork".to_string(),
        PipelineAction::AddInput { label, .. } => format!("Add input \"{label}\""),
        PipelineAction::RemoveInput { .. } => "Remove input".to_string(),
        PipelineAction::ReorderStage { direction, .. } => match direction {
            Direction::Up => "Move stage up".to_string(),
            Direction::Down => "Move stage down".to_string(),
        },
        other => format!("{other:?}"),
    }
}
