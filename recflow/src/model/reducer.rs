//! Pure state transitions over [`PipelineState`].
//!
//! Every call to [`reduce`] either returns the same `Arc` (no-op) or a
//! freshly built state; the input state is never mutated. Structural
//! actions push an undo checkpoint first.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use super::actions::{ColumnDirection, Direction, PipelineAction};
use super::types::{
    CacheConfig, CacheMap, FocusedPanel, Fork, ForkId, InputSource, InspectorState, LastError,
    PipelineSnapshot, PipelineState, Stage, StageConfig, StageId, MAIN_FORK_NAME,
};
use super::undo::{checkpoint, describe_action, is_undoable, push_capped, restore_snapshot};
use crate::cache::composite_key;
use crate::utils::{generate_id, now_millis};

/// Creates an empty session: one root fork, no inputs, default cache config.
#[must_use]
pub fn create_initial_state() -> PipelineState {
    create_initial_state_with(CacheConfig::default())
}

/// Creates an empty session with the given cache settings.
#[must_use]
pub fn create_initial_state_with(cache_config: CacheConfig) -> PipelineState {
    let main_fork_id = generate_id();
    let main_fork = Fork {
        id: main_fork_id.clone(),
        name: MAIN_FORK_NAME.to_string(),
        fork_point_stage_id: None,
        parent_fork_id: None,
        stage_ids: Vec::new(),
        created_at: now_millis(),
    };

    PipelineState {
        stages: HashMap::new(),
        forks: HashMap::from([(main_fork_id.clone(), main_fork)]),
        inputs: HashMap::new(),
        active_input_id: generate_id(),
        active_fork_id: main_fork_id,
        cursor_stage_id: None,
        focused_panel: FocusedPanel::Pipeline,
        cache: CacheMap::new(),
        cache_config,
        inspector: InspectorState::default(),
        executing: false,
        last_error: None,
        undo_stack: Vec::new(),
        redo_stack: Vec::new(),
        session_id: generate_id(),
        session_dir: PathBuf::new(),
        session_name: None,
    }
}

/// Applies `action` to `state`.
///
/// Returns the same `Arc` when the action is a no-op, so callers can use
/// [`Arc::ptr_eq`] to skip re-rendering or re-execution.
#[must_use]
pub fn reduce(state: &Arc<PipelineState>, action: PipelineAction) -> Arc<PipelineState> {
    if would_be_noop(state, &action) {
        return Arc::clone(state);
    }

    let mut next = PipelineState::clone(state);

    if is_undoable(&action) {
        push_capped(&mut next.undo_stack, checkpoint(state, describe_action(&action)));
        next.redo_stack.clear();
    }

    apply(&mut next, action);
    Arc::new(next)
}

fn apply(state: &mut PipelineState, action: PipelineAction) {
    match action {
        PipelineAction::Undo => {
            if let Some(entry) = state.undo_stack.pop() {
                let redo = checkpoint(state, entry.label.clone());
                restore_from(state, &entry.snapshot);
                push_capped(&mut state.redo_stack, redo);
            }
        }
        PipelineAction::Redo => {
            if let Some(entry) = state.redo_stack.pop() {
                let undo = checkpoint(state, entry.label.clone());
                restore_from(state, &entry.snapshot);
                push_capped(&mut state.undo_stack, undo);
            }
        }

        PipelineAction::AddStage {
            after_stage_id,
            config,
        } => {
            let Some(fork) = state.forks.get(&state.active_fork_id) else {
                return;
            };
            let index = after_stage_id
                .as_deref()
                .and_then(|id| fork.index_of(id))
                .map_or(fork.stage_ids.len(), |i| i + 1);
            let fork_id = fork.id.clone();
            insert_stage(state, &fork_id, index, config);
        }
        PipelineAction::InsertStageBefore {
            before_stage_id,
            config,
        } => {
            let Some(fork) = state.forks.get(&state.active_fork_id) else {
                return;
            };
            let Some(index) = fork.index_of(&before_stage_id) else {
                return;
            };
            let fork_id = fork.id.clone();
            insert_stage(state, &fork_id, index, config);
        }
        PipelineAction::DeleteStage { stage_id } => delete_stage(state, &stage_id),
        PipelineAction::UpdateStageArgs { stage_id, args } => {
            if let Some(stage) = state.stages.get_mut(&stage_id) {
                stage.config.args = args;
                invalidate_stage_and_downstream(state, &stage_id);
            }
        }
        PipelineAction::ToggleStage { stage_id } => {
            if let Some(stage) = state.stages.get_mut(&stage_id) {
                stage.config.enabled = !stage.config.enabled;
                invalidate_stage_and_downstream(state, &stage_id);
            }
        }
        PipelineAction::ReorderStage {
            stage_id,
            direction,
        } => reorder_stage(state, &stage_id, direction),
        PipelineAction::CreateFork { name, at_stage_id } => {
            let fork_id = generate_id();
            let fork = Fork {
                id: fork_id.clone(),
                name,
                fork_point_stage_id: at_stage_id,
                parent_fork_id: Some(state.active_fork_id.clone()),
                stage_ids: Vec::new(),
                created_at: now_millis(),
            };
            state.forks.insert(fork_id.clone(), fork);
            state.active_fork_id = fork_id;
            state.cursor_stage_id = None;
        }
        PipelineAction::DeleteFork { fork_id } => {
            let Some(fork) = state.forks.remove(&fork_id) else {
                return;
            };
            for stage_id in &fork.stage_ids {
                state.stages.remove(stage_id);
            }
            if let Some(parent) = fork.parent_fork_id {
                state.active_fork_id = parent;
            }
            state.cursor_stage_id = None;
        }
        PipelineAction::AddInput { source, label } => {
            let input_id = generate_id();
            let sequence = state
                .inputs
                .values()
                .map(|input| input.sequence + 1)
                .max()
                .unwrap_or_default();
            state.inputs.insert(
                input_id.clone(),
                InputSource {
                    id: input_id.clone(),
                    label,
                    source,
                    sequence,
                },
            );
            state.active_input_id = input_id;
        }
        PipelineAction::RemoveInput { input_id } => {
            state.inputs.remove(&input_id);
            if state.active_input_id == input_id {
                // Fall back to the earliest added input.
                if let Some(next) = state.inputs.values().min_by_key(|input| input.sequence) {
                    state.active_input_id = next.id.clone();
                }
            }
        }

        PipelineAction::MoveCursor { direction } => move_cursor(state, direction),
        PipelineAction::SetCursor { stage_id } => state.cursor_stage_id = Some(stage_id),
        PipelineAction::SwitchInput { input_id } => {
            if state.inputs.contains_key(&input_id) {
                state.active_input_id = input_id;
            }
        }
        PipelineAction::SwitchFork { fork_id } => {
            if state.forks.contains_key(&fork_id) {
                state.active_fork_id = fork_id;
                state.cursor_stage_id = None;
            }
        }
        PipelineAction::CacheResult {
            input_id,
            stage_id,
            result,
        } => {
            state.cache.insert(composite_key(&input_id, &stage_id), result);
        }
        PipelineAction::InvalidateStage { stage_id } => {
            state.cache.retain(|_, result| result.stage_id != stage_id);
        }
        PipelineAction::PinStage { stage_id } => {
            let pinned = &mut state.cache_config.pinned_stage_ids;
            if !pinned.remove(&stage_id) {
                pinned.insert(stage_id);
            }
        }
        PipelineAction::SetCachePolicy { policy } => state.cache_config.cache_policy = policy,
        PipelineAction::SetError { stage_id, message } => {
            state.last_error = Some(LastError { stage_id, message });
        }
        PipelineAction::ClearError => state.last_error = None,
        PipelineAction::SetExecuting { executing } => state.executing = executing,
        PipelineAction::ToggleFocus => {
            state.focused_panel = match state.focused_panel {
                FocusedPanel::Pipeline => FocusedPanel::Inspector,
                FocusedPanel::Inspector => FocusedPanel::Pipeline,
            };
        }
        PipelineAction::SetViewMode { view_mode } => state.inspector.view_mode = view_mode,
        PipelineAction::MoveColumnHighlight {
            direction,
            field_count,
        } => {
            state.inspector.highlighted_column =
                move_column(state.inspector.highlighted_column, direction, field_count);
        }
        PipelineAction::ClearColumnHighlight => state.inspector.highlighted_column = None,
        PipelineAction::SetSessionName { name } => state.session_name = Some(name),
    }
}

/// Detects undoable actions that would change nothing, plus empty undo/redo.
fn would_be_noop(state: &PipelineState, action: &PipelineAction) -> bool {
    match action {
        PipelineAction::Undo => state.undo_stack.is_empty(),
        PipelineAction::Redo => state.redo_stack.is_empty(),
        PipelineAction::AddStage { .. } | PipelineAction::CreateFork { .. } => {
            !state.forks.contains_key(&state.active_fork_id)
        }
        PipelineAction::DeleteStage { stage_id }
        | PipelineAction::UpdateStageArgs { stage_id, .. }
        | PipelineAction::ToggleStage { stage_id } => !state.stages.contains_key(stage_id),
        PipelineAction::InsertStageBefore {
            before_stage_id, ..
        } => state
            .active_fork()
            .and_then(|fork| fork.index_of(before_stage_id))
            .is_none(),
        PipelineAction::ReorderStage {
            stage_id,
            direction,
        } => {
            let Some(stage) = state.stages.get(stage_id) else {
                return true;
            };
            let Some(fork) = state.forks.get(&stage.fork_id) else {
                return true;
            };
            let Some(index) = fork.index_of(stage_id) else {
                return true;
            };
            neighbour_index(index, *direction, fork.stage_ids.len()).is_none()
        }
        PipelineAction::DeleteFork { fork_id } => {
            state.forks.get(fork_id).map_or(true, Fork::is_root)
        }
        PipelineAction::RemoveInput { input_id } => {
            state.inputs.len() <= 1 || !state.inputs.contains_key(input_id)
        }
        _ => false,
    }
}

fn neighbour_index(index: usize, direction: Direction, len: usize) -> Option<usize> {
    match direction {
        Direction::Up => index.checked_sub(1),
        Direction::Down => (index + 1 < len).then_some(index + 1),
    }
}

fn insert_stage(state: &mut PipelineState, fork_id: &ForkId, index: usize, config: StageConfig) {
    let Some(fork) = state.forks.get_mut(fork_id) else {
        return;
    };
    let stage_id = generate_id();
    let index = index.min(fork.stage_ids.len());
    fork.stage_ids.insert(index, stage_id.clone());
    let stage_ids = fork.stage_ids.clone();

    state.stages.insert(
        stage_id.clone(),
        Stage {
            id: stage_id.clone(),
            config,
            parent_id: None,
            child_ids: Vec::new(),
            fork_id: fork_id.clone(),
            position: index,
        },
    );
    relink_chain(&mut state.stages, &stage_ids);

    // Everything after the new stage now has a different upstream.
    invalidate_ids(&mut state.cache, &stage_ids[index + 1..]);
    state.cursor_stage_id = Some(stage_id);
}

fn delete_stage(state: &mut PipelineState, stage_id: &str) {
    let Some(stage) = state.stages.remove(stage_id) else {
        return;
    };

    let Some(fork) = state.forks.get_mut(&stage.fork_id) else {
        return;
    };
    let old_index = fork.index_of(stage_id);
    fork.stage_ids.retain(|id| id != stage_id);
    let stage_ids = fork.stage_ids.clone();

    // Splice the parent and children together around the removed stage.
    if let Some(parent) = stage.parent_id.as_ref().and_then(|p| state.stages.get_mut(p)) {
        parent.child_ids.retain(|id| id != stage_id);
        for child in &stage.child_ids {
            if !parent.child_ids.contains(child) {
                parent.child_ids.push(child.clone());
            }
        }
    }
    for child_id in &stage.child_ids {
        if let Some(child) = state.stages.get_mut(child_id) {
            child.parent_id.clone_from(&stage.parent_id);
        }
    }
    recompute_positions(&mut state.stages, &stage_ids);

    let old_index = old_index.unwrap_or(stage_ids.len());
    invalidate_ids(&mut state.cache, &stage_ids[old_index.min(stage_ids.len())..]);

    state.cursor_stage_id = if stage_ids.is_empty() {
        None
    } else {
        Some(stage_ids[old_index.min(stage_ids.len() - 1)].clone())
    };

    if state
        .last_error
        .as_ref()
        .is_some_and(|err| err.stage_id == stage_id)
    {
        state.last_error = None;
    }
}

fn reorder_stage(state: &mut PipelineState, stage_id: &str, direction: Direction) {
    let Some(fork_id) = state.stages.get(stage_id).map(|s| s.fork_id.clone()) else {
        return;
    };
    let Some(fork) = state.forks.get_mut(&fork_id) else {
        return;
    };
    let Some(index) = fork.index_of(stage_id) else {
        return;
    };
    let Some(other) = neighbour_index(index, direction, fork.stage_ids.len()) else {
        return;
    };

    fork.stage_ids.swap(index, other);
    let stage_ids = fork.stage_ids.clone();
    relink_chain(&mut state.stages, &stage_ids);
    invalidate_ids(&mut state.cache, &stage_ids[index.min(other)..]);
}

fn move_cursor(state: &mut PipelineState, direction: Direction) {
    let Some(fork) = state.forks.get(&state.active_fork_id) else {
        return;
    };
    let Some(last) = fork.stage_ids.len().checked_sub(1) else {
        return;
    };

    let current = state
        .cursor_stage_id
        .as_deref()
        .and_then(|id| fork.index_of(id));
    let next = match (direction, current) {
        (Direction::Up, None) => 0,
        (Direction::Up, Some(i)) => i.saturating_sub(1),
        (Direction::Down, None) => 0,
        (Direction::Down, Some(i)) => (i + 1).min(last),
    };
    state.cursor_stage_id = Some(fork.stage_ids[next].clone());
}

fn move_column(current: Option<usize>, direction: ColumnDirection, field_count: usize) -> Option<usize> {
    let last = field_count.checked_sub(1)?;
    Some(match (direction, current) {
        (ColumnDirection::Right, None) => 0,
        (ColumnDirection::Left, None) => last,
        (ColumnDirection::Right, Some(i)) => (i + 1).min(last),
        (ColumnDirection::Left, Some(i)) => i.saturating_sub(1).min(last),
    })
}

/// Rewrites parent/child links and positions so `stage_ids` forms one chain.
fn relink_chain(stages: &mut HashMap<StageId, Stage>, stage_ids: &[StageId]) {
    for (i, id) in stage_ids.iter().enumerate() {
        if let Some(stage) = stages.get_mut(id) {
            stage.parent_id = i.checked_sub(1).map(|p| stage_ids[p].clone());
            stage.child_ids = stage_ids.get(i + 1).cloned().into_iter().collect();
            stage.position = i;
        }
    }
}

fn recompute_positions(stages: &mut HashMap<StageId, Stage>, stage_ids: &[StageId]) {
    for (i, id) in stage_ids.iter().enumerate() {
        if let Some(stage) = stages.get_mut(id) {
            stage.position = i;
        }
    }
}

fn invalidate_ids(cache: &mut CacheMap, stage_ids: &[StageId]) {
    if stage_ids.is_empty() {
        return;
    }
    let doomed: HashSet<&str> = stage_ids.iter().map(String::as_str).collect();
    cache.retain(|_, result| !doomed.contains(result.stage_id.as_str()));
}

/// Drops results for a stage and everything after it in its own fork.
fn invalidate_stage_and_downstream(state: &mut PipelineState, stage_id: &str) {
    let suffix = state
        .stages
        .get(stage_id)
        .and_then(|stage| state.forks.get(&stage.fork_id))
        .and_then(|fork| fork.index_of(stage_id).map(|i| fork.stage_ids[i..].to_vec()));

    match suffix {
        Some(ids) => invalidate_ids(&mut state.cache, &ids),
        None => invalidate_ids(&mut state.cache, &[stage_id.to_string()]),
    }
}

/// Restores a snapshot and drops results whose upstream chain changed.
fn restore_from(state: &mut PipelineState, snapshot: &PipelineSnapshot) {
    let stale = divergent_stage_ids(state, snapshot);
    invalidate_ids(&mut state.cache, &stale);
    restore_snapshot(state, snapshot.clone());
}

/// Per fork, collects the suffix starting at the first position whose stage
/// id, parent or config differs between `state` and `snapshot`.
fn divergent_stage_ids(state: &PipelineState, snapshot: &PipelineSnapshot) -> Vec<StageId> {
    let fork_ids: HashSet<&ForkId> = state.forks.keys().chain(snapshot.forks.keys()).collect();
    let mut stale = Vec::new();

    for fork_id in fork_ids {
        let current = state.forks.get(fork_id).map_or(&[][..], |f| &f.stage_ids[..]);
        let restored = snapshot.forks.get(fork_id).map_or(&[][..], |f| &f.stage_ids[..]);

        let same = |a: &StageId, b: &StageId| {
            a == b
                && match (state.stages.get(a), snapshot.stages.get(b)) {
                    (Some(x), Some(y)) => x.config == y.config && x.parent_id == y.parent_id,
                    _ => false,
                }
        };
        let first_diff = current
            .iter()
            .zip(restored)
            .position(|(a, b)| !same(a, b))
            .unwrap_or_else(|| current.len().min(restored.len()));

        stale.extend(current[first_diff..].iter().cloned());
        stale.extend(restored[first_diff..].iter().cloned());
    }

    stale
}
