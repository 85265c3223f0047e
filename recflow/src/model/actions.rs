//! Actions accepted by the reducer.

use std::sync::Arc;

use super::types::{
    CachePolicy, CachedResult, ForkId, InputId, InputSourceKind, StageConfig, StageId, ViewMode,
};

/// Vertical movement through a fork's path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards position 0.
    Up,
    /// Towards the end of the fork.
    Down,
}

/// Horizontal movement across inspector columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDirection {
    /// Previous column.
    Left,
    /// Next column.
    Right,
}

/// A state transition request.
///
/// The first ten variants are structural and undoable; see
/// [`super::undo::is_undoable`].
#[derive(Debug, Clone)]
pub enum PipelineAction {
    /// Add a stage after `after_stage_id`, or at the end of the active fork.
    AddStage {
        /// Anchor stage; `None` appends.
        after_stage_id: Option<StageId>,
        /// New stage configuration.
        config: StageConfig,
    },
    /// Delete a stage and re-link its neighbours.
    DeleteStage {
        /// Stage to delete.
        stage_id: StageId,
    },
    /// Replace a stage's arguments.
    UpdateStageArgs {
        /// Stage to update.
        stage_id: StageId,
        /// New arguments.
        args: Vec<String>,
    },
    /// Flip a stage's enabled flag.
    ToggleStage {
        /// Stage to toggle.
        stage_id: StageId,
    },
    /// Insert a stage directly before another.
    InsertStageBefore {
        /// Anchor stage.
        before_stage_id: StageId,
        /// New stage configuration.
        config: StageConfig,
    },
    /// Create an empty fork and switch to it.
    CreateFork {
        /// Fork name.
        name: String,
        /// Stage the fork is created at.
        at_stage_id: Option<StageId>,
    },
    /// Delete a non-root fork with all its stages.
    DeleteFork {
        /// Fork to delete.
        fork_id: ForkId,
    },
    /// Register an input and make it active.
    AddInput {
        /// Record origin.
        source: InputSourceKind,
        /// Display label.
        label: String,
    },
    /// Remove an input, keeping at least one.
    RemoveInput {
        /// Input to remove.
        input_id: InputId,
    },
    /// Swap a stage with its neighbour.
    ReorderStage {
        /// Stage to move.
        stage_id: StageId,
        /// Movement direction.
        direction: Direction,
    },

    /// Revert the last undoable action.
    Undo,
    /// Re-apply the last undone action.
    Redo,

    /// Move the cursor within the active fork.
    MoveCursor {
        /// Movement direction.
        direction: Direction,
    },
    /// Place the cursor on a stage.
    SetCursor {
        /// Target stage.
        stage_id: StageId,
    },
    /// Make another input active.
    SwitchInput {
        /// Target input.
        input_id: InputId,
    },
    /// Make another fork active.
    SwitchFork {
        /// Target fork.
        fork_id: ForkId,
    },
    /// Store a computed result in the state cache.
    CacheResult {
        /// Input the result belongs to.
        input_id: InputId,
        /// Stage the result belongs to.
        stage_id: StageId,
        /// The result.
        result: Arc<CachedResult>,
    },
    /// Drop a stage's results for every input.
    InvalidateStage {
        /// Stage to invalidate.
        stage_id: StageId,
    },
    /// Toggle whether a stage is pinned for selective caching.
    PinStage {
        /// Stage to pin or unpin.
        stage_id: StageId,
    },
    /// Change the cache admission policy.
    SetCachePolicy {
        /// New policy.
        policy: CachePolicy,
    },
    /// Record an execution failure.
    SetError {
        /// Failing stage.
        stage_id: StageId,
        /// Failure message.
        message: String,
    },
    /// Clear the recorded failure.
    ClearError,
    /// Mark execution as running or idle.
    SetExecuting {
        /// New flag value.
        executing: bool,
    },
    /// Switch focus between pipeline and inspector.
    ToggleFocus,
    /// Change the inspector view mode.
    SetViewMode {
        /// New mode.
        view_mode: ViewMode,
    },
    /// Move the highlighted inspector column.
    MoveColumnHighlight {
        /// Movement direction.
        direction: ColumnDirection,
        /// Number of columns currently displayed.
        field_count: usize,
    },
    /// Remove the column highlight.
    ClearColumnHighlight,
    /// Name the session.
    SetSessionName {
        /// New name.
        name: String,
    },
}
