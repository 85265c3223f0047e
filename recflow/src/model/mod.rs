//! Pipeline state model.
//!
//! This module contains:
//! - The data types making up a session (stages, forks, inputs, cache entries)
//! - The actions accepted by the reducer and the reducer itself
//! - Snapshot-based undo/redo
//! - Read-only selectors and shell export

mod actions;
pub mod export;
mod reducer;
pub mod selectors;
mod types;
pub mod undo;

pub use actions::{ColumnDirection, Direction, PipelineAction};
pub use export::{export_as_chain_command, export_as_pipe_script, shell_escape};
pub use reducer::{create_initial_state, create_initial_state_with, reduce};
pub use selectors::{
    get_active_path, get_cursor_output, get_cursor_stage, get_downstream_stages,
    get_enabled_stages, get_stage_delta, get_stage_kind, get_stage_output, get_total_cache_size,
    is_downstream_of_error,
};
pub use types::{
    CacheConfig, CacheKey, CacheMap, CachePolicy, CachedResult, DeltaChange, FocusedPanel, Fork,
    ForkId, InputId, InputSource, InputSourceKind, InspectorState, LastError, PipelineSnapshot,
    PipelineState, Stage, StageConfig, StageDelta, StageId, StageKind, UndoEntry, ViewMode,
    DEFAULT_MAX_MEMORY_BYTES, MAIN_FORK_NAME,
};
