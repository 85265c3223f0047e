//! State fixtures for reducer, selector and executor tests.

use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::composite_key;
use crate::model::{
    create_initial_state, reduce, CachedResult, InputSourceKind, PipelineAction, PipelineState,
    StageConfig, StageId,
};
use crate::record::Record;

/// Builds a pipeline state through the reducer, one action at a time.
#[derive(Debug, Clone)]
pub struct PipelineFixture {
    state: Arc<PipelineState>,
}

impl PipelineFixture {
    /// Starts from a fresh initial state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(create_initial_state()),
        }
    }

    /// Appends a stage to the active fork.
    #[must_use]
    pub fn with_stage(self, operation_name: &str, args: &[&str]) -> Self {
        self.dispatch(PipelineAction::AddStage {
            after_stage_id: None,
            config: StageConfig::new(operation_name, args.iter().copied()),
        })
    }

    /// Appends a disabled stage to the active fork.
    #[must_use]
    pub fn with_disabled_stage(self, operation_name: &str, args: &[&str]) -> Self {
        self.dispatch(PipelineAction::AddStage {
            after_stage_id: None,
            config: StageConfig::new(operation_name, args.iter().copied()).disabled(),
        })
    }

    /// Adds a file input and makes it active.
    #[must_use]
    pub fn with_file_input(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let label = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        self.dispatch(PipelineAction::AddInput {
            source: InputSourceKind::File { path },
            label,
        })
    }

    /// Adds a captured input and makes it active.
    #[must_use]
    pub fn with_captured_input(self, records: Vec<Record>) -> Self {
        self.dispatch(PipelineAction::AddInput {
            source: InputSourceKind::Captured { records },
            label: "stdin".to_string(),
        })
    }

    /// Applies an arbitrary action.
    #[must_use]
    pub fn dispatch(self, action: PipelineAction) -> Self {
        Self {
            state: reduce(&self.state, action),
        }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// The current state as a shared handle.
    #[must_use]
    pub const fn arc(&self) -> &Arc<PipelineState> {
        &self.state
    }

    /// An owned copy of the current state.
    #[must_use]
    pub fn into_state(self) -> PipelineState {
        Arc::unwrap_or_clone(self.state)
    }

    /// Stage ids of the active fork, in order.
    #[must_use]
    pub fn stage_ids(&self) -> Vec<StageId> {
        self.state
            .active_fork()
            .map(|fork| fork.stage_ids.clone())
            .unwrap_or_default()
    }
}

impl Default for PipelineFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Records `{"x": v}` for each value.
#[must_use]
pub fn x_records(values: &[i64]) -> Vec<Record> {
    values.iter().map(|x| Record::new().with("x", *x)).collect()
}

/// A cached result holding `count` small records and claiming `size_bytes`.
#[must_use]
pub fn cached_result(input_id: &str, stage_id: &str, count: usize, size_bytes: u64) -> CachedResult {
    let records: Vec<Record> = (0..count).map(|i| Record::new().with("n", i)).collect();
    CachedResult {
        key: composite_key(input_id, stage_id),
        stage_id: stage_id.to_string(),
        input_id: input_id.to_string(),
        record_count: records.len(),
        field_names: if count > 0 { vec!["n".to_string()] } else { Vec::new() },
        records,
        lines: Vec::new(),
        spill_file: None,
        computed_at: 0,
        size_bytes,
        compute_time_ms: 0.0,
    }
}
