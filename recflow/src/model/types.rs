//! Pipeline data model.
//!
//! Stages and forks live in id-indexed maps; links between them are ids,
//! never references, so a whole state can be cloned or snapshotted freely.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::errors::RecflowError;
use crate::record::Record;

/// Stage identifier.
pub type StageId = String;
/// Fork identifier.
pub type ForkId = String;
/// Input source identifier.
pub type InputId = String;
/// Content-hash cache key produced by [`crate::cache::compute_cache_key`].
pub type CacheKey = String;

/// Results keyed by composite `inputId:stageId`.
pub type CacheMap = HashMap<String, Arc<CachedResult>>;

/// Default in-memory cache budget: 512 MB.
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 512 * 1024 * 1024;

/// Name of the root fork created with every session.
pub const MAIN_FORK_NAME: &str = "main";

/// Operation name, arguments and enabled flag of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Operation name understood by the operation factory.
    pub operation_name: String,
    /// Raw operation arguments.
    pub args: Vec<String>,
    /// Disabled stages pass records through untouched.
    pub enabled: bool,
}

impl StageConfig {
    /// Creates an enabled stage config.
    pub fn new<I, S>(operation_name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            operation_name: operation_name.into(),
            args: args.into_iter().map(Into::into).collect(),
            enabled: true,
        }
    }

    /// Marks the config as disabled.
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// One pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage id.
    pub id: StageId,
    /// Operation configuration.
    pub config: StageConfig,
    /// Single predecessor, if any.
    pub parent_id: Option<StageId>,
    /// Successors; more than one only exists transiently during edits.
    pub child_ids: Vec<StageId>,
    /// Owning fork.
    pub fork_id: ForkId,
    /// Index within the owning fork's path.
    pub position: usize,
}

/// An independently addressable stage chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fork {
    /// Fork id.
    pub id: ForkId,
    /// Display name.
    pub name: String,
    /// Stage the fork was created at. Metadata only.
    pub fork_point_stage_id: Option<StageId>,
    /// `None` only for the root fork.
    pub parent_fork_id: Option<ForkId>,
    /// Ordered path owned by this fork.
    pub stage_ids: Vec<StageId>,
    /// Creation time, Unix milliseconds.
    pub created_at: i64,
}

impl Fork {
    /// Returns true for the root fork, which can never be deleted.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_fork_id.is_none()
    }

    /// Position of a stage within this fork.
    #[must_use]
    pub fn index_of(&self, stage_id: &str) -> Option<usize> {
        self.stage_ids.iter().position(|id| id == stage_id)
    }
}

/// Where an input's records come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputSourceKind {
    /// A JSONL (or raw text) file on disk.
    File {
        /// Path to the file.
        path: PathBuf,
    },
    /// Records materialized up front, e.g. from piped stdin.
    Captured {
        /// The captured records.
        records: Vec<Record>,
    },
}

/// A named record source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSource {
    /// Input id.
    pub id: InputId,
    /// Display label.
    pub label: String,
    /// Record origin.
    pub source: InputSourceKind,
    /// Insertion order among the session's inputs.
    #[serde(default)]
    pub sequence: u64,
}

/// Memoized output of one stage for one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    /// Composite `inputId:stageId` key.
    pub key: String,
    /// Stage that produced the result.
    pub stage_id: StageId,
    /// Input the stage ran against.
    pub input_id: InputId,
    /// Output records; empty when spilled or for text-emitting stages.
    pub records: Vec<Record>,
    /// Output lines of text-emitting stages.
    pub lines: Vec<String>,
    /// JSONL file holding the records when spilled to disk.
    pub spill_file: Option<PathBuf>,
    /// Number of records emitted.
    pub record_count: usize,
    /// Union of field names seen, in first-seen order.
    pub field_names: Vec<String>,
    /// Unix milliseconds.
    pub computed_at: i64,
    /// Estimated in-memory size.
    pub size_bytes: u64,
    /// Wall time spent producing the result.
    pub compute_time_ms: f64,
}

impl CachedResult {
    /// Returns true if the records live in a spill file.
    #[must_use]
    pub const fn is_spilled(&self) -> bool {
        self.spill_file.is_some()
    }

    /// Bytes this result counts against the memory budget.
    #[must_use]
    pub const fn in_memory_size(&self) -> u64 {
        if self.is_spilled() {
            0
        } else {
            self.size_bytes
        }
    }

    /// Returns true for stages that emitted lines but no records.
    #[must_use]
    pub fn is_text_output(&self) -> bool {
        self.records.is_empty() && !self.lines.is_empty()
    }
}

/// Which stages the cache admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Cache every stage.
    #[default]
    All,
    /// Cache pinned stages only.
    Selective,
    /// Cache nothing.
    None,
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Selective => write!(f, "selective"),
            Self::None => write!(f, "none"),
        }
    }
}

impl FromStr for CachePolicy {
    type Err = RecflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "selective" => Ok(Self::Selective),
            "none" => Ok(Self::None),
            other => Err(RecflowError::Config(format!("unknown cache policy: {other}"))),
        }
    }
}

/// Cache sizing and admission settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// In-memory budget; 0 means [`DEFAULT_MAX_MEMORY_BYTES`].
    pub max_memory_bytes: u64,
    /// Admission policy.
    pub cache_policy: CachePolicy,
    /// Consulted only under [`CachePolicy::Selective`].
    #[serde(default)]
    pub pinned_stage_ids: HashSet<StageId>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            cache_policy: CachePolicy::All,
            pinned_stage_ids: HashSet::new(),
        }
    }
}

/// Inspector rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// Tabular view.
    #[default]
    Table,
    /// Pretty-printed records.
    #[serde(rename = "prettyprint")]
    PrettyPrint,
    /// Raw JSON lines.
    Json,
    /// Field schema.
    Schema,
}

/// Which panel has keyboard focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusedPanel {
    /// The stage list.
    #[default]
    Pipeline,
    /// The output inspector.
    Inspector,
}

/// Inspector view state. Never captured in undo snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InspectorState {
    /// Rendering mode.
    pub view_mode: ViewMode,
    /// First visible row.
    pub scroll_offset: usize,
    /// Active search, if any.
    pub search_query: Option<String>,
    /// Highlighted column index.
    pub highlighted_column: Option<usize>,
}

/// The most recent execution failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    /// Stage that failed.
    pub stage_id: StageId,
    /// Failure message.
    pub message: String,
}

/// The structural part of a state captured for undo/redo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    /// All stages.
    pub stages: HashMap<StageId, Stage>,
    /// All forks.
    pub forks: HashMap<ForkId, Fork>,
    /// All inputs.
    pub inputs: HashMap<InputId, InputSource>,
    /// Active input.
    pub active_input_id: InputId,
    /// Active fork.
    pub active_fork_id: ForkId,
    /// Cursor position.
    pub cursor_stage_id: Option<StageId>,
}

/// One entry on the undo or redo stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoEntry {
    /// Human readable description of the action.
    pub label: String,
    /// State to restore.
    pub snapshot: PipelineSnapshot,
    /// Unix milliseconds.
    pub timestamp: i64,
}

/// Aggregate root of a session. Replaced wholesale by the reducer.
#[derive(Debug, Clone)]
pub struct PipelineState {
    /// All stages across all forks.
    pub stages: HashMap<StageId, Stage>,
    /// All forks.
    pub forks: HashMap<ForkId, Fork>,
    /// All inputs.
    pub inputs: HashMap<InputId, InputSource>,
    /// Active input.
    pub active_input_id: InputId,
    /// Active fork.
    pub active_fork_id: ForkId,
    /// Cursor position in the active fork.
    pub cursor_stage_id: Option<StageId>,
    /// Focused panel.
    pub focused_panel: FocusedPanel,
    /// Computed results by composite key.
    pub cache: CacheMap,
    /// Cache admission settings.
    pub cache_config: CacheConfig,
    /// Inspector state.
    pub inspector: InspectorState,
    /// Whether an execution is in flight.
    pub executing: bool,
    /// Last execution failure.
    pub last_error: Option<LastError>,
    /// Undo history, oldest first.
    pub undo_stack: Vec<Arc<UndoEntry>>,
    /// Redo history, most recently undone last.
    pub redo_stack: Vec<Arc<UndoEntry>>,
    /// Session id.
    pub session_id: String,
    /// Directory owned by the session (spill files, saved state).
    pub session_dir: PathBuf,
    /// Optional user-facing session name.
    pub session_name: Option<String>,
}

impl PipelineState {
    /// The active fork.
    #[must_use]
    pub fn active_fork(&self) -> Option<&Fork> {
        self.forks.get(&self.active_fork_id)
    }

    /// The active input source.
    #[must_use]
    pub fn active_input(&self) -> Option<&InputSource> {
        self.inputs.get(&self.active_input_id)
    }

    /// Label of the entry a subsequent undo would revert.
    #[must_use]
    pub fn undo_label(&self) -> Option<&str> {
        self.undo_stack.last().map(|e| e.label.as_str())
    }

    /// Label of the entry a subsequent redo would restore.
    #[must_use]
    pub fn redo_label(&self) -> Option<&str> {
        self.redo_stack.last().map(|e| e.label.as_str())
    }
}

/// Broad classification of a stage's operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Produces records from an external source.
    Input,
    /// Drops records.
    Filter,
    /// Changes record order.
    Reorder,
    /// Groups or summarizes records.
    Aggregate,
    /// Anything else.
    Transform,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Filter => write!(f, "filter"),
            Self::Reorder => write!(f, "reorder"),
            Self::Aggregate => write!(f, "aggregate"),
            Self::Transform => write!(f, "transform"),
        }
    }
}

/// How a stage's output size compares with its parent's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaChange {
    /// More output than input.
    Grew,
    /// Less output than input.
    Shrank,
    /// Same count.
    Unchanged,
    /// No parent result to compare with.
    Unknown,
}

/// A stage's output compared with its parent's cached output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDelta {
    /// Stage classification.
    pub kind: StageKind,
    /// Parent's record count, if the parent is cached.
    pub parent_count: Option<usize>,
    /// Record count, or line count for text output.
    pub output_count: usize,
    /// Fields present here but not in the parent.
    pub fields_added: usize,
    /// Fields present in the parent but not here.
    pub fields_removed: usize,
    /// The stage emitted lines rather than records.
    pub is_text_output: bool,
}

impl StageDelta {
    /// Classifies the count change relative to the parent.
    #[must_use]
    pub fn change(&self) -> DeltaChange {
        match self.parent_count {
            None => DeltaChange::Unknown,
            Some(parent) if self.output_count > parent => DeltaChange::Grew,
            Some(parent) if self.output_count < parent => DeltaChange::Shrank,
            Some(_) => DeltaChange::Unchanged,
        }
    }
}
