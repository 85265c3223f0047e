//! # Recflow
//!
//! State, cache and execution core for an interactive record-stream
//! pipeline builder.
//!
//! A session is an immutable [`model::PipelineState`] value. Recflow
//! provides:
//!
//! - **Reducer**: pure state transitions with snapshot-based undo/redo
//! - **Result cache**: a memory-bounded LRU store that spills large results to disk
//! - **Incremental execution**: only the stages below the deepest cached result re-run
//! - **Selectors and export**: derived views and shell command rendering
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use recflow::prelude::*;
//!
//! let state = Arc::new(create_initial_state());
//! let state = reduce(&state, PipelineAction::AddStage {
//!     after_stage_id: None,
//!     config: StageConfig::new("grep", ["{{x}} > 1"]),
//! });
//!
//! let executor = Executor::new(factory, Arc::new(FsRecordLoader::new()));
//! let mut state = PipelineState::clone(&state);
//! let result = executor.execute_to_stage(&mut state, &stage_id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod config;
pub mod errors;
pub mod executor;
pub mod model;
pub mod observability;
pub mod record;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::cache::{compute_cache_key, CacheManager, ResultCache};
    pub use crate::config::ExplorerConfig;
    pub use crate::errors::{RecflowError, Result};
    pub use crate::executor::{
        Executor, FsRecordLoader, InputShape, Operation, OperationFactory, ReceiverHandle,
        RecordLoader, RecordReceiver,
    };
    pub use crate::model::{
        create_initial_state, export_as_chain_command, export_as_pipe_script, reduce,
        CacheConfig, CachePolicy, CachedResult, PipelineAction, PipelineState, Stage,
        StageConfig, StageId,
    };
    pub use crate::observability::init_tracing;
    pub use crate::record::Record;
}
