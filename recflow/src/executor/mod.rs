//! Incremental pipeline execution.
//!
//! This module contains:
//! - The operation, receiver and factory contracts
//! - The intercepting receiver that captures stage output
//! - Input loading and input file inspection
//! - The [`Executor`] itself

mod loader;
mod operation;
mod receiver;
mod run;
#[cfg(test)]
mod run_tests;

pub use loader::{
    check_file_size, detect_input_operation, is_native_format, parse_jsonl, records_to_jsonl,
    FileSizeWarning, FsRecordLoader, RecordLoader, FILE_SIZE_DANGER_BYTES, FILE_SIZE_WARN_BYTES,
};
#[cfg(test)]
pub use loader::MockRecordLoader;
pub use operation::{
    is_input_operation, is_self_contained, InputShape, Operation, OperationFactory,
    ReceiverHandle, RecordReceiver, SELF_CONTAINED_OPERATIONS,
};
pub use receiver::InterceptReceiver;
pub use run::{estimate_size, get_stage_path, Executor};
