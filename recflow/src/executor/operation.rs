//! Contracts between the executor and the stream operations it drives.
//!
//! Operations are created per run by an [`OperationFactory`] and push
//! their output into a [`RecordReceiver`]. The executor never inspects an
//! operation beyond its declared [`InputShape`].

use std::sync::Arc;

use parking_lot::Mutex;

use crate::record::Record;

/// Operations that produce records without any input source.
pub const SELF_CONTAINED_OPERATIONS: &[&str] = &["fromps", "fromdb", "frommongo"];

/// Returns true for operations that need no input at all.
#[must_use]
pub fn is_self_contained(operation_name: &str) -> bool {
    SELF_CONTAINED_OPERATIONS.contains(&operation_name)
}

/// Returns true for operations that read an external source instead of
/// upstream records.
#[must_use]
pub fn is_input_operation(operation_name: &str) -> bool {
    operation_name.starts_with("from") || is_self_contained(operation_name)
}

/// How an operation wants to be fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputShape {
    /// Generates its output in `finish` alone.
    SelfContained,
    /// Receives the whole input text through `parse_content`.
    BulkContent,
    /// Receives the input one trimmed, non-empty line at a time.
    Lines,
    /// Receives records through `accept_record`.
    #[default]
    Records,
}

/// Downstream sink an operation writes to.
pub trait RecordReceiver: Send {
    /// Accepts one record. Returning false asks the sender to stop.
    fn accept_record(&mut self, record: &Record) -> bool;

    /// Accepts one line of text output.
    fn accept_line(&mut self, line: &str) -> bool;

    /// Signals the end of the stream.
    fn finish(&mut self) {}
}

/// Shared handle through which an operation reaches its receiver.
pub type ReceiverHandle = Arc<Mutex<dyn RecordReceiver>>;

/// A single stream operation instance.
///
/// Any `Err` aborts the run at the stage that owns the operation.
pub trait Operation: Send {
    /// Declares how the executor should feed this operation.
    fn input_shape(&self) -> InputShape {
        InputShape::Records
    }

    /// Consumes one upstream record. `Ok(false)` stops feeding.
    fn accept_record(&mut self, record: &Record) -> anyhow::Result<bool>;

    /// Consumes one input line. `Ok(false)` stops feeding.
    fn accept_line(&mut self, _line: &str) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Consumes the whole input text at once.
    fn parse_content(&mut self, _content: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Flushes buffered output to the receiver.
    fn finish(&mut self) -> anyhow::Result<()>;
}

/// Builds operations by name.
pub trait OperationFactory: Send + Sync {
    /// Creates an operation wired to `receiver`.
    fn create(
        &self,
        operation_name: &str,
        args: &[String],
        receiver: ReceiverHandle,
    ) -> anyhow::Result<Box<dyn Operation>>;
}
