//! Mock operations, factory and loader for testing executions.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::errors::{RecflowError, Result};
use crate::executor::{
    parse_jsonl, records_to_jsonl, InputShape, Operation, OperationFactory, ReceiverHandle,
    RecordLoader,
};
use crate::model::{InputSource, InputSourceKind};
use crate::record::Record;

/// Factory for a small set of in-memory operations.
///
/// | name | shape | behaviour |
/// |---|---|---|
/// | `grep <field> <op> <number>` | records | keeps numeric matches; `{{field}}` accepted |
/// | `sort --key <field>[=n\|=-n]` | records | buffers, sorts on finish |
/// | `head -n <count>` | records | first `count` records, then stops |
/// | `fromps` | self-contained | three process records |
/// | `fromcsv --header [--delim d]` | bulk content | header-keyed records |
/// | `fromlines` | lines | `{"line": ...}` per line |
/// | `tocsv` | records | emits CSV lines, no records |
/// | `fail` | records | fails in `finish` |
///
/// Every successful creation is counted per operation name.
#[derive(Debug, Default)]
pub struct MockOperationFactory {
    creations: Mutex<HashMap<String, usize>>,
}

impl MockOperationFactory {
    /// Creates a factory with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations created so far.
    #[must_use]
    pub fn creation_count(&self) -> usize {
        self.creations.lock().values().sum()
    }

    /// Number of operations created for `operation_name`.
    #[must_use]
    pub fn creations_of(&self, operation_name: &str) -> usize {
        self.creations.lock().get(operation_name).copied().unwrap_or(0)
    }

    /// Resets the counters.
    pub fn reset(&self) {
        self.creations.lock().clear();
    }
}

impl OperationFactory for MockOperationFactory {
    fn create(
        &self,
        operation_name: &str,
        args: &[String],
        receiver: ReceiverHandle,
    ) -> anyhow::Result<Box<dyn Operation>> {
        let operation: Box<dyn Operation> = match operation_name {
            "grep" => Box::new(Grep::parse(args, receiver)?),
            "sort" => Box::new(Sort::parse(args, receiver)),
            "head" => Box::new(Head::parse(args, receiver)?),
            "fromps" => Box::new(FromPs { receiver }),
            "fromcsv" => Box::new(FromCsv::parse(args, receiver)),
            "fromlines" => Box::new(FromLines { receiver }),
            "tocsv" => Box::new(ToCsv {
                receiver,
                header: None,
            }),
            "fail" => Box::new(Fail),
            other => anyhow::bail!("Unknown operation: {other}"),
        };

        *self
            .creations
            .lock()
            .entry(operation_name.to_string())
            .or_default() += 1;
        Ok(operation)
    }
}

fn numeric(record: &Record, field: &str) -> Option<f64> {
    match record.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn emit(receiver: &ReceiverHandle, record: &Record) -> bool {
    receiver.lock().accept_record(record)
}

struct Grep {
    field: String,
    comparison: String,
    value: f64,
    receiver: ReceiverHandle,
}

impl Grep {
    fn parse(args: &[String], receiver: ReceiverHandle) -> anyhow::Result<Self> {
        let words: Vec<&str> = args.iter().flat_map(|a| a.split_whitespace()).collect();
        let &[field, comparison, value] = words.as_slice() else {
            anyhow::bail!("grep expects <field> <op> <number>, got {args:?}");
        };
        if !matches!(comparison, ">" | "<" | ">=" | "<=" | "==" | "!=") {
            anyhow::bail!("unsupported comparison: {comparison}");
        }
        Ok(Self {
            field: field.trim_start_matches("{{").trim_end_matches("}}").to_string(),
            comparison: comparison.to_string(),
            value: value.parse()?,
            receiver,
        })
    }

    fn matches(&self, record: &Record) -> bool {
        let Some(x) = numeric(record, &self.field) else {
            return false;
        };
        match self.comparison.as_str() {
            ">" => x > self.value,
            "<" => x < self.value,
            ">=" => x >= self.value,
            "<=" => x <= self.value,
            "==" => (x - self.value).abs() < f64::EPSILON,
            _ => (x - self.value).abs() >= f64::EPSILON,
        }
    }
}

impl Operation for Grep {
    fn accept_record(&mut self, record: &Record) -> anyhow::Result<bool> {
        if self.matches(record) {
            return Ok(emit(&self.receiver, record));
        }
        Ok(true)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.receiver.lock().finish();
        Ok(())
    }
}

struct Sort {
    field: String,
    descending: bool,
    buffer: Vec<Record>,
    receiver: ReceiverHandle,
}

impl Sort {
    fn parse(args: &[String], receiver: ReceiverHandle) -> Self {
        let spec = args
            .iter()
            .skip_while(|a| *a != "--key")
            .nth(1)
            .map_or("", String::as_str);
        let (field, kind) = spec.split_once('=').unwrap_or((spec, "n"));
        Self {
            field: field.to_string(),
            descending: kind.starts_with('-'),
            buffer: Vec::new(),
            receiver,
        }
    }
}

impl Operation for Sort {
    fn accept_record(&mut self, record: &Record) -> anyhow::Result<bool> {
        self.buffer.push(record.clone());
        Ok(true)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        let field = self.field.as_str();
        self.buffer.sort_by(|a, b| {
            let a = numeric(a, field).unwrap_or(f64::NEG_INFINITY);
            let b = numeric(b, field).unwrap_or(f64::NEG_INFINITY);
            a.total_cmp(&b)
        });
        if self.descending {
            self.buffer.reverse();
        }
        for record in &self.buffer {
            if !emit(&self.receiver, record) {
                break;
            }
        }
        self.receiver.lock().finish();
        Ok(())
    }
}

struct Head {
    limit: usize,
    seen: usize,
    receiver: ReceiverHandle,
}

impl Head {
    fn parse(args: &[String], receiver: ReceiverHandle) -> anyhow::Result<Self> {
        let limit = match args {
            [flag, n] if flag == "-n" => n.parse()?,
            [] => 10,
            _ => anyhow::bail!("head expects -n <count>"),
        };
        Ok(Self {
            limit,
            seen: 0,
            receiver,
        })
    }
}

impl Operation for Head {
    fn accept_record(&mut self, record: &Record) -> anyhow::Result<bool> {
        if self.seen >= self.limit {
            return Ok(false);
        }
        self.seen += 1;
        emit(&self.receiver, record);
        Ok(self.seen < self.limit)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.receiver.lock().finish();
        Ok(())
    }
}

struct FromPs {
    receiver: ReceiverHandle,
}

impl Operation for FromPs {
    fn input_shape(&self) -> InputShape {
        InputShape::SelfContained
    }

    fn accept_record(&mut self, _record: &Record) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        for (pid, command) in [(1, "init"), (42, "sshd"), (314, "bash")] {
            emit(
                &self.receiver,
                &Record::new().with("pid", pid).with("command", command),
            );
        }
        self.receiver.lock().finish();
        Ok(())
    }
}

struct FromCsv {
    delimiter: String,
    receiver: ReceiverHandle,
}

impl FromCsv {
    fn parse(args: &[String], receiver: ReceiverHandle) -> Self {
        let delimiter = args
            .iter()
            .skip_while(|a| *a != "--delim")
            .nth(1)
            .cloned()
            .unwrap_or_else(|| ",".to_string());
        Self {
            delimiter,
            receiver,
        }
    }
}

impl Operation for FromCsv {
    fn input_shape(&self) -> InputShape {
        InputShape::BulkContent
    }

    fn accept_record(&mut self, _record: &Record) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn parse_content(&mut self, content: &str) -> anyhow::Result<()> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let Some(header) = lines.next() else {
            return Ok(());
        };
        let columns: Vec<&str> = header.split(self.delimiter.as_str()).collect();
        for line in lines {
            let mut record = Record::new();
            for (column, value) in columns.iter().zip(line.split(self.delimiter.as_str())) {
                record.set(column.trim(), value.trim());
            }
            if !emit(&self.receiver, &record) {
                break;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.receiver.lock().finish();
        Ok(())
    }
}

struct FromLines {
    receiver: ReceiverHandle,
}

impl Operation for FromLines {
    fn input_shape(&self) -> InputShape {
        InputShape::Lines
    }

    fn accept_record(&mut self, _record: &Record) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn accept_line(&mut self, line: &str) -> anyhow::Result<bool> {
        Ok(emit(&self.receiver, &Record::new().with("line", line)))
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.receiver.lock().finish();
        Ok(())
    }
}

struct ToCsv {
    receiver: ReceiverHandle,
    header: Option<Vec<String>>,
}

impl Operation for ToCsv {
    fn accept_record(&mut self, record: &Record) -> anyhow::Result<bool> {
        let mut receiver = self.receiver.lock();
        let header = match &mut self.header {
            Some(header) => header,
            empty => {
                let header: Vec<String> = record.keys().map(str::to_string).collect();
                receiver.accept_line(&header.join(","));
                empty.insert(header)
            }
        };
        let row: Vec<String> = header
            .iter()
            .map(|field| match record.get(field) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            })
            .collect();
        Ok(receiver.accept_line(&row.join(",")))
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.receiver.lock().finish();
        Ok(())
    }
}

struct Fail;

impl Operation for Fail {
    fn accept_record(&mut self, _record: &Record) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        anyhow::bail!("forced failure")
    }
}

/// Loader serving file inputs from an in-memory map of path to content.
///
/// Captured inputs are served from their records. Load calls are counted.
#[derive(Debug, Default)]
pub struct StaticLoader {
    files: HashMap<PathBuf, String>,
    loads: Mutex<usize>,
}

impl StaticLoader {
    /// Creates a loader with no files.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a file's content.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    /// Registers a file holding `records` as JSONL.
    #[must_use]
    pub fn with_records(self, path: impl Into<PathBuf>, records: &[Record]) -> Self {
        self.with_file(path, records_to_jsonl(records))
    }

    /// Number of load calls served.
    #[must_use]
    pub fn load_count(&self) -> usize {
        *self.loads.lock()
    }

    fn content_of(&self, input: &InputSource) -> Result<String> {
        *self.loads.lock() += 1;
        match &input.source {
            InputSourceKind::File { path } => self.files.get(path).cloned().ok_or_else(|| {
                RecflowError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no such file: {}", path.display()),
                ))
            }),
            InputSourceKind::Captured { records } => Ok(records_to_jsonl(records)),
        }
    }
}

#[async_trait]
impl RecordLoader for StaticLoader {
    async fn load_records(&self, input: &InputSource) -> Result<Vec<Record>> {
        parse_jsonl(&self.content_of(input)?)
    }

    async fn load_content(&self, input: &InputSource) -> Result<String> {
        self.content_of(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InterceptReceiver;
    use std::sync::Arc;

    fn run(op: &str, args: &[&str], records: &[Record]) -> Vec<Record> {
        let factory = MockOperationFactory::new();
        let receiver = Arc::new(Mutex::new(InterceptReceiver::new()));
        let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
        let mut operation = factory.create(op, &args, receiver.clone()).unwrap();
        for record in records {
            if !operation.accept_record(record).unwrap() {
                break;
            }
        }
        operation.finish().unwrap();
        let records = receiver.lock().records().to_vec();
        records
    }

    fn xs(values: &[i64]) -> Vec<Record> {
        values.iter().map(|x| Record::new().with("x", *x)).collect()
    }

    #[test]
    fn test_grep_and_sort() {
        let kept = run("grep", &["x > 2"], &xs(&[5, 1, 3]));
        assert_eq!(kept, xs(&[5, 3]));

        let sorted = run("sort", &["--key", "x=n"], &xs(&[5, 1, 3]));
        assert_eq!(sorted, xs(&[1, 3, 5]));

        let reversed = run("sort", &["--key", "x=-n"], &xs(&[5, 1, 3]));
        assert_eq!(reversed, xs(&[5, 3, 1]));
    }

    #[test]
    fn test_head_stops_early() {
        assert_eq!(run("head", &["-n", "2"], &xs(&[1, 2, 3, 4])), xs(&[1, 2]));
    }

    #[test]
    fn test_unknown_and_invalid_operations() {
        let factory = MockOperationFactory::new();
        let receiver: ReceiverHandle = Arc::new(Mutex::new(InterceptReceiver::new()));
        assert!(factory.create("nope", &[], receiver.clone()).is_err());
        assert!(factory
            .create("grep", &["x ~ 1".to_string()], receiver)
            .is_err());
        assert_eq!(factory.creation_count(), 0);
    }

    #[test]
    fn test_creation_counters() {
        let factory = MockOperationFactory::new();
        for _ in 0..2 {
            let receiver: ReceiverHandle = Arc::new(Mutex::new(InterceptReceiver::new()));
            factory.create("fromps", &[], receiver).unwrap();
        }
        assert_eq!(factory.creations_of("fromps"), 2);
        assert_eq!(factory.creation_count(), 2);
        factory.reset();
        assert_eq!(factory.creation_count(), 0);
    }
}
