//! Receiver that captures a stage's output for caching and inspection.

use std::collections::HashSet;

use super::operation::RecordReceiver;
use crate::record::Record;

/// Collects everything an operation emits.
#[derive(Debug, Default)]
pub struct InterceptReceiver {
    records: Vec<Record>,
    lines: Vec<String>,
    field_names: Vec<String>,
    seen_fields: HashSet<String>,
    finished: bool,
}

impl InterceptReceiver {
    /// Creates an empty receiver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records received so far.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Lines received so far.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Union of field names, in the order first seen.
    #[must_use]
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    /// Number of records received.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Whether `finish` was called.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Takes the captured records, lines and field names.
    pub fn take(&mut self) -> (Vec<Record>, Vec<String>, Vec<String>) {
        self.seen_fields.clear();
        (
            std::mem::take(&mut self.records),
            std::mem::take(&mut self.lines),
            std::mem::take(&mut self.field_names),
        )
    }
}

impl RecordReceiver for InterceptReceiver {
    fn accept_record(&mut self, record: &Record) -> bool {
        for key in record.keys() {
            if !self.seen_fields.contains(key) {
                self.seen_fields.insert(key.to_string());
                self.field_names.push(key.to_string());
            }
        }
        self.records.push(record.clone());
        true
    }

    fn accept_line(&mut self, line: &str) -> bool {
        self.lines.push(line.to_string());
        true
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_fields_in_first_seen_order() {
        let mut receiver = InterceptReceiver::new();
        assert!(receiver.accept_record(&Record::new().with("b", 1).with("a", 2)));
        assert!(receiver.accept_record(&Record::new().with("c", 3).with("a", 4)));

        assert_eq!(receiver.record_count(), 2);
        assert_eq!(receiver.field_names(), ["b", "a", "c"]);
    }

    #[test]
    fn test_records_are_copies() {
        let mut receiver = InterceptReceiver::new();
        let mut record = Record::new().with("x", 1);
        receiver.accept_record(&record);
        record.set("x", 2);

        assert_eq!(receiver.records()[0].get("x"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_lines_and_take() {
        let mut receiver = InterceptReceiver::new();
        receiver.accept_line("a,b");
        receiver.accept_line("1,2");
        receiver.finish();
        assert!(receiver.is_finished());

        let (records, lines, fields) = receiver.take();
        assert!(records.is_empty());
        assert_eq!(lines, vec!["a,b", "1,2"]);
        assert!(fields.is_empty());
        assert!(receiver.lines().is_empty());
    }
}
