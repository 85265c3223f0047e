//! JSONL spill files for large cached results.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::key::sanitize_key;
use crate::errors::SpillError;
use crate::record::Record;

/// Path of the spill file for a composite key.
#[must_use]
pub fn spill_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.jsonl", sanitize_key(key)))
}

/// Writes `records` as one JSON object per line, creating `dir` if needed.
pub fn write_spill(dir: &Path, key: &str, records: &[Record]) -> Result<PathBuf, SpillError> {
    let path = spill_path(dir, key);
    let write_err = |source| SpillError::Write {
        path: path.clone(),
        source,
    };

    fs::create_dir_all(dir).map_err(write_err)?;
    let file = fs::File::create(&path).map_err(write_err)?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record).map_err(|source| SpillError::Corrupt {
            path: path.clone(),
            source,
        })?;
        writer.write_all(b"\n").map_err(write_err)?;
    }
    writer.flush().map_err(write_err)?;

    debug!(path = %path.display(), records = records.len(), "Spilled cached result");
    Ok(path)
}

/// Reads a spill file back, skipping blank lines.
pub fn read_spill(path: &Path) -> Result<Vec<Record>, SpillError> {
    let content = fs::read_to_string(path).map_err(|source| SpillError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    content
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            Record::from_json(line).map_err(|source| SpillError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
        })
        .collect()
}

/// Deletes a spill file, ignoring a missing file or any other failure.
pub fn remove_spill(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %err, "Failed to remove spill file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spill_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            Record::new().with("a", 1).with("b", "x"),
            Record::new().with("nested", json!({"k": [1, 2]})),
        ];

        let path = write_spill(dir.path(), "in:st/1", &records).unwrap();
        assert_eq!(path, dir.path().join("in_st_1.jsonl"));
        assert_eq!(read_spill(&path).unwrap(), records);

        remove_spill(&path);
        assert!(!path.exists());
        remove_spill(&path);
    }

    #[test]
    fn test_read_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.jsonl");
        assert!(matches!(read_spill(&missing), Err(SpillError::Read { .. })));

        let corrupt = dir.path().join("bad.jsonl");
        fs::write(&corrupt, "{\"a\":1}\nnot json\n").unwrap();
        assert!(matches!(read_spill(&corrupt), Err(SpillError::Corrupt { .. })));
    }
}
