//! JSON-lines progress log of succeeded scenarios.
//!
//! The first line is a header naming the experiment's shape; every later
//! line records one succeeded scenario. A run that continues from the log
//! checks the header against its own shape before skipping anything.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ExecutionError, NucleusResult};
use crate::ids::ScenarioId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum ProgressRecord {
    Header {
        scenario_count: usize,
        experiment_meta_data: Vec<String>,
    },
    Completed {
        scenario_id: ScenarioId,
        completed_at: DateTime<Utc>,
        meta_data: Vec<String>,
    },
}

fn log_error(path: &Path, message: impl ToString) -> ExecutionError {
    ExecutionError::ProgressLog {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

fn incompatible(path: &Path, reason: impl Into<String>) -> ExecutionError {
    ExecutionError::IncompatibleProgressLog {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Reads the succeeded scenarios from an existing log.
///
/// A missing or empty file means nothing has succeeded yet.
///
/// # Errors
///
/// `ProgressLog` for unreadable or malformed lines, `IncompatibleProgressLog`
/// if the log was written by an experiment of a different shape.
pub(crate) fn read_completed(
    path: &Path,
    scenario_count: usize,
    experiment_meta_data: &[String],
) -> NucleusResult<BTreeSet<ScenarioId>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(log_error(path, e).into()),
    };

    let mut completed = BTreeSet::new();
    let mut header_seen = false;
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| log_error(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ProgressRecord = serde_json::from_str(&line)
            .map_err(|e| log_error(path, format!("line {}: {e}", line_no + 1)))?;
        match record {
            ProgressRecord::Header {
                scenario_count: logged_count,
                experiment_meta_data: logged_meta,
            } => {
                if header_seen {
                    return Err(log_error(path, format!("line {}: second header", line_no + 1)).into());
                }
                if logged_count != scenario_count {
                    return Err(incompatible(
                        path,
                        format!("logged {logged_count} scenarios, experiment has {scenario_count}"),
                    )
                    .into());
                }
                if logged_meta != experiment_meta_data {
                    return Err(incompatible(
                        path,
                        format!("logged meta data {logged_meta:?}, experiment has {experiment_meta_data:?}"),
                    )
                    .into());
                }
                header_seen = true;
            }
            ProgressRecord::Completed { scenario_id, .. } => {
                if !header_seen {
                    return Err(incompatible(path, "scenario record before the header").into());
                }
                if scenario_id.index() >= scenario_count {
                    return Err(incompatible(path, format!("scenario {scenario_id} is out of range")).into());
                }
                completed.insert(scenario_id);
            }
        }
    }
    debug!(path = %path.display(), completed = completed.len(), "read progress log");
    Ok(completed)
}

/// Append-only writer shared by the worker threads.
#[derive(Debug)]
pub(crate) struct ProgressLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ProgressLog {
    /// Opens the log for writing.
    ///
    /// When `append` is set and the file already holds a header, new records
    /// are appended after it; otherwise the file is truncated and a fresh
    /// header is written.
    pub(crate) fn open(
        path: &Path,
        scenario_count: usize,
        experiment_meta_data: &[String],
        append: bool,
    ) -> NucleusResult<Self> {
        let has_content = append
            && std::fs::metadata(path)
                .map(|m| m.len() > 0)
                .unwrap_or(false);
        let file = if has_content {
            OpenOptions::new().append(true).open(path)
        } else {
            File::create(path)
        }
        .map_err(|e| log_error(path, e))?;

        let log = Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        };
        if !has_content {
            log.write(&ProgressRecord::Header {
                scenario_count,
                experiment_meta_data: experiment_meta_data.to_vec(),
            })?;
        }
        Ok(log)
    }

    /// Records a succeeded scenario.
    pub(crate) fn record(&self, scenario_id: ScenarioId, meta_data: &[String]) -> NucleusResult<()> {
        self.write(&ProgressRecord::Completed {
            scenario_id,
            completed_at: Utc::now(),
            meta_data: meta_data.to_vec(),
        })
    }

    fn write(&self, record: &ProgressRecord) -> NucleusResult<()> {
        let mut line = serde_json::to_string(record).map_err(|e| log_error(&self.path, e))?;
        line.push('\n');
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(line.as_bytes()).map_err(|e| log_error(&self.path, e))?;
        file.flush().map_err(|e| log_error(&self.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> Vec<String> {
        vec!["rate".to_string()]
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let completed = read_completed(&dir.path().join("none.jsonl"), 3, &meta()).unwrap();
        assert!(completed.is_empty());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.jsonl");

        let log = ProgressLog::open(&path, 4, &meta(), false).unwrap();
        log.record(ScenarioId::new(2), &["0.5".to_string()]).unwrap();
        drop(log);

        let log = ProgressLog::open(&path, 4, &meta(), true).unwrap();
        log.record(ScenarioId::new(0), &["0.0".to_string()]).unwrap();
        drop(log);

        let completed = read_completed(&path, 4, &meta()).unwrap();
        assert_eq!(completed.into_iter().collect::<Vec<_>>(), vec![ScenarioId::new(0), ScenarioId::new(2)]);
    }

    #[test]
    fn test_truncates_without_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.jsonl");

        let log = ProgressLog::open(&path, 2, &meta(), false).unwrap();
        log.record(ScenarioId::new(1), &[]).unwrap();
        drop(log);
        drop(ProgressLog::open(&path, 2, &meta(), false).unwrap());

        assert!(read_completed(&path, 2, &meta()).unwrap().is_empty());
    }

    #[test]
    fn test_shape_mismatch_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.jsonl");
        drop(ProgressLog::open(&path, 2, &meta(), false).unwrap());

        let err = read_completed(&path, 3, &meta()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::NucleusError::Execution(ExecutionError::IncompatibleProgressLog { .. })
        ));
        assert!(read_completed(&path, 2, &["other".to_string()]).is_err());
    }

    #[test]
    fn test_garbage_line_is_a_log_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        assert!(matches!(
            read_completed(&path, 1, &meta()).unwrap_err(),
            crate::error::NucleusError::Execution(ExecutionError::ProgressLog { .. })
        ));
    }
}
