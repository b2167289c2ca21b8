//! The append-only experiment progress log.
//!
//! The log records one line per scenario that reached a terminal state,
//! preceded by a header identifying the run and fingerprinting the
//! scenario space. On resume, scenarios already recorded terminal are
//! skipped; a fingerprint mismatch means the log belongs to a different
//! experiment and is refused rather than silently mixing scenario ids.
//!
//! Writes happen only on the invoking thread, flushed per append, so a
//! partially written tail is the only corruption a crash can produce.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExperimentError;

use super::dimension::Dimension;
use super::scenario::ScenarioStatus;

/// First line of a progress log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ProgressHeader {
    /// Run that created the log.
    pub run_id: Uuid,

    /// Total scenario count of the experiment.
    pub scenario_count: usize,

    /// Fingerprint of the experiment's scenario space.
    pub fingerprint: String,
}

/// One terminal-status record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ProgressEntry {
    /// The scenario id.
    pub scenario: usize,

    /// Its terminal status.
    pub status: ScenarioStatus,
}

/// Stable fingerprint of an experiment's scenario space: dimension names,
/// metadata columns, and level counts, in dimension order.
pub(crate) fn fingerprint(dimensions: &[Dimension]) -> String {
    let mut hasher = blake3::Hasher::new();
    for dimension in dimensions {
        hasher.update(dimension.name().as_bytes());
        hasher.update(&[0]);
        for name in dimension.metadata_names() {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(&(dimension.level_count() as u64).to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Append handle to a progress log.
#[derive(Debug)]
pub(crate) struct ProgressLog {
    writer: BufWriter<File>,
}

impl ProgressLog {
    /// Creates (or truncates) a log, writing a fresh header.
    pub(crate) fn start(
        path: &Path,
        run_id: Uuid,
        scenario_count: usize,
        fingerprint: &str,
    ) -> Result<Self, ExperimentError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let header = ProgressHeader {
            run_id,
            scenario_count,
            fingerprint: fingerprint.to_string(),
        };
        let line = serde_json::to_string(&header)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(Self { writer })
    }

    /// Opens an existing log for continuation, returning the terminal
    /// statuses it records. A missing or empty file starts a fresh log.
    ///
    /// The original header is kept on resume; its run id identifies the
    /// run that first created the log.
    pub(crate) fn resume(
        path: &Path,
        run_id: Uuid,
        scenario_count: usize,
        fingerprint: &str,
    ) -> Result<(Self, BTreeMap<usize, ScenarioStatus>), ExperimentError> {
        if !path.exists() {
            let log = Self::start(path, run_id, scenario_count, fingerprint)?;
            return Ok((log, BTreeMap::new()));
        }

        let reader = BufReader::new(File::open(path)?);
        let mut lines = reader.lines();
        let Some(header_line) = lines.next().transpose()? else {
            let log = Self::start(path, run_id, scenario_count, fingerprint)?;
            return Ok((log, BTreeMap::new()));
        };
        let header: ProgressHeader =
            serde_json::from_str(&header_line).map_err(|e| ExperimentError::ProgressLogCorrupt {
                line: 1,
                reason: e.to_string(),
            })?;
        if header.fingerprint != fingerprint {
            return Err(ExperimentError::ProgressLogMismatch {
                expected: fingerprint.to_string(),
                found: header.fingerprint,
            });
        }

        let mut done = BTreeMap::new();
        for (idx, line) in lines.enumerate() {
            let line_no = idx + 2;
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ProgressEntry =
                serde_json::from_str(&line).map_err(|e| ExperimentError::ProgressLogCorrupt {
                    line: line_no,
                    reason: e.to_string(),
                })?;
            if entry.scenario >= scenario_count {
                return Err(ExperimentError::ProgressLogCorrupt {
                    line: line_no,
                    reason: format!(
                        "scenario id {} out of range (count {scenario_count})",
                        entry.scenario
                    ),
                });
            }
            if !entry.status.is_terminal() {
                return Err(ExperimentError::ProgressLogCorrupt {
                    line: line_no,
                    reason: format!("non-terminal status '{}'", entry.status),
                });
            }
            done.insert(entry.scenario, entry.status);
        }

        let file = OpenOptions::new().append(true).open(path)?;
        Ok((
            Self {
                writer: BufWriter::new(file),
            },
            done,
        ))
    }

    /// Appends one terminal-status record and flushes.
    pub(crate) fn append(
        &mut self,
        scenario: usize,
        status: ScenarioStatus,
    ) -> Result<(), ExperimentError> {
        let entry = ProgressEntry { scenario, status };
        let line = serde_json::to_string(&entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> Vec<Dimension> {
        vec![
            Dimension::builder("growth")
                .metadata("rate")
                .level(|_| Ok(vec!["0.1".to_string()]))
                .level(|_| Ok(vec!["0.2".to_string()]))
                .build(),
            Dimension::builder("seed")
                .metadata("count")
                .level(|_| Ok(vec!["5".to_string()]))
                .build(),
        ]
    }

    #[test]
    fn test_fingerprint_is_stable_and_shape_sensitive() {
        let a = fingerprint(&dims());
        let b = fingerprint(&dims());
        assert_eq!(a, b);

        let mut fewer = dims();
        fewer.pop();
        assert_ne!(fingerprint(&fewer), a);
    }

    #[test]
    fn test_start_append_resume_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");
        let print = fingerprint(&dims());

        let mut log = ProgressLog::start(&path, Uuid::new_v4(), 2, &print).unwrap();
        log.append(0, ScenarioStatus::Succeeded).unwrap();
        log.append(1, ScenarioStatus::Failed).unwrap();
        drop(log);

        let (_log, done) = ProgressLog::resume(&path, Uuid::new_v4(), 2, &print).unwrap();
        assert_eq!(done.len(), 2);
        assert_eq!(done[&0], ScenarioStatus::Succeeded);
        assert_eq!(done[&1], ScenarioStatus::Failed);
    }

    #[test]
    fn test_resume_missing_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");
        let print = fingerprint(&dims());
        let (_log, done) = ProgressLog::resume(&path, Uuid::new_v4(), 2, &print).unwrap();
        assert!(done.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_resume_rejects_fingerprint_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");
        let print = fingerprint(&dims());
        drop(ProgressLog::start(&path, Uuid::new_v4(), 2, &print).unwrap());

        let err = ProgressLog::resume(&path, Uuid::new_v4(), 2, "other").unwrap_err();
        assert!(matches!(err, ExperimentError::ProgressLogMismatch { .. }));
    }

    #[test]
    fn test_resume_rejects_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");
        let print = fingerprint(&dims());
        let mut log = ProgressLog::start(&path, Uuid::new_v4(), 2, &print).unwrap();
        log.append(0, ScenarioStatus::Succeeded).unwrap();
        drop(log);

        std::fs::write(
            &path,
            std::fs::read_to_string(&path).unwrap() + "not json\n",
        )
        .unwrap();
        let err = ProgressLog::resume(&path, Uuid::new_v4(), 2, &print).unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::ProgressLogCorrupt { line: 3, .. }
        ));
    }

    #[test]
    fn test_resume_rejects_out_of_range_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");
        let print = fingerprint(&dims());
        let mut log = ProgressLog::start(&path, Uuid::new_v4(), 2, &print).unwrap();
        log.append(5, ScenarioStatus::Succeeded).unwrap();
        drop(log);

        let err = ProgressLog::resume(&path, Uuid::new_v4(), 2, &print).unwrap_err();
        assert!(matches!(err, ExperimentError::ProgressLogCorrupt { .. }));
    }

    #[test]
    fn test_appends_after_resume_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");
        let print = fingerprint(&dims());

        let mut log = ProgressLog::start(&path, Uuid::new_v4(), 3, &print).unwrap();
        log.append(0, ScenarioStatus::Succeeded).unwrap();
        drop(log);

        let (mut log, done) = ProgressLog::resume(&path, Uuid::new_v4(), 3, &print).unwrap();
        assert_eq!(done.len(), 1);
        log.append(2, ScenarioStatus::Succeeded).unwrap();
        drop(log);

        let (_log, done) = ProgressLog::resume(&path, Uuid::new_v4(), 3, &print).unwrap();
        assert_eq!(done.len(), 2);
        assert!(done.contains_key(&2));
    }
}
