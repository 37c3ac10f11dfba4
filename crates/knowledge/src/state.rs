use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;

/// Well-known state files under the resolved state directory.
pub const PREDICTIONS_LOG: &str = "predictions_log.jsonl";
pub const GROUND_TRUTH_LOG: &str = "prediction_ground_truth.jsonl";
pub const COVERAGE_TREND_LOG: &str = "coverage_trend.jsonl";
pub const DEAD_LETTER_LOG: &str = "dead_letter.jsonl";
pub const SYNC_HISTORY_LOG: &str = "sync_history.jsonl";
/// Subdirectory holding per-project belief snapshots.
pub const BAYESIAN_DIR: &str = "bayesian";

/// Append-only JSONL file with crash-safe append and atomic overwrite.
#[derive(Debug, Clone)]
pub struct JsonlLog {
    path: PathBuf,
}

impl JsonlLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_state_dir(name: &str) -> Self {
        Self::new(udo_config::state_dir().join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = serde_json::to_string(record)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        // Flush userspace buffers and fsync so the record survives a crash
        // immediately after append.
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Atomically replace the log with a new set of records.
    ///
    /// The content is written to a `.tmp` sibling, fsync'd, then renamed over
    /// the original.  A crash before the rename leaves the original intact;
    /// a crash after leaves a consistent new file.
    pub async fn overwrite<T: Serialize>(&self, records: &[T]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = {
            let filename = self
                .path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "log.jsonl".to_string());
            self.path.with_file_name(format!("{filename}.tmp"))
        };

        let write_result: Result<()> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            for record in records {
                let line = serde_json::to_string(record)?;
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        Ok(())
    }

    /// Load every record, skipping corrupt lines.  Bad lines are preserved
    /// in a `.corrupt` sidecar for forensics and reported at warn level.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::OpenOptions::new().read(true).open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut corrupt_count = 0usize;

        for (line_idx, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<T>(&line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    corrupt_count += 1;
                    tracing::warn!(
                        line = line_idx + 1,
                        error = %err,
                        path = %self.path.display(),
                        "corrupt JSONL record — skipping line"
                    );
                    let corrupt_path = self.path.with_extension("jsonl.corrupt");
                    if let Ok(mut bad) = fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&corrupt_path)
                    {
                        use std::io::Write as _;
                        let _ = writeln!(bad, "{line}");
                    }
                }
            }
        }

        if corrupt_count > 0 {
            tracing::warn!(
                corrupt_lines = corrupt_count,
                path = %self.path.display(),
                "log loaded with skipped corrupt lines — inspect .corrupt sidecar"
            );
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    use super::JsonlLog;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u32,
        label: String,
    }

    fn temp_log(tag: &str) -> JsonlLog {
        JsonlLog::new(
            std::env::temp_dir().join(format!("udo-state-{tag}-{}.jsonl", Uuid::new_v4())),
        )
    }

    #[tokio::test]
    async fn append_then_load_round_trips() -> anyhow::Result<()> {
        let log = temp_log("roundtrip");
        log.append(&Sample { id: 1, label: "one".into() }).await?;
        log.append(&Sample { id: 2, label: "two".into() }).await?;

        let records: Vec<Sample> = log.load()?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].label, "two");

        let _ = std::fs::remove_file(log.path());
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped() -> anyhow::Result<()> {
        let log = temp_log("corrupt");
        log.append(&Sample { id: 1, label: "ok".into() }).await?;
        {
            use std::io::Write as _;
            let mut file = std::fs::OpenOptions::new().append(true).open(log.path())?;
            writeln!(file, "{{not json")?;
        }
        log.append(&Sample { id: 2, label: "also ok".into() }).await?;

        let records: Vec<Sample> = log.load()?;
        assert_eq!(records.len(), 2);

        let _ = std::fs::remove_file(log.path());
        let _ = std::fs::remove_file(log.path().with_extension("jsonl.corrupt"));
        Ok(())
    }

    #[tokio::test]
    async fn overwrite_replaces_contents_atomically() -> anyhow::Result<()> {
        let log = temp_log("overwrite");
        log.append(&Sample { id: 1, label: "old".into() }).await?;
        log.overwrite(&[Sample { id: 9, label: "new".into() }]).await?;

        let records: Vec<Sample> = log.load()?;
        assert_eq!(records, vec![Sample { id: 9, label: "new".into() }]);

        let _ = std::fs::remove_file(log.path());
        Ok(())
    }

    #[test]
    fn missing_file_loads_empty() -> anyhow::Result<()> {
        let log = temp_log("missing");
        let records: Vec<Sample> = log.load()?;
        assert!(records.is_empty());
        Ok(())
    }
}
