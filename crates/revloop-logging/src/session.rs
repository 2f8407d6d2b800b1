use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Per-cycle summary written to the session transcript
#[derive(Debug, Clone, Serialize)]
pub struct IterationEntry {
    pub iteration: usize,
    pub artifact: String,
    pub weighted_score: f64,
    pub passed: bool,
    pub scores: BTreeMap<String, f64>,
    pub conflicts: Vec<String>,
    pub status: String,
    pub feedback: String,
    pub timestamp: DateTime<Utc>,
}

/// Represents each line type in the session JSONL file.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionLine {
    SessionStart {
        timestamp: DateTime<Utc>,
        run_id: String,
        task: String,
        requirements: Vec<String>,
        evaluators: Vec<String>,
        max_iterations: usize,
    },
    Iteration(IterationEntry),
    SessionEnd {
        outcome: String,
        iterations: usize,
        weighted_score: Option<f64>,
        duration_secs: f64,
        timestamp: DateTime<Utc>,
    },
}

/// Writes session data as JSONL to a file in ~/.local/share/revloop/sessions/.
pub struct SessionWriter {
    file: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl SessionWriter {
    /// Create a session file in the default sessions directory
    pub fn new(task: &str) -> io::Result<Self> {
        Self::in_dir(&Self::sessions_dir()?, task)
    }

    /// Create a session file in `dir`. The file name is the current UTC
    /// timestamp plus a short hash of the task.
    pub fn in_dir(dir: &Path, task: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;

        let timestamp_str = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();

        let mut hasher = Sha256::new();
        hasher.update(task.as_bytes());
        let hash = hex::encode(hasher.finalize());
        let short_hash = &hash[..6];

        let path = dir.join(format!("{}_{}.jsonl", timestamp_str, short_hash));
        let file = File::create(&path)?;

        Ok(Self {
            file: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    /// Returns the path to the session file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_start(
        &self,
        run_id: &str,
        task: &str,
        requirements: &[String],
        evaluators: &[String],
        max_iterations: usize,
    ) {
        self.write_line(&SessionLine::SessionStart {
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            task: task.to_string(),
            requirements: requirements.to_vec(),
            evaluators: evaluators.to_vec(),
            max_iterations,
        });
    }

    pub fn write_iteration(&self, entry: IterationEntry) {
        self.write_line(&SessionLine::Iteration(entry));
    }

    pub fn write_end(
        &self,
        outcome: &str,
        iterations: usize,
        weighted_score: Option<f64>,
        duration_secs: f64,
    ) {
        self.write_line(&SessionLine::SessionEnd {
            outcome: outcome.to_string(),
            iterations,
            weighted_score,
            duration_secs,
            timestamp: Utc::now(),
        });
    }

    fn write_line(&self, line: &SessionLine) {
        if let Ok(json) = serde_json::to_string(line) {
            if let Ok(mut writer) = self.file.lock() {
                let _ = writeln!(writer, "{}", json);
                let _ = writer.flush();
            }
        }
    }

    fn sessions_dir() -> io::Result<PathBuf> {
        let data_dir = dirs::data_dir().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "Could not determine data directory",
            )
        })?;
        Ok(data_dir.join("revloop").join("sessions"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_file_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SessionWriter::in_dir(dir.path(), "write a parser").unwrap();

        writer.write_start("run-1", "write a parser", &[], &["style".into()], 3);
        writer.write_iteration(IterationEntry {
            iteration: 1,
            artifact: "fn parse() {}".into(),
            weighted_score: 6.0,
            passed: false,
            scores: BTreeMap::from([("style".to_string(), 6.0)]),
            conflicts: vec![],
            status: "needs_revision".into(),
            feedback: "[style] naming".into(),
            timestamp: Utc::now(),
        });
        writer.write_end("rejected", 1, Some(6.0), 1.5);

        let name = writer.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with(".jsonl"));

        let content = fs::read_to_string(writer.path()).unwrap();
        let types: Vec<String> = content
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(types, vec!["session_start", "iteration", "session_end"]);
    }
}
