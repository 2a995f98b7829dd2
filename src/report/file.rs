//! Log file reporter.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{LogEntry, ReportError, Reporter};

/// Appends timestamped entries to a file.
///
/// Each entry is written as `[<rfc3339 time>] <text>` followed by a newline.
/// Multi-line texts are written verbatim after the timestamp.
pub struct FileReporter {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl FileReporter {
    /// Opens `path` for appending, creating it if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Reporter for FileReporter {
    async fn log(&self, entry: &LogEntry) -> Result<(), ReportError> {
        let line = format!("[{}] {}\n", entry.time.to_rfc3339(), entry.text);
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_appends_timestamped_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        std::fs::write(&path, "previous\n").unwrap();

        let reporter = FileReporter::open(&path).await.unwrap();
        assert_eq!(reporter.path(), path.as_path());
        reporter.log(&LogEntry::now("Time: now")).await.unwrap();
        reporter
            .log(&LogEntry::now("[FAILED] t.py\ntrace"))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "previous");
        assert!(lines[1].starts_with('['));
        assert!(lines[1].ends_with("] Time: now"));
        assert!(lines[2].ends_with("] [FAILED] t.py"));
        assert_eq!(lines[3], "trace");
    }

    #[tokio::test]
    async fn test_open_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileReporter::open(dir.path().join("missing").join("run.log")).await;
        assert!(matches!(result, Err(ReportError::Io(_))));
    }
}
