//! Terminal reporter.

use async_trait::async_trait;

use super::{LogEntry, ReportError, Reporter, styled_status};
use crate::framework::Status;

/// Prints entries to stdout, coloring a leading `[STATUS]` tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter {
    timestamps: bool,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes every entry with its local time.
    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    fn render(&self, entry: &LogEntry) -> String {
        let text = match split_status_tag(&entry.text) {
            Some((status, rest)) => format!("[{}]{}", styled_status(status), rest),
            None => entry.text.clone(),
        };
        if self.timestamps {
            let time = entry.time.with_timezone(&chrono::Local).format("%H:%M:%S");
            format!("{} {}", console::style(time).dim(), text)
        } else {
            text
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn log(&self, entry: &LogEntry) -> Result<(), ReportError> {
        println!("{}", self.render(entry));
        Ok(())
    }
}

fn split_status_tag(text: &str) -> Option<(Status, &str)> {
    let rest = text.strip_prefix('[')?;
    let (tag, rest) = rest.split_once(']')?;
    let status = match tag {
        "SUCCESS" => Status::Success,
        "FAILED" => Status::Failed,
        "FLAKY" => Status::Flaky,
        "TIMEOUT" => Status::Timeout,
        "INTERNAL" => Status::Internal,
        _ => return None,
    };
    Some((status, rest))
}
