//! Append-only event log file
//!
//! One line per gateway event, prefixed with a local `YYYY-MM-DD_HH-MM-SS` timestamp.
//! The file is opened once in append mode and flushed after every line so the trail
//! survives a crash.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use blegate_core::{EventSink, GatewayEvent};
use chrono::Local;
use parking_lot::Mutex;
use tracing::warn;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// [`EventSink`] writing to a text file
pub struct FileEventLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileEventLog {
    /// Open `path` for appending, creating it if needed
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one free-form line
    pub fn append(&self, text: &str) -> io::Result<()> {
        let line = format!("{} {}\n", Local::now().format(TIMESTAMP_FORMAT), text);
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

impl EventSink for FileEventLog {
    fn record(&self, event: &GatewayEvent) {
        if let Err(e) = self.append(&event.to_string()) {
            warn!("Failed to write event log {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blegate_core::GatewayMode;

    #[test]
    fn test_lines_are_appended_with_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");

        let log = FileEventLog::open(&path).unwrap();
        log.append("Server started").unwrap();
        log.record(&GatewayEvent::ModeChanged {
            from: GatewayMode::Idle,
            to: GatewayMode::Listening,
        });
        drop(log);

        // Reopening must not truncate
        FileEventLog::open(&path).unwrap().append("again").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(" Server started"));
        assert!(lines[1].ends_with("Idle -> Listening"));
        assert!(lines[2].ends_with(" again"));

        let stamp = lines[0].split(' ').next().unwrap();
        assert_eq!(stamp.len(), "2024-01-01_00-00-00".len());
        assert_eq!(&stamp[10..11], "_");
    }
}
