//! Bot status publishing.
//!
//! The worker writes `status/bot_{id}.json` after each cycle; the control
//! plane reads the same file to answer status queries without any
//! shared-memory coupling. Writes go through a temp file + rename so readers
//! never observe a torn snapshot.

use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::domain::state::{BotState, BotStatus};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct StatusPublisher {
    status_dir: PathBuf,
}

impl StatusPublisher {
    pub fn new(status_dir: impl Into<PathBuf>) -> Self {
        Self {
            status_dir: status_dir.into(),
        }
    }

    pub fn path_for(&self, bot_id: i64) -> PathBuf {
        self.status_dir.join(format!("bot_{}.json", bot_id))
    }

    /// Write the status snapshot atomically.
    pub fn write(&self, status: &BotStatus) -> Result<()> {
        std::fs::create_dir_all(&self.status_dir)?;

        let path = self.path_for(status.bot_id);
        let tmp = path.with_extension("json.tmp");

        let payload = serde_json::to_vec_pretty(status)?;
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;

        debug!(bot_id = status.bot_id, path = %path.display(), "status written");
        Ok(())
    }

    /// Read the most recently published snapshot, if any.
    pub fn read(&self, bot_id: i64) -> Option<BotStatus> {
        let path = self.path_for(bot_id);
        let bytes = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(status) => Some(status),
            Err(e) => {
                error!(bot_id, "failed to parse status file: {}", e);
                None
            }
        }
    }

    /// Rewrite the snapshot with state=stopped, preserving the last counters.
    pub fn mark_stopped(&self, bot_id: i64) -> Result<()> {
        let mut status = self.read(bot_id).unwrap_or_else(|| BotStatus::offline(bot_id));
        status.is_running = false;
        status.state = BotState::Stopped;
        status.updated_at = Utc::now();
        self.write(&status)
    }

    pub fn delete(&self, bot_id: i64) -> Result<()> {
        let path = self.path_for(bot_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Tail the last `lines` lines of a log file.
pub fn tail_log(path: impl AsRef<Path>, lines: usize) -> Result<String> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_status(bot_id: i64) -> BotStatus {
        BotStatus {
            bot_id,
            is_running: true,
            state: BotState::Running,
            current_cycle: 12,
            last_cycle_at: Some(Utc::now()),
            open_positions: 1,
            symbols_trading: vec!["BTC/USDT".into()],
            balance: dec!(987.65),
            last_decision: Some("BTC/USDT:open_long".into()),
            last_error: None,
            debate: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = StatusPublisher::new(dir.path());

        publisher.write(&sample_status(3)).unwrap();
        let read = publisher.read(3).expect("status should exist");
        assert_eq!(read.current_cycle, 12);
        assert_eq!(read.state, BotState::Running);
        assert_eq!(read.balance, dec!(987.65));
    }

    #[test]
    fn test_mark_stopped_preserves_counters() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = StatusPublisher::new(dir.path());

        publisher.write(&sample_status(4)).unwrap();
        publisher.mark_stopped(4).unwrap();

        let read = publisher.read(4).unwrap();
        assert_eq!(read.state, BotState::Stopped);
        assert!(!read.is_running);
        assert_eq!(read.current_cycle, 12);
    }

    #[test]
    fn test_read_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = StatusPublisher::new(dir.path());
        assert!(publisher.read(99).is_none());
    }

    #[test]
    fn test_tail_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("bot.log");
        std::fs::write(&log, "a\nb\nc\nd\n").unwrap();
        assert_eq!(tail_log(&log, 2).unwrap(), "c\nd");
        assert_eq!(tail_log(&log, 10).unwrap(), "a\nb\nc\nd");
    }
}
