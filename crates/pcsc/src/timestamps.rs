//! Coarse activity timing for diagnostics

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Tag recorded when a card detection step starts (channel open).
pub const DETECTION_START: u8 = 0x00;

/// Tag recorded when a card session ends (channel close).
pub const SESSION_END: u8 = 0xFF;

/// Append-only log of timestamped reader activity.
///
/// Each entry folds the epoch-millisecond timestamp with a one-byte
/// operation tag in the top byte: [`DETECTION_START`] at channel open,
/// [`SESSION_END`] at channel close, and the APDU instruction byte before
/// and after each transmission — two measurement points per command,
/// enabling per-command execution-time measurement.
///
/// Handles are cheap to clone and share one underlying log; the activity of
/// all readers of a plugin feeds the same sequence. The log only ever grows
/// until [`reset`](Self::reset) is called.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: Arc<Mutex<Vec<u64>>>,
}

impl ActivityLog {
    const TIMESTAMP_MASK: u64 = 0x00FF_FFFF_FFFF_FFFF;

    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry carrying the current time and the operation tag.
    pub fn add_entry(&self, tag: u8) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        self.entries
            .lock()
            .push((timestamp & Self::TIMESTAMP_MASK) | (u64::from(tag) << 56));
    }

    /// Returns a snapshot of the log.
    pub fn entries(&self) -> Vec<u64> {
        self.entries.lock().clone()
    }

    /// Clears the log.
    pub fn reset(&self) {
        self.entries.lock().clear();
    }

    /// Extracts the operation tag from an entry.
    pub const fn tag(entry: u64) -> u8 {
        (entry >> 56) as u8
    }

    /// Extracts the epoch-millisecond timestamp from an entry.
    pub const fn timestamp(entry: u64) -> u64 {
        entry & Self::TIMESTAMP_MASK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_fold_tag_and_timestamp() {
        let log = ActivityLog::new();
        log.add_entry(DETECTION_START);
        log.add_entry(0xA4);
        log.add_entry(SESSION_END);

        let entries = log.entries();
        let tags: Vec<_> = entries.iter().copied().map(ActivityLog::tag).collect();
        assert_eq!(tags, [DETECTION_START, 0xA4, SESSION_END]);
        for entry in entries {
            let timestamp = ActivityLog::timestamp(entry);
            assert!(timestamp > 0);
            assert_eq!(timestamp & !ActivityLog::TIMESTAMP_MASK, 0);
        }
    }

    #[test]
    fn clones_share_the_same_log() {
        let log = ActivityLog::new();
        let shared = log.clone();
        shared.add_entry(0x20);
        assert_eq!(log.entries().len(), 1);
    }

    #[test]
    fn reset_clears_all_entries() {
        let log = ActivityLog::new();
        log.add_entry(DETECTION_START);
        log.reset();
        assert!(log.entries().is_empty());
    }
}
