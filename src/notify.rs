//! In-memory notification log
//!
//! Human-readable event lines (start/stop, learning transitions, anomaly
//! verdicts) served by `GET /log`. Bounded; oldest lines fall off.

use std::collections::VecDeque;
use std::sync::Arc;
use chrono::Local;
use parking_lot::Mutex;

const DEFAULT_CAPACITY: usize = 1024;

/// Shared, bounded notification log
#[derive(Clone)]
pub struct NotifyLog {
    inner: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl NotifyLog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Append a timestamped line
    pub fn notify(&self, message: &str) {
        let line = format!("{}{}", Local::now().format("[%d/%b/%Y %H:%M:%S] "), message);

        let mut log = self.inner.lock();
        if log.len() == self.capacity {
            log.pop_front();
        }
        log.push_back(line);
    }

    /// All retained lines, newline-joined
    pub fn tail(&self) -> String {
        let log = self.inner.lock();
        let mut out = log.iter().cloned().collect::<Vec<_>>().join("\n");
        out.push('\n');
        out
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for NotifyLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_appends_timestamped_lines() {
        let log = NotifyLog::new();
        log.notify("AUD manager started");
        log.notify("AUD learning ended (via /dev/force-stop-learning)");

        assert_eq!(log.len(), 2);
        let tail = log.tail();
        assert!(tail.contains("AUD manager started"));
        assert!(tail.contains("AUD learning ended"));
        assert!(tail.ends_with('\n'));
    }

    #[test]
    fn test_log_bounded() {
        let log = NotifyLog::new();
        for i in 0..(DEFAULT_CAPACITY + 10) {
            log.notify(&format!("line {}", i));
        }

        assert_eq!(log.len(), DEFAULT_CAPACITY);
        assert!(!log.tail().contains("line 0\n"));
    }
}
