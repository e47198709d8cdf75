//! Single-slot presence debouncing.

use crate::picc::Uid;

/// A UID that was reported and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub uid: Uid,
    pub observed_at: u64,
}

/// Decides whether a freshly read UID is a new detection. Remembers only the
/// last reported one: the reader sees one card at a time.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window_ms: u64,
    last: Option<Detection>,
}

impl Debouncer {
    pub fn new(window_ms: u64) -> Self {
        Debouncer {
            window_ms,
            last: None,
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Returns true when `uid` should be reported: it differs from the last
    /// reported UID or the window since that report has passed. Only
    /// reported detections restart the window.
    pub fn observe(&mut self, uid: &Uid, now_ms: u64) -> bool {
        let report = match &self.last {
            Some(last) if last.uid.bytes() == uid.bytes() => {
                now_ms.saturating_sub(last.observed_at) >= self.window_ms
            }
            _ => true,
        };
        if report {
            self.last = Some(Detection {
                uid: uid.clone(),
                observed_at: now_ms,
            });
        }
        report
    }

    pub fn last(&self) -> Option<&Detection> {
        self.last.as_ref()
    }

    pub fn clear(&mut self) {
        self.last = None;
    }
}
