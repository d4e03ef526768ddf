//! Retransmission timers keyed by a closed enum instead of ad-hoc
//! strings (the original used the literal `"NUDGE"` alongside numeric
//! sequence numbers as dictionary keys).

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Identifies what a pending timer is waiting to have acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Seq(u32),
    Nudge,
}

/// What a caller should do about a timer that has fired.
#[derive(Debug, Clone)]
pub enum ScanAction {
    /// Re-send these exact bytes; the timer has been reset.
    Retransmit(Vec<u8>),
    /// This timer exhausted its retransmission budget; the connection
    /// should be torn down.
    Abort,
}

struct Entry {
    packet: Vec<u8>,
    sent_at: Instant,
    retransmissions: u32,
}

/// Tracks one retransmission timer per [`TimerKey`].
pub struct TimerSet {
    timers: HashMap<TimerKey, Entry>,
    timeout: Duration,
    max_retransmissions: u32,
}

impl TimerSet {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
    pub const DEFAULT_MAX_RETRANSMISSIONS: u32 = 3;

    pub fn new() -> Self {
        TimerSet::with_params(Self::DEFAULT_TIMEOUT, Self::DEFAULT_MAX_RETRANSMISSIONS)
    }

    pub fn with_params(timeout: Duration, max_retransmissions: u32) -> Self {
        TimerSet {
            timers: HashMap::new(),
            timeout,
            max_retransmissions,
        }
    }

    /// Arm the timer for `key`, recording `packet` as the bytes to
    /// retransmit if it fires. If `key` is already armed, its send time
    /// is updated and its retransmission count is incremented rather
    /// than reset.
    pub fn arm(&mut self, key: TimerKey, packet: Vec<u8>) {
        match self.timers.get_mut(&key) {
            Some(entry) => {
                entry.packet = packet;
                entry.sent_at = Instant::now();
                entry.retransmissions += 1;
            }
            None => {
                self.timers.insert(
                    key,
                    Entry {
                        packet,
                        sent_at: Instant::now(),
                        retransmissions: 0,
                    },
                );
            }
        }
    }

    pub fn cancel(&mut self, key: TimerKey) {
        self.timers.remove(&key);
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Check every timer against `now`, resetting and returning a
    /// [`ScanAction::Retransmit`] for each one still within its
    /// retransmission budget, or [`ScanAction::Abort`] for one that has
    /// exhausted it. Aborted timers are removed; the caller is
    /// responsible for tearing down the rest of the connection state.
    pub fn scan(&mut self, now: Instant) -> Vec<(TimerKey, ScanAction)> {
        let mut results = Vec::new();
        let mut expired = Vec::new();

        for (key, entry) in self.timers.iter_mut() {
            if now.duration_since(entry.sent_at) < self.timeout {
                continue;
            }
            if entry.retransmissions >= self.max_retransmissions {
                expired.push(*key);
                results.push((*key, ScanAction::Abort));
            } else {
                entry.sent_at = now;
                entry.retransmissions += 1;
                results.push((*key, ScanAction::Retransmit(entry.packet.clone())));
            }
        }

        for key in expired {
            self.timers.remove(&key);
        }

        results
    }
}

impl Default for TimerSet {
    fn default() -> Self {
        TimerSet::new()
    }
}
