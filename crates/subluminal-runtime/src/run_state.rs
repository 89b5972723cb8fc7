use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use subluminal_types::RunSummary;

struct CallEntry {
    started: Instant,
    #[allow(dead_code)]
    seq: u64,
}

/// Per-run shared state: the monotonic sequence, the active-call table
/// and the summary counters. Shared by both reader loops.
pub struct RunState {
    seq: AtomicU64,
    calls: Mutex<HashMap<String, CallEntry>>,
    started: Instant,
    calls_total: AtomicU64,
    calls_allowed: AtomicU64,
    calls_blocked: AtomicU64,
    calls_throttled: AtomicU64,
    errors_total: AtomicU64,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            calls: Mutex::new(HashMap::new()),
            started: Instant::now(),
            calls_total: AtomicU64::new(0),
            calls_allowed: AtomicU64::new(0),
            calls_blocked: AtomicU64::new(0),
            calls_throttled: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
        }
    }

    /// Assign the next sequence number (starting at 1) and record the
    /// call start time.
    pub fn start_call(&self, call_id: &str) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut calls) = self.calls.lock() {
            calls.insert(
                call_id.to_string(),
                CallEntry {
                    started: Instant::now(),
                    seq,
                },
            );
        }
        seq
    }

    /// Remove the call and return its elapsed milliseconds, `-1` when
    /// the call is unknown.
    pub fn end_call(&self, call_id: &str) -> i64 {
        let Ok(mut calls) = self.calls.lock() else {
            return -1;
        };
        match calls.remove(call_id) {
            Some(entry) => entry.started.elapsed().as_millis() as i64,
            None => -1,
        }
    }

    pub fn increment_allowed(&self) {
        self.calls_total.fetch_add(1, Ordering::SeqCst);
        self.calls_allowed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_blocked(&self) {
        self.calls_total.fetch_add(1, Ordering::SeqCst);
        self.calls_blocked.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_throttled(&self) {
        self.calls_total.fetch_add(1, Ordering::SeqCst);
        self.calls_throttled.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_errors(&self) {
        self.errors_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn duration_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            calls_total: self.calls_total.load(Ordering::SeqCst),
            calls_allowed: self.calls_allowed.load(Ordering::SeqCst),
            calls_blocked: self.calls_blocked.load(Ordering::SeqCst),
            calls_throttled: self.calls_throttled.load(Ordering::SeqCst),
            errors_total: self.errors_total.load(Ordering::SeqCst),
            duration_ms: self.duration_ms(),
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
