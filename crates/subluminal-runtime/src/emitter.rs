use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use subluminal_types::{Event, EventPayload};

/// Default bounded queue capacity.
pub const DEFAULT_CAPACITY: usize = 1000;

// NOTE: Emitter Degradation Rationale
//
// Decisions are control plane; previews are diagnostic. Above the
// preview-drop threshold new previewable events are stripped of their
// preview text at enqueue, and at capacity a synchronous decision emit
// may evict a queued previewable event. The failure mode this buys:
// a burst of large payloads can cost previews, never decisions.

/// Outcome of a non-blocking emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Queued,
    Dropped,
}

struct Ticket {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Ticket {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn wait(&self) {
        let Ok(mut done) = self.done.lock() else {
            return;
        };
        while !*done {
            match self.cond.wait(done) {
                Ok(guard) => done = guard,
                Err(_) => return,
            }
        }
    }

    fn signal(&self) {
        if let Ok(mut done) = self.done.lock() {
            *done = true;
            self.cond.notify_all();
        }
    }
}

struct Entry {
    event: Event,
    ticket: Option<Arc<Ticket>>,
}

struct QueueState {
    queue: VecDeque<Entry>,
    closed: bool,
    dropped: u64,
}

struct Shared {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    preview_drop_at: usize,
}

/// Line-terminated, back-pressured, FIFO event writer. One background
/// thread is the serialisation point; events are written in enqueue
/// order across all call sites.
pub struct Emitter {
    shared: Arc<Shared>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Emitter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self::with_capacity(out, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(out: Box<dyn Write + Send>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                queue: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
                dropped: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            // Previews degrade when the queue is strictly above this.
            preview_drop_at: capacity * 3 / 4,
        });
        let writer_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("subluminal-emitter".to_string())
            .spawn(move || writer_loop(writer_shared, out))
            .ok();
        Self {
            shared,
            writer: Mutex::new(handle),
        }
    }

    /// Non-blocking enqueue. Above the preview-drop threshold the
    /// event's previews are stripped before serialisation; at capacity
    /// the event is dropped and counted.
    pub fn emit(&self, mut event: Event) -> EmitOutcome {
        let Ok(mut state) = self.shared.state.lock() else {
            return EmitOutcome::Dropped;
        };
        if state.closed || state.queue.len() >= self.shared.capacity {
            state.dropped += 1;
            return EmitOutcome::Dropped;
        }
        if state.queue.len() > self.shared.preview_drop_at && event.payload.is_previewable() {
            event.payload.strip_preview();
        }
        state.queue.push_back(Entry {
            event,
            ticket: None,
        });
        self.shared.not_empty.notify_one();
        EmitOutcome::Queued
    }

    /// Blocking emit: returns after the writer has written the event.
    /// Decision events are never dropped or demoted; when the queue is
    /// full they evict a queued non-synchronous previewable event to
    /// make room instead of waiting.
    pub fn emit_sync(&self, event: Event) -> EmitOutcome {
        let is_decision = matches!(event.payload, EventPayload::ToolCallDecision { .. });
        let ticket = Arc::new(Ticket::new());
        {
            let Ok(mut state) = self.shared.state.lock() else {
                return EmitOutcome::Dropped;
            };
            loop {
                if state.closed {
                    state.dropped += 1;
                    return EmitOutcome::Dropped;
                }
                if state.queue.len() < self.shared.capacity {
                    break;
                }
                if is_decision {
                    let victim = state
                        .queue
                        .iter()
                        .position(|e| e.ticket.is_none() && e.event.payload.is_previewable());
                    if let Some(victim) = victim {
                        state.queue.remove(victim);
                        state.dropped += 1;
                        break;
                    }
                }
                state = match self.shared.not_full.wait(state) {
                    Ok(guard) => guard,
                    Err(_) => return EmitOutcome::Dropped,
                };
            }
            state.queue.push_back(Entry {
                event,
                ticket: Some(ticket.clone()),
            });
            self.shared.not_empty.notify_one();
        }
        ticket.wait();
        EmitOutcome::Queued
    }

    /// Events dropped under overload (counted, never re-sent).
    pub fn dropped(&self) -> u64 {
        self.shared
            .state
            .lock()
            .map(|state| state.dropped)
            .unwrap_or(0)
    }

    /// Stop accepting events, drain the queue and join the writer.
    pub fn close(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.closed = true;
        }
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
        if let Ok(mut writer) = self.writer.lock() {
            if let Some(handle) = writer.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Emitter {
    fn drop(&mut self) {
        self.close();
    }
}

fn writer_loop(shared: Arc<Shared>, mut out: Box<dyn Write + Send>) {
    loop {
        let entry = {
            let Ok(mut state) = shared.state.lock() else {
                return;
            };
            loop {
                if let Some(entry) = state.queue.pop_front() {
                    shared.not_full.notify_one();
                    break Some(entry);
                }
                if state.closed {
                    break None;
                }
                state = match shared.not_empty.wait(state) {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
            }
        };
        let Some(entry) = entry else {
            // Closed and drained.
            let _ = out.flush();
            return;
        };

        // Telemetry is best-effort: serialisation or write failures
        // drop the event silently.
        if let Ok(line) = entry.event.serialize_line() {
            let _ = out.write_all(line.as_bytes());
            let _ = out.flush();
        }
        if let Some(ticket) = entry.ticket {
            ticket.signal();
        }
    }
}
