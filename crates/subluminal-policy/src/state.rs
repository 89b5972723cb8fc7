use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use subluminal_types::Scope;

/// Composite key for a stateful rule's container slot.
///
/// `with_hash` folds the args hash into the subject for the families
/// that key on call content (breaker, dedupe).
pub fn state_key(
    rule_id: &str,
    scope: Scope,
    server_name: &str,
    tool_name: &str,
    args_hash: Option<&str>,
) -> String {
    let subject = match scope {
        Scope::Run => "run".to_string(),
        Scope::Tool => tool_name.to_string(),
        Scope::ServerTool => format!("{}/{}", server_name, tool_name),
    };
    match args_hash {
        Some(hash) => format!("{}|{:?}|{}|{}", rule_id, scope, subject, hash),
        None => format!("{}|{:?}|{}", rule_id, scope, subject),
    }
}

#[derive(Debug)]
pub(crate) struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_tokens: f64,
    refill_period: Duration,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_tokens: f64, refill_period: Duration, now: Instant) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_tokens,
            refill_period,
            last_refill: now,
        }
    }

    /// Refill proportionally to elapsed time, then take `cost` tokens
    /// if available.
    fn try_take(&mut self, cost: f64, now: Instant) -> bool {
        if self.refill_tokens > 0.0 && !self.refill_period.is_zero() {
            let elapsed = now.saturating_duration_since(self.last_refill);
            let refill =
                self.refill_tokens * elapsed.as_secs_f64() / self.refill_period.as_secs_f64();
            self.tokens = (self.tokens + refill).min(self.capacity);
        }
        self.last_refill = now;
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }
}

/// Per-run mutable policy state. Owned by the engine, never by the
/// bundle; a bundle reload calls [`PolicyState::reset`].
///
/// Each container sits behind its own mutex; every critical section is
/// a map operation, no lock is held across I/O.
#[derive(Debug, Default)]
pub struct PolicyState {
    budgets: Mutex<HashMap<String, u64>>,
    buckets: Mutex<HashMap<String, TokenBucket>>,
    breakers: Mutex<HashMap<String, Vec<Instant>>>,
    dedupe: Mutex<HashMap<String, Instant>>,
}

/// A container lock was poisoned; surfaced as a policy evaluation error.
#[derive(Debug)]
pub struct StatePoisoned;

impl PolicyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all accumulated counters, buckets, windows and cache
    /// entries. Called on bundle reload.
    pub fn reset(&self) {
        if let Ok(mut g) = self.budgets.lock() {
            g.clear();
        }
        if let Ok(mut g) = self.buckets.lock() {
            g.clear();
        }
        if let Ok(mut g) = self.breakers.lock() {
            g.clear();
        }
        if let Ok(mut g) = self.dedupe.lock() {
            g.clear();
        }
    }

    /// Increment the budget counter and return the new count.
    pub fn budget_increment(&self, key: &str) -> Result<u64, StatePoisoned> {
        let mut budgets = self.budgets.lock().map_err(|_| StatePoisoned)?;
        let count = budgets.entry(key.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    /// Lazily create the bucket and attempt to take `cost` tokens.
    /// Returns false when the bucket has insufficient tokens.
    pub fn bucket_try_take(
        &self,
        key: &str,
        capacity: f64,
        refill_tokens: f64,
        refill_period: Duration,
        cost: f64,
        now: Instant,
    ) -> Result<bool, StatePoisoned> {
        let mut buckets = self.buckets.lock().map_err(|_| StatePoisoned)?;
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(capacity, refill_tokens, refill_period, now));
        Ok(bucket.try_take(cost, now))
    }

    /// Append `now` to the repeat window, drop entries older than
    /// `window`, and return the resulting hit count.
    pub fn breaker_hit(
        &self,
        key: &str,
        window: Duration,
        now: Instant,
    ) -> Result<usize, StatePoisoned> {
        let mut breakers = self.breakers.lock().map_err(|_| StatePoisoned)?;
        let hits = breakers.entry(key.to_string()).or_default();
        hits.push(now);
        hits.retain(|t| now.saturating_duration_since(*t) <= window);
        Ok(hits.len())
    }

    /// Record `now` as last-seen and report whether the previous
    /// sighting was inside the window.
    pub fn dedupe_seen(
        &self,
        key: &str,
        window: Duration,
        now: Instant,
    ) -> Result<bool, StatePoisoned> {
        let mut dedupe = self.dedupe.lock().map_err(|_| StatePoisoned)?;
        let prev = dedupe.insert(key.to_string(), now);
        Ok(match prev {
            Some(t) => now.saturating_duration_since(t) <= window,
            None => false,
        })
    }
}
