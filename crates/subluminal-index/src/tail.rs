use std::collections::HashMap;

use crate::queries::tool_call::ToolCallFilter;
use crate::records::ToolCallRecord;
use crate::{Database, Result};

// NOTE: Tail Strategy Rationale
//
// Why a recent window AND a cursor walk per tick?
// - Rows are upserted: a call row changes again when its decision and
//   end events land. The descending window re-reads the newest rows to
//   catch those late updates; the keyset walk picks up rows created
//   after the stored cursor without re-reading history.
// - Fingerprint dedupe makes the two phases safe to overlap: a row is
//   emitted only when its column values actually changed.

/// Polling live view over `tool_calls`. Call [`Tailer::poll`] on a
/// fixed interval; each call returns the new-or-changed rows in order.
pub struct Tailer<'a> {
    db: &'a Database,
    filter: ToolCallFilter,
    limit: u64,
    cursor: Option<(String, String)>,
    fingerprints: HashMap<String, String>,
}

impl<'a> Tailer<'a> {
    pub fn new(db: &'a Database, filter: ToolCallFilter, limit: u64) -> Self {
        Self {
            db,
            filter,
            limit: limit.max(1),
            cursor: None,
            fingerprints: HashMap::new(),
        }
    }

    pub fn poll(&mut self) -> Result<Vec<ToolCallRecord>> {
        let mut candidates: Vec<ToolCallRecord> = Vec::new();

        // Phase 1: most recent rows, fetched descending and re-ordered
        // ascending, to catch updates to already-seen rows.
        let mut recent =
            self.db
                .fetch_tool_calls(&self.filter, true, Some(self.limit), None)?;
        recent.reverse();
        candidates.extend(recent);

        // Phase 2: walk forward from the stored cursor until the
        // database yields fewer than `limit` new rows.
        if let Some(cursor) = self.cursor.clone() {
            let mut after = cursor;
            loop {
                let mut filter = self.filter.clone();
                filter.after = Some(after.clone());
                let page = self
                    .db
                    .fetch_tool_calls(&filter, false, Some(self.limit), None)?;
                let page_len = page.len() as u64;
                if let Some(last) = page.last() {
                    if let Some(created_at) = &last.created_at {
                        after = (created_at.clone(), last.call_id.clone());
                    }
                }
                candidates.extend(page);
                if page_len < self.limit {
                    break;
                }
            }
        }

        // The two phases overlap and arrive out of order; emit in
        // total (created_at, call_id) order.
        candidates.sort_by(|a, b| {
            (a.created_at.as_deref(), a.call_id.as_str())
                .cmp(&(b.created_at.as_deref(), b.call_id.as_str()))
        });

        // Advance the cursor to the newest row observed this tick.
        for row in &candidates {
            if let Some(created_at) = &row.created_at {
                let key = (created_at.clone(), row.call_id.clone());
                if self.cursor.as_ref().is_none_or(|cur| key > *cur) {
                    self.cursor = Some(key);
                }
            }
        }

        // Emit a row only when its fingerprint differs from the prior
        // fingerprint for that call.
        let mut out = Vec::new();
        for row in candidates {
            let fingerprint = row.fingerprint();
            match self.fingerprints.get(&row.call_id) {
                Some(prev) if *prev == fingerprint => continue,
                _ => {
                    self.fingerprints
                        .insert(row.call_id.clone(), fingerprint);
                    out.push(row);
                }
            }
        }
        Ok(out)
    }
}
