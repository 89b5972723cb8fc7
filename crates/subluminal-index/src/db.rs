use rusqlite::Connection;
use std::path::Path;

use crate::queries;
use crate::records::{HintRecord, PreviewRecord, RunRecord, ToolCallRecord};
use crate::schema;
use crate::Result;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let db = Self { conn };
        schema::init_schema(&db.conn)?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        schema::init_schema(&db.conn)?;
        Ok(db)
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        queries::run::get(&self.conn, run_id)
    }

    /// Resolve a run by ID prefix (supports short IDs like "7f2abd2d").
    pub fn find_run_by_prefix(&self, prefix: &str) -> Result<Option<String>> {
        queries::run::find_by_prefix(&self.conn, prefix)
    }

    pub fn fetch_tool_calls(
        &self,
        filter: &queries::tool_call::ToolCallFilter,
        order_desc: bool,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<ToolCallRecord>> {
        queries::tool_call::fetch(&self.conn, filter, order_desc, limit, offset)
    }

    pub fn get_preview(&self, call_id: &str) -> Result<Option<PreviewRecord>> {
        queries::side::get_preview(&self.conn, call_id)
    }

    pub fn get_hint(&self, call_id: &str) -> Result<Option<HintRecord>> {
        queries::side::get_hint(&self.conn, call_id)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
