// Side tables keyed by call_id (previews, hints) and the
// (policy_id, version) registry. All upserts tolerate repeats and
// COALESCE first-write values.

use rusqlite::{Connection, OptionalExtension, params};

use crate::Result;
use crate::records::{HintRecord, PolicyVersionRecord, PreviewRecord};

pub fn upsert_args_preview(
    conn: &Connection,
    call_id: &str,
    args_preview: &str,
    redaction_flags: Option<&str>,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO previews (call_id, args_preview, redaction_flags)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(call_id) DO UPDATE SET
            args_preview = COALESCE(previews.args_preview, ?2),
            redaction_flags = COALESCE(previews.redaction_flags, ?3)
        "#,
        params![call_id, args_preview, redaction_flags],
    )?;
    Ok(())
}

pub fn upsert_result_preview(
    conn: &Connection,
    call_id: &str,
    result_preview: &str,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO previews (call_id, result_preview)
        VALUES (?1, ?2)
        ON CONFLICT(call_id) DO UPDATE SET
            result_preview = COALESCE(previews.result_preview, ?2)
        "#,
        params![call_id, result_preview],
    )?;
    Ok(())
}

pub fn upsert_hint(conn: &Connection, hint: &HintRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO hints (call_id, hint_text, suggested_args_json, created_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(call_id) DO UPDATE SET
            hint_text = COALESCE(hints.hint_text, ?2),
            suggested_args_json = COALESCE(hints.suggested_args_json, ?3),
            created_at = COALESCE(hints.created_at, ?4)
        "#,
        params![
            &hint.call_id,
            &hint.hint_text,
            &hint.suggested_args_json,
            &hint.created_at
        ],
    )?;
    Ok(())
}

pub fn upsert_policy_version(conn: &Connection, record: &PolicyVersionRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO policy_versions (policy_id, version, mode, rules_hash, rules_json, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(policy_id, version) DO UPDATE SET
            mode = COALESCE(policy_versions.mode, ?3),
            rules_hash = COALESCE(policy_versions.rules_hash, ?4),
            rules_json = COALESCE(policy_versions.rules_json, ?5),
            created_at = COALESCE(policy_versions.created_at, ?6)
        "#,
        params![
            &record.policy_id,
            &record.version,
            &record.mode,
            &record.rules_hash,
            &record.rules_json,
            &record.created_at
        ],
    )?;
    Ok(())
}

pub fn get_preview(conn: &Connection, call_id: &str) -> Result<Option<PreviewRecord>> {
    let record = conn
        .query_row(
            r#"
            SELECT call_id, args_preview, result_preview, redaction_flags
            FROM previews
            WHERE call_id = ?1
            "#,
            [call_id],
            |row| {
                Ok(PreviewRecord {
                    call_id: row.get(0)?,
                    args_preview: row.get(1)?,
                    result_preview: row.get(2)?,
                    redaction_flags: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

pub fn get_hint(conn: &Connection, call_id: &str) -> Result<Option<HintRecord>> {
    let record = conn
        .query_row(
            r#"
            SELECT call_id, hint_text, suggested_args_json, created_at
            FROM hints
            WHERE call_id = ?1
            "#,
            [call_id],
            |row| {
                Ok(HintRecord {
                    call_id: row.get(0)?,
                    hint_text: row.get(1)?,
                    suggested_args_json: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}
