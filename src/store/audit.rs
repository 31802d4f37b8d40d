//! Append-only history of completed role transfers

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::{HandoverError, Result};
use crate::models::{HandoverRecord, RecordId, Role, UserId};

/// Fields of one audit entry, before it has an id
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub role: Role,
    pub from_user_id: Option<UserId>,
    pub to_user_id: UserId,
    pub performed_by: Option<UserId>,
    pub reason: Option<&'a str>,
}

/// Must run in the same transaction as the ledger update it documents
pub async fn append(
    conn: &mut SqliteConnection,
    entry: &AuditEntry<'_>,
    at: DateTime<Utc>,
) -> Result<RecordId> {
    let id = sqlx::query(
        r#"
        INSERT INTO handover_records (role, from_user_id, to_user_id, performed_by, reason, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.role.as_str())
    .bind(entry.from_user_id)
    .bind(entry.to_user_id)
    .bind(entry.performed_by)
    .bind(entry.reason)
    .bind(at)
    .execute(conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn get(conn: &mut SqliteConnection, id: RecordId) -> Result<Option<HandoverRecord>> {
    let row = sqlx::query_as::<_, HandoverRecordRow>(
        r#"
        SELECT id, role, from_user_id, to_user_id, performed_by, reason, created_at
        FROM handover_records
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    row.map(HandoverRecord::try_from).transpose()
}

/// Most recent first
pub async fn history_for(conn: &mut SqliteConnection, role: Role) -> Result<Vec<HandoverRecord>> {
    let rows = sqlx::query_as::<_, HandoverRecordRow>(
        r#"
        SELECT id, role, from_user_id, to_user_id, performed_by, reason, created_at
        FROM handover_records
        WHERE role = ?
        ORDER BY id DESC
        "#,
    )
    .bind(role.as_str())
    .fetch_all(conn)
    .await?;

    rows.into_iter().map(|r| r.try_into()).collect()
}

pub async fn latest_for(conn: &mut SqliteConnection, role: Role) -> Result<Option<RecordId>> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id FROM handover_records WHERE role = ? ORDER BY id DESC LIMIT 1
        "#,
    )
    .bind(role.as_str())
    .fetch_optional(conn)
    .await?;

    Ok(id)
}

#[derive(sqlx::FromRow)]
struct HandoverRecordRow {
    id: i64,
    role: String,
    from_user_id: Option<i64>,
    to_user_id: i64,
    performed_by: Option<i64>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<HandoverRecordRow> for HandoverRecord {
    type Error = HandoverError;

    fn try_from(row: HandoverRecordRow) -> Result<Self> {
        Ok(HandoverRecord {
            id: row.id,
            role: row
                .role
                .parse()
                .map_err(|e| HandoverError::Internal(format!("Invalid audit role: {}", e)))?,
            from_user_id: row.from_user_id,
            to_user_id: row.to_user_id,
            performed_by: row.performed_by,
            reason: row.reason,
            created_at: row.created_at,
        })
    }
}
