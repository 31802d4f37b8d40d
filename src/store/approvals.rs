//! Reassignment of awaiting-decision approvals on handover
//!
//! Approval rows belong to the approval workflow. This module only ever
//! writes `approver_id`, and only for awaiting-decision rows of one role.

use sqlx::SqliteConnection;

use crate::error::{HandoverError, Result};
use crate::models::{ApprovalStatus, PendingApproval, Role, UserId};

/// Point every awaiting-decision approval of `role` that belongs to `from`
/// (or to nobody) at `to`, in one set-based update.
///
/// With `from = None` (first-ever holder) only unassigned rows move.
/// Returns the number of rows updated.
pub async fn reassign(
    conn: &mut SqliteConnection,
    role: Role,
    from: Option<UserId>,
    to: UserId,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE pending_approvals
        SET approver_id = ?1
        WHERE approver_role = ?2
          AND status = ?3
          AND (approver_id IS NULL OR (approver_id = ?4 AND approver_id <> ?1))
        "#,
    )
    .bind(to)
    .bind(role.as_str())
    .bind(ApprovalStatus::Pending.as_str())
    .bind(from)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Awaiting-decision approvals routed to `role`, oldest first
pub async fn awaiting_for(conn: &mut SqliteConnection, role: Role) -> Result<Vec<PendingApproval>> {
    let rows = sqlx::query_as::<_, PendingApprovalRow>(
        r#"
        SELECT id, subject_kind, subject_id, approver_role, approver_id, status
        FROM pending_approvals
        WHERE approver_role = ? AND status = ?
        ORDER BY id ASC
        "#,
    )
    .bind(role.as_str())
    .bind(ApprovalStatus::Pending.as_str())
    .fetch_all(conn)
    .await?;

    rows.into_iter().map(|r| r.try_into()).collect()
}

#[derive(sqlx::FromRow)]
struct PendingApprovalRow {
    id: i64,
    subject_kind: String,
    subject_id: i64,
    approver_role: String,
    approver_id: Option<i64>,
    status: String,
}

impl TryFrom<PendingApprovalRow> for PendingApproval {
    type Error = HandoverError;

    fn try_from(row: PendingApprovalRow) -> Result<Self> {
        Ok(PendingApproval {
            id: row.id,
            subject_kind: row.subject_kind,
            subject_id: row.subject_id,
            approver_role: row
                .approver_role
                .parse()
                .map_err(|e| HandoverError::Internal(format!("Invalid approver role: {}", e)))?,
            approver_id: row.approver_id,
            status: row
                .status
                .parse()
                .map_err(|e| HandoverError::Internal(format!("Invalid approval status: {}", e)))?,
        })
    }
}
