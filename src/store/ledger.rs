//! Role ownership ledger: one row per singleton role naming its holder
//!
//! A pure keyed-singleton store. Business rules live in the handover
//! service, which is the only caller of the mutating functions and always
//! calls them inside its transaction.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::users;
use crate::error::{HandoverError, Result};
use crate::models::{Role, RoleSlot, User, UserId};

/// Take the write lock for `role` before anything in the transaction is read.
///
/// Inserts a holderless placeholder when the role has never been assigned.
/// The placeholder only exists inside the open transaction: either the
/// caller sets a holder before committing or the rollback removes it.
pub async fn lock_slot(conn: &mut SqliteConnection, role: Role) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO role_slots (role, holder_id, assumed_at)
        VALUES (?, NULL, NULL)
        ON CONFLICT(role) DO NOTHING
        "#,
    )
    .bind(role.as_str())
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn get(conn: &mut SqliteConnection, role: Role) -> Result<Option<RoleSlot>> {
    let row = sqlx::query_as::<_, RoleSlotRow>(
        r#"
        SELECT role, holder_id, assumed_at
        FROM role_slots
        WHERE role = ? AND holder_id IS NOT NULL
        "#,
    )
    .bind(role.as_str())
    .fetch_optional(conn)
    .await?;

    row.map(RoleSlot::try_from).transpose()
}

pub async fn current_holder_id(conn: &mut SqliteConnection, role: Role) -> Result<Option<UserId>> {
    Ok(get(conn, role).await?.map(|slot| slot.holder_id))
}

/// Absence means the role has never been assigned
pub async fn current_holder(conn: &mut SqliteConnection, role: Role) -> Result<Option<User>> {
    match current_holder_id(&mut *conn, role).await? {
        Some(id) => users::find_by_id(conn, id).await,
        None => Ok(None),
    }
}

pub async fn is_current_holder(
    conn: &mut SqliteConnection,
    role: Role,
    user_id: UserId,
) -> Result<bool> {
    Ok(current_holder_id(conn, role).await? == Some(user_id))
}

pub async fn set_holder(
    conn: &mut SqliteConnection,
    role: Role,
    user_id: UserId,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO role_slots (role, holder_id, assumed_at)
        VALUES (?, ?, ?)
        ON CONFLICT(role) DO UPDATE SET holder_id = excluded.holder_id, assumed_at = excluded.assumed_at
        "#,
    )
    .bind(role.as_str())
    .bind(user_id)
    .bind(at)
    .execute(conn)
    .await?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct RoleSlotRow {
    role: String,
    holder_id: Option<i64>,
    assumed_at: Option<DateTime<Utc>>,
}

impl TryFrom<RoleSlotRow> for RoleSlot {
    type Error = HandoverError;

    fn try_from(row: RoleSlotRow) -> Result<Self> {
        let role = row
            .role
            .parse()
            .map_err(|e| HandoverError::Internal(format!("Invalid role slot: {}", e)))?;
        let holder_id = row
            .holder_id
            .ok_or_else(|| HandoverError::Internal(format!("Role slot {} has no holder", role)))?;
        let assumed_at = row.assumed_at.ok_or_else(|| {
            HandoverError::Internal(format!("Role slot {} has no assumption time", role))
        })?;

        Ok(RoleSlot {
            role,
            holder_id,
            assumed_at,
        })
    }
}
