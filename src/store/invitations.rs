//! Invitation ledger: token-addressed, expiring, resend-throttled proposals
//!
//! Only token state lives here. Delivery is the mailer's concern and the
//! final "used" latch is flipped by the handover service inside its own
//! transaction.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqliteConnection;

use super::users;
use crate::error::{HandoverError, Result};
use crate::models::{Invitation, InvitationId, Profile, Role, UserId};
use crate::token;

/// Everything needed to propose a handover by invitation
#[derive(Debug, Clone)]
pub struct NewInvitation {
    pub profile: Profile,
    pub role: Role,
    pub reason: Option<String>,
    pub invited_by: UserId,
}

/// Create a fresh invitation with an unguessable token.
///
/// Must run inside a transaction. The row is inserted first so the write
/// lock is held while the blocking checks run; on `EmailAlreadyRegistered`
/// or `DuplicateInvite` the caller's rollback leaves zero rows behind.
pub async fn create(
    conn: &mut SqliteConnection,
    new: &NewInvitation,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<Invitation> {
    let profile = new.profile.clone().normalized();
    let token = token::generate();
    let expires_at = now + ttl;

    let id = sqlx::query(
        r#"
        INSERT INTO invitation_tokens
            (token, email, role, first_name, middle_name, last_name, reason, invited_by, expires_at, send_count, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(&token)
    .bind(&profile.email)
    .bind(new.role.as_str())
    .bind(&profile.first_name)
    .bind(&profile.middle_name)
    .bind(&profile.last_name)
    .bind(&new.reason)
    .bind(new.invited_by)
    .bind(expires_at)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    if users::find_by_email(&mut *conn, &profile.email).await?.is_some() {
        return Err(HandoverError::EmailAlreadyRegistered);
    }

    let competing = unused_for_email(&mut *conn, &profile.email).await?;
    if competing.iter().any(|inv| inv.id != id && inv.is_valid(now)) {
        return Err(HandoverError::DuplicateInvite);
    }

    Ok(Invitation {
        id,
        token,
        email: profile.email,
        role: new.role,
        first_name: profile.first_name,
        middle_name: profile.middle_name,
        last_name: profile.last_name,
        reason: new.reason.clone(),
        invited_by: new.invited_by,
        expires_at,
        used_at: None,
        last_sent_at: None,
        send_count: 0,
        created_at: now,
    })
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: InvitationId) -> Result<Option<Invitation>> {
    let row = sqlx::query_as::<_, InvitationRow>(&format!("{} WHERE id = ?", SELECT_INVITATION))
        .bind(id)
        .fetch_optional(conn)
        .await?;

    row.map(Invitation::try_from).transpose()
}

/// Raw lookup regardless of validity
pub async fn find_by_token(conn: &mut SqliteConnection, token: &str) -> Result<Option<Invitation>> {
    let row = sqlx::query_as::<_, InvitationRow>(&format!("{} WHERE token = ?", SELECT_INVITATION))
        .bind(token)
        .fetch_optional(conn)
        .await?;

    row.map(Invitation::try_from).transpose()
}

/// Lookup that only returns invitations satisfying the validity predicate.
///
/// Expired, used and unknown tokens are indistinguishable to the caller;
/// only the log says which it was.
pub async fn find_valid(
    conn: &mut SqliteConnection,
    token: &str,
    now: DateTime<Utc>,
) -> Result<Option<Invitation>> {
    match find_by_token(conn, token).await? {
        Some(inv) if inv.is_valid(now) => Ok(Some(inv)),
        Some(inv) => {
            tracing::warn!(
                invitation_id = inv.id,
                expired = inv.is_expired(now),
                used = inv.used_at.is_some(),
                "Rejected invitation token"
            );
            Ok(None)
        }
        None => {
            tracing::warn!("Rejected unknown invitation token");
            Ok(None)
        }
    }
}

/// The most recent still-valid invitation for `email`
pub async fn latest_pending_for_email(
    conn: &mut SqliteConnection,
    email: &str,
    now: DateTime<Utc>,
) -> Result<Option<Invitation>> {
    let mut candidates = unused_for_email(conn, email).await?;
    candidates.retain(|inv| inv.is_valid(now));
    Ok(candidates.into_iter().max_by_key(|inv| inv.id))
}

async fn unused_for_email(conn: &mut SqliteConnection, email: &str) -> Result<Vec<Invitation>> {
    let rows = sqlx::query_as::<_, InvitationRow>(&format!(
        "{} WHERE email = ? AND used_at IS NULL ORDER BY id ASC",
        SELECT_INVITATION
    ))
    .bind(email.trim().to_lowercase())
    .fetch_all(conn)
    .await?;

    rows.into_iter().map(|r| r.try_into()).collect()
}

/// Stamp the first delivery of a freshly created invitation
pub async fn mark_as_sent(
    conn: &mut SqliteConnection,
    invitation: &Invitation,
    now: DateTime<Utc>,
) -> Result<Invitation> {
    sqlx::query(
        r#"
        UPDATE invitation_tokens SET last_sent_at = ?, send_count = send_count + 1 WHERE id = ?
        "#,
    )
    .bind(now)
    .bind(invitation.id)
    .execute(conn)
    .await?;

    Ok(Invitation {
        last_sent_at: Some(now),
        send_count: invitation.send_count + 1,
        ..invitation.clone()
    })
}

/// Claim a resend slot.
///
/// The update is conditional on the `send_count` the caller observed, so of
/// two concurrent resends only one passes; the other sees `CooldownActive`.
pub async fn mark_as_resent(
    conn: &mut SqliteConnection,
    invitation: &Invitation,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Result<Invitation> {
    if !invitation.is_valid(now) {
        return Err(HandoverError::InvitationExpiredOrUsed);
    }
    if !invitation.can_be_resent(now, cooldown) {
        return Err(HandoverError::CooldownActive {
            next_eligible_at: invitation.next_send_at(cooldown).unwrap_or(now),
        });
    }

    let result = sqlx::query(
        r#"
        UPDATE invitation_tokens
        SET last_sent_at = ?, send_count = send_count + 1
        WHERE id = ? AND send_count = ? AND used_at IS NULL
        "#,
    )
    .bind(now)
    .bind(invitation.id)
    .bind(invitation.send_count)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(HandoverError::CooldownActive {
            next_eligible_at: now + cooldown,
        });
    }

    Ok(Invitation {
        last_sent_at: Some(now),
        send_count: invitation.send_count + 1,
        ..invitation.clone()
    })
}

/// Undo a resend claim whose delivery failed, restoring `previous` state.
///
/// Keyed on the claimed `send_count` so a later successful claim is never
/// clobbered.
pub async fn revert_resend(
    conn: &mut SqliteConnection,
    claimed: &Invitation,
    previous: &Invitation,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE invitation_tokens
        SET last_sent_at = ?, send_count = ?
        WHERE id = ? AND send_count = ?
        "#,
    )
    .bind(previous.last_sent_at)
    .bind(previous.send_count)
    .bind(claimed.id)
    .bind(claimed.send_count)
    .execute(conn)
    .await?;

    Ok(())
}

/// One-way latch. Fails if the invitation was already used.
pub async fn mark_as_used(
    conn: &mut SqliteConnection,
    invitation: &Invitation,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE invitation_tokens SET used_at = ? WHERE id = ? AND used_at IS NULL
        "#,
    )
    .bind(now)
    .bind(invitation.id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(HandoverError::InvitationExpiredOrUsed);
    }
    Ok(())
}

/// Invalidate an unused invitation immediately; the row is kept for audit
pub async fn expire_now(conn: &mut SqliteConnection, id: InvitationId, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE invitation_tokens SET expires_at = ? WHERE id = ? AND used_at IS NULL
        "#,
    )
    .bind(now)
    .bind(id)
    .execute(conn)
    .await?;

    Ok(())
}

const SELECT_INVITATION: &str = r#"
    SELECT id, token, email, role, first_name, middle_name, last_name, reason, invited_by,
           expires_at, used_at, last_sent_at, send_count, created_at
    FROM invitation_tokens
"#;

#[derive(sqlx::FromRow)]
struct InvitationRow {
    id: i64,
    token: String,
    email: String,
    role: String,
    first_name: String,
    middle_name: Option<String>,
    last_name: String,
    reason: Option<String>,
    invited_by: i64,
    expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    last_sent_at: Option<DateTime<Utc>>,
    send_count: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<InvitationRow> for Invitation {
    type Error = HandoverError;

    fn try_from(row: InvitationRow) -> Result<Self> {
        Ok(Invitation {
            id: row.id,
            token: row.token,
            email: row.email,
            role: row
                .role
                .parse()
                .map_err(|e| HandoverError::Internal(format!("Invalid invitation role: {}", e)))?,
            first_name: row.first_name,
            middle_name: row.middle_name,
            last_name: row.last_name,
            reason: row.reason,
            invited_by: row.invited_by,
            expires_at: row.expires_at,
            used_at: row.used_at,
            last_sent_at: row.last_sent_at,
            send_count: row.send_count,
            created_at: row.created_at,
        })
    }
}
