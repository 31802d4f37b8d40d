//! Handover service: the transactional use-case layer
//!
//! Every operation that moves active authority runs as one SQLite
//! transaction behind the per-role lock: lock the ledger row, read the
//! current holder, demote, promote, reassign pending approvals, append the
//! audit record and, for invitations, latch the token as used. Any error
//! rolls the whole unit back.
//!
//! Invitation delivery is deliberately outside those transactions. Token
//! state is committed first; the email goes out afterwards and a delivery
//! failure only ever restores the token to its pre-send state.

use std::sync::Arc;

use serde::Serialize;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tokio::sync::broadcast;

use super::events::HandoverEvent;
use super::locks::RoleLocks;
use crate::clock::{Clock, SystemClock};
use crate::config::{HandoverSettings, InitialDeliveryPolicy};
use crate::error::{HandoverError, Result};
use crate::mailer::{ActivationUrls, InvitationEmail, Mailer};
use crate::models::{
    HandoverRecord, Invitation, NewUser, Profile, Role, User, UserId, UserRole,
};
use crate::store::audit::AuditEntry;
use crate::store::invitations::NewInvitation;
use crate::store::{approvals, audit, invitations, ledger, users, Store};
use crate::token;

/// Result of a completed transfer
#[derive(Debug, Clone, Serialize)]
pub struct HandoverOutcome {
    pub role: Role,
    pub from_user_id: Option<UserId>,
    pub to_user_id: UserId,
    /// Awaiting-decision approvals now pointing at the new holder
    pub reassigned: u64,
    pub record: HandoverRecord,
}

/// Whether an invitation email actually went out
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delivery {
    Sent,
    /// Warning-level: committed token state is untouched by this failure
    Failed { reason: String },
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvitationReceipt {
    pub invitation: Invitation,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResendReceipt {
    pub invitation: Invitation,
    pub delivery: Delivery,
}

/// On whose authority a handover runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// The current holder, checked against the ledger under the role lock
    Holder(UserId),
    /// Operator tooling, which may also seat a role that has no holder.
    /// The id, when given, is only recorded as the performer.
    Operator(Option<UserId>),
}

impl Authority {
    pub fn performed_by(&self) -> Option<UserId> {
        match self {
            Authority::Holder(id) => Some(*id),
            Authority::Operator(id) => *id,
        }
    }
}

/// One demote/promote/reassign/audit step
struct Transfer<'a> {
    role: Role,
    to: UserId,
    performed_by: Option<UserId>,
    reason: Option<&'a str>,
}

/// Orchestrates role handovers and invitations
pub struct HandoverService {
    store: Store,
    mailer: Arc<dyn Mailer>,
    urls: ActivationUrls,
    clock: Arc<dyn Clock>,
    settings: HandoverSettings,
    locks: RoleLocks,
    event_tx: broadcast::Sender<HandoverEvent>,
}

impl HandoverService {
    pub fn new(store: Store, mailer: Arc<dyn Mailer>, urls: ActivationUrls) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            store,
            mailer,
            urls,
            clock: Arc::new(SystemClock),
            settings: HandoverSettings::default(),
            locks: RoleLocks::new(),
            event_tx,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: HandoverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn settings(&self) -> &HandoverSettings {
        &self.settings
    }

    /// Subscribe to committed handover events
    pub fn subscribe(&self) -> broadcast::Receiver<HandoverEvent> {
        self.event_tx.subscribe()
    }

    // Direct flows

    /// Hand `role` to an existing user whose role attribute is already
    /// `role`. Demotes the previous holder, moves their awaiting approvals
    /// (and unassigned ones) to the new holder and records the transfer.
    pub async fn handover_role(
        &self,
        role: Role,
        new_user_id: UserId,
        authority: Authority,
        reason: Option<String>,
    ) -> Result<HandoverOutcome> {
        let _guard = self.locks.acquire(role).await;
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let result = async {
            ledger::lock_slot(&mut tx, role).await?;
            ensure_authority(&mut tx, role, authority).await?;

            let user = users::find_by_id(&mut tx, new_user_id)
                .await?
                .ok_or(HandoverError::UserNotFound(new_user_id))?;
            ensure_provisioned(&user, role)?;

            transfer(
                &mut tx,
                &Transfer {
                    role,
                    to: user.id,
                    performed_by: authority.performed_by(),
                    reason: reason.as_deref(),
                },
                now,
            )
            .await
        }
        .await;

        let outcome = finish(tx, result).await?;
        self.announce_transfer(&outcome);
        Ok(outcome)
    }

    /// Create a brand-new, pre-verified officer with a placeholder
    /// credential and hand `role` to them in the same transaction.
    pub async fn create_and_handover(
        &self,
        role: Role,
        profile: Profile,
        authority: Authority,
        reason: Option<String>,
    ) -> Result<(User, HandoverOutcome)> {
        let _guard = self.locks.acquire(role).await;
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let result = async {
            ledger::lock_slot(&mut tx, role).await?;
            ensure_authority(&mut tx, role, authority).await?;

            let user = users::create(
                &mut tx,
                &NewUser {
                    profile,
                    role: UserRole::Active(role),
                    credential: token::unusable_credential(),
                    verified: true,
                },
                now,
            )
            .await?;

            let outcome = transfer(
                &mut tx,
                &Transfer {
                    role,
                    to: user.id,
                    performed_by: authority.performed_by(),
                    reason: reason.as_deref(),
                },
                now,
            )
            .await?;

            Ok::<_, HandoverError>((user, outcome))
        }
        .await;

        let (user, outcome) = finish(tx, result).await?;
        tracing::info!(role = %role, user_id = user.id, "Created new officer for handover");
        self.announce_transfer(&outcome);
        Ok((user, outcome))
    }

    // Invitation flows

    /// Propose a handover by emailing an activation link.
    ///
    /// Only the current holder may propose. The check, token creation and
    /// send stamp share one transaction; the email goes out after commit.
    /// Nothing about the role itself changes until acceptance.
    pub async fn propose_invitation(
        &self,
        role: Role,
        profile: Profile,
        performed_by: UserId,
        reason: Option<String>,
    ) -> Result<InvitationReceipt> {
        let guard = self.locks.acquire(role).await;
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let result = async {
            ledger::lock_slot(&mut tx, role).await?;
            ensure_authority(&mut tx, role, Authority::Holder(performed_by)).await?;
            let inviter = users::find_by_id(&mut tx, performed_by)
                .await?
                .ok_or(HandoverError::UserNotFound(performed_by))?;

            let created = invitations::create(
                &mut tx,
                &NewInvitation {
                    profile,
                    role,
                    reason,
                    invited_by: performed_by,
                },
                now,
                self.settings.invitation_ttl,
            )
            .await?;
            let stamped = invitations::mark_as_sent(&mut tx, &created, now).await?;
            Ok::<_, HandoverError>((inviter, created, stamped))
        }
        .await;
        let (inviter, created, stamped) = finish(tx, result).await?;
        drop(guard);

        tracing::info!(
            invitation_id = stamped.id,
            role = %role,
            invited_by = performed_by,
            "Proposed invitation handover"
        );

        let email = InvitationEmail::for_invitation(&stamped, &inviter.full_name(), &self.urls, false);
        let (invitation, delivery) = match self.mailer.send(&email).await {
            Ok(()) => (stamped, Delivery::Sent),
            Err(e) => {
                tracing::warn!(invitation_id = stamped.id, "Invitation email failed: {}", e);
                self.settle_failed_delivery(&stamped, &created, now)
                    .await
                    .map_err(|settle_err| {
                        tracing::error!(
                            invitation_id = stamped.id,
                            delivery_error = %e,
                            "Could not settle invitation after failed email: {}",
                            settle_err
                        );
                        let detail = match &e {
                            HandoverError::Delivery(message) => message.clone(),
                            other => other.to_string(),
                        };
                        HandoverError::Delivery(format!("{}; the invitation still counts as sent", detail))
                    })?;
                match self.settings.initial_delivery {
                    InitialDeliveryPolicy::Strict => return Err(e),
                    InitialDeliveryPolicy::KeepToken => {
                        (
                            created,
                            Delivery::Failed {
                                reason: e.to_string(),
                            },
                        )
                    }
                }
            }
        };

        let _ = self.event_tx.send(HandoverEvent::InvitationProposed {
            invitation_id: invitation.id,
            role,
            email: invitation.email.clone(),
            delivered: delivery.is_sent(),
        });

        Ok(InvitationReceipt {
            invitation,
            delivery,
        })
    }

    /// Undo the send stamp of a first email that never went out. Under the
    /// strict policy the token is voided instead.
    async fn settle_failed_delivery(
        &self,
        stamped: &Invitation,
        created: &Invitation,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let mut conn = self.store.pool().acquire().await?;
        match self.settings.initial_delivery {
            InitialDeliveryPolicy::Strict => invitations::expire_now(&mut conn, stamped.id, now).await,
            // Clear the send stamp so an operator can resend right away
            InitialDeliveryPolicy::KeepToken => invitations::revert_resend(&mut conn, stamped, created).await,
        }
    }

    /// Send the latest pending invitation for `email` again.
    ///
    /// Only the original inviter may resend. The send slot is claimed with
    /// a conditional update before dispatch so concurrent resends cannot
    /// both get through the cooldown; a failed dispatch releases the claim.
    pub async fn resend_invitation(&self, email: &str, requesting_user_id: UserId) -> Result<ResendReceipt> {
        let now = self.clock.now();
        let mut conn = self.store.pool().acquire().await?;

        let pending = invitations::latest_pending_for_email(&mut conn, email, now)
            .await?
            .ok_or_else(|| HandoverError::NotFound(format!("No pending invitation for {}", email)))?;

        if pending.invited_by != requesting_user_id {
            return Err(HandoverError::NotAuthorized(
                "only the original inviter can resend this invitation".to_string(),
            ));
        }

        let claimed =
            invitations::mark_as_resent(&mut conn, &pending, now, self.settings.resend_cooldown).await?;

        let inviter_name = users::find_by_id(&mut conn, pending.invited_by)
            .await?
            .map(|u| u.full_name())
            .unwrap_or_default();
        drop(conn);

        let email = InvitationEmail::for_invitation(&claimed, &inviter_name, &self.urls, true);
        match self.mailer.send(&email).await {
            Ok(()) => {
                tracing::info!(
                    invitation_id = claimed.id,
                    send_count = claimed.send_count,
                    "Resent invitation"
                );
                let _ = self.event_tx.send(HandoverEvent::InvitationResent {
                    invitation_id: claimed.id,
                    send_count: claimed.send_count,
                });
                Ok(ResendReceipt {
                    invitation: claimed,
                    delivery: Delivery::Sent,
                })
            }
            Err(e) => {
                tracing::warn!(invitation_id = claimed.id, "Invitation resend failed: {}", e);
                let mut conn = self.store.pool().acquire().await?;
                invitations::revert_resend(&mut conn, &claimed, &pending).await?;
                Ok(ResendReceipt {
                    invitation: pending,
                    delivery: Delivery::Failed {
                        reason: e.to_string(),
                    },
                })
            }
        }
    }

    /// Look up a token for the activation page.
    ///
    /// Expired, used and unknown tokens all come back as `NotFound`.
    pub async fn inspect_invitation(&self, token: &str) -> Result<Invitation> {
        let now = self.clock.now();
        let mut conn = self.store.pool().acquire().await?;
        invitations::find_valid(&mut conn, token, now)
            .await?
            .ok_or_else(|| HandoverError::NotFound("Invitation not found".to_string()))
    }

    /// Complete an invitation handover to `new_user_id`, who must already
    /// carry the invited role attribute.
    ///
    /// The transfer is attributed to the original inviter with the stored
    /// reason, and the token is latched as used in the same transaction. If
    /// anything fails the invitation stays valid and the call can be retried.
    pub async fn complete_invitation(
        &self,
        invitation: &Invitation,
        new_user_id: UserId,
    ) -> Result<HandoverOutcome> {
        let _guard = self.locks.acquire(invitation.role).await;
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let result = async {
            ledger::lock_slot(&mut tx, invitation.role).await?;
            let current = revalidate(&mut tx, invitation.id, now).await?;

            let user = users::find_by_id(&mut tx, new_user_id)
                .await?
                .ok_or(HandoverError::UserNotFound(new_user_id))?;
            ensure_provisioned(&user, current.role)?;

            complete_in_tx(&mut tx, &current, &user, now).await
        }
        .await;

        let outcome = finish(tx, result).await?;
        self.announce_acceptance(invitation, &outcome);
        Ok(outcome)
    }

    /// The activation-link landing step: create the invitee's account from
    /// the invitation profile with the credential they just chose, then
    /// complete the handover, all in one transaction.
    pub async fn accept_invitation(&self, token: &str, credential: String) -> Result<(User, HandoverOutcome)> {
        let now = self.clock.now();
        let invitation = {
            let mut conn = self.store.pool().acquire().await?;
            invitations::find_valid(&mut conn, token, now)
                .await?
                .ok_or(HandoverError::InvitationExpiredOrUsed)?
        };

        let _guard = self.locks.acquire(invitation.role).await;

        let mut tx = self.store.begin().await?;
        let result = async {
            ledger::lock_slot(&mut tx, invitation.role).await?;
            let current = revalidate(&mut tx, invitation.id, now).await?;

            let user = users::create(
                &mut tx,
                &NewUser {
                    profile: current.profile(),
                    role: UserRole::Active(current.role),
                    credential,
                    verified: true,
                },
                now,
            )
            .await?;

            let outcome = complete_in_tx(&mut tx, &current, &user, now).await?;
            Ok::<_, HandoverError>((user, outcome))
        }
        .await;

        let (user, outcome) = finish(tx, result).await?;
        self.announce_acceptance(&invitation, &outcome);
        Ok((user, outcome))
    }

    fn announce_transfer(&self, outcome: &HandoverOutcome) {
        tracing::info!(
            role = %outcome.role,
            from = ?outcome.from_user_id,
            to = outcome.to_user_id,
            reassigned = outcome.reassigned,
            record_id = outcome.record.id,
            "Role handed over"
        );
        let _ = self.event_tx.send(HandoverEvent::RoleTransferred {
            role: outcome.role,
            from_user_id: outcome.from_user_id,
            to_user_id: outcome.to_user_id,
            reassigned: outcome.reassigned,
            record_id: outcome.record.id,
        });
    }

    fn announce_acceptance(&self, invitation: &Invitation, outcome: &HandoverOutcome) {
        self.announce_transfer(outcome);
        let _ = self.event_tx.send(HandoverEvent::InvitationAccepted {
            invitation_id: invitation.id,
            role: invitation.role,
            user_id: outcome.to_user_id,
        });
    }
}

/// Commit on success, roll back explicitly on failure
async fn finish<T>(tx: Transaction<'static, Sqlite>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!("Rollback failed after {}: {}", e, rollback_err);
            }
            Err(e)
        }
    }
}

/// Check the caller against the ledger. Must run after `ledger::lock_slot`
/// so the holder cannot change before the transaction commits.
async fn ensure_authority(conn: &mut SqliteConnection, role: Role, authority: Authority) -> Result<()> {
    let actor = match authority {
        Authority::Holder(actor) => actor,
        Authority::Operator(_) => return Ok(()),
    };
    match ledger::current_holder_id(conn, role).await? {
        Some(holder) if holder == actor => Ok(()),
        Some(_) => Err(HandoverError::NotAuthorized(format!(
            "only the current {} may hand over this role",
            role.title()
        ))),
        None => Err(HandoverError::NotAuthorized(format!(
            "{} has no holder yet; assign it with the operator tool",
            role.title()
        ))),
    }
}

/// The new holder must already carry the active role attribute
fn ensure_provisioned(user: &User, role: Role) -> Result<()> {
    if user.role.is_active(role) {
        Ok(())
    } else {
        Err(HandoverError::RoleMismatch {
            user_id: user.id,
            role,
        })
    }
}

/// Re-read an invitation under the role lock and insist it is still valid
async fn revalidate(
    conn: &mut SqliteConnection,
    id: crate::models::InvitationId,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Invitation> {
    match invitations::find_by_id(conn, id).await? {
        Some(inv) if inv.is_valid(now) => Ok(inv),
        _ => Err(HandoverError::InvitationExpiredOrUsed),
    }
}

async fn complete_in_tx(
    conn: &mut SqliteConnection,
    invitation: &Invitation,
    user: &User,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<HandoverOutcome> {
    let outcome = transfer(
        &mut *conn,
        &Transfer {
            role: invitation.role,
            to: user.id,
            performed_by: Some(invitation.invited_by),
            reason: invitation.reason.as_deref(),
        },
        now,
    )
    .await?;

    invitations::mark_as_used(conn, invitation, now).await?;
    Ok(outcome)
}

/// The single demote/promote/reassign/audit sequence both flows share.
///
/// Runs on the caller's transaction after `ledger::lock_slot`, and has no
/// effects outside it.
async fn transfer(
    conn: &mut SqliteConnection,
    req: &Transfer<'_>,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<HandoverOutcome> {
    let from = ledger::current_holder_id(&mut *conn, req.role).await?;

    if let Some(old_id) = from.filter(|id| *id != req.to) {
        match users::find_by_id(&mut *conn, old_id).await? {
            Some(old) if old.role.is_active(req.role) => {
                users::update_role(&mut *conn, old_id, &old.role.demoted(), now).await?;
            }
            Some(old) => {
                tracing::warn!(
                    user_id = old_id,
                    role = %req.role,
                    attribute = %old.role.to_db(),
                    "Departing holder no longer carried the active role attribute"
                );
            }
            None => {
                tracing::warn!(user_id = old_id, role = %req.role, "Departing holder record is missing");
            }
        }
    }

    ledger::set_holder(&mut *conn, req.role, req.to, now).await?;
    let reassigned = approvals::reassign(&mut *conn, req.role, from, req.to).await?;

    let entry = AuditEntry {
        role: req.role,
        from_user_id: from,
        to_user_id: req.to,
        performed_by: req.performed_by,
        reason: req.reason,
    };
    let record_id = audit::append(conn, &entry, now).await?;

    Ok(HandoverOutcome {
        role: req.role,
        from_user_id: from,
        to_user_id: req.to,
        reassigned,
        record: HandoverRecord {
            id: record_id,
            role: req.role,
            from_user_id: from,
            to_user_id: req.to,
            performed_by: req.performed_by,
            reason: req.reason.map(str::to_string),
            created_at: now,
        },
    })
}
