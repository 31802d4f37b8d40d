//! Events broadcast after committed handover state changes

use serde::Serialize;

use crate::models::{InvitationId, RecordId, Role, UserId};

/// Only emitted after the owning transaction commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandoverEvent {
    /// Active authority moved to a new holder
    RoleTransferred {
        role: Role,
        from_user_id: Option<UserId>,
        to_user_id: UserId,
        reassigned: u64,
        record_id: RecordId,
    },
    /// An invitation was created
    InvitationProposed {
        invitation_id: InvitationId,
        role: Role,
        email: String,
        delivered: bool,
    },
    /// An invitation email went out again
    InvitationResent {
        invitation_id: InvitationId,
        send_count: i64,
    },
    /// An invitation was consumed by a completed handover
    InvitationAccepted {
        invitation_id: InvitationId,
        role: Role,
        user_id: UserId,
    },
}
