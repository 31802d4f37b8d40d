//! Role handover orchestration
//!
//! Two flows share one transfer sequence (demote, promote, reassign,
//! audit):
//! - direct handover to an already provisioned user, optionally creating
//!   that user first
//! - invitation handover: propose now by email, complete later when the
//!   invitee accepts the token

pub mod events;
pub mod locks;
pub mod service;

pub use events::HandoverEvent;
pub use locks::RoleLocks;
pub use service::{Authority, Delivery, HandoverOutcome, HandoverService, InvitationReceipt, ResendReceipt};
