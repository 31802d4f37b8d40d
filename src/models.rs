//! Data models for roles, users, handovers, invitations and approvals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type RecordId = i64;
pub type InvitationId = i64;

/// Singleton administrative roles: exactly one active holder at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Dean,
    AssociateDean,
    AdminAssistant,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Dean, Role::AssociateDean, Role::AdminAssistant];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Dean => "dean",
            Role::AssociateDean => "associate_dean",
            Role::AdminAssistant => "admin_assistant",
        }
    }

    /// Parse a role name from a request, rejecting anything that is not a
    /// singleton role with `InvalidRole`
    pub fn from_name(name: &str) -> crate::error::Result<Role> {
        name.parse()
            .map_err(|_| crate::error::HandoverError::InvalidRole(name.to_string()))
    }

    /// Human-readable title used in invitation emails
    pub fn title(&self) -> &'static str {
        match self {
            Role::Dean => "Dean",
            Role::AssociateDean => "Associate Dean",
            Role::AdminAssistant => "Admin Assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dean" => Ok(Role::Dean),
            "associate_dean" => Ok(Role::AssociateDean),
            "admin_assistant" => Ok(Role::AdminAssistant),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

const INACTIVE_PREFIX: &str = "inactive_";

/// Role attribute on a user record.
///
/// Distinct from active authority, which is tracked by the role ledger.
/// A departed holder keeps their identity as `Inactive(role)` so they no
/// longer match an eligibility check for that role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRole {
    Active(Role),
    Inactive(Role),
    /// Non-singleton portal roles (faculty, staff, ...) not governed here
    Other(String),
}

impl UserRole {
    pub fn to_db(&self) -> String {
        match self {
            UserRole::Active(role) => role.as_str().to_string(),
            UserRole::Inactive(role) => format!("{}{}", INACTIVE_PREFIX, role.as_str()),
            UserRole::Other(name) => name.clone(),
        }
    }

    pub fn from_db(s: &str) -> Self {
        if let Ok(role) = s.parse() {
            return UserRole::Active(role);
        }
        if let Some(role) = s
            .strip_prefix(INACTIVE_PREFIX)
            .and_then(|rest| rest.parse().ok())
        {
            return UserRole::Inactive(role);
        }
        UserRole::Other(s.to_string())
    }

    /// The demoted form of this attribute; only active singleton roles change
    pub fn demoted(&self) -> Self {
        match self {
            UserRole::Active(role) => UserRole::Inactive(*role),
            other => other.clone(),
        }
    }

    pub fn is_active(&self, role: Role) -> bool {
        matches!(self, UserRole::Active(r) if *r == role)
    }
}

impl Serialize for UserRole {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_db())
    }
}

impl<'de> Deserialize<'de> for UserRole {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(UserRole::from_db(&s))
    }
}

/// A user record from the portal directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    pub last_name: String,
    pub role: UserRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        match &self.middle_name {
            Some(middle) if !middle.is_empty() => {
                format!("{} {} {}", self.first_name, middle, self.last_name)
            }
            _ => format!("{} {}", self.first_name, self.last_name),
        }
    }
}

/// Email and name fields for a user-to-be
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub email: String,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    pub last_name: String,
}

impl Profile {
    /// Trim names and lowercase the email so lookups are case-insensitive
    pub fn normalized(mut self) -> Self {
        self.email = self.email.trim().to_lowercase();
        self.first_name = self.first_name.trim().to_string();
        self.last_name = self.last_name.trim().to_string();
        self.middle_name = self
            .middle_name
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        self
    }
}

/// Fields needed to insert a user record
#[derive(Debug, Clone)]
pub struct NewUser {
    pub profile: Profile,
    pub role: UserRole,
    /// Already-hashed credential; hashing belongs to the auth layer
    pub credential: String,
    pub verified: bool,
}

/// Role ledger entry: who currently holds a singleton role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSlot {
    pub role: Role,
    pub holder_id: UserId,
    pub assumed_at: DateTime<Utc>,
}

/// Immutable audit entry for a completed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoverRecord {
    pub id: RecordId,
    pub role: Role,
    pub from_user_id: Option<UserId>,
    pub to_user_id: UserId,
    pub performed_by: Option<UserId>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A proposal for a future handover, addressed by an emailed token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub id: InvitationId,
    /// Sole credential for acceptance; never serialized back to clients
    #[serde(skip_serializing, default)]
    pub token: String,
    pub email: String,
    pub role: Role,
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub invited_by: UserId,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sent_at: Option<DateTime<Utc>>,
    pub send_count: i64,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now && self.used_at.is_none()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Earliest time a resend is allowed, ignoring validity
    pub fn next_send_at(&self, cooldown: chrono::Duration) -> Option<DateTime<Utc>> {
        self.last_sent_at.map(|at| at + cooldown)
    }

    pub fn can_be_resent(&self, now: DateTime<Utc>, cooldown: chrono::Duration) -> bool {
        self.is_valid(now)
            && match self.next_send_at(cooldown) {
                None => true,
                Some(next) => now >= next,
            }
    }

    pub fn profile(&self) -> Profile {
        Profile {
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            middle_name: self.middle_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}

/// Status of an approval record owned by the approval workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a decision; the only status eligible for reassignment
    Pending,
    Approved,
    Rejected,
    Returned,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Returned => "returned",
        }
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            "returned" => Ok(ApprovalStatus::Returned),
            _ => Err(format!("Invalid approval status: {}", s)),
        }
    }
}

/// An outstanding approval step (activity plan, budget, equipment request...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: i64,
    pub subject_kind: String,
    pub subject_id: i64,
    pub approver_role: Role,
    pub approver_id: Option<UserId>,
    pub status: ApprovalStatus,
}
