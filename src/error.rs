//! Error types for the handover core

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Role, UserId};

#[derive(Error, Debug)]
pub enum HandoverError {
    // Precondition errors: caller mistakes, nothing was mutated
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("User {user_id} is not provisioned for role {role}")]
    RoleMismatch { user_id: UserId, role: Role },

    #[error("User {0} not found")]
    UserNotFound(UserId),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    // Conflict errors: expected business-rule rejections
    #[error("This email already has a pending invitation")]
    DuplicateInvite,

    #[error("An account with this email already exists")]
    EmailAlreadyRegistered,

    #[error("Invitation is invalid or has expired")]
    InvitationExpiredOrUsed,

    #[error("Invitation was sent recently; try again after {next_eligible_at}")]
    CooldownActive { next_eligible_at: DateTime<Utc> },

    // Infrastructure errors: the whole unit rolled back, safe to retry
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Internal error: {0}")]
    Internal(String),

    // Best-effort external errors
    #[error("Email delivery failed: {0}")]
    Delivery(String),
}

/// Coarse classification used for rendering and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Precondition,
    Conflict,
    Infrastructure,
    External,
}

impl HandoverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandoverError::InvalidRole(_)
            | HandoverError::RoleMismatch { .. }
            | HandoverError::UserNotFound(_)
            | HandoverError::NotFound(_)
            | HandoverError::NotAuthorized(_) => ErrorKind::Precondition,
            HandoverError::DuplicateInvite
            | HandoverError::EmailAlreadyRegistered
            | HandoverError::InvitationExpiredOrUsed
            | HandoverError::CooldownActive { .. } => ErrorKind::Conflict,
            HandoverError::Database(_) | HandoverError::Migrate(_) | HandoverError::Internal(_) => {
                ErrorKind::Infrastructure
            }
            HandoverError::Delivery(_) => ErrorKind::External,
        }
    }

    /// Only infrastructure failures are worth retrying from scratch
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }
}

impl IntoResponse for HandoverError {
    fn into_response(self) -> Response {
        let status = match &self {
            HandoverError::InvalidRole(_) | HandoverError::RoleMismatch { .. } => {
                StatusCode::BAD_REQUEST
            }
            HandoverError::UserNotFound(_) | HandoverError::NotFound(_) => StatusCode::NOT_FOUND,
            HandoverError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            HandoverError::DuplicateInvite
            | HandoverError::EmailAlreadyRegistered
            | HandoverError::InvitationExpiredOrUsed => StatusCode::CONFLICT,
            HandoverError::CooldownActive { .. } => StatusCode::TOO_MANY_REQUESTS,
            HandoverError::Delivery(_) => StatusCode::BAD_GATEWAY,
            HandoverError::Database(_) | HandoverError::Migrate(_) | HandoverError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match self.kind() {
            ErrorKind::Infrastructure => {
                tracing::error!("Infrastructure error: {}", self);
                "Something went wrong on our side. Nothing was changed; please retry.".to_string()
            }
            ErrorKind::External => {
                tracing::warn!("External error: {}", self);
                self.to_string()
            }
            _ => self.to_string(),
        };

        (status, message).into_response()
    }
}

pub type Result<T> = std::result::Result<T, HandoverError>;
