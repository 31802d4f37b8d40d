//! Invitation email dispatch
//!
//! Delivery is best-effort and happens outside any transaction. The
//! handover service decides what a failure means for token state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;

use crate::error::{HandoverError, Result};
use crate::models::Invitation;

/// Builds the public, single-use activation link for a token
#[derive(Debug, Clone)]
pub struct ActivationUrls {
    base_url: String,
}

impl ActivationUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    pub fn for_token(&self, token: &str) -> String {
        format!("{}/invitations/{}/accept", self.base_url, token)
    }
}

/// Template data for an invitation email
#[derive(Debug, Clone, Serialize)]
pub struct InvitationEmail {
    pub to: String,
    pub recipient_name: String,
    pub role: String,
    pub role_title: String,
    pub invited_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub activation_url: String,
    pub expires_at: DateTime<Utc>,
    /// True for every send after the first
    pub reminder: bool,
}

impl InvitationEmail {
    pub fn for_invitation(
        invitation: &Invitation,
        inviter_name: &str,
        urls: &ActivationUrls,
        reminder: bool,
    ) -> Self {
        Self {
            to: invitation.email.clone(),
            recipient_name: format!("{} {}", invitation.first_name, invitation.last_name),
            role: invitation.role.as_str().to_string(),
            role_title: invitation.role.title().to_string(),
            invited_by: inviter_name.to_string(),
            reason: invitation.reason.clone(),
            activation_url: urls.for_token(&invitation.token),
            expires_at: invitation.expires_at,
            reminder,
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &InvitationEmail) -> Result<()>;
}

/// Posts invitation emails as JSON to an HTTP mail relay
pub struct HttpMailer {
    client: Client,
    endpoint: String,
}

impl HttpMailer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &InvitationEmail) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/messages", self.endpoint.trim_end_matches('/')))
            .json(&RelayMessage {
                template: "role_handover_invitation",
                to: &email.to,
                data: email,
            })
            .send()
            .await
            .map_err(|e| HandoverError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(HandoverError::Delivery(format!(
                "Mail relay rejected message: {} - {}",
                status, text
            )));
        }

        Ok(())
    }
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    template: &'static str,
    to: &'a str,
    data: &'a InvitationEmail,
}

/// Development mailer that only logs the activation link
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &InvitationEmail) -> Result<()> {
        tracing::info!(
            to = %email.to,
            role = %email.role,
            reminder = email.reminder,
            "Invitation email (not delivered): {}",
            email.activation_url
        );
        Ok(())
    }
}
