//! Runtime configuration from flags and environment

use std::sync::Arc;

use chrono::Duration;
use clap::{Args, Parser};

use crate::mailer::{ActivationUrls, HttpMailer, LogMailer, Mailer};

/// What a failed first delivery means for a freshly proposed invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialDeliveryPolicy {
    /// The invitation stays valid and the failure is reported as a warning
    KeepToken,
    /// The invitation is expired on the spot and the proposal fails
    Strict,
}

/// Tunables of the handover service
#[derive(Debug, Clone)]
pub struct HandoverSettings {
    pub invitation_ttl: Duration,
    pub resend_cooldown: Duration,
    pub initial_delivery: InitialDeliveryPolicy,
}

impl Default for HandoverSettings {
    fn default() -> Self {
        Self {
            invitation_ttl: Duration::days(7),
            resend_cooldown: Duration::minutes(5),
            initial_delivery: InitialDeliveryPolicy::KeepToken,
        }
    }
}

/// Settings shared by the server and the operator CLI
#[derive(Args, Debug, Clone)]
pub struct CoreConfig {
    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:handover.db")]
    pub database_url: String,

    /// Maximum pooled database connections
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Public base URL used to build activation links
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:3000")]
    pub public_base_url: String,

    /// HTTP mail relay; invitation emails are only logged when unset
    #[arg(long, env = "MAIL_ENDPOINT")]
    pub mail_endpoint: Option<String>,

    /// Days before an invitation expires
    #[arg(
        long,
        env = "INVITATION_TTL_DAYS",
        default_value_t = 7,
        value_parser = clap::value_parser!(i64).range(1..=365)
    )]
    pub invitation_ttl_days: i64,

    /// Minimum seconds between two sends of the same invitation
    #[arg(
        long,
        env = "RESEND_COOLDOWN_SECS",
        default_value_t = 300,
        value_parser = clap::value_parser!(i64).range(1..=86_400)
    )]
    pub resend_cooldown_secs: i64,

    /// Fail the proposal (and void the token) when the first email cannot be sent
    #[arg(long, env = "STRICT_INITIAL_DELIVERY")]
    pub strict_initial_delivery: bool,
}

impl CoreConfig {
    pub fn settings(&self) -> HandoverSettings {
        HandoverSettings {
            invitation_ttl: Duration::days(self.invitation_ttl_days),
            resend_cooldown: Duration::seconds(self.resend_cooldown_secs),
            initial_delivery: if self.strict_initial_delivery {
                InitialDeliveryPolicy::Strict
            } else {
                InitialDeliveryPolicy::KeepToken
            },
        }
    }

    pub fn activation_urls(&self) -> ActivationUrls {
        ActivationUrls::new(&self.public_base_url)
    }

    pub fn mailer(&self) -> Arc<dyn Mailer> {
        match &self.mail_endpoint {
            Some(endpoint) => Arc::new(HttpMailer::new(endpoint)),
            None => {
                tracing::warn!("MAIL_ENDPOINT not set; invitation emails will only be logged");
                Arc::new(LogMailer)
            }
        }
    }
}

/// Handover server configuration
#[derive(Parser, Debug, Clone)]
#[command(name = "handover-server")]
#[command(about = "Role handover and pending-work transfer service")]
#[command(version)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: String,

    #[command(flatten)]
    pub core: CoreConfig,
}
