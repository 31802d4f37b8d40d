//! Shared fixtures for the integration suites

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::sqlite::SqlitePoolOptions;

use handover::clock::ManualClock;
use handover::config::HandoverSettings;
use handover::error::{HandoverError, Result};
use handover::handover::{Authority, HandoverService};
use handover::mailer::{ActivationUrls, InvitationEmail, Mailer};
use handover::models::{ApprovalStatus, NewUser, Profile, Role, User, UserId, UserRole};
use handover::store::Store;

pub const BASE_URL: &str = "https://portal.example.edu";

/// Captures every email and can be switched into a failing relay
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<InvitationEmail>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<InvitationEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &InvitationEmail) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HandoverError::Delivery("relay unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub struct Harness {
    pub service: HandoverService,
    pub mailer: Arc<RecordingMailer>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn store(&self) -> &Store {
        self.service.store()
    }
}

pub async fn memory_store() -> Store {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    let store = Store::new(pool);
    store.migrate().await.expect("Failed to run migrations");
    store
}

/// Whole seconds, so values survive a database round trip unchanged
pub fn start_time() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

pub async fn harness() -> Harness {
    harness_with(HandoverSettings::default()).await
}

pub async fn harness_with(settings: HandoverSettings) -> Harness {
    let store = memory_store().await;
    let mailer = Arc::new(RecordingMailer::default());
    let clock = Arc::new(ManualClock::new(start_time()));
    let service = HandoverService::new(store, mailer.clone(), ActivationUrls::new(BASE_URL))
        .with_clock(clock.clone())
        .with_settings(settings);

    Harness {
        service,
        mailer,
        clock,
    }
}

pub fn profile(email: &str) -> Profile {
    Profile {
        email: email.to_string(),
        first_name: "Alice".to_string(),
        middle_name: None,
        last_name: "Reyes".to_string(),
    }
}

pub async fn insert_user(store: &Store, email: &str, role: UserRole) -> User {
    store
        .create_user(&NewUser {
            profile: profile(email),
            role,
            credential: "hash".to_string(),
            verified: true,
        })
        .await
        .expect("Failed to insert user")
}

/// A user with the role attribute who already holds the role
pub async fn seat_holder(harness: &Harness, email: &str, role: Role) -> User {
    let user = insert_user(harness.store(), email, UserRole::Active(role)).await;
    harness
        .service
        .handover_role(role, user.id, Authority::Operator(None), Some("bootstrap".to_string()))
        .await
        .expect("Failed to seat holder");
    user
}

pub async fn insert_approval(
    store: &Store,
    role: Role,
    approver_id: Option<UserId>,
    status: ApprovalStatus,
) -> i64 {
    sqlx::query(
        r#"
        INSERT INTO pending_approvals (subject_kind, subject_id, approver_role, approver_id, status)
        VALUES ('budget_request', 1, ?, ?, ?)
        "#,
    )
    .bind(role.as_str())
    .bind(approver_id)
    .bind(status.as_str())
    .execute(store.pool())
    .await
    .expect("Failed to insert approval")
    .last_insert_rowid()
}

/// Row counts of every table the core writes
pub async fn table_counts(store: &Store) -> (i64, i64, i64, i64) {
    let count = |table: &'static str| {
        let pool = store.pool().clone();
        async move {
            sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .expect("Failed to count rows")
        }
    };
    (
        count("users").await,
        count("role_slots").await,
        count("handover_records").await,
        count("invitation_tokens").await,
    )
}

/// The raw token of the newest invitation for `email`
pub async fn token_for(store: &Store, email: &str) -> String {
    sqlx::query_scalar::<_, String>(
        "SELECT token FROM invitation_tokens WHERE email = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(email)
    .fetch_one(store.pool())
    .await
    .expect("Failed to read token")
}
