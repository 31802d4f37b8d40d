//! Database store for the handover core
//!
//! Each submodule is one component and exposes free functions over a
//! `&mut SqliteConnection`, so the handover service can compose them inside
//! a single transaction. [`Store`] wraps the pool for read-only lookups and
//! directory provisioning done outside a handover.

pub mod approvals;
pub mod audit;
pub mod invitations;
pub mod ledger;
pub mod users;

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::Result;
use crate::models::{
    HandoverRecord, Invitation, NewUser, PendingApproval, RecordId, Role, RoleSlot, User, UserId,
    UserRole,
};

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool with foreign keys on and a busy timeout, so writers
    /// queue behind the per-role write lock instead of failing.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    // Role ledger

    pub async fn current_holder(&self, role: Role) -> Result<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        ledger::current_holder(&mut conn, role).await
    }

    pub async fn is_current_holder(&self, role: Role, user_id: UserId) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        ledger::is_current_holder(&mut conn, role, user_id).await
    }

    pub async fn role_slot(&self, role: Role) -> Result<Option<RoleSlot>> {
        let mut conn = self.pool.acquire().await?;
        ledger::get(&mut conn, role).await
    }

    // Audit log

    pub async fn history_for(&self, role: Role) -> Result<Vec<HandoverRecord>> {
        let mut conn = self.pool.acquire().await?;
        audit::history_for(&mut conn, role).await
    }

    pub async fn latest_for(&self, role: Role) -> Result<Option<RecordId>> {
        let mut conn = self.pool.acquire().await?;
        audit::latest_for(&mut conn, role).await
    }

    // Pending work

    pub async fn awaiting_for(&self, role: Role) -> Result<Vec<PendingApproval>> {
        let mut conn = self.pool.acquire().await?;
        approvals::awaiting_for(&mut conn, role).await
    }

    // Invitations

    pub async fn find_invitation(&self, token: &str) -> Result<Option<Invitation>> {
        let mut conn = self.pool.acquire().await?;
        invitations::find_by_token(&mut conn, token).await
    }

    // User directory

    pub async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        users::find_by_id(&mut conn, id).await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        users::find_by_email(&mut conn, email).await
    }

    pub async fn create_user(&self, new: &NewUser) -> Result<User> {
        let mut conn = self.pool.acquire().await?;
        users::create(&mut conn, new, Utc::now()).await
    }

    /// Grant (or change) a user's role attribute.
    ///
    /// This is the first half of the two-step grant; active authority only
    /// follows through a handover.
    pub async fn set_user_role(&self, id: UserId, role: &UserRole) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        users::update_role(&mut conn, id, role, Utc::now()).await
    }
}
