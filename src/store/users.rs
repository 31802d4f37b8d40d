//! Portal user directory as seen by the handover core
//!
//! The core reads users, creates officers it bootstraps, and flips the role
//! attribute on promotion/demotion. Everything else about the user schema
//! belongs to the user subsystem.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::{HandoverError, Result};
use crate::models::{NewUser, User, UserId, UserRole};

pub async fn find_by_id(conn: &mut SqliteConnection, id: UserId) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, email, first_name, middle_name, last_name, role, email_verified_at, created_at
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(User::from))
}

pub async fn find_by_email(conn: &mut SqliteConnection, email: &str) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, email, first_name, middle_name, last_name, role, email_verified_at, created_at
        FROM users
        WHERE email = ?
        "#,
    )
    .bind(email.trim().to_lowercase())
    .fetch_optional(conn)
    .await?;

    Ok(row.map(User::from))
}

pub async fn create(conn: &mut SqliteConnection, new: &NewUser, now: DateTime<Utc>) -> Result<User> {
    let profile = new.profile.clone().normalized();
    if find_by_email(&mut *conn, &profile.email).await?.is_some() {
        return Err(HandoverError::EmailAlreadyRegistered);
    }

    let verified_at = new.verified.then_some(now);
    let id = sqlx::query(
        r#"
        INSERT INTO users (email, first_name, middle_name, last_name, role, credential, email_verified_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&profile.email)
    .bind(&profile.first_name)
    .bind(&profile.middle_name)
    .bind(&profile.last_name)
    .bind(new.role.to_db())
    .bind(&new.credential)
    .bind(verified_at)
    .bind(now)
    .bind(now)
    .execute(conn)
    .await?
    .last_insert_rowid();

    Ok(User {
        id,
        email: profile.email,
        first_name: profile.first_name,
        middle_name: profile.middle_name,
        last_name: profile.last_name,
        role: new.role.clone(),
        email_verified_at: verified_at,
        created_at: now,
    })
}

pub async fn update_role(
    conn: &mut SqliteConnection,
    id: UserId,
    role: &UserRole,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE users SET role = ?, updated_at = ? WHERE id = ?
        "#,
    )
    .bind(role.to_db())
    .bind(now)
    .bind(id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(HandoverError::UserNotFound(id));
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    first_name: String,
    middle_name: Option<String>,
    last_name: String,
    role: String,
    email_verified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            first_name: row.first_name,
            middle_name: row.middle_name,
            last_name: row.last_name,
            role: UserRole::from_db(&row.role),
            email_verified_at: row.email_verified_at,
            created_at: row.created_at,
        }
    }
}
