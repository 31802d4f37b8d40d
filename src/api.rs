//! HTTP surface over the handover service
//!
//! Authentication happens upstream; the authenticated user id arrives in
//! the `x-actor-id` header.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{HandoverError, Result};
use crate::handover::{Authority, HandoverOutcome, InvitationReceipt, ResendReceipt};
use crate::models::{HandoverRecord, Invitation, Profile, Role, User, UserId};
use crate::AppState;

pub const ACTOR_HEADER: &str = "x-actor-id";

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/roles/:role/holder", get(holder))
        .route("/roles/:role/history", get(history))
        .route("/roles/:role/handover", post(handover))
        .route("/roles/:role/handover/new-user", post(handover_new_user))
        .route("/roles/:role/invitations", post(propose_invitation))
        .route("/invitations/resend", post(resend_invitation))
        .route("/invitations/:token", get(inspect_invitation))
        .route("/invitations/:token/accept", post(accept_invitation))
        .with_state(state)
}

/// The authenticated user making the request
#[derive(Debug, Clone, Copy)]
pub struct Actor(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = HandoverError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .map(Actor)
            .ok_or_else(|| HandoverError::NotAuthorized("missing or invalid actor".to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct HolderResponse {
    pub role: Role,
    pub holder: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct HandoverRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewUserHandoverRequest {
    #[serde(flatten)]
    pub profile: Profile,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResendRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    /// Credential hash produced by the authentication layer
    pub credential: String,
}

#[derive(Debug, Serialize)]
pub struct UserHandoverResponse {
    pub user: User,
    pub outcome: HandoverOutcome,
}

async fn health() -> &'static str {
    "ok"
}

async fn holder(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
) -> Result<Json<HolderResponse>> {
    let role = Role::from_name(&role)?;
    let store = state.service.store();
    let assumed_at = store.role_slot(role).await?.map(|slot| slot.assumed_at);
    let holder = store.current_holder(role).await?;
    Ok(Json(HolderResponse {
        role,
        holder,
        assumed_at,
    }))
}

async fn history(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
) -> Result<Json<Vec<HandoverRecord>>> {
    let role = Role::from_name(&role)?;
    Ok(Json(state.service.store().history_for(role).await?))
}

async fn handover(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(role): Path<String>,
    Json(req): Json<HandoverRequest>,
) -> Result<Json<HandoverOutcome>> {
    let role = Role::from_name(&role)?;
    let outcome = state
        .service
        .handover_role(role, req.user_id, Authority::Holder(actor), req.reason)
        .await?;
    Ok(Json(outcome))
}

async fn handover_new_user(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(role): Path<String>,
    Json(req): Json<NewUserHandoverRequest>,
) -> Result<impl IntoResponse> {
    let role = Role::from_name(&role)?;
    let (user, outcome) = state
        .service
        .create_and_handover(role, req.profile, Authority::Holder(actor), req.reason)
        .await?;
    Ok((StatusCode::CREATED, Json(UserHandoverResponse { user, outcome })))
}

async fn propose_invitation(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(role): Path<String>,
    Json(req): Json<NewUserHandoverRequest>,
) -> Result<impl IntoResponse> {
    let role = Role::from_name(&role)?;
    let receipt: InvitationReceipt = state
        .service
        .propose_invitation(role, req.profile, actor, req.reason)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn resend_invitation(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Json(req): Json<ResendRequest>,
) -> Result<Json<ResendReceipt>> {
    let email = req.email.trim().to_lowercase();
    Ok(Json(state.service.resend_invitation(&email, actor).await?))
}

async fn inspect_invitation(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<Invitation>> {
    Ok(Json(state.service.inspect_invitation(&token).await?))
}

async fn accept_invitation(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(req): Json<AcceptRequest>,
) -> Result<impl IntoResponse> {
    let (user, outcome) = state.service.accept_invitation(&token, req.credential).await?;
    Ok((StatusCode::CREATED, Json(UserHandoverResponse { user, outcome })))
}
