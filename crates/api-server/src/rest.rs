use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use campaign_analytics::{AnalyticsSnapshot, ResearchStats, SnapshotScope, TimeRange};
use campaign_core::types::{Campaign, Lead, ScheduleWindow};
use campaign_core::CampaignResult;
use campaign_events::IngestOutcome;
use campaign_lifecycle::{CampaignEngine, NewCampaign, NewLead, TransitionRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::identity::Identity;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CampaignEngine>,
    pub node_id: String,
    pub start_time: Instant,
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ─── Health ─────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub campaigns: usize,
    pub leads: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        campaigns: state.engine.registry().len(),
        leads: state.engine.leads().len(),
    })
}

pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

// ─── Campaigns ──────────────────────────────────────────────────────────────

pub async fn create_campaign(
    State(state): State<AppState>,
    Identity(token): Identity,
    Json(new): Json<NewCampaign>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    let campaign = state.engine.create_campaign(&token, new)?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Identity(token): Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<Campaign> {
    Ok(Json(state.engine.campaign(&token, id)?))
}

pub async fn campaign_history(
    State(state): State<AppState>,
    Identity(token): Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<TransitionRecord>> {
    Ok(Json(state.engine.history(&token, id)?))
}

/// Optional body for lifecycle actions.
#[derive(Debug, Default, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub reason: Option<String>,
    /// Only meaningful for `schedule`.
    #[serde(default)]
    pub window: Option<ScheduleWindow>,
}

fn action_body(body: Option<Json<ActionRequest>>) -> ActionRequest {
    body.map(|Json(b)| b).unwrap_or_default()
}

fn transitioned(action: &str, result: CampaignResult<TransitionRecord>) -> ApiResult<TransitionRecord> {
    let record = result?;
    info!(
        campaign_id = %record.campaign_id,
        action,
        from = ?record.from,
        to = ?record.to,
        actor = %record.actor,
        "Campaign transitioned"
    );
    Ok(Json(record))
}

pub async fn schedule_campaign(
    State(state): State<AppState>,
    Identity(token): Identity,
    Path(id): Path<Uuid>,
    body: Option<Json<ActionRequest>>,
) -> ApiResult<TransitionRecord> {
    let body = action_body(body);
    transitioned(
        "schedule",
        state.engine.schedule(&token, id, body.window, body.reason),
    )
}

pub async fn activate_campaign(
    State(state): State<AppState>,
    Identity(token): Identity,
    Path(id): Path<Uuid>,
    body: Option<Json<ActionRequest>>,
) -> ApiResult<TransitionRecord> {
    let body = action_body(body);
    transitioned("activate", state.engine.activate(&token, id, body.reason))
}

pub async fn pause_campaign(
    State(state): State<AppState>,
    Identity(token): Identity,
    Path(id): Path<Uuid>,
    body: Option<Json<ActionRequest>>,
) -> ApiResult<TransitionRecord> {
    let body = action_body(body);
    transitioned("pause", state.engine.pause(&token, id, body.reason))
}

pub async fn resume_campaign(
    State(state): State<AppState>,
    Identity(token): Identity,
    Path(id): Path<Uuid>,
    body: Option<Json<ActionRequest>>,
) -> ApiResult<TransitionRecord> {
    let body = action_body(body);
    transitioned("resume", state.engine.resume(&token, id, body.reason))
}

pub async fn complete_campaign(
    State(state): State<AppState>,
    Identity(token): Identity,
    Path(id): Path<Uuid>,
    body: Option<Json<ActionRequest>>,
) -> ApiResult<TransitionRecord> {
    let body = action_body(body);
    transitioned("complete", state.engine.complete(&token, id, body.reason))
}

pub async fn archive_campaign(
    State(state): State<AppState>,
    Identity(token): Identity,
    Path(id): Path<Uuid>,
    body: Option<Json<ActionRequest>>,
) -> ApiResult<TransitionRecord> {
    let body = action_body(body);
    transitioned("archive", state.engine.archive(&token, id, body.reason))
}

// ─── Leads & events ─────────────────────────────────────────────────────────

pub async fn create_lead(
    State(state): State<AppState>,
    Identity(token): Identity,
    Json(new): Json<NewLead>,
) -> (StatusCode, Json<Lead>) {
    let lead = state.engine.create_lead(&token, new);
    (StatusCode::CREATED, Json(lead))
}

/// Provider callback endpoint. Duplicates answer 200 so providers stop
/// retrying; rejections carry the error code in the body.
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(raw): Json<campaign_core::types::RawEvent>,
) -> impl IntoResponse {
    let outcome = state.engine.ingest(raw);
    metrics::counter!("api.events", "status" => outcome.status()).increment(1);
    let status = match &outcome {
        IngestOutcome::Accepted(_) => StatusCode::ACCEPTED,
        IngestOutcome::Duplicate { .. } => StatusCode::OK,
        IngestOutcome::Rejected { code, .. } if *code == "referential_error" => {
            StatusCode::NOT_FOUND
        }
        IngestOutcome::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, Json(outcome))
}

// ─── Analytics ──────────────────────────────────────────────────────────────

pub async fn campaign_analytics(
    State(state): State<AppState>,
    Identity(token): Identity,
    Path(id): Path<Uuid>,
    Query(range): Query<TimeRange>,
) -> ApiResult<AnalyticsSnapshot> {
    state.engine.campaign(&token, id)?;
    Ok(Json(state.engine.snapshot(SnapshotScope::Campaign(id), range)?))
}

pub async fn user_analytics(
    State(state): State<AppState>,
    Identity(token): Identity,
    Path(user_id): Path<Uuid>,
    Query(range): Query<TimeRange>,
) -> ApiResult<AnalyticsSnapshot> {
    token.authorize_user(user_id)?;
    Ok(Json(state.engine.snapshot(SnapshotScope::User(user_id), range)?))
}

/// Totals across every campaign of the caller's account.
pub async fn global_analytics(
    State(state): State<AppState>,
    Identity(token): Identity,
    Query(range): Query<TimeRange>,
) -> ApiResult<AnalyticsSnapshot> {
    Ok(Json(
        state
            .engine
            .snapshot(SnapshotScope::Account(token.account_id), range)?,
    ))
}

pub async fn user_research(
    State(state): State<AppState>,
    Identity(token): Identity,
    Path(user_id): Path<Uuid>,
    Query(range): Query<TimeRange>,
) -> ApiResult<ResearchStats> {
    token.authorize_user(user_id)?;
    Ok(Json(state.engine.research(user_id, range)))
}
