//! REST handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::error;

use super::AppState;
use crate::error::OutreachError;
use crate::outreach::{self, GenerationRequest, ReviewEdit, SetupRequest};
use crate::pipeline::InboundReply;
use crate::store::Database;
use crate::store::model::EmailStatus;

fn error_response(e: &OutreachError) -> (StatusCode, Json<Value>) {
    let status = match e {
        OutreachError::NotFound { .. } => StatusCode::NOT_FOUND,
        OutreachError::InvalidState(_) => StatusCode::CONFLICT,
        OutreachError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
        OutreachError::Gateway(_) | OutreachError::Database(_) => {
            error!(error = %e, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({"error": e.to_string()})))
}

fn respond<T: serde::Serialize>(
    status: StatusCode,
    result: Result<T, OutreachError>,
) -> (StatusCode, Json<Value>) {
    match result {
        Ok(body) => (status, Json(json!(body))),
        Err(e) => error_response(&e),
    }
}

// ── Health ──────────────────────────────────────────────────────────────

pub(super) async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "outreach-assist"
    }))
}

// ── Contacts & campaigns ────────────────────────────────────────────────

pub(super) async fn list_contacts(State(state): State<AppState>) -> impl IntoResponse {
    respond(
        StatusCode::OK,
        state.db.list_contacts().await.map_err(OutreachError::from),
    )
}

pub(super) async fn confirm_contacts(
    State(state): State<AppState>,
    Json(body): Json<SetupRequest>,
) -> impl IntoResponse {
    let result = outreach::setup_campaign(state.db.as_ref(), &body)
        .await
        .map(|setup| {
            json!({
                "campaign": setup.campaign,
                "steps": setup.steps,
                "contacts": setup.contacts,
            })
        });
    respond(StatusCode::CREATED, result)
}

pub(super) async fn campaign_summary(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    respond(
        StatusCode::OK,
        outreach::campaign_summary(state.db.as_ref(), id).await,
    )
}

pub(super) async fn generate_emails(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<GenerationRequest>,
) -> impl IntoResponse {
    respond(StatusCode::OK, state.engine.generate(id, &body).await)
}

#[derive(Deserialize)]
pub(super) struct SendRequest {
    step_number: i64,
}

pub(super) async fn send_step(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<SendRequest>,
) -> impl IntoResponse {
    respond(
        StatusCode::OK,
        state.dispatcher.send_step(id, body.step_number).await,
    )
}

// ── Emails ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct EmailQuery {
    campaign_id: i64,
    #[serde(default)]
    status: Option<String>,
}

pub(super) async fn list_emails(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> impl IntoResponse {
    let status = match query.status.as_deref().map(str::parse::<EmailStatus>) {
        None => None,
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": e})));
        }
    };

    respond(
        StatusCode::OK,
        state
            .db
            .list_emails(query.campaign_id, status)
            .await
            .map_err(OutreachError::from),
    )
}

pub(super) async fn update_email(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ReviewEdit>,
) -> impl IntoResponse {
    respond(
        StatusCode::OK,
        outreach::review_edit(state.db.as_ref(), id, &body).await,
    )
}

// ── Webhooks ────────────────────────────────────────────────────────────

pub(super) async fn sendgrid_events(
    State(state): State<AppState>,
    Json(events): Json<Vec<Value>>,
) -> impl IntoResponse {
    match state.events.ingest(&events).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "applied": report.applied,
                "duplicates": report.duplicates,
                "rejected_transitions": report.rejected_transitions,
                "skipped": report.skipped,
            })),
        ),
        Err(e) => error_response(&OutreachError::from(e)),
    }
}

pub(super) async fn reply_webhook(
    State(state): State<AppState>,
    Json(body): Json<InboundReply>,
) -> impl IntoResponse {
    respond(StatusCode::OK, state.replies.handle(&body).await)
}
