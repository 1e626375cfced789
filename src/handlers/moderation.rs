use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::PollView;
use crate::error::AppError;
use crate::identity::{self, VOTER_HEADER};
use crate::models::ReportStatus;
use crate::state::AppState;

pub const ADMIN_HEADER: &str = "x-admin-password";

pub async fn hide_poll(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let voter = identity::resolve_voter(&headers);
    state.db.touch_voter(&voter.id, now).await?;

    state.db.hide_poll(&voter.id, poll_id, now).await?;
    info!("poll {} hidden by {}", poll_id, voter.id);
    Ok(([(VOTER_HEADER, voter.id)], Json(json!({ "status": "hidden" }))))
}

pub async fn restore_poll(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let voter = identity::resolve_voter(&headers);
    state.db.touch_voter(&voter.id, now).await?;

    state.db.restore_poll(&voter.id, poll_id).await?;
    info!("poll {} restored by {}", poll_id, voter.id);
    Ok(([(VOTER_HEADER, voter.id)], Json(json!({ "status": "restored" }))))
}

#[derive(Serialize)]
pub struct HiddenPollView {
    pub hidden_at: DateTime<Utc>,
    pub poll: PollView,
}

pub async fn hidden_polls(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let voter = identity::resolve_voter(&headers);
    state.db.touch_voter(&voter.id, now).await?;

    let ballots = state.db.ballot_options_for(&voter.id).await?;
    let views: Vec<HiddenPollView> = state
        .db
        .hidden_polls(&voter.id)
        .await?
        .into_iter()
        .map(|hidden| HiddenPollView {
            hidden_at: hidden.hidden_at,
            poll: PollView::build(
                &hidden.poll,
                &voter.id,
                ballots.get(&hidden.poll.id).cloned(),
                now,
            ),
        })
        .collect();

    Ok(([(VOTER_HEADER, voter.id)], Json(views)))
}

#[derive(Deserialize)]
pub struct ReportRequest {
    pub reason: String,
    pub description: Option<String>,
}

pub async fn report_poll(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<ReportRequest>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let voter = identity::resolve_voter(&headers);
    state.db.touch_voter(&voter.id, now).await?;

    let report_id = state
        .db
        .report_poll(
            poll_id,
            Some(&voter.id),
            &request.reason,
            request.description.as_deref(),
            now,
        )
        .await?;
    info!("report {} filed against poll {} by {}", report_id, poll_id, voter.id);

    Ok((
        [(VOTER_HEADER, voter.id)],
        Json(json!({ "message": "신고가 접수되었습니다." })),
    ))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let expected = match state.config.admin_password.as_deref() {
        Some(password) => password,
        // No configured password means the admin surface stays locked.
        None => return Err(AppError::Unauthorized),
    };
    let supplied = headers.get(ADMIN_HEADER).and_then(|value| value.to_str().ok());
    if supplied == Some(expected) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

#[derive(Deserialize)]
pub struct AdminLogin {
    pub password: String,
}

pub async fn admin_login(
    State(state): State<Arc<AppState>>,
    Json(login): Json<AdminLogin>,
) -> Result<impl IntoResponse, AppError> {
    match state.config.admin_password.as_deref() {
        Some(expected) if expected == login.password => Ok(Json(json!({ "ok": true }))),
        _ => Err(AppError::Unauthorized),
    }
}

pub async fn list_reports(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &headers)?;

    let reported = state
        .db
        .list_reports(state.config.auto_hide_threshold)
        .await?;
    Ok(Json(reported))
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub status: ReportStatus,
}

pub async fn review_report(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<ReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &headers)?;

    state
        .db
        .review_report(report_id, request.status, Utc::now())
        .await?;
    info!("report {} reviewed as {}", report_id, request.status.as_str());
    Ok(Json(json!({ "ok": true })))
}
