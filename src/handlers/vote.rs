use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
};
use chrono::Utc;
use log::info;
use serde::Deserialize;
use serde_json::json;

use super::PollView;
use crate::error::AppError;
use crate::identity::{self, VOTER_HEADER};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct VoteRequest {
    pub option_id: String,
}

pub async fn cast_vote(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<VoteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let voter = identity::resolve_voter(&headers);
    if voter.minted {
        info!("issued new device token {}", voter.id);
    }
    state.db.touch_voter(&voter.id, now).await?;

    info!(
        "vote request: poll={} option={} voter={}",
        poll_id, request.option_id, voter.id
    );
    // Any failure leaves the cache untouched; the transaction already left
    // storage untouched.
    state
        .db
        .cast_vote(poll_id, &request.option_id, &voter.id, now)
        .await?;

    // Readers must observe the new counts on their next fetch.
    state.cache.invalidate(poll_id);
    state.cache.invalidate_listing();

    let poll = state.db.get_poll(poll_id).await?;
    let view = PollView::build(&poll, &voter.id, Some(request.option_id), now);
    Ok((
        [(VOTER_HEADER, voter.id)],
        Json(json!({ "message": "투표 성공! 선택이 반영되었습니다.", "poll": view })),
    ))
}
