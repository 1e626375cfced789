use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use log::info;
use serde::Deserialize;
use serde_json::json;

use super::PollView;
use crate::error::AppError;
use crate::identity::{self, VOTER_HEADER};
use crate::models::NewPoll;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    pub q: Option<String>,
}

pub async fn create_poll(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(new_poll): Json<NewPoll>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    // Rejected before any storage write.
    new_poll.validate(now)?;

    let voter = identity::resolve_voter(&headers);
    if voter.minted {
        info!("issued new device token {}", voter.id);
    }
    state.db.touch_voter(&voter.id, now).await?;

    let poll = state.db.create_poll(&new_poll, &voter.id, now).await?;
    info!("poll {} created by {}", poll.id, voter.id);
    state.cache.invalidate_listing();

    let view = PollView::build(&poll, &voter.id, None, now);
    Ok((StatusCode::CREATED, [(VOTER_HEADER, voter.id)], Json(view)))
}

pub async fn list_polls(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let voter = identity::resolve_voter(&headers);
    state.db.touch_voter(&voter.id, now).await?;

    // The cached listing is viewer-independent; hidden-poll exclusion, the
    // title filter, and ballot decoration are applied per request.
    let polls = match state.cache.listing() {
        Some(polls) => polls,
        None => {
            let fresh = state.db.list_polls().await?;
            state.cache.put_listing(fresh)
        }
    };

    let hidden = state.db.hidden_ids(&voter.id).await?;
    let ballots = state.db.ballot_options_for(&voter.id).await?;
    let needle = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_lowercase);

    let views: Vec<PollView> = polls
        .iter()
        .filter(|poll| !hidden.contains(&poll.id))
        .filter(|poll| match &needle {
            Some(needle) => poll.title.to_lowercase().contains(needle),
            None => true,
        })
        .map(|poll| PollView::build(poll, &voter.id, ballots.get(&poll.id).cloned(), now))
        .collect();

    Ok(([(VOTER_HEADER, voter.id)], Json(views)))
}

pub async fn get_poll(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let voter = identity::resolve_voter(&headers);
    state.db.touch_voter(&voter.id, now).await?;

    let poll = match state.cache.get(poll_id) {
        Some(poll) => poll,
        None => {
            let fresh = Arc::new(state.db.get_poll(poll_id).await?);
            state.cache.put(&fresh);
            fresh
        }
    };

    let my_choice = state.db.ballot_option(poll_id, &voter.id).await?;
    let view = PollView::build(&poll, &voter.id, my_choice, now);
    Ok(([(VOTER_HEADER, voter.id)], Json(view)))
}

pub async fn end_poll(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let voter = identity::resolve_voter(&headers);
    state.db.touch_voter(&voter.id, now).await?;

    state.db.end_poll(poll_id, &voter.id, now).await?;
    info!("poll {} ended early by {}", poll_id, voter.id);
    state.cache.invalidate(poll_id);
    state.cache.invalidate_listing();

    let poll = state.db.get_poll(poll_id).await?;
    let my_choice = state.db.ballot_option(poll_id, &voter.id).await?;
    let view = PollView::build(&poll, &voter.id, my_choice, now);
    Ok(([(VOTER_HEADER, voter.id)], Json(view)))
}

pub async fn delete_poll(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let voter = identity::resolve_voter(&headers);
    state.db.touch_voter(&voter.id, now).await?;

    state.db.delete_poll(poll_id, &voter.id).await?;
    info!("poll {} deleted by {}", poll_id, voter.id);
    state.cache.invalidate(poll_id);
    state.cache.invalidate_listing();

    Ok(([(VOTER_HEADER, voter.id)], Json(json!({ "status": "deleted" }))))
}
