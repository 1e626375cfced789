pub mod moderation;
pub mod poll;
pub mod vote;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Poll, PollOption, PollStatus};
use crate::state::AppState;
use crate::time_status::{self, TimeStatus};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/polls", post(poll::create_poll).get(poll::list_polls))
        .route("/polls/hidden", get(moderation::hidden_polls))
        .route("/polls/{id}", get(poll::get_poll).delete(poll::delete_poll))
        .route("/polls/{id}/vote", post(vote::cast_vote))
        .route("/polls/{id}/end", post(poll::end_poll))
        .route("/polls/{id}/hide", post(moderation::hide_poll))
        .route("/polls/{id}/restore", post(moderation::restore_poll))
        .route("/polls/{id}/report", post(moderation::report_poll))
        .route("/admin/login", post(moderation::admin_login))
        .route("/admin/reports", get(moderation::list_reports))
        .route("/admin/reports/{id}/review", post(moderation::review_report))
}

// A stored poll decorated with the viewer-dependent fields the UI renders.
#[derive(Debug, Serialize)]
pub struct PollView {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: PollStatus,
    pub total_votes: i64,
    pub options: Vec<PollOption>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_early_ended: bool,
    pub time_text: String,
    pub my_choice: Option<String>,
    pub is_mine: bool,
}

impl PollView {
    pub fn build(
        poll: &Poll,
        voter_id: &str,
        my_choice: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let time = time_status::classify(poll, now);
        Self {
            id: poll.id,
            title: poll.title.clone(),
            description: poll.description.clone(),
            status: poll.status,
            total_votes: poll.vote_count,
            options: poll.options.clone(),
            created_at: poll.created_at,
            expires_at: poll.expires_at,
            ended_at: poll.ended_at,
            is_active: time == TimeStatus::Active,
            is_early_ended: time == TimeStatus::EndedEarly,
            time_text: time_status::time_text(poll, now),
            my_choice,
            is_mine: poll.creator_id.as_deref() == Some(voter_id),
        }
    }
}
