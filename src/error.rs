use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::error;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("투표를 찾을 수 없습니다.")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("이미 종료된 투표입니다.")]
    PollClosed,

    #[error("이미 참여한 투표입니다.")]
    AlreadyVoted,

    #[error("투표를 만든 사람만 할 수 있는 작업입니다.")]
    Forbidden,

    #[error("관리자 인증에 실패했습니다.")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt poll record: {0}")]
    Corrupt(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::PollClosed | AppError::AlreadyVoted => StatusCode::CONFLICT,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Database(_) | AppError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Storage failures are logged in full but never leaked to the client.
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("internal error: {}", self);
            return (
                status,
                Json(json!({ "error": "일시적인 오류가 발생했습니다. 잠시 후 다시 시도해주세요." })),
            )
                .into_response();
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
