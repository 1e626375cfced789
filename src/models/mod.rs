use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const TITLE_MAX_LEN: usize = 100;
pub const DESCRIPTION_MAX_LEN: usize = 500;
pub const OPTION_NAME_MAX_LEN: usize = 50;
pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Active,
    Closed,
    Draft,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Active => "active",
            PollStatus::Closed => "closed",
            PollStatus::Draft => "draft",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PollStatus::Active),
            "closed" => Some(PollStatus::Closed),
            "draft" => Some(PollStatus::Draft),
            _ => None,
        }
    }
}

// Display grouping only, never business logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorTag {
    Approve,
    Thinking,
    Reject,
}

impl ColorTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorTag::Approve => "approve",
            ColorTag::Thinking => "thinking",
            ColorTag::Reject => "reject",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(ColorTag::Approve),
            "thinking" => Some(ColorTag::Thinking),
            "reject" => Some(ColorTag::Reject),
            _ => None,
        }
    }
}

// Default palette assigned by option position at creation.
pub const OPTION_COLORS: [ColorTag; 3] = [ColorTag::Approve, ColorTag::Thinking, ColorTag::Reject];

#[derive(Debug, Clone, Serialize)]
pub struct PollOption {
    pub id: String,
    pub name: String,
    pub vote_count: i64,
    pub color: ColorTag,
}

#[derive(Debug, Clone, Serialize)]
pub struct Poll {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub options: Vec<PollOption>,
    pub status: PollStatus,
    pub vote_count: i64,
    pub creator_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Poll {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PollStatus::Active && now < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
pub struct NewPollOption {
    pub name: String,
    pub color: Option<ColorTag>,
}

#[derive(Debug, Deserialize)]
pub struct NewPoll {
    pub title: String,
    pub description: Option<String>,
    pub options: Vec<NewPollOption>,
    pub expires_at: DateTime<Utc>,
}

impl NewPoll {
    // Rejected before any storage call; messages are shown inline to the user.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("제목은 필수 입력 항목입니다.".into()));
        }
        if self.title.chars().count() > TITLE_MAX_LEN {
            return Err(AppError::Validation("제목은 100자 이내로 입력해주세요.".into()));
        }
        if let Some(description) = &self.description {
            if description.chars().count() > DESCRIPTION_MAX_LEN {
                return Err(AppError::Validation("설명은 500자 이내로 입력해주세요.".into()));
            }
        }
        if self.options.len() < MIN_OPTIONS || self.options.len() > MAX_OPTIONS {
            return Err(AppError::Validation(
                "선택지는 최소 2개, 최대 3개까지 만들 수 있습니다.".into(),
            ));
        }
        if self.options.iter().any(|opt| opt.name.trim().is_empty()) {
            return Err(AppError::Validation("모든 선택지의 이름을 입력해주세요.".into()));
        }
        if self
            .options
            .iter()
            .any(|opt| opt.name.chars().count() > OPTION_NAME_MAX_LEN)
        {
            return Err(AppError::Validation(
                "선택지 이름은 50자 이내로 입력해주세요.".into(),
            ));
        }
        if self.expires_at <= now {
            return Err(AppError::Validation(
                "종료 시간은 현재 시각 이후로 설정해주세요.".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Closed,
    Deleted,
}

// One entry on the poll change feed; consumers only use it to drop caches.
#[derive(Debug, Clone)]
pub struct PollChange {
    pub poll_id: i64,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone)]
pub struct HiddenPoll {
    pub poll: Poll,
    pub hidden_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Reviewed,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Reviewed => "reviewed",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Dismissed => "dismissed",
        }
    }
}

// Per-poll aggregation of filed reports, for the admin screen.
#[derive(Debug, Clone, Serialize)]
pub struct ReportedPoll {
    pub poll_id: i64,
    pub title: String,
    pub report_count: i64,
    pub reasons: Vec<String>,
    pub last_reported: DateTime<Utc>,
    pub auto_hidden: bool,
}
