use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use log::debug;
use sqlx::{
    Row, Sqlite,
    migrate::MigrateDatabase,
    sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow},
};
use tokio::sync::broadcast;

use crate::error::AppError;
use crate::models::{
    ChangeKind, ColorTag, HiddenPoll, NewPoll, OPTION_COLORS, Poll, PollChange, PollOption,
    PollStatus, ReportStatus, ReportedPoll,
};

// Buffered change notifications; a receiver that falls further behind than
// this sees a Lagged error and must flush everything it cached.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    changes: broadcast::Sender<PollChange>,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self, AppError> {
        // Create database if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?;

        Self::init_schema(&pool).await?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self { pool, changes })
    }

    #[cfg(test)]
    pub(crate) async fn open_in_memory() -> Result<Self, AppError> {
        // A single connection keeps every test query on the same in-memory db.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::init_schema(&pool).await?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self { pool, changes })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                content TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                vote_count INTEGER NOT NULL DEFAULT 0,
                creator_id TEXT,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                ended_at TEXT
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_options (
                poll_id INTEGER NOT NULL,
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                color TEXT NOT NULL,
                vote_count INTEGER NOT NULL DEFAULT 0,
                position INTEGER NOT NULL,
                PRIMARY KEY (poll_id, id),
                FOREIGN KEY (poll_id) REFERENCES polls(id)
            );
            "#,
        )
        .execute(pool)
        .await?;

        // One ballot per (poll, voter); the primary key is the
        // duplicate-vote enforcement point.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ballots (
                poll_id INTEGER NOT NULL,
                voter_id TEXT NOT NULL,
                option_id TEXT NOT NULL,
                cast_at TEXT NOT NULL,
                PRIMARY KEY (poll_id, voter_id),
                FOREIGN KEY (poll_id) REFERENCES polls(id)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS voters (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hidden_polls (
                voter_id TEXT NOT NULL,
                poll_id INTEGER NOT NULL,
                hidden_at TEXT NOT NULL,
                PRIMARY KEY (voter_id, poll_id),
                FOREIGN KEY (poll_id) REFERENCES polls(id)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                poll_id INTEGER NOT NULL,
                reporter_id TEXT,
                reason TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                reviewed_at TEXT,
                FOREIGN KEY (poll_id) REFERENCES polls(id)
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    // Anyone holding a receiver gets every committed poll change.
    pub fn subscribe(&self) -> broadcast::Receiver<PollChange> {
        self.changes.subscribe()
    }

    fn notify(&self, poll_id: i64, kind: ChangeKind) {
        debug!("poll change: id={} kind={:?}", poll_id, kind);
        // Nobody listening is fine.
        let _ = self.changes.send(PollChange { poll_id, kind });
    }

    fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, AppError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| AppError::Corrupt(format!("bad timestamp {:?}: {}", s, e)))
    }

    fn poll_from_row(row: &SqliteRow) -> Result<Poll, AppError> {
        let status_str: String = row.get("poll_status");
        let status = PollStatus::parse(&status_str)
            .ok_or_else(|| AppError::Corrupt(format!("unknown poll status: {}", status_str)))?;

        let created_at = Self::parse_timestamp(&row.get::<String, _>("created_at"))?;
        let expires_at = Self::parse_timestamp(&row.get::<String, _>("expires_at"))?;
        let ended_at = match row.get::<Option<String>, _>("ended_at") {
            Some(s) => Some(Self::parse_timestamp(&s)?),
            None => None,
        };

        Ok(Poll {
            id: row.get("poll_id"),
            title: row.get("title"),
            description: row.get("content"),
            options: Vec::new(),
            status,
            vote_count: row.get("total_votes"),
            creator_id: row.get("creator_id"),
            created_at,
            expires_at,
            ended_at,
        })
    }

    fn option_from_row(row: &SqliteRow) -> Result<PollOption, AppError> {
        let color_str: String = row.get("option_color");
        let color = ColorTag::parse(&color_str)
            .ok_or_else(|| AppError::Corrupt(format!("unknown color tag: {}", color_str)))?;

        Ok(PollOption {
            id: row.get("option_id"),
            name: row.get("option_name"),
            vote_count: row.get("option_votes"),
            color,
        })
    }

    // Folds poll+option join rows (ordered by poll, then option position)
    // into fully populated Poll values.
    fn fold_poll_rows(rows: &[SqliteRow]) -> Result<Vec<Poll>, AppError> {
        let mut polls: Vec<Poll> = Vec::new();
        for row in rows {
            let poll_id: i64 = row.get("poll_id");
            if polls.last().map(|p| p.id) != Some(poll_id) {
                polls.push(Self::poll_from_row(row)?);
            }
            let option = Self::option_from_row(row)?;
            if let Some(poll) = polls.last_mut() {
                poll.options.push(option);
            }
        }
        Ok(polls)
    }

    const POLL_SELECT: &'static str = r#"
        SELECT p.id AS poll_id, p.title, p.content, p.status AS poll_status,
               p.vote_count AS total_votes, p.creator_id,
               p.created_at, p.expires_at, p.ended_at,
               o.id AS option_id, o.name AS option_name,
               o.color AS option_color, o.vote_count AS option_votes
        FROM polls p
        JOIN poll_options o ON o.poll_id = p.id
    "#;

    pub async fn create_poll(
        &self,
        new_poll: &NewPoll,
        creator_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Poll, AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO polls (title, content, status, vote_count, creator_id, created_at, expires_at)
            VALUES (?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(new_poll.title.trim())
        .bind(new_poll.description.as_deref())
        .bind(PollStatus::Active.as_str())
        .bind(creator_id)
        .bind(now.to_rfc3339())
        .bind(new_poll.expires_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let poll_id = result.last_insert_rowid();

        // Options are seeded with zero votes and a position-assigned color.
        for (i, option) in new_poll.options.iter().enumerate() {
            let color = option
                .color
                .or_else(|| OPTION_COLORS.get(i).copied())
                .unwrap_or(ColorTag::Thinking);
            sqlx::query(
                r#"
                INSERT INTO poll_options (poll_id, id, name, color, vote_count, position)
                VALUES (?, ?, ?, ?, 0, ?)
                "#,
            )
            .bind(poll_id)
            .bind(format!("opt{}", i + 1))
            .bind(option.name.trim())
            .bind(color.as_str())
            .bind(i as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.notify(poll_id, ChangeKind::Created);

        self.get_poll(poll_id).await
    }

    pub async fn get_poll(&self, poll_id: i64) -> Result<Poll, AppError> {
        let query = format!("{} WHERE p.id = ? ORDER BY o.position", Self::POLL_SELECT);
        let rows = sqlx::query(&query).bind(poll_id).fetch_all(&self.pool).await?;

        Self::fold_poll_rows(&rows)?
            .into_iter()
            .next()
            .ok_or(AppError::NotFound)
    }

    // All polls, newest first. Viewer-specific filtering (hidden polls,
    // title search) happens above this layer so the result stays cacheable.
    pub async fn list_polls(&self) -> Result<Vec<Poll>, AppError> {
        let query = format!(
            "{} ORDER BY p.created_at DESC, p.id DESC, o.position",
            Self::POLL_SELECT
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Self::fold_poll_rows(&rows)
    }

    // Records one vote: ballot insert plus in-place count increments, all in
    // one transaction. Increments are guarded by the active window so a vote
    // racing an early termination can never land on a closed poll.
    pub async fn cast_vote(
        &self,
        poll_id: i64,
        option_id: &str,
        voter_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status, expires_at FROM polls WHERE id = ?")
            .bind(poll_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound)?;

        let status_str: String = row.get("status");
        let status = PollStatus::parse(&status_str)
            .ok_or_else(|| AppError::Corrupt(format!("unknown poll status: {}", status_str)))?;
        let expires_at = Self::parse_timestamp(&row.get::<String, _>("expires_at"))?;

        if status != PollStatus::Active || now >= expires_at {
            return Err(AppError::PollClosed);
        }

        let ballot = sqlx::query(
            "INSERT INTO ballots (poll_id, voter_id, option_id, cast_at) VALUES (?, ?, ?, ?)",
        )
        .bind(poll_id)
        .bind(voter_id)
        .bind(option_id)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await;

        if let Err(e) = ballot {
            let duplicate = e
                .as_database_error()
                .map(|db_err| db_err.is_unique_violation())
                .unwrap_or(false);
            if duplicate {
                return Err(AppError::AlreadyVoted);
            }
            return Err(e.into());
        }

        let updated =
            sqlx::query("UPDATE poll_options SET vote_count = vote_count + 1 WHERE poll_id = ? AND id = ?")
                .bind(poll_id)
                .bind(option_id)
                .execute(&mut *tx)
                .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::Validation("존재하지 않는 선택지입니다.".into()));
        }

        let updated = sqlx::query(
            "UPDATE polls SET vote_count = vote_count + 1 WHERE id = ? AND status = 'active' AND expires_at > ?",
        )
        .bind(poll_id)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            // A concurrent close won the race; drop the whole vote.
            return Err(AppError::PollClosed);
        }

        tx.commit().await?;
        self.notify(poll_id, ChangeKind::Updated);
        Ok(())
    }

    // Early termination by the poll's creator. A poll already past its
    // scheduled expiry is closed as a normal end (ended_at stays NULL).
    pub async fn end_poll(
        &self,
        poll_id: i64,
        voter_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT creator_id, status, expires_at FROM polls WHERE id = ?")
            .bind(poll_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound)?;

        let creator_id: Option<String> = row.get("creator_id");
        if creator_id.as_deref() != Some(voter_id) {
            return Err(AppError::Forbidden);
        }

        let status_str: String = row.get("status");
        let status = PollStatus::parse(&status_str)
            .ok_or_else(|| AppError::Corrupt(format!("unknown poll status: {}", status_str)))?;
        if status != PollStatus::Active {
            return Err(AppError::PollClosed);
        }

        let expires_at = Self::parse_timestamp(&row.get::<String, _>("expires_at"))?;
        let updated = if now < expires_at {
            sqlx::query("UPDATE polls SET status = 'closed', ended_at = ? WHERE id = ? AND status = 'active'")
                .bind(now.to_rfc3339())
                .bind(poll_id)
                .execute(&mut *tx)
                .await?
        } else {
            sqlx::query("UPDATE polls SET status = 'closed' WHERE id = ? AND status = 'active'")
                .bind(poll_id)
                .execute(&mut *tx)
                .await?
        };
        if updated.rows_affected() == 0 {
            return Err(AppError::PollClosed);
        }

        tx.commit().await?;
        self.notify(poll_id, ChangeKind::Closed);
        Ok(())
    }

    pub async fn delete_poll(&self, poll_id: i64, voter_id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT creator_id FROM polls WHERE id = ?")
            .bind(poll_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound)?;

        let creator_id: Option<String> = row.get("creator_id");
        if creator_id.as_deref() != Some(voter_id) {
            return Err(AppError::Forbidden);
        }

        for table in ["ballots", "poll_options", "hidden_polls", "reports"] {
            sqlx::query(&format!("DELETE FROM {} WHERE poll_id = ?", table))
                .bind(poll_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM polls WHERE id = ?")
            .bind(poll_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.notify(poll_id, ChangeKind::Deleted);
        Ok(())
    }

    // Polls that have passed their end time and are still marked active.
    pub async fn get_expired_polls(&self, now: DateTime<Utc>) -> Result<Vec<i64>, AppError> {
        let rows = sqlx::query("SELECT id FROM polls WHERE status = 'active' AND expires_at < ?")
            .bind(now.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    // Normal expiry: status flips to closed, ended_at stays NULL.
    pub async fn close_poll(&self, poll_id: i64) -> Result<bool, AppError> {
        let updated = sqlx::query("UPDATE polls SET status = 'closed' WHERE id = ? AND status = 'active'")
            .bind(poll_id)
            .execute(&self.pool)
            .await?;

        let closed = updated.rows_affected() > 0;
        if closed {
            self.notify(poll_id, ChangeKind::Closed);
        }
        Ok(closed)
    }

    pub async fn ballot_option(
        &self,
        poll_id: i64,
        voter_id: &str,
    ) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT option_id FROM ballots WHERE poll_id = ? AND voter_id = ?")
            .bind(poll_id)
            .bind(voter_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("option_id")))
    }

    // Every choice this voter has made, keyed by poll id.
    pub async fn ballot_options_for(
        &self,
        voter_id: &str,
    ) -> Result<HashMap<i64, String>, AppError> {
        let rows = sqlx::query("SELECT poll_id, option_id FROM ballots WHERE voter_id = ?")
            .bind(voter_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("poll_id"), row.get("option_id")))
            .collect())
    }

    pub async fn touch_voter(&self, voter_id: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO voters (id, created_at, last_seen_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(voter_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn hide_poll(
        &self,
        voter_id: &str,
        poll_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query("SELECT 1 FROM polls WHERE id = ?")
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound)?;

        sqlx::query(
            r#"
            INSERT INTO hidden_polls (voter_id, poll_id, hidden_at)
            VALUES (?, ?, ?)
            ON CONFLICT(voter_id, poll_id) DO NOTHING
            "#,
        )
        .bind(voter_id)
        .bind(poll_id)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn restore_poll(&self, voter_id: &str, poll_id: i64) -> Result<(), AppError> {
        let deleted = sqlx::query("DELETE FROM hidden_polls WHERE voter_id = ? AND poll_id = ?")
            .bind(voter_id)
            .bind(poll_id)
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    pub async fn hidden_ids(&self, voter_id: &str) -> Result<HashSet<i64>, AppError> {
        let rows = sqlx::query("SELECT poll_id FROM hidden_polls WHERE voter_id = ?")
            .bind(voter_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("poll_id")).collect())
    }

    pub async fn hidden_polls(&self, voter_id: &str) -> Result<Vec<HiddenPoll>, AppError> {
        let rows = sqlx::query(
            "SELECT poll_id, hidden_at FROM hidden_polls WHERE voter_id = ? ORDER BY hidden_at DESC",
        )
        .bind(voter_id)
        .fetch_all(&self.pool)
        .await?;

        let mut hidden = Vec::with_capacity(rows.len());
        for row in rows {
            let poll_id: i64 = row.get("poll_id");
            let hidden_at = Self::parse_timestamp(&row.get::<String, _>("hidden_at"))?;
            match self.get_poll(poll_id).await {
                Ok(poll) => hidden.push(HiddenPoll { poll, hidden_at }),
                // The poll may have been deleted since it was hidden.
                Err(AppError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(hidden)
    }

    pub async fn report_poll(
        &self,
        poll_id: i64,
        reporter_id: Option<&str>,
        reason: &str,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        if reason.trim().is_empty() {
            return Err(AppError::Validation("신고 사유를 입력해주세요.".into()));
        }

        sqlx::query("SELECT 1 FROM polls WHERE id = ?")
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound)?;

        let result = sqlx::query(
            r#"
            INSERT INTO reports (poll_id, reporter_id, reason, description, status, created_at)
            VALUES (?, ?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(poll_id)
        .bind(reporter_id)
        .bind(reason.trim())
        .bind(description)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    // Per-poll report aggregation for the admin screen. Polls whose report
    // count reaches the threshold are flagged auto-hidden.
    pub async fn list_reports(&self, auto_hide_threshold: i64) -> Result<Vec<ReportedPoll>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT r.poll_id, p.title, r.reason, r.created_at
            FROM reports r
            JOIN polls p ON p.id = r.poll_id
            ORDER BY r.created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_poll: BTreeMap<i64, ReportedPoll> = BTreeMap::new();
        for row in rows {
            let poll_id: i64 = row.get("poll_id");
            let reason: String = row.get("reason");
            let created_at = Self::parse_timestamp(&row.get::<String, _>("created_at"))?;

            let entry = by_poll.entry(poll_id).or_insert_with(|| ReportedPoll {
                poll_id,
                title: row.get("title"),
                report_count: 0,
                reasons: Vec::new(),
                last_reported: created_at,
                auto_hidden: false,
            });
            entry.report_count += 1;
            if !entry.reasons.contains(&reason) {
                entry.reasons.push(reason);
            }
            if created_at > entry.last_reported {
                entry.last_reported = created_at;
            }
        }

        let mut reported: Vec<ReportedPoll> = by_poll.into_values().collect();
        for poll in &mut reported {
            poll.auto_hidden = poll.report_count >= auto_hide_threshold;
        }
        reported.sort_by(|a, b| b.last_reported.cmp(&a.last_reported));
        Ok(reported)
    }

    pub async fn review_report(
        &self,
        report_id: i64,
        status: ReportStatus,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let updated = sqlx::query("UPDATE reports SET status = ?, reviewed_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now.to_rfc3339())
            .bind(report_id)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPollOption;
    use chrono::Duration;

    async fn test_db() -> Database {
        Database::open_in_memory().await.expect("in-memory database")
    }

    fn new_poll(now: DateTime<Utc>, option_names: &[&str]) -> NewPoll {
        NewPoll {
            title: "점심 메뉴 투표".to_string(),
            description: Some("오늘 점심 뭐 먹을까요".to_string()),
            options: option_names
                .iter()
                .map(|name| NewPollOption { name: name.to_string(), color: None })
                .collect(),
            expires_at: now + Duration::hours(2),
        }
    }

    #[tokio::test]
    async fn create_assigns_ids_and_colors_by_position() {
        let db = test_db().await;
        let now = Utc::now();

        let poll = db
            .create_poll(&new_poll(now, &["한식", "중식", "양식"]), "creator-1", now)
            .await
            .expect("create poll");

        assert!(poll.id > 0);
        assert_eq!(poll.status, PollStatus::Active);
        assert_eq!(poll.vote_count, 0);
        assert_eq!(poll.creator_id.as_deref(), Some("creator-1"));
        assert!(poll.ended_at.is_none());

        let ids: Vec<&str> = poll.options.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["opt1", "opt2", "opt3"]);
        let colors: Vec<ColorTag> = poll.options.iter().map(|o| o.color).collect();
        assert_eq!(colors, OPTION_COLORS.to_vec());
        assert!(poll.options.iter().all(|o| o.vote_count == 0));
    }

    #[tokio::test]
    async fn sequential_votes_keep_totals_consistent() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["치킨", "피자", "고민 중"]), "creator-1", now)
            .await
            .expect("create poll");

        let casts = [
            ("voter-1", "opt1"),
            ("voter-2", "opt1"),
            ("voter-3", "opt2"),
            ("voter-4", "opt3"),
            ("voter-5", "opt1"),
        ];
        for (voter, option) in casts {
            db.cast_vote(poll.id, option, voter, now).await.expect("cast vote");
        }

        let poll = db.get_poll(poll.id).await.expect("refetch poll");
        assert_eq!(poll.vote_count, 5);
        let sum: i64 = poll.options.iter().map(|o| o.vote_count).sum();
        assert_eq!(poll.vote_count, sum);
        assert_eq!(poll.options[0].vote_count, 3);
        assert_eq!(poll.options[1].vote_count, 1);
        assert_eq!(poll.options[2].vote_count, 1);
    }

    #[tokio::test]
    async fn concurrent_votes_are_all_counted() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");

        let mut handles = Vec::new();
        for i in 0..4 {
            let db = db.clone();
            let poll_id = poll.id;
            handles.push(tokio::spawn(async move {
                let option = if i % 2 == 0 { "opt1" } else { "opt2" };
                db.cast_vote(poll_id, option, &format!("voter-{}", i), now).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("cast vote");
        }

        let poll = db.get_poll(poll.id).await.expect("refetch poll");
        assert_eq!(poll.vote_count, 4);
        assert_eq!(poll.options.iter().map(|o| o.vote_count).sum::<i64>(), 4);
    }

    #[tokio::test]
    async fn duplicate_vote_is_rejected_without_counting() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");

        db.cast_vote(poll.id, "opt1", "voter-1", now).await.expect("first vote");
        let second = db.cast_vote(poll.id, "opt2", "voter-1", now).await;
        assert!(matches!(second, Err(AppError::AlreadyVoted)));

        let poll = db.get_poll(poll.id).await.expect("refetch poll");
        assert_eq!(poll.vote_count, 1);
        assert_eq!(poll.options[0].vote_count, 1);
        assert_eq!(poll.options[1].vote_count, 0);
    }

    #[tokio::test]
    async fn vote_on_missing_poll_is_not_found() {
        let db = test_db().await;
        let result = db.cast_vote(999, "opt1", "voter-1", Utc::now()).await;
        assert!(matches!(result, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn vote_on_unknown_option_rolls_back_ballot() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");

        let bad = db.cast_vote(poll.id, "opt9", "voter-1", now).await;
        assert!(matches!(bad, Err(AppError::Validation(_))));

        // The rolled-back ballot must not block a valid retry.
        db.cast_vote(poll.id, "opt1", "voter-1", now).await.expect("retry vote");
        let poll = db.get_poll(poll.id).await.expect("refetch poll");
        assert_eq!(poll.vote_count, 1);
    }

    #[tokio::test]
    async fn vote_after_expiry_is_rejected() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");

        let later = now + Duration::hours(3);
        let result = db.cast_vote(poll.id, "opt1", "voter-1", later).await;
        assert!(matches!(result, Err(AppError::PollClosed)));
    }

    #[tokio::test]
    async fn early_end_freezes_votes_and_sets_ended_at() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");

        let end_time = now + Duration::minutes(30);
        db.end_poll(poll.id, "creator-1", end_time).await.expect("end poll");

        let poll = db.get_poll(poll.id).await.expect("refetch poll");
        assert_eq!(poll.status, PollStatus::Closed);
        assert_eq!(poll.ended_at, Some(end_time));

        let vote = db.cast_vote(poll.id, "opt1", "voter-1", end_time).await;
        assert!(matches!(vote, Err(AppError::PollClosed)));
    }

    #[tokio::test]
    async fn end_poll_requires_creator() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");

        let result = db.end_poll(poll.id, "someone-else", now).await;
        assert!(matches!(result, Err(AppError::Forbidden)));

        let again = db.end_poll(poll.id, "creator-1", now).await;
        assert!(again.is_ok());
        let twice = db.end_poll(poll.id, "creator-1", now).await;
        assert!(matches!(twice, Err(AppError::PollClosed)));
    }

    #[tokio::test]
    async fn end_after_scheduled_expiry_is_a_normal_close() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");

        let later = now + Duration::hours(3);
        db.end_poll(poll.id, "creator-1", later).await.expect("end poll");

        let poll = db.get_poll(poll.id).await.expect("refetch poll");
        assert_eq!(poll.status, PollStatus::Closed);
        assert!(poll.ended_at.is_none());
    }

    #[tokio::test]
    async fn expiry_sweep_closes_overdue_polls() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");

        assert!(db.get_expired_polls(now).await.expect("sweep query").is_empty());

        let later = now + Duration::hours(3);
        let expired = db.get_expired_polls(later).await.expect("sweep query");
        assert_eq!(expired, vec![poll.id]);

        assert!(db.close_poll(poll.id).await.expect("close poll"));
        assert!(!db.close_poll(poll.id).await.expect("second close is a no-op"));

        let poll = db.get_poll(poll.id).await.expect("refetch poll");
        assert_eq!(poll.status, PollStatus::Closed);
        assert!(poll.ended_at.is_none());
    }

    #[tokio::test]
    async fn list_polls_is_newest_first() {
        let db = test_db().await;
        let now = Utc::now();
        let first = db
            .create_poll(&new_poll(now, &["a", "b"]), "creator-1", now)
            .await
            .expect("create poll");
        let second = db
            .create_poll(&new_poll(now, &["c", "d"]), "creator-1", now + Duration::seconds(1))
            .await
            .expect("create poll");

        let polls = db.list_polls().await.expect("list polls");
        let ids: Vec<i64> = polls.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert!(polls.iter().all(|p| p.options.len() == 2));
    }

    #[tokio::test]
    async fn change_feed_reports_committed_writes() {
        let db = test_db().await;
        let now = Utc::now();
        let mut rx = db.subscribe();

        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");
        db.cast_vote(poll.id, "opt1", "voter-1", now).await.expect("cast vote");
        db.end_poll(poll.id, "creator-1", now + Duration::minutes(1))
            .await
            .expect("end poll");

        let created = rx.recv().await.expect("created event");
        assert_eq!((created.poll_id, created.kind), (poll.id, ChangeKind::Created));
        let updated = rx.recv().await.expect("updated event");
        assert_eq!((updated.poll_id, updated.kind), (poll.id, ChangeKind::Updated));
        let closed = rx.recv().await.expect("closed event");
        assert_eq!((closed.poll_id, closed.kind), (poll.id, ChangeKind::Closed));
    }

    #[tokio::test]
    async fn failed_vote_emits_no_change() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");

        let mut rx = db.subscribe();
        let result = db.cast_vote(poll.id, "opt9", "voter-1", now).await;
        assert!(result.is_err());
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn hide_and_restore_round_trip() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");

        db.hide_poll("voter-1", poll.id, now).await.expect("hide");
        // Hiding twice is idempotent.
        db.hide_poll("voter-1", poll.id, now).await.expect("hide again");

        let ids = db.hidden_ids("voter-1").await.expect("hidden ids");
        assert!(ids.contains(&poll.id));
        assert!(db.hidden_ids("voter-2").await.expect("hidden ids").is_empty());

        let hidden = db.hidden_polls("voter-1").await.expect("hidden polls");
        assert_eq!(hidden.len(), 1);
        assert_eq!(hidden[0].poll.id, poll.id);

        db.restore_poll("voter-1", poll.id).await.expect("restore");
        assert!(db.hidden_ids("voter-1").await.expect("hidden ids").is_empty());

        let missing = db.restore_poll("voter-1", poll.id).await;
        assert!(matches!(missing, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn hide_missing_poll_is_not_found() {
        let db = test_db().await;
        let result = db.hide_poll("voter-1", 999, Utc::now()).await;
        assert!(matches!(result, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn reports_aggregate_per_poll() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");

        db.report_poll(poll.id, Some("voter-1"), "스팸", None, now)
            .await
            .expect("report");
        db.report_poll(poll.id, Some("voter-2"), "부적절한 내용", Some("설명"), now + Duration::minutes(5))
            .await
            .expect("report");
        db.report_poll(poll.id, None, "스팸", None, now + Duration::minutes(10))
            .await
            .expect("report");

        let reported = db.list_reports(3).await.expect("list reports");
        assert_eq!(reported.len(), 1);
        let summary = &reported[0];
        assert_eq!(summary.poll_id, poll.id);
        assert_eq!(summary.report_count, 3);
        assert_eq!(summary.reasons, vec!["스팸".to_string(), "부적절한 내용".to_string()]);
        assert_eq!(summary.last_reported, now + Duration::minutes(10));
        assert!(summary.auto_hidden);

        let below_threshold = db.list_reports(5).await.expect("list reports");
        assert!(!below_threshold[0].auto_hidden);
    }

    #[tokio::test]
    async fn report_requires_reason_and_existing_poll() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");

        let blank = db.report_poll(poll.id, None, "   ", None, now).await;
        assert!(matches!(blank, Err(AppError::Validation(_))));

        let missing = db.report_poll(999, None, "스팸", None, now).await;
        assert!(matches!(missing, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn review_report_updates_status() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");
        let report_id = db
            .report_poll(poll.id, None, "스팸", None, now)
            .await
            .expect("report");

        db.review_report(report_id, ReportStatus::Dismissed, now)
            .await
            .expect("review");
        let missing = db.review_report(999, ReportStatus::Reviewed, now).await;
        assert!(matches!(missing, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn ballots_track_voter_choice() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");

        assert_eq!(db.ballot_option(poll.id, "voter-1").await.expect("lookup"), None);
        db.cast_vote(poll.id, "opt2", "voter-1", now).await.expect("cast vote");
        assert_eq!(
            db.ballot_option(poll.id, "voter-1").await.expect("lookup"),
            Some("opt2".to_string())
        );

        let all = db.ballot_options_for("voter-1").await.expect("lookup all");
        assert_eq!(all.get(&poll.id), Some(&"opt2".to_string()));
    }

    #[tokio::test]
    async fn delete_poll_removes_dependents() {
        let db = test_db().await;
        let now = Utc::now();
        let poll = db
            .create_poll(&new_poll(now, &["찬성", "반대"]), "creator-1", now)
            .await
            .expect("create poll");
        db.cast_vote(poll.id, "opt1", "voter-1", now).await.expect("cast vote");
        db.hide_poll("voter-2", poll.id, now).await.expect("hide");
        db.report_poll(poll.id, None, "스팸", None, now).await.expect("report");

        let denied = db.delete_poll(poll.id, "someone-else").await;
        assert!(matches!(denied, Err(AppError::Forbidden)));

        db.delete_poll(poll.id, "creator-1").await.expect("delete");
        assert!(matches!(db.get_poll(poll.id).await, Err(AppError::NotFound)));
        assert!(db.hidden_polls("voter-2").await.expect("hidden polls").is_empty());
        assert!(db.list_reports(1).await.expect("reports").is_empty());
        assert!(db.ballot_options_for("voter-1").await.expect("ballots").is_empty());
    }

    #[tokio::test]
    async fn touch_voter_upserts() {
        let db = test_db().await;
        let now = Utc::now();
        db.touch_voter("voter-1", now).await.expect("first touch");
        db.touch_voter("voter-1", now + Duration::minutes(1))
            .await
            .expect("second touch");
    }
}
