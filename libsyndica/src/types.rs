//! Core types for Syndica

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scheduled piece of content targeting one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub platform: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub status: PostStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<i64>,
    pub recycled_from: Option<String>,
    pub recycle_count: i64,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Post {
    pub fn new(
        user_id: impl Into<String>,
        content: impl Into<String>,
        platform: impl Into<String>,
        scheduled_date: NaiveDate,
        scheduled_time: NaiveTime,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            content: content.into(),
            platform: platform.into(),
            scheduled_date,
            scheduled_time,
            status: PostStatus::Scheduled,
            approved_by: None,
            approved_at: None,
            recycled_from: None,
            recycle_count: 0,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The instant after which this post becomes eligible for publication.
    pub fn due_instant(&self) -> DateTime<Utc> {
        NaiveDateTime::new(self.scheduled_date, self.scheduled_time).and_utc()
    }

    /// True once the due instant has passed relative to `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_instant() <= now
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Scheduled,
    PendingReview,
    Approved,
    Rejected,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::PendingReview => "pending_review",
            PostStatus::Approved => "approved",
            PostStatus::Rejected => "rejected",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PostStatus::Draft),
            "scheduled" => Some(PostStatus::Scheduled),
            "pending_review" => Some(PostStatus::PendingReview),
            "approved" => Some(PostStatus::Approved),
            "rejected" => Some(PostStatus::Rejected),
            "published" => Some(PostStatus::Published),
            "failed" => Some(PostStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A publishing credential row as persisted: the secret material is a vault
/// blob, never plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformCredential {
    pub id: Option<i64>,
    pub user_id: String,
    pub platform: String,
    pub encrypted_secret: String,
    pub encrypted_refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub active: bool,
    pub last_used_at: Option<i64>,
    pub created_at: i64,
}

/// Decrypted credential handed to a publisher for one delivery. Exists only
/// inside the vault boundary and the adapter call.
pub struct Credential {
    pub user_id: String,
    pub platform: String,
    pub secret: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<i64>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("platform", &self.platform)
            .field("secret", &"[redacted]")
            .finish_non_exhaustive()
    }
}

/// One failed dispatch within a sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchError {
    pub post_id: String,
    pub message: String,
}

/// Outcome of one dispatcher sweep.
///
/// `successful + failed == processed` holds by construction: counts only
/// move through [`DispatchSummary::record_success`] and
/// [`DispatchSummary::record_failure`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<DispatchError>,
}

impl DispatchSummary {
    pub fn record_success(&mut self) {
        self.processed += 1;
        self.successful += 1;
    }

    pub fn record_failure(&mut self, post_id: impl Into<String>, message: impl Into<String>) {
        self.processed += 1;
        self.failed += 1;
        self.errors.push(DispatchError {
            post_id: post_id.into(),
            message: message.into(),
        });
    }

    pub fn is_consistent(&self) -> bool {
        self.successful + self.failed == self.processed && self.errors.len() == self.failed
    }
}

/// Outcome of one retry pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySummary {
    /// Posts moved back into the pipeline (rescheduled or published).
    pub retried: Vec<String>,
    /// Posts left in `failed`, with the reason.
    pub still_failed: Vec<(String, String)>,
}

/// Read-only aggregate view of the queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStatus {
    /// Scheduled, due instant in the future.
    pub pending: i64,
    /// Scheduled, due instant at or before now.
    pub due: i64,
    /// Scheduled, past due by more than the overdue grace period.
    pub overdue: i64,
    /// In `failed` state, awaiting the retry coordinator.
    pub failed: i64,
}
