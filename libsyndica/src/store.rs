//! Post store operations for Syndica
//!
//! All lifecycle mutations are conditional updates keyed on the current
//! status, so overlapping sweeps cannot double-publish a post. The guard
//! lives here, at the store level, because the trigger may run across
//! multiple processes.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::error::{Result, StoreError};
use crate::types::{PlatformCredential, Post, PostStatus, QueueStatus};

const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%H:%M:%S";

/// A scheduled post is "overdue" once it has missed at least this many
/// seconds past its due instant without being picked up.
pub const OVERDUE_GRACE_SECS: i64 = 300;

/// Lexically comparable due key, matching `scheduled_date || ' ' || scheduled_time`.
fn due_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if necessary) the database at `db_path` and run migrations.
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::IoError)?;
        }

        // Forward slashes for the SQLite URL; mode=rwc creates the file
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(StoreError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(StoreError::MigrationError)?;

        Ok(Self { pool })
    }

    /// In-memory store, used by tests and one-off tooling.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(StoreError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(StoreError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Close the underlying pool. Every query afterwards fails with a
    /// store error.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn create_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (
                id, user_id, content, platform,
                scheduled_date, scheduled_time, status,
                approved_by, approved_at, recycled_from, recycle_count,
                retry_count, last_error, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.user_id)
        .bind(&post.content)
        .bind(&post.platform)
        .bind(post.scheduled_date.format(DATE_FMT).to_string())
        .bind(post.scheduled_time.format(TIME_FMT).to_string())
        .bind(post.status.as_str())
        .bind(&post.approved_by)
        .bind(post.approved_at)
        .bind(&post.recycled_from)
        .bind(post.recycle_count)
        .bind(post.retry_count)
        .bind(&post.last_error)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;

        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query("SELECT * FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;

        row.map(|r| post_from_row(&r)).transpose()
    }

    /// All posts with status `scheduled` whose due instant is at or before
    /// `now`, ordered by due instant.
    pub async fn due_posts(&self, now: DateTime<Utc>) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM posts
            WHERE status = 'scheduled'
              AND (scheduled_date || ' ' || scheduled_time) <= ?
            ORDER BY scheduled_date, scheduled_time
            "#,
        )
        .bind(due_key(now))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// All `failed` posts, optionally restricted to the given ids.
    pub async fn failed_posts(&self, post_ids: Option<&[String]>) -> Result<Vec<Post>> {
        let rows = match post_ids {
            None => {
                sqlx::query(
                    "SELECT * FROM posts WHERE status = 'failed' \
                     ORDER BY scheduled_date, scheduled_time",
                )
                .fetch_all(&self.pool)
                .await
            }
            Some(ids) if ids.is_empty() => return Ok(Vec::new()),
            Some(ids) => {
                let placeholders = vec!["?"; ids.len()].join(", ");
                let sql = format!(
                    "SELECT * FROM posts WHERE status = 'failed' AND id IN ({}) \
                     ORDER BY scheduled_date, scheduled_time",
                    placeholders
                );
                let mut query = sqlx::query(&sql);
                for id in ids {
                    query = query.bind(id);
                }
                query.fetch_all(&self.pool).await
            }
        }
        .map_err(StoreError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Posts, newest due first, optionally filtered by status.
    pub async fn list_posts(&self, status: Option<PostStatus>) -> Result<Vec<Post>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM posts WHERE status = ? \
                     ORDER BY scheduled_date DESC, scheduled_time DESC",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM posts ORDER BY scheduled_date DESC, scheduled_time DESC",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(StoreError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Compare-and-set status transition. Returns `true` when this call won
    /// the transition; `false` means the post was no longer in `from`
    /// (a concurrent sweep got there first) and nothing changed.
    pub async fn transition(
        &self,
        post_id: &str,
        from: PostStatus,
        to: PostStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE posts SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(now.timestamp())
        .bind(post_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Conditional transition into `failed`, recording the error detail.
    pub async fn mark_failed(
        &self,
        post_id: &str,
        from: PostStatus,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE posts SET status = 'failed', last_error = ?, updated_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(error)
        .bind(now.timestamp())
        .bind(post_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn increment_retry_count(&self, post_id: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE posts SET retry_count = retry_count + 1, updated_at = ? WHERE id = ?",
        )
        .bind(now.timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;

        Ok(())
    }

    /// Read-only aggregate counts for operational visibility. Mutates nothing.
    pub async fn queue_status(&self, now: DateTime<Utc>) -> Result<QueueStatus> {
        let now_key = due_key(now);
        let overdue_key = due_key(now - chrono::Duration::seconds(OVERDUE_GRACE_SECS));

        let row = sqlx::query(
            r#"
            SELECT
                SUM(CASE WHEN status = 'scheduled'
                         AND (scheduled_date || ' ' || scheduled_time) > ?1
                    THEN 1 ELSE 0 END) AS pending,
                SUM(CASE WHEN status = 'scheduled'
                         AND (scheduled_date || ' ' || scheduled_time) <= ?1
                    THEN 1 ELSE 0 END) AS due,
                SUM(CASE WHEN status = 'scheduled'
                         AND (scheduled_date || ' ' || scheduled_time) <= ?2
                    THEN 1 ELSE 0 END) AS overdue,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed
            FROM posts
            "#,
        )
        .bind(&now_key)
        .bind(&overdue_key)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;

        Ok(QueueStatus {
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            due: row.get::<Option<i64>, _>("due").unwrap_or(0),
            overdue: row.get::<Option<i64>, _>("overdue").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
        })
    }

    pub async fn insert_credential(&self, credential: &PlatformCredential) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO platform_credentials (
                user_id, platform, encrypted_secret, encrypted_refresh_token,
                expires_at, active, last_used_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&credential.user_id)
        .bind(&credential.platform)
        .bind(&credential.encrypted_secret)
        .bind(&credential.encrypted_refresh_token)
        .bind(credential.expires_at)
        .bind(credential.active)
        .bind(credential.last_used_at)
        .bind(credential.created_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;

        Ok(())
    }

    /// The active credential row for (user, platform), if any.
    pub async fn active_credential(
        &self,
        user_id: &str,
        platform: &str,
    ) -> Result<Option<PlatformCredential>> {
        let row = sqlx::query(
            "SELECT * FROM platform_credentials \
             WHERE user_id = ? AND platform = ? AND active = 1",
        )
        .bind(user_id)
        .bind(platform)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;

        Ok(row.map(|r| credential_from_row(&r)))
    }

    pub async fn touch_credential_last_used(
        &self,
        user_id: &str,
        platform: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE platform_credentials SET last_used_at = ? \
             WHERE user_id = ? AND platform = ? AND active = 1",
        )
        .bind(now.timestamp())
        .bind(user_id)
        .bind(platform)
        .execute(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;

        Ok(())
    }
}

fn post_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Post> {
    let date_str: String = row.get("scheduled_date");
    let time_str: String = row.get("scheduled_time");
    let status_str: String = row.get("status");

    let scheduled_date = NaiveDate::parse_from_str(&date_str, DATE_FMT)
        .map_err(|e| StoreError::SqlxError(sqlx::Error::Decode(Box::new(e))))?;
    let scheduled_time = NaiveTime::parse_from_str(&time_str, TIME_FMT)
        .map_err(|e| StoreError::SqlxError(sqlx::Error::Decode(Box::new(e))))?;
    let status = PostStatus::parse(&status_str).ok_or_else(|| {
        StoreError::SqlxError(sqlx::Error::Decode(
            format!("unknown post status: {}", status_str).into(),
        ))
    })?;

    Ok(Post {
        id: row.get("id"),
        user_id: row.get("user_id"),
        content: row.get("content"),
        platform: row.get("platform"),
        scheduled_date,
        scheduled_time,
        status,
        approved_by: row.get("approved_by"),
        approved_at: row.get("approved_at"),
        recycled_from: row.get("recycled_from"),
        recycle_count: row.get("recycle_count"),
        retry_count: row.get("retry_count"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn credential_from_row(row: &sqlx::sqlite::SqliteRow) -> PlatformCredential {
    PlatformCredential {
        id: row.get("id"),
        user_id: row.get("user_id"),
        platform: row.get("platform"),
        encrypted_secret: row.get("encrypted_secret"),
        encrypted_refresh_token: row.get("encrypted_refresh_token"),
        expires_at: row.get("expires_at"),
        active: row.get::<i64, _>("active") != 0,
        last_used_at: row.get("last_used_at"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn post_at(user: &str, platform: &str, date: &str, time: &str) -> Post {
        Post::new(
            user,
            "test content",
            platform,
            NaiveDate::parse_from_str(date, DATE_FMT).unwrap(),
            NaiveTime::parse_from_str(time, TIME_FMT).unwrap(),
        )
    }

    fn at(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[tokio::test]
    async fn test_new_creates_parent_dirs_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("posts.db");
        let db_path = db_path.to_str().unwrap();

        let store = Store::new(db_path).await.unwrap();
        let post = post_at("u1", "mastodon", "2024-01-01", "10:00:00");
        store.create_post(&post).await.unwrap();
        store.close().await;

        // Reopening runs migrations again (a no-op) and sees the data
        let reopened = Store::new(db_path).await.unwrap();
        let found = reopened.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(found.id, post.id);
    }

    #[tokio::test]
    async fn test_queries_fail_after_close() {
        let store = Store::open_in_memory().await.unwrap();
        store.close().await;
        let err = store.due_posts(at("2024-01-01 10:00:00")).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_due_selection_respects_due_instant() {
        let store = Store::open_in_memory().await.unwrap();

        let due = post_at("u1", "mastodon", "2024-01-01", "10:00:00");
        let future = post_at("u1", "mastodon", "2024-01-02", "10:00:00");
        store.create_post(&due).await.unwrap();
        store.create_post(&future).await.unwrap();

        let found = store.due_posts(at("2024-01-01 10:05:00")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[tokio::test]
    async fn test_due_selection_ignores_non_scheduled_statuses() {
        let store = Store::open_in_memory().await.unwrap();

        let mut draft = post_at("u1", "mastodon", "2024-01-01", "10:00:00");
        draft.status = PostStatus::Draft;
        let mut published = post_at("u1", "mastodon", "2024-01-01", "10:00:00");
        published.status = PostStatus::Published;
        store.create_post(&draft).await.unwrap();
        store.create_post(&published).await.unwrap();

        let found = store.due_posts(at("2024-01-01 12:00:00")).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_due_selection_orders_by_due_instant() {
        let store = Store::open_in_memory().await.unwrap();

        let later = post_at("u1", "mastodon", "2024-01-01", "09:00:00");
        let earlier = post_at("u1", "mastodon", "2023-12-31", "23:30:00");
        store.create_post(&later).await.unwrap();
        store.create_post(&earlier).await.unwrap();

        let found = store.due_posts(at("2024-01-01 12:00:00")).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, earlier.id);
        assert_eq!(found[1].id, later.id);
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = Store::open_in_memory().await.unwrap();
        let post = post_at("u1", "mastodon", "2024-01-01", "10:00:00");
        store.create_post(&post).await.unwrap();
        let now = at("2024-01-01 10:05:00");

        let first = store
            .transition(&post.id, PostStatus::Scheduled, PostStatus::Published, now)
            .await
            .unwrap();
        assert!(first);

        // The losing sweep's update is a no-op
        let second = store
            .transition(&post.id, PostStatus::Scheduled, PostStatus::Published, now)
            .await
            .unwrap();
        assert!(!second);

        let stored = store.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Published);
        assert_eq!(stored.updated_at, now.timestamp());
    }

    #[tokio::test]
    async fn test_mark_failed_records_error_detail() {
        let store = Store::open_in_memory().await.unwrap();
        let post = post_at("u1", "mastodon", "2024-01-01", "10:00:00");
        store.create_post(&post).await.unwrap();

        let marked = store
            .mark_failed(
                &post.id,
                PostStatus::Scheduled,
                "network timeout",
                at("2024-01-01 10:05:00"),
            )
            .await
            .unwrap();
        assert!(marked);

        let stored = store.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("network timeout"));
    }

    #[tokio::test]
    async fn test_failed_posts_filter_by_ids() {
        let store = Store::open_in_memory().await.unwrap();
        let mut a = post_at("u1", "mastodon", "2024-01-01", "10:00:00");
        a.status = PostStatus::Failed;
        let mut b = post_at("u1", "mastodon", "2024-01-01", "11:00:00");
        b.status = PostStatus::Failed;
        store.create_post(&a).await.unwrap();
        store.create_post(&b).await.unwrap();

        let all = store.failed_posts(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let only_a = store
            .failed_posts(Some(&[a.id.clone()]))
            .await
            .unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].id, a.id);

        let none = store.failed_posts(Some(&[])).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_list_posts_with_status_filter() {
        let store = Store::open_in_memory().await.unwrap();
        let scheduled = post_at("u1", "mastodon", "2024-01-01", "10:00:00");
        let mut failed = post_at("u1", "mastodon", "2024-01-02", "10:00:00");
        failed.status = PostStatus::Failed;
        store.create_post(&scheduled).await.unwrap();
        store.create_post(&failed).await.unwrap();

        let all = store.list_posts(None).await.unwrap();
        assert_eq!(all.len(), 2);
        // Newest due first
        assert_eq!(all[0].id, failed.id);

        let only_failed = store.list_posts(Some(PostStatus::Failed)).await.unwrap();
        assert_eq!(only_failed.len(), 1);
        assert_eq!(only_failed[0].id, failed.id);
    }

    #[tokio::test]
    async fn test_increment_retry_count() {
        let store = Store::open_in_memory().await.unwrap();
        let post = post_at("u1", "mastodon", "2024-01-01", "10:00:00");
        store.create_post(&post).await.unwrap();

        store
            .increment_retry_count(&post.id, at("2024-01-01 10:05:00"))
            .await
            .unwrap();
        store
            .increment_retry_count(&post.id, at("2024-01-01 10:06:00"))
            .await
            .unwrap();

        let stored = store.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 2);
    }

    #[tokio::test]
    async fn test_queue_status_counts() {
        let store = Store::open_in_memory().await.unwrap();
        let now = at("2024-01-01 10:00:00");

        // pending: due tomorrow
        store
            .create_post(&post_at("u1", "mastodon", "2024-01-02", "10:00:00"))
            .await
            .unwrap();
        // due (but inside the overdue grace): one minute ago
        store
            .create_post(&post_at("u1", "mastodon", "2024-01-01", "09:59:00"))
            .await
            .unwrap();
        // overdue: an hour ago
        store
            .create_post(&post_at("u1", "mastodon", "2024-01-01", "09:00:00"))
            .await
            .unwrap();
        // failed
        let mut failed = post_at("u1", "mastodon", "2024-01-01", "08:00:00");
        failed.status = PostStatus::Failed;
        store.create_post(&failed).await.unwrap();

        let status = store.queue_status(now).await.unwrap();
        assert_eq!(status.pending, 1);
        assert_eq!(status.due, 2);
        assert_eq!(status.overdue, 1);
        assert_eq!(status.failed, 1);
    }

    #[tokio::test]
    async fn test_queue_status_empty_store() {
        let store = Store::open_in_memory().await.unwrap();
        let status = store.queue_status(at("2024-01-01 10:00:00")).await.unwrap();
        assert_eq!(status, QueueStatus::default());
    }

    #[tokio::test]
    async fn test_active_credential_unique_per_user_platform() {
        let store = Store::open_in_memory().await.unwrap();
        let credential = PlatformCredential {
            id: None,
            user_id: "u1".to_string(),
            platform: "mastodon".to_string(),
            encrypted_secret: "blob-1".to_string(),
            encrypted_refresh_token: None,
            expires_at: None,
            active: true,
            last_used_at: None,
            created_at: 1_700_000_000,
        };
        store.insert_credential(&credential).await.unwrap();

        // A second active row for the same (user, platform) violates the index
        let duplicate = PlatformCredential {
            encrypted_secret: "blob-2".to_string(),
            ..credential.clone()
        };
        assert!(store.insert_credential(&duplicate).await.is_err());

        // An inactive row is fine
        let inactive = PlatformCredential {
            active: false,
            encrypted_secret: "blob-3".to_string(),
            ..credential.clone()
        };
        store.insert_credential(&inactive).await.unwrap();

        let found = store.active_credential("u1", "mastodon").await.unwrap();
        assert_eq!(found.unwrap().encrypted_secret, "blob-1");
    }

    #[tokio::test]
    async fn test_touch_credential_last_used() {
        let store = Store::open_in_memory().await.unwrap();
        let credential = PlatformCredential {
            id: None,
            user_id: "u1".to_string(),
            platform: "mastodon".to_string(),
            encrypted_secret: "blob".to_string(),
            encrypted_refresh_token: None,
            expires_at: None,
            active: true,
            last_used_at: None,
            created_at: 1_700_000_000,
        };
        store.insert_credential(&credential).await.unwrap();

        let now = at("2024-01-01 10:00:00");
        store
            .touch_credential_last_used("u1", "mastodon", now)
            .await
            .unwrap();

        let found = store.active_credential("u1", "mastodon").await.unwrap().unwrap();
        assert_eq!(found.last_used_at, Some(now.timestamp()));
    }
}
