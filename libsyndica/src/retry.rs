//! Retry coordinator for failed posts
//!
//! Failed posts whose due instant is still ahead go back to `scheduled`
//! with no adapter traffic; the next dispatch sweep will pick them up at
//! the right time. Posts already past due get an immediate delivery
//! attempt. Every pass through the coordinator consumes one retry, and a
//! post that has exhausted its retries stays `failed`.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::dispatcher::{attempt_delivery, DeliveryAttempt};
use crate::error::Result;
use crate::platforms::PublisherRegistry;
use crate::store::Store;
use crate::types::{PostStatus, RetrySummary};
use crate::vault::Vault;

pub struct RetryCoordinator {
    store: Store,
    vault: Arc<Vault>,
    registry: Arc<PublisherRegistry>,
    max_retries: u32,
}

impl RetryCoordinator {
    pub fn new(
        store: Store,
        vault: Arc<Vault>,
        registry: Arc<PublisherRegistry>,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            vault,
            registry,
            max_retries,
        }
    }

    /// One retry pass over failed posts, optionally restricted to
    /// `post_ids`. Ids that do not name a currently-failed post are
    /// silently skipped.
    pub async fn retry_failed_posts(
        &self,
        now: DateTime<Utc>,
        post_ids: Option<&[String]>,
    ) -> Result<RetrySummary> {
        let failed = self.store.failed_posts(post_ids).await?;
        info!(failed = failed.len(), "retry pass started");

        let mut summary = RetrySummary::default();

        for post in failed {
            if post.retry_count >= i64::from(self.max_retries) {
                debug!(
                    post_id = %post.id,
                    retry_count = post.retry_count,
                    "retry limit reached"
                );
                summary.still_failed.push((
                    post.id.clone(),
                    format!("retry limit reached ({})", self.max_retries),
                ));
                continue;
            }

            if !post.is_due(now) {
                // Not due yet: hand the post back to the dispatcher without
                // touching the adapter.
                let won = self
                    .store
                    .transition(&post.id, PostStatus::Failed, PostStatus::Scheduled, now)
                    .await?;
                if won {
                    self.store.increment_retry_count(&post.id, now).await?;
                    info!(post_id = %post.id, "post rescheduled for its due instant");
                    summary.retried.push(post.id.clone());
                } else {
                    warn!(post_id = %post.id, "post already transitioned by a concurrent pass");
                }
                continue;
            }

            // Past due: the pipeline owes it an immediate delivery attempt.
            self.store.increment_retry_count(&post.id, now).await?;

            match attempt_delivery(&self.store, &self.vault, &self.registry, &post, now).await? {
                DeliveryAttempt::Delivered(platform_post_id) => {
                    let won = self
                        .store
                        .transition(&post.id, PostStatus::Failed, PostStatus::Published, now)
                        .await?;
                    if won {
                        info!(
                            post_id = %post.id,
                            platform_post_id = %platform_post_id,
                            "post published on retry"
                        );
                        summary.retried.push(post.id.clone());
                    } else {
                        warn!(post_id = %post.id, "post already transitioned by a concurrent pass");
                    }
                }
                DeliveryAttempt::Rejected(message) => {
                    // Stays failed; refresh the recorded error.
                    self.store
                        .mark_failed(&post.id, PostStatus::Failed, &message, now)
                        .await?;
                    warn!(post_id = %post.id, error = %message, "retry attempt failed");
                    summary.still_failed.push((post.id.clone(), message));
                }
            }
        }

        info!(
            retried = summary.retried.len(),
            still_failed = summary.still_failed.len(),
            "retry pass complete"
        );

        Ok(summary)
    }
}
