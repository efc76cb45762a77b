//! Dispatch sweep over due scheduled posts
//!
//! One sweep selects every `scheduled` post whose due instant has passed,
//! attempts an actual delivery through the platform adapter, and only then
//! writes the post's terminal status back with a conditional update. A post
//! is never marked `published` unless an adapter delivery attempt happened
//! and succeeded.
//!
//! Failure isolation: anything that goes wrong with one post (missing
//! credential, adapter rejection, network error) fails that post and the
//! sweep moves on. Store failures abort the whole run.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::platforms::PublisherRegistry;
use crate::store::Store;
use crate::types::{DispatchSummary, Post, PostStatus};
use crate::vault::Vault;

/// Outcome of one adapter delivery attempt.
pub(crate) enum DeliveryAttempt {
    /// The platform accepted the post; carries the platform-specific id.
    Delivered(String),
    /// The attempt failed for a reason scoped to this post.
    Rejected(String),
}

/// Run the delivery pipeline for one post: adapter lookup, content
/// validation, credential fetch, publish. Per-post failures come back as
/// [`DeliveryAttempt::Rejected`]; only store failures propagate as `Err`.
pub(crate) async fn attempt_delivery(
    store: &Store,
    vault: &Vault,
    registry: &PublisherRegistry,
    post: &Post,
    now: DateTime<Utc>,
) -> Result<DeliveryAttempt> {
    let publisher = match registry.get(&post.platform) {
        Ok(publisher) => publisher,
        Err(e) => return Ok(DeliveryAttempt::Rejected(e.to_string())),
    };

    if let Err(e) = publisher.validate_content(&post.content) {
        return Ok(DeliveryAttempt::Rejected(e.to_string()));
    }

    let credential = match vault
        .get_credentials(store, &post.user_id, &post.platform, now)
        .await
    {
        Ok(credential) => credential,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => return Ok(DeliveryAttempt::Rejected(e.to_string())),
    };

    match publisher.publish(post, &credential).await {
        Ok(platform_post_id) => Ok(DeliveryAttempt::Delivered(platform_post_id)),
        Err(e) => Ok(DeliveryAttempt::Rejected(e.to_string())),
    }
}

pub struct Dispatcher {
    store: Store,
    vault: Arc<Vault>,
    registry: Arc<PublisherRegistry>,
}

impl Dispatcher {
    pub fn new(store: Store, vault: Arc<Vault>, registry: Arc<PublisherRegistry>) -> Self {
        Self {
            store,
            vault,
            registry,
        }
    }

    /// One sweep over all due posts. `now` is injected so callers (and
    /// tests) control the clock.
    ///
    /// Posts that lose the status race to a concurrent sweep are skipped
    /// and excluded from the summary counts, so
    /// `successful + failed == processed` always holds.
    pub async fn process_scheduled_posts(&self, now: DateTime<Utc>) -> Result<DispatchSummary> {
        let due = self.store.due_posts(now).await?;
        info!(due = due.len(), "dispatch sweep started");

        let mut summary = DispatchSummary::default();

        for post in due {
            debug!(post_id = %post.id, platform = %post.platform, "dispatching post");

            match attempt_delivery(&self.store, &self.vault, &self.registry, &post, now).await? {
                DeliveryAttempt::Delivered(platform_post_id) => {
                    let won = self
                        .store
                        .transition(&post.id, PostStatus::Scheduled, PostStatus::Published, now)
                        .await?;
                    if won {
                        info!(
                            post_id = %post.id,
                            platform = %post.platform,
                            platform_post_id = %platform_post_id,
                            "post published"
                        );
                        summary.record_success();
                    } else {
                        warn!(
                            post_id = %post.id,
                            "post already transitioned by a concurrent sweep"
                        );
                    }
                }
                DeliveryAttempt::Rejected(message) => {
                    let marked = self
                        .store
                        .mark_failed(&post.id, PostStatus::Scheduled, &message, now)
                        .await?;
                    if marked {
                        warn!(post_id = %post.id, error = %message, "post failed");
                        summary.record_failure(&post.id, message);
                    } else {
                        warn!(
                            post_id = %post.id,
                            "post already transitioned by a concurrent sweep"
                        );
                    }
                }
            }
        }

        info!(
            processed = summary.processed,
            successful = summary.successful,
            failed = summary.failed,
            "dispatch sweep complete"
        );

        Ok(summary)
    }
}
