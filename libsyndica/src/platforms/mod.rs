//! Publisher abstraction and implementations
//!
//! Each platform adapter implements the [`Publisher`] trait, and the
//! dispatcher looks adapters up in a [`PublisherRegistry`] keyed by the
//! post's platform identifier. Adding a platform means registering another
//! implementation, not touching dispatch logic.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::PlatformsConfig;
use crate::error::{PlatformError, Result};
use crate::types::{Credential, Post};

pub mod mastodon;

// Mock publisher is available for all builds (not just tests) to support
// integration tests
pub mod mock;

/// A platform adapter capable of delivering one post.
///
/// Implementations are stateless with respect to credentials: the decrypted
/// credential for the post's owner is passed into each call and dropped
/// afterwards.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Deliver the post to the platform and return the platform-specific
    /// post ID.
    ///
    /// # Errors
    ///
    /// - `PlatformError::Authentication` when the credential is rejected
    /// - `PlatformError::Publishing` when the platform refuses the post
    /// - `PlatformError::Network` on transport failures
    async fn publish(&self, post: &Post, credential: &Credential) -> Result<String>;

    /// Check content against platform rules before attempting delivery.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Validation` if the content cannot be posted.
    fn validate_content(&self, content: &str) -> Result<()>;

    /// Lowercase platform identifier (e.g. "mastodon"), matching the
    /// `platform` column on posts and credentials.
    fn name(&self) -> &str;

    /// Maximum post length, or `None` when the platform has no hard limit.
    fn character_limit(&self) -> Option<usize> {
        None
    }
}

impl std::fmt::Debug for dyn Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("name", &self.name())
            .finish()
    }
}

/// Registry of publishers keyed by platform identifier.
#[derive(Default)]
pub struct PublisherRegistry {
    publishers: HashMap<String, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration, registering every enabled
    /// platform.
    pub fn from_config(config: &PlatformsConfig) -> Self {
        let mut registry = Self::new();
        if let Some(mastodon) = &config.mastodon {
            if mastodon.enabled {
                registry.register(Arc::new(mastodon::MastodonPublisher::new(
                    &mastodon.base_url,
                )));
            }
        }
        registry
    }

    pub fn register(&mut self, publisher: Arc<dyn Publisher>) {
        self.publishers
            .insert(publisher.name().to_string(), publisher);
    }

    /// Look up the publisher for a platform identifier.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::UnsupportedPlatform` when nothing is
    /// registered under that name.
    pub fn get(&self, platform: &str) -> Result<Arc<dyn Publisher>> {
        self.publishers
            .get(platform)
            .cloned()
            .ok_or_else(|| PlatformError::UnsupportedPlatform(platform.to_string()).into())
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }

    /// Registered platform identifiers, sorted.
    pub fn platforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.publishers.keys().cloned().collect();
        names.sort();
        names
    }
}
