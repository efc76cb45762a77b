//! Mock publisher for testing
//!
//! A configurable fake adapter used by the dispatcher and retry tests to
//! verify delivery logic without network access. It records every publish
//! call, so tests can assert not just outcomes but whether an actual
//! delivery attempt happened.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::sync::{Arc, Mutex};

use crate::error::{PlatformError, Result};
use crate::platforms::Publisher;
use crate::types::{Credential, Post};

/// Configuration for mock publisher behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Platform name the mock registers under (e.g. "mastodon")
    pub name: String,

    /// Whether publishing should succeed
    pub publish_succeeds: bool,

    /// Error to return on publish failure
    pub publish_error: Option<String>,

    /// Secret the mock expects; any other credential is rejected
    pub expected_secret: Option<String>,

    /// Character limit for validation
    pub character_limit: Option<usize>,

    /// Number of times publish has been called
    pub publish_call_count: Arc<Mutex<usize>>,

    /// (post id, content) pairs that reached the adapter
    pub published: Arc<Mutex<Vec<(String, String)>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            publish_succeeds: true,
            publish_error: None,
            expected_secret: None,
            character_limit: None,
            publish_call_count: Arc::new(Mutex::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

pub struct MockPublisher {
    config: MockConfig,
}

impl MockPublisher {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// A mock that accepts every publish.
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// A mock that fails every publish with the given error.
    pub fn publish_failure(name: &str, error: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            publish_succeeds: false,
            publish_error: Some(error.to_string()),
            ..Default::default()
        })
    }

    /// A mock that only accepts credentials carrying `secret`.
    pub fn expecting_secret(name: &str, secret: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            expected_secret: Some(secret.to_string()),
            ..Default::default()
        })
    }

    /// A mock with a character limit.
    pub fn with_limit(name: &str, limit: usize) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            character_limit: Some(limit),
            ..Default::default()
        })
    }

    /// Number of times publish was called, including failed attempts.
    pub fn publish_call_count(&self) -> usize {
        *self.config.publish_call_count.lock().unwrap()
    }

    /// (post id, content) pairs that were successfully delivered.
    pub fn published(&self) -> Vec<(String, String)> {
        self.config.published.lock().unwrap().clone()
    }

    /// Shared handles so a test can keep asserting after the mock moves
    /// into a registry.
    pub fn handles(&self) -> (Arc<Mutex<usize>>, Arc<Mutex<Vec<(String, String)>>>) {
        (
            Arc::clone(&self.config.publish_call_count),
            Arc::clone(&self.config.published),
        )
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, post: &Post, credential: &Credential) -> Result<String> {
        *self.config.publish_call_count.lock().unwrap() += 1;

        if let Some(expected) = &self.config.expected_secret {
            if credential.secret.expose_secret() != expected {
                return Err(
                    PlatformError::Authentication("Mock rejected credential".to_string()).into(),
                );
            }
        }

        if !self.config.publish_succeeds {
            let error_msg = self
                .config
                .publish_error
                .clone()
                .unwrap_or_else(|| "Mock publishing failed".to_string());
            return Err(PlatformError::Publishing(error_msg).into());
        }

        self.config
            .published
            .lock()
            .unwrap()
            .push((post.id.clone(), post.content.clone()));

        Ok(format!("{}:mock-{}", self.config.name, uuid::Uuid::new_v4()))
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        if content.is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }

        if let Some(limit) = self.config.character_limit {
            let length = content.chars().count();
            if length > limit {
                return Err(PlatformError::Validation(format!(
                    "Content exceeds {} character limit (got {} characters)",
                    limit, length
                ))
                .into());
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn character_limit(&self) -> Option<usize> {
        self.config.character_limit
    }
}
