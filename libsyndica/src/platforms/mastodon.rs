//! Mastodon publisher
//!
//! Delivers posts to Mastodon (and other Fediverse servers speaking the
//! Mastodon API) through the megalodon library. The adapter holds only the
//! instance URL; the access token arrives with each publish call and a
//! fresh client is built around it, so one adapter serves every user.

use async_trait::async_trait;
use megalodon::{Megalodon as _, SNS};
use secrecy::ExposeSecret;

use crate::error::{PlatformError, Result};
use crate::platforms::Publisher;
use crate::types::{Credential, Post};

/// Default until the instance reports its own limit.
const DEFAULT_CHARACTER_LIMIT: usize = 500;

pub struct MastodonPublisher {
    base_url: String,
    character_limit: usize,
}

impl MastodonPublisher {
    pub fn new(base_url: &str) -> Self {
        // Ensure the instance URL has a scheme
        let base_url = if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url.to_string()
        } else {
            format!("https://{}", base_url)
        };

        Self {
            base_url,
            character_limit: DEFAULT_CHARACTER_LIMIT,
        }
    }

    pub fn with_character_limit(base_url: &str, character_limit: usize) -> Self {
        Self {
            character_limit,
            ..Self::new(base_url)
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Publisher for MastodonPublisher {
    async fn publish(&self, post: &Post, credential: &Credential) -> Result<String> {
        self.validate_content(&post.content)?;

        let client = megalodon::generator(
            SNS::Mastodon,
            self.base_url.clone(),
            Some(credential.secret.expose_secret().to_string()),
            None,
        )
        .map_err(|e| {
            PlatformError::Authentication(format!("Failed to create Mastodon client: {:?}", e))
        })?;

        let response = client
            .post_status(post.content.clone(), None)
            .await
            .map_err(|e| map_megalodon_error(e, "post status"))?;

        let post_id = match response.json {
            megalodon::megalodon::PostStatusOutput::Status(status) => status.id,
            megalodon::megalodon::PostStatusOutput::ScheduledStatus(scheduled) => scheduled.id,
        };

        Ok(post_id)
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }

        let char_count = content.chars().count();
        if char_count > self.character_limit {
            return Err(PlatformError::Validation(format!(
                "Content exceeds Mastodon's {} character limit (current: {} characters)",
                self.character_limit, char_count
            ))
            .into());
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "mastodon"
    }

    fn character_limit(&self) -> Option<usize> {
        Some(self.character_limit)
    }
}

/// Map megalodon errors to PlatformError.
///
/// - HTTP 401/403 → `Authentication`
/// - HTTP 422 → `Validation`
/// - HTTP 429 → `RateLimit`
/// - HTTP 5xx → `Network`
/// - everything else classified by error text, defaulting to `Network`
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> PlatformError {
    let error_str = error.to_string();
    let error_lower = error_str.to_lowercase();

    match extract_http_status(&error_str) {
        Some(401) | Some(403) => PlatformError::Authentication(format!(
            "Mastodon authentication failed ({}): {}",
            context, error_str
        )),
        Some(422) => PlatformError::Validation(format!(
            "Mastodon validation failed ({}): {}",
            context, error_str
        )),
        Some(429) => PlatformError::RateLimit(format!(
            "Mastodon rate limit exceeded ({}): {}",
            context, error_str
        )),
        Some(500..=599) => PlatformError::Network(format!(
            "Mastodon server error ({}): {}",
            context, error_str
        )),
        Some(_) => {
            PlatformError::Network(format!("Mastodon HTTP error ({}): {}", context, error_str))
        }
        None => {
            if error_lower.contains("unauthorized")
                || error_lower.contains("forbidden")
                || error_lower.contains("token")
            {
                PlatformError::Authentication(format!(
                    "Mastodon authentication failed ({}): {}",
                    context, error_str
                ))
            } else if error_lower.contains("rate limit")
                || error_lower.contains("too many requests")
            {
                PlatformError::RateLimit(format!(
                    "Mastodon rate limit exceeded ({}): {}",
                    context, error_str
                ))
            } else if error_lower.contains("validation") || error_lower.contains("unprocessable") {
                PlatformError::Validation(format!(
                    "Mastodon validation failed ({}): {}",
                    context, error_str
                ))
            } else {
                PlatformError::Network(format!("Mastodon error ({}): {}", context, error_str))
            }
        }
    }
}

/// Extract an HTTP status code from an error message, looking for patterns
/// like "HTTP 401", "status 403", or "429:".
fn extract_http_status(error_str: &str) -> Option<u16> {
    let prefixes = ["HTTP ", "status ", "code: ", "status_code: "];

    for prefix in &prefixes {
        if let Some(pos) = error_str.find(prefix) {
            let after_prefix = &error_str[pos + prefix.len()..];
            if let Some(code_str) = after_prefix.get(0..3) {
                if let Ok(code) = code_str.parse::<u16>() {
                    if (100..=599).contains(&code) {
                        return Some(code);
                    }
                }
            }
        }
    }

    // Standalone 3-digit codes followed by ':' or ' '
    for (i, window) in error_str.as_bytes().windows(4).enumerate() {
        if window[0].is_ascii_digit()
            && window[1].is_ascii_digit()
            && window[2].is_ascii_digit()
            && (window[3] == b':' || window[3] == b' ')
        {
            if let Ok(code_str) = std::str::from_utf8(&window[0..3]) {
                if let Ok(code) = code_str.parse::<u16>() {
                    if (100..=599).contains(&code) {
                        // Not part of a larger number
                        if i == 0 || !error_str.as_bytes()[i - 1].is_ascii_digit() {
                            return Some(code);
                        }
                    }
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyndicaError;

    #[test]
    fn test_publisher_creation() {
        let publisher = MastodonPublisher::new("https://mastodon.social");
        assert_eq!(publisher.name(), "mastodon");
        assert_eq!(publisher.character_limit(), Some(500));
        assert_eq!(publisher.base_url(), "https://mastodon.social");
    }

    #[test]
    fn test_base_url_normalization() {
        let bare = MastodonPublisher::new("mastodon.social");
        assert_eq!(bare.base_url(), "https://mastodon.social");

        let http = MastodonPublisher::new("http://localhost:3000");
        assert_eq!(http.base_url(), "http://localhost:3000");
    }

    #[test]
    fn test_validate_content_within_limit() {
        let publisher = MastodonPublisher::new("https://mastodon.social");
        assert!(publisher.validate_content("This is a test post").is_ok());
    }

    #[test]
    fn test_validate_content_boundary() {
        let publisher = MastodonPublisher::new("https://mastodon.social");

        let at_limit = "a".repeat(500);
        assert!(publisher.validate_content(&at_limit).is_ok());

        let over_limit = "a".repeat(501);
        let result = publisher.validate_content(&over_limit);
        match result {
            Err(SyndicaError::Platform(PlatformError::Validation(msg))) => {
                assert!(msg.contains("exceeds"));
                assert!(msg.contains("500"));
                assert!(msg.contains("501"));
            }
            _ => panic!("Expected validation error"),
        }
    }

    #[test]
    fn test_validate_content_counts_characters_not_bytes() {
        let publisher = MastodonPublisher::new("https://mastodon.social");
        assert!(publisher.validate_content(&"🦀".repeat(500)).is_ok());
        assert!(publisher.validate_content(&"🦀".repeat(501)).is_err());
    }

    #[test]
    fn test_validate_content_whitespace_only() {
        let publisher = MastodonPublisher::new("https://mastodon.social");
        assert!(publisher.validate_content("").is_err());
        assert!(publisher.validate_content("   ").is_err());
        assert!(publisher.validate_content("\t\n").is_err());
        assert!(publisher.validate_content("  hello  ").is_ok());
    }

    #[test]
    fn test_custom_character_limit() {
        let publisher =
            MastodonPublisher::with_character_limit("https://glitch.example", 5000);
        assert_eq!(publisher.character_limit(), Some(5000));
        assert!(publisher.validate_content(&"a".repeat(5000)).is_ok());
    }

    #[test]
    fn test_extract_http_status_with_prefixes() {
        assert_eq!(extract_http_status("HTTP 401 Unauthorized"), Some(401));
        assert_eq!(extract_http_status("status 404 not found"), Some(404));
        assert_eq!(extract_http_status("code: 429"), Some(429));
        assert_eq!(extract_http_status("status_code: 500"), Some(500));
    }

    #[test]
    fn test_extract_http_status_with_colon() {
        assert_eq!(extract_http_status("Error: 401: Unauthorized"), Some(401));
        assert_eq!(
            extract_http_status("Failed with 422: validation error"),
            Some(422)
        );
    }

    #[test]
    fn test_extract_http_status_no_code() {
        assert_eq!(extract_http_status("Network error"), None);
        assert_eq!(extract_http_status("Something went wrong"), None);
    }

    #[test]
    fn test_extract_http_status_invalid_code() {
        assert_eq!(extract_http_status("HTTP 999"), None);
        assert_eq!(extract_http_status("HTTP 99"), None);
        assert_eq!(extract_http_status("1234"), None);
    }
}
