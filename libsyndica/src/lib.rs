//! Core library for Syndica, a scheduled-content publishing pipeline
//!
//! Posts are authored against a per-platform schedule and persisted in
//! SQLite. The dispatcher sweeps due posts and delivers them through
//! platform adapters; the retry coordinator gives failed posts another
//! chance within a bounded number of attempts. Platform secrets live in an
//! encrypted credential vault, and every externally-triggered sweep is
//! gated by a shared-secret bearer token.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod retry;
pub mod store;
pub mod trigger;
pub mod types;
pub mod vault;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::{Result, SyndicaError};
pub use retry::RetryCoordinator;
pub use store::Store;
pub use trigger::TriggerAuth;
pub use types::{
    Credential, DispatchSummary, PlatformCredential, Post, PostStatus, QueueStatus, RetrySummary,
};
pub use vault::Vault;
