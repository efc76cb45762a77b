//! syn-queue - Inspect and drive the Syndica post queue
//!
//! Unix-style tool for queue visibility and for triggering sweeps by hand:
//! status counts, post listing, a one-off dispatch run, and retry passes
//! over failed posts.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use libsyndica::platforms::PublisherRegistry;
use libsyndica::trigger::TriggerAuth;
use libsyndica::types::{DispatchSummary, RetrySummary};
use libsyndica::{
    Config, Dispatcher, Post, PostStatus, QueueStatus, Result, RetryCoordinator, Store,
    SyndicaError, Vault,
};
use secrecy::SecretString;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "syn-queue")]
#[command(version)]
#[command(about = "Inspect and drive the Syndica post queue")]
#[command(long_about = "\
syn-queue - Inspect and drive the Syndica post queue

DESCRIPTION:
    syn-queue is a Unix-style tool for working with the Syndica queue.
    Use it to check queue health, list posts, trigger a dispatch sweep,
    or run a retry pass over failed posts.

COMMANDS:
    status      Show queue counts (pending, due, overdue, failed)
    list        List posts, optionally filtered by status
    run         Run one dispatch sweep over due posts
    retry       Retry failed posts, optionally restricted to given ids

USAGE EXAMPLES:
    # Queue health at a glance
    syn-queue status

    # Counts as JSON (for monitoring)
    syn-queue status --format json

    # List failed posts
    syn-queue list --status failed

    # Trigger one dispatch sweep
    syn-queue run --token <TRIGGER_TOKEN>

    # Retry every failed post
    syn-queue retry --token <TRIGGER_TOKEN>

    # Retry two specific posts
    syn-queue retry --token <TRIGGER_TOKEN> <POST_ID> <POST_ID>

CONFIGURATION:
    Configuration file: ~/.config/syndica/config.toml
    Database location: ~/.local/share/syndica/posts.db

    Override with environment variables:
        SYNDICA_CONFIG          - Path to config file
        SYNDICA_MASTER_KEY      - Vault master key
        SYNDICA_TRIGGER_SECRET  - Shared secret for run/retry triggers
        SYNDICA_TRIGGER_TOKEN   - Bearer token presented by this invocation

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Trigger token rejected
    3 - Invalid input
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show queue counts
    Status {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List posts
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Filter by status (scheduled, failed, published, ...)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Run one dispatch sweep over due posts
    Run {
        /// Bearer token authorizing this trigger
        #[arg(long, env = "SYNDICA_TRIGGER_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Retry failed posts
    Retry {
        /// Restrict the pass to these post ids
        post_ids: Vec<String>,

        /// Bearer token authorizing this trigger
        #[arg(long, env = "SYNDICA_TRIGGER_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Retry bound (overrides [scheduling] max_retries)
        #[arg(long, value_name = "N")]
        max_retries: Option<u32>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("error")
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    match cli.command {
        Commands::Status { format } => {
            let store = Store::new(&config.database.path).await?;
            cmd_status(&store, &validate_format(&format)?).await?;
        }
        Commands::List { format, status } => {
            let store = Store::new(&config.database.path).await?;
            cmd_list(&store, &validate_format(&format)?, status.as_deref()).await?;
        }
        Commands::Run { token, format } => {
            let format = validate_format(&format)?;
            verify_trigger(&config, token.as_deref())?;
            cmd_run(&config, &format).await?;
        }
        Commands::Retry {
            post_ids,
            token,
            max_retries,
            format,
        } => {
            let format = validate_format(&format)?;
            verify_trigger(&config, token.as_deref())?;
            let max_retries = max_retries.unwrap_or(config.scheduling.max_retries);
            cmd_retry(&config, &post_ids, max_retries, &format).await?;
        }
    }

    Ok(())
}

fn validate_format(format: &str) -> Result<String> {
    match format {
        "text" | "json" => Ok(format.to_string()),
        other => Err(SyndicaError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            other
        ))),
    }
}

/// Verify the presented bearer token against the configured shared secret.
/// When no secret is configured the trigger runs open, with a warning.
fn verify_trigger(config: &Config, token: Option<&str>) -> Result<()> {
    match config.trigger.resolve_shared_secret() {
        Ok(secret) => {
            let auth = TriggerAuth::new(SecretString::from(secret));
            auth.verify(token.unwrap_or(""))
        }
        Err(_) => {
            warn!("no trigger shared secret configured; running without trigger auth");
            Ok(())
        }
    }
}

fn build_pipeline(config: &Config) -> Result<(Arc<Vault>, Arc<PublisherRegistry>)> {
    let vault = Arc::new(Vault::new(config.vault.resolve_master_key()?)?);
    let registry = Arc::new(PublisherRegistry::from_config(&config.platforms));
    if registry.is_empty() {
        warn!("no platforms enabled; deliveries will fail");
    }
    Ok((vault, registry))
}

/// Show queue counts
async fn cmd_status(store: &Store, format: &str) -> Result<()> {
    let status = store.queue_status(chrono::Utc::now()).await?;

    if format == "json" {
        output_status_json(&status);
    } else {
        output_status_text(&status);
    }

    Ok(())
}

fn output_status_json(status: &QueueStatus) {
    let json = serde_json::json!({
        "pending": status.pending,
        "due": status.due,
        "overdue": status.overdue,
        "failed": status.failed,
    });
    println!("{}", serde_json::to_string_pretty(&json).unwrap());
}

fn output_status_text(status: &QueueStatus) {
    println!("pending:  {}", status.pending);
    println!("due:      {}", status.due);
    println!("overdue:  {}", status.overdue);
    println!("failed:   {}", status.failed);
}

/// List posts
async fn cmd_list(store: &Store, format: &str, status: Option<&str>) -> Result<()> {
    let status_filter = match status {
        Some(s) => Some(PostStatus::parse(s).ok_or_else(|| {
            SyndicaError::InvalidInput(format!("Unknown status '{}'", s))
        })?),
        None => None,
    };

    let posts = store.list_posts(status_filter).await?;

    if format == "json" {
        output_list_json(&posts);
    } else {
        output_list_text(&posts);
    }

    Ok(())
}

fn output_list_json(posts: &[Post]) {
    let json: Vec<serde_json::Value> = posts
        .iter()
        .map(|p| {
            serde_json::json!({
                "id": p.id,
                "user_id": p.user_id,
                "platform": p.platform,
                "content": p.content,
                "due": p.due_instant().to_rfc3339(),
                "status": p.status.as_str(),
                "retry_count": p.retry_count,
                "last_error": p.last_error,
            })
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json).unwrap());
}

fn output_list_text(posts: &[Post]) {
    for post in posts {
        println!(
            "{} | {} | {} | {} | {}",
            post.id,
            post.status,
            post.platform,
            post.due_instant().format("%Y-%m-%d %H:%M"),
            truncate_content(&post.content, 50)
        );
    }
}

/// Truncate content to max length with ellipsis
fn truncate_content(content: &str, max_len: usize) -> String {
    if content.chars().count() <= max_len {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(max_len).collect();
        format!("{}...", truncated)
    }
}

/// Run one dispatch sweep
async fn cmd_run(config: &Config, format: &str) -> Result<()> {
    let store = Store::new(&config.database.path).await?;
    let (vault, registry) = build_pipeline(config)?;
    let dispatcher = Dispatcher::new(store, vault, registry);

    let summary = dispatcher.process_scheduled_posts(chrono::Utc::now()).await?;

    if format == "json" {
        output_dispatch_json(&summary);
    } else {
        output_dispatch_text(&summary);
    }

    Ok(())
}

fn output_dispatch_json(summary: &DispatchSummary) {
    println!("{}", serde_json::to_string_pretty(summary).unwrap());
}

fn output_dispatch_text(summary: &DispatchSummary) {
    println!(
        "processed {} post(s): {} published, {} failed",
        summary.processed, summary.successful, summary.failed
    );
    for error in &summary.errors {
        println!("  {} failed: {}", error.post_id, error.message);
    }
}

/// Retry failed posts
async fn cmd_retry(
    config: &Config,
    post_ids: &[String],
    max_retries: u32,
    format: &str,
) -> Result<()> {
    let store = Store::new(&config.database.path).await?;
    let (vault, registry) = build_pipeline(config)?;
    let coordinator = RetryCoordinator::new(store, vault, registry, max_retries);

    let ids = if post_ids.is_empty() {
        None
    } else {
        Some(post_ids)
    };
    let summary = coordinator
        .retry_failed_posts(chrono::Utc::now(), ids)
        .await?;

    if format == "json" {
        output_retry_json(&summary);
    } else {
        output_retry_text(&summary);
    }

    Ok(())
}

fn output_retry_json(summary: &RetrySummary) {
    println!("{}", serde_json::to_string_pretty(summary).unwrap());
}

fn output_retry_text(summary: &RetrySummary) {
    println!(
        "retried {} post(s), {} still failed",
        summary.retried.len(),
        summary.still_failed.len()
    );
    for id in &summary.retried {
        println!("  {} back in the pipeline", id);
    }
    for (id, reason) in &summary.still_failed {
        println!("  {} still failed: {}", id, reason);
    }
}
