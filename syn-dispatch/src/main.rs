//! syn-dispatch - Background daemon for scheduled post delivery
//!
//! Polls the post store at a fixed interval and runs a dispatch sweep over
//! every due post.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use libsyndica::logging::{LogFormat, LoggingConfig};
use libsyndica::platforms::PublisherRegistry;
use libsyndica::trigger::TriggerAuth;
use libsyndica::{Config, Dispatcher, Result, Store, SyndicaError, Vault};
use secrecy::SecretString;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "syn-dispatch")]
#[command(version)]
#[command(about = "Background daemon for scheduled post delivery")]
#[command(long_about = "\
syn-dispatch - Background daemon for scheduled post delivery

DESCRIPTION:
    syn-dispatch is a long-running daemon that watches the Syndica queue
    and delivers scheduled content once its due instant passes.

    Each sweep selects due posts, fetches the owner's credential from the
    vault, delivers through the platform adapter, and records the outcome.
    Failed posts stay queued for the retry coordinator (see syn-queue retry).

USAGE:
    # Run in foreground (logs to stderr)
    syn-dispatch --token <TRIGGER_TOKEN>

    # Run with custom poll interval
    syn-dispatch --poll-interval 30

    # Run a single sweep and exit
    syn-dispatch --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current sweep)

CONFIGURATION:
    Configuration file: ~/.config/syndica/config.toml
    Database location: ~/.local/share/syndica/posts.db

    [scheduling]
    poll_interval = 60  # seconds between sweeps
    max_retries = 3     # retry bound for failed posts

ENVIRONMENT:
    SYNDICA_CONFIG          - Path to config file
    SYNDICA_MASTER_KEY      - Vault master key
    SYNDICA_TRIGGER_SECRET  - Shared secret the trigger token is checked against
    SYNDICA_TRIGGER_TOKEN   - Bearer token presented by this invocation

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Trigger token rejected
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Bearer token authorizing this trigger
    #[arg(long, env = "SYNDICA_TRIGGER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log output format
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Run one sweep and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::new(cli.log_format, "info".to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    // Trigger auth happens before any store access
    verify_trigger(&config, cli.token.as_deref())?;

    let store = Store::new(&config.database.path).await?;
    let vault = Arc::new(Vault::new(config.vault.resolve_master_key()?)?);
    let registry = Arc::new(PublisherRegistry::from_config(&config.platforms));

    if registry.is_empty() {
        warn!("no platforms enabled; every due post will fail until one is configured");
    } else {
        info!(platforms = ?registry.platforms(), "publishers registered");
    }

    let dispatcher = Dispatcher::new(store, vault, registry);

    info!("syn-dispatch daemon starting");

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let poll_interval = cli.poll_interval.unwrap_or(config.scheduling.poll_interval);
    info!("Poll interval: {}s", poll_interval);

    if cli.once {
        let summary = dispatcher.process_scheduled_posts(chrono::Utc::now()).await?;
        info!(
            processed = summary.processed,
            successful = summary.successful,
            failed = summary.failed,
            "syn-dispatch: ran one sweep, exiting"
        );
    } else {
        run_daemon_loop(&dispatcher, poll_interval, shutdown).await?;
    }

    info!("syn-dispatch daemon stopped");
    Ok(())
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

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| SyndicaError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}

/// Main daemon loop: one sweep per poll interval, shutdown checked once a
/// second while sleeping.
async fn run_daemon_loop(
    dispatcher: &Dispatcher,
    poll_interval: u64,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        match dispatcher.process_scheduled_posts(chrono::Utc::now()).await {
            Ok(summary) if summary.processed > 0 => {
                info!(
                    processed = summary.processed,
                    successful = summary.successful,
                    failed = summary.failed,
                    "sweep finished"
                );
            }
            Ok(_) => {}
            // Store failures are fatal to a sweep but not to the daemon
            Err(e) => error!("Sweep failed: {}", e),
        }

        for _ in 0..poll_interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }

    Ok(())
}
