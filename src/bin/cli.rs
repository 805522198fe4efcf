//! Auto Kudos CLI
//!
//! Runs the kudos engine against a saved dashboard page or the live site.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use auto_kudos::{
    error::{AppError, Result},
    models::Config,
    pipeline::{Command as Control, Scheduler, Session, Trigger, TriggerHandle},
    services::{HtmlFeedPage, LogNotifier, PageAdapter},
    storage::{JsonFileStore, KeyValueStore, MemoryStore},
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Auto Kudos - gives kudos to your dashboard feed
#[derive(Parser, Debug)]
#[command(
    name = "auto-kudos",
    version,
    about = "Gives kudos to activities on a fitness dashboard feed"
)]
struct Cli {
    /// Path to storage directory containing config and state files
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the feed and give kudos until stopped
    Run {
        /// Saved dashboard HTML to work on (no requests are sent)
        #[arg(long, conflicts_with = "live", required_unless_present = "live")]
        page: Option<PathBuf>,

        /// Act on the live dashboard, signed in with the cookie from the
        /// configured environment variable
        #[arg(long)]
        live: bool,

        /// Keep state in memory only
        #[arg(long)]
        no_persist: bool,
    },

    /// List the feed entries of a saved dashboard page
    Scan {
        /// Saved dashboard HTML
        #[arg(long)]
        page: PathBuf,
    },

    /// Validate the configuration file
    Validate,

    /// Show persisted state
    Status,

    /// Flip the persisted enabled flag
    Toggle,

    /// End a persisted pause window early
    Resume,
}

/// Initialize logging from the verbosity flag or the configured level.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn open_store(storage_dir: &Path, config: &Config) -> Arc<dyn KeyValueStore> {
    Arc::new(JsonFileStore::new(
        storage_dir.join(&config.storage.state_file),
    ))
}

/// Map a line typed on stdin to a scheduler command.
fn parse_control(line: &str) -> Option<Control> {
    match line.trim().to_ascii_lowercase().as_str() {
        "toggle" | "t" => Some(Control::Toggle),
        "resume" | "r" => Some(Control::CancelPause),
        "more" | "m" => Some(Control::LoadMore),
        "scroll" | "s" => Some(Control::Scan(Trigger::NearBottom)),
        "scan" => Some(Control::Scan(Trigger::Manual)),
        "quit" | "q" | "exit" => Some(Control::Shutdown),
        _ => None,
    }
}

fn spawn_stdin_controls(handle: TriggerHandle) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match parse_control(&line) {
                    Some(command) => {
                        if !handle.send(command) {
                            break;
                        }
                    }
                    None => log::warn!(
                        "Unknown command '{}' (toggle, resume, more, scroll, scan, quit)",
                        line.trim()
                    ),
                },
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
}

async fn run(
    cli: &Cli,
    config: Arc<Config>,
    page: Option<&PathBuf>,
    live: bool,
    no_persist: bool,
) -> Result<()> {
    let page: Arc<dyn PageAdapter> = match page {
        Some(path) if !live => Arc::new(HtmlFeedPage::from_file(path, &config.selectors).await?),
        _ => {
            log::info!("Connecting to {}", config.page.dashboard_url);
            Arc::new(HtmlFeedPage::live(&config).await?)
        }
    };

    let store: Arc<dyn KeyValueStore> = if no_persist {
        Arc::new(MemoryStore::new())
    } else {
        open_store(&cli.storage_dir, &config)
    };

    let session = Session::builder()
        .config(Arc::clone(&config))
        .page(page)
        .notifier(Arc::new(LogNotifier::new(config.indicator.clone())))
        .store(store)
        .start()
        .await?;

    let (scheduler, handle) = Scheduler::new(Arc::clone(&session));
    spawn_stdin_controls(handle.clone());

    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, shutting down...");
            ctrl_c.shutdown();
        }
    });

    log::info!("Type toggle, resume, more, scroll, scan or quit");
    scheduler.run().await;

    let run = session.run_state();
    log::info!(
        "{} kudos given, {} entries processed, {} waiting for retry",
        run.kudos_count,
        session.processed_count(),
        session.failed_attempts().len()
    );
    Ok(())
}

async fn scan(config: &Config, path: &Path) -> Result<()> {
    let page = HtmlFeedPage::from_file(path, &config.selectors).await?;

    match page.find_current_user_id() {
        Some(user) => log::info!("Signed in as {}", user),
        None => log::warn!("No signed-in user found; this does not look like a dashboard"),
    }

    let entries = page.find_feed_entries()?;
    log::info!("{} feed entries", entries.len());
    for entry in &entries {
        let target = page.find_action_target(entry);
        let state = target
            .as_ref()
            .map(|t| format!("{:?}", page.target_state(t)))
            .unwrap_or_else(|| "no button".to_string());
        log::info!(
            "  {:<24} {:?} owner={} activity={} {}",
            entry.id().as_str(),
            entry.kind,
            page.find_owner_id(entry).as_deref().unwrap_or("-"),
            target
                .as_ref()
                .and_then(|t| t.activity_id.as_deref())
                .unwrap_or("-"),
            state
        );
    }
    Ok(())
}

async fn status(store: &dyn KeyValueStore, config: &Config) {
    let keys = &config.storage;
    let first_run: bool = store.load(&keys.key_first_run, true).await;
    let enabled: bool = store.load(&keys.key_enabled, false).await;
    let kudos: u64 = store.load(&keys.key_kudos_count, 0).await;
    let pause_until: Option<DateTime<Utc>> = store.load(&keys.key_pause_until, None).await;

    if first_run {
        log::info!("No session has run yet");
    }
    log::info!(
        "{}",
        if enabled {
            &config.indicator.active_label
        } else {
            &config.indicator.paused_label
        }
    );
    log::info!("Kudos given: {}", LogNotifier::format_counter(kudos));
    match pause_until {
        Some(until) if until > Utc::now() => {
            let left = (until - Utc::now()).num_seconds();
            log::info!(
                "Paused for rate limiting until {} ({}m {:02}s left)",
                until.format("%H:%M:%S UTC"),
                left / 60,
                left % 60
            );
        }
        Some(_) => log::info!("Pause window expired"),
        None => {}
    }
}

async fn resume(store: &dyn KeyValueStore, config: &Config) -> Result<bool> {
    let keys = &config.storage;
    let pause_until: Option<DateTime<Utc>> = store.load(&keys.key_pause_until, None).await;
    if pause_until.is_none() {
        return Ok(false);
    }
    store.remove(&keys.key_pause_until).await?;
    store.save(&keys.key_enabled, &true).await?;
    Ok(true)
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.storage_dir.join("config.toml");
    let config = Config::load_or_default(&config_path);
    init_logging(cli.verbose, &config.logging.level);

    log::info!("Loaded configuration from {}", cli.storage_dir.display());
    let config = Arc::new(config);

    match &cli.command {
        Command::Run {
            page,
            live,
            no_persist,
        } => {
            config.validate()?;
            run(&cli, Arc::clone(&config), page.as_ref(), *live, *no_persist).await?;
        }

        Command::Scan { page } => {
            config.selectors.validate()?;
            scan(&config, page).await?;
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK (delays, guard, scheduler and selectors)");
        }

        Command::Status => {
            let store = open_store(&cli.storage_dir, &config);
            status(&*store, &config).await;
        }

        Command::Toggle => {
            let store = open_store(&cli.storage_dir, &config);
            if resume(&*store, &config).await? {
                log::info!("Pause cancelled, auto kudos enabled");
            } else {
                let enabled: bool = store.load(&config.storage.key_enabled, false).await;
                store.save(&config.storage.key_enabled, &!enabled).await?;
                store.save(&config.storage.key_first_run, &false).await?;
                log::info!("Auto kudos {}", if enabled { "disabled" } else { "enabled" });
            }
        }

        Command::Resume => {
            let store = open_store(&cli.storage_dir, &config);
            if !resume(&*store, &config).await? {
                return Err(AppError::validation("No pause window to resume from"));
            }
            log::info!("Pause cancelled, auto kudos enabled");
        }
    }

    Ok(())
}
