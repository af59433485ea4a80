//! tdrive: transfer tracker CLI
//!
//! Commands:
//!   replay --events <jsonl> [--snapshot <json>]  - replay a recorded transfer session
//!   config show                                   - display current configuration

mod render;
mod replay;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use tdrive_core::config::TdriveConfig;
use tdrive_core::TransferKind;
use tdrive_transfer::present;
use tdrive_transfer::TransferTaskStore;

#[derive(Parser, Debug)]
#[command(name = "tdrive", version, about = "tdrive transfer tracker")]
struct Cli {
    /// Path to tdrive.toml configuration file
    #[arg(long, short = 'c', env = "TDRIVE_CONFIG", default_value = "tdrive.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [logging].level
    #[arg(long, env = "TDRIVE_LOG")]
    log: Option<String>,

    /// Log format; overrides [logging].format
    #[arg(long, env = "TDRIVE_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a recorded session: restore a snapshot, then apply events in order
    Replay {
        /// JSONL file of progress events and user actions
        #[arg(long, short = 'e')]
        events: PathBuf,
        /// Backend snapshot of incomplete transfers (JSON)
        #[arg(long, short = 's')]
        snapshot: Option<PathBuf>,
        /// Delay between event lines in milliseconds
        #[arg(long, default_value_t = 0)]
        pace_ms: u64,
        /// Do not draw progress bars
        #[arg(long)]
        no_progress: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = cli.log_format.clone().unwrap_or_else(|| {
        if config.logging.format == "json" {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "tdrive starting"
    );

    match cli.command {
        Commands::Replay {
            events,
            snapshot,
            pace_ms,
            no_progress,
        } => {
            let opts = replay::ReplayOptions {
                snapshot,
                events,
                pace: Duration::from_millis(pace_ms),
                show_progress: !no_progress,
            };
            cmd_replay(&config, &opts).await
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

/// A missing file means defaults; an unreadable or invalid one is fatal.
fn load_config(path: &Path) -> Result<TdriveConfig> {
    TdriveConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── `tdrive replay` ───────────────────────────────────────────────────────────

async fn cmd_replay(config: &TdriveConfig, opts: &replay::ReplayOptions) -> Result<()> {
    let (store, stats) = replay::run(config, opts).await?;

    println!();
    print_transfers(&store);
    println!();
    println!("Replay complete:");
    println!("  restored: {} transfers", stats.restored);
    println!("  applied:  {} lines", stats.applied);
    println!("  skipped:  {} lines (invalid)", stats.skipped);
    Ok(())
}

fn print_transfers(store: &TransferTaskStore) {
    let now = tdrive_transfer::task::unix_millis();
    for kind in TransferKind::ALL {
        let rows = present::views(store, kind, now);
        let summary = present::kind_summary(store, kind);
        println!(
            "{}s: {} total, {} active, {} queued, {} paused, {} completed, {} failed",
            kind,
            summary.total(),
            summary.active,
            summary.queued,
            summary.paused,
            summary.completed,
            summary.failed
        );
        for row in rows {
            let files = row
                .files
                .map(|(done, total)| format!("  ({done}/{total} files)"))
                .unwrap_or_default();
            println!(
                "  {:<13} {:>5.1}%  {:<24} {:<22}{}",
                row.status.to_string(),
                row.percent,
                row.name,
                row.transferred,
                files
            );
            if let Some(message) = &row.message {
                println!("  {:<13} {}", "", message);
            }
        }
    }

    let all = present::summary(store);
    println!();
    println!(
        "speed {}  eta {}  remaining {}",
        all.speed_label(),
        all.eta_label(),
        present::format_bytes(all.remaining)
    );
}

// ── `tdrive config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &TdriveConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
