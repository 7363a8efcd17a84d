//! Rewinder - CLI
//!
//! Command-line front end over the engine's command surface.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};

use rewinder::commands::{self, IMAGE_NOT_FOUND};
use rewinder::{EngineSettings, FrameSource, ImageAnswer, KeyringVault, ManualHook, RewinderEngine, SourceState};

#[derive(Parser)]
#[command(name = "rewinder")]
#[command(version = rewinder::VERSION)]
#[command(about = "Rewinder - screen history with optional encryption at rest")]
struct Cli {
    /// Data directory (config, index, captures)
    #[arg(short, long, default_value = "./rewinder-data")]
    data_dir: PathBuf,

    /// Periodic capture interval in seconds
    #[arg(short, long, default_value_t = 10)]
    interval: u64,

    /// JPEG quality (1-100)
    #[arg(short, long, default_value_t = 95)]
    quality: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn enabled(self) -> bool {
        matches!(self, Switch::On)
    }
}

#[derive(Subcommand)]
enum CredentialAction {
    /// Generate and store a random secret
    Generate,
    /// Store a secret of your own
    Store {
        /// Secret to derive keys from
        secret: String,
    },
    /// Delete the stored secret (encrypted captures become unreadable)
    Delete,
}

#[derive(Subcommand)]
enum Commands {
    /// Show toggles and the loaded key fingerprint
    Status,

    /// Turn periodic capture on or off
    Periodic { state: Switch },

    /// Turn click-triggered capture on or off
    Click { state: Switch },

    /// Turn encryption of new captures on or off
    Encryption { state: Switch },

    /// Manage the encryption credential
    Credentials {
        #[command(subcommand)]
        action: CredentialAction,
    },

    /// Take one capture now
    Capture,

    /// Fetch a capture by timestamp
    Get {
        /// Unix timestamp (seconds)
        timestamp: i64,

        /// Fetch the thumbnail instead of the full image
        #[arg(long)]
        thumbnail: bool,

        /// Write JPEG bytes here instead of printing base64
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print a readable file path for a capture
    Path {
        /// Unix timestamp (seconds)
        timestamp: i64,
    },

    /// List capture timestamps, newest first
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Delete all captures
    Clear,

    /// Show storage statistics
    Stats,

    /// Run the capture engine until Ctrl-C. Each Enter on stdin counts as a click.
    Run,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn frame_source() -> Arc<dyn FrameSource> {
    #[cfg(feature = "screen")]
    {
        Arc::new(rewinder::PrimaryMonitor)
    }
    #[cfg(not(feature = "screen"))]
    {
        log::warn!("Built without `screen`: capturing a synthetic test pattern");
        Arc::new(rewinder::TestPattern::default())
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = EngineSettings::new(&cli.data_dir);
    settings.capture_interval = Duration::from_secs(cli.interval.max(1));
    settings.jpeg_quality = cli.quality;
    settings.arm_sources = matches!(cli.command, Commands::Run);

    let vault = Arc::new(
        KeyringVault::new(&settings.keyring_service, &settings.keyring_account)
            .context("opening the credential store")?,
    );
    let hook = Arc::new(ManualHook::new());

    let engine = RewinderEngine::start(settings, frame_source(), hook.clone(), vault)
        .with_context(|| format!("starting engine in {}", cli.data_dir.display()))?;

    let result = execute(&engine, &hook, cli.command).await;
    engine.shutdown().await?;
    result
}

async fn execute(engine: &RewinderEngine, hook: &ManualHook, command: Commands) -> Result<()> {
    match command {
        Commands::Status => {
            let config = engine.config();
            println!("📁 Data:      {}", engine.data_dir().display());
            println!("🔐 Encryption: {}", on_off(config.encryption_enabled));
            println!("⏱️  Periodic:   {}", on_off(config.periodic_capture_enabled));
            println!("🖱️  Click:      {}", on_off(config.click_event_enabled));
            if let Some(key_id) = engine.key_id() {
                println!("🔑 Key:        {key_id}");
            }
        }

        Commands::Periodic { state } => {
            let enabled = commands::toggle_periodic_capture(engine, state.enabled()).map_err(anyhow::Error::msg)?;
            println!("⏱️  Periodic capture {}", on_off(enabled));
        }

        Commands::Click { state } => {
            let enabled = commands::toggle_click_event(engine, state.enabled()).map_err(anyhow::Error::msg)?;
            println!("🖱️  Click capture {}", on_off(enabled));
        }

        Commands::Encryption { state } => {
            let enabled = commands::toggle_encryption(engine, state.enabled())
                .await
                .map_err(anyhow::Error::msg)?;
            println!("🔐 Encryption {}", on_off(enabled));
        }

        Commands::Credentials { action } => match action {
            CredentialAction::Generate => {
                let key_id = engine.generate_credentials().await?;
                println!("🔑 Credentials generated (key {key_id})");
            }
            CredentialAction::Store { secret } => {
                let key_id = engine.store_credentials(secret.into_bytes()).await?;
                println!("🔑 Credentials stored (key {key_id})");
            }
            CredentialAction::Delete => {
                commands::delete_credentials(engine).await.map_err(anyhow::Error::msg)?;
                println!("🗑️  Credentials deleted, encryption is off");
            }
        },

        Commands::Capture => {
            let ts = commands::capture_now(engine).await.map_err(anyhow::Error::msg)?;
            println!("📸 Captured {ts}");
        }

        Commands::Get {
            timestamp,
            thumbnail,
            output,
        } => match output {
            Some(path) => {
                let answer = if thumbnail {
                    engine.thumbnail(timestamp).await?
                } else {
                    engine.image(timestamp).await?
                };
                match answer {
                    ImageAnswer::Found(bytes) => {
                        std::fs::write(&path, &bytes).with_context(|| format!("writing {}", path.display()))?;
                        println!("✅ Wrote {} bytes to {}", bytes.len(), path.display());
                    }
                    ImageAnswer::NotFound => println!("📭 No capture at {timestamp}"),
                }
            }
            None => {
                let encoded = if thumbnail {
                    commands::get_thumbnail_base64_from_timestamp(engine, timestamp).await
                } else {
                    commands::get_image_base64_from_timestamp(engine, timestamp).await
                }
                .map_err(anyhow::Error::msg)?;
                println!("{encoded}");
            }
        },

        Commands::Path { timestamp } => {
            let path = commands::get_image_path_from_timestamp(engine, timestamp)
                .await
                .map_err(anyhow::Error::msg)?;
            if path == IMAGE_NOT_FOUND {
                println!("📭 No capture at {timestamp}");
            } else {
                println!("{path}");
            }
        }

        Commands::List { limit } => {
            let timestamps = commands::list_timestamps(engine, limit).await.map_err(anyhow::Error::msg)?;
            if timestamps.is_empty() {
                println!("📭 No captures");
            } else {
                for ts in timestamps {
                    let when = chrono::DateTime::from_timestamp(ts, 0)
                        .map(|d| d.to_rfc3339())
                        .unwrap_or_default();
                    println!("{ts}  {when}");
                }
            }
        }

        Commands::Clear => {
            let removed = engine.clear_image_history().await?;
            println!("🧹 Removed {removed} captures");
        }

        Commands::Stats => {
            let stats = commands::get_storage_stats(engine).await.map_err(anyhow::Error::msg)?;
            println!("📊 Storage");
            println!("   Captures:  {}", stats.records);
            println!("   Encrypted: {}", stats.encrypted_records);
            if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
                println!("   Range:     {oldest} .. {newest}");
            }
            println!("   On disk:   {} bytes", stats.disk_bytes);
        }

        Commands::Run => run_daemon(engine, hook).await?,
    }

    Ok(())
}

async fn run_daemon(engine: &RewinderEngine, hook: &ManualHook) -> Result<()> {
    println!(
        "▶️  Running (periodic: {}, click: {}). Enter = click, Ctrl-C = stop",
        armed(engine.periodic_source_state()),
        armed(engine.click_source_state())
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(_) => match hook.click() {
                    Some(outcome) => log::debug!("Click submitted: {outcome:?}"),
                    None => println!("🖱️  Click capture is off (rewinder click on)"),
                },
                None => {
                    // stdin closed, keep running until Ctrl-C
                    tokio::signal::ctrl_c().await?;
                    break;
                }
            },
        }
    }

    println!("⏹️  Shutting down");
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn armed(state: SourceState) -> &'static str {
    match state {
        SourceState::Armed => "armed",
        SourceState::Disabled => "off",
    }
}
