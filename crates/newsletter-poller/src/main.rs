use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use newsletter_poller::calendar_client::CalendarPublisher;
use newsletter_poller::config::Config;
use newsletter_poller::inbox::{JsonInbox, MessageSource};
use newsletter_poller::ocr::{DisabledOcr, OcrEngine, VisionOcr};
use newsletter_poller::pipeline::Pipeline;
use newsletter_poller::publisher::MemoryPublisher;
use shared_types::{EmailMessage, EventRecord, RunSummary};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "newsletter-poller")]
#[command(about = "Turn weekly newsletter emails into calendar events")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the downloaded newsletters and publish new events
    Run {
        /// Path to the TOML configuration file
        #[arg(short, long, default_value = "newsletter.toml")]
        config: PathBuf,

        /// Collect events in memory instead of writing to Google Calendar
        #[arg(long)]
        dry_run: bool,
    },

    /// Extract events from one saved plain-text body, without network access
    Parse {
        /// Plain-text newsletter body
        file: PathBuf,

        /// Path to the TOML configuration file (defaults apply if missing)
        #[arg(short, long, default_value = "newsletter.toml")]
        config: PathBuf,

        /// HTML body of the same newsletter, for invitation links
        #[arg(long, value_name = "FILE")]
        html: Option<PathBuf>,
    },

    /// Write a starter configuration file
    InitConfig {
        #[arg(default_value = "newsletter.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install crypto provider"))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, dry_run } => run(&config, dry_run).await,
        Commands::Parse { file, config, html } => parse(&file, &config, html.as_deref()),
        Commands::InitConfig { path } => init_config(&path),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let mut config = Config::load(path)?;
    config.apply_env_overrides()?;
    Ok(config)
}

async fn run(config_path: &Path, dry_run: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let settings = config.settings()?;

    let ocr: Arc<dyn OcrEngine> = match &config.ocr {
        Some(ocr) => {
            if ocr.api_key.is_none() {
                tracing::warn!("No Vision API key configured, OCR requests may be rejected");
            }
            Arc::new(VisionOcr::new(ocr, settings.image_timeout)?)
        }
        None => {
            tracing::warn!("No [ocr] section, invitation images will not be read");
            Arc::new(DisabledOcr)
        }
    };

    let messages = JsonInbox::new(&config.inbox_dir).load_messages()?;

    let report = if dry_run {
        let pipeline = Pipeline::new(&config, settings, ocr, MemoryPublisher::new())?;
        let summary = pipeline.run(messages).await;
        dry_run_report(&summary, &pipeline.publisher().published())
    } else {
        let calendar = config
            .calendar
            .clone()
            .context("No [calendar] section in config (use --dry-run to skip publishing)")?;
        let publisher = CalendarPublisher::new(calendar, settings.timezone)
            .await
            .context("Failed to connect to Google Calendar")?;
        let summary = Pipeline::new(&config, settings, ocr, publisher)?
            .run(messages)
            .await;
        serde_json::to_value(&summary)?
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// One JSON document so the output stays pipeable
fn dry_run_report(summary: &RunSummary, events: &[EventRecord]) -> serde_json::Value {
    serde_json::json!({
        "summary": summary,
        "events": events,
    })
}

fn parse(file: &Path, config_path: &Path, html: Option<&Path>) -> Result<()> {
    let config = if config_path.exists() {
        load_config(config_path)?
    } else {
        tracing::info!("{} not found, using default settings", config_path.display());
        let mut config = Config::example();
        config.apply_env_overrides()?;
        config
    };
    let settings = config.settings()?;
    let today = Utc::now().with_timezone(&settings.timezone).date_naive();

    let body_text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let body_html = html
        .map(|path| {
            fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
        })
        .transpose()?;

    let message = EmailMessage {
        id: file.display().to_string(),
        subject: String::new(),
        from: String::new(),
        received_at: None,
        body_text,
        body_html,
    };

    let pipeline = Pipeline::new(&config, settings, Arc::new(DisabledOcr), MemoryPublisher::new())?;
    let mut summary = RunSummary::default();
    let events = pipeline.extract_events(&message, today, &mut summary);

    println!("{}", serde_json::to_string_pretty(&events)?);
    tracing::info!(
        "{} blocks, {} events, {} rejected",
        summary.blocks_found,
        events.len(),
        summary.failures.values().sum::<usize>()
    );
    Ok(())
}

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }

    let rendered = toml::to_string_pretty(&Config::example())?;
    fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote example configuration to {}", path.display());
    Ok(())
}
