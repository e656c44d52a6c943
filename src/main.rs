use channel_dl::session::CodeProvider;
use channel_dl::{Config, HttpBackend, Scraper, StaticCode, StdinCode, run_with_signals};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Scrape channel history and photos into a CSV file
#[derive(Parser, Debug)]
#[command(name = "channel-dl", version)]
struct Args {
    /// TOML configuration file (missing file = defaults)
    #[arg(long, default_value = "channel-dl.toml")]
    config: PathBuf,
    /// Channel to scrape (repeatable; replaces the configured list)
    #[arg(long = "channel")]
    channels: Vec<String>,
    /// Maximum messages read per channel
    #[arg(long)]
    max_messages: Option<usize>,
    /// CSV output file
    #[arg(long)]
    output: Option<PathBuf>,
    /// Directory for downloaded media
    #[arg(long)]
    media_dir: Option<PathBuf>,
    /// Append to the output file instead of truncating it
    #[arg(long)]
    append: bool,
    /// Channels scraped concurrently
    #[arg(long)]
    concurrency: Option<usize>,
    /// Overall run deadline in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if !self.channels.is_empty() {
            config.channels = self.channels;
        }
        if let Some(max) = self.max_messages {
            config.scrape.max_messages_per_channel = max;
        }
        if let Some(output) = self.output {
            config.output.output_path = output;
        }
        if let Some(media_dir) = self.media_dir {
            config.output.media_dir = media_dir;
        }
        if self.append {
            config.output.append = true;
        }
        if let Some(concurrency) = self.concurrency {
            config.scrape.max_concurrent_channels = concurrency;
        }
        if let Some(secs) = self.timeout {
            config.scrape.run_timeout = Some(Duration::from_secs(secs));
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,channel_dl=info")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(code = e.error_code(), error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> channel_dl::Result<ExitCode> {
    let mut config = Config::load(&args.config)?;
    config.apply_env()?;
    args.apply(&mut config);

    let backend = Arc::new(HttpBackend::from_config(&config.service)?);
    let codes: Box<dyn CodeProvider> = match config.service.login_code.clone() {
        Some(code) => Box::new(StaticCode::new(code)),
        None => Box::new(StdinCode),
    };

    let scraper = Scraper::new(config, backend)?;
    let summary = run_with_signals(&scraper, codes.as_ref()).await?;

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
