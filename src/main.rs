//! `snag` CLI - resolve, inspect and download media from web pages

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use snag::config::Config;
use snag::transfer::TransferProgress;
use snag::{ExtractionRequest, Pipeline, PlatformRegistry, UnknownPlatformPolicy};

/// Log filter variable, checked before `RUST_LOG`.
const LOG_ENV: &str = "SNAG_LOG";

#[derive(Parser)]
#[command(name = "snag")]
#[command(about = "Pull the playable media out of a web page")]
#[command(version)]
struct Cli {
    /// Config file (default: $SNAG_CONFIG or ~/.config/snag/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Never launch a headless browser
    #[arg(long, global = true)]
    no_browser: bool,

    /// Render pages of unknown sites before scanning them
    #[arg(long, global = true)]
    render_unknown: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a URL and print its metadata as JSON
    Info {
        /// Page or media URL
        url: String,
    },

    /// Download the media behind a URL
    Get {
        /// Page or media URL
        url: String,

        /// Output file or directory (default: current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Serve the HTTP API
    Serve {
        /// Address to bind (default from config: 127.0.0.1:8787)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// List platform profiles
    Profiles,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;

    // Ctrl-C cancels whatever is in flight.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupted");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Info { url } => cmd_info(&config, &url, &cancel).await,
        Commands::Get { url, output } => cmd_get(&config, &url, output.as_deref(), &cancel).await,
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let pipeline = Arc::new(Pipeline::from_config(&config)?);
            snag::server::serve(pipeline, &bind, cancel)
                .await
                .context("HTTP server failed")
        }
        Commands::Profiles => cmd_profiles(&config),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "snag=debug" } else { "snag=info" };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if cli.no_browser {
        config.browser.enabled = false;
    }
    if cli.render_unknown {
        config.extraction.unknown_platform_policy = UnknownPlatformPolicy::RenderThenGeneric;
    }
    Ok(config)
}

async fn cmd_info(config: &Config, url: &str, cancel: &CancellationToken) -> Result<()> {
    let request = ExtractionRequest::parse(url, true, true)?;
    let pipeline = Pipeline::from_config(config)?;
    let info = pipeline
        .metadata(&request, cancel)
        .await
        .map_err(user_facing)?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn cmd_get(
    config: &Config,
    url: &str,
    output: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<()> {
    let request = ExtractionRequest::parse(url, false, true)?;
    let pipeline = Pipeline::from_config(config)?;

    let progress = Box::new(|p: TransferProgress| {
        #[allow(clippy::cast_precision_loss)]
        let mb = p.bytes_received as f64 / 1_048_576.0;
        eprint!("\r   📥 {:>3}%  {mb:.1} MB    ", p.percent);
    });
    let download = pipeline
        .download(&request, cancel, Some(progress))
        .await
        .map_err(user_facing)?;

    eprintln!("🎬 {} ({})", download.info.title, download.info.content_type);
    let target = match output {
        Some(path) if path.is_dir() => path.join(&download.file_name),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(&download.file_name),
    };
    let partial = target.with_extension(match target.extension() {
        Some(ext) => format!("{}.part", ext.to_string_lossy()),
        None => "part".to_string(),
    });

    match write_body(download.transfer, &partial).await {
        Ok(bytes) => {
            tokio::fs::rename(&partial, &target)
                .await
                .with_context(|| format!("Failed to move download to {}", target.display()))?;
            eprintln!("\n✅ Saved {} ({bytes} bytes)", target.display());
            Ok(())
        }
        Err(e) => {
            eprintln!();
            let _ = tokio::fs::remove_file(&partial).await;
            Err(e)
        }
    }
}

async fn write_body(mut transfer: snag::Transfer, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut written = 0u64;
    while let Some(chunk) = transfer.next_chunk().await {
        let chunk = chunk.map_err(user_facing)?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Lead with the actionable message; keep the technical one as its cause.
fn user_facing(err: snag::Error) -> anyhow::Error {
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}

fn cmd_profiles(config: &Config) -> Result<()> {
    let registry = PlatformRegistry::with_configured(&config.platforms)?;
    for profile in registry.profiles() {
        let mut strategies = Vec::new();
        if profile.supports_direct() {
            strategies.push("direct");
        }
        strategies.extend(["browser", "generic"]);
        println!(
            "{:<12} {:<12} {}",
            profile.id,
            profile.display_name,
            strategies.join(" -> ")
        );
    }
    let generic = registry.generic();
    println!("{:<12} {:<12} generic", generic.id, generic.display_name);
    Ok(())
}
