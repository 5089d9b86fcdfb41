use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use hudwatch::config::Settings;
use hudwatch::data::duration::parse_duration;
use hudwatch::host::{engine_builder, register_providers, CHANNEL_TREND_SECTION};
use hudwatch::report;
use hudwatch::source::CHANNEL_FILTER;
use hudwatch_sdk::{DiagnosticsEngine, Output, RefreshOptions};

#[derive(Parser, Debug)]
#[command(name = "hudwatch")]
#[command(about = "Live diagnostics snapshots for developer HUDs")]
struct Args {
    /// Settings file (TOML, JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON file with the current value per channel
    #[arg(long)]
    channels: Option<PathBuf>,

    /// Write every snapshot to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Cadence between snapshot builds (e.g., "1s", "500ms")
    #[arg(short, long)]
    interval: Option<String>,

    /// Start with cadence builds paused
    #[arg(long)]
    paused: bool,

    /// Only publish this channel
    #[arg(long)]
    channel: Option<String>,

    /// Build a snapshot, print it and exit
    #[arg(long)]
    once: bool,

    /// Print a text report instead of JSON
    #[arg(short, long)]
    summary: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    apply_overrides(&mut settings, &args)?;
    init_tracing(&settings.log_level);
    debug!(?settings, "settings loaded");

    let rt = tokio::runtime::Runtime::new()?;

    if args.once {
        return rt.block_on(run_once(&settings, &args));
    }

    rt.block_on(run_live(&settings, &args))
}

fn apply_overrides(settings: &mut Settings, args: &Args) -> Result<()> {
    if let Some(path) = &args.channels {
        settings.channels_file = Some(path.clone());
    }
    if let Some(path) = &args.output {
        settings.output_file = Some(path.clone());
    }
    if let Some(interval) = &args.interval {
        settings.interval =
            parse_duration(interval).with_context(|| format!("invalid --interval `{}`", interval))?;
        if settings.interval.is_zero() {
            anyhow::bail!("--interval must be greater than zero");
        }
    }
    if args.paused {
        settings.paused = true;
    }
    Ok(())
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn prepare(engine: &DiagnosticsEngine, settings: &Settings, args: &Args) -> Result<()> {
    if let Some(channel) = &args.channel {
        engine.set_filter(CHANNEL_FILTER, Some(channel.clone()));
    }
    let applied = register_providers(engine, settings).context("registering providers")?;
    debug!(applied, "providers registered");
    Ok(())
}

/// Build two snapshots so providers that read the previous snapshot have
/// data, then print the second.
async fn run_once(settings: &Settings, args: &Args) -> Result<()> {
    let engine = engine_builder(settings).build();
    prepare(&engine, settings, args)?;

    let options = RefreshOptions {
        allow_while_paused: true,
    };
    engine.refresh(options);
    let snapshot = engine
        .refresh(options)
        .context("snapshot build did not run")?;

    if args.summary {
        print!("{}", report::render(&snapshot, CHANNEL_TREND_SECTION));
    } else {
        println!("{}", report::to_json(&snapshot)?);
    }

    if let Some(path) = &settings.output_file {
        engine.emit_now().await;
        info!(path = %path.display(), "snapshot written");
    }
    Ok(())
}

async fn run_live(settings: &Settings, args: &Args) -> Result<()> {
    let mut builder = engine_builder(settings);
    let printer = if args.summary {
        let (output, mut rx) = Output::channel(16);
        builder = builder.output(output);
        Some(tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                println!("{}", report::render(&snapshot, CHANNEL_TREND_SECTION));
            }
        }))
    } else {
        None
    };

    let engine = builder.build();
    prepare(&engine, settings, args)?;

    info!(
        interval = %hudwatch::data::format_duration(settings.interval),
        paused = settings.paused,
        "hudwatch running, press Ctrl-C to stop"
    );
    let emission = engine.start();

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    emission.stop();

    if let Some(printer) = printer {
        printer.abort();
    }
    Ok(())
}
