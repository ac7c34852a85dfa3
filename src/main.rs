use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use trackplay::control::Command;
use trackplay::input;
use trackplay::{LogSink, PlaybackController, PlaybackEvent, Settings};

/// Replay a recorded GPX track in real time
#[derive(Parser, Debug)]
#[command(name = "trackplay", version, about)]
struct Args {
    /// GPX file to play
    file: PathBuf,

    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Delay before the first point, in milliseconds
    #[arg(long)]
    delay: Option<u64>,

    /// Provider id attached to every location
    #[arg(long)]
    provider: Option<String>,

    /// Print the enriched points as JSON and exit
    #[arg(long)]
    inspect: bool,

    /// Write the effective settings back before playing
    #[arg(long)]
    save_settings: bool,
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trackplay=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let mut settings = Settings::load(args.config.as_deref());
    if let Some(delay) = args.delay {
        settings.initial_delay_ms = delay;
    }
    if let Some(provider) = args.provider.clone() {
        settings.provider = provider;
    }

    if args.save_settings {
        let path = settings
            .save(args.config.as_deref())
            .context("Failed to save settings")?;
        info!("Saved settings to {:?}", path);
    }

    if args.inspect {
        return inspect(&args.file).await;
    }

    play(args.file, settings).await
}

async fn inspect(path: &Path) -> Result<()> {
    let points = input::load_track(path)
        .await
        .with_context(|| format!("Failed to load {:?}", path))?;

    for point in &points {
        println!("{}", serde_json::to_string(point)?);
    }
    info!("{} points in {:?}", points.len(), path);
    Ok(())
}

async fn play(path: PathBuf, settings: Settings) -> Result<()> {
    let sink = Arc::new(LogSink::default());
    let controller = PlaybackController::new(settings.playback_config(), sink.clone());
    let printer = tokio::spawn(print_events(controller.subscribe()));

    controller.start_service(&path).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line.context("Failed to read command")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match line.parse::<Command>() {
                        Ok(Command::Stop) => break,
                        Ok(command) => run_command(&controller, command).await,
                        Err(e) => warn!("{}", e),
                    },
                    // Keep playing until interrupted
                    None => stdin_open = false,
                }
            }
        }
    }

    controller.stop_service().await;
    info!("Delivered {} locations", sink.delivered());
    drop(controller);
    // Let the printer drain the final events
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    Ok(())
}

async fn run_command(controller: &PlaybackController, command: Command) {
    match command {
        Command::Pause => controller.pause().await,
        Command::Resume => controller.resume().await,
        Command::Delay(ms) => controller.update_delay_time(ms).await,
        Command::State => info!(
            "State {:?}, {} points queued",
            controller.state(),
            controller.queued_points().await
        ),
        Command::Stop => controller.stop_service().await,
    }
}

async fn print_events(mut events: broadcast::Receiver<PlaybackEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Unable to encode event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event output fell behind, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
