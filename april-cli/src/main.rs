mod commands;

use april_core::settings::open_or_memory;
use april_core::time::{format_clock, format_progress};
use april_core::{
    AprilConfig, ClockBackend, CoreError, PlayerEvent, PlayerHandle, PlayerStatus, Playlist,
    Player, Settings,
};
use clap::Parser;
use commands::Input;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_TARGET: &str = "april::cli";

/// Command-line arguments for april
#[derive(Parser, Debug)]
#[command(name = "april")]
#[command(about = "Music player with synchronized lyrics")]
#[command(version)]
struct Args {
    /// Media files to play, in playlist order
    tracks: Vec<PathBuf>,

    /// Config file to use instead of ~/.config/april/config.toml
    #[arg(short, long, env = "APRIL_CONFIG")]
    config: Option<PathBuf>,

    /// Start playing the first track immediately
    #[arg(short, long)]
    autoplay: bool,

    /// Print player events as JSON lines
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(AprilConfig::config_path);

    init_tracing(check_file_logging_enabled(&config_path));
    let config = load_config(&config_path);
    let settings = Settings::new(open_or_memory(&config.settings.resolved_path()));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    runtime.block_on(run(args, config, settings));
}

async fn run(args: Args, config: AprilConfig, settings: Settings) {
    let cancel_token = CancellationToken::new();

    // Set up Ctrl+C handler to trigger graceful shutdown
    let ctrlc_token = cancel_token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down gracefully...");
        ctrlc_token.cancel();
    }) {
        error!("Failed to set Ctrl+C handler: {}", e);
    }

    let backend = ClockBackend::new(Duration::from_secs(config.playback.track_duration_secs));
    info!(target: LOG_TARGET, "Queued {} track(s)", args.tracks.len());
    let player = Player::new(config, settings, Playlist::new(args.tracks));
    let (handle, join) = player.spawn(backend, cancel_token.clone());

    tokio::spawn(print_events(handle.clone(), args.json));

    if args.autoplay {
        if let Err(e) = handle.play_pause() {
            error!(target: LOG_TARGET, "{e}");
        }
    }
    println!("{}", commands::HELP);

    read_commands(&handle, &cancel_token).await;

    handle.shutdown();
    if let Err(e) = join.await {
        error!(target: LOG_TARGET, "Player task failed: {e}");
    }
}

/// Feed stdin lines to the player until quit, Ctrl+C or end of input.
async fn read_commands(handle: &PlayerHandle, cancel_token: &CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => match commands::parse(&line) {
                    Ok(Input::Command(command)) => {
                        if let Err(e) = handle.send(command) {
                            error!(target: LOG_TARGET, "{e}");
                            break;
                        }
                    }
                    Ok(Input::Status) => match handle.status().await {
                        Ok(status) => print_status(&status),
                        Err(e) => error!(target: LOG_TARGET, "{e}"),
                    },
                    Ok(Input::Help) => println!("{}", commands::HELP),
                    Ok(Input::Quit) => break,
                    Ok(Input::Empty) => {}
                    Err(e) => println!("{e}"),
                },
                Ok(None) => {
                    // Input closed; keep playing until Ctrl+C
                    cancel_token.cancelled().await;
                    break;
                }
                Err(e) => {
                    warn!(target: LOG_TARGET, "Failed to read stdin: {e}");
                    break;
                }
            },
        }
    }
}

async fn print_events(handle: PlayerHandle, json: bool) {
    let mut rx = handle.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) if json => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(target: LOG_TARGET, "Could not encode event: {e}"),
            },
            Ok(event) => print_event(&event),
            Err(RecvError::Lagged(n)) => {
                info!(target: LOG_TARGET, "Missed {} player events", n);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &PlayerEvent) {
    match event {
        PlayerEvent::LyricLineChanged { text, .. } => println!("  {text}"),
        PlayerEvent::TrackChanged { path } => println!("Now playing: {}", display_name(path)),
        PlayerEvent::PlaybackStateChanged {
            status,
            position_ms,
        } => println!("[{status:?} at {}]", format_clock(position_ms / 1000)),
        PlayerEvent::ModeChanged(modes) => println!(
            "Mode: {:?} (repeat {}, shuffle {}, loop {})",
            modes.active(),
            on_off(modes.repeat()),
            on_off(modes.shuffle()),
            on_off(modes.loop_playlist())
        ),
        PlayerEvent::DurationChanged { duration_ms } => {
            println!("Duration: {}", format_clock(duration_ms / 1000));
        }
        PlayerEvent::EndOfPlaylist => println!("End of playlist (p to start over)"),
        PlayerEvent::Error { message } => eprintln!("error: {message}"),
    }
}

fn print_status(status: &PlayerStatus) {
    let track = status
        .metadata
        .as_ref()
        .and_then(|m| m.title.clone())
        .or_else(|| status.file.as_deref().map(display_name))
        .unwrap_or_else(|| "-".to_string());

    println!(
        "{} {:?} {track} | mode {:?} | lyrics {} ({:?}, every {}ms) | {}",
        format_progress(status.position_ms, status.duration_ms),
        status.status,
        status.modes.active(),
        on_off(status.lyrics_enabled),
        status.sync_state,
        status.sync_interval.as_millis(),
        status.lyric_text
    );
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

const fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

/// Load config, falling back to defaults for anything short of success
fn load_config(path: &Path) -> AprilConfig {
    match AprilConfig::load_or_create_at(path) {
        Ok(config) => config,
        Err(CoreError::ConfigNotFound { path }) => {
            info!(target: LOG_TARGET, "Wrote default config to {}", path.display());
            AprilConfig::default()
        }
        Err(e) => {
            error!(target: LOG_TARGET, "{e}; using defaults");
            AprilConfig::default()
        }
    }
}

/// Read just `logging.enabled` so tracing can start before the full config load
fn check_file_logging_enabled(config_path: &Path) -> bool {
    #[derive(serde::Deserialize)]
    struct PartialConfig {
        #[serde(default)]
        logging: PartialLoggingConfig,
    }
    #[derive(serde::Deserialize, Default)]
    struct PartialLoggingConfig {
        #[serde(default)]
        enabled: bool,
    }

    let Ok(content) = std::fs::read_to_string(config_path) else {
        return false;
    };

    toml::from_str::<PartialConfig>(&content)
        .map(|c| c.logging.enabled)
        .unwrap_or(false)
}

/// Initialize tracing with console output and optional file logging
fn init_tracing(file_logging_enabled: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if file_logging_enabled {
        let log_path = april_core::paths::log_file_path();

        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        match File::create(&log_path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .with(file_layer)
                    .init();

                return;
            }
            Err(e) => {
                eprintln!("Failed to create log file at {}: {e}", log_path.display());
            }
        }
    }

    // Fallback: console only
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
