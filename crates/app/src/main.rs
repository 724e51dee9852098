use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use music_butler_core::{
    spawn_scanner, AppConfig, ButlerError, ButlerState, Classifier, Controller, Dispatcher,
    FrameSource, PrinterConfig,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod camera;
mod encoder;
mod keyboard;
mod printer;
mod spotify;

use camera::{CommandCamera, DirectoryCamera, QrReader};
use printer::{EscPosPrinter, StickerLayout};
use spotify::SpotifyClient;

const DEFAULT_CONFIG: &str = "music-butler.toml";
/// How long runtime shutdown waits for blocking work such as a pending
/// stdin read.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() -> music_butler_core::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run { no_printer, frames } => {
            let path = cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
            run_appliance(&path, no_printer, frames)
        }
        Commands::Auth { force } => {
            let path = cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
            authenticate(&path, force)
        }
        Commands::Classify { payload } => classify(cli.config.as_deref(), &payload),
        Commands::Sticker {
            entries,
            output_dir,
        } => render_stickers(cli.config.as_deref(), &entries, &output_dir),
    };

    if let Err(err) = &result {
        tracing::error!(error = %err, "music butler stopped");
    }
    result
}

fn run_appliance(
    config_path: &Path,
    no_printer: bool,
    frames: Option<PathBuf>,
) -> music_butler_core::Result<()> {
    let config = AppConfig::load(config_path)?;
    tracing::info!(config = %config_path.display(), "starting music butler");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(serve(config, no_printer, frames));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn serve(
    config: AppConfig,
    no_printer: bool,
    frames: Option<PathBuf>,
) -> music_butler_core::Result<()> {
    let spotify = Arc::new(
        SpotifyClient::connect(&config.spotify)
            .await
            .map_err(|err| ButlerError::msg(format!("cannot connect to Spotify: {err}")))?,
    );

    let mut dispatcher =
        Dispatcher::new(Classifier::new(&config.grammar), spotify.clone()).with_labels(spotify);
    if no_printer {
        tracing::info!("printing disabled on the command line");
    } else {
        match EscPosPrinter::open(&config.printer) {
            Ok(printer) => dispatcher = dispatcher.with_printer(Arc::new(printer)),
            Err(err) => tracing::warn!(error = %err, "printer not available, only play mode will work"),
        }
    }

    let camera: Box<dyn FrameSource> = match frames {
        Some(dir) => Box::new(DirectoryCamera::open(&dir)?),
        None => Box::new(CommandCamera::open(&config.camera)?),
    };

    let shutdown = CancellationToken::new();
    let (events, receiver) = mpsc::channel(config.scanner.queue_depth);
    let controller = Controller::new(
        dispatcher,
        ButlerState::from_config(&config),
        &config.volume,
        shutdown.clone(),
    );
    controller.apply_initial_volume().await;

    let pump = spawn_scanner(
        camera,
        Box::new(QrReader),
        events.clone(),
        config.scanner.frame_interval(),
        shutdown.clone(),
    );
    let knob = encoder::spawn_encoder(&config.encoder, events.clone(), shutdown.clone());
    let keys = keyboard::spawn_keyboard(events, shutdown.clone());
    tokio::spawn(watch_signals(shutdown.clone()));

    tracing::info!("ready: scan a code to play; keys m=mode +/-=volume space=pause p=print q=quit");
    controller.run(receiver).await;

    if let Err(err) = pump.await {
        tracing::warn!(error = %err, "frame pump ended abnormally");
    }
    if let Some(knob) = knob {
        if let Err(err) = knob.await {
            tracing::warn!(error = %err, "encoder task ended abnormally");
        }
    }
    keys.abort();
    Ok(())
}

async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!(error = %err, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received terminate signal, shutting down"),
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}

fn classify(config_path: Option<&Path>, payload: &str) -> music_butler_core::Result<()> {
    let classifier = match config_path {
        Some(path) => Classifier::new(&AppConfig::load(path)?.grammar),
        None => Classifier::default(),
    };
    let classified = classifier.classify(payload);
    if classified.is_known() {
        println!("{}\t{}", classified.kind, classified.id);
    } else {
        println!("unknown");
    }
    Ok(())
}

/// Runs the one-time OAuth authorization and stores the resulting tokens
/// in the configured token cache.
fn authenticate(config_path: &Path, force: bool) -> music_butler_core::Result<()> {
    let settings = AppConfig::load(config_path)?.spotify;
    if settings.token_cache.exists() && !force {
        println!(
            "A token cache already exists at {}. Pass --force to authorize again.",
            settings.token_cache.display()
        );
        return Ok(());
    }

    let url = spotify::authorize_url(&settings).map_err(|err| ButlerError::msg(err.to_string()))?;
    println!("1. Open this address in a browser and agree to the access request:\n");
    println!("   {url}\n");
    println!("2. The browser then fails to load {}; that is expected.", settings.redirect_uri);
    print!("3. Paste the full address from the browser here: ");
    io::stdout().flush()?;

    let mut callback = String::new();
    io::stdin().lock().read_line(&mut callback)?;
    let code =
        spotify::code_from_callback(&callback).map_err(|err| ButlerError::msg(err.to_string()))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime
        .block_on(spotify::exchange_code(&settings, &code))
        .map_err(|err| ButlerError::msg(format!("token exchange failed: {err}")))?;
    println!("Authorized. Tokens saved to {}.", settings.token_cache.display());
    Ok(())
}

/// Splits `NAME=PAYLOAD`. A bare payload is named after itself.
fn parse_sticker_entry(entry: &str) -> (String, String) {
    match entry.split_once('=') {
        Some((name, payload))
            if !name.trim().is_empty() && !name.contains(':') && !name.contains('/') =>
        {
            (name.trim().to_string(), payload.trim().to_string())
        }
        _ => (entry.trim().to_string(), entry.trim().to_string()),
    }
}

fn sticker_file_name(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{stem}.png")
}

fn render_stickers(
    config_path: Option<&Path>,
    entries: &[String],
    output_dir: &Path,
) -> music_butler_core::Result<()> {
    let printer = match config_path {
        Some(path) => AppConfig::load(path)?.printer,
        None => PrinterConfig::default(),
    };
    let layout = StickerLayout::from_config(&printer);
    std::fs::create_dir_all(output_dir)?;

    for entry in entries {
        let (name, payload) = parse_sticker_entry(entry);
        let output = output_dir.join(sticker_file_name(&name));
        let image = layout
            .render(&payload)
            .map_err(|err| ButlerError::msg(format!("{name}: {err}")))?;
        image
            .save(&output)
            .map_err(|err| ButlerError::msg(format!("cannot write {}: {err}", output.display())))?;
        tracing::info!(%name, output = %output.display(), "sticker rendered");
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,music_butler=debug,music_butler_core=debug"
    } else {
        "info"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "QR code jukebox and sticker printer", long_about = None)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, global = true, env = "MUSIC_BUTLER_CONFIG")]
    config: Option<PathBuf>,
    /// Log debug output from the butler crates.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan codes from the camera and play or print them.
    Run {
        /// Start without the sticker printer.
        #[arg(long)]
        no_printer: bool,
        /// Replay still images from a directory instead of the camera.
        #[arg(long)]
        frames: Option<PathBuf>,
    },
    /// Authorize Spotify access once and store the tokens.
    Auth {
        /// Authorize again even if a token cache exists.
        #[arg(long)]
        force: bool,
    },
    /// Show how a payload is classified.
    Classify {
        payload: String,
    },
    /// Render sticker QR codes to PNG files, one per `NAME=PAYLOAD` entry.
    Sticker {
        #[arg(required = true)]
        entries: Vec<String>,
        #[arg(short, long, default_value = "qr_codes")]
        output_dir: PathBuf,
    },
}
