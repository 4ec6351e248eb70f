use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use liverec_core::config::{ClientTimings, Config, SessionSettings};
use liverec_core::credentials::Credential;
use liverec_core::logging;
use liverec_core::lookup::BilibiliLookup;
use liverec_core::recorder::{
    FfmpegMuxer, LiveWaiter, LogNotifier, Notifier, SessionOrchestrator, StreamlinkCapture, TelegramNotifier,
};
use liverec_providers::BilibiliClient;

#[derive(Parser, Debug)]
#[command(name = "liverec")]
#[command(about = "Bilibili live room recorder with danmaku captions", long_about = None)]
struct Args {
    /// Config file (YAML)
    #[arg(long, env = "LIVEREC_CONFIG_PATH")]
    config: Option<String>,

    /// Room URL or number, overrides `room.url`
    #[arg(long)]
    room: Option<String>,

    /// Output directory, overrides `recorder.save_dir`
    #[arg(long)]
    save_dir: Option<String>,
}

/// Config file: `--config` / `LIVEREC_CONFIG_PATH`, else `./config.yaml` if present
fn load_config(explicit: Option<&str>) -> Result<Config> {
    let config_path = explicit.map(str::to_string).or_else(|| {
        let cwd = "config.yaml";
        Path::new(cwd).exists().then(|| cwd.to_string())
    });

    match config_path {
        Some(path) => {
            if !Path::new(&path).exists() {
                anyhow::bail!("Config file not found: {path}");
            }
            eprintln!("Loading config from {path}");
            Ok(Config::from_file(&path)?)
        }
        None => {
            eprintln!("No config file found, using defaults and environment");
            Ok(Config::from_env()?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration, CLI flags win
    let mut config = load_config(args.config.as_deref())?;
    if let Some(room) = args.room {
        config.room.url = room;
    }
    if let Some(save_dir) = args.save_dir {
        config.recorder.save_dir = save_dir;
    }

    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        anyhow::bail!("Configuration validation failed with {} error(s)", errors.len());
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("liverec starting...");

    // 3. Resolve the room
    let credential = config
        .room
        .cookie_file
        .as_deref()
        .and_then(|path| Credential::from_file(Path::new(path)));
    if credential.is_none() {
        warn!("No SESSDATA credential, recording as a guest");
    }

    let lookup = Arc::new(BilibiliLookup::new(credential.as_ref())?);
    let short_id = BilibiliClient::parse_room_id(&config.room.url)?;
    let room = lookup.resolve(short_id).await;
    info!(short_id = room.short_id, room_id = room.canonical_id, "Room resolved");

    // 4. Collaborators
    let notifier: Arc<dyn Notifier> = match config.telegram() {
        Some((bot_token, chat_id)) => Arc::new(TelegramNotifier::new(bot_token, chat_id)?),
        None => {
            info!("Telegram not configured, notifications go to the log only");
            Arc::new(LogNotifier)
        }
    };

    let timings = ClientTimings::from(&config.protocol);
    let mut waiter = LiveWaiter::new(room.canonical_id, lookup.clone(), config.check_interval());
    let mut orchestrator = SessionOrchestrator::new(
        room.canonical_id,
        SessionSettings::from(&config.recorder),
        Arc::new(StreamlinkCapture::new(&config.tools)),
        Arc::new(FfmpegMuxer::new(&config.tools)),
        notifier,
        lookup.clone(),
    )
    .with_credential(credential);

    if config.protocol.enabled {
        waiter = waiter.with_protocol(lookup.clone(), timings);
        orchestrator = orchestrator.with_captions(lookup.clone(), timings);
    } else {
        info!("Danmaku protocol disabled: polling only, no captions");
    }

    // 5. Shutdown wiring
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    // 6. Wait → record → pause, until shutdown
    while !shutdown.is_cancelled() {
        if waiter.wait_for_live(&shutdown).await.is_none() {
            break;
        }

        match orchestrator.run(&shutdown).await {
            Ok(report) => info!(
                session_id = %report.session_id,
                status = ?report.status,
                end_reason = ?report.end_reason,
                segments = report.segments.len(),
                captions = report.captions,
                "Session complete"
            ),
            Err(e) => error!(error = %e, "Session failed"),
        }

        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(config.check_interval()) => {}
        }
    }

    info!("liverec stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("Shutting down, finishing the current session first");
}
