//! randcall
//!
//! Runs a random video call against the simulated RTC engine. Remote peers
//! are scripted from the command line, tokens come from a JSON file or a
//! built-in demo token.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use randcall_client_core::{
    CallError, CallSessionBuilder, DocumentStore, InMemoryDocumentStore, JsonFileDocumentStore,
    Permission, ScriptedPeer, SessionEvent, SessionHandle, SessionSummary, SimulatedEngineFactory,
    StaticPermissions,
};

use crate::settings::Settings;

const DEFAULT_LOG_FILTER: &str = "randcall_cli=info,randcall_client_core=info";

#[derive(Parser, Debug)]
#[command(name = "randcall", author, version, about = "Random one-to-one video calls", long_about = None)]
struct Cli {
    /// Settings file (defaults to <config dir>/randcall/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// RTC application id
    #[arg(long, env = "RANDCALL_APP_ID", global = true)]
    app_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a random call
    Call(CallArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug)]
struct CallArgs {
    /// JSON file with token collections
    #[arg(short, long)]
    tokens: Option<PathBuf>,

    /// Uid of a scripted remote peer
    #[arg(long)]
    peer_uid: Option<u32>,

    /// When the scripted peer joins, after our join is confirmed
    #[arg(long, requires = "peer_uid", default_value = "3000")]
    peer_join_after_ms: u64,

    /// When the scripted peer leaves, after our join is confirmed
    #[arg(long, requires = "peer_uid")]
    peer_leave_after_ms: Option<u64>,

    /// Refuse the camera permission
    #[arg(long)]
    deny_camera: bool,

    /// Refuse the microphone permission
    #[arg(long)]
    deny_audio: bool,

    /// Mute the microphone once the call starts
    #[arg(long)]
    toggle_mic: bool,

    /// Turn the camera off once the call starts
    #[arg(long)]
    toggle_video: bool,

    /// Hang up after this many milliseconds
    #[arg(long)]
    hangup_after_ms: Option<u64>,

    /// Wait countdown length in milliseconds
    #[arg(long)]
    wait_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(app_id) = cli.app_id {
        settings.call.app_id = app_id;
    }

    match cli.command {
        Command::Call(args) => run_call(settings, args).await,
        Command::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

async fn run_call(mut settings: Settings, args: CallArgs) -> Result<()> {
    if let Some(ms) = args.wait_timeout_ms {
        settings.call = settings.call.with_wait_timeout(Duration::from_millis(ms));
    }
    if let Some(tokens) = args.tokens.clone() {
        settings.tokens_file = Some(tokens);
    }

    let store: Arc<dyn DocumentStore> = match &settings.tokens_file {
        Some(path) => {
            info!(path = %path.display(), "Reading tokens from file");
            Arc::new(JsonFileDocumentStore::new(path))
        }
        None => Arc::new(InMemoryDocumentStore::new().with_document(
            settings.call.token_collection.clone(),
            json!({"token": "demo-token", "name": "random-lobby"}),
        )),
    };

    let mut factory = SimulatedEngineFactory::new();
    if let Some(uid) = args.peer_uid {
        let mut peer = ScriptedPeer::joining(uid, Duration::from_millis(args.peer_join_after_ms));
        if let Some(ms) = args.peer_leave_after_ms {
            peer = peer.leaving_after(Duration::from_millis(ms));
        }
        factory = factory.with_peer(peer);
    }

    let mut permissions = StaticPermissions::all_granted();
    if args.deny_camera {
        permissions = permissions.without(Permission::Camera);
    }
    if args.deny_audio {
        permissions = permissions.without(Permission::RecordAudio);
    }

    let launched = CallSessionBuilder::new()
        .config(settings.call)
        .engine_factory(Arc::new(factory))
        .document_store(store)
        .permissions(Arc::new(permissions))
        .launch()
        .await;

    let mut handle = match launched {
        Ok(handle) => handle,
        Err(e @ CallError::PermissionDenied { .. }) => {
            println!("{} {}", "✗".red(), e);
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to start the call"),
    };
    let mut events = handle
        .take_event_receiver()
        .context("Session event receiver already taken")?;

    apply_toggles(&handle, args.toggle_mic, args.toggle_video).await;

    let hangup = async {
        match args.hangup_after_ms {
            Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(hangup);
    let mut hung_up = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let closed = event.is_closed();
                    if report(&event) && !hung_up {
                        hung_up = true;
                        handle.end_call().await.ok();
                    }
                    if closed {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed session events"),
                Err(RecvError::Closed) => break,
            },
            _ = &mut hangup, if !hung_up => {
                hung_up = true;
                info!("Hanging up");
                handle.end_call().await.ok();
            }
            _ = tokio::signal::ctrl_c(), if !hung_up => {
                hung_up = true;
                handle.end_call().await.ok();
            }
        }
    }

    let summary = handle.wait().await?;
    print_summary(&summary);
    Ok(())
}

/// Flip the requested local streams; a session that already ended is not an error
async fn apply_toggles(handle: &SessionHandle, mic: bool, video: bool) {
    if mic {
        if let Err(e) = handle.toggle_mic().await {
            warn!(error = %e, "Could not toggle microphone");
        }
    }
    if video {
        if let Err(e) = handle.toggle_video().await {
            warn!(error = %e, "Could not toggle camera");
        }
    }
}

/// Print a session event; true when the call cannot continue
fn report(event: &SessionEvent) -> bool {
    match event {
        SessionEvent::StateChanged(info) => {
            println!("{} {} -> {}", "•".blue(), info.previous_state, info.new_state);
        }
        SessionEvent::RemoteViewAttached { uid, .. } => {
            println!("{} Connected with {}", "✓".green(), uid.to_string().bold());
        }
        SessionEvent::Notice { notice, .. } => {
            println!("{} {}", "!".yellow(), notice.message().yellow());
        }
        SessionEvent::MediaFlagsChanged { flags, .. } => {
            println!(
                "{} mic {}, camera {}",
                "•".blue(),
                on_off(flags.mic_enabled),
                on_off(flags.video_enabled)
            );
        }
        SessionEvent::Error { error, .. } => {
            println!("{} {}", "✗".red(), error);
            return matches!(error, CallError::EngineInitFailure { .. });
        }
        _ => {}
    }
    false
}

fn on_off(enabled: bool) -> colored::ColoredString {
    if enabled { "on".green() } else { "off".red() }
}

fn print_summary(summary: &SessionSummary) {
    let duration = summary.ended_at - summary.started_at;
    println!();
    println!("{}", "Call summary".bold());
    println!("  session:   {}", summary.session_id);
    println!("  ended:     {:?}", summary.end_reason);
    println!("  connected: {}", summary.was_connected);
    if let Some(peer) = summary.last_peer {
        println!("  peer:      {}", peer);
    }
    println!("  duration:  {} ms", duration.num_milliseconds());
    if let Some(error) = summary.error() {
        println!("  error:     {} ({})", error.to_string().red(), error.category());
    }
}
