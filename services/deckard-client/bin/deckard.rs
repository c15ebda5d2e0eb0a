//! Main Entrypoint for the Deckard Console Client
//!
//! Loads configuration, starts the realtime engine and drives it from stdin
//! until `quit` or Ctrl+C.

use anyhow::Context;
use clap::Parser;
use deckard_client::{
    commands::{CommandError, ConsoleCommand, HELP},
    config::{Config, validate_server_url},
    image,
};
use deckard_realtime::{Engine, EngineBuilder, EngineEvent, EngineSnapshot};
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Talk to a Deckard persona from the terminal")]
struct Args {
    /// Overrides DECKARD_SERVER_URL.
    #[arg(long)]
    server_url: Option<String>,
    /// Overrides DECKARD_SESSION_ID.
    #[arg(long)]
    session_id: Option<String>,
    /// Overrides DECKARD_PERSONA.
    #[arg(long)]
    persona: Option<String>,
    /// Start with the microphone muted.
    #[arg(long)]
    muted: bool,
    /// Do not connect on startup.
    #[arg(long)]
    offline: bool,
}

/// Resolves once `Ctrl+C` is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[cfg(feature = "native-audio")]
fn with_platform_audio(builder: EngineBuilder) -> EngineBuilder {
    use deckard_client::audio::{CpalCapture, CpalOutput};
    use std::sync::Arc;

    let builder = builder.capture_device(Arc::new(CpalCapture));
    match CpalOutput::new() {
        Ok(output) => builder.audio_output(Arc::new(output)),
        Err(e) => {
            warn!(error = %e, "No audio output device; playback will be silent");
            builder
        }
    }
}

#[cfg(not(feature = "native-audio"))]
fn with_platform_audio(builder: EngineBuilder) -> EngineBuilder {
    info!("Built without `native-audio`; running headless.");
    builder
}

/// Mirrors engine events to the log. Diagnostic entries are already logged
/// by the engine itself.
async fn print_events(mut events: broadcast::Receiver<EngineEvent>) {
    let mut printed: HashMap<String, String> = HashMap::new();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event printer fell behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            EngineEvent::ConnectionChanged { state, status } => {
                info!(%state, ?status, "Connection state changed");
            }
            EngineEvent::HistoryChanged(messages) => {
                for message in messages {
                    if printed.get(&message.id) == Some(&message.text) || message.text.is_empty() {
                        continue;
                    }
                    info!(role = %message.role, images = message.images.len(), "{}", message.text);
                    printed.insert(message.id, message.text);
                }
            }
            EngineEvent::PersonaChanged(persona) => info!(%persona, "Persona changed"),
            EngineEvent::MutedChanged(muted) => info!(muted, "Microphone mute changed"),
            EngineEvent::CaptureChanged(active) => debug!(active, "Capture changed"),
            EngineEvent::ThinkingChanged { thinking, message } => {
                info!(thinking, message = message.as_deref().unwrap_or(""), "Thinking");
            }
            EngineEvent::PresentationChanged(hint) => {
                info!(
                    mode = ?hint.mode,
                    video = hint.video_url.as_deref().unwrap_or(""),
                    sentiment = hint.sentiment.as_deref().unwrap_or(""),
                    "Presentation"
                );
            }
            EngineEvent::LogAppended(_) => {}
            EngineEvent::PlaybackIdle => debug!("Playback idle"),
        }
    }
}

fn print_history(snapshot: &EngineSnapshot) {
    if snapshot.history.is_empty() {
        println!("(no messages)");
    }
    for message in &snapshot.history {
        let images = if message.images.is_empty() {
            String::new()
        } else {
            format!(" [+{} image(s)]", message.images.len())
        };
        println!("{:>9}: {}{}", message.role, message.text, images);
    }
}

fn print_log(snapshot: &EngineSnapshot) {
    for entry in &snapshot.log {
        let detail = entry
            .detail
            .as_deref()
            .map(|d| format!(" ({})", d))
            .unwrap_or_default();
        println!(
            "{} {:<5} {:<12} {}{}",
            entry.timestamp.format("%H:%M:%S"),
            entry.severity,
            entry.category,
            entry.title,
            detail
        );
    }
}

fn print_status(snapshot: &EngineSnapshot) {
    println!(
        "status: {:?}  session: {}  persona: {}  muted: {}  capture: {}  thinking: {}  queued audio: {}",
        snapshot.status,
        snapshot.session_id.as_deref().unwrap_or("-"),
        snapshot.persona,
        snapshot.muted,
        snapshot.capture_active,
        snapshot.thinking,
        snapshot.playback_queue_len
    );
}

/// Returns false when the client should exit.
async fn handle_line(engine: &Engine, line: &str) -> anyhow::Result<bool> {
    let command = match line.parse::<ConsoleCommand>() {
        Ok(command) => command,
        Err(CommandError::Empty) => return Ok(true),
        Err(e) => {
            println!("{}", e);
            return Ok(true);
        }
    };
    match command {
        ConsoleCommand::Connect => engine.connect().await?,
        ConsoleCommand::Disconnect => engine.disconnect().await?,
        ConsoleCommand::Mute => engine.set_muted(true).await?,
        ConsoleCommand::Unmute => engine.set_muted(false).await?,
        ConsoleCommand::Interrupt => engine.interrupt().await?,
        ConsoleCommand::Persona(id) => engine.set_persona(id).await?,
        ConsoleCommand::Image { path, prompt } => match image::load_data_url(&path) {
            Ok(data_url) => engine.send_image(data_url, prompt).await?,
            Err(e) => println!("{}", e),
        },
        ConsoleCommand::History => print_history(&engine.snapshot().await?),
        ConsoleCommand::Log => print_log(&engine.snapshot().await?),
        ConsoleCommand::Status => print_status(&engine.snapshot().await?),
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => return Ok(false),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let args = Args::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(server_url) = args.server_url {
        validate_server_url("--server-url", &server_url)?;
        config.server_url = server_url;
    }
    if let Some(session_id) = args.session_id {
        config.session_id = Some(session_id);
    }
    if let Some(persona) = args.persona {
        config.persona = persona;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!(
        server_url = %config.server_url,
        persona = %config.persona,
        "Configuration loaded. Starting engine..."
    );

    // --- 3. Start the Engine ---
    let builder = with_platform_audio(Engine::builder(config.engine_config()));
    let (engine, runtime) = builder.spawn();
    let printer = tokio::spawn(print_events(engine.subscribe()));

    if args.muted {
        engine.set_muted(true).await?;
    }
    if !args.offline {
        engine.connect().await?;
    }
    println!("{}", HELP);

    // --- 4. Drive it from stdin ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => {
                    if !handle_line(&engine, &line).await? {
                        break;
                    }
                }
                None => break,
            },
            _ = &mut shutdown => break,
        }
    }

    engine.shutdown().await?;
    runtime.await.context("Engine runtime panicked")?;
    printer.abort();
    info!("Client has shut down.");
    Ok(())
}
