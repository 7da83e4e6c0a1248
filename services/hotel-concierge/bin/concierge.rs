//! Main Entrypoint for the Hotel Concierge
//!
//! Loads configuration, opens a Live API session with the `search_hotels`
//! tool declared, and then relays lines typed on stdin to the model while
//! printing its replies and transcriptions. Ctrl+C ends the session.
//!
//! Replies are text by default. In audio mode the spoken replies are printed
//! through their transcriptions and, with `--audio-out`, written to a raw
//! PCM16 file.

use anyhow::Context;
use clap::Parser;
use gemini_realtime::audio::{OUTPUT_SAMPLE_RATE, PlaybackQueue};
use gemini_realtime::{
    EventKind, LiveClient, LiveEvent, ResponseModality, TranscriptionSource,
};
use hotel_concierge::{
    config::{Config, parse_modality},
    pcm_sink,
    search::{HttpSearchBackend, ToolDispatcher},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Talk to a hotel-search assistant over the Gemini Live API")]
struct Args {
    /// Overrides LIVE_MODEL.
    #[arg(long)]
    model: Option<String>,

    /// Overrides RESPONSE_MODALITY (`audio` or `text`).
    #[arg(long, value_parser = modality_arg)]
    modality: Option<ResponseModality>,

    /// In audio mode, write spoken replies to this file as 24 kHz mono PCM16.
    #[arg(long)]
    audio_out: Option<PathBuf>,
}

fn modality_arg(value: &str) -> Result<ResponseModality, String> {
    parse_modality(value).ok_or_else(|| format!("'{}' is not one of 'audio', 'text'", value))
}

/// Listens for the `Ctrl+C` signal.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Closing session...");
}

fn print_events(client: &LiveClient, closed: Arc<Notify>) {
    client.on(EventKind::Content, |event| {
        if let LiveEvent::Content(content) = event {
            for text in content.parts.iter().filter_map(|p| p.text.as_deref()) {
                println!("concierge: {}", text);
            }
        }
    });
    client.on(EventKind::Transcription, |event| {
        if let LiveEvent::Transcription { source, text } = event {
            match source {
                TranscriptionSource::Input => println!("you (heard): {}", text),
                TranscriptionSource::Output => println!("concierge (spoken): {}", text),
            }
        }
    });
    client.on(EventKind::Interrupted, |_| info!("Model output interrupted."));
    client.on(EventKind::GoAway, |event| {
        if let LiveEvent::GoAway(go_away) = event {
            warn!(time_left = ?go_away.time_left, "Server will close the session soon.");
        }
    });
    client.on(EventKind::Error, |event| {
        if let LiveEvent::Error(e) = event {
            if e.is_fatal() {
                error!("Session error: {}", e);
            } else {
                warn!("Session warning: {}", e);
            }
        }
    });
    client.on(EventKind::Close, move |_| closed.notify_one());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(model) = args.model {
        config.live_model = model;
    }
    if let Some(modality) = args.modality {
        config.response_modality = modality;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Starting concierge session...");

    // --- 3. Wire the client ---
    let connection = config
        .connection_config()
        .context("Failed to build Live API configuration")?;
    let client = LiveClient::new();
    let closed = Arc::new(Notify::new());
    print_events(&client, closed.clone());

    let backend = HttpSearchBackend::new(
        config.search_api_url.clone(),
        config.search_api_key.clone(),
    );
    ToolDispatcher::new(Arc::new(backend)).attach(&client);

    let audio_sink = match (&config.response_modality, args.audio_out) {
        (ResponseModality::Audio, Some(path)) => {
            let queue = Arc::new(PlaybackQueue::new(OUTPUT_SAMPLE_RATE));
            client.attach_playback(queue.clone());
            Some(tokio::spawn(pcm_sink::run(
                queue,
                path,
                Duration::from_millis(20),
            )))
        }
        (ResponseModality::Audio, None) => {
            info!("No --audio-out given; spoken replies are shown as transcriptions only.");
            None
        }
        (ResponseModality::Text, Some(_)) => {
            warn!("--audio-out has no effect in text mode.");
            None
        }
        (ResponseModality::Text, None) => None,
    };

    // --- 4. Connect ---
    info!(
        model = %config.live_model,
        modality = ?config.response_modality,
        "Connecting..."
    );
    client
        .connect(&connection)
        .await
        .context("Failed to open Live API session")?;
    println!("Connected. Ask about hotels; Ctrl+C to quit.");

    // --- 5. Relay stdin until the user or the server ends the session ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    if let Err(e) = client.send_text(line) {
                        warn!("Could not send message: {}", e);
                        break;
                    }
                }
                None => break,
            },
            _ = closed.notified() => {
                info!("Session closed by server.");
                break;
            }
            _ = &mut shutdown => break,
        }
    }

    client.disconnect();
    if let Some(sink) = audio_sink {
        sink.abort();
        if let Ok(Err(e)) = sink.await {
            error!("Audio output failed: {}", e);
        }
    }
    info!("Concierge has shut down.");
    Ok(())
}
