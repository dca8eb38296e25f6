//! Headless test client.
//!
//! Connects to a running server, joins under the name given as the first
//! argument and runs right, jumping whenever it is blocked. Useful for
//! filling a team while testing with one browser.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use trio_run::core::{Clock, SystemClock};
use trio_run::{ClientMessage, ClientWorld, MoveInput, RunPhase, ServerMessage};

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let url = std::env::var("TRIO_SERVER_URL")
        .unwrap_or_else(|_| "ws://127.0.0.1:8080".to_string());
    let name = std::env::args().nth(1).unwrap_or_else(|| "Bot".to_string());

    info!("Connecting to {}...", url);
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    info!("WebSocket connected");

    let (mut write, mut read) = ws_stream.split();
    let (incoming_tx, mut incoming_rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Reader task
    let reader_handle = tokio::spawn(async move {
        while let Some(result) = read.next().await {
            match result {
                Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                    Ok(msg) => {
                        if incoming_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to parse server message: {} - {}", e, text),
                },
                Ok(Message::Close(_)) => {
                    info!("Server closed connection");
                    break;
                }
                Err(e) => {
                    error!("WebSocket read error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    let clock = SystemClock;
    let mut world = ClientWorld::default();
    let mut registered = false;
    let mut last_phase = None;
    let mut last_frame = Instant::now();
    let mut ticker = tokio::time::interval(FRAME_INTERVAL);

    'frames: loop {
        ticker.tick().await;

        let mut outgoing: Vec<ClientMessage> = Vec::new();
        loop {
            match incoming_rx.try_recv() {
                Ok(msg) => {
                    log_event(&msg);
                    world.apply(msg);
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => break 'frames,
            }
        }

        if !registered && world.self_id().is_some() {
            outgoing.push(world.register(&name)?);
            registered = true;
        }

        if world.phase() != last_phase {
            last_phase = world.phase();
            info!("{}", world.status_line());
        }

        let input = steer(&world);
        if world.phase() == Some(RunPhase::Running) {
            if let Ok(msg) = world.request_ability() {
                outgoing.push(msg);
            }
        }

        let now = Instant::now();
        let delta = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;
        if let Some(msg) = world.frame(&input, delta, clock.now_ms()) {
            outgoing.push(msg);
        }

        for msg in outgoing {
            let json = msg.to_json()?;
            debug!("Sending: {}", json);
            if let Err(e) = write.send(Message::Text(json)).await {
                error!("Failed to send message: {}", e);
                break 'frames;
            }
        }
    }

    reader_handle.abort();
    info!("Bot stopped");
    Ok(())
}

/// Run right; jump when stopped against something.
fn steer(world: &ClientWorld) -> MoveInput {
    let body = match world.local_player() {
        Some(player) if world.is_joined() => player.body,
        _ => return MoveInput::default(),
    };
    let blocked = body.grounded && body.velocity.x == 0.0;
    MoveInput { left: false, right: true, jump: blocked }
}

fn log_event(msg: &ServerMessage) {
    match msg {
        ServerMessage::JoinRejected(rejection) => warn!("Join rejected: {}", rejection.reason),
        ServerMessage::TimerStarted(_) => info!("Timer started"),
        ServerMessage::RunCompleted(done) => {
            info!("Run completed by {} in {} ms", done.team_name, done.time_ms);
        }
        ServerMessage::RunReset(reset) => info!("Run reset: {}", reset.message),
        ServerMessage::AbilityDenied(rejection) => debug!("Ability denied: {}", rejection.reason),
        _ => {}
    }
}
