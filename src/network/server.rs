//! WebSocket Game Server
//!
//! Accepts WebSocket connections, decodes JSON text frames into
//! [`SessionEvent`]s for the session task, and writes the session's
//! replies back out. The session task is the only owner of game state.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::core::SystemClock;
use crate::game::{load_levels_or_builtin, Level, LevelError, PlayerId};
use crate::network::protocol::{ClientMessage, RejectCode, ServerError, ServerMessage};
use crate::network::session::{RunSession, SessionConfig, SessionEvent};
use crate::storage::JsonFileStore;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Leaderboard JSON file.
    pub leaderboard_path: PathBuf,
    /// Optional JSON file of levels; built-ins are used otherwise.
    pub level_file: Option<PathBuf>,
    /// Run session settings.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 64,
            leaderboard_path: PathBuf::from("data/leaderboard.json"),
            level_file: None,
            session: SessionConfig::default(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
    },
}

impl ServerConfig {
    /// Read configuration from `TRIO_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "TRIO_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(max) = parse_var(&lookup, "TRIO_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(path) = lookup("TRIO_LEADERBOARD_PATH") {
            config.leaderboard_path = PathBuf::from(path);
        }
        config.level_file = lookup("TRIO_LEVEL_FILE")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        if let Some(index) = parse_var(&lookup, "TRIO_LEVEL_INDEX")? {
            config.session.start_level = index;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "TRIO_RESET_DELAY_MS")? {
            config.session.reset_delay = Duration::from_millis(ms);
        }
        if let Some(flag) = parse_flag(&lookup, "TRIO_ALLOW_SPECTATORS")? {
            config.session.allow_spectators = flag;
        }
        if let Some(flag) = parse_flag(&lookup, "TRIO_ADVANCE_LEVELS")? {
            config.session.advance_levels = flag;
        }

        Ok(config)
    }

    /// Levels to play: the level file if configured, else the built-ins.
    pub fn load_levels(&self) -> Result<Vec<Level>, LevelError> {
        load_levels_or_builtin(self.level_file.as_deref())
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
        }),
    }
}

fn parse_flag<F>(lookup: &F, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::Invalid { key, value: raw }),
        },
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Level data could not be loaded.
    #[error("Level error: {0}")]
    Level(#[from] LevelError),
}

/// Decrements the live connection count when a connection task ends.
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Live connections.
    connections: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Serve connections from `listener` until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let levels = self.config.load_levels()?;
        info!(
            "Loaded {} level(s), starting on '{}'",
            levels.len(),
            levels[self.config.session.start_level % levels.len()].id,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = RunSession::new(
            self.config.session.clone(),
            levels,
            Box::new(JsonFileStore::new(&self.config.leaderboard_path)),
            Arc::new(SystemClock),
            events_tx.clone(),
        );
        let session_handle = tokio::spawn(Self::run_session(
            session,
            events_rx,
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let live = self.connections.load(Ordering::SeqCst);
                            if live >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                Self::reject_full(stream, addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr, events_tx.clone());
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        session_handle.abort();
        Ok(())
    }

    /// Drive the session from its event queue.
    async fn run_session(
        mut session: RunSession,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => session.handle(event),
                        None => break,
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        debug!("Session task stopped");
    }

    /// Tell a connection over the limit why it is closed.
    fn reject_full(stream: TcpStream, addr: SocketAddr) {
        tokio::spawn(async move {
            let mut ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!("Handshake with rejected {} failed: {}", addr, e);
                    return;
                }
            };
            let full = ServerMessage::Error(ServerError {
                code: RejectCode::ServerFull,
                message: "The server is full. Try again later.".to_string(),
            });
            if let Ok(json) = full.to_json() {
                let _ = ws_stream.send(Message::Text(json)).await;
            }
            let _ = ws_stream.close(None).await;
        });
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) {
        self.connections.fetch_add(1, Ordering::SeqCst);
        let slot = ConnectionSlot(self.connections.clone());
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _slot = slot;
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let id = PlayerId::generate();
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<ServerMessage>();

            if events.send(SessionEvent::Connected { id, outbox: msg_tx.clone() }).is_err() {
                warn!("Session task gone, dropping {}", addr);
                return;
            }
            debug!("{} is connection {}", addr, id.short());

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let message = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let reply =
                                            ServerMessage::invalid_input("Invalid message format");
                                        let _ = msg_tx.send(reply);
                                        continue;
                                    }
                                };
                                if events.send(SessionEvent::Message { id, message }).is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let reply =
                                    ServerMessage::invalid_input("Binary frames are not supported");
                                let _ = msg_tx.send(reply);
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Cleanup
            let _ = events.send(SessionEvent::Disconnected { id });
            sender_task.abort();
            info!("Connection {} from {} closed", id.short(), addr);
        });
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Handle for triggering shutdown from another task.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio_tungstenite::connect_async;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.max_connections, 64);
        assert_eq!(config.leaderboard_path, PathBuf::from("data/leaderboard.json"));
        assert_eq!(config.session.reset_delay, Duration::from_secs(5));
        assert!(!config.session.allow_spectators);
    }

    #[test]
    fn test_config_from_lookup() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("TRIO_BIND_ADDR", "127.0.0.1:9000"),
            ("TRIO_MAX_CONNECTIONS", "8"),
            ("TRIO_RESET_DELAY_MS", "1500"),
            ("TRIO_ALLOW_SPECTATORS", "true"),
            ("TRIO_ADVANCE_LEVELS", "1"),
            ("TRIO_LEVEL_INDEX", "1"),
            ("TRIO_LEVEL_FILE", "levels.json"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.session.reset_delay, Duration::from_millis(1500));
        assert!(config.session.allow_spectators);
        assert!(config.session.advance_levels);
        assert_eq!(config.session.start_level, 1);
        assert_eq!(config.level_file, Some(PathBuf::from("levels.json")));
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let err =
            ServerConfig::from_lookup(lookup(&[("TRIO_MAX_CONNECTIONS", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TRIO_MAX_CONNECTIONS", .. }));

        let err =
            ServerConfig::from_lookup(lookup(&[("TRIO_ALLOW_SPECTATORS", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TRIO_ALLOW_SPECTATORS", .. }));
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = GameServer::new(config);
        assert_eq!(server.connection_count(), 0);
        server.shutdown();
        // Should not panic
    }

    #[tokio::test]
    async fn test_register_over_websocket() {
        let scratch = std::env::temp_dir().join(format!("trio-run-{}", uuid::Uuid::new_v4()));
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            leaderboard_path: scratch.join("leaderboard.json"),
            ..Default::default()
        };
        let server = GameServer::new(config);
        let shutdown = server.shutdown_handle();
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serve = tokio::spawn(async move { server.serve(listener).await });

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        let next = |text: Message| ServerMessage::from_json(text.to_text().unwrap()).unwrap();

        let first = next(ws.next().await.unwrap().unwrap());
        let self_id = match first {
            ServerMessage::InitialData(data) => data.self_id,
            other => panic!("expected initialData, got {:?}", other),
        };

        let register = ClientMessage::RegisterPlayer(crate::network::protocol::RegisterRequest {
            name: "Ada".into(),
        });
        ws.send(Message::Text(register.to_json().unwrap())).await.unwrap();

        match next(ws.next().await.unwrap().unwrap()) {
            ServerMessage::JoinAccepted(accepted) => {
                assert_eq!(accepted.player.id, self_id);
                assert_eq!(accepted.player.name, "Ada");
                assert!(!accepted.spectator);
            }
            other => panic!("expected joinAccepted, got {:?}", other),
        }

        ws.send(Message::Text("{\"type\":\"bogus\"}".into())).await.unwrap();
        let mut saw_error = false;
        for _ in 0..3 {
            if let ServerMessage::Error(_) = next(ws.next().await.unwrap().unwrap()) {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);

        let _ = shutdown.send(());
        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_over_limit_gets_server_full() {
        let scratch = std::env::temp_dir().join(format!("trio-run-{}", uuid::Uuid::new_v4()));
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            max_connections: 0,
            leaderboard_path: scratch.join("leaderboard.json"),
            ..Default::default()
        };
        let server = GameServer::new(config);
        let shutdown = server.shutdown_handle();
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serve = tokio::spawn(async move { server.serve(listener).await });

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let text = ws.next().await.unwrap().unwrap();
        match ServerMessage::from_json(text.to_text().unwrap()).unwrap() {
            ServerMessage::Error(error) => assert_eq!(error.code, RejectCode::ServerFull),
            other => panic!("expected error, got {:?}", other),
        }

        let _ = shutdown.send(());
        serve.await.unwrap().unwrap();
    }
}
