// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/ecoscorer-rs

//! WebSocket server - vehicles push telemetry, dashboards subscribe per user
//!
//! Every message is a JSON object tagged by `type`.
//!
//! Inbound: `register_user`, `telemetry_update`, `subscribe_user`,
//! `unsubscribe_user`, `reset_session`, `ping`.
//!
//! Outbound: `welcome`, `telemetry_stream`, `invalid_frame`, `session_reset`,
//! `group_change`, `error`, `pong`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::core::{
    EnrichedRecord, Engine, GroupChange, GroupChangeKind, ObserverId, SessionSnapshot,
};
use crate::error::TelemetryError;
use crate::telemetry::{parse_identity, RawTelemetry};

/// Messages accepted from clients
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    RegisterUser {
        #[serde(rename = "userId")]
        user_id: Value,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    TelemetryUpdate(RawTelemetry),
    SubscribeUser {
        #[serde(rename = "userId")]
        user_id: Value,
    },
    UnsubscribeUser {
        #[serde(rename = "userId")]
        user_id: Value,
    },
    ResetSession {
        #[serde(rename = "userId")]
        user_id: Value,
    },
    Ping,
}

/// Messages sent to clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        #[serde(rename = "clientId")]
        client_id: String,
        server: String,
        version: String,
    },
    TelemetryStream {
        data: Arc<EnrichedRecord>,
    },
    InvalidFrame {
        reason: String,
    },
    SessionReset {
        snapshot: SessionSnapshot,
    },
    GroupChange {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "clientId")]
        client_id: String,
        joined: bool,
        #[serde(rename = "subscriberCount")]
        subscriber_count: usize,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
    Pong,
}

impl ServerMessage {
    fn to_message(&self) -> Result<Message> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}

/// Protocol state for one connection, independent of the socket
pub struct ClientSession {
    engine: Arc<Engine>,
    observer: ObserverId,
    registered: HashSet<String>,
}

impl ClientSession {
    pub fn new(engine: Arc<Engine>, observer: ObserverId) -> Self {
        Self {
            engine,
            observer,
            registered: HashSet::new(),
        }
    }

    pub fn observer(&self) -> ObserverId {
        self.observer
    }

    /// Sources this connection registered
    pub fn registered(&self) -> &HashSet<String> {
        &self.registered
    }

    /// Apply one command; returns the direct reply, if any
    pub fn handle(&mut self, command: ClientCommand) -> Option<ServerMessage> {
        match command {
            ClientCommand::RegisterUser { user_id, email, name } => {
                let id = match parse_identity(Some(&user_id)) {
                    Ok(id) => id,
                    Err(e) => return Some(error_reply(e)),
                };
                // A repeat on this connection holds no extra registration
                if self.registered.contains(&id) && self.engine.store().is_attached(&id) {
                    debug!(source = %id, "Vehicle client already registered");
                    return None;
                }
                match self.engine.register_source(&Value::String(id)) {
                    Ok(id) => {
                        info!(
                            source = %id,
                            name = name.as_deref().unwrap_or("unknown"),
                            email = email.as_deref().unwrap_or(""),
                            "Vehicle client registered"
                        );
                        self.registered.insert(id);
                        None
                    }
                    Err(e) => Some(error_reply(e)),
                }
            }
            ClientCommand::TelemetryUpdate(raw) => match self.engine.ingest_raw(raw) {
                Ok(_) => None,
                Err(e) if e.is_invalid_frame() => Some(ServerMessage::InvalidFrame {
                    reason: e.to_string(),
                }),
                Err(e) => Some(error_reply(e)),
            },
            ClientCommand::SubscribeUser { user_id } => {
                match parse_identity(Some(&user_id))
                    .and_then(|id| self.engine.subscribe(self.observer, &id))
                {
                    Ok(_) => None,
                    Err(e) => Some(error_reply(e)),
                }
            }
            ClientCommand::UnsubscribeUser { user_id } => {
                match parse_identity(Some(&user_id))
                    .and_then(|id| self.engine.unsubscribe(self.observer, &id))
                {
                    Ok(_) => None,
                    Err(e) => Some(error_reply(e)),
                }
            }
            ClientCommand::ResetSession { user_id } => match parse_identity(Some(&user_id)) {
                Ok(id) => Some(ServerMessage::SessionReset {
                    snapshot: self.engine.reset_session(&id),
                }),
                Err(e) => Some(error_reply(e)),
            },
            ClientCommand::Ping => Some(ServerMessage::Pong),
        }
    }

    /// Decode one text frame and apply it.
    ///
    /// A `telemetry_update` whose fields fail to decode is answered as an
    /// invalid frame and counted as rejected, like any other bad sample.
    pub fn handle_text(&mut self, text: &str) -> Option<ServerMessage> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => return Some(unrecognised(e)),
        };
        let is_telemetry = value.get("type").and_then(Value::as_str) == Some("telemetry_update");
        match serde_json::from_value::<ClientCommand>(value) {
            Ok(command) => self.handle(command),
            Err(e) if is_telemetry => {
                let err = self.engine.reject(TelemetryError::Malformed(e.to_string()));
                debug!(error = %err, "Malformed telemetry frame");
                Some(ServerMessage::InvalidFrame {
                    reason: err.to_string(),
                })
            }
            Err(e) => Some(unrecognised(e)),
        }
    }

    /// Group changes are only forwarded for groups this connection is in
    pub fn group_notice(&self, change: &GroupChange) -> Option<ServerMessage> {
        let relevant = change.observer == self.observer
            || self
                .engine
                .dispatcher()
                .groups_of(self.observer)
                .contains(&change.user_id);
        relevant.then(|| ServerMessage::GroupChange {
            user_id: change.user_id.clone(),
            client_id: change.observer.to_string(),
            joined: change.kind == GroupChangeKind::Joined,
            subscriber_count: self.engine.dispatcher().subscriber_count(&change.user_id),
            timestamp: change.timestamp,
        })
    }

    /// Leave every group and release the sources this connection registered.
    /// A source another connection also registered stays attached.
    pub fn close(&mut self) {
        self.engine.remove_observer(self.observer);
        for id in self.registered.drain() {
            self.engine.release_source(&id);
        }
    }
}

fn error_reply(e: TelemetryError) -> ServerMessage {
    ServerMessage::Error {
        message: e.to_string(),
    }
}

fn unrecognised(e: serde_json::Error) -> ServerMessage {
    ServerMessage::Error {
        message: format!("unrecognised message: {}", e),
    }
}

/// WebSocket server
pub struct WebSocketServer {
    engine: Arc<Engine>,
    bind: String,
    port: u16,
    max_clients: usize,
    clients: Arc<RwLock<HashMap<ObserverId, ClientHandle>>>,
}

struct ClientHandle {
    addr: SocketAddr,
    connected_at: DateTime<Utc>,
}

impl WebSocketServer {
    pub fn new(engine: Arc<Engine>, bind: &str, port: u16, max_clients: usize) -> Self {
        Self {
            engine,
            bind: bind.to_string(),
            port,
            max_clients,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Bind and spawn the accept loop. Returns the bound address.
    pub async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.bind, self.port);
        let listener = TcpListener::bind(&addr).await?;
        let local = listener.local_addr()?;

        info!("WebSocket server listening on ws://{}", local);

        let engine = self.engine.clone();
        let clients = self.clients.clone();
        let max_clients = self.max_clients;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, addr)) => {
                                let client_count = clients.read().await.len();
                                if client_count >= max_clients {
                                    warn!("Max clients reached, rejecting connection from {}", addr);
                                    continue;
                                }

                                tokio::spawn(handle_connection(
                                    stream,
                                    addr,
                                    engine.clone(),
                                    clients.clone(),
                                ));
                            }
                            Err(e) => {
                                error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("WebSocket server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(local)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn client_addrs(&self) -> Vec<(SocketAddr, DateTime<Utc>)> {
        self.clients
            .read()
            .await
            .values()
            .map(|c| (c.addr, c.connected_at))
            .collect()
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    engine: Arc<Engine>,
    clients: Arc<RwLock<HashMap<ObserverId, ClientHandle>>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let mut observer = engine.register_observer();
    let mut group_rx = engine.group_changes();
    let mut session = ClientSession::new(engine.clone(), observer.id);

    info!("New WebSocket connection from {} (id: {})", addr, observer.id);

    clients.write().await.insert(
        observer.id,
        ClientHandle {
            addr,
            connected_at: Utc::now(),
        },
    );

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let welcome = ServerMessage::Welcome {
        client_id: observer.id.to_string(),
        server: "Ecoscorer".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if let Err(e) = send(&mut ws_sender, &welcome).await {
        warn!("Failed to send welcome: {}", e);
    }

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received from {}: {}", addr, text);
                        if let Some(reply) = session.handle_text(&text) {
                            if let Err(e) = send(&mut ws_sender, &reply).await {
                                warn!("Failed to send to {}: {}", addr, e);
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket closed by client {}", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_sender.send(Message::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            record = observer.records.recv() => {
                match record {
                    Some(data) => {
                        let msg = ServerMessage::TelemetryStream { data };
                        if let Err(e) = send(&mut ws_sender, &msg).await {
                            warn!("Failed to send to {}: {}", addr, e);
                            break;
                        }
                    }
                    None => break,
                }
            }

            change = group_rx.recv() => {
                match change {
                    Ok(change) => {
                        if let Some(notice) = session.group_notice(&change) {
                            let _ = send(&mut ws_sender, &notice).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Client {} skipped {} group changes", addr, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    session.close();
    clients.write().await.remove(&observer.id);

    info!("WebSocket client {} disconnected", addr);
}

async fn send<S>(sink: &mut S, msg: &ServerMessage) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    sink.send(msg.to_message()?).await?;
    Ok(())
}
