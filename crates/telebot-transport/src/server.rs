//! [`SocketServer`] – challenge/response authenticated WebSocket transport.
//!
//! Per-connection state machine: `Connected → Challenged → {Authenticated |
//! Rejected/TimedOut}`. On connect the server records the client type
//! declared in the handshake query, sends `CHALLENGE`, and arms a timeout.
//! A wrong key, a malformed answer, or silence past the timeout all end in
//! `UNAUTHORIZED` plus disconnection – never a hang. Only after a correct
//! answer does the connection start forwarding command frames, so commands
//! from unauthenticated sockets are structurally impossible.
//!
//! Disconnects of authenticated clients decrement the connected-client
//! counter and emit [`ServerEvent::ClientDisconnected`]; a socket that never
//! authenticated disappears silently.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tracing::{debug, info, warn};
use uuid::Uuid;

use telebot_types::BotError;
use telebot_types::protocol::{ClientCommand, ClientMessage, ClientType, ServerMessage};

/// Buffered status updates per subscriber before old ones are dropped for a
/// slow client.
const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub listen_addr: SocketAddr,
    /// Shared secret clients must answer the challenge with.
    pub auth_key: String,
    pub auth_timeout: Duration,
}

/// Events emitted to the kernel. The transport never interprets commands;
/// it demultiplexes them onto this channel verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ClientConnected {
        client: Uuid,
        client_type: ClientType,
        connected: usize,
    },
    ClientDisconnected {
        client: Uuid,
        connected: usize,
    },
    Command {
        client: Uuid,
        command: ClientCommand,
    },
}

struct Shared {
    auth_key: String,
    auth_timeout: Duration,
    events: mpsc::Sender<ServerEvent>,
    broadcast: broadcast::Sender<ServerMessage>,
    connected: AtomicUsize,
}

/// The operator socket transport. Constructed explicitly and passed into
/// the kernel at composition time; its lifetime is owned by the composition
/// root, not ambient global state.
pub struct SocketServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
}

impl SocketServer {
    /// Bind the listener. This is the one transport failure that is fatal
    /// at boot – everything downstream degrades instead.
    pub async fn bind(
        config: TransportConfig,
        events: mpsc::Sender<ServerEvent>,
    ) -> Result<Self, BotError> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|e| BotError::Transport(format!("cannot bind {}: {e}", config.listen_addr)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BotError::Transport(e.to_string()))?;
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        info!("socket server listening on {local_addr}");
        Ok(Self {
            listener,
            local_addr,
            shared: Arc::new(Shared {
                auth_key: config.auth_key,
                auth_timeout: config.auth_timeout,
                events,
                broadcast,
                connected: AtomicUsize::new(0),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for pushing status updates to every authenticated client.
    pub fn broadcaster(&self) -> broadcast::Sender<ServerMessage> {
        self.shared.broadcast.clone()
    }

    /// Accept loop. Each connection runs in its own task; a connection
    /// error never affects the listener or other clients.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, shared).await {
                            debug!("client {peer}: {e}");
                        }
                    });
                }
                Err(e) => warn!("accept error: {e}"),
            }
        }
    }
}

type Sink = SplitSink<WebSocketStream<TcpStream>, Message>;
type Source = SplitStream<WebSocketStream<TcpStream>>;

async fn handle_connection(stream: TcpStream, shared: Arc<Shared>) -> Result<(), BotError> {
    let mut client_type = ClientType::default();
    let record_client_type =
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            client_type = client_type_from(request.uri().query());
            Ok(response)
        };
    let ws = accept_hdr_async(stream, record_client_type)
        .await
        .map_err(|e| BotError::Transport(format!("handshake failed: {e}")))?;

    let client = Uuid::new_v4();
    let (mut sink, mut source) = ws.split();
    send(&mut sink, &ServerMessage::Challenge).await?;

    match tokio::time::timeout(shared.auth_timeout, next_text(&mut source)).await {
        Ok(Some(text)) => match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Auth { key }) if key == shared.auth_key => {}
            Ok(ClientMessage::Auth { .. }) => {
                debug!("client {client}: wrong key");
                return reject(&mut sink, "invalid key").await;
            }
            Ok(_) | Err(_) => {
                debug!("client {client}: malformed challenge response");
                return reject(&mut sink, "malformed challenge response").await;
            }
        },
        // Closed before answering: never authenticated, silently dropped.
        Ok(None) => return Ok(()),
        Err(_) => {
            debug!("client {client}: challenge timed out");
            return reject(&mut sink, "authentication timeout").await;
        }
    }

    // Subscribe to status updates before announcing the client so a
    // broadcast triggered by the connect event cannot be missed.
    let mut updates = shared.broadcast.subscribe();
    let connected = shared.connected.fetch_add(1, Ordering::SeqCst) + 1;
    send(&mut sink, &ServerMessage::Authorized).await?;
    let _ = shared
        .events
        .send(ServerEvent::ClientConnected {
            client,
            client_type,
            connected,
        })
        .await;
    info!("client {client} authenticated as {client_type:?} ({connected} connected)");
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(message) => {
                    if send(&mut sink, &message).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("client {client} lagged by {n} updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Command(command)) => {
                            let _ = shared
                                .events
                                .send(ServerEvent::Command { client, command })
                                .await;
                        }
                        Ok(ClientMessage::Auth { .. }) => {
                            debug!("client {client}: duplicate auth ignored");
                        }
                        // A malformed frame affects neither this connection
                        // nor any other.
                        Err(e) => warn!("client {client}: malformed frame: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("client {client}: read error: {e}");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    let connected = shared.connected.fetch_sub(1, Ordering::SeqCst) - 1;
    let _ = shared
        .events
        .send(ServerEvent::ClientDisconnected { client, connected })
        .await;
    info!("client {client} disconnected ({connected} connected)");
    Ok(())
}

async fn send(sink: &mut Sink, message: &ServerMessage) -> Result<(), BotError> {
    let json = serde_json::to_string(message).map_err(|e| BotError::Protocol(e.to_string()))?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| BotError::Transport(e.to_string()))
}

async fn reject(sink: &mut Sink, reason: &str) -> Result<(), BotError> {
    let _ = send(
        sink,
        &ServerMessage::Unauthorized {
            reason: reason.to_string(),
        },
    )
    .await;
    let _ = sink.close().await;
    Ok(())
}

/// Wait for the next text frame, skipping control frames. `None` when the
/// peer closes or errors first.
async fn next_text(source: &mut Source) -> Option<String> {
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

fn client_type_from(query: Option<&str>) -> ClientType {
    query
        .and_then(|q| q.split('&').find_map(|pair| pair.strip_prefix("clientType=")))
        .and_then(|value| value.parse().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio_tungstenite::{MaybeTlsStream, connect_async};

    const KEY: &str = "shared-test-secret";

    type ClientWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start_server(timeout: Duration) -> (SocketAddr, mpsc::Receiver<ServerEvent>, broadcast::Sender<ServerMessage>) {
        let (events_tx, events_rx) = mpsc::channel(16);
        let server = SocketServer::bind(
            TransportConfig {
                listen_addr: "127.0.0.1:0".parse().unwrap(),
                auth_key: KEY.to_string(),
                auth_timeout: timeout,
            },
            events_tx,
        )
        .await
        .unwrap();
        let addr = server.local_addr();
        let broadcaster = server.broadcaster();
        tokio::spawn(server.run());
        (addr, events_rx, broadcaster)
    }

    async fn connect(addr: SocketAddr) -> ClientWs {
        let (ws, _) = connect_async(format!("ws://{addr}/?clientType=control"))
            .await
            .unwrap();
        ws
    }

    async fn next_message(ws: &mut ClientWs) -> Option<ServerMessage> {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    return serde_json::from_str(text.as_str()).ok();
                }
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    }

    async fn send_client(ws: &mut ClientWs, message: &ClientMessage) {
        let json = serde_json::to_string(message).unwrap();
        ws.send(Message::Text(json.into())).await.unwrap();
    }

    async fn authenticate(ws: &mut ClientWs) {
        assert_eq!(next_message(ws).await, Some(ServerMessage::Challenge));
        send_client(ws, &ClientMessage::Auth { key: KEY.to_string() }).await;
        assert_eq!(next_message(ws).await, Some(ServerMessage::Authorized));
    }

    #[tokio::test]
    async fn correct_key_authorizes_exactly_once() {
        let (addr, mut events, _) = start_server(Duration::from_secs(3)).await;
        let mut ws = connect(addr).await;
        authenticate(&mut ws).await;

        match events.recv().await {
            Some(ServerEvent::ClientConnected { connected, client_type, .. }) => {
                assert_eq!(connected, 1);
                assert_eq!(client_type, ClientType::Control);
            }
            other => panic!("expected ClientConnected, got {other:?}"),
        }
        // No further events until something else happens.
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn wrong_key_is_rejected_without_events() {
        let (addr, mut events, _) = start_server(Duration::from_secs(3)).await;
        let mut ws = connect(addr).await;
        assert_eq!(next_message(&mut ws).await, Some(ServerMessage::Challenge));
        send_client(&mut ws, &ClientMessage::Auth { key: "wrong".to_string() }).await;

        match next_message(&mut ws).await {
            Some(ServerMessage::Unauthorized { .. }) => {}
            other => panic!("expected Unauthorized, got {other:?}"),
        }
        // The connection is closed and no event ever fires.
        assert_eq!(next_message(&mut ws).await, None);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn silence_is_rejected_after_the_configured_timeout() {
        let timeout = Duration::from_millis(200);
        let (addr, mut events, _) = start_server(timeout).await;
        let mut ws = connect(addr).await;
        assert_eq!(next_message(&mut ws).await, Some(ServerMessage::Challenge));

        let started = Instant::now();
        match next_message(&mut ws).await {
            Some(ServerMessage::Unauthorized { .. }) => {}
            other => panic!("expected Unauthorized, got {other:?}"),
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout, "rejected early: {elapsed:?}");
        assert!(elapsed < timeout * 10, "rejected far too late: {elapsed:?}");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unauthenticated_disconnect_is_silent() {
        let (addr, mut events, _) = start_server(Duration::from_secs(3)).await;
        let mut ws = connect(addr).await;
        assert_eq!(next_message(&mut ws).await, Some(ServerMessage::Challenge));
        drop(ws);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn authenticated_commands_are_forwarded_verbatim() {
        let (addr, mut events, _) = start_server(Duration::from_secs(3)).await;
        let mut ws = connect(addr).await;
        authenticate(&mut ws).await;
        let _ = events.recv().await;

        send_client(
            &mut ws,
            &ClientMessage::Command(ClientCommand::SetSpeed(55.0)),
        )
        .await;

        match events.recv().await {
            Some(ServerEvent::Command { command, .. }) => {
                assert_eq!(command, ClientCommand::SetSpeed(55.0));
            }
            other => panic!("expected Command, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn authenticated_disconnect_decrements_the_counter() {
        let (addr, mut events, _) = start_server(Duration::from_secs(3)).await;
        let mut ws = connect(addr).await;
        authenticate(&mut ws).await;
        let _ = events.recv().await;
        drop(ws);

        match events.recv().await {
            Some(ServerEvent::ClientDisconnected { connected, .. }) => {
                assert_eq!(connected, 0);
            }
            other => panic!("expected ClientDisconnected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_frames_do_not_drop_the_connection() {
        let (addr, mut events, broadcaster) = start_server(Duration::from_secs(3)).await;
        let mut ws = connect(addr).await;
        authenticate(&mut ws).await;
        let _ = events.recv().await;

        ws.send(Message::Text("not json".into())).await.unwrap();
        // The connection still works: a broadcast reaches the client.
        broadcaster
            .send(ServerMessage::SpeedInputStatus { speed: 42.0 })
            .unwrap();
        assert_eq!(
            next_message(&mut ws).await,
            Some(ServerMessage::SpeedInputStatus { speed: 42.0 })
        );
    }

    #[tokio::test]
    async fn broadcasts_fan_out_to_every_authenticated_client() {
        let (addr, mut events, broadcaster) = start_server(Duration::from_secs(3)).await;
        let mut first = connect(addr).await;
        authenticate(&mut first).await;
        let mut second = connect(addr).await;
        authenticate(&mut second).await;
        let _ = events.recv().await;
        let _ = events.recv().await;

        broadcaster
            .send(ServerMessage::SpeedInputStatus { speed: 7.0 })
            .unwrap();
        assert_eq!(
            next_message(&mut first).await,
            Some(ServerMessage::SpeedInputStatus { speed: 7.0 })
        );
        assert_eq!(
            next_message(&mut second).await,
            Some(ServerMessage::SpeedInputStatus { speed: 7.0 })
        );
    }

    #[test]
    fn client_type_parses_from_the_handshake_query() {
        assert_eq!(client_type_from(Some("clientType=display")), ClientType::Display);
        assert_eq!(
            client_type_from(Some("foo=bar&clientType=config")),
            ClientType::Config
        );
        assert_eq!(client_type_from(Some("foo=bar")), ClientType::Control);
        assert_eq!(client_type_from(None), ClientType::Control);
    }
}
