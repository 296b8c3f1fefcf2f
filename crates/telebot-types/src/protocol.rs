//! Wire protocol spoken over the operator socket.
//!
//! Bidirectional, message-based, JSON payloads. Every frame is a tagged
//! object `{"type": ..., "payload": ...}`; command frames nest a second
//! tagged object under `payload` so that the transport layer never has to
//! understand drive/servo/LED semantics – it forwards [`ClientCommand`]
//! values verbatim and the kernel interprets them.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{BotStatus, Vector2};

/// Client type declared in the connection handshake query
/// (`?clientType=control`). Informational within the control core; routing
/// by client type is a collaborator concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    #[default]
    Control,
    Display,
    Config,
}

impl FromStr for ClientType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "control" => Ok(ClientType::Control),
            "display" => Ok(ClientType::Display),
            "config" => Ok(ClientType::Config),
            _ => Err(()),
        }
    }
}

/// Frames sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Challenge response carrying the shared secret.
    Auth { key: String },
    /// A domain command. Only accepted on authenticated connections.
    Command(ClientCommand),
}

/// Domain commands a client may submit once authenticated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientCommand {
    SetSpeed(f32),
    SetDriveInput(Vector2),
    SetPanTiltInput(Vector2),
    SetPeerId(String),
    LedPower(bool),
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Sent immediately after the socket connects; the client must answer
    /// with [`ClientMessage::Auth`] before the auth timeout.
    Challenge,
    Authorized,
    Unauthorized { reason: String },
    BotStatus(BotStatus),
    #[serde(rename_all = "camelCase")]
    DriveInputStatus { drive: Vector2 },
    #[serde(rename_all = "camelCase")]
    PanTiltInputStatus { pan_tilt: Vector2 },
    #[serde(rename_all = "camelCase")]
    SpeedInputStatus { speed: f32 },
    EventShutDown { reason: String },
}
