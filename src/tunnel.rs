use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Path the relay upgrades to a tunnel websocket.
pub const TUNNEL_PATH: &str = "/ws";

/// Reply payload a host sends for a path it does not have.
pub const NO_SUCH_FILE: &str = "no such file";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Domain,
    Get,
    #[default]
    Message,
}

impl FrameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Domain => "domain",
            FrameKind::Get => "get",
            FrameKind::Message => "message",
        }
    }
}

/// One JSON object on the tunnel websocket.
///
/// `message` holds a domain, a requested path or an encoded file depending
/// on `type` and direction. Empty strings are left off the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "type", default)]
    pub kind: FrameKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(rename = "ip", default, skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
}

/// Messages a host sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMessage {
    /// Claim a domain for this connection.
    Register { domain: String, key: String },

    /// Answer to the last `RelayMessage::Get`.
    Reply {
        success: bool,
        payload: String,
        key: String,
    },

    Notice(String),
}

/// Messages the relay sends to a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// Registration accepted under the (normalized) domain.
    Registered { domain: String },

    Get { path: String, ip_address: String },

    Notice(String),
}

impl From<HostMessage> for Frame {
    fn from(msg: HostMessage) -> Self {
        match msg {
            HostMessage::Register { domain, key } => Frame {
                kind: FrameKind::Domain,
                message: domain,
                key,
                ..Frame::default()
            },
            HostMessage::Reply {
                success,
                payload,
                key,
            } => Frame {
                success,
                kind: FrameKind::Get,
                message: payload,
                key,
                ..Frame::default()
            },
            HostMessage::Notice(text) => Frame {
                kind: FrameKind::Message,
                message: text,
                ..Frame::default()
            },
        }
    }
}

impl From<RelayMessage> for Frame {
    fn from(msg: RelayMessage) -> Self {
        match msg {
            RelayMessage::Registered { domain } => Frame {
                success: true,
                kind: FrameKind::Domain,
                message: domain,
                ..Frame::default()
            },
            RelayMessage::Get { path, ip_address } => Frame {
                kind: FrameKind::Get,
                message: path,
                ip_address,
                ..Frame::default()
            },
            RelayMessage::Notice(text) => Frame {
                kind: FrameKind::Message,
                message: text,
                ..Frame::default()
            },
        }
    }
}

impl From<Frame> for HostMessage {
    fn from(frame: Frame) -> Self {
        match frame.kind {
            FrameKind::Domain => HostMessage::Register {
                domain: frame.message,
                key: frame.key,
            },
            FrameKind::Get => HostMessage::Reply {
                success: frame.success,
                payload: frame.message,
                key: frame.key,
            },
            FrameKind::Message => HostMessage::Notice(frame.message),
        }
    }
}

impl From<Frame> for RelayMessage {
    fn from(frame: Frame) -> Self {
        match frame.kind {
            FrameKind::Domain => RelayMessage::Registered {
                domain: frame.message,
            },
            FrameKind::Get => RelayMessage::Get {
                path: frame.message,
                ip_address: frame.ip_address,
            },
            FrameKind::Message => RelayMessage::Notice(frame.message),
        }
    }
}

/// Validate the first frame of a tunnel session.
///
/// Returns the requested domain (not yet normalized) and the session key.
pub fn parse_registration(frame: Frame) -> Result<(String, String), ProtocolError> {
    if frame.kind != FrameKind::Domain || frame.message.is_empty() || frame.key.is_empty() {
        return Err(ProtocolError::BadRegistration {
            kind: frame.kind.as_str().to_string(),
            domain: frame.message,
        });
    }
    Ok((frame.message, frame.key))
}

/// Lower-case, trim and hyphenate a domain the way both ends agree on.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().to_lowercase().replace(' ', "-")
}
