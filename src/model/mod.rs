use serde::{Deserialize, Serialize};
use std::fmt;

/// Sender identity as forwarded downstream. Every field is always present.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedUser {
    pub unique_id: String,
    pub user_id: String,
    pub nickname: String,
    pub avatar_url: String,
    pub badges: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum BridgeEvent {
    Chat {
        user: NormalizedUser,
        comment: String,
    },
    #[serde(rename_all = "camelCase")]
    Gift {
        user: NormalizedUser,
        gift_id: i64,
        gift_name: String,
        diamond_count: i64,
        repeat_count: i64,
        total_diamond_count: i64,
        repeat_end: bool,
        gift_type: i64,
    },
    #[serde(rename_all = "camelCase")]
    Like {
        user: NormalizedUser,
        like_count: i64,
        total_like_count: i64,
    },
    Subscribe {
        user: NormalizedUser,
    },
    Follow {
        user: NormalizedUser,
    },
    Share {
        user: NormalizedUser,
    },
    Member {
        user: NormalizedUser,
    },
    #[serde(rename_all = "camelCase")]
    RoomUser {
        viewer_count: i64,
    },
    #[serde(rename_all = "camelCase")]
    Connected {
        room_id: String,
        username: String,
    },
    StreamEnd,
    Disconnected,
    Error {
        message: String,
    },
}

impl BridgeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::Gift { .. } => "gift",
            Self::Like { .. } => "like",
            Self::Subscribe { .. } => "subscribe",
            Self::Follow { .. } => "follow",
            Self::Share { .. } => "share",
            Self::Member { .. } => "member",
            Self::RoomUser { .. } => "roomUser",
            Self::Connected { .. } => "connected",
            Self::StreamEnd => "streamEnd",
            Self::Disconnected => "disconnected",
            Self::Error { .. } => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Inbound control message on the downstream socket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ControlCommand {
    Connect { username: String },
}

#[derive(Debug)]
pub enum CommandError {
    Malformed(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(err) => write!(f, "invalid command: {err}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl ControlCommand {
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        serde_json::from_str(raw).map_err(|err| CommandError::Malformed(err.to_string()))
    }

    pub fn connect(username: impl Into<String>) -> Self {
        Self::Connect {
            username: username.into(),
        }
    }
}
