//! Core types shared by the bridge components.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a chat room in the bridged network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a chat account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Membership kind of a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// One-to-one conversation with the bot
    Direct,
    /// Room with more than one other participant
    MultiParty,
}

/// Invite / membership state of the bot in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteState {
    Pending,
    Joined,
    Left,
}

/// A chat room the bot knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub kind: RoomKind,
    pub state: InviteState,
}

impl Room {
    /// A room we have been invited to but not joined yet.
    pub fn invited(id: RoomId, kind: RoomKind) -> Self {
        Self {
            id,
            kind,
            state: InviteState::Pending,
        }
    }

    /// A room the bot is already a member of.
    pub fn joined(id: RoomId, kind: RoomKind) -> Self {
        Self {
            id,
            kind,
            state: InviteState::Joined,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.kind == RoomKind::Direct
    }
}

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One unit of conversational history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    /// Unique turn ID (UUID)
    pub id: String,
    pub role: TurnRole,
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    /// Create a new user turn
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, text)
    }

    /// Create a new assistant turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, text)
    }

    fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// Payload of a room message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// Plain text body
    Text(String),
    /// Anything else (reaction, media, edit, state...), tagged with its kind
    Other(String),
}

/// Events the chat network adapter feeds into the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The bot was invited to a room
    Invite { room: RoomId, kind: RoomKind },
    /// A message was posted in a room
    Message {
        room: RoomId,
        sender: UserId,
        content: MessageContent,
    },
    /// The bot left or was removed from a room
    Left { room: RoomId },
    /// Membership of a joined room changed, and with it the room's kind
    KindChanged { room: RoomId, kind: RoomKind },
}

impl ChatEvent {
    /// Convenience constructor for a text message event.
    pub fn text(room: impl Into<RoomId>, sender: impl Into<UserId>, body: impl Into<String>) -> Self {
        Self::Message {
            room: room.into(),
            sender: sender.into(),
            content: MessageContent::Text(body.into()),
        }
    }

    pub fn room(&self) -> &RoomId {
        match self {
            Self::Invite { room, .. }
            | Self::Message { room, .. }
            | Self::Left { room }
            | Self::KindChanged { room, .. } => room,
        }
    }
}

/// A gated prompt on its way to a room's relay loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub room: RoomId,
    /// Prompt text with any command prefix stripped
    pub text: String,
    pub sender: UserId,
    pub received_at: DateTime<Utc>,
}

impl PromptRequest {
    pub fn new(room: RoomId, sender: UserId, text: impl Into<String>) -> Self {
        Self {
            room,
            text: text.into(),
            sender,
            received_at: Utc::now(),
        }
    }
}

/// Handle to a published chat message, used for edit-in-place.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub room: RoomId,
    pub event_id: String,
}
