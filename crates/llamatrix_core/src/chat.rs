//! Chat network contract consumed by the bridge.
//!
//! Login and session management live in the adapter; the bridge only sees
//! the operations below plus a channel of [`ChatEvent`](crate::ChatEvent)s.

use async_trait::async_trait;

use crate::error::BridgeResult;
use crate::types::{MessageHandle, Room, RoomId};

/// Outgoing side of a chat network session.
#[async_trait]
pub trait ChatNetwork: Send + Sync {
    /// Post a new text message and return a handle for later edits.
    async fn publish(&self, room: &RoomId, text: &str) -> BridgeResult<MessageHandle>;

    /// Replace the text of a previously published message.
    async fn edit(&self, handle: &MessageHandle, text: &str) -> BridgeResult<()>;

    /// Show or hide the typing indicator.
    async fn set_typing(&self, room: &RoomId, typing: bool) -> BridgeResult<()>;

    /// Accept an invite.
    async fn join(&self, room: &RoomId) -> BridgeResult<()>;

    /// Leave a room or decline an invite.
    async fn leave(&self, room: &RoomId) -> BridgeResult<()>;

    /// Rooms the account is a member of right now.
    async fn joined_rooms(&self) -> BridgeResult<Vec<Room>>;
}
