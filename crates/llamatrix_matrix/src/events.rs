//! Translation of Matrix sync events into bridge [`ChatEvent`]s.

use matrix_sdk::ruma::events::room::member::{
    MembershipState, OriginalSyncRoomMemberEvent, StrippedRoomMemberEvent,
};
use matrix_sdk::ruma::events::room::message::{
    MessageType, OriginalSyncRoomMessageEvent, Relation, RoomMessageEventContent,
};
use matrix_sdk::{Client, Room, RoomState};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use llamatrix_core::{ChatEvent, MessageContent, RoomId, RoomKind, UserId};

/// Body of a room message as the prompt gate sees it. Only plain text that
/// is not an edit counts as text.
pub fn message_content(content: &RoomMessageEventContent) -> MessageContent {
    if matches!(content.relates_to, Some(Relation::Replacement(_))) {
        return MessageContent::Other("m.replace".to_string());
    }
    match &content.msgtype {
        MessageType::Text(text) => MessageContent::Text(text.body.clone()),
        other => MessageContent::Other(other.msgtype().to_string()),
    }
}

/// Whether a membership change removes the bot from the room.
pub fn is_departure(membership: &MembershipState) -> bool {
    matches!(membership, MembershipState::Leave | MembershipState::Ban)
}

/// A room counts as direct while it is flagged as a DM and has no more than
/// two joined members.
pub fn room_kind(is_direct: bool, joined_members: u64) -> RoomKind {
    if is_direct && joined_members <= 2 {
        RoomKind::Direct
    } else {
        RoomKind::MultiParty
    }
}

/// Current kind of a room the client knows about.
pub async fn resolve_kind(room: &Room) -> RoomKind {
    let is_direct = match room.is_direct().await {
        Ok(is_direct) => is_direct,
        Err(e) => {
            warn!(room = %room.room_id(), "Could not tell if room is direct: {}", e);
            false
        }
    };
    room_kind(is_direct, room.joined_members_count())
}

fn room_id(room: &Room) -> RoomId {
    RoomId::new(room.room_id().as_str())
}

async fn forward(events: &mpsc::Sender<ChatEvent>, event: ChatEvent) {
    if events.send(event).await.is_err() {
        debug!("Chat event channel closed, dropping event");
    }
}

/// Forward invites addressed to the bot.
pub fn register_invite_handler(client: &Client, events: mpsc::Sender<ChatEvent>) {
    client.add_event_handler(move |ev: StrippedRoomMemberEvent, room: Room, client: Client| {
        let events = events.clone();
        async move {
            if client.user_id() != Some(&*ev.state_key) || ev.content.membership != MembershipState::Invite {
                return;
            }
            let kind = room_kind(ev.content.is_direct.unwrap_or(false), room.joined_members_count());
            debug!(room = %room.room_id(), sender = %ev.sender, "Invite received");
            forward(&events, ChatEvent::Invite { room: room_id(&room), kind }).await;
        }
    });
}

/// Forward room messages, the bot's own departures and the kind changes
/// caused by other members coming and going.
pub fn register_room_handlers(client: &Client, events: mpsc::Sender<ChatEvent>) {
    let messages = events.clone();
    client.add_event_handler(move |ev: OriginalSyncRoomMessageEvent, room: Room| {
        let events = messages.clone();
        async move {
            if room.state() != RoomState::Joined {
                return;
            }
            let event = ChatEvent::Message {
                room: room_id(&room),
                sender: UserId::new(ev.sender.as_str()),
                content: message_content(&ev.content),
            };
            forward(&events, event).await;
        }
    });

    client.add_event_handler(move |ev: OriginalSyncRoomMemberEvent, room: Room, client: Client| {
        let events = events.clone();
        async move {
            if client.user_id() != Some(&*ev.state_key) {
                if room.state() == RoomState::Joined {
                    let kind = resolve_kind(&room).await;
                    forward(&events, ChatEvent::KindChanged { room: room_id(&room), kind }).await;
                }
                return;
            }
            if !is_departure(&ev.content.membership) {
                return;
            }
            debug!(room = %room.room_id(), membership = %ev.content.membership, "Removed from room");
            forward(&events, ChatEvent::Left { room: room_id(&room) }).await;
        }
    });
}
