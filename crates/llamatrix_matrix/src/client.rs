//! Matrix implementation of the [`ChatNetwork`] contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use matrix_sdk::config::SyncSettings;
use matrix_sdk::ruma::events::room::message::{ReplacementMetadata, RoomMessageEventContent};
use matrix_sdk::ruma::{EventId, OwnedRoomId, ServerName};
use matrix_sdk::{Client, Room};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use llamatrix_core::{
    BridgeError, BridgeResult, ChatEvent, ChatNetwork, MessageHandle, Room as BridgeRoom, RoomId,
    UserId,
};

use crate::error::{MatrixError, MatrixResult};
use crate::events::{register_invite_handler, register_room_handlers, resolve_kind};

/// Device name shown in the account's session list.
const DEVICE_NAME: &str = "llamatrix";

/// Timeout of the initial sync used to skip the message backlog.
const INITIAL_SYNC_TIMEOUT: Duration = Duration::from_millis(500);

/// Typing notices expire after a few seconds; refresh them while generating.
const TYPING_REFRESH: Duration = Duration::from_secs(3);

/// Login parameters.
#[derive(Debug, Clone)]
pub struct MatrixLogin {
    /// Localpart or full user ID
    pub username: String,
    pub password: String,
    /// Server name (`matrix.org`) or homeserver URL (`https://matrix.example.org`)
    pub homeserver: String,
}

/// Logged-in Matrix session.
#[derive(Clone)]
pub struct MatrixChat {
    client: Client,
    user: UserId,
    typing: Arc<Mutex<HashMap<RoomId, CancellationToken>>>,
}

impl MatrixChat {
    /// Build a client for the homeserver and log in with a password.
    pub async fn login(login: &MatrixLogin) -> MatrixResult<Self> {
        let builder = Client::builder();
        let builder = if is_url(&login.homeserver) {
            builder.homeserver_url(&login.homeserver)
        } else {
            let server = ServerName::parse(login.homeserver.as_str())
                .map_err(|_| MatrixError::InvalidHomeserver(login.homeserver.clone()))?;
            builder.server_name(&server)
        };
        let client = builder.build().await?;

        info!("Logging in as {} on {}", login.username, login.homeserver);
        client
            .matrix_auth()
            .login_username(&login.username, &login.password)
            .initial_device_display_name(DEVICE_NAME)
            .send()
            .await
            .map_err(MatrixError::Login)?;

        let user = client
            .user_id()
            .map(|id| UserId::new(id.as_str()))
            .ok_or(MatrixError::NotLoggedIn)?;
        info!(user = %user, "Logged in");

        Ok(Self {
            client,
            user,
            typing: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// The bot's own user ID.
    pub fn user_id(&self) -> &UserId {
        &self.user
    }

    /// Run the initial sync and install the event handlers.
    ///
    /// Invites are forwarded from the start so those received while offline
    /// are accepted; room messages only after the initial sync so the
    /// backlog is not answered. Returns the sync token to continue from.
    pub async fn initial_sync(&self, events: mpsc::Sender<ChatEvent>) -> MatrixResult<String> {
        register_invite_handler(&self.client, events.clone());

        let response = self
            .client
            .sync_once(SyncSettings::default().timeout(INITIAL_SYNC_TIMEOUT))
            .await
            .map_err(MatrixError::Sync)?;
        debug!("Initial sync done");

        register_room_handlers(&self.client, events);
        Ok(response.next_batch)
    }

    /// Sync until `shutdown` fires or the sync fails.
    pub async fn sync(&self, token: String, shutdown: CancellationToken) -> MatrixResult<()> {
        info!("Starting sync loop");
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Sync loop stopped");
                Ok(())
            }
            result = self.client.sync(SyncSettings::default().token(token)) => {
                result.map_err(MatrixError::Sync)
            }
        }
    }

    fn parse_room(room: &RoomId) -> BridgeResult<OwnedRoomId> {
        matrix_sdk::ruma::RoomId::parse(room.as_str())
            .map_err(|e| BridgeError::Network(format!("invalid room id {room}: {e}")))
    }

    fn room(&self, room: &RoomId) -> BridgeResult<Room> {
        let id = Self::parse_room(room)?;
        self.client
            .get_room(&id)
            .ok_or_else(|| BridgeError::RoomNotFound(room.to_string()))
    }

    fn stop_typing_refresh(&self, room: &RoomId) {
        if let Some(token) = self.typing.lock().remove(room) {
            token.cancel();
        }
    }

    fn start_typing_refresh(&self, room: &RoomId, handle: Room) {
        let token = CancellationToken::new();
        if let Some(previous) = self.typing.lock().insert(room.clone(), token.clone()) {
            previous.cancel();
        }

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(TYPING_REFRESH) => {
                        if let Err(e) = handle.typing_notice(true).await {
                            debug!(room = %handle.room_id(), "Typing refresh failed: {}", e);
                        }
                    }
                }
            }
        });
    }
}

fn is_url(homeserver: &str) -> bool {
    homeserver.starts_with("http://") || homeserver.starts_with("https://")
}

#[async_trait]
impl ChatNetwork for MatrixChat {
    async fn publish(&self, room: &RoomId, text: &str) -> BridgeResult<MessageHandle> {
        let response = self
            .room(room)?
            .send(RoomMessageEventContent::text_plain(text))
            .await
            .map_err(|e| BridgeError::PublishFailed {
                room: room.to_string(),
                message: e.to_string(),
            })?;

        Ok(MessageHandle {
            room: room.clone(),
            event_id: response.event_id.to_string(),
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> BridgeResult<()> {
        let edit_failed = |message: String| BridgeError::EditFailed {
            room: handle.room.to_string(),
            event_id: handle.event_id.clone(),
            message,
        };
        let original = EventId::parse(handle.event_id.as_str()).map_err(|e| edit_failed(e.to_string()))?;
        let content = RoomMessageEventContent::text_plain(text)
            .make_replacement(ReplacementMetadata::new(original, None), None);

        self.room(&handle.room)?
            .send(content)
            .await
            .map_err(|e| edit_failed(e.to_string()))?;
        Ok(())
    }

    async fn set_typing(&self, room: &RoomId, typing: bool) -> BridgeResult<()> {
        let handle = self.room(room)?;
        if typing {
            self.start_typing_refresh(room, handle.clone());
        } else {
            self.stop_typing_refresh(room);
        }
        handle
            .typing_notice(typing)
            .await
            .map_err(|e| BridgeError::Network(e.to_string()))
    }

    async fn join(&self, room: &RoomId) -> BridgeResult<()> {
        let id = Self::parse_room(room)?;
        self.client
            .join_room_by_id(&id)
            .await
            .map_err(|e| BridgeError::JoinFailed {
                room: room.to_string(),
                message: e.to_string(),
            })?;
        info!(room = %room, "Joined room");
        Ok(())
    }

    async fn leave(&self, room: &RoomId) -> BridgeResult<()> {
        self.stop_typing_refresh(room);
        self.room(room)?
            .leave()
            .await
            .map_err(|e| BridgeError::LeaveFailed {
                room: room.to_string(),
                message: e.to_string(),
            })
    }

    async fn joined_rooms(&self) -> BridgeResult<Vec<BridgeRoom>> {
        let mut rooms = Vec::new();
        for room in self.client.joined_rooms() {
            rooms.push(BridgeRoom::joined(
                RoomId::new(room.room_id().as_str()),
                resolve_kind(&room).await,
            ));
        }
        Ok(rooms)
    }
}
