//! Room session supervisor.
//!
//! Owns the table of room sessions and routes adapter events to them:
//! invites create a session (and its relay loop), leaves tear it down, and
//! messages pass the prompt gate before landing in the room's inbox.
//!
//! Inside [`RoomSupervisor::run`] joins and teardowns happen on background
//! tasks, so one slow room never holds up event routing for the others.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chat::ChatNetwork;
use crate::config::RelayConfig;
use crate::context::ContextStore;
use crate::error::BridgeResult;
use crate::gate::{GateDecision, IgnoreReason, PromptGate};
use crate::inference::InferenceBackend;
use crate::relay::{RelayLoop, RelayState, RoomCommand};
use crate::types::{ChatEvent, InviteState, PromptRequest, Room, RoomId, RoomKind};

/// Result of handling an invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteDecision {
    Accepted,
    Declined,
}

/// Result of routing a message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered to the room's inbox
    Forwarded,
    Ignored(IgnoreReason),
    /// No session for the event's room
    UnknownRoom,
    /// The room's inbox was full or closed
    Dropped,
}

/// A joined room and its relay loop.
struct RoomSession {
    room: Room,
    inbox: mpsc::Sender<RoomCommand>,
    state: watch::Receiver<RelayState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RoomSession {
    /// Cancel the relay loop and wait for it to exit.
    async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(room = %self.room.id, "Relay loop task failed: {}", e);
        }
    }
}

/// An invite whose join request is still in flight.
struct PendingJoin {
    kind: RoomKind,
    /// Messages that arrived before the session existed
    held: Vec<ChatEvent>,
}

/// Supervisor of all room sessions.
pub struct RoomSupervisor {
    chat: Arc<dyn ChatNetwork>,
    backend: Arc<dyn InferenceBackend>,
    store: Arc<ContextStore>,
    gate: PromptGate,
    relay: Arc<RelayConfig>,
    sessions: HashMap<RoomId, RoomSession>,
    pending: HashMap<RoomId, PendingJoin>,
    joins: JoinSet<(RoomId, InviteDecision)>,
    closing: JoinSet<()>,
    root: CancellationToken,
}

impl RoomSupervisor {
    pub fn new(
        chat: Arc<dyn ChatNetwork>,
        backend: Arc<dyn InferenceBackend>,
        store: Arc<ContextStore>,
        gate: PromptGate,
        relay: RelayConfig,
    ) -> Self {
        Self {
            chat,
            backend,
            store,
            gate,
            relay: Arc::new(relay),
            sessions: HashMap::new(),
            pending: HashMap::new(),
            joins: JoinSet::new(),
            closing: JoinSet::new(),
            root: CancellationToken::new(),
        }
    }

    /// Join an invited room and start its session. A failed join declines
    /// the invite.
    pub async fn on_invite(&mut self, room: RoomId, kind: RoomKind) -> InviteDecision {
        if self.sessions.contains_key(&room) {
            debug!(room = %room, "Invite for a room with a live session");
            return InviteDecision::Accepted;
        }

        let decision = accept_invite(Arc::clone(&self.chat), room.clone()).await;
        if decision == InviteDecision::Accepted {
            self.start_session(Room::joined(room, kind));
        }
        decision
    }

    /// Start joining an invited room on a background task. The session is
    /// created once the join completes.
    fn begin_invite(&mut self, room: RoomId, kind: RoomKind) {
        if self.sessions.contains_key(&room) || self.pending.contains_key(&room) {
            debug!(room = %room, "Invite for a room with a live or pending session");
            return;
        }

        self.pending.insert(
            room.clone(),
            PendingJoin {
                kind,
                held: Vec::new(),
            },
        );
        let chat = Arc::clone(&self.chat);
        self.joins.spawn(async move {
            let decision = accept_invite(chat, room.clone()).await;
            (room, decision)
        });
    }

    fn finish_invite(&mut self, room: RoomId, decision: InviteDecision) {
        let Some(pending) = self.pending.remove(&room) else {
            debug!(room = %room, "Join finished for a room left in the meantime");
            return;
        };
        if decision == InviteDecision::Declined || self.sessions.contains_key(&room) {
            return;
        }

        self.start_session(Room::joined(room, pending.kind));
        for event in &pending.held {
            self.dispatch(event);
        }
    }

    /// Register a session for a room joined before startup. Returns `false`
    /// if the room already has one.
    pub fn adopt(&mut self, room: Room) -> bool {
        if self.sessions.contains_key(&room.id) {
            return false;
        }
        debug!(room = %room.id, "Adopting joined room");
        self.start_session(Room {
            state: InviteState::Joined,
            ..room
        });
        true
    }

    /// Adopt every room the account is already a member of.
    pub async fn bootstrap(&mut self) -> BridgeResult<usize> {
        let rooms = self.chat.joined_rooms().await?;
        let adopted = rooms.into_iter().filter(|room| self.adopt(room.clone())).count();
        info!("Adopted {} joined room(s)", adopted);
        Ok(adopted)
    }

    fn start_session(&mut self, room: Room) {
        let cancel = self.root.child_token();
        let (relay, handle) = RelayLoop::new(
            room.id.clone(),
            Arc::clone(&self.chat),
            Arc::clone(&self.backend),
            Arc::clone(&self.store),
            Arc::clone(&self.relay),
            cancel.clone(),
        );
        let task = tokio::spawn(relay.run());
        self.sessions.insert(
            room.id.clone(),
            RoomSession {
                room,
                inbox: handle.inbox,
                state: handle.state,
                cancel,
                task,
            },
        );
    }

    /// Tear down a room's session and forget its history.
    pub async fn on_leave(&mut self, room: &RoomId) -> bool {
        self.pending.remove(room);
        let Some(session) = self.sessions.remove(room) else {
            debug!(room = %room, "Leave for a room without a session");
            return false;
        };

        info!(room = %room, "Closing room session");
        session.close().await;
        self.store.remove(room);
        true
    }

    /// Detach a room's session and finish closing it on a background task.
    fn begin_leave(&mut self, room: &RoomId) {
        if self.pending.remove(room).is_some() {
            debug!(room = %room, "Left a room while joining it");
        }
        let Some(session) = self.sessions.remove(room) else {
            debug!(room = %room, "Leave for a room without a session");
            return;
        };

        info!(room = %room, "Closing room session");
        session.cancel.cancel();
        let store = Arc::clone(&self.store);
        let room = room.clone();
        self.closing.spawn(async move {
            session.close().await;
            store.remove(&room);
        });
    }

    /// Record a room's current kind. Returns `false` for unknown rooms.
    pub fn set_room_kind(&mut self, room: &RoomId, kind: RoomKind) -> bool {
        if let Some(pending) = self.pending.get_mut(room) {
            pending.kind = kind;
            return true;
        }
        let Some(session) = self.sessions.get_mut(room) else {
            return false;
        };
        if session.room.kind != kind {
            info!(room = %room, kind = ?kind, "Room kind changed");
            session.room.kind = kind;
        }
        true
    }

    /// Route a message event to its room. Never waits on a busy room.
    pub fn dispatch(&self, event: &ChatEvent) -> DispatchOutcome {
        let ChatEvent::Message { room, sender, .. } = event else {
            return DispatchOutcome::Ignored(IgnoreReason::NotAMessage);
        };
        let Some(session) = self.sessions.get(room) else {
            debug!(room = %room, "Message for an unknown room");
            return DispatchOutcome::UnknownRoom;
        };

        let command = match self.gate.evaluate(event, session.room.kind) {
            GateDecision::Prompt(text) => {
                RoomCommand::Prompt(PromptRequest::new(room.clone(), sender.clone(), text))
            }
            GateDecision::ClearContext => RoomCommand::ClearContext,
            GateDecision::Ignored(reason) => {
                debug!(room = %room, sender = %sender, reason = ?reason, "Message ignored");
                return DispatchOutcome::Ignored(reason);
            }
        };

        match session.inbox.try_send(command) {
            Ok(()) => DispatchOutcome::Forwarded,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(room = %room, sender = %sender, "Room inbox full, dropping message");
                DispatchOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(room = %room, "Room relay loop is gone, dropping message");
                DispatchOutcome::Dropped
            }
        }
    }

    /// Hold messages for rooms still being joined, dispatch the rest.
    fn hold_or_dispatch(&mut self, event: ChatEvent) {
        let Some(pending) = self.pending.get_mut(event.room()) else {
            self.dispatch(&event);
            return;
        };
        if pending.held.len() < self.relay.inbox_capacity {
            pending.held.push(event);
        } else {
            warn!(room = %event.room(), "Join still pending and hold is full, dropping message");
        }
    }

    /// Handle one adapter event, waiting for joins and teardowns.
    pub async fn handle_event(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::Invite { room, kind } => {
                self.on_invite(room, kind).await;
            }
            ChatEvent::Left { room } => {
                self.on_leave(&room).await;
            }
            ChatEvent::KindChanged { room, kind } => {
                self.set_room_kind(&room, kind);
            }
            message @ ChatEvent::Message { .. } => {
                self.dispatch(&message);
            }
        }
    }

    /// Handle one adapter event without waiting on the chat network.
    fn route(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::Invite { room, kind } => self.begin_invite(room, kind),
            ChatEvent::Left { room } => self.begin_leave(&room),
            ChatEvent::KindChanged { room, kind } => {
                self.set_room_kind(&room, kind);
            }
            message @ ChatEvent::Message { .. } => self.hold_or_dispatch(message),
        }
    }

    /// Consume adapter events until the channel closes or `shutdown` fires,
    /// then close every session.
    pub async fn run(&mut self, mut events: mpsc::Receiver<ChatEvent>, shutdown: CancellationToken) {
        info!("Room supervisor running");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                Some(joined) = self.joins.join_next(), if !self.joins.is_empty() => match joined {
                    Ok((room, decision)) => self.finish_invite(room, decision),
                    Err(e) => error!("Join task failed: {}", e),
                },
                Some(closed) = self.closing.join_next(), if !self.closing.is_empty() => {
                    if let Err(e) = closed {
                        error!("Session teardown task failed: {}", e);
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.route(event),
                    None => {
                        info!("Chat event channel closed");
                        break;
                    }
                },
            }
        }
        self.shutdown().await;
    }

    /// Cancel every session and wait for their relay loops to exit. Joins
    /// still in flight are abandoned.
    pub async fn shutdown(&mut self) {
        self.root.cancel();
        self.joins.abort_all();
        self.pending.clear();

        let sessions: Vec<_> = self.sessions.drain().map(|(_, session)| session).collect();
        info!("Stopping {} room session(s)", sessions.len());
        close_all(sessions).await;

        while self.closing.join_next().await.is_some() {}
        while self.joins.join_next().await.is_some() {}
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_session(&self, room: &RoomId) -> bool {
        self.sessions.contains_key(room)
    }

    /// Current relay state of a room.
    pub fn relay_state(&self, room: &RoomId) -> Option<RelayState> {
        self.sessions.get(room).map(|s| *s.state.borrow())
    }

    /// Watch a room's relay state.
    pub fn watch_state(&self, room: &RoomId) -> Option<watch::Receiver<RelayState>> {
        self.sessions.get(room).map(|s| s.state.clone())
    }

    pub fn room(&self, room: &RoomId) -> Option<&Room> {
        self.sessions.get(room).map(|s| &s.room)
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }
}

/// Join `room`, leaving it again when the join fails.
async fn accept_invite(chat: Arc<dyn ChatNetwork>, room: RoomId) -> InviteDecision {
    info!(room = %room, "Accepting invite");
    if let Err(e) = chat.join(&room).await {
        warn!(room = %room, "Failed to join, declining invite: {}", e);
        if let Err(e) = chat.leave(&room).await {
            warn!(room = %room, "Failed to decline invite: {}", e);
        }
        return InviteDecision::Declined;
    }
    InviteDecision::Accepted
}

async fn close_all(sessions: Vec<RoomSession>) {
    let mut tasks = JoinSet::new();
    for session in sessions {
        tasks.spawn(session.close());
    }
    while tasks.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::{completes_with, ChatCall, MockChat, ScriptStep, ScriptedBackend};
    use crate::types::{TurnRole, UserId};

    const BOT: &str = "@llama:example.org";
    const DM: &str = "!dm:example.org";
    const PUBLIC: &str = "!public:example.org";
    const WAIT: Duration = Duration::from_secs(5);

    fn supervisor(chat: &MockChat, backend: &ScriptedBackend, relay: RelayConfig) -> RoomSupervisor {
        RoomSupervisor::new(
            Arc::new(chat.clone()),
            Arc::new(backend.clone()),
            Arc::new(ContextStore::default()),
            PromptGate::new(UserId::new(BOT), "!llama"),
            relay,
        )
    }

    fn msg(room: &str, body: &str) -> ChatEvent {
        ChatEvent::text(room, "@alice:example.org", body)
    }

    #[tokio::test]
    async fn test_invite_joins_and_starts_one_session() {
        let chat = MockChat::new();
        let backend = ScriptedBackend::new();
        let mut sup = supervisor(&chat, &backend, RelayConfig::new("llama3"));

        assert_eq!(sup.on_invite(DM.into(), RoomKind::Direct).await, InviteDecision::Accepted);
        assert_eq!(sup.on_invite(DM.into(), RoomKind::Direct).await, InviteDecision::Accepted);

        assert_eq!(sup.session_count(), 1);
        assert_eq!(chat.joins(), vec![RoomId::new(DM)]);
        assert_eq!(sup.relay_state(&DM.into()), Some(RelayState::Idle));
        assert!(sup.room(&DM.into()).unwrap().is_direct());
    }

    #[tokio::test]
    async fn test_failed_join_declines_invite() {
        let chat = MockChat::new();
        chat.fail_join(PUBLIC);
        let backend = ScriptedBackend::new();
        let mut sup = supervisor(&chat, &backend, RelayConfig::new("llama3"));

        let decision = sup.on_invite(PUBLIC.into(), RoomKind::MultiParty).await;

        assert_eq!(decision, InviteDecision::Declined);
        assert_eq!(sup.session_count(), 0);
        assert!(chat.calls().contains(&ChatCall::Leave(RoomId::new(PUBLIC))));
    }

    #[tokio::test]
    async fn test_dispatch_applies_gate_per_room_kind() {
        let chat = MockChat::new();
        let backend = ScriptedBackend::new();
        let mut sup = supervisor(&chat, &backend, RelayConfig::new("llama3"));
        sup.on_invite(DM.into(), RoomKind::Direct).await;
        sup.on_invite(PUBLIC.into(), RoomKind::MultiParty).await;

        assert_eq!(sup.dispatch(&msg(DM, "hello")), DispatchOutcome::Forwarded);
        assert_eq!(
            sup.dispatch(&msg(PUBLIC, "hello")),
            DispatchOutcome::Ignored(IgnoreReason::MissingPrefix)
        );
        assert_eq!(sup.dispatch(&msg(PUBLIC, "!llama hello")), DispatchOutcome::Forwarded);
        assert_eq!(
            sup.dispatch(&ChatEvent::text(DM, BOT, "my own reply")),
            DispatchOutcome::Ignored(IgnoreReason::OwnMessage)
        );
        assert_eq!(
            sup.dispatch(&msg("!nowhere:example.org", "hello")),
            DispatchOutcome::UnknownRoom
        );

        let replied = |c: &MockChat| {
            c.messages(&RoomId::new(DM)) == vec!["ok"] && c.messages(&RoomId::new(PUBLIC)) == vec!["ok"]
        };
        assert!(chat.wait_until(WAIT, replied).await);
        let prompts: Vec<_> = backend.requests().into_iter().map(|r| r.prompt).collect();
        assert_eq!(prompts, vec!["hello", "hello"]);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_inbox_drops_without_blocking() {
        let chat = MockChat::new();
        let backend = ScriptedBackend::new();
        let mut sup = supervisor(&chat, &backend, RelayConfig::new("llama3").inbox_capacity(1));
        sup.on_invite(DM.into(), RoomKind::Direct).await;

        // No await between sends: the relay loop cannot drain the inbox.
        assert_eq!(sup.dispatch(&msg(DM, "one")), DispatchOutcome::Forwarded);
        assert_eq!(sup.dispatch(&msg(DM, "two")), DispatchOutcome::Dropped);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_leave_mid_generation_discards_partial_reply() {
        let chat = MockChat::new();
        let backend = ScriptedBackend::new().with_script(vec![
            ScriptStep::Text("partial".into()),
            ScriptStep::Hang,
        ]);
        let mut sup = supervisor(&chat, &backend, RelayConfig::new("llama3"));
        let dm = RoomId::new(DM);
        sup.on_invite(dm.clone(), RoomKind::Direct).await;

        sup.dispatch(&msg(DM, "hello"));
        assert!(chat.wait_until(WAIT, |c| c.messages(&dm) == vec!["partial"]).await);
        assert_eq!(sup.store().len(&dm), 1);

        assert!(sup.on_leave(&dm).await);

        assert_eq!(sup.session_count(), 0);
        assert!(!sup.store().rooms().contains(&dm));
        assert_eq!(sup.dispatch(&msg(DM, "again")), DispatchOutcome::UnknownRoom);
        assert!(!sup.on_leave(&dm).await);
    }

    #[tokio::test]
    async fn test_bootstrap_adopts_joined_rooms() {
        let chat = MockChat::new().with_joined_rooms(vec![
            Room::joined(DM.into(), RoomKind::Direct),
            Room::joined(PUBLIC.into(), RoomKind::MultiParty),
        ]);
        let backend = ScriptedBackend::new();
        let mut sup = supervisor(&chat, &backend, RelayConfig::new("llama3"));

        assert_eq!(sup.bootstrap().await.unwrap(), 2);
        assert_eq!(sup.bootstrap().await.unwrap(), 0);
        assert!(sup.has_session(&PUBLIC.into()));
        assert!(chat.joins().is_empty());
    }

    #[tokio::test]
    async fn test_clear_command_reaches_room() {
        let chat = MockChat::new();
        let backend = ScriptedBackend::new().with_script(completes_with(&["hi"]));
        let mut sup = supervisor(&chat, &backend, RelayConfig::new("llama3"));
        let room = RoomId::new(PUBLIC);
        sup.on_invite(room.clone(), RoomKind::MultiParty).await;

        sup.dispatch(&msg(PUBLIC, "!llama hello"));
        assert!(chat.wait_until(WAIT, |c| c.messages(&room) == vec!["hi"]).await);
        let mut state = sup.watch_state(&room).unwrap();
        state.wait_for(|s| *s == RelayState::Idle).await.unwrap();
        assert_eq!(sup.store().snapshot(&room)[1].role, TurnRole::Assistant);

        assert_eq!(sup.dispatch(&msg(PUBLIC, "!llama clear")), DispatchOutcome::Forwarded);
        assert!(chat.wait_until(WAIT, |c| c.messages(&room).len() == 2).await);
        assert!(sup.store().is_empty(&room));
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let chat = MockChat::new();
        let backend = ScriptedBackend::new().with_script(completes_with(&["hey"]));
        let mut sup = supervisor(&chat, &backend, RelayConfig::new("llama3"));
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        let runner = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                sup.run(rx, shutdown).await;
                sup
            })
        };

        tx.send(ChatEvent::Invite {
            room: DM.into(),
            kind: RoomKind::Direct,
        })
        .await
        .unwrap();
        tx.send(msg(DM, "hello")).await.unwrap();
        assert!(chat.wait_until(WAIT, |c| c.messages(&DM.into()) == vec!["hey"]).await);

        shutdown.cancel();
        let sup = tokio::time::timeout(WAIT, runner).await.unwrap().unwrap();
        assert_eq!(sup.session_count(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_when_channel_closes() {
        let chat = MockChat::new();
        let backend = ScriptedBackend::new();
        let mut sup = supervisor(&chat, &backend, RelayConfig::new("llama3"));
        let (tx, rx) = mpsc::channel(8);
        let runner = tokio::spawn(async move {
            sup.run(rx, CancellationToken::new()).await;
            sup
        });

        tx.send(ChatEvent::Invite {
            room: PUBLIC.into(),
            kind: RoomKind::MultiParty,
        })
        .await
        .unwrap();
        assert!(chat.wait_until(WAIT, |c| c.joins().len() == 1).await);
        drop(tx);

        let sup = tokio::time::timeout(WAIT, runner).await.unwrap().unwrap();
        assert_eq!(sup.session_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_join_does_not_hold_up_other_rooms() {
        let chat = MockChat::new();
        chat.delay_join(PUBLIC, Duration::from_secs(60));
        let backend = ScriptedBackend::new().with_script(completes_with(&["still here"]));
        let mut sup = supervisor(&chat, &backend, RelayConfig::new("llama3"));
        sup.on_invite(DM.into(), RoomKind::Direct).await;

        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let runner = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                sup.run(rx, shutdown).await;
                sup
            })
        };

        tx.send(ChatEvent::Invite {
            room: PUBLIC.into(),
            kind: RoomKind::MultiParty,
        })
        .await
        .unwrap();
        tx.send(msg(DM, "hello")).await.unwrap();
        assert!(chat.wait_until(WAIT, |c| c.messages(&DM.into()) == vec!["still here"]).await);
        assert!(chat.wait_until(WAIT, |c| c.joins().len() == 2).await);

        shutdown.cancel();
        let sup = tokio::time::timeout(WAIT, runner).await.unwrap().unwrap();
        assert!(!sup.has_session(&PUBLIC.into()));
    }

    #[tokio::test]
    async fn test_messages_wait_for_their_join() {
        let chat = MockChat::new();
        chat.delay_join(DM, Duration::from_millis(100));
        let backend = ScriptedBackend::new().with_script(completes_with(&["welcome"]));
        let mut sup = supervisor(&chat, &backend, RelayConfig::new("llama3"));
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let runner = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                sup.run(rx, shutdown).await;
                sup
            })
        };

        tx.send(ChatEvent::Invite {
            room: DM.into(),
            kind: RoomKind::Direct,
        })
        .await
        .unwrap();
        tx.send(msg(DM, "first words")).await.unwrap();
        assert!(chat.wait_until(WAIT, |c| c.messages(&DM.into()) == vec!["welcome"]).await);

        shutdown.cancel();
        tokio::time::timeout(WAIT, runner).await.unwrap().unwrap();
        let prompts: Vec<_> = backend.requests().into_iter().map(|r| r.prompt).collect();
        assert_eq!(prompts, vec!["first words"]);
    }

    #[tokio::test]
    async fn test_leave_during_join_starts_no_session() {
        let chat = MockChat::new();
        chat.delay_join(PUBLIC, Duration::from_millis(100));
        let backend = ScriptedBackend::new();
        let mut sup = supervisor(&chat, &backend, RelayConfig::new("llama3"));

        sup.begin_invite(PUBLIC.into(), RoomKind::MultiParty);
        sup.begin_leave(&PUBLIC.into());
        let (room, decision) = sup.joins.join_next().await.unwrap().unwrap();
        sup.finish_invite(room, decision);

        assert_eq!(decision, InviteDecision::Accepted);
        assert!(!sup.has_session(&PUBLIC.into()));
    }

    #[tokio::test]
    async fn test_kind_change_switches_gating() {
        let chat = MockChat::new();
        let backend = ScriptedBackend::new();
        let mut sup = supervisor(&chat, &backend, RelayConfig::new("llama3"));
        let room = RoomId::new(DM);
        sup.on_invite(room.clone(), RoomKind::Direct).await;
        assert!(sup.room(&room).unwrap().is_direct());

        sup.handle_event(ChatEvent::KindChanged {
            room: room.clone(),
            kind: RoomKind::MultiParty,
        })
        .await;

        assert!(!sup.room(&room).unwrap().is_direct());
        assert_eq!(
            sup.dispatch(&msg(DM, "hello")),
            DispatchOutcome::Ignored(IgnoreReason::MissingPrefix)
        );
        assert!(!sup.set_room_kind(&PUBLIC.into(), RoomKind::Direct));
    }
}
