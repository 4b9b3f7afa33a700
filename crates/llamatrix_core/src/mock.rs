//! Test doubles for the chat network and the inference backend.
//!
//! [`MockChat`] records every call and keeps the current text of each
//! published message. [`ScriptedBackend`] replays scripted generations and
//! tracks how many streams are active per room.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::chat::ChatNetwork;
use crate::error::{BridgeError, BridgeResult, InferenceError};
use crate::inference::{
    GenerationRequest, GenerationSink, GenerationStream, InferenceBackend, StreamOutcome,
    DEFAULT_IDLE_TIMEOUT,
};
use crate::types::{MessageHandle, Room, RoomId};

/// A call made against [`MockChat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCall {
    Publish { room: RoomId, text: String, event_id: String },
    Edit { event_id: String, text: String },
    Typing { room: RoomId, typing: bool },
    Join(RoomId),
    Leave(RoomId),
}

#[derive(Debug, Clone)]
struct PublishedMessage {
    room: RoomId,
    text: String,
    edits: usize,
}

/// Recording chat network.
#[derive(Clone, Default)]
pub struct MockChat {
    calls: Arc<RwLock<Vec<ChatCall>>>,
    /// Published messages in publish order
    messages: Arc<RwLock<Vec<(String, PublishedMessage)>>>,
    joined: Arc<RwLock<Vec<Room>>>,
    next_event: Arc<AtomicUsize>,
    failing_publishes: Arc<AtomicUsize>,
    failing_edits: Arc<AtomicUsize>,
    failing_joins: Arc<RwLock<HashSet<RoomId>>>,
    slow_joins: Arc<RwLock<HashMap<RoomId, Duration>>>,
}

impl MockChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rooms reported by `joined_rooms`.
    pub fn with_joined_rooms(self, rooms: Vec<Room>) -> Self {
        *self.joined.write() = rooms;
        self
    }

    /// Make the next `n` publish calls fail.
    pub fn fail_next_publishes(&self, n: usize) {
        self.failing_publishes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` edit calls fail.
    pub fn fail_next_edits(&self, n: usize) {
        self.failing_edits.store(n, Ordering::SeqCst);
    }

    /// Make joining `room` take `delay` before it succeeds or fails.
    pub fn delay_join(&self, room: impl Into<RoomId>, delay: Duration) {
        self.slow_joins.write().insert(room.into(), delay);
    }

    /// Make joining `room` fail.
    pub fn fail_join(&self, room: impl Into<RoomId>) {
        self.failing_joins.write().insert(room.into());
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.read().clone()
    }

    /// Current text of every message published in `room`, in publish order.
    pub fn messages(&self, room: &RoomId) -> Vec<String> {
        self.messages
            .read()
            .iter()
            .filter(|(_, m)| &m.room == room)
            .map(|(_, m)| m.text.clone())
            .collect()
    }

    pub fn publish_count(&self, room: &RoomId) -> usize {
        self.calls
            .read()
            .iter()
            .filter(|c| matches!(c, ChatCall::Publish { room: r, .. } if r == room))
            .count()
    }

    /// Successful edits of the `index`-th message published in `room`.
    pub fn edit_count(&self, room: &RoomId, index: usize) -> usize {
        self.messages
            .read()
            .iter()
            .filter(|(_, m)| &m.room == room)
            .nth(index)
            .map(|(_, m)| m.edits)
            .unwrap_or(0)
    }

    /// Rooms the mock was asked to join.
    pub fn joins(&self) -> Vec<RoomId> {
        self.calls
            .read()
            .iter()
            .filter_map(|c| match c {
                ChatCall::Join(room) => Some(room.clone()),
                _ => None,
            })
            .collect()
    }

    /// Poll until `condition` holds or `timeout` elapses.
    pub async fn wait_until(&self, timeout: Duration, condition: impl Fn(&MockChat) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition(self) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChatNetwork for MockChat {
    async fn publish(&self, room: &RoomId, text: &str) -> BridgeResult<MessageHandle> {
        if Self::take_failure(&self.failing_publishes) {
            return Err(BridgeError::PublishFailed {
                room: room.to_string(),
                message: "simulated publish failure".to_string(),
            });
        }

        let event_id = format!("$event{}", self.next_event.fetch_add(1, Ordering::SeqCst));
        self.messages.write().push((
            event_id.clone(),
            PublishedMessage {
                room: room.clone(),
                text: text.to_string(),
                edits: 0,
            },
        ));
        self.calls.write().push(ChatCall::Publish {
            room: room.clone(),
            text: text.to_string(),
            event_id: event_id.clone(),
        });

        Ok(MessageHandle {
            room: room.clone(),
            event_id,
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> BridgeResult<()> {
        if Self::take_failure(&self.failing_edits) {
            return Err(BridgeError::EditFailed {
                room: handle.room.to_string(),
                event_id: handle.event_id.clone(),
                message: "simulated edit failure".to_string(),
            });
        }

        {
            let mut messages = self.messages.write();
            let Some((_, message)) = messages.iter_mut().find(|(id, _)| *id == handle.event_id) else {
                return Err(BridgeError::EditFailed {
                    room: handle.room.to_string(),
                    event_id: handle.event_id.clone(),
                    message: "unknown event".to_string(),
                });
            };
            message.text = text.to_string();
            message.edits += 1;
        }
        self.calls.write().push(ChatCall::Edit {
            event_id: handle.event_id.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn set_typing(&self, room: &RoomId, typing: bool) -> BridgeResult<()> {
        self.calls.write().push(ChatCall::Typing {
            room: room.clone(),
            typing,
        });
        Ok(())
    }

    async fn join(&self, room: &RoomId) -> BridgeResult<()> {
        self.calls.write().push(ChatCall::Join(room.clone()));
        let delay = self.slow_joins.read().get(room).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_joins.read().contains(room) {
            return Err(BridgeError::JoinFailed {
                room: room.to_string(),
                message: "simulated join failure".to_string(),
            });
        }
        Ok(())
    }

    async fn leave(&self, room: &RoomId) -> BridgeResult<()> {
        self.calls.write().push(ChatCall::Leave(room.clone()));
        Ok(())
    }

    async fn joined_rooms(&self) -> BridgeResult<Vec<Room>> {
        Ok(self.joined.read().clone())
    }
}

/// One step of a scripted generation.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Text(String),
    Delay(Duration),
    /// Stay silent until the consumer cancels
    Hang,
    Finish(StreamOutcome),
}

/// A full scripted generation.
pub type Script = Vec<ScriptStep>;

/// Script that streams `parts` and completes.
pub fn completes_with(parts: &[&str]) -> Script {
    parts
        .iter()
        .map(|p| ScriptStep::Text((*p).to_string()))
        .chain(std::iter::once(ScriptStep::Finish(StreamOutcome::Completed)))
        .collect()
}

/// Script that streams `parts` and then fails with `error`.
pub fn fails_with(parts: &[&str], error: InferenceError) -> Script {
    parts
        .iter()
        .map(|p| ScriptStep::Text((*p).to_string()))
        .chain(std::iter::once(ScriptStep::Finish(StreamOutcome::Failed(error))))
        .collect()
}

#[derive(Default)]
struct ActiveStreams {
    per_room: HashMap<RoomId, usize>,
    max_per_room: usize,
    total: usize,
}

/// Releases the active-stream slot however the producer task exits.
struct ActiveGuard {
    active: Arc<Mutex<ActiveStreams>>,
    room: RoomId,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        if let Some(count) = active.per_room.get_mut(&self.room) {
            *count -= 1;
        }
        active.total -= 1;
    }
}

/// Inference backend replaying queued scripts in order.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<RwLock<Vec<GenerationRequest>>>,
    active: Arc<Mutex<ActiveStreams>>,
    cancelled: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a script for the next `generate` call.
    pub fn push(&self, script: Script) -> &Self {
        self.scripts.lock().push_back(script);
        self
    }

    pub fn with_script(self, script: Script) -> Self {
        self.push(script);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.read().clone()
    }

    /// Streams whose producer is still running.
    pub fn active(&self) -> usize {
        self.active.lock().total
    }

    /// Highest number of simultaneously active streams seen for one room.
    pub fn max_active_per_room(&self) -> usize {
        self.active.lock().max_per_room
    }

    /// Producers that stopped because the consumer cancelled.
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn play(
        script: Script,
        sink: GenerationSink,
        cancelled: Arc<AtomicUsize>,
        guard: ActiveGuard,
    ) {
        for step in script {
            match step {
                ScriptStep::Text(text) => {
                    if !sink.send_text(text).await {
                        cancelled.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                }
                ScriptStep::Delay(delay) => {
                    tokio::select! {
                        _ = sink.cancelled() => {
                            cancelled.fetch_add(1, Ordering::SeqCst);
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                ScriptStep::Hang => {
                    sink.cancelled().await;
                    cancelled.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                ScriptStep::Finish(outcome) => {
                    // Release the slot before the consumer can observe the end.
                    drop(guard);
                    sink.finish(outcome).await;
                    return;
                }
            }
        }
        drop(guard);
        sink.finish(StreamOutcome::Completed).await;
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn generate(&self, request: GenerationRequest) -> GenerationStream {
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| completes_with(&["ok"]));

        let guard = {
            let mut active = self.active.lock();
            let count = active.per_room.entry(request.room.clone()).or_default();
            *count += 1;
            let count = *count;
            active.max_per_room = active.max_per_room.max(count);
            active.total += 1;
            ActiveGuard {
                active: Arc::clone(&self.active),
                room: request.room.clone(),
            }
        };
        self.requests.write().push(request);

        let (sink, stream) = GenerationStream::channel(DEFAULT_IDLE_TIMEOUT);
        let cancelled = Arc::clone(&self.cancelled);
        tokio::spawn(Self::play(script, sink, cancelled, guard));
        stream
    }
}
