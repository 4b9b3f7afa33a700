//! Per-room relay loop.
//!
//! Each joined room runs one [`RelayLoop`] task. The loop alternates between
//! `Idle` (waiting on its inbox) and `Generating` (draining one generation
//! stream into an edit-in-place chat message). While generating it keeps
//! reading its inbox so new prompts are handled by the backlog policy instead
//! of piling up or running in parallel.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat::ChatNetwork;
use crate::config::{BacklogPolicy, RelayConfig};
use crate::context::ContextStore;
use crate::error::InferenceError;
use crate::inference::{GenerationRequest, GenerationStream, InferenceBackend, StreamEvent, StreamOutcome};
use crate::types::{ConversationTurn, MessageHandle, PromptRequest, RoomId};

/// Reply posted after the context-clear command.
pub const CONTEXT_CLEARED_NOTICE: &str = "Context cleared";

/// Text shown when a generation completes without any output.
const EMPTY_RESPONSE_NOTICE: &str = "(no response)";

/// Work items delivered to a room's relay loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomCommand {
    Prompt(PromptRequest),
    ClearContext,
}

/// Observable state of a relay loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Generating,
    Stopped,
}

/// Prompts waiting for the current generation to finish.
#[derive(Debug)]
struct Backlog {
    policy: BacklogPolicy,
    pending: VecDeque<PromptRequest>,
}

impl Backlog {
    fn new(policy: BacklogPolicy) -> Self {
        Self {
            policy,
            pending: VecDeque::new(),
        }
    }

    /// Offer a prompt that arrived while busy; returns whatever was discarded.
    fn offer(&mut self, request: PromptRequest) -> Option<PromptRequest> {
        match self.policy {
            BacklogPolicy::LatestWins => {
                let discarded = self.pending.pop_front();
                self.pending.push_back(request);
                discarded
            }
            BacklogPolicy::DropWhileBusy => Some(request),
            BacklogPolicy::Fifo(capacity) => {
                self.pending.push_back(request);
                if self.pending.len() > capacity {
                    self.pending.pop_front()
                } else {
                    None
                }
            }
        }
    }

    fn pop(&mut self) -> Option<PromptRequest> {
        self.pending.pop_front()
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}

/// The chat message a generation is streamed into.
struct StreamedReply {
    chat: Arc<dyn ChatNetwork>,
    room: RoomId,
    handle: Option<MessageHandle>,
    text: String,
    /// Accumulated text not yet shown in the room
    dirty: bool,
    last_edit: Option<Instant>,
    edit_interval: std::time::Duration,
}

impl StreamedReply {
    fn new(chat: Arc<dyn ChatNetwork>, room: RoomId, config: &RelayConfig) -> Self {
        Self {
            chat,
            room,
            handle: None,
            text: String::new(),
            dirty: false,
            last_edit: None,
            edit_interval: config.edit_interval,
        }
    }

    async fn open(&mut self, placeholder: &str) {
        match self.chat.publish(&self.room, placeholder).await {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => warn!(room = %self.room, "Failed to publish placeholder: {}", e),
        }
    }

    async fn push(&mut self, increment: &str) {
        if increment.is_empty() {
            return;
        }
        self.text.push_str(increment);
        self.dirty = true;

        let due = self
            .last_edit
            .map_or(true, |at| at.elapsed() >= self.edit_interval);
        if due {
            self.flush().await;
        }
    }

    /// Show the accumulated text. A failed publish is retried with the full
    /// text on the next flush.
    async fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        let text = self.text.clone();
        if self.show(&text).await {
            self.dirty = false;
            self.last_edit = Some(Instant::now());
        }
    }

    async fn show(&mut self, text: &str) -> bool {
        let result = match self.handle.clone() {
            Some(handle) => self.chat.edit(&handle, text).await,
            None => match self.chat.publish(&self.room, text).await {
                Ok(handle) => {
                    self.handle = Some(handle);
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(room = %self.room, "Failed to relay generated text: {}", e);
                false
            }
        }
    }

    /// Post a failure notice. With nothing relayed yet the placeholder is
    /// turned into the notice; otherwise the partial reply stays and the
    /// notice follows as its own message.
    async fn fail(&mut self, notice: &str) {
        if self.text.is_empty() && self.handle.is_some() && self.show(notice).await {
            return;
        }
        self.flush().await;
        if let Err(e) = self.chat.publish(&self.room, notice).await {
            warn!(room = %self.room, "Failed to publish error notice: {}", e);
        }
    }
}

/// How a generation cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CycleEnd {
    Completed,
    Failed(InferenceError),
    Aborted,
    /// The room session is being torn down
    Cancelled,
}

/// Worker that serializes generations for one room.
pub struct RelayLoop {
    room: RoomId,
    chat: Arc<dyn ChatNetwork>,
    backend: Arc<dyn InferenceBackend>,
    store: Arc<ContextStore>,
    config: Arc<RelayConfig>,
    inbox: mpsc::Receiver<RoomCommand>,
    inbox_open: bool,
    backlog: Backlog,
    clear_pending: bool,
    cancel: CancellationToken,
    state: watch::Sender<RelayState>,
}

/// Handles the supervisor keeps for a spawned relay loop.
pub struct RelayHandle {
    pub inbox: mpsc::Sender<RoomCommand>,
    pub state: watch::Receiver<RelayState>,
}

impl RelayLoop {
    /// Build a relay loop and the handles used to feed and observe it.
    pub fn new(
        room: RoomId,
        chat: Arc<dyn ChatNetwork>,
        backend: Arc<dyn InferenceBackend>,
        store: Arc<ContextStore>,
        config: Arc<RelayConfig>,
        cancel: CancellationToken,
    ) -> (Self, RelayHandle) {
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(RelayState::Idle);
        let backlog = Backlog::new(config.backlog);
        (
            Self {
                room,
                chat,
                backend,
                store,
                config,
                inbox: inbox_rx,
                inbox_open: true,
                backlog,
                clear_pending: false,
                cancel,
                state: state_tx,
            },
            RelayHandle {
                inbox: inbox_tx,
                state: state_rx,
            },
        )
    }

    /// Run until the session is cancelled or the inbox closes.
    pub async fn run(mut self) {
        info!(room = %self.room, "Relay loop started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let command = match self.backlog.pop() {
                Some(request) => RoomCommand::Prompt(request),
                None => {
                    let received = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => None,
                        command = self.inbox.recv() => command,
                    };
                    match received {
                        Some(command) => command,
                        None => break,
                    }
                }
            };

            match command {
                RoomCommand::ClearContext => self.clear_context().await,
                RoomCommand::Prompt(request) => {
                    if self.relay(request).await == CycleEnd::Cancelled {
                        break;
                    }
                    self.absorb_inbox();
                    if std::mem::take(&mut self.clear_pending) {
                        self.clear_context().await;
                    }
                }
            }
        }

        self.state.send_replace(RelayState::Stopped);
        info!(room = %self.room, "Relay loop stopped");
    }

    async fn clear_context(&mut self) {
        self.store.clear(&self.room);
        info!(room = %self.room, "Conversation context cleared");
        if let Err(e) = self.chat.publish(&self.room, CONTEXT_CLEARED_NOTICE).await {
            warn!(room = %self.room, "Failed to confirm context clear: {}", e);
        }
    }

    /// Move commands queued while the loop was busy into the backlog.
    fn absorb_inbox(&mut self) {
        while let Ok(command) = self.inbox.try_recv() {
            self.accept_while_busy(command);
        }
    }

    fn accept_while_busy(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::ClearContext => self.clear_pending = true,
            RoomCommand::Prompt(request) => {
                if let Some(discarded) = self.backlog.offer(request) {
                    debug!(
                        room = %self.room,
                        sender = %discarded.sender,
                        "Discarding pending prompt ({:?})",
                        self.backlog.policy
                    );
                }
                debug!(room = %self.room, pending = self.backlog.len(), "Room busy, prompt deferred");
            }
        }
    }

    /// One full Idle -> Generating -> Idle cycle.
    async fn relay(&mut self, request: PromptRequest) -> CycleEnd {
        let history = self.store.snapshot(&self.room);
        self.store
            .append(&self.room, ConversationTurn::user(&request.text));
        self.state.send_replace(RelayState::Generating);
        debug!(
            room = %self.room,
            sender = %request.sender,
            history = history.len(),
            "Starting generation"
        );

        self.set_typing(true).await;
        let mut reply = StreamedReply::new(Arc::clone(&self.chat), self.room.clone(), &self.config);
        reply.open(&self.config.placeholder).await;

        let end = self.generate_with_retry(&request, history, &mut reply).await;

        match &end {
            CycleEnd::Completed => {
                reply.flush().await;
                if reply.text.is_empty() {
                    reply.show(EMPTY_RESPONSE_NOTICE).await;
                }
                // A teardown racing the final edit must not commit the turn.
                if !self.cancel.is_cancelled() {
                    self.store
                        .append(&self.room, ConversationTurn::assistant(&reply.text));
                    info!(room = %self.room, chars = reply.text.len(), "Generation completed");
                }
            }
            CycleEnd::Failed(error) => {
                warn!(room = %self.room, "Generation failed: {}", error);
                reply.fail(&error.room_notice()).await;
            }
            CycleEnd::Aborted => {
                warn!(room = %self.room, "Generation aborted by backend");
                reply.fail("⚠️ The generation was aborted.").await;
            }
            CycleEnd::Cancelled => {
                debug!(room = %self.room, "Generation cancelled with the room session");
                self.set_typing(false).await;
                return CycleEnd::Cancelled;
            }
        }

        self.set_typing(false).await;
        self.state.send_replace(RelayState::Idle);
        end
    }

    async fn generate_with_retry(
        &mut self,
        request: &PromptRequest,
        history: Vec<ConversationTurn>,
        reply: &mut StreamedReply,
    ) -> CycleEnd {
        let mut attempt = 0;
        loop {
            let generation = GenerationRequest::new(
                self.room.clone(),
                &self.config.model,
                &request.text,
                history.clone(),
            );
            let mut stream = self
                .backend
                .generate(generation)
                .await
                .with_idle_timeout(self.config.idle_timeout);

            let end = self.drain(&mut stream, reply).await;
            drop(stream);

            match end {
                CycleEnd::Failed(InferenceError::BackendUnreachable(ref reason))
                    if reply.text.is_empty() && attempt < self.config.unreachable_retries =>
                {
                    attempt += 1;
                    let delay = self.config.backoff_for(attempt);
                    warn!(
                        room = %self.room,
                        "Backend unreachable ({}), retry {}/{} in {:?}",
                        reason,
                        attempt,
                        self.config.unreachable_retries,
                        delay
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return CycleEnd::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                end => return end,
            }
        }
    }

    /// Relay increments until the stream ends, keeping the inbox drained.
    async fn drain(&mut self, stream: &mut GenerationStream, reply: &mut StreamedReply) -> CycleEnd {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    stream.cancel();
                    return CycleEnd::Cancelled;
                }
                command = self.inbox.recv(), if self.inbox_open => match command {
                    Some(command) => self.accept_while_busy(command),
                    None => self.inbox_open = false,
                },
                event = stream.next() => match event {
                    Some(StreamEvent::Text(text)) => reply.push(&text).await,
                    Some(StreamEvent::Finished(StreamOutcome::Completed)) => return CycleEnd::Completed,
                    Some(StreamEvent::Finished(StreamOutcome::Failed(error))) => {
                        return CycleEnd::Failed(error)
                    }
                    Some(StreamEvent::Finished(StreamOutcome::Aborted)) | None => {
                        return CycleEnd::Aborted
                    }
                },
            }
        }
    }

    async fn set_typing(&self, typing: bool) {
        if let Err(e) = self.chat.set_typing(&self.room, typing).await {
            debug!(room = %self.room, "Failed to update typing notice: {}", e);
        }
    }
}
