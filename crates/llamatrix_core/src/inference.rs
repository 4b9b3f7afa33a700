//! Inference contract: streaming generation as a cancellable lazy sequence.
//!
//! A backend answers [`InferenceBackend::generate`] by spawning a producer
//! task that pushes text increments into a [`GenerationSink`]. The relay loop
//! owns the matching [`GenerationStream`] and pulls increments from it. The
//! two halves share a cancellation token: cancelling or dropping the stream
//! tells the producer to stop and release its connection.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::InferenceError;
use crate::types::{ConversationTurn, RoomId};

/// Default idle window before a silent stream is considered dead.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Buffered increments between producer and consumer.
const STREAM_BUFFER: usize = 64;

/// Everything a backend needs to start one generation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Room the generation is for (used for logging)
    pub room: RoomId,
    pub model: String,
    pub prompt: String,
    pub history: Vec<ConversationTurn>,
}

impl GenerationRequest {
    pub fn new(
        room: RoomId,
        model: impl Into<String>,
        prompt: impl Into<String>,
        history: Vec<ConversationTurn>,
    ) -> Self {
        Self {
            room,
            model: model.into(),
            prompt: prompt.into(),
            history,
        }
    }
}

/// How a generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Aborted,
    Failed(InferenceError),
}

/// One item pulled from a [`GenerationStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A text increment
    Text(String),
    /// Terminal status; nothing follows it
    Finished(StreamOutcome),
}

/// LLM backend able to stream completions.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Start a streaming generation.
    ///
    /// Connection failures are not returned as `Err`; they surface as the
    /// stream's terminal item.
    async fn generate(&self, request: GenerationRequest) -> GenerationStream;
}

/// Producer half of a generation.
#[derive(Debug)]
pub struct GenerationSink {
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl GenerationSink {
    /// Push a text increment. Returns `false` once the consumer is gone or
    /// has cancelled, in which case the producer should stop.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(StreamEvent::Text(text.into())) => sent.is_ok(),
        }
    }

    /// Deliver the terminal status and close the stream.
    pub async fn finish(self, outcome: StreamOutcome) {
        // The consumer may already be gone; nothing to report then.
        let _ = self.tx.send(StreamEvent::Finished(outcome)).await;
    }

    /// Resolves once the consumer cancels or drops the stream.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Consumer half of a generation, owned by exactly one relay loop.
#[derive(Debug)]
pub struct GenerationStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    idle_timeout: Duration,
    /// Set on the first poll and pushed back by every increment only.
    deadline: Option<Instant>,
    finished: bool,
}

impl GenerationStream {
    /// Create a connected sink/stream pair.
    pub fn channel(idle_timeout: Duration) -> (GenerationSink, GenerationStream) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let cancel = CancellationToken::new();
        (
            GenerationSink {
                tx,
                cancel: cancel.clone(),
            },
            GenerationStream {
                rx,
                cancel,
                idle_timeout,
                deadline: None,
                finished: false,
            },
        )
    }

    /// A stream that fails immediately, for backends that cannot even start.
    pub fn failed(error: InferenceError) -> Self {
        let (sink, stream) = Self::channel(DEFAULT_IDLE_TIMEOUT);
        // Buffer has room, so this never waits.
        let _ = sink.tx.try_send(StreamEvent::Finished(StreamOutcome::Failed(error)));
        stream
    }

    /// Override the idle window.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self.deadline = None;
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Pull the next item. Returns `None` after the terminal item.
    ///
    /// The idle window spans calls: dropping an unfinished `next()` future
    /// does not restart it.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        let idle_timeout = self.idle_timeout;
        let deadline = *self
            .deadline
            .get_or_insert_with(|| Instant::now() + idle_timeout);

        let event = match tokio::time::timeout_at(deadline, self.rx.recv()).await {
            Ok(Some(event)) => {
                if matches!(event, StreamEvent::Text(_)) {
                    self.deadline = Some(Instant::now() + idle_timeout);
                }
                event
            }
            Ok(None) => StreamEvent::Finished(if self.cancel.is_cancelled() {
                StreamOutcome::Aborted
            } else {
                StreamOutcome::Failed(InferenceError::BackendError {
                    status: None,
                    message: "stream ended without a completion marker".to_string(),
                })
            }),
            Err(_) => {
                debug!(window = ?self.idle_timeout, "Generation stream idle, cancelling");
                self.cancel.cancel();
                StreamEvent::Finished(StreamOutcome::Failed(InferenceError::Timeout(
                    self.idle_timeout,
                )))
            }
        };

        if matches!(event, StreamEvent::Finished(_)) {
            self.finished = true;
            self.rx.close();
        }
        Some(event)
    }

    /// Abort the generation. The producer is told to stop; no further
    /// increments are delivered.
    pub fn cancel(&mut self) {
        if !self.finished {
            self.cancel.cancel();
            self.finished = true;
            self.rx.close();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increments_then_completion() {
        let (sink, mut stream) = GenerationStream::channel(Duration::from_secs(5));
        tokio::spawn(async move {
            assert!(sink.send_text("Hi").await);
            assert!(sink.send_text(" there").await);
            sink.finish(StreamOutcome::Completed).await;
        });

        assert_eq!(stream.next().await, Some(StreamEvent::Text("Hi".into())));
        assert_eq!(stream.next().await, Some(StreamEvent::Text(" there".into())));
        assert_eq!(
            stream.next().await,
            Some(StreamEvent::Finished(StreamOutcome::Completed))
        );
        assert_eq!(stream.next().await, None);
        assert!(stream.is_finished());
    }

    #[tokio::test]
    async fn test_failed_stream_yields_single_error() {
        let err = InferenceError::BackendUnreachable("connection refused".into());
        let mut stream = GenerationStream::failed(err.clone());

        assert_eq!(
            stream.next().await,
            Some(StreamEvent::Finished(StreamOutcome::Failed(err)))
        );
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_cancels_producer() {
        let (sink, mut stream) = GenerationStream::channel(Duration::from_secs(3));

        let event = stream.next().await;
        assert_eq!(
            event,
            Some(StreamEvent::Finished(StreamOutcome::Failed(
                InferenceError::Timeout(Duration::from_secs(3))
            )))
        );
        assert!(sink.is_cancelled());
        assert!(!sink.send_text("late").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_polls_keep_the_idle_deadline() {
        let (sink, mut stream) = GenerationStream::channel(Duration::from_millis(300));
        let started = Instant::now();

        // Give up on each call after 100ms, like a select! woken by other input.
        let event = loop {
            if let Ok(event) = tokio::time::timeout(Duration::from_millis(100), stream.next()).await {
                break event;
            }
        };

        assert_eq!(
            event,
            Some(StreamEvent::Finished(StreamOutcome::Failed(
                InferenceError::Timeout(Duration::from_millis(300))
            )))
        );
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(sink.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_pushes_the_deadline_back() {
        let (sink, mut stream) = GenerationStream::channel(Duration::from_millis(300));
        let started = Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            sink.send_text("slow").await;
            sink.cancelled().await;
        });

        assert_eq!(stream.next().await, Some(StreamEvent::Text("slow".into())));
        assert!(matches!(
            stream.next().await,
            Some(StreamEvent::Finished(StreamOutcome::Failed(InferenceError::Timeout(_))))
        ));
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_dropped_producer_is_a_backend_error() {
        let (sink, mut stream) = GenerationStream::channel(Duration::from_secs(5));
        drop(sink);

        match stream.next().await {
            Some(StreamEvent::Finished(StreamOutcome::Failed(InferenceError::BackendError {
                ..
            }))) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_and_drop_signal_the_producer() {
        let (sink, mut stream) = GenerationStream::channel(Duration::from_secs(5));
        stream.cancel();
        assert!(sink.is_cancelled());
        assert_eq!(stream.next().await, None);

        let (sink, stream) = GenerationStream::channel(Duration::from_secs(5));
        drop(stream);
        tokio::time::timeout(Duration::from_secs(1), sink.cancelled())
            .await
            .expect("drop should cancel the producer");
    }
}
