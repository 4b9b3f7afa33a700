//! Streaming client for the Ollama `/api/chat` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use llamatrix_core::{
    GenerationRequest, GenerationSink, GenerationStream, InferenceBackend, InferenceError,
    StreamOutcome, TurnRole, DEFAULT_IDLE_TIMEOUT,
};

use crate::ndjson::{decode_line, error_message, LineDecoder};

/// Path of the chat endpoint relative to the server base URL.
pub const CHAT_PATH: &str = "/api/chat";

/// Time allowed to establish the TCP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

impl<'a> ChatRequest<'a> {
    /// History in order, then the prompt as the final user message.
    fn from_generation(request: &'a GenerationRequest) -> Self {
        let messages = request
            .history
            .iter()
            .map(|turn| ChatMessage {
                role: turn.role.as_str(),
                content: &turn.text,
            })
            .chain(std::iter::once(ChatMessage {
                role: TurnRole::User.as_str(),
                content: &request.prompt,
            }))
            .collect();

        Self {
            model: &request.model,
            messages,
            stream: true,
        }
    }
}

/// What to do after handling one stream line.
enum LineFlow {
    Continue,
    Completed,
    /// The consumer is gone
    Stop,
}

/// Ollama backend speaking the NDJSON streaming chat protocol.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    endpoint: String,
}

impl OllamaClient {
    /// Create a client for the server at `base_url` (e.g. `http://localhost:11434`).
    pub fn new(base_url: &str) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::BackendError {
                status: None,
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), CHAT_PATH),
        })
    }

    /// Full URL of the chat endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Producer task: runs one HTTP exchange and feeds `sink` until the
    /// stream completes, fails or the consumer cancels.
    async fn produce(self, request: GenerationRequest, sink: GenerationSink) {
        let body = ChatRequest::from_generation(&request);
        debug!(
            room = %request.room,
            model = %request.model,
            messages = body.messages.len(),
            "Sending chat request to {}",
            self.endpoint
        );

        let sent = tokio::select! {
            biased;
            _ = sink.cancelled() => return,
            sent = self.client.post(&self.endpoint).json(&body).send() => sent,
        };
        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                warn!(room = %request.room, "Ollama unreachable: {}", e);
                sink.finish(StreamOutcome::Failed(InferenceError::BackendUnreachable(
                    e.to_string(),
                )))
                .await;
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = InferenceError::BackendError {
                status: Some(status.as_u16()),
                message: error_message(&body),
            };
            warn!(room = %request.room, "Ollama rejected the request: {}", error);
            sink.finish(StreamOutcome::Failed(error)).await;
            return;
        }

        let mut bytes = response.bytes_stream();
        let mut decoder = LineDecoder::new();
        let mut increments = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = sink.cancelled() => {
                    debug!(room = %request.room, "Generation cancelled, dropping connection");
                    return;
                }
                next = bytes.next() => next,
            };

            let ended = next.is_none();
            let lines = match next {
                Some(Ok(chunk)) => decoder.push(&chunk),
                Some(Err(e)) => {
                    sink.finish(StreamOutcome::Failed(InferenceError::BackendError {
                        status: None,
                        message: format!("stream interrupted: {e}"),
                    }))
                    .await;
                    return;
                }
                None => decoder.finish().into_iter().collect(),
            };

            for line in lines {
                match Self::handle_line(&sink, &line, &mut increments).await {
                    Ok(LineFlow::Continue) => {}
                    Ok(LineFlow::Completed) => {
                        info!(room = %request.room, increments, "Ollama generation completed");
                        sink.finish(StreamOutcome::Completed).await;
                        return;
                    }
                    Ok(LineFlow::Stop) => return,
                    Err(error) => {
                        warn!(room = %request.room, "Ollama stream error: {}", error);
                        sink.finish(StreamOutcome::Failed(error)).await;
                        return;
                    }
                }
            }

            if ended {
                sink.finish(StreamOutcome::Failed(InferenceError::BackendError {
                    status: None,
                    message: "response ended before the completion marker".to_string(),
                }))
                .await;
                return;
            }
        }
    }

    async fn handle_line(
        sink: &GenerationSink,
        line: &str,
        increments: &mut usize,
    ) -> Result<LineFlow, InferenceError> {
        let chunk = decode_line(line)?;
        if let Some(text) = chunk.text {
            *increments += 1;
            if !sink.send_text(text).await {
                return Ok(LineFlow::Stop);
            }
        }
        Ok(if chunk.done {
            LineFlow::Completed
        } else {
            LineFlow::Continue
        })
    }
}

#[async_trait]
impl InferenceBackend for OllamaClient {
    async fn generate(&self, request: GenerationRequest) -> GenerationStream {
        let (sink, stream) = GenerationStream::channel(DEFAULT_IDLE_TIMEOUT);
        tokio::spawn(self.clone().produce(request, sink));
        stream
    }
}
