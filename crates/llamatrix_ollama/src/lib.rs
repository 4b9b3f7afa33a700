//! # llamatrix_ollama
//!
//! [`InferenceBackend`](llamatrix_core::InferenceBackend) implementation for
//! an Ollama server.
//!
//! Each generation is one `POST /api/chat` with `stream: true`. The response
//! is newline-delimited JSON; every line carries a text increment, the last
//! one carries `"done": true`. The HTTP exchange runs in its own task that
//! feeds a [`GenerationStream`](llamatrix_core::GenerationStream); cancelling
//! the stream drops the connection.
//!
//! Error mapping:
//!
//! | Situation                          | Terminal item        |
//! |------------------------------------|----------------------|
//! | connect / send failure             | `BackendUnreachable` |
//! | non-2xx status                     | `BackendError`       |
//! | `{"error": ...}` line              | `BackendError`       |
//! | body ends without `done`           | `BackendError`       |
//! | no line within the idle window     | `Timeout`            |

pub mod client;
pub mod ndjson;

pub use client::{OllamaClient, CHAT_PATH};
pub use ndjson::{decode_line, Chunk, LineDecoder};
