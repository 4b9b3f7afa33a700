//! # llamatrix_core - Chat to LLM bridge core
//!
//! This crate holds everything between a chat network adapter and an LLM
//! backend:
//! - Per-room conversation history ([`ContextStore`])
//! - Prompt eligibility rules ([`PromptGate`])
//! - The streaming generation contract ([`InferenceBackend`], [`GenerationStream`])
//! - One relay loop per joined room, relaying a generation into a single
//!   edited chat message ([`RelayLoop`])
//! - The session supervisor handling invites, leaves and dispatch
//!   ([`RoomSupervisor`])
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐  ChatEvent   ┌─────────────────┐  RoomCommand  ┌─────────────────┐
//! │  Chat adapter   │─────────────▶│ RoomSupervisor  │──────────────▶│ RelayLoop/room  │
//! └─────────────────┘    (mpsc)    └────────┬────────┘   (bounded)   └────────┬────────┘
//!         ▲                                 │ PromptGate                      │
//!         │ publish / edit                  ▼                                 ▼
//!         │                        ┌─────────────────┐              ┌─────────────────┐
//!         └────────────────────────│   ChatNetwork   │              │ InferenceBackend│
//!                                  └─────────────────┘              └─────────────────┘
//! ```
//!
//! The chat side and the LLM side are traits; `llamatrix_matrix` and
//! `llamatrix_ollama` provide the production implementations and [`mock`]
//! provides test doubles.

pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod inference;
pub mod mock;
pub mod relay;
pub mod supervisor;
pub mod types;

pub use chat::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use gate::*;
pub use inference::*;
pub use relay::*;
pub use supervisor::*;
pub use types::*;
