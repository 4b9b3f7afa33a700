//! # llamatrix_matrix
//!
//! Matrix adapter for the bridge, built on `matrix-sdk`.
//!
//! - [`MatrixChat::login`] logs in with a username and password
//! - [`MatrixChat::initial_sync`] skips the backlog and installs the event
//!   handlers that feed [`ChatEvent`](llamatrix_core::ChatEvent)s into a channel
//! - [`MatrixChat::sync`] keeps the session syncing until shutdown
//! - The [`ChatNetwork`](llamatrix_core::ChatNetwork) implementation publishes
//!   messages, edits them with `m.replace` relations and keeps the typing
//!   notice alive while a reply is generated

pub mod client;
pub mod error;
pub mod events;

pub use client::{MatrixChat, MatrixLogin};
pub use error::{MatrixError, MatrixResult};
