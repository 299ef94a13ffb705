//! # colloquy-proto
//!
//! Shared types and error definitions for the Colloquy session log.
//!
//! This crate defines the wire-level vocabulary used across all Colloquy
//! crates:
//! - The three event variants that make up a session log
//! - Message, agent, and cause identifiers
//! - Tracked strings carrying content provenance
//! - Common error types

mod error;
mod event;
mod id;
mod tracked;

pub use error::{Error, Result};
pub use event::{AgentCreated, Event, Fragment, NewEntry, Record, Role, ToolCall, TranscriptEntry};
pub use id::{AgentId, CauseRef, MessageId};
pub use tracked::{Provenance, Tracked};
