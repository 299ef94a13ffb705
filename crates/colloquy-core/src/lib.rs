//! # colloquy-core
//!
//! Core functionality for the Colloquy session log.
//!
//! This crate provides:
//! - The identifier allocator and the session store (the single writer)
//! - Pure causal/content-identity resolution over an event stream
//! - Full-tree reconstruction for resuming a session
//! - The viewer reconstruction engine (batch and incremental)
//! - An incremental reader for tailing a live log file

mod allocator;
mod feed;
mod resolver;
mod session;
mod tree;
mod viewer;

pub use allocator::IdAllocator;
pub use feed::{LogReader, MalformedLine, ParseResult};
pub use resolver::EventIndex;
pub use session::{AgentMeta, Session};
pub use tree::{AgentNode, AgentTree};
pub use viewer::{align, dedupe, visible_entries, Cell, Panel, Row, ViewerState};
