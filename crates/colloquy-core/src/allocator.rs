//! Identifier allocation for the two id namespaces.
//!
//! The allocator is the only id-generation path in the codebase. It lives
//! inside the session store, so allocation and append-ownership cannot drift
//! apart. On resume, [`IdAllocator::restore`] replays the existing log and
//! sets each counter one past the maximum id seen in its namespace; skipping
//! this would let a new agent reuse a terminated agent's id and silently
//! corrupt every keyed consumer.

use colloquy_proto::{AgentId, Event, MessageId};

/// Monotonic counters for message and agent identifiers.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next_message: u64,
    next_agent: u64,
}

impl IdAllocator {
    /// Fresh counters at the base of each namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters restored from a replay of an existing log.
    pub fn restore<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut allocator = Self::new();
        for event in events {
            allocator.observe(event);
        }
        allocator
    }

    /// Advances both counters past any id the event mentions.
    ///
    /// Agent ids are harvested from every `agent` field, not just
    /// `agent_created`, so an id that was allocated and used before its
    /// creation record was written still cannot be reissued.
    pub fn observe(&mut self, event: &Event) {
        self.next_message = self.next_message.max(event.message_id().0 + 1);
        self.next_agent = self.next_agent.max(event.agent().0 + 1);
    }

    /// Issues the next message id.
    pub fn next_message_id(&mut self) -> MessageId {
        let id = MessageId(self.next_message);
        self.next_message += 1;
        id
    }

    /// Issues the next agent id.
    pub fn next_agent_id(&mut self) -> AgentId {
        let id = AgentId(self.next_agent);
        self.next_agent += 1;
        id
    }

    /// The message id the next `next_message_id` call will issue. The store
    /// uses this to build and append a record before committing the id.
    pub(crate) fn peek_message_id(&self) -> MessageId {
        MessageId(self.next_message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_proto::{AgentCreated, Fragment};

    #[test]
    fn fresh_counters_start_at_base() {
        let mut a = IdAllocator::new();
        assert_eq!(a.next_message_id(), MessageId(0));
        assert_eq!(a.next_message_id(), MessageId(1));
        assert_eq!(a.next_agent_id(), AgentId(0));
    }

    #[test]
    fn restore_skips_past_every_seen_id() {
        let events = vec![
            Event::AgentCreated(AgentCreated {
                message_id: MessageId(0),
                agent: AgentId(0),
                cause: None,
                name: Some("primary".into()),
                model: "m".into(),
            }),
            Event::Fragment(Fragment {
                message_id: MessageId(7),
                agent: AgentId(3),
                content: "x".into(),
                cause: vec![MessageId(0).into()],
            }),
        ];
        let mut a = IdAllocator::restore(&events);
        assert_eq!(a.next_message_id(), MessageId(8));
        // Agent 3 appeared only on a fragment, never in agent_created.
        assert_eq!(a.next_agent_id(), AgentId(4));
    }
}
