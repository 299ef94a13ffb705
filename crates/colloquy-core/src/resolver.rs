//! Pure causal and content-identity resolution over an event list.
//!
//! Numeric id order reflects append (completion) order, never causal order,
//! so every question about "why does this record exist" or "which earlier
//! record is this the same utterance as" is answered by following explicit
//! `cause` and `substance` links. The resolver never writes and never fails:
//! a dangling pointer degrades to a singleton answer so it stays usable
//! against partial or live logs.

use std::collections::{HashMap, HashSet, VecDeque};

use colloquy_proto::{AgentCreated, AgentId, Event, MessageId};

/// A one-pass index over an event slice.
pub struct EventIndex<'a> {
    by_id: HashMap<MessageId, &'a Event>,
    created: HashMap<AgentId, &'a AgentCreated>,
}

impl<'a> EventIndex<'a> {
    pub fn new(events: &'a [Event]) -> Self {
        let mut by_id = HashMap::with_capacity(events.len());
        let mut created = HashMap::new();
        for event in events {
            by_id.insert(event.message_id(), event);
            if let Event::AgentCreated(c) = event {
                created.entry(c.agent).or_insert(c);
            }
        }
        Self { by_id, created }
    }

    /// Looks up an event by id.
    pub fn get(&self, id: MessageId) -> Option<&'a Event> {
        self.by_id.get(&id).copied()
    }

    /// The parent of `agent`: the agent owning the transcript entry that the
    /// `agent_created` cause points at. `None` for the root, for unknown
    /// agents, and for dangling cause targets.
    pub fn parent_of(&self, agent: AgentId) -> Option<AgentId> {
        let created = self.created.get(&agent)?;
        let cause = created.cause.as_ref()?;
        match self.get(cause.message_id) {
            Some(Event::TranscriptEntry(entry)) => Some(entry.agent),
            _ => None,
        }
    }

    /// The canonical original behind `id`: follows `substance` pointers until
    /// a record carries none.
    ///
    /// A dangling pointer returns the dangling id itself, a degenerate
    /// singleton class. The walk is bounded by the event count, so a cycle in
    /// a corrupt log cannot hang it; `substance` may terminate at a fragment
    /// or a transcript entry alike.
    pub fn canonical_of(&self, id: MessageId) -> MessageId {
        let mut current = id;
        for _ in 0..=self.by_id.len() {
            match self.get(current).and_then(Event::substance) {
                Some(next) => current = next,
                None => return current,
            }
        }
        current
    }

    /// The ancestry of *why* `id` exists: breadth-first over `cause` links,
    /// in discovery order, terminating at records with none.
    pub fn cause_chain(&self, id: MessageId) -> Vec<MessageId> {
        let mut chain = Vec::new();
        let mut visited: HashSet<MessageId> = HashSet::new();
        let mut queue: VecDeque<MessageId> = match self.get(id) {
            Some(event) => event.cause_ids().into(),
            None => VecDeque::new(),
        };
        while let Some(next) = queue.pop_front() {
            if !visited.insert(next) {
                continue;
            }
            chain.push(next);
            if let Some(event) = self.get(next) {
                queue.extend(event.cause_ids());
            }
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_proto::{CauseRef, Fragment, Role, TranscriptEntry};

    fn entry(id: u64, agent: u64, substance: Option<u64>) -> Event {
        Event::TranscriptEntry(TranscriptEntry {
            message_id: MessageId(id),
            agent: AgentId(agent),
            role: Role::User,
            content: format!("entry {id}"),
            tool_calls: vec![],
            tool_call_id: None,
            tool_call: None,
            name: None,
            substance: substance.map(MessageId),
            cause: vec![],
        })
    }

    fn created(id: u64, agent: u64, cause: Option<CauseRef>) -> Event {
        Event::AgentCreated(AgentCreated {
            message_id: MessageId(id),
            agent: AgentId(agent),
            cause,
            name: None,
            model: "m".into(),
        })
    }

    #[test]
    fn parent_follows_creation_cause() {
        let events = vec![
            created(0, 0, None),
            entry(1, 0, None),
            created(2, 1, Some(CauseRef::tool_call(MessageId(1), "call_1"))),
        ];
        let index = EventIndex::new(&events);
        assert_eq!(index.parent_of(AgentId(1)), Some(AgentId(0)));
        assert_eq!(index.parent_of(AgentId(0)), None);
        assert_eq!(index.parent_of(AgentId(9)), None);
    }

    #[test]
    fn canonical_follows_substance_to_the_original() {
        // 3 is a view of 2, which is a view of fragment 1.
        let events = vec![
            entry(0, 0, None),
            Event::Fragment(Fragment {
                message_id: MessageId(1),
                agent: AgentId(0),
                content: "broadcast".into(),
                cause: vec![MessageId(0).into()],
            }),
            entry(2, 1, Some(1)),
            entry(3, 2, Some(2)),
        ];
        let index = EventIndex::new(&events);
        assert_eq!(index.canonical_of(MessageId(3)), MessageId(1));
        assert_eq!(index.canonical_of(MessageId(2)), MessageId(1));
        assert_eq!(index.canonical_of(MessageId(1)), MessageId(1));
    }

    #[test]
    fn dangling_substance_is_its_own_class() {
        let events = vec![entry(5, 0, Some(999))];
        let index = EventIndex::new(&events);
        assert_eq!(index.canonical_of(MessageId(5)), MessageId(999));
        // An id the log has never seen behaves the same way.
        assert_eq!(index.canonical_of(MessageId(7)), MessageId(7));
    }

    #[test]
    fn forged_substance_cycle_terminates() {
        // Cannot be produced by the store; simulates a corrupt log.
        let events = vec![entry(0, 0, Some(1)), entry(1, 0, Some(0))];
        let index = EventIndex::new(&events);
        let canonical = index.canonical_of(MessageId(0));
        assert!(canonical == MessageId(0) || canonical == MessageId(1));
    }

    #[test]
    fn cause_chain_collects_ancestry() {
        let events = vec![
            entry(0, 0, None),
            entry(1, 0, None),
            Event::Fragment(Fragment {
                message_id: MessageId(2),
                agent: AgentId(0),
                content: "digest".into(),
                cause: vec![MessageId(0).into(), MessageId(1).into()],
            }),
            Event::Fragment(Fragment {
                message_id: MessageId(3),
                agent: AgentId(0),
                content: "re-digest".into(),
                cause: vec![MessageId(2).into()],
            }),
        ];
        let index = EventIndex::new(&events);
        assert_eq!(
            index.cause_chain(MessageId(3)),
            vec![MessageId(2), MessageId(0), MessageId(1)]
        );
        assert!(index.cause_chain(MessageId(0)).is_empty());
    }
}
