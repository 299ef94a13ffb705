//! Full-tree reconstruction for resuming a session.
//!
//! The tree is an arena keyed by agent id with non-owning parent/child
//! pointers, so any subtree can be dropped from memory and rebuilt later by
//! replaying only its slice of the log (revivification).

use std::collections::{HashMap, VecDeque};

use colloquy_proto::{AgentId, Error, Event, MessageId, Result, TranscriptEntry};

/// One reconstructed agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentNode {
    pub id: AgentId,
    pub name: Option<String>,
    pub model: String,
    pub parent: Option<AgentId>,
    /// Children in creation order.
    pub children: Vec<AgentId>,
    /// The agent's transcript in generation order. Empty after eviction.
    pub transcript: Vec<TranscriptEntry>,
}

/// The reconstructed agent tree: an arena of [`AgentNode`]s plus the root.
#[derive(Debug)]
pub struct AgentTree {
    arena: HashMap<AgentId, AgentNode>,
    root: AgentId,
}

impl AgentTree {
    /// Replays the full event stream into an agent tree with transcripts
    /// populated.
    ///
    /// The first pass accumulates per-agent transcripts and creation records;
    /// the second materializes the arena, resolving every parent link. Fails
    /// with [`Error::MalformedLog`] if a non-root creation cause is
    /// unresolvable, the parent map contains a cycle, or the log does not
    /// have exactly one root — all unrecoverable corruption.
    pub fn load_tree(events: &[Event]) -> Result<Self> {
        // Pass 1: transcripts, creation order, and the entry->agent map that
        // creation causes resolve through.
        let mut transcripts: HashMap<AgentId, Vec<TranscriptEntry>> = HashMap::new();
        let mut entry_agent: HashMap<MessageId, AgentId> = HashMap::new();
        let mut creations = Vec::new();
        for event in events {
            match event {
                Event::AgentCreated(created) => creations.push(created),
                Event::TranscriptEntry(entry) => {
                    entry_agent.insert(entry.message_id, entry.agent);
                    transcripts.entry(entry.agent).or_default().push(entry.clone());
                }
                Event::Fragment(_) => {}
            }
        }

        // Pass 2: resolve parents, validate, and materialize bottom-up so
        // every node's child list is complete before the tree is returned.
        let mut parents: HashMap<AgentId, Option<AgentId>> = HashMap::new();
        let mut root = None;
        for created in &creations {
            let parent = match &created.cause {
                Some(cause) => match entry_agent.get(&cause.message_id) {
                    Some(parent) => Some(*parent),
                    None => {
                        return Err(Error::MalformedLog(format!(
                            "creation cause {cause} for {} does not resolve",
                            created.agent
                        )));
                    }
                },
                None => {
                    if root.replace(created.agent).is_some() {
                        return Err(Error::MalformedLog(
                            "log contains more than one root agent".into(),
                        ));
                    }
                    None
                }
            };
            if parents.insert(created.agent, parent).is_some() {
                return Err(Error::MalformedLog(format!("{} created twice", created.agent)));
            }
        }
        let Some(root) = root else {
            return Err(Error::MalformedLog("log contains no root agent".into()));
        };

        for (agent, _) in &parents {
            Self::check_acyclic(&parents, *agent)?;
        }
        for (id, _) in &transcripts {
            if !parents.contains_key(id) {
                return Err(Error::MalformedLog(format!(
                    "transcript entries for {id} with no creation record"
                )));
            }
        }

        let mut arena: HashMap<AgentId, AgentNode> = creations
            .iter()
            .map(|created| {
                (
                    created.agent,
                    AgentNode {
                        id: created.agent,
                        name: created.name.clone(),
                        model: created.model.clone(),
                        parent: parents[&created.agent],
                        children: Vec::new(),
                        transcript: transcripts.remove(&created.agent).unwrap_or_default(),
                    },
                )
            })
            .collect();
        for created in &creations {
            if let Some(parent) = parents[&created.agent] {
                if let Some(node) = arena.get_mut(&parent) {
                    node.children.push(created.agent);
                }
            }
        }

        Ok(Self { arena, root })
    }

    fn check_acyclic(parents: &HashMap<AgentId, Option<AgentId>>, start: AgentId) -> Result<()> {
        let mut current = start;
        for _ in 0..=parents.len() {
            match parents.get(&current) {
                Some(Some(parent)) => current = *parent,
                Some(None) => return Ok(()),
                None => {
                    return Err(Error::MalformedLog(format!(
                        "parent of {current} has no creation record"
                    )));
                }
            }
        }
        Err(Error::MalformedLog(format!(
            "parent chain of {start} contains a cycle"
        )))
    }

    /// The root agent.
    pub fn root(&self) -> &AgentNode {
        &self.arena[&self.root]
    }

    /// The root agent's id.
    pub fn root_id(&self) -> AgentId {
        self.root
    }

    pub fn get(&self, agent: AgentId) -> Option<&AgentNode> {
        self.arena.get(&agent)
    }

    /// Number of agents in the tree.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// `agent` and every descendant, in breadth-first order.
    pub fn subtree(&self, agent: AgentId) -> Vec<AgentId> {
        let mut members = Vec::new();
        let mut queue = VecDeque::from([agent]);
        while let Some(next) = queue.pop_front() {
            if let Some(node) = self.arena.get(&next) {
                members.push(next);
                queue.extend(&node.children);
            }
        }
        members
    }

    /// Drops the transcripts of `agent`'s subtree from memory. Structure and
    /// metadata stay; [`AgentTree::revive`] rebuilds the transcripts.
    pub fn evict(&mut self, agent: AgentId) {
        for member in self.subtree(agent) {
            if let Some(node) = self.arena.get_mut(&member) {
                node.transcript.clear();
            }
        }
    }

    /// Revivifies an evicted subtree by replaying only its slice of the log.
    pub fn revive(&mut self, agent: AgentId, events: &[Event]) {
        let members = self.subtree(agent);
        for member in &members {
            if let Some(node) = self.arena.get_mut(member) {
                node.transcript.clear();
            }
        }
        for event in events {
            if let Event::TranscriptEntry(entry) = event {
                if members.contains(&entry.agent) {
                    if let Some(node) = self.arena.get_mut(&entry.agent) {
                        node.transcript.push(entry.clone());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_proto::{AgentCreated, CauseRef, NewEntry, Role};

    fn entry(id: u64, agent: u64, content: &str) -> Event {
        Event::TranscriptEntry(TranscriptEntry {
            message_id: MessageId(id),
            agent: AgentId(agent),
            role: Role::User,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: None,
            tool_call: None,
            name: None,
            substance: None,
            cause: vec![],
        })
    }

    fn created(id: u64, agent: u64, cause: Option<u64>, name: &str) -> Event {
        Event::AgentCreated(AgentCreated {
            message_id: MessageId(id),
            agent: AgentId(agent),
            cause: cause.map(|c| CauseRef::new(MessageId(c))),
            name: Some(name.into()),
            model: "m".into(),
        })
    }

    fn two_level_log() -> Vec<Event> {
        vec![
            created(0, 0, None, "primary"),
            entry(1, 0, "spawn helper"),
            created(2, 1, Some(1), "helper"),
            entry(3, 1, "go"),
            entry(4, 1, "done"),
            entry(5, 0, "received"),
        ]
    }

    #[test]
    fn load_tree_populates_transcripts_and_children() {
        let tree = AgentTree::load_tree(&two_level_log()).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.root().name.as_deref(), Some("primary"));
        assert_eq!(tree.root().children, vec![AgentId(1)]);

        let helper = tree.get(AgentId(1)).unwrap();
        assert_eq!(helper.parent, Some(AgentId(0)));
        assert_eq!(helper.transcript.len(), 2);
        assert_eq!(helper.transcript[0].content, "go");
        assert_eq!(tree.root().transcript.len(), 2);
    }

    #[test]
    fn unresolvable_creation_cause_is_fatal() {
        let events = vec![created(0, 0, None, "primary"), created(1, 1, Some(99), "orphan")];
        let err = AgentTree::load_tree(&events).unwrap_err();
        assert!(matches!(err, Error::MalformedLog(_)));
    }

    #[test]
    fn missing_root_is_fatal() {
        let events = vec![entry(0, 0, "hello")];
        assert!(AgentTree::load_tree(&events).is_err());
    }

    #[test]
    fn parent_cycle_is_fatal() {
        // Two agents each claiming the other's entry as creation cause.
        let events = vec![
            created(0, 9, None, "root"),
            entry(1, 2, "a"),
            entry(2, 1, "b"),
            created(3, 1, Some(1), "one"),
            created(4, 2, Some(2), "two"),
        ];
        let err = AgentTree::load_tree(&events).unwrap_err();
        assert!(matches!(err, Error::MalformedLog(_)));
    }

    #[test]
    fn subtree_walks_level_by_level() {
        // root 0 spawns 1 then 2; 1 spawns 3. Siblings must come before
        // the grandchild.
        let events = vec![
            created(0, 0, None, "root"),
            entry(1, 0, "spawn a"),
            created(2, 1, Some(1), "a"),
            entry(3, 0, "spawn b"),
            created(4, 2, Some(3), "b"),
            entry(5, 1, "spawn c"),
            created(6, 3, Some(5), "c"),
        ];
        let tree = AgentTree::load_tree(&events).unwrap();
        assert_eq!(
            tree.subtree(AgentId(0)),
            vec![AgentId(0), AgentId(1), AgentId(2), AgentId(3)]
        );
        assert_eq!(tree.subtree(AgentId(1)), vec![AgentId(1), AgentId(3)]);
    }

    #[test]
    fn evict_and_revive_rebuild_only_the_subtree() {
        let events = two_level_log();
        let mut tree = AgentTree::load_tree(&events).unwrap();

        tree.evict(AgentId(1));
        assert!(tree.get(AgentId(1)).unwrap().transcript.is_empty());
        assert_eq!(tree.root().transcript.len(), 2);

        tree.revive(AgentId(1), &events);
        let helper = tree.get(AgentId(1)).unwrap();
        assert_eq!(helper.transcript.len(), 2);
        assert_eq!(helper.transcript[1].content, "done");
    }

    #[test]
    fn roundtrips_through_the_store() {
        use crate::session::Session;
        let buffer = Vec::new();
        let session = Session::from_writer(buffer);
        let root = session.allocate_agent().unwrap();
        session
            .record_agent_created(root, None, Some("primary"), "m")
            .unwrap();
        session
            .record_transcript_entry(root, NewEntry::input_text("hello"))
            .unwrap();

        // Parse what the store wrote and reconstruct from it.
        let output = session.into_written().unwrap();
        let events: Vec<Event> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| {
                serde_json::from_str::<colloquy_proto::Record>(l)
                    .unwrap()
                    .event
            })
            .collect();
        let tree = AgentTree::load_tree(&events).unwrap();
        assert_eq!(tree.root_id(), root);
        assert_eq!(tree.root().transcript.len(), 1);
    }
}
