//! The session store: the single writer of a session log.
//!
//! A [`Session`] owns the identifier allocator, the agent registry, and the
//! only append handle, all behind one mutex. Agents may be suspended
//! concurrently awaiting model calls, but every `record_*` call fully appends
//! (and flushes) before returning, so records never interleave.
//!
//! An id is committed only after its record has been appended: the store
//! builds and writes the record against the allocator's next id, and advances
//! the counter last. A failed append therefore never leaves a dangling id.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use colloquy_proto::{
    AgentCreated, AgentId, CauseRef, Error, Event, Fragment, MessageId, NewEntry, Record, Result,
    Tracked, TranscriptEntry,
};
use tracing::{debug, warn};

use crate::allocator::IdAllocator;

/// Lightweight registry entry: everything `Session::load` knows about an
/// agent without materializing its transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentMeta {
    pub parent: Option<AgentId>,
    pub name: Option<String>,
    pub model: String,
}

struct Inner<W> {
    writer: W,
    allocator: IdAllocator,
    registry: HashMap<AgentId, AgentMeta>,
    /// Agent ids handed out by `allocate_agent` that have no creation record
    /// yet.
    issued: HashSet<AgentId>,
    /// Maps transcript-entry ids to their agent, for resolving the parent of
    /// later `agent_created` events.
    entry_agent: HashMap<MessageId, AgentId>,
    root: Option<AgentId>,
    skipped_lines: u64,
}

/// Representation of multi-agent session state, backed by an append-only
/// event log.
///
/// Generic over the output so tests can record into a buffer; on disk it is
/// `Session<File>`.
pub struct Session<W = File> {
    inner: Mutex<Inner<W>>,
}

impl<W: Write> Session<W> {
    /// A fresh in-memory session writing to the given output.
    pub fn from_writer(writer: W) -> Self {
        Self {
            inner: Mutex::new(Inner {
                writer,
                allocator: IdAllocator::new(),
                registry: HashMap::new(),
                issued: HashSet::new(),
                entry_agent: HashMap::new(),
                root: None,
                skipped_lines: 0,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner<W>>> {
        self.inner
            .lock()
            .map_err(|_| Error::Io(io::Error::other("session writer lock poisoned")))
    }

    /// Issues a fresh agent id. No event is emitted; the caller must follow
    /// up with [`Session::record_agent_created`] before recording transcript
    /// entries for it.
    pub fn allocate_agent(&self) -> Result<AgentId> {
        let mut inner = self.lock()?;
        let id = inner.allocator.next_agent_id();
        inner.issued.insert(id);
        Ok(id)
    }

    /// Records an agent's creation. `cause` points at the tool invocation
    /// that spawned it and may be omitted only for the first (root) agent.
    pub fn record_agent_created(
        &self,
        agent: AgentId,
        cause: Option<CauseRef>,
        name: Option<&str>,
        model: &str,
    ) -> Result<MessageId> {
        let mut inner = self.lock()?;
        if !inner.issued.contains(&agent) {
            return Err(Error::AllocationViolation(format!(
                "{agent} was never issued by this session's allocator"
            )));
        }
        if inner.registry.contains_key(&agent) {
            return Err(Error::AllocationViolation(format!(
                "{agent} already has a creation record"
            )));
        }
        let parent = match &cause {
            Some(c) => match inner.entry_agent.get(&c.message_id) {
                Some(parent) => Some(*parent),
                None => {
                    return Err(Error::MalformedLog(format!(
                        "agent_created cause {c} does not resolve to a transcript entry"
                    )));
                }
            },
            None => {
                if inner.root.is_some() {
                    return Err(Error::MalformedLog(
                        "only the root agent may be created without a cause".into(),
                    ));
                }
                None
            }
        };

        let message_id = inner.allocator.peek_message_id();
        let event = Event::AgentCreated(AgentCreated {
            message_id,
            agent,
            cause,
            name: name.map(str::to_string),
            model: model.to_string(),
        });
        Self::append(&mut inner, event)?;

        inner.registry.insert(
            agent,
            AgentMeta {
                parent,
                name: name.map(str::to_string),
                model: model.to_string(),
            },
        );
        inner.issued.remove(&agent);
        if parent.is_none() {
            inner.root = Some(agent);
        }
        Ok(message_id)
    }

    /// Records one addition to `agent`'s transcript.
    pub fn record_transcript_entry(&self, agent: AgentId, entry: NewEntry) -> Result<MessageId> {
        let mut inner = self.lock()?;
        Self::check_known(&inner, agent)?;
        if entry.substance.is_some() && !entry.cause.is_empty() {
            return Err(Error::MalformedLog(
                "a transcript entry is either original or a view of existing \
                 content; substance and cause cannot both be set"
                    .into(),
            ));
        }

        let message_id = inner.allocator.peek_message_id();
        let event = Event::TranscriptEntry(TranscriptEntry {
            message_id,
            agent,
            role: entry.role,
            content: entry.content,
            tool_calls: entry.tool_calls,
            tool_call_id: entry.tool_call_id,
            tool_call: entry.tool_call,
            name: entry.name,
            substance: entry.substance,
            cause: entry.cause,
        });
        Self::append(&mut inner, event)?;
        inner.entry_agent.insert(message_id, agent);
        Ok(message_id)
    }

    /// Records generated text that belongs to no transcript, for delivery to
    /// multiple recipients via `substance`.
    pub fn record_fragment(
        &self,
        agent: AgentId,
        content: &str,
        cause: Vec<CauseRef>,
    ) -> Result<MessageId> {
        let mut inner = self.lock()?;
        Self::check_known(&inner, agent)?;
        if cause.is_empty() {
            return Err(Error::MalformedLog(
                "a fragment requires at least one cause".into(),
            ));
        }

        let message_id = inner.allocator.peek_message_id();
        let event = Event::Fragment(Fragment {
            message_id,
            agent,
            content: content.to_string(),
            cause,
        });
        Self::append(&mut inner, event)?;
        Ok(message_id)
    }

    /// [`Session::record_fragment`], returning the content as a [`Tracked`]
    /// value ready to deliver to recipients.
    pub fn fragment_tracked(
        &self,
        agent: AgentId,
        content: &str,
        cause: Vec<CauseRef>,
    ) -> Result<Tracked> {
        let id = self.record_fragment(agent, content, cause)?;
        Ok(Tracked::same_as(id, content))
    }

    /// The registry of known agents.
    pub fn registry(&self) -> Result<HashMap<AgentId, AgentMeta>> {
        Ok(self.lock()?.registry.clone())
    }

    /// The root agent, once one has been created.
    pub fn root(&self) -> Result<Option<AgentId>> {
        Ok(self.lock()?.root)
    }

    /// Number of unparsable lines skipped while loading.
    pub fn skipped_lines(&self) -> Result<u64> {
        Ok(self.lock()?.skipped_lines)
    }

    /// Consumes the session and hands back everything written so far.
    #[cfg(test)]
    pub(crate) fn into_written(self) -> Result<W> {
        self.inner
            .into_inner()
            .map(|inner| inner.writer)
            .map_err(|_| Error::Io(io::Error::other("session writer lock poisoned")))
    }

    fn check_known(inner: &Inner<W>, agent: AgentId) -> Result<()> {
        if inner.registry.contains_key(&agent) {
            return Ok(());
        }
        if inner.issued.contains(&agent) {
            return Err(Error::MalformedLog(format!(
                "{agent} has no creation record yet; record_agent_created must come first"
            )));
        }
        Err(Error::AllocationViolation(format!(
            "{agent} was never issued by this session's allocator"
        )))
    }

    /// Appends the record built against the allocator's next message id, then
    /// commits that id. Flushes before returning so the record is durable
    /// when the caller resumes.
    fn append(inner: &mut Inner<W>, event: Event) -> Result<MessageId> {
        let id = event.message_id();
        let json = serde_json::to_string(&Record::new(event))?;
        writeln!(inner.writer, "{json}")?;
        inner.writer.flush()?;
        let issued = inner.allocator.next_message_id();
        debug_assert_eq!(issued, id);
        Ok(id)
    }
}

impl Session<File> {
    /// Starts a new session logging to `path`. Fails if the file exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)?;
        Ok(Self::from_writer(file))
    }

    /// Resumes a session from an existing log.
    ///
    /// A single pass restores both id counters and the agent registry without
    /// materializing transcripts, then reopens the file for appending.
    /// Unparsable lines are skipped and counted; duplicate message ids and
    /// unresolvable parent links are fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);

        let mut allocator = IdAllocator::new();
        let mut registry: HashMap<AgentId, AgentMeta> = HashMap::new();
        let mut entry_agent: HashMap<MessageId, AgentId> = HashMap::new();
        let mut seen_ids: HashSet<MessageId> = HashSet::new();
        let mut root = None;
        let mut skipped_lines = 0u64;
        let mut line_number = 0u64;

        for line in reader.lines() {
            let line = line?;
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, line_number, "skipping unparsable log line");
                    skipped_lines += 1;
                    continue;
                }
            };
            let event = record.event;
            if !seen_ids.insert(event.message_id()) {
                return Err(Error::AllocationViolation(format!(
                    "duplicate message id {} at line {line_number}",
                    event.message_id()
                )));
            }
            allocator.observe(&event);
            match event {
                Event::AgentCreated(created) => {
                    if registry.contains_key(&created.agent) {
                        return Err(Error::AllocationViolation(format!(
                            "{} created twice",
                            created.agent
                        )));
                    }
                    let parent = match &created.cause {
                        Some(c) => match entry_agent.get(&c.message_id) {
                            Some(parent) => Some(*parent),
                            None => {
                                return Err(Error::MalformedLog(format!(
                                    "agent_created cause {c} does not resolve \
                                     to a transcript entry"
                                )));
                            }
                        },
                        None => {
                            if root.is_some() {
                                return Err(Error::MalformedLog(
                                    "log contains more than one root agent".into(),
                                ));
                            }
                            root = Some(created.agent);
                            None
                        }
                    };
                    registry.insert(
                        created.agent,
                        AgentMeta {
                            parent,
                            name: created.name,
                            model: created.model,
                        },
                    );
                }
                Event::TranscriptEntry(entry) => {
                    entry_agent.insert(entry.message_id, entry.agent);
                }
                Event::Fragment(_) => {}
            }
        }

        debug!(
            agents = registry.len(),
            skipped_lines, "restored session registry"
        );

        // A crash mid-append can leave a torn final line with no newline.
        // The pass above already skipped it as unparsable; terminate it here
        // so the first post-resume record starts on its own line instead of
        // merging into the torn bytes.
        let mut file = OpenOptions::new().append(true).open(path)?;
        if !ends_with_newline(path)? {
            warn!("log does not end with a newline; terminating the torn tail");
            file.write_all(b"\n")?;
            file.flush()?;
        }
        Ok(Self {
            inner: Mutex::new(Inner {
                writer: file,
                allocator,
                registry,
                issued: HashSet::new(),
                entry_agent,
                root,
                skipped_lines,
            }),
        })
    }
}

fn ends_with_newline(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte)?;
    Ok(byte[0] == b'\n')
}
