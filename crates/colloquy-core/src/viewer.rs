//! Viewer reconstruction: side-by-side panels aligned by content identity.
//!
//! A panel is a set of agents rendered as one column. The engine selects the
//! human-visible slice of each panel's transcripts, collapses records that are
//! views of the same content, and aligns panels into rows keyed by canonical
//! id, so the same utterance delivered to several agents renders once per
//! panel on a shared row.
//!
//! [`align`] is the batch form over a complete event list. [`ViewerState`] is
//! the incremental form for live logs: events whose `substance` or `cause`
//! targets have not arrived yet are buffered and admitted once their
//! dependencies land, so a prefix of a log plus its suffix always converges to
//! the batch answer.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use colloquy_proto::{AgentId, Event, MessageId, Record, TranscriptEntry};
use tracing::warn;

use crate::resolver::EventIndex;

/// A set of agents rendered as one viewer column.
pub type Panel = BTreeSet<AgentId>;

/// One aligned cell: the entry a panel shows on a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub panel: usize,
    pub message_id: MessageId,
}

/// One viewer row: every panel's rendition of the same canonical content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub canonical: MessageId,
    pub cells: Vec<Cell>,
}

/// The human-visible transcript entries of a panel, in log order: inputs and
/// plain assistant utterances from any agent in the panel. Tool traffic and
/// system prompts are excluded.
pub fn visible_entries<'a>(events: &'a [Event], panel: &Panel) -> Vec<&'a TranscriptEntry> {
    events
        .iter()
        .filter_map(Event::as_transcript_entry)
        .filter(|entry| panel.contains(&entry.agent) && entry.is_visible())
        .collect()
}

/// Collapses entries that are views of the same content, keeping the earliest
/// member of each canonical class. Idempotent: the output dedupes to itself.
pub fn dedupe<'a>(
    index: &EventIndex<'_>,
    entries: &[&'a TranscriptEntry],
) -> Vec<&'a TranscriptEntry> {
    let mut seen: HashSet<MessageId> = HashSet::new();
    entries
        .iter()
        .filter(|entry| seen.insert(index.canonical_of(entry.message_id)))
        .copied()
        .collect()
}

/// Aligns the panels over a complete event list.
///
/// Rows appear in the log order of their first kept entry. A row holds at
/// most one cell per panel; a panel that never saw the content simply has no
/// cell on that row.
pub fn align(events: &[Event], panels: &[Panel]) -> Vec<Row> {
    let index = EventIndex::new(events);
    let kept: Vec<HashSet<MessageId>> = panels
        .iter()
        .map(|panel| {
            let entries = visible_entries(events, panel);
            dedupe(&index, &entries)
                .iter()
                .map(|entry| entry.message_id)
                .collect()
        })
        .collect();

    let mut rows: Vec<Row> = Vec::new();
    let mut row_of: HashMap<MessageId, usize> = HashMap::new();
    for event in events {
        let id = event.message_id();
        for (panel, ids) in kept.iter().enumerate() {
            if !ids.contains(&id) {
                continue;
            }
            let canonical = index.canonical_of(id);
            let row = *row_of.entry(canonical).or_insert_with(|| {
                rows.push(Row {
                    canonical,
                    cells: Vec::new(),
                });
                rows.len() - 1
            });
            rows[row].cells.push(Cell {
                panel,
                message_id: id,
            });
        }
    }
    rows
}

/// Incremental viewer over a live log.
///
/// Events are applied one at a time in arrival order. An event is admitted
/// only once every record its `substance` and `cause` fields point at has
/// been admitted; until then it waits in a buffer, and each admission drains
/// the buffer to a fixpoint. Canonical ids are maintained as a running map,
/// so admitting a view never needs a rescan.
pub struct ViewerState {
    panels: Vec<Panel>,
    events: Vec<Event>,
    ids: HashSet<MessageId>,
    /// Running canonical map: every admitted id to the root of its class.
    canon: HashMap<MessageId, MessageId>,
    rows: Vec<Row>,
    row_of: HashMap<MessageId, usize>,
    /// Per panel: canonical classes already placed, for earliest-wins dedupe.
    shown: Vec<HashSet<MessageId>>,
    pending: VecDeque<Event>,
    skipped: u64,
}

impl ViewerState {
    pub fn new(panels: Vec<Panel>) -> Self {
        let shown = panels.iter().map(|_| HashSet::new()).collect();
        Self {
            panels,
            events: Vec::new(),
            ids: HashSet::new(),
            canon: HashMap::new(),
            rows: Vec::new(),
            row_of: HashMap::new(),
            shown,
            pending: VecDeque::new(),
            skipped: 0,
        }
    }

    /// Applies one event, buffering it if its causal dependencies have not
    /// arrived yet.
    pub fn apply_incremental(&mut self, event: Event) {
        if !self.deps_ready(&event) {
            self.pending.push_back(event);
            return;
        }
        self.admit(event);
        self.drain_pending();
    }

    /// Parses and applies a chunk of log lines. Unparsable lines are skipped
    /// and counted, never fatal.
    pub fn apply_lines(&mut self, text: &str) {
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(line) {
                Ok(record) => self.apply_incremental(record.event),
                Err(e) => {
                    warn!(error = %e, "viewer skipping unparsable log line");
                    self.skipped += 1;
                }
            }
        }
    }

    /// The aligned rows built so far.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    /// Looks up an admitted event by id, for rendering cell content.
    pub fn event(&self, id: MessageId) -> Option<&Event> {
        self.events.iter().find(|event| event.message_id() == id)
    }

    /// Events still waiting on unseen dependencies.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Unparsable lines skipped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn deps_ready(&self, event: &Event) -> bool {
        if let Some(substance) = event.substance() {
            if !self.ids.contains(&substance) {
                return false;
            }
        }
        event.cause_ids().iter().all(|id| self.ids.contains(id))
    }

    fn admit(&mut self, event: Event) {
        let id = event.message_id();
        if !self.ids.insert(id) {
            warn!(%id, "viewer skipping duplicate message id");
            self.skipped += 1;
            return;
        }
        // The substance target is admitted (deps_ready), so its class root is
        // already in the map; one hop reaches the canonical id.
        let canonical = match event.substance() {
            Some(substance) => self.canon.get(&substance).copied().unwrap_or(substance),
            None => id,
        };
        self.canon.insert(id, canonical);

        if let Some(entry) = event.as_transcript_entry() {
            if entry.is_visible() {
                let targets: Vec<usize> = self
                    .panels
                    .iter()
                    .enumerate()
                    .filter(|(_, panel)| panel.contains(&entry.agent))
                    .map(|(i, _)| i)
                    .collect();
                for panel in targets {
                    if !self.shown[panel].insert(canonical) {
                        continue;
                    }
                    let row = *self.row_of.entry(canonical).or_insert_with(|| {
                        self.rows.push(Row {
                            canonical,
                            cells: Vec::new(),
                        });
                        self.rows.len() - 1
                    });
                    self.rows[row].cells.push(Cell {
                        panel,
                        message_id: id,
                    });
                }
            }
        }
        self.events.push(event);
    }

    fn drain_pending(&mut self) {
        loop {
            let mut progressed = false;
            let mut waiting = VecDeque::with_capacity(self.pending.len());
            while let Some(event) = self.pending.pop_front() {
                if self.deps_ready(&event) {
                    self.admit(event);
                    progressed = true;
                } else {
                    waiting.push_back(event);
                }
            }
            self.pending = waiting;
            if !progressed {
                return;
            }
        }
    }
}
