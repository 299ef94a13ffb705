//! The three event variants that make up a session log.
//!
//! Every line of a log is one [`Record`]: a timestamp envelope around an
//! [`Event`], internally tagged by `event_type`. Events are immutable once
//! appended; all session state is a replay of them.
//!
//! Two link fields carry causal structure:
//! - `substance`: this record reproduces (possibly reformatted) the content
//!   of an earlier record. Following `substance` pointers always ends at the
//!   canonical original.
//! - `cause`: this record was produced *from* one or more earlier records,
//!   without being the same content.
//!
//! A record never carries both.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::id::{cause_list, AgentId, CauseRef, MessageId};
use crate::tracked::{Provenance, Tracked};

/// Transcript roles, matching what the language-model API sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One tool invocation requested by an assistant entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// A new agent joined the session.
///
/// `cause` points at the tool invocation that spawned the agent and is absent
/// only for the root. The parent relationship is derived by resolving
/// `cause`, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCreated {
    pub message_id: MessageId,
    pub agent: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<CauseRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub model: String,
}

/// One addition to an agent's transcript, in generation order for that agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub message_id: MessageId,
    pub agent: AgentId,
    pub role: Role,
    pub content: String,
    /// Tool invocations requested by an assistant entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// On tool-result entries: the id of the call this entry answers, from
    /// `tool_calls[].id` on an earlier entry of the same agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// On tool-result entries: the message id of the entry that carried the
    /// call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<MessageId>,
    /// Tool name on tool entries, speaker name on relayed input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substance: Option<MessageId>,
    #[serde(
        with = "cause_list",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub cause: Vec<CauseRef>,
}

impl TranscriptEntry {
    /// Whether this entry belongs in the human view: inputs (`user` role) and
    /// utterances (`assistant` content with no accompanying tool call).
    /// Tool traffic and system prompts are excluded by design.
    pub fn is_visible(&self) -> bool {
        match self.role {
            Role::User => true,
            Role::Assistant => self.tool_calls.is_empty(),
            Role::System | Role::Tool => false,
        }
    }
}

/// Generated text that is not stored in any agent's own transcript.
///
/// Used when identical text will be delivered to several recipients via
/// `substance`, so the content is stored once. `cause` is the tool invocation
/// (or invocations) that generated the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub message_id: MessageId,
    pub agent: AgentId,
    pub content: String,
    #[serde(with = "cause_list")]
    pub cause: Vec<CauseRef>,
}

/// A session log event.
///
/// Internally tagged: the `event_type` field on the wire selects the variant.
/// Readers ignore unknown fields for forward compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Event {
    AgentCreated(AgentCreated),
    TranscriptEntry(TranscriptEntry),
    Fragment(Fragment),
}

impl Event {
    /// The event's id in the shared message-id namespace.
    pub fn message_id(&self) -> MessageId {
        match self {
            Event::AgentCreated(e) => e.message_id,
            Event::TranscriptEntry(e) => e.message_id,
            Event::Fragment(e) => e.message_id,
        }
    }

    /// The agent the event belongs to (creator, for fragments).
    pub fn agent(&self) -> AgentId {
        match self {
            Event::AgentCreated(e) => e.agent,
            Event::TranscriptEntry(e) => e.agent,
            Event::Fragment(e) => e.agent,
        }
    }

    /// The `substance` link, if any.
    pub fn substance(&self) -> Option<MessageId> {
        match self {
            Event::TranscriptEntry(e) => e.substance,
            Event::AgentCreated(_) | Event::Fragment(_) => None,
        }
    }

    /// Message ids of every `cause` pointer on this event.
    pub fn cause_ids(&self) -> Vec<MessageId> {
        match self {
            Event::AgentCreated(e) => e.cause.iter().map(|c| c.message_id).collect(),
            Event::TranscriptEntry(e) => e.cause.iter().map(|c| c.message_id).collect(),
            Event::Fragment(e) => e.cause.iter().map(|c| c.message_id).collect(),
        }
    }

    /// The transcript entry, if this event is one.
    pub fn as_transcript_entry(&self) -> Option<&TranscriptEntry> {
        match self {
            Event::TranscriptEntry(e) => Some(e),
            _ => None,
        }
    }
}

/// The line envelope written to the log: a timestamp plus the event fields,
/// flattened into one JSON object.
///
/// `ts` is unix milliseconds at append time and is informational only;
/// ordering is always append order. It defaults to 0 so logs written without
/// it still parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub ts: u64,
    #[serde(flatten)]
    pub event: Event,
}

impl Record {
    /// Wraps an event with the current timestamp.
    pub fn new(event: Event) -> Self {
        let ts = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        Self { ts, event }
    }
}

/// A draft transcript entry, before the store assigns its message id.
///
/// Everything a [`TranscriptEntry`] has except `message_id` and `agent`,
/// which the store fills in.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub role: Role,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
    pub tool_call: Option<MessageId>,
    pub name: Option<String>,
    pub substance: Option<MessageId>,
    pub cause: Vec<CauseRef>,
}

impl NewEntry {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_call: None,
            name: None,
            substance: None,
            cause: Vec::new(),
        }
    }

    /// An input delivered to an agent, with provenance carried over from the
    /// tracked value.
    pub fn input(content: &Tracked) -> Self {
        let mut entry = Self::with_role(Role::User, content.text.clone());
        match &content.provenance {
            Provenance::Fresh => {}
            Provenance::SameAs(id) => entry.substance = Some(*id),
            Provenance::ComposedFrom(causes) => entry.cause = causes.clone(),
        }
        entry
    }

    /// A plain, untracked input.
    pub fn input_text(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// A system prompt.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// An assistant utterance: textual content with no accompanying action.
    pub fn utterance(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// An assistant entry requesting tool invocations.
    pub fn tool_request(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, content)
        }
    }

    /// A tool-result entry answering `tool_call_id` on the entry `tool_call`.
    pub fn tool_result(
        tool_call: MessageId,
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: &Tracked,
    ) -> Self {
        let mut entry = Self::with_role(Role::Tool, content.text.clone());
        entry.tool_call = Some(tool_call);
        entry.tool_call_id = Some(tool_call_id.into());
        entry.name = Some(name.into());
        match &content.provenance {
            Provenance::Fresh => {}
            Provenance::SameAs(id) => entry.substance = Some(*id),
            Provenance::ComposedFrom(causes) => entry.cause = causes.clone(),
        }
        entry
    }

    /// Marks the entry as a view of existing content.
    pub fn with_substance(mut self, substance: MessageId) -> Self {
        self.substance = Some(substance);
        self
    }

    /// Records what this entry was composed from.
    pub fn with_cause(mut self, cause: Vec<CauseRef>) -> Self {
        self.cause = cause;
        self
    }

    /// Sets the speaker or tool name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_created_roundtrip() {
        let event = Event::AgentCreated(AgentCreated {
            message_id: MessageId(3),
            agent: AgentId(1),
            cause: Some(CauseRef::tool_call(MessageId(2), "call_1")),
            name: Some("researcher".into()),
            model: "test-model".into(),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event_type":"agent_created""#));
        assert!(json.contains(r#""cause":"2.call_1""#));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn transcript_entry_omits_empty_fields() {
        let event = Event::TranscriptEntry(TranscriptEntry {
            message_id: MessageId(5),
            agent: AgentId(0),
            role: Role::Assistant,
            content: "Hello".into(),
            tool_calls: vec![],
            tool_call_id: None,
            tool_call: None,
            name: None,
            substance: None,
            cause: vec![],
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("substance"));
        assert!(!json.contains("cause"));
    }

    #[test]
    fn single_cause_collapses_to_string() {
        let frag = Event::Fragment(Fragment {
            message_id: MessageId(9),
            agent: AgentId(0),
            content: "prompt".into(),
            cause: vec![CauseRef::new(MessageId(8))],
        });
        let json = serde_json::to_string(&frag).unwrap();
        assert!(json.contains(r#""cause":"8""#));

        let multi = Event::Fragment(Fragment {
            message_id: MessageId(9),
            agent: AgentId(0),
            content: "prompt".into(),
            cause: vec![CauseRef::new(MessageId(7)), CauseRef::new(MessageId(8))],
        });
        let json = serde_json::to_string(&multi).unwrap();
        assert!(json.contains(r#""cause":["7","8"]"#));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, multi);
    }

    #[test]
    fn readers_ignore_unknown_fields() {
        let line = r#"{"ts":1000,"event_type":"transcript_entry","message_id":4,"agent":0,"role":"user","content":"hi","future_field":{"x":1}}"#;
        let record: Record = serde_json::from_str(line).unwrap();
        assert_eq!(record.event.message_id(), MessageId(4));
    }

    #[test]
    fn record_defaults_missing_ts() {
        let line = r#"{"event_type":"fragment","message_id":2,"agent":0,"content":"x","cause":"1"}"#;
        let record: Record = serde_json::from_str(line).unwrap();
        assert_eq!(record.ts, 0);
        assert_eq!(record.event.cause_ids(), vec![MessageId(1)]);
    }

    #[test]
    fn visibility_rules() {
        let mut entry = TranscriptEntry {
            message_id: MessageId(0),
            agent: AgentId(0),
            role: Role::User,
            content: "hi".into(),
            tool_calls: vec![],
            tool_call_id: None,
            tool_call: None,
            name: None,
            substance: None,
            cause: vec![],
        };
        assert!(entry.is_visible());

        entry.role = Role::Assistant;
        assert!(entry.is_visible());
        entry.tool_calls = vec![ToolCall {
            id: "call_1".into(),
            name: "Task".into(),
            arguments: serde_json::Value::Null,
        }];
        assert!(!entry.is_visible());

        entry.tool_calls = vec![];
        entry.role = Role::System;
        assert!(!entry.is_visible());
        entry.role = Role::Tool;
        assert!(!entry.is_visible());
    }

    #[test]
    fn input_entry_carries_provenance() {
        let tracked = Tracked::same_as(MessageId(5), "[jack]: hello");
        let entry = NewEntry::input(&tracked);
        assert_eq!(entry.substance, Some(MessageId(5)));
        assert!(entry.cause.is_empty());

        let composed = Tracked::composed_from(
            vec![CauseRef::new(MessageId(3)), CauseRef::new(MessageId(4))],
            "summary of both",
        );
        let entry = NewEntry::input(&composed);
        assert_eq!(entry.substance, None);
        assert_eq!(entry.cause.len(), 2);
    }
}
