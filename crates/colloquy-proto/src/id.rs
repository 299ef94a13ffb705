//! Message, agent, and cause identifiers.
//!
//! Message ids and agent ids are two independent counter namespaces. Both are
//! issued only by the store's allocator and serialize as plain JSON numbers.
//! Message id order reflects append order, never causal order: causality is
//! carried explicitly by [`CauseRef`] pointers and `substance` links.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of one logged event. Unique across all event variants of a
/// session, strictly increasing in append order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// Identifier of one agent. Issued once per agent, never reused within a
/// session, even across suspend/resume.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct AgentId(pub u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent{}", self.0)
    }
}

impl From<u64> for AgentId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// A causal pointer to an earlier record, optionally narrowed to one tool
/// call within it.
///
/// Serializes as the compact string `"12"` or `"12.call_abc"`. The
/// `tool_call_id` part names an entry of `tool_calls[].id` on the referenced
/// transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CauseRef {
    pub message_id: MessageId,
    pub tool_call_id: Option<String>,
}

impl CauseRef {
    /// A pointer to a whole record.
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            tool_call_id: None,
        }
    }

    /// A pointer to one tool call within a record.
    pub fn tool_call(message_id: MessageId, tool_call_id: impl Into<String>) -> Self {
        Self {
            message_id,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

impl From<MessageId> for CauseRef {
    fn from(id: MessageId) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for CauseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tool_call_id {
            Some(tc) => write!(f, "{}.{}", self.message_id, tc),
            None => write!(f, "{}", self.message_id),
        }
    }
}

/// Error parsing the compact cause-pointer form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCauseRefError(String);

impl fmt::Display for ParseCauseRefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cause reference: {:?}", self.0)
    }
}

impl std::error::Error for ParseCauseRefError {}

impl FromStr for CauseRef {
    type Err = ParseCauseRefError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (num, tool_call_id) = match s.split_once('.') {
            Some((num, tc)) if !tc.is_empty() => (num, Some(tc.to_string())),
            Some(_) => return Err(ParseCauseRefError(s.to_string())),
            None => (s, None),
        };
        let message_id = num
            .parse::<u64>()
            .map_err(|_| ParseCauseRefError(s.to_string()))?;
        Ok(Self {
            message_id: MessageId(message_id),
            tool_call_id,
        })
    }
}

impl Serialize for CauseRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CauseRef {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `cause` fields: a single-element list collapses to a
/// bare string on the wire, and readers accept either shape.
///
/// Use as `#[serde(with = "cause_list", default, skip_serializing_if =
/// "Vec::is_empty")]`.
pub(crate) mod cause_list {
    use super::CauseRef;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        causes: &[CauseRef],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        if causes.len() == 1 {
            causes[0].serialize(serializer)
        } else {
            causes.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<CauseRef>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(CauseRef),
            Many(Vec<CauseRef>),
        }

        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(c) => vec![c],
            OneOrMany::Many(cs) => cs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_ref_compact_form_roundtrip() {
        let plain = CauseRef::new(MessageId(12));
        assert_eq!(plain.to_string(), "12");
        assert_eq!("12".parse::<CauseRef>().unwrap(), plain);

        let narrowed = CauseRef::tool_call(MessageId(12), "call_abc");
        assert_eq!(narrowed.to_string(), "12.call_abc");
        assert_eq!("12.call_abc".parse::<CauseRef>().unwrap(), narrowed);
    }

    #[test]
    fn cause_ref_rejects_garbage() {
        assert!("".parse::<CauseRef>().is_err());
        assert!("abc".parse::<CauseRef>().is_err());
        assert!("12.".parse::<CauseRef>().is_err());
        assert!("-3".parse::<CauseRef>().is_err());
    }

    #[test]
    fn cause_ref_json_is_a_string() {
        let c = CauseRef::tool_call(MessageId(5), "call_x");
        assert_eq!(serde_json::to_string(&c).unwrap(), r#""5.call_x""#);
        let back: CauseRef = serde_json::from_str(r#""5.call_x""#).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn ids_serialize_as_numbers() {
        assert_eq!(serde_json::to_string(&MessageId(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&AgentId(3)).unwrap(), "3");
        let id: MessageId = serde_json::from_str("7").unwrap();
        assert_eq!(id, MessageId(7));
    }
}
