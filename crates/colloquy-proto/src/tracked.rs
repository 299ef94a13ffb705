//! Text values that carry their content provenance.
//!
//! Delivery paths pass a [`Tracked`] instead of a bare string, so "is this
//! the same utterance the log already has?" is visible in signatures rather
//! than inferred later. A recipient turns it into a transcript entry whose
//! `substance` or `cause` field matches the provenance.

use crate::id::{CauseRef, MessageId};

/// Where a piece of text came from, relative to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Novel text; the receiving entry becomes the canonical original.
    Fresh,
    /// Substantially the same content as an already-logged record, possibly
    /// reformatted.
    SameAs(MessageId),
    /// Composed out of one or more logged records without reproducing any of
    /// them.
    ComposedFrom(Vec<CauseRef>),
}

/// A string plus its [`Provenance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracked {
    pub text: String,
    pub provenance: Provenance,
}

impl Tracked {
    /// Novel text with no logged ancestor.
    pub fn fresh(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            provenance: Provenance::Fresh,
        }
    }

    /// Text reproducing the content of the record `id`.
    pub fn same_as(id: MessageId, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            provenance: Provenance::SameAs(id),
        }
    }

    /// Text composed from the given records.
    pub fn composed_from(cause: Vec<CauseRef>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            provenance: Provenance::ComposedFrom(cause),
        }
    }

    /// Reformats the text while keeping its provenance, e.g. prefixing a
    /// relayed utterance with the speaker's name.
    pub fn relabel(self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            provenance: self.provenance,
        }
    }
}

impl From<&str> for Tracked {
    fn from(s: &str) -> Self {
        Self::fresh(s)
    }
}

impl From<String> for Tracked {
    fn from(s: String) -> Self {
        Self::fresh(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relabel_keeps_provenance() {
        let original = Tracked::same_as(MessageId(5), "hello");
        let relayed = original.relabel("[jack]: hello");
        assert_eq!(relayed.text, "[jack]: hello");
        assert_eq!(relayed.provenance, Provenance::SameAs(MessageId(5)));
    }

    #[test]
    fn plain_strings_are_fresh() {
        let t: Tracked = "hi".into();
        assert_eq!(t.provenance, Provenance::Fresh);
    }
}
