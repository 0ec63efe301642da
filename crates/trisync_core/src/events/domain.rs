//! Domain events emitted after every committed Doc mutation.
//!
//! Delivery is at-least-once: a subscriber may see the same state twice (for
//! example after a retried batch) and must not rely on exact counts.

use serde::{Deserialize, Serialize};

use crate::doc::Doc;

/// Events emitted by the merge engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocEvent {
    /// A new Doc entered the cache.
    Created {
        /// Record after the change.
        doc: Doc,
    },

    /// Content or metadata of a Doc changed.
    Updated {
        /// Record after the change.
        doc: Doc,
    },

    /// A Doc changed path.
    Moved {
        /// Record after the change.
        doc: Doc,
        /// Path before the move.
        from: String,
    },

    /// The remote side trashed a Doc.
    Trashed {
        /// Record after the change.
        doc: Doc,
    },

    /// The local side deleted a Doc, or it was purged from the cache.
    Deleted {
        /// Record after the change.
        doc: Doc,
    },
}

impl DocEvent {
    /// Create a Created event.
    pub fn created(doc: Doc) -> Self {
        Self::Created { doc }
    }

    /// Create an Updated event.
    pub fn updated(doc: Doc) -> Self {
        Self::Updated { doc }
    }

    /// Create a Moved event.
    pub fn moved(doc: Doc, from: impl Into<String>) -> Self {
        Self::Moved {
            doc,
            from: from.into(),
        }
    }

    /// Create a Trashed event.
    pub fn trashed(doc: Doc) -> Self {
        Self::Trashed { doc }
    }

    /// Create a Deleted event.
    pub fn deleted(doc: Doc) -> Self {
        Self::Deleted { doc }
    }

    /// The record carried by the event.
    pub fn doc(&self) -> &Doc {
        match self {
            Self::Created { doc }
            | Self::Updated { doc }
            | Self::Moved { doc, .. }
            | Self::Trashed { doc }
            | Self::Deleted { doc } => doc,
        }
    }

    /// Path of the record after the change.
    pub fn path(&self) -> &str {
        &self.doc().path
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Moved { .. } => "moved",
            Self::Trashed { .. } => "trashed",
            Self::Deleted { .. } => "deleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{DocKind, Side};

    fn doc(path: &str) -> Doc {
        Doc::new(path.to_uppercase(), path, DocKind::File, Side::Local)
    }

    #[test]
    fn test_moved_event() {
        let event = DocEvent::moved(doc("new.txt"), "old.txt");
        assert_eq!(event.path(), "new.txt");
        assert_eq!(event.event_type(), "moved");
    }

    #[test]
    fn test_event_serialization() {
        let event = DocEvent::trashed(doc("a.txt"));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"trashed\""));

        let parsed: DocEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type(), "trashed");
        assert_eq!(parsed.doc().path, "a.txt");
    }
}
