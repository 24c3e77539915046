//! Pointers to ring participants.

use std::fmt;

use crate::id::NodeId;

/// A reference to a remote node: its ring id plus the link used to reach
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalPointer {
    id: NodeId,
    link_id: String,
}

impl ExternalPointer {
    /// Construct a pointer to the node `id` reachable via `link_id`.
    pub fn new(id: NodeId, link_id: impl Into<String>) -> Self {
        ExternalPointer {
            id,
            link_id: link_id.into(),
        }
    }

    /// The node's ring id.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// The link the node is reachable through.
    pub fn link_id(&self) -> &str {
        &self.link_id
    }
}

impl fmt::Display for ExternalPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.link_id)
    }
}

/// Either ourselves ([`Pointer::Internal`]) or a remote node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pointer {
    /// The local node; no link needed.
    Internal(NodeId),
    /// A remote node.
    External(ExternalPointer),
}

impl Pointer {
    /// The ring id, whichever side it points to.
    pub fn id(&self) -> &NodeId {
        match self {
            Pointer::Internal(id) => id,
            Pointer::External(external) => external.id(),
        }
    }

    /// `true` for the local node.
    pub fn is_internal(&self) -> bool {
        matches!(self, Pointer::Internal(_))
    }

    /// Borrow the external pointer, if this is one.
    pub fn as_external(&self) -> Option<&ExternalPointer> {
        match self {
            Pointer::Internal(_) => None,
            Pointer::External(external) => Some(external),
        }
    }
}

impl From<ExternalPointer> for Pointer {
    fn from(external: ExternalPointer) -> Self {
        Pointer::External(external)
    }
}
