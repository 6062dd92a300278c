use thiserror::Error;

use crate::document::{DocumentId, NodeId};

/// Rejected edits. Returning one of these never leaves a partial mutation behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("node '{0}' not found")]
    NodeNotFound(NodeId),

    #[error("the root node cannot be {0}")]
    RootProtected(&'static str),

    #[error("a {0} node cannot have children")]
    CannotHaveChildren(&'static str),

    #[error("node '{node}' cannot be moved under itself")]
    ReparentToSelf { node: NodeId },

    #[error("node '{node}' is already a child of '{parent}'")]
    AlreadyChild { node: NodeId, parent: NodeId },

    #[error("node '{parent}' is a descendant of '{node}'")]
    ReparentIntoDescendant { node: NodeId, parent: NodeId },

    #[error("cannot connect node '{0}' to itself")]
    SelfConnection(NodeId),

    #[error("an edge from '{from}' to '{to}' already exists")]
    DuplicateEdge { from: NodeId, to: NodeId },

    #[error("node '{0}' has no incoming edge")]
    NoIncomingEdge(NodeId),

    #[error("node '{0}' is already a submap")]
    AlreadySubmap(NodeId),

    #[error("use submap conversion to turn node '{0}' into a submap")]
    SubmapConversionRequired(NodeId),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Edit(#[from] EditError),

    #[error("backend request failed: {0:#}")]
    Backend(#[source] anyhow::Error),

    #[error("submap conversion failed: {0:#}")]
    Partition(#[source] anyhow::Error),

    #[error("document has not been saved yet")]
    UnsavedDocument,

    #[error("node '{0}' is not a submap")]
    NotASubmap(NodeId),

    #[error("breadcrumb index {index} is out of range (trail has {len} entries)")]
    BreadcrumbOutOfRange { index: usize, len: usize },

    #[error("document '{0}' has no root node")]
    MissingRoot(DocumentId),
}

impl SessionError {
    /// Validation failures are user mistakes; everything else is worth a retry.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SessionError::Edit(_) | SessionError::NotASubmap(_) | SessionError::BreadcrumbOutOfRange { .. }
        )
    }
}
