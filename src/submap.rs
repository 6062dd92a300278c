use std::collections::HashSet;

use crate::document::{DocumentId, Graph, NodeId, NodeKind, SubmapOrigin};
use crate::error::EditError;
use crate::hierarchy::HierarchyIndex;
use crate::persistence::{ContentRow, StructuralPayload, content_rows};
use crate::*;

/// A planned split of one subtree into its own document.
///
/// Planning is pure: nothing is persisted or mutated until the caller has
/// written the child document and applies [`Partition::apply_to_parent`].
#[derive(Debug, Clone)]
pub struct Partition {
    node_id: NodeId,
    child_name: String,
    child: Graph,
    descendants: Vec<NodeId>,
}

impl Partition {
    pub fn plan(graph: &Graph, index: &HierarchyIndex, node_id: &NodeId) -> Result<Self, EditError> {
        let node = graph
            .node(node_id)
            .ok_or_else(|| EditError::NodeNotFound(node_id.clone()))?;
        if node.is_root() {
            return Err(EditError::RootProtected("converted"));
        }
        if node.kind == NodeKind::Submap {
            return Err(EditError::AlreadySubmap(node_id.clone()));
        }

        let with_depth = index.descendants_with_depth(node_id);
        let descendants: Vec<NodeId> = with_depth.iter().map(|(id, _)| id.clone()).collect();

        let mut members: HashSet<&NodeId> = descendants.iter().collect();
        members.insert(node_id);

        let dx = ROOT_ORIGIN.x - node.position.x;
        let dy = ROOT_ORIGIN.y - node.position.y;

        let mut new_root = node.clone();
        new_root.position = ROOT_ORIGIN;
        new_root.level = 0;
        new_root.collapsed = false;
        new_root.submap_ref = None;
        new_root.measured = None;

        let mut nodes = vec![new_root];
        for (id, depth) in &with_depth {
            if let Some(descendant) = graph.node(id) {
                let mut moved = descendant.clone();
                moved.position = moved.position.translate(dx, dy);
                moved.level = *depth;
                nodes.push(moved);
            }
        }

        // pointer edges leaving the subtree cannot survive the split
        let edges = graph
            .edges()
            .iter()
            .filter(|edge| members.contains(&edge.source) && members.contains(&edge.target))
            .cloned()
            .collect();

        let title = node.title.trim();
        let child_name = if title.is_empty() {
            SUBMAP_FALLBACK_NAME.to_string()
        } else {
            title.to_string()
        };

        Ok(Self {
            node_id: node_id.clone(),
            child_name,
            child: Graph::from_parts(nodes, edges),
            descendants,
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn child_name(&self) -> &str {
        &self.child_name
    }

    pub fn child_graph(&self) -> &Graph {
        &self.child
    }

    /// Strict descendants that leave the parent document.
    pub fn descendants(&self) -> &[NodeId] {
        &self.descendants
    }

    pub fn child_payload(&self, parent_document: Option<&DocumentId>) -> StructuralPayload {
        StructuralPayload::from_graph(
            &self.child,
            Some(SubmapOrigin {
                parent_document_id: parent_document.cloned(),
                parent_node_id: self.node_id.clone(),
            }),
        )
    }

    /// Content rows to re-key under the child document.
    pub fn child_content(&self) -> Vec<ContentRow> {
        content_rows(&self.child)
    }

    /// The parent graph once the child document exists: descendants gone and
    /// the partitioned node turned into a link to `child`.
    pub fn apply_to_parent(&self, parent: &Graph, child: &DocumentId) -> Graph {
        let mut graph = parent.clone();
        for id in &self.descendants {
            graph.remove_node(id);
        }
        if let Some(node) = graph.node_mut(&self.node_id) {
            node.kind = NodeKind::Submap;
            node.submap_ref = Some(child.clone());
            node.collapsed = false;
        }
        graph
    }
}

/// The child document a submap node links to.
pub fn resolve(graph: &Graph, node_id: &NodeId) -> Option<DocumentId> {
    graph
        .node(node_id)
        .filter(|node| node.kind == NodeKind::Submap)
        .and_then(|node| node.submap_ref.clone())
}
