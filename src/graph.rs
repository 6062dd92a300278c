use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::document::{
    Document, DocumentId, Edge, EdgeKind, EdgeStyle, Graph, Node, NodeId, NodeKind, Point, Size,
};
use crate::error::EditError;
use crate::hierarchy::HierarchyIndex;
use crate::history::{DEFAULT_HISTORY_CAPACITY, HistoryManager};
use crate::layout::LayoutEngine;
use crate::*;

/// Side effects requested by a mutation, drained and executed by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The document changed; (re)start the autosave debounce.
    ScheduleAutosave,
    /// The node is gone; its content row should not linger in storage.
    DeleteContent(NodeId),
}

/// Shallow field update for [`GraphStore::update_node`]. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub kind: Option<NodeKind>,
    #[serde(default)]
    pub collapsed: Option<bool>,
    #[serde(default)]
    pub submap_ref: Option<Option<DocumentId>>,
}

impl NodePatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    fn apply(self, node: &mut Node) {
        if let Some(title) = self.title {
            node.title = title;
        }
        if let Some(content) = self.content {
            node.content = content;
        }
        if let Some(overview) = self.overview {
            node.overview = overview;
        }
        if let Some(collapsed) = self.collapsed {
            node.collapsed = collapsed;
        }
        if let Some(submap_ref) = self.submap_ref {
            node.submap_ref = submap_ref;
        }
    }
}

/// Owner of the live document. Every structural edit goes through here.
///
/// Deleting a node removes its whole hierarchy subtree, so every non-root node
/// always has exactly one incoming hierarchy edge and no edge dangles.
#[derive(Debug)]
pub struct GraphStore {
    document: Document,
    index: HierarchyIndex,
    history: HistoryManager,
    selection: Option<NodeId>,
    effects: Vec<Effect>,
}

impl GraphStore {
    pub fn new(history_capacity: usize) -> Self {
        Self::from_document(Document::new(), history_capacity)
    }

    pub fn from_document(document: Document, history_capacity: usize) -> Self {
        let mut store = Self {
            index: HierarchyIndex::default(),
            document,
            history: HistoryManager::new(history_capacity),
            selection: None,
            effects: Vec::new(),
        };
        store.reindex();
        store.relevel_all();
        store
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn graph(&self) -> &Graph {
        &self.document.graph
    }

    pub fn index(&self) -> &HierarchyIndex {
        &self.index
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn selection(&self) -> Option<&NodeId> {
        self.selection.as_ref()
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.document.graph.node(id)
    }

    pub fn root_id(&self) -> Option<&NodeId> {
        self.index.root_id()
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Swaps in another document wholesale (load, new, navigation). History starts over.
    pub fn replace_document(&mut self, document: Document) {
        self.document = document;
        self.history.clear();
        self.selection = None;
        self.effects.clear();
        self.reindex();
        self.relevel_all();
    }

    /// Installs the parent graph produced by a successful submap partition.
    ///
    /// History is dropped: older snapshots still hold nodes whose content now
    /// belongs to the child document.
    pub fn replace_graph_after_partition(&mut self, graph: Graph) {
        self.document.graph = graph;
        self.history.clear();
        if let Some(selected) = &self.selection {
            if !self.document.graph.contains(selected) {
                self.selection = None;
            }
        }
        self.reindex();
        self.document.dirty = true;
    }

    pub fn set_document_id(&mut self, id: DocumentId) {
        self.document.id = Some(id);
    }

    pub fn rename_document(&mut self, name: &str) {
        if self.document.name == name {
            return;
        }
        self.document.name = name.to_string();
        self.touch();
    }

    pub fn set_save_status(&mut self, status: SaveStatus) {
        self.document.save_status = status;
    }

    pub fn mark_clean(&mut self) {
        self.document.dirty = false;
    }

    /// Flags the document for saving without an edit, e.g. when the stored
    /// copy is known to be out of date.
    pub fn mark_dirty(&mut self) {
        self.document.dirty = true;
    }

    /// Merges lazily loaded content without touching history or the dirty flag.
    pub fn merge_content(&mut self, content: &HashMap<NodeId, NodeContent>) {
        let ids: Vec<NodeId> = self.document.graph.node_ids().to_vec();
        for id in ids {
            if let Some(row) = content.get(&id) {
                if let Some(node) = self.document.graph.node_mut(&id) {
                    node.content = row.content.clone();
                    node.overview = row.overview.clone();
                }
            }
        }
    }

    /// Captures the current graph so the next edit can be undone.
    pub fn push_history(&mut self) {
        self.history.push_snapshot(&self.document.graph);
    }

    pub fn add_child(&mut self, parent_id: &NodeId, kind: NodeKind) -> Result<NodeId, EditError> {
        let parent = self
            .node(parent_id)
            .ok_or_else(|| EditError::NodeNotFound(parent_id.clone()))?;
        if !parent.kind.accepts_children() {
            return Err(EditError::CannotHaveChildren(parent.kind.as_str()));
        }
        if kind == NodeKind::Submap {
            return Err(EditError::SubmapConversionRequired(parent_id.clone()));
        }

        let position = if parent.kind == NodeKind::Group {
            self.group_slot(parent_id, None)
        } else {
            self.beside_parent_slot(parent)
        };
        let level = parent.level + 1;

        self.push_history();

        let id = NodeId::generate();
        self.document
            .graph
            .insert_node(Node::new(id.clone(), kind, position, level));
        let mut edge = Edge::hierarchy(parent_id.clone(), id.clone());
        if kind == NodeKind::Pointer {
            edge.style = EdgeStyle::Pointer;
        }
        self.document.graph.push_edge(edge);
        self.reindex();
        self.touch();

        debug!(parent = %parent_id, node = %id, kind = kind.as_str(), "add_child");
        Ok(id)
    }

    /// Shallow-merges `patch` into the node. Takes no snapshot: callers push
    /// history once at the start of an editing session instead of per keystroke.
    ///
    /// A kind change obeys the same rules as [`GraphStore::convert_kind`], and
    /// only submap nodes take a `submap_ref`.
    pub fn update_node(&mut self, id: &NodeId, mut patch: NodePatch) -> Result<(), EditError> {
        let kind = self
            .node(id)
            .map(|node| node.kind)
            .ok_or_else(|| EditError::NodeNotFound(id.clone()))?;
        if patch.submap_ref.is_some() && kind != NodeKind::Submap {
            return Err(EditError::SubmapConversionRequired(id.clone()));
        }
        if let Some(kind) = patch.kind.take() {
            if self.check_kind_change(id, kind)? {
                self.retype(id, kind)?;
            }
        }
        let node = self
            .document
            .graph
            .node_mut(id)
            .ok_or_else(|| EditError::NodeNotFound(id.clone()))?;
        patch.apply(node);
        self.touch();
        Ok(())
    }

    /// Commits a title edit as a single undoable step. Blank or unchanged titles are ignored.
    pub fn rename_node(&mut self, id: &NodeId, title: &str) -> Result<bool, EditError> {
        let node = self
            .node(id)
            .ok_or_else(|| EditError::NodeNotFound(id.clone()))?;
        let trimmed = title.trim();
        if trimmed.is_empty() || trimmed == node.title {
            return Ok(false);
        }
        self.push_history();
        self.update_node(id, NodePatch::title(trimmed))?;
        Ok(true)
    }

    /// Deletes the node together with its whole hierarchy subtree.
    pub fn delete_node(&mut self, id: &NodeId) -> Result<Vec<NodeId>, EditError> {
        let node = self
            .node(id)
            .ok_or_else(|| EditError::NodeNotFound(id.clone()))?;
        if node.is_root() {
            return Err(EditError::RootProtected("deleted"));
        }

        let mut removed = vec![id.clone()];
        removed.extend(self.index.descendants(id));

        self.push_history();
        for victim in &removed {
            self.document.graph.remove_node(victim);
            self.effects.push(Effect::DeleteContent(victim.clone()));
        }
        if self
            .selection
            .as_ref()
            .is_some_and(|selected| removed.contains(selected))
        {
            self.selection = None;
        }
        self.reindex();
        self.touch();

        debug!(node = %id, cascade = removed.len(), "delete_node");
        Ok(removed)
    }

    /// Sets `collapsed` on the node and on every descendant that has children.
    /// Returns how many nodes changed; zero means no history entry was made.
    pub fn set_descendants_collapsed(
        &mut self,
        id: &NodeId,
        collapse: bool,
    ) -> Result<usize, EditError> {
        if !self.document.graph.contains(id) {
            return Err(EditError::NodeNotFound(id.clone()));
        }

        let mut targets = Vec::new();
        if self.index.has_children(id) {
            targets.push(id.clone());
        }
        targets.extend(
            self.index
                .descendants(id)
                .into_iter()
                .filter(|descendant| self.index.has_children(descendant)),
        );
        targets.retain(|target| {
            self.node(target)
                .is_some_and(|node| node.collapsed != collapse)
        });

        if targets.is_empty() {
            return Ok(0);
        }

        self.push_history();
        for target in &targets {
            if let Some(node) = self.document.graph.node_mut(target) {
                node.collapsed = collapse;
            }
        }
        self.touch();
        debug!(node = %id, collapse, changed = targets.len(), "set_descendants_collapsed");
        Ok(targets.len())
    }

    pub fn reparent_node(&mut self, id: &NodeId, new_parent: &NodeId) -> Result<(), EditError> {
        self.validate_reparent(id, new_parent)?;
        self.push_history();
        self.apply_reparent(id, new_parent);
        Ok(())
    }

    /// Adds a pointer edge. Pointer edges never affect the hierarchy.
    pub fn connect(&mut self, source: &NodeId, target: &NodeId) -> Result<String, EditError> {
        for id in [source, target] {
            if !self.document.graph.contains(id) {
                return Err(EditError::NodeNotFound(id.clone()));
            }
        }
        if source == target {
            return Err(EditError::SelfConnection(source.clone()));
        }
        let duplicate = self.document.graph.edges().iter().any(|edge| {
            edge.kind == EdgeKind::Pointer && &edge.source == source && &edge.target == target
        });
        if duplicate {
            return Err(EditError::DuplicateEdge {
                from: source.clone(),
                to: target.clone(),
            });
        }

        self.push_history();
        let edge = Edge::pointer(source.clone(), target.clone());
        let edge_id = edge.id.clone();
        self.document.graph.push_edge(edge);
        self.reindex();
        self.touch();
        Ok(edge_id)
    }

    /// Changes how the node's incoming hierarchy edge is drawn.
    pub fn set_edge_type(&mut self, target: &NodeId, style: EdgeStyle) -> Result<(), EditError> {
        let edge = self
            .document
            .graph
            .incoming_hierarchy_edge_mut(target)
            .ok_or_else(|| EditError::NoIncomingEdge(target.clone()))?;
        if edge.style == style {
            return Ok(());
        }
        edge.style = style;
        self.touch();
        Ok(())
    }

    /// Folder/Group/Note/Pointer conversion. Submap conversion has its own path.
    pub fn convert_kind(&mut self, id: &NodeId, kind: NodeKind) -> Result<bool, EditError> {
        if !self.check_kind_change(id, kind)? {
            return Ok(false);
        }
        self.push_history();
        self.retype(id, kind)?;
        self.touch();
        Ok(true)
    }

    /// Ok(false) when the node already has `kind`.
    fn check_kind_change(&self, id: &NodeId, kind: NodeKind) -> Result<bool, EditError> {
        let node = self
            .node(id)
            .ok_or_else(|| EditError::NodeNotFound(id.clone()))?;
        if node.kind == kind {
            return Ok(false);
        }
        if node.is_root() {
            return Err(EditError::RootProtected("converted"));
        }
        if kind == NodeKind::Submap {
            return Err(EditError::SubmapConversionRequired(id.clone()));
        }
        if node.kind == NodeKind::Submap {
            return Err(EditError::AlreadySubmap(id.clone()));
        }
        Ok(true)
    }

    fn retype(&mut self, id: &NodeId, kind: NodeKind) -> Result<(), EditError> {
        let previous = self
            .node(id)
            .map(|node| node.kind)
            .ok_or_else(|| EditError::NodeNotFound(id.clone()))?;
        if kind == NodeKind::Pointer {
            self.set_edge_type(id, EdgeStyle::Pointer)?;
        } else if previous == NodeKind::Pointer {
            self.set_edge_type(id, EdgeStyle::Straight)?;
        }
        if let Some(node) = self.document.graph.node_mut(id) {
            node.kind = kind;
            if kind == NodeKind::Group {
                node.content.clear();
            }
        }
        Ok(())
    }

    /// Renderer feedback. Neither dirties the document nor enters history.
    pub fn set_measured_size(&mut self, id: &NodeId, size: Size) -> Result<(), EditError> {
        let node = self
            .document
            .graph
            .node_mut(id)
            .ok_or_else(|| EditError::NodeNotFound(id.clone()))?;
        node.measured = Some(size);
        Ok(())
    }

    pub fn select(&mut self, id: Option<NodeId>) {
        self.selection = id.filter(|id| self.document.graph.contains(id));
    }

    /// A drag is one undoable step: the snapshot is taken when it starts.
    pub fn drag_start(&mut self, id: &NodeId) -> Result<(), EditError> {
        if !self.document.graph.contains(id) {
            return Err(EditError::NodeNotFound(id.clone()));
        }
        self.push_history();
        Ok(())
    }

    /// Moves a node. Dragging a group carries its whole subtree along; for a
    /// group, `position` is the new origin of its rendered box.
    pub fn drag_move(&mut self, id: &NodeId, position: Point) -> Result<(), EditError> {
        let node = self
            .node(id)
            .ok_or_else(|| EditError::NodeNotFound(id.clone()))?;
        if node.kind == NodeKind::Group {
            let origin = LayoutEngine::compute(&self.document.graph, &self.index)
                .group_bounds(id)
                .map_or(node.position, |bounds| bounds.origin());
            let dx = position.x - origin.x;
            let dy = position.y - origin.y;
            let mut moved = vec![id.clone()];
            moved.extend(self.index.descendants(id));
            self.translate(&moved, dx, dy);
        } else if let Some(node) = self.document.graph.node_mut(id) {
            node.position = position;
        }
        self.touch();
        Ok(())
    }

    /// Ends a drag. If the node's centre was dropped inside a group, the
    /// innermost such group adopts it. Returns the new parent, if any.
    pub fn drag_end(&mut self, id: &NodeId) -> Result<Option<NodeId>, EditError> {
        let node = self
            .node(id)
            .ok_or_else(|| EditError::NodeNotFound(id.clone()))?;
        if node.is_root() {
            return Ok(None);
        }
        let center = node.center();
        let view = LayoutEngine::compute(&self.document.graph, &self.index);

        let target = view.group_at(center, id, &self.index).cloned();

        let Some(target) = target else {
            return Ok(None);
        };
        if self.index.is_descendant(&target, id) {
            return Ok(None);
        }
        self.validate_reparent(id, &target)?;
        self.apply_reparent(id, &target);
        debug!(node = %id, group = %target, "dropped into group");
        Ok(Some(target))
    }

    pub fn undo(&mut self) -> bool {
        if !self.history.undo(&mut self.document.graph) {
            return false;
        }
        self.after_history_swap();
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.history.redo(&mut self.document.graph) {
            return false;
        }
        self.after_history_swap();
        true
    }

    fn after_history_swap(&mut self) {
        if let Some(selected) = &self.selection {
            if !self.document.graph.contains(selected) {
                self.selection = None;
            }
        }
        self.reindex();
        self.touch();
    }

    fn validate_reparent(&self, id: &NodeId, new_parent: &NodeId) -> Result<(), EditError> {
        let node = self
            .node(id)
            .ok_or_else(|| EditError::NodeNotFound(id.clone()))?;
        let parent = self
            .node(new_parent)
            .ok_or_else(|| EditError::NodeNotFound(new_parent.clone()))?;
        if node.is_root() {
            return Err(EditError::RootProtected("reparented"));
        }
        if id == new_parent {
            return Err(EditError::ReparentToSelf { node: id.clone() });
        }
        if self.index.parent_of(id) == Some(new_parent) {
            return Err(EditError::AlreadyChild {
                node: id.clone(),
                parent: new_parent.clone(),
            });
        }
        if self.index.is_descendant(id, new_parent) {
            return Err(EditError::ReparentIntoDescendant {
                node: id.clone(),
                parent: new_parent.clone(),
            });
        }
        if !parent.kind.accepts_children() {
            return Err(EditError::CannotHaveChildren(parent.kind.as_str()));
        }
        Ok(())
    }

    fn apply_reparent(&mut self, id: &NodeId, new_parent: &NodeId) {
        let edges = self.document.graph.edges_mut();
        let style = edges
            .iter()
            .find(|edge| edge.is_hierarchy() && &edge.target == id)
            .map(|edge| edge.style)
            .unwrap_or_default();
        edges.retain(|edge| !(edge.is_hierarchy() && &edge.target == id));
        let mut edge = Edge::hierarchy(new_parent.clone(), id.clone());
        edge.style = style;
        edges.push(edge);
        self.reindex();

        let parent_level = self.node(new_parent).map(|parent| parent.level).unwrap_or(0);
        self.relevel_subtree(id, parent_level + 1);

        let is_group = self
            .node(new_parent)
            .is_some_and(|parent| parent.kind == NodeKind::Group);
        if is_group {
            let slot = self.group_slot(new_parent, Some(id));
            if let Some(current) = self.node(id).map(|node| node.position) {
                let mut moved = vec![id.clone()];
                moved.extend(self.index.descendants(id));
                self.translate(&moved, slot.x - current.x, slot.y - current.y);
            }
        }

        self.touch();
        debug!(node = %id, parent = %new_parent, "reparent_node");
    }

    /// Next free spot to the right of a non-group parent, below existing children.
    fn beside_parent_slot(&self, parent: &Node) -> Point {
        let width = PLACEMENT_WIDTHS[parent.display_level() as usize];
        let x = parent.position.x + width + CHILD_HORIZONTAL_GAP;
        let y = self
            .lowest_child_y(&parent.id, None)
            .map(|lowest| lowest + CHILD_VERTICAL_SPACING)
            .unwrap_or(parent.position.y);
        Point::new(x, y)
    }

    /// Next free spot inside a group's padded interior, below existing children.
    fn group_slot(&self, group_id: &NodeId, exclude: Option<&NodeId>) -> Point {
        let Some(group) = self.node(group_id) else {
            return Point::default();
        };
        let mut top = GROUP_PADDING_TOP;
        if !group.title.trim().is_empty() {
            top += GROUP_HEADER_HEIGHT;
        }
        let x = group.position.x + GROUP_PADDING_X;
        let y = self
            .lowest_child_y(group_id, exclude)
            .map(|lowest| lowest + CHILD_VERTICAL_SPACING)
            .unwrap_or(group.position.y + top);
        Point::new(x, y)
    }

    fn lowest_child_y(&self, parent: &NodeId, exclude: Option<&NodeId>) -> Option<f32> {
        self.index
            .children_of(parent)
            .iter()
            .filter(|child| Some(*child) != exclude)
            .filter_map(|child| self.node(child))
            .map(|child| child.position.y)
            .reduce(f32::max)
    }

    fn translate(&mut self, ids: &[NodeId], dx: f32, dy: f32) {
        if dx == 0.0 && dy == 0.0 {
            return;
        }
        for id in ids {
            if let Some(node) = self.document.graph.node_mut(id) {
                node.position = node.position.translate(dx, dy);
            }
        }
    }

    fn relevel_subtree(&mut self, id: &NodeId, level: u32) {
        let descendants = self.index.descendants_with_depth(id);
        if let Some(node) = self.document.graph.node_mut(id) {
            node.level = level;
        }
        for (descendant, depth) in descendants {
            if let Some(node) = self.document.graph.node_mut(&descendant) {
                node.level = level + depth;
            }
        }
    }

    /// Recomputes every level from the hierarchy, leaving unchanged nodes unshared.
    fn relevel_all(&mut self) {
        let Some(root) = self.index.root_id().cloned() else {
            return;
        };
        let mut expected: HashMap<NodeId, u32> = self
            .index
            .descendants_with_depth(&root)
            .into_iter()
            .collect();
        expected.insert(root, 0);
        let stale: HashSet<NodeId> = self
            .document
            .graph
            .nodes()
            .filter(|node| expected.get(&node.id).is_some_and(|level| *level != node.level))
            .map(|node| node.id.clone())
            .collect();
        for id in stale {
            if let (Some(level), Some(node)) = (expected.get(&id), self.document.graph.node_mut(&id)) {
                node.level = *level;
            }
        }
    }

    fn reindex(&mut self) {
        self.index = HierarchyIndex::build(&self.document.graph);
    }

    fn touch(&mut self) {
        self.document.dirty = true;
        self.effects.push(Effect::ScheduleAutosave);
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (GraphStore, NodeId) {
        let store = GraphStore::default();
        let root = store.root_id().cloned().unwrap();
        (store, root)
    }

    fn incoming_hierarchy(store: &GraphStore, id: &NodeId) -> usize {
        store
            .graph()
            .edges()
            .iter()
            .filter(|edge| edge.is_hierarchy() && &edge.target == id)
            .count()
    }

    #[test]
    fn add_child_places_right_of_parent_and_stacks_siblings() {
        let (mut store, root) = store();
        let first = store.add_child(&root, NodeKind::Folder).unwrap();
        let second = store.add_child(&root, NodeKind::Folder).unwrap();

        let root_node = store.node(&root).unwrap().clone();
        let first_node = store.node(&first).unwrap();
        let second_node = store.node(&second).unwrap();

        let expected_x = root_node.position.x + PLACEMENT_WIDTHS[0] + CHILD_HORIZONTAL_GAP;
        assert_eq!(first_node.position, Point::new(expected_x, root_node.position.y));
        assert_eq!(
            second_node.position,
            Point::new(expected_x, root_node.position.y + CHILD_VERTICAL_SPACING)
        );
        assert_eq!(first_node.level, 1);
        assert_eq!(store.index().parent_of(&second), Some(&root));
        assert!(store.document().dirty);
        assert_eq!(store.history().undo_depth(), 2);
    }

    #[test]
    fn add_child_inside_group_uses_padded_interior() {
        let (mut store, root) = store();
        let group = store.add_child(&root, NodeKind::Group).unwrap();
        store
            .update_node(&group, NodePatch::title(""))
            .unwrap();
        let origin = store.node(&group).unwrap().position;

        let inner = store.add_child(&group, NodeKind::Note).unwrap();
        let next = store.add_child(&group, NodeKind::Note).unwrap();

        assert_eq!(
            store.node(&inner).unwrap().position,
            Point::new(origin.x + GROUP_PADDING_X, origin.y + GROUP_PADDING_TOP)
        );
        assert_eq!(
            store.node(&next).unwrap().position.y,
            origin.y + GROUP_PADDING_TOP + CHILD_VERTICAL_SPACING
        );
    }

    #[test]
    fn add_child_rejects_missing_and_leaf_parents() {
        let (mut store, root) = store();
        assert_eq!(
            store.add_child(&NodeId::from("nope"), NodeKind::Folder),
            Err(EditError::NodeNotFound(NodeId::from("nope")))
        );
        let note = store.add_child(&root, NodeKind::Note).unwrap();
        assert_eq!(
            store.add_child(&note, NodeKind::Folder),
            Err(EditError::CannotHaveChildren("note"))
        );
    }

    #[test]
    fn update_node_merges_without_history() {
        let (mut store, root) = store();
        let child = store.add_child(&root, NodeKind::Folder).unwrap();
        let depth = store.history().undo_depth();

        store
            .update_node(
                &child,
                NodePatch {
                    overview: Some("summary".to_string()),
                    ..NodePatch::default()
                },
            )
            .unwrap();

        let node = store.node(&child).unwrap();
        assert_eq!(node.overview, "summary");
        assert_eq!(node.title, DEFAULT_NODE_TITLE);
        assert_eq!(store.history().undo_depth(), depth);
    }

    #[test]
    fn patched_kind_changes_follow_conversion_rules() {
        let (mut store, root) = store();
        let folder = store.add_child(&root, NodeKind::Folder).unwrap();
        store.add_child(&folder, NodeKind::Note).unwrap();
        let retyped = |kind| NodePatch {
            kind: Some(kind),
            ..NodePatch::default()
        };

        assert_eq!(
            store.update_node(&root, retyped(NodeKind::Note)),
            Err(EditError::RootProtected("converted"))
        );
        assert_eq!(store.node(&root).unwrap().kind, NodeKind::Folder);
        assert!(store.add_child(&root, NodeKind::Folder).is_ok());

        assert_eq!(
            store.update_node(&folder, retyped(NodeKind::Submap)),
            Err(EditError::SubmapConversionRequired(folder.clone()))
        );
        assert_eq!(
            store.update_node(
                &folder,
                NodePatch {
                    submap_ref: Some(Some(DocumentId::from("elsewhere"))),
                    ..NodePatch::default()
                }
            ),
            Err(EditError::SubmapConversionRequired(folder.clone()))
        );
        let node = store.node(&folder).unwrap();
        assert_eq!(node.kind, NodeKind::Folder);
        assert_eq!(node.submap_ref, None);

        let leaf = store.add_child(&root, NodeKind::Note).unwrap();
        let depth = store.history().undo_depth();
        store.update_node(&leaf, retyped(NodeKind::Pointer)).unwrap();
        assert_eq!(store.node(&leaf).unwrap().kind, NodeKind::Pointer);
        let style = store
            .graph()
            .edges()
            .iter()
            .find(|edge| edge.target == leaf)
            .map(|edge| edge.style);
        assert_eq!(style, Some(EdgeStyle::Pointer));
        assert_eq!(store.history().undo_depth(), depth);
    }

    #[test]
    fn rename_snapshots_once_and_skips_noops() {
        let (mut store, root) = store();
        let depth = store.history().undo_depth();
        assert!(store.rename_node(&root, "  Ideas ").unwrap());
        assert_eq!(store.node(&root).unwrap().title, "Ideas");
        assert!(!store.rename_node(&root, "Ideas").unwrap());
        assert!(!store.rename_node(&root, "   ").unwrap());
        assert_eq!(store.history().undo_depth(), depth + 1);
    }

    #[test]
    fn delete_cascades_and_requests_content_cleanup() {
        let (mut store, root) = store();
        let a = store.add_child(&root, NodeKind::Folder).unwrap();
        let b = store.add_child(&a, NodeKind::Folder).unwrap();
        let c = store.add_child(&b, NodeKind::Note).unwrap();
        let keep = store.add_child(&root, NodeKind::Folder).unwrap();
        store.connect(&keep, &c).unwrap();
        store.take_effects();

        let removed = store.delete_node(&a).unwrap();
        assert_eq!(removed, vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(store.graph().len(), 2);
        assert_eq!(store.graph().edges().len(), 1);
        assert!(store
            .graph()
            .edges()
            .iter()
            .all(|edge| store.graph().contains(&edge.source) && store.graph().contains(&edge.target)));

        let effects = store.take_effects();
        for id in [&a, &b, &c] {
            assert!(effects.contains(&Effect::DeleteContent(id.clone())));
        }
        assert!(effects.contains(&Effect::ScheduleAutosave));
    }

    #[test]
    fn root_cannot_be_deleted_converted_or_moved() {
        let (mut store, root) = store();
        let other = store.add_child(&root, NodeKind::Folder).unwrap();
        let depth = store.history().undo_depth();
        assert_eq!(store.delete_node(&root), Err(EditError::RootProtected("deleted")));
        assert_eq!(
            store.convert_kind(&root, NodeKind::Note),
            Err(EditError::RootProtected("converted"))
        );
        assert_eq!(
            store.reparent_node(&root, &other),
            Err(EditError::RootProtected("reparented"))
        );
        assert_eq!(store.history().undo_depth(), depth);
    }

    #[test]
    fn collapse_touches_only_nodes_with_children() {
        let (mut store, root) = store();
        let a = store.add_child(&root, NodeKind::Folder).unwrap();
        let b = store.add_child(&a, NodeKind::Folder).unwrap();
        let leaf = store.add_child(&b, NodeKind::Note).unwrap();

        assert_eq!(store.set_descendants_collapsed(&a, true).unwrap(), 2);
        assert!(store.node(&a).unwrap().collapsed);
        assert!(store.node(&b).unwrap().collapsed);
        assert!(!store.node(&leaf).unwrap().collapsed);

        let depth = store.history().undo_depth();
        assert_eq!(store.set_descendants_collapsed(&a, true).unwrap(), 0);
        assert_eq!(store.set_descendants_collapsed(&leaf, true).unwrap(), 0);
        assert_eq!(store.history().undo_depth(), depth);
    }

    #[test]
    fn reparent_rejects_cycles_and_noops_without_change() {
        let (mut store, root) = store();
        let a = store.add_child(&root, NodeKind::Folder).unwrap();
        let b = store.add_child(&a, NodeKind::Folder).unwrap();
        let before = store.graph().clone();

        assert_eq!(
            store.reparent_node(&a, &a),
            Err(EditError::ReparentToSelf { node: a.clone() })
        );
        assert_eq!(
            store.reparent_node(&a, &b),
            Err(EditError::ReparentIntoDescendant {
                node: a.clone(),
                parent: b.clone()
            })
        );
        assert_eq!(
            store.reparent_node(&b, &a),
            Err(EditError::AlreadyChild {
                node: b.clone(),
                parent: a.clone()
            })
        );
        assert_eq!(store.graph(), &before);
    }

    #[test]
    fn reparent_relevels_the_whole_subtree() {
        let (mut store, root) = store();
        let a = store.add_child(&root, NodeKind::Folder).unwrap();
        let b = store.add_child(&a, NodeKind::Folder).unwrap();
        let c = store.add_child(&b, NodeKind::Folder).unwrap();
        let d = store.add_child(&c, NodeKind::Folder).unwrap();
        let e = store.add_child(&d, NodeKind::Note).unwrap();
        assert_eq!(store.node(&e).unwrap().level, 5);
        assert_eq!(store.node(&e).unwrap().display_level(), 3);

        store.reparent_node(&c, &root).unwrap();
        assert_eq!(store.node(&c).unwrap().level, 1);
        assert_eq!(store.node(&d).unwrap().level, 2);
        assert_eq!(store.node(&e).unwrap().level, 3);
        assert_eq!(incoming_hierarchy(&store, &c), 1);
        assert_eq!(store.index().parent_of(&c), Some(&root));
    }

    #[test]
    fn reparent_into_group_moves_subtree_into_interior() {
        let (mut store, root) = store();
        let group = store.add_child(&root, NodeKind::Group).unwrap();
        let a = store.add_child(&root, NodeKind::Folder).unwrap();
        let b = store.add_child(&a, NodeKind::Folder).unwrap();
        let offset_before = {
            let a = store.node(&a).unwrap().position;
            let b = store.node(&b).unwrap().position;
            (b.x - a.x, b.y - a.y)
        };

        store.reparent_node(&a, &group).unwrap();

        let group_pos = store.node(&group).unwrap().position;
        let a_pos = store.node(&a).unwrap().position;
        assert_eq!(
            a_pos,
            Point::new(
                group_pos.x + GROUP_PADDING_X,
                group_pos.y + GROUP_PADDING_TOP + GROUP_HEADER_HEIGHT
            )
        );
        let b_pos = store.node(&b).unwrap().position;
        assert_eq!((b_pos.x - a_pos.x, b_pos.y - a_pos.y), offset_before);
        assert_eq!(store.node(&a).unwrap().level, 2);
        assert_eq!(store.node(&b).unwrap().level, 3);
    }

    #[test]
    fn connect_adds_pointer_edge_outside_hierarchy() {
        let (mut store, root) = store();
        let a = store.add_child(&root, NodeKind::Folder).unwrap();
        let b = store.add_child(&root, NodeKind::Folder).unwrap();
        store.connect(&a, &b).unwrap();

        assert_eq!(store.index().parent_of(&b), Some(&root));
        assert_eq!(
            store.connect(&a, &b),
            Err(EditError::DuplicateEdge {
                from: a.clone(),
                to: b.clone()
            })
        );
        assert_eq!(store.connect(&a, &a), Err(EditError::SelfConnection(a.clone())));
    }

    #[test]
    fn converting_to_pointer_restyles_incoming_edge() {
        let (mut store, root) = store();
        let a = store.add_child(&root, NodeKind::Folder).unwrap();

        assert!(store.convert_kind(&a, NodeKind::Pointer).unwrap());
        let style = |store: &GraphStore| {
            store
                .graph()
                .edges()
                .iter()
                .find(|edge| edge.target == a)
                .map(|edge| edge.style)
        };
        assert_eq!(style(&store), Some(EdgeStyle::Pointer));
        assert_eq!(store.index().parent_of(&a), Some(&root));

        assert!(store.convert_kind(&a, NodeKind::Folder).unwrap());
        assert_eq!(style(&store), Some(EdgeStyle::Straight));

        assert!(store.undo());
        assert_eq!(style(&store), Some(EdgeStyle::Pointer));
    }

    #[test]
    fn converting_to_group_clears_content() {
        let (mut store, root) = store();
        let a = store.add_child(&root, NodeKind::Note).unwrap();
        store.update_node(&a, NodePatch::content("<p>x</p>")).unwrap();
        store.convert_kind(&a, NodeKind::Group).unwrap();
        assert!(store.node(&a).unwrap().content.is_empty());
        assert_eq!(
            store.convert_kind(&a, NodeKind::Submap),
            Err(EditError::SubmapConversionRequired(a.clone()))
        );
    }

    fn drawn_origin(store: &GraphStore, group: &NodeId) -> Point {
        LayoutEngine::compute(store.graph(), store.index())
            .group_bounds(group)
            .unwrap()
            .origin()
    }

    #[test]
    fn dragging_a_group_translates_its_subtree() {
        let (mut store, root) = store();
        let group = store.add_child(&root, NodeKind::Group).unwrap();
        let inner = store.add_child(&group, NodeKind::Note).unwrap();
        let drawn = drawn_origin(&store, &group);
        let inner_before = store.node(&inner).unwrap().position;

        store.drag_start(&group).unwrap();
        store.drag_move(&group, drawn.translate(30.0, -10.0)).unwrap();

        assert_eq!(
            store.node(&inner).unwrap().position,
            inner_before.translate(30.0, -10.0)
        );
        assert_eq!(drawn_origin(&store, &group), drawn.translate(30.0, -10.0));
        assert!(store.undo());
        assert_eq!(store.node(&inner).unwrap().position, inner_before);
    }

    #[test]
    fn group_with_a_child_above_and_left_does_not_jump() {
        let (mut store, root) = store();
        let group = store.add_child(&root, NodeKind::Group).unwrap();
        let inner = store.add_child(&group, NodeKind::Note).unwrap();
        let anchor = store.node(&group).unwrap().position;
        store.drag_start(&inner).unwrap();
        store
            .drag_move(&inner, anchor.translate(-120.0, -150.0))
            .unwrap();

        let drawn = drawn_origin(&store, &group);
        assert_ne!(drawn, store.node(&group).unwrap().position);
        let inner_before = store.node(&inner).unwrap().position;
        let group_before = store.node(&group).unwrap().position;

        store.drag_start(&group).unwrap();
        store.drag_move(&group, drawn.translate(10.0, 10.0)).unwrap();

        assert_eq!(
            store.node(&inner).unwrap().position,
            inner_before.translate(10.0, 10.0)
        );
        assert_eq!(
            store.node(&group).unwrap().position,
            group_before.translate(10.0, 10.0)
        );
        assert_eq!(drawn_origin(&store, &group), drawn.translate(10.0, 10.0));
    }

    #[test]
    fn drop_inside_group_reparents_in_one_history_step() {
        let (mut store, root) = store();
        let group = store.add_child(&root, NodeKind::Group).unwrap();
        let loose = store.add_child(&root, NodeKind::Note).unwrap();
        let before = store.graph().clone();

        let group_pos = store.node(&group).unwrap().position;
        store.drag_start(&loose).unwrap();
        store
            .drag_move(&loose, group_pos.translate(GROUP_PADDING_X + 5.0, GROUP_PADDING_TOP + GROUP_HEADER_HEIGHT + 5.0))
            .unwrap();
        assert_eq!(store.drag_end(&loose).unwrap(), Some(group.clone()));
        assert_eq!(store.index().parent_of(&loose), Some(&group));
        assert_eq!(store.node(&loose).unwrap().level, 2);

        assert!(store.undo());
        assert_eq!(store.graph(), &before);
    }

    #[test]
    fn drop_outside_any_group_keeps_parent() {
        let (mut store, root) = store();
        let loose = store.add_child(&root, NodeKind::Note).unwrap();
        store.drag_start(&loose).unwrap();
        store.drag_move(&loose, Point::new(-2000.0, -2000.0)).unwrap();
        assert_eq!(store.drag_end(&loose).unwrap(), None);
        assert_eq!(store.index().parent_of(&loose), Some(&root));
    }

    #[test]
    fn selection_and_measurement_do_not_dirty() {
        let mut store = GraphStore::default();
        let root = store.root_id().cloned().unwrap();
        store.select(Some(root.clone()));
        store.set_measured_size(&root, Size::new(210.0, 60.0)).unwrap();
        assert_eq!(store.selection(), Some(&root));
        assert!(!store.document().dirty);
        assert!(store.take_effects().is_empty());
        assert!(!store.history().can_undo());
    }

    #[test]
    fn loading_recomputes_levels_from_hierarchy() {
        let root = Node::root();
        let mut child = Node::new(NodeId::from("c"), NodeKind::Folder, Point::default(), 3);
        child.title = "stale".to_string();
        let graph = Graph::from_parts(
            vec![root.clone(), child],
            vec![Edge::hierarchy(root.id.clone(), NodeId::from("c"))],
        );
        let store = GraphStore::from_document(
            Document::with_graph(None, "loaded", graph),
            DEFAULT_HISTORY_CAPACITY,
        );
        assert_eq!(store.node(&NodeId::from("c")).unwrap().level, 1);
        assert!(!store.document().dirty);
    }
}
