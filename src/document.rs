use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn generate_root() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(format!("root-{}", &raw[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn translate(self, dx: f32, dy: f32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned box in logical canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rect {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Rect {
    pub fn from_origin_size(origin: Point, size: Size) -> Self {
        Self {
            min_x: origin.x,
            min_y: origin.y,
            max_x: origin.x + size.width,
            max_y: origin.y + size.height,
        }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.min_x, self.min_y)
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn union(self, other: Rect) -> Rect {
        Rect {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x > self.min_x && point.x < self.max_x && point.y > self.min_y && point.y < self.max_y
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Folder,
    Group,
    Note,
    Pointer,
    Submap,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Folder => "folder",
            NodeKind::Group => "group",
            NodeKind::Note => "note",
            NodeKind::Pointer => "pointer",
            NodeKind::Submap => "submap",
        }
    }

    /// Notes and pointers are leaves; a submap's children live in its own document.
    pub fn accepts_children(&self) -> bool {
        matches!(self, NodeKind::Folder | NodeKind::Group)
    }
}

/// Structural role of an edge. Only hierarchy edges take part in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Hierarchy,
    Pointer,
}

/// How the renderer draws an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeStyle {
    #[default]
    Straight,
    Pointer,
}

impl EdgeStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeStyle::Straight => "straight",
            EdgeStyle::Pointer => "pointer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub position: Point,
    pub kind: NodeKind,
    pub level: u32,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submap_ref: Option<DocumentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measured: Option<Size>,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind, position: Point, level: u32) -> Self {
        Self {
            id,
            position,
            kind,
            level,
            title: DEFAULT_NODE_TITLE.to_string(),
            content: String::new(),
            overview: String::new(),
            collapsed: false,
            submap_ref: None,
            measured: None,
        }
    }

    pub fn root() -> Self {
        let mut node = Self::new(NodeId::generate_root(), NodeKind::Folder, ROOT_ORIGIN, 0);
        node.title = ROOT_TITLE.to_string();
        node
    }

    pub fn is_root(&self) -> bool {
        self.level == 0
    }

    pub fn display_level(&self) -> u32 {
        self.level.min(MAX_DISPLAY_LEVEL)
    }

    pub fn size(&self) -> Size {
        self.measured.unwrap_or_else(|| {
            Size::new(
                LEVEL_WIDTHS[self.display_level() as usize],
                DEFAULT_NODE_HEIGHT,
            )
        })
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_origin_size(self.position, self.size())
    }

    pub fn center(&self) -> Point {
        let size = self.size();
        self.position.translate(size.width / 2.0, size.height / 2.0)
    }

    pub fn has_notes(&self) -> bool {
        let trimmed = self.content.trim();
        !trimmed.is_empty() && trimmed != "<p></p>"
    }

    pub fn has_overview(&self) -> bool {
        !self.overview.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    #[serde(default)]
    pub style: EdgeStyle,
}

impl Edge {
    pub fn hierarchy(source: NodeId, target: NodeId) -> Self {
        Self {
            id: format!("e-{source}-{target}"),
            source,
            target,
            kind: EdgeKind::Hierarchy,
            style: EdgeStyle::Straight,
        }
    }

    pub fn pointer(source: NodeId, target: NodeId) -> Self {
        Self {
            id: format!("p-{source}-{target}"),
            source,
            target,
            kind: EdgeKind::Pointer,
            style: EdgeStyle::Pointer,
        }
    }

    pub fn is_hierarchy(&self) -> bool {
        self.kind == EdgeKind::Hierarchy
    }

    pub fn touches(&self, id: &NodeId) -> bool {
        &self.source == id || &self.target == id
    }
}

/// Node and edge collections of one document.
///
/// Nodes sit behind `Arc` so cloning a graph for history only copies pointers;
/// mutation goes through `Arc::make_mut`, which copies just the touched node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    nodes: HashMap<NodeId, Arc<Node>>,
    order: Vec<NodeId>,
    edges: Vec<Edge>,
}

impl Graph {
    pub fn with_root() -> Self {
        let mut graph = Self::default();
        graph.insert_node(Node::root());
        graph
    }

    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let mut graph = Self::default();
        for node in nodes {
            graph.insert_node(node);
        }
        graph.edges = edges;
        graph
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id).map(Arc::as_ref)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id).map(Arc::make_mut)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.order.iter().filter_map(|id| self.node(id))
    }

    pub fn node_ids(&self) -> &[NodeId] {
        &self.order
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edges_mut(&mut self) -> &mut Vec<Edge> {
        &mut self.edges
    }

    pub fn insert_node(&mut self, node: Node) {
        let id = node.id.clone();
        if self.nodes.insert(id.clone(), Arc::new(node)).is_none() {
            self.order.push(id);
        }
    }

    /// Removes the node and every edge touching it, in both directions.
    pub fn remove_node(&mut self, id: &NodeId) -> bool {
        let existed = self.nodes.remove(id).is_some();
        if existed {
            self.order.retain(|existing| existing != id);
            self.edges.retain(|edge| !edge.touches(id));
        }
        existed
    }

    pub fn push_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub fn incoming_hierarchy_edge_mut(&mut self, target: &NodeId) -> Option<&mut Edge> {
        self.edges
            .iter_mut()
            .find(|edge| edge.is_hierarchy() && &edge.target == target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error,
}

impl SaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveStatus::Idle => "idle",
            SaveStatus::Saving => "saving",
            SaveStatus::Saved => "saved",
            SaveStatus::Error => "error",
        }
    }
}

/// Where a submap document was split off from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmapOrigin {
    pub parent_document_id: Option<DocumentId>,
    pub parent_node_id: NodeId,
}

#[derive(Debug, Clone)]
pub struct Document {
    /// Assigned by the backend on first save.
    pub id: Option<DocumentId>,
    pub name: String,
    pub graph: Graph,
    pub origin: Option<SubmapOrigin>,
    pub dirty: bool,
    pub save_status: SaveStatus,
}

impl Document {
    pub fn new() -> Self {
        Self::with_graph(None, UNTITLED_DOCUMENT, Graph::with_root())
    }

    pub fn with_graph(id: Option<DocumentId>, name: &str, graph: Graph) -> Self {
        Self {
            id,
            name: name.to_string(),
            graph,
            origin: None,
            dirty: false,
            save_status: SaveStatus::Idle,
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// One step of the path taken into nested submaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breadcrumb {
    pub document_id: DocumentId,
    pub document_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_node_drops_touching_edges_in_both_directions() {
        let mut graph = Graph::with_root();
        let root = graph.node_ids()[0].clone();
        let child = Node::new(NodeId::from("child"), NodeKind::Folder, Point::new(0.0, 0.0), 1);
        let other = Node::new(NodeId::from("other"), NodeKind::Note, Point::new(0.0, 0.0), 1);
        graph.insert_node(child);
        graph.insert_node(other);
        graph.push_edge(Edge::hierarchy(root.clone(), NodeId::from("child")));
        graph.push_edge(Edge::hierarchy(root.clone(), NodeId::from("other")));
        graph.push_edge(Edge::pointer(NodeId::from("other"), NodeId::from("child")));

        assert!(graph.remove_node(&NodeId::from("child")));
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.edges().len(), 1);
        assert!(!graph.remove_node(&NodeId::from("child")));
    }

    #[test]
    fn cloned_graph_is_unaffected_by_later_mutation() {
        let mut graph = Graph::with_root();
        let root = graph.node_ids()[0].clone();
        let snapshot = graph.clone();

        graph.node_mut(&root).unwrap().title = "Renamed".to_string();

        assert_eq!(snapshot.node(&root).unwrap().title, ROOT_TITLE);
        assert_ne!(snapshot, graph);
    }

    #[test]
    fn display_level_is_capped_and_sizes_follow_it() {
        let node = Node::new(NodeId::from("deep"), NodeKind::Folder, Point::default(), 7);
        assert_eq!(node.display_level(), 3);
        assert_eq!(node.size().width, LEVEL_WIDTHS[3]);
    }

    #[test]
    fn empty_paragraph_does_not_count_as_notes() {
        let mut node = Node::new(NodeId::from("n"), NodeKind::Note, Point::default(), 1);
        node.content = "<p></p>".to_string();
        assert!(!node.has_notes());
        node.content = "<p>hello</p>".to_string();
        assert!(node.has_notes());
    }
}
