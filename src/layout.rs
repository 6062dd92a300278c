use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::document::{
    DocumentId, EdgeKind, EdgeStyle, Graph, Node, NodeId, NodeKind, Point, Rect, Size,
};
use crate::hierarchy::HierarchyIndex;
use crate::*;

/// A node as the renderer should draw it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub id: NodeId,
    pub kind: NodeKind,
    pub title: String,
    pub content: String,
    pub overview: String,
    /// For groups this is the computed anchor, not the stored position.
    pub position: Point,
    pub size: Size,
    pub level: u32,
    pub display_level: u32,
    pub color: String,
    pub collapsed: bool,
    pub has_children: bool,
    pub has_collapsible_descendants: bool,
    pub all_descendants_collapsed: bool,
    pub has_notes: bool,
    pub has_overview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submap_ref: Option<DocumentId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeView {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    pub style: EdgeStyle,
    pub color: String,
}

/// Everything the renderer pulls for one frame. Built from scratch by
/// [`LayoutEngine::compute`], so it can never disagree with the graph it came from.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    nodes: Vec<NodeView>,
    edges: Vec<EdgeView>,
    #[serde(skip)]
    hidden: HashSet<NodeId>,
    #[serde(skip)]
    colors: HashMap<NodeId, String>,
    #[serde(skip)]
    group_bounds: HashMap<NodeId, Rect>,
}

impl ViewState {
    pub fn visible_nodes(&self) -> &[NodeView] {
        &self.nodes
    }

    pub fn visible_edges(&self) -> &[EdgeView] {
        &self.edges
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeView> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    pub fn node_color(&self, id: &NodeId) -> Option<&str> {
        self.colors.get(id).map(String::as_str)
    }

    pub fn group_bounds(&self, id: &NodeId) -> Option<Rect> {
        self.group_bounds.get(id).copied()
    }

    pub fn is_hidden(&self, id: &NodeId) -> bool {
        self.hidden.contains(id)
    }

    pub fn hidden(&self) -> &HashSet<NodeId> {
        &self.hidden
    }

    /// Innermost visible group whose box strictly contains `point`, skipping
    /// `dragged` and everything below it.
    pub fn group_at(
        &self,
        point: Point,
        dragged: &NodeId,
        index: &HierarchyIndex,
    ) -> Option<&NodeId> {
        self.group_bounds
            .iter()
            .filter(|(group, bounds)| {
                *group != dragged
                    && !self.hidden.contains(*group)
                    && !index.is_descendant(dragged, group)
                    && bounds.contains(point)
            })
            .min_by(|(_, a), (_, b)| a.area().total_cmp(&b.area()))
            .map(|(group, _)| group)
    }
}

pub struct LayoutEngine;

impl LayoutEngine {
    pub fn compute(graph: &Graph, index: &HierarchyIndex) -> ViewState {
        let hidden = hidden_nodes(graph, index);
        let colors = branch_colors(graph, index);
        let group_bounds = group_bounds(graph, index, &hidden);
        let collapsible = collapsible_ancestors(graph, index);

        let nodes = graph
            .nodes()
            .filter(|node| !hidden.contains(&node.id))
            .map(|node| {
                let (position, size) = match group_bounds.get(&node.id) {
                    Some(bounds) => (bounds.origin(), Size::new(bounds.width(), bounds.height())),
                    None => (node.position, node.size()),
                };
                let has_collapsible_descendants = collapsible.contains(&node.id);
                NodeView {
                    id: node.id.clone(),
                    kind: node.kind,
                    title: node.title.clone(),
                    content: node.content.clone(),
                    overview: node.overview.clone(),
                    position,
                    size,
                    level: node.level,
                    display_level: node.display_level(),
                    color: colors.get(&node.id).cloned().unwrap_or_default(),
                    collapsed: node.collapsed,
                    has_children: index.has_children(&node.id),
                    has_collapsible_descendants,
                    all_descendants_collapsed: has_collapsible_descendants
                        && all_descendants_collapsed(graph, index, &node.id),
                    has_notes: node.has_notes(),
                    has_overview: node.has_overview(),
                    submap_ref: node.submap_ref.clone(),
                }
            })
            .collect();

        let edges = graph
            .edges()
            .iter()
            .filter(|edge| !hidden.contains(&edge.target) && !hidden.contains(&edge.source))
            .map(|edge| EdgeView {
                id: edge.id.clone(),
                source: edge.source.clone(),
                target: edge.target.clone(),
                kind: edge.kind,
                style: edge.style,
                color: colors.get(&edge.target).cloned().unwrap_or_default(),
            })
            .collect();

        ViewState {
            nodes,
            edges,
            hidden,
            colors,
            group_bounds,
        }
    }
}

/// Strict descendants of every collapsed node.
fn hidden_nodes(graph: &Graph, index: &HierarchyIndex) -> HashSet<NodeId> {
    let mut hidden = HashSet::new();
    for node in graph.nodes().filter(|node| node.collapsed) {
        if hidden.contains(&node.id) {
            // already covered by a collapsed ancestor
            continue;
        }
        hidden.extend(index.descendants(&node.id));
    }
    hidden
}

fn branch_colors(graph: &Graph, index: &HierarchyIndex) -> HashMap<NodeId, String> {
    let mut colors = HashMap::new();
    let Some(root) = index.root_id() else {
        return colors;
    };

    let mut branches: HashMap<&NodeId, &str> = HashMap::new();
    for (slot, node) in graph
        .nodes()
        .filter(|node| index.parent_of(&node.id) == Some(root))
        .enumerate()
    {
        branches.insert(&node.id, BRANCH_PALETTE[slot % BRANCH_PALETTE.len()]);
    }

    for node in graph.nodes() {
        let color = if &node.id == root {
            ROOT_COLOR
        } else {
            index
                .branch_of(&node.id)
                .and_then(|branch| branches.get(branch).copied())
                .unwrap_or(BRANCH_PALETTE[0])
        };
        colors.insert(node.id.clone(), color.to_string());
    }
    colors
}

/// Nodes that have some strict descendant with children of its own.
fn collapsible_ancestors(graph: &Graph, index: &HierarchyIndex) -> HashSet<NodeId> {
    let mut result = HashSet::new();
    for node in graph.nodes().filter(|node| index.has_children(&node.id)) {
        for ancestor in index.ancestors(&node.id) {
            if !result.insert(ancestor) {
                break;
            }
        }
    }
    result
}

fn all_descendants_collapsed(graph: &Graph, index: &HierarchyIndex, id: &NodeId) -> bool {
    index
        .descendants(id)
        .iter()
        .filter(|descendant| index.has_children(descendant))
        .all(|descendant| graph.node(descendant).is_some_and(|node| node.collapsed))
}

/// Computes every group's box, innermost groups first so an enclosing group
/// can treat a nested group's finished box as a single unit.
fn group_bounds(
    graph: &Graph,
    index: &HierarchyIndex,
    hidden: &HashSet<NodeId>,
) -> HashMap<NodeId, Rect> {
    let mut groups: Vec<(&Node, usize)> = graph
        .nodes()
        .filter(|node| node.kind == NodeKind::Group)
        .map(|node| {
            let nesting = index
                .ancestors(&node.id)
                .iter()
                .filter(|ancestor| {
                    graph
                        .node(ancestor)
                        .is_some_and(|ancestor| ancestor.kind == NodeKind::Group)
                })
                .count();
            (node, nesting)
        })
        .collect();
    groups.sort_by(|a, b| b.1.cmp(&a.1));

    let mut bounds = HashMap::new();
    for (group, _) in groups {
        let content = content_box(graph, index, hidden, &bounds, &group.id);
        bounds.insert(group.id.clone(), pad_group(group, content));
    }
    bounds
}

fn content_box(
    graph: &Graph,
    index: &HierarchyIndex,
    hidden: &HashSet<NodeId>,
    computed: &HashMap<NodeId, Rect>,
    group: &NodeId,
) -> Option<Rect> {
    let mut content: Option<Rect> = None;
    let mut stack: Vec<&NodeId> = index.children_of(group).iter().collect();
    let mut seen = HashSet::new();
    while let Some(current) = stack.pop() {
        if hidden.contains(current) || !seen.insert(current) {
            continue;
        }
        let Some(node) = graph.node(current) else {
            continue;
        };
        let rect = if node.kind == NodeKind::Group {
            // nested group: its own box stands in for its whole subtree
            computed.get(current).copied().unwrap_or_else(|| node.bounds())
        } else {
            stack.extend(index.children_of(current));
            node.bounds()
        };
        content = Some(match content {
            Some(existing) => existing.union(rect),
            None => rect,
        });
    }
    content
}

fn pad_group(group: &Node, content: Option<Rect>) -> Rect {
    let min_size = Size::new(GROUP_MIN_WIDTH, GROUP_MIN_HEIGHT);
    let Some(content) = content else {
        return Rect::from_origin_size(group.position, min_size);
    };

    let mut top = GROUP_PADDING_TOP;
    if !group.title.trim().is_empty() {
        top += GROUP_HEADER_HEIGHT;
    }
    let min_x = group.position.x.min(content.min_x - GROUP_PADDING_X);
    let min_y = group.position.y.min(content.min_y - top);
    let max_x = content.max_x + GROUP_PADDING_X;
    let max_y = content.max_y + GROUP_PADDING_BOTTOM;

    Rect::from_origin_size(
        Point::new(min_x, min_y),
        Size::new(
            (max_x - min_x).max(min_size.width),
            (max_y - min_y).max(min_size.height),
        ),
    )
}
