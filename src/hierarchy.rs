use std::collections::{HashMap, HashSet};

use crate::document::{Graph, NodeId};

/// Parent/child lookups derived from the hierarchy edges of a graph.
///
/// Pointer edges and edges that reference missing nodes are ignored. The
/// index is rebuilt from scratch whenever edges change, so it is never
/// consulted in a state older than the graph it was built from.
#[derive(Debug, Clone, Default)]
pub struct HierarchyIndex {
    parents: HashMap<NodeId, NodeId>,
    children: HashMap<NodeId, Vec<NodeId>>,
    root: Option<NodeId>,
}

impl HierarchyIndex {
    pub fn build(graph: &Graph) -> Self {
        let mut parents = HashMap::new();
        let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

        for edge in graph.edges().iter().filter(|edge| edge.is_hierarchy()) {
            if !graph.contains(&edge.source) || !graph.contains(&edge.target) {
                continue;
            }
            if parents.contains_key(&edge.target) {
                continue;
            }
            parents.insert(edge.target.clone(), edge.source.clone());
            children
                .entry(edge.source.clone())
                .or_default()
                .push(edge.target.clone());
        }

        let root = graph
            .nodes()
            .find(|node| node.is_root())
            .map(|node| node.id.clone());

        Self {
            parents,
            children,
            root,
        }
    }

    pub fn root_id(&self) -> Option<&NodeId> {
        self.root.as_ref()
    }

    pub fn parent_of(&self, id: &NodeId) -> Option<&NodeId> {
        self.parents.get(id)
    }

    /// Children in edge creation order.
    pub fn children_of(&self, id: &NodeId) -> &[NodeId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_children(&self, id: &NodeId) -> bool {
        !self.children_of(id).is_empty()
    }

    /// True when `candidate` sits strictly below `ancestor`.
    pub fn is_descendant(&self, ancestor: &NodeId, candidate: &NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut current = self.parent_of(candidate);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            if !seen.insert(parent) {
                return false;
            }
            current = self.parent_of(parent);
        }
        false
    }

    /// Strict descendants in depth-first pre-order.
    pub fn descendants(&self, id: &NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(id.clone());
        let mut stack: Vec<&NodeId> = self.children_of(id).iter().rev().collect();
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            result.push(current.clone());
            stack.extend(self.children_of(current).iter().rev());
        }
        result
    }

    /// Strict descendants paired with their distance below `id`.
    pub fn descendants_with_depth(&self, id: &NodeId) -> Vec<(NodeId, u32)> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(id.clone());
        let mut stack: Vec<(&NodeId, u32)> =
            self.children_of(id).iter().rev().map(|child| (child, 1)).collect();
        while let Some((current, depth)) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            result.push((current.clone(), depth));
            stack.extend(
                self.children_of(current)
                    .iter()
                    .rev()
                    .map(|child| (child, depth + 1)),
            );
        }
        result
    }

    /// Ancestors from the direct parent up to the root.
    pub fn ancestors(&self, id: &NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut current = self.parent_of(id);
        while let Some(parent) = current {
            if result.contains(parent) {
                break;
            }
            result.push(parent.clone());
            current = self.parent_of(parent);
        }
        result
    }

    /// The ancestor (or the node itself) whose parent is the root.
    pub fn branch_of<'a>(&'a self, id: &'a NodeId) -> Option<&'a NodeId> {
        let root = self.root.as_ref()?;
        let mut current = id;
        let mut steps = 0;
        loop {
            let parent = self.parent_of(current)?;
            if parent == root {
                return Some(current);
            }
            current = parent;
            steps += 1;
            if steps > self.parents.len() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Edge, Node, NodeKind, Point};

    fn node(id: &str, level: u32) -> Node {
        Node::new(NodeId::from(id), NodeKind::Folder, Point::default(), level)
    }

    fn sample() -> Graph {
        Graph::from_parts(
            vec![node("r", 0), node("a", 1), node("b", 2), node("c", 2), node("d", 1)],
            vec![
                Edge::hierarchy("r".into(), "a".into()),
                Edge::hierarchy("a".into(), "b".into()),
                Edge::hierarchy("a".into(), "c".into()),
                Edge::hierarchy("r".into(), "d".into()),
                Edge::pointer("d".into(), "b".into()),
            ],
        )
    }

    #[test]
    fn derives_parents_children_and_root() {
        let index = HierarchyIndex::build(&sample());
        assert_eq!(index.root_id(), Some(&NodeId::from("r")));
        assert_eq!(index.parent_of(&"b".into()), Some(&NodeId::from("a")));
        assert_eq!(
            index.children_of(&"a".into()),
            &[NodeId::from("b"), NodeId::from("c")]
        );
        assert!(index.children_of(&"b".into()).is_empty());
    }

    #[test]
    fn pointer_edges_do_not_create_parents() {
        let index = HierarchyIndex::build(&sample());
        assert!(!index.children_of(&"d".into()).contains(&NodeId::from("b")));
        assert!(!index.is_descendant(&"d".into(), &"b".into()));
    }

    #[test]
    fn descendant_queries_are_strict() {
        let index = HierarchyIndex::build(&sample());
        assert!(index.is_descendant(&"r".into(), &"c".into()));
        assert!(!index.is_descendant(&"a".into(), &"a".into()));
        assert_eq!(
            index.descendants(&"r".into()),
            vec![
                NodeId::from("a"),
                NodeId::from("b"),
                NodeId::from("c"),
                NodeId::from("d")
            ]
        );
        assert_eq!(
            index.descendants_with_depth(&"a".into()),
            vec![(NodeId::from("b"), 1), (NodeId::from("c"), 1)]
        );
    }

    #[test]
    fn branch_resolves_to_the_level_one_ancestor() {
        let index = HierarchyIndex::build(&sample());
        assert_eq!(index.branch_of(&"c".into()), Some(&NodeId::from("a")));
        assert_eq!(index.branch_of(&"d".into()), Some(&NodeId::from("d")));
        assert_eq!(index.branch_of(&"r".into()), None);
    }

    #[test]
    fn dangling_edges_are_ignored() {
        let graph = Graph::from_parts(
            vec![node("r", 0)],
            vec![Edge::hierarchy("r".into(), "ghost".into())],
        );
        let index = HierarchyIndex::build(&graph);
        assert!(!index.has_children(&"r".into()));
    }
}
