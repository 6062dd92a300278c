use std::collections::VecDeque;

use crate::document::Graph;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Bounded undo/redo stacks of whole-graph snapshots.
///
/// A snapshot is a clone of [`Graph`], which shares unchanged nodes with the
/// live graph, so pushing one costs pointer copies rather than a deep copy.
#[derive(Debug, Clone)]
pub struct HistoryManager {
    past: VecDeque<Graph>,
    future: VecDeque<Graph>,
    capacity: usize,
}

impl HistoryManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            past: VecDeque::new(),
            future: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.past.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.future.len()
    }

    /// Records `current` as the state to return to; a fresh edit forfeits redo.
    pub fn push_snapshot(&mut self, current: &Graph) {
        self.past.push_back(current.clone());
        while self.past.len() > self.capacity {
            self.past.pop_front();
        }
        self.future.clear();
    }

    /// Swaps `live` with the most recent snapshot. Returns false when there is nothing to undo.
    pub fn undo(&mut self, live: &mut Graph) -> bool {
        let Some(previous) = self.past.pop_back() else {
            return false;
        };
        let current = std::mem::replace(live, previous);
        self.future.push_front(current);
        self.future.truncate(self.capacity);
        true
    }

    pub fn redo(&mut self, live: &mut Graph) -> bool {
        let Some(next) = self.future.pop_front() else {
            return false;
        };
        let current = std::mem::replace(live, next);
        self.past.push_back(current);
        while self.past.len() > self.capacity {
            self.past.pop_front();
        }
        true
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Node, NodeId, NodeKind, Point};

    fn graph_with(title: &str) -> Graph {
        let mut node = Node::new(NodeId::from("r"), NodeKind::Folder, Point::default(), 0);
        node.title = title.to_string();
        Graph::from_parts(vec![node], Vec::new())
    }

    #[test]
    fn undo_on_empty_history_is_a_noop() {
        let mut history = HistoryManager::default();
        let mut live = graph_with("a");
        assert!(!history.undo(&mut live));
        assert_eq!(live, graph_with("a"));
    }

    #[test]
    fn undo_then_redo_restores_both_states() {
        let mut history = HistoryManager::default();
        let mut live = graph_with("before");
        history.push_snapshot(&live);
        live = graph_with("after");

        assert!(history.undo(&mut live));
        assert_eq!(live, graph_with("before"));
        assert!(history.can_redo());

        assert!(history.redo(&mut live));
        assert_eq!(live, graph_with("after"));
        assert!(!history.can_redo());
    }

    #[test]
    fn fresh_snapshot_clears_redo() {
        let mut history = HistoryManager::default();
        let mut live = graph_with("one");
        history.push_snapshot(&live);
        live = graph_with("two");
        history.undo(&mut live);
        assert_eq!(history.redo_depth(), 1);

        history.push_snapshot(&live);
        assert_eq!(history.redo_depth(), 0);
    }

    #[test]
    fn past_is_truncated_to_capacity() {
        let mut history = HistoryManager::new(3);
        let mut live = graph_with("0");
        for step in 1..=5 {
            history.push_snapshot(&live);
            live = graph_with(&step.to_string());
        }
        assert_eq!(history.undo_depth(), 3);

        while history.undo(&mut live) {}
        assert_eq!(live, graph_with("2"));
    }
}
