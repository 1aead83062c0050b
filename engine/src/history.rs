//! FILENAME: engine/src/history.rs
//! PURPOSE: Branching undo/redo history for a spreadsheet engine.
//! CONTEXT: Rather than the linear undo/redo stacks a text editor uses,
//! entries form a tree: undoing and then making a new change does not
//! discard the undone branch — it becomes a sibling, reachable again by
//! navigating to it directly. Every node holds a full, independent clone of
//! the engine's internal state (grid + dependency graph) rather than a diff,
//! trading memory for a history that can never be corrupted by a missed
//! inverse operation.

use std::collections::HashMap;

pub type SnapshotId = u64;

/// One point in the history tree: a full clone of engine state plus the
/// tree-linkage needed to navigate to it.
#[derive(Debug, Clone)]
pub struct Snapshot<S> {
    pub id: SnapshotId,
    pub state: S,
    pub description: String,
    /// Logical sequence number, not wall-clock time — callers that need a
    /// real timestamp attach one via the engine's own state metadata.
    pub seq: u64,
    pub parent: Option<SnapshotId>,
    pub children: Vec<SnapshotId>,
}

/// A tree of state snapshots with a "current" pointer, supporting undo
/// (step to parent), redo (step to the most recently visited child), and
/// branching (a new change recorded while not at the latest leaf creates a
/// new sibling branch rather than discarding anything).
#[derive(Debug, Clone)]
pub struct HistoryManager<S: Clone> {
    nodes: HashMap<SnapshotId, Snapshot<S>>,
    root: SnapshotId,
    current: SnapshotId,
    next_id: SnapshotId,
    next_seq: u64,
    max_size: usize,
}

impl<S: Clone> HistoryManager<S> {
    /// Starts a new history rooted at `initial`, the engine's state at the
    /// moment history tracking began.
    pub fn new(initial: S, max_size: usize) -> Self {
        let root_node = Snapshot {
            id: 0,
            state: initial,
            description: "initial state".to_string(),
            seq: 0,
            parent: None,
            children: Vec::new(),
        };
        let mut nodes = HashMap::new();
        nodes.insert(0, root_node);
        HistoryManager {
            nodes,
            root: 0,
            current: 0,
            next_id: 1,
            next_seq: 1,
            max_size: max_size.max(1),
        }
    }

    /// Records `state` as a new child of the current node and moves current
    /// to it. This is how a history branch is created: if `current` already
    /// has children (because the user undid past this point before making a
    /// new change), the new node becomes an additional sibling rather than
    /// overwriting the existing branch.
    pub fn record(&mut self, state: S, description: impl Into<String>) -> SnapshotId {
        let id = self.next_id;
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        let node = Snapshot {
            id,
            state,
            description: description.into(),
            seq,
            parent: Some(self.current),
            children: Vec::new(),
        };
        self.nodes.insert(id, node);
        if let Some(parent) = self.nodes.get_mut(&self.current) {
            parent.children.push(id);
        }
        self.current = id;
        self.prune();
        id
    }

    /// Whether there is a parent to step back to.
    pub fn can_undo(&self) -> bool {
        self.nodes.get(&self.current).and_then(|n| n.parent).is_some()
    }

    /// Whether the current node has at least one child to step forward to.
    pub fn can_redo(&self) -> bool {
        self.nodes.get(&self.current).map(|n| !n.children.is_empty()).unwrap_or(false)
    }

    /// Moves current to its parent, returning the parent's state.
    pub fn undo(&mut self) -> Option<&S> {
        let parent = self.nodes.get(&self.current)?.parent?;
        self.current = parent;
        self.nodes.get(&self.current).map(|n| &n.state)
    }

    /// Moves current to its most recently created child, returning that
    /// child's state.
    pub fn redo(&mut self) -> Option<&S> {
        let child = self.nodes.get(&self.current)?.children.last().copied()?;
        self.current = child;
        self.nodes.get(&self.current).map(|n| &n.state)
    }

    /// Moves current directly to `id`, anywhere in the tree, returning its
    /// state. Used to jump to a previously-abandoned branch.
    pub fn goto(&mut self, id: SnapshotId) -> Option<&S> {
        if !self.nodes.contains_key(&id) {
            return None;
        }
        self.current = id;
        self.nodes.get(&self.current).map(|n| &n.state)
    }

    pub fn current_state(&self) -> &S {
        &self.nodes[&self.current].state
    }

    pub fn current_id(&self) -> SnapshotId {
        self.current
    }

    pub fn undo_description(&self) -> Option<&str> {
        let parent = self.nodes.get(&self.current)?.parent?;
        self.nodes.get(&parent).map(|n| n.description.as_str())
    }

    pub fn redo_description(&self) -> Option<&str> {
        let child = self.nodes.get(&self.current)?.children.last().copied()?;
        self.nodes.get(&child).map(|n| n.description.as_str())
    }

    /// Every direct child of the current node, oldest first, as
    /// `(id, description)` pairs — the set of branches redo could choose
    /// between if more than one sibling change was ever recorded here.
    pub fn branches(&self) -> Vec<(SnapshotId, &str)> {
        self.nodes[&self.current]
            .children
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|n| (*id, n.description.as_str())))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Discards the entire tree except the current node, which becomes the
    /// new root with no history above or below it.
    pub fn clear(&mut self) {
        let current_state = self.nodes[&self.current].state.clone();
        self.nodes.clear();
        let root_node = Snapshot {
            id: self.current,
            state: current_state,
            description: "initial state".to_string(),
            seq: self.next_seq,
            parent: None,
            children: Vec::new(),
        };
        self.next_seq += 1;
        self.root = self.current;
        self.nodes.insert(self.root, root_node);
    }

    /// Evicts the oldest node not on the current node's root-path whenever
    /// the tree exceeds `max_size`. If the evicted node is the root, the
    /// root-path's next node (the current node's ancestor closest to the
    /// old root) becomes the new root.
    fn prune(&mut self) {
        while self.nodes.len() > self.max_size {
            let keep: std::collections::HashSet<SnapshotId> = self.ancestor_path();
            let victim = self
                .nodes
                .values()
                .filter(|n| !keep.contains(&n.id))
                .min_by_key(|n| n.seq)
                .map(|n| n.id);

            let Some(victim) = victim else { break };
            self.remove_node(victim);
        }
    }

    /// The current node and every ancestor up to (and including) the root.
    fn ancestor_path(&self) -> std::collections::HashSet<SnapshotId> {
        let mut path = std::collections::HashSet::new();
        let mut cursor = Some(self.current);
        while let Some(id) = cursor {
            path.insert(id);
            cursor = self.nodes.get(&id).and_then(|n| n.parent);
        }
        path
    }

    fn remove_node(&mut self, id: SnapshotId) {
        if id == self.root {
            // Re-root to the child on the current node's ancestor path, if
            // any, so the branch leading to `current` survives.
            let path = self.ancestor_path();
            let new_root = self.nodes[&id].children.iter().find(|c| path.contains(c)).copied();
            if let Some(new_root) = new_root {
                if let Some(node) = self.nodes.get_mut(&new_root) {
                    node.parent = None;
                }
                self.root = new_root;
            }
        }
        if let Some(node) = self.nodes.remove(&id) {
            if let Some(parent) = node.parent {
                if let Some(p) = self.nodes.get_mut(&parent) {
                    p.children.retain(|c| *c != id);
                }
            }
            // Orphan any remaining children not on the kept path (can only
            // happen for branches that were never the current path anyway).
            for child in node.children {
                if self.nodes.contains_key(&child) {
                    self.remove_node(child);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undo_steps_to_parent_state() {
        let mut history = HistoryManager::new(0, 100);
        history.record(1, "set A1");
        history.record(2, "set A2");
        assert_eq!(*history.current_state(), 2);
        assert_eq!(*history.undo().unwrap(), 1);
        assert_eq!(*history.undo().unwrap(), 0);
        assert!(!history.can_undo());
    }

    #[test]
    fn redo_after_undo_returns_to_child() {
        let mut history = HistoryManager::new(0, 100);
        history.record(1, "set A1");
        history.undo();
        assert_eq!(*history.redo().unwrap(), 1);
        assert!(!history.can_redo());
    }

    #[test]
    fn new_change_after_undo_creates_sibling_branch_not_overwrite() {
        let mut history = HistoryManager::new(0, 100);
        history.record(1, "set A1 to 1");
        history.undo();
        history.record(2, "set A1 to 2");

        // The old branch (state 1) is still reachable by id, not discarded.
        let root_children = history.nodes[&history.root].children.clone();
        assert_eq!(root_children.len(), 2);
        assert_eq!(*history.current_state(), 2);

        let old_branch_id = root_children[0];
        assert_eq!(*history.goto(old_branch_id).unwrap(), 1);
    }

    #[test]
    fn can_undo_redo_reflect_position() {
        let mut history = HistoryManager::new(0, 100);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        history.record(1, "change");
        assert!(history.can_undo());
        assert!(!history.can_redo());
        history.undo();
        assert!(!history.can_undo());
        assert!(history.can_redo());
    }

    #[test]
    fn pruning_keeps_current_ancestor_path_and_evicts_oldest_other_branch() {
        let mut history = HistoryManager::new(0, 3);
        history.record(1, "a");
        history.undo();
        history.record(2, "b");
        // Tree now has root(0), branch 1 (off-path), branch 2 (current).
        // max_size 3 holds all of them.
        assert_eq!(history.node_count(), 3);

        history.record(3, "c");
        // Adding a 4th node over max_size 3 evicts the oldest node not on
        // the current path — the abandoned branch (state 1).
        assert_eq!(history.node_count(), 3);
        assert_eq!(*history.current_state(), 3);
        assert!(history.can_undo());
    }

    #[test]
    fn clear_collapses_tree_to_single_root_at_current_state() {
        let mut history = HistoryManager::new(0, 100);
        history.record(1, "a");
        history.record(2, "b");
        history.clear();
        assert_eq!(history.node_count(), 1);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert_eq!(*history.current_state(), 2);
    }

    #[test]
    fn undo_description_reports_parent_label() {
        let mut history = HistoryManager::new(0, 100);
        history.record(1, "set A1 to 1");
        assert_eq!(history.undo_description(), Some("initial state"));
        assert_eq!(history.redo_description(), None);
    }
}
