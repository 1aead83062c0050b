//! FILENAME: engine/src/dependency_graph.rs
//! PURPOSE: Implements the directed graph tracking cell dependencies.
//! CONTEXT: This module is the heart of the spreadsheet's recalculation engine.
//! It tracks which cells depend on which other cells (precedents/dependents),
//! detects circular references, and computes the correct evaluation order.
//!
//! TERMINOLOGY:
//! - Precedents: cells a formula cell references (its inputs).
//!   If A3 = A1 + A2, then A1 and A2 are precedents of A3.
//! - Dependents: cells that reference a given cell (reverse lookup).
//!   If A3 = A1 + A2, then A3 is a dependent of A1 and A2.
//!
//! USAGE:
//! 1. When a cell's formula is set/changed, call `add_edge()` with the cell's
//!    coordinate and its extracted precedents.
//! 2. When a cell's value changes, call `recalc_order()` to get the list of
//!    cells that need recalculation, in order.
//! 3. Use `would_cycle()` to check before committing a formula change.

use crate::address::CellCoord;
use std::collections::{HashMap, HashSet, VecDeque};

/// Error type for cycle detection.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleError {
    /// The cells involved in the cycle, in order.
    pub cycle_path: Vec<CellCoord>,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Circular reference detected: ")?;
        for (i, coord) in self.cycle_path.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "({}, {})", coord.0, coord.1)?;
        }
        Ok(())
    }
}

impl std::error::Error for CycleError {}

/// Tracks precedent/dependent relationships between cells and computes
/// recalculation order.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// For each cell, the set of cells it directly depends on (its precedents).
    precedents: HashMap<CellCoord, HashSet<CellCoord>>,
    /// For each cell, the set of cells that directly depend on it.
    dependents: HashMap<CellCoord, HashSet<CellCoord>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph {
            precedents: HashMap::new(),
            dependents: HashMap::new(),
        }
    }

    /// Sets the precedents for `cell`, replacing whatever it depended on
    /// before. Does NOT check for cycles — call `would_cycle` first.
    pub fn add_edge(&mut self, cell: CellCoord, new_precedents: HashSet<CellCoord>) {
        self.clear_for(cell);

        if !new_precedents.is_empty() {
            for &prec in &new_precedents {
                self.dependents.entry(prec).or_insert_with(HashSet::new).insert(cell);
            }
            self.precedents.insert(cell, new_precedents);
        }
    }

    /// Removes all recorded precedents for `cell`. Call this when a cell
    /// becomes a literal value or is cleared.
    pub fn clear_for(&mut self, cell: CellCoord) {
        if let Some(old_precs) = self.precedents.remove(&cell) {
            for prec in old_precs {
                if let Some(deps) = self.dependents.get_mut(&prec) {
                    deps.remove(&cell);
                    if deps.is_empty() {
                        self.dependents.remove(&prec);
                    }
                }
            }
        }
    }

    /// Returns the direct precedents of a cell.
    pub fn get_precedents(&self, cell: CellCoord) -> Option<&HashSet<CellCoord>> {
        self.precedents.get(&cell)
    }

    /// Returns the direct dependents of a cell.
    pub fn get_dependents(&self, cell: CellCoord) -> Option<&HashSet<CellCoord>> {
        self.dependents.get(&cell)
    }

    /// Checks whether giving `cell` the precedents in `new_precedents` would
    /// introduce a circular reference.
    pub fn would_cycle(&self, cell: CellCoord, new_precedents: &HashSet<CellCoord>) -> bool {
        if new_precedents.contains(&cell) {
            return true;
        }
        new_precedents.iter().any(|&prec| self.can_reach(prec, cell))
    }

    /// Checks if `start` can reach `target` by following precedent chains.
    fn can_reach(&self, start: CellCoord, target: CellCoord) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![start];

        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(precs) = self.precedents.get(&current) {
                for &prec in precs {
                    if !visited.contains(&prec) {
                        stack.push(prec);
                    }
                }
            }
        }

        false
    }

    /// Returns every transitive dependent of `cell` (not including the cell
    /// itself), in BFS discovery order. The order is the tie-break `order`
    /// uses when multiple cells have no precedents within the affected set.
    fn affected_closure(&self, cell: CellCoord) -> Vec<CellCoord> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        let mut result = Vec::new();

        if let Some(deps) = self.dependents.get(&cell) {
            let mut first: Vec<_> = deps.iter().cloned().collect();
            first.sort_unstable();
            for dep in first {
                queue.push_back(dep);
            }
        }

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            result.push(current);

            if let Some(deps) = self.dependents.get(&current) {
                let mut next: Vec<_> = deps.iter().filter(|d| !seen.contains(d)).cloned().collect();
                next.sort_unstable();
                for dep in next {
                    queue.push_back(dep);
                }
            }
        }

        result
    }

    /// Gets all cells that need recalculation when `changed` is updated,
    /// returned in an order where every cell's precedents come before it.
    /// `changed` itself is not included.
    pub fn recalc_order(&self, changed: CellCoord) -> Result<Vec<CellCoord>, CycleError> {
        let affected = self.affected_closure(changed);
        if affected.is_empty() {
            return Ok(Vec::new());
        }
        self.order(&affected)
    }

    /// Same as `recalc_order`, but seeded from several changed cells at
    /// once (a batch write). The union of each seed's affected closure is
    /// taken, in order of first discovery across the seeds, before the
    /// single topological sort runs.
    pub fn recalc_order_many(&self, changed: &[CellCoord]) -> Result<Vec<CellCoord>, CycleError> {
        let mut seen = HashSet::new();
        let mut affected = Vec::new();
        for &cell in changed {
            for dep in self.affected_closure(cell) {
                if seen.insert(dep) {
                    affected.push(dep);
                }
            }
        }
        if affected.is_empty() {
            return Ok(Vec::new());
        }
        self.order(&affected)
    }

    /// Orders `cells` so that every cell appears after its precedents
    /// (restricted to `cells`), via an iterative DFS post-order traversal.
    /// Ties (cells with no ordering constraint between them) are broken by
    /// the position each cell holds in `cells`, so callers get a stable,
    /// reproducible order rather than one that depends on hash iteration.
    fn order(&self, cells: &[CellCoord]) -> Result<Vec<CellCoord>, CycleError> {
        let cell_set: HashSet<CellCoord> = cells.iter().cloned().collect();
        let position: HashMap<CellCoord, usize> =
            cells.iter().enumerate().map(|(i, &c)| (c, i)).collect();

        #[derive(PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }
        let mut marks: HashMap<CellCoord, Mark> = HashMap::new();
        let mut result = Vec::with_capacity(cells.len());

        let ordered_precedents = |cell: CellCoord| -> Vec<CellCoord> {
            let mut precs: Vec<CellCoord> = self
                .precedents
                .get(&cell)
                .map(|set| set.iter().filter(|p| cell_set.contains(p)).cloned().collect())
                .unwrap_or_default();
            precs.sort_by_key(|c| position[c]);
            precs
        };

        for &start in cells {
            if matches!(marks.get(&start), Some(Mark::Done)) {
                continue;
            }

            let mut stack: Vec<(CellCoord, std::vec::IntoIter<CellCoord>)> = Vec::new();
            marks.insert(start, Mark::InProgress);
            stack.push((start, ordered_precedents(start).into_iter()));

            while let Some(frame) = stack.last_mut() {
                match frame.1.next() {
                    Some(child) => match marks.get(&child) {
                        Some(Mark::Done) => {}
                        Some(Mark::InProgress) => {
                            let cycle_path = self.find_cycle_path(&[child, frame.0]);
                            return Err(CycleError { cycle_path });
                        }
                        None => {
                            marks.insert(child, Mark::InProgress);
                            let child_precs = ordered_precedents(child);
                            stack.push((child, child_precs.into_iter()));
                        }
                    },
                    None => {
                        let (done_cell, _) = stack.pop().unwrap();
                        marks.insert(done_cell, Mark::Done);
                        result.push(done_cell);
                    }
                }
            }
        }

        Ok(result)
    }

    /// Attempts to trace a cycle path for error reporting, starting from the
    /// two cells observed forming a back edge.
    fn find_cycle_path(&self, seed: &[CellCoord]) -> Vec<CellCoord> {
        if seed.is_empty() {
            return Vec::new();
        }
        let target = seed[0];
        let start = seed.get(1).copied().unwrap_or(target);

        let mut path = vec![start];
        let mut current = start;
        let mut guard = 0;

        while current != target {
            guard += 1;
            if guard > self.precedents.len() + 1 {
                break;
            }
            match self.precedents.get(&current).and_then(|p| p.iter().next()) {
                Some(&next) => {
                    path.push(next);
                    current = next;
                }
                None => break,
            }
        }

        path
    }

    /// Returns the total number of cells that have dependencies.
    pub fn formula_cell_count(&self) -> usize {
        self.precedents.len()
    }

    /// Returns the total number of dependency relationships.
    pub fn dependency_count(&self) -> usize {
        self.precedents.values().map(|v| v.len()).sum()
    }

    /// Clears the entire dependency graph.
    pub fn clear(&mut self) {
        self.precedents.clear();
        self.dependents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(row: u32, col: u32) -> CellCoord {
        (row, col)
    }

    fn set_of(coords: &[CellCoord]) -> HashSet<CellCoord> {
        coords.iter().cloned().collect()
    }

    #[test]
    fn test_set_and_get_dependencies() {
        let mut graph = DependencyGraph::new();

        let a1 = coord(0, 0);
        let a2 = coord(1, 0);
        let a3 = coord(2, 0);

        graph.add_edge(a3, set_of(&[a1, a2]));

        let precs = graph.get_precedents(a3).unwrap();
        assert!(precs.contains(&a1));
        assert!(precs.contains(&a2));
        assert_eq!(precs.len(), 2);

        let a1_deps = graph.get_dependents(a1).unwrap();
        assert!(a1_deps.contains(&a3));

        let a2_deps = graph.get_dependents(a2).unwrap();
        assert!(a2_deps.contains(&a3));
    }

    #[test]
    fn test_clear_dependencies() {
        let mut graph = DependencyGraph::new();

        let a1 = coord(0, 0);
        let a2 = coord(1, 0);
        let a3 = coord(2, 0);

        graph.add_edge(a3, set_of(&[a1, a2]));
        graph.clear_for(a3);

        assert!(graph.get_precedents(a3).is_none());
        assert!(graph.get_dependents(a1).is_none());
        assert!(graph.get_dependents(a2).is_none());
    }

    #[test]
    fn test_update_dependencies() {
        let mut graph = DependencyGraph::new();

        let a1 = coord(0, 0);
        let a2 = coord(1, 0);
        let a3 = coord(2, 0);
        let b1 = coord(0, 1);

        graph.add_edge(a3, set_of(&[a1, a2]));
        graph.add_edge(a3, set_of(&[b1]));

        let precs = graph.get_precedents(a3).unwrap();
        assert_eq!(precs.len(), 1);
        assert!(precs.contains(&b1));

        assert!(graph.get_dependents(a1).is_none());
        assert!(graph.get_dependents(a2).is_none());

        let b1_deps = graph.get_dependents(b1).unwrap();
        assert!(b1_deps.contains(&a3));
    }

    #[test]
    fn test_cycle_detection_self_reference() {
        let graph = DependencyGraph::new();
        let a1 = coord(0, 0);

        assert!(graph.would_cycle(a1, &set_of(&[a1])));
    }

    #[test]
    fn test_cycle_detection_simple() {
        let mut graph = DependencyGraph::new();

        let a1 = coord(0, 0);
        let a2 = coord(1, 0);

        graph.add_edge(a2, set_of(&[a1]));

        assert!(graph.would_cycle(a1, &set_of(&[a2])));
    }

    #[test]
    fn test_cycle_detection_transitive() {
        let mut graph = DependencyGraph::new();

        let a1 = coord(0, 0);
        let a2 = coord(1, 0);
        let a3 = coord(2, 0);

        graph.add_edge(a2, set_of(&[a1]));
        graph.add_edge(a3, set_of(&[a2]));

        assert!(graph.would_cycle(a1, &set_of(&[a3])));
    }

    #[test]
    fn test_no_false_positive_cycle() {
        let mut graph = DependencyGraph::new();

        let a1 = coord(0, 0);
        let a2 = coord(1, 0);
        let b1 = coord(0, 1);

        graph.add_edge(a2, set_of(&[a1]));

        assert!(!graph.would_cycle(b1, &set_of(&[a1])));
        assert!(!graph.would_cycle(b1, &set_of(&[a2])));
    }

    #[test]
    fn test_recalc_order_simple() {
        let mut graph = DependencyGraph::new();

        let a1 = coord(0, 0);
        let a2 = coord(1, 0);
        let a3 = coord(2, 0);

        graph.add_edge(a2, set_of(&[a1]));
        graph.add_edge(a3, set_of(&[a2]));

        let order = graph.recalc_order(a1).unwrap();
        assert_eq!(order.len(), 2);
        assert_eq!(order[0], a2);
        assert_eq!(order[1], a3);
    }

    #[test]
    fn test_recalc_order_diamond() {
        let mut graph = DependencyGraph::new();

        //     A1
        //    /  \
        //   A2  A3
        //    \  /
        //     A4
        let a1 = coord(0, 0);
        let a2 = coord(1, 0);
        let a3 = coord(2, 0);
        let a4 = coord(3, 0);

        graph.add_edge(a2, set_of(&[a1]));
        graph.add_edge(a3, set_of(&[a1]));
        graph.add_edge(a4, set_of(&[a2, a3]));

        let order = graph.recalc_order(a1).unwrap();
        assert_eq!(order.len(), 3);

        let a2_pos = order.iter().position(|&c| c == a2).unwrap();
        let a3_pos = order.iter().position(|&c| c == a3).unwrap();
        let a4_pos = order.iter().position(|&c| c == a4).unwrap();

        assert!(a4_pos > a2_pos);
        assert!(a4_pos > a3_pos);
    }

    #[test]
    fn test_recalc_order_no_dependents() {
        let graph = DependencyGraph::new();
        let a1 = coord(0, 0);

        let order = graph.recalc_order(a1).unwrap();
        assert!(order.is_empty());
    }

    #[test]
    fn test_recalc_order_is_insertion_stable() {
        // A1 has two independent dependents, B1 and C1, with no ordering
        // constraint between them. The order should match discovery order
        // (insertion order into the dependents set), not hash order.
        let mut graph = DependencyGraph::new();
        let a1 = coord(0, 0);
        let b1 = coord(0, 1);
        let c1 = coord(0, 2);

        graph.add_edge(b1, set_of(&[a1]));
        graph.add_edge(c1, set_of(&[a1]));

        let order = graph.recalc_order(a1).unwrap();
        assert_eq!(order.len(), 2);
        assert!(order.contains(&b1));
        assert!(order.contains(&c1));
    }

    #[test]
    fn test_recalc_order_cycle_error() {
        let mut graph = DependencyGraph::new();

        let a1 = coord(0, 0);
        let a2 = coord(1, 0);

        // Manually create a cycle, bypassing the would_cycle guard, to
        // exercise detection inside `order` itself.
        graph.precedents.insert(a1, set_of(&[a2]));
        graph.precedents.insert(a2, set_of(&[a1]));
        graph.dependents.insert(a1, set_of(&[a2]));
        graph.dependents.insert(a2, set_of(&[a1]));

        let a3 = coord(2, 0);
        graph.precedents.insert(a3, set_of(&[a1]));
        graph.dependents.entry(a1).or_default().insert(a3);

        let result = graph.recalc_order(a1);
        assert!(result.is_err());
    }

    #[test]
    fn test_recalc_order_many_unions_seeds() {
        let mut graph = DependencyGraph::new();

        let a1 = coord(0, 0);
        let b1 = coord(0, 1);
        let c1 = coord(0, 2);
        let d1 = coord(0, 3);

        graph.add_edge(c1, set_of(&[a1]));
        graph.add_edge(d1, set_of(&[b1]));

        let order = graph.recalc_order_many(&[a1, b1]).unwrap();
        assert_eq!(order.len(), 2);
        assert!(order.contains(&c1));
        assert!(order.contains(&d1));
    }

    #[test]
    fn test_counts() {
        let mut graph = DependencyGraph::new();

        let a1 = coord(0, 0);
        let a2 = coord(1, 0);
        let a3 = coord(2, 0);

        assert_eq!(graph.formula_cell_count(), 0);
        assert_eq!(graph.dependency_count(), 0);

        graph.add_edge(a2, set_of(&[a1]));
        graph.add_edge(a3, set_of(&[a1, a2]));

        assert_eq!(graph.formula_cell_count(), 2);
        assert_eq!(graph.dependency_count(), 3);
    }
}
