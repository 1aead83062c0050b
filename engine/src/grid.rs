//! FILENAME: engine/src/grid.rs
//! PURPOSE: Manages the collection of cells (the spreadsheet grid).
//! CONTEXT: This file defines the `Grid` struct which acts as the container
//! for all cell data. It uses a sparse storage strategy (HashMap) to
//! efficiently handle massive spreadsheets where most cells are empty, and
//! enforces the grid's fixed dimensions on every write.

use crate::address::{CellCoord, Dimensions};
use crate::cell::Cell;
use std::collections::HashMap;

/// A cell address fell outside the grid's configured dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct OutOfBoundsError {
    pub coord: CellCoord,
    pub dimensions: Dimensions,
}

impl std::fmt::Display for OutOfBoundsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cell ({}, {}) is outside the grid's {}x{} bounds",
            self.coord.0, self.coord.1, self.dimensions.rows, self.dimensions.cols
        )
    }
}

impl std::error::Error for OutOfBoundsError {}

/// The Grid struct holds the state of the spreadsheet data.
/// It uses a sparse representation (HashMap) mapping coordinates to Cells.
/// Row and Col are 0-based indices.
#[derive(Debug, Clone)]
pub struct Grid {
    /// Sparse storage: keys are (row, col), values are Cell instances.
    cells: HashMap<CellCoord, Cell>,
    dimensions: Dimensions,
}

impl Grid {
    /// Creates a new, empty Grid at the default (maximum) fixed dimensions.
    pub fn new() -> Self {
        Grid {
            cells: HashMap::new(),
            dimensions: Dimensions::default(),
        }
    }

    pub fn with_dimensions(dimensions: Dimensions) -> Self {
        Grid { cells: HashMap::new(), dimensions }
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Sets a cell at the specified coordinates. Rejects addresses outside
    /// the grid's fixed dimensions rather than growing to fit them.
    pub fn set_cell(&mut self, coord: CellCoord, cell: Cell) -> Result<(), OutOfBoundsError> {
        if !self.dimensions.contains(coord) {
            return Err(OutOfBoundsError { coord, dimensions: self.dimensions });
        }
        if cell.is_empty() {
            self.cells.remove(&coord);
        } else {
            self.cells.insert(coord, cell);
        }
        Ok(())
    }

    /// Retrieves a reference to a cell at the specified coordinates.
    /// Returns None if the cell is empty (not stored).
    pub fn get_cell(&self, coord: CellCoord) -> Option<&Cell> {
        self.cells.get(&coord)
    }

    /// Removes a cell from the grid (clearing it).
    pub fn clear_cell(&mut self, coord: CellCoord) -> Option<Cell> {
        self.cells.remove(&coord)
    }

    /// Removes every cell from the grid.
    pub fn clear_all(&mut self) {
        self.cells.clear();
    }

    /// The number of non-empty cells currently stored.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// The smallest bounding rectangle containing every non-empty cell, as
    /// (top_left, bottom_right) inclusive, or None if the grid is empty.
    pub fn used_range(&self) -> Option<(CellCoord, CellCoord)> {
        let mut iter = self.cells.keys();
        let first = *iter.next()?;
        let mut min_row = first.0;
        let mut max_row = first.0;
        let mut min_col = first.1;
        let mut max_col = first.1;
        for &(row, col) in iter {
            min_row = min_row.min(row);
            max_row = max_row.max(row);
            min_col = min_col.min(col);
            max_col = max_col.max(col);
        }
        Some(((min_row, min_col), (max_row, max_col)))
    }

    /// Iterates over every non-empty cell in row-major order.
    pub fn iter_non_empty(&self) -> impl Iterator<Item = (CellCoord, &Cell)> {
        let mut entries: Vec<_> = self.cells.iter().map(|(&coord, cell)| (coord, cell)).collect();
        entries.sort_by_key(|(coord, _)| *coord);
        entries.into_iter()
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get_cell() {
        let mut grid = Grid::new();
        grid.set_cell((0, 0), Cell::literal_text("hello".to_string())).unwrap();
        assert_eq!(grid.get_cell((0, 0)).unwrap().raw, "hello");
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut grid = Grid::with_dimensions(Dimensions { rows: 10, cols: 5 });
        let err = grid.set_cell((10, 0), Cell::literal_number(1.0)).unwrap_err();
        assert_eq!(err.coord, (10, 0));
    }

    #[test]
    fn test_clear_cell() {
        let mut grid = Grid::new();
        grid.set_cell((0, 0), Cell::literal_number(1.0)).unwrap();
        grid.clear_cell((0, 0));
        assert!(grid.get_cell((0, 0)).is_none());
        assert_eq!(grid.cell_count(), 0);
    }

    #[test]
    fn test_setting_empty_cell_removes_it() {
        let mut grid = Grid::new();
        grid.set_cell((0, 0), Cell::literal_number(1.0)).unwrap();
        grid.set_cell((0, 0), Cell::empty()).unwrap();
        assert!(grid.get_cell((0, 0)).is_none());
    }

    #[test]
    fn test_used_range() {
        let mut grid = Grid::new();
        assert!(grid.used_range().is_none());
        grid.set_cell((2, 3), Cell::literal_number(1.0)).unwrap();
        grid.set_cell((0, 5), Cell::literal_number(2.0)).unwrap();
        assert_eq!(grid.used_range(), Some(((0, 3), (2, 5))));
    }

    #[test]
    fn test_iter_non_empty_is_row_major() {
        let mut grid = Grid::new();
        grid.set_cell((1, 0), Cell::literal_number(2.0)).unwrap();
        grid.set_cell((0, 0), Cell::literal_number(1.0)).unwrap();
        let coords: Vec<_> = grid.iter_non_empty().map(|(c, _)| c).collect();
        assert_eq!(coords, vec![(0, 0), (1, 0)]);
    }
}
