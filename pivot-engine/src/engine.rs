//! FILENAME: pivot-engine/src/engine.rs
//! PURPOSE: Reads a declared source range through the same cell-access
//! shape the formula evaluator uses, groups and aggregates it according to
//! a `PivotConfig`, and writes the result back into a target engine's grid.
//! CONTEXT: A pivot table is a read-only consumer of the engine: it never
//! registers dependency edges on the cells it reads, and its own output
//! cells are plain values written through the engine's batch path, not
//! formulas. `PivotProjector` remembers the cell set of its last output so
//! a refresh can clear whatever used to be there but no longer is — a
//! reshaped pivot (fewer rows this time) doesn't leave stale cells behind.

use std::collections::{HashMap, HashSet};

use engine::{CellCoord, CellValue, Engine};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::definition::{AggregationType, FieldFilter, PivotConfig, PivotId, ValueFieldSpec};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PivotError {
    #[error("pivot source range has no header row")]
    EmptySource,
    #[error("field {0:?} not found in the source header")]
    UnknownField(String),
    #[error("no pivot registered with id {0}")]
    UnknownPivot(PivotId),
    #[error(transparent)]
    Engine(#[from] engine::EngineError),
}

/// The cell footprint of a previously written pivot output — what a
/// refresh diffs the new output against so stale cells get cleared.
#[derive(Debug, Clone)]
pub struct PivotOutput {
    pub top_left: CellCoord,
    pub rows: u32,
    pub cols: u32,
    pub cells: HashSet<CellCoord>,
}

/// Accumulates one value field's aggregate over a stream of source cells.
/// All seven aggregators are tracked in parallel per row as each cell is
/// seen once, rather than buffering the raw stream and aggregating later.
#[derive(Debug, Clone, Default)]
struct Accumulator {
    sum: f64,
    count_numeric: usize,
    count_nonempty: usize,
    min: Option<f64>,
    max: Option<f64>,
    product: f64,
    touched: bool,
}

impl Accumulator {
    fn new() -> Self {
        Accumulator { product: 1.0, ..Default::default() }
    }

    fn push(&mut self, value: &CellValue) {
        self.touched = true;
        if !matches!(value, CellValue::Empty) {
            self.count_nonempty += 1;
        }
        if let Some(n) = numeric_of(value) {
            self.sum += n;
            self.count_numeric += 1;
            self.min = Some(self.min.map_or(n, |m| m.min(n)));
            self.max = Some(self.max.map_or(n, |m| m.max(n)));
            self.product *= n;
        }
    }

    fn finish(&self, aggregator: AggregationType) -> f64 {
        match aggregator {
            AggregationType::Sum => self.sum,
            AggregationType::Average => {
                if self.count_numeric == 0 {
                    0.0
                } else {
                    self.sum / self.count_numeric as f64
                }
            }
            AggregationType::Count => self.count_numeric as f64,
            AggregationType::CountA => self.count_nonempty as f64,
            AggregationType::Min => self.min.unwrap_or(0.0),
            AggregationType::Max => self.max.unwrap_or(0.0),
            AggregationType::Product => self.product,
        }
    }
}

fn numeric_of(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Number(n) => Some(*n),
        CellValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        CellValue::Text(s) => s.trim().parse::<f64>().ok(),
        CellValue::Empty => None,
    }
}

const TOTAL_LABEL: &str = "Total";

pub struct PivotProjector {
    pub config: PivotConfig,
    pub output_top_left: CellCoord,
    last_output: Option<PivotOutput>,
}

impl PivotProjector {
    pub fn new(config: PivotConfig, output_top_left: CellCoord) -> Self {
        PivotProjector { config, output_top_left, last_output: None }
    }

    pub fn last_output(&self) -> Option<&PivotOutput> {
        self.last_output.as_ref()
    }

    /// Recomputes the pivot against `source` (which `engine.get` reads the
    /// source range from) and writes the result into `target` beginning at
    /// `output_top_left`. `source` and `target` may be the same engine.
    pub fn refresh(&mut self, source: &Engine, target: &Engine) -> Result<(), PivotError> {
        let rows = self.read_source(source)?;
        let table = self.project(&rows)?;
        self.write_output(target, table)
    }

    /// Reads every cell in the configured source range into row-major
    /// `CellValue` rows, the header row included.
    fn read_source(&self, source: &Engine) -> Result<Vec<Vec<CellValue>>, PivotError> {
        let (top, left) = self.config.source_start;
        let (bottom, right) = self.config.source_end;
        if bottom < top || right < left {
            return Err(PivotError::EmptySource);
        }
        let mut rows = Vec::with_capacity((bottom - top + 1) as usize);
        for row in top..=bottom {
            let mut cells = Vec::with_capacity((right - left + 1) as usize);
            for col in left..=right {
                let value = source
                    .get((row, col))
                    .map(|cell| cell.computed.clone())
                    .unwrap_or(CellValue::Empty);
                cells.push(value);
            }
            rows.push(cells);
        }
        Ok(rows)
    }

    fn project(&self, rows: &[Vec<CellValue>]) -> Result<ProjectedTable, PivotError> {
        let Some(header) = rows.first() else { return Err(PivotError::EmptySource) };
        let field_index = |name: &str| -> Result<usize, PivotError> {
            header
                .iter()
                .position(|v| v.display_value() == name)
                .ok_or_else(|| PivotError::UnknownField(name.to_string()))
        };

        let row_field_idx: Vec<usize> =
            self.config.row_fields.iter().map(|f| field_index(f)).collect::<Result<_, _>>()?;
        let col_field_idx: Vec<usize> =
            self.config.column_fields.iter().map(|f| field_index(f)).collect::<Result<_, _>>()?;
        let value_field_idx: Vec<usize> = self
            .config
            .value_fields
            .iter()
            .map(|vf| field_index(&vf.source_field))
            .collect::<Result<_, _>>()?;
        let filters: Vec<(usize, &FieldFilter)> = self
            .config
            .filters
            .iter()
            .map(|f| Ok((field_index(&f.field)?, f)))
            .collect::<Result<_, PivotError>>()?;

        let n_values = value_field_idx.len().max(1);

        let mut main: FxHashMap<(String, String), Vec<Accumulator>> = FxHashMap::default();
        let mut row_totals: FxHashMap<String, Vec<Accumulator>> = FxHashMap::default();
        let mut col_totals: FxHashMap<String, Vec<Accumulator>> = FxHashMap::default();
        let mut grand: Vec<Accumulator> = (0..n_values).map(|_| Accumulator::new()).collect();
        let mut row_keys: Vec<String> = Vec::new();
        let mut col_keys: Vec<String> = Vec::new();

        for data_row in rows.iter().skip(1) {
            if filters.iter().any(|(idx, filter)| {
                let text = data_row.get(*idx).map(CellValue::display_value).unwrap_or_default();
                !filter.accepts(&text)
            }) {
                continue;
            }

            let row_key = join_key(&row_field_idx, data_row);
            let col_key = join_key(&col_field_idx, data_row);
            if !row_keys.contains(&row_key) {
                row_keys.push(row_key.clone());
            }
            if !col_keys.contains(&col_key) {
                col_keys.push(col_key.clone());
            }

            let cell_accs =
                main.entry((row_key.clone(), col_key.clone())).or_insert_with(|| new_accs(n_values));
            let row_total_accs = row_totals.entry(col_key.clone()).or_insert_with(|| new_accs(n_values));
            let col_total_accs = col_totals.entry(row_key.clone()).or_insert_with(|| new_accs(n_values));

            for (slot, &idx) in value_field_idx.iter().enumerate().take(n_values.min(value_field_idx.len())) {
                let value = data_row.get(idx).cloned().unwrap_or(CellValue::Empty);
                cell_accs[slot].push(&value);
                row_total_accs[slot].push(&value);
                col_total_accs[slot].push(&value);
                grand[slot].push(&value);
            }
            // A config with no value fields still produces presence counts.
            if value_field_idx.is_empty() {
                let empty = CellValue::Empty;
                cell_accs[0].push(&empty);
                row_total_accs[0].push(&empty);
                col_total_accs[0].push(&empty);
                grand[0].push(&empty);
            }
        }

        row_keys.sort();
        col_keys.sort();
        if col_keys.is_empty() {
            col_keys.push(String::new());
        }
        if row_keys.is_empty() {
            row_keys.push(String::new());
        }

        Ok(ProjectedTable { row_keys, col_keys, main, row_totals, col_totals, grand })
    }

    fn write_output(&mut self, target: &Engine, table: ProjectedTable) -> Result<(), PivotError> {
        let aggregators: Vec<AggregationType> = if self.config.value_fields.is_empty() {
            vec![AggregationType::CountA]
        } else {
            self.config.value_fields.iter().map(|v| v.aggregator).collect()
        };
        let value_labels: Vec<String> = if self.config.value_fields.is_empty() {
            vec!["Count".to_string()]
        } else {
            self.config.value_fields.iter().map(|v| v.display_name().to_string()).collect()
        };
        let n_values = aggregators.len();

        let has_col_fields = !self.config.column_fields.is_empty();
        let mut col_blocks: Vec<String> = table.col_keys.clone();
        if self.config.show_column_totals {
            col_blocks.push(TOTAL_LABEL.to_string());
        }
        let mut row_labels: Vec<String> = table.row_keys.clone();
        if self.config.show_row_totals {
            row_labels.push(TOTAL_LABEL.to_string());
        }

        let header_rows: u32 = if has_col_fields { 2 } else { 1 };
        let data_rows: u32 = row_labels.len() as u32;
        let total_rows = header_rows + data_rows;
        let total_cols: u32 = 1 + (col_blocks.len() * n_values) as u32;

        let (top, left) = self.output_top_left;
        let mut entries: Vec<(CellCoord, String)> = Vec::new();
        let mut written: HashSet<CellCoord> = HashSet::new();

        let mut put = |row: u32, col: u32, text: String| {
            let addr = (top + row, left + col);
            written.insert(addr);
            entries.push((addr, text));
        };

        // Header: column-key row (one per block, label in the block's first column).
        if has_col_fields {
            for (block_idx, key) in col_blocks.iter().enumerate() {
                let col = 1 + (block_idx * n_values) as u32;
                put(0, col, key.clone());
            }
        }
        // Header: value-field name row, repeated under every column block.
        let value_header_row = header_rows - 1;
        for block_idx in 0..col_blocks.len() {
            for (slot, label) in value_labels.iter().enumerate() {
                let col = 1 + (block_idx * n_values + slot) as u32;
                put(value_header_row, col, label.clone());
            }
        }

        // Data + row-total row.
        for (row_idx, row_label) in row_labels.iter().enumerate() {
            let out_row = header_rows + row_idx as u32;
            put(out_row, 0, row_label.clone());
            let is_row_total = self.config.show_row_totals && row_idx == row_labels.len() - 1;

            for (block_idx, col_key) in col_blocks.iter().enumerate() {
                let is_col_total = self.config.show_column_totals && block_idx == col_blocks.len() - 1;

                for slot in 0..n_values {
                    let value = if is_row_total && is_col_total {
                        if self.config.show_grand_totals {
                            Some(table.grand.get(slot).map(|a| a.finish(aggregators[slot])).unwrap_or(0.0))
                        } else {
                            None
                        }
                    } else if is_row_total {
                        table.row_totals.get(col_key).map(|accs| accs[slot].finish(aggregators[slot]))
                    } else if is_col_total {
                        table.col_totals.get(row_label).map(|accs| accs[slot].finish(aggregators[slot]))
                    } else {
                        table.main.get(&(row_label.clone(), col_key.clone())).map(|accs| accs[slot].finish(aggregators[slot]))
                    };

                    if let Some(value) = value {
                        let col = 1 + (block_idx * n_values + slot) as u32;
                        put(out_row, col, format_number(value));
                    }
                }
            }
        }

        let new_output =
            PivotOutput { top_left: self.output_top_left, rows: total_rows, cols: total_cols, cells: written };

        if let Some(previous) = &self.last_output {
            for addr in previous.cells.difference(&new_output.cells) {
                target.clear(*addr)?;
            }
        }

        target.set_cells(&entries)?;
        self.last_output = Some(new_output);
        Ok(())
    }
}

struct ProjectedTable {
    row_keys: Vec<String>,
    col_keys: Vec<String>,
    main: FxHashMap<(String, String), Vec<Accumulator>>,
    row_totals: FxHashMap<String, Vec<Accumulator>>,
    col_totals: FxHashMap<String, Vec<Accumulator>>,
    grand: Vec<Accumulator>,
}

fn new_accs(n: usize) -> Vec<Accumulator> {
    (0..n).map(|_| Accumulator::new()).collect()
}

/// Joins the display text of each field index into one `|`-separated
/// group key.
fn join_key(field_idx: &[usize], row: &[CellValue]) -> String {
    let parts: SmallVec<[String; 4]> = field_idx
        .iter()
        .map(|&idx| row.get(idx).map(CellValue::display_value).unwrap_or_default())
        .collect();
    parts.join("|")
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{:.0}", n)
    } else {
        n.to_string()
    }
}

/// A workbook-level registry of named pivot tables — the composition point
/// for the `add_pivot`/`remove_pivot`/`get_pivot`/`refresh_pivot`/
/// `refresh_all_pivots`/`get_all_pivots` surface. It lives here, not as
/// methods on `Engine` itself, because `engine` cannot depend on
/// `pivot-engine` without an acyclic-crate-graph violation: a caller
/// holding both an `Engine` and a `PivotRegistry` gets the same surface a
/// `pivot`-aware engine method would have offered.
#[derive(Default)]
pub struct PivotRegistry {
    pivots: HashMap<PivotId, PivotProjector>,
}

impl PivotRegistry {
    pub fn new() -> Self {
        PivotRegistry { pivots: HashMap::new() }
    }

    pub fn add_pivot(&mut self, id: PivotId, config: PivotConfig, output_top_left: CellCoord) {
        self.pivots.insert(id, PivotProjector::new(config, output_top_left));
    }

    pub fn remove_pivot(&mut self, id: PivotId) -> Option<PivotProjector> {
        self.pivots.remove(&id)
    }

    pub fn get_pivot(&self, id: PivotId) -> Option<&PivotProjector> {
        self.pivots.get(&id)
    }

    pub fn refresh_pivot(&mut self, id: PivotId, engine: &Engine) -> Result<(), PivotError> {
        let projector = self.pivots.get_mut(&id).ok_or(PivotError::UnknownPivot(id))?;
        projector.refresh(engine, engine)
    }

    pub fn refresh_all_pivots(&mut self, engine: &Engine) -> Result<(), PivotError> {
        for projector in self.pivots.values_mut() {
            projector.refresh(engine, engine)?;
        }
        Ok(())
    }

    pub fn get_all_pivots(&self) -> impl Iterator<Item = (&PivotId, &PivotProjector)> {
        self.pivots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::Engine;

    fn load_source(entries: &[(&str, &str)]) -> Engine {
        let engine = Engine::new();
        for (addr, value) in entries {
            engine.set_by_label(addr, *value).unwrap();
        }
        engine
    }

    #[test]
    fn sums_value_field_grouped_by_one_row_field() {
        let source = load_source(&[
            ("A1", "Region"), ("B1", "Sales"),
            ("A2", "East"), ("B2", "10"),
            ("A3", "West"), ("B3", "20"),
            ("A4", "East"), ("B4", "5"),
        ]);
        let mut config = PivotConfig::new((0, 0), (3, 1));
        config.row_fields.push("Region".to_string());
        config.value_fields.push(ValueFieldSpec::new("Sales", AggregationType::Sum));

        let mut projector = PivotProjector::new(config, (10, 10));
        projector.refresh(&source, &source).unwrap();

        let east_row = source.get((12, 10)).unwrap();
        assert_eq!(east_row.computed, CellValue::Text("East".to_string()));
        let east_sum = source.get((12, 11)).unwrap();
        assert_eq!(east_sum.computed, CellValue::Number(15.0));
    }

    #[test]
    fn grand_total_only_appears_when_both_totals_enabled() {
        let source = load_source(&[
            ("A1", "Region"), ("B1", "Sales"),
            ("A2", "East"), ("B2", "10"),
            ("A3", "West"), ("B3", "20"),
        ]);
        let mut config = PivotConfig::new((0, 0), (2, 1));
        config.row_fields.push("Region".to_string());
        config.value_fields.push(ValueFieldSpec::new("Sales", AggregationType::Sum));
        config.show_row_totals = true;
        config.show_column_totals = true;
        config.show_grand_totals = true;

        let mut projector = PivotProjector::new(config, (0, 0));
        projector.refresh(&source, &source).unwrap();

        // Total row sits after the two data rows and one header row.
        let grand_cell = source.get((3, 1)).unwrap();
        assert_eq!(grand_cell.computed, CellValue::Number(30.0));
    }

    #[test]
    fn refresh_clears_cells_no_longer_in_the_new_output() {
        let source = load_source(&[
            ("A1", "Region"), ("B1", "Sales"),
            ("A2", "East"), ("B2", "10"),
            ("A3", "West"), ("B3", "20"),
        ]);
        let mut config = PivotConfig::new((0, 0), (2, 1));
        config.row_fields.push("Region".to_string());
        config.value_fields.push(ValueFieldSpec::new("Sales", AggregationType::Sum));

        let mut projector = PivotProjector::new(config, (10, 0));
        projector.refresh(&source, &source).unwrap();
        assert!(source.get((12, 0)).is_some());

        // Re-narrow the source to one row; the now-stale second data row
        // must be cleared, not left behind with an old value.
        projector.config.source_end = (1, 1);
        projector.refresh(&source, &source).unwrap();
        let cleared = source.get((12, 0));
        assert!(cleared.is_none() || cleared.unwrap().is_empty());
    }
}
