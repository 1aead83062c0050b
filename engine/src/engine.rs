//! FILENAME: engine/src/engine.rs
//! PURPOSE: The orchestrator that ties the grid, dependency graph, parser,
//! evaluator, change listeners, and undo/redo history into the single
//! public surface callers interact with.
//! CONTEXT: Every mutating method takes `&self`, not `&mut self` — state
//! lives behind `RefCell`s so a listener callback can call straight back
//! into the engine it was fired from (e.g. a pivot table refreshing itself
//! in response to a source cell changing) without the borrow checker
//! getting in the way. Reentrant propagation during that callback is
//! detected by a flag and deferred onto a work queue rather than recursing,
//! so a long chain of listener-triggered writes resolves breadth-first
//! instead of blowing the stack.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use parser::Expression;

use crate::address::{format_address, parse_address, CellCoord, Dimensions};
use crate::cell::{Cell, CellError, CellValue};
use crate::dependency_extractor::extract_dependencies;
use crate::dependency_graph::DependencyGraph;
use crate::evaluator::{CellLookup, EvalContext, EvalResult, Evaluator, FunctionRegistry};
use crate::grid::{Grid, OutOfBoundsError};
use crate::history::HistoryManager;
use crate::state::{
    CellEntry, CellState, DependenciesState, SpreadsheetState, StateMetadata, ToStateOptions,
    ViewState, STATE_VERSION,
};

/// The single caller-facing failure mode: every mutating method validates
/// the address against the grid's fixed dimensions up front. Formula
/// parse failures, circular references, and type errors are never
/// propagated as `Err` — they're recorded on the cell itself as a
/// `CellError`, visible through `display_value()`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    OutOfBounds(#[from] OutOfBoundsError),
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] crate::address::AddressError),
}

pub type ListenerId = u64;

/// Emitted whenever one or more cells' computed value, error, or raw
/// content changes — from a direct `set`/`clear` call, a ripple through
/// the dependency graph, or an undo/redo jump.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    CellChanged { addr: CellCoord, before: Cell, after: Cell },
    BatchChanged { changes: Vec<(CellCoord, Cell, Cell)> },
}

/// What `HistoryManager` clones and restores: everything that defines the
/// engine's computed state, deliberately excluding listeners, the custom
/// function registry, and view metadata (none of those are "content" an
/// undo should roll back).
#[derive(Debug, Clone)]
struct EngineSnapshot {
    grid: Grid,
    graph: DependencyGraph,
}

const DEFAULT_MAX_HISTORY: usize = 100;

pub struct Engine {
    grid: RefCell<Grid>,
    graph: RefCell<DependencyGraph>,
    registry: RefCell<FunctionRegistry<Engine>>,
    listeners: RefCell<Vec<(ListenerId, Rc<dyn Fn(&ChangeEvent)>)>>,
    next_listener_id: RefCell<ListenerId>,
    history: RefCell<HistoryManager<EngineSnapshot>>,
    metadata: RefCell<Option<StateMetadata>>,
    view: RefCell<ViewState>,
    reentrant: RefCell<bool>,
    pending: RefCell<VecDeque<CellCoord>>,
    current_eval: RefCell<CellCoord>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_dimensions(Dimensions::default())
    }

    pub fn with_dimensions(dimensions: Dimensions) -> Self {
        let grid = Grid::with_dimensions(dimensions);
        let snapshot = EngineSnapshot { grid: grid.clone(), graph: DependencyGraph::new() };
        Engine {
            grid: RefCell::new(grid),
            graph: RefCell::new(DependencyGraph::new()),
            registry: RefCell::new(FunctionRegistry::new()),
            listeners: RefCell::new(Vec::new()),
            next_listener_id: RefCell::new(0),
            history: RefCell::new(HistoryManager::new(snapshot, DEFAULT_MAX_HISTORY)),
            metadata: RefCell::new(None),
            view: RefCell::new(ViewState::default()),
            reentrant: RefCell::new(false),
            pending: RefCell::new(VecDeque::new()),
            current_eval: RefCell::new((0, 0)),
        }
    }

    // ---- read surface -----------------------------------------------

    pub fn dimensions(&self) -> Dimensions {
        self.grid.borrow().dimensions()
    }

    pub fn cell_count(&self) -> usize {
        self.grid.borrow().cell_count()
    }

    pub fn used_range(&self) -> Option<(CellCoord, CellCoord)> {
        self.grid.borrow().used_range()
    }

    pub fn non_empty_cells(&self) -> Vec<(CellCoord, Cell)> {
        self.grid.borrow().iter_non_empty().map(|(c, cell)| (c, cell.clone())).collect()
    }

    pub fn get(&self, addr: CellCoord) -> Option<Cell> {
        self.grid.borrow().get_cell(addr).cloned()
    }

    pub fn get_by_label(&self, label: &str) -> Result<Option<Cell>, EngineError> {
        let addr = parse_address(label)?;
        Ok(self.get(addr))
    }

    // ---- write surface ------------------------------------------------

    /// Sets a cell's content from a single input string: formulas begin
    /// with `=`, everything else is inferred as a number, boolean, or
    /// plain text literal, mirroring what a user types into a cell.
    pub fn set(&self, addr: CellCoord, input: impl Into<String>) -> Result<(), EngineError> {
        self.set_with_context(addr, input, None)
    }

    pub fn set_by_label(&self, label: &str, input: impl Into<String>) -> Result<(), EngineError> {
        let addr = parse_address(label)?;
        self.set(addr, input)
    }

    /// Like `set`, but formulas are evaluated against `ctx` rather than
    /// against the engine itself. `Workbook` uses this to give a sheet's
    /// formulas access to sheet-qualified references the engine alone
    /// cannot resolve.
    pub fn set_with_context(
        &self,
        addr: CellCoord,
        input: impl Into<String>,
        ctx: Option<&dyn EvalContext>,
    ) -> Result<(), EngineError> {
        let input = input.into();
        self.check_bounds(addr)?;

        let before = self.grid.borrow().get_cell(addr).cloned().unwrap_or_else(Cell::empty);
        self.commit_cell(addr, &input, ctx);
        let after = self.grid.borrow().get_cell(addr).cloned().unwrap_or_else(Cell::empty);

        // Propagation's batch-change for the downstream cells is emitted
        // before the cell-change for the cell directly set — listeners
        // depend on this order.
        let downstream = self.propagate(&[addr], ctx);
        if !downstream.is_empty() {
            self.dispatch(&ChangeEvent::BatchChanged { changes: downstream });
        }
        if before != after {
            self.dispatch(&ChangeEvent::CellChanged { addr, before, after });
        }
        self.record_snapshot(format!("set {}", format_address(addr)));
        Ok(())
    }

    /// Writes many cells in one pass: every cell is parsed and committed
    /// before propagation runs once for the whole set, rather than
    /// recalculating dependents after each individual write.
    pub fn set_cells(&self, entries: &[(CellCoord, String)]) -> Result<(), EngineError> {
        self.set_cells_with_context(entries, None)
    }

    pub fn set_cells_with_context(
        &self,
        entries: &[(CellCoord, String)],
        ctx: Option<&dyn EvalContext>,
    ) -> Result<(), EngineError> {
        for (addr, _) in entries {
            self.check_bounds(*addr)?;
        }

        let mut direct_changes = Vec::with_capacity(entries.len());
        let mut seeds = Vec::with_capacity(entries.len());

        for (addr, input) in entries {
            let before = self.grid.borrow().get_cell(*addr).cloned().unwrap_or_else(Cell::empty);
            self.commit_cell(*addr, input, ctx);
            let after = self.grid.borrow().get_cell(*addr).cloned().unwrap_or_else(Cell::empty);
            if before != after {
                direct_changes.push((*addr, before, after));
            }
            seeds.push(*addr);
        }

        // Direct and downstream changes are unified into a single
        // batch-change event, not one cell-change per directly-set cell.
        let downstream = self.propagate(&seeds, ctx);
        direct_changes.extend(downstream);
        if !direct_changes.is_empty() {
            self.dispatch(&ChangeEvent::BatchChanged { changes: direct_changes });
        }
        self.record_snapshot(format!("set {} cells", entries.len()));
        Ok(())
    }

    pub fn clear(&self, addr: CellCoord) -> Result<(), EngineError> {
        self.clear_with_context(addr, None)
    }

    pub fn clear_with_context(
        &self,
        addr: CellCoord,
        ctx: Option<&dyn EvalContext>,
    ) -> Result<(), EngineError> {
        self.check_bounds(addr)?;
        let before = self.grid.borrow().get_cell(addr).cloned().unwrap_or_else(Cell::empty);
        if before.is_empty() {
            return Ok(());
        }
        self.graph.borrow_mut().clear_for(addr);
        self.grid.borrow_mut().clear_cell(addr);

        let downstream = self.propagate(&[addr], ctx);
        if !downstream.is_empty() {
            self.dispatch(&ChangeEvent::BatchChanged { changes: downstream });
        }
        self.dispatch(&ChangeEvent::CellChanged { addr, before, after: Cell::empty() });
        self.record_snapshot(format!("clear {}", format_address(addr)));
        Ok(())
    }

    /// Looks up a cell the way the evaluator would, exposed publicly so a
    /// cross-sheet-aware context (`Workbook`) can read into this engine
    /// without needing it to also implement `EvalContext` on its behalf.
    pub fn get_cell_lookup(&self, coord: CellCoord) -> CellLookup {
        <Self as EvalContext>::get_cell(self, coord)
    }

    pub fn get_range_lookup(&self, start: CellCoord, end: CellCoord) -> Vec<CellLookup> {
        <Self as EvalContext>::get_range(self, start, end)
    }

    pub fn current_address(&self) -> CellCoord {
        *self.current_eval.borrow()
    }

    /// Dispatches a `CellChanged` event for a cell that was reevaluated by
    /// an external context (a cross-sheet refresh driven by `Workbook`)
    /// rather than through this engine's own `set`/`propagate` pipeline.
    /// Does not record a history snapshot — the cross-sheet refresh is
    /// folded into whatever snapshot the originating sheet's own write
    /// already recorded.
    pub fn notify_external_change(&self, addr: CellCoord, before: Cell, after: Cell) {
        self.dispatch(&ChangeEvent::CellChanged { addr, before, after });
    }

    /// Re-evaluates a single formula cell using an externally supplied
    /// context, without going through the normal set/commit pipeline or
    /// touching history. Used by `Workbook` to refresh a cell whose
    /// formula references another sheet after that sheet's own
    /// propagation has settled. Returns the before/after pair if the
    /// cell's value actually changed, so the caller can dispatch its own
    /// event and fold the change into its own history entry.
    pub fn reevaluate_with_context(&self, addr: CellCoord, ctx: &dyn EvalContext) -> Option<(Cell, Cell)> {
        let before = self.grid.borrow().get_cell(addr).cloned()?;
        if !before.is_formula() {
            return None;
        }
        self.evaluate_cell(addr, Some(ctx));
        let after = self.grid.borrow().get_cell(addr).cloned()?;
        (before != after).then_some((before, after))
    }

    /// Removes every cell. Distinct from dropping and recreating the
    /// engine: dimensions, listeners, and the custom function registry are
    /// untouched, and a single `BatchChanged` summarizes the wipe for
    /// listeners instead of one event per cell.
    pub fn clear_all(&self) {
        let removed: Vec<(CellCoord, Cell)> =
            self.grid.borrow().iter_non_empty().map(|(c, cell)| (c, cell.clone())).collect();
        if removed.is_empty() {
            return;
        }
        self.graph.borrow_mut().clear();
        self.grid.borrow_mut().clear_all();
        let changes = removed.into_iter().map(|(addr, before)| (addr, before, Cell::empty())).collect();
        self.dispatch(&ChangeEvent::BatchChanged { changes });
        self.record_snapshot("clear all");
    }

    /// Merges `patch` onto a cell's existing style without touching its
    /// value, formula, or dependencies — styling never participates in
    /// recalculation.
    pub fn update_style(&self, addr: CellCoord, patch: serde_json::Value) -> Result<(), EngineError> {
        self.check_bounds(addr)?;
        let mut cell = self.grid.borrow().get_cell(addr).cloned().unwrap_or_else(Cell::empty);
        let before = cell.clone();
        cell.style = Some(crate::style::apply_patch(cell.style.clone(), patch));
        self.grid.borrow_mut().set_cell(addr, cell.clone()).expect("bounds already checked");
        self.dispatch(&ChangeEvent::CellChanged { addr, before, after: cell });
        self.record_snapshot(format!("style {}", format_address(addr)));
        Ok(())
    }

    // ---- listeners ------------------------------------------------------

    pub fn add_listener(&self, listener: impl Fn(&ChangeEvent) + 'static) -> ListenerId {
        let mut next = self.next_listener_id.borrow_mut();
        let id = *next;
        *next += 1;
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn dispatch(&self, event: &ChangeEvent) {
        let snapshot: Vec<Rc<dyn Fn(&ChangeEvent)>> =
            self.listeners.borrow().iter().map(|(_, f)| f.clone()).collect();
        for listener in snapshot {
            listener(event);
        }
    }

    // ---- custom functions -------------------------------------------

    pub fn register_function(
        &self,
        name: impl Into<String>,
        f: impl Fn(&Evaluator<'_, Engine>, &[Expression]) -> EvalResult + 'static,
    ) {
        self.registry.borrow_mut().register(name, Rc::new(f));
    }

    // ---- undo / redo --------------------------------------------------

    pub fn can_undo(&self) -> bool {
        self.history.borrow().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.borrow().can_redo()
    }

    pub fn undo(&self) -> bool {
        let mut history = self.history.borrow_mut();
        let Some(snapshot) = history.undo().cloned() else {
            return false;
        };
        drop(history);
        self.restore(snapshot);
        true
    }

    pub fn redo(&self) -> bool {
        let mut history = self.history.borrow_mut();
        let Some(snapshot) = history.redo().cloned() else {
            return false;
        };
        drop(history);
        self.restore(snapshot);
        true
    }

    pub fn undo_description(&self) -> Option<String> {
        self.history.borrow().undo_description().map(str::to_string)
    }

    pub fn redo_description(&self) -> Option<String> {
        self.history.borrow().redo_description().map(str::to_string)
    }

    fn restore(&self, snapshot: EngineSnapshot) {
        let old: HashMap<CellCoord, Cell> =
            self.grid.borrow().iter_non_empty().map(|(c, cell)| (c, cell.clone())).collect();
        let new: HashMap<CellCoord, Cell> =
            snapshot.grid.iter_non_empty().map(|(c, cell)| (c, cell.clone())).collect();

        *self.grid.borrow_mut() = snapshot.grid;
        *self.graph.borrow_mut() = snapshot.graph;

        let mut addrs: HashSet<CellCoord> = old.keys().copied().collect();
        addrs.extend(new.keys().copied());
        let changes: Vec<_> = addrs
            .into_iter()
            .filter_map(|addr| {
                let before = old.get(&addr).cloned().unwrap_or_else(Cell::empty);
                let after = new.get(&addr).cloned().unwrap_or_else(Cell::empty);
                (before != after).then_some((addr, before, after))
            })
            .collect();
        if !changes.is_empty() {
            self.dispatch(&ChangeEvent::BatchChanged { changes });
        }
    }

    fn record_snapshot(&self, description: impl Into<String>) {
        let snapshot =
            EngineSnapshot { grid: self.grid.borrow().clone(), graph: self.graph.borrow().clone() };
        self.history.borrow_mut().record(snapshot, description);
    }

    // ---- serialization --------------------------------------------------

    pub fn to_state(&self, options: ToStateOptions) -> SpreadsheetState {
        let grid = self.grid.borrow();
        let cells: Vec<CellEntry> = grid
            .iter_non_empty()
            .map(|(addr, cell)| CellEntry {
                address: format_address(addr),
                cell: CellState {
                    raw: cell.raw.clone(),
                    computed: cell.computed.clone(),
                    formula: cell.is_formula().then(|| cell.raw.clone()),
                    error: cell.error.as_ref().map(|e| e.as_str()),
                    style: cell.style.clone(),
                },
            })
            .collect();

        let dependencies = options.include_dependencies.then(|| {
            let graph = self.graph.borrow();
            let mut precedents = HashMap::new();
            let mut dependents = HashMap::new();
            for (addr, _) in grid.iter_non_empty() {
                if let Some(set) = graph.get_precedents(addr) {
                    precedents.insert(format_address(addr), set.iter().map(|&c| format_address(c)).collect());
                }
                if let Some(set) = graph.get_dependents(addr) {
                    dependents.insert(format_address(addr), set.iter().map(|&c| format_address(c)).collect());
                }
            }
            DependenciesState { precedents, dependents }
        });

        SpreadsheetState {
            version: STATE_VERSION.to_string(),
            metadata: self.metadata.borrow().clone(),
            dimensions: grid.dimensions(),
            cells,
            view: options.include_view.then(|| self.view.borrow().clone()),
            dependencies,
        }
    }

    /// Rebuilds an engine from a previously exported state. Every formula
    /// is re-parsed and recomputed rather than trusting the persisted
    /// `computed`/`error` fields, so a state produced by an older, buggier
    /// evaluator self-heals on reload. History is collapsed to a fresh
    /// single-node tree rooted at the loaded state — the reconstruction's
    /// own per-cell writes are not undoable.
    pub fn from_state(state: SpreadsheetState) -> Result<Self, EngineError> {
        let engine = Engine::with_dimensions(state.dimensions);
        for entry in &state.cells {
            let addr = parse_address(&entry.address)?;
            let input = entry.cell.formula.clone().unwrap_or_else(|| entry.cell.raw.clone());
            engine.set(addr, input)?;
            if let Some(style) = entry.cell.style.clone() {
                engine.update_style(addr, style)?;
            }
        }
        *engine.metadata.borrow_mut() = state.metadata;
        if let Some(view) = state.view {
            *engine.view.borrow_mut() = view;
        }
        engine.history.borrow_mut().clear();
        Ok(engine)
    }

    // ---- internals --------------------------------------------------

    fn check_bounds(&self, addr: CellCoord) -> Result<(), EngineError> {
        let dims = self.grid.borrow().dimensions();
        if dims.contains(addr) {
            Ok(())
        } else {
            Err(OutOfBoundsError { coord: addr, dimensions: dims }.into())
        }
    }

    /// Parses, cycle-checks, and stores `input` at `addr`, updating the
    /// dependency graph and (for non-circular formulas) evaluating the
    /// cell's new value. Does not touch the dependency graph's dependents
    /// or emit any event — the caller handles both once it knows the full
    /// set of cells it is committing.
    fn commit_cell(&self, addr: CellCoord, input: &str, ctx: Option<&dyn EvalContext>) {
        let existing_style = self.grid.borrow().get_cell(addr).and_then(|c| c.style.clone());
        let mut needs_eval = false;

        let mut cell = if input.starts_with('=') {
            match parser::parse(input) {
                Ok(ast) => {
                    let precedents: HashSet<CellCoord> = extract_dependencies(&ast).into_iter().collect();
                    if self.graph.borrow().would_cycle(addr, &precedents) {
                        self.graph.borrow_mut().clear_for(addr);
                        let mut c = Cell::formula(input, ast);
                        c.error = Some(CellError::Circular);
                        c
                    } else {
                        self.graph.borrow_mut().add_edge(addr, precedents);
                        needs_eval = true;
                        Cell::formula(input, ast)
                    }
                }
                Err(_) => {
                    self.graph.borrow_mut().clear_for(addr);
                    let mut c = Cell::literal_text(input);
                    c.error = Some(CellError::Parse);
                    c.computed = CellValue::Empty;
                    c
                }
            }
        } else {
            self.graph.borrow_mut().clear_for(addr);
            literal_cell(input)
        };

        cell.style = existing_style;
        self.grid.borrow_mut().set_cell(addr, cell).expect("address already bounds-checked");
        if needs_eval {
            self.evaluate_cell(addr, ctx);
        }
    }

    /// Evaluates a formula cell's AST and writes back its computed value
    /// and error. `ctx` overrides the evaluation context — when `None`,
    /// the engine evaluates against itself (and the custom function
    /// registry applies); when `Some`, evaluation runs against the
    /// supplied context instead and custom functions are not available,
    /// since they are registered against the concrete `Engine` type.
    fn evaluate_cell(&self, addr: CellCoord, ctx: Option<&dyn EvalContext>) {
        let Some(mut cell) = self.grid.borrow().get_cell(addr).cloned() else { return };
        let Some(ast) = cell.formula_ast.clone() else { return };

        *self.current_eval.borrow_mut() = addr;
        let result = match ctx {
            Some(external) => Evaluator::new(external).evaluate(&ast),
            None => {
                let registry = self.registry.borrow();
                Evaluator::with_registry(self, &*registry).evaluate(&ast)
            }
        };
        cell.computed = result.to_cell_value();
        cell.error = result.to_cell_error();
        self.grid.borrow_mut().set_cell(addr, cell).expect("address already bounds-checked");
    }

    fn mark_circular(&self, addr: CellCoord) -> Option<(Cell, Cell)> {
        let before = self.grid.borrow().get_cell(addr).cloned()?;
        if !before.is_formula() {
            return None;
        }
        let mut after = before.clone();
        after.computed = CellValue::Empty;
        after.error = Some(CellError::Circular);
        self.grid.borrow_mut().set_cell(addr, after.clone()).expect("address already bounds-checked");
        Some((before, after))
    }

    /// Recalculates every cell downstream of `seeds`, in dependency order,
    /// and returns the (addr, before, after) triples that actually changed
    /// — the caller dispatches a single `BatchChanged` from this (merged
    /// with its own direct changes, for a batch write), never a per-cell
    /// `CellChanged` here. If called while a propagation pass is already in
    /// flight (a listener invoked from inside this same call re-entering
    /// `set`/`clear`), the seeds are queued instead of starting a nested
    /// pass — the in-flight pass picks them up on its next iteration once
    /// the current one settles, and this call returns an empty batch since
    /// nothing was evaluated synchronously.
    fn propagate(&self, seeds: &[CellCoord], ctx: Option<&dyn EvalContext>) -> Vec<(CellCoord, Cell, Cell)> {
        if *self.reentrant.borrow() {
            self.pending.borrow_mut().extend(seeds.iter().copied());
            return Vec::new();
        }
        *self.reentrant.borrow_mut() = true;

        let mut current_seeds: Vec<CellCoord> = seeds.to_vec();
        let mut batch: Vec<(CellCoord, Cell, Cell)> = Vec::new();

        loop {
            let order = match self.graph.borrow().recalc_order_many(&current_seeds) {
                Ok(order) => order,
                Err(cycle) => {
                    for &addr in &cycle.cycle_path {
                        if let Some((before, after)) = self.mark_circular(addr) {
                            batch.push((addr, before, after));
                        }
                    }
                    Vec::new()
                }
            };

            for addr in order {
                let before = self.grid.borrow().get_cell(addr).cloned().unwrap_or_else(Cell::empty);
                self.evaluate_cell(addr, ctx);
                let after = self.grid.borrow().get_cell(addr).cloned().unwrap_or_else(Cell::empty);
                if before != after {
                    batch.push((addr, before, after));
                }
            }

            let next: Vec<CellCoord> = self.pending.borrow_mut().drain(..).collect();
            if next.is_empty() {
                break;
            }
            current_seeds = next;
        }

        *self.reentrant.borrow_mut() = false;
        batch
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl EvalContext for Engine {
    fn get_cell(&self, coord: CellCoord) -> CellLookup {
        match self.grid.borrow().get_cell(coord) {
            Some(cell) => match &cell.error {
                Some(e) => CellLookup::Error(e.clone()),
                None => CellLookup::from(&cell.computed),
            },
            None => CellLookup::Empty,
        }
    }

    fn get_range(&self, start: CellCoord, end: CellCoord) -> Vec<CellLookup> {
        let mut out = Vec::new();
        for row in start.0..=end.0 {
            for col in start.1..=end.1 {
                out.push(self.get_cell((row, col)));
            }
        }
        out
    }

    fn get_sheet_cell(&self, _sheet: &str, _coord: CellCoord) -> Option<CellLookup> {
        // A bare `Engine` has no sibling sheets; `Workbook` supplies its own
        // `EvalContext` that resolves sheet-qualified references.
        None
    }

    fn get_sheet_range(&self, _sheet: &str, _start: CellCoord, _end: CellCoord) -> Option<Vec<CellLookup>> {
        None
    }

    fn current_address(&self) -> CellCoord {
        *self.current_eval.borrow()
    }
}

/// Infers a literal's type from its text the way a user typing into a cell
/// expects: a string that parses in full as a number becomes one, `TRUE`
/// and `FALSE` (any case) become booleans, everything else — including the
/// empty string — is text (or, for empty, clears the cell entirely).
fn literal_cell(input: &str) -> Cell {
    if input.is_empty() {
        return Cell::empty();
    }
    if let Ok(n) = input.parse::<f64>() {
        return Cell::literal_number(n);
    }
    match input.to_ascii_uppercase().as_str() {
        "TRUE" => Cell::literal_boolean(true),
        "FALSE" => Cell::literal_boolean(false),
        _ => Cell::literal_text(input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc as StdRc;

    fn a1(label: &str) -> CellCoord {
        parse_address(label).unwrap()
    }

    #[test]
    fn literal_number_round_trips() {
        let engine = Engine::new();
        engine.set_by_label("A1", "42").unwrap();
        assert_eq!(engine.get_by_label("A1").unwrap().unwrap().computed, CellValue::Number(42.0));
    }

    #[test]
    fn formula_recomputes_on_precedent_change() {
        let engine = Engine::new();
        engine.set_by_label("A1", "2").unwrap();
        engine.set_by_label("A2", "=A1*10").unwrap();
        assert_eq!(engine.get_by_label("A2").unwrap().unwrap().computed, CellValue::Number(20.0));

        engine.set_by_label("A1", "5").unwrap();
        assert_eq!(engine.get_by_label("A2").unwrap().unwrap().computed, CellValue::Number(50.0));
    }

    #[test]
    fn diamond_dependency_recomputes_every_downstream_cell() {
        let engine = Engine::new();
        engine.set_by_label("A1", "1").unwrap();
        engine.set_by_label("B1", "=A1+1").unwrap();
        engine.set_by_label("C1", "=A1+2").unwrap();
        engine.set_by_label("D1", "=B1+C1").unwrap();
        assert_eq!(engine.get_by_label("D1").unwrap().unwrap().computed, CellValue::Number(5.0));

        engine.set_by_label("A1", "10").unwrap();
        assert_eq!(engine.get_by_label("D1").unwrap().unwrap().computed, CellValue::Number(23.0));
    }

    #[test]
    fn self_reference_is_marked_circular_without_touching_the_graph() {
        let engine = Engine::new();
        let err = engine.set_by_label("A1", "=A1+1");
        assert!(err.is_ok());
        let cell = engine.get_by_label("A1").unwrap().unwrap();
        assert_eq!(cell.error, Some(CellError::Circular));
    }

    #[test]
    fn out_of_bounds_set_is_rejected() {
        let engine = Engine::with_dimensions(Dimensions { rows: 2, cols: 2 });
        let result = engine.set((5, 5), "1");
        assert!(matches!(result, Err(EngineError::OutOfBounds(_))));
    }

    #[test]
    fn clear_propagates_to_dependents() {
        let engine = Engine::new();
        engine.set_by_label("A1", "5").unwrap();
        engine.set_by_label("A2", "=A1*2").unwrap();
        engine.clear(a1("A1")).unwrap();
        assert_eq!(engine.get_by_label("A2").unwrap().unwrap().computed, CellValue::Number(0.0));
    }

    #[test]
    fn undo_restores_previous_value_and_redo_reapplies_it() {
        let engine = Engine::new();
        engine.set_by_label("A1", "1").unwrap();
        engine.set_by_label("A1", "2").unwrap();
        assert_eq!(engine.get_by_label("A1").unwrap().unwrap().computed, CellValue::Number(2.0));

        assert!(engine.undo());
        assert_eq!(engine.get_by_label("A1").unwrap().unwrap().computed, CellValue::Number(1.0));

        assert!(engine.redo());
        assert_eq!(engine.get_by_label("A1").unwrap().unwrap().computed, CellValue::Number(2.0));
    }

    #[test]
    fn listener_receives_cell_changed_events() {
        let engine = Engine::new();
        let seen: StdRc<StdRefCell<Vec<CellCoord>>> = StdRc::new(StdRefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        engine.add_listener(move |event| {
            if let ChangeEvent::CellChanged { addr, .. } = event {
                seen_clone.borrow_mut().push(*addr);
            }
        });
        engine.set_by_label("A1", "1").unwrap();
        assert_eq!(*seen.borrow(), vec![a1("A1")]);
    }

    #[test]
    fn removed_listener_stops_receiving_events() {
        let engine = Engine::new();
        let count = StdRc::new(StdRefCell::new(0));
        let count_clone = count.clone();
        let id = engine.add_listener(move |_| *count_clone.borrow_mut() += 1);
        engine.set_by_label("A1", "1").unwrap();
        assert!(engine.remove_listener(id));
        engine.set_by_label("A2", "1").unwrap();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn reentrant_set_from_a_listener_during_propagation_is_queued_not_recursed() {
        // A2 depends on A1, so recomputing A2 happens from inside
        // `propagate`, with the reentrancy flag already set, and surfaces
        // to listeners as part of the downstream `batch-change`. A listener
        // reacting to A2's recomputation writes to B1 — that write must be
        // queued and drained by the in-flight pass, not recursed into.
        let engine = StdRc::new(Engine::new());
        engine.set_by_label("A2", "=A1+1").unwrap();
        let inner = engine.clone();
        engine.add_listener(move |event| {
            if let ChangeEvent::BatchChanged { changes } = event {
                let a2_updated = changes
                    .iter()
                    .any(|(addr, _, after)| *addr == a1("A2") && after.computed == CellValue::Number(11.0));
                if a2_updated {
                    inner.set_by_label("B1", "99").unwrap();
                }
            }
        });
        engine.set_by_label("A1", "10").unwrap();
        assert_eq!(engine.get_by_label("A2").unwrap().unwrap().computed, CellValue::Number(11.0));
        assert_eq!(engine.get_by_label("B1").unwrap().unwrap().computed, CellValue::Number(99.0));
    }

    #[test]
    fn state_round_trips_formulas_and_values() {
        let engine = Engine::new();
        engine.set_by_label("A1", "3").unwrap();
        engine.set_by_label("A2", "=A1*2").unwrap();
        engine.update_style(a1("A1"), serde_json::json!({"bold": true})).unwrap();

        let state = engine.to_state(ToStateOptions::default());
        let restored = Engine::from_state(state).unwrap();

        assert_eq!(restored.get_by_label("A2").unwrap().unwrap().computed, CellValue::Number(6.0));
        assert_eq!(
            restored.get_by_label("A1").unwrap().unwrap().style,
            Some(serde_json::json!({"bold": true}))
        );
        assert!(!restored.can_undo());
    }

    #[test]
    fn batch_change_for_downstream_precedes_cell_change_for_the_direct_set() {
        // set(addr, "=dep+1") then set(dep, v): the listener must see the
        // batch-change carrying addr's recomputation before the cell-change
        // for dep itself, since propagation runs before the primary set's
        // own event is emitted.
        let engine = Engine::new();
        engine.set_by_label("A1", "=B1+1").unwrap();
        let order: StdRc<StdRefCell<Vec<&'static str>>> = StdRc::new(StdRefCell::new(Vec::new()));
        let order_clone = order.clone();
        engine.add_listener(move |event| match event {
            ChangeEvent::BatchChanged { .. } => order_clone.borrow_mut().push("batch"),
            ChangeEvent::CellChanged { .. } => order_clone.borrow_mut().push("cell"),
        });
        engine.set_by_label("B1", "10").unwrap();
        assert_eq!(*order.borrow(), vec!["batch", "cell"]);
    }

    #[test]
    fn set_cells_emits_one_batch_change_for_direct_and_downstream_together() {
        let engine = Engine::new();
        engine.set_by_label("B1", "=A1+1").unwrap();
        let events: StdRc<StdRefCell<Vec<ChangeEvent>>> = StdRc::new(StdRefCell::new(Vec::new()));
        let events_clone = events.clone();
        engine.add_listener(move |event| events_clone.borrow_mut().push(event.clone()));

        engine.set_cells(&[(a1("A1"), "5".to_string())]).unwrap();

        let events = events.borrow();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChangeEvent::BatchChanged { changes } => {
                assert!(changes.iter().any(|(addr, _, _)| *addr == a1("A1")));
                assert!(changes.iter().any(|(addr, _, _)| *addr == a1("B1")));
            }
            other => panic!("expected a single BatchChanged, got {other:?}"),
        }
    }

    #[test]
    fn style_update_does_not_trigger_recalculation_events() {
        let engine = Engine::new();
        engine.set_by_label("A1", "1").unwrap();
        engine.set_by_label("A2", "=A1").unwrap();
        let count = StdRc::new(StdRefCell::new(0));
        let count_clone = count.clone();
        engine.add_listener(move |_| *count_clone.borrow_mut() += 1);
        engine.update_style(a1("A1"), serde_json::json!({"bold": true})).unwrap();
        assert_eq!(*count.borrow(), 1);
    }
}
