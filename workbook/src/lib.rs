//! FILENAME: workbook/src/lib.rs
//! PURPOSE: Composes multiple single-sheet engines into one workbook,
//! resolving sheet-qualified references (`Sales!A1`) across them.
//! CONTEXT: Each sheet keeps its own intra-sheet `DependencyGraph`
//! unchanged; cross-sheet edges live only in a side-table here, so a
//! sheet's own engine never has to know it is part of a workbook. After a
//! sheet's own propagation settles, the workbook walks that side-table to
//! refresh whatever formulas on *other* sheets pointed at what just
//! changed.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use engine::{parse_address, CellCoord, CellLookup, EvalContext, Engine, SpreadsheetState, ToStateOptions};
use serde::{Deserialize, Serialize};

/// Stable, opaque identity for a sheet. Unlike its name, a sheet's id never
/// changes across a rename, so cross-sheet edges and the active-sheet
/// pointer can be keyed on it safely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SheetId(u64);

#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkbookError {
    #[error("a sheet named {0:?} already exists")]
    DuplicateName(String),
    #[error("no sheet with id {0:?}")]
    UnknownId(SheetId),
    #[error("a workbook must keep at least one sheet")]
    LastSheet,
    #[error(transparent)]
    Engine(#[from] engine::EngineError),
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] engine::AddressError),
}

pub struct Sheet {
    pub id: SheetId,
    pub name: String,
    pub engine: Engine,
    pub hidden: bool,
}

/// Persisted, caller-facing shape of a workbook — the cross-sheet analogue
/// of `engine::SpreadsheetState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbookState {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<WorkbookMetadata>,
    pub sheets: Vec<SheetState>,
    pub active_sheet_id: SheetId,
    pub sheet_order: Vec<SheetId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkbookMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetState {
    pub id: SheetId,
    pub name: String,
    pub index: usize,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    #[serde(flatten)]
    pub sheet: SpreadsheetState,
}

/// Options controlling what `Workbook::to_state` includes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkbookToStateOptions {
    pub include_hidden_sheets: bool,
    pub include_metadata: bool,
}

const WORKBOOK_STATE_VERSION: &str = "2.0";

/// One directed cross-sheet dependency edge: a formula cell on
/// `from_sheet` references `to_sheet!to_addr`.
type CrossSheetKey = (SheetId, CellCoord);

pub struct Workbook {
    sheets: Vec<Sheet>,
    active: SheetId,
    next_id: u64,
    metadata: RefCell<Option<WorkbookMetadata>>,
    /// (referenced sheet, referenced address) -> set of (referencing
    /// sheet, referencing address) that must be re-evaluated when the
    /// referenced cell changes. Cross-sheet cycles are not detected: if
    /// sheet A depends on sheet B which depends back on A, re-evaluating
    /// one settles the other one pass behind, and values can go stale
    /// rather than error out. Detecting this would mean treating the
    /// whole workbook as one dependency graph, which would defeat the
    /// point of keeping each sheet's graph independent and cheap to
    /// recompute in isolation.
    cross_edges: RefCell<HashMap<CrossSheetKey, HashSet<CrossSheetKey>>>,
}

impl Workbook {
    /// A new workbook always starts with exactly one sheet — an empty
    /// workbook with none would have no meaningful active sheet.
    pub fn new() -> Self {
        let mut wb = Workbook {
            sheets: Vec::new(),
            active: SheetId(0),
            next_id: 0,
            metadata: RefCell::new(None),
            cross_edges: RefCell::new(HashMap::new()),
        };
        let id = wb.alloc_id();
        wb.sheets.push(Sheet { id, name: "Sheet1".to_string(), engine: Engine::new(), hidden: false });
        wb.active = id;
        wb
    }

    fn alloc_id(&mut self) -> SheetId {
        let id = SheetId(self.next_id);
        self.next_id += 1;
        id
    }

    // ---- sheet lookup -------------------------------------------------

    pub fn sheets(&self) -> impl Iterator<Item = &Sheet> {
        self.sheets.iter()
    }

    pub fn sheet(&self, id: SheetId) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.id == id)
    }

    pub fn sheet_by_name(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_by_index(&self, index: usize) -> Option<&Sheet> {
        self.sheets.get(index)
    }

    pub fn sheet_index(&self, id: SheetId) -> Option<usize> {
        self.sheets.iter().position(|s| s.id == id)
    }

    pub fn active_sheet_id(&self) -> SheetId {
        self.active
    }

    pub fn active_sheet(&self) -> &Sheet {
        self.sheet(self.active).expect("active sheet id always refers to a live sheet")
    }

    pub fn set_active_sheet(&mut self, id: SheetId) -> Result<(), WorkbookError> {
        if self.sheet(id).is_none() {
            return Err(WorkbookError::UnknownId(id));
        }
        self.active = id;
        Ok(())
    }

    // ---- sheet management -----------------------------------------------

    /// Appends a new empty sheet named `name`. Rejects the call outright
    /// if the name is already taken rather than silently picking a
    /// suffixed alternative — a caller that cares about the exact name it
    /// asked for should never be surprised by one it didn't.
    pub fn add_sheet(&mut self, name: impl Into<String>) -> Result<SheetId, WorkbookError> {
        let name = name.into();
        if self.sheet_by_name(&name).is_some() {
            return Err(WorkbookError::DuplicateName(name));
        }
        let id = self.alloc_id();
        self.sheets.push(Sheet { id, name, engine: Engine::new(), hidden: false });
        Ok(id)
    }

    pub fn remove_sheet(&mut self, id: SheetId) -> Result<(), WorkbookError> {
        if self.sheets.len() <= 1 {
            return Err(WorkbookError::LastSheet);
        }
        let index = self.sheet_index(id).ok_or(WorkbookError::UnknownId(id))?;
        self.sheets.remove(index);
        self.cross_edges.borrow_mut().retain(|(sheet, _), dependents| {
            dependents.retain(|(s, _)| *s != id);
            *sheet != id
        });

        if self.active == id {
            let fallback = if index > 0 { index - 1 } else { 0 };
            self.active = self.sheets[fallback.min(self.sheets.len() - 1)].id;
        }
        Ok(())
    }

    pub fn rename_sheet(&mut self, id: SheetId, new_name: impl Into<String>) -> Result<(), WorkbookError> {
        let new_name = new_name.into();
        if let Some(existing) = self.sheet_by_name(&new_name) {
            if existing.id != id {
                return Err(WorkbookError::DuplicateName(new_name));
            }
        }
        let sheet = self.sheets.iter_mut().find(|s| s.id == id).ok_or(WorkbookError::UnknownId(id))?;
        sheet.name = new_name;
        Ok(())
    }

    pub fn move_sheet(&mut self, id: SheetId, new_index: usize) -> Result<(), WorkbookError> {
        let current = self.sheet_index(id).ok_or(WorkbookError::UnknownId(id))?;
        let sheet = self.sheets.remove(current);
        let clamped = new_index.min(self.sheets.len());
        self.sheets.insert(clamped, sheet);
        Ok(())
    }

    /// Copies a sheet's full content (cells, styles, dimensions) into a new
    /// sheet. Cells are replayed through `set_cell`, not the plain engine
    /// clone, so a formula referencing another sheet resolves correctly on
    /// the copy from the start rather than only after its next edit.
    pub fn duplicate_sheet(&mut self, id: SheetId, new_name: impl Into<String>) -> Result<SheetId, WorkbookError> {
        let new_name = new_name.into();
        if self.sheet_by_name(&new_name).is_some() {
            return Err(WorkbookError::DuplicateName(new_name));
        }
        let source = self.sheet(id).ok_or(WorkbookError::UnknownId(id))?;
        let source_state = source.engine.to_state(ToStateOptions::default());
        let dimensions = source_state.dimensions;

        let new_id = self.alloc_id();
        self.sheets.push(Sheet { id: new_id, name: new_name, engine: Engine::with_dimensions(dimensions), hidden: false });

        for entry in &source_state.cells {
            let addr = parse_address(&entry.address)?;
            let input = entry.cell.formula.clone().unwrap_or_else(|| entry.cell.raw.clone());
            self.set_cell(new_id, addr, input)?;
            if let Some(style) = entry.cell.style.clone() {
                self.sheet(new_id).expect("just inserted").engine.update_style(addr, style)?;
            }
        }
        Ok(new_id)
    }

    pub fn set_hidden(&mut self, id: SheetId, hidden: bool) -> Result<(), WorkbookError> {
        let sheet = self.sheets.iter_mut().find(|s| s.id == id).ok_or(WorkbookError::UnknownId(id))?;
        sheet.hidden = hidden;
        Ok(())
    }

    // ---- metadata -------------------------------------------------------

    pub fn metadata(&self) -> Option<WorkbookMetadata> {
        self.metadata.borrow().clone()
    }

    pub fn set_metadata(&self, metadata: WorkbookMetadata) {
        *self.metadata.borrow_mut() = Some(metadata);
    }

    // ---- cell access with cross-sheet propagation -----------------------

    /// Sets a cell on `sheet_id`, evaluating it (and every intra-sheet
    /// dependent) against a workbook-aware context that can resolve
    /// `Other!A1`-style references. Once that sheet's own propagation
    /// settles, every formula on a *different* sheet that was recorded as
    /// depending on one of the changed cells is re-evaluated in turn.
    pub fn set_cell(
        &self,
        sheet_id: SheetId,
        addr: CellCoord,
        input: impl Into<String>,
    ) -> Result<(), WorkbookError> {
        let sheet = self.sheet(sheet_id).ok_or(WorkbookError::UnknownId(sheet_id))?;
        let input = input.into();

        self.register_cross_edges(sheet_id, addr, &input);

        let ctx = WorkbookEvalContext { workbook: self, sheet_id };
        sheet.engine.set_with_context(addr, input, Some(&ctx))?;

        self.refresh_cross_sheet_dependents(sheet_id, &[addr]);
        Ok(())
    }

    pub fn set_cell_by_label(
        &self,
        sheet_id: SheetId,
        label: &str,
        input: impl Into<String>,
    ) -> Result<(), WorkbookError> {
        let addr = parse_address(label)?;
        self.set_cell(sheet_id, addr, input)
    }

    pub fn clear_cell(&self, sheet_id: SheetId, addr: CellCoord) -> Result<(), WorkbookError> {
        let sheet = self.sheet(sheet_id).ok_or(WorkbookError::UnknownId(sheet_id))?;
        self.cross_edges.borrow_mut().remove(&(sheet_id, addr));
        let ctx = WorkbookEvalContext { workbook: self, sheet_id };
        sheet.engine.clear_with_context(addr, Some(&ctx))?;
        self.refresh_cross_sheet_dependents(sheet_id, &[addr]);
        Ok(())
    }

    /// Replaces the edges a cell contributes to the cross-sheet side-table
    /// with whatever its freshly-typed input references now. Called before
    /// the write actually lands, so a formula that drops a cross-sheet
    /// reference it used to have doesn't leave a stale edge behind.
    fn register_cross_edges(&self, sheet_id: SheetId, addr: CellCoord, input: &str) {
        let mut edges = self.cross_edges.borrow_mut();
        for dependents in edges.values_mut() {
            dependents.remove(&(sheet_id, addr));
        }

        if !input.starts_with('=') {
            return;
        }
        let Ok(ast) = parser::parse(input) else { return };
        for (sheet_name, target_addr) in engine::extract_cross_sheet_refs(&ast) {
            let Some(target_sheet) = self.sheet_by_name(&sheet_name) else { continue };
            edges.entry((target_sheet.id, target_addr)).or_default().insert((sheet_id, addr));
        }
    }

    /// After `changed_addrs` on `sheet_id` have settled, re-evaluates every
    /// formula on another sheet recorded as depending on one of them. This
    /// runs one pass deep per call: a dependent's own recomputation can, in
    /// principle, change a cell another sheet depends on in turn, but
    /// chasing that recursively is exactly the cross-sheet cycle case the
    /// side-table deliberately doesn't try to detect, so refreshing stops
    /// after this single sweep.
    fn refresh_cross_sheet_dependents(&self, sheet_id: SheetId, changed_addrs: &[CellCoord]) {
        let edges = self.cross_edges.borrow();
        let mut to_refresh: Vec<CrossSheetKey> = Vec::new();
        for &addr in changed_addrs {
            if let Some(dependents) = edges.get(&(sheet_id, addr)) {
                to_refresh.extend(dependents.iter().copied());
            }
        }
        drop(edges);

        for (dep_sheet_id, dep_addr) in to_refresh {
            let Some(dep_sheet) = self.sheet(dep_sheet_id) else { continue };
            let ctx = WorkbookEvalContext { workbook: self, sheet_id: dep_sheet_id };
            if let Some((before, after)) = dep_sheet.engine.reevaluate_with_context(dep_addr, &ctx) {
                dep_sheet.engine.notify_external_change(dep_addr, before, after);
            }
        }
    }

    // ---- serialization --------------------------------------------------

    pub fn to_state(&self, options: WorkbookToStateOptions) -> WorkbookState {
        let sheets = self
            .sheets
            .iter()
            .enumerate()
            .filter(|(_, sheet)| options.include_hidden_sheets || !sheet.hidden)
            .map(|(index, sheet)| SheetState {
                id: sheet.id,
                name: sheet.name.clone(),
                index,
                hidden: sheet.hidden,
                sheet: sheet.engine.to_state(ToStateOptions::default()),
            })
            .collect();

        WorkbookState {
            version: WORKBOOK_STATE_VERSION.to_string(),
            metadata: options.include_metadata.then(|| self.metadata()).flatten(),
            sheets,
            active_sheet_id: self.active,
            sheet_order: self.sheets.iter().map(|s| s.id).collect(),
        }
    }

    /// Rebuilds a workbook from a previously exported state. Every sheet's
    /// cells are replayed through `set_cell` rather than the plain engine
    /// `from_state`, so cross-sheet formulas re-register their side-table
    /// edges and resolve correctly on first evaluation, not just on the
    /// next change.
    pub fn from_state(state: WorkbookState) -> Result<Self, WorkbookError> {
        let mut wb = Workbook {
            sheets: Vec::new(),
            active: SheetId(0),
            next_id: 0,
            metadata: RefCell::new(state.metadata),
            cross_edges: RefCell::new(HashMap::new()),
        };

        let mut ordered = state.sheets;
        ordered.sort_by_key(|s| s.index);

        for sheet_state in &ordered {
            wb.next_id = wb.next_id.max(sheet_state.id.0 + 1);
            wb.sheets.push(Sheet {
                id: sheet_state.id,
                name: sheet_state.name.clone(),
                engine: Engine::with_dimensions(sheet_state.sheet.dimensions),
                hidden: sheet_state.hidden,
            });
        }

        for sheet_state in &ordered {
            for entry in &sheet_state.sheet.cells {
                let addr = parse_address(&entry.address)?;
                let input = entry.cell.formula.clone().unwrap_or_else(|| entry.cell.raw.clone());
                wb.set_cell(sheet_state.id, addr, input)?;
                if let Some(style) = entry.cell.style.clone() {
                    wb.sheet(sheet_state.id)
                        .expect("just inserted")
                        .engine
                        .update_style(addr, style)?;
                }
            }
        }

        wb.active =
            wb.sheet(state.active_sheet_id).map(|s| s.id).or_else(|| wb.sheets.first().map(|s| s.id)).ok_or(
                WorkbookError::UnknownId(state.active_sheet_id),
            )?;

        Ok(wb)
    }
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

/// The evaluation context a sheet's formulas see while part of a workbook:
/// intra-sheet lookups defer straight to that sheet's own engine, and
/// `Other!A1`-qualified lookups resolve by name against the workbook's
/// other sheets.
struct WorkbookEvalContext<'a> {
    workbook: &'a Workbook,
    sheet_id: SheetId,
}

impl<'a> EvalContext for WorkbookEvalContext<'a> {
    fn get_cell(&self, coord: CellCoord) -> CellLookup {
        match self.workbook.sheet(self.sheet_id) {
            Some(sheet) => sheet.engine.get_cell_lookup(coord),
            None => CellLookup::Empty,
        }
    }

    fn get_range(&self, start: CellCoord, end: CellCoord) -> Vec<CellLookup> {
        match self.workbook.sheet(self.sheet_id) {
            Some(sheet) => sheet.engine.get_range_lookup(start, end),
            None => Vec::new(),
        }
    }

    fn get_sheet_cell(&self, sheet: &str, coord: CellCoord) -> Option<CellLookup> {
        let target = self.workbook.sheet_by_name(sheet)?;
        Some(target.engine.get_cell_lookup(coord))
    }

    fn get_sheet_range(&self, sheet: &str, start: CellCoord, end: CellCoord) -> Option<Vec<CellLookup>> {
        let target = self.workbook.sheet_by_name(sheet)?;
        Some(target.engine.get_range_lookup(start, end))
    }

    fn current_address(&self) -> CellCoord {
        self.workbook
            .sheet(self.sheet_id)
            .map(|s| s.engine.current_address())
            .unwrap_or((0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_workbook_has_one_sheet_named_sheet1() {
        let wb = Workbook::new();
        assert_eq!(wb.sheets().count(), 1);
        assert_eq!(wb.active_sheet().name, "Sheet1");
    }

    #[test]
    fn add_sheet_rejects_duplicate_names() {
        let mut wb = Workbook::new();
        wb.add_sheet("Sales").unwrap();
        let err = wb.add_sheet("Sales");
        assert!(matches!(err, Err(WorkbookError::DuplicateName(_))));
    }

    #[test]
    fn removing_active_sheet_falls_back_to_previous_sibling() {
        let mut wb = Workbook::new();
        let second = wb.add_sheet("Sheet2").unwrap();
        wb.set_active_sheet(second).unwrap();
        wb.remove_sheet(second).unwrap();
        assert_eq!(wb.active_sheet().name, "Sheet1");
    }

    #[test]
    fn last_sheet_cannot_be_removed() {
        let mut wb = Workbook::new();
        let only = wb.active_sheet_id();
        assert!(matches!(wb.remove_sheet(only), Err(WorkbookError::LastSheet)));
    }

    #[test]
    fn cross_sheet_formula_resolves_value_from_another_sheet() {
        let mut wb = Workbook::new();
        let sheet1 = wb.active_sheet_id();
        let sheet2 = wb.add_sheet("Sales").unwrap();

        wb.set_cell_by_label(sheet1, "A1", "10").unwrap();
        wb.set_cell_by_label(sheet2, "B1", "=Sheet1!A1*2").unwrap();

        let cell = wb.sheet(sheet2).unwrap().engine.get_by_label("B1").unwrap().unwrap();
        assert_eq!(cell.computed, engine::CellValue::Number(20.0));
    }

    #[test]
    fn changing_source_sheet_refreshes_cross_sheet_dependent() {
        let mut wb = Workbook::new();
        let sheet1 = wb.active_sheet_id();
        let sheet2 = wb.add_sheet("Sales").unwrap();

        wb.set_cell_by_label(sheet1, "A1", "10").unwrap();
        wb.set_cell_by_label(sheet2, "B1", "=Sheet1!A1*2").unwrap();
        wb.set_cell_by_label(sheet1, "A1", "50").unwrap();

        let cell = wb.sheet(sheet2).unwrap().engine.get_by_label("B1").unwrap().unwrap();
        assert_eq!(cell.computed, engine::CellValue::Number(100.0));
    }

    #[test]
    fn rename_sheet_rejects_collision_with_another_sheet() {
        let mut wb = Workbook::new();
        wb.add_sheet("Sales").unwrap();
        let sheet1 = wb.active_sheet_id();
        let err = wb.rename_sheet(sheet1, "Sales");
        assert!(matches!(err, Err(WorkbookError::DuplicateName(_))));
    }

    #[test]
    fn duplicate_sheet_copies_cell_content() {
        let mut wb = Workbook::new();
        let sheet1 = wb.active_sheet_id();
        wb.set_cell_by_label(sheet1, "A1", "7").unwrap();
        let copy = wb.duplicate_sheet(sheet1, "Sheet1 copy").unwrap();

        let cell = wb.sheet(copy).unwrap().engine.get_by_label("A1").unwrap().unwrap();
        assert_eq!(cell.computed, engine::CellValue::Number(7.0));
    }

    #[test]
    fn workbook_state_round_trips_cross_sheet_formula() {
        let mut wb = Workbook::new();
        let sheet1 = wb.active_sheet_id();
        let sheet2 = wb.add_sheet("Sales").unwrap();
        wb.set_cell_by_label(sheet1, "A1", "10").unwrap();
        wb.set_cell_by_label(sheet2, "B1", "=Sheet1!A1*2").unwrap();

        let state = wb.to_state(WorkbookToStateOptions { include_hidden_sheets: true, include_metadata: true });
        let restored = Workbook::from_state(state).unwrap();

        let restored_sheet2 = restored.sheet_by_name("Sales").unwrap();
        let cell = restored_sheet2.engine.get_by_label("B1").unwrap().unwrap();
        assert_eq!(cell.computed, engine::CellValue::Number(20.0));
    }
}
