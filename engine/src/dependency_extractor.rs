//! FILENAME: engine/src/dependency_extractor.rs
//! PURPOSE: Walks a parsed formula AST and flattens every cell/range
//! reference it contains into the list of single-cell addresses the
//! dependency graph needs.
//! CONTEXT: Sheet-qualified references (`Sheet1!A1`) are intentionally
//! skipped here — those are cross-sheet edges, and per spec they live only
//! in the workbook's cross-sheet side-table, never in a single sheet's own
//! `DependencyGraph`. A range reference expands to every address it covers.

use crate::address::{a1_to_coord, CellCoord};
use parser::Expression;

/// Extracts every intra-sheet cell dependency referenced by `expr`, with
/// ranges expanded to each contained address. Out-of-bounds references
/// (which the parser already rejects before this point) are silently
/// dropped rather than panicking.
pub fn extract_dependencies(expr: &Expression) -> Vec<CellCoord> {
    let mut out = Vec::new();
    walk(expr, &mut out);
    out
}

fn walk(expr: &Expression, out: &mut Vec<CellCoord>) {
    match expr {
        Expression::Literal(_) => {}

        Expression::CellRef { sheet: None, col, row, .. } => {
            if let Ok(coord) = a1_to_coord(col, *row) {
                out.push(coord);
            }
        }

        // Cross-sheet references are tracked by the workbook layer, not the
        // per-sheet dependency graph.
        Expression::CellRef { sheet: Some(_), .. } => {}

        Expression::Range { sheet: None, start, end } => {
            if let (Some(s), Some(e)) = (cell_ref_coord(start), cell_ref_coord(end)) {
                let top = s.0.min(e.0);
                let bottom = s.0.max(e.0);
                let left = s.1.min(e.1);
                let right = s.1.max(e.1);
                for row in top..=bottom {
                    for col in left..=right {
                        out.push((row, col));
                    }
                }
            }
        }

        Expression::Range { sheet: Some(_), .. } => {}

        Expression::BinaryOp { left, right, .. } => {
            walk(left, out);
            walk(right, out);
        }

        Expression::UnaryOp { operand, .. } => walk(operand, out),

        Expression::FunctionCall { args, .. } => {
            for arg in args {
                walk(arg, out);
            }
        }
    }
}

fn cell_ref_coord(expr: &Expression) -> Option<CellCoord> {
    match expr {
        Expression::CellRef { col, row, .. } => a1_to_coord(col, *row).ok(),
        _ => None,
    }
}

/// Every sheet-qualified cell/range reference inside `expr`, as
/// `(sheet_name, address)` pairs with ranges expanded — used by the
/// workbook layer to maintain its cross-sheet side-table.
pub fn extract_cross_sheet_refs(expr: &Expression) -> Vec<(String, CellCoord)> {
    let mut out = Vec::new();
    walk_cross_sheet(expr, &mut out);
    out
}

fn walk_cross_sheet(expr: &Expression, out: &mut Vec<(String, CellCoord)>) {
    match expr {
        Expression::Literal(_) => {}
        Expression::CellRef { sheet: Some(name), col, row, .. } => {
            if let Ok(coord) = a1_to_coord(col, *row) {
                out.push((name.clone(), coord));
            }
        }
        Expression::CellRef { sheet: None, .. } => {}
        Expression::Range { sheet: Some(name), start, end } => {
            if let (Some(s), Some(e)) = (cell_ref_coord(start), cell_ref_coord(end)) {
                let top = s.0.min(e.0);
                let bottom = s.0.max(e.0);
                let left = s.1.min(e.1);
                let right = s.1.max(e.1);
                for row in top..=bottom {
                    for col in left..=right {
                        out.push((name.clone(), (row, col)));
                    }
                }
            }
        }
        Expression::Range { sheet: None, .. } => {}
        Expression::BinaryOp { left, right, .. } => {
            walk_cross_sheet(left, out);
            walk_cross_sheet(right, out);
        }
        Expression::UnaryOp { operand, .. } => walk_cross_sheet(operand, out),
        Expression::FunctionCall { args, .. } => {
            for arg in args {
                walk_cross_sheet(arg, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(row: u32, col: u32) -> CellCoord {
        (row, col)
    }

    #[test]
    fn single_cell_ref_extracted() {
        let ast = parser::parse("=A1+1").unwrap();
        assert_eq!(extract_dependencies(&ast), vec![coord(0, 0)]);
    }

    #[test]
    fn range_expands_to_every_address() {
        let ast = parser::parse("=SUM(A1:B2)").unwrap();
        let mut deps = extract_dependencies(&ast);
        deps.sort();
        assert_eq!(deps, vec![coord(0, 0), coord(0, 1), coord(1, 0), coord(1, 1)]);
    }

    #[test]
    fn cross_sheet_ref_is_not_an_intra_sheet_dependency() {
        let ast = parser::parse("=Sales!A1+1").unwrap();
        assert!(extract_dependencies(&ast).is_empty());
        assert_eq!(extract_cross_sheet_refs(&ast), vec![("Sales".to_string(), coord(0, 0))]);
    }

    #[test]
    fn nested_function_calls_collect_all_refs() {
        let ast = parser::parse("=IF(A1>0,SUM(B1:B3),C1)").unwrap();
        let mut deps = extract_dependencies(&ast);
        deps.sort();
        assert_eq!(
            deps,
            vec![coord(0, 0), coord(0, 1), coord(0, 2), coord(1, 1), coord(2, 1)]
        );
    }
}
