//! FILENAME: engine/src/cell.rs
//! PURPOSE: Defines the fundamental data structures for a single spreadsheet cell.
//! CONTEXT: A cell separates the user's verbatim input (`raw`) from the
//! parsed formula AST, the last computed value, and any evaluation error —
//! all four are tracked independently so the engine can answer "what did
//! the user type", "what does it mean", and "what did it evaluate to" as
//! three separate questions. Designed to be lightweight, since millions of
//! these may exist in a single grid.

use parser::Expression;
use serde::{Deserialize, Serialize};

/// Represents the possible errors a cell can hold (e.g., #DIV/0!).
///
/// `Name`, `Value`, and `NotAvailable` carry a message describing what
/// specifically went wrong (unknown function, bad argument, etc.) since
/// their code alone doesn't say enough to act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellError {
    Div0,                  // Division by zero
    Ref,                   // Invalid or out-of-bounds reference
    Name(String),          // Unknown function name
    Value(String),         // Wrong type of argument
    Parse,                 // Formula parsing error
    Circular,              // Circular dependency detected
    NotAvailable(String),  // #N/A! — value genuinely unavailable (e.g. lookup miss)
}

impl CellError {
    /// The bare error code, with no message payload.
    pub fn code(&self) -> &'static str {
        match self {
            CellError::Div0 => "#DIV/0!",
            CellError::Ref => "#REF!",
            CellError::Name(_) => "#NAME?",
            CellError::Value(_) => "#VALUE!",
            CellError::Parse => "#PARSE!",
            CellError::Circular => "#CIRCULAR!",
            CellError::NotAvailable(_) => "#N/A!",
        }
    }

    /// The display form used wherever a cell's error surfaces as text
    /// (display values, to_state serialization): the code, plus the
    /// message payload for variants that carry one.
    pub fn as_str(&self) -> String {
        match self {
            CellError::Name(msg) | CellError::Value(msg) | CellError::NotAvailable(msg) => {
                format!("{} {}", self.code(), msg)
            }
            CellError::Div0 | CellError::Ref | CellError::Parse | CellError::Circular => {
                self.code().to_string()
            }
        }
    }
}

impl std::fmt::Display for CellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The computed or literal content of a cell, excluding error state (which
/// is tracked separately on `Cell::error`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
}

impl CellValue {
    pub fn display_value(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{:.0}", n)
                } else {
                    format!("{}", n)
                }
            }
            CellValue::Text(s) => s.clone(),
            CellValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        }
    }
}

/// The atomic unit of the spreadsheet.
///
/// `raw` is exactly what the caller supplied to `set` (a literal or a
/// formula string starting with `=`). `formula_ast` is the parsed form of
/// `raw` when it is a formula, cached so recalculation doesn't re-parse on
/// every propagation pass. `computed` and `error` hold the last evaluation
/// result — for a literal cell they're derived once at `set` time; for a
/// formula cell they're refreshed by the engine's evaluation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub raw: String,
    #[serde(skip)]
    pub formula_ast: Option<Expression>,
    pub computed: CellValue,
    pub error: Option<CellError>,
    pub style: Option<serde_json::Value>,
}

impl Cell {
    pub fn empty() -> Self {
        Cell {
            raw: String::new(),
            formula_ast: None,
            computed: CellValue::Empty,
            error: None,
            style: None,
        }
    }

    pub fn literal_number(num: f64) -> Self {
        Cell {
            raw: num.to_string(),
            formula_ast: None,
            computed: CellValue::Number(num),
            error: None,
            style: None,
        }
    }

    pub fn literal_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Cell {
            raw: text.clone(),
            formula_ast: None,
            computed: CellValue::Text(text),
            error: None,
            style: None,
        }
    }

    pub fn literal_boolean(value: bool) -> Self {
        Cell {
            raw: if value { "TRUE" } else { "FALSE" }.to_string(),
            formula_ast: None,
            computed: CellValue::Boolean(value),
            error: None,
            style: None,
        }
    }

    /// Constructs a formula cell with its AST already parsed. The caller
    /// (the engine's set protocol) is responsible for evaluating it and
    /// filling in `computed`/`error` afterward.
    pub fn formula(raw: impl Into<String>, ast: Expression) -> Self {
        Cell {
            raw: raw.into(),
            formula_ast: Some(ast),
            computed: CellValue::Empty,
            error: None,
            style: None,
        }
    }

    pub fn is_formula(&self) -> bool {
        self.formula_ast.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.formula_ast.is_none()
    }

    /// Returns the display value of the cell as a String: the error code
    /// if one is set, otherwise the computed value's display form.
    pub fn display_value(&self) -> String {
        match &self.error {
            Some(e) => e.as_str(),
            None => self.computed.display_value(),
        }
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_cell_has_no_formula() {
        let cell = Cell::literal_number(42.0);
        assert!(!cell.is_formula());
        assert_eq!(cell.computed, CellValue::Number(42.0));
        assert_eq!(cell.raw, "42");
    }

    #[test]
    fn empty_cell_round_trips() {
        let cell = Cell::empty();
        assert!(cell.is_empty());
        assert_eq!(cell.display_value(), "");
    }

    #[test]
    fn error_display_overrides_computed_value() {
        let mut cell = Cell::literal_number(1.0);
        cell.error = Some(CellError::Div0);
        assert_eq!(cell.display_value(), "#DIV/0!");
    }
}
