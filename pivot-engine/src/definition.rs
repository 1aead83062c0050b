//! FILENAME: pivot-engine/src/definition.rs
//! PURPOSE: The serializable configuration that describes a pivot table —
//! what to group by, what to aggregate, and what to show — independent of
//! how the projection is computed.
//! CONTEXT: Trimmed from a much larger Excel-compatible configuration
//! surface (per-field sort order, collapse state, date/number grouping,
//! top-N and text/date filters) down to exactly what drives the transform:
//! which fields bucket rows and columns, which aggregator runs over which
//! value field, and a simple per-field include/exclude filter.

use engine::CellCoord;
use serde::{Deserialize, Serialize};

pub type PivotId = u32;

/// Supported aggregation functions for value fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationType {
    Sum,
    Average,
    Count,
    CountA,
    Min,
    Max,
    Product,
}

/// One entry in the Values area: which source field to aggregate, how, and
/// what to call the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueFieldSpec {
    pub source_field: String,
    pub aggregator: AggregationType,
    pub alias: Option<String>,
}

impl ValueFieldSpec {
    pub fn new(source_field: impl Into<String>, aggregator: AggregationType) -> Self {
        ValueFieldSpec { source_field: source_field.into(), aggregator, alias: None }
    }

    /// The label this value field's output column/row is headed with —
    /// the alias if one was given, otherwise the source field name.
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.source_field)
    }
}

/// A simple per-field value filter: an exclude-set rejects, an
/// include-set requires membership. Values are compared by their display
/// text, the same representation a grouping key uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    #[serde(default)]
    pub include: Option<Vec<String>>,
    #[serde(default)]
    pub exclude: Option<Vec<String>>,
}

impl FieldFilter {
    pub fn accepts(&self, value: &str) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.iter().any(|v| v == value) {
                return false;
            }
        }
        if let Some(include) = &self.include {
            return include.iter().any(|v| v == value);
        }
        true
    }
}

/// The complete, serializable description of a pivot table. Resolved
/// against a source range at refresh time — the first row of the range is
/// the header, and row/column/value field names are looked up against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PivotConfig {
    pub source_start: CellCoord,
    pub source_end: CellCoord,
    pub row_fields: Vec<String>,
    pub column_fields: Vec<String>,
    pub value_fields: Vec<ValueFieldSpec>,
    #[serde(default)]
    pub filters: Vec<FieldFilter>,
    pub show_row_totals: bool,
    pub show_column_totals: bool,
    pub show_grand_totals: bool,
}

impl PivotConfig {
    pub fn new(source_start: CellCoord, source_end: CellCoord) -> Self {
        PivotConfig {
            source_start,
            source_end,
            row_fields: Vec::new(),
            column_fields: Vec::new(),
            value_fields: Vec::new(),
            filters: Vec::new(),
            show_row_totals: false,
            show_column_totals: false,
            show_grand_totals: false,
        }
    }
}
