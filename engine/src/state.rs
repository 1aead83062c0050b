//! FILENAME: engine/src/state.rs
//! PURPOSE: The serializable, caller-facing snapshot of an engine's
//! contents — what `to_state`/`from_state` exchange at the API boundary.
//! CONTEXT: Distinct from the in-memory snapshots `history.rs` clones for
//! undo/redo: this is the portable, JSON-friendly shape meant to survive a
//! round trip through persistence or across a network boundary, addresses
//! written as A1 labels rather than raw coordinate tuples.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::address::Dimensions;
use crate::cell::CellValue;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StateMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CellState {
    pub raw: String,
    pub computed: CellValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CellEntry {
    pub address: String,
    pub cell: CellState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ViewState {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub column_widths: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub row_heights: HashMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frozen_rows: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frozen_cols: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DependenciesState {
    /// cell address -> the addresses it directly references.
    pub precedents: HashMap<String, Vec<String>>,
    /// cell address -> the addresses that directly reference it.
    pub dependents: HashMap<String, Vec<String>>,
}

/// Options controlling what `Engine::to_state` includes. Every field
/// defaults to including its section; callers trim a persisted payload by
/// turning sections off explicitly.
#[derive(Debug, Clone, Copy)]
pub struct ToStateOptions {
    pub include_dependencies: bool,
    pub include_view: bool,
}

impl Default for ToStateOptions {
    fn default() -> Self {
        ToStateOptions { include_dependencies: true, include_view: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpreadsheetState {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<StateMetadata>,
    pub dimensions: Dimensions,
    pub cells: Vec<CellEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<ViewState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<DependenciesState>,
}

pub const STATE_VERSION: &str = "1";
