//! FILENAME: pivot-engine/src/lib.rs
//! Pivot table subsystem, built on top of `engine`.
//!
//! This crate reads a declared source range out of an `Engine` grid, groups
//! and aggregates it according to a `PivotConfig`, and writes the result
//! back as plain cell values. It depends on `engine` only for shared types
//! (`CellValue`, `CellCoord`) and the grid read/write surface — it never
//! registers formula dependencies on the cells it reads.
//!
//! Layers:
//! - `definition`: serializable configuration (what the pivot table is)
//! - `engine`: the projection algorithm and the multi-pivot registry

pub mod definition;
pub mod engine;

pub use definition::{AggregationType, FieldFilter, PivotConfig, PivotId, ValueFieldSpec};
pub use engine::{PivotError, PivotOutput, PivotProjector, PivotRegistry};
