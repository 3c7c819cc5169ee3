//! Cell data structures for template and output grids.
//!
//! - [`CellType`] - The type of content in a cell (empty, text, number, bool, or formula)
//! - [`Cell`] - A cell with its content
//! - [`Grid`] - Thread-safe sparse storage for cells (backed by `DashMap`)

use dashmap::DashMap;
use rhai::Dynamic;
use serde::{Deserialize, Serialize};

use super::cell_ref::CellRef;

/// The type of content stored in a cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CellType {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Formula text without the leading '='.
    Formula(String),
}

/// A cell in a template or output grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub contents: CellType,
}

impl Cell {
    pub fn new_empty() -> Cell {
        Cell {
            contents: CellType::Empty,
        }
    }

    pub fn new_text(text: &str) -> Cell {
        Cell {
            contents: CellType::Text(text.to_string()),
        }
    }

    pub fn new_number(n: f64) -> Cell {
        Cell {
            contents: CellType::Number(n),
        }
    }

    pub fn new_bool(b: bool) -> Cell {
        Cell {
            contents: CellType::Bool(b),
        }
    }

    pub fn new_formula(formula: &str) -> Cell {
        Cell {
            contents: CellType::Formula(formula.to_string()),
        }
    }

    /// Convert an evaluated expression value into an output cell.
    /// Integers widen to f64; unit becomes an empty cell; anything else is displayed as text.
    pub fn from_dynamic(value: &Dynamic) -> Cell {
        let value = value.clone().flatten();
        if value.is_unit() {
            return Cell::new_empty();
        }
        if let Ok(n) = value.as_float() {
            return Cell::new_number(n);
        }
        if let Ok(n) = value.as_int() {
            return Cell::new_number(n as f64);
        }
        if let Ok(b) = value.as_bool() {
            return Cell::new_bool(b);
        }
        Cell::new_text(&value.to_string())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.contents, CellType::Empty)
    }

    /// The numeric value fed to group sums, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self.contents {
            CellType::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Get a display string for the cell content (for editing).
    pub fn to_input_string(&self) -> String {
        match &self.contents {
            CellType::Empty => String::new(),
            CellType::Text(s) => s.clone(),
            CellType::Number(n) => n.to_string(),
            CellType::Bool(b) => b.to_string(),
            CellType::Formula(s) => format!("={}", s),
        }
    }
}

/// Thread-safe sparse grid storage.
pub type Grid = DashMap<CellRef, Cell>;
