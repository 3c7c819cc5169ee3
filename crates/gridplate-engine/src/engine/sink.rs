//! Output sinks receive cell writes and structural operations.

use super::area::Area;
use super::cell::{Cell, CellType, Grid};
use super::cell_ref::CellRef;
use crate::error::SinkError;

/// Destination for an expanded report.
pub trait OutputSink {
    fn write_cell(&mut self, at: &CellRef, cell: Cell) -> Result<(), SinkError>;

    /// `count` rows were added below the template rows of `area` (output coordinates).
    fn insert_rows(&mut self, area: &Area, count: usize) -> Result<(), SinkError>;

    fn merge_region(&mut self, area: &Area) -> Result<(), SinkError>;

    /// Replace the text of a formula written earlier.
    fn rewrite_formula(&mut self, at: &CellRef, text: &str) -> Result<(), SinkError>;
}

/// A structural operation recorded by [`MemorySink`].
#[derive(Clone, Debug, PartialEq)]
pub enum StructuralOp {
    InsertRows { at: Area, count: usize },
    Merge(Area),
}

/// In-memory sink that keeps the output grid and a log of structural ops.
#[derive(Debug, Default)]
pub struct MemorySink {
    grid: Grid,
    ops: Vec<StructuralOp>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn into_grid(self) -> Grid {
        self.grid
    }

    pub fn ops(&self) -> &[StructuralOp] {
        &self.ops
    }

    pub fn merges(&self) -> Vec<Area> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                StructuralOp::Merge(area) => Some(*area),
                StructuralOp::InsertRows { .. } => None,
            })
            .collect()
    }

    /// Cell at an A1 reference, if one was written.
    pub fn value(&self, a1: &str) -> Option<Cell> {
        let at = CellRef::from_str(a1)?;
        self.grid.get(&at).map(|c| c.clone())
    }

    /// Smallest area holding every written cell.
    pub fn bounds(&self) -> Option<Area> {
        let mut bounds: Option<Area> = None;
        for entry in self.grid.iter() {
            let cell = Area::cell(entry.key());
            bounds = Some(match bounds {
                None => cell,
                Some(b) => Area::new(
                    b.top.min(cell.top),
                    b.left.min(cell.left),
                    b.bottom.max(cell.bottom),
                    b.right.max(cell.right),
                ),
            });
        }
        bounds
    }
}

impl OutputSink for MemorySink {
    fn write_cell(&mut self, at: &CellRef, cell: Cell) -> Result<(), SinkError> {
        if cell.is_empty() {
            self.grid.remove(at);
        } else {
            self.grid.insert(at.clone(), cell);
        }
        Ok(())
    }

    fn insert_rows(&mut self, area: &Area, count: usize) -> Result<(), SinkError> {
        self.ops.push(StructuralOp::InsertRows { at: *area, count });
        Ok(())
    }

    fn merge_region(&mut self, area: &Area) -> Result<(), SinkError> {
        self.ops.push(StructuralOp::Merge(*area));
        Ok(())
    }

    fn rewrite_formula(&mut self, at: &CellRef, text: &str) -> Result<(), SinkError> {
        match self.grid.get_mut(at) {
            Some(mut cell) if matches!(cell.contents, CellType::Formula(_)) => {
                cell.contents = CellType::Formula(text.to_string());
                Ok(())
            }
            _ => Err(SinkError(format!("no formula at {} to rewrite", at))),
        }
    }
}
