//! Rectangular areas, produced extents, and expansion direction.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::cell_ref::CellRef;

/// A rectangular span of cells, inclusive on all sides (0-indexed).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub top: usize,
    pub left: usize,
    pub bottom: usize,
    pub right: usize,
}

impl Area {
    /// Build an area from any two corners.
    pub fn new(top: usize, left: usize, bottom: usize, right: usize) -> Area {
        Area {
            top: top.min(bottom),
            left: left.min(right),
            bottom: top.max(bottom),
            right: left.max(right),
        }
    }

    pub fn from_corners(a: &CellRef, b: &CellRef) -> Area {
        Area::new(a.row, a.col, b.row, b.col)
    }

    /// A one-cell area.
    pub fn cell(cell: &CellRef) -> Area {
        Area::new(cell.row, cell.col, cell.row, cell.col)
    }

    /// An area anchored at `origin` spanning `extent`. Returns None for an empty extent.
    pub fn at(origin: &CellRef, extent: Extent) -> Option<Area> {
        if extent.is_empty() {
            return None;
        }
        Some(Area::new(
            origin.row,
            origin.col,
            origin.row + extent.height - 1,
            origin.col + extent.width - 1,
        ))
    }

    /// Parse "A1:B5" (or a single "A1").
    pub fn parse(text: &str) -> Option<Area> {
        match text.split_once(':') {
            Some((start, end)) => {
                let start = CellRef::from_str(start.trim())?;
                let end = CellRef::from_str(end.trim())?;
                Some(Area::from_corners(&start, &end))
            }
            None => CellRef::from_str(text.trim()).map(|c| Area::cell(&c)),
        }
    }

    pub fn height(&self) -> usize {
        self.bottom - self.top + 1
    }

    pub fn width(&self) -> usize {
        self.right - self.left + 1
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.width(), self.height())
    }

    pub fn top_left(&self) -> CellRef {
        CellRef::new(self.left, self.top)
    }

    pub fn bottom_right(&self) -> CellRef {
        CellRef::new(self.right, self.bottom)
    }

    pub fn is_single_cell(&self) -> bool {
        self.top == self.bottom && self.left == self.right
    }

    pub fn contains(&self, cell: &CellRef) -> bool {
        cell.row >= self.top && cell.row <= self.bottom && cell.col >= self.left && cell.col <= self.right
    }

    pub fn contains_area(&self, other: &Area) -> bool {
        self.contains(&other.top_left()) && self.contains(&other.bottom_right())
    }

    pub fn overlaps(&self, other: &Area) -> bool {
        self.top <= other.bottom
            && other.top <= self.bottom
            && self.left <= other.right
            && other.left <= self.right
    }

    /// Two areas overlap without one containing the other.
    pub fn crosses(&self, other: &Area) -> bool {
        self.overlaps(other) && !self.contains_area(other) && !other.contains_area(self)
    }

    pub fn intersection(&self, other: &Area) -> Option<Area> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Area::new(
            self.top.max(other.top),
            self.left.max(other.left),
            self.bottom.min(other.bottom),
            self.right.min(other.right),
        ))
    }

    /// Row-major iteration over every cell in the area.
    pub fn cells(&self) -> impl Iterator<Item = CellRef> + '_ {
        (self.top..=self.bottom)
            .flat_map(move |row| (self.left..=self.right).map(move |col| CellRef::new(col, row)))
    }

    /// Number of cells, or None on overflow.
    pub fn cell_count(&self) -> Option<usize> {
        self.width().checked_mul(self.height())
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_cell() {
            write!(f, "{}", self.top_left())
        } else {
            write!(f, "{}:{}", self.top_left(), self.bottom_right())
        }
    }
}

/// The size of the output produced by expanding a node.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Extent {
    pub width: usize,
    pub height: usize,
}

impl Extent {
    pub const ZERO: Extent = Extent { width: 0, height: 0 };

    pub fn new(width: usize, height: usize) -> Extent {
        Extent { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Which way successive iterations of a repeated area are laid out.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Down,
    Right,
}

impl Direction {
    pub fn parse(text: &str) -> Option<Direction> {
        match text.trim().to_ascii_uppercase().as_str() {
            "DOWN" => Some(Direction::Down),
            "RIGHT" => Some(Direction::Right),
            _ => None,
        }
    }
}
