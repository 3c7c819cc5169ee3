//! Template-to-output reference mapping and formula rewriting.
//!
//! During expansion every produced cell is logged against the template cell it
//! came from, together with the iteration path that was active. After
//! expansion each formula's references are replaced by the output cells they
//! expanded into.

use std::collections::HashMap;

use super::area::Area;
use super::cell_ref::CellRef;
use super::command::NodeId;
use super::deps::FormulaRef;
use crate::error::DanglingReference;

/// One active iteration: which Iterate node and which element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IterationStep {
    pub node: NodeId,
    pub index: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RefEntry {
    pub template: CellRef,
    pub output: CellRef,
    pub path: Vec<IterationStep>,
}

impl RefEntry {
    /// Whether this entry was produced in the same iteration of every Iterate
    /// it shares with `path`.
    fn compatible_with(&self, path: &[IterationStep]) -> bool {
        path.iter().all(|step| {
            self.path
                .iter()
                .find(|own| own.node == step.node)
                .is_none_or(|own| own.index == step.index)
        })
    }
}

/// Append-only log of template cell to output cell pairs.
#[derive(Debug, Default)]
pub struct ReferenceMap {
    entries: Vec<RefEntry>,
    by_template: HashMap<CellRef, Vec<usize>>,
}

impl ReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, template: &CellRef, output: &CellRef, path: &[IterationStep]) {
        self.by_template
            .entry(template.clone())
            .or_default()
            .push(self.entries.len());
        self.entries.push(RefEntry {
            template: template.clone(),
            output: output.clone(),
            path: path.to_vec(),
        });
    }

    pub fn entries(&self) -> &[RefEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Output cells produced from `template` that are visible from a formula
    /// produced at `path`.
    pub fn targets(&self, template: &CellRef, path: &[IterationStep]) -> Vec<CellRef> {
        self.by_template
            .get(template)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| &self.entries[i])
                    .filter(|e| e.compatible_with(path))
                    .map(|e| e.output.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Result of rewriting one formula.
#[derive(Debug, PartialEq)]
pub struct Rewritten {
    pub text: String,
    pub warnings: Vec<DanglingReference>,
}

/// Replace each of `found` (the references scanned from `formula`) with the
/// output cells it expanded into.
///
/// - references outside `root` keep their text and produce a warning
/// - a range reaching past `root` is clipped to it, with a warning
/// - references inside `root` that produced nothing become `0`
/// - `$` markers are reapplied to the replacement
pub fn rewrite_formula(
    formula: &str,
    found: &[FormulaRef],
    at: &CellRef,
    path: &[IterationStep],
    root: &Area,
    refs: &ReferenceMap,
) -> Rewritten {
    let mut text = String::with_capacity(formula.len());
    let mut warnings = Vec::new();
    let mut last = 0;

    for reference in found {
        text.push_str(&formula[last..reference.span.start]);
        last = reference.span.end;

        let visible = reference.area.intersection(root);
        if visible != Some(reference.area) {
            tracing::warn!(reference = reference.text(formula), %at, "formula reference outside the report area");
            warnings.push(DanglingReference {
                reference: reference.text(formula).to_string(),
                at: at.clone(),
                formula: formula.to_string(),
            });
        }
        let Some(visible) = visible else {
            text.push_str(reference.text(formula));
            continue;
        };

        let mut targets: Vec<CellRef> = visible
            .cells()
            .flat_map(|cell| refs.targets(&cell, path))
            .collect();
        if targets.is_empty() {
            text.push('0');
        } else {
            targets.sort();
            targets.dedup();
            text.push_str(&reference.anchored(&compress(&targets)));
        }
    }
    text.push_str(&formula[last..]);
    Rewritten { text, warnings }
}

/// Render a set of cells as a single ref, a rectangle, or column runs.
///
/// `cells` must be sorted and free of duplicates.
pub fn compress(cells: &[CellRef]) -> String {
    match cells {
        [] => String::new(),
        [single] => single.to_string(),
        _ => {
            let mut bounds = Area::cell(&cells[0]);
            for cell in &cells[1..] {
                bounds = Area::new(
                    bounds.top.min(cell.row),
                    bounds.left.min(cell.col),
                    bounds.bottom.max(cell.row),
                    bounds.right.max(cell.col),
                );
            }
            if bounds.cell_count() == Some(cells.len()) {
                return bounds.to_string();
            }
            column_runs(cells)
                .iter()
                .map(Area::to_string)
                .collect::<Vec<_>>()
                .join(",")
        }
    }
}

fn column_runs(cells: &[CellRef]) -> Vec<Area> {
    let mut by_column: Vec<&CellRef> = cells.iter().collect();
    by_column.sort_by_key(|c| (c.col, c.row));

    let mut runs: Vec<Area> = Vec::new();
    for cell in by_column {
        match runs.last_mut() {
            Some(run) if run.left == cell.col && run.bottom + 1 == cell.row => run.bottom = cell.row,
            _ => runs.push(Area::cell(cell)),
        }
    }
    runs
}
