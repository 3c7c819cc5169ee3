//! The command tree: a template grid plus its markers, resolved into nested
//! rectangular nodes.
//!
//! Structural markers (`jx:each`, `jx:if`) become container nodes. Every
//! template cell inside the root area becomes a `Leaf` (or a `Formula` for
//! `=` cells) owned by the deepest container enclosing it.

use super::area::{Area, Direction};
use super::cell::{Cell, CellType, Grid};
use super::cell_ref::CellRef;
use super::deps::{FormulaRef, scan_references};
use super::markers::{EachSpec, Marker, MarkerKind};
use super::template::CellTemplate;
use crate::error::{ReportError, Result};

/// Identifies an Iterate node within its tree.
pub type NodeId = usize;

#[derive(Clone, Debug, PartialEq)]
pub enum CommandNode {
    Iterate {
        id: NodeId,
        items: String,
        var: String,
        var_index: String,
        direction: Direction,
        select: Option<String>,
        group_key: Vec<String>,
        area: Area,
        children: Vec<CommandNode>,
    },
    Conditional {
        condition: String,
        area: Area,
        children: Vec<CommandNode>,
    },
    Formula {
        /// Formula text without the leading '='.
        text: String,
        /// References in `text`, rewritten once expansion is done.
        refs: Vec<FormulaRef>,
        area: Area,
        merge: Option<Area>,
    },
    Leaf {
        template: CellTemplate,
        area: Area,
        /// Merged region anchored at this cell, in template coordinates.
        merge: Option<Area>,
    },
}

impl CommandNode {
    pub fn area(&self) -> &Area {
        match self {
            CommandNode::Iterate { area, .. }
            | CommandNode::Conditional { area, .. }
            | CommandNode::Formula { area, .. }
            | CommandNode::Leaf { area, .. } => area,
        }
    }

    pub fn children(&self) -> &[CommandNode] {
        match self {
            CommandNode::Iterate { children, .. } | CommandNode::Conditional { children, .. } => {
                children
            }
            CommandNode::Formula { .. } | CommandNode::Leaf { .. } => &[],
        }
    }
}

/// Root of a parsed template. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandTree {
    pub area: Area,
    pub children: Vec<CommandNode>,
}

/// A container under construction.
struct Draft {
    kind: DraftKind,
    area: Area,
    children: Vec<Draft>,
}

enum DraftKind {
    Root,
    Each { id: NodeId, spec: EachSpec },
    If { condition: String },
    Cell { cell: Cell, merge: Option<Area> },
}

impl Draft {
    fn container(kind: DraftKind, area: Area) -> Draft {
        Draft {
            kind,
            area,
            children: Vec::new(),
        }
    }

    fn is_container(&self) -> bool {
        !matches!(self.kind, DraftKind::Cell { .. })
    }

    /// Place `draft` under the deepest container that encloses it.
    fn insert(&mut self, draft: Draft) {
        let target = self
            .children
            .iter_mut()
            .find(|c| c.is_container() && c.area.contains_area(&draft.area));
        match target {
            Some(child) => child.insert(draft),
            None => self.children.push(draft),
        }
    }

    fn into_node(self) -> Result<CommandNode> {
        let area = self.area;
        let children = build_children(self.children)?;
        let node = match self.kind {
            DraftKind::Each { id, spec } => CommandNode::Iterate {
                id,
                items: spec.items,
                var: spec.var,
                var_index: spec.var_index,
                direction: spec.direction,
                select: spec.select,
                group_key: spec.group_key,
                area,
                children,
            },
            DraftKind::If { condition } => CommandNode::Conditional {
                condition,
                area,
                children,
            },
            DraftKind::Cell { cell, merge } => match cell.contents {
                CellType::Formula(text) => CommandNode::Formula {
                    refs: scan_references(&text),
                    text,
                    area,
                    merge,
                },
                _ => {
                    let template = CellTemplate::parse(&cell)
                        .map_err(|message| ReportError::syntax(area, message))?;
                    CommandNode::Leaf {
                        template,
                        area,
                        merge,
                    }
                }
            },
            DraftKind::Root => {
                return Err(ReportError::syntax(area, "nested root area"));
            }
        };
        Ok(node)
    }
}

fn build_children(drafts: Vec<Draft>) -> Result<Vec<CommandNode>> {
    let mut children = drafts
        .into_iter()
        .map(Draft::into_node)
        .collect::<Result<Vec<_>>>()?;
    children.sort_by_key(|c| (c.area().top, c.area().left));
    Ok(children)
}

impl CommandTree {
    /// Resolve template cells and markers into a tree.
    ///
    /// Fails with a syntax error on duplicate root areas, partial overlaps,
    /// and markers outside the root area.
    pub fn build(cells: &Grid, markers: &[Marker]) -> Result<CommandTree> {
        let root_area = root_area(cells, markers)?;

        for marker in markers {
            if !matches!(marker.kind, MarkerKind::Area) && !root_area.contains_area(&marker.area) {
                return Err(ReportError::syntax(
                    marker.area,
                    format!("marker lies outside the report area {}", root_area),
                ));
            }
        }

        let structural: Vec<(usize, &Marker)> = markers
            .iter()
            .filter(|m| m.is_structural())
            .enumerate()
            .collect();
        for (i, (_, a)) in structural.iter().enumerate() {
            for (_, b) in &structural[i + 1..] {
                if a.area.crosses(&b.area) {
                    return Err(ReportError::syntax(
                        b.area,
                        format!("area partially overlaps {}", a.area),
                    ));
                }
            }
        }

        let mut merges: Vec<&Marker> = Vec::new();
        for merge in markers.iter().filter(|m| matches!(m.kind, MarkerKind::Merge)) {
            if let Some((_, m)) = structural.iter().find(|(_, m)| m.area.crosses(&merge.area)) {
                return Err(ReportError::syntax(
                    merge.area,
                    format!("merged region partially overlaps {}", m.area),
                ));
            }
            if merges.iter().any(|m| m.area.overlaps(&merge.area)) {
                return Err(ReportError::syntax(merge.area, "overlapping merged regions"));
            }
            merges.push(merge);
        }

        // Larger areas first; equal areas keep declaration order so the later
        // marker nests inside the earlier one.
        let mut ordered = structural.clone();
        ordered.sort_by(|(ia, a), (ib, b)| {
            let size = |m: &Marker| m.area.cell_count().unwrap_or(usize::MAX);
            size(b).cmp(&size(a)).then(ia.cmp(ib))
        });

        let mut root = Draft::container(DraftKind::Root, root_area);
        for (id, marker) in ordered {
            let kind = match &marker.kind {
                MarkerKind::Each(spec) => DraftKind::Each {
                    id,
                    spec: spec.clone(),
                },
                MarkerKind::If { condition } => DraftKind::If {
                    condition: condition.clone(),
                },
                MarkerKind::Area | MarkerKind::Merge => continue,
            };
            root.insert(Draft::container(kind, marker.area));
        }

        let mut template_cells: Vec<(CellRef, Cell)> = cells
            .iter()
            .filter(|e| root_area.contains(e.key()))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for merge in &merges {
            if !template_cells.iter().any(|(at, _)| *at == merge.anchor) {
                template_cells.push((merge.anchor.clone(), Cell::new_empty()));
            }
        }
        template_cells.sort_by(|a, b| a.0.cmp(&b.0));

        for (at, cell) in template_cells {
            if let Some(m) = merges.iter().find(|m| m.area.contains(&at) && m.anchor != at) {
                tracing::debug!(cell = %at, merge = %m.area, "ignoring cell hidden by merged region");
                continue;
            }
            let merge = merges.iter().find(|m| m.anchor == at).map(|m| m.area);
            let area = merge.unwrap_or_else(|| Area::cell(&at));
            root.insert(Draft {
                kind: DraftKind::Cell { cell, merge },
                area,
                children: Vec::new(),
            });
        }

        let tree = CommandTree {
            area: root_area,
            children: build_children(root.children)?,
        };
        tracing::debug!(area = %tree.area, nodes = tree.node_count(), "built command tree");
        Ok(tree)
    }

    /// Total number of nodes below the root.
    pub fn node_count(&self) -> usize {
        fn count(nodes: &[CommandNode]) -> usize {
            nodes.iter().map(|n| 1 + count(n.children())).sum()
        }
        count(&self.children)
    }
}

/// The declared `jx:area`, or the bounding box of everything from A1.
fn root_area(cells: &Grid, markers: &[Marker]) -> Result<Area> {
    let mut declared = markers.iter().filter(|m| matches!(m.kind, MarkerKind::Area));
    if let Some(first) = declared.next() {
        if let Some(second) = declared.next() {
            return Err(ReportError::syntax(
                second.area,
                format!("more than one jx:area (first at {})", first.area),
            ));
        }
        return Ok(first.area);
    }

    let mut bottom = 0;
    let mut right = 0;
    for entry in cells.iter() {
        bottom = bottom.max(entry.key().row);
        right = right.max(entry.key().col);
    }
    for marker in markers {
        bottom = bottom.max(marker.area.bottom);
        right = right.max(marker.area.right);
    }
    Ok(Area::new(0, 0, bottom, right))
}
