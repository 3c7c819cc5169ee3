//! The area interpreter.
//!
//! One depth-first pass expands the command tree into the sink: iterate
//! nodes repeat their area once per element, conditionals drop their area
//! when false, and every numeric leaf value is recorded into the group
//! ledger. A second pass rewrites formula references using the reference map
//! built during the first.
//!
//! Children of an area are laid out in row bands. Children whose template
//! rows overlap share a band; a band is as tall as its tallest produced
//! child, and bands stack downwards with no gaps. Template rows holding no
//! child keep their height.

use rhai::Dynamic;

use super::area::{Area, Direction, Extent};
use super::cell::Cell;
use super::cell_ref::CellRef;
use super::command::{CommandNode, CommandTree};
use super::deps::FormulaRef;
use super::env::{ScopeId, ValueEnvironment};
use super::eval::{ExpressionEvaluator, RhaiEvaluator};
use super::format::format_dynamic;
use super::group::{GroupKey, GroupLedger, KeyPart};
use super::refs::{IterationStep, ReferenceMap, rewrite_formula};
use super::sink::OutputSink;
use super::template::{CellTemplate, Segment};
use crate::builtins::GroupSum;
use crate::error::{DanglingReference, EvalError, ReportError, Result};

/// Name the data-driven summer is bound to when the data does not use it.
pub const GROUP_SUM_VAR: &str = "G";

/// Outcome of a completed run.
#[derive(Debug, Default, PartialEq)]
pub struct RunResult {
    /// Formula references that could not be remapped.
    pub warnings: Vec<DanglingReference>,
    /// Size of the produced output.
    pub extent: Extent,
}

/// Expands command trees. Each processor owns its evaluator and group ledger,
/// so separate processors never share state.
pub struct Processor<E: ExpressionEvaluator> {
    evaluator: E,
    ledger: GroupLedger,
}

impl Processor<RhaiEvaluator> {
    /// A processor using the Rhai evaluator with default builtins.
    pub fn rhai() -> Self {
        let ledger = GroupLedger::new();
        Processor::new(RhaiEvaluator::new(ledger.clone()), ledger)
    }

    /// A processor whose expressions can call functions defined in `script`.
    pub fn rhai_with_functions(
        ledger: GroupLedger,
        script: Option<&str>,
    ) -> std::result::Result<Self, EvalError> {
        let evaluator = RhaiEvaluator::with_functions(ledger.clone(), script)?;
        Ok(Processor::new(evaluator, ledger))
    }
}

impl<E: ExpressionEvaluator> Processor<E> {
    /// `ledger` must be the ledger the evaluator's group builtins read.
    pub fn new(evaluator: E, ledger: GroupLedger) -> Self {
        Processor { evaluator, ledger }
    }

    pub fn ledger(&self) -> &GroupLedger {
        &self.ledger
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Expand `tree` against `env` into `sink`.
    ///
    /// Fatal errors stop the run; output written before the failure stays in
    /// the sink. Dangling formula references are returned as warnings.
    #[tracing::instrument(skip_all, fields(area = %tree.area))]
    pub fn process(
        &self,
        tree: &CommandTree,
        env: &mut ValueEnvironment,
        sink: &mut dyn OutputSink,
    ) -> Result<RunResult> {
        self.ledger.clear();
        let root = env.root();
        if env.lookup(root, GROUP_SUM_VAR).is_none() {
            env.put_var(
                GROUP_SUM_VAR,
                Dynamic::from(GroupSum::new(self.ledger.builder())),
            );
        }

        let mut run = Run {
            evaluator: &self.evaluator,
            ledger: &self.ledger,
            env,
            sink,
            refs: ReferenceMap::new(),
            pending: Vec::new(),
            key: GroupKey::default(),
            path: Vec::new(),
        };
        let extent = run.expand_area(&tree.children, &tree.area, &tree.area.top_left(), root)?;
        self.ledger.finalize_from(0);
        let warnings = run.rewrite_formulas(&tree.area)?;

        tracing::debug!(
            width = extent.width,
            height = extent.height,
            warnings = warnings.len(),
            "report expanded"
        );
        Ok(RunResult { warnings, extent })
    }
}

/// A formula written during expansion, waiting for its references.
struct PendingFormula {
    at: CellRef,
    text: String,
    refs: Vec<FormulaRef>,
    path: Vec<IterationStep>,
}

/// State of one run.
struct Run<'a, E: ExpressionEvaluator> {
    evaluator: &'a E,
    ledger: &'a GroupLedger,
    env: &'a mut ValueEnvironment,
    sink: &'a mut dyn OutputSink,
    refs: ReferenceMap,
    pending: Vec<PendingFormula>,
    /// Group key parts of every active iteration.
    key: GroupKey,
    path: Vec<IterationStep>,
}

impl<E: ExpressionEvaluator> Run<'_, E> {
    fn evaluate(&self, expr: &str, at: &Area, scope: ScopeId) -> Result<Dynamic> {
        self.evaluator
            .evaluate(expr, &*self.env, scope)
            .map_err(|e| ReportError::evaluation(*at, e))
    }

    fn evaluate_bool(&self, expr: &str, at: &Area, scope: ScopeId) -> Result<bool> {
        self.evaluate(expr, at, scope)?.as_bool().map_err(|found| {
            ReportError::evaluation(
                *at,
                EvalError::new(expr, format!("expected a bool, got {}", found)),
            )
        })
    }

    /// Lay out `children` of the container `area` with its output origin at `origin`.
    fn expand_area(
        &mut self,
        children: &[CommandNode],
        area: &Area,
        origin: &CellRef,
        scope: ScopeId,
    ) -> Result<Extent> {
        let mut out_row = origin.row;
        let mut cursor = area.top;
        let mut right_edge = 0usize;
        let mut widest_shift = 0isize;
        let mut start = 0;

        while start < children.len() {
            let band_top = children[start].area().top;
            let mut band_bottom = children[start].area().bottom;
            let mut end = start + 1;
            while end < children.len() && children[end].area().top <= band_bottom {
                band_bottom = band_bottom.max(children[end].area().bottom);
                end += 1;
            }
            out_row += band_top.saturating_sub(cursor);

            let mut band: Vec<&CommandNode> = children[start..end].iter().collect();
            band.sort_by_key(|c| c.area().left);

            // (template right edge, column shift) of horizontal iterates so far.
            let mut shifts: Vec<(usize, isize)> = Vec::new();
            let mut band_height = 0;
            for child in band {
                let child_area = child.area();
                let offset = child_area.top - band_top;
                let shift: isize = shifts
                    .iter()
                    .filter(|(right, _)| *right < child_area.left)
                    .map(|(_, s)| s)
                    .sum();
                let col = (origin.col + (child_area.left - area.left)) as isize + shift;
                let at = CellRef::new(col.max(0) as usize, out_row + offset);

                let produced = self.expand_node(child, &at, scope)?;
                if produced.height > 0 {
                    band_height = band_height.max(offset + produced.height);
                }
                if produced.width > 0 {
                    right_edge = right_edge.max(at.col.saturating_sub(origin.col) + produced.width);
                }
                if let CommandNode::Iterate {
                    direction: Direction::Right,
                    ..
                } = child
                {
                    shifts.push((
                        child_area.right,
                        produced.width as isize - child_area.width() as isize,
                    ));
                }
            }
            widest_shift = widest_shift.max(shifts.iter().map(|(_, s)| s).sum());

            out_row += band_height;
            cursor = band_bottom + 1;
            start = end;
        }
        out_row += (area.bottom + 1).saturating_sub(cursor);

        let width = right_edge.max((area.width() as isize + widest_shift).max(0) as usize);
        Ok(Extent::new(width, out_row - origin.row))
    }

    fn expand_node(&mut self, node: &CommandNode, at: &CellRef, scope: ScopeId) -> Result<Extent> {
        match node {
            CommandNode::Leaf {
                template,
                area,
                merge,
            } => {
                let cell = self.render(template, area, scope)?;
                let anchor = area.top_left();
                if let Some(n) = cell.as_number() {
                    self.ledger.record(&anchor, &self.key, n);
                }
                if !cell.is_empty() {
                    self.sink.write_cell(at, cell)?;
                }
                self.refs.record(&anchor, at, &self.path);
                if let Some(out) = merge.and_then(|m| Area::at(at, m.extent())) {
                    self.sink.merge_region(&out)?;
                }
                Ok(area.extent())
            }
            CommandNode::Formula {
                text,
                refs,
                area,
                merge,
            } => {
                self.sink.write_cell(at, Cell::new_formula(text))?;
                self.refs.record(&area.top_left(), at, &self.path);
                self.pending.push(PendingFormula {
                    at: at.clone(),
                    text: text.clone(),
                    refs: refs.clone(),
                    path: self.path.clone(),
                });
                if let Some(out) = merge.and_then(|m| Area::at(at, m.extent())) {
                    self.sink.merge_region(&out)?;
                }
                Ok(area.extent())
            }
            CommandNode::Conditional {
                condition,
                area,
                children,
            } => {
                if !self.evaluate_bool(condition, area, scope)? {
                    tracing::debug!(%area, condition = condition.as_str(), "condition false, skipping area");
                    return Ok(Extent::ZERO);
                }
                self.expand_area(children, area, at, scope)
            }
            CommandNode::Iterate { .. } => self.expand_iterate(node, at, scope),
        }
    }

    fn expand_iterate(&mut self, node: &CommandNode, at: &CellRef, scope: ScopeId) -> Result<Extent> {
        let CommandNode::Iterate {
            items, direction, area, ..
        } = node
        else {
            return Ok(Extent::ZERO);
        };

        let elements = self
            .evaluator
            .evaluate_iterable(items, &*self.env, scope)
            .map_err(|e| ReportError::evaluation(*area, e))?;
        tracing::debug!(%area, items = items.as_str(), count = elements.len(), "expanding iterate");

        let base_level = self.key.len();
        let base_path = self.path.len();
        let mut produced = Extent::ZERO;
        let mut index = 0;

        for element in elements {
            let origin = match direction {
                Direction::Down => CellRef::new(at.col, at.row + produced.height),
                Direction::Right => CellRef::new(at.col + produced.width, at.row),
            };
            let child = self.env.child(scope);
            let result = self.expand_element(node, element, index, &origin, child);
            self.env.release(child);
            self.key.truncate(base_level);
            self.path.truncate(base_path);

            let Some(extent) = result? else {
                continue;
            };
            index += 1;
            produced = match direction {
                Direction::Down => Extent::new(
                    produced.width.max(extent.width),
                    produced.height + extent.height,
                ),
                Direction::Right => Extent::new(
                    produced.width + extent.width,
                    produced.height.max(extent.height),
                ),
            };
        }
        self.ledger.finalize_from(base_level);

        if *direction == Direction::Down && produced.height > area.height() {
            if let Some(out) = Area::at(at, area.extent()) {
                self.sink.insert_rows(&out, produced.height - area.height())?;
            }
        }
        Ok(produced)
    }

    /// Expand one element in its own scope. `None` when `select` rejects it.
    fn expand_element(
        &mut self,
        node: &CommandNode,
        element: Dynamic,
        index: usize,
        origin: &CellRef,
        scope: ScopeId,
    ) -> Result<Option<Extent>> {
        let CommandNode::Iterate {
            id,
            var,
            var_index,
            select,
            group_key,
            area,
            children,
            ..
        } = node
        else {
            return Ok(None);
        };

        self.env.set(scope, var, element);
        self.env.set(scope, var_index, Dynamic::from(index as i64));
        if let Some(select) = select {
            if !self.evaluate_bool(select, area, scope)? {
                return Ok(None);
            }
        }

        if group_key.is_empty() {
            self.key.push(KeyPart::from(index));
        } else {
            for expr in group_key {
                let part = KeyPart::from_dynamic(&self.evaluate(expr, area, scope)?);
                self.key.push(part);
            }
        }
        self.path.push(IterationStep {
            node: *id,
            index,
        });

        self.expand_area(children, area, origin, scope).map(Some)
    }

    fn render(&self, template: &CellTemplate, area: &Area, scope: ScopeId) -> Result<Cell> {
        match template {
            CellTemplate::Static(cell) => Ok(cell.clone()),
            CellTemplate::Expr(expr) => Ok(Cell::from_dynamic(&self.evaluate(expr, area, scope)?)),
            CellTemplate::Interpolated(segments) => {
                let mut text = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(s) => text.push_str(s),
                        Segment::Expr(expr) => {
                            text.push_str(&format_dynamic(&self.evaluate(expr, area, scope)?))
                        }
                    }
                }
                Ok(Cell::new_text(&text))
            }
        }
    }

    fn rewrite_formulas(&mut self, root: &Area) -> Result<Vec<DanglingReference>> {
        let mut warnings = Vec::new();
        for formula in std::mem::take(&mut self.pending) {
            let rewritten = rewrite_formula(
                &formula.text,
                &formula.refs,
                &formula.at,
                &formula.path,
                root,
                &self.refs,
            );
            if rewritten.text != formula.text {
                self.sink.rewrite_formula(&formula.at, &rewritten.text)?;
            }
            warnings.extend(rewritten.warnings);
        }
        Ok(warnings)
    }
}
