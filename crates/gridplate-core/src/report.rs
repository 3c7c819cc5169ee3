//! Report façade: template + data in, rendered sink out.

use crate::error::{GridplateError, Result};
use crate::storage::parse_template_content;
use gridplate_engine::engine::{
    CommandTree, FixedPointSummarizerBuilder, GroupLedger, Grid, MAX_FIXED_POINT_SCALE, Marker,
    MemorySink, Processor, RhaiEvaluator, RunResult, ValueEnvironment,
};
use std::sync::Arc;

/// A parsed template: cells plus the markers anchored on them.
pub struct Template {
    pub cells: Grid,
    pub markers: Vec<Marker>,
}

impl Template {
    pub fn parse(content: &str) -> Result<Template> {
        parse_template_content(content)
    }

    /// Resolve the markers into a command tree.
    pub fn command_tree(&self) -> Result<CommandTree> {
        let tree = CommandTree::build(&self.cells, &self.markers)?;
        Ok(tree)
    }
}

/// Parse JSON data into a root environment. The top level must be an object;
/// its keys become the root variables.
pub fn load_data(json: &str) -> Result<ValueEnvironment> {
    let engine = rhai::Engine::new();
    let map = engine
        .parse_json(json, true)
        .map_err(|e| GridplateError::Json(e.to_string()))?;
    Ok(ValueEnvironment::from_map(map))
}

/// How a report is evaluated.
#[derive(Clone, Debug, Default)]
pub struct ReportOptions {
    /// Rhai script whose functions every expression can call.
    pub functions: Option<String>,
    /// Sum group values in fixed point with this many decimals instead of f64.
    pub fixed_point: Option<u32>,
}

/// Output of one run.
pub struct Rendered {
    pub output: MemorySink,
    pub result: RunResult,
}

/// A template compiled for repeated rendering.
pub struct Report {
    tree: CommandTree,
    processor: Processor<RhaiEvaluator>,
}

impl Report {
    pub fn new(template: &Template) -> Result<Report> {
        Self::with_options(template, &ReportOptions::default())
    }

    pub fn with_options(template: &Template, options: &ReportOptions) -> Result<Report> {
        let tree = template.command_tree()?;
        let ledger = match options.fixed_point {
            Some(scale) if scale > MAX_FIXED_POINT_SCALE => {
                return Err(GridplateError::Config(format!(
                    "fixed_point must be at most {}, got {}",
                    MAX_FIXED_POINT_SCALE, scale
                )));
            }
            Some(scale) => GroupLedger::with_builder(Arc::new(FixedPointSummarizerBuilder { scale })),
            None => GroupLedger::new(),
        };
        let processor = Processor::rhai_with_functions(ledger, options.functions.as_deref())?;
        tracing::debug!(nodes = tree.node_count(), area = %tree.area, "report compiled");
        Ok(Report { tree, processor })
    }

    pub fn tree(&self) -> &CommandTree {
        &self.tree
    }

    /// Group sums of the most recent run.
    pub fn ledger(&self) -> &GroupLedger {
        self.processor.ledger()
    }

    /// Expand the template against `data`.
    pub fn render(&self, mut data: ValueEnvironment) -> Result<Rendered> {
        let mut output = MemorySink::new();
        let result = self.processor.process(&self.tree, &mut data, &mut output)?;
        Ok(Rendered { output, result })
    }
}
