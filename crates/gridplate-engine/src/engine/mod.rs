//! Report engine API.
//!
//! - [`Cell`], [`CellType`], [`Grid`] - cell storage for templates and output
//! - [`CellRef`], [`Area`] - A1 references and rectangular spans
//! - [`ValueEnvironment`] - data context with per-iteration scopes
//! - [`GroupLedger`] - nested group sums per measure
//! - [`CommandTree`] - template cells and markers resolved into nodes
//! - [`Processor`] - expands a tree into an [`OutputSink`]
//! - [`RhaiEvaluator`] - the default [`ExpressionEvaluator`]

mod area;
mod cell;
mod cell_ref;
mod command;
mod deps;
mod env;
mod eval;
mod format;
mod group;
mod interp;
mod markers;
mod refs;
mod sink;
mod template;

pub use area::{Area, Direction, Extent};
pub use cell::{Cell, CellType, Grid};
pub use cell_ref::CellRef;
pub use command::{CommandNode, CommandTree, NodeId};
pub use deps::{FormulaRef, scan_references};
pub use env::{ScopeId, ValueEnvironment};
pub use eval::{ExpressionEvaluator, RhaiEvaluator, iterable_items};
pub use format::{format_cell, format_dynamic, format_number};
pub use group::{
    DoubleSummarizer, DoubleSummarizerBuilder, FixedPointSummarizer, FixedPointSummarizerBuilder,
    GroupAccumulator, GroupKey, GroupLedger, KeyPart, MAX_FIXED_POINT_SCALE, Summarizer,
    SummarizerBuilder,
};
pub use interp::{GROUP_SUM_VAR, Processor, RunResult};
pub use markers::{EachSpec, Marker, MarkerKind, split_top_level};
pub use refs::{IterationStep, RefEntry, ReferenceMap, compress, rewrite_formula};
pub use sink::{MemorySink, OutputSink, StructuralOp};
pub use template::{CellTemplate, Segment, split_placeholders};

pub use rhai::{Dynamic, Map};
