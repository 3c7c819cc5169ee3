//! Built-in report functions registered on the Rhai engine.
//!
//! Conventions:
//! - group functions take the measure as an A1 string naming the template
//!   cell whose values are summed (e.g. `group_total("D3", 0)`)
//! - levels count from 0 at the outermost grouping
//! - spreadsheet-style formatting helpers are ALL CAPS (`FIXED`)

use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, Map, NativeCallContext, Position};
use std::fmt::Write;
use std::sync::Arc;

use crate::engine::{CellRef, GroupLedger, KeyPart, SummarizerBuilder};

/// Sums a field over a collection using the run's summarizer strategy.
///
/// Independent of what the template writes, so it sees rows that a
/// conditional area hides.
#[derive(Clone, Debug)]
pub struct GroupSum {
    builder: Arc<dyn SummarizerBuilder>,
}

impl GroupSum {
    pub fn new(builder: Arc<dyn SummarizerBuilder>) -> Self {
        GroupSum { builder }
    }

    /// Sum `field` over `items`, keeping only items accepted by `keep`.
    pub fn sum_where<F>(&self, field: &str, items: &[Dynamic], mut keep: F) -> Result<f64, Box<EvalAltResult>>
    where
        F: FnMut(&Dynamic) -> Result<bool, Box<EvalAltResult>>,
    {
        let mut summarizer = self.builder.build();
        for item in items {
            if !keep(item)? {
                continue;
            }
            if let Some(n) = field_number(item, field) {
                summarizer.add(n);
            }
        }
        Ok(summarizer.sum())
    }
}

fn invalid_arg(message: &str) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(message.into(), Position::NONE).into()
}

fn to_usize(value: i64, label: &str) -> Result<usize, Box<EvalAltResult>> {
    usize::try_from(value).map_err(|_| invalid_arg(&format!("{} must be >= 0", label)))
}

fn to_decimal_places(value: i64) -> Result<usize, Box<EvalAltResult>> {
    const MAX_DECIMALS: usize = 12;
    let places = to_usize(value, "decimals")?;
    if places > MAX_DECIMALS {
        return Err(invalid_arg(&format!("decimals must be <= {}", MAX_DECIMALS)));
    }
    Ok(places)
}

fn measure_ref(measure: &str) -> Result<CellRef, Box<EvalAltResult>> {
    CellRef::from_str(measure.trim())
        .ok_or_else(|| invalid_arg(&format!("measure must be a cell reference, got \"{}\"", measure)))
}

fn dynamic_to_f64(value: &Dynamic) -> Option<f64> {
    if let Ok(n) = value.as_float() {
        return Some(n);
    }
    if let Ok(n) = value.as_int() {
        return Some(n as f64);
    }
    None
}

/// A map field of an item, or unit when the item has no such field.
fn field_value(item: &Dynamic, field: &str) -> Dynamic {
    match item.clone().flatten().try_cast::<Map>() {
        Some(map) => map.get(field).cloned().unwrap_or(Dynamic::UNIT).flatten(),
        None => Dynamic::UNIT,
    }
}

fn field_number(item: &Dynamic, field: &str) -> Option<f64> {
    dynamic_to_f64(&field_value(item, field))
}

fn fixed_decimal_string(n: f64, decimals: usize) -> String {
    if n.is_nan() {
        return "#NAN!".to_string();
    }
    if n.is_infinite() {
        return "#INF!".to_string();
    }
    format!("{:.*}", decimals, n)
}

/// Split `items` into consecutive runs sharing the same `field` value.
/// Input order is kept; equal values that are not adjacent form separate runs.
pub fn runs(items: &[Dynamic], field: &str) -> Array {
    let mut out: Array = Array::new();
    let mut current: Option<(KeyPart, Dynamic, Array)> = None;

    for item in items {
        let key = field_value(item, field);
        let part = KeyPart::from_dynamic(&key);
        match &mut current {
            Some((open, _, members)) if *open == part => members.push(item.clone()),
            _ => {
                if let Some(run) = current.take() {
                    out.push(run_map(run));
                }
                current = Some((part, key, vec![item.clone()]));
            }
        }
    }
    if let Some(run) = current {
        out.push(run_map(run));
    }
    out
}

fn run_map((_, key, items): (KeyPart, Dynamic, Array)) -> Dynamic {
    let mut map = Map::new();
    map.insert("key".into(), key);
    map.insert("item".into(), items.first().cloned().unwrap_or(Dynamic::UNIT));
    map.insert("items".into(), Dynamic::from_array(items));
    Dynamic::from_map(map)
}

fn format_today(format: &str) -> Result<String, Box<EvalAltResult>> {
    let mut out = String::new();
    write!(out, "{}", chrono::Local::now().format(format))
        .map_err(|_| invalid_arg(&format!("invalid date format \"{}\"", format)))?;
    Ok(out)
}

/// Register report builtins. Group functions read from `ledger`.
pub fn register_builtins(engine: &mut Engine, ledger: GroupLedger) {
    // group_total(measure, level): running total of the open group at `level`,
    // or the last finalized total once the group closed.
    let totals = ledger.clone();
    engine.register_fn(
        "group_total",
        move |measure: &str, level: i64| -> Result<f64, Box<EvalAltResult>> {
            let measure = measure_ref(measure)?;
            let level = to_usize(level, "level")?;
            Ok(totals.current_total(&measure, level))
        },
    );

    // grand_total(measure): sum of every value recorded for the measure.
    let grand = ledger.clone();
    engine.register_fn(
        "grand_total",
        move |measure: &str| -> Result<f64, Box<EvalAltResult>> {
            let measure = measure_ref(measure)?;
            Ok(grand.grand_total(&measure))
        },
    );

    // group_history(measure, level): finalized sums at `level`, oldest first.
    let history = ledger.clone();
    engine.register_fn(
        "group_history",
        move |measure: &str, level: i64| -> Result<Array, Box<EvalAltResult>> {
            let measure = measure_ref(measure)?;
            let level = to_usize(level, "level")?;
            Ok(history
                .history(&measure, level)
                .into_iter()
                .map(Dynamic::from_float)
                .collect())
        },
    );

    engine.register_fn("runs", |items: Array, field: &str| -> Array {
        runs(&items, field)
    });

    // GroupSum: G.sum(field, items[, filter])
    engine.register_type_with_name::<GroupSum>("GroupSum");
    let builder = ledger.builder();
    engine.register_fn("group_sum", move || GroupSum::new(builder.clone()));
    engine.register_fn(
        "sum",
        |g: &mut GroupSum, field: &str, items: Array| -> Result<f64, Box<EvalAltResult>> {
            g.sum_where(field, &items, |_| Ok(true))
        },
    );
    engine.register_fn(
        "sum",
        |ctx: NativeCallContext,
         g: &mut GroupSum,
         field: &str,
         items: Array,
         filter: FnPtr|
         -> Result<f64, Box<EvalAltResult>> {
            g.sum_where(field, &items, |item| {
                filter.call_within_context::<bool>(&ctx, (item.clone(),))
            })
        },
    );

    engine.register_fn("today", || -> Result<String, Box<EvalAltResult>> {
        format_today("%Y-%m-%d")
    });
    engine.register_fn("today", |format: &str| -> Result<String, Box<EvalAltResult>> {
        format_today(format)
    });

    // FIXED(n, decimals): format with a fixed number of decimal places.
    engine.register_fn(
        "FIXED",
        |n: f64, decimals: i64| -> Result<String, Box<EvalAltResult>> {
            let decimals = to_decimal_places(decimals)?;
            Ok(fixed_decimal_string(n, decimals))
        },
    );
    engine.register_fn(
        "FIXED",
        |n: i64, decimals: i64| -> Result<String, Box<EvalAltResult>> {
            let decimals = to_decimal_places(decimals)?;
            Ok(fixed_decimal_string(n as f64, decimals))
        },
    );
}
