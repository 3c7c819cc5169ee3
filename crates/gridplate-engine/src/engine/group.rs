//! Nesting-aware group sums.
//!
//! A [`GroupAccumulator`] keeps one running aggregate per nesting level for a
//! single measure (the template cell whose values are being summed). Each value
//! is recorded with a [`GroupKey`]: one component per active nesting level,
//! outermost first. When the key of a new value differs from the open group's
//! prefix at some level, that level and everything below it are finalized
//! before the new value is added. A value always contributes to its own group,
//! every ancestor group, and the grand total.
//!
//! [`GroupLedger`] holds one accumulator per measure and is shared between the
//! interpreter (which records) and the expression engine (which reads totals).

use dashmap::DashMap;
use rhai::Dynamic;
use std::fmt;
use std::sync::Arc;

use super::cell_ref::CellRef;
use crate::error::GroupStateError;

/// One component of a [`GroupKey`], compared by value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Unit,
    Bool(bool),
    Int(i64),
    /// Bit pattern of a float that has a fractional part.
    Float(u64),
    Text(String),
    /// Anything else, compared by its display form.
    Other(String),
}

impl KeyPart {
    pub fn from_dynamic(value: &Dynamic) -> KeyPart {
        let value = value.clone().flatten();
        if value.is_unit() {
            return KeyPart::Unit;
        }
        if let Ok(b) = value.as_bool() {
            return KeyPart::Bool(b);
        }
        if let Ok(n) = value.as_int() {
            return KeyPart::Int(n);
        }
        if let Ok(f) = value.as_float() {
            // 1 and 1.0 must land in the same group.
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                return KeyPart::Int(f as i64);
            }
            return KeyPart::Float(f.to_bits());
        }
        if value.is_string() {
            return KeyPart::Text(value.to_string());
        }
        KeyPart::Other(value.to_string())
    }
}

impl From<usize> for KeyPart {
    fn from(index: usize) -> Self {
        KeyPart::Int(index as i64)
    }
}

impl From<&str> for KeyPart {
    fn from(text: &str) -> Self {
        KeyPart::Text(text.to_string())
    }
}

/// Ordered key identifying the group of a value at every nesting level.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GroupKey(Vec<KeyPart>);

impl GroupKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        GroupKey(parts)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// The first `level + 1` components, or None if the key is shorter.
    pub fn prefix(&self, level: usize) -> Option<&[KeyPart]> {
        self.0.get(..=level)
    }

    pub fn push(&mut self, part: KeyPart) {
        self.0.push(part);
    }

    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }
}

impl From<Vec<KeyPart>> for GroupKey {
    fn from(parts: Vec<KeyPart>) -> Self {
        GroupKey(parts)
    }
}

impl<T: Into<KeyPart>> FromIterator<T> for GroupKey {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        GroupKey(iter.into_iter().map(Into::into).collect())
    }
}

/// A reduction strategy over recorded values.
pub trait Summarizer: Send + Sync + fmt::Debug {
    fn add(&mut self, value: f64);
    fn sum(&self) -> f64;
}

/// Creates a fresh [`Summarizer`] for every newly opened group.
pub trait SummarizerBuilder: Send + Sync + fmt::Debug {
    fn build(&self) -> Box<dyn Summarizer>;
}

/// Plain f64 addition, the default strategy.
#[derive(Debug, Default)]
pub struct DoubleSummarizer {
    sum: f64,
}

impl Summarizer for DoubleSummarizer {
    fn add(&mut self, value: f64) {
        self.sum += value;
    }

    fn sum(&self) -> f64 {
        self.sum
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DoubleSummarizerBuilder;

impl SummarizerBuilder for DoubleSummarizerBuilder {
    fn build(&self) -> Box<dyn Summarizer> {
        Box::new(DoubleSummarizer::default())
    }
}

/// Largest scale a [`FixedPointSummarizer`] accepts.
pub const MAX_FIXED_POINT_SCALE: u32 = 18;

/// Exact decimal addition at a fixed number of decimal places.
///
/// Each value is rounded to `scale` places once and accumulated as an integer,
/// so long columns of currency amounts do not drift. Sums saturate at the
/// `i128` bounds.
#[derive(Debug)]
pub struct FixedPointSummarizer {
    factor: f64,
    units: i128,
}

impl FixedPointSummarizer {
    /// `scale` is clamped to [`MAX_FIXED_POINT_SCALE`].
    pub fn new(scale: u32) -> Self {
        if scale > MAX_FIXED_POINT_SCALE {
            tracing::warn!(scale, max = MAX_FIXED_POINT_SCALE, "fixed point scale clamped");
        }
        let scale = scale.min(MAX_FIXED_POINT_SCALE);
        FixedPointSummarizer {
            factor: 10f64.powi(scale as i32),
            units: 0,
        }
    }
}

impl Summarizer for FixedPointSummarizer {
    fn add(&mut self, value: f64) {
        if value.is_finite() {
            // `as` saturates out-of-range floats.
            self.units = self.units.saturating_add((value * self.factor).round() as i128);
        }
    }

    fn sum(&self) -> f64 {
        self.units as f64 / self.factor
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedPointSummarizerBuilder {
    pub scale: u32,
}

impl SummarizerBuilder for FixedPointSummarizerBuilder {
    fn build(&self) -> Box<dyn Summarizer> {
        Box::new(FixedPointSummarizer::new(self.scale))
    }
}

#[derive(Debug)]
struct OpenGroup {
    prefix: Vec<KeyPart>,
    count: usize,
    summarizer: Box<dyn Summarizer>,
}

#[derive(Debug, Default)]
struct LevelState {
    open: Option<OpenGroup>,
    last: Option<f64>,
    history: Vec<f64>,
}

impl LevelState {
    fn close(&mut self) -> Option<f64> {
        let group = self.open.take()?;
        let sum = group.summarizer.sum();
        self.last = Some(sum);
        self.history.push(sum);
        Some(sum)
    }
}

/// Running aggregates for one measure, one state per nesting level.
#[derive(Debug)]
pub struct GroupAccumulator {
    builder: Arc<dyn SummarizerBuilder>,
    grand: Box<dyn Summarizer>,
    levels: Vec<LevelState>,
}

impl GroupAccumulator {
    pub fn new(builder: Arc<dyn SummarizerBuilder>) -> Self {
        GroupAccumulator {
            grand: builder.build(),
            builder,
            levels: Vec::new(),
        }
    }

    /// Add `value` to its group at every level of `key` and to the grand total.
    pub fn record(&mut self, key: &GroupKey, value: f64) {
        // Levels below the key's depth cannot match it.
        self.finalize_from(key.len());

        for level in 0..key.len() {
            let prefix = &key.parts()[..=level];
            let stale = self
                .levels
                .get(level)
                .and_then(|state| state.open.as_ref())
                .is_some_and(|group| group.prefix.as_slice() != prefix);
            if stale {
                self.finalize_from(level);
            }
        }

        if self.levels.len() < key.len() {
            self.levels.resize_with(key.len(), LevelState::default);
        }
        for level in 0..key.len() {
            let state = &mut self.levels[level];
            let group = state.open.get_or_insert_with(|| OpenGroup {
                prefix: key.parts()[..=level].to_vec(),
                count: 0,
                summarizer: self.builder.build(),
            });
            group.count += 1;
            group.summarizer.add(value);
        }
        self.grand.add(value);
    }

    /// Running total of the open group at `level`.
    ///
    /// A closed level reports its last finalized value; a level that was never
    /// opened reports 0.
    pub fn current_total(&self, level: usize) -> f64 {
        match self.levels.get(level) {
            Some(LevelState {
                open: Some(group), ..
            }) => group.summarizer.sum(),
            Some(LevelState {
                last: Some(last), ..
            }) => *last,
            _ => {
                tracing::debug!(level, "total requested for a level that was never opened");
                0.0
            }
        }
    }

    /// Number of values in the open group at `level` (0 when closed).
    pub fn count(&self, level: usize) -> usize {
        self.levels
            .get(level)
            .and_then(|s| s.open.as_ref())
            .map_or(0, |g| g.count)
    }

    pub fn is_open(&self, level: usize) -> bool {
        self.levels.get(level).is_some_and(|s| s.open.is_some())
    }

    /// Number of levels that currently have an open group.
    pub fn open_levels(&self) -> usize {
        self.levels.iter().filter(|s| s.open.is_some()).count()
    }

    /// Close the group at `level` and return its sum.
    ///
    /// Finalizing an already closed level returns the last known value again.
    pub fn finalize(&mut self, level: usize) -> Result<f64, GroupStateError> {
        let Some(state) = self.levels.get_mut(level) else {
            return Err(GroupStateError { level });
        };
        if let Some(sum) = state.close() {
            return Ok(sum);
        }
        state.last.ok_or(GroupStateError { level })
    }

    /// Finalize `level` and every deeper level, deepest first.
    pub fn finalize_from(&mut self, level: usize) {
        for state in self.levels.iter_mut().skip(level).rev() {
            state.close();
        }
    }

    pub fn grand_total(&self) -> f64 {
        self.grand.sum()
    }

    /// Every finalized sum at `level`, oldest first.
    pub fn history(&self, level: usize) -> &[f64] {
        self.levels.get(level).map_or(&[], |s| s.history.as_slice())
    }
}

/// Per-measure accumulators for one run.
///
/// Clones share state, so the expression engine can read totals while the
/// interpreter records them.
#[derive(Clone, Debug)]
pub struct GroupLedger {
    accumulators: Arc<DashMap<CellRef, GroupAccumulator>>,
    builder: Arc<dyn SummarizerBuilder>,
}

impl GroupLedger {
    pub fn new() -> Self {
        Self::with_builder(Arc::new(DoubleSummarizerBuilder))
    }

    pub fn with_builder(builder: Arc<dyn SummarizerBuilder>) -> Self {
        GroupLedger {
            accumulators: Arc::new(DashMap::new()),
            builder,
        }
    }

    pub fn builder(&self) -> Arc<dyn SummarizerBuilder> {
        self.builder.clone()
    }

    pub fn record(&self, measure: &CellRef, key: &GroupKey, value: f64) {
        self.accumulators
            .entry(measure.clone())
            .or_insert_with(|| GroupAccumulator::new(self.builder.clone()))
            .record(key, value);
    }

    pub fn current_total(&self, measure: &CellRef, level: usize) -> f64 {
        match self.accumulators.get(measure) {
            Some(acc) => acc.current_total(level),
            None => {
                tracing::debug!(%measure, level, "total requested for a measure with no values");
                0.0
            }
        }
    }

    /// Finalize one level of one measure. Never-opened levels are logged and yield None.
    pub fn finalize(&self, measure: &CellRef, level: usize) -> Option<f64> {
        let result = match self.accumulators.get_mut(measure) {
            Some(mut acc) => acc.finalize(level),
            None => Err(GroupStateError { level }),
        };
        match result {
            Ok(sum) => Some(sum),
            Err(err) => {
                tracing::debug!(%measure, "{}", err);
                None
            }
        }
    }

    /// Finalize `level` and deeper for every measure.
    pub fn finalize_from(&self, level: usize) {
        for mut acc in self.accumulators.iter_mut() {
            acc.finalize_from(level);
        }
    }

    pub fn grand_total(&self, measure: &CellRef) -> f64 {
        self.accumulators
            .get(measure)
            .map_or(0.0, |acc| acc.grand_total())
    }

    pub fn history(&self, measure: &CellRef, level: usize) -> Vec<f64> {
        self.accumulators
            .get(measure)
            .map(|acc| acc.history(level).to_vec())
            .unwrap_or_default()
    }

    /// Open levels summed over all measures.
    pub fn open_levels(&self) -> usize {
        self.accumulators.iter().map(|acc| acc.open_levels()).sum()
    }

    pub fn measures(&self) -> Vec<CellRef> {
        let mut measures: Vec<CellRef> = self.accumulators.iter().map(|e| e.key().clone()).collect();
        measures.sort();
        measures
    }

    pub fn clear(&self) {
        self.accumulators.clear();
    }
}

impl Default for GroupLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn accumulator() -> GroupAccumulator {
        GroupAccumulator::new(Arc::new(DoubleSummarizerBuilder))
    }

    fn key(parts: &[&str]) -> GroupKey {
        parts.iter().copied().collect()
    }

    #[test]
    fn test_nested_class_and_supertype_sums() {
        let mut acc = accumulator();
        acc.record(&key(&["Commodity", "Liegenschaften"]), 250.0);
        acc.record(&key(&["Commodity", "Liegenschaften"]), 500.0);
        acc.record(&key(&["Commodity", "Immobilien"]), 250.0);
        acc.finalize_from(0);

        assert_eq!(acc.history(1), &[750.0, 250.0]);
        assert_eq!(acc.history(0), &[1000.0]);
        assert_eq!(acc.grand_total(), 1000.0);
    }

    #[test]
    fn test_current_total_is_running_sum() {
        let mut acc = accumulator();
        acc.record(&key(&["a", "x"]), 1.0);
        acc.record(&key(&["a", "x"]), 2.0);
        assert_eq!(acc.current_total(1), 3.0);
        acc.record(&key(&["a", "y"]), 4.0);
        assert_eq!(acc.current_total(1), 4.0);
        assert_eq!(acc.current_total(0), 7.0);
        assert_eq!(acc.count(0), 3);
    }

    #[test]
    fn test_outer_change_closes_inner_level() {
        let mut acc = accumulator();
        acc.record(&key(&["a", "x"]), 1.0);
        // Same inner component, different outer one: still a new inner group.
        acc.record(&key(&["b", "x"]), 2.0);
        assert_eq!(acc.history(1), &[1.0]);
        assert_eq!(acc.history(0), &[1.0]);
        assert_eq!(acc.current_total(1), 2.0);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut acc = accumulator();
        acc.record(&key(&["a"]), 5.0);
        assert_eq!(acc.finalize(0), Ok(5.0));
        assert_eq!(acc.finalize(0), Ok(5.0));
        assert_eq!(acc.history(0), &[5.0]);
    }

    #[test]
    fn test_finalize_never_opened_level_is_error() {
        let mut acc = accumulator();
        assert_eq!(acc.finalize(3), Err(GroupStateError { level: 3 }));
        assert_eq!(acc.current_total(3), 0.0);
    }

    #[test]
    fn test_record_after_finalize_starts_at_zero() {
        let mut acc = accumulator();
        acc.record(&key(&["a"]), 5.0);
        acc.finalize(0).unwrap();
        acc.record(&key(&["a"]), 1.0);
        assert_eq!(acc.current_total(0), 1.0);
        assert_eq!(acc.grand_total(), 6.0);
    }

    #[test]
    fn test_shorter_key_closes_deeper_levels() {
        let mut acc = accumulator();
        acc.record(&key(&["a", "x"]), 1.0);
        acc.record(&key(&["a"]), 2.0);
        assert!(!acc.is_open(1));
        assert_eq!(acc.current_total(0), 3.0);
    }

    #[test]
    fn test_fixed_point_summarizer_is_exact() {
        let mut acc = GroupAccumulator::new(Arc::new(FixedPointSummarizerBuilder { scale: 2 }));
        for _ in 0..10 {
            acc.record(&key(&["a"]), 0.1);
        }
        assert_eq!(acc.current_total(0), 1.0);
    }

    #[test]
    fn test_fixed_point_scale_is_clamped() {
        let mut acc = GroupAccumulator::new(Arc::new(FixedPointSummarizerBuilder { scale: 39 }));
        acc.record(&key(&["a"]), 1.0);
        acc.record(&key(&["a"]), 1.0);
        assert_eq!(acc.current_total(0), 2.0);
        assert_eq!(acc.grand_total(), 2.0);
    }

    #[test]
    fn test_fixed_point_saturates_on_huge_values() {
        let mut summarizer = FixedPointSummarizer::new(MAX_FIXED_POINT_SCALE);
        summarizer.add(1e300);
        summarizer.add(1e300);
        assert!(summarizer.sum() > 1e20);

        let mut summarizer = FixedPointSummarizer::new(2);
        summarizer.add(-1e300);
        summarizer.add(-1e300);
        assert!(summarizer.sum() < 0.0);
    }

    #[test]
    fn test_key_part_unifies_int_and_whole_float() {
        assert_eq!(
            KeyPart::from_dynamic(&Dynamic::from(1_i64)),
            KeyPart::from_dynamic(&Dynamic::from(1.0_f64))
        );
        assert_ne!(
            KeyPart::from_dynamic(&Dynamic::from(1.5_f64)),
            KeyPart::from_dynamic(&Dynamic::from(1_i64))
        );
    }

    #[test]
    fn test_ledger_keeps_measures_apart() {
        let ledger = GroupLedger::new();
        let amount = CellRef::new(3, 4);
        let count = CellRef::new(4, 4);
        ledger.record(&amount, &key(&["a"]), 10.0);
        ledger.record(&count, &key(&["a"]), 1.0);
        assert_eq!(ledger.current_total(&amount, 0), 10.0);
        assert_eq!(ledger.current_total(&count, 0), 1.0);
        ledger.finalize_from(0);
        assert_eq!(ledger.open_levels(), 0);
        assert_eq!(ledger.finalize(&amount, 0), Some(10.0));
        assert_eq!(ledger.finalize(&CellRef::new(9, 9), 0), None);
    }

    proptest! {
        #[test]
        fn prop_innermost_history_matches_consecutive_runs(
            items in proptest::collection::vec((0u8..3, 0u8..3, -1000i32..1000), 1..40)
        ) {
            let mut acc = accumulator();
            for (outer, inner, value) in &items {
                let k = GroupKey::new(vec![KeyPart::Int(*outer as i64), KeyPart::Int(*inner as i64)]);
                acc.record(&k, *value as f64);
            }
            acc.finalize_from(0);

            // Expected innermost sums: runs of equal (outer, inner) pairs.
            let mut expected: Vec<f64> = Vec::new();
            let mut prev: Option<(u8, u8)> = None;
            for (outer, inner, value) in &items {
                if prev == Some((*outer, *inner)) {
                    if let Some(last) = expected.last_mut() {
                        *last += *value as f64;
                    }
                } else {
                    expected.push(*value as f64);
                }
                prev = Some((*outer, *inner));
            }
            prop_assert_eq!(acc.history(1), expected.as_slice());

            let total: f64 = items.iter().map(|(_, _, v)| *v as f64).sum();
            prop_assert_eq!(acc.grand_total(), total);
            prop_assert_eq!(acc.history(0).iter().sum::<f64>(), total);
        }

        #[test]
        fn prop_finalize_twice_returns_same_value(values in proptest::collection::vec(-1.0e6f64..1.0e6, 1..20)) {
            let mut acc = accumulator();
            for v in &values {
                acc.record(&key(&["g"]), *v);
            }
            let first = acc.finalize(0);
            let second = acc.finalize(0);
            prop_assert_eq!(first, second);
        }
    }
}
