use gridplate_engine::engine::{
    Cell, CellRef, CommandTree, Dynamic, ExpressionEvaluator, Grid, GroupLedger, Marker,
    MemorySink, Processor, RhaiEvaluator, ScopeId, StructuralOp, ValueEnvironment,
};
use gridplate_engine::{EvalError, ReportError};
use pretty_assertions::assert_eq;

const HOLDINGS: &str = r#"{"list": [
    {"supertype": "Commodities type A", "instrument": "Commodity", "class2": "Liegenschaften", "description": "Wolterstr. 100", "amount": 250.0},
    {"supertype": "Commodities type A", "instrument": "Commodity", "class2": "Liegenschaften", "description": "Stauffenbergallee", "amount": 500.0},
    {"supertype": "Commodities type A", "instrument": "Commodity", "class2": "Immobilien", "description": "Wolterstr. 102", "amount": 250.0},
    {"supertype": "Commodities type B", "instrument": "Commodity", "class2": "Fahrzeuge", "description": "Porsche 911", "amount": 100.0},
    {"supertype": "Commodities type B", "instrument": "Commodity", "class2": "Fahrzeuge", "description": "Mercedes Maybach", "amount": 300.0},
    {"supertype": "Commodities type B", "instrument": "Commodity", "class2": "Fahrzeuge", "description": "Mercedes-Benz SLK 350", "amount": 60.0},
    {"supertype": "Commodities type B", "instrument": "Commodity", "class2": "Fahrzeuge", "description": "Bentley Flying Spur", "amount": 240.0},
    {"supertype": "Bonds", "instrument": "Bond", "class2": "Base", "description": "AC-100 K1", "amount": 200.0},
    {"supertype": "Bonds", "instrument": "Bond", "class2": "Base", "description": "AC-100 K2", "amount": 200.0},
    {"supertype": "Bonds", "instrument": "Bond", "class2": "Base", "description": "AC-100 K3", "amount": 200.0},
    {"supertype": "Bonds", "instrument": "Bond", "class2": "Super", "description": "MX 12", "amount": 123.0},
    {"supertype": "Shares", "instrument": "Share", "class2": "Base", "description": "L77", "amount": 0.31}
]}"#;

fn a1(s: &str) -> CellRef {
    CellRef::from_str(s).unwrap()
}

fn build(cells: &[(&str, Cell)], markers: &[(&str, &str)]) -> CommandTree {
    let grid = Grid::new();
    for (at, cell) in cells {
        grid.insert(a1(at), cell.clone());
    }
    let markers: Vec<Marker> = markers
        .iter()
        .map(|(at, text)| Marker::parse(&a1(at), text).unwrap())
        .collect();
    CommandTree::build(&grid, &markers).unwrap()
}

fn env_from(json: &str) -> ValueEnvironment {
    let data = rhai::Engine::new().parse_json(json, true).unwrap();
    ValueEnvironment::from_map(data)
}

fn text(s: &str) -> Cell {
    Cell::new_text(s)
}

fn number(sink: &MemorySink, at: &str) -> f64 {
    sink.value(at)
        .and_then(|c| c.as_number())
        .unwrap_or_else(|| panic!("no number at {}", at))
}

fn shown(sink: &MemorySink, at: &str) -> String {
    sink.value(at)
        .map(|c| c.to_input_string())
        .unwrap_or_else(|| panic!("nothing at {}", at))
}

fn nested_template() -> CommandTree {
    build(
        &[
            ("A1", text("Report")),
            ("A2", text("${g.key}")),
            ("A3", text("${c.key}")),
            ("B4", text("${e.description}")),
            ("D4", text("${e.amount}")),
            ("A5", text("Sum ${c.key}")),
            ("D5", Cell::new_formula("SUM(D4)")),
            ("A6", text("Total ${g.key}")),
            ("D6", Cell::new_formula("SUM(D4)")),
            ("E6", text(r#"${group_total("D4", 0)}"#)),
            ("A8", text("Grand total")),
            ("D8", Cell::new_formula("SUM(D4)")),
            ("E8", text(r#"${grand_total("D4")}"#)),
        ],
        &[
            ("A2", r#"jx:each(items='runs(list, "supertype")' var="g" lastCell="E6" groupKey="g.key")"#),
            ("A3", r#"jx:each(items='runs(g.items, "class2")' var="c" lastCell="D5" groupKey="c.key")"#),
            ("A4", r#"jx:each(items="c.items" var="e" lastCell="D4")"#),
        ],
    )
}

#[test]
fn nested_group_sums_and_formulas() {
    let tree = nested_template();
    let processor = Processor::rhai();
    let mut env = env_from(HOLDINGS);
    let mut sink = MemorySink::new();
    let result = processor.process(&tree, &mut env, &mut sink).unwrap();

    assert!(result.warnings.is_empty());
    assert_eq!(shown(&sink, "A2"), "Commodities type A");
    assert_eq!(shown(&sink, "A3"), "Liegenschaften");
    assert_eq!(shown(&sink, "B5"), "Stauffenbergallee");

    assert_eq!(shown(&sink, "D6"), "=SUM(D4:D5)");
    assert_eq!(shown(&sink, "D9"), "=SUM(D8)");
    assert_eq!(shown(&sink, "D10"), "=SUM(D4:D5,D8)");
    assert_eq!(number(&sink, "E10"), 1000.0);

    assert_eq!(shown(&sink, "A18"), "Total Commodities type B");
    assert_eq!(shown(&sink, "D18"), "=SUM(D13:D16)");
    assert_eq!(number(&sink, "E18"), 700.0);

    assert_eq!(number(&sink, "D26"), 123.0);
    assert_eq!(shown(&sink, "D28"), "=SUM(D21:D23,D26)");
    assert_eq!(number(&sink, "E28"), 723.0);

    assert_eq!(number(&sink, "E33"), 0.31);
    // The blank template row between the groups and the grand total stays.
    assert!(sink.value("A34").is_none());
    assert_eq!(shown(&sink, "A35"), "Grand total");
    assert_eq!(shown(&sink, "D35"), "=SUM(D4:D5,D8,D13:D16,D21:D23,D26,D31)");
    assert!((number(&sink, "E35") - 2423.31).abs() < 1e-9);
    assert_eq!(sink.bounds().map(|b| b.to_string()), Some("A1:E35".to_string()));
}

#[test]
fn class_and_supertype_histories() {
    let tree = nested_template();
    let processor = Processor::rhai();
    processor
        .process(&tree, &mut env_from(HOLDINGS), &mut MemorySink::new())
        .unwrap();

    let ledger = processor.ledger();
    let amount = a1("D4");
    assert_eq!(ledger.history(&amount, 1)[..2], [750.0, 250.0]);
    assert_eq!(ledger.history(&amount, 0)[..3], [1000.0, 700.0, 723.0]);
    assert!((ledger.grand_total(&amount) - 2423.31).abs() < 1e-9);
    assert_eq!(ledger.open_levels(), 0);
}

#[test]
fn hidden_subgroup_still_counts_in_group_sum() {
    let tree = build(
        &[
            ("A1", text("${g.key}")),
            ("A2", text("${c.key}")),
            ("D3", text("${e.amount}")),
            ("A4", text("Total ${g.key}")),
            ("D4", text(r#"${G.sum("amount", g.items)}"#)),
            ("E4", Cell::new_formula("SUM(D3)")),
            ("F4", text(r#"${group_total("D3", 0)}"#)),
        ],
        &[
            ("A1", r#"jx:each(items='runs(list, "supertype")' var="g" lastCell="F4" groupKey="g.key")"#),
            ("A2", r#"jx:each(items='runs(g.items, "class2")' var="c" lastCell="D3" groupKey="c.key")"#),
            ("A2", r#"jx:if(condition='!(g.key == "Bonds" && c.key == "Super")' lastCell="D3")"#),
            ("A3", r#"jx:each(items="c.items" var="e" lastCell="D3")"#),
        ],
    );
    let mut sink = MemorySink::new();
    Processor::rhai()
        .process(&tree, &mut env_from(HOLDINGS), &mut sink)
        .unwrap();

    assert_eq!(shown(&sink, "A15"), "Bonds");
    assert_eq!(shown(&sink, "A20"), "Total Bonds");
    assert_eq!(number(&sink, "D20"), 723.0);
    assert_eq!(shown(&sink, "E20"), "=SUM(D17:D19)");
    assert_eq!(number(&sink, "F20"), 600.0);
    assert!(sink.value("A21").is_some_and(|c| c.to_input_string() == "Shares"));
}

#[test]
fn false_condition_opens_no_group_state() {
    let tree = build(
        &[("A1", text("${e.amount}")), ("A2", text("after"))],
        &[
            ("A1", r#"jx:if(condition="false")"#),
            ("A1", r#"jx:each(items="list" var="e")"#),
        ],
    );
    let processor = Processor::rhai();
    let mut sink = MemorySink::new();
    let result = processor
        .process(&tree, &mut env_from(HOLDINGS), &mut sink)
        .unwrap();

    assert!(processor.ledger().measures().is_empty());
    assert_eq!(shown(&sink, "A1"), "after");
    assert_eq!(result.extent.height, 1);
}

#[test]
fn empty_collection_collapses_header_and_footer() {
    let tree = build(
        &[
            ("A1", text("Header")),
            ("A2", text("${e}")),
            ("A3", Cell::new_formula("SUM(A2)")),
            ("A4", text("after")),
        ],
        &[("A1", r#"jx:each(items="[]" var="e" lastCell="A3")"#)],
    );
    let mut sink = MemorySink::new();
    let result = Processor::rhai()
        .process(&tree, &mut ValueEnvironment::new(), &mut sink)
        .unwrap();

    assert_eq!(shown(&sink, "A1"), "after");
    assert_eq!(sink.value("A2"), None);
    assert_eq!(result.extent.height, 1);
}

#[test]
fn collapsed_reference_becomes_zero_and_outside_reference_warns() {
    let tree = build(
        &[
            ("A1", text("${e}")),
            ("A2", Cell::new_formula("SUM(A1) + Z99")),
        ],
        &[
            ("A1", r#"jx:area(lastCell="B2")"#),
            ("A1", r#"jx:each(items="()" var="e")"#),
        ],
    );
    let mut sink = MemorySink::new();
    let result = Processor::rhai()
        .process(&tree, &mut ValueEnvironment::new(), &mut sink)
        .unwrap();

    assert_eq!(shown(&sink, "A1"), "=SUM(0) + Z99");
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].reference, "Z99");
    assert_eq!(result.warnings[0].at, a1("A1"));
}

#[test]
fn growth_past_template_inserts_rows() {
    let tree = build(
        &[("A1", text("${e}"))],
        &[("A1", r#"jx:each(items="1..=4" var="e")"#)],
    );
    let mut sink = MemorySink::new();
    Processor::rhai()
        .process(&tree, &mut ValueEnvironment::new(), &mut sink)
        .unwrap();
    assert_eq!(
        sink.ops(),
        &[StructuralOp::InsertRows {
            at: gridplate_engine::engine::Area::parse("A1").unwrap(),
            count: 3
        }]
    );
}

#[test]
fn non_collection_items_is_evaluation_error() {
    let tree = build(&[("B2", text("${e}"))], &[("B2", r#"jx:each(items="42" var="e")"#)]);
    let err = Processor::rhai()
        .process(&tree, &mut ValueEnvironment::new(), &mut MemorySink::new())
        .unwrap_err();
    match err {
        ReportError::Evaluation { at, expr, .. } => {
            assert_eq!(at.to_string(), "B2");
            assert_eq!(expr, "42");
        }
        other => panic!("unexpected error: {}", other),
    }
}

/// Answers `open_levels` with the ledger's open state, delegating everything else.
struct Probe {
    inner: RhaiEvaluator,
    ledger: GroupLedger,
}

impl ExpressionEvaluator for Probe {
    fn evaluate(&self, expr: &str, env: &ValueEnvironment, scope: ScopeId) -> Result<Dynamic, EvalError> {
        if expr == "open_levels" {
            return Ok(Dynamic::from(self.ledger.open_levels() as i64));
        }
        self.inner.evaluate(expr, env, scope)
    }
}

#[test]
fn iterate_finalizes_its_levels_before_siblings_run() {
    let tree = build(
        &[
            ("A1", text("${e.amount}")),
            ("B1", text("${open_levels}")),
            ("A2", text("${open_levels}")),
        ],
        &[("A1", r#"jx:each(items="list" var="e" lastCell="B1" groupKey="e.supertype")"#)],
    );
    let ledger = GroupLedger::new();
    let probe = Probe {
        inner: RhaiEvaluator::new(ledger.clone()),
        ledger: ledger.clone(),
    };
    let mut sink = MemorySink::new();
    Processor::new(probe, ledger)
        .process(&tree, &mut env_from(HOLDINGS), &mut sink)
        .unwrap();

    // Inside the loop the amount measure has level 0 open.
    assert_eq!(number(&sink, "B1"), 1.0);
    assert_eq!(number(&sink, "A13"), 0.0);
}
