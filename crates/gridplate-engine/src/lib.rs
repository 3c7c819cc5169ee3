//! gridplate_engine - Report template engine + Rhai integration.

pub mod builtins;
pub mod engine;
pub mod error;

pub use error::{DanglingReference, EvalError, GroupStateError, ReportError, Result, SinkError};

#[cfg(test)]
mod tests {
    use crate::engine::*;

    #[test]
    fn test_from_str_multi_letter_columns() {
        assert_eq!(CellRef::from_str("AA1").unwrap().col, 26);
        assert_eq!(CellRef::from_str("AZ1").unwrap().col, 51);
        assert_eq!(CellRef::from_str("BA1").unwrap().col, 52);
    }

    #[test]
    fn test_from_str_invalid_inputs() {
        assert!(CellRef::from_str("").is_none());
        assert!(CellRef::from_str("123").is_none());
        assert!(CellRef::from_str("A0").is_none());
        assert!(CellRef::from_str("A 1").is_none());
    }

    #[test]
    fn test_processors_do_not_share_ledgers() {
        let grid = Grid::new();
        grid.insert(CellRef::new(0, 0), Cell::new_text("${x}"));
        let marker = Marker::parse(&CellRef::new(0, 0), r#"jx:each(items="[1, 2]" var="x")"#).unwrap();
        let tree = CommandTree::build(&grid, &[marker]).unwrap();

        let first = Processor::rhai();
        let second = Processor::rhai();
        first
            .process(&tree, &mut ValueEnvironment::new(), &mut MemorySink::new())
            .unwrap();

        let a1 = CellRef::new(0, 0);
        assert_eq!(first.ledger().grand_total(&a1), 3.0);
        assert_eq!(second.ledger().grand_total(&a1), 0.0);
    }
}
