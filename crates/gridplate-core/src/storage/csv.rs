//! CSV export of rendered reports

use gridplate_engine::engine::{CellRef, CellType, Grid, format_cell};

/// Export the grid to CSV, one line per row from A1 to the last populated cell.
///
/// Formulas are written as `=...` so a spreadsheet recalculates them; text that
/// only looks like a formula is quoted with a leading `'`.
pub fn write_csv_content(grid: &Grid) -> String {
    let mut max_row = None;
    let mut max_col = 0usize;
    for entry in grid.iter() {
        let at = entry.key();
        max_row = Some(max_row.map_or(at.row, |r: usize| r.max(at.row)));
        max_col = max_col.max(at.col);
    }
    let Some(max_row) = max_row else {
        return String::new();
    };

    let mut out = String::new();
    for row in 0..=max_row {
        let fields: Vec<String> = (0..=max_col)
            .map(|col| match grid.get(&CellRef::new(col, row)) {
                Some(cell) => match &cell.contents {
                    CellType::Text(s) => escape_csv_field(s),
                    _ => quote_csv_field(&format_cell(&cell)),
                },
                None => String::new(),
            })
            .collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

/// Escape a text field for CSV output
fn escape_csv_field(field: &str) -> String {
    // Guard against CSV formula injection in spreadsheet apps.
    let first_non_space = field.trim_start_matches([' ', '\t']).chars().next();
    if matches!(first_non_space, Some('=' | '+' | '-' | '@')) {
        quote_csv_field(&format!("'{}", field))
    } else {
        quote_csv_field(field)
    }
}

fn quote_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
