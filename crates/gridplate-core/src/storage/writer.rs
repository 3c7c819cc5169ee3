//! Writer for rendered reports in .grd format
//!
//! Merged regions are written as `!A1: merge(lastCell="C1")` lines, so the
//! output can be read back with the template parser.

use gridplate_engine::engine::{Area, CellType, Grid};

/// Write a rendered grid and its merged regions to a .grd format string
pub fn write_grd_content(grid: &Grid, merges: &[Area]) -> String {
    let mut lines = vec!["# Gridplate report".to_string()];

    for merge in merges {
        lines.push(format!(
            "!{}: merge(lastCell=\"{}\")",
            merge.top_left(),
            merge.bottom_right()
        ));
    }

    let mut cells: Vec<_> = grid.iter().collect();
    cells.sort_by(|a, b| {
        let a_key = a.key();
        let b_key = b.key();
        a_key.row.cmp(&b_key.row).then(a_key.col.cmp(&b_key.col))
    });

    for entry in cells {
        let value_str = match &entry.value().contents {
            CellType::Empty => continue,
            CellType::Number(n) => n.to_string(),
            CellType::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            CellType::Text(s) => format!("\"{}\"", escape_grd_text(s)),
            CellType::Formula(f) => format!("={}", f),
        };
        lines.push(format!("{}: {}", entry.key(), value_str));
    }

    lines.join("\n") + "\n"
}

fn escape_grd_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out
}
