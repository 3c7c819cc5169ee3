//! Markdown export of rendered reports

use gridplate_engine::engine::{Area, CellRef, Grid, format_cell};
use std::fmt::Write;

/// Render the grid as a markdown table spanning the populated cells.
pub fn write_markdown_content(grid: &Grid, merges: &[Area]) -> String {
    let mut out = String::from("# Report\n\n");

    let Some(bounds) = grid_bounds(grid) else {
        out.push_str("*Empty report*\n");
        return out;
    };

    // Writing into a String cannot fail.
    let _ = write_table(&mut out, grid, &bounds);

    if !merges.is_empty() {
        out.push_str("\nMerged regions:\n\n");
        for merge in merges {
            let _ = writeln!(out, "- {}", merge);
        }
    }
    out
}

fn write_table(out: &mut String, grid: &Grid, bounds: &Area) -> std::fmt::Result {
    write!(out, "|   |")?;
    for col in bounds.left..=bounds.right {
        write!(out, " {} |", CellRef::col_to_letters(col))?;
    }
    writeln!(out)?;

    write!(out, "|---|")?;
    for _ in bounds.left..=bounds.right {
        write!(out, "---|")?;
    }
    writeln!(out)?;

    for row in bounds.top..=bounds.bottom {
        write!(out, "| {} |", row + 1)?;
        for col in bounds.left..=bounds.right {
            let display = grid
                .get(&CellRef::new(col, row))
                .map(|cell| format_cell(&cell))
                .unwrap_or_default();
            write!(out, " {} |", escape_markdown(&display))?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Smallest area holding every populated cell
fn grid_bounds(grid: &Grid) -> Option<Area> {
    let mut bounds: Option<Area> = None;
    for entry in grid.iter() {
        let at = entry.key();
        bounds = Some(match bounds {
            None => Area::cell(at),
            Some(b) => Area::new(
                b.top.min(at.row),
                b.left.min(at.col),
                b.bottom.max(at.row),
                b.right.max(at.col),
            ),
        });
    }
    bounds
}

fn escape_markdown(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ").replace('\r', "")
}
