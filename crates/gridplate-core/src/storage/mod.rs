//! Storage module for the .grt template format and grd/CSV/Markdown output

mod csv;
mod md;
mod parser;
mod writer;

pub use csv::write_csv_content;
pub use md::write_markdown_content;
pub use parser::{parse_template, parse_template_content};
pub use writer::write_grd_content;
