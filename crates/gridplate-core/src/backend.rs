//! Output backends selected by name.

use crate::error::{GridplateError, Result};
use crate::storage::{write_csv_content, write_grd_content, write_markdown_content};
use gridplate_engine::engine::MemorySink;

/// Environment variable naming the default backend.
pub const BACKEND_ENV: &str = "GRIDPLATE_BACKEND";

/// Backend used when nothing else names one.
pub const DEFAULT_BACKEND: &str = "grd";

/// Names accepted by [`create_backend`], aliases included.
pub const KNOWN_BACKENDS: &[&str] = &["grd", "md", "markdown", "csv"];

/// Renders a finished report.
pub trait Backend {
    fn name(&self) -> &'static str;

    /// File extension for written output, without the dot.
    fn extension(&self) -> &'static str;

    fn render(&self, output: &MemorySink) -> String;
}

struct GrdBackend;
struct MarkdownBackend;
struct CsvBackend;

impl Backend for GrdBackend {
    fn name(&self) -> &'static str {
        "grd"
    }

    fn extension(&self) -> &'static str {
        "grd"
    }

    fn render(&self, output: &MemorySink) -> String {
        write_grd_content(output.grid(), &output.merges())
    }
}

impl Backend for MarkdownBackend {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn extension(&self) -> &'static str {
        "md"
    }

    fn render(&self, output: &MemorySink) -> String {
        write_markdown_content(output.grid(), &output.merges())
    }
}

impl Backend for CsvBackend {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn extension(&self) -> &'static str {
        "csv"
    }

    fn render(&self, output: &MemorySink) -> String {
        write_csv_content(output.grid())
    }
}

/// Create a backend by case-insensitive name.
pub fn create_backend(name: &str) -> Result<Box<dyn Backend>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "grd" => Ok(Box::new(GrdBackend)),
        "md" | "markdown" => Ok(Box::new(MarkdownBackend)),
        "csv" => Ok(Box::new(CsvBackend)),
        _ => Err(GridplateError::UnknownBackend {
            name: name.to_string(),
            known: KNOWN_BACKENDS.to_vec(),
        }),
    }
}

/// First backend name set: command line, then environment, then config file.
pub fn choose_backend_name<'a>(
    cli: Option<&'a str>,
    env: Option<&'a str>,
    config: Option<&'a str>,
) -> &'a str {
    [cli, env, config]
        .into_iter()
        .flatten()
        .find(|name| !name.trim().is_empty())
        .unwrap_or(DEFAULT_BACKEND)
}
