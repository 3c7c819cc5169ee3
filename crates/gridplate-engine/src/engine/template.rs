//! Cell templates: literal content with `${expr}` placeholders.
//!
//! A text cell that is exactly one placeholder evaluates to the raw value, so
//! `"${e.amount}"` stays a number. Text mixing literals and placeholders is
//! interpolated into a string.

use super::cell::{Cell, CellType};

#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    Literal(String),
    Expr(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum CellTemplate {
    /// Copied to the output unchanged.
    Static(Cell),
    /// A single `${expr}` covering the whole cell.
    Expr(String),
    Interpolated(Vec<Segment>),
}

impl CellTemplate {
    /// Parse a template cell. Only text cells can carry placeholders.
    pub fn parse(cell: &Cell) -> Result<CellTemplate, String> {
        let CellType::Text(text) = &cell.contents else {
            return Ok(CellTemplate::Static(cell.clone()));
        };

        let segments = split_placeholders(text)?;
        match segments.as_slice() {
            [] => Ok(CellTemplate::Static(cell.clone())),
            [Segment::Literal(_)] => Ok(CellTemplate::Static(cell.clone())),
            [Segment::Expr(expr)] => Ok(CellTemplate::Expr(expr.clone())),
            _ => Ok(CellTemplate::Interpolated(segments)),
        }
    }
}

/// Split text into literal and `${...}` segments.
///
/// Braces nest (Rhai object maps use `#{...}`) and braces inside string
/// literals are ignored.
pub fn split_placeholders(text: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        literal.push_str(&rest[..start]);
        let body = &rest[start + 2..];
        let end = matching_brace(body)
            .ok_or_else(|| format!("unterminated placeholder in \"{}\"", text))?;
        let expr = body[..end].trim();
        if expr.is_empty() {
            return Err(format!("empty placeholder in \"{}\"", text));
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Expr(expr.to_string()));
        rest = &body[end + 1..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Byte offset of the `}` closing a placeholder body.
fn matching_brace(body: &str) -> Option<usize> {
    let mut depth = 1usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
