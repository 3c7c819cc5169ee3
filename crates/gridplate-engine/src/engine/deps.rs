//! Reference extraction from formula text.
//!
//! Finds every cell reference (`D5`) and range reference (`D5:D9`) in a
//! formula, with its byte span so it can be replaced in place.
//!
//! Handles:
//! - absolute markers (`$D$5`, `D$5`, `$D5`) are accepted and remembered
//! - references inside string literals are ignored
//! - function names that look like references (`LOG10(`) are ignored
//! - sheet-qualified references (`Other!A1`) are left alone

use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

use super::area::Area;

/// A reference found in formula text.
#[derive(Clone, Debug, PartialEq)]
pub struct FormulaRef {
    /// Byte span of the reference in the formula.
    pub span: Range<usize>,
    pub area: Area,
    /// `$` before the column letters of the first cell.
    pub col_absolute: bool,
    /// `$` before the row digits of the first cell.
    pub row_absolute: bool,
}

impl FormulaRef {
    pub fn text<'a>(&self, formula: &'a str) -> &'a str {
        &formula[self.span.clone()]
    }

    /// Apply this reference's `$` markers to every cell of `refs`
    /// (text such as `D5:D7,D9`).
    pub fn anchored(&self, refs: &str) -> String {
        if !self.col_absolute && !self.row_absolute {
            return refs.to_string();
        }
        let mut out = String::with_capacity(refs.len() * 2);
        let mut prev_alpha = false;
        for ch in refs.chars() {
            if ch.is_ascii_alphabetic() && !prev_alpha && self.col_absolute {
                out.push('$');
            }
            if ch.is_ascii_digit() && prev_alpha && self.row_absolute {
                out.push('$');
            }
            prev_alpha = ch.is_ascii_alphabetic();
            out.push(ch);
        }
        out
    }
}

/// Scan a formula for cell and range references, in order of appearance.
pub fn scan_references(formula: &str) -> Vec<FormulaRef> {
    let masked = mask_string_literals(formula);
    let bytes = masked.as_bytes();
    let mut refs = Vec::new();

    for m in reference_re().find_iter(&masked) {
        let next = bytes[m.end()..].iter().find(|b| !b.is_ascii_whitespace());
        if matches!(next, Some(b'(') | Some(b'!')) {
            continue;
        }
        if m.start() > 0 {
            let prev = bytes[m.start() - 1];
            if matches!(prev, b'!' | b'.' | b'@' | b'$' | b'_') || prev.is_ascii_alphanumeric() {
                continue;
            }
        }
        let text = m.as_str();
        if let Some(area) = Area::parse(&text.replace('$', "")) {
            let first = text.split(':').next().unwrap_or(text);
            refs.push(FormulaRef {
                span: m.range(),
                area,
                col_absolute: first.starts_with('$'),
                row_absolute: first.trim_start_matches('$').contains('$'),
            });
        }
    }
    refs
}

fn reference_re() -> &'static Regex {
    static REF_RE: OnceLock<Regex> = OnceLock::new();
    REF_RE.get_or_init(|| {
        Regex::new(r"\$?[A-Za-z]{1,3}\$?[0-9]+(?::\$?[A-Za-z]{1,3}\$?[0-9]+)?\b")
            .expect("formula reference regex must compile")
    })
}

/// Blank out string literal contents, keeping byte offsets intact.
fn mask_string_literals(formula: &str) -> String {
    let mut out = String::with_capacity(formula.len());
    let mut in_string = false;
    let mut escaped = false;

    for ch in formula.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
                out.push('"');
                continue;
            }
            out.extend(std::iter::repeat_n(' ', ch.len_utf8()));
        } else {
            if ch == '"' {
                in_string = true;
            }
            out.push(ch);
        }
    }
    out
}
