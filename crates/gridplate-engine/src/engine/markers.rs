//! Structural markers attached to template cells.
//!
//! A marker is written as `name(attr="value" attr2='value')` and anchored at a
//! cell. The anchor is the top-left corner of the marker's area and
//! `lastCell` is its bottom-right corner.

use super::area::{Area, Direction};
use super::cell_ref::CellRef;

/// Parameters of a repeat-over-collection marker.
#[derive(Clone, Debug, PartialEq)]
pub struct EachSpec {
    pub items: String,
    pub var: String,
    pub var_index: String,
    pub direction: Direction,
    pub select: Option<String>,
    /// One expression per group level this iteration contributes.
    pub group_key: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MarkerKind {
    /// Declares the root area of the template.
    Area,
    Each(EachSpec),
    If { condition: String },
    Merge,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Marker {
    pub anchor: CellRef,
    pub area: Area,
    pub kind: MarkerKind,
}

impl Marker {
    /// Parse marker text anchored at `anchor`.
    pub fn parse(anchor: &CellRef, text: &str) -> Result<Marker, String> {
        let text = text.trim();
        let open = text
            .find('(')
            .ok_or_else(|| format!("expected `name(...)`, got `{}`", text))?;
        if !text.ends_with(')') {
            return Err(format!("unterminated marker `{}`", text));
        }
        let name = text[..open].trim();
        let attrs = parse_attributes(&text[open + 1..text.len() - 1])?;
        let mut attrs = Attributes { name, attrs };

        let area = match attrs.take("lastCell") {
            Some(last) => {
                let last = CellRef::from_str(last.trim())
                    .ok_or_else(|| format!("invalid lastCell `{}`", last))?;
                if last.row < anchor.row || last.col < anchor.col {
                    return Err(format!("lastCell {} is above or left of {}", last, anchor));
                }
                Area::from_corners(anchor, &last)
            }
            None => Area::cell(anchor),
        };

        let kind = match name {
            "jx:area" => MarkerKind::Area,
            "merge" => MarkerKind::Merge,
            "jx:if" => MarkerKind::If {
                condition: attrs.require("condition")?,
            },
            "jx:each" => {
                let items = attrs.require("items")?;
                let var = attrs.require("var")?;
                if !is_identifier(&var) {
                    return Err(format!("var `{}` is not an identifier", var));
                }
                let var_index = attrs
                    .take("varIndex")
                    .unwrap_or_else(|| format!("{}_index", var));
                if !is_identifier(&var_index) {
                    return Err(format!("varIndex `{}` is not an identifier", var_index));
                }
                let direction = match attrs.take("direction") {
                    Some(d) => Direction::parse(&d)
                        .ok_or_else(|| format!("unknown direction `{}`", d))?,
                    None => Direction::Down,
                };
                let select = attrs.take("select");
                let group_key = match attrs.take("groupKey") {
                    Some(keys) => split_top_level(&keys)
                        .into_iter()
                        .filter(|k| !k.is_empty())
                        .collect(),
                    None => Vec::new(),
                };
                MarkerKind::Each(EachSpec {
                    items,
                    var,
                    var_index,
                    direction,
                    select,
                    group_key,
                })
            }
            other => return Err(format!("unknown command `{}`", other)),
        };

        attrs.finish()?;
        Ok(Marker {
            anchor: anchor.clone(),
            area,
            kind,
        })
    }

    pub fn is_structural(&self) -> bool {
        matches!(self.kind, MarkerKind::Each(_) | MarkerKind::If { .. })
    }
}

struct Attributes<'a> {
    name: &'a str,
    attrs: Vec<(String, String)>,
}

impl Attributes<'_> {
    fn take(&mut self, key: &str) -> Option<String> {
        let idx = self.attrs.iter().position(|(k, _)| k == key)?;
        Some(self.attrs.remove(idx).1)
    }

    fn require(&mut self, key: &str) -> Result<String, String> {
        self.take(key)
            .ok_or_else(|| format!("{} requires attribute `{}`", self.name, key))
    }

    fn finish(self) -> Result<(), String> {
        match self.attrs.first() {
            Some((key, _)) => Err(format!("{} does not accept attribute `{}`", self.name, key)),
            None => Ok(()),
        }
    }
}

/// Parse `key="value" key2='value'` pairs. Values honour backslash escapes.
fn parse_attributes(body: &str) -> Result<Vec<(String, String)>, String> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut chars = body.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| c.is_alphanumeric() || *c == '_') {
            key.push(c);
        }
        if key.is_empty() {
            return Err(format!("expected attribute name in `{}`", body));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some('=') {
            return Err(format!("expected `=` after `{}`", key));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let quote = match chars.next() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(format!("value of `{}` must be quoted", key)),
        };

        let mut value = String::new();
        let mut closed = false;
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some(escaped) => value.push(escaped),
                    None => break,
                }
            } else if c == quote {
                closed = true;
                break;
            } else {
                value.push(c);
            }
        }
        if !closed {
            return Err(format!("unterminated value for `{}`", key));
        }
        if attrs.iter().any(|(k, _)| *k == key) {
            return Err(format!("duplicate attribute `{}`", key));
        }
        attrs.push((key, value));
    }
    Ok(attrs)
}

/// Split on commas that are not nested in brackets or string literals.
pub fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in text.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    parts.push(current.trim().to_string());
    parts
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
