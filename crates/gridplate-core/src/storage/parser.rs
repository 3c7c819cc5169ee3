//! Parser for the .grt template format
//!
//! A template is a .grd cell listing plus marker lines:
//!
//! ```text
//! # comment
//! !A2: jx:each(items="groups" var="g" lastCell="E9")
//! A2: "${g.key}"
//! D9: =SUM(D3)
//! ```

use crate::error::{GridplateError, Result};
use crate::report::Template;
use gridplate_engine::ReportError;
use gridplate_engine::engine::{Cell, CellRef, Grid, Marker};
use std::fs;
use std::path::Path;

/// Parse a .grt file into a template
pub fn parse_template(path: &Path) -> Result<Template> {
    let content = fs::read_to_string(path)?;
    parse_template_content(&content)
}

/// Parse .grt content from a string
pub fn parse_template_content(content: &str) -> Result<Template> {
    let cells = Grid::new();
    let mut markers = Vec::new();

    for (line_num, line) in content.lines().enumerate() {
        let line_num = line_num + 1;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(marker_line) = line.strip_prefix('!') {
            markers.push(parse_marker_line(marker_line, line_num)?);
            continue;
        }

        let Some((cell_ref_str, value_str)) = line.split_once(':') else {
            return Err(GridplateError::Parse {
                line: line_num,
                message: "Expected 'CELLREF: VALUE' format".to_string(),
            });
        };

        let cell_ref_str = cell_ref_str.trim();
        let cell_ref = CellRef::from_str(cell_ref_str).ok_or_else(|| GridplateError::Parse {
            line: line_num,
            message: format!("Invalid cell reference: {}", cell_ref_str),
        })?;

        let cell = parse_cell_value(value_str, line_num)?;
        if !cell.is_empty() {
            cells.insert(cell_ref, cell);
        }
    }

    tracing::debug!(cells = cells.len(), markers = markers.len(), "parsed template");
    Ok(Template { cells, markers })
}

/// `A2: jx:each(...)` with the leading '!' already stripped.
fn parse_marker_line(line: &str, line_num: usize) -> Result<Marker> {
    let Some((anchor_str, marker)) = line.split_once(':') else {
        return Err(GridplateError::Parse {
            line: line_num,
            message: "Expected '!CELLREF: marker(...)' format".to_string(),
        });
    };
    let anchor_str = anchor_str.trim();
    let syntax = |message: String| ReportError::TemplateSyntax {
        area: anchor_str.to_string(),
        message: format!("line {}: {}", line_num, message),
    };

    let anchor = CellRef::from_str(anchor_str)
        .ok_or_else(|| syntax(format!("invalid cell reference `{}`", anchor_str)))?;
    let marker = Marker::parse(&anchor, marker).map_err(syntax)?;
    Ok(marker)
}

/// Parse a cell value string into a Cell
fn parse_cell_value(value: &str, line_num: usize) -> Result<Cell> {
    let value = value.trim();

    if value.is_empty() {
        return Ok(Cell::new_empty());
    }

    if let Some(formula) = value.strip_prefix('=') {
        return Ok(Cell::new_formula(formula.trim()));
    }

    if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        let text = &value[1..value.len() - 1];
        return Ok(Cell::new_text(&unescape_grd_text(text)));
    }

    match value {
        "TRUE" => return Ok(Cell::new_bool(true)),
        "FALSE" => return Ok(Cell::new_bool(false)),
        _ => {}
    }

    if let Ok(n) = value.parse::<f64>() {
        return Ok(Cell::new_number(n));
    }

    Err(GridplateError::Parse {
        line: line_num,
        message: format!("Invalid value: {}. Use quotes for text.", value),
    })
}

fn unescape_grd_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('n') => out.push('\n'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridplate_engine::engine::{Area, CellType, MarkerKind};

    fn cell(template: &Template, a1: &str) -> CellType {
        let at = CellRef::from_str(a1).unwrap();
        template.cells.get(&at).unwrap().contents.clone()
    }

    #[test]
    fn test_parse_values() {
        let content = r#"
A1: 42
B1: "Hello ${name}"
C1: =SUM(A1)
D1: TRUE
"#;
        let template = parse_template_content(content).unwrap();
        assert_eq!(cell(&template, "A1"), CellType::Number(42.0));
        assert_eq!(cell(&template, "B1"), CellType::Text("Hello ${name}".into()));
        assert_eq!(cell(&template, "C1"), CellType::Formula("SUM(A1)".into()));
        assert_eq!(cell(&template, "D1"), CellType::Bool(true));
    }

    #[test]
    fn test_parse_text_escapes() {
        let template = parse_template_content(r#"A1: "He said \"hi\"\nbye""#).unwrap();
        match cell(&template, "A1") {
            CellType::Text(s) => assert_eq!(s, "He said \"hi\"\nbye"),
            other => panic!("Expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_markers() {
        let content = r#"
# Holdings report
!A1: jx:area(lastCell="E9")
!A2: jx:each(items="groups" var="g" lastCell="E8" groupKey="g.key")
!A4: jx:if(condition='g.key != "Bonds"' lastCell="E4")
!A9: merge(lastCell="C9")
A2: "${g.key}"
"#;
        let template = parse_template_content(content).unwrap();
        assert_eq!(template.markers.len(), 4);
        assert_eq!(template.markers[0].kind, MarkerKind::Area);
        assert_eq!(template.markers[1].area, Area::parse("A2:E8").unwrap());
        match &template.markers[2].kind {
            MarkerKind::If { condition } => assert_eq!(condition, r#"g.key != "Bonds""#),
            other => panic!("Expected if, got {:?}", other),
        }
        assert_eq!(template.markers[3].kind, MarkerKind::Merge);
        assert_eq!(template.cells.len(), 1);
    }

    #[test]
    fn test_marker_errors_name_the_anchor() {
        let content = "A1: 1\n!B2: jx:each(items=\"xs\")\n";
        match parse_template_content(content) {
            Err(GridplateError::Report(ReportError::TemplateSyntax { area, message })) => {
                assert_eq!(area, "B2");
                assert!(message.starts_with("line 2:"), "{}", message);
            }
            other => panic!("Expected syntax error, got {:?}", other.map(|t| t.markers)),
        }

        assert!(matches!(
            parse_template_content("!ZZ: jx:if(condition=\"true\")"),
            Err(GridplateError::Report(ReportError::TemplateSyntax { .. }))
        ));
    }

    #[test]
    fn test_cell_errors_carry_line_numbers() {
        match parse_template_content("A1: 1\n\nB1: hello") {
            Err(GridplateError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("Expected parse error, got {:?}", other.map(|t| t.markers)),
        }
        assert!(matches!(
            parse_template_content("no colon here"),
            Err(GridplateError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            parse_template_content("1A: 2"),
            Err(GridplateError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_skip_comments_and_empty_values() {
        let content = r#"
# This is a comment
A1: 42

B1:
"#;
        let template = parse_template_content(content).unwrap();
        assert_eq!(template.cells.len(), 1);
        assert!(template.markers.is_empty());
    }
}
