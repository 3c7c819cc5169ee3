use rhai::Dynamic;

use super::cell::{Cell, CellType};

/// Format a Dynamic value for display inside interpolated text.
pub fn format_dynamic(value: &Dynamic) -> String {
    let value = value.clone().flatten();
    if value.is_unit() {
        String::new()
    } else if let Ok(n) = value.as_float() {
        format_number(n)
    } else if let Ok(n) = value.as_int() {
        n.to_string()
    } else if let Ok(b) = value.as_bool() {
        if b { "TRUE" } else { "FALSE" }.to_string()
    } else if let Ok(s) = value.clone().into_string() {
        s
    } else {
        value.to_string()
    }
}

/// Format a number for display.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "#NAN!".to_string()
    } else if n.is_infinite() {
        "#INF!".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e10 {
        format!("{:.0}", n)
    } else {
        format!("{:.2}", n)
    }
}

/// Display string for an output cell.
pub fn format_cell(cell: &Cell) -> String {
    match &cell.contents {
        CellType::Empty => String::new(),
        CellType::Text(s) => s.clone(),
        CellType::Number(n) => format_number(*n),
        CellType::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        CellType::Formula(f) => format!("={}", f),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1000.0), "1000");
        assert_eq!(format_number(2423.31), "2423.31");
        assert_eq!(format_number(f64::NAN), "#NAN!");
    }

    #[test]
    fn test_format_dynamic() {
        assert_eq!(format_dynamic(&Dynamic::UNIT), "");
        assert_eq!(format_dynamic(&Dynamic::from(7_i64)), "7");
        assert_eq!(format_dynamic(&Dynamic::from(false)), "FALSE");
        assert_eq!(format_dynamic(&Dynamic::from("Bonds".to_string())), "Bonds");
    }
}
