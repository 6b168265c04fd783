use std::path::Path;

pub fn simplify_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

pub fn format_percentage(p: f64) -> String {
    format!("{:.2}", p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names() {
        assert_eq!(simplify_file_name("/tmp/data/board.json"), "board.json");
        assert_eq!(simplify_file_name("board.json"), "board.json");
    }

    #[test]
    fn percentages() {
        assert_eq!(format_percentage(200.0 / 3.0), "66.67");
        assert_eq!(format_percentage(0.0), "0.00");
        assert_eq!(format_percentage(100.0), "100.00");
    }
}
