//! Plain-text tables for terminal output. Numeric columns are right-aligned.

use std::fmt::Write as _;

#[derive(Debug, Clone, Default)]
pub struct TextTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TextTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let widths = self.widths();
        let numeric = (0..self.headers.len())
            .map(|idx| {
                !self.rows.is_empty()
                    && self.rows.iter().all(|row| {
                        row.get(idx)
                            .is_none_or(|cell| cell.is_empty() || cell.parse::<f64>().is_ok())
                    })
            })
            .collect::<Vec<_>>();

        let mut output = String::new();
        let _ = writeln!(output, "{}", format_line(&self.headers, &widths, &numeric));
        let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
        let _ = writeln!(output, "{}", format_line(&rule, &widths, &numeric));
        for row in &self.rows {
            let _ = writeln!(output, "{}", format_line(row, &widths, &numeric));
        }
        output
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths = self
            .headers
            .iter()
            .map(|h| h.chars().count().max(3))
            .collect::<Vec<_>>();
        for row in &self.rows {
            for (idx, cell) in row.iter().enumerate().take(widths.len()) {
                widths[idx] = widths[idx].max(sanitize(cell).chars().count());
            }
        }
        widths
    }
}

fn format_line(cells: &[String], widths: &[usize], numeric: &[bool]) -> String {
    let line = widths
        .iter()
        .enumerate()
        .map(|(idx, width)| {
            let cell = cells.get(idx).map(|c| sanitize(c)).unwrap_or_default();
            if numeric.get(idx).copied().unwrap_or(false) {
                format!("{cell:>width$}")
            } else {
                format!("{cell:<width$}")
            }
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn sanitize(value: &str) -> String {
    value.replace(['\n', '\r', '\t'], " ")
}
