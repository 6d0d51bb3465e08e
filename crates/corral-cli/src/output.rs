//! Formatted output helpers for CLI commands.
//!
//! Tables are left-aligned, one space-padded column per header, sized to
//! the widest cell.

use std::fmt;

const COLUMN_GAP: usize = 3;

/// A plain-text table.
#[derive(Debug, Clone)]
pub struct Table<const N: usize> {
    headers: [&'static str; N],
    rows: Vec<[String; N]>,
}

impl<const N: usize> Table<N> {
    /// Creates an empty table with the given column headers.
    #[must_use]
    pub const fn new(headers: [&'static str; N]) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Appends a row.
    pub fn row(&mut self, cells: [String; N]) {
        self.rows.push(cells);
    }

    fn widths(&self) -> [usize; N] {
        let mut widths = self.headers.map(|h| h.chars().count());
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }
        widths
    }
}

impl<const N: usize> fmt::Display for Table<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths = self.widths();
        let mut line = |cells: &mut dyn Iterator<Item = &str>| -> fmt::Result {
            let mut out = String::new();
            for (i, (cell, width)) in cells.zip(widths).enumerate() {
                if i + 1 == N {
                    out.push_str(cell);
                } else {
                    out.push_str(&format!("{cell:<pad$}", pad = width + COLUMN_GAP));
                }
            }
            writeln!(f, "{}", out.trim_end())
        };
        line(&mut self.headers.iter().copied())?;
        for row in &self.rows {
            line(&mut row.iter().map(String::as_str))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_sized_to_widest_cell() {
        let mut table = Table::new(["NAME", "DRIVER"]);
        table.row(["testbridge".into(), "bridge".into()]);
        table.row(["br0".into(), "bridge".into()]);
        let rendered = table.to_string();
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines[0], "NAME         DRIVER");
        assert_eq!(lines[1], "testbridge   bridge");
        assert_eq!(lines[2], "br0          bridge");
    }

    #[test]
    fn empty_table_prints_headers_only() {
        let table = Table::new(["ID", "NAME"]);
        assert_eq!(table.to_string(), "ID   NAME\n");
    }

    #[test]
    fn trailing_padding_is_trimmed() {
        let mut table = Table::new(["A", "B"]);
        table.row(["long value".into(), String::new()]);
        assert!(table.to_string().lines().all(|l| !l.ends_with(' ')));
    }
}
