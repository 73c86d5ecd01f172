//! In-memory tabular content and its canonical text encoding.

use std::collections::{BTreeSet, HashMap};

use crate::errors::{LineageError, Result};
use crate::hasher::digest::{ColumnOrder, HashingOptions, RowOrder};

/// A header plus rows of string cells, all rows as wide as the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Build a table, rejecting rows whose width differs from the header
    ///
    /// # Errors
    ///
    /// `EmptyTable` when there are no columns, `RaggedRow` on a width mismatch
    /// (rows are numbered from 1).
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        if columns.is_empty() {
            return Err(LineageError::EmptyTable);
        }
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(LineageError::RaggedRow {
                row: idx + 1,
                expected: columns.len(),
                found: row.len(),
            });
        }
        Ok(Self { columns, rows })
    }

    /// Parse delimited text (comma separated, RFC-4180 quoting)
    ///
    /// CRLF, CR and LF line endings are all accepted; line breaks inside
    /// quoted fields are normalised to LF. Blank lines are skipped and a
    /// leading UTF-8 byte-order mark is ignored. The first record is the
    /// header.
    ///
    /// # Errors
    ///
    /// `InvalidEncoding`, `UnterminatedQuote`, `EmptyTable` or `RaggedRow`.
    pub fn parse_csv(raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw).map_err(|_| LineageError::InvalidEncoding)?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut records: Vec<Vec<String>> = Vec::new();
        let mut record: Vec<String> = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut field_quoted = false;
        let mut touched = false;
        let mut line = 1usize;
        let mut quote_line = 1usize;

        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if in_quotes {
                match c {
                    '"' if chars.peek() == Some(&'"') => {
                        chars.next();
                        field.push('"');
                    }
                    '"' => in_quotes = false,
                    '\r' => {
                        if chars.peek() == Some(&'\n') {
                            chars.next();
                        }
                        line += 1;
                        field.push('\n');
                    }
                    '\n' => {
                        line += 1;
                        field.push('\n');
                    }
                    other => field.push(other),
                }
                continue;
            }

            match c {
                '"' if field.is_empty() && !field_quoted => {
                    in_quotes = true;
                    field_quoted = true;
                    quote_line = line;
                    touched = true;
                }
                ',' => {
                    record.push(std::mem::take(&mut field));
                    field_quoted = false;
                    touched = true;
                }
                '\r' | '\n' => {
                    if c == '\r' && chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    line += 1;
                    if touched {
                        record.push(std::mem::take(&mut field));
                        records.push(std::mem::take(&mut record));
                    }
                    field_quoted = false;
                    touched = false;
                }
                other => {
                    field.push(other);
                    touched = true;
                }
            }
        }

        if in_quotes {
            return Err(LineageError::UnterminatedQuote { line: quote_line });
        }
        if touched {
            record.push(field);
            records.push(record);
        }

        let mut records = records.into_iter();
        let columns = records.next().ok_or(LineageError::EmptyTable)?;
        Self::new(columns, records.collect())
    }

    /// Build a table from unordered records
    ///
    /// Columns are the union of all keys in lexicographic order; a record
    /// missing a key gets an empty cell. The result does not depend on the
    /// maps' iteration order.
    ///
    /// # Errors
    ///
    /// `EmptyTable` when no record has any key.
    pub fn from_records(records: &[HashMap<String, String>]) -> Result<Self> {
        let columns: Vec<String> = records
            .iter()
            .flat_map(|r| r.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let rows = records
            .iter()
            .map(|r| {
                columns
                    .iter()
                    .map(|c| r.get(c).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();

        Self::new(columns, rows)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Reorder columns and rows according to the hashing options
    pub fn canonicalize(&self, options: &HashingOptions) -> Table {
        let mut order: Vec<usize> = (0..self.columns.len()).collect();
        if options.column_order == ColumnOrder::Lexicographic {
            // stable: duplicate names keep their relative order
            order.sort_by(|a, b| self.columns[*a].cmp(&self.columns[*b]));
        }

        let columns = order.iter().map(|i| self.columns[*i].clone()).collect();
        let mut rows: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| order.iter().map(|i| row[*i].clone()).collect())
            .collect();

        if options.row_order == RowOrder::Sorted {
            rows.sort();
        }

        Table { columns, rows }
    }

    /// Encode as comma-separated text with LF line endings and a trailing newline
    pub fn to_csv(&self) -> Vec<u8> {
        let single_column = self.columns.len() == 1;
        let mut out = String::new();
        for record in std::iter::once(&self.columns).chain(self.rows.iter()) {
            for (idx, cell) in record.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                // a lone empty cell would otherwise read back as a blank line
                if needs_quoting(cell) || (single_column && cell.is_empty()) {
                    out.push('"');
                    out.push_str(&cell.replace('"', "\"\""));
                    out.push('"');
                } else {
                    out.push_str(cell);
                }
            }
            out.push('\n');
        }
        out.into_bytes()
    }
}

fn needs_quoting(cell: &str) -> bool {
    cell.contains([',', '"', '\r', '\n'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_simple() {
        let table = Table::parse_csv(b"a,b\n1,2\n3,4\n").unwrap();
        assert_eq!(table.columns, strings(&["a", "b"]));
        assert_eq!(table.rows, vec![strings(&["1", "2"]), strings(&["3", "4"])]);
    }

    #[test]
    fn test_parse_line_endings_and_blank_lines() {
        let crlf = Table::parse_csv(b"a,b\r\n1,2\r\n\r\n3,4").unwrap();
        let cr = Table::parse_csv(b"a,b\r1,2\r3,4\r").unwrap();
        let lf = Table::parse_csv(b"a,b\n1,2\n3,4\n").unwrap();
        assert_eq!(crlf, lf);
        assert_eq!(cr, lf);
    }

    #[test]
    fn test_parse_quoted_fields() {
        let raw = b"name,note\n\"Smith, J\",\"said \"\"hi\"\"\"\nx,\"two\r\nlines\"\n";
        let table = Table::parse_csv(raw).unwrap();
        assert_eq!(table.rows[0], strings(&["Smith, J", "said \"hi\""]));
        assert_eq!(table.rows[1], strings(&["x", "two\nlines"]));
    }

    #[test]
    fn test_parse_keeps_empty_cells() {
        let table = Table::parse_csv(b"a,b,c\n,,\n1,,3\n").unwrap();
        assert_eq!(table.rows[0], strings(&["", "", ""]));
        assert_eq!(table.rows[1], strings(&["1", "", "3"]));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Table::parse_csv(b"a,b\n1,2,3\n"),
            Err(LineageError::RaggedRow {
                row: 1,
                expected: 2,
                found: 3
            })
        );
        assert_eq!(
            Table::parse_csv(b"a\n\"open\n"),
            Err(LineageError::UnterminatedQuote { line: 2 })
        );
        assert_eq!(Table::parse_csv(b"\n\n"), Err(LineageError::EmptyTable));
        assert_eq!(
            Table::parse_csv(&[0xff, 0xfe]),
            Err(LineageError::InvalidEncoding)
        );
    }

    #[test]
    fn test_parse_strips_bom() {
        let table = Table::parse_csv("\u{feff}a\n1\n".as_bytes()).unwrap();
        assert_eq!(table.columns, strings(&["a"]));
    }

    #[test]
    fn test_to_csv_quotes_only_when_needed() {
        let table = Table::new(
            strings(&["id", "text"]),
            vec![strings(&["1", "plain"]), strings(&["2", "a,\"b\""])],
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(table.to_csv()).unwrap(),
            "id,text\n1,plain\n2,\"a,\"\"b\"\"\"\n"
        );
    }

    #[test]
    fn test_single_column_empty_cell_survives_reparse() {
        let table = Table::new(strings(&["a"]), vec![strings(&[""]), strings(&["x"])]).unwrap();
        let bytes = table.to_csv();
        assert_eq!(bytes, b"a\n\"\"\nx\n");
        assert_eq!(Table::parse_csv(&bytes).unwrap(), table);
    }

    #[test]
    fn test_from_records_unions_and_fills_missing() {
        let mut r1 = HashMap::new();
        r1.insert("b".to_string(), "2".to_string());
        r1.insert("a".to_string(), "1".to_string());
        let mut r2 = HashMap::new();
        r2.insert("c".to_string(), "3".to_string());

        let table = Table::from_records(&[r1, r2]).unwrap();
        assert_eq!(table.columns, strings(&["a", "b", "c"]));
        assert_eq!(table.rows[0], strings(&["1", "2", ""]));
        assert_eq!(table.rows[1], strings(&["", "", "3"]));
    }

    #[test]
    fn test_canonicalize_orders() {
        let table = Table::new(
            strings(&["b", "a"]),
            vec![strings(&["2", "z"]), strings(&["1", "y"])],
        )
        .unwrap();

        let preserved = table.canonicalize(&HashingOptions::default());
        assert_eq!(preserved, table);

        let sorted = table.canonicalize(&HashingOptions {
            row_order: RowOrder::Sorted,
            column_order: ColumnOrder::Lexicographic,
        });
        assert_eq!(sorted.columns, strings(&["a", "b"]));
        assert_eq!(sorted.rows, vec![strings(&["y", "1"]), strings(&["z", "2"])]);
    }
}
