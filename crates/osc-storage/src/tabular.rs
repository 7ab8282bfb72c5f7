//! Delimited text tables: decoding, a quote-aware row parser and row writer.

use std::io::{self, Write};
use std::mem::take;
use std::path::Path;

use anyhow::{anyhow, Context};
use encoding_rs::Encoding;

/// BOM as it appears after UTF-8 bytes were decoded as Latin-1.
const MISDECODED_BOM: &str = "\u{ef}\u{bb}\u{bf}";

/// Decodes `bytes` with the encoding named by `label` (any WHATWG label: `latin1`, `utf-8`,
/// `windows-1252`, ...). The declared encoding always wins; a BOM of another encoding stays
/// in the text for [`strip_bom`] to handle.
pub fn decode_bytes(bytes: &[u8], label: &str) -> anyhow::Result<String> {
    let encoding = Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| anyhow!("unsupported text encoding label {label:?}"))?;
    let (decoded, had_errors) = encoding.decode_with_bom_removal(bytes);
    if had_errors {
        tracing::warn!(encoding = encoding.name(), "input contained undecodable bytes");
    }
    Ok(decoded.into_owned())
}

/// Strips a leading BOM, whether it survived decoding or was mis-decoded into `ï»¿`.
pub fn strip_bom(cell: &str) -> &str {
    let cell = cell.strip_prefix('\u{feff}').unwrap_or(cell);
    cell.strip_prefix(MISDECODED_BOM).unwrap_or(cell)
}

/// Quote-aware delimited parser, tolerant of CRLF and blank lines.
pub fn parse_rows(text: &str, sep: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut field = String::new();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    if matches!(chars.peek(), Some('"')) {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            c if c == sep && !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && matches!(chars.peek(), Some('\n')) {
                    chars.next();
                }
                row.push(take(&mut field));
                push_row(&mut rows, take(&mut row));
            }
            _ => field.push(ch),
        }
    }

    // trailing row without a final newline, even with an unterminated quote
    row.push(field);
    push_row(&mut rows, row);

    rows
}

fn push_row(rows: &mut Vec<Vec<String>>, row: Vec<String>) {
    if !(row.len() == 1 && row[0].is_empty()) {
        rows.push(row);
    }
}

fn needs_quotes(field: &str, sep: char) -> bool {
    field.contains(sep) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Writes one row, quoting cells that contain the separator, quotes or line breaks.
pub fn write_row<W: Write>(mut w: W, row: &[String], sep: char) -> io::Result<()> {
    for (idx, cell) in row.iter().enumerate() {
        if idx > 0 {
            write!(w, "{sep}")?;
        }
        if needs_quotes(cell, sep) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{cell}")?;
        }
    }
    writeln!(w)
}

/// Header row plus data rows of one delimited file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Splits parsed rows into header and body. The first header loses any BOM.
    pub fn from_rows(mut rows: Vec<Vec<String>>) -> Self {
        if rows.is_empty() {
            return Self::default();
        }
        let mut headers = rows.remove(0);
        if let Some(first) = headers.first_mut() {
            *first = strip_bom(first).to_string();
        }
        Self { headers, rows }
    }

    /// Index of the first header containing `hint`, compared case-insensitively.
    pub fn find_column(&self, hint: &str) -> Option<usize> {
        let hint = hint.trim().to_lowercase();
        self.headers
            .iter()
            .position(|h| strip_bom(h).trim().to_lowercase().contains(&hint))
    }

    pub fn to_bytes(&self, sep: char) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        write_row(&mut buf, &self.headers, sep)?;
        for row in &self.rows {
            write_row(&mut buf, row, sep)?;
        }
        Ok(buf)
    }
}

/// Reads and decodes a delimited file.
pub async fn read_table(path: &Path, encoding: &str, sep: char) -> anyhow::Result<Table> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading table {}", path.display()))?;
    let text = decode_bytes(&bytes, encoding)
        .with_context(|| format!("decoding table {}", path.display()))?;
    Ok(Table::from_rows(parse_rows(&text, sep)))
}
