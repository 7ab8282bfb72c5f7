//! Repair of double-encoded accented text.
//!
//! The upstream catalog exports and the municipality reference file both contain text whose
//! UTF-8 bytes were decoded as Latin-1/Windows-1252 and re-encoded, so `ç` shows up as `Ã§`
//! and `õ` as `Ãµ`. [`EncodingRepair`] reverses the common cases in two stages:
//!
//! 1. literal substitution of known whole-word corruptions, then of the corrupted two-character
//!    sequence of each accented letter;
//! 2. regex repair of suffix corruptions (`-ção`, `-ão`, `-ões`, `não`/`são`) that survive
//!    stage 1 because the continuation character was lost.
//!
//! Both stages repeat until the text stops changing. Every rule makes the text strictly
//! shorter, which bounds the loop and makes `repair` idempotent.

use regex::Regex;
use tracing::{debug, info, warn};

/// Corruptions that only make sense as a whole word. Applied before the letter table so the
/// letter table cannot break them up first.
const WORD_FIXES: &[(&str, &str)] = &[
    ("Almirante\u{c2}\u{a0}Tamanda\u{c3}r\u{c3}\u{a9}", "Almirante Tamandaré"),
    ("Almirante\u{c2} Tamanda\u{c3}r\u{c3}\u{a9}", "Almirante Tamandaré"),
    ("\u{c1}\u{e2}\u{80}\u{9a}ngulo", "Ângulo"),
    ("organiza\u{e7}\u{c3}\u{b5}es", "organizações"),
    ("associa\u{e7}\u{c3}\u{b5}es", "associações"),
    ("n\u{c3}\u{a3}o", "não"),
    ("s\u{c3}\u{a3}o", "são"),
];

/// UTF-8 lead byte `C3` read as `Ã`, followed by the continuation byte read as Latin-1 or
/// Windows-1252.
const LETTER_FIXES: &[(&str, &str)] = &[
    // lower case
    ("\u{c3}\u{a1}", "á"),
    ("\u{c3}\u{a9}", "é"),
    ("\u{c3}\u{ad}", "í"),
    ("\u{c3}\u{b3}", "ó"),
    ("\u{c3}\u{ba}", "ú"),
    ("\u{c3}\u{a0}", "à"),
    ("\u{c3}\u{aa}", "ê"),
    ("\u{c3}\u{b4}", "ô"),
    ("\u{c3}\u{a2}", "â"),
    ("\u{c3}\u{a3}", "ã"),
    ("\u{c3}\u{a7}", "ç"),
    ("\u{c3}\u{b1}", "ñ"),
    ("\u{c3}\u{b5}", "õ"),
    ("\u{c3}\u{bc}", "ü"),
    // upper case, continuation byte kept as a C1 control
    ("\u{c3}\u{81}", "Á"),
    ("\u{c3}\u{89}", "É"),
    ("\u{c3}\u{8d}", "Í"),
    ("\u{c3}\u{93}", "Ó"),
    ("\u{c3}\u{9a}", "Ú"),
    ("\u{c3}\u{80}", "À"),
    ("\u{c3}\u{8a}", "Ê"),
    ("\u{c3}\u{94}", "Ô"),
    ("\u{c3}\u{82}", "Â"),
    ("\u{c3}\u{83}", "Ã"),
    ("\u{c3}\u{87}", "Ç"),
    ("\u{c3}\u{95}", "Õ"),
    ("\u{c3}\u{9c}", "Ü"),
    // upper case, continuation byte rendered through Windows-1252
    ("\u{c3}\u{2030}", "É"),
    ("\u{c3}\u{201c}", "Ó"),
    ("\u{c3}\u{161}", "Ú"),
    ("\u{c3}\u{20ac}", "À"),
    ("\u{c3}\u{160}", "Ê"),
    ("\u{c3}\u{201d}", "Ô"),
    ("\u{c3}\u{201a}", "Â"),
    ("\u{c3}\u{192}", "Ã"),
    ("\u{c3}\u{2021}", "Ç"),
    ("\u{c3}\u{2022}", "Õ"),
    ("\u{c3}\u{153}", "Ü"),
];

/// Suffix rules: (pattern, replacement). Literal forms first, then forms where the
/// continuation character became `?` or U+FFFD.
const SUFFIX_RULES: &[(&str, &str)] = &[
    (r"(\p{L})Ã§Ã£o", "${1}ção"),
    (r"(\p{L})Ã£o", "${1}ão"),
    (r"(\p{L})Ãµes", "${1}ões"),
    (r"\b([nNsS])Ã£o\b", "${1}ão"),
    (r"(\p{L})Ã[?\x{FFFD}]Ã[?\x{FFFD}]o\b", "${1}ção"),
    (r"(\p{L})Ã[?\x{FFFD}]Ã[?\x{FFFD}]es\b", "${1}ções"),
    (r"\b([nNsS])Ã[?\x{FFFD}]o\b", "${1}ão"),
    (r"(\p{L})Ã[?\x{FFFD}]o\b", "${1}ão"),
    (r"(\p{L})Ã[?\x{FFFD}]es\b", "${1}ões"),
];

#[derive(Debug)]
struct SuffixRule {
    pattern: Regex,
    replacement: &'static str,
}

/// Encoding repair filter. Immutable after construction and safe to share across workers.
#[derive(Debug)]
pub struct EncodingRepair {
    literal: Vec<(String, String)>,
    suffix_rules: Vec<SuffixRule>,
    triggers: Vec<char>,
}

impl Default for EncodingRepair {
    fn default() -> Self {
        Self::with_extra_fixes(Vec::new())
    }
}

impl EncodingRepair {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the filter with additional literal fixes applied after the whole-word table.
    ///
    /// A fix is dropped (with a warning) when its repaired form is not strictly shorter than
    /// the corrupted form, since such a rule could make the filter loop or stop being
    /// idempotent.
    pub fn with_extra_fixes(extra: Vec<(String, String)>) -> Self {
        let mut literal: Vec<(String, String)> = WORD_FIXES
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();

        for (corrupted, repaired) in extra {
            if corrupted.is_empty() || repaired.chars().count() >= corrupted.chars().count() {
                warn!(
                    %corrupted,
                    %repaired,
                    "ignoring encoding fix that does not shorten the text"
                );
                continue;
            }
            literal.push((corrupted, repaired));
        }

        literal.extend(
            LETTER_FIXES
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string())),
        );
        // Lead byte C2 read as `Â`: the second character is already the intended one.
        literal.push(("\u{c2}\u{a0}".to_string(), " ".to_string()));
        literal.extend(('\u{a1}'..='\u{bf}').map(|c| (format!("\u{c2}{c}"), c.to_string())));

        let suffix_rules = SUFFIX_RULES
            .iter()
            .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
                Ok(pattern) => Some(SuffixRule {
                    pattern,
                    replacement,
                }),
                Err(err) => {
                    warn!(%err, "skipping invalid suffix repair rule");
                    None
                }
            })
            .collect();

        // Every corrupted form contains at least one of these characters.
        let mut triggers: Vec<char> = Vec::new();
        for (from, _) in &literal {
            let before = triggers.len();
            triggers.extend(from.chars().filter(|c| !c.is_ascii()));
            if triggers.len() == before {
                triggers.extend(from.chars().next());
            }
        }
        triggers.push('Ã');
        triggers.sort_unstable();
        triggers.dedup();

        Self {
            literal,
            suffix_rules,
            triggers,
        }
    }

    /// Returns the repaired text. Text without corruption comes back unchanged.
    pub fn repair(&self, text: &str) -> String {
        if !text.contains(|c: char| self.triggers.binary_search(&c).is_ok()) {
            return text.to_string();
        }

        let mut current = text.to_string();
        loop {
            let next = self.repair_pass(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn repair_pass(&self, text: &str) -> String {
        let mut fixed = text.to_string();
        for (corrupted, repaired) in &self.literal {
            if fixed.contains(corrupted.as_str()) {
                fixed = fixed.replace(corrupted.as_str(), repaired);
            }
        }
        for rule in &self.suffix_rules {
            if rule.pattern.is_match(&fixed) {
                fixed = rule
                    .pattern
                    .replace_all(&fixed, rule.replacement)
                    .into_owned();
            }
        }
        fixed
    }

    /// Repairs every text-typed column in place and reports, per column, how many cells
    /// actually changed. Numeric and empty cells are left alone.
    pub fn repair_columns(&self, table: &mut TextTable) -> Vec<ColumnAudit> {
        let width = table
            .rows
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(table.headers.len());

        let mut audits = Vec::with_capacity(width);
        for col in 0..width {
            let column = table
                .headers
                .get(col)
                .cloned()
                .unwrap_or_else(|| format!("column_{col}"));

            let text_typed = table
                .rows
                .iter()
                .any(|row| matches!(row.get(col), Some(TableCell::Text(_))));
            if !text_typed {
                debug!(%column, "skipping non-text column");
                audits.push(ColumnAudit {
                    column,
                    text_typed: false,
                    changed: 0,
                });
                continue;
            }

            let mut changed = 0usize;
            for row in &mut table.rows {
                if let Some(TableCell::Text(value)) = row.get_mut(col) {
                    let fixed = self.repair(value);
                    if fixed != *value {
                        *value = fixed;
                        changed += 1;
                    }
                }
            }

            if changed > 0 {
                info!(%column, changed, "encoding repairs applied");
            } else {
                info!(%column, "no encoding repairs needed");
            }
            audits.push(ColumnAudit {
                column,
                text_typed: true,
                changed,
            });
        }
        audits
    }
}

/// One cell of a loosely typed table. Every variant keeps the text it was read from, so
/// writing a table back reproduces untouched cells byte for byte.
#[derive(Debug, Clone, PartialEq)]
pub enum TableCell {
    Empty(String),
    Integer { value: i64, raw: String },
    Float { value: f64, raw: String },
    Text(String),
}

impl TableCell {
    /// Types a raw cell the way a spreadsheet loader would.
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return TableCell::Empty(raw.to_string());
        }
        if let Ok(value) = trimmed.parse::<i64>() {
            return TableCell::Integer {
                value,
                raw: raw.to_string(),
            };
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            if value.is_finite() {
                return TableCell::Float {
                    value,
                    raw: raw.to_string(),
                };
            }
        }
        TableCell::Text(raw.to_string())
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, TableCell::Integer { .. } | TableCell::Float { .. })
    }

    pub fn to_raw(&self) -> String {
        match self {
            TableCell::Empty(raw)
            | TableCell::Integer { raw, .. }
            | TableCell::Float { raw, .. }
            | TableCell::Text(raw) => raw.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<TableCell>>,
}

impl TextTable {
    pub fn from_raw_rows(headers: Vec<String>, rows: &[Vec<String>]) -> Self {
        Self {
            headers,
            rows: rows
                .iter()
                .map(|row| row.iter().map(|cell| TableCell::infer(cell)).collect())
                .collect(),
        }
    }

    pub fn to_raw_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(TableCell::to_raw).collect())
            .collect()
    }
}

/// Per-column audit line of a column-wise repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnAudit {
    pub column: String,
    pub text_typed: bool,
    pub changed: usize,
}
