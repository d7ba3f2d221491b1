//! Tabular response parsing
//!
//! The `list` command prints a fixed-column ASCII table:
//!
//! ```text
//! Name      Issuer   Len
//! --------  -------  ---
//! github    GitHub   6
//! aws                8
//! ```
//!
//! Column boundaries come from the dash runs of the separator row. Each column
//! runs from the start of its dash run to the start of the next one, so a cell
//! may spill into the gap after its dashes.

use serde::{Deserialize, Serialize};

/// One parsed table row, cells keyed by column header in column order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    fields: Vec<(String, String)>,
}

impl TokenRecord {
    /// Record without fields
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter; replaces an existing value
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a field, replacing an existing value under the same key
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Value of a field, matched by exact header
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value parsed into another type, `None` when absent or unparsable
    pub fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Fields in column order
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for TokenRecord
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = TokenRecord::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

/// A separator row has at least one dash and only rule characters otherwise
fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.contains('-')
        && trimmed
            .chars()
            .all(|c| matches!(c, '-' | '=' | '+' | '|') || c.is_whitespace())
}

/// Character offsets where each dash run starts
fn column_starts(separator: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut in_run = false;
    for (i, c) in separator.chars().enumerate() {
        let rule = c == '-' || c == '=';
        if rule && !in_run {
            starts.push(i);
        }
        in_run = rule;
    }
    starts
}

/// Cut a line at the given character offsets; `None` when the line does not
/// reach the last column
fn slice_columns(line: &str, starts: &[usize]) -> Option<Vec<String>> {
    let chars: Vec<char> = line.chars().collect();
    let last = *starts.last()?;
    if chars.len() <= last {
        return None;
    }

    let cells = starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(chars.len());
            let end = end.min(chars.len());
            let cell: String = chars[start.min(end)..end].iter().collect();
            cell.trim().trim_matches('|').trim().to_string()
        })
        .collect();
    Some(cells)
}

/// Parse the listing table into records, in device line order.
///
/// Text without a separator row yields no records. Rows that don't reach the
/// last column, and blank rows, are skipped.
pub fn parse_table(text: &str) -> Vec<TokenRecord> {
    let lines: Vec<&str> = text.lines().collect();

    let Some(sep_idx) = lines.iter().position(|l| is_separator(l)) else {
        return Vec::new();
    };
    let Some(header) = lines[..sep_idx].iter().rev().find(|l| !l.trim().is_empty()) else {
        return Vec::new();
    };

    let starts = column_starts(lines[sep_idx]);
    let Some(labels) = slice_columns(header, &starts) else {
        return Vec::new();
    };

    lines[sep_idx + 1..]
        .iter()
        .filter(|line| !line.trim().is_empty() && !is_separator(line))
        .filter_map(|line| slice_columns(line, &starts))
        .map(|cells| labels.iter().cloned().zip(cells).collect::<TokenRecord>())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_row() {
        let records = parse_table("Name  Len\r\n----  ---\r\nabc   6  \r\n");
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0],
            TokenRecord::new().with("Name", "abc").with("Len", "6")
        );
    }

    #[test]
    fn test_row_order_and_empty_cells() {
        let text = "\
Name      Issuer   Len
--------  -------  ---
github    GitHub   6
aws                8
zeta      Z        6
";
        let records = parse_table(text);
        let names: Vec<_> = records.iter().filter_map(|r| r.get("Name")).collect();
        assert_eq!(names, vec!["github", "aws", "zeta"]);
        assert_eq!(records[1].get("Issuer"), Some(""));
        assert_eq!(records[1].parse::<u8>("Len"), Some(8));
    }

    #[test]
    fn test_wide_cell_overflows_dashes() {
        let text = "Name  Len\n----  ---\nverylongname 6\n";
        let records = parse_table(text);
        // "verylongname 6" cut at offset 6 -> "verylo" / "ngname 6"
        assert_eq!(records[0].get("Name"), Some("verylo"));
        assert_eq!(records[0].get("Len"), Some("ngname 6"));
    }

    #[test]
    fn test_short_lines_skipped() {
        let text = "Name  Len\n----  ---\nab\n\nabc   6\n";
        let records = parse_table(text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("Name"), Some("abc"));
    }

    #[test]
    fn test_no_table() {
        assert!(parse_table("").is_empty());
        assert!(parse_table("no tokens stored\n").is_empty());
        assert!(parse_table("----  ---\nabc   6\n").is_empty());
    }

    #[test]
    fn test_pipe_rules() {
        let text = "| Name | Len |\n|------|-----|\n| abc  | 6   |\n";
        let records = parse_table(text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("Name"), Some("abc"));
        assert_eq!(records[0].get("Len"), Some("6"));
    }

    #[test]
    fn test_record_set_replaces() {
        let mut record = TokenRecord::new().with("Name", "a");
        record.set("Name", "b");
        record.set("Len", "6");
        assert_eq!(record.len(), 2);
        assert_eq!(record.get("Name"), Some("b"));
        assert_eq!(record.get("Len"), Some("6"));
    }
}
