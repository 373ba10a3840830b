use std::collections::HashMap;

/// An untyped input row: column name to cell text, as the record source saw it.
///
/// Column names are folded to lower case and trimmed, so `Value`, `value ` and
/// `VALUE` all address the same cell. Empty cells read as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    fields: HashMap<String, String>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut row = Self::new();
        for (key, value) in pairs {
            row.insert(key.as_ref(), value);
        }
        row
    }

    pub fn insert(&mut self, column: &str, value: impl Into<String>) {
        self.fields.insert(Self::column_key(column), value.into());
    }

    /// Cell text for `column`, or `None` when the column is missing or the cell is empty.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(&Self::column_key(column))
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn column_key(column: &str) -> String {
        column.trim().to_lowercase()
    }
}
