//! Capture-level string interner.
//!
//! Every piece of text in the normalized representation (function names, file
//! paths, marker names, resource names) lives here exactly once; all tables
//! reference strings by integer index. Indices are stable for the lifetime of
//! the table: the table only grows, existing entries are never moved.

use indexmap::IndexSet;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Index of a string in the [`StringTable`]
pub type StringIndex = usize;

/// Deduplicating, append-only string table with bidirectional lookup.
///
/// Serializes as a plain JSON array of strings (the `shared.stringArray`
/// field of the analysis format).
#[derive(Debug, Clone, Default)]
pub struct StringTable {
    strings: IndexSet<String>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its stable index.
    ///
    /// Returns the existing index if the string is already present.
    pub fn intern(&mut self, s: &str) -> StringIndex {
        if let Some(index) = self.strings.get_index_of(s) {
            return index;
        }
        self.strings.insert_full(s.to_string()).0
    }

    /// Look up the index of a string without inserting it.
    pub fn index_of(&self, s: &str) -> Option<StringIndex> {
        self.strings.get_index_of(s)
    }

    /// Look up the string at an index.
    pub fn get(&self, index: StringIndex) -> Option<&str> {
        self.strings.get_index(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }
}

impl PartialEq for StringTable {
    fn eq(&self, other: &Self) -> bool {
        self.strings.len() == other.strings.len()
            && self.strings.iter().zip(other.strings.iter()).all(|(a, b)| a == b)
    }
}

impl Serialize for StringTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.strings.iter())
    }
}

impl<'de> Deserialize<'de> for StringTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let strings = Vec::<String>::deserialize(deserializer)?;
        let mut table = StringTable::new();
        for s in &strings {
            table.intern(s);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_deduplicates() {
        let mut table = StringTable::new();
        let a = table.intern("malloc");
        let b = table.intern("free");
        let c = table.intern("malloc");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_indices_are_stable() {
        let mut table = StringTable::new();
        let first = table.intern("first");
        for i in 0..100 {
            table.intern(&format!("string-{i}"));
        }
        assert_eq!(table.intern("first"), first);
        assert_eq!(table.get(first), Some("first"));
    }

    #[test]
    fn test_bidirectional_lookup() {
        let mut table = StringTable::new();
        let idx = table.intern("js::RunScript");
        assert_eq!(table.index_of("js::RunScript"), Some(idx));
        assert_eq!(table.get(idx), Some("js::RunScript"));
        assert_eq!(table.index_of("missing"), None);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut table = StringTable::new();
        table.intern("a");
        table.intern("b");
        let json = serde_json::to_string(&table).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
        let back: StringTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }
}
