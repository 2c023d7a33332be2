//! Parameter map: name -> ordered list of values.

use crate::query::QueryCollector;
use std::collections::HashMap;

/// Decoded request parameters.
///
/// Names are unique; each name owns its values in insertion order. Names
/// themselves are also iterated in first-insertion order. Lookup goes through
/// a [HashMap] keyed with a per-process random hasher, so crafted colliding
/// keys cannot degrade it.
#[derive(Debug, Clone, Default)]
pub struct Params {
    entries: Vec<(String, Vec<String>)>,
    index: HashMap<String, usize>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` to the values of `name`.
    pub fn add<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        match self.index.get(&name) {
            Some(&i) => self.entries[i].1.push(value.into()),
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, vec![value.into()]));
            }
        }
    }

    /// First value of `name`.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// Every value of `name`, empty when absent.
    #[inline]
    pub fn get_all(&self, name: &str) -> &[String] {
        match self.index.get(name) {
            Some(&i) => &self.entries[i].1,
            None => &[],
        }
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of distinct names.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Appends every value of `other` after the values already held.
    pub fn merge(&mut self, other: &Params) {
        for (name, values) in other.iter() {
            for value in values {
                self.add(name, value.as_str());
            }
        }
    }
}

impl PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for Params {}

impl QueryCollector for Params {
    #[inline]
    fn add_param(&mut self, key: String, value: String) {
        self.add(key, value);
    }

    #[inline]
    fn length(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order() {
        let mut params = Params::new();
        params.add("b", "1");
        params.add("a", "2");
        params.add("b", "3");

        assert_eq!(params.names().collect::<Vec<_>>(), ["b", "a"]);
        assert_eq!(params.get_all("b"), ["1", "3"]);
        assert_eq!(params.get("b"), Some("1"));
        assert_eq!(params.get("c"), None);
        assert!(params.get_all("c").is_empty());
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn merge_accumulates() {
        let mut query = Params::new();
        query.add("param", "right");

        let mut body = Params::new();
        body.add("param", "wrong");
        body.add("other", "x");

        query.merge(&body);
        assert_eq!(query.get_all("param"), ["right", "wrong"]);
        assert_eq!(query.get("other"), Some("x"));
    }
}
