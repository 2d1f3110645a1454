//! Aggregated output of a pool run.

use std::collections::HashMap;

/// Mapping from action identity to produced value.
///
/// Built by the owning pool as actions complete; callers only read it. Actions
/// with an empty identity never appear. Failed actions are listed separately
/// through [`failure`](Self::failure) and never have a value.
#[derive(Debug, Clone)]
pub struct Results<T> {
    values: HashMap<String, T>,
    failures: HashMap<String, String>,
}

impl<T> Default for Results<T> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
            failures: HashMap::new(),
        }
    }
}

impl<T> Results<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Value produced by the action with identity `id`, if it completed.
    pub fn get(&self, id: &str) -> Option<&T> {
        self.values.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.values.contains_key(id)
    }

    /// Identities with a value, in unspecified order.
    pub fn ids(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.values.iter().map(|(id, value)| (id.as_str(), value))
    }

    /// Error message recorded for a failed action.
    pub fn failure(&self, id: &str) -> Option<&str> {
        self.failures.get(id).map(String::as_str)
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.keys().map(String::as_str).collect()
    }

    /// Number of values (failures are not counted).
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> HashMap<String, T> {
        self.values
    }

    /// Record a value. Returns `false` when `id` is empty and nothing was stored.
    pub(crate) fn put(&mut self, id: &str, value: T) -> bool {
        if id.is_empty() {
            return false;
        }
        self.failures.remove(id);
        self.values.insert(id.to_owned(), value);
        true
    }

    pub(crate) fn put_failure(&mut self, id: &str, message: String) -> bool {
        if id.is_empty() {
            return false;
        }
        self.values.remove(id);
        self.failures.insert(id.to_owned(), message);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_and_ids() {
        let mut results = Results::new();
        assert!(results.put("one", "Hello"));
        assert!(results.put("two", "World"));

        assert_eq!(results.get("one"), Some(&"Hello"));
        assert_eq!(results.get("three"), None);
        assert_eq!(results.len(), 2);

        let mut ids = results.ids();
        ids.sort_unstable();
        assert_eq!(ids, vec!["one", "two"]);
    }

    #[test]
    fn empty_identity_is_excluded() {
        let mut results = Results::new();
        assert!(!results.put("", 1));
        assert!(!results.put_failure("", "boom".into()));
        assert!(results.is_empty());
        assert!(results.failed_ids().is_empty());
    }

    #[test]
    fn failures_are_kept_apart_from_values() {
        let mut results = Results::new();
        results.put("ok", 1);
        results.put_failure("bad", "disk full".into());

        assert!(!results.contains("bad"));
        assert_eq!(results.failure("bad"), Some("disk full"));
        assert_eq!(results.failed_ids(), vec!["bad"]);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn later_entry_for_same_id_wins() {
        let mut results = Results::new();
        results.put_failure("x", "first try".into());
        results.put("x", 7);
        assert_eq!(results.get("x"), Some(&7));
        assert_eq!(results.failure("x"), None);
    }
}
