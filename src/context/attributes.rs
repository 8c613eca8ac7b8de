//! Request-scoped telemetry attributes.
//!
//! Keys and values are the OpenTelemetry types, so a bag can be handed to
//! instruments and spans without conversion.

pub use opentelemetry::{KeyValue, Value};

/// Insertion-ordered attribute set with unique keys.
///
/// Writing an existing key replaces its value in place, so the last write wins
/// and the order stays stable for reproducible output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeBag {
    entries: Vec<KeyValue>,
}

impl AttributeBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kv: KeyValue) {
        match self.entries.iter_mut().find(|e| e.key == kv.key) {
            Some(existing) => existing.value = kv.value,
            None => self.entries.push(kv),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|e| e.key.as_str() == key)
            .map(|e| &e.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KeyValue> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[KeyValue] {
        &self.entries
    }

    pub fn into_vec(self) -> Vec<KeyValue> {
        self.entries
    }
}

impl Extend<KeyValue> for AttributeBag {
    fn extend<T: IntoIterator<Item = KeyValue>>(&mut self, iter: T) {
        for kv in iter {
            self.insert(kv);
        }
    }
}

impl FromIterator<KeyValue> for AttributeBag {
    fn from_iter<T: IntoIterator<Item = KeyValue>>(iter: T) -> Self {
        let mut bag = Self::new();
        bag.extend(iter);
        bag
    }
}

impl<'a> IntoIterator for &'a AttributeBag {
    type Item = &'a KeyValue;
    type IntoIter = std::slice::Iter<'a, KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
