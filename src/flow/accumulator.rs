use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Validated (and transformed) values of one transaction, keyed by the field name
/// the caller submitted them under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Accumulator {
    fields: BTreeMap<String, String>,
}

impl Accumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn record(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Accumulator {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_overwrites_and_serializes_flat() -> serde_json::Result<()> {
        let mut acc = Accumulator::new();
        acc.record("username", "alice_w");
        acc.record("username", "alice_x");
        assert_eq!(acc.get("username"), Some("alice_x"));
        assert_eq!(acc.len(), 1);

        let json = serde_json::to_string(&acc)?;
        assert_eq!(json, r#"{"username":"alice_x"}"#);
        let back: Accumulator = serde_json::from_str(&json)?;
        assert_eq!(back, acc);
        Ok(())
    }
}
