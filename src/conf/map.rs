//! `map` directives: literal input values to an output variable.

use indexmap::map::Entry;
use indexmap::IndexMap;

use crate::conf::ValidationError;

/// Reserved key matching any input not listed explicitly.
pub const DEFAULT_KEY: &str = "default";

/// Maps an input variable to an output variable via literal keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDirective {
    source: String,
    variable: String,
    entries: IndexMap<String, String>,
    default: Option<String>,
}

impl MapDirective {
    pub fn new(source: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            variable: variable.into(),
            entries: IndexMap::new(),
            default: None,
        }
    }

    /// Bind `key` to `value`. The key `default` is routed to [`Self::set_default`].
    pub fn add_entry(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ValidationError> {
        let key = key.into();
        if key == DEFAULT_KEY {
            return self.set_default(value);
        }
        if key.is_empty() {
            return Err(ValidationError::Empty { what: "map key" });
        }
        match self.entries.entry(key) {
            Entry::Occupied(slot) => Err(ValidationError::DuplicateMapKey {
                variable: self.variable.clone(),
                key: slot.key().clone(),
                existing: slot.get().clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(value.into());
                Ok(())
            }
        }
    }

    /// Bind the `default` key. At most one binding is allowed.
    pub fn set_default(&mut self, value: impl Into<String>) -> Result<(), ValidationError> {
        if let Some(existing) = &self.default {
            return Err(ValidationError::DuplicateDefault {
                variable: self.variable.clone(),
                existing: existing.clone(),
            });
        }
        self.default = Some(value.into());
        Ok(())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        if key == DEFAULT_KEY {
            return self.default_value();
        }
        self.entries.get(key).map(String::as_str)
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Explicit entries in insertion order, without the default.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len() + usize::from(self.default.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_collision_is_rejected() {
        let mut map = MapDirective::new("$ssl_preread_server_name", "$ffstream443");
        map.add_entry("a.example.com", "ffus_1").unwrap();

        let err = map.add_entry("a.example.com", "ffus_2").unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicateMapKey {
                variable: "$ffstream443".into(),
                key: "a.example.com".into(),
                existing: "ffus_1".into(),
            }
        );
        assert_eq!(map.get("a.example.com"), Some("ffus_1"));
    }

    #[test]
    fn test_single_default() {
        let mut map = MapDirective::new("$ssl_preread_server_name", "$ffstream443");
        map.set_default("ffus_1").unwrap();
        assert!(matches!(
            map.add_entry("default", "ffus_2"),
            Err(ValidationError::DuplicateDefault { .. })
        ));
        assert_eq!(map.default_value(), Some("ffus_1"));
        assert_eq!(map.len(), 1);
    }
}
