// ============================================================
// Layer 3 — Instance Domain Type
// ============================================================
// One record read from a dataset file, before it is pushed
// through the template. A record is just a set of named text
// fields, e.g. for a sentiment task:
//
//   { "sentence": "a gorgeous film", "label": "1" }
//
// The template refers to fields by name ({sentence}) and the
// label field is looked up separately by the templatizer.

use std::collections::BTreeMap;

/// A dataset record: field name → field text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Instance {
    fields: BTreeMap<String, String>,
}

impl Instance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy in tests and readers.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_round_trip() {
        let inst = Instance::new()
            .with_field("sentence", "a gorgeous film")
            .with_field("label", "1");
        assert_eq!(inst.get("sentence"), Some("a gorgeous film"));
        assert_eq!(inst.get("label"), Some("1"));
        assert_eq!(inst.get("missing"), None);
        assert_eq!(inst.len(), 2);
    }
}
