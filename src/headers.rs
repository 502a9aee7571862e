//! Response header fields as they came off the wire.

/// A case-insensitive set of header fields.
///
/// Fields keep their original spelling and arrival order; repeated names are
/// kept as separate entries. Lookups compare names ASCII case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    fields: Vec<(String, String)>,
}

impl HeaderSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, keeping any earlier field with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// The first value stored under `name`.
    pub fn get<'a>(&'a self, name: &str) -> Option<&'a str> {
        self.fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value stored under `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns `true` if a field named `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether the first value under `name` equals `expected`, ignoring case.
    pub fn is(&self, name: &str, expected: &str) -> bool {
        self.get(name)
            .map_or(false, |value| value.eq_ignore_ascii_case(expected))
    }

    /// Extend the value of the most recently added field.
    ///
    /// Used for obsolete line folding. Returns `false` when the set is empty.
    pub(crate) fn continue_last(&mut self, more: &str) -> bool {
        match self.fields.last_mut() {
            Some((_, value)) => {
                if !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(more);
                true
            }
            None => false,
        }
    }

    /// Iterate over `(name, value)` pairs in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if no fields are stored.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Remove every field.
    pub fn clear(&mut self) {
        self.fields.clear();
    }
}
