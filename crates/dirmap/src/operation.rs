//! Directory operation types
//!
//! Entries, attribute maps, modification deltas and search filters exchanged
//! with a [`DirectoryClient`](crate::client::DirectoryClient).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the attribute holding an entry's object classes.
pub const OBJECT_CLASS: &str = "objectClass";

/// Multi-valued attribute map of a directory entry.
///
/// Values keep the order in which they were read or set. Attribute names are
/// matched case-insensitively by the `*_ignore_case` accessors, since
/// directory attribute names are not case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeMap {
    attributes: BTreeMap<String, Vec<String>>,
}

impl AttributeMap {
    /// Create a new empty attribute map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the values of an attribute, replacing any spelling of the same name.
    pub fn set<I, S>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        self.remove_ignore_case(&name);
        self.attributes
            .insert(name, values.into_iter().map(Into::into).collect());
    }

    /// Set an attribute using builder pattern.
    pub fn with<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(name, values);
        self
    }

    /// Get the values of an attribute by exact name.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.attributes.get(name).map(Vec::as_slice)
    }

    /// Get the values of an attribute, matching the name case-insensitively.
    pub fn get_ignore_case(&self, name: &str) -> Option<&[String]> {
        self.get(name).or_else(|| {
            self.attributes
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, values)| values.as_slice())
        })
    }

    /// Check if an attribute is present with at least one value.
    pub fn has(&self, name: &str) -> bool {
        self.get_ignore_case(name).is_some_and(|v| !v.is_empty())
    }

    /// Remove an attribute, matching the name case-insensitively.
    pub fn remove_ignore_case(&mut self, name: &str) -> Option<Vec<String>> {
        let key = self
            .attributes
            .keys()
            .find(|key| key.eq_ignore_ascii_case(name))
            .cloned()?;
        self.attributes.remove(&key)
    }

    /// Get all attribute names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Get the number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Check if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterate over all attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.attributes.iter()
    }

    /// Apply a modification delta, as the directory would after a modify.
    pub fn apply(&mut self, delta: &AttributeDelta) {
        for modification in delta.iter() {
            match modification {
                Modification::Add { attribute, values } => {
                    let mut merged = self.remove_ignore_case(attribute).unwrap_or_default();
                    merged.extend(values.iter().cloned());
                    self.attributes.insert(attribute.clone(), merged);
                }
                Modification::Replace { attribute, values } => {
                    self.set(attribute.clone(), values.iter().cloned());
                }
                Modification::Delete { attribute } => {
                    self.remove_ignore_case(attribute);
                }
            }
        }
    }

    /// Convert to the underlying map.
    pub fn into_map(self) -> BTreeMap<String, Vec<String>> {
        self.attributes
    }
}

impl FromIterator<(String, Vec<String>)> for AttributeMap {
    fn from_iter<T: IntoIterator<Item = (String, Vec<String>)>>(iter: T) -> Self {
        let mut map = AttributeMap::new();
        for (name, values) in iter {
            map.set(name, values);
        }
        map
    }
}

/// A directory entry: DN plus its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: AttributeMap,
}

impl DirectoryEntry {
    /// Create an entry with no attributes.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: AttributeMap::new(),
        }
    }

    /// Add an attribute using builder pattern.
    pub fn with<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.set(name, values);
        self
    }
}

/// A single attribute change in a modify request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Modification {
    /// Attribute absent before, present now.
    Add {
        attribute: String,
        values: Vec<String>,
    },
    /// Attribute present before and now, with different values.
    Replace {
        attribute: String,
        values: Vec<String>,
    },
    /// Attribute present before, absent now.
    Delete { attribute: String },
}

impl Modification {
    /// Name of the attribute this change touches.
    pub fn attribute(&self) -> &str {
        match self {
            Modification::Add { attribute, .. }
            | Modification::Replace { attribute, .. }
            | Modification::Delete { attribute } => attribute,
        }
    }
}

/// Ordered set of changes to apply to one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeDelta {
    modifications: Vec<Modification>,
}

impl AttributeDelta {
    /// Create a new empty delta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute that was absent.
    pub fn add<I, S>(&mut self, name: impl Into<String>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modifications.push(Modification::Add {
            attribute: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Replace all values of an attribute.
    pub fn replace<I, S>(&mut self, name: impl Into<String>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modifications.push(Modification::Replace {
            attribute: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Remove an attribute entirely.
    pub fn clear_attribute(&mut self, name: impl Into<String>) -> &mut Self {
        self.modifications.push(Modification::Delete {
            attribute: name.into(),
        });
        self
    }

    /// Find the change for an attribute, matching the name case-insensitively.
    pub fn get(&self, name: &str) -> Option<&Modification> {
        self.modifications
            .iter()
            .find(|m| m.attribute().eq_ignore_ascii_case(name))
    }

    /// Drop the change for an attribute, if any.
    pub fn remove(&mut self, name: &str) -> Option<Modification> {
        let position = self
            .modifications
            .iter()
            .position(|m| m.attribute().eq_ignore_ascii_case(name))?;
        Some(self.modifications.remove(position))
    }

    /// Check if this delta has any changes.
    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }

    /// Get the number of changes.
    pub fn len(&self) -> usize {
        self.modifications.len()
    }

    /// Iterate over the changes in emission order.
    pub fn iter(&self) -> impl Iterator<Item = &Modification> {
        self.modifications.iter()
    }

    /// Get all affected attribute names, in emission order.
    pub fn affected_attributes(&self) -> Vec<&str> {
        self.modifications.iter().map(Modification::attribute).collect()
    }
}

/// Search scope relative to the search base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    /// The base entry only.
    Base,
    /// Direct children of the base entry.
    OneLevel,
    /// The base entry and all its descendants.
    Subtree,
}

/// Filter for search operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// Match entries where the attribute has this value (any value of a
    /// multi-valued attribute matches).
    Equals { attribute: String, value: String },

    /// Match entries where the attribute exists.
    Present { attribute: String },

    /// Logical AND of multiple filters.
    And { filters: Vec<Filter> },
}

impl Filter {
    /// Create an equals filter.
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create a present (attribute exists) filter.
    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    /// Create an AND filter. A single filter is returned as is.
    pub fn and(mut filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            return filters.remove(0);
        }
        Filter::And { filters }
    }

    /// Combine this filter with another using AND.
    pub fn and_with(self, other: Filter) -> Self {
        match self {
            Filter::And { mut filters } => {
                filters.push(other);
                Filter::And { filters }
            }
            _ => Filter::And {
                filters: vec![self, other],
            },
        }
    }

    /// Check whether an attribute map satisfies this filter.
    ///
    /// Attribute names compare case-insensitively, values exactly.
    pub fn matches(&self, attributes: &AttributeMap) -> bool {
        match self {
            Filter::Equals { attribute, value } => attributes
                .get_ignore_case(attribute)
                .is_some_and(|values| values.iter().any(|v| v == value)),
            Filter::Present { attribute } => attributes.has(attribute),
            Filter::And { filters } => filters.iter().all(|f| f.matches(attributes)),
        }
    }
}
