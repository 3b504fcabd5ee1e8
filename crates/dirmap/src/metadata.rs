//! Declarative entity metadata
//!
//! This is the raw description of how an entity type maps onto directory
//! entries, before validation. It is either built in code with the helper
//! constructors below or loaded from a JSON description:
//!
//! ```
//! use dirmap::metadata::EntityMetadata;
//!
//! let metadata = EntityMetadata::from_json(
//!     "Organisation",
//!     r#"{
//!         "dn": "ou=group",
//!         "object_classes": ["groupOfNames", "top"],
//!         "columns": [
//!             { "field": "cn", "type": "string", "index": true },
//!             { "field": "member", "type": "entity",
//!               "relation": { "target": "People", "ignore_errors": true } }
//!         ]
//!     }"#,
//! )
//! .unwrap();
//! assert_eq!(metadata.columns.len(), 2);
//! ```
//!
//! [`SchemaRegistry`](crate::schema::SchemaRegistry) turns it into a
//! validated [`Schema`](crate::schema::Schema).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EntityError, EntityResult};

/// Mapping description of one entity type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// DN template relative to the client base DN (e.g. `ou=people`).
    #[serde(default)]
    pub dn: String,

    /// Object classes every entry of this type carries.
    #[serde(default)]
    pub object_classes: Vec<String>,

    /// Mapped columns, in declaration order.
    #[serde(default)]
    pub columns: Vec<ColumnMetadata>,
}

impl EntityMetadata {
    /// Create metadata with a DN template.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            object_classes: Vec::new(),
            columns: Vec::new(),
        }
    }

    /// Load metadata from a JSON description.
    pub fn from_json(entity: &str, json: &str) -> EntityResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            EntityError::invalid_schema(entity, format!("unreadable description: {}", e))
        })
    }

    /// Set the default object classes.
    pub fn with_object_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.object_classes = classes.into_iter().map(Into::into).collect();
        self
    }

    /// Add a column using builder pattern.
    #[must_use]
    pub fn with_column(mut self, column: ColumnMetadata) -> Self {
        self.columns.push(column);
        self
    }
}

/// Mapping description of one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Logical field name on the entity.
    pub field: String,

    /// Physical attribute name; defaults to the field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,

    /// Declared kind: `string`, `array` or `entity`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Whether the attribute must be present on hydration. Must be a boolean.
    #[serde(default = "default_strict")]
    pub strict: Value,

    /// Whether this column identifies entries for `find`.
    #[serde(default)]
    pub index: bool,

    /// Relation settings, for `entity` columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<RelationMetadata>,
}

fn default_strict() -> Value {
    Value::Bool(true)
}

impl ColumnMetadata {
    /// Create a column of the given declared kind.
    pub fn new(field: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            attribute: None,
            kind: kind.into(),
            strict: default_strict(),
            index: false,
            relation: None,
        }
    }

    /// Single-valued string column.
    pub fn string(field: impl Into<String>) -> Self {
        Self::new(field, "string")
    }

    /// Ordered multi-valued string column.
    pub fn array(field: impl Into<String>) -> Self {
        Self::new(field, "array")
    }

    /// DN-valued column referencing entities of type `target`.
    ///
    /// Collection-valued by default; see [`single`](Self::single).
    pub fn entity(field: impl Into<String>, target: impl Into<String>) -> Self {
        let mut column = Self::new(field, "entity");
        column.relation = Some(RelationMetadata::new(target));
        column
    }

    /// Use a physical attribute name different from the field name.
    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Tolerate a missing attribute on hydration.
    #[must_use]
    pub fn non_strict(mut self) -> Self {
        self.strict = Value::Bool(false);
        self
    }

    /// Mark as the column `find` looks entries up by.
    #[must_use]
    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    /// Relation holds at most one entity.
    #[must_use]
    pub fn single(mut self) -> Self {
        if let Some(relation) = self.relation.as_mut() {
            relation.multiple = false;
        }
        self
    }

    /// Relation holds a collection of entities.
    #[must_use]
    pub fn multiple(mut self) -> Self {
        if let Some(relation) = self.relation.as_mut() {
            relation.multiple = true;
        }
        self
    }

    /// Skip referenced DNs that cannot be resolved instead of failing.
    #[must_use]
    pub fn ignore_errors(mut self) -> Self {
        if let Some(relation) = self.relation.as_mut() {
            relation.ignore_errors = true;
        }
        self
    }
}

/// Relation settings of an `entity` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationMetadata {
    /// Entity name of the referenced type.
    pub target: String,

    /// Collection-valued (`true`) or single-valued (`false`).
    #[serde(default = "default_multiple")]
    pub multiple: bool,

    /// Drop unresolvable DNs instead of failing.
    #[serde(default)]
    pub ignore_errors: bool,
}

fn default_multiple() -> bool {
    true
}

impl RelationMetadata {
    /// Create a collection-valued relation to `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            multiple: default_multiple(),
            ignore_errors: false,
        }
    }
}
