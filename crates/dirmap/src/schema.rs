//! Validated entity schemas
//!
//! [`SchemaRegistry`] validates an entity type's [`EntityMetadata`] once and
//! caches the resulting [`Schema`] for the lifetime of the registry.

use serde_json::Value;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;

use crate::client::escape_dn_value;
use crate::entity::Entity;
use crate::error::{EntityError, EntityResult};
use crate::metadata::EntityMetadata;

/// Separator between RDNs in a DN template.
const DN_SEPARATOR: char = ',';

/// Value kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// Single string value.
    String,
    /// Ordered multi-valued strings; duplicates are kept.
    Array,
    /// DN references to other managed entities.
    Entity,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::String => "string",
            ColumnKind::Array => "array",
            ColumnKind::Entity => "entity",
        }
    }
}

impl FromStr for ColumnKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(ColumnKind::String),
            "array" => Ok(ColumnKind::Array),
            "entity" => Ok(ColumnKind::Entity),
            other => Err(format!(
                "'{}' is not a valid column type (string, array, entity)",
                other
            )),
        }
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relation settings of an `entity` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Entity name of the referenced type.
    pub target: String,
    pub multiple: bool,
    /// Drop unresolvable DNs instead of failing.
    pub ignore_unresolved: bool,
}

/// A validated column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Logical field name on the entity.
    pub field: String,
    /// Physical attribute name in the directory.
    pub attribute: String,
    pub kind: ColumnKind,
    pub strict: bool,
    /// Present for `entity` columns only.
    pub relation: Option<Relation>,
}

/// Validated mapping of one entity type.
#[derive(Debug, Clone)]
pub struct Schema {
    entity: String,
    dn: String,
    object_classes: Vec<String>,
    columns: Vec<ColumnDescriptor>,
    index: Option<usize>,
}

impl Schema {
    /// Validate metadata into a schema.
    pub fn build(entity: &str, metadata: EntityMetadata) -> EntityResult<Self> {
        let invalid = |message: String| EntityError::invalid_schema(entity, message);

        let dn = metadata.dn.trim().to_string();
        if dn.starts_with(DN_SEPARATOR) || dn.ends_with(DN_SEPARATOR) {
            return Err(invalid(format!(
                "DN template '{}' must not start or end with a comma",
                dn
            )));
        }

        let mut columns = Vec::with_capacity(metadata.columns.len());
        let mut seen = HashSet::new();
        let mut index = None;

        for column in metadata.columns {
            if column.field.is_empty() {
                return Err(invalid("column with an empty field name".to_string()));
            }
            if !seen.insert(column.field.clone()) {
                return Err(invalid(format!("duplicate column '{}'", column.field)));
            }

            let kind = ColumnKind::from_str(&column.kind)
                .map_err(|e| invalid(format!("column '{}': {}", column.field, e)))?;

            let strict = match column.strict {
                Value::Bool(strict) => strict,
                other => {
                    return Err(invalid(format!(
                        "column '{}': strict is not a boolean ({})",
                        column.field, other
                    )))
                }
            };

            let relation = match (kind, column.relation) {
                (ColumnKind::Entity, Some(relation)) => Some(Relation {
                    target: relation.target,
                    multiple: relation.multiple,
                    ignore_unresolved: relation.ignore_errors,
                }),
                (ColumnKind::Entity, None) => {
                    return Err(invalid(format!(
                        "entity column '{}' does not name its target",
                        column.field
                    )))
                }
                (_, Some(_)) => {
                    return Err(invalid(format!(
                        "column '{}' of type {} cannot declare a relation",
                        column.field, kind
                    )))
                }
                (_, None) => None,
            };

            if column.index {
                if index.is_some() {
                    return Err(invalid("more than one index column".to_string()));
                }
                if kind != ColumnKind::String {
                    return Err(invalid(format!(
                        "index column '{}' must be of type string",
                        column.field
                    )));
                }
                index = Some(columns.len());
            }

            let attribute = column.attribute.unwrap_or_else(|| column.field.clone());
            columns.push(ColumnDescriptor {
                field: column.field,
                attribute,
                kind,
                strict,
                relation,
            });
        }

        Ok(Self {
            entity: entity.to_string(),
            dn,
            object_classes: metadata.object_classes,
            columns,
            index,
        })
    }

    /// Entity name this schema describes.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// DN template relative to the client base DN.
    pub fn dn_template(&self) -> &str {
        &self.dn
    }

    /// Default object classes.
    pub fn object_classes(&self) -> &[String] {
        &self.object_classes
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Find a column by field name.
    pub fn column(&self, field: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.field == field)
    }

    /// Find a column by physical attribute name (case-insensitive).
    pub fn column_by_attribute(&self, attribute: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.attribute.eq_ignore_ascii_case(attribute))
    }

    /// The column `find` looks entries up by.
    pub fn index_column(&self) -> Option<&ColumnDescriptor> {
        self.index.map(|i| &self.columns[i])
    }

    /// Index column, or an error naming the entity.
    pub fn require_index(&self) -> EntityResult<&ColumnDescriptor> {
        self.index_column().ok_or_else(|| {
            EntityError::invalid_schema(&self.entity, "no index column is declared")
        })
    }

    /// Search base for this type under `base_dn`.
    pub fn search_base(&self, base_dn: &str) -> String {
        match (self.dn.is_empty(), base_dn.is_empty()) {
            (true, _) => base_dn.to_string(),
            (false, true) => self.dn.clone(),
            (false, false) => format!("{}{}{}", self.dn, DN_SEPARATOR, base_dn),
        }
    }

    /// RDN for an index value, e.g. `uid=mdubois`.
    pub fn rdn_for(&self, value: &str) -> EntityResult<String> {
        let index = self.require_index()?;
        Ok(format!("{}={}", index.attribute, escape_dn_value(value)))
    }

    /// Full DN of an entry of this type with the given index value.
    pub fn dn_for(&self, value: &str, base_dn: &str) -> EntityResult<String> {
        let rdn = self.rdn_for(value)?;
        let parent = self.search_base(base_dn);
        Ok(if parent.is_empty() {
            rdn
        } else {
            format!("{}{}{}", rdn, DN_SEPARATOR, parent)
        })
    }
}

/// Cache of validated schemas keyed by entity type.
///
/// Schemas are immutable once built, so one registry can be shared by every
/// manager in the process ([`SchemaRegistry::global`]). Failed builds are not
/// cached.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<TypeId, Arc<Schema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry.
    pub fn global() -> Arc<SchemaRegistry> {
        static GLOBAL: OnceLock<Arc<SchemaRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(SchemaRegistry::new())))
    }

    /// Get the schema of `T`, building it on first use.
    pub fn schema<T: Entity>(&self) -> EntityResult<Arc<Schema>> {
        let key = TypeId::of::<T>();

        if let Some(schema) = self.read_cache().get(&key) {
            return Ok(Arc::clone(schema));
        }

        let schema = Arc::new(Schema::build(T::entity_name(), T::metadata())?);
        debug!(
            entity = T::entity_name(),
            columns = schema.columns().len(),
            "Built entity schema"
        );

        let mut cache = self
            .schemas
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(Arc::clone(cache.entry(key).or_insert(schema)))
    }

    /// Number of cached schemas.
    pub fn len(&self) -> usize {
        self.read_cache().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TypeId, Arc<Schema>>> {
        self.schemas
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ColumnMetadata;

    fn people_metadata() -> EntityMetadata {
        EntityMetadata::new("ou=people")
            .with_object_classes(["inetOrgPerson", "top"])
            .with_column(ColumnMetadata::string("uid").index())
            .with_column(ColumnMetadata::string("cn"))
            .with_column(ColumnMetadata::array("telephoneNumber"))
    }

    #[test]
    fn test_build_valid_schema() {
        let schema = Schema::build("People", people_metadata()).unwrap();

        assert_eq!(schema.entity(), "People");
        assert_eq!(schema.columns().len(), 3);
        assert_eq!(schema.index_column().unwrap().field, "uid");
        assert_eq!(schema.column("telephoneNumber").unwrap().kind, ColumnKind::Array);
        assert!(schema.column("cn").unwrap().strict);
        assert_eq!(schema.object_classes(), &["inetOrgPerson", "top"]);
    }

    #[test]
    fn test_unknown_column_type() {
        let metadata = EntityMetadata::new("ou=people")
            .with_column(ColumnMetadata::new("uid", "integer"));
        let err = Schema::build("People", metadata).unwrap_err();

        assert_eq!(err.error_code(), "INVALID_SCHEMA");
        assert!(err.to_string().contains("'integer' is not a valid column type"));
    }

    #[test]
    fn test_strict_must_be_boolean() {
        let mut column = ColumnMetadata::string("uid");
        column.strict = Value::String("yes".to_string());
        let err = Schema::build("People", EntityMetadata::new("").with_column(column)).unwrap_err();

        assert!(err.to_string().contains("strict is not a boolean"));
    }

    #[test]
    fn test_dn_template_separator() {
        for dn in [",ou=people", "ou=people,"] {
            let err = Schema::build("People", EntityMetadata::new(dn)).unwrap_err();
            assert!(
                err.to_string().contains("must not start or end with a comma"),
                "{} should be rejected",
                dn
            );
        }
        assert!(Schema::build("People", EntityMetadata::new("ou=people,o=corp")).is_ok());
    }

    #[test]
    fn test_relation_consistency() {
        let mut missing = ColumnMetadata::new("member", "entity");
        missing.relation = None;
        assert!(Schema::build("Organisation", EntityMetadata::new("").with_column(missing)).is_err());

        let mut stray = ColumnMetadata::entity("member", "People");
        stray.kind = "array".to_string();
        assert!(Schema::build("Organisation", EntityMetadata::new("").with_column(stray)).is_err());

        let schema = Schema::build(
            "Organisation",
            EntityMetadata::new("ou=group")
                .with_column(ColumnMetadata::entity("member", "People").ignore_errors()),
        )
        .unwrap();
        let relation = schema.column("member").unwrap().relation.clone().unwrap();
        assert_eq!(relation.target, "People");
        assert!(relation.multiple);
        assert!(relation.ignore_unresolved);
    }

    #[test]
    fn test_index_rules() {
        let two = EntityMetadata::new("")
            .with_column(ColumnMetadata::string("uid").index())
            .with_column(ColumnMetadata::string("cn").index());
        assert!(Schema::build("People", two).is_err());

        let array = EntityMetadata::new("").with_column(ColumnMetadata::array("mail").index());
        assert!(Schema::build("People", array).is_err());

        let duplicate = EntityMetadata::new("")
            .with_column(ColumnMetadata::string("uid"))
            .with_column(ColumnMetadata::string("uid"));
        assert!(Schema::build("People", duplicate).is_err());
    }

    #[test]
    fn test_dn_building() {
        let schema = Schema::build("People", people_metadata()).unwrap();

        assert_eq!(
            schema.search_base("dc=example,dc=com"),
            "ou=people,dc=example,dc=com"
        );
        assert_eq!(
            schema.dn_for("mdubois", "dc=example,dc=com").unwrap(),
            "uid=mdubois,ou=people,dc=example,dc=com"
        );
        assert_eq!(schema.rdn_for("a,b").unwrap(), "uid=a\\,b");

        let flat = Schema::build(
            "People",
            EntityMetadata::new("").with_column(ColumnMetadata::string("uid").index()),
        )
        .unwrap();
        assert_eq!(
            flat.dn_for("x", "dc=example,dc=com").unwrap(),
            "uid=x,dc=example,dc=com"
        );
    }

    #[test]
    fn test_physical_attribute_name() {
        let schema = Schema::build(
            "People",
            EntityMetadata::new("")
                .with_column(ColumnMetadata::array("phones").attribute("telephoneNumber")),
        )
        .unwrap();

        let column = schema.column_by_attribute("telephonenumber").unwrap();
        assert_eq!(column.field, "phones");
        assert!(schema.require_index().is_err());
    }
}
