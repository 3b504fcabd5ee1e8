//! Entry ↔ entity conversion
//!
//! [`Hydrater::hydrate`] builds an entity from a directory entry and records
//! the entry as the entity's origin snapshot. [`Hydrater::dehydrate`] compares
//! an entity against that snapshot and yields the minimal
//! [`AttributeDelta`] to write back.
//!
//! Relation columns are resolved while hydrating. An entry met again while
//! its own relations are still being resolved is hydrated with its relations
//! left unloaded, so reference cycles terminate.

use tracing::debug;

use crate::client::{normalize_dn, same_dn};
use crate::entity::{ColumnValue, Entity, ObjectClasses, References};
use crate::error::{EntityError, EntityResult};
use crate::manager::EntityManager;
use crate::operation::{AttributeDelta, AttributeMap, DirectoryEntry, OBJECT_CLASS};
use crate::relation::RelationResolver;
use crate::schema::{ColumnDescriptor, ColumnKind, Schema};

/// Normalized DNs of the entries being hydrated, outermost first.
#[derive(Debug, Clone, Default)]
pub(crate) struct HydrationPath {
    dns: Vec<String>,
}

impl HydrationPath {
    pub(crate) fn contains(&self, dn: &str) -> bool {
        let dn = normalize_dn(dn);
        self.dns.iter().any(|d| *d == dn)
    }

    /// Path for the relations of the entry at `dn`.
    pub(crate) fn enter(&self, dn: &str) -> Self {
        let mut dns = self.dns.clone();
        dns.push(normalize_dn(dn));
        Self { dns }
    }

    pub(crate) fn depth(&self) -> usize {
        self.dns.len()
    }
}

/// Converts between directory entries and entities for one manager.
pub struct Hydrater<'a> {
    manager: &'a EntityManager,
    path: HydrationPath,
}

impl<'a> Hydrater<'a> {
    pub fn new(manager: &'a EntityManager) -> Self {
        Self::within(manager, HydrationPath::default())
    }

    pub(crate) fn within(manager: &'a EntityManager, path: HydrationPath) -> Self {
        Self { manager, path }
    }

    /// Build an entity from a directory entry.
    ///
    /// A missing attribute fails with [`EntityError::InvalidHydrate`] when its
    /// column is strict (see [`ManagerConfig::is_strict`]); otherwise the field
    /// gets its empty value. Relation columns are resolved through the
    /// manager's repositories.
    ///
    /// [`ManagerConfig::is_strict`]: crate::config::ManagerConfig::is_strict
    pub async fn hydrate<T: Entity>(&self, schema: &Schema, entry: DirectoryEntry) -> EntityResult<T> {
        let mut entity = T::default();
        let revisited = self.path.contains(&entry.dn);
        let resolver = RelationResolver::within(self.manager, self.path.enter(&entry.dn));
        let mut references = Vec::new();

        for column in schema.columns() {
            let values: Vec<String> = match entry
                .attributes
                .get_ignore_case(&column.attribute)
                .filter(|values| !values.is_empty())
            {
                Some(values) => values.to_vec(),
                None if self.manager.config().is_strict(column.strict) => {
                    return Err(EntityError::InvalidHydrate {
                        entity: schema.entity().to_string(),
                        attribute: column.attribute.clone(),
                    });
                }
                None => {
                    debug!(
                        entity = schema.entity(),
                        attribute = %column.attribute,
                        "Attribute missing, leaving field empty"
                    );
                    Vec::new()
                }
            };

            let value = match column.kind {
                ColumnKind::String => {
                    ColumnValue::String(values.into_iter().next().unwrap_or_default())
                }
                ColumnKind::Array => ColumnValue::Array(values),
                ColumnKind::Entity if revisited => {
                    debug!(
                        entity = schema.entity(),
                        dn = %entry.dn,
                        attribute = %column.attribute,
                        depth = self.path.depth(),
                        "Reference cycle, leaving relation unloaded"
                    );
                    references.push((
                        column.field.clone(),
                        References {
                            read: values,
                            resolved: Vec::new(),
                        },
                    ));
                    ColumnValue::Entities(Vec::new())
                }
                ColumnKind::Entity => {
                    let entities = resolver.resolve_column(schema, column, &values).await?;
                    let resolved = entities
                        .iter()
                        .filter_map(|e| e.entity_dn().map(str::to_string))
                        .collect();
                    references.push((
                        column.field.clone(),
                        References {
                            read: values,
                            resolved,
                        },
                    ));
                    ColumnValue::Entities(entities)
                }
            };

            entity
                .write_column(&column.field, value)
                .map_err(|e| name_field(e, &column.field))?;
        }

        let mut object_classes: ObjectClasses = entry
            .attributes
            .get_ignore_case(OBJECT_CLASS)
            .unwrap_or_default()
            .iter()
            .cloned()
            .collect();
        object_classes.ensure(schema.object_classes().iter().cloned());

        let core = entity.core_mut();
        core.set_object_classes(object_classes);
        core.set_dn(entry.dn);
        core.set_origin(entry.attributes);
        for (field, refs) in references {
            core.set_references(field, refs);
        }

        Ok(entity)
    }

    /// Current attribute values of an entity, object classes included.
    ///
    /// Empty values are dropped and empty attributes are left out. A
    /// relation field still holding exactly the entities it was hydrated with
    /// yields the DNs as read, including those that did not resolve.
    pub fn attributes_of<T: Entity>(schema: &Schema, entity: &T) -> AttributeMap {
        let mut attributes = AttributeMap::new();

        for column in schema.columns() {
            let values = column_values(column, entity);
            if !values.is_empty() {
                attributes.set(column.attribute.clone(), values);
            }
        }

        let mut object_classes = entity.object_classes().clone();
        object_classes.ensure(schema.object_classes().iter().cloned());
        if !object_classes.is_empty() {
            attributes.set(OBJECT_CLASS, object_classes.to_vec());
        }

        attributes
    }

    /// Changes needed to bring the directory entry in line with the entity.
    ///
    /// Without an origin snapshot every present attribute is an *add*.
    /// Otherwise each mapped attribute (and `objectClass`) is compared with
    /// the snapshot: absent before → *add*, absent now → *delete*, different
    /// values → *replace* with the full new value list. Value order matters.
    pub fn dehydrate<T: Entity>(schema: &Schema, entity: &T) -> AttributeDelta {
        let current = Self::attributes_of(schema, entity);
        diff(schema, entity.core().origin(), &current)
    }

    /// Record the relation values just written as the new reference baseline.
    pub(crate) fn track_references<T: Entity>(schema: &Schema, entity: &mut T) {
        for column in schema.columns() {
            if column.kind != ColumnKind::Entity {
                continue;
            }
            let references = References {
                read: column_values(column, entity),
                resolved: entity.read_column(&column.field),
            };
            entity.core_mut().set_references(column.field.clone(), references);
        }
    }
}

fn column_values<T: Entity>(column: &ColumnDescriptor, entity: &T) -> Vec<String> {
    let mut values = entity.read_column(&column.field);
    if column.kind == ColumnKind::Entity {
        if let Some(refs) = entity.core().references(&column.field) {
            if same_values(&refs.resolved, &values, Matching::Dn) {
                values = refs.read.clone();
            }
        }
    }
    values.retain(|v| !v.is_empty());
    if column.kind == ColumnKind::String {
        values.truncate(1);
    }
    values
}

/// How two attribute values are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Matching {
    Exact,
    IgnoreCase,
    Dn,
}

impl Matching {
    fn for_column(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Entity => Matching::Dn,
            ColumnKind::String | ColumnKind::Array => Matching::Exact,
        }
    }

    fn same(self, a: &str, b: &str) -> bool {
        match self {
            Matching::Exact => a == b,
            Matching::IgnoreCase => a.eq_ignore_ascii_case(b),
            Matching::Dn => same_dn(a, b),
        }
    }
}

/// Compute the delta from `origin` to `current` over the schema's attributes.
pub fn diff(schema: &Schema, origin: Option<&AttributeMap>, current: &AttributeMap) -> AttributeDelta {
    let mut delta = AttributeDelta::new();

    let attributes = schema
        .columns()
        .iter()
        .map(|c| (c.attribute.as_str(), Matching::for_column(c.kind)))
        .chain(std::iter::once((OBJECT_CLASS, Matching::IgnoreCase)));

    for (attribute, matching) in attributes {
        let now = current.get_ignore_case(attribute).filter(|v| !v.is_empty());
        let before = origin
            .and_then(|o| o.get_ignore_case(attribute))
            .filter(|v| !v.is_empty());

        match (before, now) {
            (None, Some(now)) => {
                delta.add(attribute, now.iter().cloned());
            }
            (Some(_), None) => {
                delta.clear_attribute(attribute);
            }
            (Some(before), Some(now)) if !same_values(before, now, matching) => {
                delta.replace(attribute, now.iter().cloned());
            }
            _ => {}
        }
    }

    delta
}

fn same_values(before: &[String], now: &[String], matching: Matching) -> bool {
    before.len() == now.len() && before.iter().zip(now).all(|(a, b)| matching.same(a, b))
}

fn name_field(error: EntityError, field: &str) -> EntityError {
    match error {
        EntityError::InvalidValue { field: f, message } if f.is_empty() => {
            EntityError::invalid_value(field, message)
        }
        other => other,
    }
}
