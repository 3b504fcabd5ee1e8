//! Entity contract
//!
//! A mapped domain object is a plain struct that embeds an [`EntityCore`]
//! and implements [`Entity`] to expose its columns by field name.
//!
//! ```ignore
//! #[derive(Debug, Default)]
//! pub struct People {
//!     core: EntityCore,
//!     uid: String,
//!     telephone_number: Vec<String>,
//! }
//!
//! impl Entity for People {
//!     fn entity_name() -> &'static str {
//!         "People"
//!     }
//!
//!     fn metadata() -> EntityMetadata {
//!         EntityMetadata::new("ou=people")
//!             .with_object_classes(["inetOrgPerson", "top"])
//!             .with_column(ColumnMetadata::string("uid").index())
//!             .with_column(ColumnMetadata::array("telephoneNumber"))
//!     }
//!
//!     fn core(&self) -> &EntityCore { &self.core }
//!     fn core_mut(&mut self) -> &mut EntityCore { &mut self.core }
//!
//!     fn read_column(&self, field: &str) -> Vec<String> {
//!         match field {
//!             "uid" => vec![self.uid.clone()],
//!             "telephoneNumber" => self.telephone_number.clone(),
//!             _ => Vec::new(),
//!         }
//!     }
//!
//!     fn write_column(&mut self, field: &str, value: ColumnValue) -> EntityResult<()> {
//!         match field {
//!             "uid" => self.uid = value.into_string()?,
//!             "telephoneNumber" => self.telephone_number = value.into_array()?,
//!             _ => {}
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::error::{EntityError, EntityResult};
use crate::metadata::EntityMetadata;
use crate::operation::AttributeMap;

/// Ordered, duplicate-free set of object class names.
///
/// Names compare case-insensitively, as the directory does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectClasses {
    classes: Vec<String>,
}

impl ObjectClasses {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a class at the end, unless already present. Returns whether it was added.
    pub fn add(&mut self, class: impl Into<String>) -> bool {
        let class = class.into();
        if self.contains(&class) {
            return false;
        }
        self.classes.push(class);
        true
    }

    /// Remove a class. Returns whether it was present.
    pub fn remove(&mut self, class: &str) -> bool {
        let before = self.classes.len();
        self.classes.retain(|c| !c.eq_ignore_ascii_case(class));
        self.classes.len() != before
    }

    /// Check if a class is present.
    pub fn contains(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c.eq_ignore_ascii_case(class))
    }

    /// Append every class of `defaults` that is missing.
    pub fn ensure<I, S>(&mut self, defaults: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for class in defaults {
            self.add(class);
        }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.classes.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.classes
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.classes.clone()
    }
}

impl<S: Into<String>> FromIterator<S> for ObjectClasses {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut classes = ObjectClasses::new();
        classes.ensure(iter);
        classes
    }
}

/// DNs a relation column held when last read or written, next to the DNs
/// of the entities they resolved to.
///
/// While the field still holds exactly the resolved entities, the column is
/// written back as `read`, so references that were skipped on load survive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct References {
    pub(crate) read: Vec<String>,
    pub(crate) resolved: Vec<String>,
}

/// State every entity carries besides its mapped fields.
#[derive(Debug, Clone, Default)]
pub struct EntityCore {
    dn: Option<String>,
    origin: Option<AttributeMap>,
    object_classes: ObjectClasses,
    references: HashMap<String, References>,
}

impl EntityCore {
    /// Core of a transient entity of type `T`, seeded with its default object classes.
    pub fn for_entity<T: Entity>() -> Self {
        Self {
            dn: None,
            origin: None,
            object_classes: T::metadata().object_classes.into_iter().collect(),
            references: HashMap::new(),
        }
    }

    /// DN, once the entity has been read from or written to the directory.
    pub fn dn(&self) -> Option<&str> {
        self.dn.as_deref()
    }

    /// Attributes as last read from or written to the directory.
    pub fn origin(&self) -> Option<&AttributeMap> {
        self.origin.as_ref()
    }

    pub fn object_classes(&self) -> &ObjectClasses {
        &self.object_classes
    }

    pub fn object_classes_mut(&mut self) -> &mut ObjectClasses {
        &mut self.object_classes
    }

    pub(crate) fn set_dn(&mut self, dn: impl Into<String>) {
        self.dn = Some(dn.into());
    }

    pub(crate) fn set_origin(&mut self, origin: AttributeMap) {
        self.origin = Some(origin);
    }

    pub(crate) fn set_object_classes(&mut self, classes: ObjectClasses) {
        self.object_classes = classes;
    }

    pub(crate) fn references(&self, field: &str) -> Option<&References> {
        self.references.get(field)
    }

    pub(crate) fn set_references(&mut self, field: impl Into<String>, references: References) {
        self.references.insert(field.into(), references);
    }

    /// Forget the DN and snapshot after the entry was deleted.
    pub(crate) fn detach(&mut self) {
        self.dn = None;
        self.origin = None;
        self.references.clear();
    }
}

/// A domain object mapped onto directory entries.
pub trait Entity: Default + Send + Sync + 'static {
    /// Name relations use to reference this type.
    fn entity_name() -> &'static str;

    /// Mapping description, validated once by the schema registry.
    fn metadata() -> EntityMetadata;

    fn core(&self) -> &EntityCore;

    fn core_mut(&mut self) -> &mut EntityCore;

    /// Current values of a field, as attribute values.
    ///
    /// Empty means absent. Relation fields return the DNs of the referenced
    /// entities (see [`dns_of`]).
    fn read_column(&self, field: &str) -> Vec<String>;

    /// Store a hydrated value into a field.
    fn write_column(&mut self, field: &str, value: ColumnValue) -> EntityResult<()>;

    fn dn(&self) -> Option<&str> {
        self.core().dn()
    }

    fn object_classes(&self) -> &ObjectClasses {
        self.core().object_classes()
    }

    /// Add an object class (chainable).
    fn add_object_class(&mut self, class: impl Into<String>) -> &mut Self {
        self.core_mut().object_classes_mut().add(class);
        self
    }

    /// Remove an object class (chainable).
    ///
    /// The type's default object classes stay: repositories only find
    /// entries that carry them.
    fn remove_object_class(&mut self, class: &str) -> &mut Self {
        let is_default = Self::metadata()
            .object_classes
            .iter()
            .any(|c| c.eq_ignore_ascii_case(class));
        if is_default {
            warn!(
                entity = Self::entity_name(),
                class, "Default object class cannot be removed"
            );
        } else {
            self.core_mut().object_classes_mut().remove(class);
        }
        self
    }

    /// Whether this instance was read from or written to the directory.
    fn is_managed(&self) -> bool {
        self.core().origin().is_some()
    }
}

/// Type-erased entity, used to hand resolved relations to their owner.
pub trait AnyEntity: Send + Sync + 'static {
    fn type_name(&self) -> &'static str;

    fn entity_dn(&self) -> Option<&str>;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<T: Entity> AnyEntity for T {
    fn type_name(&self) -> &'static str {
        T::entity_name()
    }

    fn entity_dn(&self) -> Option<&str> {
        self.core().dn()
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

impl fmt::Debug for dyn AnyEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.type_name())
            .field("dn", &self.entity_dn())
            .finish()
    }
}

/// A hydrated column value on its way into an entity field.
#[derive(Debug)]
pub enum ColumnValue {
    /// Single value (empty when absent).
    String(String),
    /// Ordered values.
    Array(Vec<String>),
    /// Resolved related entities, in reference order.
    Entities(Vec<Box<dyn AnyEntity>>),
}

impl ColumnValue {
    fn kind(&self) -> &'static str {
        match self {
            ColumnValue::String(_) => "string",
            ColumnValue::Array(_) => "array",
            ColumnValue::Entities(_) => "entity",
        }
    }

    /// Take a single string value.
    pub fn into_string(self) -> EntityResult<String> {
        match self {
            ColumnValue::String(value) => Ok(value),
            ColumnValue::Array(values) => Ok(values.into_iter().next().unwrap_or_default()),
            other => Err(EntityError::invalid_value(
                "",
                format!("expected a string, got {}", other.kind()),
            )),
        }
    }

    /// Take ordered string values.
    pub fn into_array(self) -> EntityResult<Vec<String>> {
        match self {
            ColumnValue::Array(values) => Ok(values),
            ColumnValue::String(value) if value.is_empty() => Ok(Vec::new()),
            ColumnValue::String(value) => Ok(vec![value]),
            other => Err(EntityError::invalid_value(
                "",
                format!("expected an array, got {}", other.kind()),
            )),
        }
    }

    /// Take the related entities, downcast to `T`.
    pub fn into_entities<T: Entity>(self) -> EntityResult<Vec<T>> {
        match self {
            ColumnValue::Entities(entities) => entities.into_iter().map(downcast::<T>).collect(),
            other => Err(EntityError::invalid_value(
                "",
                format!("expected {} entities, got {}", T::entity_name(), other.kind()),
            )),
        }
    }

    /// Take the first related entity, downcast to `T`.
    pub fn into_entity<T: Entity>(self) -> EntityResult<Option<T>> {
        Ok(self.into_entities::<T>()?.into_iter().next())
    }
}

fn downcast<T: Entity>(entity: Box<dyn AnyEntity>) -> EntityResult<T> {
    let found = entity.type_name();
    entity
        .into_any()
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| {
            EntityError::invalid_value(
                "",
                format!("expected a {} entity, got {}", T::entity_name(), found),
            )
        })
}

/// DNs of related entities, for [`Entity::read_column`].
///
/// Entities that were never written to the directory have no DN and cannot
/// be referenced; they are left out.
pub fn dns_of<'a, T, I>(entities: I) -> Vec<String>
where
    T: Entity,
    I: IntoIterator<Item = &'a T>,
{
    entities
        .into_iter()
        .filter_map(|entity| match entity.dn() {
            Some(dn) => Some(dn.to_string()),
            None => {
                warn!(
                    entity = T::entity_name(),
                    "Skipping reference to an entity without DN"
                );
                None
            }
        })
        .collect()
}

/// Shared handle to an entity scheduled in a unit of work.
///
/// The entity manager updates the DN and origin snapshot through this handle
/// once a flush has written the entity.
pub struct Managed<T> {
    inner: Arc<RwLock<T>>,
}

impl<T: Entity> Managed<T> {
    pub fn new(entity: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(entity)),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write().await
    }

    /// Whether both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Managed<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl<T> Clone for Managed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity> From<T> for Managed<T> {
    fn from(entity: T) -> Self {
        Managed::new(entity)
    }
}

/// Values [`EntityManager::persist`] and [`EntityManager::remove`] accept: a
/// plain entity, which gets a fresh handle, or an existing handle.
///
/// [`EntityManager::persist`]: crate::manager::EntityManager::persist
/// [`EntityManager::remove`]: crate::manager::EntityManager::remove
pub trait IntoManaged {
    type Entity: Entity;

    fn into_managed(self) -> Managed<Self::Entity>;
}

impl<T: Entity> IntoManaged for T {
    type Entity = T;

    fn into_managed(self) -> Managed<T> {
        Managed::new(self)
    }
}

impl<T: Entity> IntoManaged for Managed<T> {
    type Entity = T;

    fn into_managed(self) -> Managed<T> {
        self
    }
}

impl<T> fmt::Debug for Managed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Managed")
            .field("ptr", &Arc::as_ptr(&self.inner))
            .finish()
    }
}
