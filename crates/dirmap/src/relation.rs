//! Relation resolution
//!
//! Entity columns hold DNs. The resolver loads the referenced entries through
//! the manager's repository for the target type, keeping reference order.
//! Loading is eager and stops at entries already being hydrated further up
//! the chain.

use async_trait::async_trait;
use std::marker::PhantomData;
use tracing::{debug, warn};

use crate::entity::{AnyEntity, Entity};
use crate::error::{EntityError, EntityResult};
use crate::hydrate::HydrationPath;
use crate::manager::EntityManager;
use crate::schema::{ColumnDescriptor, Schema};

/// Loads one entity of a registered type by DN.
///
/// Relations name their target by entity name, so the manager keeps one
/// loader per registered type and looks it up by that name.
#[async_trait]
pub(crate) trait EntityLoader: Send + Sync {
    async fn load(
        &self,
        manager: &EntityManager,
        dn: &str,
        path: &HydrationPath,
    ) -> EntityResult<Option<Box<dyn AnyEntity>>>;
}

pub(crate) struct TypedLoader<T>(PhantomData<fn() -> T>);

impl<T> TypedLoader<T> {
    pub(crate) fn new() -> Self {
        Self(PhantomData)
    }
}

#[async_trait]
impl<T: Entity> EntityLoader for TypedLoader<T> {
    async fn load(
        &self,
        manager: &EntityManager,
        dn: &str,
        path: &HydrationPath,
    ) -> EntityResult<Option<Box<dyn AnyEntity>>> {
        let found = manager
            .get_repository::<T>()?
            .find_by_dn_within(dn, path.clone())
            .await?;
        Ok(found.map(|entity| Box::new(entity) as Box<dyn AnyEntity>))
    }
}

/// Resolves DN references into entities.
pub struct RelationResolver<'a> {
    manager: &'a EntityManager,
    path: HydrationPath,
}

impl<'a> RelationResolver<'a> {
    pub fn new(manager: &'a EntityManager) -> Self {
        Self::within(manager, HydrationPath::default())
    }

    pub(crate) fn within(manager: &'a EntityManager, path: HydrationPath) -> Self {
        Self { manager, path }
    }

    /// Load the entity of type `target` stored at `dn`.
    pub async fn resolve(&self, target: &str, dn: &str) -> EntityResult<Box<dyn AnyEntity>> {
        self.manager
            .loader(target)?
            .load(self.manager, dn, &self.path)
            .await?
            .ok_or_else(|| EntityError::BadRelation {
                entity: target.to_string(),
                attribute: "dn".to_string(),
                dn: dn.to_string(),
            })
    }

    /// Load the entities of type `target` stored at `dns`, in order.
    ///
    /// With `ignore_unresolved`, DNs that do not resolve are skipped;
    /// otherwise the first one fails the whole call.
    pub async fn resolve_many(
        &self,
        target: &str,
        dns: &[String],
        ignore_unresolved: bool,
    ) -> EntityResult<Vec<Box<dyn AnyEntity>>> {
        let mut resolved = Vec::with_capacity(dns.len());
        for dn in dns {
            match self.resolve(target, dn).await {
                Ok(entity) => resolved.push(entity),
                Err(EntityError::BadRelation { .. }) if ignore_unresolved => {
                    warn!(entity = target, dn = %dn, "Ignoring unresolvable reference");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(resolved)
    }

    /// Resolve the DNs of an entity column of `owner`.
    ///
    /// Single-valued relations stop at the first resolved entity.
    pub(crate) async fn resolve_column(
        &self,
        owner: &Schema,
        column: &ColumnDescriptor,
        dns: &[String],
    ) -> EntityResult<Vec<Box<dyn AnyEntity>>> {
        let relation = column.relation.as_ref().ok_or_else(|| {
            EntityError::invalid_schema(
                owner.entity(),
                format!("entity column '{}' does not name its target", column.field),
            )
        })?;
        if dns.is_empty() {
            return Ok(Vec::new());
        }

        let loader = self.manager.loader(&relation.target)?;
        let mut resolved = Vec::new();

        for dn in dns {
            match loader.load(self.manager, dn, &self.path).await? {
                Some(entity) => {
                    resolved.push(entity);
                    if !relation.multiple {
                        break;
                    }
                }
                None if relation.ignore_unresolved => {
                    warn!(
                        entity = owner.entity(),
                        attribute = %column.attribute,
                        dn = %dn,
                        "Ignoring unresolvable reference"
                    );
                }
                None => {
                    return Err(EntityError::BadRelation {
                        entity: owner.entity().to_string(),
                        attribute: column.attribute.clone(),
                        dn: dn.clone(),
                    });
                }
            }
        }

        debug!(
            entity = owner.entity(),
            attribute = %column.attribute,
            referenced = dns.len(),
            resolved = resolved.len(),
            "Resolved relation"
        );
        Ok(resolved)
    }
}
