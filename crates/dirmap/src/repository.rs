//! Typed lookups
//!
//! A [`Repository`] searches under its type's base and hydrates the entries
//! it finds. Obtain one with
//! [`EntityManager::get_repository`](crate::manager::EntityManager::get_repository).

use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::entity::Entity;
use crate::error::{DirectoryError, EntityError, EntityResult};
use crate::hydrate::{HydrationPath, Hydrater};
use crate::manager::EntityManager;
use crate::operation::{DirectoryEntry, Filter, SearchScope, OBJECT_CLASS};
use crate::schema::Schema;

/// Lookups for entities of type `T`.
pub struct Repository<'a, T> {
    manager: &'a EntityManager,
    schema: Arc<Schema>,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Entity> Repository<'a, T> {
    pub(crate) fn new(manager: &'a EntityManager, schema: Arc<Schema>) -> Self {
        Self {
            manager,
            schema,
            _marker: PhantomData,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Find the one entity whose index column equals `id`.
    ///
    /// Fails with [`EntityError::NotFound`] when nothing matches and with
    /// [`EntityError::MultipleResults`] when more than one entry does.
    #[instrument(skip(self), fields(entity = T::entity_name()))]
    pub async fn find(&self, id: &str) -> EntityResult<T> {
        let index = self.schema.require_index()?;
        let mut entries = self
            .search(Filter::eq(index.attribute.clone(), id))
            .await?;

        match entries.len() {
            0 => Err(EntityError::NotFound {
                entity: T::entity_name().to_string(),
                attribute: index.attribute.clone(),
                value: id.to_string(),
            }),
            1 => {
                let entry = entries.remove(0);
                self.hydrater().hydrate(&self.schema, entry).await
            }
            count => Err(EntityError::MultipleResults {
                entity: T::entity_name().to_string(),
                attribute: index.attribute.clone(),
                value: id.to_string(),
                count,
            }),
        }
    }

    /// Find every entity matching all `(field, value)` pairs.
    ///
    /// Results keep the order the directory returned them in. An empty
    /// filter list returns every entity under the type's base.
    #[instrument(skip(self), fields(entity = T::entity_name()))]
    pub async fn find_by(&self, filters: &[(&str, &str)]) -> EntityResult<Vec<T>> {
        let mut conditions = Vec::with_capacity(filters.len());
        for (field, value) in filters {
            let column = self.schema.column(field).ok_or_else(|| {
                EntityError::invalid_value(
                    *field,
                    format!("{} has no such column", T::entity_name()),
                )
            })?;
            conditions.push(Filter::eq(column.attribute.clone(), *value));
        }
        let filter = if conditions.is_empty() {
            Filter::present(OBJECT_CLASS)
        } else {
            Filter::and(conditions)
        };

        let entries = self.search(filter).await?;
        let hydrater = self.hydrater();
        let mut entities = Vec::with_capacity(entries.len());
        for entry in entries {
            entities.push(hydrater.hydrate(&self.schema, entry).await?);
        }
        Ok(entities)
    }

    /// Load the entity stored at `dn`, if any.
    pub async fn find_by_dn(&self, dn: &str) -> EntityResult<Option<T>> {
        self.find_by_dn_within(dn, HydrationPath::default()).await
    }

    /// [`find_by_dn`](Self::find_by_dn) for a relation of an entry on `path`.
    pub(crate) async fn find_by_dn_within(
        &self,
        dn: &str,
        path: HydrationPath,
    ) -> EntityResult<Option<T>> {
        let filter = self.with_class_filter(Filter::present(OBJECT_CLASS));
        let entries = match self
            .manager
            .client()
            .search(dn, SearchScope::Base, &filter)
            .await
        {
            Ok(entries) => entries,
            Err(DirectoryError::NoSuchEntry { .. }) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        match entries.into_iter().next() {
            Some(entry) => {
                let hydrater = Hydrater::within(self.manager, path);
                Ok(Some(hydrater.hydrate(&self.schema, entry).await?))
            }
            None => {
                debug!(entity = T::entity_name(), dn, "No entry at DN");
                Ok(None)
            }
        }
    }

    async fn search(&self, filter: Filter) -> EntityResult<Vec<DirectoryEntry>> {
        let client = self.manager.client();
        let base = self.schema.search_base(client.base_dn());
        let filter = self.with_class_filter(filter);

        let entries = client.search(&base, SearchScope::Subtree, &filter).await?;
        debug!(
            entity = T::entity_name(),
            base = %base,
            count = entries.len(),
            "Search completed"
        );
        Ok(entries)
    }

    /// Restrict a filter to entries carrying the type's default object classes.
    fn with_class_filter(&self, filter: Filter) -> Filter {
        self.schema
            .object_classes()
            .iter()
            .fold(filter, |filter, class| {
                filter.and_with(Filter::eq(OBJECT_CLASS, class.clone()))
            })
    }

    fn hydrater(&self) -> Hydrater<'a> {
        Hydrater::new(self.manager)
    }
}
