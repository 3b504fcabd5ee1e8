//! Unit of work
//!
//! [`EntityManager`] schedules entity writes with [`persist`] and [`remove`]
//! and applies them with [`flush`], one directory operation per entity, in
//! the order they were scheduled.
//!
//! The directory has no multi-operation transaction. When the Nth write of a
//! flush fails, the writes before it stay committed (their snapshots have
//! advanced and they leave the queue) while the failing write and everything
//! after it stay queued for the next flush.
//!
//! [`persist`]: EntityManager::persist
//! [`remove`]: EntityManager::remove
//! [`flush`]: EntityManager::flush

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::client::DirectoryClient;
use crate::config::{self, ManagerConfig};
use crate::entity::{Entity, IntoManaged, Managed};
use crate::error::{EntityError, EntityResult, WriteKind};
use crate::hydrate::Hydrater;
use crate::operation::OBJECT_CLASS;
use crate::relation::{EntityLoader, TypedLoader};
use crate::repository::Repository;
use crate::schema::{Schema, SchemaRegistry};

/// What a flush does with a scheduled entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Persist,
    Remove,
}

/// Counts of the directory writes a flush issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub created: usize,
    pub modified: usize,
    pub renamed: usize,
    pub deleted: usize,
    /// Scheduled entities that needed no write.
    pub unchanged: usize,
}

impl FlushSummary {
    /// Number of scheduled entities that reached the directory.
    pub fn writes(&self) -> usize {
        self.created + self.modified + self.renamed + self.deleted
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Modified => self.modified += 1,
            Outcome::Renamed => self.renamed += 1,
            Outcome::Deleted => self.deleted += 1,
            Outcome::Unchanged => self.unchanged += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Created,
    Modified,
    Renamed,
    Deleted,
    Unchanged,
}

/// A scheduled entity of any registered type.
#[async_trait]
trait Tracked: Send + Sync {
    fn id(&self) -> usize;

    async fn apply(&self, manager: &EntityManager, action: Action) -> EntityResult<Outcome>;
}

#[async_trait]
impl<T: Entity> Tracked for Managed<T> {
    fn id(&self) -> usize {
        Managed::id(self)
    }

    async fn apply(&self, manager: &EntityManager, action: Action) -> EntityResult<Outcome> {
        let schema = manager.schema::<T>()?;
        let mut entity = self.write().await;
        match action {
            Action::Persist if entity.is_managed() => manager.update(&schema, &mut *entity).await,
            Action::Persist => manager.create(&schema, &mut *entity).await,
            Action::Remove => manager.delete(&mut *entity).await,
        }
    }
}

struct Scheduled {
    action: Action,
    /// DN at scheduling time, for duplicate detection.
    dn: Option<String>,
    entity: Box<dyn Tracked>,
}

/// Repository factory and unit of work over one directory client.
pub struct EntityManager {
    client: Arc<dyn DirectoryClient>,
    config: ManagerConfig,
    schemas: Arc<SchemaRegistry>,
    loaders: RwLock<HashMap<&'static str, Arc<dyn EntityLoader>>>,
    queue: Mutex<VecDeque<Scheduled>>,
}

impl EntityManager {
    /// Create a manager with the default configuration and the process-wide
    /// schema registry.
    pub fn new(client: Arc<dyn DirectoryClient>) -> Self {
        Self::with_config(client, ManagerConfig::default())
    }

    pub fn with_config(client: Arc<dyn DirectoryClient>, config: ManagerConfig) -> Self {
        Self {
            client,
            config,
            schemas: SchemaRegistry::global(),
            loaders: RwLock::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Use a dedicated schema registry instead of the process-wide one.
    #[must_use]
    pub fn with_schema_registry(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn client(&self) -> &dyn DirectoryClient {
        self.client.as_ref()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Tolerate missing attributes in every manager of the process.
    pub fn disable_strict_mode() {
        config::disable_strict_mode();
    }

    /// Restore per-column strictness in every manager of the process.
    pub fn enable_strict_mode() {
        config::enable_strict_mode();
    }

    /// Validated schema of `T`.
    pub fn schema<T: Entity>(&self) -> EntityResult<Arc<Schema>> {
        self.schemas.schema::<T>()
    }

    /// Make `T` available as a relation target.
    ///
    /// Validates the schema of `T`. Registering twice is harmless.
    pub fn register<T: Entity>(&self) -> EntityResult<()> {
        self.schema::<T>()?;

        let mut loaders = self
            .loaders
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loaders.entry(T::entity_name()).or_insert_with(|| {
            debug!(entity = T::entity_name(), "Registered entity type");
            Arc::new(TypedLoader::<T>::new())
        });
        Ok(())
    }

    /// Repository for `T`, registering `T` on first use.
    pub fn get_repository<T: Entity>(&self) -> EntityResult<Repository<'_, T>> {
        self.register::<T>()?;
        Ok(Repository::new(self, self.schema::<T>()?))
    }

    /// Hydrater bound to this manager's client and strictness.
    pub fn hydrater(&self) -> Hydrater<'_> {
        Hydrater::new(self)
    }

    pub(crate) fn loader(&self, name: &str) -> EntityResult<Arc<dyn EntityLoader>> {
        self.loaders
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| EntityError::UnknownEntityType {
                name: name.to_string(),
            })
    }

    /// Schedule an entity to be created or updated by the next flush.
    ///
    /// Returns the handle the flush writes through; keep it to observe the DN
    /// and snapshot the flush assigns. Scheduling the same handle twice is a
    /// no-op. Scheduling a different instance with the DN of one already
    /// queued fails with [`EntityError::DuplicateEntity`].
    pub async fn persist<E: IntoManaged>(&self, entity: E) -> EntityResult<Managed<E::Entity>> {
        let handle = entity.into_managed();
        self.schedule(handle.clone(), Action::Persist).await?;
        Ok(handle)
    }

    /// Schedule an entity to be deleted by the next flush.
    pub async fn remove<E: IntoManaged>(&self, entity: E) -> EntityResult<Managed<E::Entity>> {
        let handle = entity.into_managed();
        self.schedule(handle.clone(), Action::Remove).await?;
        Ok(handle)
    }

    /// Number of scheduled entities not yet written.
    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    async fn schedule<T: Entity>(&self, handle: Managed<T>, action: Action) -> EntityResult<()> {
        self.register::<T>()?;
        let dn = handle.read().await.dn().map(str::to_string);

        let mut queue = self.queue.lock().await;
        if let Some(last) = queue.iter().rev().find(|s| s.entity.id() == handle.id()) {
            if last.action == action {
                debug!(entity = T::entity_name(), ?action, "Already scheduled");
                return Ok(());
            }
        }
        if let Some(dn) = &dn {
            let taken = queue
                .iter()
                .any(|s| s.entity.id() != handle.id() && s.dn.as_deref() == Some(dn.as_str()));
            if taken {
                return Err(EntityError::DuplicateEntity { dn: dn.clone() });
            }
        }

        debug!(entity = T::entity_name(), ?action, dn = ?dn, "Scheduled");
        queue.push_back(Scheduled {
            action,
            dn,
            entity: Box::new(handle),
        });
        Ok(())
    }

    /// Write every scheduled entity, in scheduling order.
    ///
    /// Stops at the first failure with [`EntityError::Flush`]; see the module
    /// documentation for what stays queued.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> EntityResult<FlushSummary> {
        let mut queue = self.queue.lock().await;
        let mut summary = FlushSummary::default();

        while let Some(next) = queue.front() {
            let result = next.entity.apply(self, next.action).await;
            match result {
                Ok(outcome) => {
                    summary.record(outcome);
                    queue.pop_front();
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        applied = summary.writes() + summary.unchanged,
                        remaining = queue.len(),
                        "Flush interrupted"
                    );
                    return Err(e);
                }
            }
        }

        info!(
            created = summary.created,
            modified = summary.modified,
            renamed = summary.renamed,
            deleted = summary.deleted,
            unchanged = summary.unchanged,
            "Flush completed"
        );
        Ok(summary)
    }

    async fn create<T: Entity>(&self, schema: &Schema, entity: &mut T) -> EntityResult<Outcome> {
        let attributes = Hydrater::attributes_of(schema, entity);

        let dn = match entity.dn() {
            Some(dn) => dn.to_string(),
            None => {
                let value = schema
                    .index_column()
                    .and_then(|index| attributes.get_ignore_case(&index.attribute))
                    .and_then(|values| values.first())
                    .ok_or_else(|| {
                        flush_error::<T>(
                            "",
                            WriteKind::Create,
                            EntityError::MissingIdentifier {
                                entity: T::entity_name().to_string(),
                            },
                        )
                    })?;
                schema
                    .dn_for(value, self.client.base_dn())
                    .map_err(|e| flush_error::<T>("", WriteKind::Create, e))?
            }
        };

        if !attributes.has(OBJECT_CLASS) {
            return Err(flush_error::<T>(
                &dn,
                WriteKind::Create,
                EntityError::MissingObjectClass {
                    entity: T::entity_name().to_string(),
                },
            ));
        }

        self.client
            .add(&dn, &attributes)
            .await
            .map_err(|e| flush_error::<T>(&dn, WriteKind::Create, e.into()))?;
        info!(entity = T::entity_name(), dn = %dn, "Created entry");

        let core = entity.core_mut();
        core.set_dn(dn);
        core.set_origin(attributes);
        Hydrater::track_references(schema, entity);
        Ok(Outcome::Created)
    }

    async fn update<T: Entity>(&self, schema: &Schema, entity: &mut T) -> EntityResult<Outcome> {
        let mut dn = entity.dn().map(str::to_string).ok_or_else(|| {
            flush_error::<T>(
                "",
                WriteKind::Modify,
                EntityError::MissingIdentifier {
                    entity: T::entity_name().to_string(),
                },
            )
        })?;
        let mut delta = Hydrater::dehydrate(schema, entity);
        let mut outcome = Outcome::Unchanged;

        if let Some(index) = schema.index_column() {
            if let Some(change) = delta.remove(&index.attribute) {
                let value = entity
                    .read_column(&index.field)
                    .into_iter()
                    .find(|v| !v.is_empty())
                    .ok_or_else(|| {
                        flush_error::<T>(
                            &dn,
                            WriteKind::Rename,
                            EntityError::MissingIdentifier {
                                entity: T::entity_name().to_string(),
                            },
                        )
                    })?;
                let rdn = schema
                    .rdn_for(&value)
                    .map_err(|e| flush_error::<T>(&dn, WriteKind::Rename, e))?;
                let renamed = self
                    .client
                    .rename(&dn, &rdn)
                    .await
                    .map_err(|e| flush_error::<T>(&dn, WriteKind::Rename, e.into()))?;
                info!(entity = T::entity_name(), from = %dn, to = %renamed, "Renamed entry");

                let core = entity.core_mut();
                let mut origin = core.origin().cloned().unwrap_or_default();
                origin.set(change.attribute().to_string(), [value]);
                core.set_origin(origin);
                core.set_dn(renamed.clone());
                dn = renamed;
                outcome = Outcome::Renamed;
            }
        }

        if delta.is_empty() {
            debug!(entity = T::entity_name(), dn = %dn, "No changes to write");
            return Ok(outcome);
        }

        self.client
            .modify(&dn, &delta)
            .await
            .map_err(|e| flush_error::<T>(&dn, WriteKind::Modify, e.into()))?;
        info!(
            entity = T::entity_name(),
            dn = %dn,
            attributes = ?delta.affected_attributes(),
            "Modified entry"
        );

        let core = entity.core_mut();
        let mut origin = core.origin().cloned().unwrap_or_default();
        origin.apply(&delta);
        core.set_origin(origin);
        Hydrater::track_references(schema, entity);

        Ok(if outcome == Outcome::Renamed {
            outcome
        } else {
            Outcome::Modified
        })
    }

    async fn delete<T: Entity>(&self, entity: &mut T) -> EntityResult<Outcome> {
        let Some(dn) = entity.dn().map(str::to_string) else {
            debug!(entity = T::entity_name(), "Removed entity was never written");
            return Ok(Outcome::Unchanged);
        };

        self.client
            .delete(&dn)
            .await
            .map_err(|e| flush_error::<T>(&dn, WriteKind::Delete, e.into()))?;
        info!(entity = T::entity_name(), dn = %dn, "Deleted entry");

        entity.core_mut().detach();
        Ok(Outcome::Deleted)
    }
}

fn flush_error<T: Entity>(dn: &str, operation: WriteKind, source: EntityError) -> EntityError {
    EntityError::Flush {
        entity: T::entity_name().to_string(),
        dn: dn.to_string(),
        operation,
        source: Box::new(source),
    }
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("base_dn", &self.client.base_dn())
            .field("config", &self.config)
            .finish()
    }
}
