//! # Directory Entity Mapping
//!
//! Maps plain Rust structs onto directory (LDAP-like) entries and back, with a
//! repository and unit-of-work API instead of raw attribute maps and DNs.
//!
//! ## Architecture
//!
//! - [`SchemaRegistry`] - Validates entity metadata once per type and caches it
//! - [`Hydrater`] - Converts entries into entities and entities into deltas
//! - [`RelationResolver`] - Loads DN-valued references as entities
//! - [`Repository`] - `find`, `find_by` and `find_by_dn` for one entity type
//! - [`EntityManager`] - Unit of work: `persist`, `remove`, `flush`
//! - [`EntityManagerRegistry`] - Named managers for multi-directory setups
//!
//! The engine reaches the directory through the [`DirectoryClient`] trait;
//! `dirmap-ldap` provides the LDAP implementation.
//!
//! ## Example
//!
//! ```ignore
//! use dirmap::prelude::*;
//!
//! let manager = EntityManager::new(client);
//!
//! let mut people = manager.get_repository::<People>()?.find("pdeparis").await?;
//! people.cn = "Pierre D.".to_string();
//! manager.persist(people).await?;
//!
//! let people = People {
//!     uid: "mdubois".to_string(),
//!     cn: "Maurice Dubois".to_string(),
//!     ..Default::default()
//! };
//! let handle = manager.persist(people).await?;
//!
//! manager.flush().await?;
//! assert!(handle.read().await.dn().is_some());
//! ```
//!
//! ## Crate Organization
//!
//! - [`error`] - Error types with retryable/permanent classification
//! - [`operation`] - Entries, attribute maps, deltas and filters
//! - [`client`] - Directory client contract
//! - [`metadata`] - Declarative entity metadata
//! - [`schema`] - Validated schemas and their registry
//! - [`entity`] - Entity contract, column values and handles
//! - [`config`] - Strict mode and manager settings
//! - [`hydrate`] - Hydration and diffing
//! - [`relation`] - Relation resolution
//! - [`repository`] - Typed lookups
//! - [`manager`] - Unit of work
//! - [`registry`] - Named managers

pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod hydrate;
pub mod manager;
pub mod metadata;
pub mod operation;
pub mod registry;
pub mod relation;
pub mod repository;
pub mod schema;

pub use client::DirectoryClient;
pub use entity::{ColumnValue, Entity, EntityCore, Managed};
pub use error::{DirectoryError, EntityError, EntityResult};
pub use hydrate::Hydrater;
pub use manager::{EntityManager, FlushSummary};
pub use registry::EntityManagerRegistry;
pub use relation::RelationResolver;
pub use repository::Repository;
pub use schema::{Schema, SchemaRegistry};

/// Prelude module for convenient imports.
///
/// ```
/// use dirmap::prelude::*;
/// ```
pub mod prelude {
    // Error handling
    pub use crate::error::{
        DirectoryError, DirectoryResult, EntityError, EntityResult, WriteKind,
    };

    // Directory client
    pub use crate::client::DirectoryClient;
    pub use crate::operation::{
        AttributeDelta, AttributeMap, DirectoryEntry, Filter, Modification, SearchScope,
        OBJECT_CLASS,
    };

    // Entities
    pub use crate::entity::{
        dns_of, AnyEntity, ColumnValue, Entity, EntityCore, IntoManaged, Managed, ObjectClasses,
    };
    pub use crate::metadata::{ColumnMetadata, EntityMetadata, RelationMetadata};

    // Engine
    pub use crate::config::ManagerConfig;
    pub use crate::hydrate::Hydrater;
    pub use crate::manager::{EntityManager, FlushSummary};
    pub use crate::registry::{EntityManagerRegistry, DEFAULT_MANAGER};
    pub use crate::relation::RelationResolver;
    pub use crate::repository::Repository;
    pub use crate::schema::{ColumnKind, Schema, SchemaRegistry};
}

// Re-export async_trait for client implementors
pub use async_trait::async_trait;
