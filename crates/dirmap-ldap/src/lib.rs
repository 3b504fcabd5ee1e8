//! # LDAP Directory Client
//!
//! LDAP implementation of the `dirmap` directory client contract.
//!
//! This crate opens and binds connections to an LDAP server and carries the
//! mapping engine's searches and writes over `ldap3`.
//!
//! ## Features
//!
//! - LDAP v3 protocol support
//! - SSL/TLS and STARTTLS
//! - Connection and per-operation timeouts
//! - Reconnect after a failed request
//! - RFC 4515 filter escaping
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dirmap::prelude::*;
//! use dirmap_ldap::Connection;
//!
//! let mut client = Connection::new("ldap.example.com", 389)
//!     .identify("cn=admin,dc=example,dc=com", "secret")
//!     .connect()
//!     .await?;
//! client.set_base_dn("dc=example,dc=com");
//!
//! let registry = EntityManagerRegistry::new();
//! registry.add_entity_manager(DEFAULT_MANAGER, Arc::new(client))?;
//! ```

pub mod client;
pub mod config;

// Re-exports
pub use client::{Connection, LdapClient};
pub use config::{ConnectionSettings, LdapConfig};
