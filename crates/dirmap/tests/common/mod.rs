//! Common test utilities for dirmap integration tests.
//!
//! Provides an in-memory directory client, the entity types the tests map,
//! and a seeded directory tree:
//!
//! ```text
//! dc=example,dc=com
//! ├── ou=people
//! │   ├── uid=pdeparis
//! │   ├── uid=mdupont
//! │   └── uid=jdoe        (no givenName, no telephoneNumber)
//! └── ou=group
//!     ├── cn=state        (member: mdupont, pdeparis)
//!     └── cn=bad-relation (member: mdupont, unknown, pdeparis)
//! ```

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use dirmap::client::split_dn;
use dirmap::prelude::*;

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

pub const BASE_DN: &str = "dc=example,dc=com";
pub const PDEPARIS_DN: &str = "uid=pdeparis,ou=people,dc=example,dc=com";
pub const MDUPONT_DN: &str = "uid=mdupont,ou=people,dc=example,dc=com";
pub const JDOE_DN: &str = "uid=jdoe,ou=people,dc=example,dc=com";
pub const UNKNOWN_DN: &str = "uid=unknown,ou=people,dc=example,dc=com";
pub const STATE_DN: &str = "cn=state,ou=group,dc=example,dc=com";
pub const BAD_RELATION_DN: &str = "cn=bad-relation,ou=group,dc=example,dc=com";

// =============================================================================
// In-memory directory
// =============================================================================

/// A write the directory received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    Add { dn: String, attributes: AttributeMap },
    Modify { dn: String, delta: AttributeDelta },
    Rename { dn: String, new_rdn: String },
    Delete { dn: String },
}

/// Directory client keeping entries in memory, in insertion order.
pub struct InMemoryDirectory {
    base_dn: String,
    entries: Mutex<Vec<DirectoryEntry>>,
    writes: Mutex<Vec<Write>>,
    failing_dns: Mutex<HashSet<String>>,
    search_call_count: AtomicUsize,
    add_call_count: AtomicUsize,
    modify_call_count: AtomicUsize,
    rename_call_count: AtomicUsize,
    delete_call_count: AtomicUsize,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new(base_dn: &str) -> Self {
        Self {
            base_dn: base_dn.to_string(),
            entries: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            failing_dns: Mutex::new(HashSet::new()),
            search_call_count: AtomicUsize::new(0),
            add_call_count: AtomicUsize::new(0),
            modify_call_count: AtomicUsize::new(0),
            rename_call_count: AtomicUsize::new(0),
            delete_call_count: AtomicUsize::new(0),
        }
    }

    /// Directory holding the seeded tree.
    #[must_use]
    pub fn seeded() -> Self {
        let directory = Self::new(BASE_DN);
        for entry in fixtures() {
            directory.insert(entry);
        }
        directory
    }

    pub fn insert(&self, entry: DirectoryEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    /// Make every write to `dn` fail until [`heal`](Self::heal) is called.
    pub fn fail_writes_to(&self, dn: &str) {
        self.failing_dns
            .lock()
            .unwrap()
            .insert(dn.to_ascii_lowercase());
    }

    pub fn heal(&self) {
        self.failing_dns.lock().unwrap().clear();
    }

    pub fn entry(&self, dn: &str) -> Option<DirectoryEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.dn.eq_ignore_ascii_case(dn))
            .cloned()
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    pub fn search_calls(&self) -> usize {
        self.search_call_count.load(Ordering::SeqCst)
    }

    pub fn add_calls(&self) -> usize {
        self.add_call_count.load(Ordering::SeqCst)
    }

    pub fn modify_calls(&self) -> usize {
        self.modify_call_count.load(Ordering::SeqCst)
    }

    pub fn rename_calls(&self) -> usize {
        self.rename_call_count.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_call_count.load(Ordering::SeqCst)
    }

    fn check_failure(&self, operation: &str, dn: &str) -> DirectoryResult<()> {
        if self
            .failing_dns
            .lock()
            .unwrap()
            .contains(&dn.to_ascii_lowercase())
        {
            return Err(DirectoryError::operation_failed(
                operation,
                53,
                "unwilling to perform",
            ));
        }
        Ok(())
    }

    fn record(&self, write: Write) {
        self.writes.lock().unwrap().push(write);
    }
}

fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
    let dn = dn.to_ascii_lowercase();
    let base = base.to_ascii_lowercase();
    match scope {
        SearchScope::Base => dn == base,
        SearchScope::OneLevel => split_dn(&dn).1 == base,
        SearchScope::Subtree => dn == base || dn.ends_with(&format!(",{}", base)),
    }
}

#[async_trait]
impl DirectoryClient for InMemoryDirectory {
    fn base_dn(&self) -> &str {
        &self.base_dn
    }

    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &Filter,
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        self.search_call_count.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| in_scope(&e.dn, base, scope) && filter.matches(&e.attributes))
            .cloned()
            .collect())
    }

    async fn add(&self, dn: &str, attributes: &AttributeMap) -> DirectoryResult<()> {
        self.add_call_count.fetch_add(1, Ordering::SeqCst);
        self.check_failure("add", dn)?;
        if self.entry(dn).is_some() {
            return Err(DirectoryError::AlreadyExists { dn: dn.to_string() });
        }
        self.insert(DirectoryEntry {
            dn: dn.to_string(),
            attributes: attributes.clone(),
        });
        self.record(Write::Add {
            dn: dn.to_string(),
            attributes: attributes.clone(),
        });
        Ok(())
    }

    async fn modify(&self, dn: &str, delta: &AttributeDelta) -> DirectoryResult<()> {
        self.modify_call_count.fetch_add(1, Ordering::SeqCst);
        self.check_failure("modify", dn)?;
        {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries
                .iter_mut()
                .find(|e| e.dn.eq_ignore_ascii_case(dn))
                .ok_or_else(|| DirectoryError::NoSuchEntry { dn: dn.to_string() })?;
            entry.attributes.apply(delta);
        }
        self.record(Write::Modify {
            dn: dn.to_string(),
            delta: delta.clone(),
        });
        Ok(())
    }

    async fn rename(&self, dn: &str, new_rdn: &str) -> DirectoryResult<String> {
        self.rename_call_count.fetch_add(1, Ordering::SeqCst);
        self.check_failure("rename", dn)?;

        let (_, parent) = split_dn(dn);
        let new_dn = format!("{},{}", new_rdn, parent);
        if self.entry(&new_dn).is_some() {
            return Err(DirectoryError::AlreadyExists { dn: new_dn });
        }
        let (attribute, value) = new_rdn
            .split_once('=')
            .ok_or_else(|| DirectoryError::operation_failed("rename", 34, "invalid DN syntax"))?;
        {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries
                .iter_mut()
                .find(|e| e.dn.eq_ignore_ascii_case(dn))
                .ok_or_else(|| DirectoryError::NoSuchEntry { dn: dn.to_string() })?;
            entry.dn = new_dn.clone();
            entry.attributes.set(attribute.to_string(), [value.to_string()]);
        }
        self.record(Write::Rename {
            dn: dn.to_string(),
            new_rdn: new_rdn.to_string(),
        });
        Ok(new_dn)
    }

    async fn delete(&self, dn: &str) -> DirectoryResult<()> {
        self.delete_call_count.fetch_add(1, Ordering::SeqCst);
        self.check_failure("delete", dn)?;
        {
            let mut entries = self.entries.lock().unwrap();
            let before = entries.len();
            entries.retain(|e| !e.dn.eq_ignore_ascii_case(dn));
            if entries.len() == before {
                return Err(DirectoryError::NoSuchEntry { dn: dn.to_string() });
            }
        }
        self.record(Write::Delete { dn: dn.to_string() });
        Ok(())
    }
}

fn fixtures() -> Vec<DirectoryEntry> {
    vec![
        DirectoryEntry::new(PDEPARIS_DN)
            .with("objectClass", ["inetOrgPerson", "top"])
            .with("uid", ["pdeparis"])
            .with("cn", ["Pierre Deparis"])
            .with("givenName", ["Pierre"])
            .with("telephoneNumber", ["03 00 00 00 01", "04 00 00 00 01"]),
        DirectoryEntry::new(MDUPONT_DN)
            .with("objectClass", ["inetOrgPerson", "top"])
            .with("uid", ["mdupont"])
            .with("cn", ["Marie Dupont"])
            .with("givenName", ["Marie"])
            .with("telephoneNumber", ["03 00 00 00 03"]),
        DirectoryEntry::new(JDOE_DN)
            .with("objectClass", ["inetOrgPerson", "top"])
            .with("uid", ["jdoe"])
            .with("cn", ["John Doe"]),
        DirectoryEntry::new(STATE_DN)
            .with("objectClass", ["groupOfNames", "top"])
            .with("cn", ["state"])
            .with("member", [MDUPONT_DN, PDEPARIS_DN]),
        DirectoryEntry::new(BAD_RELATION_DN)
            .with("objectClass", ["groupOfNames", "top"])
            .with("cn", ["bad-relation"])
            .with("member", [MDUPONT_DN, UNKNOWN_DN, PDEPARIS_DN]),
    ]
}

/// Seeded directory plus a manager with a private schema registry.
pub fn setup() -> (Arc<InMemoryDirectory>, EntityManager) {
    init_test_logging();
    let directory = Arc::new(InMemoryDirectory::seeded());
    let manager = EntityManager::new(directory.clone())
        .with_schema_registry(Arc::new(SchemaRegistry::new()));
    (directory, manager)
}

// =============================================================================
// Entity types
// =============================================================================

/// Person with phone numbers; every column strict.
#[derive(Debug, Default)]
pub struct People {
    core: EntityCore,
    pub uid: String,
    pub cn: String,
    pub telephone_number: Vec<String>,
}

impl People {
    pub fn new(uid: &str, cn: &str, phones: &[&str]) -> Self {
        Self {
            core: EntityCore::for_entity::<People>(),
            uid: uid.to_string(),
            cn: cn.to_string(),
            telephone_number: phones.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl Entity for People {
    fn entity_name() -> &'static str {
        "People"
    }

    fn metadata() -> EntityMetadata {
        EntityMetadata::new("ou=people")
            .with_object_classes(["inetOrgPerson", "top"])
            .with_column(ColumnMetadata::string("uid").index())
            .with_column(ColumnMetadata::string("cn"))
            .with_column(ColumnMetadata::array("telephoneNumber"))
    }

    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn read_column(&self, field: &str) -> Vec<String> {
        match field {
            "uid" => vec![self.uid.clone()],
            "cn" => vec![self.cn.clone()],
            "telephoneNumber" => self.telephone_number.clone(),
            _ => Vec::new(),
        }
    }

    fn write_column(&mut self, field: &str, value: ColumnValue) -> EntityResult<()> {
        match field {
            "uid" => self.uid = value.into_string()?,
            "cn" => self.cn = value.into_string()?,
            "telephoneNumber" => self.telephone_number = value.into_array()?,
            _ => {}
        }
        Ok(())
    }
}

/// Person whose `givenName` column is declared with the given strictness.
macro_rules! person_entity {
    ($name:ident, $entity_name:literal, $given_name:expr) => {
        #[derive(Debug, Default)]
        pub struct $name {
            core: EntityCore,
            pub uid: String,
            pub cn: String,
            pub given_name: String,
        }

        impl Entity for $name {
            fn entity_name() -> &'static str {
                $entity_name
            }

            fn metadata() -> EntityMetadata {
                EntityMetadata::new("ou=people")
                    .with_object_classes(["inetOrgPerson", "top"])
                    .with_column(ColumnMetadata::string("uid").index())
                    .with_column(ColumnMetadata::string("cn"))
                    .with_column($given_name)
            }

            fn core(&self) -> &EntityCore {
                &self.core
            }

            fn core_mut(&mut self) -> &mut EntityCore {
                &mut self.core
            }

            fn read_column(&self, field: &str) -> Vec<String> {
                match field {
                    "uid" => vec![self.uid.clone()],
                    "cn" => vec![self.cn.clone()],
                    "givenName" => vec![self.given_name.clone()],
                    _ => Vec::new(),
                }
            }

            fn write_column(&mut self, field: &str, value: ColumnValue) -> EntityResult<()> {
                match field {
                    "uid" => self.uid = value.into_string()?,
                    "cn" => self.cn = value.into_string()?,
                    "givenName" => self.given_name = value.into_string()?,
                    _ => {}
                }
                Ok(())
            }
        }
    };
}

person_entity!(Person, "Person", ColumnMetadata::string("givenName"));
person_entity!(
    LenientPerson,
    "LenientPerson",
    ColumnMetadata::string("givenName").non_strict()
);

/// Group whose `member` column references [`People`] with the given settings.
macro_rules! group_entity {
    ($name:ident, $entity_name:literal, $member:expr) => {
        #[derive(Debug, Default)]
        pub struct $name {
            core: EntityCore,
            pub cn: String,
            pub members: Vec<People>,
        }

        impl Entity for $name {
            fn entity_name() -> &'static str {
                $entity_name
            }

            fn metadata() -> EntityMetadata {
                EntityMetadata::new("ou=group")
                    .with_object_classes(["groupOfNames", "top"])
                    .with_column(ColumnMetadata::string("cn").index())
                    .with_column($member)
            }

            fn core(&self) -> &EntityCore {
                &self.core
            }

            fn core_mut(&mut self) -> &mut EntityCore {
                &mut self.core
            }

            fn read_column(&self, field: &str) -> Vec<String> {
                match field {
                    "cn" => vec![self.cn.clone()],
                    "member" => dns_of(&self.members),
                    _ => Vec::new(),
                }
            }

            fn write_column(&mut self, field: &str, value: ColumnValue) -> EntityResult<()> {
                match field {
                    "cn" => self.cn = value.into_string()?,
                    "member" => self.members = value.into_entities::<People>()?,
                    _ => {}
                }
                Ok(())
            }
        }
    };
}

group_entity!(
    Organisation,
    "Organisation",
    ColumnMetadata::entity("member", "People")
);
group_entity!(
    OrganisationIgnore,
    "OrganisationIgnore",
    ColumnMetadata::entity("member", "People").ignore_errors()
);
group_entity!(
    OrganisationSingle,
    "OrganisationSingle",
    ColumnMetadata::entity("member", "People").single()
);

impl Organisation {
    pub fn new(cn: &str, members: Vec<People>) -> Self {
        Self {
            core: EntityCore::for_entity::<Organisation>(),
            cn: cn.to_string(),
            members,
        }
    }
}

/// Node pointing at another node through `seeAlso`.
#[derive(Debug, Default)]
pub struct Node {
    core: EntityCore,
    pub cn: String,
    pub see_also: Vec<Node>,
}

impl Node {
    /// Directory entry for node `cn` referencing the nodes in `see_also`.
    pub fn entry(cn: &str, see_also: &[&str]) -> DirectoryEntry {
        let entry = DirectoryEntry::new(node_dn(cn))
            .with("objectClass", ["device", "top"])
            .with("cn", [cn]);
        if see_also.is_empty() {
            entry
        } else {
            entry.with("seeAlso", see_also.iter().map(|cn| node_dn(cn)))
        }
    }
}

pub fn node_dn(cn: &str) -> String {
    format!("cn={},ou=nodes,{}", cn, BASE_DN)
}

impl Entity for Node {
    fn entity_name() -> &'static str {
        "Node"
    }

    fn metadata() -> EntityMetadata {
        EntityMetadata::new("ou=nodes")
            .with_object_classes(["device", "top"])
            .with_column(ColumnMetadata::string("cn").index())
            .with_column(ColumnMetadata::entity("seeAlso", "Node").single().non_strict())
    }

    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn read_column(&self, field: &str) -> Vec<String> {
        match field {
            "cn" => vec![self.cn.clone()],
            "seeAlso" => dns_of(&self.see_also),
            _ => Vec::new(),
        }
    }

    fn write_column(&mut self, field: &str, value: ColumnValue) -> EntityResult<()> {
        match field {
            "cn" => self.cn = value.into_string()?,
            "seeAlso" => self.see_also = value.into_entities::<Node>()?,
            _ => {}
        }
        Ok(())
    }
}

/// Uids of hydrated members, in order.
pub fn member_uids(members: &[People]) -> Vec<&str> {
    members.iter().map(|m| m.uid.as_str()).collect()
}
