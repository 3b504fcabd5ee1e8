//! LDAP directory client
//!
//! [`Connection`] opens and binds a connection; [`LdapClient`] implements
//! [`DirectoryClient`] on top of it with `ldap3`.

use std::collections::HashSet;
use std::future::Future;

use async_trait::async_trait;
use dirmap::client::{split_dn, DirectoryClient};
use dirmap::error::{DirectoryError, DirectoryResult};
use dirmap::operation::{
    AttributeDelta, AttributeMap, DirectoryEntry, Filter, Modification, SearchScope,
};
use ldap3::result::{LdapError, LdapResult, SearchResult};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::LdapConfig;

/// LDAP result code for a rejected bind.
const RC_INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code for a missing entry.
const RC_NO_SUCH_OBJECT: u32 = 32;
/// LDAP result code for an add conflict.
const RC_ALREADY_EXISTS: u32 = 68;

/// Builder for a bound LDAP connection.
///
/// ```ignore
/// let mut client = Connection::new("ldap.example.com", 389)
///     .identify("cn=admin,dc=example,dc=com", "secret")
///     .connect()
///     .await?;
/// client.set_base_dn("dc=example,dc=com");
/// ```
#[derive(Debug, Clone)]
pub struct Connection {
    config: LdapConfig,
}

impl Connection {
    /// Start a connection to `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let mut config = LdapConfig::new(host, "", "");
        config.port = port;
        Self { config }
    }

    /// Start a connection from a full configuration.
    pub fn from_config(config: LdapConfig) -> Self {
        Self { config }
    }

    /// Credentials used for the bind.
    pub fn identify(mut self, bind_dn: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.bind_dn = bind_dn.into();
        self.config.bind_password = Some(password.into());
        self
    }

    /// Base DN of the resulting client.
    pub fn with_base_dn(mut self, base_dn: impl Into<String>) -> Self {
        self.config.base_dn = base_dn.into();
        self
    }

    /// Connect over LDAPS on the configured port.
    #[must_use]
    pub fn with_ssl(mut self) -> Self {
        self.config.use_ssl = true;
        self
    }

    /// Upgrade the plain connection with STARTTLS.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.config.use_starttls = true;
        self
    }

    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    /// Open the connection and bind.
    #[instrument(skip(self), fields(url = %self.config.url()))]
    pub async fn connect(self) -> DirectoryResult<LdapClient> {
        self.config.validate_connection()?;

        let client = LdapClient::new(self.config);
        client.get_connection().await?;

        Ok(client)
    }
}

/// Directory client backed by an LDAP server.
pub struct LdapClient {
    /// Configuration.
    config: LdapConfig,

    /// Cached bound connection, re-established after a protocol failure.
    connection: RwLock<Option<Ldap>>,
}

impl LdapClient {
    fn new(config: LdapConfig) -> Self {
        Self {
            config,
            connection: RwLock::new(None),
        }
    }

    /// Set the base DN entity DN templates are resolved under.
    pub fn set_base_dn(&mut self, base_dn: impl Into<String>) {
        self.config.base_dn = base_dn.into();
    }

    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    /// Unbind and drop the cached connection.
    pub async fn close(&self) -> DirectoryResult<()> {
        let mut conn_guard = self.connection.write().await;
        if let Some(mut ldap) = conn_guard.take() {
            if let Err(e) = ldap.unbind().await {
                warn!(error = %e, "Error during LDAP unbind");
            }
        }

        info!(host = %self.config.host, "LDAP connection closed");
        Ok(())
    }

    /// Get an LDAP connection, creating one if necessary.
    async fn get_connection(&self) -> DirectoryResult<Ldap> {
        {
            let conn_guard = self.connection.read().await;
            if let Some(ref conn) = *conn_guard {
                return Ok(conn.clone());
            }
        }

        let mut conn_guard = self.connection.write().await;
        if let Some(ref conn) = *conn_guard {
            return Ok(conn.clone());
        }

        let conn = self.create_connection().await?;
        *conn_guard = Some(conn.clone());

        Ok(conn)
    }

    /// Create a new LDAP connection and bind it.
    async fn create_connection(&self) -> DirectoryResult<Ldap> {
        let url = self.config.url();

        debug!(url = %url, "Connecting to LDAP server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.config.connection.connection_timeout())
            .set_starttls(self.config.use_starttls);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| {
                DirectoryError::connection_failed_with_source(
                    format!("Failed to connect to LDAP server at {}", url),
                    e,
                )
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        let bind_dn = &self.config.bind_dn;
        let bind_password = self.config.bind_password.as_deref().unwrap_or("");

        debug!(bind_dn = %bind_dn, "Performing LDAP bind");

        let result = ldap
            .simple_bind(bind_dn, bind_password)
            .await
            .map_err(|e| {
                DirectoryError::connection_failed_with_source(
                    format!("LDAP bind failed for {}", bind_dn),
                    e,
                )
            })?;

        if result.rc != 0 {
            if result.rc == RC_INVALID_CREDENTIALS {
                return Err(DirectoryError::AuthenticationFailed);
            }
            return Err(DirectoryError::connection_failed(format!(
                "LDAP bind failed with code {}: {}",
                result.rc, result.text
            )));
        }

        info!(host = %self.config.host, "LDAP connection established successfully");

        Ok(ldap)
    }

    /// Run one request under the operation timeout.
    ///
    /// A failed or timed-out request drops the cached connection so the
    /// next call reconnects.
    async fn run<T, F>(&self, operation: &str, request: F) -> DirectoryResult<T>
    where
        F: Future<Output = Result<T, LdapError>>,
    {
        let timeout = self.config.connection.operation_timeout();

        let error = match tokio::time::timeout(timeout, request).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                DirectoryError::protocol_with_source(operation, "LDAP request failed", e)
            }
            Err(_) => DirectoryError::Timeout {
                timeout_secs: self.config.connection.operation_timeout_secs,
            },
        };

        warn!(operation, error = %error, "Dropping LDAP connection");
        *self.connection.write().await = None;

        Err(error)
    }

    /// Convert a filter to its RFC 4515 string form.
    fn filter_to_ldap(filter: &Filter) -> String {
        match filter {
            Filter::And { filters } => {
                let inner: Vec<String> = filters.iter().map(Self::filter_to_ldap).collect();
                format!("(&{})", inner.join(""))
            }
            Filter::Equals { attribute, value } => {
                format!("({}={})", attribute, Self::escape_ldap_value(value))
            }
            Filter::Present { attribute } => {
                format!("({}=*)", attribute)
            }
        }
    }

    /// Escape special characters in LDAP filter values (RFC 4515).
    fn escape_ldap_value(value: &str) -> String {
        value
            .replace('\\', "\\5c")
            .replace('*', "\\2a")
            .replace('(', "\\28")
            .replace(')', "\\29")
            .replace('\0', "\\00")
    }

    fn scope_to_ldap(scope: SearchScope) -> Scope {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }

    /// Convert an LDAP search entry to a directory entry.
    ///
    /// Binary attributes have no string form and are left out.
    fn search_entry_to_entry(entry: SearchEntry) -> DirectoryEntry {
        let mut attributes = AttributeMap::new();
        for (name, values) in entry.attrs {
            if !values.is_empty() {
                attributes.set(name, values);
            }
        }

        if !entry.bin_attrs.is_empty() {
            debug!(
                dn = %entry.dn,
                skipped = entry.bin_attrs.len(),
                "Skipping binary attributes"
            );
        }

        DirectoryEntry {
            dn: entry.dn,
            attributes,
        }
    }

    fn attributes_to_ldap(attributes: &AttributeMap) -> Vec<(&str, HashSet<&str>)> {
        attributes
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| {
                (
                    name.as_str(),
                    values.iter().map(String::as_str).collect::<HashSet<_>>(),
                )
            })
            .collect()
    }

    fn delta_to_mods(delta: &AttributeDelta) -> Vec<Mod<&str>> {
        delta
            .iter()
            .map(|modification| match modification {
                Modification::Add { attribute, values } => Mod::Add(
                    attribute.as_str(),
                    values.iter().map(String::as_str).collect(),
                ),
                Modification::Replace { attribute, values } => Mod::Replace(
                    attribute.as_str(),
                    values.iter().map(String::as_str).collect(),
                ),
                Modification::Delete { attribute } => {
                    Mod::Delete(attribute.as_str(), HashSet::new())
                }
            })
            .collect()
    }

    /// Map a write result code to the client error taxonomy.
    fn check_result(operation: &str, dn: &str, result: LdapResult) -> DirectoryResult<()> {
        match result.rc {
            0 => Ok(()),
            RC_ALREADY_EXISTS => Err(DirectoryError::AlreadyExists { dn: dn.to_string() }),
            RC_NO_SUCH_OBJECT => Err(DirectoryError::NoSuchEntry { dn: dn.to_string() }),
            code => Err(DirectoryError::operation_failed(operation, code, result.text)),
        }
    }
}

#[async_trait]
impl DirectoryClient for LdapClient {
    fn base_dn(&self) -> &str {
        &self.config.base_dn
    }

    #[instrument(skip(self, filter))]
    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &Filter,
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        let mut ldap = self.get_connection().await?;
        let ldap_filter = Self::filter_to_ldap(filter);

        debug!(filter = %ldap_filter, "Searching LDAP");

        let SearchResult(entries, result) = self
            .run(
                "search",
                ldap.search(base, Self::scope_to_ldap(scope), &ldap_filter, vec!["*"]),
            )
            .await?;

        if result.rc == RC_NO_SUCH_OBJECT && scope == SearchScope::Base {
            debug!("Base entry does not exist");
            return Ok(Vec::new());
        }
        Self::check_result("search", base, result)?;

        let entries: Vec<DirectoryEntry> = entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(Self::search_entry_to_entry)
            .collect();

        debug!(total_found = entries.len(), "LDAP search completed");

        Ok(entries)
    }

    #[instrument(skip(self, attributes))]
    async fn add(&self, dn: &str, attributes: &AttributeMap) -> DirectoryResult<()> {
        let mut ldap = self.get_connection().await?;

        debug!(attributes = attributes.len(), "Creating LDAP entry");

        let result = self
            .run("add", ldap.add(dn, Self::attributes_to_ldap(attributes)))
            .await?;
        Self::check_result("add", dn, result)?;

        info!(dn = %dn, "LDAP entry created successfully");
        Ok(())
    }

    #[instrument(skip(self, delta))]
    async fn modify(&self, dn: &str, delta: &AttributeDelta) -> DirectoryResult<()> {
        let mods = Self::delta_to_mods(delta);
        if mods.is_empty() {
            return Ok(());
        }

        let mut ldap = self.get_connection().await?;

        debug!(changes = ?delta.affected_attributes(), "Updating LDAP entry");

        let result = self.run("modify", ldap.modify(dn, mods)).await?;
        Self::check_result("modify", dn, result)?;

        info!(dn = %dn, "LDAP entry updated successfully");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn rename(&self, dn: &str, new_rdn: &str) -> DirectoryResult<String> {
        let mut ldap = self.get_connection().await?;

        let result = self
            .run("rename", ldap.modifydn(dn, new_rdn, true, None))
            .await?;
        Self::check_result("rename", dn, result)?;

        let new_dn = match split_dn(dn) {
            (_, "") => new_rdn.to_string(),
            (_, parent) => format!("{},{}", new_rdn, parent),
        };

        info!(dn = %dn, new_dn = %new_dn, "LDAP entry renamed successfully");
        Ok(new_dn)
    }

    #[instrument(skip(self))]
    async fn delete(&self, dn: &str) -> DirectoryResult<()> {
        let mut ldap = self.get_connection().await?;

        let result = self.run("delete", ldap.delete(dn)).await?;
        Self::check_result("delete", dn, result)?;

        info!(dn = %dn, "LDAP entry deleted successfully");
        Ok(())
    }
}

impl std::fmt::Debug for LdapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapClient")
            .field("config", &self.config.redacted())
            .finish()
    }
}
