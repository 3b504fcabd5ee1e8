//! LDAP client configuration
//!
//! Connection parameters for an LDAP directory and the timeouts applied to it.

use std::time::Duration;

use dirmap::error::{DirectoryError, DirectoryResult};
use serde::{Deserialize, Serialize};

/// Timeouts applied to the LDAP connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Connection establishment timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Per-operation timeout in seconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_operation_timeout() -> u64 {
    60
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_timeout_secs: default_connection_timeout(),
            operation_timeout_secs: default_operation_timeout(),
        }
    }
}

impl ConnectionSettings {
    /// Set connection timeout.
    #[must_use]
    pub fn with_connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout_secs = secs;
        self
    }

    /// Set operation timeout.
    #[must_use]
    pub fn with_operation_timeout(mut self, secs: u64) -> Self {
        self.operation_timeout_secs = secs;
        self
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

/// Configuration for an LDAP directory.
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// LDAP server hostname or IP address.
    pub host: String,

    /// LDAP server port (389 for LDAP, 636 for LDAPS).
    #[serde(default = "default_ldap_port")]
    pub port: u16,

    /// Use SSL/TLS (LDAPS).
    #[serde(default)]
    pub use_ssl: bool,

    /// Use STARTTLS upgrade on plain LDAP connection.
    #[serde(default)]
    pub use_starttls: bool,

    /// Base DN entity DN templates are resolved under (e.g., "dc=example,dc=com").
    pub base_dn: String,

    /// Bind DN for authentication (e.g., "cn=admin,dc=example,dc=com").
    pub bind_dn: String,

    /// Bind password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// Connection settings (timeouts).
    #[serde(default)]
    pub connection: ConnectionSettings,
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("use_starttls", &self.use_starttls)
            .field("base_dn", &self.base_dn)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("connection", &self.connection)
            .finish()
    }
}

fn default_ldap_port() -> u16 {
    389
}

impl LdapConfig {
    /// Create a new LDAP config with required fields.
    pub fn new(
        host: impl Into<String>,
        base_dn: impl Into<String>,
        bind_dn: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_ldap_port(),
            use_ssl: false,
            use_starttls: false,
            base_dn: base_dn.into(),
            bind_dn: bind_dn.into(),
            bind_password: None,
            connection: ConnectionSettings::default(),
        }
    }

    /// Set bind password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.bind_password = Some(password.into());
        self
    }

    /// Enable SSL (LDAPS).
    #[must_use]
    pub fn with_ssl(mut self) -> Self {
        self.use_ssl = true;
        self.port = 636;
        self
    }

    /// Enable STARTTLS.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.use_starttls = true;
        self
    }

    /// Set the connection settings.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.connection = connection;
        self
    }

    /// Get the LDAP URL.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Check the configuration before handing it to the mapping engine.
    pub fn validate(&self) -> DirectoryResult<()> {
        self.validate_connection()?;

        if self.base_dn.is_empty() {
            return Err(invalid("base_dn is required"));
        }

        Ok(())
    }

    /// Check the parts needed to open and bind a connection.
    ///
    /// The base DN may still be set after connecting.
    pub fn validate_connection(&self) -> DirectoryResult<()> {
        if self.host.is_empty() {
            return Err(invalid("host is required"));
        }

        if self.port == 0 {
            return Err(invalid("port must be non-zero"));
        }

        if self.bind_dn.is_empty() {
            return Err(invalid("bind_dn is required"));
        }

        if self.use_ssl && self.use_starttls {
            return Err(invalid("cannot use both SSL and STARTTLS"));
        }

        Ok(())
    }

    /// Copy of this config with the password masked, for logging.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.bind_password.is_some() {
            config.bind_password = Some("***REDACTED***".to_string());
        }
        config
    }
}

fn invalid(message: &str) -> DirectoryError {
    DirectoryError::InvalidConfiguration {
        message: message.to_string(),
    }
}
