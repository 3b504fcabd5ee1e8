//! Directory client contract
//!
//! The mapping engine talks to the directory only through [`DirectoryClient`].
//! Implementations own connection handling, binding and wire encoding; the
//! engine never retries a failed call.

use async_trait::async_trait;

use crate::error::DirectoryResult;
use crate::operation::{AttributeDelta, AttributeMap, DirectoryEntry, Filter, SearchScope};

/// A bound connection to a directory.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Base DN under which entity DN templates are resolved
    /// (e.g. `dc=example,dc=com`).
    fn base_dn(&self) -> &str;

    /// Search for entries.
    ///
    /// Entries are returned in the order the directory produced them. A
    /// `Base` search on a DN that does not exist yields no entries rather
    /// than an error.
    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &Filter,
    ) -> DirectoryResult<Vec<DirectoryEntry>>;

    /// Create a new entry.
    async fn add(&self, dn: &str, attributes: &AttributeMap) -> DirectoryResult<()>;

    /// Apply a modification delta to an existing entry.
    async fn modify(&self, dn: &str, delta: &AttributeDelta) -> DirectoryResult<()>;

    /// Change the RDN of an entry, dropping the old RDN value.
    ///
    /// Returns the new DN.
    async fn rename(&self, dn: &str, new_rdn: &str) -> DirectoryResult<String>;

    /// Delete an entry.
    async fn delete(&self, dn: &str) -> DirectoryResult<()>;
}

/// Split a DN into its RDN and parent DN, honouring escaped commas.
///
/// `uid=a\,b,ou=people,dc=example` gives `("uid=a\,b", "ou=people,dc=example")`.
pub fn split_dn(dn: &str) -> (&str, &str) {
    let mut escaped = false;
    for (i, ch) in dn.char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => return (&dn[..i], &dn[i + 1..]),
            _ => escaped = false,
        }
    }
    (dn, "")
}

/// Canonical form of a DN, for comparing references.
///
/// Attribute types and values are lowercased and the spaces around RDN
/// separators are dropped, so `UID=PDeparis, ou=People,dc=example,dc=com`
/// and `uid=pdeparis,ou=people,dc=example,dc=com` normalize alike.
pub fn normalize_dn(dn: &str) -> String {
    let mut rdns = Vec::new();
    let mut rest = dn.trim();
    while !rest.is_empty() {
        let (rdn, parent) = split_dn(rest);
        rdns.push(normalize_rdn(rdn));
        rest = parent.trim_start();
    }
    rdns.join(",")
}

fn normalize_rdn(rdn: &str) -> String {
    match rdn.split_once('=') {
        Some((name, value)) => {
            let mut value = value.trim().to_lowercase();
            // An escaped trailing space is part of the value
            if value.ends_with('\\') {
                value.push(' ');
            }
            format!("{}={}", name.trim().to_ascii_lowercase(), value)
        }
        None => rdn.trim().to_lowercase(),
    }
}

/// Whether two DNs name the same entry.
pub fn same_dn(a: &str, b: &str) -> bool {
    a == b || normalize_dn(a) == normalize_dn(b)
}

/// Escape a value for use inside a DN, per RFC 4514.
///
/// Characters that must be escaped:
/// - Leading or trailing SPACE (escaped as \20)
/// - Leading # (escaped as \23)
/// - Characters: , + " \ < > ; = (escaped with backslash prefix)
/// - NUL character (escaped as \00)
pub fn escape_dn_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len() * 2);
    let last = value.chars().count().saturating_sub(1);

    for (i, ch) in value.chars().enumerate() {
        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                result.push('\\');
                result.push(ch);
            }
            '\0' => result.push_str("\\00"),
            ' ' if i == 0 || i == last => result.push_str("\\20"),
            '#' if i == 0 => result.push_str("\\23"),
            _ => result.push(ch),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_dn() {
        assert_eq!(
            split_dn("uid=pdeparis,ou=people,dc=example,dc=com"),
            ("uid=pdeparis", "ou=people,dc=example,dc=com")
        );
        assert_eq!(
            split_dn("cn=Dupont\\, Marie,ou=people"),
            ("cn=Dupont\\, Marie", "ou=people")
        );
        assert_eq!(split_dn("dc=com"), ("dc=com", ""));
    }

    #[test]
    fn test_normalize_dn() {
        assert_eq!(
            normalize_dn("UID=PDeparis, ou=People ,dc=example,DC=com"),
            "uid=pdeparis,ou=people,dc=example,dc=com"
        );
        assert_eq!(
            normalize_dn("cn=Dupont\\, Marie,ou=people"),
            "cn=dupont\\, marie,ou=people"
        );
        assert_eq!(normalize_dn("cn=trailing\\ ,ou=x"), "cn=trailing\\ ,ou=x");
        assert_eq!(normalize_dn(""), "");
    }

    #[test]
    fn test_same_dn() {
        assert!(same_dn(
            "uid=mdupont,ou=people,dc=example,dc=com",
            "UID=mdupont, OU=people, dc=Example, dc=com"
        ));
        assert!(!same_dn(
            "uid=mdupont,ou=people,dc=example,dc=com",
            "uid=pdeparis,ou=people,dc=example,dc=com"
        ));
    }

    #[test]
    fn test_escape_dn_value_simple() {
        assert_eq!(escape_dn_value("mdubois"), "mdubois");
        assert_eq!(escape_dn_value("maurice.dubois"), "maurice.dubois");
    }

    #[test]
    fn test_escape_dn_value_special_chars() {
        assert_eq!(escape_dn_value("Dubois, Maurice"), "Dubois\\, Maurice");
        assert_eq!(escape_dn_value("a+b=c"), "a\\+b\\=c");
        assert_eq!(escape_dn_value("x\0y"), "x\\00y");
    }

    #[test]
    fn test_escape_dn_value_leading_trailing() {
        assert_eq!(escape_dn_value(" padded "), "\\20padded\\20");
        assert_eq!(escape_dn_value("#tag"), "\\23tag");
        assert_eq!(escape_dn_value("a#b"), "a#b");
    }

    #[test]
    fn test_escape_dn_value_injection_attempt() {
        assert_eq!(
            escape_dn_value("admin,dc=evil,dc=com"),
            "admin\\,dc\\=evil\\,dc\\=com"
        );
    }

    #[test]
    fn test_escape_dn_value_empty() {
        assert_eq!(escape_dn_value(""), "");
    }
}
