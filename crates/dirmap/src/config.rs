//! Hydration policy
//!
//! Strictness is decided per column, per manager ([`ManagerConfig`]) and
//! process-wide ([`disable_strict_mode`]). A missing attribute is an error only
//! when all three agree.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Process-wide strict switch. Every hydration reads it, so toggling it
/// affects hydrations running concurrently on other tasks.
static STRICT_MODE: AtomicBool = AtomicBool::new(true);

/// Tolerate missing attributes everywhere, whatever the column declares.
pub fn disable_strict_mode() {
    STRICT_MODE.store(false, Ordering::SeqCst);
    info!("Strict mode disabled process-wide");
}

/// Restore per-column strictness.
pub fn enable_strict_mode() {
    STRICT_MODE.store(true, Ordering::SeqCst);
    info!("Strict mode enabled process-wide");
}

pub fn is_strict_mode_enabled() -> bool {
    STRICT_MODE.load(Ordering::SeqCst)
}

/// Settings of one entity manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Honour per-column strict flags. When false, missing attributes are
    /// always tolerated by this manager.
    #[serde(default = "default_strict")]
    pub strict: bool,
}

fn default_strict() -> bool {
    true
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            strict: default_strict(),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tolerate missing attributes in this manager only.
    #[must_use]
    pub fn non_strict(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Effective strictness of a column declared with `column_strict`.
    pub fn is_strict(&self, column_strict: bool) -> bool {
        column_strict && self.strict && is_strict_mode_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_strict() {
        assert!(ManagerConfig::default().strict);
        assert!(!ManagerConfig::new().non_strict().strict);
    }

    #[test]
    fn test_column_flag_and_manager_flag_combine() {
        let strict = ManagerConfig::new();
        let lenient = ManagerConfig::new().non_strict();

        assert!(!strict.is_strict(false));
        assert!(!lenient.is_strict(true));
        assert!(!lenient.is_strict(false));
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: ManagerConfig = serde_json::from_str("{}").unwrap();
        assert!(config.strict);

        let config: ManagerConfig = serde_json::from_str(r#"{"strict": false}"#).unwrap();
        assert!(!config.strict);
    }
}
