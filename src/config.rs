use std::path::PathBuf;

use anyhow::Result;

use crate::db;
use crate::kernel::AccessMode;
use crate::models::VisibilityLevel;

/// Runtime settings for embedders and the `orgk` binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// `None` means the platform default from [`db::default_path`].
    pub db_path: Option<PathBuf>,
    pub default_visibility: VisibilityLevel,
    pub access_mode: AccessMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            default_visibility: VisibilityLevel::Public,
            access_mode: AccessMode::Enforced,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// - `ORGANISM_KERNEL_DB`: database file path
    /// - `ORGANISM_KERNEL_DEFAULT_VISIBILITY`: `public`, `members` or `private`
    /// - `ORGANISM_KERNEL_ENFORCE_ACCESS`: `false` or `0` skips access checks
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = lookup("ORGANISM_KERNEL_DB")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let default_visibility = lookup("ORGANISM_KERNEL_DEFAULT_VISIBILITY")
            .and_then(|s| {
                let level = VisibilityLevel::from_str(s.trim());
                if level.is_none() {
                    tracing::warn!(value = %s, "Ignoring unknown default visibility");
                }
                level
            })
            .unwrap_or_default();

        let access_mode = match lookup("ORGANISM_KERNEL_ENFORCE_ACCESS").as_deref().map(str::trim) {
            Some("false") | Some("0") => AccessMode::Trusted,
            _ => AccessMode::Enforced,
        };

        Self {
            db_path,
            default_visibility,
            access_mode,
        }
    }

    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => db::default_path(),
        }
    }
}
