//! Vault configuration.
//!
//! Settings come from an optional TOML file and are then overridden by
//! `KEYWARD_*` environment variables. The master key is deliberately not part
//! of this struct; see [`crate::master`].
//!
//! ```toml
//! data_dir = "data"
//! reuse_revoked = true
//! log_level = "info"
//!
//! [audit]
//! backend = "sqlite"
//! path = "audit.db"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::vault::VaultPolicy;

pub const ENV_DATA_DIR: &str = "KEYWARD_DATA_DIR";
pub const ENV_REUSE_REVOKED: &str = "KEYWARD_REUSE_REVOKED";
pub const ENV_AUDIT_BACKEND: &str = "KEYWARD_AUDIT_BACKEND";
pub const ENV_LOG: &str = "KEYWARD_LOG";

/// Where audit entries go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditBackend {
    /// Line-oriented text file.
    File,
    /// SQLite `audit_log` table.
    Sqlite,
}

impl AuditBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Some(Self::File),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }

    fn default_file_name(&self) -> &'static str {
        match self {
            Self::File => "audit.log",
            Self::Sqlite => "audit.db",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub backend: AuditBackend,
    /// Relative paths are resolved against `data_dir`. Defaults to
    /// `audit.log` or `audit.db` depending on the backend.
    pub path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            backend: AuditBackend::File,
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub data_dir: PathBuf,
    /// Key registry file, relative to `data_dir`.
    pub keys_file: PathBuf,
    /// Authorization registry file, relative to `data_dir`.
    pub permissions_file: PathBuf,
    pub audit: AuditConfig,
    /// See [`VaultPolicy::reuse_revoked`].
    pub reuse_revoked: bool,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            keys_file: PathBuf::from("keys.json"),
            permissions_file: PathBuf::from("permissions.json"),
            audit: AuditConfig::default(),
            reuse_revoked: VaultPolicy::default().reuse_revoked,
            log_level: "warn".into(),
        }
    }
}

impl VaultConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| VaultError::Config {
            reason: format!("failed to parse TOML config: {e}"),
        })
    }

    /// Read and parse a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| VaultError::Config {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "configuration loaded from file");
        Ok(config)
    }

    /// Load `path` if given, otherwise defaults, then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Override fields from variables returned by `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_REUSE_REVOKED) {
            self.reuse_revoked = parse_bool(&value).ok_or_else(|| VaultError::Config {
                reason: format!("{ENV_REUSE_REVOKED} must be true or false, got {value:?}"),
            })?;
        }
        if let Some(value) = lookup(ENV_AUDIT_BACKEND) {
            self.audit.backend = AuditBackend::parse(&value).ok_or_else(|| VaultError::Config {
                reason: format!("{ENV_AUDIT_BACKEND} must be file or sqlite, got {value:?}"),
            })?;
        }
        if let Some(level) = lookup(ENV_LOG) {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn policy(&self) -> VaultPolicy {
        VaultPolicy {
            reuse_revoked: self.reuse_revoked,
        }
    }

    pub fn keys_path(&self) -> PathBuf {
        self.data_dir.join(&self.keys_file)
    }

    pub fn permissions_path(&self) -> PathBuf {
        self.data_dir.join(&self.permissions_file)
    }

    pub fn audit_path(&self) -> PathBuf {
        let file = self
            .audit
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.audit.backend.default_file_name()));
        self.data_dir.join(file)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_data_layout() {
        let config = VaultConfig::default();
        assert_eq!(config.keys_path(), Path::new("data/keys.json"));
        assert_eq!(config.permissions_path(), Path::new("data/permissions.json"));
        assert_eq!(config.audit_path(), Path::new("data/audit.log"));
        assert!(config.reuse_revoked);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = VaultConfig::from_toml_str(
            r#"
            data_dir = "/var/lib/keyward"
            reuse_revoked = false

            [audit]
            backend = "sqlite"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, Path::new("/var/lib/keyward"));
        assert!(!config.reuse_revoked);
        assert_eq!(config.audit.backend, AuditBackend::Sqlite);
        assert_eq!(config.audit_path(), Path::new("/var/lib/keyward/audit.db"));
        assert_eq!(config.keys_file, Path::new("keys.json"));
    }

    #[test]
    fn invalid_toml_is_config_error() {
        assert!(matches!(
            VaultConfig::from_toml_str("reuse_revoked = \"maybe\""),
            Err(VaultError::Config { .. })
        ));
    }

    #[test]
    fn environment_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_DATA_DIR, "/tmp/kw"),
            (ENV_REUSE_REVOKED, "no"),
            (ENV_AUDIT_BACKEND, "SQLite"),
            (ENV_LOG, "debug"),
        ]);
        let mut config = VaultConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.data_dir, Path::new("/tmp/kw"));
        assert!(!config.policy().reuse_revoked);
        assert_eq!(config.audit.backend, AuditBackend::Sqlite);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn bad_override_rejected() {
        let mut config = VaultConfig::default();
        let result = config.apply_overrides(|name| {
            (name == ENV_REUSE_REVOKED).then(|| "sometimes".to_string())
        });
        assert!(matches!(result, Err(VaultError::Config { .. })));
    }
}
