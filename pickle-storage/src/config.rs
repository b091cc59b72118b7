use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MapError;
use crate::sqlite::check_identifier;

/// Which engine and adapter a handle is opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Counted map over an in-process BTreeMap.
    Memory,
    /// Counted map over a SQLite BLOB table.
    Sqlite,
    /// Counted map over a RocksDB column family.
    Rocksdb,
    /// Build-once table file.
    AppendOnly,
    /// Ordered redb B-tree.
    Tree,
    /// SQLite wide table with a counter row and a write buffer.
    Rows,
    /// SQLite table of base64 text columns.
    Relational,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Sqlite => "sqlite",
            BackendKind::Rocksdb => "rocksdb",
            BackendKind::AppendOnly => "append_only",
            BackendKind::Tree => "tree",
            BackendKind::Rows => "rows",
            BackendKind::Relational => "relational",
        }
    }

    /// Append-only tables are the only kind with separate write and read phases.
    pub fn is_phased(self) -> bool {
        matches!(self, BackendKind::AppendOnly)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Open mode, fixed for the lifetime of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Write-only build pass of an append-only table.
    Create,
    /// Read-only access to a finalized append-only table.
    Read,
    /// Unrestricted access to a mutable backend.
    ReadWrite,
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpenMode::Create => "create",
            OpenMode::Read => "read",
            OpenMode::ReadWrite => "read_write",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    /// File or directory path. SQLite kinds accept `:memory:`.
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_mode")]
    pub mode: OpenMode,
    /// Table or column-family name.
    #[serde(default = "default_table")]
    pub table: String,
    /// Row-store flush discipline; auto-commit for the relational backend.
    #[serde(default = "default_auto_flush")]
    pub auto_flush: bool,
    /// Gzip inside the text framing of the relational backend.
    #[serde(default)]
    pub compress: bool,
    /// Destroy existing data when the handle opens.
    #[serde(default)]
    pub recreate: bool,
}

fn default_backend() -> BackendKind {
    BackendKind::Memory
}

fn default_location() -> String {
    "./pickle-data".to_string()
}

fn default_mode() -> OpenMode {
    OpenMode::ReadWrite
}

fn default_table() -> String {
    "pickle".to_string()
}

fn default_auto_flush() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            location: default_location(),
            mode: default_mode(),
            table: default_table(),
            auto_flush: default_auto_flush(),
            compress: false,
            recreate: false,
        }
    }
}

impl StoreConfig {
    /// Shorthand for a config with defaults apart from backend and location.
    pub fn new(backend: BackendKind, location: impl Into<String>) -> Self {
        let mode = if backend.is_phased() {
            OpenMode::Create
        } else {
            OpenMode::ReadWrite
        };
        Self {
            backend,
            location: location.into(),
            mode,
            ..Self::default()
        }
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, MapError> {
        let contents = std::fs::read_to_string(path).map_err(|e| MapError::Open {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        let config = Self::from_toml_str(&contents).map_err(|e| MapError::Open {
            reason: format!("config file '{}': {}", path.display(), e),
        })?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, MapError> {
        let config: StoreConfig = toml::from_str(contents).map_err(|e| MapError::Open {
            reason: format!("failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, MapError> {
        toml::to_string(self).map_err(|e| MapError::Open {
            reason: format!("failed to serialize config: {}", e),
        })
    }

    /// Check the mode against the backend kind and the table name.
    pub fn validate(&self) -> Result<(), MapError> {
        check_identifier(&self.table).map_err(MapError::open)?;
        let mode_ok = if self.backend.is_phased() {
            self.mode != OpenMode::ReadWrite
        } else {
            self.mode == OpenMode::ReadWrite
        };
        if !mode_ok {
            return Err(MapError::Open {
                reason: format!(
                    "{} backend cannot be opened in {} mode",
                    self.backend, self.mode
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.location, "./pickle-data");
        assert_eq!(config.mode, OpenMode::ReadWrite);
        assert_eq!(config.table, "pickle");
        assert!(config.auto_flush);
        assert!(!config.compress);
        assert!(!config.recreate);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = StoreConfig::from_toml_str("").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let config = StoreConfig::from_toml_str(
            r#"
            backend = "append_only"
            location = "/tmp/words.pkl"
            mode = "read"
            table = "words"
            auto_flush = false
            compress = true
            recreate = true
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::AppendOnly);
        assert_eq!(config.mode, OpenMode::Read);
        assert_eq!(config.table, "words");
        assert!(!config.auto_flush);
        assert!(config.compress);
        assert!(config.recreate);
    }

    #[test]
    fn test_mode_mismatch_rejected() {
        let err = StoreConfig::from_toml_str("backend = \"append_only\"").unwrap_err();
        assert!(matches!(err, MapError::Open { .. }));

        let err = StoreConfig::from_toml_str("backend = \"tree\"\nmode = \"create\"").unwrap_err();
        assert!(err.to_string().contains("tree backend cannot be opened in create mode"));
    }

    #[test]
    fn test_bad_table_name_rejected() {
        let err = StoreConfig::from_toml_str("table = \"x; DROP TABLE y\"").unwrap_err();
        assert!(matches!(err, MapError::Open { .. }));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(StoreConfig::from_toml_str("backend = \"mapdb\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        let config = StoreConfig::new(BackendKind::Rows, ":memory:");
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        assert_eq!(StoreConfig::load(&path).unwrap(), config);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            StoreConfig::load(&missing),
            Err(MapError::Open { .. })
        ));
    }

    #[test]
    fn test_new_picks_mode_for_backend() {
        assert_eq!(
            StoreConfig::new(BackendKind::AppendOnly, "t.pkl").mode,
            OpenMode::Create
        );
        assert_eq!(
            StoreConfig::new(BackendKind::Tree, "t.redb").mode,
            OpenMode::ReadWrite
        );
    }
}
