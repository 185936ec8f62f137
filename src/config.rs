//! Runtime configuration: TOML file, then `DATABASE_URL`, then CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use crate::error::{Result, StoreError};
use crate::models::app_schema;
use crate::sqlite::SqliteConfig;

/// File picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "walkthrough.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WalkthroughConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file, or `:memory:`
    pub path: String,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "dev.db".to_string(),
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl WalkthroughConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| StoreError::Config(err.to_string()))
    }

    /// The file [`load`](Self::load) reads: `path` if given, else
    /// `walkthrough.toml` when it exists in the working directory.
    pub fn resolve_path(path: Option<&Path>) -> Option<PathBuf> {
        match path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                fallback.exists().then_some(fallback)
            }
        }
    }

    /// Reads `path` if given (it must exist), else `walkthrough.toml` when
    /// present, else defaults. Runs before logging is set up, so callers
    /// report the source themselves via [`resolve_path`](Self::resolve_path).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = Self::resolve_path(path) else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(&path).map_err(|err| {
            StoreError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Points the database at a `DATABASE_URL`-style location.
    pub fn apply_database_url(&mut self, url: &str) {
        self.database.path = database_path_from_url(url);
    }

    pub fn sqlite_config(&self) -> SqliteConfig {
        SqliteConfig::new(self.database.path.clone(), app_schema())
            .with_busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }
}

/// Accepts `file:./dev.db`, `sqlite://dev.db` or a bare path.
pub fn database_path_from_url(url: &str) -> String {
    let url = url.trim();
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("file:"))
        .unwrap_or(url);
    path.split('?').next().unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = WalkthroughConfig::from_toml_str(
            r#"
            [database]
            path = "demo.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.database.path, "demo.db");
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = WalkthroughConfig::from_toml_str("[database\npath = 1").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn strips_url_schemes_and_query() {
        assert_eq!(database_path_from_url("file:./dev.db"), "./dev.db");
        assert_eq!(database_path_from_url("sqlite://data/app.db?mode=rwc"), "data/app.db");
        assert_eq!(database_path_from_url(":memory:"), ":memory:");
    }

    #[test]
    fn loads_explicit_file_and_rejects_missing_one() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();
        let config = WalkthroughConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.logging.level, "debug");

        let missing = file.path().with_extension("absent");
        assert!(matches!(
            WalkthroughConfig::load(Some(&missing)),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn resolves_explicit_path_as_given() {
        let explicit = Path::new("custom.toml");
        assert_eq!(
            WalkthroughConfig::resolve_path(Some(explicit)),
            Some(explicit.to_path_buf())
        );
    }

    #[test]
    fn builds_sqlite_config_with_timeout() {
        let mut config = WalkthroughConfig::default();
        config.apply_database_url("file::memory:");
        let sqlite = config.sqlite_config();
        assert_eq!(sqlite.db_path, ":memory:");
        assert_eq!(sqlite.busy_timeout, Duration::from_millis(5000));
        assert_eq!(sqlite.schema.tables.len(), 3);
    }
}
