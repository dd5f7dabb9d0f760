use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::db;
use crate::error::Result;
use crate::templates::TemplateStore;

pub const DATA_DIR_ENV: &str = "CREDITWATCH_DATA_DIR";
pub const DB_FILE_ENV: &str = "CREDITWATCH_DB_FILE";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_DB_FILE: &str = "creditwatch.db";

/// Resolved on-disk locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub templates_dir: PathBuf,
}

impl AppConfig {
    /// Resolves paths and creates the data and template directories.
    /// A relative `db_file` is placed inside `data_dir`.
    pub fn resolve(data_dir: impl Into<PathBuf>, db_file: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.into();
        let db_file = db_file.as_ref();
        let db_path = if db_file.is_absolute() {
            db_file.to_path_buf()
        } else {
            data_dir.join(db_file)
        };
        let templates_dir = data_dir.join("creditcards");

        fs::create_dir_all(&templates_dir)?;
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            data_dir,
            db_path,
            templates_dir,
        })
    }

    pub fn open_db(&self) -> Result<Connection> {
        Ok(db::init_db(&self.db_path)?)
    }

    pub fn template_store(&self) -> TemplateStore {
        TemplateStore::new(&self.templates_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_relative_db_file() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("data");
        let config = AppConfig::resolve(&dir, DEFAULT_DB_FILE).unwrap();
        assert_eq!(config.db_path, dir.join("creditwatch.db"));
        assert_eq!(config.templates_dir, dir.join("creditcards"));
        assert!(config.templates_dir.is_dir());

        let conn = config.open_db().unwrap();
        assert!(db::list_cards(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_resolve_absolute_db_file() {
        let tmp = tempdir().unwrap();
        let elsewhere = tmp.path().join("elsewhere").join("cards.db");
        let config = AppConfig::resolve(tmp.path().join("data"), &elsewhere).unwrap();
        assert_eq!(config.db_path, elsewhere);
        assert!(tmp.path().join("elsewhere").is_dir());
    }
}
