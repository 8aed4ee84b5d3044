//! Database directory management.
//!
//! This module handles the file system layout for dendro:
//!
//! ```text
//! <db_path>/
//! ├─ LOCK                    # Advisory lock, one process per database
//! └─ resources/
//!    └─ <resource name>/
//!       ├─ CONFIG            # Immutable resource configuration
//!       ├─ revisions.idx     # Append-only revision index
//!       └─ pages.dat         # Append-only page store
//! ```
//!
//! The LOCK file ensures only one process can open the database at a
//! time. Each resource keeps its own pair of append-only files plus its
//! encoded configuration.

use crate::config::ResourceConfig;
use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const RESOURCES_DIR: &str = "resources";
const CONFIG_FILE: &str = "CONFIG";
const CONFIG_TEMP: &str = "CONFIG.tmp";
const REVISIONS_FILE: &str = "revisions.idx";
const PAGES_FILE: &str = "pages.dat";

/// Manages the database directory structure and file locking.
///
/// # Thread Safety
///
/// The `DatabaseDir` holds an exclusive lock on the database directory.
/// Only one `DatabaseDir` instance can exist per directory at a time.
#[derive(Debug)]
pub struct DatabaseDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        // Non-blocking: a second opener fails instead of waiting.
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the directory holding all resources.
    #[must_use]
    pub fn resources_root(&self) -> PathBuf {
        self.path.join(RESOURCES_DIR)
    }

    /// Returns the directory of one resource.
    #[must_use]
    pub fn resource_dir(&self, name: &str) -> PathBuf {
        self.resources_root().join(name)
    }

    /// Returns the path to a resource's revision index file.
    #[must_use]
    pub fn revisions_path(&self, name: &str) -> PathBuf {
        self.resource_dir(name).join(REVISIONS_FILE)
    }

    /// Returns the path to a resource's page store file.
    #[must_use]
    pub fn pages_path(&self, name: &str) -> PathBuf {
        self.resource_dir(name).join(PAGES_FILE)
    }

    /// Returns the path to a resource's CONFIG file.
    #[must_use]
    pub fn config_path(&self, name: &str) -> PathBuf {
        self.resource_dir(name).join(CONFIG_FILE)
    }

    /// Checks whether a resource exists on disk.
    #[must_use]
    pub fn resource_exists(&self, name: &str) -> bool {
        self.config_path(name).exists()
    }

    /// Creates the directory for a new resource.
    pub fn create_resource_dir(&self, name: &str) -> CoreResult<()> {
        fs::create_dir_all(self.resource_dir(name))?;
        self.sync_directory(&self.resources_root())?;
        Ok(())
    }

    /// Irreversibly deletes a resource's directory and all its files.
    pub fn remove_resource_dir(&self, name: &str) -> CoreResult<()> {
        let dir = self.resource_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            self.sync_directory(&self.resources_root())?;
        }
        Ok(())
    }

    /// Lists the names of all resources present on disk, sorted.
    pub fn list_resource_names(&self) -> CoreResult<Vec<String>> {
        let root = self.resources_root();
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Saves a resource configuration atomically.
    ///
    /// Uses the write-then-rename pattern for crash safety:
    /// 1. Write to temporary file
    /// 2. Sync temporary file to disk
    /// 3. Rename temporary file to CONFIG
    /// 4. Fsync the directory so the rename is durable
    pub fn save_config(&self, name: &str, config: &ResourceConfig) -> CoreResult<()> {
        let config_path = self.config_path(name);
        let temp_path = self.resource_dir(name).join(CONFIG_TEMP);

        let data = config.encode();
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &config_path)?;
        self.sync_directory(&self.resource_dir(name))?;

        Ok(())
    }

    /// Loads a resource configuration.
    ///
    /// Returns `None` if the resource doesn't exist on disk.
    pub fn load_config(&self, name: &str) -> CoreResult<Option<ResourceConfig>> {
        let config_path = self.config_path(name);
        if !config_path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&config_path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        Ok(Some(ResourceConfig::decode(&data)?))
    }

    /// Syncs a directory so its entry metadata is durable.
    ///
    /// On Windows, directory fsync is not supported in the same way as
    /// Unix; the NTFS journal provides equivalent metadata durability, so
    /// the explicit fsync is skipped there.
    #[cfg(unix)]
    fn sync_directory(&self, dir: &Path) -> CoreResult<()> {
        if dir.exists() {
            let handle = File::open(dir)?;
            handle.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self, _dir: &Path) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashStrategy;
    use crate::node::DocumentKind;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("new_db");

        assert!(!db_path.exists());

        let dir = DatabaseDir::open(&db_path, true).unwrap();
        assert!(db_path.exists());
        assert!(db_path.is_dir());

        drop(dir);
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("nonexistent");

        let result = DatabaseDir::open(&db_path, false);
        assert!(result.is_err());
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("locked_db");

        let _dir1 = DatabaseDir::open(&db_path, true).unwrap();

        let result = DatabaseDir::open(&db_path, true);
        assert!(matches!(result, Err(CoreError::DatabaseLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("reopen_db");

        {
            let _dir = DatabaseDir::open(&db_path, true).unwrap();
        }

        let _dir2 = DatabaseDir::open(&db_path, true).unwrap();
    }

    #[test]
    fn config_round_trip() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(&temp.path().join("db"), true).unwrap();

        assert!(dir.load_config("books").unwrap().is_none());
        assert!(!dir.resource_exists("books"));

        let config = ResourceConfig::new(DocumentKind::Json)
            .hash_strategy(HashStrategy::Postorder)
            .nodes_per_page(32);

        dir.create_resource_dir("books").unwrap();
        dir.save_config("books", &config).unwrap();

        assert!(dir.resource_exists("books"));
        let loaded = dir.load_config("books").unwrap().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn list_and_remove_resources() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(&temp.path().join("db"), true).unwrap();

        dir.create_resource_dir("alpha").unwrap();
        dir.save_config("alpha", &ResourceConfig::default()).unwrap();
        dir.create_resource_dir("beta").unwrap();
        dir.save_config("beta", &ResourceConfig::default()).unwrap();

        assert_eq!(dir.list_resource_names().unwrap(), vec!["alpha", "beta"]);

        dir.remove_resource_dir("alpha").unwrap();
        assert_eq!(dir.list_resource_names().unwrap(), vec!["beta"]);
        assert!(!dir.resource_exists("alpha"));
    }

    #[test]
    fn paths_are_correct() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("paths_db");
        let dir = DatabaseDir::open(&db_path, true).unwrap();

        assert_eq!(
            dir.revisions_path("r"),
            db_path.join("resources").join("r").join("revisions.idx")
        );
        assert_eq!(
            dir.pages_path("r"),
            db_path.join("resources").join("r").join("pages.dat")
        );
        assert_eq!(
            dir.config_path("r"),
            db_path.join("resources").join("r").join("CONFIG")
        );
    }
}
