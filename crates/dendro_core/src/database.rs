//! Database catalog.

use crate::config::{DatabaseConfig, ResourceConfig};
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::resource::Resource;
use dendro_storage::{FileBackend, InMemoryBackend};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// A named collection of independently versioned resources.
///
/// `Database` is the entry point of dendro. It owns the set of resources
/// of one logical database: creating, opening, and dropping them.
/// Resource names are unique within a database.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use dendro_core::{Database, DocumentKind, ResourceConfig};
/// use std::path::Path;
///
/// let db = Database::open(Path::new("my_database"))?;
/// let created = db.create_resource("books", ResourceConfig::new(DocumentKind::Xml))?;
/// assert!(created);
///
/// let books = db.open_resource("books")?;
/// ```
///
/// # In-Memory Databases
///
/// For testing and ephemeral use, [`Database::open_in_memory`] keeps all
/// resources on in-memory backends; nothing touches the file system.
pub struct Database {
    /// Directory with the exclusive lock. `None` for in-memory databases.
    dir: Option<DatabaseDir>,
    /// Open resources by name.
    resources: RwLock<HashMap<String, Resource>>,
    /// Whether the database accepts operations.
    is_open: AtomicBool,
}

impl Database {
    /// Opens a persistent database with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseLocked` if another process has the directory open.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, DatabaseConfig::default())
    }

    /// Opens a persistent database.
    pub fn open_with_config(path: &Path, config: DatabaseConfig) -> CoreResult<Self> {
        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        info!(path = %path.display(), "opened database");

        Ok(Self {
            dir: Some(dir),
            resources: RwLock::new(HashMap::new()),
            is_open: AtomicBool::new(true),
        })
    }

    /// Opens a fresh in-memory database.
    ///
    /// All resources live on in-memory backends and vanish when the
    /// database is dropped.
    #[must_use]
    pub fn open_in_memory() -> Self {
        Self {
            dir: None,
            resources: RwLock::new(HashMap::new()),
            is_open: AtomicBool::new(true),
        }
    }

    /// Whether this database persists to disk.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.dir.is_some()
    }

    /// Creates a resource.
    ///
    /// Returns `Ok(false)` - not an error - when the name is already
    /// taken, so callers iterating over many names can record per-item
    /// results and continue.
    pub fn create_resource(&self, name: &str, config: ResourceConfig) -> CoreResult<bool> {
        self.ensure_open()?;
        validate_resource_name(name)?;
        config.validate()?;

        let mut resources = self.resources.write();
        if resources.contains_key(name) {
            return Ok(false);
        }

        let resource = match &self.dir {
            Some(dir) => {
                if dir.resource_exists(name) {
                    return Ok(false);
                }

                dir.create_resource_dir(name)?;
                dir.save_config(name, &config)?;

                let pages = FileBackend::open_with_create_dirs(&dir.pages_path(name))?;
                let revisions = FileBackend::open_with_create_dirs(&dir.revisions_path(name))?;
                Resource::create(name, config, Box::new(pages), Box::new(revisions))?
            }
            None => Resource::create(
                name,
                config,
                Box::new(InMemoryBackend::new()),
                Box::new(InMemoryBackend::new()),
            )?,
        };

        resources.insert(name.to_string(), resource);
        Ok(true)
    }

    /// Opens a resource by name.
    ///
    /// Persistent resources are loaded lazily on first access and cached.
    ///
    /// # Errors
    ///
    /// Fails with `ResourceNotFound` if no such resource exists.
    pub fn open_resource(&self, name: &str) -> CoreResult<Resource> {
        self.ensure_open()?;

        if let Some(resource) = self.resources.read().get(name) {
            return Ok(resource.clone());
        }

        let Some(dir) = &self.dir else {
            return Err(CoreError::resource_not_found(name));
        };

        let Some(config) = dir.load_config(name)? else {
            return Err(CoreError::resource_not_found(name));
        };

        let mut resources = self.resources.write();
        // Raced with another open; keep the first one.
        if let Some(resource) = resources.get(name) {
            return Ok(resource.clone());
        }

        let pages = FileBackend::open_with_create_dirs(&dir.pages_path(name))?;
        let revisions = FileBackend::open_with_create_dirs(&dir.revisions_path(name))?;
        let resource = Resource::open(name, config, Box::new(pages), Box::new(revisions))?;

        resources.insert(name.to_string(), resource.clone());
        Ok(resource)
    }

    /// Irreversibly drops a resource: all revisions of all its data are
    /// deleted, and every outstanding handle or transaction on it fails
    /// with `ResourceClosed` on next use.
    ///
    /// # Errors
    ///
    /// Fails with `ResourceNotFound` if no such resource exists.
    pub fn drop_resource(&self, name: &str) -> CoreResult<()> {
        self.ensure_open()?;

        let removed = self.resources.write().remove(name);
        if let Some(resource) = &removed {
            resource.mark_closed();
        }

        let on_disk = match &self.dir {
            Some(dir) => {
                let existed = dir.resource_exists(name);
                if existed {
                    dir.remove_resource_dir(name)?;
                }
                existed
            }
            None => false,
        };

        if removed.is_none() && !on_disk {
            return Err(CoreError::resource_not_found(name));
        }

        info!(resource = name, "dropped resource");
        Ok(())
    }

    /// Lists the names of all resources, sorted.
    pub fn list_resources(&self) -> CoreResult<Vec<String>> {
        self.ensure_open()?;

        let mut names: Vec<String> = match &self.dir {
            Some(dir) => dir.list_resource_names()?,
            None => Vec::new(),
        };

        for name in self.resources.read().keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }

        names.sort();
        Ok(names)
    }

    /// Closes the database.
    ///
    /// All open resources are marked closed; their outstanding
    /// transactions fail with `ResourceClosed` on next use, and catalog
    /// operations fail with `DatabaseClosed`.
    pub fn close(&self) {
        if self.is_open.swap(false, Ordering::AcqRel) {
            for resource in self.resources.read().values() {
                resource.mark_closed();
            }
            info!("closed database");
        }
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if !self.is_open.load(Ordering::Acquire) {
            return Err(CoreError::DatabaseClosed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("persistent", &self.is_persistent())
            .field("open_resources", &self.resources.read().len())
            .finish_non_exhaustive()
    }
}

fn validate_resource_name(name: &str) -> CoreResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(CoreError::invalid_operation(format!(
            "invalid resource name: {name:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{DocumentKind, NodePayload};
    use crate::transaction::RevisionSelector;
    use crate::types::RevisionNumber;
    use tempfile::tempdir;

    fn text(value: &str) -> NodePayload {
        NodePayload::Text {
            value: value.to_string(),
        }
    }

    #[test]
    fn create_resource_reports_collision_as_false() {
        let db = Database::open_in_memory();

        assert!(db.create_resource("books", ResourceConfig::default()).unwrap());
        assert!(!db.create_resource("books", ResourceConfig::default()).unwrap());
    }

    #[test]
    fn open_missing_resource_fails() {
        let db = Database::open_in_memory();
        let result = db.open_resource("ghost");
        assert!(matches!(result, Err(CoreError::ResourceNotFound { .. })));
    }

    #[test]
    fn invalid_names_rejected() {
        let db = Database::open_in_memory();
        assert!(db.create_resource("", ResourceConfig::default()).is_err());
        assert!(db
            .create_resource("../escape", ResourceConfig::default())
            .is_err());
        assert!(db
            .create_resource("with space", ResourceConfig::default())
            .is_err());
        assert!(db.create_resource("ok_name-1", ResourceConfig::default()).unwrap());
    }

    #[test]
    fn drop_resource_invalidates_handles() {
        let db = Database::open_in_memory();
        db.create_resource("books", ResourceConfig::default()).unwrap();

        let resource = db.open_resource("books").unwrap();
        let mut rtx = resource.begin_read(RevisionSelector::MostRecent).unwrap();

        db.drop_resource("books").unwrap();

        assert!(resource.is_closed());
        assert!(matches!(rtx.payload(), Err(CoreError::ResourceClosed)));

        let result = db.drop_resource("books");
        assert!(matches!(result, Err(CoreError::ResourceNotFound { .. })));
    }

    #[test]
    fn dropped_name_can_be_recreated() {
        let db = Database::open_in_memory();
        db.create_resource("books", ResourceConfig::default()).unwrap();
        db.drop_resource("books").unwrap();

        assert!(db.create_resource("books", ResourceConfig::default()).unwrap());
    }

    #[test]
    fn list_resources_sorted() {
        let db = Database::open_in_memory();
        db.create_resource("zeta", ResourceConfig::default()).unwrap();
        db.create_resource("alpha", ResourceConfig::default()).unwrap();

        assert_eq!(db.list_resources().unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn close_invalidates_catalog_and_resources() {
        let db = Database::open_in_memory();
        db.create_resource("books", ResourceConfig::default()).unwrap();
        let resource = db.open_resource("books").unwrap();

        db.close();

        assert!(matches!(
            db.open_resource("books"),
            Err(CoreError::DatabaseClosed)
        ));
        assert!(resource.is_closed());
    }

    #[test]
    fn persistent_database_round_trip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");

        let child;
        {
            let db = Database::open(&path).unwrap();
            db.create_resource("books", ResourceConfig::new(DocumentKind::Xml))
                .unwrap();

            let resource = db.open_resource("books").unwrap();
            let mut wtx = resource.begin_write().unwrap();
            child = wtx.insert_first_child(text("persisted")).unwrap();
            wtx.commit().unwrap();
        }

        // Reopen from disk.
        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_resources().unwrap(), vec!["books"]);

        let resource = db.open_resource("books").unwrap();
        assert_eq!(
            resource.most_recent_revision().unwrap(),
            RevisionNumber::new(1)
        );

        let mut rtx = resource.begin_read(RevisionSelector::MostRecent).unwrap();
        assert!(rtx.move_to(child).unwrap());
        assert_eq!(rtx.payload().unwrap(), text("persisted"));
    }

    #[test]
    fn persistent_create_collision_across_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");

        {
            let db = Database::open(&path).unwrap();
            assert!(db.create_resource("books", ResourceConfig::default()).unwrap());
        }

        let db = Database::open(&path).unwrap();
        assert!(!db.create_resource("books", ResourceConfig::default()).unwrap());
    }

    #[test]
    fn second_process_locked_out() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");

        let _db = Database::open(&path).unwrap();
        let result = Database::open(&path);
        assert!(matches!(result, Err(CoreError::DatabaseLocked)));
    }
}
