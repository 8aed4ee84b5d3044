//! Test fixtures and database helpers.
//!
//! Convenience functions for setting up test databases and the small
//! trees most engine tests start from.

use dendro_core::{
    Database, DocumentKind, HashStrategy, NodeId, NodePayload, Resource, ResourceConfig,
    RevisionNumber,
};
use std::path::PathBuf;
use tempfile::TempDir;

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            db: Database::open_in_memory(),
            temp_dir: None,
        }
    }

    /// Creates a new file-based test database in a temporary directory.
    #[must_use]
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let db =
            Database::open(&temp_dir.path().join("db")).expect("failed to open file database");

        Self {
            db,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if file-based, `None` if in-memory.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|dir| dir.path().join("db"))
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Database {
        &self.db
    }
}

/// Creates and opens an XML resource with the given hash strategy.
#[must_use]
pub fn xml_resource(db: &Database, name: &str, strategy: HashStrategy) -> Resource {
    let created = db
        .create_resource(
            name,
            ResourceConfig::new(DocumentKind::Xml).hash_strategy(strategy),
        )
        .expect("failed to create resource");
    assert!(created, "resource name already taken: {name}");
    db.open_resource(name).expect("failed to open resource")
}

/// Creates and opens a JSON resource with the given hash strategy.
#[must_use]
pub fn json_resource(db: &Database, name: &str, strategy: HashStrategy) -> Resource {
    let created = db
        .create_resource(
            name,
            ResourceConfig::new(DocumentKind::Json).hash_strategy(strategy),
        )
        .expect("failed to create resource");
    assert!(created, "resource name already taken: {name}");
    db.open_resource(name).expect("failed to open resource")
}

/// Shorthand for an XML text payload.
#[must_use]
pub fn text(value: &str) -> NodePayload {
    NodePayload::Text {
        value: value.to_string(),
    }
}

/// Shorthand for an XML element payload without attributes.
#[must_use]
pub fn element(name: &str) -> NodePayload {
    NodePayload::Element {
        name: name.to_string(),
        attributes: Vec::new(),
    }
}

/// Node IDs of the canonical sample tree committed by
/// [`build_sample_tree`].
#[derive(Debug, Clone, Copy)]
pub struct SampleTree {
    /// The revision the tree was committed as.
    pub revision: RevisionNumber,
    /// First child of the root (`<a>`).
    pub first: NodeId,
    /// Second child of the root (`<b>`).
    pub second: NodeId,
}

/// Commits the canonical 3-node sample tree: the document root with two
/// element children `<a>` and `<b>`.
#[must_use]
pub fn build_sample_tree(resource: &Resource) -> SampleTree {
    let mut wtx = resource.begin_write().expect("failed to begin write");

    let first = wtx
        .insert_first_child(element("a"))
        .expect("failed to insert first child");
    let second = wtx
        .insert_next_sibling(element("b"))
        .expect("failed to insert second child");
    let revision = wtx.commit().expect("failed to commit sample tree");

    SampleTree {
        revision,
        first,
        second,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dendro_core::RevisionSelector;

    #[test]
    fn memory_database_fixture() {
        let db = TestDatabase::memory();
        assert!(!db.is_persistent());
        assert!(db.path().is_none());
    }

    #[test]
    fn file_database_fixture() {
        let db = TestDatabase::file();
        assert!(db.is_persistent());
        assert!(db.path().unwrap().exists());
    }

    #[test]
    fn sample_tree_shape() {
        let db = TestDatabase::memory();
        let resource = xml_resource(&db, "sample", HashStrategy::Rolling);
        let tree = build_sample_tree(&resource);

        let mut rtx = resource
            .begin_read(RevisionSelector::Number(tree.revision))
            .unwrap();
        assert!(rtx.is_document_root());
        assert!(rtx.move_to_first_child().unwrap());
        assert_eq!(rtx.cursor(), tree.first);
        assert!(rtx.move_to_next_sibling().unwrap());
        assert_eq!(rtx.cursor(), tree.second);
        assert!(!rtx.move_to_next_sibling().unwrap());
    }
}
