//! Resource management.
//!
//! A resource is one independently versioned document: its configuration,
//! its page store, its revision index, and its transaction bookkeeping.
//! Resources are created with a bootstrap revision 0 that holds only the
//! document root, so every resource always has at least one committed
//! revision to read.

use crate::config::ResourceConfig;
use crate::error::{CoreError, CoreResult};
use crate::hash::HashEngine;
use crate::node::{Node, NodePayload};
use crate::page::PageStore;
use crate::revision::{RevisionEntry, RevisionIndex};
use crate::transaction::{ReadTransaction, RevisionSelector, TransactionManager, WriteTransaction};
use crate::types::{NodeId, RevisionNumber};
use chrono::{DateTime, Utc};
use dendro_storage::StorageBackend;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared state of one resource.
pub(crate) struct ResourceInner {
    pub(crate) name: String,
    pub(crate) config: ResourceConfig,
    pub(crate) hasher: HashEngine,
    pub(crate) pages: PageStore,
    pub(crate) revisions: RevisionIndex,
    pub(crate) txns: TransactionManager,
    pub(crate) closed: AtomicBool,
}

impl ResourceInner {
    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::ResourceClosed);
        }
        Ok(())
    }
}

/// Handle to one resource of a database.
///
/// Cheap to clone; all clones share the same underlying state. Handles
/// stay valid until the resource is dropped or its database closed, after
/// which every operation fails with `ResourceClosed`.
#[derive(Clone)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

impl Resource {
    /// Creates a new resource over fresh backends and commits its
    /// bootstrap revision 0 (the empty tree: just the document root).
    pub(crate) fn create(
        name: &str,
        config: ResourceConfig,
        pages_backend: Box<dyn StorageBackend>,
        index_backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        config.validate()?;

        let hasher = HashEngine::new(config.hash_strategy);
        let pages = PageStore::new(pages_backend, config.nodes_per_page, config.sync_on_commit);
        let revisions = RevisionIndex::new(index_backend, config.sync_on_commit);

        let mut working = pages.begin_working(None);
        let mut root = Node::new(NodeId::DOCUMENT, NodePayload::Document);
        root.hash = hasher.compute(&NodePayload::Document, &[]);
        pages.write_node(&mut working, root)?;

        let committed = pages.commit(working)?;
        revisions.append(RevisionEntry {
            revision: RevisionNumber::new(0),
            timestamp_ms: revisions.next_timestamp_ms(Utc::now().timestamp_millis()),
            root: NodeId::DOCUMENT,
            snapshot: committed.snapshot,
            table_offset: committed.table_offset,
            max_node_id: NodeId::DOCUMENT,
        })?;

        info!(resource = name, "created resource");

        Ok(Self {
            inner: Arc::new(ResourceInner {
                name: name.to_string(),
                config,
                hasher,
                pages,
                revisions,
                txns: TransactionManager::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Opens an existing resource from backends holding its committed
    /// state.
    pub(crate) fn open(
        name: &str,
        config: ResourceConfig,
        pages_backend: Box<dyn StorageBackend>,
        index_backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        config.validate()?;

        let hasher = HashEngine::new(config.hash_strategy);
        let pages = PageStore::new(pages_backend, config.nodes_per_page, config.sync_on_commit);
        let revisions = RevisionIndex::open(index_backend, config.sync_on_commit)?;

        if revisions.is_empty() {
            return Err(CoreError::corruption(format!(
                "resource {name} has no committed revisions"
            )));
        }

        // Snapshots must be rebuilt in commit order so tokens line up
        // with the entries that reference them.
        for entry in revisions.entries() {
            let snapshot = pages.restore(entry.table_offset)?;
            if snapshot != entry.snapshot {
                return Err(CoreError::corruption(format!(
                    "snapshot order mismatch in resource {name}: expected {}, restored {snapshot}",
                    entry.snapshot
                )));
            }
        }

        info!(
            resource = name,
            revisions = revisions.revision_count(),
            "opened resource"
        );

        Ok(Self {
            inner: Arc::new(ResourceInner {
                name: name.to_string(),
                config,
                hasher,
                pages,
                revisions,
                txns: TransactionManager::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Returns the resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the resource configuration.
    #[must_use]
    pub fn config(&self) -> &ResourceConfig {
        &self.inner.config
    }

    /// Whether the resource has been dropped or its database closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns the most recently committed revision number.
    pub fn most_recent_revision(&self) -> CoreResult<RevisionNumber> {
        self.inner.ensure_open()?;
        self.inner
            .revisions
            .most_recent()
            .map(|entry| entry.revision)
            .ok_or_else(|| CoreError::corruption("resource has no revisions"))
    }

    /// Resolves a timestamp to a revision number.
    ///
    /// Instants before the first commit resolve to revision 0; instants
    /// after the last commit resolve to the most recent revision.
    pub fn revision_at(&self, instant: DateTime<Utc>) -> CoreResult<RevisionNumber> {
        self.inner.ensure_open()?;
        self.inner
            .revisions
            .resolve_by_timestamp(instant.timestamp_millis())
            .map(|entry| entry.revision)
            .ok_or_else(|| CoreError::corruption("resource has no revisions"))
    }

    /// Returns the number of committed revisions.
    pub fn revision_count(&self) -> CoreResult<usize> {
        self.inner.ensure_open()?;
        Ok(self.inner.revisions.revision_count())
    }

    /// Begins a read-only transaction bound to the selected revision.
    ///
    /// The returned transaction's view never changes, regardless of
    /// concurrent commits.
    pub fn begin_read(&self, selector: RevisionSelector) -> CoreResult<ReadTransaction> {
        self.inner.ensure_open()?;

        let entry = match selector {
            RevisionSelector::MostRecent => self
                .inner
                .revisions
                .most_recent()
                .ok_or_else(|| CoreError::corruption("resource has no revisions"))?,
            RevisionSelector::Number(revision) => self
                .inner
                .revisions
                .entry(revision)
                .ok_or(CoreError::RevisionNotFound { revision })?,
            RevisionSelector::Timestamp(instant) => self
                .inner
                .revisions
                .resolve_by_timestamp(instant.timestamp_millis())
                .ok_or_else(|| CoreError::corruption("resource has no revisions"))?,
        };

        Ok(ReadTransaction::new(Arc::clone(&self.inner), entry))
    }

    /// Begins the resource's single write transaction on top of the most
    /// recent revision.
    ///
    /// # Errors
    ///
    /// Fails immediately with `WriteConflict` - without blocking - if a
    /// write transaction is already active.
    pub fn begin_write(&self) -> CoreResult<WriteTransaction> {
        self.inner.ensure_open()?;
        self.inner.txns.try_acquire_writer()?;

        let base = match self.inner.revisions.most_recent() {
            Some(entry) => entry,
            None => {
                self.inner.txns.release_writer();
                return Err(CoreError::corruption("resource has no revisions"));
            }
        };

        Ok(WriteTransaction::new(Arc::clone(&self.inner), base))
    }

    /// Number of open read transactions.
    #[must_use]
    pub fn active_readers(&self) -> usize {
        self.inner.txns.active_readers()
    }

    /// Whether a write transaction is currently active.
    #[must_use]
    pub fn writer_active(&self) -> bool {
        self.inner.txns.writer_active()
    }

    /// Marks the resource closed, invalidating all outstanding handles
    /// and transactions.
    pub(crate) fn mark_closed(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.inner.name)
            .field("revisions", &self.inner.revisions.revision_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashStrategy;
    use crate::node::DocumentKind;
    use crate::transaction::TransactionState;
    use dendro_storage::InMemoryBackend;

    fn create_resource(config: ResourceConfig) -> Resource {
        Resource::create(
            "test",
            config,
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
        )
        .unwrap()
    }

    fn text(value: &str) -> NodePayload {
        NodePayload::Text {
            value: value.to_string(),
        }
    }

    #[test]
    fn create_bootstraps_revision_zero() {
        let resource = create_resource(ResourceConfig::default());
        assert_eq!(
            resource.most_recent_revision().unwrap(),
            RevisionNumber::new(0)
        );

        let rtx = resource.begin_read(RevisionSelector::MostRecent).unwrap();
        assert!(rtx.is_document_root());
        assert_eq!(rtx.payload().unwrap(), NodePayload::Document);
    }

    #[test]
    fn write_commit_advances_revision() {
        let resource = create_resource(ResourceConfig::default());

        let mut wtx = resource.begin_write().unwrap();
        wtx.insert_first_child(text("hello")).unwrap();
        let revision = wtx.commit().unwrap();

        assert_eq!(revision, RevisionNumber::new(1));
        assert_eq!(resource.most_recent_revision().unwrap(), revision);
    }

    #[test]
    fn second_writer_fails_immediately() {
        let resource = create_resource(ResourceConfig::default());

        let _first = resource.begin_write().unwrap();
        let second = resource.begin_write();
        assert!(matches!(second, Err(CoreError::WriteConflict)));
    }

    #[test]
    fn writer_slot_freed_after_commit_abort_and_drop() {
        let resource = create_resource(ResourceConfig::default());

        let wtx = resource.begin_write().unwrap();
        wtx.commit().unwrap();
        let wtx = resource.begin_write().unwrap();
        wtx.abort().unwrap();
        {
            let _wtx = resource.begin_write().unwrap();
            // Dropped without commit.
        }
        assert!(!resource.writer_active());
        resource.begin_write().unwrap();
    }

    #[test]
    fn abort_publishes_nothing() {
        let resource = create_resource(ResourceConfig::default());

        let mut wtx = resource.begin_write().unwrap();
        wtx.insert_first_child(text("discarded")).unwrap();
        wtx.abort().unwrap();

        assert_eq!(
            resource.most_recent_revision().unwrap(),
            RevisionNumber::new(0)
        );
    }

    #[test]
    fn reader_bound_to_revision_is_isolated() {
        let resource = create_resource(ResourceConfig::default());

        let mut wtx = resource.begin_write().unwrap();
        let child = wtx.insert_first_child(text("v1")).unwrap();
        wtx.commit().unwrap();

        let mut reader = resource.begin_read(RevisionSelector::MostRecent).unwrap();
        assert!(reader.move_to(child).unwrap());

        // Commit a second revision changing the child.
        let mut wtx = resource.begin_write().unwrap();
        wtx.set_payload_of(child, text("v2")).unwrap();
        wtx.commit().unwrap();

        // The reader still sees the old payload.
        assert_eq!(reader.payload().unwrap(), text("v1"));

        // A fresh reader sees the new one.
        let mut fresh = resource.begin_read(RevisionSelector::MostRecent).unwrap();
        assert!(fresh.move_to(child).unwrap());
        assert_eq!(fresh.payload().unwrap(), text("v2"));
    }

    #[test]
    fn read_by_explicit_revision() {
        let resource = create_resource(ResourceConfig::default());

        let mut wtx = resource.begin_write().unwrap();
        wtx.insert_first_child(text("one")).unwrap();
        wtx.commit().unwrap();

        let rtx = resource
            .begin_read(RevisionSelector::Number(RevisionNumber::new(0)))
            .unwrap();
        assert_eq!(rtx.revision(), RevisionNumber::new(0));

        let missing = resource.begin_read(RevisionSelector::Number(RevisionNumber::new(9)));
        assert!(matches!(missing, Err(CoreError::RevisionNotFound { .. })));
    }

    #[test]
    fn timestamp_before_history_resolves_to_revision_zero() {
        let resource = create_resource(ResourceConfig::default());

        let mut wtx = resource.begin_write().unwrap();
        wtx.insert_first_child(text("x")).unwrap();
        wtx.commit().unwrap();

        let ancient = DateTime::<Utc>::UNIX_EPOCH;
        assert_eq!(
            resource.revision_at(ancient).unwrap(),
            RevisionNumber::new(0)
        );

        let rtx = resource
            .begin_read(RevisionSelector::Timestamp(ancient))
            .unwrap();
        assert_eq!(rtx.revision(), RevisionNumber::new(0));
    }

    #[test]
    fn timestamp_after_history_resolves_to_most_recent() {
        let resource = create_resource(ResourceConfig::default());

        let mut wtx = resource.begin_write().unwrap();
        wtx.insert_first_child(text("x")).unwrap();
        wtx.commit().unwrap();

        let future = Utc::now() + chrono::Duration::days(365);
        assert_eq!(
            resource.revision_at(future).unwrap(),
            RevisionNumber::new(1)
        );
    }

    #[test]
    fn closed_resource_rejects_operations() {
        let resource = create_resource(ResourceConfig::default());
        let mut rtx = resource.begin_read(RevisionSelector::MostRecent).unwrap();

        resource.mark_closed();

        assert!(matches!(
            resource.most_recent_revision(),
            Err(CoreError::ResourceClosed)
        ));
        assert!(matches!(
            rtx.move_to(NodeId::DOCUMENT),
            Err(CoreError::ResourceClosed)
        ));
        assert!(matches!(
            resource.begin_write(),
            Err(CoreError::ResourceClosed)
        ));
    }

    #[test]
    fn closed_transaction_rejects_operations() {
        let resource = create_resource(ResourceConfig::default());

        let mut rtx = resource.begin_read(RevisionSelector::MostRecent).unwrap();
        rtx.close();
        assert_eq!(rtx.state(), TransactionState::Closed);
        assert!(matches!(
            rtx.payload(),
            Err(CoreError::TransactionClosed)
        ));
    }

    #[test]
    fn document_kind_enforced() {
        let resource = create_resource(ResourceConfig::new(DocumentKind::Xml));

        let mut wtx = resource.begin_write().unwrap();
        let result = wtx.insert_first_child(NodePayload::Object);
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn hash_unsupported_when_disabled() {
        let resource =
            create_resource(ResourceConfig::default().hash_strategy(HashStrategy::None));

        let rtx = resource.begin_read(RevisionSelector::MostRecent).unwrap();
        assert!(matches!(
            rtx.current_hash(),
            Err(CoreError::HashUnsupported)
        ));
    }

    #[test]
    fn verify_on_read_accepts_intact_data() {
        let resource = create_resource(ResourceConfig::default().verify_on_read(true));

        let mut wtx = resource.begin_write().unwrap();
        wtx.insert_first_child(text("checked")).unwrap();
        wtx.commit().unwrap();

        let mut rtx = resource.begin_read(RevisionSelector::MostRecent).unwrap();
        assert!(rtx.move_to_first_child().unwrap());
        rtx.current_hash().unwrap();
        assert_eq!(rtx.payload().unwrap(), text("checked"));
    }

    #[test]
    fn reader_count_reflects_open_transactions() {
        let resource = create_resource(ResourceConfig::default());
        assert_eq!(resource.active_readers(), 0);

        let rtx = resource.begin_read(RevisionSelector::MostRecent).unwrap();
        assert_eq!(resource.active_readers(), 1);

        drop(rtx);
        assert_eq!(resource.active_readers(), 0);
    }
}
