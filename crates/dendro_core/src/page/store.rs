//! Page store: snapshots, working revisions, commit.

use crate::error::{CoreError, CoreResult};
use crate::node::Node;
use crate::page::page::{check_record, compute_crc32, read_u64, slot_of, Page, TABLE_MAGIC};
use crate::page::PAGE_VERSION;
use crate::types::{NodeId, PageNumber, SnapshotId};
use dendro_storage::StorageBackend;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Mapping from page number to the storage offset of the page record.
///
/// One page table per committed revision. Tables are immutable once
/// published; a commit builds the next table from the previous one plus
/// the offsets of the pages it rewrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageTable {
    pages: BTreeMap<u64, u64>,
}

impl PageTable {
    /// Creates an empty page table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record offset of a page, if the page exists in this
    /// snapshot.
    #[must_use]
    pub fn get(&self, number: PageNumber) -> Option<u64> {
        self.pages.get(&number.as_u64()).copied()
    }

    /// Sets the record offset of a page.
    pub fn insert(&mut self, number: PageNumber, offset: u64) {
        self.pages.insert(number.as_u64(), offset);
    }

    /// Returns the number of pages reachable from this snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether the table maps no pages at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Iterates over `(page number, offset)` pairs in page order.
    pub fn iter(&self) -> impl Iterator<Item = (PageNumber, u64)> + '_ {
        self.pages
            .iter()
            .map(|(&number, &offset)| (PageNumber::new(number), offset))
    }

    /// Serializes the table to a length-prefixed, checksummed record.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&TABLE_MAGIC);
        body.extend_from_slice(&PAGE_VERSION.to_le_bytes());

        let count = self.pages.len() as u32;
        body.extend_from_slice(&count.to_le_bytes());
        for (&number, &offset) in &self.pages {
            body.extend_from_slice(&number.to_le_bytes());
            body.extend_from_slice(&offset.to_le_bytes());
        }

        let crc = compute_crc32(&body);
        let total = 4 + body.len() + 4;

        let mut record = Vec::with_capacity(total);
        record.extend_from_slice(&(total as u32).to_le_bytes());
        record.extend_from_slice(&body);
        record.extend_from_slice(&crc.to_le_bytes());
        record
    }

    /// Deserializes a table from a full record produced by
    /// [`PageTable::encode`].
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let body = check_record(data, &TABLE_MAGIC, "page table")?;
        let mut cursor = TABLE_MAGIC.len() + 2;

        let count = {
            if cursor + 4 > body.len() {
                return Err(CoreError::corruption("page table record truncated"));
            }
            let value = u32::from_le_bytes([
                body[cursor],
                body[cursor + 1],
                body[cursor + 2],
                body[cursor + 3],
            ]);
            cursor += 4;
            value
        };

        let mut pages = BTreeMap::new();
        for _ in 0..count {
            let number = read_u64(body, &mut cursor)?;
            let offset = read_u64(body, &mut cursor)?;
            pages.insert(number, offset);
        }

        if cursor != body.len() {
            return Err(CoreError::corruption("trailing bytes in page table record"));
        }

        Ok(Self { pages })
    }
}

/// The private, uncommitted page set of one write transaction.
///
/// Reads fall through to the base snapshot; the first write to a page
/// copies it in here, and commit is the only step that makes any of it
/// visible.
#[derive(Debug)]
pub struct WorkingRevision {
    base: Option<SnapshotId>,
    dirty: HashMap<u64, Page>,
}

impl WorkingRevision {
    pub(crate) fn new(base: Option<SnapshotId>) -> Self {
        Self {
            base,
            dirty: HashMap::new(),
        }
    }

    /// The snapshot this working revision reads through to.
    #[must_use]
    pub fn base(&self) -> Option<SnapshotId> {
        self.base
    }

    /// The number of pages this working revision has copied and modified.
    #[must_use]
    pub fn dirty_page_count(&self) -> usize {
        self.dirty.len()
    }
}

/// Result of committing a working revision.
#[derive(Debug, Clone, Copy)]
pub struct CommittedPages {
    /// The snapshot token the new revision is addressed by.
    pub snapshot: SnapshotId,
    /// Storage offset of the new page table record.
    pub table_offset: u64,
    /// Number of page records written by this commit.
    pub pages_written: usize,
}

/// Copy-on-write store of node pages for one resource.
///
/// All committed state lives in the append-only backend; the in-memory
/// side is only the list of published page tables, one per snapshot. The
/// table list is the single shared mutable structure, mutated exclusively
/// by commits (an append) and read by everything else, which is what makes
/// snapshot isolation fall out without fine-grained locking.
pub struct PageStore {
    backend: RwLock<Box<dyn StorageBackend>>,
    tables: RwLock<Vec<Arc<PageTable>>>,
    nodes_per_page: u16,
    sync_on_commit: bool,
}

impl PageStore {
    /// Creates a page store over a backend.
    pub fn new(backend: Box<dyn StorageBackend>, nodes_per_page: u16, sync_on_commit: bool) -> Self {
        Self {
            backend: RwLock::new(backend),
            tables: RwLock::new(Vec::new()),
            nodes_per_page: nodes_per_page.max(1),
            sync_on_commit,
        }
    }

    /// Returns the configured page capacity.
    #[must_use]
    pub fn nodes_per_page(&self) -> u16 {
        self.nodes_per_page
    }

    /// Returns the number of published snapshots.
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.tables.read().len()
    }

    /// Begins a working revision on top of `base`.
    ///
    /// `None` starts from an empty tree; this is only used when
    /// bootstrapping a new resource.
    #[must_use]
    pub fn begin_working(&self, base: Option<SnapshotId>) -> WorkingRevision {
        WorkingRevision::new(base)
    }

    /// Reads a node from a committed snapshot.
    pub fn read_node(&self, snapshot: SnapshotId, id: NodeId) -> CoreResult<Option<Node>> {
        let table = self.table(snapshot)?;
        let (number, slot) = self.locate(id);

        match self.load_page(&table, number)? {
            Some(page) => Ok(page.get(slot).cloned()),
            None => Ok(None),
        }
    }

    /// Reads a node through a working revision: dirty pages first, then
    /// the base snapshot.
    pub fn read_node_working(
        &self,
        working: &WorkingRevision,
        id: NodeId,
    ) -> CoreResult<Option<Node>> {
        let (number, slot) = self.locate(id);

        if let Some(page) = working.dirty.get(&number.as_u64()) {
            return Ok(page.get(slot).cloned());
        }

        match working.base {
            Some(base) => self.read_node(base, id),
            None => Ok(None),
        }
    }

    /// Writes a node into a working revision, copying its page out of the
    /// base snapshot on first touch.
    pub fn write_node(&self, working: &mut WorkingRevision, node: Node) -> CoreResult<()> {
        let (number, slot) = self.locate(node.id);
        let page = self.working_page(working, number)?;
        page.set(slot, node);
        Ok(())
    }

    /// Removes a node from a working revision.
    pub fn remove_node(&self, working: &mut WorkingRevision, id: NodeId) -> CoreResult<()> {
        let (number, slot) = self.locate(id);
        let page = self.working_page(working, number)?;
        page.clear(slot);
        Ok(())
    }

    /// Commits a working revision: appends its dirty pages and a new page
    /// table, then publishes the table as the next snapshot.
    ///
    /// Until the table is pushed, no reader can observe any of the new
    /// pages; the push is the single indivisible publish step.
    pub fn commit(&self, working: WorkingRevision) -> CoreResult<CommittedPages> {
        let WorkingRevision { base, dirty } = working;

        let mut table = match base {
            Some(base) => (*self.table(base)?).clone(),
            None => PageTable::new(),
        };

        // Deterministic write order keeps records reproducible.
        let mut pages: Vec<(u64, Page)> = dirty.into_iter().collect();
        pages.sort_by_key(|(number, _)| *number);
        let pages_written = pages.len();

        let table_offset = {
            let mut backend = self.backend.write();

            for (number, page) in pages {
                let offset = backend.append(&page.encode())?;
                table.insert(PageNumber::new(number), offset);
            }

            let offset = backend.append(&table.encode())?;
            backend.flush()?;
            if self.sync_on_commit {
                backend.sync()?;
            }
            offset
        };

        let snapshot = {
            let mut tables = self.tables.write();
            tables.push(Arc::new(table));
            SnapshotId::new(tables.len() as u64 - 1)
        };

        Ok(CommittedPages {
            snapshot,
            table_offset,
            pages_written,
        })
    }

    /// Unpublishes the most recent snapshot.
    ///
    /// Used to roll back when the commit failed after the page tables
    /// were published but before the revision entry was appended. The
    /// snapshot is only removed if it is the latest one and no revision
    /// references it yet.
    pub(crate) fn discard_snapshot(&self, snapshot: SnapshotId) {
        let mut tables = self.tables.write();
        if tables.len() as u64 == snapshot.as_u64() + 1 {
            tables.pop();
        }
    }

    /// Restores a snapshot from a page table record written by an earlier
    /// commit. Used when opening an existing resource; tables must be
    /// restored in commit order.
    pub fn restore(&self, table_offset: u64) -> CoreResult<SnapshotId> {
        let record = self.read_record(table_offset)?;
        let table = PageTable::decode(&record)?;

        let mut tables = self.tables.write();
        tables.push(Arc::new(table));
        Ok(SnapshotId::new(tables.len() as u64 - 1))
    }

    /// Returns the `(page number, offset)` pairs of a snapshot in page
    /// order. Useful for storage statistics and sharing checks.
    pub fn page_offsets(&self, snapshot: SnapshotId) -> CoreResult<Vec<(PageNumber, u64)>> {
        let table = self.table(snapshot)?;
        Ok(table.iter().collect())
    }

    fn locate(&self, id: NodeId) -> (PageNumber, usize) {
        let number = PageNumber::new(id.as_u64() / u64::from(self.nodes_per_page));
        (number, slot_of(id, self.nodes_per_page))
    }

    fn table(&self, snapshot: SnapshotId) -> CoreResult<Arc<PageTable>> {
        self.tables
            .read()
            .get(snapshot.as_u64() as usize)
            .cloned()
            .ok_or_else(|| {
                CoreError::invalid_operation(format!("unknown page snapshot: {snapshot}"))
            })
    }

    fn working_page<'a>(
        &self,
        working: &'a mut WorkingRevision,
        number: PageNumber,
    ) -> CoreResult<&'a mut Page> {
        use std::collections::hash_map::Entry;

        match working.dirty.entry(number.as_u64()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let page = match working.base {
                    Some(base) => {
                        let table = self.table(base)?;
                        match self.load_page_at(table.get(number))? {
                            Some(page) => page,
                            None => Page::new(number, self.nodes_per_page),
                        }
                    }
                    None => Page::new(number, self.nodes_per_page),
                };
                Ok(entry.insert(page))
            }
        }
    }

    fn load_page(&self, table: &PageTable, number: PageNumber) -> CoreResult<Option<Page>> {
        self.load_page_at(table.get(number))
    }

    fn load_page_at(&self, offset: Option<u64>) -> CoreResult<Option<Page>> {
        let Some(offset) = offset else {
            return Ok(None);
        };
        let record = self.read_record(offset)?;
        Ok(Some(Page::decode(&record)?))
    }

    fn read_record(&self, offset: u64) -> CoreResult<Vec<u8>> {
        let backend = self.backend.read();

        let size = backend.size()?;
        if offset + 4 > size {
            return Err(CoreError::corruption("record offset beyond store"));
        }

        let len_bytes = backend.read_at(offset, 4)?;
        let record_len =
            u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as u64;

        if record_len < 4 || offset + record_len > size {
            return Err(CoreError::corruption("record extends beyond store"));
        }

        Ok(backend.read_at(offset, record_len as usize)?)
    }
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStore")
            .field("nodes_per_page", &self.nodes_per_page)
            .field("snapshot_count", &self.snapshot_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodePayload;
    use dendro_storage::InMemoryBackend;

    fn create_store() -> PageStore {
        PageStore::new(Box::new(InMemoryBackend::new()), 4, false)
    }

    fn text_node(id: u64, value: &str) -> Node {
        Node::new(
            NodeId::new(id),
            NodePayload::Text {
                value: value.to_string(),
            },
        )
    }

    fn commit_single(store: &PageStore, base: Option<SnapshotId>, node: Node) -> CommittedPages {
        let mut working = store.begin_working(base);
        store.write_node(&mut working, node).unwrap();
        store.commit(working).unwrap()
    }

    #[test]
    fn write_commit_read() {
        let store = create_store();
        let committed = commit_single(&store, None, text_node(1, "hello"));

        let node = store.read_node(committed.snapshot, NodeId::new(1)).unwrap();
        assert_eq!(
            node.unwrap().payload,
            NodePayload::Text {
                value: "hello".to_string()
            }
        );
    }

    #[test]
    fn uncommitted_nodes_invisible_to_snapshots() {
        let store = create_store();
        let first = commit_single(&store, None, text_node(1, "committed"));

        let mut working = store.begin_working(Some(first.snapshot));
        store.write_node(&mut working, text_node(2, "pending")).unwrap();

        // The committed snapshot cannot see the pending write.
        assert!(store.read_node(first.snapshot, NodeId::new(2)).unwrap().is_none());
        // The working revision can.
        assert!(store
            .read_node_working(&working, NodeId::new(2))
            .unwrap()
            .is_some());
    }

    #[test]
    fn snapshots_are_isolated_from_later_commits() {
        let store = create_store();
        let first = commit_single(&store, None, text_node(1, "v1"));
        let second = commit_single(&store, Some(first.snapshot), text_node(1, "v2"));

        let old = store
            .read_node(first.snapshot, NodeId::new(1))
            .unwrap()
            .unwrap();
        let new = store
            .read_node(second.snapshot, NodeId::new(1))
            .unwrap()
            .unwrap();

        assert_eq!(
            old.payload,
            NodePayload::Text {
                value: "v1".to_string()
            }
        );
        assert_eq!(
            new.payload,
            NodePayload::Text {
                value: "v2".to_string()
            }
        );
    }

    #[test]
    fn unmodified_pages_are_shared() {
        let store = create_store();

        // Two pages: node 1 in page 0, node 5 in page 1.
        let mut working = store.begin_working(None);
        store.write_node(&mut working, text_node(1, "page zero")).unwrap();
        store.write_node(&mut working, text_node(5, "page one")).unwrap();
        let first = store.commit(working).unwrap();
        assert_eq!(first.pages_written, 2);

        // Modify only node 1; page 1 must keep its offset.
        let second = commit_single(&store, Some(first.snapshot), text_node(1, "rewritten"));
        assert_eq!(second.pages_written, 1);

        let before: std::collections::HashMap<_, _> =
            store.page_offsets(first.snapshot).unwrap().into_iter().collect();
        let after: std::collections::HashMap<_, _> =
            store.page_offsets(second.snapshot).unwrap().into_iter().collect();

        assert_eq!(
            before.get(&PageNumber::new(1)),
            after.get(&PageNumber::new(1)),
            "unmodified page must be shared"
        );
        assert_ne!(
            before.get(&PageNumber::new(0)),
            after.get(&PageNumber::new(0)),
            "modified page must be rewritten"
        );
    }

    #[test]
    fn remove_node_clears_slot() {
        let store = create_store();
        let first = commit_single(&store, None, text_node(1, "doomed"));

        let mut working = store.begin_working(Some(first.snapshot));
        store.remove_node(&mut working, NodeId::new(1)).unwrap();
        let second = store.commit(working).unwrap();

        assert!(store.read_node(second.snapshot, NodeId::new(1)).unwrap().is_none());
        // Prior snapshot unaffected.
        assert!(store.read_node(first.snapshot, NodeId::new(1)).unwrap().is_some());
    }

    #[test]
    fn abandoned_working_revision_writes_nothing() {
        let store = create_store();
        let first = commit_single(&store, None, text_node(1, "keep"));

        {
            let mut working = store.begin_working(Some(first.snapshot));
            store.write_node(&mut working, text_node(2, "discard")).unwrap();
            // Dropped without commit.
        }

        assert_eq!(store.snapshot_count(), 1);
        assert!(store.read_node(first.snapshot, NodeId::new(2)).unwrap().is_none());
    }

    #[test]
    fn restore_rebuilds_snapshots() {
        let backend = Box::new(InMemoryBackend::new());
        let store = PageStore::new(backend, 4, false);

        let first = commit_single(&store, None, text_node(1, "one"));
        let second = commit_single(&store, Some(first.snapshot), text_node(2, "two"));

        // Rebuild a fresh store over the same bytes.
        let data = {
            let backend = store.backend.read();
            backend.read_at(0, backend.size().unwrap() as usize).unwrap()
        };
        let reopened = PageStore::new(Box::new(InMemoryBackend::with_data(data)), 4, false);

        let snap1 = reopened.restore(first.table_offset).unwrap();
        let snap2 = reopened.restore(second.table_offset).unwrap();

        assert!(reopened.read_node(snap1, NodeId::new(1)).unwrap().is_some());
        assert!(reopened.read_node(snap1, NodeId::new(2)).unwrap().is_none());
        assert!(reopened.read_node(snap2, NodeId::new(2)).unwrap().is_some());
    }

    #[test]
    fn unknown_snapshot_rejected() {
        let store = create_store();
        let result = store.read_node(SnapshotId::new(7), NodeId::new(1));
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn page_table_round_trip() {
        let mut table = PageTable::new();
        table.insert(PageNumber::new(0), 128);
        table.insert(PageNumber::new(3), 4096);

        let decoded = PageTable::decode(&table.encode()).unwrap();
        assert_eq!(decoded, table);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.get(PageNumber::new(3)), Some(4096));
        assert!(decoded.get(PageNumber::new(1)).is_none());
    }
}
