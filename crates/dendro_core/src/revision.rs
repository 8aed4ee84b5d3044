//! Append-only revision index.
//!
//! One entry per committed revision, ordered both by revision number and
//! by commit timestamp. The in-memory entry list is what `most_recent` and
//! timestamp resolution search; the backend holds the same entries as
//! length-prefixed, checksummed records so history survives restarts.

use crate::error::{CoreError, CoreResult};
use crate::page::compute_crc32;
use crate::types::{NodeId, RevisionNumber, SnapshotId};
use chrono::{DateTime, Utc};
use dendro_storage::StorageBackend;
use parking_lot::{Mutex, RwLock};
use tracing::warn;

/// Magic bytes identifying a revision entry record.
pub const REVISION_MAGIC: [u8; 4] = *b"DNRV";

/// Current revision record format version.
pub const REVISION_VERSION: u16 = 1;

/// Fixed byte size of an encoded revision record.
///
/// len (4) + magic (4) + version (2) + revision (8) + timestamp (8) +
/// root (8) + snapshot (8) + table offset (8) + max node id (8) + crc (4).
const RECORD_SIZE: usize = 62;

/// One committed revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionEntry {
    /// Revision number, starting at 0 for the bootstrap revision.
    pub revision: RevisionNumber,
    /// Commit wall-clock time in milliseconds since the Unix epoch.
    /// Strictly increasing across the entries of a resource.
    pub timestamp_ms: i64,
    /// Root node of the revision's tree.
    pub root: NodeId,
    /// Page-store snapshot holding the revision's pages.
    pub snapshot: SnapshotId,
    /// Storage offset of the snapshot's page table record.
    pub table_offset: u64,
    /// Highest node ID allocated up to and including this revision.
    pub max_node_id: NodeId,
}

impl RevisionEntry {
    /// Returns the commit time as a UTC timestamp.
    #[must_use]
    pub fn commit_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp_ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Serializes the entry to a record.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(RECORD_SIZE - 8);
        body.extend_from_slice(&REVISION_MAGIC);
        body.extend_from_slice(&REVISION_VERSION.to_le_bytes());
        body.extend_from_slice(&self.revision.as_u64().to_le_bytes());
        body.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        body.extend_from_slice(&self.root.as_u64().to_le_bytes());
        body.extend_from_slice(&self.snapshot.as_u64().to_le_bytes());
        body.extend_from_slice(&self.table_offset.to_le_bytes());
        body.extend_from_slice(&self.max_node_id.as_u64().to_le_bytes());

        let crc = compute_crc32(&body);

        let mut record = Vec::with_capacity(RECORD_SIZE);
        record.extend_from_slice(&(RECORD_SIZE as u32).to_le_bytes());
        record.extend_from_slice(&body);
        record.extend_from_slice(&crc.to_le_bytes());
        record
    }

    /// Deserializes an entry from a full record.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() != RECORD_SIZE {
            return Err(CoreError::corruption(format!(
                "revision record size mismatch: expected {RECORD_SIZE}, got {}",
                data.len()
            )));
        }

        let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len != RECORD_SIZE {
            return Err(CoreError::corruption("revision record length mismatch"));
        }

        let body = &data[4..RECORD_SIZE - 4];
        if body[..4] != REVISION_MAGIC {
            return Err(CoreError::corruption("invalid revision record magic"));
        }

        let version = u16::from_le_bytes([body[4], body[5]]);
        if version > REVISION_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported revision record version: {version}"
            )));
        }

        let stored_crc = u32::from_le_bytes([
            data[RECORD_SIZE - 4],
            data[RECORD_SIZE - 3],
            data[RECORD_SIZE - 2],
            data[RECORD_SIZE - 1],
        ]);
        let actual_crc = compute_crc32(body);
        if stored_crc != actual_crc {
            return Err(CoreError::corruption(format!(
                "revision record checksum mismatch: expected {stored_crc:08x}, got {actual_crc:08x}"
            )));
        }

        let mut cursor = 6;
        let mut read_u64 = |cursor: &mut usize| -> u64 {
            let bytes: [u8; 8] = body[*cursor..*cursor + 8].try_into().unwrap_or([0u8; 8]);
            *cursor += 8;
            u64::from_le_bytes(bytes)
        };

        let revision = RevisionNumber::new(read_u64(&mut cursor));
        let timestamp_ms = read_u64(&mut cursor) as i64;
        let root = NodeId::new(read_u64(&mut cursor));
        let snapshot = SnapshotId::new(read_u64(&mut cursor));
        let table_offset = read_u64(&mut cursor);
        let max_node_id = NodeId::new(read_u64(&mut cursor));

        Ok(Self {
            revision,
            timestamp_ms,
            root,
            snapshot,
            table_offset,
            max_node_id,
        })
    }
}

/// Append-only index of a resource's committed revisions.
pub struct RevisionIndex {
    backend: Mutex<Box<dyn StorageBackend>>,
    entries: RwLock<Vec<RevisionEntry>>,
    sync_on_commit: bool,
}

impl RevisionIndex {
    /// Creates an empty index over a fresh backend.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            entries: RwLock::new(Vec::new()),
            sync_on_commit,
        }
    }

    /// Opens an index from a backend holding previously appended records.
    ///
    /// A torn final record (from a crash mid-append) is tolerated and
    /// ignored; a complete record that fails its checksum is corruption.
    pub fn open(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> CoreResult<Self> {
        let size = backend.size()?;
        let mut entries = Vec::new();
        let mut offset = 0u64;

        while offset < size {
            if offset + RECORD_SIZE as u64 > size {
                warn!(
                    offset,
                    size, "ignoring torn record at tail of revision index"
                );
                break;
            }

            let data = backend.read_at(offset, RECORD_SIZE)?;
            let entry = RevisionEntry::decode(&data)?;

            let expected = RevisionNumber::new(entries.len() as u64);
            if entry.revision != expected {
                return Err(CoreError::corruption(format!(
                    "revision index out of order: expected {expected}, got {}",
                    entry.revision
                )));
            }

            entries.push(entry);
            offset += RECORD_SIZE as u64;
        }

        Ok(Self {
            backend: Mutex::new(backend),
            entries: RwLock::new(entries),
            sync_on_commit,
        })
    }

    /// Appends a committed revision and publishes it.
    ///
    /// The in-memory push is the atomic publish step: every later
    /// `most_recent` / `resolve_by_timestamp` call sees the entry, no
    /// earlier call ever did.
    pub fn append(&self, entry: RevisionEntry) -> CoreResult<()> {
        {
            let entries = self.entries.read();
            let expected = RevisionNumber::new(entries.len() as u64);
            if entry.revision != expected {
                return Err(CoreError::invalid_operation(format!(
                    "revision {} appended out of order, expected {expected}",
                    entry.revision
                )));
            }
            if let Some(last) = entries.last() {
                if entry.timestamp_ms <= last.timestamp_ms {
                    return Err(CoreError::invalid_operation(
                        "commit timestamps must be strictly increasing",
                    ));
                }
            }
        }

        {
            let mut backend = self.backend.lock();
            backend.append(&entry.encode())?;
            backend.flush()?;
            if self.sync_on_commit {
                backend.sync()?;
            }
        }

        self.entries.write().push(entry);
        Ok(())
    }

    /// Returns the number of committed revisions.
    #[must_use]
    pub fn revision_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no revision has been committed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the most recent revision entry.
    #[must_use]
    pub fn most_recent(&self) -> Option<RevisionEntry> {
        self.entries.read().last().copied()
    }

    /// Returns the entry for a revision number.
    #[must_use]
    pub fn entry(&self, revision: RevisionNumber) -> Option<RevisionEntry> {
        self.entries
            .read()
            .get(revision.as_u64() as usize)
            .copied()
    }

    /// Returns the revision number the next commit will receive.
    #[must_use]
    pub fn next_revision(&self) -> RevisionNumber {
        RevisionNumber::new(self.entries.read().len() as u64)
    }

    /// Returns a commit timestamp for the next revision, clamped so the
    /// sequence stays strictly increasing even if the clock stalls or
    /// steps backwards.
    #[must_use]
    pub fn next_timestamp_ms(&self, now_ms: i64) -> i64 {
        match self.entries.read().last() {
            Some(last) => now_ms.max(last.timestamp_ms + 1),
            None => now_ms,
        }
    }

    /// Resolves a timestamp to the latest revision committed at or before
    /// it.
    ///
    /// Instants before the first commit resolve to revision 0 (the oldest
    /// available state); instants after the last commit resolve to the
    /// most recent revision. Returns `None` only while the index is
    /// empty, which a bootstrapped resource never is.
    #[must_use]
    pub fn resolve_by_timestamp(&self, instant_ms: i64) -> Option<RevisionEntry> {
        let entries = self.entries.read();
        if entries.is_empty() {
            return None;
        }

        let after = entries.partition_point(|entry| entry.timestamp_ms <= instant_ms);
        if after == 0 {
            // Predates history: oldest available state.
            entries.first().copied()
        } else {
            entries.get(after - 1).copied()
        }
    }

    /// Returns a copy of all entries in commit order.
    #[must_use]
    pub fn entries(&self) -> Vec<RevisionEntry> {
        self.entries.read().clone()
    }
}

impl std::fmt::Debug for RevisionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionIndex")
            .field("revision_count", &self.revision_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dendro_storage::InMemoryBackend;

    fn entry(revision: u64, timestamp_ms: i64) -> RevisionEntry {
        RevisionEntry {
            revision: RevisionNumber::new(revision),
            timestamp_ms,
            root: NodeId::DOCUMENT,
            snapshot: SnapshotId::new(revision),
            table_offset: revision * 100,
            max_node_id: NodeId::new(revision * 3),
        }
    }

    fn create_index() -> RevisionIndex {
        RevisionIndex::new(Box::new(InMemoryBackend::new()), false)
    }

    #[test]
    fn entry_round_trip() {
        let original = entry(4, 1_700_000_123_456);
        let decoded = RevisionEntry::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn append_and_most_recent() {
        let index = create_index();
        assert!(index.most_recent().is_none());

        index.append(entry(0, 100)).unwrap();
        index.append(entry(1, 200)).unwrap();

        let recent = index.most_recent().unwrap();
        assert_eq!(recent.revision, RevisionNumber::new(1));
        assert_eq!(index.revision_count(), 2);
    }

    #[test]
    fn out_of_order_revision_rejected() {
        let index = create_index();
        index.append(entry(0, 100)).unwrap();

        let result = index.append(entry(2, 200));
        assert!(result.is_err());
    }

    #[test]
    fn non_increasing_timestamp_rejected() {
        let index = create_index();
        index.append(entry(0, 100)).unwrap();

        let result = index.append(entry(1, 100));
        assert!(result.is_err());
    }

    #[test]
    fn next_timestamp_clamps_backwards_clock() {
        let index = create_index();
        index.append(entry(0, 1_000)).unwrap();

        assert_eq!(index.next_timestamp_ms(500), 1_001);
        assert_eq!(index.next_timestamp_ms(2_000), 2_000);
    }

    #[test]
    fn resolve_by_timestamp_picks_latest_at_or_before() {
        let index = create_index();
        index.append(entry(0, 100)).unwrap();
        index.append(entry(1, 200)).unwrap();
        index.append(entry(2, 300)).unwrap();

        assert_eq!(
            index.resolve_by_timestamp(250).unwrap().revision,
            RevisionNumber::new(1)
        );
        assert_eq!(
            index.resolve_by_timestamp(200).unwrap().revision,
            RevisionNumber::new(1)
        );
        assert_eq!(
            index.resolve_by_timestamp(299).unwrap().revision,
            RevisionNumber::new(1)
        );
        assert_eq!(
            index.resolve_by_timestamp(300).unwrap().revision,
            RevisionNumber::new(2)
        );
    }

    #[test]
    fn resolve_before_history_falls_back_to_first() {
        let index = create_index();
        index.append(entry(0, 100)).unwrap();
        index.append(entry(1, 200)).unwrap();

        let resolved = index.resolve_by_timestamp(50).unwrap();
        assert_eq!(resolved.revision, RevisionNumber::new(0));
    }

    #[test]
    fn resolve_after_history_returns_most_recent() {
        let index = create_index();
        index.append(entry(0, 100)).unwrap();
        index.append(entry(1, 200)).unwrap();

        let resolved = index.resolve_by_timestamp(i64::MAX).unwrap();
        assert_eq!(resolved.revision, RevisionNumber::new(1));
    }

    #[test]
    fn open_rebuilds_entries() {
        let backend = Box::new(InMemoryBackend::new());
        let index = RevisionIndex::new(backend, false);
        index.append(entry(0, 100)).unwrap();
        index.append(entry(1, 200)).unwrap();

        let data = index.backend.lock().read_at(0, RECORD_SIZE * 2).unwrap();
        let reopened =
            RevisionIndex::open(Box::new(InMemoryBackend::with_data(data)), false).unwrap();

        assert_eq!(reopened.revision_count(), 2);
        assert_eq!(
            reopened.most_recent().unwrap().revision,
            RevisionNumber::new(1)
        );
    }

    #[test]
    fn open_ignores_torn_tail() {
        let index = create_index();
        index.append(entry(0, 100)).unwrap();
        index.append(entry(1, 200)).unwrap();

        let mut data = index.backend.lock().read_at(0, RECORD_SIZE * 2).unwrap();
        // A crash mid-append leaves a partial third record behind.
        data.extend_from_slice(&(RECORD_SIZE as u32).to_le_bytes());
        data.extend_from_slice(b"DNRV\x01\x00partial");

        let reopened =
            RevisionIndex::open(Box::new(InMemoryBackend::with_data(data)), false).unwrap();
        assert_eq!(reopened.revision_count(), 2);
    }

    #[test]
    fn open_rejects_corrupt_record() {
        let index = create_index();
        index.append(entry(0, 100)).unwrap();

        let mut data = index.backend.lock().read_at(0, RECORD_SIZE).unwrap();
        data[20] ^= 0xFF;

        let result = RevisionIndex::open(Box::new(InMemoryBackend::with_data(data)), false);
        assert!(result.is_err());
    }

    #[test]
    fn commit_time_conversion() {
        let e = entry(0, 1_700_000_000_000);
        assert_eq!(e.commit_time().timestamp_millis(), 1_700_000_000_000);
    }
}
