//! Write transactions.

use crate::error::{CoreError, CoreResult};
use crate::hash::{HashStrategy, NodeHash};
use crate::node::{Node, NodePayload};
use crate::page::WorkingRevision;
use crate::resource::ResourceInner;
use crate::revision::RevisionEntry;
use crate::transaction::{child_hashes, TransactionState};
use crate::types::{NodeId, RevisionNumber, TransactionId};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// The single write cursor of a resource.
///
/// A write transaction owns the in-progress next revision: every mutation
/// lands in a private copy-on-write working set that no reader can
/// observe. `commit` turns the working set into the next committed
/// revision in one atomic publish; `abort` (or dropping the transaction)
/// discards it without a trace. The writer slot is held for the
/// transaction's lifetime and released on commit, abort, or drop.
pub struct WriteTransaction {
    resource: Arc<ResourceInner>,
    id: TransactionId,
    base: RevisionEntry,
    working: WorkingRevision,
    cursor: NodeId,
    next_node_id: u64,
    /// Nodes whose hashes must be recomputed at commit (postorder
    /// strategy only).
    stale_hashes: HashSet<NodeId>,
    state: TransactionState,
}

impl WriteTransaction {
    pub(crate) fn new(resource: Arc<ResourceInner>, base: RevisionEntry) -> Self {
        let id = resource.txns.next_txid();
        let working = resource.pages.begin_working(Some(base.snapshot));
        Self {
            id,
            base,
            working,
            cursor: base.root,
            next_node_id: base.max_node_id.as_u64() + 1,
            stale_hashes: HashSet::new(),
            state: TransactionState::Active,
            resource,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the committed revision this transaction builds on.
    #[must_use]
    pub fn base_revision(&self) -> RevisionNumber {
        self.base.revision
    }

    /// Returns the node the cursor currently points at.
    #[must_use]
    pub fn cursor(&self) -> NodeId {
        self.cursor
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether the cursor is at the document root.
    #[must_use]
    pub fn is_document_root(&self) -> bool {
        self.cursor == self.base.root
    }

    /// Moves the cursor to `id`.
    ///
    /// Returns `false` and leaves the cursor unchanged if no such node
    /// exists in the working revision.
    pub fn move_to(&mut self, id: NodeId) -> CoreResult<bool> {
        self.ensure_active()?;
        if self.raw_node(id)?.is_some() {
            self.cursor = id;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Moves the cursor to the parent of the current node.
    pub fn move_to_parent(&mut self) -> CoreResult<bool> {
        self.ensure_active()?;
        let node = self.require_cursor()?;
        self.follow(node.parent)
    }

    /// Moves the cursor to the first child of the current node.
    pub fn move_to_first_child(&mut self) -> CoreResult<bool> {
        self.ensure_active()?;
        let node = self.require_cursor()?;
        self.follow(node.first_child)
    }

    /// Moves the cursor to the next sibling of the current node.
    pub fn move_to_next_sibling(&mut self) -> CoreResult<bool> {
        self.ensure_active()?;
        let node = self.require_cursor()?;
        self.follow(node.next_sibling)
    }

    /// Moves the cursor to the previous sibling of the current node.
    pub fn move_to_prev_sibling(&mut self) -> CoreResult<bool> {
        self.ensure_active()?;
        let node = self.require_cursor()?;
        self.follow(node.prev_sibling)
    }

    /// Returns a copy of the current node as it stands in the working
    /// revision.
    pub fn node(&self) -> CoreResult<Node> {
        self.ensure_active()?;
        self.require_cursor()
    }

    /// Returns the payload of the current node.
    pub fn payload(&self) -> CoreResult<NodePayload> {
        Ok(self.node()?.payload)
    }

    /// Returns the structural hash of the current node.
    ///
    /// # Errors
    ///
    /// - `HashUnsupported` when the hash strategy is `None`
    /// - `InvalidOperation` under the postorder strategy, whose hashes
    ///   are only recomputed at commit and are stale until then
    pub fn current_hash(&self) -> CoreResult<NodeHash> {
        self.ensure_active()?;
        match self.resource.hasher.strategy() {
            HashStrategy::None => Err(CoreError::HashUnsupported),
            HashStrategy::Postorder => Err(CoreError::invalid_operation(
                "postorder hashes are recomputed at commit; read them from a read transaction",
            )),
            HashStrategy::Rolling => {
                let node = self.require_cursor()?;
                node.hash.ok_or_else(|| {
                    CoreError::corruption(format!("{} is missing its hash", node.id))
                })
            }
        }
    }

    /// Inserts a new node as the first child of the current node and
    /// moves the cursor to it.
    pub fn insert_first_child(&mut self, payload: NodePayload) -> CoreResult<NodeId> {
        self.ensure_active()?;
        self.check_payload(&payload)?;

        let mut parent = self.require_cursor()?;
        let id = self.allocate_id();

        let mut node = Node::new(id, payload);
        node.parent = Some(parent.id);
        node.next_sibling = parent.first_child;

        if let Some(old_first) = parent.first_child {
            let mut old = self.require_node(old_first)?;
            old.prev_sibling = Some(id);
            self.write(old)?;
        }

        parent.first_child = Some(id);
        self.write(parent)?;
        self.write(node)?;

        self.note_change(id)?;
        self.cursor = id;
        Ok(id)
    }

    /// Inserts a new node as the next sibling of the current node and
    /// moves the cursor to it.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` at the document root, which cannot
    /// have siblings.
    pub fn insert_next_sibling(&mut self, payload: NodePayload) -> CoreResult<NodeId> {
        self.ensure_active()?;
        self.check_payload(&payload)?;

        let mut current = self.require_cursor()?;
        let Some(parent_id) = current.parent else {
            return Err(CoreError::invalid_operation(
                "the document root cannot have siblings",
            ));
        };

        let id = self.allocate_id();
        let mut node = Node::new(id, payload);
        node.parent = Some(parent_id);
        node.prev_sibling = Some(current.id);
        node.next_sibling = current.next_sibling;

        if let Some(old_next) = current.next_sibling {
            let mut old = self.require_node(old_next)?;
            old.prev_sibling = Some(id);
            self.write(old)?;
        }

        current.next_sibling = Some(id);
        self.write(current)?;
        self.write(node)?;

        self.note_change(id)?;
        self.cursor = id;
        Ok(id)
    }

    /// Replaces the payload of the current node.
    pub fn set_payload(&mut self, payload: NodePayload) -> CoreResult<()> {
        let cursor = self.cursor;
        self.set_payload_of(cursor, payload)
    }

    /// Replaces the payload of an existing node by ID without moving the
    /// cursor.
    ///
    /// # Errors
    ///
    /// Fails with `NodeNotFound` if `id` is neither present in the base
    /// revision nor newly created in this transaction.
    pub fn set_payload_of(&mut self, id: NodeId, payload: NodePayload) -> CoreResult<()> {
        self.ensure_active()?;
        self.check_payload(&payload)?;

        if id == self.base.root {
            return Err(CoreError::invalid_operation(
                "the document root payload cannot be replaced",
            ));
        }

        let mut node = self
            .raw_node(id)?
            .ok_or_else(|| CoreError::node_not_found(id))?;
        node.payload = payload;
        self.write(node)?;

        self.note_change(id)
    }

    /// Removes the current node and its whole subtree, then moves the
    /// cursor to the removed node's parent.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` at the document root.
    pub fn remove_subtree(&mut self) -> CoreResult<()> {
        self.ensure_active()?;

        let node = self.require_cursor()?;
        let Some(parent_id) = node.parent else {
            return Err(CoreError::invalid_operation(
                "the document root cannot be removed",
            ));
        };

        // Collect while the links are still intact.
        let doomed = self.collect_subtree(node.id)?;

        // Unlink from siblings and parent.
        match node.prev_sibling {
            Some(prev_id) => {
                let mut prev = self.require_node(prev_id)?;
                prev.next_sibling = node.next_sibling;
                self.write(prev)?;
            }
            None => {
                let mut parent = self.require_node(parent_id)?;
                parent.first_child = node.next_sibling;
                self.write(parent)?;
            }
        }
        if let Some(next_id) = node.next_sibling {
            let mut next = self.require_node(next_id)?;
            next.prev_sibling = node.prev_sibling;
            self.write(next)?;
        }

        for id in &doomed {
            self.resource.pages.remove_node(&mut self.working, *id)?;
            self.stale_hashes.remove(id);
        }

        self.cursor = parent_id;
        match self.resource.hasher.strategy() {
            HashStrategy::None => Ok(()),
            HashStrategy::Rolling => self.refresh_path(parent_id),
            HashStrategy::Postorder => {
                self.stale_hashes.insert(parent_id);
                Ok(())
            }
        }
    }

    /// Commits the working revision and returns the new revision number.
    ///
    /// Publishing the revision entry is a single indivisible step: every
    /// later read of "most recent" observes the full revision, no earlier
    /// read observes any of it.
    pub fn commit(mut self) -> CoreResult<RevisionNumber> {
        self.ensure_active()?;

        if self.resource.hasher.strategy() == HashStrategy::Postorder {
            self.finalize_postorder_hashes()?;
        }

        let working = std::mem::replace(&mut self.working, WorkingRevision::new(None));
        let pages_dirtied = working.dirty_page_count();
        let max_node_id = NodeId::new(self.next_node_id - 1);

        let committed = self.resource.pages.commit(working)?;
        let revision = self.resource.revisions.next_revision();
        let timestamp_ms = self
            .resource
            .revisions
            .next_timestamp_ms(Utc::now().timestamp_millis());

        let appended = self.resource.revisions.append(RevisionEntry {
            revision,
            timestamp_ms,
            root: self.base.root,
            snapshot: committed.snapshot,
            table_offset: committed.table_offset,
            max_node_id,
        });
        if let Err(err) = appended {
            // Keep snapshot tokens aligned with the revision index.
            self.resource.pages.discard_snapshot(committed.snapshot);
            return Err(err);
        }

        debug!(
            resource = %self.resource.name,
            revision = revision.as_u64(),
            pages = pages_dirtied,
            "committed revision"
        );

        self.state = TransactionState::Committed;
        self.resource.txns.release_writer();
        Ok(revision)
    }

    /// Aborts the transaction, discarding every pending write without
    /// creating a revision.
    pub fn abort(mut self) -> CoreResult<()> {
        self.ensure_active()?;
        self.state = TransactionState::Aborted;
        self.resource.txns.release_writer();
        Ok(())
    }

    fn ensure_active(&self) -> CoreResult<()> {
        self.resource.ensure_open()?;
        if self.state != TransactionState::Active {
            return Err(CoreError::TransactionClosed);
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> NodeId {
        let id = NodeId::new(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    fn check_payload(&self, payload: &NodePayload) -> CoreResult<()> {
        if matches!(payload, NodePayload::Document) {
            return Err(CoreError::invalid_operation(
                "the document payload is reserved for the root node",
            ));
        }
        if !payload.matches_kind(self.resource.config.document_kind) {
            return Err(CoreError::invalid_operation(format!(
                "payload does not match the resource's {:?} document kind",
                self.resource.config.document_kind
            )));
        }
        Ok(())
    }

    fn follow(&mut self, target: Option<NodeId>) -> CoreResult<bool> {
        match target {
            Some(id) => {
                self.require_node(id)?;
                self.cursor = id;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn raw_node(&self, id: NodeId) -> CoreResult<Option<Node>> {
        self.resource.pages.read_node_working(&self.working, id)
    }

    fn require_node(&self, id: NodeId) -> CoreResult<Node> {
        self.raw_node(id)?
            .ok_or_else(|| CoreError::corruption(format!("{id} unreachable in working revision")))
    }

    fn require_cursor(&self) -> CoreResult<Node> {
        self.require_node(self.cursor)
    }

    fn write(&mut self, node: Node) -> CoreResult<()> {
        self.resource.pages.write_node(&mut self.working, node)
    }

    /// Records a structural change for hash maintenance.
    fn note_change(&mut self, id: NodeId) -> CoreResult<()> {
        match self.resource.hasher.strategy() {
            HashStrategy::None => Ok(()),
            HashStrategy::Rolling => self.refresh_path(id),
            HashStrategy::Postorder => {
                self.stale_hashes.insert(id);
                Ok(())
            }
        }
    }

    /// Recomputes the hash of one node from its children's current
    /// hashes.
    fn refresh_hash(&mut self, id: NodeId) -> CoreResult<()> {
        let mut node = self.require_node(id)?;
        let hashes = child_hashes(&node, |child| self.require_node(child))?;
        node.hash = self.resource.hasher.compute(&node.payload, &hashes);
        self.write(node)
    }

    /// Recomputes hashes bottom-up from `start` to the root. Any node
    /// write invalidates every ancestor's hash, so the whole path is
    /// refreshed.
    fn refresh_path(&mut self, start: NodeId) -> CoreResult<()> {
        let mut current = Some(start);
        while let Some(id) = current {
            self.refresh_hash(id)?;
            current = self.require_node(id)?.parent;
        }
        Ok(())
    }

    /// Recomputes every stale hash in one bottom-up pass (deepest nodes
    /// first), so each affected node is hashed exactly once per commit.
    fn finalize_postorder_hashes(&mut self) -> CoreResult<()> {
        let mut affected: HashSet<NodeId> = HashSet::new();
        let stale: Vec<NodeId> = self.stale_hashes.iter().copied().collect();

        for id in stale {
            if self.raw_node(id)?.is_none() {
                // Mutated and later removed within this transaction.
                continue;
            }

            let mut current = Some(id);
            while let Some(node_id) = current {
                if !affected.insert(node_id) {
                    break;
                }
                current = self.require_node(node_id)?.parent;
            }
        }

        let mut ordered: Vec<(usize, NodeId)> = Vec::with_capacity(affected.len());
        for id in affected {
            ordered.push((self.depth_of(id)?, id));
        }
        ordered.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, id) in ordered {
            self.refresh_hash(id)?;
        }

        self.stale_hashes.clear();
        Ok(())
    }

    fn depth_of(&self, id: NodeId) -> CoreResult<usize> {
        let mut depth = 0;
        let mut current = self.require_node(id)?.parent;
        while let Some(parent_id) = current {
            depth += 1;
            current = self.require_node(parent_id)?.parent;
        }
        Ok(depth)
    }

    /// Collects a subtree's node IDs in document order.
    fn collect_subtree(&self, root: NodeId) -> CoreResult<Vec<NodeId>> {
        let mut ids = Vec::new();
        let mut stack = vec![root];

        while let Some(id) = stack.pop() {
            let node = self.require_node(id)?;
            ids.push(id);

            let mut child = node.first_child;
            while let Some(child_id) = child {
                stack.push(child_id);
                child = self.require_node(child_id)?.next_sibling;
            }
        }

        Ok(ids)
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        // An unfinished transaction aborts implicitly; the working set is
        // discarded and the writer slot freed.
        if self.state == TransactionState::Active {
            self.state = TransactionState::Aborted;
            self.resource.txns.release_writer();
        }
    }
}

impl std::fmt::Debug for WriteTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("id", &self.id)
            .field("base_revision", &self.base.revision)
            .field("cursor", &self.cursor)
            .field("dirty_pages", &self.working.dirty_page_count())
            .field("state", &self.state)
            .finish()
    }
}
