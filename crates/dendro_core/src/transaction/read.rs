//! Read-only transactions.

use crate::error::{CoreError, CoreResult};
use crate::hash::NodeHash;
use crate::node::{Node, NodePayload};
use crate::resource::ResourceInner;
use crate::revision::RevisionEntry;
use crate::transaction::{child_hashes, TransactionState};
use crate::types::{NodeId, RevisionNumber, TransactionId};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A read-only cursor bound to one committed revision.
///
/// The bound snapshot is immutable, so the transaction's view cannot
/// change for its entire lifetime - not by concurrent commits, not by the
/// transaction's own navigation. Arbitrarily many read transactions may
/// coexist, including ones that outlive the writer that created their
/// revision.
pub struct ReadTransaction {
    resource: Arc<ResourceInner>,
    id: TransactionId,
    entry: RevisionEntry,
    cursor: NodeId,
    state: TransactionState,
}

impl ReadTransaction {
    pub(crate) fn new(resource: Arc<ResourceInner>, entry: RevisionEntry) -> Self {
        let id = resource.txns.next_txid();
        resource.txns.reader_opened();
        Self {
            resource,
            id,
            entry,
            cursor: entry.root,
            state: TransactionState::Active,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the revision this transaction is bound to.
    #[must_use]
    pub fn revision(&self) -> RevisionNumber {
        self.entry.revision
    }

    /// Returns the commit time of the bound revision.
    #[must_use]
    pub fn commit_time(&self) -> DateTime<Utc> {
        self.entry.commit_time()
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
        self.cursor == self.entry.root
    }

    /// Moves the cursor to `id`.
    ///
    /// Returns `false` and leaves the cursor unchanged if no such node
    /// exists in the bound revision.
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
    ///
    /// Returns `false` at the document root.
    pub fn move_to_parent(&mut self) -> CoreResult<bool> {
        self.ensure_active()?;
        let node = self.require_node(self.cursor)?;
        self.follow(node.parent)
    }

    /// Moves the cursor to the first child of the current node.
    pub fn move_to_first_child(&mut self) -> CoreResult<bool> {
        self.ensure_active()?;
        let node = self.require_node(self.cursor)?;
        self.follow(node.first_child)
    }

    /// Moves the cursor to the next sibling of the current node.
    pub fn move_to_next_sibling(&mut self) -> CoreResult<bool> {
        self.ensure_active()?;
        let node = self.require_node(self.cursor)?;
        self.follow(node.next_sibling)
    }

    /// Moves the cursor to the previous sibling of the current node.
    pub fn move_to_prev_sibling(&mut self) -> CoreResult<bool> {
        self.ensure_active()?;
        let node = self.require_node(self.cursor)?;
        self.follow(node.prev_sibling)
    }

    /// Returns a copy of the current node.
    pub fn node(&self) -> CoreResult<Node> {
        self.ensure_active()?;
        let node = self.require_node(self.cursor)?;
        self.maybe_verify(&node)?;
        Ok(node)
    }

    /// Returns the payload of the current node.
    pub fn payload(&self) -> CoreResult<NodePayload> {
        Ok(self.node()?.payload)
    }

    /// Returns the structural hash of the current node.
    ///
    /// # Errors
    ///
    /// Fails with `HashUnsupported` when the resource's hash strategy is
    /// `None` - a missing hash is never reported as a stale or default
    /// value.
    pub fn current_hash(&self) -> CoreResult<NodeHash> {
        self.ensure_active()?;
        if !self.resource.hasher.is_enabled() {
            return Err(CoreError::HashUnsupported);
        }

        let node = self.require_node(self.cursor)?;
        self.maybe_verify(&node)?;
        node.hash
            .ok_or_else(|| CoreError::corruption(format!("{} is missing its hash", node.id)))
    }

    /// Closes the transaction. Idempotent; any later operation fails with
    /// `TransactionClosed`.
    pub fn close(&mut self) {
        if self.state == TransactionState::Active {
            self.state = TransactionState::Closed;
            self.resource.txns.reader_closed();
        }
    }

    fn ensure_active(&self) -> CoreResult<()> {
        self.resource.ensure_open()?;
        if self.state != TransactionState::Active {
            return Err(CoreError::TransactionClosed);
        }
        Ok(())
    }

    fn follow(&mut self, target: Option<NodeId>) -> CoreResult<bool> {
        match target {
            Some(id) => {
                // Links inside a committed revision always resolve.
                self.require_node(id)?;
                self.cursor = id;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn raw_node(&self, id: NodeId) -> CoreResult<Option<Node>> {
        self.resource.pages.read_node(self.entry.snapshot, id)
    }

    fn require_node(&self, id: NodeId) -> CoreResult<Node> {
        self.raw_node(id)?
            .ok_or_else(|| CoreError::corruption(format!("{id} unreachable in {}", self.entry.revision)))
    }

    fn maybe_verify(&self, node: &Node) -> CoreResult<()> {
        if !self.resource.config.verify_on_read || !self.resource.hasher.is_enabled() {
            return Ok(());
        }

        let stored = node
            .hash
            .ok_or_else(|| CoreError::corruption(format!("{} is missing its hash", node.id)))?;
        let hashes = child_hashes(node, |id| self.require_node(id))?;

        match self.resource.hasher.verify(&node.payload, &hashes, &stored) {
            Some(true) | None => Ok(()),
            Some(false) => Err(CoreError::corruption(format!(
                "hash verification failed for {}",
                node.id
            ))),
        }
    }
}

impl Drop for ReadTransaction {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ReadTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadTransaction")
            .field("id", &self.id)
            .field("revision", &self.entry.revision)
            .field("cursor", &self.cursor)
            .field("state", &self.state)
            .finish()
    }
}
