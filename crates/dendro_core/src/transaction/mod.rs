//! Transactions and cursors.
//!
//! A transaction is a cursor bound to exactly one revision: a read
//! transaction to a committed snapshot whose view never changes, a write
//! transaction to the private working revision that becomes the next
//! commit. Navigation is a pure function of the cursor plus the immutable
//! snapshot it is bound to.

mod manager;
mod read;
mod write;

pub use manager::TransactionManager;
pub use read::ReadTransaction;
pub use write::WriteTransaction;

use crate::error::{CoreError, CoreResult};
use crate::hash::NodeHash;
use crate::node::Node;
use crate::types::{NodeId, RevisionNumber};
use chrono::{DateTime, Utc};

/// Selects the revision a read transaction is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionSelector {
    /// The most recently committed revision.
    MostRecent,
    /// An explicit revision number.
    Number(RevisionNumber),
    /// The latest revision committed at or before the given instant.
    Timestamp(DateTime<Utc>),
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// The transaction accepts operations.
    Active,
    /// The transaction committed a new revision.
    Committed,
    /// The transaction was rolled back; nothing was published.
    Aborted,
    /// The transaction was closed without committing.
    Closed,
}

/// Collects the hashes of a node's children in document order.
///
/// `fetch` reads a node from whatever view the caller is navigating
/// (snapshot or working revision). A child without a hash means the store
/// violated the invariant that enabled strategies hash every node.
pub(crate) fn child_hashes<F>(node: &Node, mut fetch: F) -> CoreResult<Vec<NodeHash>>
where
    F: FnMut(NodeId) -> CoreResult<Node>,
{
    let mut hashes = Vec::new();
    let mut next = node.first_child;

    while let Some(id) = next {
        let child = fetch(id)?;
        let hash = child
            .hash
            .ok_or_else(|| CoreError::corruption(format!("{id} is missing its hash")))?;
        hashes.push(hash);
        next = child.next_sibling;
    }

    Ok(hashes)
}
