//! Copy-on-write node page store.
//!
//! Nodes are grouped into fixed-capacity pages keyed by a page number
//! derived from the node ID. Committed pages are immutable records in the
//! storage backend; a revision's view of the tree is a page table mapping
//! page numbers to record offsets. Committing a working revision appends
//! only the pages it dirtied plus a new page table, so unchanged subtrees
//! cost no extra storage across revisions.

mod page;
mod store;

pub use page::{compute_crc32, Page, PAGE_MAGIC, PAGE_VERSION, TABLE_MAGIC};
pub use store::{CommittedPages, PageStore, PageTable, WorkingRevision};
