//! Structural hash engine.
//!
//! Every node of a hashed resource carries a SHA-256 digest of its own
//! payload combined with the digests of its children in document order.
//! The root digest therefore changes if and only if anything anywhere in
//! the tree changed, which is what backs ETag-style change detection and
//! tamper checks. The engine is pure; it performs no I/O.

use crate::node::NodePayload;
use sha2::{Digest, Sha256};
use std::fmt;

/// Size of a structural hash in bytes.
pub const HASH_SIZE: usize = 32;

/// A node's structural hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHash([u8; HASH_SIZE]);

impl NodeHash {
    /// Creates a hash from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw hash bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHash({self})")
    }
}

/// How a resource maintains structural hashes.
///
/// Fixed at resource creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashStrategy {
    /// Hashing disabled. Hash queries fail with `HashUnsupported` rather
    /// than returning a stale or default value.
    None,
    /// Hashes are kept current on every write: the written node and all
    /// of its ancestors are recomputed immediately.
    Rolling,
    /// Hashes are recomputed bottom-up in one pass at commit. Cheaper for
    /// many edits deep in the tree, at the price of hashes being stale
    /// inside an open write transaction.
    Postorder,
}

impl HashStrategy {
    /// Whether this strategy produces hashes at all.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Converts the strategy to its storage byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Rolling => 1,
            Self::Postorder => 2,
        }
    }

    /// Converts a storage byte back to a strategy.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::None),
            1 => Some(Self::Rolling),
            2 => Some(Self::Postorder),
            _ => None,
        }
    }
}

/// Computes and verifies structural hashes for one resource.
#[derive(Debug, Clone, Copy)]
pub struct HashEngine {
    strategy: HashStrategy,
}

impl HashEngine {
    /// Creates an engine for the given strategy.
    #[must_use]
    pub const fn new(strategy: HashStrategy) -> Self {
        Self { strategy }
    }

    /// Returns the configured strategy.
    #[must_use]
    pub const fn strategy(&self) -> HashStrategy {
        self.strategy
    }

    /// Whether hashing is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.strategy.is_enabled()
    }

    /// Computes a node's hash from its payload and its children's hashes
    /// in document order.
    ///
    /// Returns `None` when the strategy is [`HashStrategy::None`]; absence
    /// is the sentinel, so disabled hashing can never be mistaken for a
    /// real digest.
    #[must_use]
    pub fn compute(&self, payload: &NodePayload, child_hashes: &[NodeHash]) -> Option<NodeHash> {
        if !self.is_enabled() {
            return None;
        }

        let mut hasher = Sha256::new();
        hasher.update(payload.canonical_bytes());
        for child in child_hashes {
            hasher.update(child.as_bytes());
        }

        let digest = hasher.finalize();
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(&digest);
        Some(NodeHash::from_bytes(bytes))
    }

    /// Verifies a stored hash against a recomputation.
    ///
    /// Returns `None` when the strategy is [`HashStrategy::None`].
    #[must_use]
    pub fn verify(
        &self,
        payload: &NodePayload,
        child_hashes: &[NodeHash],
        stored: &NodeHash,
    ) -> Option<bool> {
        self.compute(payload, child_hashes)
            .map(|computed| computed == *stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> NodePayload {
        NodePayload::Text {
            value: value.to_string(),
        }
    }

    #[test]
    fn disabled_strategy_produces_no_hash() {
        let engine = HashEngine::new(HashStrategy::None);
        assert!(!engine.is_enabled());
        assert!(engine.compute(&text("x"), &[]).is_none());
        let stored = NodeHash::from_bytes([0u8; HASH_SIZE]);
        assert!(engine.verify(&text("x"), &[], &stored).is_none());
    }

    #[test]
    fn compute_is_deterministic() {
        let engine = HashEngine::new(HashStrategy::Rolling);
        let a = engine.compute(&text("same"), &[]).unwrap();
        let b = engine.compute(&text("same"), &[]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn payload_mutation_changes_hash() {
        let engine = HashEngine::new(HashStrategy::Rolling);
        let a = engine.compute(&text("alpha"), &[]).unwrap();
        let b = engine.compute(&text("beta"), &[]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn child_hash_feeds_parent() {
        let engine = HashEngine::new(HashStrategy::Rolling);
        let child_a = engine.compute(&text("a"), &[]).unwrap();
        let child_b = engine.compute(&text("b"), &[]).unwrap();

        let parent = NodePayload::Element {
            name: "p".to_string(),
            attributes: Vec::new(),
        };
        let with_a = engine.compute(&parent, &[child_a]).unwrap();
        let with_b = engine.compute(&parent, &[child_b]).unwrap();
        assert_ne!(with_a, with_b);
    }

    #[test]
    fn child_order_matters() {
        let engine = HashEngine::new(HashStrategy::Rolling);
        let a = engine.compute(&text("a"), &[]).unwrap();
        let b = engine.compute(&text("b"), &[]).unwrap();

        let forward = engine.compute(&NodePayload::Object, &[a, b]).unwrap();
        let reverse = engine.compute(&NodePayload::Object, &[b, a]).unwrap();
        assert_ne!(forward, reverse);
    }

    #[test]
    fn verify_detects_mismatch() {
        let engine = HashEngine::new(HashStrategy::Postorder);
        let good = engine.compute(&text("x"), &[]).unwrap();
        assert_eq!(engine.verify(&text("x"), &[], &good), Some(true));

        let tampered = NodeHash::from_bytes([0xAB; HASH_SIZE]);
        assert_eq!(engine.verify(&text("x"), &[], &tampered), Some(false));
    }

    #[test]
    fn strategy_byte_round_trip() {
        for strategy in [
            HashStrategy::None,
            HashStrategy::Rolling,
            HashStrategy::Postorder,
        ] {
            assert_eq!(HashStrategy::from_byte(strategy.as_byte()), Some(strategy));
        }
        assert!(HashStrategy::from_byte(9).is_none());
    }

    #[test]
    fn display_is_hex() {
        let hash = NodeHash::from_bytes([0x0F; HASH_SIZE]);
        let hex = hash.to_string();
        assert_eq!(hex.len(), HASH_SIZE * 2);
        assert!(hex.chars().all(|c| c == '0' || c == 'f'));
    }
}
