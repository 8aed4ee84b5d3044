//! Database and resource configuration.

use crate::error::{CoreError, CoreResult};
use crate::hash::HashStrategy;
use crate::node::DocumentKind;
use crate::page::compute_crc32;

/// Magic bytes for an encoded resource configuration.
pub const CONFIG_MAGIC: [u8; 4] = *b"DNRC";

/// Current configuration format version.
pub const CONFIG_VERSION: u16 = 1;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Whether to create the database directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
        }
    }
}

impl DatabaseConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}

/// Configuration of a single resource.
///
/// Immutable after the resource is created; the encoded form is written
/// next to the resource's data files and re-read on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceConfig {
    /// Tree shape stored by the resource.
    pub document_kind: DocumentKind,

    /// How structural hashes are maintained.
    pub hash_strategy: HashStrategy,

    /// Node slots per page. Small values waste page-table entries, large
    /// values inflate the copy-on-write unit.
    pub nodes_per_page: u16,

    /// Whether node reads verify the stored hash against a recomputation.
    /// Requires an enabled hash strategy to have any effect.
    pub verify_on_read: bool,

    /// Whether commits sync file metadata to disk (safer but slower).
    pub sync_on_commit: bool,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self::new(DocumentKind::Xml)
    }
}

impl ResourceConfig {
    /// Creates a configuration for the given document kind with the
    /// default hash strategy ([`HashStrategy::Rolling`]).
    #[must_use]
    pub const fn new(document_kind: DocumentKind) -> Self {
        Self {
            document_kind,
            hash_strategy: HashStrategy::Rolling,
            nodes_per_page: 64,
            verify_on_read: false,
            sync_on_commit: true,
        }
    }

    /// Sets the hash strategy.
    #[must_use]
    pub const fn hash_strategy(mut self, strategy: HashStrategy) -> Self {
        self.hash_strategy = strategy;
        self
    }

    /// Sets the page capacity in nodes.
    #[must_use]
    pub const fn nodes_per_page(mut self, capacity: u16) -> Self {
        self.nodes_per_page = capacity;
        self
    }

    /// Sets whether reads verify stored hashes.
    #[must_use]
    pub const fn verify_on_read(mut self, value: bool) -> Self {
        self.verify_on_read = value;
        self
    }

    /// Sets whether commits sync to disk.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> CoreResult<()> {
        if self.nodes_per_page == 0 {
            return Err(CoreError::invalid_operation(
                "nodes_per_page must be at least 1",
            ));
        }
        Ok(())
    }

    /// Encodes the configuration to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&CONFIG_MAGIC);
        body.extend_from_slice(&CONFIG_VERSION.to_le_bytes());
        body.push(self.document_kind.as_byte());
        body.push(self.hash_strategy.as_byte());
        body.extend_from_slice(&self.nodes_per_page.to_le_bytes());

        let mut flags = 0u8;
        if self.verify_on_read {
            flags |= 0b0000_0001;
        }
        if self.sync_on_commit {
            flags |= 0b0000_0010;
        }
        body.push(flags);

        let crc = compute_crc32(&body);
        body.extend_from_slice(&crc.to_le_bytes());
        body
    }

    /// Decodes a configuration from bytes.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        const BODY_LEN: usize = 4 + 2 + 1 + 1 + 2 + 1;

        if data.len() != BODY_LEN + 4 {
            return Err(CoreError::invalid_format("resource config size mismatch"));
        }

        let body = &data[..BODY_LEN];
        if body[..4] != CONFIG_MAGIC {
            return Err(CoreError::invalid_format("invalid resource config magic"));
        }

        let version = u16::from_le_bytes([body[4], body[5]]);
        if version > CONFIG_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported resource config version: {version}"
            )));
        }

        let stored_crc = u32::from_le_bytes([
            data[BODY_LEN],
            data[BODY_LEN + 1],
            data[BODY_LEN + 2],
            data[BODY_LEN + 3],
        ]);
        let actual_crc = compute_crc32(body);
        if stored_crc != actual_crc {
            return Err(CoreError::corruption(
                "resource config checksum mismatch",
            ));
        }

        let document_kind = DocumentKind::from_byte(body[6])
            .ok_or_else(|| CoreError::invalid_format("unknown document kind"))?;
        let hash_strategy = HashStrategy::from_byte(body[7])
            .ok_or_else(|| CoreError::invalid_format("unknown hash strategy"))?;
        let nodes_per_page = u16::from_le_bytes([body[8], body[9]]);
        let flags = body[10];

        Ok(Self {
            document_kind,
            hash_strategy,
            nodes_per_page,
            verify_on_read: flags & 0b0000_0001 != 0,
            sync_on_commit: flags & 0b0000_0010 != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_database_config() {
        let config = DatabaseConfig::default();
        assert!(config.create_if_missing);
    }

    #[test]
    fn default_resource_config() {
        let config = ResourceConfig::default();
        assert_eq!(config.document_kind, DocumentKind::Xml);
        assert_eq!(config.hash_strategy, HashStrategy::Rolling);
        assert_eq!(config.nodes_per_page, 64);
        assert!(!config.verify_on_read);
        assert!(config.sync_on_commit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = ResourceConfig::new(DocumentKind::Json)
            .hash_strategy(HashStrategy::Postorder)
            .nodes_per_page(16)
            .verify_on_read(true)
            .sync_on_commit(false);

        assert_eq!(config.document_kind, DocumentKind::Json);
        assert_eq!(config.hash_strategy, HashStrategy::Postorder);
        assert_eq!(config.nodes_per_page, 16);
        assert!(config.verify_on_read);
        assert!(!config.sync_on_commit);
    }

    #[test]
    fn zero_page_capacity_invalid() {
        let config = ResourceConfig::default().nodes_per_page(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn encode_decode_round_trip() {
        let config = ResourceConfig::new(DocumentKind::Json)
            .hash_strategy(HashStrategy::None)
            .nodes_per_page(128)
            .verify_on_read(true);

        let decoded = ResourceConfig::decode(&config.encode()).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn corrupted_config_rejected() {
        let mut encoded = ResourceConfig::default().encode();
        encoded[6] ^= 0xFF;
        assert!(ResourceConfig::decode(&encoded).is_err());
    }

    #[test]
    fn bad_magic_rejected() {
        let result = ResourceConfig::decode(b"XXXXxxxxxxxxxxx");
        assert!(result.is_err());
    }
}
