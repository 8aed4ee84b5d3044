//! Page records and their serialization.

use crate::error::{CoreError, CoreResult};
use crate::node::Node;
use crate::types::{NodeId, PageNumber};

/// Magic bytes identifying a node page record.
pub const PAGE_MAGIC: [u8; 4] = *b"DNPG";

/// Magic bytes identifying a page table record.
pub const TABLE_MAGIC: [u8; 4] = *b"DNPT";

/// Current page format version.
pub const PAGE_VERSION: u16 = 1;

/// A fixed-capacity group of node slots.
///
/// The slot of a node within its page is `node_id % capacity`; the page
/// number is `node_id / capacity`. Pages are value types: the store clones
/// a page into the working revision before the first write touches it.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    number: PageNumber,
    slots: Vec<Option<Node>>,
}

impl Page {
    /// Creates an empty page.
    #[must_use]
    pub fn new(number: PageNumber, capacity: u16) -> Self {
        Self {
            number,
            slots: vec![None; usize::from(capacity)],
        }
    }

    /// Returns the page number.
    #[must_use]
    pub fn number(&self) -> PageNumber {
        self.number
    }

    /// Returns the slot capacity.
    #[must_use]
    pub fn capacity(&self) -> u16 {
        self.slots.len() as u16
    }

    /// Returns the node in `slot`, if any.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&Node> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Stores a node in `slot`.
    pub fn set(&mut self, slot: usize, node: Node) {
        if slot < self.slots.len() {
            self.slots[slot] = Some(node);
        }
    }

    /// Clears `slot`.
    pub fn clear(&mut self, slot: usize) {
        if slot < self.slots.len() {
            self.slots[slot] = None;
        }
    }

    /// Returns the number of occupied slots.
    #[must_use]
    pub fn live_nodes(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Serializes the page to a length-prefixed, checksummed record.
    ///
    /// Layout: `len (4) | magic (4) | version (2) | page number (8) |
    /// capacity (2) | slots | crc32 (4)`, where `len` counts the whole
    /// record including itself and the checksum.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&PAGE_MAGIC);
        body.extend_from_slice(&PAGE_VERSION.to_le_bytes());
        body.extend_from_slice(&self.number.as_u64().to_le_bytes());
        body.extend_from_slice(&self.capacity().to_le_bytes());

        for slot in &self.slots {
            match slot {
                Some(node) => {
                    body.push(1);
                    node.encode_into(&mut body);
                }
                None => body.push(0),
            }
        }

        let crc = compute_crc32(&body);
        let total = 4 + body.len() + 4;

        let mut record = Vec::with_capacity(total);
        record.extend_from_slice(&(total as u32).to_le_bytes());
        record.extend_from_slice(&body);
        record.extend_from_slice(&crc.to_le_bytes());
        record
    }

    /// Deserializes a page from a full record produced by [`Page::encode`].
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let body = check_record(data, &PAGE_MAGIC, "page")?;
        let mut cursor = PAGE_MAGIC.len() + 2;

        let number = PageNumber::new(read_u64(body, &mut cursor)?);
        let capacity = read_u16(body, &mut cursor)?;

        let mut slots = Vec::with_capacity(usize::from(capacity));
        for _ in 0..capacity {
            let occupied = *body
                .get(cursor)
                .ok_or_else(|| CoreError::corruption("page record truncated"))?;
            cursor += 1;
            if occupied != 0 {
                slots.push(Some(Node::decode(body, &mut cursor)?));
            } else {
                slots.push(None);
            }
        }

        if cursor != body.len() {
            return Err(CoreError::corruption("trailing bytes in page record"));
        }

        Ok(Self { number, slots })
    }
}

/// Validates the envelope of a record and returns its body (everything
/// between the length prefix and the checksum).
pub(crate) fn check_record<'a>(
    data: &'a [u8],
    magic: &[u8; 4],
    what: &str,
) -> CoreResult<&'a [u8]> {
    if data.len() < 4 + magic.len() + 2 + 4 {
        return Err(CoreError::corruption(format!("{what} record too short")));
    }

    let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if len != data.len() {
        return Err(CoreError::corruption(format!(
            "{what} record length mismatch: header says {len}, got {}",
            data.len()
        )));
    }

    let body = &data[4..data.len() - 4];
    if &body[..magic.len()] != magic {
        return Err(CoreError::corruption(format!("invalid {what} magic")));
    }

    let version = u16::from_le_bytes([body[magic.len()], body[magic.len() + 1]]);
    if version > PAGE_VERSION {
        return Err(CoreError::invalid_format(format!(
            "unsupported {what} version: {version}"
        )));
    }

    let stored_crc = u32::from_le_bytes([
        data[data.len() - 4],
        data[data.len() - 3],
        data[data.len() - 2],
        data[data.len() - 1],
    ]);
    let actual_crc = compute_crc32(body);
    if stored_crc != actual_crc {
        return Err(CoreError::corruption(format!(
            "{what} checksum mismatch: expected {stored_crc:08x}, got {actual_crc:08x}"
        )));
    }

    Ok(body)
}

fn read_u16(data: &[u8], cursor: &mut usize) -> CoreResult<u16> {
    if *cursor + 2 > data.len() {
        return Err(CoreError::corruption("record truncated"));
    }
    let value = u16::from_le_bytes([data[*cursor], data[*cursor + 1]]);
    *cursor += 2;
    Ok(value)
}

pub(crate) fn read_u64(data: &[u8], cursor: &mut usize) -> CoreResult<u64> {
    if *cursor + 8 > data.len() {
        return Err(CoreError::corruption("record truncated"));
    }
    let bytes: [u8; 8] = data[*cursor..*cursor + 8]
        .try_into()
        .map_err(|_| CoreError::corruption("invalid u64"))?;
    *cursor += 8;
    Ok(u64::from_le_bytes(bytes))
}

/// Computes a CRC32 checksum (IEEE polynomial) for data.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    let table: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ table[index];
    }
    !crc
}

/// Helper for tests and the store: the slot a node occupies.
pub(crate) fn slot_of(id: NodeId, capacity: u16) -> usize {
    (id.as_u64() % u64::from(capacity)) as usize
}
