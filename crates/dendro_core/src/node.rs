//! Node model for hierarchical documents.
//!
//! Trees are stored in first-child/next-sibling form: every node carries
//! its parent link, its first child, and both sibling links. Ordered
//! children are recovered by following `first_child` and then
//! `next_sibling` until the chain ends.

use crate::error::{CoreError, CoreResult};
use crate::hash::NodeHash;
use crate::types::NodeId;

/// The tree shape a resource stores.
///
/// Fixed at resource creation; every payload written into the resource
/// must belong to this kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Element/attribute/text trees.
    Xml,
    /// Object/array/scalar trees.
    Json,
}

impl DocumentKind {
    /// Converts the kind to its storage byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Xml => 1,
            Self::Json => 2,
        }
    }

    /// Converts a storage byte back to a kind.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Xml),
            2 => Some(Self::Json),
            _ => None,
        }
    }
}

/// Payload carried by a node.
///
/// `Document` is the payload of the root node every resource starts with;
/// it belongs to both document kinds. The remaining variants split between
/// XML and JSON shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum NodePayload {
    /// Root of the document tree.
    Document,
    /// An XML element with its attributes in document order.
    Element {
        /// Qualified element name.
        name: String,
        /// Attribute name/value pairs.
        attributes: Vec<(String, String)>,
    },
    /// An XML text node.
    Text {
        /// Character content.
        value: String,
    },
    /// An XML comment.
    Comment {
        /// Comment content.
        value: String,
    },
    /// A JSON object container.
    Object,
    /// A JSON array container.
    Array,
    /// A JSON object member; its single child holds the member value.
    Field {
        /// Member key.
        key: String,
    },
    /// A JSON string scalar.
    StringValue {
        /// The string value.
        value: String,
    },
    /// A JSON number scalar.
    NumberValue {
        /// The numeric value.
        value: f64,
    },
    /// A JSON boolean scalar.
    BoolValue {
        /// The boolean value.
        value: bool,
    },
    /// A JSON null scalar.
    NullValue,
}

/// Payload tag bytes used both for storage and canonical hashing input.
const TAG_DOCUMENT: u8 = 1;
const TAG_ELEMENT: u8 = 2;
const TAG_TEXT: u8 = 3;
const TAG_COMMENT: u8 = 4;
const TAG_OBJECT: u8 = 5;
const TAG_ARRAY: u8 = 6;
const TAG_FIELD: u8 = 7;
const TAG_STRING_VALUE: u8 = 8;
const TAG_NUMBER_VALUE: u8 = 9;
const TAG_BOOL_VALUE: u8 = 10;
const TAG_NULL_VALUE: u8 = 11;

impl NodePayload {
    /// Returns the storage tag of this payload.
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Document => TAG_DOCUMENT,
            Self::Element { .. } => TAG_ELEMENT,
            Self::Text { .. } => TAG_TEXT,
            Self::Comment { .. } => TAG_COMMENT,
            Self::Object => TAG_OBJECT,
            Self::Array => TAG_ARRAY,
            Self::Field { .. } => TAG_FIELD,
            Self::StringValue { .. } => TAG_STRING_VALUE,
            Self::NumberValue { .. } => TAG_NUMBER_VALUE,
            Self::BoolValue { .. } => TAG_BOOL_VALUE,
            Self::NullValue => TAG_NULL_VALUE,
        }
    }

    /// Checks whether this payload belongs to the given document kind.
    ///
    /// `Document` belongs to both kinds.
    #[must_use]
    pub fn matches_kind(&self, kind: DocumentKind) -> bool {
        match self {
            Self::Document => true,
            Self::Element { .. } | Self::Text { .. } | Self::Comment { .. } => {
                kind == DocumentKind::Xml
            }
            Self::Object
            | Self::Array
            | Self::Field { .. }
            | Self::StringValue { .. }
            | Self::NumberValue { .. }
            | Self::BoolValue { .. }
            | Self::NullValue => kind == DocumentKind::Json,
        }
    }

    /// Returns the canonical byte form of this payload.
    ///
    /// This encoding is deterministic and is the hashing input for the
    /// structural hash: equal payloads always produce equal bytes, and any
    /// payload mutation changes them.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Serializes the payload into `buf`.
    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.tag());

        match self {
            Self::Document | Self::Object | Self::Array | Self::NullValue => {}

            Self::Element { name, attributes } => {
                encode_string(buf, name);
                // Attribute count is bounded by the u16 in the format.
                let count = u16::try_from(attributes.len()).unwrap_or(u16::MAX);
                buf.extend_from_slice(&count.to_le_bytes());
                for (attr_name, attr_value) in attributes.iter().take(usize::from(count)) {
                    encode_string(buf, attr_name);
                    encode_string(buf, attr_value);
                }
            }

            Self::Text { value } | Self::Comment { value } | Self::StringValue { value } => {
                encode_string(buf, value);
            }

            Self::Field { key } => {
                encode_string(buf, key);
            }

            Self::NumberValue { value } => {
                buf.extend_from_slice(&value.to_bits().to_le_bytes());
            }

            Self::BoolValue { value } => {
                buf.push(u8::from(*value));
            }
        }
    }

    /// Deserializes a payload starting at `*cursor`.
    pub(crate) fn decode(data: &[u8], cursor: &mut usize) -> CoreResult<Self> {
        let tag = read_u8(data, cursor)?;

        match tag {
            TAG_DOCUMENT => Ok(Self::Document),
            TAG_OBJECT => Ok(Self::Object),
            TAG_ARRAY => Ok(Self::Array),
            TAG_NULL_VALUE => Ok(Self::NullValue),

            TAG_ELEMENT => {
                let name = read_string(data, cursor)?;
                let count = read_u16(data, cursor)?;
                let mut attributes = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    let attr_name = read_string(data, cursor)?;
                    let attr_value = read_string(data, cursor)?;
                    attributes.push((attr_name, attr_value));
                }
                Ok(Self::Element { name, attributes })
            }

            TAG_TEXT => Ok(Self::Text {
                value: read_string(data, cursor)?,
            }),
            TAG_COMMENT => Ok(Self::Comment {
                value: read_string(data, cursor)?,
            }),
            TAG_STRING_VALUE => Ok(Self::StringValue {
                value: read_string(data, cursor)?,
            }),
            TAG_FIELD => Ok(Self::Field {
                key: read_string(data, cursor)?,
            }),

            TAG_NUMBER_VALUE => {
                let bits = read_u64(data, cursor)?;
                Ok(Self::NumberValue {
                    value: f64::from_bits(bits),
                })
            }

            TAG_BOOL_VALUE => Ok(Self::BoolValue {
                value: read_u8(data, cursor)? != 0,
            }),

            other => Err(CoreError::invalid_format(format!(
                "unknown payload tag: {other}"
            ))),
        }
    }
}

/// A single node of a document tree.
///
/// Nodes are value types; the page store hands out clones so a caller can
/// never mutate a committed revision through a node it read.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Stable node identity.
    pub id: NodeId,
    /// Parent node, `None` for the document root.
    pub parent: Option<NodeId>,
    /// First child in document order.
    pub first_child: Option<NodeId>,
    /// Previous sibling in document order.
    pub prev_sibling: Option<NodeId>,
    /// Next sibling in document order.
    pub next_sibling: Option<NodeId>,
    /// Payload carried by this node.
    pub payload: NodePayload,
    /// Structural hash, present when the resource's hash strategy is
    /// enabled and the hash has been computed.
    pub hash: Option<NodeHash>,
}

impl Node {
    /// Creates a new unlinked node.
    #[must_use]
    pub fn new(id: NodeId, payload: NodePayload) -> Self {
        Self {
            id,
            parent: None,
            first_child: None,
            prev_sibling: None,
            next_sibling: None,
            payload,
            hash: None,
        }
    }

    /// Checks whether this node is the document root.
    #[must_use]
    pub fn is_document_root(&self) -> bool {
        matches!(self.payload, NodePayload::Document)
    }

    /// Serializes the node into `buf`.
    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.id.as_u64().to_le_bytes());
        encode_optional_id(buf, self.parent);
        encode_optional_id(buf, self.first_child);
        encode_optional_id(buf, self.prev_sibling);
        encode_optional_id(buf, self.next_sibling);

        match &self.hash {
            Some(hash) => {
                buf.push(1);
                buf.extend_from_slice(hash.as_bytes());
            }
            None => buf.push(0),
        }

        self.payload.encode_into(buf);
    }

    /// Deserializes a node starting at `*cursor`.
    pub(crate) fn decode(data: &[u8], cursor: &mut usize) -> CoreResult<Self> {
        let id = NodeId::new(read_u64(data, cursor)?);
        let parent = decode_optional_id(data, cursor)?;
        let first_child = decode_optional_id(data, cursor)?;
        let prev_sibling = decode_optional_id(data, cursor)?;
        let next_sibling = decode_optional_id(data, cursor)?;

        let hash = if read_u8(data, cursor)? != 0 {
            let mut bytes = [0u8; crate::hash::HASH_SIZE];
            let raw = read_bytes(data, cursor, crate::hash::HASH_SIZE)?;
            bytes.copy_from_slice(raw);
            Some(NodeHash::from_bytes(bytes))
        } else {
            None
        };

        let payload = NodePayload::decode(data, cursor)?;

        Ok(Self {
            id,
            parent,
            first_child,
            prev_sibling,
            next_sibling,
            payload,
            hash,
        })
    }
}

fn encode_string(buf: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&bytes[..len as usize]);
}

fn encode_optional_id(buf: &mut Vec<u8>, id: Option<NodeId>) {
    match id {
        Some(id) => {
            buf.push(1);
            buf.extend_from_slice(&id.as_u64().to_le_bytes());
        }
        None => buf.push(0),
    }
}

fn decode_optional_id(data: &[u8], cursor: &mut usize) -> CoreResult<Option<NodeId>> {
    if read_u8(data, cursor)? != 0 {
        Ok(Some(NodeId::new(read_u64(data, cursor)?)))
    } else {
        Ok(None)
    }
}

fn read_u8(data: &[u8], cursor: &mut usize) -> CoreResult<u8> {
    let byte = *data
        .get(*cursor)
        .ok_or_else(|| CoreError::invalid_format("node record truncated"))?;
    *cursor += 1;
    Ok(byte)
}

fn read_u16(data: &[u8], cursor: &mut usize) -> CoreResult<u16> {
    let raw = read_bytes(data, cursor, 2)?;
    Ok(u16::from_le_bytes([raw[0], raw[1]]))
}

fn read_u64(data: &[u8], cursor: &mut usize) -> CoreResult<u64> {
    let raw = read_bytes(data, cursor, 8)?;
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| CoreError::invalid_format("invalid u64"))?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_bytes<'a>(data: &'a [u8], cursor: &mut usize, len: usize) -> CoreResult<&'a [u8]> {
    let end = cursor
        .checked_add(len)
        .ok_or_else(|| CoreError::invalid_format("node record truncated"))?;
    if end > data.len() {
        return Err(CoreError::invalid_format("node record truncated"));
    }
    let slice = &data[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn read_string(data: &[u8], cursor: &mut usize) -> CoreResult<String> {
    let len = {
        let raw = read_bytes(data, cursor, 4)?;
        u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize
    };
    let raw = read_bytes(data, cursor, len)?;
    let value = std::str::from_utf8(raw)
        .map_err(|_| CoreError::invalid_format("invalid UTF-8 in node payload"))?;
    Ok(value.to_string())
}
