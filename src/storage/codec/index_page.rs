use crate::buffer::PAGE_SIZE;
use crate::error::{ArborError, ArborResult};
use crate::storage::codec::{CommonCodec, DecodedData};
pub use crate::storage::page::{
    IndexPage, IndexPageKind, InternalNode, LeafNode, RecordId, INTERNAL_NODE_MAX_SIZE,
    LEAF_NODE_MAX_SIZE,
};

struct IndexPageKindCodec;

impl IndexPageKindCodec {
    fn encode(kind: IndexPageKind) -> Vec<u8> {
        match kind {
            IndexPageKind::Leaf => CommonCodec::encode_u8(1),
            IndexPageKind::Internal => CommonCodec::encode_u8(2),
        }
    }

    fn decode(bytes: &[u8]) -> ArborResult<DecodedData<IndexPageKind>> {
        let (tag, offset) = CommonCodec::decode_u8(bytes)?;
        match tag {
            1 => Ok((IndexPageKind::Leaf, offset)),
            2 => Ok((IndexPageKind::Internal, offset)),
            _ => Err(ArborError::Storage(format!("invalid index page tag {}", tag))),
        }
    }
}

/// Codec for pages whose kind is only known at runtime (descent reads).
pub struct IndexPageCodec;

impl IndexPageCodec {
    pub fn encode(page: &IndexPage) -> Vec<u8> {
        match page {
            IndexPage::Leaf(leaf) => LeafNodeCodec::encode(leaf),
            IndexPage::Internal(node) => InternalNodeCodec::encode(node),
        }
    }

    pub fn decode(bytes: &[u8]) -> ArborResult<DecodedData<IndexPage>> {
        let (kind, _) = IndexPageKindCodec::decode(bytes)?;
        match kind {
            IndexPageKind::Leaf => {
                let (leaf, offset) = LeafNodeCodec::decode(bytes)?;
                Ok((IndexPage::Leaf(leaf), offset))
            }
            IndexPageKind::Internal => {
                let (node, offset) = InternalNodeCodec::decode(bytes)?;
                Ok((IndexPage::Internal(node), offset))
            }
        }
    }
}

pub struct LeafNodeCodec;

impl LeafNodeCodec {
    pub fn encode(leaf: &LeafNode) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PAGE_SIZE);
        bytes.extend(IndexPageKindCodec::encode(IndexPageKind::Leaf));
        bytes.extend(CommonCodec::encode_u32(leaf.max_size));
        bytes.extend(CommonCodec::encode_u32(leaf.entries.len() as u32));
        bytes.extend(CommonCodec::encode_u32(leaf.next_page_id));
        for (key, rid) in &leaf.entries {
            bytes.extend(CommonCodec::encode_i32(*key));
            bytes.extend(CommonCodec::encode_u32(rid.page_id));
            bytes.extend(CommonCodec::encode_u32(rid.slot_num));
        }
        debug_assert!(bytes.len() <= PAGE_SIZE);
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> ArborResult<DecodedData<LeafNode>> {
        if bytes.len() != PAGE_SIZE {
            return Err(ArborError::Storage(format!(
                "index page size is {} instead of {}",
                bytes.len(),
                PAGE_SIZE
            )));
        }
        let mut left_bytes = bytes;

        let (kind, offset) = IndexPageKindCodec::decode(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        if kind != IndexPageKind::Leaf {
            return Err(ArborError::Storage(
                "index page is not a leaf page".to_string(),
            ));
        }

        let (max_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (key_count, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (next_page_id, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        if key_count as usize > LEAF_NODE_MAX_SIZE {
            return Err(ArborError::Storage(format!(
                "leaf page claims {} entries",
                key_count
            )));
        }
        let mut entries = Vec::with_capacity(key_count as usize);
        for _ in 0..key_count {
            let (key, offset) = CommonCodec::decode_i32(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            let (page_id, offset) = CommonCodec::decode_u32(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            let (slot_num, offset) = CommonCodec::decode_u32(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            entries.push((key, RecordId::new(page_id, slot_num)));
        }

        Ok((
            LeafNode {
                max_size,
                next_page_id,
                entries,
            },
            bytes.len() - left_bytes.len(),
        ))
    }
}

pub struct InternalNodeCodec;

impl InternalNodeCodec {
    pub fn encode(node: &InternalNode) -> Vec<u8> {
        debug_assert_eq!(node.children.len(), node.keys.len() + 1);
        let mut bytes = Vec::with_capacity(PAGE_SIZE);
        bytes.extend(IndexPageKindCodec::encode(IndexPageKind::Internal));
        bytes.extend(CommonCodec::encode_u8(node.level));
        bytes.extend(CommonCodec::encode_u32(node.max_size));
        bytes.extend(CommonCodec::encode_u32(node.keys.len() as u32));
        for key in &node.keys {
            bytes.extend(CommonCodec::encode_i32(*key));
        }
        for child in &node.children {
            bytes.extend(CommonCodec::encode_u32(*child));
        }
        debug_assert!(bytes.len() <= PAGE_SIZE);
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> ArborResult<DecodedData<InternalNode>> {
        if bytes.len() != PAGE_SIZE {
            return Err(ArborError::Storage(format!(
                "index page size is {} instead of {}",
                bytes.len(),
                PAGE_SIZE
            )));
        }
        let mut left_bytes = bytes;

        let (kind, offset) = IndexPageKindCodec::decode(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        if kind != IndexPageKind::Internal {
            return Err(ArborError::Storage(
                "index page is not an internal page".to_string(),
            ));
        }

        let (level, offset) = CommonCodec::decode_u8(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (max_size, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (key_count, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        if key_count as usize > INTERNAL_NODE_MAX_SIZE {
            return Err(ArborError::Storage(format!(
                "internal page claims {} separators",
                key_count
            )));
        }
        let mut keys = Vec::with_capacity(key_count as usize);
        for _ in 0..key_count {
            let (key, offset) = CommonCodec::decode_i32(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            keys.push(key);
        }
        let mut children = Vec::with_capacity(key_count as usize + 1);
        for _ in 0..key_count + 1 {
            let (child, offset) = CommonCodec::decode_u32(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            children.push(child);
        }

        Ok((
            InternalNode {
                max_size,
                level,
                keys,
                children,
            },
            bytes.len() - left_bytes.len(),
        ))
    }
}
