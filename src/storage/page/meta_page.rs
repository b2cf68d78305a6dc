use crate::buffer::{PageId, PAGE_SIZE};
use crate::error::{ArborError, ArborResult};
use crate::storage::codec::{CommonCodec, DecodedData};

/// The index meta page always sits at page 1 of the index file.
pub const INDEX_META_PAGE_ID: PageId = 1;

/// Attribute datatype tag stored in the index meta page. Only `Int` is
/// supported by the engine; the others exist so an on-disk tag outside the
/// supported set is diagnosable rather than garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Int,
    Double,
    Varchar,
}

impl AttrType {
    pub fn to_u8(self) -> u8 {
        match self {
            AttrType::Int => 0,
            AttrType::Double => 1,
            AttrType::Varchar => 2,
        }
    }

    pub fn from_u8(tag: u8) -> ArborResult<Self> {
        match tag {
            0 => Ok(AttrType::Int),
            1 => Ok(AttrType::Double),
            2 => Ok(AttrType::Varchar),
            _ => Err(ArborError::Storage(format!(
                "invalid attribute type tag {}",
                tag
            ))),
        }
    }
}

/// Persistent identity of an index: which relation and attribute it was
/// built over, and where the tree's root currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetaPage {
    pub relation: String,
    pub attr_byte_offset: u32,
    pub attr_type: AttrType,
    pub root_page_id: PageId,
}

pub fn encode_index_meta(meta: &IndexMetaPage) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(PAGE_SIZE);
    bytes.extend(CommonCodec::encode_bytes(meta.relation.as_bytes()));
    bytes.extend(CommonCodec::encode_u32(meta.attr_byte_offset));
    bytes.extend(CommonCodec::encode_u8(meta.attr_type.to_u8()));
    bytes.extend(CommonCodec::encode_u32(meta.root_page_id));
    debug_assert!(bytes.len() <= PAGE_SIZE);
    bytes.resize(PAGE_SIZE, 0);
    bytes
}

pub fn decode_index_meta(bytes: &[u8]) -> ArborResult<DecodedData<IndexMetaPage>> {
    if bytes.len() != PAGE_SIZE {
        return Err(ArborError::Storage(format!(
            "meta page size is {} instead of {}",
            bytes.len(),
            PAGE_SIZE
        )));
    }
    let mut left_bytes = bytes;

    let (relation_bytes, offset) = CommonCodec::decode_bytes(left_bytes)?;
    left_bytes = &left_bytes[offset..];
    let relation = String::from_utf8(relation_bytes)
        .map_err(|e| ArborError::Storage(format!("invalid relation name in meta page: {}", e)))?;

    let (attr_byte_offset, offset) = CommonCodec::decode_u32(left_bytes)?;
    left_bytes = &left_bytes[offset..];

    let (attr_tag, offset) = CommonCodec::decode_u8(left_bytes)?;
    left_bytes = &left_bytes[offset..];
    let attr_type = AttrType::from_u8(attr_tag)?;

    let (root_page_id, offset) = CommonCodec::decode_u32(left_bytes)?;
    left_bytes = &left_bytes[offset..];

    Ok((
        IndexMetaPage {
            relation,
            attr_byte_offset,
            attr_type,
            root_page_id,
        },
        bytes.len() - left_bytes.len(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_page_codec_round_trip() {
        let meta = IndexMetaPage {
            relation: "orders".to_string(),
            attr_byte_offset: 8,
            attr_type: AttrType::Int,
            root_page_id: 2,
        };
        let (decoded, _) = decode_index_meta(&encode_index_meta(&meta)).unwrap();
        assert_eq!(decoded, meta);
    }
}
