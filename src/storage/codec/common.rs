use crate::error::{ArborError, ArborResult};
use crate::storage::codec::DecodedData;

/// Fixed-width big-endian primitives shared by every page codec.
pub struct CommonCodec;

impl CommonCodec {
    pub fn encode_u8(data: u8) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u8(bytes: &[u8]) -> ArborResult<DecodedData<u8>> {
        if bytes.is_empty() {
            return Err(ArborError::Internal(
                "bytes exhausted while decoding u8".to_string(),
            ));
        }
        Ok((bytes[0], 1))
    }

    pub fn encode_u16(data: u16) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u16(bytes: &[u8]) -> ArborResult<DecodedData<u16>> {
        if bytes.len() < 2 {
            return Err(ArborError::Internal(format!(
                "bytes length {} is less than 2",
                bytes.len()
            )));
        }
        Ok((u16::from_be_bytes([bytes[0], bytes[1]]), 2))
    }

    pub fn encode_u32(data: u32) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u32(bytes: &[u8]) -> ArborResult<DecodedData<u32>> {
        if bytes.len() < 4 {
            return Err(ArborError::Internal(format!(
                "bytes length {} is less than 4",
                bytes.len()
            )));
        }
        Ok((
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            4,
        ))
    }

    pub fn encode_i32(data: i32) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_i32(bytes: &[u8]) -> ArborResult<DecodedData<i32>> {
        if bytes.len() < 4 {
            return Err(ArborError::Internal(format!(
                "bytes length {} is less than 4",
                bytes.len()
            )));
        }
        Ok((
            i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            4,
        ))
    }

    /// Length-prefixed byte string.
    pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + data.len());
        bytes.extend(CommonCodec::encode_u32(data.len() as u32));
        bytes.extend_from_slice(data);
        bytes
    }

    pub fn decode_bytes(bytes: &[u8]) -> ArborResult<DecodedData<Vec<u8>>> {
        let (length, offset) = CommonCodec::decode_u32(bytes)?;
        let length = length as usize;
        if bytes.len() < offset + length {
            return Err(ArborError::Internal(format!(
                "bytes length {} is less than expected {}",
                bytes.len(),
                offset + length
            )));
        }
        Ok((bytes[offset..offset + length].to_vec(), offset + length))
    }
}
