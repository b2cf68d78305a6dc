use crate::buffer::PAGE_SIZE;
use crate::error::{ArborError, ArborResult};
use crate::storage::codec::{CommonCodec, DecodedData};
use crate::storage::page::{
    HeapHeaderPage, RecordSlot, TablePage, TablePageHeader, TABLE_PAGE_HEADER_SIZE,
    TABLE_PAGE_SLOT_SIZE,
};

pub struct TablePageCodec;

impl TablePageCodec {
    /// The record bytes already sit inside `page.data`; encoding overlays
    /// the header and slot directory onto the page front.
    pub fn encode(page: &TablePage) -> Vec<u8> {
        let mut bytes = page.data.to_vec();
        let mut header = Vec::with_capacity(
            TABLE_PAGE_HEADER_SIZE + TABLE_PAGE_SLOT_SIZE * page.header.slots.len(),
        );
        header.extend(CommonCodec::encode_u32(page.header.next_page_id));
        header.extend(CommonCodec::encode_u16(page.header.num_records));
        for slot in &page.header.slots {
            header.extend(CommonCodec::encode_u16(slot.offset));
            header.extend(CommonCodec::encode_u16(slot.size));
        }
        bytes[..header.len()].copy_from_slice(&header);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> ArborResult<DecodedData<TablePage>> {
        if bytes.len() != PAGE_SIZE {
            return Err(ArborError::Storage(format!(
                "table page size is {} instead of {}",
                bytes.len(),
                PAGE_SIZE
            )));
        }
        let mut left_bytes = bytes;

        let (next_page_id, offset) = CommonCodec::decode_u32(left_bytes)?;
        left_bytes = &left_bytes[offset..];
        let (num_records, offset) = CommonCodec::decode_u16(left_bytes)?;
        left_bytes = &left_bytes[offset..];

        let mut slots = Vec::with_capacity(num_records as usize);
        for _ in 0..num_records {
            let (slot_offset, offset) = CommonCodec::decode_u16(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            let (size, offset) = CommonCodec::decode_u16(left_bytes)?;
            left_bytes = &left_bytes[offset..];
            if slot_offset as usize + size as usize > PAGE_SIZE {
                return Err(ArborError::Storage(format!(
                    "record slot {}..{} escapes the page",
                    slot_offset,
                    slot_offset as usize + size as usize
                )));
            }
            slots.push(RecordSlot {
                offset: slot_offset,
                size,
            });
        }

        let mut data = Box::new([0u8; PAGE_SIZE]);
        data.copy_from_slice(bytes);
        Ok((
            TablePage {
                header: TablePageHeader {
                    next_page_id,
                    num_records,
                    slots,
                },
                data,
            },
            PAGE_SIZE,
        ))
    }
}

pub struct HeapHeaderPageCodec;

impl HeapHeaderPageCodec {
    pub fn encode(header: &HeapHeaderPage) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PAGE_SIZE);
        bytes.extend(CommonCodec::encode_u32(header.first_page_id));
        bytes.extend(CommonCodec::encode_u32(header.last_page_id));
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> ArborResult<DecodedData<HeapHeaderPage>> {
        if bytes.len() != PAGE_SIZE {
            return Err(ArborError::Storage(format!(
                "heap header page size is {} instead of {}",
                bytes.len(),
                PAGE_SIZE
            )));
        }
        let (first_page_id, offset) = CommonCodec::decode_u32(bytes)?;
        let (last_page_id, offset2) = CommonCodec::decode_u32(&bytes[offset..])?;
        Ok((
            HeapHeaderPage {
                first_page_id,
                last_page_id,
            },
            offset + offset2,
        ))
    }
}
