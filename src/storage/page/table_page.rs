use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::buffer::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::error::{ArborError, ArborResult};

/// Location of a record in a heap file: the page and the slot within it.
/// The index stores these by value and never interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl RecordId {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.page_id, self.slot_num)
    }
}

pub const TABLE_PAGE_HEADER_SIZE: usize = 6;
pub const TABLE_PAGE_SLOT_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSlot {
    pub offset: u16,
    pub size: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePageHeader {
    pub next_page_id: PageId,
    pub num_records: u16,
    pub slots: Vec<RecordSlot>,
}

/// Slotted heap page: the slot directory grows from the front while record
/// bytes are packed from the page end toward it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePage {
    pub header: TablePageHeader,
    pub data: Box<[u8; PAGE_SIZE]>,
}

impl TablePage {
    pub fn new() -> Self {
        Self {
            header: TablePageHeader {
                next_page_id: INVALID_PAGE_ID,
                num_records: 0,
                slots: Vec::new(),
            },
            data: Box::new([0; PAGE_SIZE]),
        }
    }

    fn free_space_end(&self) -> usize {
        match self.header.slots.last() {
            Some(slot) => slot.offset as usize,
            None => PAGE_SIZE,
        }
    }

    /// Append a record, returning its slot number, or a `Storage` error
    /// when the page cannot hold it.
    pub fn insert_record(&mut self, record: &[u8]) -> ArborResult<u16> {
        let record_end = self.free_space_end();
        let header_end =
            TABLE_PAGE_HEADER_SIZE + TABLE_PAGE_SLOT_SIZE * (self.header.slots.len() + 1);
        if record.len() > record_end || record_end - record.len() < header_end {
            return Err(ArborError::Storage(
                "not enough space on page to store record".to_string(),
            ));
        }
        let offset = record_end - record.len();
        self.data[offset..offset + record.len()].copy_from_slice(record);
        let slot_num = self.header.num_records;
        self.header.slots.push(RecordSlot {
            offset: offset as u16,
            size: record.len() as u16,
        });
        self.header.num_records += 1;
        Ok(slot_num)
    }

    pub fn record(&self, slot_num: u32) -> ArborResult<Bytes> {
        let slot = self
            .header
            .slots
            .get(slot_num as usize)
            .ok_or_else(|| ArborError::Storage(format!("no record at slot {}", slot_num)))?;
        let start = slot.offset as usize;
        let end = start + slot.size as usize;
        Ok(Bytes::copy_from_slice(&self.data[start..end]))
    }

    pub fn num_records(&self) -> u16 {
        self.header.num_records
    }
}

impl Default for TablePage {
    fn default() -> Self {
        Self::new()
    }
}

/// Heap file header, stored at page 1: the bounds of the data page chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapHeaderPage {
    pub first_page_id: PageId,
    pub last_page_id: PageId,
}
