use byteorder::{ByteOrder, LittleEndian};

/// Heap page header: 5 fields, 4 bytes each.
pub const HEADER_SIZE: usize = 20;
/// Slot entry: 4 bytes offset + 4 bytes length/flags.
pub const RECORD_SLOT_SIZE: usize = 8;

/// Tombstone bit in a slot's length word; the low 31 bits are the length.
pub const TOMBSTONE_FLAG: u32 = 0x8000_0000;

/// One slot-array entry. Record data grows from after the header, the slot
/// array grows backwards from the end of the page.
#[derive(Debug, Clone, Copy)]
pub struct RecordLocation {
    pub offset: u32,
    pub length: u32,
    pub deleted: bool,
}

impl RecordLocation {
    pub fn to_bytes(&self) -> [u8; RECORD_SLOT_SIZE] {
        let mut bytes = [0u8; RECORD_SLOT_SIZE];
        LittleEndian::write_u32(&mut bytes[0..4], self.offset);
        let mut length = self.length;
        if self.deleted {
            length |= TOMBSTONE_FLAG;
        }
        LittleEndian::write_u32(&mut bytes[4..8], length);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let offset = LittleEndian::read_u32(&bytes[0..4]);
        let raw_length = LittleEndian::read_u32(&bytes[4..8]);
        Self {
            offset,
            length: raw_length & !TOMBSTONE_FLAG,
            deleted: raw_length & TOMBSTONE_FLAG != 0,
        }
    }
}
