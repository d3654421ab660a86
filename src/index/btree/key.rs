use byteorder::{ByteOrder, LittleEndian};

/// A fixed-width key type storable in B+ tree pages.
///
/// Comparison happens on the decoded value, so the encoding only has to be
/// a stable fixed-width round trip.
pub trait IndexKey: Clone + Ord + Default + Send + Sync + std::fmt::Debug + 'static {
    /// Encoded width in bytes.
    const ENCODED_LEN: usize;

    /// Write the key into `buf` (exactly `ENCODED_LEN` bytes).
    fn encode(&self, buf: &mut [u8]);

    /// Read a key back from `buf`.
    fn decode(buf: &[u8]) -> Self;
}

impl IndexKey for i32 {
    const ENCODED_LEN: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl IndexKey for i64 {
    const ENCODED_LEN: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}

impl IndexKey for u32 {
    const ENCODED_LEN: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl IndexKey for u64 {
    const ENCODED_LEN: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}
