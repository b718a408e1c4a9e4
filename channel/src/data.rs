//! Data-segment layout (§3): `size_limit`, a 60-byte type string, a wall-
//! clock timestamp, payload length, and the payload bytes themselves
//! (stored immediately after the fixed header in the same mapping).

use bytemuck::{Pod, Zeroable};
use shared::EpochTime;

pub const TYPE_STR_CAP: usize = 60;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct DataHeader {
    /// Maximum payload the current mapping can hold.
    pub size_limit: u64,
    pub type_str: [u8; TYPE_STR_CAP],
    pub ts_s: i64,
    pub ts_us: u32,
    pub payload_len: u32,
}

impl DataHeader {
    pub const SIZE: usize = std::mem::size_of::<DataHeader>();

    pub fn type_str(&self) -> String {
        let nul = self.type_str.iter().position(|&b| b == 0).unwrap_or(TYPE_STR_CAP);
        String::from_utf8_lossy(&self.type_str[..nul]).into_owned()
    }

    /// Writes `type_str` nul-padded into the fixed field, truncating if
    /// longer than `TYPE_STR_CAP`.
    pub fn set_type_str(&mut self, type_str: &str) {
        let bytes = type_str.as_bytes();
        let len = bytes.len().min(TYPE_STR_CAP);
        self.type_str = [0u8; TYPE_STR_CAP];
        self.type_str[..len].copy_from_slice(&bytes[..len]);
    }

    pub fn timestamp(&self) -> EpochTime {
        EpochTime::new(self.ts_s, self.ts_us)
    }

    pub fn set_timestamp(&mut self, t: EpochTime) {
        self.ts_s = t.s;
        self.ts_us = t.us;
    }
}

/// The growth formula used whenever the data segment is created or grown
/// (§3 lifecycles, §4.3 step 1): `total + total/2 + 10`.
pub fn grow(total: usize) -> usize {
    total + total / 2 + 10
}

/// Size of a data-segment mapping able to hold `payload_len` bytes of
/// payload for the first time (header + payload, then grown).
pub fn initial_mapping_size(payload_len: usize) -> usize {
    grow(DataHeader::SIZE + payload_len)
}

pub fn header(bytes: &[u8]) -> &DataHeader {
    bytemuck::from_bytes(&bytes[..DataHeader::SIZE])
}

#[allow(clippy::mut_from_ref)]
pub fn header_mut(bytes: &mut [u8]) -> &mut DataHeader {
    bytemuck::from_bytes_mut(&mut bytes[..DataHeader::SIZE])
}

pub fn payload(bytes: &[u8]) -> &[u8] {
    let len = header(bytes).payload_len as usize;
    &bytes[DataHeader::SIZE..DataHeader::SIZE + len]
}

#[allow(clippy::mut_from_ref)]
pub fn payload_mut(bytes: &mut [u8], len: usize) -> &mut [u8] {
    &mut bytes[DataHeader::SIZE..DataHeader::SIZE + len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_str_round_trips_and_truncates() {
        let mut h = DataHeader::zeroed();
        h.set_type_str("image/jpeg;xsize=1x1x3");
        assert_eq!(h.type_str(), "image/jpeg;xsize=1x1x3");

        let long = "x".repeat(TYPE_STR_CAP + 10);
        h.set_type_str(&long);
        assert_eq!(h.type_str().len(), TYPE_STR_CAP);
    }

    #[test]
    fn grow_formula() {
        assert_eq!(grow(100), 100 + 50 + 10);
    }

    #[test]
    fn payload_slice_matches_len() {
        let mut buf = vec![0u8; DataHeader::SIZE + 16];
        header_mut(&mut buf).payload_len = 3;
        payload_mut(&mut buf, 3).copy_from_slice(&[1, 2, 3]);
        assert_eq!(payload(&buf), &[1, 2, 3]);
    }
}
