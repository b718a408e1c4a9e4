//! Control-segment layout (§3): `magic`, embedded mutex, publisher pid,
//! publisher info blob, sequence number, and the fixed `SLOTS`-element slot
//! array. Laid out with `bytemuck::Pod` the same way the wire-format
//! structs in `hardware::exail::messages` are, so the byte layout is
//! identical across every process that maps the same shared memory.

use crate::semaphore::SemaphoreStorage;
use bytemuck::{Pod, Zeroable};
use std::path::{Path, PathBuf};

/// Fixed number of subscriber seats per channel (§3).
pub const SLOTS: usize = 10;
pub const MAGIC_LIVE: u32 = 0xdead;
pub const MAGIC_DEAD: u32 = 0;
pub const PUBLISHER_INFO_CAP: usize = 2048;
/// Matches `sizeof(sockaddr_un.sun_path)` on Linux.
pub const SOCKET_PATH_CAP: usize = 108;
pub const ERR_ARRAY_LEN: usize = 4;

/// One of `SLOTS` fixed seats representing a subscriber.
///
/// Modeled as plain data indexed by position, per the design note in §9: the
/// publisher never holds a pointer to a subscriber's object, only this
/// struct's index and the pid/fd it carries, which eliminates the
/// publisher↔subscriber ownership cycle the original's smart pointers had.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Slot {
    pub in_use: u8,
    pub failed: u8,
    _pad0: [u8; 2],
    pub subscriber_pid: i32,
    pub seq: u32,
    /// Publisher-side socket fd connected to this subscriber, or -1.
    pub socket_fd: i32,
    pub errors: [i32; ERR_ARRAY_LEN],
    pub socket_path_len: u32,
    pub socket_path: [u8; SOCKET_PATH_CAP],
}

impl Slot {
    /// `!in_use ∧ socket_fd==-1` (§3 invariants).
    pub fn is_free(&self) -> bool {
        self.in_use == 0 && self.socket_fd == -1
    }

    /// `in_use ∧ !failed`.
    pub fn is_live(&self) -> bool {
        self.in_use != 0 && self.failed == 0
    }

    /// `in_use ∧ failed`.
    pub fn is_orphaned(&self) -> bool {
        self.in_use != 0 && self.failed != 0
    }

    pub fn socket_path(&self) -> PathBuf {
        let len = (self.socket_path_len as usize).min(SOCKET_PATH_CAP);
        PathBuf::from(String::from_utf8_lossy(&self.socket_path[..len]).into_owned())
    }

    pub fn set_socket_path(&mut self, path: &Path) {
        let bytes = path.to_string_lossy();
        let bytes = bytes.as_bytes();
        let len = bytes.len().min(SOCKET_PATH_CAP);
        self.socket_path = [0u8; SOCKET_PATH_CAP];
        self.socket_path[..len].copy_from_slice(&bytes[..len]);
        self.socket_path_len = len as u32;
    }

    pub fn reset(&mut self) {
        *self = Slot::zeroed();
        self.socket_fd = -1;
    }
}

/// The fixed-size control segment header, in the field order specified by
/// §3.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ControlHeader {
    pub magic: u32,
    _pad0: [u8; 4],
    pub mutex: SemaphoreStorage,
    pub publisher_pid: i32,
    pub publisher_info_len: u32,
    pub publisher_info: [u8; PUBLISHER_INFO_CAP],
    pub seq: u32,
    _pad1: [u8; 4],
    pub slots: [Slot; SLOTS],
}

impl ControlHeader {
    pub const SIZE: usize = std::mem::size_of::<ControlHeader>();

    pub fn publisher_info(&self) -> String {
        let len = (self.publisher_info_len as usize).min(PUBLISHER_INFO_CAP);
        String::from_utf8_lossy(&self.publisher_info[..len]).into_owned()
    }

    pub fn set_publisher_info(&mut self, info: &str) {
        let bytes = info.as_bytes();
        let len = bytes.len().min(PUBLISHER_INFO_CAP);
        self.publisher_info = [0u8; PUBLISHER_INFO_CAP];
        self.publisher_info[..len].copy_from_slice(&bytes[..len]);
        self.publisher_info_len = len as u32;
    }

    pub fn is_live(&self) -> bool {
        self.magic == MAGIC_LIVE
    }

    /// Advances the sequence number, skipping zero on wraparound (§3).
    pub fn bump_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        if self.seq == 0 {
            self.seq = 1;
        }
        self.seq
    }

    pub fn find_free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Slot::is_free)
    }
}

/// Reinterprets the start of a shared-memory mapping as a `ControlHeader`.
///
/// # Panics
/// If `bytes` is shorter than `ControlHeader::SIZE` (a resource-mismatch
/// condition callers should have already rejected via size validation at
/// open time).
pub fn header(bytes: &[u8]) -> &ControlHeader {
    bytemuck::from_bytes(&bytes[..ControlHeader::SIZE])
}

#[allow(clippy::mut_from_ref)]
pub fn header_mut(bytes: &mut [u8]) -> &mut ControlHeader {
    bytemuck::from_bytes_mut(&mut bytes[..ControlHeader::SIZE])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slot_is_free() {
        let mut slot = Slot::zeroed();
        slot.socket_fd = -1;
        assert!(slot.is_free());
        slot.in_use = 1;
        assert!(slot.is_live());
        slot.failed = 1;
        assert!(slot.is_orphaned());
        assert!(!slot.is_live());
    }

    #[test]
    fn bump_seq_skips_zero_on_wrap() {
        let mut h = ControlHeader::zeroed();
        h.seq = u32::MAX;
        assert_eq!(h.bump_seq(), 1);
    }

    #[test]
    fn publisher_info_round_trips() {
        let mut h = ControlHeader::zeroed();
        h.set_publisher_info("camera-ingester");
        assert_eq!(h.publisher_info(), "camera-ingester");
    }

    #[test]
    fn socket_path_round_trips() {
        let mut slot = Slot::zeroed();
        slot.set_socket_path(Path::new("/tmp/vtk.cam.1234"));
        assert_eq!(slot.socket_path(), PathBuf::from("/tmp/vtk.cam.1234"));
    }

    #[test]
    fn find_free_slot_scans_in_order() {
        let mut h = ControlHeader::zeroed();
        for s in h.slots.iter_mut() {
            s.socket_fd = -1;
        }
        h.slots[0].in_use = 1;
        h.slots[0].socket_fd = 3;
        assert_eq!(h.find_free_slot(), Some(1));
    }
}
