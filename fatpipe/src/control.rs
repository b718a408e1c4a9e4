//! Fat-pipe control segment (§4.5): just a liveness flag and a mutex, no
//! slot table — a fat pipe has exactly one reader.

use bytemuck::{Pod, Zeroable};
use channel::semaphore::SemaphoreStorage;

pub const MAGIC_LIVE: u32 = 0xdead;
pub const MAGIC_DEAD: u32 = 0;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct FatPipeControl {
    pub magic: u32,
    _pad0: [u8; 4],
    pub mutex: SemaphoreStorage,
}

impl FatPipeControl {
    pub const SIZE: usize = std::mem::size_of::<FatPipeControl>();

    pub fn is_live(&self) -> bool {
        self.magic == MAGIC_LIVE
    }
}

pub fn header(bytes: &[u8]) -> &FatPipeControl {
    bytemuck::from_bytes(&bytes[..FatPipeControl::SIZE])
}

#[allow(clippy::mut_from_ref)]
pub fn header_mut(bytes: &mut [u8]) -> &mut FatPipeControl {
    bytemuck::from_bytes_mut(&mut bytes[..FatPipeControl::SIZE])
}
