//! Subscriber channel (C4, §4.4): claims a slot in an existing channel's
//! control segment, binds a wake-up datagram socket, and reads the latest
//! published frame when notified (or on demand, via `peek`).

use crate::control;
use crate::data;
use crate::error::{ChannelError, Result};
use crate::names;
use crate::semaphore::Semaphore;
use crate::shmem::SharedMemory;
use shared::EpochTime;
use std::os::unix::net::UnixDatagram;
use tracing::debug;

/// One decoded frame handed back to the caller.
#[derive(Debug, Clone)]
pub struct Frame {
    pub payload: Vec<u8>,
    pub type_str: String,
    pub timestamp: EpochTime,
}

/// The result of one `receive` call (§4.4).
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// A frame newer than the one last consumed by this subscriber.
    Frame(Frame),
    /// Nothing new since the last non-peek `receive` (only possible when
    /// `peek` was requested, or the wake-up was spurious).
    NoUpdate,
    /// The publisher is gone (`magic == 0`); the stream has ended.
    EndOfStream,
}

/// A seat reserved in some channel's control segment, with its own wake-up
/// socket.
pub struct Subscriber {
    channel: String,
    control: SharedMemory,
    data: Option<SharedMemory>,
    socket: UnixDatagram,
    slot_index: usize,
}

impl Subscriber {
    /// Attaches to an existing channel, claiming the first free slot.
    /// Fails with [`ChannelError::NoSlot`] if all `SLOTS` seats are taken.
    pub fn attach(channel: &str) -> Result<Subscriber> {
        names::validate_name(channel)?;
        let control = SharedMemory::open_existing(&names::shm_open_name(channel))?;
        if control.len() != control::ControlHeader::SIZE {
            return Err(ChannelError::ResourceMismatch {
                name: channel.to_string(),
                reason: format!(
                    "expected control segment of {} bytes, found {}",
                    control::ControlHeader::SIZE,
                    control.len()
                ),
            });
        }

        let pid = std::process::id() as i32;
        let socket_path = names::socket_path(channel, pid);
        let _ = std::fs::remove_file(&socket_path);
        let socket = UnixDatagram::bind(&socket_path).map_err(|e| ChannelError::io(channel, e))?;

        let mutex = mutex_handle(&control);
        let slot_index = mutex.with_lock(|| -> Result<usize> {
            let ch = control::header_mut(control.as_mut_slice());
            let idx = ch.find_free_slot().ok_or_else(|| ChannelError::NoSlot {
                channel: channel.to_string(),
            })?;
            let slot = &mut ch.slots[idx];
            slot.reset();
            slot.in_use = 1;
            slot.subscriber_pid = pid;
            slot.seq = 0;
            slot.set_socket_path(&socket_path);
            Ok(idx)
        })?;

        debug!(channel, slot = slot_index, "subscriber attached");
        Ok(Subscriber {
            channel: channel.to_string(),
            control,
            data: None,
            socket,
            slot_index,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[cfg(test)]
    pub(crate) fn last_consumed_seq(&self) -> u32 {
        let ch = control::header(self.control.as_slice());
        ch.slots[self.slot_index].seq
    }

    fn is_live(&self) -> bool {
        control::header(self.control.as_slice()).is_live()
    }

    /// Reads the channel's current frame. If `peek` is false, first drains
    /// any pending wake-ups (and blocks for one if none are pending yet)
    /// before deciding whether the frame is new (§4.4).
    pub fn receive(&mut self, peek: bool) -> Result<ReceiveOutcome> {
        if !self.is_live() {
            return Ok(ReceiveOutcome::EndOfStream);
        }

        if !peek {
            self.drain_or_block()?;
            if !self.is_live() {
                return Ok(ReceiveOutcome::EndOfStream);
            }
        }

        if self.data.is_none() {
            match SharedMemory::open_existing(&names::data_shm_open_name(&self.channel)) {
                Ok(data) => self.data = Some(data),
                Err(ChannelError::ResourceMissing { .. }) => return Ok(ReceiveOutcome::NoUpdate),
                Err(e) => return Err(e),
            }
        }

        // Escape-hatch cast: `mutex` otherwise keeps an immutable borrow of
        // `self.control` alive across the closure below, which also needs
        // to mutably borrow `self` (for `resize_mapping_if_needed` and the
        // data-segment read).
        let mutex = mutex_handle(&self.control) as *const Semaphore;
        let mutex = unsafe { &*mutex };
        let outcome = mutex.with_lock(|| -> Result<ReceiveOutcome> {
            self.resize_mapping_if_needed()?;

            let ch = control::header_mut(self.control.as_mut_slice());
            let mem_seq = ch.seq;
            let slot = &mut ch.slots[self.slot_index];
            if !peek && slot.seq == mem_seq {
                return Ok(ReceiveOutcome::NoUpdate);
            }

            let data = self.data.as_ref().expect("opened above");
            let dbytes = data.as_slice();
            let dh = data::header(dbytes);
            let frame = Frame {
                payload: data::payload(dbytes).to_vec(),
                type_str: dh.type_str(),
                timestamp: dh.timestamp(),
            };

            if !peek {
                ch.slots[self.slot_index].seq = mem_seq;
            }
            Ok(ReceiveOutcome::Frame(frame))
        })?;
        Ok(outcome)
    }

    /// Grows this subscriber's view of the data segment to match its
    /// current backing size. Must be called under the control mutex (the
    /// size only grows monotonically, and only the publisher, who holds
    /// the same mutex while remapping, ever changes it).
    fn resize_mapping_if_needed(&mut self) -> Result<()> {
        let data = self.data.as_mut().expect("opened by caller");
        let backing_size = data::header(data.as_slice()).size_limit as usize + data::DataHeader::SIZE;
        if backing_size > data.len() {
            data.remap(backing_size, true)?;
        }
        Ok(())
    }

    /// Drains every pending wake-up datagram without blocking; if none was
    /// pending, blocks for exactly one.
    fn drain_or_block(&mut self) -> Result<()> {
        let mut buf = [0u8; 1];
        let mut drained = 0u32;
        self.socket.set_nonblocking(true).map_err(|e| ChannelError::io(&self.channel, e))?;
        loop {
            match self.socket.recv(&mut buf) {
                Ok(_) => drained += 1,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    let _ = self.socket.set_nonblocking(false);
                    return Err(ChannelError::io(&self.channel, e));
                }
            }
        }
        self.socket.set_nonblocking(false).map_err(|e| ChannelError::io(&self.channel, e))?;
        if drained == 0 {
            match self.socket.recv(&mut buf) {
                Ok(_) => {}
                Err(e) => return Err(ChannelError::io(&self.channel, e)),
            }
        }
        Ok(())
    }
}

/// Reinterprets the mutex embedded in a control segment as a [`Semaphore`]
/// handle. Shared helper between publisher and subscriber so neither
/// duplicates the raw-pointer cast.
fn mutex_handle(control: &SharedMemory) -> &Semaphore {
    let ch = control::header(control.as_slice());
    // SAFETY: the mutex was placement-constructed by whichever process
    // called `Publisher::create`, before this mapping could have been
    // opened by `open_existing`.
    unsafe { Semaphore::at(&ch.mutex as *const _ as *mut _) }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if self.is_live() {
            let mutex = mutex_handle(&self.control);
            mutex.with_lock(|| {
                let ch = control::header_mut(self.control.as_mut_slice());
                ch.slots[self.slot_index].in_use = 0;
            });
        }
        debug!(channel = %self.channel, slot = self.slot_index, "subscriber detached");
    }
}
