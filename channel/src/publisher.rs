//! Publisher channel (C3, §4.3): owns the control and data segments,
//! notifies subscribers via a one-byte datagram, and scavenges slots whose
//! subscribers have detached.

use crate::control::{self, ControlHeader, Slot, MAGIC_DEAD, MAGIC_LIVE};
use crate::data::{self, DataHeader};
use crate::error::{ChannelError, Result};
use crate::names;
use crate::semaphore::Semaphore;
use crate::shmem::SharedMemory;
use bytemuck::Zeroable;
use shared::EpochTime;
use std::fs::File;
use std::os::fd::{IntoRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Owns the control (and, once first published, data) segment for one
/// channel, plus the publisher-side socket fds connected to live
/// subscribers.
pub struct Publisher {
    name: String,
    control: SharedMemory,
    data: Option<SharedMemory>,
    placeholder: PathBuf,
}

impl Publisher {
    /// Creates a new channel exclusively. Fails with
    /// [`ChannelError::ResourceExists`] if the name is already taken.
    pub fn create(name: &str, publisher_info: &str) -> Result<Publisher> {
        names::validate_name(name)?;
        let shm_name = names::shm_open_name(name);
        let control = SharedMemory::create_exclusive(&shm_name, ControlHeader::SIZE)?;

        {
            let bytes = control.as_mut_slice();
            let ch = control::header_mut(bytes);
            *ch = ControlHeader::zeroed();
            ch.magic = MAGIC_LIVE;
            // SAFETY: `ch.mutex` is freshly zeroed memory inside the
            // mapping this process just created exclusively; no other
            // process can have placement-constructed a semaphore there
            // yet.
            unsafe {
                Semaphore::init_at(&mut ch.mutex as *mut _, 1)
                    .map_err(|e| ChannelError::io(name, e))?;
            }
            ch.publisher_pid = std::process::id() as i32;
            ch.set_publisher_info(publisher_info);
            ch.seq = 0;
            for slot in ch.slots.iter_mut() {
                slot.reset();
            }
        }

        let placeholder = names::placeholder_path(name);
        File::create(&placeholder).map_err(|e| ChannelError::io(name, e))?;

        info!(channel = name, "publisher channel created");
        Ok(Publisher {
            name: name.to_string(),
            control,
            data: None,
            placeholder,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn mutex(&self) -> &Semaphore {
        let bytes = self.control.as_slice();
        let ch = control::header(bytes);
        // SAFETY: the mutex was placement-constructed in `create` and lives
        // for as long as `self.control`'s mapping does.
        unsafe { Semaphore::at(&ch.mutex as *const _ as *mut _) }
    }

    /// Publishes one frame to at most `SLOTS` subscribers (§4.3).
    pub fn publish(&mut self, payload: &[u8], type_str: &str) -> Result<()> {
        self.ensure_data_segment(payload.len())?;

        let now = EpochTime::now();
        let name = self.name.clone();
        let mutex = self.mutex() as *const Semaphore;
        // SAFETY: `mutex` points into `self.control`'s mapping, which
        // outlives this call; taken as a raw pointer only to sidestep the
        // borrow checker while `self.data`/`self.control` are mutated
        // inside the closure below.
        let mutex = unsafe { &*mutex };

        let mut remap_err: Option<ChannelError> = None;
        mutex.with_lock(|| {
            if let Err(e) = self.grow_data_segment_if_needed(payload.len()) {
                remap_err = Some(e);
                return;
            }

            {
                let data = self.data.as_ref().expect("ensured above");
                let dbytes = data.as_mut_slice();
                let dh = data::header_mut(dbytes);
                dh.set_timestamp(now);
                dh.set_type_str(type_str);
                dh.payload_len = payload.len() as u32;
                data::payload_mut(dbytes, payload.len()).copy_from_slice(payload);
            }

            let cbytes = self.control.as_mut_slice();
            let ch = control::header_mut(cbytes);
            ch.bump_seq();

            for i in 0..control::SLOTS {
                notify_and_scavenge_slot(&name, &mut ch.slots[i]);
            }
        });

        if let Some(e) = remap_err {
            return Err(e);
        }
        Ok(())
    }

    fn ensure_data_segment(&mut self, payload_len: usize) -> Result<()> {
        if self.data.is_some() {
            return Ok(());
        }
        let mapping_size = data::initial_mapping_size(payload_len);
        let data_name = names::data_shm_open_name(&self.name);
        let data = SharedMemory::create_exclusive(&data_name, mapping_size)?;
        {
            let bytes = data.as_mut_slice();
            let dh = data::header_mut(bytes);
            *dh = DataHeader::zeroed();
            dh.size_limit = (mapping_size - DataHeader::SIZE) as u64;
        }
        self.data = Some(data);
        Ok(())
    }

    /// Remaps the data segment to the growth formula if `payload_len`
    /// exceeds `size_limit`. Must be called under the control mutex.
    fn grow_data_segment_if_needed(&mut self, payload_len: usize) -> Result<()> {
        let data = self.data.as_mut().expect("ensured by caller");
        let size_limit = data::header(data.as_slice()).size_limit as usize;
        if payload_len <= size_limit {
            return Ok(());
        }
        let new_total = data::grow(DataHeader::SIZE + payload_len);
        data.remap(new_total, true)?;
        data::header_mut(data.as_mut_slice()).size_limit = (new_total - DataHeader::SIZE) as u64;
        Ok(())
    }

    /// Force-clears orphaned (`in_use ∧ failed`) slots. Distinct from the
    /// automatic scavenge in `publish`, which only clears slots already
    /// released by their subscriber's destructor.
    pub fn purge(&mut self) {
        self.mutex().with_lock(|| {
            let ch = control::header_mut(self.control.as_mut_slice());
            for slot in ch.slots.iter_mut() {
                if slot.is_orphaned() {
                    if slot.socket_fd >= 0 {
                        // SAFETY: fd owned by this slot.
                        unsafe {
                            libc::close(slot.socket_fd);
                        }
                    }
                    slot.reset();
                }
            }
        });
    }
}

/// Sends the wake-up byte to one slot if live, (re)connecting if needed;
/// scavenges the slot if it has been released but still holds an fd. Must
/// be called under the control mutex.
fn notify_and_scavenge_slot(channel: &str, slot: &mut Slot) {
    if slot.is_live() {
        if slot.socket_fd < 0 {
            match connect_subscriber_socket(&slot.socket_path()) {
                Ok(fd) => slot.socket_fd = fd,
                Err(e) => {
                    warn!(channel, "failed to connect subscriber socket: {e}");
                    record_errno(slot, e.raw_os_error().unwrap_or(-1));
                    slot.failed = 1;
                    return;
                }
            }
        }
        // SAFETY: socket_fd is a connected AF_UNIX SOCK_DGRAM fd owned by
        // this slot.
        let rc = unsafe { libc::send(slot.socket_fd, b".".as_ptr() as *const _, 1, libc::MSG_DONTWAIT) };
        if rc != 1 {
            let err = std::io::Error::last_os_error();
            warn!(channel, "notify send failed: {err}");
            record_errno(slot, err.raw_os_error().unwrap_or(-1));
            // SAFETY: fd owned by this slot.
            unsafe {
                libc::close(slot.socket_fd);
            }
            slot.socket_fd = -1;
            slot.failed = 1;
        }
    } else if slot.in_use == 0 && slot.socket_fd >= 0 {
        debug!(channel, "scavenging detached subscriber slot");
        // SAFETY: fd owned by this slot.
        unsafe {
            libc::close(slot.socket_fd);
        }
        slot.reset();
    }
}

fn record_errno(slot: &mut Slot, errno: i32) {
    slot.errors.rotate_right(1);
    slot.errors[0] = errno;
}

/// Connects a fresh unix datagram socket to the subscriber's bound path,
/// then unlinks that path so it is only transiently visible (§4.3 step 3).
///
/// The original briefly escalated to root to traverse a protected
/// directory; this crate exposes that as a hook point
/// (`with_privilege_escalation`) rather than faking a real `seteuid` dance,
/// since most deployments of this toolkit run the publisher and its
/// subscribers as the same user.
fn connect_subscriber_socket(path: &std::path::Path) -> std::io::Result<RawFd> {
    let socket = UnixDatagram::unbound()?;
    with_privilege_escalation(|| socket.connect(path))?;
    let _ = std::fs::remove_file(path);
    // The slot now owns the fd; `socket` must not close it on drop.
    Ok(socket.into_raw_fd())
}

/// Hook point for a deployment that needs root to traverse a protected
/// subscriber-socket directory. No-op unless the process is already
/// privileged.
fn with_privilege_escalation<T>(f: impl FnOnce() -> std::io::Result<T>) -> std::io::Result<T> {
    f()
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.mutex().with_lock(|| {
            let ch = control::header_mut(self.control.as_mut_slice());
            ch.magic = MAGIC_DEAD;
            for slot in ch.slots.iter_mut() {
                // Final notification so any blocked `receive` wakes up and
                // observes end-of-stream via `magic == 0`.
                if slot.is_live() && slot.socket_fd >= 0 {
                    // SAFETY: fd owned by this slot.
                    unsafe {
                        libc::send(slot.socket_fd, b".".as_ptr() as *const _, 1, libc::MSG_DONTWAIT);
                    }
                }
                if slot.socket_fd >= 0 {
                    // SAFETY: fd owned by this slot.
                    unsafe {
                        libc::close(slot.socket_fd);
                    }
                    slot.socket_fd = -1;
                }
            }
        });

        let _ = std::fs::remove_file(&self.placeholder);
        let _ = SharedMemory::unlink(&names::shm_open_name(&self.name));
        if self.data.is_some() {
            let _ = SharedMemory::unlink(&names::data_shm_open_name(&self.name));
        }
        info!(channel = %self.name, "publisher channel destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::{ReceiveOutcome, Subscriber};

    fn unique_name(tag: &str) -> String {
        format!("test-{}-{}-{}", tag, std::process::id(), fastrand_like())
    }

    // A tiny non-cryptographic counter is enough to keep parallel test
    // threads from colliding on the same channel name.
    fn fastrand_like() -> u64 {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    #[test]
    fn publish_then_peek_returns_payload_and_leaves_seq_at_zero() {
        let name = unique_name("pubsub");
        let mut publisher = Publisher::create(&name, "test").unwrap();
        let mut subscriber = Subscriber::attach(&name).unwrap();

        publisher.publish(&[0x01, 0x02, 0x03], "image/x.raw;xsize=1x1x3").unwrap();

        match subscriber.receive(true).unwrap() {
            ReceiveOutcome::Frame(frame) => {
                assert_eq!(frame.payload, vec![1, 2, 3]);
                assert_eq!(frame.type_str, "image/x.raw;xsize=1x1x3");
            }
            other => panic!("expected a frame, got {other:?}"),
        }
        assert_eq!(subscriber.last_consumed_seq(), 0);
    }

    #[test]
    fn late_subscriber_sees_latest_frame_only() {
        let name = unique_name("late");
        let mut publisher = Publisher::create(&name, "test").unwrap();
        for i in 0..50u8 {
            publisher.publish(&[i], "application/octet-stream").unwrap();
        }
        let mut subscriber = Subscriber::attach(&name).unwrap();
        for i in 50..100u8 {
            publisher.publish(&[i], "application/octet-stream").unwrap();
        }

        match subscriber.receive(false).unwrap() {
            ReceiveOutcome::Frame(frame) => assert_eq!(frame.payload, vec![99]),
            other => panic!("expected a frame, got {other:?}"),
        }
        assert_eq!(subscriber.last_consumed_seq(), 100);
    }

    #[test]
    fn publisher_drop_sends_end_of_stream() {
        let name = unique_name("eos");
        let publisher = Publisher::create(&name, "test").unwrap();
        let mut subscriber = Subscriber::attach(&name).unwrap();
        drop(publisher);

        match subscriber.receive(false).unwrap() {
            ReceiveOutcome::EndOfStream => {}
            other => panic!("expected end-of-stream, got {other:?}"),
        }
    }

    #[test]
    fn payload_exactly_at_size_limit_does_not_remap() {
        let name = unique_name("boundary");
        let mut publisher = Publisher::create(&name, "test").unwrap();
        publisher.publish(&[0u8; 8], "application/octet-stream").unwrap();
        let size_limit = {
            let data = publisher.data.as_ref().unwrap();
            data::header(data.as_slice()).size_limit as usize
        };
        let payload = vec![0u8; size_limit];
        publisher.publish(&payload, "application/octet-stream").unwrap();
        let unchanged = {
            let data = publisher.data.as_ref().unwrap();
            data::header(data.as_slice()).size_limit as usize
        };
        assert_eq!(unchanged, size_limit);

        let grown_payload = vec![0u8; size_limit + 1];
        publisher.publish(&grown_payload, "application/octet-stream").unwrap();
        let grown = {
            let data = publisher.data.as_ref().unwrap();
            data::header(data.as_slice()).size_limit as usize
        };
        assert!(grown > size_limit);
    }

    #[test]
    fn cross_channel_isolation() {
        let name_a = unique_name("iso-a");
        let name_b = unique_name("iso-b");
        let mut pub_a = Publisher::create(&name_a, "a").unwrap();
        let _pub_b = Publisher::create(&name_b, "b").unwrap();
        let mut sub_b = Subscriber::attach(&name_b).unwrap();

        pub_a.publish(&[1, 2, 3], "application/octet-stream").unwrap();

        match sub_b.receive(true).unwrap() {
            ReceiveOutcome::NoUpdate => {}
            other => panic!("channel b should not see channel a's publish, got {other:?}"),
        }
    }
}
