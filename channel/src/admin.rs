//! Administrative operations (§10, "Administrative operations
//! (supplemental)"): enumerate, inspect, purge and forcibly delete channels
//! without needing to be the owning publisher process. These back the
//! `channelctl` binary.

use crate::control;
use crate::data;
use crate::error::{ChannelError, Result};
use crate::names;
use crate::semaphore::Semaphore;
use crate::shmem::SharedMemory;
use serde::Serialize;

/// One subscriber seat, as reported by [`info`].
#[derive(Debug, Serialize)]
pub struct SlotInfo {
    pub index: usize,
    pub in_use: bool,
    pub failed: bool,
    pub subscriber_pid: i32,
    pub last_consumed_seq: u32,
}

/// A snapshot of one channel's control segment, as reported by [`info`].
#[derive(Debug, Serialize)]
pub struct ChannelInfo {
    pub name: String,
    pub publisher_pid: i32,
    pub publisher_info: String,
    pub seq: u32,
    pub slots: Vec<SlotInfo>,
}

/// Lists every channel with a live placeholder file under the shared
/// temporary directory.
pub fn list() -> Result<Vec<String>> {
    let dir = names::tmp_dir();
    let prefix = names::osname("");
    let entries = std::fs::read_dir(&dir).map_err(|e| ChannelError::io("<tmp>", e))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ChannelError::io("<tmp>", e))?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if let Some(rest) = file_name.strip_prefix(&prefix) {
            if let Some(channel_name) = rest.strip_suffix(".x") {
                names.push(channel_name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Reads a snapshot of `name`'s control segment.
pub fn info(name: &str) -> Result<ChannelInfo> {
    names::validate_name(name)?;
    let control = SharedMemory::open_existing(&names::shm_open_name(name))?;
    let mutex = mutex_handle(&control);

    Ok(mutex.with_lock(|| {
        let ch = control::header(control.as_slice());
        ChannelInfo {
            name: name.to_string(),
            publisher_pid: ch.publisher_pid,
            publisher_info: ch.publisher_info(),
            seq: ch.seq,
            slots: ch
                .slots
                .iter()
                .enumerate()
                .map(|(index, slot)| SlotInfo {
                    index,
                    in_use: slot.in_use != 0,
                    failed: slot.failed != 0,
                    subscriber_pid: slot.subscriber_pid,
                    last_consumed_seq: slot.seq,
                })
                .collect(),
        }
    }))
}

/// Clears every orphaned (`in_use ∧ failed`) slot on `name`, freeing seats
/// for new subscribers without waiting for the publisher to notice.
pub fn purge(name: &str) -> Result<()> {
    names::validate_name(name)?;
    let control = SharedMemory::open_existing(&names::shm_open_name(name))?;
    let mutex = mutex_handle(&control);

    mutex.with_lock(|| {
        let ch = control::header_mut(control.as_mut_slice());
        for slot in ch.slots.iter_mut() {
            if slot.is_orphaned() {
                if slot.socket_fd >= 0 {
                    // SAFETY: fd recorded by some now-gone publisher process;
                    // closing our own (fstat-only) view does not affect it,
                    // this merely clears the bookkeeping fd field.
                    unsafe {
                        libc::close(slot.socket_fd);
                    }
                }
                slot.reset();
            }
        }
    });
    Ok(())
}

/// Forcibly removes a channel's control segment, data segment, and
/// placeholder file, regardless of whether a publisher or subscribers are
/// still attached. Intended for operator cleanup after a crash; any
/// process still mapping the segments keeps working against the unlinked
/// memory until it exits.
pub fn delete(name: &str) -> Result<()> {
    names::validate_name(name)?;
    SharedMemory::unlink(&names::shm_open_name(name))?;
    SharedMemory::unlink(&names::data_shm_open_name(name))?;
    let _ = std::fs::remove_file(names::placeholder_path(name));
    Ok(())
}

fn mutex_handle(control: &SharedMemory) -> &Semaphore {
    let ch = control::header(control.as_slice());
    // SAFETY: any control segment reachable via `open_existing` was
    // created by `Publisher::create`, which placement-constructs the mutex
    // before the segment's name becomes visible to `shm_open`.
    unsafe { Semaphore::at(&ch.mutex as *const _ as *mut _) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::Publisher;

    #[test]
    fn list_includes_newly_created_channel() {
        let name = format!("test-admin-list-{}", std::process::id());
        let _publisher = Publisher::create(&name, "test").unwrap();
        assert!(list().unwrap().contains(&name));
    }

    #[test]
    fn info_reports_publisher_pid_and_seq() {
        let name = format!("test-admin-info-{}", std::process::id());
        let mut publisher = Publisher::create(&name, "camera-one").unwrap();
        publisher.publish(&[1, 2, 3], "application/octet-stream").unwrap();

        let snapshot = info(&name).unwrap();
        assert_eq!(snapshot.publisher_info, "camera-one");
        assert_eq!(snapshot.seq, 1);
        assert_eq!(snapshot.slots.len(), control::SLOTS);
    }

    #[test]
    fn delete_removes_placeholder_file() {
        let name = format!("test-admin-delete-{}", std::process::id());
        let publisher = Publisher::create(&name, "test").unwrap();
        let placeholder = names::placeholder_path(&name);
        assert!(placeholder.exists());
        std::mem::forget(publisher); // avoid the double-unlink the destructor would attempt
        delete(&name).unwrap();
        assert!(!placeholder.exists());
    }
}
