//! Named or anonymous POSIX shared memory, memory-mapped read-write (C1,
//! §4.1). Grounded on the original's `gsharedmemory.cpp`: `shm_open` +
//! `ftruncate` + `mmap`, with `mremap` for in-place growth.

use crate::error::{ChannelError, Result};
use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::ptr;

/// A shared-memory mapping, named or anonymous.
///
/// `Drop` unmaps but does **not** unlink; unlinking the backing name is a
/// separate, explicit step (`unlink`) because only the side that created
/// the object exclusively owns that responsibility (§5, "shared-resource
/// policy").
pub struct SharedMemory {
    fd: RawFd,
    ptr: *mut u8,
    len: usize,
    name: Option<String>,
    owns_fd: bool,
}

// SAFETY: the mapping is backed by a kernel shared-memory object; sending
// the handle across threads (not processes, which happens via fd
// inheritance, not `Send`) is safe as long as callers respect the mutex
// protocol documented on the control segment.
unsafe impl Send for SharedMemory {}

impl SharedMemory {
    /// Creates a new shared-memory object exclusively; fails if `shm_name`
    /// (already OS-mangled, e.g. via [`crate::names::shm_open_name`])
    /// already exists.
    pub fn create_exclusive(shm_name: &str, size: usize) -> Result<Self> {
        let cname = cstring(shm_name)?;
        // SAFETY: shm_open with O_CREAT|O_EXCL is the standard exclusive-
        // create idiom; the name has already been validated as a plain
        // string with no interior nul.
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_CREAT | libc::O_EXCL | libc::O_RDWR, 0o600) };
        if fd < 0 {
            let err = std::io::Error::last_os_error();
            return Err(if err.kind() == std::io::ErrorKind::AlreadyExists {
                ChannelError::ResourceExists {
                    name: shm_name.to_string(),
                    hint: "remove it with `channelctl delete <name>` or wait for the owning process to exit",
                }
            } else {
                ChannelError::io(shm_name, err)
            });
        }
        let mut shm = SharedMemory {
            fd,
            ptr: ptr::null_mut(),
            len: 0,
            name: Some(shm_name.to_string()),
            owns_fd: true,
        };
        shm.truncate_and_map(size, shm_name)?;
        Ok(shm)
    }

    /// Opens an existing shared-memory object; size is derived from the
    /// backing file via `fstat`.
    pub fn open_existing(shm_name: &str) -> Result<Self> {
        let cname = cstring(shm_name)?;
        // SAFETY: standard shm_open open-only call.
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0o600) };
        if fd < 0 {
            let err = std::io::Error::last_os_error();
            return Err(if err.kind() == std::io::ErrorKind::NotFound {
                ChannelError::ResourceMissing {
                    name: shm_name.to_string(),
                }
            } else {
                ChannelError::io(shm_name, err)
            });
        }
        let size = fstat_size(fd).map_err(|e| ChannelError::io(shm_name, e))?;
        let ptr = map(fd, size).map_err(|e| ChannelError::io(shm_name, e))?;
        Ok(SharedMemory {
            fd,
            ptr,
            len: size,
            name: Some(shm_name.to_string()),
            owns_fd: true,
        })
    }

    /// Creates an anonymous mapping with no shared-memory name at all; the
    /// only way another process can reach it is by inheriting the fd
    /// (`inherit()` + `fork`/`exec`).
    pub fn create_anonymous(size: usize) -> Result<Self> {
        // SAFETY: memfd_create is the Linux-native "anonymous but fd-
        // addressable" shared memory primitive; MFD_CLOEXEC is cleared
        // later via `inherit()` only when the caller actually wants to pass
        // it across exec.
        let fd = unsafe {
            let name = CString::new("vtk-anon").unwrap();
            libc::syscall(libc::SYS_memfd_create, name.as_ptr(), libc::MFD_CLOEXEC) as RawFd
        };
        if fd < 0 {
            return Err(ChannelError::io("<anonymous>", std::io::Error::last_os_error()));
        }
        let mut shm = SharedMemory {
            fd,
            ptr: ptr::null_mut(),
            len: 0,
            name: None,
            owns_fd: true,
        };
        shm.truncate_and_map(size, "<anonymous>")?;
        Ok(shm)
    }

    /// Wraps an already-open, already-sized fd (e.g. one received via
    /// `SCM_RIGHTS`) as a mapping. Used by the fat pipe when the child
    /// remaps to a new data-segment fd handed over by the parent.
    pub fn from_raw_fd(fd: RawFd, owns_fd: bool) -> Result<Self> {
        let size = fstat_size(fd).map_err(|e| ChannelError::io("<fd>", e))?;
        let ptr = map(fd, size).map_err(|e| ChannelError::io("<fd>", e))?;
        Ok(SharedMemory {
            fd,
            ptr,
            len: size,
            name: None,
            owns_fd,
        })
    }

    fn truncate_and_map(&mut self, size: usize, ctx: &str) -> Result<()> {
        // SAFETY: fd is a freshly created shared-memory object owned by
        // this process.
        let rc = unsafe { libc::ftruncate(self.fd, size as libc::off_t) };
        if rc != 0 {
            return Err(ChannelError::io(ctx, std::io::Error::last_os_error()));
        }
        self.ptr = map(self.fd, size).map_err(|e| ChannelError::io(ctx, e))?;
        self.len = size;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len` bytes for the lifetime of this
        // mapping; readers must still respect the mutex protocol for
        // mutable fields.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn as_mut_slice(&self) -> &mut [u8] {
        // SAFETY: shared-memory mutation is guarded by the embedded mutex
        // at a higher layer (control.rs); this crate deliberately exposes
        // interior mutability through a shared reference because all
        // writers across process boundaries are, definitionally, aliased.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Truncates the backing file to `new_size` and remaps. If `may_move`
    /// is false and the kernel cannot extend the mapping in place, returns
    /// `Ok(false)` rather than an error (used when something else, e.g. the
    /// embedded semaphore, lives at a fixed address within the mapping and
    /// must not move).
    pub fn remap(&mut self, new_size: usize, may_move: bool) -> Result<bool> {
        let ctx = self.name.clone().unwrap_or_else(|| "<anonymous>".to_string());
        // SAFETY: fd is owned by this mapping.
        let rc = unsafe { libc::ftruncate(self.fd, new_size as libc::off_t) };
        if rc != 0 {
            return Err(ChannelError::RemapFailed {
                channel: ctx,
                source: std::io::Error::last_os_error(),
            });
        }
        let flags = if may_move { libc::MREMAP_MAYMOVE } else { 0 };
        // SAFETY: `self.ptr`/`self.len` describe the current mapping;
        // mremap either extends it in place or, with MREMAP_MAYMOVE,
        // relocates it and returns the new address.
        let new_ptr = unsafe { libc::mremap(self.ptr as *mut libc::c_void, self.len, new_size, flags) };
        if new_ptr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            if !may_move && err.raw_os_error() == Some(libc::ENOMEM) {
                // Could not grow in place; caller asked us not to move.
                // Shrink the file size back is unnecessary (ftruncate only
                // grows here); just report "did not remap".
                return Ok(false);
            }
            return Err(ChannelError::RemapFailed { channel: ctx, source: err });
        }
        self.ptr = new_ptr as *mut u8;
        self.len = new_size;
        Ok(true)
    }

    /// Clears close-on-exec so a forked child that execs can still reach
    /// this fd.
    pub fn inherit(&self) -> Result<()> {
        // SAFETY: fcntl F_GETFD/F_SETFD on an owned fd.
        let flags = unsafe { libc::fcntl(self.fd, libc::F_GETFD) };
        if flags < 0 {
            return Err(ChannelError::io(
                self.name.as_deref().unwrap_or("<anonymous>"),
                std::io::Error::last_os_error(),
            ));
        }
        let rc = unsafe { libc::fcntl(self.fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) };
        if rc < 0 {
            return Err(ChannelError::io(
                self.name.as_deref().unwrap_or("<anonymous>"),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    /// Removes the filesystem name but keeps the mapping valid.
    pub fn unlink(shm_name: &str) -> Result<()> {
        let cname = cstring(shm_name)?;
        // SAFETY: shm_unlink on a plain C string.
        let rc = unsafe { libc::shm_unlink(cname.as_ptr()) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(ChannelError::io(shm_name, err));
            }
        }
        Ok(())
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        if !self.ptr.is_null() && self.len > 0 {
            // SAFETY: unmapping a mapping this struct owns exclusively.
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.len);
            }
        }
        if self.owns_fd && self.fd >= 0 {
            // SAFETY: fd owned by this struct.
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

fn map(fd: RawFd, size: usize) -> std::io::Result<*mut u8> {
    if size == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "zero-length mapping"));
    }
    // SAFETY: fd is a valid shared-memory/file descriptor at least `size`
    // bytes long (caller has already ftruncate'd it).
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    Ok(ptr as *mut u8)
}

fn fstat_size(fd: RawFd) -> std::io::Result<usize> {
    // SAFETY: fstat into a stack-allocated, zeroed stat struct.
    unsafe {
        let mut st: libc::stat = std::mem::zeroed();
        if libc::fstat(fd, &mut st) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(st.st_size as usize)
    }
}

fn cstring(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| ChannelError::InvalidName {
        name: name.to_string(),
        reason: "must not contain an interior nul byte",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_name(tag: &str) -> String {
        format!("/vtk-test-{}-{}", tag, std::process::id())
    }

    #[test]
    fn create_exclusive_then_open_existing_roundtrip() {
        let name = test_name("shmem-roundtrip");
        let shm = SharedMemory::create_exclusive(&name, 4096).unwrap();
        assert_eq!(shm.len(), 4096);
        shm.as_mut_slice()[0] = 0xAB;

        let reopened = SharedMemory::open_existing(&name).unwrap();
        assert_eq!(reopened.len(), 4096);
        assert_eq!(reopened.as_slice()[0], 0xAB);

        SharedMemory::unlink(&name).unwrap();
    }

    #[test]
    fn create_exclusive_twice_fails() {
        let name = test_name("shmem-exclusive");
        let _shm = SharedMemory::create_exclusive(&name, 64).unwrap();
        let second = SharedMemory::create_exclusive(&name, 64);
        assert!(matches!(second, Err(ChannelError::ResourceExists { .. })));
        SharedMemory::unlink(&name).unwrap();
    }

    #[test]
    fn open_missing_fails() {
        let name = test_name("shmem-missing");
        let result = SharedMemory::open_existing(&name);
        assert!(matches!(result, Err(ChannelError::ResourceMissing { .. })));
    }

    #[test]
    fn remap_grows_mapping_and_preserves_prefix() {
        let name = test_name("shmem-remap");
        let mut shm = SharedMemory::create_exclusive(&name, 4096).unwrap();
        shm.as_mut_slice()[0] = 42;
        let grew = shm.remap(8192, true).unwrap();
        assert!(grew);
        assert_eq!(shm.len(), 8192);
        assert_eq!(shm.as_slice()[0], 42);
        SharedMemory::unlink(&name).unwrap();
    }

    #[test]
    fn anonymous_mapping_has_no_name() {
        let shm = SharedMemory::create_anonymous(4096).unwrap();
        assert_eq!(shm.len(), 4096);
    }
}
