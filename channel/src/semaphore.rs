//! A fixed-size storage cell suitable for placement-constructing a POSIX
//! unnamed semaphore inside shared memory, used exclusively as the control
//! segment's mutex (C2, §4.2). Grounded on `gsemaphore_posix.cpp`: the
//! storage type is laid over `sem_t` and every call is signal-safe
//! (`sem_post`/`sem_wait`/`sem_timedwait` are all on POSIX's async-signal-
//! safe list).

use std::mem::MaybeUninit;

/// Opaque, fixed-size, fixed-alignment storage for a placement-constructed
/// semaphore. Large enough for `sem_t` on every platform this crate targets;
/// the const assertion below fails to compile otherwise, exactly mirroring
/// the original's `static_assert_sem_t_fits_in_storage_type`.
#[repr(C, align(8))]
#[derive(Clone, Copy)]
pub struct SemaphoreStorage {
    filler: [u8; 64],
}

// SAFETY: a blob of bytes with no padding-sensitive invariants.
unsafe impl bytemuck::Zeroable for SemaphoreStorage {}
// SAFETY: all-bytes-valid, no interior pointers.
unsafe impl bytemuck::Pod for SemaphoreStorage {}

const _SEM_T_FITS_IN_STORAGE: () = assert!(
    std::mem::size_of::<libc::sem_t>() <= std::mem::size_of::<SemaphoreStorage>(),
    "increase the size of SemaphoreStorage::filler"
);

impl Default for SemaphoreStorage {
    fn default() -> Self {
        SemaphoreStorage { filler: [0; 64] }
    }
}

/// A handle onto a semaphore placement-constructed at a [`SemaphoreStorage`]
/// address. Never owns the storage; the storage's lifetime is that of the
/// shared-memory mapping it lives in.
#[repr(transparent)]
pub struct Semaphore(MaybeUninit<SemaphoreStorage>);

impl Semaphore {
    fn sem_ptr(&self) -> *mut libc::sem_t {
        self as *const Semaphore as *mut libc::sem_t
    }

    /// Reinterprets an existing, already-initialized storage cell as a
    /// semaphore handle. Does not initialize anything; use
    /// [`Semaphore::init_at`] the first time a cell is used.
    ///
    /// # Safety
    /// `p` must point to a `SemaphoreStorage` that was previously
    /// initialized by `init_at` (possibly in a different process mapping
    /// the same shared memory) and must remain valid for as long as the
    /// returned reference is used.
    pub unsafe fn at<'a>(p: *mut SemaphoreStorage) -> &'a Semaphore {
        &*(p as *const Semaphore)
    }

    /// Placement-constructs a semaphore at `p` with the given initial
    /// count, shared between processes (`pshared=1`). Returns a handle onto
    /// it.
    ///
    /// # Safety
    /// `p` must point to valid, writable memory at least
    /// `size_of::<SemaphoreStorage>()` bytes long, shared (or about to be
    /// shared) between every process that will call [`Semaphore::at`] on
    /// it, and must not already hold a live semaphore.
    pub unsafe fn init_at<'a>(p: *mut SemaphoreStorage, initial_value: u32) -> std::io::Result<&'a Semaphore> {
        let rc = libc::sem_init(p as *mut libc::sem_t, 1, initial_value);
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Semaphore::at(p))
    }

    /// `sem_post`. Signal-safe.
    pub fn increment(&self) {
        // SAFETY: sem_ptr() is valid for the lifetime of `&self`.
        unsafe {
            libc::sem_post(self.sem_ptr());
        }
    }

    /// `sem_wait`, blocking. Signal-safe.
    pub fn decrement(&self) {
        // SAFETY: see above. EINTR is retried because a mutex wait must not
        // spuriously fail just because a signal was delivered.
        loop {
            let rc = unsafe { libc::sem_wait(self.sem_ptr()) };
            if rc == 0 {
                return;
            }
            if std::io::Error::last_os_error().kind() != std::io::ErrorKind::Interrupted {
                return;
            }
        }
    }

    /// `sem_timedwait` with a relative timeout in seconds. Returns `true`
    /// if acquired, `false` on timeout.
    pub fn decrement_timeout(&self, timeout_secs: i64) -> bool {
        // SAFETY: see above.
        unsafe {
            let mut ts: libc::timespec = std::mem::zeroed();
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
            ts.tv_sec += timeout_secs;
            loop {
                let rc = libc::sem_timedwait(self.sem_ptr(), &ts);
                if rc == 0 {
                    return true;
                }
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return false;
            }
        }
    }

    /// A guarded critical section: blocks until the semaphore (used as a
    /// binary mutex, initial value 1) is acquired, runs `f`, then always
    /// releases, even if `f` panics.
    pub fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        self.decrement();
        struct ReleaseOnDrop<'a>(&'a Semaphore);
        impl Drop for ReleaseOnDrop<'_> {
            fn drop(&mut self) {
                self.0.increment();
            }
        }
        let _guard = ReleaseOnDrop(self);
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_decrement_increment_round_trip() {
        let mut storage = SemaphoreStorage::default();
        let sem = unsafe { Semaphore::init_at(&mut storage as *mut _, 1) }.unwrap();
        sem.decrement();
        sem.increment();
    }

    #[test]
    fn with_lock_always_releases() {
        let mut storage = SemaphoreStorage::default();
        let sem = unsafe { Semaphore::init_at(&mut storage as *mut _, 1) }.unwrap();
        sem.with_lock(|| {
            // critical section body
        });
        // If the release were skipped, this would block forever; use a
        // timed wait to keep the test from hanging on a real regression.
        assert!(sem.decrement_timeout(1));
        sem.increment();
    }

    #[test]
    fn decrement_timeout_expires_when_unavailable() {
        let mut storage = SemaphoreStorage::default();
        let sem = unsafe { Semaphore::init_at(&mut storage as *mut _, 0) }.unwrap();
        assert!(!sem.decrement_timeout(1));
    }
}
