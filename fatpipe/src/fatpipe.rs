//! Parent/child halves of the fat pipe (§4.5).

use crate::ancillary;
use crate::control::{self, FatPipeControl, MAGIC_DEAD, MAGIC_LIVE};
use crate::error::{FatPipeError, Result};
use bytemuck::Zeroable;
use channel::data::{self, DataHeader};
use channel::semaphore::Semaphore;
use channel::shmem::SharedMemory;
use channel::Frame;
use shared::EpochTime;
use std::os::unix::io::RawFd;
use tracing::{debug, info};

/// Pre-fork handle: owns both ends of the socketpair until the caller
/// forks and calls [`FatPipe::do_parent`] or [`FatPipe::do_child`] in the
/// respective process.
pub struct FatPipe {
    control: SharedMemory,
    parent_fd: RawFd,
    child_fd: RawFd,
}

impl FatPipe {
    pub fn create() -> Result<FatPipe> {
        let control = SharedMemory::create_anonymous(FatPipeControl::SIZE)?;
        {
            let bytes = control.as_mut_slice();
            let ch = control::header_mut(bytes);
            *ch = FatPipeControl::zeroed();
            ch.magic = MAGIC_LIVE;
            // SAFETY: freshly zeroed memory in a mapping only this process
            // has touched so far.
            unsafe {
                Semaphore::init_at(&mut ch.mutex as *mut _, 1).map_err(|e| channel::ChannelError::io("<fatpipe>", e))?;
            }
        }

        let mut fds = [0 as RawFd; 2];
        // SAFETY: a plain socketpair call with an out-param array of two
        // fds, as documented.
        let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_DGRAM, 0, fds.as_mut_ptr()) };
        if rc != 0 {
            return Err(FatPipeError::Io(std::io::Error::last_os_error()));
        }
        Ok(FatPipe {
            control,
            parent_fd: fds[0],
            child_fd: fds[1],
        })
    }

    /// Call after `fork()` in the parent process.
    pub fn do_parent(self) -> Result<FatPipeParent> {
        // SAFETY: fd owned by this struct, closed exactly once.
        unsafe {
            libc::close(self.child_fd);
        }
        Ok(FatPipeParent {
            control: self.control,
            pipe_fd: self.parent_fd,
            data: None,
        })
    }

    /// Call after `fork()` in the child process. Clears close-on-exec on
    /// the control segment's fd so a subsequent `exec` can still reach it
    /// via [`FatPipeChild::shmemfd`].
    pub fn do_child(self) -> Result<FatPipeChild> {
        // SAFETY: see above.
        unsafe {
            libc::close(self.parent_fd);
        }
        self.control.inherit().map_err(FatPipeError::Channel)?;
        Ok(FatPipeChild {
            control: self.control,
            pipe_fd: self.child_fd,
            data: None,
        })
    }
}

/// The writer half, held by the parent process.
pub struct FatPipeParent {
    control: SharedMemory,
    pipe_fd: RawFd,
    data: Option<SharedMemory>,
}

impl FatPipeParent {
    fn mutex(&self) -> &Semaphore {
        let ch = control::header(self.control.as_slice());
        // SAFETY: placement-constructed in `FatPipe::create`.
        unsafe { Semaphore::at(&ch.mutex as *const _ as *mut _) }
    }

    /// Command-line string for the control segment's fd, to pass to a
    /// child that will `exec` a different binary.
    pub fn shmemfd(&self) -> RawFd {
        self.control.raw_fd()
    }

    pub fn pipefd(&self) -> RawFd {
        self.pipe_fd
    }

    /// Writes one frame, allocating a fresh anonymous data segment (and
    /// handing its fd to the child) on the first call or whenever `payload`
    /// no longer fits the current one (§4.5).
    pub fn send(&mut self, payload: &[u8], type_str: &str) -> Result<()> {
        let fd_to_hand_over = self.ensure_capacity(payload.len())?;

        let now = EpochTime::now();
        let mutex = self.mutex() as *const Semaphore;
        // SAFETY: see the identical pattern in `channel::publisher`.
        let mutex = unsafe { &*mutex };
        mutex.with_lock(|| {
            let data = self.data.as_ref().expect("ensure_capacity always creates one");
            let bytes = data.as_mut_slice();
            let dh = data::header_mut(bytes);
            dh.set_timestamp(now);
            dh.set_type_str(type_str);
            dh.payload_len = payload.len() as u32;
            data::payload_mut(bytes, payload.len()).copy_from_slice(payload);
        });

        ancillary::send_byte_with_fd(self.pipe_fd, b'.', fd_to_hand_over, fd_to_hand_over.is_some())?;
        Ok(())
    }

    fn ensure_capacity(&mut self, payload_len: usize) -> Result<Option<RawFd>> {
        let need_new = match &self.data {
            None => true,
            Some(d) => payload_len > data::header(d.as_slice()).size_limit as usize,
        };
        if !need_new {
            return Ok(None);
        }
        let total = if self.data.is_none() {
            data::initial_mapping_size(payload_len)
        } else {
            data::grow(DataHeader::SIZE + payload_len)
        };
        let seg = SharedMemory::create_anonymous(total)?;
        {
            let bytes = seg.as_mut_slice();
            let dh = data::header_mut(bytes);
            *dh = DataHeader::zeroed();
            dh.size_limit = (total - DataHeader::SIZE) as u64;
        }
        let fd = seg.raw_fd();
        self.data = Some(seg);
        Ok(Some(fd))
    }

    /// Sends a non-blocking ping byte; returns whether the pipe accepted
    /// it. A caller running a 1 Hz ping timer treats repeated `false`s as a
    /// dead child.
    pub fn ping(&self) -> bool {
        ancillary::send_byte_with_fd(self.pipe_fd, b'p', None, false).is_ok()
    }
}

impl Drop for FatPipeParent {
    fn drop(&mut self) {
        let mutex = self.mutex();
        mutex.with_lock(|| {
            control::header_mut(self.control.as_mut_slice()).magic = MAGIC_DEAD;
        });
        let _ = ancillary::send_byte_with_fd(self.pipe_fd, b'x', None, false);
        // SAFETY: owned by this struct.
        unsafe {
            libc::close(self.pipe_fd);
        }
        info!("fat pipe parent closed");
    }
}

/// The reader half, held by the forked (and possibly exec'd) child
/// process.
pub struct FatPipeChild {
    control: SharedMemory,
    pipe_fd: RawFd,
    data: Option<SharedMemory>,
}

/// The result of one [`FatPipeChild::receive`] call.
#[derive(Debug)]
pub enum ReceiveOutcome {
    Frame(Frame),
    EndOfStream,
}

impl FatPipeChild {
    fn mutex(&self) -> &Semaphore {
        let ch = control::header(self.control.as_slice());
        // SAFETY: placement-constructed in `FatPipe::create`.
        unsafe { Semaphore::at(&ch.mutex as *const _ as *mut _) }
    }

    pub fn shmemfd(&self) -> RawFd {
        self.control.raw_fd()
    }

    pub fn pipefd(&self) -> RawFd {
        self.pipe_fd
    }

    /// Blocks for the next message: `.` (a frame, possibly with a new data
    /// segment fd attached), `x` (end-of-stream), or `p` (a ping, which is
    /// consumed and ignored).
    pub fn receive(&mut self) -> Result<ReceiveOutcome> {
        loop {
            let (byte, fd) = ancillary::recv_byte_with_fd(self.pipe_fd)?;
            match byte {
                b'x' => return Ok(ReceiveOutcome::EndOfStream),
                b'p' => {
                    debug!("fat pipe ping received");
                    continue;
                }
                b'.' => return self.receive_frame(fd),
                other => {
                    debug!(byte = other, "ignoring unrecognized fat pipe message");
                    continue;
                }
            }
        }
    }

    fn receive_frame(&mut self, new_fd: Option<RawFd>) -> Result<ReceiveOutcome> {
        if let Some(new_fd) = new_fd {
            self.data = Some(SharedMemory::from_raw_fd(new_fd, true).map_err(FatPipeError::Channel)?);
        }

        let mutex = self.mutex() as *const Semaphore;
        // SAFETY: see `FatPipeParent::send`.
        let mutex = unsafe { &*mutex };
        let frame = mutex.with_lock(|| {
            let data = self.data.as_ref().expect("first frame always carries its fd");
            let bytes = data.as_slice();
            let dh = data::header(bytes);
            let frame = Frame {
                payload: data::payload(bytes).to_vec(),
                type_str: dh.type_str(),
                timestamp: dh.timestamp(),
            };
            // At-most-once-per-event semantics: clear the length so a
            // spurious extra wake-up never redelivers the same bytes.
            data::header_mut(data.as_mut_slice()).payload_len = 0;
            frame
        });
        Ok(ReceiveOutcome::Frame(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exercises a real fork: the child reads back exactly what the parent
    /// sent and reports success via its exit status.
    #[test]
    fn parent_to_child_round_trip_across_fork() {
        let pipe = FatPipe::create().unwrap();
        // SAFETY: single-threaded test process; the child only calls
        // async-signal-safe-adjacent std/libc calls before exiting.
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed");

        if pid == 0 {
            let mut child = pipe.do_child().expect("do_child");
            let exit_code = match child.receive() {
                Ok(ReceiveOutcome::Frame(frame)) if frame.payload == b"hello" && frame.type_str == "application/octet-stream" => 0,
                _ => 1,
            };
            std::process::exit(exit_code);
        }

        let mut parent = pipe.do_parent().unwrap();
        parent.send(b"hello", "application/octet-stream").unwrap();

        let mut status: i32 = 0;
        // SAFETY: `pid` is this test's own freshly forked child.
        unsafe {
            libc::waitpid(pid, &mut status, 0);
        }
        assert_eq!(libc::WEXITSTATUS(status), 0);
    }

    #[test]
    fn end_of_stream_on_parent_drop() {
        let pipe = FatPipe::create().unwrap();
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed");

        if pid == 0 {
            let mut child = pipe.do_child().expect("do_child");
            let exit_code = match child.receive() {
                Ok(ReceiveOutcome::EndOfStream) => 0,
                _ => 1,
            };
            std::process::exit(exit_code);
        }

        let parent = pipe.do_parent().unwrap();
        drop(parent);

        let mut status: i32 = 0;
        unsafe {
            libc::waitpid(pid, &mut status, 0);
        }
        assert_eq!(libc::WEXITSTATUS(status), 0);
    }
}
