//! Raw `sendmsg`/`recvmsg` wrappers carrying one optional file descriptor
//! as `SCM_RIGHTS` ancillary data alongside a single payload byte, so the
//! byte and the fd arrive atomically in one syscall (§4.5).

use std::io;
use std::mem;
use std::os::raw::c_void;
use std::os::unix::io::RawFd;

pub fn send_byte_with_fd(sock: RawFd, byte: u8, fd: Option<RawFd>, blocking: bool) -> io::Result<()> {
    let mut data = [byte];
    let mut iov = libc::iovec {
        iov_base: data.as_mut_ptr() as *mut c_void,
        iov_len: 1,
    };
    // SAFETY: `msghdr` is a plain-old-data struct; zeroing it is a valid
    // "no ancillary data, no name" initial state.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    let mut cmsg_buf;
    if let Some(fd) = fd {
        // SAFETY: CMSG_SPACE is a pure size computation.
        let space = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as usize;
        cmsg_buf = vec![0u8; space];
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut c_void;
        msg.msg_controllen = space as _;
        // SAFETY: `msg.msg_control` points at `cmsg_buf`, sized to hold
        // exactly one `SCM_RIGHTS` header carrying one fd.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as _;
            std::ptr::write(libc::CMSG_DATA(cmsg) as *mut RawFd, fd);
        }
    }

    let flags = if blocking { 0 } else { libc::MSG_DONTWAIT };
    // SAFETY: `msg` describes a valid single-byte iovec plus, optionally,
    // one well-formed SCM_RIGHTS control message.
    let rc = unsafe { libc::sendmsg(sock, &msg, flags) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Blocking receive of one byte, plus any fd sent alongside it.
pub fn recv_byte_with_fd(sock: RawFd) -> io::Result<(u8, Option<RawFd>)> {
    let mut data = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: data.as_mut_ptr() as *mut c_void,
        iov_len: 1,
    };
    // SAFETY: see `send_byte_with_fd`.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    // SAFETY: CMSG_SPACE is a pure size computation.
    let space = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as usize;
    let mut cmsg_buf = vec![0u8; space];
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut c_void;
    msg.msg_controllen = space as _;

    // SAFETY: `msg` points at live, correctly sized buffers for one
    // payload byte and up to one ancillary fd.
    let rc = unsafe { libc::recvmsg(sock, &mut msg, 0) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    if rc == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "fat pipe socket closed"));
    }

    let mut fd = None;
    // SAFETY: `msg` was just populated by a successful `recvmsg`.
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        if !cmsg.is_null() && (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
            fd = Some(std::ptr::read(libc::CMSG_DATA(cmsg) as *const RawFd));
        }
    }
    Ok((data[0], fd))
}
