//! Byte and file-descriptor transport underneath a [`Display`](crate::Display).
//!
//! The [`Transport`] trait is the seam between the connection logic and the
//! operating system.  [`UnixTransport`] is the real implementation: a
//! connected `AF_UNIX` stream socket where descriptors travel as
//! `SCM_RIGHTS` ancillary data next to the message bytes.  Unit tests
//! replace it with a mock.

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::trace;

/// Bytes read per `recvmsg` call.
pub const RECV_CHUNK: usize = 4096;

/// Most descriptors accepted in one `recvmsg` call.
pub const MAX_FDS_PER_RECV: usize = 28;

#[cfg(target_os = "linux")]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(target_os = "linux"))]
const SEND_FLAGS: libc::c_int = 0;

#[cfg(target_os = "linux")]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(target_os = "linux"))]
const RECV_FLAGS: libc::c_int = 0;

/// One read from the socket.  Empty `bytes` with no descriptors means the
/// peer hung up.
#[derive(Debug, Default)]
pub struct Received {
    pub bytes: Vec<u8>,
    pub fds: Vec<OwnedFd>,
}

impl Received {
    pub fn is_hangup(&self) -> bool {
        self.bytes.is_empty() && self.fds.is_empty()
    }
}

/// A bidirectional byte stream that can carry file descriptors.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Writes all of `bytes`, attaching `fds` to the first write.
    fn send(&mut self, bytes: &[u8], fds: &[RawFd]) -> io::Result<()>;

    /// Waits until data can be read.  `None` blocks indefinitely; returns
    /// `false` when the timeout elapses first.
    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool>;

    /// Performs one read of at most [`RECV_CHUNK`] bytes.
    fn recv(&mut self) -> io::Result<Received>;

    /// Shuts the stream down in both directions.
    fn shutdown(&mut self);
}

// ── Unix socket transport ─────────────────────────────────────────────────────

/// [`Transport`] over a connected Unix stream socket.
#[derive(Debug)]
pub struct UnixTransport {
    stream: UnixStream,
}

impl UnixTransport {
    /// Connects to the socket at `path`.
    ///
    /// # Errors
    ///
    /// Returns the `connect(2)` error unchanged.
    pub fn connect(path: &Path) -> io::Result<Self> {
        UnixStream::connect(path).map(Self::new)
    }

    /// Wraps an already connected stream.
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    pub fn stream(&self) -> &UnixStream {
        &self.stream
    }
}

impl Transport for UnixTransport {
    fn send(&mut self, bytes: &[u8], fds: &[RawFd]) -> io::Result<()> {
        let sock = self.stream.as_raw_fd();
        let mut written = send_with_fds(sock, bytes, fds)?;
        while written < bytes.len() {
            written += send_with_fds(sock, &bytes[written..], &[])?;
        }
        trace!(bytes = bytes.len(), fds = fds.len(), "sent");
        Ok(())
    }

    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut pfd = libc::pollfd {
            fd: self.stream.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            let timeout_ms = match deadline {
                None => -1,
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    libc::c_int::try_from(left.as_millis()).unwrap_or(libc::c_int::MAX)
                }
            };
            // SAFETY: `pfd` is a valid, initialized pollfd and we pass a
            // count of exactly one.
            let n = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            // POLLHUP and POLLERR also count: the following read reports them.
            return Ok(n > 0);
        }
    }

    fn recv(&mut self) -> io::Result<Received> {
        let received = recv_with_fds(self.stream.as_raw_fd())?;
        trace!(bytes = received.bytes.len(), fds = received.fds.len(), "received");
        Ok(received)
    }

    fn shutdown(&mut self) {
        // ENOTCONN after the peer already left is fine.
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

// ── SCM_RIGHTS send ──────────────────────────────────────────────────────────

/// One `sendmsg` call carrying `data` and, if any, `fds` as `SCM_RIGHTS`.
///
/// Returns the number of bytes the kernel accepted; the descriptors are
/// attached to those bytes and must not be sent again.
fn send_with_fds(sock: RawFd, data: &[u8], fds: &[RawFd]) -> io::Result<usize> {
    let fd_size = std::mem::size_of::<libc::c_int>();
    let payload = fds.len() * fd_size;
    let cmsg_space = if fds.is_empty() {
        0
    } else {
        // SAFETY: CMSG_SPACE is a pure size computation.
        unsafe { libc::CMSG_SPACE(payload as u32) as usize }
    };
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut iov = libc::iovec {
        iov_base: data.as_ptr() as *mut libc::c_void,
        iov_len: data.len(),
    };
    // SAFETY: msghdr is plain old data; all-zero is a valid empty header.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if !fds.is_empty() {
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = cmsg_space as _;
        // SAFETY: the control buffer is CMSG_SPACE(payload) bytes, so the
        // first header and its payload of `fds.len()` ints fit inside it.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(payload as u32) as _;
            let data_ptr = libc::CMSG_DATA(cmsg) as *mut libc::c_int;
            for (i, fd) in fds.iter().enumerate() {
                std::ptr::write_unaligned(data_ptr.add(i), *fd);
            }
        }
    }

    loop {
        // SAFETY: `msg` points at `iov` and `cmsg_buf`, both alive for the
        // duration of the call.
        let n = unsafe { libc::sendmsg(sock, &msg, SEND_FLAGS) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

// ── SCM_RIGHTS receive ───────────────────────────────────────────────────────

/// One `recvmsg` call; every descriptor in the ancillary data becomes an
/// [`OwnedFd`].
fn recv_with_fds(sock: RawFd) -> io::Result<Received> {
    let mut data_buf = vec![0u8; RECV_CHUNK];
    let fd_size = std::mem::size_of::<libc::c_int>();
    // SAFETY: CMSG_SPACE is a pure size computation.
    let cmsg_space = unsafe { libc::CMSG_SPACE((MAX_FDS_PER_RECV * fd_size) as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut iov = libc::iovec {
        iov_base: data_buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: data_buf.len(),
    };
    // SAFETY: msghdr is plain old data; all-zero is a valid empty header.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_space as _;

    let n = loop {
        // SAFETY: `msg` describes `data_buf` and `cmsg_buf`, both alive and
        // writable for the duration of the call.
        let n = unsafe { libc::recvmsg(sock, &mut msg, RECV_FLAGS) };
        if n >= 0 {
            break n as usize;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    };
    data_buf.truncate(n);

    let mut fds = Vec::new();
    // SAFETY: the kernel filled `cmsg_buf` with well-formed headers and set
    // `msg_controllen`; CMSG_FIRSTHDR / CMSG_NXTHDR stay inside it.  Each
    // SCM_RIGHTS descriptor is a fresh one owned by this process.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg);
                let count = ((*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize) / fd_size;
                for i in 0..count {
                    let fd: libc::c_int =
                        std::ptr::read_unaligned(data.add(i * fd_size) as *const libc::c_int);
                    fds.push(OwnedFd::from_raw_fd(fd));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }
    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        tracing::warn!("ancillary data truncated; some descriptors were dropped by the kernel");
    }

    Ok(Received {
        bytes: data_buf,
        fds,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
