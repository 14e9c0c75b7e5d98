// src/syscalls.rs
use libc::{c_int, c_void, socklen_t};
use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::MinnowResult;

pub use libc::epoll_event;

pub const EPOLLIN: u32 = libc::EPOLLIN as u32;
pub const EPOLLOUT: u32 = libc::EPOLLOUT as u32;
pub const EPOLLERR: u32 = libc::EPOLLERR as u32;
pub const EPOLLHUP: u32 = libc::EPOLLHUP as u32;
pub const EPOLLRDHUP: u32 = libc::EPOLLRDHUP as u32;

/// Readiness notification style for a registered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Level,
    Edge,
}

/// Event mask for the listening socket: never one-shot, no RDHUP.
pub fn listen_events(mode: TriggerMode) -> u32 {
    let mut events = EPOLLIN;
    if mode == TriggerMode::Edge {
        events |= libc::EPOLLET as u32;
    }
    events
}

/// Event mask for a connection socket. One-shot registration means a
/// descriptor generates no further events until explicitly re-armed, which
/// keeps a single thread owning each connection at a time.
pub fn conn_events(base: u32, mode: TriggerMode, one_shot: bool) -> u32 {
    let mut events = base | EPOLLRDHUP;
    if mode == TriggerMode::Edge {
        events |= libc::EPOLLET as u32;
    }
    if one_shot {
        events |= libc::EPOLLONESHOT as u32;
    }
    events
}

// ---- Socket Operations ----

/// Create the non-blocking listening TCP socket: optional SO_LINGER for a
/// handshake-confirmed close, SO_REUSEADDR, bound to INADDR_ANY.
pub fn create_listen_socket(port: u16, opt_linger: bool) -> MinnowResult<RawFd> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let linger = libc::linger {
            l_onoff: if opt_linger { 1 } else { 0 },
            l_linger: 1,
        };
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &linger as *const _ as *const c_void,
            mem::size_of_val(&linger) as socklen_t,
        ) < 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        let reuse: c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &reuse as *const _ as *const c_void,
            mem::size_of_val(&reuse) as socklen_t,
        ) < 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        let addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: port.to_be(),
            sin_addr: libc::in_addr {
                s_addr: libc::INADDR_ANY.to_be(),
            },
            sin_zero: [0; 8],
        };
        if libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            mem::size_of_val(&addr) as socklen_t,
        ) < 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        if libc::listen(fd, libc::SOMAXCONN) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        Ok(fd)
    }
}

/// Accept one pending connection. Returns the connected descriptor (already
/// non-blocking) and the peer address, or None once the backlog is drained.
pub fn accept_connection(listen_fd: RawFd) -> MinnowResult<Option<(RawFd, SocketAddr)>> {
    unsafe {
        let mut addr: libc::sockaddr_in = mem::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_in>() as socklen_t;
        let fd = libc::accept4(
            listen_fd,
            &mut addr as *mut _ as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_NONBLOCK,
        );
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(err.into());
        }
        let peer = SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)),
            u16::from_be(addr.sin_port),
        ));
        Ok(Some((fd, peer)))
    }
}

pub fn set_nonblocking(fd: RawFd) -> MinnowResult<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error().into());
        }
    }
    Ok(())
}

pub fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Non-blocking receive. Ok(0) means orderly peer shutdown; EWOULDBLOCK
/// surfaces as an error the caller inspects by kind.
pub fn recv_nonblocking(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    unsafe {
        let res = libc::recv(fd, buf.as_mut_ptr() as *mut c_void, buf.len(), 0);
        if res < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(res as usize)
        }
    }
}

pub fn send_nonblocking(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    unsafe {
        let res = libc::send(
            fd,
            buf.as_ptr() as *const c_void,
            buf.len(),
            libc::MSG_NOSIGNAL,
        );
        if res < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(res as usize)
        }
    }
}

/// Vectored write: transmit up to two non-contiguous regions (response
/// headers plus a mapped file body) in one syscall, no intermediate copy.
pub fn writev_nonblocking(fd: RawFd, bufs: &[&[u8]]) -> io::Result<usize> {
    if bufs.is_empty() {
        return Ok(0);
    }
    let count = bufs.len().min(2);
    let mut iovecs: [libc::iovec; 2] = unsafe { mem::zeroed() };
    for (iov, buf) in iovecs.iter_mut().zip(bufs.iter().take(count)) {
        iov.iov_base = buf.as_ptr() as *mut c_void;
        iov.iov_len = buf.len();
    }
    unsafe {
        let res = libc::writev(fd, iovecs.as_ptr(), count as c_int);
        if res < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(res as usize)
        }
    }
}

// ---- Epoll Operations ----

pub struct Epoll {
    fd: RawFd,
}

impl Epoll {
    pub fn new() -> MinnowResult<Self> {
        unsafe {
            let fd = libc::epoll_create1(0);
            if fd < 0 {
                return Err(io::Error::last_os_error().into());
            }
            Ok(Self { fd })
        }
    }

    pub fn add(&self, fd: RawFd, token: u64, events: u32) -> MinnowResult<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, events)
    }

    pub fn modify(&self, fd: RawFd, token: u64, events: u32) -> MinnowResult<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, events)
    }

    /// Deregister a descriptor. ENOENT is tolerated so eviction paths that
    /// race with kernel-side removal stay idempotent.
    pub fn delete(&self, fd: RawFd) -> MinnowResult<()> {
        unsafe {
            if libc::epoll_ctl(self.fd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ENOENT) {
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Wait for readiness events. A signal-interrupted wait reports zero
    /// events so the caller can re-check its flags; any other failure is
    /// fatal to the dispatch loop.
    pub fn wait(&self, events: &mut [epoll_event], timeout_ms: i32) -> MinnowResult<usize> {
        unsafe {
            let res = libc::epoll_wait(
                self.fd,
                events.as_mut_ptr(),
                events.len() as c_int,
                timeout_ms,
            );
            if res < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    return Ok(0);
                }
                return Err(err.into());
            }
            Ok(res as usize)
        }
    }

    fn ctl(&self, op: c_int, fd: RawFd, token: u64, events: u32) -> MinnowResult<()> {
        let mut event = epoll_event { events, u64: token };
        unsafe {
            if libc::epoll_ctl(self.fd, op, fd, &mut event) < 0 {
                return Err(io::Error::last_os_error().into());
            }
        }
        Ok(())
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

// ---- Signal Bridge ----

static SIGNAL_PIPE_WR: AtomicI32 = AtomicI32::new(-1);

/// Handler installed for every routed signal: a single non-blocking write
/// of the signal number to the self-pipe, nothing else. errno is restored
/// for the interrupted code.
extern "C" fn signal_forwarder(sig: c_int) {
    unsafe {
        let saved_errno = *libc::__errno_location();
        let fd = SIGNAL_PIPE_WR.load(Ordering::Relaxed);
        if fd >= 0 {
            let byte = sig as u8;
            libc::send(fd, &byte as *const u8 as *const c_void, 1, libc::MSG_DONTWAIT);
        }
        *libc::__errno_location() = saved_errno;
    }
}

/// Create the self-pipe (a non-blocking socketpair) and remember its write
/// end for the signal handler. Returns (read_end, write_end).
pub fn create_signal_pipe() -> MinnowResult<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    unsafe {
        if libc::socketpair(libc::PF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) < 0 {
            return Err(io::Error::last_os_error().into());
        }
    }
    set_nonblocking(fds[0])?;
    set_nonblocking(fds[1])?;
    SIGNAL_PIPE_WR.store(fds[1], Ordering::Relaxed);
    Ok((fds[0], fds[1]))
}

/// Route a signal through the self-pipe.
pub fn register_signal(sig: c_int, restart: bool) -> MinnowResult<()> {
    unsafe {
        let mut sa: libc::sigaction = mem::zeroed();
        sa.sa_sigaction = signal_forwarder as extern "C" fn(c_int) as usize;
        if restart {
            sa.sa_flags |= libc::SA_RESTART;
        }
        libc::sigfillset(&mut sa.sa_mask);
        if libc::sigaction(sig, &sa, ptr::null_mut()) < 0 {
            return Err(io::Error::last_os_error().into());
        }
    }
    Ok(())
}

pub fn ignore_signal(sig: c_int) -> MinnowResult<()> {
    unsafe {
        let mut sa: libc::sigaction = mem::zeroed();
        sa.sa_sigaction = libc::SIG_IGN;
        libc::sigfillset(&mut sa.sa_mask);
        if libc::sigaction(sig, &sa, ptr::null_mut()) < 0 {
            return Err(io::Error::last_os_error().into());
        }
    }
    Ok(())
}

pub fn schedule_alarm(secs: u32) {
    unsafe {
        libc::alarm(secs);
    }
}

// ---- Mapped Response Bodies ----

/// Read-only mapping of a response file, unmapped on drop so connection
/// teardown on any path releases it.
pub struct MappedFile {
    ptr: *mut c_void,
    len: usize,
}

// The mapping is immutable read-only memory for its whole lifetime.
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    pub fn map(path: &Path, len: usize) -> MinnowResult<Self> {
        let file = std::fs::File::open(path)?;
        unsafe {
            let ptr = libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error().into());
            }
            Ok(Self { ptr, len })
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn mapped_file_exposes_contents() {
        let path = std::env::temp_dir().join(format!("minnow-map-{}", std::process::id()));
        fs::write(&path, b"mapped body").unwrap();
        let map = MappedFile::map(&path, 11).unwrap();
        assert_eq!(map.as_slice(), b"mapped body");
        assert_eq!(map.len(), 11);
        drop(map);
        fs::remove_file(&path).unwrap();
    }

    fn local_socketpair() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        unsafe {
            assert_eq!(
                libc::socketpair(libc::PF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()),
                0
            );
        }
        set_nonblocking(fds[0]).unwrap();
        set_nonblocking(fds[1]).unwrap();
        (fds[0], fds[1])
    }

    #[test]
    fn epoll_add_and_wait_on_socketpair() {
        let (rd, wr) = local_socketpair();
        let epoll = Epoll::new().unwrap();
        epoll.add(rd, rd as u64, EPOLLIN).unwrap();

        let mut events = [epoll_event { events: 0, u64: 0 }; 8];
        assert_eq!(epoll.wait(&mut events, 0).unwrap(), 0);

        send_nonblocking(wr, b"x").unwrap();
        let n = epoll.wait(&mut events, 100).unwrap();
        assert_eq!(n, 1);
        let token = events[0].u64;
        assert_eq!(token, rd as u64);

        let mut buf = [0u8; 4];
        assert_eq!(recv_nonblocking(rd, &mut buf).unwrap(), 1);
        epoll.delete(rd).unwrap();
        close_fd(rd);
        close_fd(wr);
    }

    #[test]
    fn conn_events_sets_oneshot_and_rdhup() {
        let events = conn_events(EPOLLIN, TriggerMode::Edge, true);
        assert_ne!(events & EPOLLRDHUP, 0);
        assert_ne!(events & libc::EPOLLONESHOT as u32, 0);
        assert_ne!(events & libc::EPOLLET as u32, 0);
        let lt = conn_events(EPOLLOUT, TriggerMode::Level, false);
        assert_eq!(lt & libc::EPOLLET as u32, 0);
        assert_eq!(lt & libc::EPOLLONESHOT as u32, 0);
    }
}
