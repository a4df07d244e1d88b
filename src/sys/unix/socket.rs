use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use super::net::InetAddr;

/// A non-blocking, close-on-exec owned socket file descriptor.
#[derive(Debug)]
pub struct Socket(OwnedFd);

impl Socket {
    pub fn stream_nonblocking() -> io::Result<Socket> {
        let fd = syscall!(socket(
            libc::AF_INET,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        ))?;
        Ok(Socket(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    pub fn set_reuse_addr(&self, on: bool) -> io::Result<()> {
        setsockopt(self.0.as_raw_fd(), libc::SO_REUSEADDR, on)
    }

    pub fn set_reuse_port(&self, on: bool) -> io::Result<()> {
        setsockopt(self.0.as_raw_fd(), libc::SO_REUSEPORT, on)
    }

    pub fn set_nodelay(&self, on: bool) -> io::Result<()> {
        set_nodelay(self.0.as_raw_fd(), on)
    }

    pub fn set_keepalive(&self, on: bool) -> io::Result<()> {
        set_keepalive(self.0.as_raw_fd(), on)
    }

    pub fn bind(&self, addr: InetAddr) -> io::Result<()> {
        let (raw, len) = addr.to_sockaddr();
        syscall!(bind(
            self.0.as_raw_fd(),
            &raw as *const _ as *const libc::sockaddr,
            len,
        ))
        .map(|_| ())
    }

    pub fn listen(&self, backlog: i32) -> io::Result<()> {
        syscall!(listen(self.0.as_raw_fd(), backlog)).map(|_| ())
    }

    pub fn shutdown_write(&self) -> io::Result<()> {
        syscall!(shutdown(self.0.as_raw_fd(), libc::SHUT_WR)).map(|_| ())
    }

    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        let mut errno: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        syscall!(getsockopt(
            self.0.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut errno as *mut _ as *mut libc::c_void,
            &mut len,
        ))?;
        if errno == 0 {
            Ok(None)
        } else {
            Ok(Some(io::Error::from_raw_os_error(errno)))
        }
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl IntoRawFd for Socket {
    fn into_raw_fd(self) -> RawFd {
        self.0.into_raw_fd()
    }
}

impl FromRawFd for Socket {
    unsafe fn from_raw_fd(fd: RawFd) -> Socket {
        Socket(OwnedFd::from_raw_fd(fd))
    }
}

fn setsockopt(fd: RawFd, opt: libc::c_int, on: bool) -> io::Result<()> {
    let val: libc::c_int = if on { 1 } else { 0 };
    syscall!(setsockopt(
        fd,
        libc::SOL_SOCKET,
        opt,
        &val as *const _ as *const libc::c_void,
        std::mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))
    .map(|_| ())
}

pub fn set_nodelay(fd: RawFd, on: bool) -> io::Result<()> {
    let val: libc::c_int = if on { 1 } else { 0 };
    syscall!(setsockopt(
        fd,
        libc::IPPROTO_TCP,
        libc::TCP_NODELAY,
        &val as *const _ as *const libc::c_void,
        std::mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))
    .map(|_| ())
}

pub fn set_keepalive(fd: RawFd, on: bool) -> io::Result<()> {
    setsockopt(fd, libc::SO_KEEPALIVE, on)
}

pub fn bind_listen(addr: InetAddr, reuse_port: bool) -> io::Result<Socket> {
    let socket = Socket::stream_nonblocking()?;
    socket.set_reuse_addr(true)?;
    if reuse_port {
        socket.set_reuse_port(true)?;
    }
    socket.bind(addr)?;
    Ok(socket)
}

/// Accepts one pending connection as a non-blocking, close-on-exec socket.
pub fn accept(listen_fd: RawFd) -> io::Result<(Socket, InetAddr)> {
    let mut storage: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    let fd = syscall!(accept4(
        listen_fd,
        &mut storage as *mut _ as *mut libc::sockaddr,
        &mut len,
        libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
    ))?;
    let peer = InetAddr::from_sockaddr(&storage);
    Ok((unsafe { Socket::from_raw_fd(fd) }, peer))
}
