use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::RawFd;

/// An IPv4 endpoint. TCP client-side connect and IPv6 are out of scope, so
/// this stays a thin, `Copy`-able wrapper over `SocketAddrV4` rather than a
/// hand-parsed `sockaddr_in`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InetAddr(SocketAddrV4);

impl InetAddr {
    pub fn new(ip: Ipv4Addr, port: u16) -> InetAddr {
        InetAddr(SocketAddrV4::new(ip, port))
    }

    pub fn any(port: u16) -> InetAddr {
        InetAddr(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
    }

    pub fn loopback(port: u16) -> InetAddr {
        InetAddr(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn ip_port(&self) -> String {
        format!("{}:{}", self.0.ip(), self.0.port())
    }

    pub(crate) fn to_sockaddr(self) -> (libc::sockaddr_in, libc::socklen_t) {
        let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_port = self.0.port().to_be();
        addr.sin_addr = libc::in_addr {
            s_addr: u32::from_ne_bytes(self.0.ip().octets()),
        };
        (addr, std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
    }

    pub(crate) fn from_sockaddr(addr: &libc::sockaddr_in) -> InetAddr {
        let ip = Ipv4Addr::from(addr.sin_addr.s_addr.to_ne_bytes());
        let port = u16::from_be(addr.sin_port);
        InetAddr::new(ip, port)
    }

    /// Resolves the locally bound endpoint of `fd` via `getsockname(2)`.
    pub fn local_of(fd: RawFd) -> io::Result<InetAddr> {
        let mut storage: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        syscall!(getsockname(
            fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
        ))?;
        Ok(InetAddr::from_sockaddr(&storage))
    }
}

impl fmt::Display for InetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ip_port())
    }
}

impl From<SocketAddrV4> for InetAddr {
    fn from(addr: SocketAddrV4) -> InetAddr {
        InetAddr(addr)
    }
}
