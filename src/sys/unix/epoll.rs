use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Thin wrapper around a Linux `epoll` instance operated in level-triggered
/// mode. Registration keys an fd directly (no separate token indirection);
/// the demultiplexer above this layer maps fds back to channels.
#[derive(Debug)]
pub struct Selector {
    ep: OwnedFd,
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        let ep = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        let ep = unsafe { OwnedFd::from_raw_fd(ep) };
        Ok(Selector { ep })
    }

    pub fn select(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        events.clear();
        loop {
            let n = syscall!(epoll_wait(
                self.ep.as_raw_fd(),
                events.as_mut_ptr(),
                events.capacity() as i32,
                timeout_ms,
            ));
            match n {
                Ok(n) => {
                    // SAFETY: `epoll_wait` initialised the first `n` slots.
                    unsafe { events.set_len(n as usize) };
                    return Ok(());
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn register(&self, fd: RawFd, interests: Interest) -> io::Result<()> {
        let mut event = epoll_event_for(fd, interests);
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_ADD,
            fd,
            &mut event,
        ))
        .map(|_| ())
    }

    pub fn reregister(&self, fd: RawFd, interests: Interest) -> io::Result<()> {
        let mut event = epoll_event_for(fd, interests);
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_MOD,
            fd,
            &mut event,
        ))
        .map(|_| ())
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        // `epoll_ctl(2)` ignores the event pointer for `EPOLL_CTL_DEL`, but
        // older kernels (< 2.6.9) require a non-null one.
        let mut event = epoll_event_for(fd, Interest::empty());
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_DEL,
            fd,
            &mut event,
        ))
        .map(|_| ())
    }
}

use std::os::unix::io::FromRawFd;

/// Interest mask requested for a registration. Deliberately excludes
/// `EPOLLET`: this demultiplexer is level-triggered throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u32);

impl Interest {
    pub const READABLE: Interest = Interest((libc::EPOLLIN | libc::EPOLLPRI) as u32);
    pub const WRITABLE: Interest = Interest(libc::EPOLLOUT as u32);

    pub const fn empty() -> Interest {
        Interest(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn add(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }

    pub const fn remove(self, other: Interest) -> Interest {
        Interest(self.0 & !other.0)
    }

    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

fn epoll_event_for(fd: RawFd, interests: Interest) -> libc::epoll_event {
    libc::epoll_event {
        events: interests.0,
        u64: fd as u64,
    }
}

pub type Event = libc::epoll_event;

#[derive(Debug)]
pub struct Events(Vec<Event>);

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events(Vec::with_capacity(capacity))
    }

    pub fn capacity(&self) -> usize {
        self.0.capacity()
    }

    pub fn grow(&mut self) {
        let cap = self.0.capacity().max(16) * 2;
        self.0.reserve(cap - self.0.capacity());
    }

    fn clear(&mut self) {
        self.0.clear();
    }

    fn as_mut_ptr(&mut self) -> *mut Event {
        self.0.as_mut_ptr()
    }

    unsafe fn set_len(&mut self, len: usize) {
        self.0.set_len(len);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Events {
    fn default() -> Events {
        Events::with_capacity(16)
    }
}

pub mod event {
    use super::Event;
    use std::os::unix::io::RawFd;

    pub fn fd(event: &Event) -> RawFd {
        event.u64 as RawFd
    }

    pub fn is_readable(event: &Event) -> bool {
        (event.events as i32) & (libc::EPOLLIN | libc::EPOLLPRI) != 0
    }

    pub fn is_writable(event: &Event) -> bool {
        (event.events as i32) & libc::EPOLLOUT != 0
    }

    pub fn is_error(event: &Event) -> bool {
        (event.events as i32) & libc::EPOLLERR != 0
    }

    /// Hang-up without a matching readable bit: the read side has nothing
    /// left to drain, so this is treated as a close rather than a read.
    pub fn is_closed(event: &Event) -> bool {
        let events = event.events as i32;
        (events & libc::EPOLLHUP != 0) && (events & libc::EPOLLIN == 0)
    }
}
