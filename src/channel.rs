use std::any::Any;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use crate::event_loop::EventLoop;
use crate::sys::{event, Event, Interest};

/// Registration state a [`Channel`] can be in with its owning loop's
/// demultiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unregistered,
    Registered,
    DeregisteredButKnown,
}

type EventCallback = Box<dyn FnMut() + Send>;
type ReadCallback = Box<dyn FnMut(Instant) + Send>;

struct Callbacks {
    read: Option<ReadCallback>,
    write: Option<EventCallback>,
    close: Option<EventCallback>,
    error: Option<EventCallback>,
}

impl Default for Callbacks {
    fn default() -> Callbacks {
        Callbacks {
            read: None,
            write: None,
            close: None,
            error: None,
        }
    }
}

/// Binds one file descriptor to its interest mask and per-event callbacks,
/// mediating registration updates with the owning loop's demultiplexer.
///
/// Loop-affine fields are kept behind a [`Mutex`] purely so a `Channel` can
/// be held in cross-thread structures (the demultiplexer's fd registry, task
/// closures); under the one-loop-per-thread discipline they are only ever
/// touched from the owning loop thread, so the lock is never contended.
pub struct Channel {
    owner: Weak<EventLoop>,
    fd: RawFd,
    inner: Mutex<Inner>,
}

struct Inner {
    interest: Interest,
    state: State,
    tie: Option<Weak<dyn Any + Send + Sync>>,
    callbacks: Callbacks,
    last_raw: Option<Event>,
}

impl Channel {
    pub fn new(owner: Weak<EventLoop>, fd: RawFd) -> Arc<Channel> {
        Arc::new(Channel {
            owner,
            fd,
            inner: Mutex::new(Inner {
                interest: Interest::empty(),
                state: State::Unregistered,
                tie: None,
                callbacks: Callbacks::default(),
                last_raw: None,
            }),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Installs a weak back-reference to the object this channel belongs
    /// to. `handle_event` upgrades it before dispatching and drops the
    /// event silently if the owner has already been destroyed.
    pub fn tie(&self, owner: Weak<dyn Any + Send + Sync>) {
        self.inner.lock().unwrap().tie = Some(owner);
    }

    pub fn set_read_callback(&self, cb: impl FnMut(Instant) + Send + 'static) {
        self.inner.lock().unwrap().callbacks.read = Some(Box::new(cb));
    }

    pub fn set_write_callback(&self, cb: impl FnMut() + Send + 'static) {
        self.inner.lock().unwrap().callbacks.write = Some(Box::new(cb));
    }

    pub fn set_close_callback(&self, cb: impl FnMut() + Send + 'static) {
        self.inner.lock().unwrap().callbacks.close = Some(Box::new(cb));
    }

    pub fn set_error_callback(&self, cb: impl FnMut() + Send + 'static) {
        self.inner.lock().unwrap().callbacks.error = Some(Box::new(cb));
    }

    pub fn is_reading(&self) -> bool {
        self.inner.lock().unwrap().interest.contains(Interest::READABLE)
    }

    pub fn is_writing(&self) -> bool {
        self.inner.lock().unwrap().interest.contains(Interest::WRITABLE)
    }

    pub fn is_none_event(&self) -> bool {
        self.inner.lock().unwrap().interest.is_empty()
    }

    pub fn enable_reading(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.interest = inner.interest.add(Interest::READABLE);
        }
        self.update();
    }

    pub fn disable_reading(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.interest = inner.interest.remove(Interest::READABLE);
        }
        self.update();
    }

    pub fn enable_writing(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.interest = inner.interest.add(Interest::WRITABLE);
        }
        self.update();
    }

    pub fn disable_writing(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.interest = inner.interest.remove(Interest::WRITABLE);
        }
        self.update();
    }

    pub fn disable_all(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.interest = Interest::empty();
        }
        self.update();
    }

    fn update(self: &Arc<Self>) {
        if let Some(owner) = self.owner.upgrade() {
            owner.update_channel(self.clone());
        }
    }

    /// Requests removal from the owning loop. The caller must ensure no
    /// further events are dispatched to this channel afterward.
    pub fn remove(self: &Arc<Self>) {
        if let Some(owner) = self.owner.upgrade() {
            owner.remove_channel(self.clone());
        }
    }

    pub(crate) fn interest(&self) -> Interest {
        self.inner.lock().unwrap().interest
    }

    pub(crate) fn mark_registered(&self) {
        self.inner.lock().unwrap().state = State::Registered;
    }

    pub(crate) fn mark_deregistered_but_known(&self) {
        self.inner.lock().unwrap().state = State::DeregisteredButKnown;
    }

    pub(crate) fn mark_unregistered(&self) {
        self.inner.lock().unwrap().state = State::Unregistered;
    }

    pub(crate) fn is_unregistered(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, State::Unregistered)
    }

    pub(crate) fn is_registered(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, State::Registered)
    }

    pub(crate) fn is_deregistered_but_known(&self) -> bool {
        matches!(
            self.inner.lock().unwrap().state,
            State::DeregisteredButKnown
        )
    }

    pub(crate) fn set_revents(&self, raw: &Event) {
        self.inner.lock().unwrap().last_raw = Some(*raw);
    }

    /// Dispatches the most recently observed readiness to the installed
    /// callbacks, honoring the tie guard.
    pub fn handle_event(&self, receive_time: Instant) {
        let _guard: Option<Arc<dyn Any + Send + Sync>> = {
            let inner = self.inner.lock().unwrap();
            match &inner.tie {
                Some(weak) => match weak.upgrade() {
                    Some(strong) => Some(strong),
                    None => return,
                },
                None => None,
            }
        };
        self.handle_event_inner(receive_time);
    }

    /// Snapshots `last_raw` and takes every callback out of the lock before
    /// dispatching any of them, then puts back whichever slots a callback
    /// didn't itself reassign. A callback invoked while the lock was held
    /// would deadlock on its own `Channel` (e.g. `is_writing`, `disable_all`).
    fn handle_event_inner(&self, receive_time: Instant) {
        let (raw, mut close, mut error, mut read, mut write) = {
            let mut inner = self.inner.lock().unwrap();
            (
                inner.last_raw,
                inner.callbacks.close.take(),
                inner.callbacks.error.take(),
                inner.callbacks.read.take(),
                inner.callbacks.write.take(),
            )
        };

        if let Some(raw) = raw {
            if event::is_closed(&raw) {
                if let Some(cb) = close.as_mut() {
                    cb();
                }
            } else {
                if event::is_error(&raw) {
                    if let Some(cb) = error.as_mut() {
                        cb();
                    }
                }
                if event::is_readable(&raw) {
                    if let Some(cb) = read.as_mut() {
                        cb(receive_time);
                    }
                }
                if event::is_writable(&raw) {
                    if let Some(cb) = write.as_mut() {
                        cb();
                    }
                }
            }
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.callbacks.close.is_none() {
            inner.callbacks.close = close;
        }
        if inner.callbacks.error.is_none() {
            inner.callbacks.error = error;
        }
        if inner.callbacks.read.is_none() {
            inner.callbacks.read = read;
        }
        if inner.callbacks.write.is_none() {
            inner.callbacks.write = write;
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("fd", &self.fd).finish()
    }
}
