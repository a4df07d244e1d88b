use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::channel::Channel;
use crate::sys::{Events, Selector};

const DEFAULT_EVENT_CAPACITY: usize = 16;

/// Wraps the kernel readiness facility (`epoll`) together with the fd to
/// [`Channel`] registry needed to dispatch a readiness event back to the
/// channel that asked for it. Loop-thread-only except for construction.
pub struct Demultiplexer {
    selector: Selector,
    channels: Mutex<HashMap<RawFd, Arc<Channel>>>,
}

impl Demultiplexer {
    pub fn new() -> io::Result<Demultiplexer> {
        Ok(Demultiplexer {
            selector: Selector::new()?,
            channels: Mutex::new(HashMap::new()),
        })
    }

    /// Blocks up to `timeout` waiting for readiness, then appends every
    /// channel that became ready (with its observed event recorded) to
    /// `active_channels`. Returns the time the wait returned.
    pub fn poll(
        &self,
        timeout: Duration,
        events: &mut Events,
        active_channels: &mut Vec<Arc<Channel>>,
    ) -> io::Result<Instant> {
        self.selector.select(events, Some(timeout))?;
        let now = Instant::now();

        if events.len() == events.capacity() {
            events.grow();
        }

        let channels = self.channels.lock().unwrap();
        for raw in events.iter() {
            let fd = crate::sys::event::fd(raw);
            if let Some(channel) = channels.get(&fd) {
                channel.set_revents(raw);
                active_channels.push(channel.clone());
            }
        }
        Ok(now)
    }

    pub fn has_channel(&self, channel: &Arc<Channel>) -> bool {
        self.channels
            .lock()
            .unwrap()
            .get(&channel.fd())
            .map(|c| Arc::ptr_eq(c, channel))
            .unwrap_or(false)
    }

    pub fn update_channel(&self, channel: Arc<Channel>) {
        let fd = channel.fd();
        if channel.is_unregistered() || channel.is_deregistered_but_known() {
            self.channels.lock().unwrap().insert(fd, channel.clone());
            self.selector
                .register(fd, channel.interest())
                .unwrap_or_else(|e| fatal(&format!("epoll_ctl(ADD) failed for fd {fd}: {e}")));
            channel.mark_registered();
        } else if channel.is_registered() {
            if channel.interest().is_empty() {
                self.selector.deregister(fd).unwrap_or_else(|e| {
                    log::error!("epoll_ctl(DEL) failed for fd {fd}: {e}");
                });
                channel.mark_deregistered_but_known();
            } else {
                self.selector
                    .reregister(fd, channel.interest())
                    .unwrap_or_else(|e| {
                        fatal(&format!("epoll_ctl(MOD) failed for fd {fd}: {e}"))
                    });
            }
        }
    }

    pub fn remove_channel(&self, channel: Arc<Channel>) {
        let fd = channel.fd();
        self.channels.lock().unwrap().remove(&fd);
        if channel.is_registered() {
            if let Err(e) = self.selector.deregister(fd) {
                log::error!("epoll_ctl(DEL) failed for fd {fd}: {e}");
            }
        }
        channel.mark_unregistered();
    }
}

fn fatal(msg: &str) -> ! {
    log::error!("{msg}");
    panic!("{msg}");
}

pub(crate) fn default_events() -> Events {
    Events::with_capacity(DEFAULT_EVENT_CAPACITY)
}
