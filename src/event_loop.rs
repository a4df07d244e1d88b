use std::cell::Cell;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::ThreadId;
use std::time::Duration;

use crate::channel::Channel;
use crate::demultiplexer::{default_events, Demultiplexer};
use crate::sys::Waker;

thread_local! {
    static HAS_LOOP_IN_THIS_THREAD: Cell<bool> = const { Cell::new(false) };
}

const POLL_TIMEOUT: Duration = Duration::from_secs(10);

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A per-thread event loop: drives the [`Demultiplexer`], dispatches ready
/// [`Channel`]s, and runs tasks enqueued from any thread. Exactly one
/// `EventLoop` may exist per OS thread.
pub struct EventLoop {
    thread_id: ThreadId,
    demux: Demultiplexer,
    waker: Waker,
    wakeup_channel: Arc<Channel>,
    tasks: Mutex<Vec<Task>>,
    quit: AtomicBool,
    looping: AtomicBool,
    calling_pending_tasks: AtomicBool,
}

impl EventLoop {
    pub fn new() -> io::Result<Arc<EventLoop>> {
        if HAS_LOOP_IN_THIS_THREAD.with(Cell::get) {
            fatal("another EventLoop already exists in this thread");
        }
        HAS_LOOP_IN_THIS_THREAD.with(|flag| flag.set(true));

        let demux = Demultiplexer::new()?;
        let waker = Waker::new()?;
        let wakeup_fd = {
            use std::os::unix::io::AsRawFd;
            waker.as_raw_fd()
        };
        let thread_id = std::thread::current().id();

        let event_loop = Arc::new_cyclic(|weak: &Weak<EventLoop>| {
            let wakeup_channel = Channel::new(weak.clone(), wakeup_fd);
            EventLoop {
                thread_id,
                demux,
                waker,
                wakeup_channel,
                tasks: Mutex::new(Vec::new()),
                quit: AtomicBool::new(false),
                looping: AtomicBool::new(false),
                calling_pending_tasks: AtomicBool::new(false),
            }
        });

        let weak_for_cb = Arc::downgrade(&event_loop);
        event_loop.wakeup_channel.set_read_callback(move |_time| {
            if let Some(el) = weak_for_cb.upgrade() {
                if let Err(e) = el.waker.reset() {
                    log::error!("failed to reset wakeup fd: {e}");
                }
            }
        });
        event_loop.wakeup_channel.enable_reading();

        Ok(event_loop)
    }

    pub fn is_in_loop_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    pub(crate) fn assert_in_loop_thread(&self) {
        debug_assert!(
            self.is_in_loop_thread(),
            "operation attempted from outside the owning loop thread"
        );
    }

    /// Runs the loop until `quit` is called. Must be called from the
    /// thread that created this `EventLoop`.
    pub fn run(&self) {
        self.assert_in_loop_thread();
        self.looping.store(true, Ordering::Release);
        self.quit.store(false, Ordering::Release);
        log::trace!("EventLoop on {:?} start running", self.thread_id);

        let mut events = default_events();
        while !self.quit.load(Ordering::Acquire) {
            let mut active_channels = Vec::new();
            match self.demux.poll(POLL_TIMEOUT, &mut events, &mut active_channels) {
                Ok(poll_time) => {
                    for channel in &active_channels {
                        channel.handle_event(poll_time);
                    }
                }
                Err(e) => log::error!("demultiplexer poll failed: {e}"),
            }
            self.do_pending_tasks();
        }

        log::trace!("EventLoop on {:?} stopping", self.thread_id);
        self.looping.store(false, Ordering::Release);
    }

    /// Runs `task` immediately if called on the loop thread; otherwise
    /// queues it to run on the next iteration.
    pub fn run_in_loop(self: &Arc<Self>, task: impl FnOnce() + Send + 'static) {
        if self.is_in_loop_thread() {
            task();
        } else {
            self.queue_in_loop(task);
        }
    }

    /// Queues `task` to run on the loop thread, waking it if necessary.
    pub fn queue_in_loop(self: &Arc<Self>, task: impl FnOnce() + Send + 'static) {
        self.tasks.lock().unwrap().push(Box::new(task));

        if !self.is_in_loop_thread() || self.calling_pending_tasks.load(Ordering::Acquire) {
            if let Err(e) = self.waker.wake() {
                log::error!("failed to wake loop: {e}");
            }
        }
    }

    fn do_pending_tasks(&self) {
        self.calling_pending_tasks.store(true, Ordering::Release);
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            task();
        }
        self.calling_pending_tasks.store(false, Ordering::Release);
    }

    /// Requests that the loop stop after its current iteration. Safe to
    /// call from any thread.
    pub fn quit(&self) {
        self.quit.store(true, Ordering::Release);
        if !self.is_in_loop_thread() {
            if let Err(e) = self.waker.wake() {
                log::error!("failed to wake loop for quit: {e}");
            }
        }
    }

    pub(crate) fn update_channel(&self, channel: Arc<Channel>) {
        self.assert_in_loop_thread();
        self.demux.update_channel(channel);
    }

    pub(crate) fn remove_channel(&self, channel: Arc<Channel>) {
        self.assert_in_loop_thread();
        self.demux.remove_channel(channel);
    }

    pub(crate) fn has_channel(&self, channel: &Arc<Channel>) -> bool {
        self.assert_in_loop_thread();
        self.demux.has_channel(channel)
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if std::thread::current().id() == self.thread_id {
            HAS_LOOP_IN_THIS_THREAD.with(|flag| flag.set(false));
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("thread_id", &self.thread_id)
            .field("looping", &self.looping.load(Ordering::Relaxed))
            .finish()
    }
}

fn fatal(msg: &str) -> ! {
    log::error!("{msg}");
    panic!("{msg}");
}
