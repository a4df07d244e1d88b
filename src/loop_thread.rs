use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::event_loop::EventLoop;

static THREADS_CREATED: AtomicUsize = AtomicUsize::new(0);

/// Process-wide count of loop threads spawned so far. Diagnostic only; no
/// code path depends on its value.
pub fn threads_created() -> usize {
    THREADS_CREATED.load(Ordering::Relaxed)
}

/// Owns one OS thread running exactly one [`EventLoop`]. `start_loop`
/// blocks the caller until the spawned thread has published its loop
/// handle, mirroring the condition-variable handoff the loop thread
/// itself uses.
pub struct LoopThread {
    name: String,
    init_cb: Option<Arc<dyn Fn(&Arc<EventLoop>) + Send + Sync>>,
    shared: Arc<(Mutex<Option<Arc<EventLoop>>>, Condvar)>,
    join_handle: Option<JoinHandle<()>>,
}

impl LoopThread {
    pub fn new(name: impl Into<String>) -> LoopThread {
        LoopThread {
            name: name.into(),
            init_cb: None,
            shared: Arc::new((Mutex::new(None), Condvar::new())),
            join_handle: None,
        }
    }

    pub fn with_init_callback(
        name: impl Into<String>,
        init_cb: impl Fn(&Arc<EventLoop>) + Send + Sync + 'static,
    ) -> LoopThread {
        LoopThread {
            name: name.into(),
            init_cb: Some(Arc::new(init_cb)),
            shared: Arc::new((Mutex::new(None), Condvar::new())),
            join_handle: None,
        }
    }

    /// Spawns the thread, waits for it to publish its loop, and returns a
    /// handle to it.
    pub fn start_loop(&mut self) -> Arc<EventLoop> {
        let shared = self.shared.clone();
        let init_cb = self.init_cb.clone();
        let thread_name = self.name.clone();

        THREADS_CREATED.fetch_add(1, Ordering::Relaxed);
        let join_handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let event_loop = EventLoop::new().unwrap_or_else(|e| {
                    log::error!("failed to create EventLoop on thread {thread_name}: {e}");
                    panic!("failed to create EventLoop on thread {thread_name}: {e}");
                });

                if let Some(cb) = &init_cb {
                    cb(&event_loop);
                }

                {
                    let (lock, cvar) = &*shared;
                    let mut slot = lock.lock().unwrap();
                    *slot = Some(event_loop.clone());
                    cvar.notify_one();
                }

                event_loop.run();
            })
            .expect("failed to spawn loop thread");

        self.join_handle = Some(join_handle);

        let (lock, cvar) = &*self.shared;
        let mut slot = lock.lock().unwrap();
        while slot.is_none() {
            slot = cvar.wait(slot).unwrap();
        }
        slot.clone().expect("loop thread published no EventLoop")
    }

    pub fn loop_handle(&self) -> Option<Arc<EventLoop>> {
        self.shared.0.lock().unwrap().clone()
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        if let Some(event_loop) = self.loop_handle() {
            event_loop.quit();
        }
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}
