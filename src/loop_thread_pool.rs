use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::event_loop::EventLoop;
use crate::loop_thread::LoopThread;

/// Owns a fixed set of worker [`LoopThread`]s and round-robins new
/// connections across them. With zero configured threads, every operation
/// falls back to the base (main) loop — single-threaded mode.
pub struct LoopThreadPool {
    base_loop: Arc<EventLoop>,
    name: String,
    num_threads: usize,
    threads: Vec<LoopThread>,
    loops: Vec<Arc<EventLoop>>,
    next: AtomicUsize,
    started: bool,
}

impl LoopThreadPool {
    pub fn new(base_loop: Arc<EventLoop>, name: impl Into<String>) -> LoopThreadPool {
        LoopThreadPool {
            base_loop,
            name: name.into(),
            num_threads: 0,
            threads: Vec::new(),
            loops: Vec::new(),
            next: AtomicUsize::new(0),
            started: false,
        }
    }

    pub fn set_thread_num(&mut self, num_threads: usize) {
        self.num_threads = num_threads;
    }

    /// Starts the worker threads (if any). `init_cb` runs once per worker
    /// loop immediately after it's constructed, on that worker's own
    /// thread; in single-threaded mode it runs once against the base loop.
    pub fn start(&mut self, init_cb: Option<Arc<dyn Fn(&Arc<EventLoop>) + Send + Sync>>) {
        assert!(!self.started, "LoopThreadPool::start called more than once");
        self.started = true;

        if self.num_threads == 0 {
            if let Some(cb) = init_cb {
                cb(&self.base_loop);
            }
            return;
        }

        for i in 0..self.num_threads {
            let thread_name = format!("{}{}", self.name, i);
            let cb = init_cb.clone();
            let mut thread = match cb {
                Some(cb) => LoopThread::with_init_callback(thread_name, move |el| cb(el)),
                None => LoopThread::new(thread_name),
            };
            let event_loop = thread.start_loop();
            self.threads.push(thread);
            self.loops.push(event_loop);
        }
    }

    /// Returns the next worker loop in round-robin order, or the base loop
    /// when running single-threaded.
    pub fn get_next_loop(&self) -> Arc<EventLoop> {
        if self.loops.is_empty() {
            return self.base_loop.clone();
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        self.loops[index].clone()
    }

    pub fn get_all_loops(&self) -> Vec<Arc<EventLoop>> {
        if self.loops.is_empty() {
            vec![self.base_loop.clone()]
        } else {
            self.loops.clone()
        }
    }
}
