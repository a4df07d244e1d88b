#![allow(dead_code)]

use std::net::TcpListener as StdTcpListener;
use std::sync::{mpsc, Arc, Once};
use std::thread::JoinHandle;

use reactorio::EventLoop;

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

/// Picks a free localhost port by binding a throwaway std listener and
/// immediately dropping it. Racy in theory, fine for single-process tests.
pub fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("failed to bind throwaway socket");
    listener.local_addr().unwrap().port()
}

/// Spawns a dedicated OS thread, constructs an `EventLoop` on it, runs
/// `setup` against the loop before `run()` starts (so acceptor registration
/// happens synchronously), then blocks the thread in `run()`. Mirrors
/// `EventLoopThread`'s condvar-publish pattern but hands the loop back
/// through a channel instead.
pub fn spawn_loop(
    setup: impl FnOnce(&Arc<EventLoop>) + Send + 'static,
) -> (Arc<EventLoop>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let handle = std::thread::spawn(move || {
        let event_loop = EventLoop::new().expect("failed to create EventLoop");
        setup(&event_loop);
        tx.send(event_loop.clone()).expect("test thread gone");
        event_loop.run();
    });
    let event_loop = rx.recv().expect("loop thread failed to start");
    (event_loop, handle)
}
