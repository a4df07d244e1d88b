//! A multi-threaded, non-blocking TCP server library built around a
//! reactor: a per-thread [`EventLoop`] demultiplexes readiness on Linux
//! `epoll` (level-triggered) and dispatches to [`Channel`] callbacks.
//!
//! A [`TcpServer`] accepts connections on a single [`Acceptor`] loop and
//! round-robins each new [`TcpConnection`] across a [`LoopThreadPool`] of
//! worker loops. IPv6, TLS, client-side connect and timers are out of
//! scope; see the crate's design notes for the full list.

/// Executes a raw `libc` system call, turning a `-1` return into the
/// calling thread's last OS error.
//
// Macro must be defined before any modules that use it.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

mod sys;

pub mod acceptor;
pub mod buffer;
pub mod callbacks;
pub mod channel;
pub mod demultiplexer;
pub mod event_loop;
pub mod inet_addr;
pub mod loop_thread;
pub mod loop_thread_pool;
pub mod tcp_connection;
pub mod tcp_server;

pub use acceptor::Acceptor;
pub use buffer::Buffer;
pub use callbacks::{
    CloseCallback, ConnectionCallback, HighWaterMarkCallback, MessageCallback, ThreadInitCallback,
    WriteCompleteCallback,
};
pub use channel::Channel;
pub use demultiplexer::Demultiplexer;
pub use event_loop::EventLoop;
pub use inet_addr::InetAddr;
pub use loop_thread::{threads_created, LoopThread};
pub use loop_thread_pool::LoopThreadPool;
pub use tcp_connection::{ConnectionState, TcpConnection};
pub use tcp_server::{Option as ServerOption, TcpServer};
