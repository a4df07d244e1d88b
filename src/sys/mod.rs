//! Platform glue. Linux `epoll` is the only demultiplexer this crate
//! targets; IPv6, TLS and other platforms are out of scope.

mod unix;

pub use self::unix::{
    accept, bind_listen, event, set_keepalive, set_nodelay, Event, Events, InetAddr, Interest,
    Selector, Socket, Waker,
};
