mod epoll;
mod net;
mod socket;
mod waker;

pub use self::epoll::{event, Event, Events, Interest, Selector};
pub use self::net::InetAddr;
pub use self::socket::{accept, bind_listen, set_keepalive, set_nodelay, Socket};
pub use self::waker::Waker;
