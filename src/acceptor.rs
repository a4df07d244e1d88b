use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex};

use crate::channel::Channel;
use crate::event_loop::EventLoop;
use crate::inet_addr::InetAddr;
use crate::sys::{self, Socket};

type NewConnectionCallback = Box<dyn FnMut(Socket, InetAddr) + Send>;

/// Owns the listening socket and its channel. On readiness, accepts as many
/// connections as are pending and hands each one to the server-supplied
/// callback.
pub struct Acceptor {
    loop_: Arc<EventLoop>,
    socket: Socket,
    channel: Arc<Channel>,
    listening: Mutex<bool>,
    new_connection_cb: Mutex<Option<NewConnectionCallback>>,
}

impl Acceptor {
    pub fn new(
        loop_: Arc<EventLoop>,
        listen_addr: InetAddr,
        reuse_port: bool,
    ) -> std::io::Result<Arc<Acceptor>> {
        let socket = sys::bind_listen(listen_addr, reuse_port)?;
        let fd = socket.as_raw_fd();
        let channel = Channel::new(Arc::downgrade(&loop_), fd);

        let acceptor = Arc::new(Acceptor {
            loop_,
            socket,
            channel,
            listening: Mutex::new(false),
            new_connection_cb: Mutex::new(None),
        });

        let weak = Arc::downgrade(&acceptor);
        acceptor.channel.set_read_callback(move |_time| {
            if let Some(acceptor) = weak.upgrade() {
                acceptor.handle_read();
            }
        });
        acceptor
            .channel
            .tie(Arc::downgrade(&acceptor) as std::sync::Weak<dyn std::any::Any + Send + Sync>);

        Ok(acceptor)
    }

    pub fn set_new_connection_callback(
        &self,
        cb: impl FnMut(Socket, InetAddr) + Send + 'static,
    ) {
        *self.new_connection_cb.lock().unwrap() = Some(Box::new(cb));
    }

    pub fn is_listening(&self) -> bool {
        *self.listening.lock().unwrap()
    }

    /// Resolves the endpoint actually bound, which may differ from the
    /// requested one when constructed with port `0`.
    pub fn local_addr(&self) -> std::io::Result<InetAddr> {
        InetAddr::local_of(self.socket.as_raw_fd())
    }

    pub fn listen(self: &Arc<Self>) {
        self.loop_.assert_in_loop_thread();
        *self.listening.lock().unwrap() = true;
        if let Err(e) = self.socket.listen(1024) {
            log::error!("listen(2) failed: {e}");
            panic!("listen(2) failed: {e}");
        }
        self.channel.enable_reading();
    }

    fn handle_read(&self) {
        match sys::accept(self.socket.as_raw_fd()) {
            Ok((conn_socket, peer)) => {
                let mut cb = self.new_connection_cb.lock().unwrap();
                match cb.as_mut() {
                    Some(cb) => cb(conn_socket, peer),
                    None => log::debug!("no new-connection callback installed, dropping fd"),
                }
            }
            Err(e) => {
                log::error!("accept4 failed: {e}");
                if e.raw_os_error() == Some(libc::EMFILE) {
                    log::error!("process is out of file descriptors");
                }
            }
        }
    }
}
