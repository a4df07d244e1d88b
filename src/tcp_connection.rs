use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use crate::buffer::Buffer;
use crate::callbacks::{
    CloseCallback, ConnectionCallback, HighWaterMarkCallback, MessageCallback,
    WriteCompleteCallback,
};
use crate::channel::Channel;
use crate::event_loop::EventLoop;
use crate::inet_addr::InetAddr;
use crate::sys::Socket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Connected = 1,
    Disconnecting = 2,
    Disconnected = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> ConnectionState {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// A single accepted TCP connection: its buffers, its channel, and the
/// state machine governing the order callbacks fire in.
///
/// Held by `Arc` so it can live in the server's connection map and in
/// cross-thread task closures simultaneously; the `Mutex`-wrapped fields
/// are loop-affine in practice (see the crate's design notes) and are
/// locked only from the owning worker loop except for brief cross-thread
/// callback installs during setup.
pub struct TcpConnection {
    loop_: Arc<EventLoop>,
    name: String,
    state: AtomicU8,
    socket: Socket,
    channel: Arc<Channel>,
    local_addr: InetAddr,
    peer_addr: InetAddr,
    input_buffer: Mutex<Buffer>,
    output_buffer: Mutex<Buffer>,
    connection_cb: Mutex<Option<ConnectionCallback>>,
    message_cb: Mutex<Option<MessageCallback>>,
    write_complete_cb: Mutex<Option<WriteCompleteCallback>>,
    high_water_mark: Mutex<Option<(HighWaterMarkCallback, usize)>>,
    close_cb: Mutex<Option<CloseCallback>>,
}

impl TcpConnection {
    pub fn new(
        loop_: Arc<EventLoop>,
        name: impl Into<String>,
        socket: Socket,
        local_addr: InetAddr,
        peer_addr: InetAddr,
    ) -> Arc<TcpConnection> {
        let fd = socket.as_raw_fd();
        let channel = Channel::new(Arc::downgrade(&loop_), fd);
        let _ = socket.set_nodelay(true);

        let conn = Arc::new(TcpConnection {
            loop_,
            name: name.into(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            socket,
            channel,
            local_addr,
            peer_addr,
            input_buffer: Mutex::new(Buffer::new()),
            output_buffer: Mutex::new(Buffer::new()),
            connection_cb: Mutex::new(None),
            message_cb: Mutex::new(None),
            write_complete_cb: Mutex::new(None),
            high_water_mark: Mutex::new(None),
            close_cb: Mutex::new(None),
        });

        let weak = Arc::downgrade(&conn);
        conn.channel.set_read_callback(move |time| {
            if let Some(conn) = weak.upgrade() {
                conn.handle_read(time);
            }
        });
        let weak = Arc::downgrade(&conn);
        conn.channel.set_write_callback(move || {
            if let Some(conn) = weak.upgrade() {
                conn.handle_write();
            }
        });
        let weak = Arc::downgrade(&conn);
        conn.channel.set_close_callback(move || {
            if let Some(conn) = weak.upgrade() {
                conn.handle_close();
            }
        });

        conn
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_loop(&self) -> Arc<EventLoop> {
        self.loop_.clone()
    }

    pub fn local_addr(&self) -> InetAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> InetAddr {
        self.peer_addr
    }

    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn set_connection_callback(&self, cb: ConnectionCallback) {
        *self.connection_cb.lock().unwrap() = Some(cb);
    }

    pub fn set_message_callback(&self, cb: MessageCallback) {
        *self.message_cb.lock().unwrap() = Some(cb);
    }

    pub fn set_write_complete_callback(&self, cb: WriteCompleteCallback) {
        *self.write_complete_cb.lock().unwrap() = Some(cb);
    }

    pub fn set_close_callback(&self, cb: CloseCallback) {
        *self.close_cb.lock().unwrap() = Some(cb);
    }

    pub fn set_high_water_mark_callback(&self, cb: HighWaterMarkCallback, threshold: usize) {
        *self.high_water_mark.lock().unwrap() = Some((cb, threshold));
    }

    /// Queues `data` for sending. Safe to call from any thread; off-loop
    /// callers have their bytes copied into the enqueued task.
    pub fn send(self: &Arc<Self>, data: &[u8]) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        if self.loop_.is_in_loop_thread() {
            self.send_in_loop(data);
        } else {
            let conn = self.clone();
            let owned = data.to_vec();
            self.loop_.queue_in_loop(move || conn.send_in_loop(&owned));
        }
    }

    fn send_in_loop(self: &Arc<Self>, data: &[u8]) {
        if self.state() == ConnectionState::Disconnected {
            log::warn!("giving up writing on disconnected connection {}", self.name);
            return;
        }

        let mut wrote = 0usize;
        let mut fatal_error = false;

        let nothing_buffered =
            !self.channel.is_writing() && self.output_buffer.lock().unwrap().readable_bytes() == 0;
        if nothing_buffered {
            let fd = self.socket.as_raw_fd();
            match syscall!(write(fd, data.as_ptr() as *const libc::c_void, data.len())) {
                Ok(n) => {
                    wrote = n as usize;
                    if wrote == data.len() {
                        if let Some(cb) = self.write_complete_cb.lock().unwrap().clone() {
                            let conn = self.clone();
                            self.loop_.queue_in_loop(move || cb(&conn));
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e)
                    if matches!(e.raw_os_error(), Some(libc::EPIPE) | Some(libc::ECONNRESET)) =>
                {
                    log::error!("TcpConnection::send_in_loop [{}] - {e}", self.name);
                    fatal_error = true;
                }
                Err(e) => log::error!("TcpConnection::send_in_loop [{}] failed: {e}", self.name),
            }
        }

        if fatal_error || wrote >= data.len() {
            return;
        }

        let remaining = &data[wrote..];
        let old_len = self.output_buffer.lock().unwrap().readable_bytes();
        if let Some((cb, threshold)) = self.high_water_mark.lock().unwrap().clone() {
            if old_len < threshold && old_len + remaining.len() >= threshold {
                let conn = self.clone();
                let pending = old_len + remaining.len();
                self.loop_.queue_in_loop(move || cb(&conn, pending));
            }
        }
        self.output_buffer.lock().unwrap().append(remaining);
        if !self.channel.is_writing() {
            self.channel.enable_writing();
        }
    }

    pub fn send_file(self: &Arc<Self>, file_fd: RawFd, offset: i64, count: usize) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        if self.loop_.is_in_loop_thread() {
            self.send_file_in_loop(file_fd, offset, count);
        } else {
            let conn = self.clone();
            self.loop_
                .queue_in_loop(move || conn.send_file_in_loop(file_fd, offset, count));
        }
    }

    fn send_file_in_loop(self: &Arc<Self>, file_fd: RawFd, offset: i64, count: usize) {
        if self.state() == ConnectionState::Disconnected {
            log::warn!("giving up sendfile on disconnected connection {}", self.name);
            return;
        }

        let mut remaining = count;
        let mut next_offset = offset;
        let mut fatal_error = false;

        let nothing_buffered =
            !self.channel.is_writing() && self.output_buffer.lock().unwrap().readable_bytes() == 0;
        if nothing_buffered {
            let fd = self.socket.as_raw_fd();
            let mut off: libc::off_t = offset as libc::off_t;
            match syscall!(sendfile(fd, file_fd, &mut off, count)) {
                Ok(n) => {
                    let n = n as usize;
                    remaining = count - n;
                    next_offset = off as i64;
                    if remaining == 0 {
                        if let Some(cb) = self.write_complete_cb.lock().unwrap().clone() {
                            let conn = self.clone();
                            self.loop_.queue_in_loop(move || cb(&conn));
                        }
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e)
                    if matches!(e.raw_os_error(), Some(libc::EPIPE) | Some(libc::ECONNRESET)) =>
                {
                    log::error!("TcpConnection::send_file_in_loop [{}] - {e}", self.name);
                    fatal_error = true;
                }
                Err(e) => {
                    log::error!("TcpConnection::send_file_in_loop [{}] failed: {e}", self.name)
                }
            }
        }

        if !fatal_error && remaining > 0 {
            // Preserves the unconditional re-enqueue rather than waiting
            // for write-interest readiness; see the crate's design notes.
            let conn = self.clone();
            self.loop_
                .queue_in_loop(move || conn.send_file_in_loop(file_fd, next_offset, remaining));
        }
    }

    pub fn shutdown(self: &Arc<Self>) {
        if self.state() == ConnectionState::Connected {
            self.set_state(ConnectionState::Disconnecting);
            let conn = self.clone();
            self.loop_.run_in_loop(move || conn.shutdown_in_loop());
        }
    }

    fn shutdown_in_loop(self: &Arc<Self>) {
        if !self.channel.is_writing() {
            if let Err(e) = self.socket.shutdown_write() {
                log::error!("TcpConnection::shutdown_in_loop [{}] - {e}", self.name);
            }
        }
    }

    pub(crate) fn handle_read(self: &Arc<Self>, receive_time: Instant) {
        let fd = self.socket.as_raw_fd();
        let result = self.input_buffer.lock().unwrap().read_from_fd(fd);
        match result {
            Ok(0) => self.handle_close(),
            Ok(_) => {
                if let Some(cb) = self.message_cb.lock().unwrap().clone() {
                    let mut buf = self.input_buffer.lock().unwrap();
                    cb(self, &mut buf, receive_time);
                }
            }
            Err(e) => {
                log::error!("TcpConnection::handle_read [{}] - {e}", self.name);
                self.handle_error();
            }
        }
    }

    pub(crate) fn handle_write(self: &Arc<Self>) {
        if !self.channel.is_writing() {
            log::trace!("connection {} fd is down, no more writing", self.name);
            return;
        }
        let fd = self.socket.as_raw_fd();
        let result = self.output_buffer.lock().unwrap().write_to_fd(fd);
        match result {
            Ok(n) => {
                self.output_buffer.lock().unwrap().retrieve(n);
                if self.output_buffer.lock().unwrap().readable_bytes() == 0 {
                    self.channel.disable_writing();
                    if let Some(cb) = self.write_complete_cb.lock().unwrap().clone() {
                        let conn = self.clone();
                        self.loop_.queue_in_loop(move || cb(&conn));
                    }
                    if self.state() == ConnectionState::Disconnecting {
                        self.shutdown_in_loop();
                    }
                }
            }
            Err(e) => log::error!("TcpConnection::handle_write [{}] failed: {e}", self.name),
        }
    }

    pub(crate) fn handle_close(self: &Arc<Self>) {
        debug_assert!(matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Disconnecting
        ));
        self.set_state(ConnectionState::Disconnected);
        self.channel.disable_all();

        if let Some(cb) = self.connection_cb.lock().unwrap().clone() {
            cb(self);
        }
        // Must be last: the close callback removes this connection from
        // the server's map, which may drop the last strong reference.
        if let Some(cb) = self.close_cb.lock().unwrap().clone() {
            cb(self);
        }
    }

    fn handle_error(&self) {
        let err = self.socket.take_error();
        log::error!(
            "TcpConnection::handle_error [{}] - SO_ERROR = {:?}",
            self.name,
            err
        );
    }

    pub(crate) fn connect_established(self: &Arc<Self>) {
        debug_assert_eq!(self.state(), ConnectionState::Connecting);
        self.set_state(ConnectionState::Connected);
        self.channel
            .tie(Arc::downgrade(self) as Weak<dyn std::any::Any + Send + Sync>);
        self.channel.enable_reading();

        if let Some(cb) = self.connection_cb.lock().unwrap().clone() {
            cb(self);
        }
    }

    pub(crate) fn connect_destroyed(self: &Arc<Self>) {
        if self.state() == ConnectionState::Connected {
            self.set_state(ConnectionState::Disconnected);
            self.channel.disable_all();
            if let Some(cb) = self.connection_cb.lock().unwrap().clone() {
                cb(self);
            }
        }
        self.channel.remove();
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
