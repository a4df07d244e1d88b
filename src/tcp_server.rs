use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::acceptor::Acceptor;
use crate::callbacks::{
    self, CloseCallback, ConnectionCallback, HighWaterMarkCallback, MessageCallback,
    ThreadInitCallback, WriteCompleteCallback,
};
use crate::event_loop::EventLoop;
use crate::inet_addr::InetAddr;
use crate::loop_thread_pool::LoopThreadPool;
use crate::sys::Socket;
use crate::tcp_connection::TcpConnection;

/// Controls whether the listening socket sets `SO_REUSEPORT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Option {
    ReusePort,
    NoReusePort,
}

/// Public façade: binds a listening endpoint on the main loop, round-robins
/// accepted connections across a worker [`LoopThreadPool`], and tracks
/// every live connection by name.
pub struct TcpServer {
    loop_: Arc<EventLoop>,
    name: String,
    ip_port: String,
    acceptor: Arc<Acceptor>,
    thread_pool: Mutex<LoopThreadPool>,
    connection_cb: Mutex<ConnectionCallback>,
    message_cb: Mutex<MessageCallback>,
    write_complete_cb: Mutex<std::option::Option<WriteCompleteCallback>>,
    thread_init_cb: Mutex<std::option::Option<ThreadInitCallback>>,
    connections: Mutex<HashMap<String, Arc<TcpConnection>>>,
    next_conn_id: AtomicUsize,
    started: AtomicBool,
}

impl TcpServer {
    pub fn new(
        loop_: Arc<EventLoop>,
        listen_addr: InetAddr,
        name: impl Into<String>,
        option: Option,
    ) -> std::io::Result<Arc<TcpServer>> {
        let name = name.into();
        let ip_port = listen_addr.ip_port();
        let reuse_port = matches!(option, Option::ReusePort);
        let acceptor = Acceptor::new(loop_.clone(), listen_addr, reuse_port)?;
        let thread_pool = LoopThreadPool::new(loop_.clone(), format!("{name}-"));

        let server = Arc::new(TcpServer {
            loop_,
            name,
            ip_port,
            acceptor,
            thread_pool: Mutex::new(thread_pool),
            connection_cb: Mutex::new(callbacks::default_connection_cb()),
            message_cb: Mutex::new(callbacks::default_message_cb()),
            write_complete_cb: Mutex::new(None),
            thread_init_cb: Mutex::new(None),
            connections: Mutex::new(HashMap::new()),
            next_conn_id: AtomicUsize::new(1),
            started: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&server);
        server
            .acceptor
            .set_new_connection_callback(move |socket, peer| {
                if let Some(server) = weak.upgrade() {
                    server.new_connection(socket, peer);
                }
            });

        Ok(server)
    }

    pub fn set_thread_num(&self, num_threads: usize) {
        self.thread_pool.lock().unwrap().set_thread_num(num_threads);
    }

    pub fn set_connection_callback(&self, cb: ConnectionCallback) {
        *self.connection_cb.lock().unwrap() = cb;
    }

    pub fn set_message_callback(&self, cb: MessageCallback) {
        *self.message_cb.lock().unwrap() = cb;
    }

    pub fn set_write_complete_callback(&self, cb: WriteCompleteCallback) {
        *self.write_complete_cb.lock().unwrap() = Some(cb);
    }

    pub fn set_thread_init_callback(&self, cb: ThreadInitCallback) {
        *self.thread_init_cb.lock().unwrap() = Some(cb);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_loop(&self) -> Arc<EventLoop> {
        self.loop_.clone()
    }

    /// Resolves the endpoint actually bound, which may differ from the
    /// requested one when constructed with port `0`.
    pub fn local_addr(&self) -> std::io::Result<InetAddr> {
        self.acceptor.local_addr()
    }

    /// Idempotent: only the first call starts the worker pool and the
    /// acceptor's `listen`.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let init_cb = self.thread_init_cb.lock().unwrap().clone();
        self.thread_pool.lock().unwrap().start(init_cb);

        let acceptor = self.acceptor.clone();
        self.loop_.run_in_loop(move || acceptor.listen());
    }

    fn new_connection(self: &Arc<Self>, socket: Socket, peer: InetAddr) {
        self.loop_.assert_in_loop_thread();

        let worker_loop = self.thread_pool.lock().unwrap().get_next_loop();
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let conn_name = format!("{}-{}#{}", self.name, self.ip_port, conn_id);

        let local_addr = InetAddr::local_of(std::os::unix::io::AsRawFd::as_raw_fd(&socket))
            .unwrap_or_else(|_| InetAddr::any(0));

        log::info!(
            "TcpServer::new_connection [{}] - new connection [{}] from {}",
            self.name,
            conn_name,
            peer
        );

        let conn = TcpConnection::new(worker_loop.clone(), conn_name.clone(), socket, local_addr, peer);
        conn.set_connection_callback(self.connection_cb.lock().unwrap().clone());
        conn.set_message_callback(self.message_cb.lock().unwrap().clone());
        if let Some(cb) = self.write_complete_cb.lock().unwrap().clone() {
            conn.set_write_complete_callback(cb);
        }

        let server = self.clone();
        let cb_conn = conn.clone();
        conn.set_close_callback(Arc::new(move |_| server.remove_connection(cb_conn.clone())));

        self.connections
            .lock()
            .unwrap()
            .insert(conn_name, conn.clone());

        worker_loop.run_in_loop(move || conn.connect_established());
    }

    fn remove_connection(self: &Arc<Self>, conn: Arc<TcpConnection>) {
        let server = self.clone();
        self.loop_
            .run_in_loop(move || server.remove_connection_in_loop(conn));
    }

    fn remove_connection_in_loop(self: &Arc<Self>, conn: Arc<TcpConnection>) {
        self.loop_.assert_in_loop_thread();
        log::info!(
            "TcpServer::remove_connection_in_loop [{}] - connection {}",
            self.name,
            conn.name()
        );
        self.connections.lock().unwrap().remove(conn.name());
        let worker_loop = conn.get_loop();
        worker_loop.queue_in_loop(move || conn.connect_destroyed());
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        log::trace!("TcpServer::drop [{}]", self.name);
        let conns: Vec<_> = self.connections.lock().unwrap().drain().collect();
        for (_, conn) in conns {
            let worker_loop = conn.get_loop();
            worker_loop.queue_in_loop(move || conn.connect_destroyed());
        }
    }
}
