use std::sync::Arc;
use std::time::Instant;

use crate::buffer::Buffer;
use crate::event_loop::EventLoop;
use crate::tcp_connection::TcpConnection;

pub type ConnectionCallback = Arc<dyn Fn(&Arc<TcpConnection>) + Send + Sync>;
pub type CloseCallback = Arc<dyn Fn(&Arc<TcpConnection>) + Send + Sync>;
pub type WriteCompleteCallback = Arc<dyn Fn(&Arc<TcpConnection>) + Send + Sync>;
pub type HighWaterMarkCallback = Arc<dyn Fn(&Arc<TcpConnection>, usize) + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&Arc<TcpConnection>, &mut Buffer, Instant) + Send + Sync>;
pub type ThreadInitCallback = Arc<dyn Fn(&Arc<EventLoop>) + Send + Sync>;

pub(crate) fn default_connection_cb() -> ConnectionCallback {
    Arc::new(|conn| {
        log::debug!(
            "{} is {}",
            conn.name(),
            if conn.connected() { "UP" } else { "DOWN" }
        );
    })
}

pub(crate) fn default_message_cb() -> MessageCallback {
    Arc::new(|_conn, buf, _time| {
        buf.retrieve_all();
    })
}
