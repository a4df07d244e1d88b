//! Public IPv4 endpoint type, re-exported from the platform socket layer so
//! the latter can change without moving the type.

pub use crate::sys::InetAddr;
