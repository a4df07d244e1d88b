use std::io;
use std::os::unix::io::RawFd;

/// Initial capacity of a fresh `Buffer`.
const INITIAL_SIZE: usize = 1024;
/// Bytes reserved at the front for cheap header prepends.
const PREPEND_SIZE: usize = 8;
/// Size of the stack-allocated overflow buffer used by `read_from_fd`. Bounds
/// the amount of heap growth a single level-triggered readiness event can
/// force onto the primary buffer.
const OVERFLOW_SIZE: usize = 65536;

/// A growable byte buffer split into a prepend region, a readable region and
/// a writable region by two indices.
///
/// ```text
/// | prependable bytes | readable bytes | writable bytes |
/// 0      <=      reader    <=    writer     <=      capacity
/// ```
#[derive(Debug, Clone)]
pub struct Buffer {
    buf: Vec<u8>,
    reader: usize,
    writer: usize,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::with_capacity(INITIAL_SIZE)
    }

    pub fn with_capacity(initial_size: usize) -> Buffer {
        Buffer {
            buf: vec![0u8; PREPEND_SIZE + initial_size],
            reader: PREPEND_SIZE,
            writer: PREPEND_SIZE,
        }
    }

    pub fn readable_bytes(&self) -> usize {
        self.writer - self.reader
    }

    pub fn writable_bytes(&self) -> usize {
        self.buf.len() - self.writer
    }

    pub fn prependable_bytes(&self) -> usize {
        self.reader
    }

    pub fn peek(&self) -> &[u8] {
        &self.buf[self.reader..self.writer]
    }

    /// Advances the reader index by `len` bytes (clamped to what's
    /// readable). Resets both indices to the prepend boundary once drained.
    pub fn retrieve(&mut self, len: usize) {
        let len = len.min(self.readable_bytes());
        if len < self.readable_bytes() {
            self.reader += len;
        } else {
            self.retrieve_all();
        }
    }

    pub fn retrieve_all(&mut self) {
        self.reader = PREPEND_SIZE;
        self.writer = PREPEND_SIZE;
    }

    pub fn retrieve_all_as_vec(&mut self) -> Vec<u8> {
        let result = self.peek().to_vec();
        self.retrieve_all();
        result
    }

    pub fn retrieve_all_as_string(&mut self) -> String {
        String::from_utf8_lossy(&self.retrieve_all_as_vec()).into_owned()
    }

    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        self.buf[self.writer..self.writer + data.len()].copy_from_slice(data);
        self.writer += data.len();
    }

    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len + PREPEND_SIZE {
            self.buf.resize(self.writer + len, 0);
        } else {
            // Slide the readable region down to the prepend boundary
            // instead of growing, recovering space already read past.
            let readable = self.readable_bytes();
            self.buf.copy_within(self.reader..self.writer, PREPEND_SIZE);
            self.reader = PREPEND_SIZE;
            self.writer = self.reader + readable;
        }
    }

    /// Drains a readable fd with a scatter read: the buffer's own writable
    /// region plus a stack-resident overflow buffer, so a single
    /// level-triggered wakeup can be fully drained without unbounded growth
    /// of the primary buffer on one oversized read.
    pub fn read_from_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut overflow = [0u8; OVERFLOW_SIZE];
        let writable = self.writable_bytes();

        let mut iov = [
            libc::iovec {
                iov_base: self.buf[self.writer..].as_mut_ptr() as *mut libc::c_void,
                iov_len: writable,
            },
            libc::iovec {
                iov_base: overflow.as_mut_ptr() as *mut libc::c_void,
                iov_len: overflow.len(),
            },
        ];
        let iov_count = if writable < OVERFLOW_SIZE { 2 } else { 1 };

        let n = syscall!(readv(fd, iov.as_mut_ptr(), iov_count as i32))?;
        let n = n as usize;

        if n <= writable {
            self.writer += n;
        } else {
            self.writer = self.buf.len();
            let spill = n - writable;
            self.append(&overflow[..spill]);
        }
        Ok(n)
    }

    /// Writes the full readable region in one `write(2)` call; the caller
    /// is responsible for `retrieve`-ing the bytes actually written.
    pub fn write_to_fd(&self, fd: RawFd) -> io::Result<usize> {
        let data = self.peek();
        let n = syscall!(write(
            fd,
            data.as_ptr() as *const libc::c_void,
            data.len(),
        ))?;
        Ok(n as usize)
    }
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_retrieve_all_round_trips() {
        let mut buf = Buffer::new();
        buf.append(b"hello");
        assert_eq!(buf.retrieve_all_as_string(), "hello");
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn retrieve_resets_indices_when_fully_drained() {
        let mut buf = Buffer::new();
        buf.append(b"abc");
        buf.retrieve(3);
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.prependable_bytes(), PREPEND_SIZE);
    }

    #[test]
    fn partial_retrieve_keeps_remaining_bytes() {
        let mut buf = Buffer::new();
        buf.append(b"abcdef");
        buf.retrieve(2);
        assert_eq!(buf.peek(), b"cdef");
    }

    #[test]
    fn make_space_compacts_before_growing() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(b"0123456789012345");
        buf.retrieve(15);
        let cap_before = buf.buf.len();
        buf.append(b"x");
        // One readable byte left; plenty of prependable + writable space to
        // compact into rather than reallocate.
        assert_eq!(buf.buf.len(), cap_before);
        assert_eq!(buf.peek(), b"5x");
    }

    #[test]
    fn make_space_grows_when_compacting_is_not_enough() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(&[0u8; 20]);
        assert!(buf.buf.len() >= PREPEND_SIZE + 20);
    }
}
