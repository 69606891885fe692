use std::io;
use std::os::unix::io::RawFd;

const INIT_BUFFER_SIZE: usize = 1024;
const SCRATCH_SIZE: usize = 65535;

/// Byte buffer with separate read/write cursors over contiguous storage.
///
/// The readable region is `[read_pos, write_pos)`, the writable region
/// `[write_pos, capacity)`. Appending first compacts the readable region to
/// offset zero and only grows the storage when compaction is not enough.
/// Not thread-safe; every buffer is owned by exactly one connection.
#[derive(Debug)]
pub struct Buffer {
    storage: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self::with_capacity(INIT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Buffer {
            storage: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    pub fn readable(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn writable(&self) -> usize {
        self.storage.len() - self.write_pos
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    /// The readable region, starting at the first unconsumed byte.
    pub fn peek(&self) -> &[u8] {
        &self.storage[self.read_pos..self.write_pos]
    }

    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        self.storage[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
    }

    /// Marks `n` readable bytes as consumed. Once the cursors meet, both
    /// reset to zero so the storage is reused from the front.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.readable());
        self.read_pos += n;
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    /// Consumes up to an absolute position within the readable region.
    pub fn consume_until(&mut self, pos: usize) {
        debug_assert!(pos >= self.read_pos && pos <= self.write_pos);
        self.consume(pos - self.read_pos);
    }

    /// Resets both cursors, discarding any readable bytes.
    pub fn retrieve_all(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Returns the readable bytes as an owned string and resets the cursors.
    pub fn retrieve_all_as_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.peek()).into_owned();
        self.retrieve_all();
        s
    }

    /// Reads from `fd` with a two-segment vectored read into
    /// `[writable region][stack scratch]`, so a single call can pull in more
    /// than the current writable space. Bytes that landed in the scratch are
    /// appended afterwards, which triggers the compact-then-grow policy.
    pub fn read_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut scratch = [0u8; SCRATCH_SIZE];
        let writable = self.writable();
        let iov = [
            libc::iovec {
                iov_base: unsafe { self.storage.as_mut_ptr().add(self.write_pos) }
                    as *mut libc::c_void,
                iov_len: writable,
            },
            libc::iovec {
                iov_base: scratch.as_mut_ptr() as *mut libc::c_void,
                iov_len: scratch.len(),
            },
        ];
        let n = unsafe { libc::readv(fd, iov.as_ptr(), 2) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = n as usize;
        if n <= writable {
            self.write_pos += n;
        } else {
            self.write_pos = self.storage.len();
            self.append(&scratch[..n - writable]);
        }
        Ok(n)
    }

    fn ensure_writable(&mut self, len: usize) {
        if self.writable() >= len {
            return;
        }
        if self.read_pos > 0 {
            let readable = self.readable();
            self.storage.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
        if self.writable() < len {
            self.storage.resize(self.write_pos + len + 1, 0);
        }
    }
}
