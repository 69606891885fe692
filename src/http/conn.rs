use std::sync::atomic::{AtomicUsize, Ordering};

use crate::buffer::Buffer;
use crate::http::{HttpRequest, HttpResponse};
use crate::pool::SqlConnPool;
use crate::prelude::{debug, io, RawFd, SocketAddr, HTTP_BAD_REQUEST, HTTP_OK};

/// Write loop keeps going past a successful writev while this many bytes
/// are still pending, even in level-triggered mode.
const WRITE_CONTINUE_THRESHOLD: usize = 10240;

/// Process-wide state handed to every connection at init time: the trigger
/// mode, the resource root, the live-connection counter and the database
/// pool (absent only in tests without a database).
pub struct ConnContext {
    pub is_et: bool,
    pub src_dir: String,
    pub user_count: AtomicUsize,
    pub db: Option<SqlConnPool>,
}

impl ConnContext {
    pub fn user_count(&self) -> usize {
        self.user_count.load(Ordering::Relaxed)
    }
}

/// Per-connection state: the socket, both buffers, the request/response
/// pair and the two-entry I/O vector covering pending header bytes and the
/// mapped file body.
pub struct HttpConn {
    fd: RawFd,
    addr: Option<SocketAddr>,
    closed: bool,
    iov: [libc::iovec; 2],
    iov_cnt: usize,
    read_buf: Buffer,
    write_buf: Buffer,
    request: HttpRequest,
    response: HttpResponse,
}

// The iovec entries point into this connection's own write buffer and file
// mapping. The reactor's one-shot rearm guarantees a single worker touches
// the connection at a time, so moving it across worker threads is sound.
unsafe impl Send for HttpConn {}

impl Default for HttpConn {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpConn {
    pub fn new() -> Self {
        HttpConn {
            fd: -1,
            addr: None,
            closed: true,
            iov: [empty_iovec(), empty_iovec()],
            iov_cnt: 0,
            read_buf: Buffer::new(),
            write_buf: Buffer::new(),
            request: HttpRequest::new(),
            response: HttpResponse::new(),
        }
    }

    /// Takes ownership of an accepted socket and clears both buffers.
    pub fn init(&mut self, fd: RawFd, addr: SocketAddr, ctx: &ConnContext) {
        debug_assert!(fd > 0);
        ctx.user_count.fetch_add(1, Ordering::Relaxed);
        self.fd = fd;
        self.addr = Some(addr);
        self.read_buf.retrieve_all();
        self.write_buf.retrieve_all();
        self.closed = false;
    }

    /// Idempotent; drops the descriptor and the user-count slot.
    pub fn close(&mut self, ctx: &ConnContext) {
        if !self.closed {
            self.closed = true;
            ctx.user_count.fetch_sub(1, Ordering::Relaxed);
            unsafe { libc::close(self.fd) };
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_keep_alive(&self) -> bool {
        self.request.is_keep_alive()
    }

    pub fn to_write_bytes(&self) -> usize {
        self.iov[0].iov_len + self.iov[1].iov_len
    }

    /// Drains the socket into the read buffer. Level-triggered mode reads
    /// once; edge-triggered keeps going until the descriptor is dry, which
    /// surfaces as `WouldBlock`.
    pub fn read(&mut self, ctx: &ConnContext) -> io::Result<usize> {
        loop {
            let n = self.read_buf.read_fd(self.fd)?;
            if n == 0 {
                return Ok(0);
            }
            if !ctx.is_et {
                return Ok(n);
            }
        }
    }

    /// Writes the pending response with a two-segment writev over the write
    /// buffer and the mapped file, adjusting both segments after partial
    /// writes.
    pub fn write(&mut self, ctx: &ConnContext) -> io::Result<usize> {
        loop {
            let n = unsafe { libc::writev(self.fd, self.iov.as_ptr(), self.iov_cnt as libc::c_int) };
            if n <= 0 {
                // non-positive writev ends the loop; a zero write with bytes
                // still pending would otherwise spin here forever
                return Err(io::Error::last_os_error());
            }
            self.adjust_iov(n as usize);
            let pending = self.to_write_bytes();
            if pending == 0 {
                return Ok(n as usize);
            }
            if !ctx.is_et && pending <= WRITE_CONTINUE_THRESHOLD {
                return Ok(n as usize);
            }
        }
    }

    /// Parses whatever is buffered and stages the response. Returns false
    /// when there is nothing to parse yet (caller rearms for read), true
    /// once a response is staged (caller rearms for write).
    pub fn process(&mut self, ctx: &ConnContext) -> bool {
        self.request.init();
        if self.read_buf.readable() == 0 {
            return false;
        }
        match self.request.parse(&mut self.read_buf, ctx.db.as_ref()) {
            Ok(()) => {
                self.response.init(
                    &ctx.src_dir,
                    self.request.path(),
                    self.request.is_keep_alive(),
                    Some(HTTP_OK),
                );
            }
            Err(err) => {
                debug!("bad request on fd {}: {}", self.fd, err);
                self.response
                    .init(&ctx.src_dir, self.request.path(), false, Some(HTTP_BAD_REQUEST));
            }
        }
        self.response.build(&mut self.write_buf);

        self.iov[0] = libc::iovec {
            iov_base: self.write_buf.peek().as_ptr() as *mut libc::c_void,
            iov_len: self.write_buf.readable(),
        };
        self.iov[1] = empty_iovec();
        self.iov_cnt = 1;
        if let Some(file) = self.response.file() {
            if !file.is_empty() {
                self.iov[1] = libc::iovec {
                    iov_base: file.as_ptr() as *mut libc::c_void,
                    iov_len: file.len(),
                };
                self.iov_cnt = 2;
            }
        }
        true
    }

    fn adjust_iov(&mut self, n: usize) {
        if n > self.iov[0].iov_len {
            // first segment finished inside this write
            let advanced = n - self.iov[0].iov_len;
            self.iov[1].iov_base =
                unsafe { (self.iov[1].iov_base as *mut u8).add(advanced) } as *mut libc::c_void;
            self.iov[1].iov_len -= advanced;
            if self.iov[0].iov_len > 0 {
                self.write_buf.retrieve_all();
                self.iov[0].iov_len = 0;
            }
        } else {
            self.iov[0].iov_base =
                unsafe { (self.iov[0].iov_base as *mut u8).add(n) } as *mut libc::c_void;
            self.iov[0].iov_len -= n;
            self.write_buf.consume(n);
        }
    }
}

fn empty_iovec() -> libc::iovec {
    libc::iovec {
        iov_base: std::ptr::null_mut(),
        iov_len: 0,
    }
}
