use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;

pub const EV_READ: u32 = libc::EPOLLIN as u32;
pub const EV_WRITE: u32 = libc::EPOLLOUT as u32;
pub const EV_RDHUP: u32 = libc::EPOLLRDHUP as u32;
pub const EV_HUP: u32 = libc::EPOLLHUP as u32;
pub const EV_ERR: u32 = libc::EPOLLERR as u32;
pub const EV_ONESHOT: u32 = libc::EPOLLONESHOT as u32;
pub const EV_ET: u32 = libc::EPOLLET as u32;

const DEFAULT_EVENT_CAPACITY: usize = 1024;

struct EpollFd(RawFd);

impl Drop for EpollFd {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}

/// Shareable handle for registering descriptors with the epoll instance.
///
/// `epoll_ctl` is safe to call from any thread, so workers rearm their own
/// descriptors through a clone of this while the loop thread sits in `wait`.
#[derive(Clone)]
pub struct Registry {
    epfd: Arc<EpollFd>,
}

impl Registry {
    pub fn add(&self, fd: RawFd, mask: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, mask)
    }

    pub fn modify(&self, fd: RawFd, mask: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, mask)
    }

    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        let res = unsafe {
            libc::epoll_ctl(self.epfd.0, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, mask: u32) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: mask,
            u64: fd as u64,
        };
        let res = unsafe { libc::epoll_ctl(self.epfd.0, op, fd, &mut event) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Thin wrapper over an epoll instance: the loop thread owns the event
/// buffer and calls `wait`; everyone else goes through [`Registry`].
pub struct Epoller {
    registry: Registry,
    events: Vec<libc::epoll_event>,
}

impl Epoller {
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(max_events: usize) -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Epoller {
            registry: Registry {
                epfd: Arc::new(EpollFd(epfd)),
            },
            events: vec![libc::epoll_event { events: 0, u64: 0 }; max_events],
        })
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Blocks up to `timeout_ms` (negative = indefinitely) and returns the
    /// number of ready events in the batch. An interrupted wait counts as an
    /// empty batch.
    pub fn wait(&mut self, timeout_ms: i32) -> io::Result<usize> {
        let n = unsafe {
            libc::epoll_wait(
                self.registry.epfd.0,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(n as usize)
    }

    pub fn event_fd(&self, i: usize) -> RawFd {
        self.events[i].u64 as RawFd
    }

    pub fn event_mask(&self, i: usize) -> u32 {
        self.events[i].events
    }
}
