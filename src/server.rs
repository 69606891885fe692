use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::IntoRawFd;
use std::sync::atomic::AtomicUsize;
use std::sync::Mutex;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::http::ConnContext;
use crate::prelude::*;

const LISTEN_BACKLOG: i32 = 5;

/// The serving engine: listening socket, epoll loop, worker pool and the
/// fd-keyed connection table.
///
/// The loop thread is the only one that accepts and dispatches; read/write
/// handling runs on pool workers. Every connection event is registered
/// one-shot, so a descriptor is silent until the worker that handled it
/// rearms it, and at most one worker ever holds a connection.
pub struct Server {
    port: u16,
    timeout_ms: i32,
    is_closed: bool,
    listen_fd: RawFd,
    listen_event: u32,
    conn_event: u32,
    epoller: Epoller,
    registry: Registry,
    pool: ThreadPool,
    ctx: Arc<ConnContext>,
    users: HashMap<RawFd, Arc<Mutex<HttpConn>>>,
}

impl Server {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let server = &config.server;
        if server.port < 1024 {
            return Err(ServerError::InvalidPort(server.port));
        }
        let src_dir = resource_dir()?;
        let pool = ThreadPool::new(server.thread_num)?;
        let epoller = Epoller::new()?;
        let registry = epoller.registry();

        let db = SqlConnPool::new(
            &config.mysql.host,
            config.mysql.port,
            &config.mysql.user,
            &config.mysql.password,
            &config.mysql.database,
            server.conn_pool_num,
        )?;

        let (listen_event, conn_event) = event_modes(server.trig_mode);
        let ctx = Arc::new(ConnContext {
            is_et: conn_event & EV_ET != 0,
            src_dir,
            user_count: AtomicUsize::new(0),
            db: Some(db),
        });

        let listen_fd = init_socket(server.port, server.opt_linger)?;
        registry.add(listen_fd, listen_event | EV_READ)?;
        set_fd_nonblock(listen_fd);

        Ok(Server {
            port: server.port,
            timeout_ms: server.timeout_ms,
            is_closed: false,
            listen_fd,
            listen_event,
            conn_event,
            epoller,
            registry,
            pool,
            ctx,
            users: HashMap::new(),
        })
    }

    pub fn run(&mut self) {
        info!("server start, listening on 0.0.0.0:{}", self.port);
        while !self.is_closed {
            let count = match self.epoller.wait(self.timeout_ms) {
                Ok(count) => count,
                Err(err) => {
                    error!("epoll wait failed: {err}");
                    self.is_closed = true;
                    break;
                }
            };
            for i in 0..count {
                let fd = self.epoller.event_fd(i);
                let mask = self.epoller.event_mask(i);
                if fd == self.listen_fd {
                    self.deal_listen();
                } else if mask & (EV_RDHUP | EV_HUP | EV_ERR) != 0 {
                    self.close_conn(fd);
                } else if mask & EV_READ != 0 {
                    self.deal_read(fd);
                } else if mask & EV_WRITE != 0 {
                    self.deal_write(fd);
                } else {
                    warn!("unexpected event {mask:#x} on fd {fd}");
                }
            }
        }
    }

    /// Accepts until the listener would block (once in level-triggered
    /// mode). Over the connection cap, the client gets a short notice and
    /// the socket is closed right away.
    fn deal_listen(&mut self) {
        loop {
            let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            let fd = unsafe {
                libc::accept(
                    self.listen_fd,
                    &mut addr as *mut libc::sockaddr_in as *mut libc::sockaddr,
                    &mut len,
                )
            };
            if fd <= 0 {
                return;
            }
            if self.ctx.user_count() >= MAX_FD {
                send_error(fd, b"server busy!");
                warn!("server busy, turning away fd {fd}");
                return;
            }
            self.add_client(fd, peer_addr(&addr));
            if self.listen_event & EV_ET == 0 {
                return;
            }
        }
    }

    fn add_client(&mut self, fd: RawFd, addr: SocketAddr) {
        let conn = self
            .users
            .entry(fd)
            .or_insert_with(|| Arc::new(Mutex::new(HttpConn::new())));
        conn.lock().unwrap().init(fd, addr, &self.ctx);
        if let Err(err) = self.registry.add(fd, self.conn_event | EV_READ) {
            error!("failed to register fd {fd}: {err}");
        }
        set_fd_nonblock(fd);
        info!("client {} in on fd {}, {} online", addr, fd, self.ctx.user_count());
    }

    fn close_conn(&self, fd: RawFd) {
        if let Some(conn) = self.users.get(&fd) {
            shutdown_conn(&self.registry, &self.ctx, &mut conn.lock().unwrap());
        }
    }

    fn deal_read(&self, fd: RawFd) {
        let Some(conn) = self.users.get(&fd) else {
            return;
        };
        let conn = Arc::clone(conn);
        let ctx = Arc::clone(&self.ctx);
        let registry = self.registry.clone();
        let conn_event = self.conn_event;
        self.pool
            .submit(move || on_read(&conn, &ctx, &registry, conn_event));
    }

    fn deal_write(&self, fd: RawFd) {
        let Some(conn) = self.users.get(&fd) else {
            return;
        };
        let conn = Arc::clone(conn);
        let ctx = Arc::clone(&self.ctx);
        let registry = self.registry.clone();
        let conn_event = self.conn_event;
        self.pool
            .submit(move || on_write(&conn, &ctx, &registry, conn_event));
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.is_closed = true;
        unsafe { libc::close(self.listen_fd) };
        if let Some(db) = self.ctx.db.as_ref() {
            db.close();
        }
    }
}

fn on_read(conn: &Mutex<HttpConn>, ctx: &ConnContext, registry: &Registry, conn_event: u32) {
    let mut conn = conn.lock().unwrap();
    match conn.read(ctx) {
        // peer finished sending
        Ok(0) => {
            shutdown_conn(registry, ctx, &mut conn);
            return;
        }
        Err(err) if err.kind() != ErrorKind::WouldBlock => {
            shutdown_conn(registry, ctx, &mut conn);
            return;
        }
        _ => {}
    }
    on_process(registry, ctx, conn_event, &mut conn);
}

fn on_write(conn: &Mutex<HttpConn>, ctx: &ConnContext, registry: &Registry, conn_event: u32) {
    let mut conn = conn.lock().unwrap();
    let result = conn.write(ctx);
    if conn.to_write_bytes() == 0 {
        // response fully sent
        if conn.is_keep_alive() {
            on_process(registry, ctx, conn_event, &mut conn);
            return;
        }
    } else if let Err(err) = &result {
        if err.kind() == ErrorKind::WouldBlock {
            if let Err(err) = registry.modify(conn.fd(), conn_event | EV_WRITE) {
                warn!("rearm for write failed on fd {}: {err}", conn.fd());
            } else {
                return;
            }
        }
    }
    shutdown_conn(registry, ctx, &mut conn);
}

fn on_process(registry: &Registry, ctx: &ConnContext, conn_event: u32, conn: &mut HttpConn) {
    let mask = if conn.process(ctx) { EV_WRITE } else { EV_READ };
    if let Err(err) = registry.modify(conn.fd(), conn_event | mask) {
        warn!("rearm failed on fd {}: {err}", conn.fd());
        shutdown_conn(registry, ctx, conn);
    }
}

fn shutdown_conn(registry: &Registry, ctx: &ConnContext, conn: &mut HttpConn) {
    if conn.is_closed() {
        return;
    }
    let _ = registry.remove(conn.fd());
    conn.close(ctx);
    info!("client fd {} out, {} online", conn.fd(), ctx.user_count());
}

fn event_modes(trig_mode: u8) -> (u32, u32) {
    let mut listen_event = EV_RDHUP;
    let mut conn_event = EV_ONESHOT | EV_RDHUP;
    // 0 = all LT, 1 = conn ET, 2 = listen ET, 3+ = all ET
    match trig_mode {
        0 => {}
        1 => conn_event |= EV_ET,
        2 => listen_event |= EV_ET,
        _ => {
            conn_event |= EV_ET;
            listen_event |= EV_ET;
        }
    }
    (listen_event, conn_event)
}

fn init_socket(port: u16, opt_linger: bool) -> Result<RawFd> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    // linger 10s lets in-flight data drain before the fd really closes
    let linger = if opt_linger {
        Some(Duration::from_secs(10))
    } else {
        None
    };
    socket.set_linger(linger)?;
    socket.set_reuse_address(true)?;
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into_raw_fd())
}

fn resource_dir() -> Result<String> {
    let cwd = std::env::current_dir()?;
    Ok(format!("{}/resources/", cwd.display()))
}

fn set_fd_nonblock(fd: RawFd) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
}

fn send_error(fd: RawFd, msg: &[u8]) {
    unsafe {
        libc::send(fd, msg.as_ptr() as *const libc::c_void, msg.len(), 0);
        libc::close(fd);
    }
}

fn peer_addr(addr: &libc::sockaddr_in) -> SocketAddr {
    let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
    let port = u16::from_be(addr.sin_port);
    SocketAddr::from((ip, port))
}
