use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use mysql::{Conn, Opts, OptsBuilder};
use std_semaphore::Semaphore;
use tracing::info;

use crate::error::Result;

/// Bounded pool of opened MySQL connections.
///
/// Every handle is opened up front. The semaphore value always equals the
/// number of handles sitting in the FIFO, so `acquire` never pops an empty
/// queue. Handles are used by at most one thread between acquire and
/// release; the guard returns its handle on every exit path.
pub struct SqlConnPool {
    conns: Mutex<VecDeque<Conn>>,
    sem: Semaphore,
    max: usize,
}

impl SqlConnPool {
    pub fn new(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        database: &str,
        max: usize,
    ) -> Result<Self> {
        assert!(max > 0);
        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(host))
            .tcp_port(port)
            .user(Some(user))
            .pass(Some(password))
            .db_name(Some(database))
            .into();
        let mut conns = VecDeque::with_capacity(max);
        for _ in 0..max {
            conns.push_back(Conn::new(opts.clone())?);
        }
        info!("sql pool ready, {} connections to {}/{}", max, host, database);
        Ok(SqlConnPool {
            conns: Mutex::new(conns),
            sem: Semaphore::new(max as isize),
            max,
        })
    }

    /// Blocks until a handle is available.
    pub fn acquire(&self) -> SqlConnGuard<'_> {
        self.sem.acquire();
        let conn = self.conns.lock().unwrap().pop_front();
        SqlConnGuard { conn, pool: self }
    }

    pub fn free_count(&self) -> usize {
        self.conns.lock().unwrap().len()
    }

    pub fn max_count(&self) -> usize {
        self.max
    }

    /// Disconnects every pooled handle. Handles still held by guards are
    /// closed when those guards return them to the dropped queue.
    pub fn close(&self) {
        let mut conns = self.conns.lock().unwrap();
        while conns.pop_front().is_some() {}
    }

    fn release(&self, conn: Conn) {
        self.conns.lock().unwrap().push_back(conn);
        self.sem.release();
    }
}

/// Scoped acquisition: holds one handle, hands it back on drop.
pub struct SqlConnGuard<'a> {
    conn: Option<Conn>,
    pool: &'a SqlConnPool,
}

impl Deref for SqlConnGuard<'_> {
    type Target = Conn;

    fn deref(&self) -> &Conn {
        // a permit was taken before the pop, so the slot is filled until drop
        self.conn.as_ref().unwrap()
    }
}

impl DerefMut for SqlConnGuard<'_> {
    fn deref_mut(&mut self) -> &mut Conn {
        self.conn.as_mut().unwrap()
    }
}

impl Drop for SqlConnGuard<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
