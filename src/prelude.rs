pub use crate::buffer::Buffer;
pub use crate::config::AppConfig;
pub use crate::epoller::{
    Epoller, Registry, EV_ERR, EV_ET, EV_HUP, EV_ONESHOT, EV_RDHUP, EV_READ, EV_WRITE,
};
pub use crate::error::{Result, ServerError};
pub use crate::http::{ConnContext, HttpConn, HttpRequest, HttpResponse};
pub use crate::pool::{BlockDeque, SqlConnPool, ThreadPool};

pub use std::collections::HashMap;
pub use std::io::{self, ErrorKind};
pub use std::net::SocketAddr;
pub use std::os::unix::io::RawFd;
pub use std::sync::Arc;

pub use tracing::{debug, error, info, trace, warn};

pub const HTTP_OK: u16 = 200;
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_FORBIDDEN: u16 = 403;
pub const HTTP_NOT_FOUND: u16 = 404;

/// Connection cap; accepts past this are turned away with "server busy!".
pub const MAX_FD: usize = 65536;
/// Requests that outgrow this without completing are answered with 400.
pub const MAX_REQUEST_SIZE: usize = 64 * 1024;
