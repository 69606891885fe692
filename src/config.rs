//! YAML configuration with hardcoded fallbacks.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// bit 0 = edge-triggered connection events, bit 1 = edge-triggered listen.
    pub trig_mode: u8,
    /// Epoll wait timeout in milliseconds; negative blocks indefinitely.
    pub timeout_ms: i32,
    pub opt_linger: bool,
    pub conn_pool_num: usize,
    pub thread_num: usize,
    pub open_log: bool,
    /// 0 = debug, 1 = info, 2 = warn, 3 = error.
    pub log_level: u8,
    pub log_queue_size: usize,
    pub log_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 1316,
            trig_mode: 3,
            timeout_ms: -1,
            opt_linger: true,
            conn_pool_num: 8,
            thread_num: 6,
            open_log: true,
            log_level: 1,
            log_queue_size: 1024,
            log_dir: "./log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MysqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        MysqlConfig {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: "root".to_string(),
            database: "webserver".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub mysql: MysqlConfig,
}

impl AppConfig {
    /// Loads `path`, falling back to the defaults when the file is absent.
    /// A file that exists but does not parse is an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(AppConfig::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn display(&self) {
        let listen_mode = if self.server.trig_mode & 0x2 != 0 { "ET" } else { "LT" };
        let conn_mode = if self.server.trig_mode & 0x1 != 0 { "ET" } else { "LT" };
        info!(
            "port: {}, opt_linger: {}, listen mode: {}, conn mode: {}",
            self.server.port, self.server.opt_linger, listen_mode, conn_mode
        );
        info!(
            "mysql: {}:{}/{} as {}",
            self.mysql.host, self.mysql.port, self.mysql.database, self.mysql.user
        );
        info!(
            "conn pool: {}, worker threads: {}, log level: {}",
            self.server.conn_pool_num, self.server.thread_num, self.server.log_level
        );
    }
}
