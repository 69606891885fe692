//! Log initialization: `tracing` everywhere, with an asynchronous file
//! writer behind the bounded deque when `open_log` is set.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::pool::BlockDeque;

/// Keeps the writer thread alive. Dropping it drains the queue, closes it
/// and joins the writer, so nothing logged before shutdown is lost.
pub struct LogGuard {
    queue: Arc<BlockDeque<Vec<u8>>>,
    writer: Option<JoinHandle<()>>,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        while !self.queue.is_empty() {
            self.queue.flush();
            thread::yield_now();
        }
        self.queue.close();
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

/// Installs the global subscriber. Returns a guard when file logging is on;
/// the caller keeps it alive for the life of the process.
pub fn init(cfg: &ServerConfig) -> Result<Option<LogGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_str(cfg.log_level)));

    if !cfg.open_log {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
        return Ok(None);
    }

    fs::create_dir_all(&cfg.log_dir)?;
    let path = Path::new(&cfg.log_dir).join(format!("{}.log", today_stamp()));
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    let queue: Arc<BlockDeque<Vec<u8>>> = Arc::new(BlockDeque::new(cfg.log_queue_size));
    let writer_queue = Arc::clone(&queue);
    let writer = thread::Builder::new()
        .name("log-writer".to_string())
        .spawn(move || {
            while let Some(line) = writer_queue.pop_front() {
                let _ = file.write_all(&line);
            }
            let _ = file.flush();
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(QueueMakeWriter {
            queue: Arc::clone(&queue),
        })
        .init();

    Ok(Some(LogGuard {
        queue,
        writer: Some(writer),
    }))
}

fn level_str(log_level: u8) -> &'static str {
    match log_level {
        0 => "debug",
        1 => "info",
        2 => "warn",
        _ => "error",
    }
}

struct QueueMakeWriter {
    queue: Arc<BlockDeque<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for QueueMakeWriter {
    type Writer = QueueWriter;

    fn make_writer(&'a self) -> QueueWriter {
        QueueWriter {
            queue: Arc::clone(&self.queue),
            line: Vec::new(),
        }
    }
}

/// One formatted event; the rendered line is enqueued when the writer is
/// dropped at the end of the event.
struct QueueWriter {
    queue: Arc<BlockDeque<Vec<u8>>>,
    line: Vec<u8>,
}

impl Write for QueueWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.line.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for QueueWriter {
    fn drop(&mut self) {
        if !self.line.is_empty() {
            self.queue.push_back(std::mem::take(&mut self.line));
        }
    }
}

fn today_stamp() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    format!("{year:04}_{month:02}_{day:02}")
}

// Days-since-epoch to civil date, Gregorian.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe as i64 + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
