use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;

use memmap2::Mmap;

use crate::buffer::Buffer;
use crate::prelude::{HTTP_BAD_REQUEST, HTTP_FORBIDDEN, HTTP_NOT_FOUND, HTTP_OK};

const SUFFIX_TYPE: &[(&str, &str)] = &[
    (".html", "text/html"),
    (".xml", "text/xml"),
    (".xhtml", "application/xhtml+xml"),
    (".txt", "text/plain"),
    (".rtf", "application/rtf"),
    (".pdf", "application/pdf"),
    (".word", "application/nsword"),
    (".png", "image/png"),
    (".gif", "image/gif"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".au", "audio/basic"),
    (".mpeg", "video/mpeg"),
    (".mpg", "video/mpeg"),
    (".avi", "video/x-msvideo"),
    (".gz", "application/x-gzip"),
    (".tar", "application/x-tar"),
    (".css", "text/css"),
    (".js", "text/javascript"),
];

const CODE_STATUS: &[(u16, &str)] = &[
    (200, "OK"),
    (400, "Bad Request"),
    (403, "Forbidden"),
    (404, "Not Found"),
];

const CODE_PATH: &[(u16, &str)] = &[
    (400, "/400.html"),
    (403, "/403.html"),
    (404, "/404.html"),
];

/// Builds the status line and headers into the connection's write buffer
/// and maps the body file for the vectored write that follows.
///
/// While the mapping is live it covers exactly the file at
/// `src_dir + path`; reinitialization or drop releases it.
#[derive(Debug, Default)]
pub struct HttpResponse {
    code: Option<u16>,
    keep_alive: bool,
    path: String,
    src_dir: String,
    file: Option<Mmap>,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all prior state; a previously mapped file is unmapped here.
    /// `code: None` lets the filesystem checks in `build` pick the status.
    pub fn init(&mut self, src_dir: &str, path: &str, keep_alive: bool, code: Option<u16>) {
        debug_assert!(!src_dir.is_empty());
        self.file = None;
        self.code = code;
        self.keep_alive = keep_alive;
        self.path = path.to_string();
        self.src_dir = src_dir.to_string();
    }

    pub fn build(&mut self, buf: &mut Buffer) {
        // a caller-preset error status (a 400 from a failed parse) stands as
        // is; the file checks only classify paths meant to be served
        if !self.has_error_page() {
            match fs::metadata(self.full_path()) {
                Err(_) => self.code = Some(HTTP_NOT_FOUND),
                Ok(meta) if meta.is_dir() => self.code = Some(HTTP_NOT_FOUND),
                // not world-readable
                Ok(meta) if meta.permissions().mode() & 0o004 == 0 => {
                    self.code = Some(HTTP_FORBIDDEN)
                }
                Ok(_) => {
                    if self.code.is_none() {
                        self.code = Some(HTTP_OK);
                    }
                }
            }
        }
        self.error_html();
        self.add_state_line(buf);
        self.add_header(buf);
        self.add_content(buf);
    }

    pub fn code(&self) -> Option<u16> {
        self.code
    }

    /// The mapped body, if `build` mapped one.
    pub fn file(&self) -> Option<&[u8]> {
        self.file.as_deref()
    }

    pub fn file_len(&self) -> usize {
        self.file.as_ref().map_or(0, |m| m.len())
    }

    fn has_error_page(&self) -> bool {
        self.code
            .map_or(false, |code| CODE_PATH.iter().any(|(c, _)| *c == code))
    }

    /// Swaps in the registered error page for error statuses.
    fn error_html(&mut self) {
        let page = self
            .code
            .and_then(|code| CODE_PATH.iter().find(|(c, _)| *c == code));
        if let Some((_, path)) = page {
            self.path = path.to_string();
        }
    }

    fn add_state_line(&mut self, buf: &mut Buffer) {
        let (code, reason) = match self.code.and_then(|c| status_text(c).map(|r| (c, r))) {
            Some(pair) => pair,
            None => {
                // unknown status coerces to a plain 400
                self.code = Some(HTTP_BAD_REQUEST);
                (HTTP_BAD_REQUEST, "Bad Request")
            }
        };
        buf.append(format!("HTTP/1.1 {code} {reason}\r\n").as_bytes());
    }

    fn add_header(&self, buf: &mut Buffer) {
        buf.append(b"Connection: ");
        if self.keep_alive {
            buf.append(b"keep-alive\r\n");
            buf.append(b"keep-alive: max=6, timeout=120\r\n");
        } else {
            buf.append(b"close\r\n");
        }
        buf.append(format!("Content-type: {}\r\n", self.file_type()).as_bytes());
    }

    fn add_content(&mut self, buf: &mut Buffer) {
        let file = match File::open(self.full_path()) {
            Ok(file) => file,
            Err(_) => {
                self.error_content(buf, "File NotFound!");
                return;
            }
        };
        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(_) => {
                self.error_content(buf, "File NotFound!");
                return;
            }
        };
        // the fd closes with `file`; the mapping keeps the content alive
        buf.append(format!("Content-length: {}\r\n\r\n", mmap.len()).as_bytes());
        self.file = Some(mmap);
    }

    /// Inline fallback body used when the target file cannot be served.
    pub fn error_content(&self, buf: &mut Buffer, msg: &str) {
        let code = self.code.unwrap_or(HTTP_BAD_REQUEST);
        let reason = status_text(code).unwrap_or("Bad Request");
        let body = format!(
            "<html><title>Error</title><body bgcolor=\"ffffff\">\
             {code} : {reason}\n<p>{msg}</p><hr><em>TinyWebServer</em></body></html>"
        );
        buf.append(format!("Content-length: {}\r\n\r\n", body.len()).as_bytes());
        buf.append(body.as_bytes());
    }

    fn full_path(&self) -> String {
        format!("{}{}", self.src_dir, self.path)
    }

    fn file_type(&self) -> &'static str {
        let suffix = match self.path.rfind('.') {
            Some(idx) => &self.path[idx..],
            None => return "text/plain",
        };
        SUFFIX_TYPE
            .iter()
            .find(|(s, _)| *s == suffix)
            .map(|(_, mime)| *mime)
            .unwrap_or("text/plain")
    }
}

fn status_text(code: u16) -> Option<&'static str> {
    CODE_STATUS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, reason)| *reason)
}
