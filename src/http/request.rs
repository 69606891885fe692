use mysql::prelude::Queryable;
use thiserror::Error;

use crate::buffer::Buffer;
use crate::pool::SqlConnPool;
use crate::prelude::{debug, warn, HashMap, MAX_REQUEST_SIZE};

/// Virtual paths that resolve to an `.html` file of the same name.
const DEFAULT_HTML: [&str; 6] = [
    "/index",
    "/register",
    "/login",
    "/welcome",
    "/video",
    "/picture",
];

/// Form endpoints: 0 = register, 1 = login.
const DEFAULT_HTML_TAG: [(&str, u8); 2] = [("/register.html", 0), ("/login.html", 1)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Line,
    Header,
    Body,
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("path escapes the resource root")]
    PathTraversal,
    #[error("request too large")]
    RequestTooLarge,
}

/// Incremental HTTP/1.x request parser.
///
/// Runs a line-oriented state machine over the connection's read buffer,
/// consuming through each CRLF as it goes. Form POSTs against the login and
/// register pages are decoded and checked against the connection pool, and
/// the path is rewritten to the welcome or error page accordingly.
#[derive(Debug, Default)]
pub struct HttpRequest {
    state: ParseState,
    method: String,
    path: String,
    version: String,
    body: String,
    headers: HashMap<String, String>,
    post: HashMap<String, String>,
}

impl Default for ParseState {
    fn default() -> Self {
        ParseState::Line
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the machine for the next request on the connection.
    pub fn init(&mut self) {
        self.state = ParseState::Line;
        self.method.clear();
        self.path.clear();
        self.version.clear();
        self.body.clear();
        self.headers.clear();
        self.post.clear();
    }

    /// Drives the state machine over the readable region. Lines end with
    /// CRLF; a truncated final line moves the machine to Finish without
    /// consuming it. Not-ok means the caller answers with a 400.
    pub fn parse(&mut self, buf: &mut Buffer, db: Option<&SqlConnPool>) -> Result<(), ParseError> {
        if buf.readable() > MAX_REQUEST_SIZE {
            return Err(ParseError::RequestTooLarge);
        }
        while buf.readable() > 0 && self.state != ParseState::Finish {
            let readable = buf.peek();
            let line_end = find_crlf(readable);
            let line_len = line_end.unwrap_or(readable.len());
            let line = String::from_utf8_lossy(&readable[..line_len]).into_owned();

            match self.state {
                ParseState::Line => {
                    self.parse_request_line(&line)?;
                    self.canonicalize_path()?;
                }
                ParseState::Header => {
                    self.parse_header(&line);
                    if buf.readable() <= 2 {
                        self.state = ParseState::Finish;
                    }
                }
                ParseState::Body => {
                    self.body = line;
                    self.parse_post(db);
                    self.state = ParseState::Finish;
                }
                ParseState::Finish => {}
            }

            match line_end {
                Some(rel) => {
                    let crlf_end = buf.read_pos() + rel + 2;
                    buf.consume_until(crlf_end);
                }
                None => {
                    self.state = ParseState::Finish;
                    break;
                }
            }
        }
        Ok(())
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn post(&self, key: &str) -> Option<&str> {
        self.post.get(key).map(String::as_str)
    }

    pub fn is_keep_alive(&self) -> bool {
        self.headers.get("Connection").map(String::as_str) == Some("keep-alive")
            && self.version == "1.1"
    }

    // `METHOD SP PATH SP HTTP/VERSION`, all three parts non-empty.
    fn parse_request_line(&mut self, line: &str) -> Result<(), ParseError> {
        let parts: Vec<&str> = line.split(' ').collect();
        if parts.len() != 3 {
            return Err(ParseError::MalformedRequestLine);
        }
        let version = parts[2]
            .strip_prefix("HTTP/")
            .ok_or(ParseError::MalformedRequestLine)?;
        if parts[0].is_empty() || parts[1].is_empty() || version.is_empty() {
            return Err(ParseError::MalformedRequestLine);
        }
        self.method = parts[0].to_string();
        self.path = parts[1].to_string();
        self.version = version.to_string();
        self.state = ParseState::Header;
        Ok(())
    }

    fn canonicalize_path(&mut self) -> Result<(), ParseError> {
        if self.path.split('/').any(|segment| segment == "..") {
            return Err(ParseError::PathTraversal);
        }
        if self.path == "/" {
            self.path = "/index.html".to_string();
        } else if DEFAULT_HTML.contains(&self.path.as_str()) {
            self.path.push_str(".html");
        }
        Ok(())
    }

    // `Key: value` inserts into the header map; anything else (notably the
    // blank line) ends the header section.
    fn parse_header(&mut self, line: &str) {
        match line.split_once(':') {
            Some((key, value)) if !key.is_empty() => {
                let value = value.strip_prefix(' ').unwrap_or(value);
                self.headers.insert(key.to_string(), value.to_string());
            }
            _ => self.state = ParseState::Body,
        }
    }

    fn parse_post(&mut self, db: Option<&SqlConnPool>) {
        if !self.method.eq_ignore_ascii_case("POST") {
            return;
        }
        if self.headers.get("Content-Type").map(String::as_str)
            != Some("application/x-www-form-urlencoded")
        {
            return;
        }
        self.decode_urlencoded();
        if let Some(&(_, tag)) = DEFAULT_HTML_TAG.iter().find(|(page, _)| *page == self.path) {
            let is_login = tag == 1;
            let user = self.post.get("username").cloned().unwrap_or_default();
            let password = self.post.get("password").cloned().unwrap_or_default();
            let verified = db
                .map(|pool| verify_user(pool, &user, &password, is_login))
                .unwrap_or(false);
            self.path = if verified {
                "/welcome.html".to_string()
            } else {
                "/error.html".to_string()
            };
        }
    }

    // Left-to-right scan over the form body: `=` closes the pending key,
    // `&` closes the pending value, `+` decodes to a space and `%HH` to the
    // escaped byte (a stray `%` is kept verbatim).
    fn decode_urlencoded(&mut self) {
        if self.body.is_empty() {
            return;
        }
        let bytes = self.body.as_bytes();
        let mut key: Option<String> = None;
        let mut field: Vec<u8> = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'=' if key.is_none() => {
                    key = Some(String::from_utf8_lossy(&field).into_owned());
                    field.clear();
                }
                b'&' => {
                    if let Some(k) = key.take() {
                        self.post
                            .insert(k, String::from_utf8_lossy(&field).into_owned());
                    }
                    field.clear();
                }
                b'+' => field.push(b' '),
                b'%' => match (hex_val(bytes.get(i + 1)), hex_val(bytes.get(i + 2))) {
                    (Some(hi), Some(lo)) => {
                        field.push(hi * 16 + lo);
                        i += 2;
                    }
                    _ => field.push(b'%'),
                },
                other => field.push(other),
            }
            i += 1;
        }
        // trailing field without a closing '&'
        if let Some(k) = key {
            if !field.is_empty() {
                self.post
                    .insert(k, String::from_utf8_lossy(&field).into_owned());
            }
        }
    }
}

/// Checks credentials against the `user` table. Login mode succeeds when the
/// stored password matches; register mode succeeds when the name is free and
/// the insert goes through. Database errors read as invalid credentials.
pub fn verify_user(pool: &SqlConnPool, user: &str, password: &str, is_login: bool) -> bool {
    if user.is_empty() || password.is_empty() {
        return false;
    }
    let mut conn = pool.acquire();
    let row: Option<(String, String)> = match conn.exec_first(
        "SELECT username, password FROM user WHERE username = ? LIMIT 1",
        (user,),
    ) {
        Ok(row) => row,
        Err(err) => {
            warn!("user lookup failed: {err}");
            return false;
        }
    };
    if is_login {
        let verified = matches!(&row, Some((_, stored)) if stored == password);
        debug!("login for {user}: {verified}");
        verified
    } else if row.is_some() {
        false
    } else {
        match conn.exec_drop(
            "INSERT INTO user(username, password) VALUES(?, ?)",
            (user, password),
        ) {
            Ok(()) => true,
            Err(err) => {
                warn!("user insert failed: {err}");
                false
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn hex_val(byte: Option<&u8>) -> Option<u8> {
    match *byte? {
        b @ b'0'..=b'9' => Some(b - b'0'),
        b @ b'a'..=b'f' => Some(b - b'a' + 10),
        b @ b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
