use tiny_web_server::buffer::Buffer;
use tiny_web_server::http::{HttpRequest, HttpResponse, ParseError, ParseState};

fn buffer_with(raw: &[u8]) -> Buffer {
    let mut buf = Buffer::new();
    buf.append(raw);
    buf
}

#[test]
fn test_simple_get_request() {
    let mut req = HttpRequest::new();
    let mut buf = buffer_with(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n");

    assert!(req.parse(&mut buf, None).is_ok());
    assert_eq!(req.method(), "GET");
    assert_eq!(req.path(), "/index.html");
    assert_eq!(req.version(), "1.1");
    assert_eq!(req.state(), ParseState::Finish);
    assert_eq!(req.header("Host"), Some("localhost"));
}

#[test]
fn test_root_path_rewrite() {
    let mut req = HttpRequest::new();
    let mut buf = buffer_with(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");

    assert!(req.parse(&mut buf, None).is_ok());
    assert_eq!(req.path(), "/index.html");
}

#[test]
fn test_virtual_path_gets_html_suffix() {
    for (raw, expected) in [
        (&b"GET /login HTTP/1.1\r\n\r\n"[..], "/login.html"),
        (&b"GET /register HTTP/1.1\r\n\r\n"[..], "/register.html"),
        (&b"GET /video HTTP/1.1\r\n\r\n"[..], "/video.html"),
    ] {
        let mut req = HttpRequest::new();
        let mut buf = buffer_with(raw);
        assert!(req.parse(&mut buf, None).is_ok());
        assert_eq!(req.path(), expected);
    }
}

#[test]
fn test_unknown_path_untouched() {
    let mut req = HttpRequest::new();
    let mut buf = buffer_with(b"GET /nope HTTP/1.1\r\n\r\n");

    assert!(req.parse(&mut buf, None).is_ok());
    assert_eq!(req.path(), "/nope");
}

#[test]
fn test_fragmented_request() {
    let mut req = HttpRequest::new();
    let mut buf = Buffer::new();

    // request line alone leaves the machine in the header state
    buf.append(b"GET /index.html HTTP/1.1\r\n");
    assert!(req.parse(&mut buf, None).is_ok());
    assert_eq!(req.state(), ParseState::Header);
    assert_eq!(buf.readable(), 0);

    // headers complete the request
    buf.append(b"Host: localhost\r\n\r\n");
    assert!(req.parse(&mut buf, None).is_ok());
    assert_eq!(req.state(), ParseState::Finish);
    assert_eq!(req.header("Host"), Some("localhost"));
}

#[test]
fn test_malformed_request_line() {
    let mut req = HttpRequest::new();
    let mut buf = buffer_with(b"BOGUS_REQUEST\r\n\r\n");

    assert_eq!(
        req.parse(&mut buf, None),
        Err(ParseError::MalformedRequestLine)
    );
}

#[test]
fn test_missing_http_prefix_rejected() {
    let mut req = HttpRequest::new();
    let mut buf = buffer_with(b"GET /index.html SMTP/1.1\r\n\r\n");

    assert_eq!(
        req.parse(&mut buf, None),
        Err(ParseError::MalformedRequestLine)
    );
}

#[test]
fn test_path_traversal_rejected() {
    let mut req = HttpRequest::new();
    let mut buf = buffer_with(b"GET /../etc/passwd HTTP/1.1\r\n\r\n");

    assert_eq!(req.parse(&mut buf, None), Err(ParseError::PathTraversal));
}

#[test]
fn test_oversized_request_rejected() {
    let mut req = HttpRequest::new();
    let mut buf = Buffer::new();
    buf.append(&vec![b'a'; 70_000]);

    assert_eq!(req.parse(&mut buf, None), Err(ParseError::RequestTooLarge));
}

#[test]
fn test_keep_alive_detection() {
    let mut req = HttpRequest::new();
    let mut buf = buffer_with(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
    assert!(req.parse(&mut buf, None).is_ok());
    assert!(req.is_keep_alive());

    // HTTP/1.0 never keeps the connection, whatever the header says
    let mut req = HttpRequest::new();
    let mut buf = buffer_with(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
    assert!(req.parse(&mut buf, None).is_ok());
    assert!(!req.is_keep_alive());

    let mut req = HttpRequest::new();
    let mut buf = buffer_with(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    assert!(req.parse(&mut buf, None).is_ok());
    assert!(!req.is_keep_alive());
}

#[test]
fn test_urlencoded_body_decoding() {
    let mut req = HttpRequest::new();
    let raw = b"POST /form HTTP/1.1\r\n\
                Content-Type: application/x-www-form-urlencoded\r\n\r\n\
                a=1&b=2";
    let mut buf = buffer_with(raw);

    assert!(req.parse(&mut buf, None).is_ok());
    assert_eq!(req.post("a"), Some("1"));
    assert_eq!(req.post("b"), Some("2"));
}

#[test]
fn test_urlencoded_escapes() {
    let mut req = HttpRequest::new();
    let raw = b"POST /form HTTP/1.1\r\n\
                Content-Type: application/x-www-form-urlencoded\r\n\r\n\
                name=hello+world&tag=%41%62%63";
    let mut buf = buffer_with(raw);

    assert!(req.parse(&mut buf, None).is_ok());
    assert_eq!(req.post("name"), Some("hello world"));
    assert_eq!(req.post("tag"), Some("Abc"));
}

#[test]
fn test_post_without_form_content_type_ignored() {
    let mut req = HttpRequest::new();
    let raw = b"POST /form HTTP/1.1\r\n\
                Content-Type: text/plain\r\n\r\n\
                a=1&b=2";
    let mut buf = buffer_with(raw);

    assert!(req.parse(&mut buf, None).is_ok());
    assert_eq!(req.post("a"), None);
}

#[test]
fn test_login_without_database_fails_closed() {
    let mut req = HttpRequest::new();
    let raw = b"POST /login.html HTTP/1.1\r\n\
                Content-Type: application/x-www-form-urlencoded\r\n\r\n\
                username=alice&password=pw";
    let mut buf = buffer_with(raw);

    assert!(req.parse(&mut buf, None).is_ok());
    assert_eq!(req.path(), "/error.html");
}

// --- response building ---

fn temp_resource_dir(tag: &str) -> String {
    let dir = std::env::temp_dir().join(format!("tws-test-{}-{tag}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    format!("{}/", dir.display())
}

fn write_world_readable(path: &str, data: &[u8]) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, data).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).unwrap();
}

#[test]
fn test_response_serves_file() {
    let dir = temp_resource_dir("serve");
    write_world_readable(&format!("{dir}index.html"), b"<html>hello</html>");

    let mut resp = HttpResponse::new();
    let mut buf = Buffer::new();
    resp.init(&dir, "/index.html", false, Some(200));
    resp.build(&mut buf);

    assert_eq!(resp.code(), Some(200));
    let head = buf.retrieve_all_as_string();
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert!(head.contains("Content-type: text/html\r\n"));
    assert!(head.contains("Content-length: 18\r\n\r\n"));
    assert_eq!(resp.file(), Some(&b"<html>hello</html>"[..]));
}

#[test]
fn test_response_keep_alive_headers() {
    let dir = temp_resource_dir("keepalive");
    write_world_readable(&format!("{dir}index.html"), b"x");

    let mut resp = HttpResponse::new();
    let mut buf = Buffer::new();
    resp.init(&dir, "/index.html", true, Some(200));
    resp.build(&mut buf);

    let head = buf.retrieve_all_as_string();
    assert!(head.contains("Connection: keep-alive\r\n"));
    assert!(head.contains("keep-alive: max=6, timeout=120\r\n"));
}

#[test]
fn test_response_missing_file_is_404() {
    let dir = temp_resource_dir("missing");

    let mut resp = HttpResponse::new();
    let mut buf = Buffer::new();
    resp.init(&dir, "/nope.html", false, Some(200));
    resp.build(&mut buf);

    assert_eq!(resp.code(), Some(404));
    let head = buf.retrieve_all_as_string();
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    // no 404.html in the resource dir, so the inline page is used
    assert!(head.contains("<em>TinyWebServer</em>"));
}

#[test]
fn test_response_error_page_file_preferred() {
    let dir = temp_resource_dir("errpage");
    write_world_readable(&format!("{dir}404.html"), b"<html>gone</html>");

    let mut resp = HttpResponse::new();
    let mut buf = Buffer::new();
    resp.init(&dir, "/nope.html", false, Some(200));
    resp.build(&mut buf);

    assert_eq!(resp.code(), Some(404));
    assert_eq!(resp.file(), Some(&b"<html>gone</html>"[..]));
}

#[test]
fn test_response_unreadable_file_is_403() {
    use std::os::unix::fs::PermissionsExt;

    let dir = temp_resource_dir("secret");
    let path = format!("{dir}secret.html");
    std::fs::write(&path, b"top secret").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

    let mut resp = HttpResponse::new();
    let mut buf = Buffer::new();
    resp.init(&dir, "/secret.html", false, Some(200));
    resp.build(&mut buf);

    assert_eq!(resp.code(), Some(403));
    let head = buf.retrieve_all_as_string();
    assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"));
}

#[test]
fn test_response_directory_is_404() {
    let dir = temp_resource_dir("isdir");
    std::fs::create_dir_all(format!("{dir}sub")).unwrap();

    let mut resp = HttpResponse::new();
    let mut buf = Buffer::new();
    resp.init(&dir, "/sub", false, Some(200));
    resp.build(&mut buf);

    assert_eq!(resp.code(), Some(404));
}

#[test]
fn test_response_bad_request_keeps_400() {
    let dir = temp_resource_dir("badreq");

    // a failed parse leaves no usable path; the preset 400 must survive
    let mut resp = HttpResponse::new();
    let mut buf = Buffer::new();
    resp.init(&dir, "", false, Some(400));
    resp.build(&mut buf);

    assert_eq!(resp.code(), Some(400));
    let head = buf.retrieve_all_as_string();
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(head.contains("Connection: close\r\n"));
}

#[test]
fn test_response_unknown_suffix_is_text_plain() {
    let dir = temp_resource_dir("mime");
    write_world_readable(&format!("{dir}data.bin"), b"1234");

    let mut resp = HttpResponse::new();
    let mut buf = Buffer::new();
    resp.init(&dir, "/data.bin", false, Some(200));
    resp.build(&mut buf);

    let head = buf.retrieve_all_as_string();
    assert!(head.contains("Content-type: text/plain\r\n"));
}
