// src/conn.rs
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use crate::cgi::CgiHandler;
use crate::db::DbConn;
use crate::log::Logger;
use crate::log_debug;
use crate::syscalls::{self, Epoll, MappedFile, TriggerMode, EPOLLIN, EPOLLOUT};

pub const READ_BUFFER_SIZE: usize = 2048;
pub const MAX_READ_BUFFER: usize = 64 * 1024;
pub const WRITE_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_DOCUMENT: &str = "judge.html";

const OK_200_TITLE: &str = "OK";
const ERROR_400_TITLE: &str = "Bad Request";
const ERROR_400_FORM: &str =
    "ERROR_400: Your request has bad syntax or is inherently impossible to satisfy.\n";
const ERROR_403_TITLE: &str = "Forbidden";
const ERROR_403_FORM: &str =
    "ERROR_403: You do not have permission to get file from this server.\n";
const ERROR_404_TITLE: &str = "Not Found";
const ERROR_404_FORM: &str = "ERROR_404: The requested file was not found on this server.\n";
const ERROR_500_TITLE: &str = "Internal Error";
const ERROR_500_FORM: &str =
    "ERROR_500: There was an unusual problem serving the requested file.\n";
const EMPTY_FILE_BODY: &str = "<html><body></body></html>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Outer parsing stage: which part of the request the byte cursor is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckState {
    RequestLine,
    Header,
    Content,
}

/// Outcome of a parsing pass over the buffered bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpCode {
    /// Request still incomplete, keep reading.
    NoRequest,
    /// A complete request with no body was parsed.
    GetRequest,
    BadRequest,
    NoResource,
    ForbiddenRequest,
    /// Response file resolved and mapped, ready to transmit.
    FileRequest,
    InternalError,
}

/// Inner line-reader outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineStatus {
    Ok,
    Bad,
    Open,
}

/// One client connection: socket, incremental parser state, and the
/// response being assembled or transmitted.
///
/// Parsing is restartable at byte granularity. Every pass resumes from the
/// saved cursor, so a request arriving one byte per readiness event costs
/// no rework and no per-connection thread.
pub struct HttpConn {
    fd: RawFd,
    peer: SocketAddr,
    epoll: Arc<Epoll>,
    mode: TriggerMode,
    doc_root: PathBuf,
    cgi: Arc<dyn CgiHandler>,
    logger: Arc<Logger>,

    read_buf: Vec<u8>,
    read_idx: usize,
    checked_idx: usize,
    start_line: usize,

    check_state: CheckState,
    method: Method,
    url: String,
    host: String,
    content_length: usize,
    linger: bool,
    body: Vec<u8>,

    write_buf: Vec<u8>,
    file: Option<MappedFile>,
    file_size: usize,
    bytes_to_send: usize,
    bytes_have_send: usize,
    header_len: usize,
}

impl HttpConn {
    pub fn new(
        fd: RawFd,
        peer: SocketAddr,
        epoll: Arc<Epoll>,
        mode: TriggerMode,
        doc_root: PathBuf,
        cgi: Arc<dyn CgiHandler>,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            fd,
            peer,
            epoll,
            mode,
            doc_root,
            cgi,
            logger,
            read_buf: vec![0; READ_BUFFER_SIZE],
            read_idx: 0,
            checked_idx: 0,
            start_line: 0,
            check_state: CheckState::RequestLine,
            method: Method::Get,
            url: String::new(),
            host: String::new(),
            content_length: 0,
            linger: false,
            body: Vec::new(),
            write_buf: Vec::new(),
            file: None,
            file_size: 0,
            bytes_to_send: 0,
            bytes_have_send: 0,
            header_len: 0,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Clear all per-request state so the next request on a kept-alive
    /// connection starts from a clean parser.
    pub fn reset_for_next_request(&mut self) {
        self.read_buf.clear();
        self.read_buf.resize(READ_BUFFER_SIZE, 0);
        self.read_idx = 0;
        self.checked_idx = 0;
        self.start_line = 0;
        self.check_state = CheckState::RequestLine;
        self.method = Method::Get;
        self.url.clear();
        self.host.clear();
        self.content_length = 0;
        self.linger = false;
        self.body.clear();
        self.write_buf.clear();
        self.file = None;
        self.file_size = 0;
        self.bytes_to_send = 0;
        self.bytes_have_send = 0;
        self.header_len = 0;
    }

    /// Pull whatever the socket has into the read buffer. Level-triggered
    /// mode takes one bite per readiness event; edge-triggered mode drains
    /// until the kernel reports empty. Returns false when the peer closed,
    /// the socket errored, or the buffer hit its hard cap.
    pub fn read_once(&mut self) -> bool {
        loop {
            if self.read_idx >= self.read_buf.len() {
                if self.read_buf.len() >= MAX_READ_BUFFER {
                    return false;
                }
                let grown = (self.read_buf.len() * 2).min(MAX_READ_BUFFER);
                self.read_buf.resize(grown, 0);
            }
            match syscalls::recv_nonblocking(self.fd, &mut self.read_buf[self.read_idx..]) {
                Ok(0) => return false,
                Ok(n) => {
                    self.read_idx += n;
                    if self.mode == TriggerMode::Level {
                        return true;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // Nothing to read right now; the request may still be
                    // in flight.
                    return true;
                }
                Err(_) => return false,
            }
        }
    }

    /// Advance the line cursor to the next CRLF. Open means the terminator
    /// has not arrived yet; the cursor stays put for the next pass.
    fn parse_line(&mut self) -> LineStatus {
        while self.checked_idx < self.read_idx {
            match self.read_buf[self.checked_idx] {
                b'\r' => {
                    if self.checked_idx + 1 == self.read_idx {
                        return LineStatus::Open;
                    }
                    if self.read_buf[self.checked_idx + 1] == b'\n' {
                        self.checked_idx += 2;
                        return LineStatus::Ok;
                    }
                    return LineStatus::Bad;
                }
                b'\n' => {
                    if self.checked_idx > 0 && self.read_buf[self.checked_idx - 1] == b'\r' {
                        self.checked_idx += 1;
                        return LineStatus::Ok;
                    }
                    return LineStatus::Bad;
                }
                _ => self.checked_idx += 1,
            }
        }
        LineStatus::Open
    }

    fn take_line(&mut self) -> Vec<u8> {
        let mut line = self.read_buf[self.start_line..self.checked_idx].to_vec();
        while matches!(line.last(), Some(b'\r') | Some(b'\n')) {
            line.pop();
        }
        self.start_line = self.checked_idx;
        line
    }

    /// Drive the two-level state machine over the buffered bytes: the line
    /// reader feeds the stage parser until the request completes, goes bad,
    /// or the buffer runs dry.
    pub fn process_read(&mut self, mut db: Option<&mut DbConn>) -> HttpCode {
        let mut line_status = LineStatus::Ok;
        loop {
            // The body stage consumes raw bytes, not lines.
            if !(self.check_state == CheckState::Content && line_status == LineStatus::Ok) {
                line_status = self.parse_line();
                if line_status != LineStatus::Ok {
                    break;
                }
            }
            match self.check_state {
                CheckState::RequestLine => {
                    let line = self.take_line();
                    if self.parse_request_line(&line) == HttpCode::BadRequest {
                        return HttpCode::BadRequest;
                    }
                }
                CheckState::Header => {
                    let line = self.take_line();
                    match self.parse_headers(&line) {
                        HttpCode::BadRequest => return HttpCode::BadRequest,
                        HttpCode::GetRequest => return self.do_request(db.as_deref_mut()),
                        _ => {}
                    }
                }
                CheckState::Content => {
                    if self.read_idx >= self.checked_idx + self.content_length {
                        let start = self.checked_idx;
                        self.body = self.read_buf[start..start + self.content_length].to_vec();
                        return self.do_request(db.as_deref_mut());
                    }
                    line_status = LineStatus::Open;
                }
            }
        }
        if line_status == LineStatus::Bad {
            return HttpCode::BadRequest;
        }
        HttpCode::NoRequest
    }

    fn parse_request_line(&mut self, line: &[u8]) -> HttpCode {
        let Ok(text) = std::str::from_utf8(line) else {
            return HttpCode::BadRequest;
        };
        let mut parts = text.split_whitespace();
        let (Some(method), Some(url), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            return HttpCode::BadRequest;
        };
        if parts.next().is_some() {
            return HttpCode::BadRequest;
        }

        if method.eq_ignore_ascii_case("GET") {
            self.method = Method::Get;
        } else if method.eq_ignore_ascii_case("POST") {
            self.method = Method::Post;
        } else {
            return HttpCode::BadRequest;
        }

        if !version.eq_ignore_ascii_case("HTTP/1.1") {
            return HttpCode::BadRequest;
        }

        let mut url = url;
        for scheme in ["http://", "https://"] {
            if url.len() > scheme.len() && url[..scheme.len()].eq_ignore_ascii_case(scheme) {
                let rest = &url[scheme.len()..];
                match rest.find('/') {
                    Some(slash) => url = &rest[slash..],
                    None => return HttpCode::BadRequest,
                }
            }
        }
        if !url.starts_with('/') {
            return HttpCode::BadRequest;
        }
        self.url = if url == "/" {
            format!("/{}", DEFAULT_DOCUMENT)
        } else {
            url.to_string()
        };
        self.check_state = CheckState::Header;
        HttpCode::NoRequest
    }

    fn parse_headers(&mut self, line: &[u8]) -> HttpCode {
        if line.is_empty() {
            // Blank line ends the header section.
            if self.content_length != 0 {
                self.check_state = CheckState::Content;
                return HttpCode::NoRequest;
            }
            return HttpCode::GetRequest;
        }
        let Ok(text) = std::str::from_utf8(line) else {
            return HttpCode::NoRequest;
        };
        if let Some(value) = header_value(text, "connection:") {
            self.linger = value.eq_ignore_ascii_case("keep-alive");
        } else if let Some(value) = header_value(text, "content-length:") {
            self.content_length = value.parse().unwrap_or(0);
        } else if let Some(value) = header_value(text, "host:") {
            self.host = value.to_string();
        }
        HttpCode::NoRequest
    }

    /// Resolve the parsed request to a document. POSTs to `.cgi` targets
    /// run the dynamic handler first, which substitutes the page to serve.
    fn do_request(&mut self, db: Option<&mut DbConn>) -> HttpCode {
        if self.method == Method::Post {
            let script = self
                .url
                .rsplit('/')
                .next()
                .unwrap_or("")
                .to_string();
            if script.ends_with(".cgi") {
                match self.cgi.invoke(&script, &self.body, db) {
                    Some(page) => self.url = page,
                    None => return HttpCode::BadRequest,
                }
            }
        }

        let path = self.doc_root.join(self.url.trim_start_matches('/'));
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(_) => return HttpCode::NoResource,
        };
        if meta.mode() & 0o004 == 0 {
            return HttpCode::ForbiddenRequest;
        }
        if meta.is_dir() {
            return HttpCode::BadRequest;
        }

        self.file_size = meta.len() as usize;
        if self.file_size > 0 {
            match MappedFile::map(&path, self.file_size) {
                Ok(map) => self.file = Some(map),
                Err(_) => return HttpCode::InternalError,
            }
        } else {
            self.file = None;
        }
        HttpCode::FileRequest
    }

    fn add_line(&mut self, line: &str) -> bool {
        if self.write_buf.len() + line.len() + 2 > WRITE_BUFFER_SIZE {
            return false;
        }
        self.write_buf.extend_from_slice(line.as_bytes());
        self.write_buf.extend_from_slice(b"\r\n");
        true
    }

    fn build_headers(&mut self, status: u16, title: &str, content_len: usize) -> bool {
        self.write_buf.clear();
        self.add_line(&format!("HTTP/1.1 {} {}", status, title))
            && self.add_line(&format!(
                "Date: {}",
                httpdate::fmt_http_date(SystemTime::now())
            ))
            && self.add_line(&format!("Content-Length: {}", content_len))
            && self.add_line(&format!(
                "Connection: {}",
                if self.linger { "keep-alive" } else { "close" }
            ))
            && self.add_line("")
    }

    fn build_body_response(&mut self, status: u16, title: &str, body: &[u8]) -> bool {
        if !self.build_headers(status, title, body.len()) {
            return false;
        }
        if self.write_buf.len() + body.len() > WRITE_BUFFER_SIZE {
            return false;
        }
        self.write_buf.extend_from_slice(body);
        self.file = None;
        self.header_len = self.write_buf.len();
        self.bytes_to_send = self.write_buf.len();
        self.bytes_have_send = 0;
        true
    }

    /// Turn a parse outcome into wire bytes in the write buffer (and a
    /// mapped file for successful static responses).
    pub fn process_write(&mut self, code: HttpCode) -> bool {
        match code {
            HttpCode::InternalError => {
                self.build_body_response(500, ERROR_500_TITLE, ERROR_500_FORM.as_bytes())
            }
            HttpCode::BadRequest => {
                self.build_body_response(400, ERROR_400_TITLE, ERROR_400_FORM.as_bytes())
            }
            HttpCode::NoResource => {
                self.build_body_response(404, ERROR_404_TITLE, ERROR_404_FORM.as_bytes())
            }
            HttpCode::ForbiddenRequest => {
                self.build_body_response(403, ERROR_403_TITLE, ERROR_403_FORM.as_bytes())
            }
            HttpCode::FileRequest => {
                if self.file_size > 0 {
                    if !self.build_headers(200, OK_200_TITLE, self.file_size) {
                        return false;
                    }
                    self.header_len = self.write_buf.len();
                    self.bytes_to_send = self.header_len + self.file_size;
                    self.bytes_have_send = 0;
                    true
                } else {
                    self.build_body_response(200, OK_200_TITLE, EMPTY_FILE_BODY.as_bytes())
                }
            }
            HttpCode::NoRequest | HttpCode::GetRequest => false,
        }
    }

    /// Transmit the pending response with vectored writes, tracking progress
    /// by cumulative byte count across headers and mapped file. Returns
    /// false when the connection should be evicted, either on error or after
    /// a completed non-keep-alive response.
    pub fn write_response(&mut self) -> bool {
        if self.bytes_to_send == 0 {
            self.rearm(EPOLLIN);
            self.reset_for_next_request();
            return true;
        }
        loop {
            let result = {
                let header_rest = if self.bytes_have_send < self.header_len {
                    &self.write_buf[self.bytes_have_send..self.header_len]
                } else {
                    &[][..]
                };
                let file_rest = match &self.file {
                    Some(map) if self.bytes_have_send >= self.header_len => {
                        &map.as_slice()[self.bytes_have_send - self.header_len..]
                    }
                    Some(map) => map.as_slice(),
                    None => &[][..],
                };
                let mut segments: Vec<&[u8]> = Vec::with_capacity(2);
                if !header_rest.is_empty() {
                    segments.push(header_rest);
                }
                if !file_rest.is_empty() {
                    segments.push(file_rest);
                }
                syscalls::writev_nonblocking(self.fd, &segments)
            };
            match result {
                Ok(n) => {
                    self.bytes_have_send += n;
                    if self.bytes_have_send >= self.bytes_to_send {
                        self.file = None;
                        self.rearm(EPOLLIN);
                        if self.linger {
                            self.reset_for_next_request();
                            return true;
                        }
                        return false;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.rearm(EPOLLOUT);
                    return true;
                }
                Err(_) => {
                    self.file = None;
                    return false;
                }
            }
        }
    }

    /// One full request cycle off the already-read bytes: parse, resolve,
    /// build the response, then ask for writability. A response that cannot
    /// be assembled degrades to a canned 500, never a worker-side close.
    pub fn process(&mut self, db: Option<&mut DbConn>) {
        let code = self.process_read(db);
        if code == HttpCode::NoRequest {
            self.rearm(EPOLLIN);
            return;
        }
        if !self.process_write(code) {
            self.file = None;
            self.build_body_response(500, ERROR_500_TITLE, ERROR_500_FORM.as_bytes());
        }
        self.rearm(EPOLLOUT);
    }

    fn rearm(&self, base: u32) {
        let events = syscalls::conn_events(base, self.mode, true);
        if let Err(e) = self.epoll.modify(self.fd, self.fd as u64, events) {
            log_debug!(self.logger, "rearm failed for fd {}: {}", self.fd, e);
        }
    }

    #[cfg(test)]
    fn feed(&mut self, data: &[u8]) {
        if self.read_idx + data.len() > self.read_buf.len() {
            self.read_buf.resize(self.read_idx + data.len(), 0);
        }
        self.read_buf[self.read_idx..self.read_idx + data.len()].copy_from_slice(data);
        self.read_idx += data.len();
    }
}

impl Drop for HttpConn {
    fn drop(&mut self) {
        // The connection owns its descriptor; closing here, on the final
        // handle drop, is what makes eviction safe while a worker still
        // holds the other handle.
        if self.fd >= 0 {
            syscalls::close_fd(self.fd);
        }
    }
}

fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    if line.len() >= name.len() && line[..name.len()].eq_ignore_ascii_case(name) {
        Some(line[name.len()..].trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgi::DefaultCgi;
    use std::path::Path;

    fn scratch_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("minnow-conn-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_conn(root: &Path) -> HttpConn {
        let logger = Arc::new(Logger::disabled());
        HttpConn::new(
            -1,
            "127.0.0.1:4000".parse().unwrap(),
            Arc::new(Epoll::new().unwrap()),
            TriggerMode::Level,
            root.to_path_buf(),
            Arc::new(DefaultCgi::new(root.to_path_buf(), logger.clone())),
            logger,
        )
    }

    #[test]
    fn get_root_serves_default_document() {
        let root = scratch_root("get");
        fs::write(root.join(DEFAULT_DOCUMENT), "<html>judge</html>").unwrap();
        let mut conn = test_conn(&root);
        conn.feed(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n");

        assert_eq!(conn.process_read(None), HttpCode::FileRequest);
        assert_eq!(conn.url, format!("/{}", DEFAULT_DOCUMENT));
        assert_eq!(conn.host(), "localhost");
        assert!(conn.linger);
        assert_eq!(conn.file.as_ref().unwrap().as_slice(), b"<html>judge</html>");

        assert!(conn.process_write(HttpCode::FileRequest));
        let headers = String::from_utf8(conn.write_buf.clone()).unwrap();
        assert!(headers.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(headers.contains("Content-Length: 18\r\n"));
        assert!(headers.contains("Connection: keep-alive\r\n"));
        assert_eq!(conn.bytes_to_send, conn.header_len + 18);
    }

    #[test]
    fn request_line_without_version_is_bad() {
        let root = scratch_root("noversion");
        let mut conn = test_conn(&root);
        conn.feed(b"GET /\r\n\r\n");
        assert_eq!(conn.process_read(None), HttpCode::BadRequest);
    }

    #[test]
    fn http10_is_rejected() {
        let root = scratch_root("http10");
        let mut conn = test_conn(&root);
        conn.feed(b"GET / HTTP/1.0\r\n\r\n");
        assert_eq!(conn.process_read(None), HttpCode::BadRequest);
    }

    #[test]
    fn absolute_url_is_stripped_to_path() {
        let root = scratch_root("absurl");
        fs::write(root.join("page.html"), "x").unwrap();
        let mut conn = test_conn(&root);
        conn.feed(b"GET http://example.com/page.html HTTP/1.1\r\nHost: example.com\r\n\r\n");
        assert_eq!(conn.process_read(None), HttpCode::FileRequest);
        assert_eq!(conn.url, "/page.html");
    }

    #[test]
    fn partial_body_waits_then_completes() {
        let root = scratch_root("body");
        fs::write(root.join("logError.html"), "<html>retry</html>").unwrap();
        let mut conn = test_conn(&root);
        let body = b"user=a&password=b";
        conn.feed(
            format!(
                "POST /log.cgi HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n",
                body.len()
            )
            .as_bytes(),
        );
        conn.feed(&body[..10]);
        assert_eq!(conn.process_read(None), HttpCode::NoRequest);

        conn.feed(&body[10..]);
        // Unknown user lands on the login error page.
        assert_eq!(conn.process_read(None), HttpCode::FileRequest);
        assert_eq!(conn.url, "/logError.html");
        assert_eq!(conn.body, body);
    }

    #[test]
    fn missing_file_gets_canned_404() {
        let root = scratch_root("missing");
        let mut conn = test_conn(&root);
        conn.feed(b"GET /nope.html HTTP/1.1\r\nHost: x\r\n\r\n");
        let code = conn.process_read(None);
        assert_eq!(code, HttpCode::NoResource);

        assert!(conn.process_write(code));
        let response = String::from_utf8(conn.write_buf.clone()).unwrap();
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(response.contains(&format!("Content-Length: {}\r\n", ERROR_404_FORM.len())));
        assert!(response.ends_with(ERROR_404_FORM));
        assert_eq!(conn.bytes_to_send, conn.write_buf.len());
    }

    #[test]
    fn directory_target_is_bad_request() {
        let root = scratch_root("dir");
        fs::create_dir_all(root.join("sub")).unwrap();
        let mut conn = test_conn(&root);
        conn.feed(b"GET /sub HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(conn.process_read(None), HttpCode::BadRequest);
    }

    #[test]
    fn empty_file_gets_placeholder_body() {
        let root = scratch_root("empty");
        fs::write(root.join("empty.html"), "").unwrap();
        let mut conn = test_conn(&root);
        conn.feed(b"GET /empty.html HTTP/1.1\r\nHost: x\r\n\r\n");
        let code = conn.process_read(None);
        assert_eq!(code, HttpCode::FileRequest);
        assert!(conn.file.is_none());

        assert!(conn.process_write(code));
        let response = String::from_utf8(conn.write_buf.clone()).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with(EMPTY_FILE_BODY));
    }

    #[test]
    fn line_reader_resumes_across_split_terminator() {
        let root = scratch_root("split");
        fs::write(root.join(DEFAULT_DOCUMENT), "ok").unwrap();
        let mut conn = test_conn(&root);
        conn.feed(b"GET / HTTP/1.1\r");
        assert_eq!(conn.process_read(None), HttpCode::NoRequest);
        conn.feed(b"\nHost: x\r\n\r\n");
        assert_eq!(conn.process_read(None), HttpCode::FileRequest);
    }

    #[test]
    fn stray_carriage_return_is_bad_line() {
        let root = scratch_root("badline");
        let mut conn = test_conn(&root);
        conn.feed(b"GET / HTTP/1.1\rX\n\r\n");
        assert_eq!(conn.process_read(None), HttpCode::BadRequest);
    }

    #[test]
    fn reset_clears_request_state() {
        let root = scratch_root("reset");
        fs::write(root.join(DEFAULT_DOCUMENT), "ok").unwrap();
        let mut conn = test_conn(&root);
        conn.feed(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n");
        assert_eq!(conn.process_read(None), HttpCode::FileRequest);
        conn.reset_for_next_request();
        assert_eq!(conn.read_idx, 0);
        assert_eq!(conn.check_state, CheckState::RequestLine);
        assert!(conn.url.is_empty());
        assert!(conn.file.is_none());
        assert!(!conn.linger);
    }
}
