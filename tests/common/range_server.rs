//! Minimal HTTP/1.1 server for downloader integration tests.
//!
//! Serves one static body with HEAD and Range GET support, logs every
//! request, and can misbehave on demand: hide the content length, refuse
//! ranges, or drop the connection partway through a body.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// HEAD returns 405 when false
    pub head_allowed: bool,
    /// GET honours Range and returns 206 when true
    pub support_ranges: bool,
    /// Advertise `Accept-Ranges: bytes`
    pub advertise_ranges: bool,
    /// Send `Content-Length`; when false the body is EOF-terminated
    pub send_content_length: bool,
    /// Close the connection after this many body bytes
    pub drop_body_after: Option<u64>,
    /// Apply `drop_body_after` to the first GET only
    pub drop_only_first: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            advertise_ranges: true,
            send_content_length: true,
            drop_body_after: None,
            drop_only_first: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestLog {
    pub method: String,
    pub range: Option<String>,
}

pub struct RangeServer {
    pub url: String,
    pub requests: Arc<Mutex<Vec<RequestLog>>>,
}

impl RangeServer {
    /// Received Range header values, in arrival order.
    #[allow(dead_code)]
    pub fn ranges(&self) -> Vec<Option<String>> {
        self.requests.lock().unwrap().iter().map(|r| r.range.clone()).collect()
    }

    #[allow(dead_code)]
    pub fn get_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == "GET")
            .count()
    }
}

#[allow(dead_code)]
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with(body, ServerOptions::default())
}

/// Start a server in a background thread; it lives until the process
/// exits. Returns the base URL plus the shared request log.
pub fn start_with(body: Vec<u8>, opts: ServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let requests: Arc<Mutex<Vec<RequestLog>>> = Arc::new(Mutex::new(Vec::new()));
    let first_get_done = Arc::new(AtomicBool::new(false));

    let log = Arc::clone(&requests);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let log = Arc::clone(&log);
            let first_get_done = Arc::clone(&first_get_done);
            thread::spawn(move || handle(stream, &body, opts, &log, &first_get_done));
        }
    });

    RangeServer {
        url: format!("http://127.0.0.1:{}/payload.bin", port),
        requests,
    }
}

fn handle(
    mut stream: TcpStream,
    body: &[u8],
    opts: ServerOptions,
    log: &Mutex<Vec<RequestLog>>,
    first_get_done: &AtomicBool,
) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(5)));

    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, range) = parse_request(request);
    log.lock().unwrap().push(RequestLog {
        method: method.clone(),
        range: range.clone(),
    });

    let total = body.len() as u64;
    let accept_ranges = if opts.advertise_ranges && opts.support_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if method.eq_ignore_ascii_case("HEAD") {
        if !opts.head_allowed {
            let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
            return;
        }
        let content_length = if opts.send_content_length {
            format!("Content-Length: {}\r\n", total)
        } else {
            String::new()
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\n{}{}Connection: close\r\n\r\n",
            content_length, accept_ranges
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n");
        return;
    }

    let parsed_range = if opts.support_ranges {
        range.as_deref().and_then(parse_range_value)
    } else {
        None
    };

    let (status, slice, content_range) = match parsed_range {
        Some((start, end_incl)) => {
            let start = start.min(total);
            let end_incl = end_incl.unwrap_or(total.saturating_sub(1)).min(total.saturating_sub(1));
            if start > end_incl {
                let _ = stream.write_all(
                    format!(
                        "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\n\r\n",
                        total
                    )
                    .as_bytes(),
                );
                return;
            }
            let slice = &body[start as usize..=end_incl as usize];
            (
                "206 Partial Content",
                slice,
                format!("Content-Range: bytes {}-{}/{}\r\n", start, end_incl, total),
            )
        }
        None => ("200 OK", body, String::new()),
    };

    let content_length = if opts.send_content_length {
        format!("Content-Length: {}\r\n", slice.len())
    } else {
        String::new()
    };
    let response = format!(
        "HTTP/1.1 {}\r\n{}{}{}Connection: close\r\n\r\n",
        status, content_length, content_range, accept_ranges
    );
    if stream.write_all(response.as_bytes()).is_err() {
        return;
    }

    let truncate = match opts.drop_body_after {
        Some(limit) if !opts.drop_only_first || !first_get_done.swap(true, Ordering::SeqCst) => {
            Some(limit as usize)
        }
        _ => None,
    };
    match truncate {
        Some(limit) if limit < slice.len() => {
            let _ = stream.write_all(&slice[..limit]);
            // Dropping the stream here resets the connection mid-body
        }
        _ => {
            let _ = stream.write_all(slice);
        }
    }
}

fn parse_request(request: &str) -> (String, Option<String>) {
    let mut lines = request.lines();
    let method = lines
        .next()
        .and_then(|line| line.split_whitespace().next())
        .unwrap_or("")
        .to_string();
    let range = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("range"))
        .map(|(_, value)| value.trim().to_string());
    (method, range)
}

/// Parse `bytes=a-b` / `bytes=a-` into (start, Some(end)|None).
fn parse_range_value(value: &str) -> Option<(u64, Option<u64>)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some((start, end))
}
