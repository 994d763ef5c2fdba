//! Connector (C4): issues a request with retry/backoff, applies header
//! defaults, detects charset, and hands the downloader a streaming body.
//!
//! §9's "session/driver plug-in" note becomes [`HttpClient`]: the rest of
//! the crate depends only on this trait, never on `curl` directly, so a
//! test double can stand in for the network.

pub mod charset;

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use crate::mission::Method;
use crate::retry::{classify_http_status, ErrorKind, RetryDecision, RetryPolicy};

/// HTTP method as seen by the connector (HEAD is connector-internal; the
/// mission model only ever names GET/POST).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Head,
}

impl From<Method> for HttpMethod {
    fn from(m: Method) -> Self {
        match m {
            Method::Get => HttpMethod::Get,
            Method::Post => HttpMethod::Post,
        }
    }
}

/// A request the connector should open.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub url: String,
    pub method: HttpMethod,
    /// Header overrides, merged over the connector's derived defaults
    /// (`Referer`, `Host`) without clobbering a caller-supplied value.
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl RequestSpec {
    pub fn new(url: impl Into<String>, method: HttpMethod) -> Self {
        RequestSpec {
            url: url.into(),
            method,
            headers: HashMap::new(),
            body: None,
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_range(mut self, range_header: &str) -> Self {
        self.headers.insert("Range".to_string(), range_header.to_string());
        self
    }
}

/// Headers relevant to the rest of the engine, parsed out of the raw
/// response.
#[derive(Debug, Clone)]
pub struct ResponseHeaders {
    pub status: u32,
    pub content_length: Option<u64>,
    pub accept_ranges: bool,
    pub content_disposition: Option<String>,
    pub content_type: Option<String>,
    /// Response charset, per §4.4's discovery rule: `Content-Type`'s
    /// `charset=`, else an HTML `<meta charset>` scan of the body prefix
    /// for `text/html` responses, else `"utf-8"`. Informational only — C1
    /// uses it when decoding a plain (non-RFC5987) `filename=` token,
    /// never to transcode the body itself (out of scope per spec.md §1).
    pub encoding: String,
}

impl Default for ResponseHeaders {
    fn default() -> Self {
        ResponseHeaders {
            status: 0,
            content_length: None,
            accept_ranges: false,
            content_disposition: None,
            content_type: None,
            encoding: "utf-8".to_string(),
        }
    }
}

/// A successfully opened response: headers plus a channel of body chunks.
///
/// Chunks arrive in ~64 KiB increments (§4.5.1); the channel closes when
/// the transfer finishes, successfully or not — the final `Result` on the
/// channel (a zero-length `Ok` chunk is never sent; EOF is channel
/// closure) is surfaced by `join()`.
pub struct OpenStream {
    pub headers: ResponseHeaders,
    pub chunks: Receiver<std::io::Result<Vec<u8>>>,
    join: std::thread::JoinHandle<()>,
}

impl OpenStream {
    /// Waits for the background transfer thread to finish. Callers should
    /// drain `chunks` to completion (or drop the receiver to abort reading,
    /// which also unblocks the writer side) before calling this.
    pub fn join(self) {
        let _ = self.join.join();
    }
}

/// Why a connector attempt failed to produce a stream at all.
#[derive(Debug, Clone)]
pub enum ConnectFailure {
    Transport(String),
    Status { code: u32, message: String },
}

/// A pluggable HTTP client. The default implementation wraps `curl`; tests
/// can substitute an in-process fake.
pub trait HttpClient: Send + Sync {
    /// Opens a single request attempt (no retry). Returns as soon as
    /// response headers are available; the body streams afterward through
    /// [`OpenStream::chunks`].
    fn open(&self, spec: &RequestSpec) -> Result<OpenStream, ConnectFailure>;
}

/// Derives `Referer`/`Host` defaults for a request without overwriting a
/// caller-supplied header of the same name (§4.4 step 2).
pub fn apply_header_defaults(spec: &mut RequestSpec, page_url: Option<&str>) {
    let parsed = url::Url::parse(&spec.url).ok();

    if !spec.headers.keys().any(|k| k.eq_ignore_ascii_case("host")) {
        if let Some(host) = parsed.as_ref().and_then(|u| u.host_str()) {
            spec.headers.insert("Host".to_string(), host.to_string());
        }
    }

    if !spec.headers.keys().any(|k| k.eq_ignore_ascii_case("referer")) {
        let referer = page_url.map(|s| s.to_string()).or_else(|| {
            parsed
                .as_ref()
                .map(|u| format!("{}://{}", u.scheme(), u.host_str().unwrap_or("")))
        });
        if let Some(referer) = referer {
            spec.headers.insert("Referer".to_string(), referer);
        }
    }
}

/// Outcome of the full retry loop (§4.4 step 4-5).
pub enum ConnectOutcome {
    Opened(OpenStream),
    /// No response was ever obtained across the whole retry budget.
    Failed(String),
}

/// Attempts to open `spec` up to `policy.max_attempts` times, sleeping
/// `interval` (overriding the policy's own backoff, per the spec's
/// fixed-interval retry model) between attempts. Short-circuits on HTTP
/// 403/404 without consuming the remaining retry budget.
pub fn open_with_retry(
    client: &dyn HttpClient,
    spec: &RequestSpec,
    max_attempts: u32,
    interval: Duration,
) -> ConnectOutcome {
    let policy = RetryPolicy {
        max_attempts: max_attempts.max(1),
        base_delay: interval,
        max_delay: interval,
    };

    let mut last_error = String::new();
    let mut attempt = 1;
    loop {
        match client.open(spec) {
            Ok(stream) => return ConnectOutcome::Opened(stream),
            Err(ConnectFailure::Status { code, message }) => {
                let kind = classify_http_status(code);
                if kind == ErrorKind::Other {
                    // 403/404: terminal, never retried.
                    return ConnectOutcome::Failed(message);
                }
                last_error = message;
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => return ConnectOutcome::Failed(last_error),
                    RetryDecision::RetryAfter(_) => {
                        std::thread::sleep(interval);
                    }
                }
            }
            Err(ConnectFailure::Transport(message)) => {
                last_error = message;
                match policy.decide(attempt, ErrorKind::Connection) {
                    RetryDecision::NoRetry => return ConnectOutcome::Failed(last_error),
                    RetryDecision::RetryAfter(_) => {
                        std::thread::sleep(interval);
                    }
                }
            }
        }
        attempt += 1;
    }
}

/// Default [`HttpClient`] backed by libcurl. Each `open` call performs
/// the transfer on a dedicated thread so headers can be handed back to
/// the caller while the body is still streaming.
pub struct CurlConnector;

impl CurlConnector {
    pub fn new() -> Self {
        CurlConnector
    }
}

impl Default for CurlConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for CurlConnector {
    fn open(&self, spec: &RequestSpec) -> Result<OpenStream, ConnectFailure> {
        let (header_tx, header_rx) = mpsc::sync_channel::<ResponseHeaders>(1);
        let (chunk_tx, chunk_rx) = mpsc::channel::<std::io::Result<Vec<u8>>>();

        let spec = spec.clone();
        let join = std::thread::spawn(move || {
            if let Err(e) = run_transfer(&spec, &header_tx, &chunk_tx) {
                let _ = chunk_tx.send(Err(std::io::Error::new(std::io::ErrorKind::Other, e)));
            }
        });

        match header_rx.recv() {
            Ok(headers) => {
                if !(200..300).contains(&headers.status) {
                    join.join().ok();
                    return Err(ConnectFailure::Status {
                        code: headers.status,
                        message: format!("status: {}", headers.status),
                    });
                }
                Ok(OpenStream {
                    headers,
                    chunks: chunk_rx,
                    join,
                })
            }
            Err(_) => {
                // Header channel closed before sending: the transfer failed
                // before getting a response at all.
                let message = match chunk_rx.recv() {
                    Ok(Err(e)) => e.to_string(),
                    _ => "connection failed".to_string(),
                };
                join.join().ok();
                Err(ConnectFailure::Transport(message))
            }
        }
    }
}

fn run_transfer(
    spec: &RequestSpec,
    header_tx: &mpsc::SyncSender<ResponseHeaders>,
    chunk_tx: &mpsc::Sender<std::io::Result<Vec<u8>>>,
) -> Result<(), String> {
    let mut easy = curl::easy::Easy::new();
    easy.url(&spec.url).map_err(|e| e.to_string())?;
    easy.follow_location(true).map_err(|e| e.to_string())?;
    easy.connect_timeout(spec.connect_timeout)
        .map_err(|e| e.to_string())?;
    easy.timeout(spec.read_timeout).map_err(|e| e.to_string())?;
    // §4.5.1: pump in 64 KiB increments.
    easy.buffer_size(64 * 1024).map_err(|e| e.to_string())?;

    match spec.method {
        HttpMethod::Head => {
            easy.nobody(true).map_err(|e| e.to_string())?;
        }
        HttpMethod::Post => {
            easy.post(true).map_err(|e| e.to_string())?;
            if let Some(body) = &spec.body {
                easy.post_field_size(body.len() as u64)
                    .map_err(|e| e.to_string())?;
            }
        }
        HttpMethod::Get => {}
    }

    let mut list = curl::easy::List::new();
    for (k, v) in &spec.headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))
            .map_err(|e| e.to_string())?;
    }
    easy.http_headers(list).map_err(|e| e.to_string())?;

    let collected_headers: std::cell::RefCell<Vec<String>> = std::cell::RefCell::new(Vec::new());
    let status_code: std::cell::Cell<u32> = std::cell::Cell::new(0);
    let headers_sent: std::cell::Cell<bool> = std::cell::Cell::new(false);
    let mut post_body = spec.body.clone().unwrap_or_default();
    let mut post_pos = 0usize;

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = std::str::from_utf8(data) {
                    let line = s.trim_end();
                    if line.is_empty() {
                        return true;
                    }
                    if let Some(code) = parse_status_line(line) {
                        // A redirect hop restarts the header block; only the
                        // final hop's headers matter.
                        collected_headers.borrow_mut().clear();
                        status_code.set(code);
                    } else {
                        collected_headers.borrow_mut().push(line.to_string());
                    }
                }
                true
            })
            .map_err(|e| e.to_string())?;

        if spec.method == HttpMethod::Post {
            transfer
                .read_function(move |buf| {
                    let remaining = &post_body[post_pos..];
                    let n = remaining.len().min(buf.len());
                    buf[..n].copy_from_slice(&remaining[..n]);
                    post_pos += n;
                    Ok(n)
                })
                .map_err(|e| e.to_string())?;
        }

        transfer
            .write_function(|data| {
                if !headers_sent.get() {
                    headers_sent.set(true);
                    let mut headers =
                        parse_response_headers(status_code.get(), &collected_headers.borrow());
                    headers.encoding =
                        charset::discover_encoding(headers.content_type.as_deref(), Some(data));
                    // A full channel here means the caller already gave up;
                    // `chunk_tx.send` failing below is what actually aborts.
                    let _ = header_tx.try_send(headers);
                }
                if chunk_tx.send(Ok(data.to_vec())).is_err() {
                    // Receiver dropped: task was canceled. Abort the transfer.
                    return Ok(0);
                }
                Ok(data.len())
            })
            .map_err(|e| e.to_string())?;

        transfer.perform().map_err(|e| e.to_string())?;
    }

    // Bodyless responses (e.g. a HEAD, or a GET with no body) never hit the
    // write_function; make sure headers still reach the caller.
    if !headers_sent.get() {
        let headers = parse_response_headers(status_code.get(), &collected_headers.borrow());
        let _ = header_tx.try_send(headers);
    }

    Ok(())
}

/// Parses an HTTP status line (`"HTTP/1.1 200 OK"`) into its status code.
fn parse_status_line(line: &str) -> Option<u32> {
    if !line.starts_with("HTTP/") {
        return None;
    }
    line.split_whitespace().nth(1)?.parse().ok()
}

fn parse_response_headers(status: u32, lines: &[String]) -> ResponseHeaders {
    let mut headers = ResponseHeaders {
        status,
        ..Default::default()
    };
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            headers.content_length = value.parse().ok();
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            headers.accept_ranges = value.eq_ignore_ascii_case("bytes");
        } else if name.eq_ignore_ascii_case("content-disposition") {
            headers.content_disposition = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-type") {
            headers.content_type = Some(value.to_string());
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_defaults_derive_host_and_referer() {
        let mut spec = RequestSpec::new("https://example.com/a/b", HttpMethod::Get);
        apply_header_defaults(&mut spec, None);
        assert_eq!(spec.headers.get("Host").map(String::as_str), Some("example.com"));
        assert_eq!(
            spec.headers.get("Referer").map(String::as_str),
            Some("https://example.com")
        );
    }

    #[test]
    fn header_defaults_do_not_override_caller_values() {
        let mut spec = RequestSpec::new("https://example.com/a", HttpMethod::Get);
        spec.headers.insert("Host".to_string(), "custom.example".to_string());
        apply_header_defaults(&mut spec, None);
        assert_eq!(spec.headers.get("Host").map(String::as_str), Some("custom.example"));
    }

    #[test]
    fn parse_response_headers_extracts_known_fields() {
        let lines = vec![
            "HTTP/1.1 200 OK".to_string(),
            "Content-Length: 30".to_string(),
            "Accept-Ranges: bytes".to_string(),
            "Content-Disposition: attachment; filename=\"g.txt\"".to_string(),
        ];
        let h = parse_response_headers(200, &lines);
        assert_eq!(h.content_length, Some(30));
        assert!(h.accept_ranges);
        assert!(h.content_disposition.unwrap().contains("g.txt"));
    }

    struct FailingClient;
    impl HttpClient for FailingClient {
        fn open(&self, _spec: &RequestSpec) -> Result<OpenStream, ConnectFailure> {
            Err(ConnectFailure::Transport("connection refused".to_string()))
        }
    }

    #[test]
    fn retry_loop_exhausts_budget_on_persistent_transport_failure() {
        let client = FailingClient;
        let spec = RequestSpec::new("https://example.invalid/", HttpMethod::Get);
        let outcome = open_with_retry(&client, &spec, 3, Duration::from_millis(0));
        match outcome {
            ConnectOutcome::Failed(msg) => assert!(msg.contains("connection refused")),
            ConnectOutcome::Opened(_) => panic!("expected failure"),
        }
    }

    struct NotFoundClient;
    impl HttpClient for NotFoundClient {
        fn open(&self, _spec: &RequestSpec) -> Result<OpenStream, ConnectFailure> {
            Err(ConnectFailure::Status {
                code: 404,
                message: "status: 404".to_string(),
            })
        }
    }

    #[test]
    fn retry_loop_short_circuits_on_404() {
        let client = NotFoundClient;
        let spec = RequestSpec::new("https://example.invalid/missing", HttpMethod::Get);
        let outcome = open_with_retry(&client, &spec, 5, Duration::from_millis(0));
        match outcome {
            ConnectOutcome::Failed(msg) => assert!(msg.contains("404")),
            ConnectOutcome::Opened(_) => panic!("expected failure"),
        }
    }
}
