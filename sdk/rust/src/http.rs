//! The network primitive.
//!
//! Everything the SDK sends goes through a [`Fetch`] implementation. The
//! default [`TcpFetcher`] speaks plain HTTP/1.1 over a TCP socket; tests and
//! embedding applications can plug in their own, such as
//! [`MockFetcher`](crate::mock::MockFetcher).

use crate::error::{ErrorCode, MrsError, MrsResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt;

/// HTTP methods used by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Sets a header, replacing an existing one with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Looks up a header, ignoring case.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The URL without its query string.
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or_default()
    }

    /// Decoded query parameters, in order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        match self.url.split_once('?') {
            Some((_, query)) => url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// The body parsed as JSON.
    pub fn json_body(&self) -> Option<serde_json::Value> {
        self.body
            .as_deref()
            .and_then(|body| serde_json::from_str(body).ok())
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: default_reason(status).to_string(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// A 200 response with a JSON body.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(200, value.to_string())
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parses the body.
    pub fn parse<T: DeserializeOwned>(&self) -> MrsResult<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            MrsError::deserialize(format!(
                "Failed to parse response: {}. Body: {}",
                e,
                &self.body[..floor_char_boundary(&self.body, 200)]
            ))
        })
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    let mut end = s.len().min(max);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

fn default_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        412 => "Precondition Failed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}

/// Sends a single request.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> MrsResult<HttpResponse>;
}

/// HTTP/1.1 client over plain TCP sockets.
///
/// Timeouts are applied by the caller around the whole exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpFetcher;

impl TcpFetcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Fetch for TcpFetcher {
    async fn fetch(&self, request: HttpRequest) -> MrsResult<HttpResponse> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;

        let (host, port, path) = parse_url(&request.url)?;

        let mut stream = TcpStream::connect(format!("{}:{}", host, port))
            .await
            .map_err(|e| MrsError::network(format!("Connection failed: {}", e)))?;

        stream
            .write_all(encode_request(&request, &host, port, &path).as_bytes())
            .await
            .map_err(|e| MrsError::network(format!("Write failed: {}", e)))?;

        let mut response_bytes = Vec::new();
        stream
            .read_to_end(&mut response_bytes)
            .await
            .map_err(|e| MrsError::network(format!("Read failed: {}", e)))?;

        parse_http_response(&response_bytes)
    }
}

/// Serializes the request line, headers and body.
fn encode_request(request: &HttpRequest, host: &str, port: u16, path: &str) -> String {
    let body = request.body.as_deref().unwrap_or_default();
    let host = if port == 80 {
        host.to_string()
    } else {
        format!("{}:{}", host, port)
    };
    let mut head = format!(
        "{} {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Accept: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n",
        request.method,
        path,
        host,
        body.len()
    );
    for (key, value) in &request.headers {
        head.push_str(&format!("{}: {}\r\n", key, value));
    }
    head.push_str("\r\n");
    head.push_str(body);
    head
}

/// Parses a URL into host, port, and path.
fn parse_url(url: &str) -> MrsResult<(String, u16, String)> {
    let url = url.trim();

    let without_protocol = if url.starts_with("https://") {
        return Err(MrsError::new(
            ErrorCode::HttpsNotSupported,
            "HTTPS is not supported by the built-in HTTP client. Use a TLS terminating proxy or provide a custom Fetch implementation.",
        ));
    } else if let Some(rest) = url.strip_prefix("http://") {
        rest
    } else {
        return Err(MrsError::new(
            ErrorCode::InvalidUrl,
            format!("Invalid URL \"{}\": expected an absolute http:// URL", url),
        ));
    };

    let (host_port, path) = match without_protocol.find('/') {
        Some(slash_pos) => (
            &without_protocol[..slash_pos],
            &without_protocol[slash_pos..],
        ),
        None => (without_protocol, "/"),
    };

    let (host, port) = match host_port.rfind(':') {
        Some(colon_pos) => {
            let port_str = &host_port[colon_pos + 1..];
            let port = port_str.parse().map_err(|_| {
                MrsError::new(ErrorCode::InvalidUrl, format!("Invalid port: {}", port_str))
            })?;
            (host_port[..colon_pos].to_string(), port)
        }
        None => (host_port.to_string(), 80),
    };

    if host.is_empty() {
        return Err(MrsError::new(
            ErrorCode::InvalidUrl,
            format!("Invalid URL \"{}\": missing host", url),
        ));
    }

    Ok((host, port, path.to_string()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parses a raw HTTP response.
///
/// The head is read as ASCII. The body is reassembled as bytes and decoded
/// once, so multi-byte characters may straddle chunk boundaries.
fn parse_http_response(response: &[u8]) -> MrsResult<HttpResponse> {
    let (head, body) = match find(response, b"\r\n\r\n") {
        Some(pos) => (&response[..pos], &response[pos + 4..]),
        None => {
            let pos = find(response, b"\n\n")
                .ok_or_else(|| MrsError::invalid_response("Could not find response body"))?;
            (&response[..pos], &response[pos + 2..])
        }
    };
    let head = String::from_utf8_lossy(head);

    let mut lines = head.lines();
    let status_line = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| MrsError::invalid_response("Empty response"))?;

    // HTTP/1.1 200 OK
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next();
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            MrsError::invalid_response(format!("Malformed status line: {}", status_line))
        })?;
    let status_text = parts.next().unwrap_or_default().trim().to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let chunked = headers.iter().any(|(k, v)| {
        k.eq_ignore_ascii_case("transfer-encoding") && v.eq_ignore_ascii_case("chunked")
    });
    let body = if chunked {
        parse_chunked_body(body)
    } else {
        body.to_vec()
    };
    let body = String::from_utf8(body).map_err(|e| {
        MrsError::invalid_response(format!("Response body is not valid UTF-8: {}", e))
    })?;

    Ok(HttpResponse {
        status,
        status_text,
        headers,
        body,
    })
}

/// Reassembles a chunked transfer encoding body.
fn parse_chunked_body(body: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(body.len());
    let mut remaining = body;

    while let Some(size_end) = remaining.iter().position(|&b| b == b'\n') {
        let size_line = String::from_utf8_lossy(&remaining[..size_end]);
        // Chunk extensions follow a ';'.
        let size_str = size_line.split(';').next().unwrap_or_default().trim();
        let chunk_size = usize::from_str_radix(size_str, 16).unwrap_or(0);
        if chunk_size == 0 {
            break;
        }

        let data_start = size_end + 1;
        if data_start + chunk_size > remaining.len() {
            result.extend_from_slice(&remaining[data_start..]);
            break;
        }

        result.extend_from_slice(&remaining[data_start..data_start + chunk_size]);
        remaining = &remaining[data_start + chunk_size..];

        if let Some(rest) = remaining.strip_prefix(b"\r\n") {
            remaining = rest;
        } else if let Some(rest) = remaining.strip_prefix(b"\n") {
            remaining = rest;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url() {
        let (host, port, path) = parse_url("http://localhost:8444/svc/db/t?q=1").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 8444);
        assert_eq!(path, "/svc/db/t?q=1");

        let (host, port, path) = parse_url("http://example.com").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 80);
        assert_eq!(path, "/");
    }

    #[test]
    fn test_parse_url_rejections() {
        assert_eq!(
            parse_url("https://example.com/").unwrap_err().code,
            ErrorCode::HttpsNotSupported
        );
        assert_eq!(
            parse_url("/relative/path").unwrap_err().code,
            ErrorCode::InvalidUrl
        );
        assert_eq!(
            parse_url("http://host:port/").unwrap_err().code,
            ErrorCode::InvalidUrl
        );
    }

    #[test]
    fn test_parse_http_response() {
        let raw = b"HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\n\r\n{\"message\":\"nope\"}";
        let response = parse_http_response(raw).unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.status_text, "Not Found");
        assert_eq!(response.header_value("content-type"), Some("application/json"));
        assert_eq!(response.body, "{\"message\":\"nope\"}");
        assert!(!response.is_success());
    }

    #[test]
    fn test_parse_chunked_response() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\n{\"a\"\r\n4\r\n:10}\r\n0\r\n\r\n";
        let response = parse_http_response(raw).unwrap();
        assert!(response.is_success());
        assert_eq!(response.body, "{\"a\":10}");
    }

    #[test]
    fn test_chunk_boundary_inside_character() {
        // "é" is C3 A9, split across the two chunks.
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n7\r\n{\"a\":\"\xC3\r\n3\r\n\xA9\"}\r\n0\r\n\r\n";
        let response = parse_http_response(raw).unwrap();
        assert_eq!(response.body, "{\"a\":\"\u{e9}\"}");
        assert_eq!(
            response.parse::<serde_json::Value>().unwrap(),
            serde_json::json!({ "a": "\u{e9}" })
        );
    }

    #[test]
    fn test_multibyte_plain_body() {
        let mut raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n".to_vec();
        raw.extend_from_slice("{\"name\":\"Zo\u{eb} \u{65e5}\u{672c}\"}".as_bytes());
        let response = parse_http_response(&raw).unwrap();
        assert_eq!(response.body, "{\"name\":\"Zo\u{eb} \u{65e5}\u{672c}\"}");
    }

    #[test]
    fn test_invalid_utf8_body() {
        let raw = b"HTTP/1.1 200 OK\r\n\r\n{\"a\":\"\xFF\"}";
        let err = parse_http_response(raw).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidResponse);

        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\n\xC3\xC3\r\n0\r\n\r\n";
        let err = parse_http_response(raw).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidResponse);
    }

    #[test]
    fn test_host_header_carries_port() {
        let request = HttpRequest::new(Method::Put, "http://h:8080/svc/f").body("{}");
        let encoded = encode_request(&request, "h", 8080, "/svc/f");
        assert!(encoded.starts_with("PUT /svc/f HTTP/1.1\r\nHost: h:8080\r\n"));
        assert!(encoded.contains("Content-Length: 2\r\n"));
        assert!(encoded.ends_with("\r\n\r\n{}"));

        let request = HttpRequest::new(Method::Get, "http://h/svc");
        assert!(encode_request(&request, "h", 80, "/svc").contains("Host: h\r\n"));
    }

    #[test]
    fn test_request_helpers() {
        let request = HttpRequest::new(Method::Get, "http://h/svc/t?q=%7B%22a%22%3A1%7D&limit=5")
            .header("Authorization", "Bearer x")
            .header("authorization", "Bearer y");

        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header_value("AUTHORIZATION"), Some("Bearer y"));
        assert_eq!(request.path(), "http://h/svc/t");
        assert_eq!(
            request.query_pairs(),
            vec![
                ("q".to_string(), "{\"a\":1}".to_string()),
                ("limit".to_string(), "5".to_string())
            ]
        );
    }
}
