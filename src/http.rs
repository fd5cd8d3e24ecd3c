//! Hand-rolled HTTP request parsing and response writing
//!
//! This server deliberately avoids an HTTP framework: the transport is a
//! single-pass header/body splitter over the accepted byte stream. Malformed
//! request lines and header lines degrade to fallback values instead of
//! aborting the connection.

use crate::{Error, Result};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// HTTP header terminator
pub const HEADER_TERMINATOR: &[u8; 4] = b"\r\n\r\n";

/// Upper bound for best-effort body reads past the header terminator
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Sentinel method substituted for malformed request lines
pub const UNKNOWN_METHOD: &str = "UNKNOWN";

/// A parsed HTTP request
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    /// Header names are case-folded to lowercase
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Dispatch target for a parsed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `GET /sse`: open a long-lived SSE stream
    SseOpen,
    /// `POST /messages/...`: submit a JSON-RPC command to a session
    PostMessage,
    /// Everything else
    Fallback,
}

impl RawRequest {
    pub fn route(&self) -> Route {
        if self.method == "GET" && self.path == "/sse" {
            Route::SseOpen
        } else if self.method == "POST" && self.path.starts_with("/messages/") {
            Route::PostMessage
        } else {
            Route::Fallback
        }
    }

    /// Case-folded header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// First occurrence of a query-string parameter, percent-decoded
    pub fn query_param(&self, key: &str) -> Option<String> {
        let (_, query) = self.path.split_once('?')?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

fn content_length(head: &str) -> Option<usize> {
    head.split("\r\n").skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Read one HTTP request from the stream.
///
/// Accumulates bytes until the header terminator appears, then tops up the
/// body when a plausible Content-Length says more is in flight. A peer that
/// closes before sending anything yields `Ok(None)`. Bytes that never form a
/// complete header block are still parsed as-is, mirroring the single-pass
/// splitter contract.
pub async fn read_request<C>(stream: &mut C) -> Result<Option<RawRequest>>
where
    C: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    let terminator = loop {
        if let Some(idx) = find_terminator(&buf) {
            break Some(idx);
        }
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::Transport(format!("request read failed: {}", e)))?;
        if n == 0 {
            break find_terminator(&buf);
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    if buf.is_empty() {
        return Ok(None);
    }

    if let Some(idx) = terminator {
        let head = String::from_utf8_lossy(&buf[..idx]).into_owned();
        if let Some(expected) = content_length(&head).filter(|&n| n <= MAX_BODY_BYTES) {
            while buf.len() - (idx + HEADER_TERMINATOR.len()) < expected {
                let n = stream
                    .read(&mut chunk)
                    .await
                    .map_err(|e| Error::Transport(format!("body read failed: {}", e)))?;
                if n == 0 {
                    debug!("Peer closed before full body arrived");
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }

    Ok(Some(parse_request(&buf)))
}

/// Parse raw request bytes into a [`RawRequest`].
///
/// Invalid byte sequences are replaced rather than rejected; a malformed
/// request line becomes `UNKNOWN / HTTP/1.1`; header lines without a colon
/// are skipped.
pub fn parse_request(bytes: &[u8]) -> RawRequest {
    let text = String::from_utf8_lossy(bytes);
    let (head, body) = match text.split_once("\r\n\r\n") {
        Some((head, body)) => (head, body),
        None => (text.as_ref(), ""),
    };

    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.splitn(3, ' ');
    let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(path), Some(version)) if !method.is_empty() => (
            method.to_string(),
            path.to_string(),
            version.to_string(),
        ),
        _ => (
            UNKNOWN_METHOD.to_string(),
            "/".to_string(),
            "HTTP/1.1".to_string(),
        ),
    };

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        match line.split_once(':') {
            Some((key, value)) => {
                headers.insert(key.trim().to_lowercase(), value.trim().to_string());
            }
            None => continue,
        }
    }

    RawRequest {
        method,
        path,
        version,
        headers,
        body: body.to_string(),
    }
}

/// Write a plain-text HTTP response and leave the connection to the caller
pub async fn write_plain<C>(stream: &mut C, status: &str, body: &str) -> std::io::Result<()>
where
    C: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

/// Response headers opening an SSE stream
pub fn sse_response_headers() -> &'static str {
    "HTTP/1.1 200 OK\r\n\
     Cache-Control: no-store\r\n\
     Connection: keep-alive\r\n\
     X-Accel-Buffering: no\r\n\
     Content-Type: text/event-stream; charset=utf-8\r\n\
     \r\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_complete_post_request() {
        let raw = b"POST /messages/?session_id=abc123 HTTP/1.1\r\n\
                    Host: localhost\r\n\
                    Content-Type: application/json\r\n\
                    Content-Length: 24\r\n\
                    \r\n\
                    {\"jsonrpc\":\"2.0\",\"id\":1}";
        let request = parse_request(raw);
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/messages/?session_id=abc123");
        assert_eq!(request.version, "HTTP/1.1");
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.body, "{\"jsonrpc\":\"2.0\",\"id\":1}");
        assert_eq!(request.route(), Route::PostMessage);
        assert_eq!(request.query_param("session_id").as_deref(), Some("abc123"));
    }

    #[test]
    fn malformed_request_line_degrades_to_sentinel() {
        let request = parse_request(b"NONSENSE\r\nHost: x\r\n\r\n");
        assert_eq!(request.method, UNKNOWN_METHOD);
        assert_eq!(request.path, "/");
        assert_eq!(request.version, "HTTP/1.1");
        assert_eq!(request.route(), Route::Fallback);
    }

    #[test]
    fn header_names_are_case_folded() {
        let request = parse_request(b"GET /sse HTTP/1.1\r\nCONTENT-TYPE: text/plain\r\n\r\n");
        assert_eq!(request.header("content-type"), Some("text/plain"));
        assert_eq!(request.header("Content-Type"), Some("text/plain"));
        assert_eq!(request.route(), Route::SseOpen);
    }

    #[test]
    fn colonless_header_lines_are_skipped() {
        let request =
            parse_request(b"GET / HTTP/1.1\r\nthis line has no separator\r\nx-ok: yes\r\n\r\n");
        assert_eq!(request.header("x-ok"), Some("yes"));
        assert_eq!(request.headers.len(), 1);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() {
        let mut raw = b"GET /sse HTTP/1.1\r\nx-junk: ".to_vec();
        raw.extend_from_slice(&[0xff, 0xfe]);
        raw.extend_from_slice(b"\r\n\r\n");
        let request = parse_request(&raw);
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/sse");
        assert!(request.header("x-junk").is_some());
    }

    #[test]
    fn sse_path_must_match_exactly() {
        assert_eq!(parse_request(b"GET /sse HTTP/1.1\r\n\r\n").route(), Route::SseOpen);
        assert_eq!(
            parse_request(b"GET /sse/extra HTTP/1.1\r\n\r\n").route(),
            Route::Fallback
        );
        assert_eq!(
            parse_request(b"POST /sse HTTP/1.1\r\n\r\n").route(),
            Route::Fallback
        );
    }

    #[test]
    fn query_param_handles_missing_and_extra_params() {
        let request = parse_request(b"POST /messages/?a=1&session_id=s42&b=2 HTTP/1.1\r\n\r\n");
        assert_eq!(request.query_param("session_id").as_deref(), Some("s42"));
        assert_eq!(request.query_param("a").as_deref(), Some("1"));
        assert!(request.query_param("missing").is_none());

        let no_query = parse_request(b"POST /messages/ HTTP/1.1\r\n\r\n");
        assert!(no_query.query_param("session_id").is_none());
    }

    #[tokio::test]
    async fn read_request_returns_none_on_immediate_close() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let request = read_request(&mut server).await.unwrap();
        assert!(request.is_none());
    }

    #[tokio::test]
    async fn read_failures_surface_as_transport_errors() {
        let mut stream = tokio_test::io::Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))
            .build();
        let err = read_request(&mut stream).await.unwrap_err();
        match err {
            Error::Transport(message) => assert!(message.contains("request read failed")),
            other => panic!("expected Transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_request_assembles_split_writes() {
        use tokio::io::AsyncWriteExt;

        let (mut client, mut server) = tokio::io::duplex(4096);
        let writer = tokio::spawn(async move {
            client
                .write_all(b"POST /messages/?session_id=x HTTP/1.1\r\nContent-Length: 4\r\n\r\n")
                .await
                .unwrap();
            // Body lags behind the header block
            client.write_all(b"true").await.unwrap();
        });

        let request = read_request(&mut server).await.unwrap().unwrap();
        writer.await.unwrap();
        assert_eq!(request.body, "true");
    }

    #[tokio::test]
    async fn write_plain_includes_length_and_body() {
        use tokio::io::AsyncReadExt;

        let (mut client, mut server) = tokio::io::duplex(4096);
        write_plain(&mut server, "404 Not Found", "Invalid session")
            .await
            .unwrap();
        drop(server);

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(out.contains("Content-Length: 15\r\n"));
        assert!(out.ends_with("\r\n\r\nInvalid session"));
    }
}
