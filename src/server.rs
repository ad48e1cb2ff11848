//! HTTP API
//!
//! A small HTTP/1.1 server over raw tokio sockets: one request per
//! connection, JSON in and out, CORS for the browser UI.

use crate::chat::{ChatRequest, ChatService};
use crate::error::GenieError;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REQUEST_BYTES: usize = 1_000_000;

pub struct AppState {
    pub chat: ChatService,
    /// Allowed browser origins; empty allows any.
    pub cors_origins: Vec<String>,
}

/// Parsed request line, headers of interest and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub origin: Option<&'a str>,
    pub body: &'a str,
}

impl<'a> HttpRequest<'a> {
    pub fn parse(raw: &'a str) -> Option<Self> {
        let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
        let mut lines = head.lines();
        let mut request_line = lines.next()?.split_whitespace();
        let method = request_line.next()?;
        let target = request_line.next()?;
        let path = target.split('?').next().unwrap_or(target);

        let origin = lines.find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("origin")
                .then(|| value.trim())
        });

        Some(Self {
            method,
            path,
            origin,
            body,
        })
    }
}

pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "Server listening");
    loop {
        let (stream, addr) = listener.accept().await?;
        debug!(%addr, "New connection");
        tokio::spawn(handle_connection(stream, Arc::clone(&state)));
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<AppState>) {
    let mut buffer = Vec::new();
    let mut temp_buf = [0; 8192];

    let read_result = timeout(READ_TIMEOUT, async {
        loop {
            match stream.read(&mut temp_buf).await {
                Ok(0) => break,
                Ok(n) => {
                    buffer.extend_from_slice(&temp_buf[..n]);
                    if request_complete(&buffer, n < temp_buf.len()) {
                        break;
                    }
                    if buffer.len() > MAX_REQUEST_BYTES {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    })
    .await;

    match read_result {
        Err(_) => {
            warn!("Request read timeout");
            return;
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to read from stream");
            return;
        }
        Ok(Ok(())) => {}
    }

    if buffer.is_empty() {
        return;
    }

    let response = if buffer.len() > MAX_REQUEST_BYTES {
        error_response(413, "Request body too large", "payload_too_large", None)
    } else {
        match String::from_utf8(buffer) {
            Ok(request) => handle_request(&state, &request).await,
            Err(_) => error_response(400, "Request is not valid UTF-8", "invalid_request", None),
        }
    };

    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!(error = %e, "Failed to write response");
    }
}

/// Headers are in and, when a `Content-Length` is present, so is the body.
fn request_complete(buffer: &[u8], short_read: bool) -> bool {
    let Ok(text) = std::str::from_utf8(buffer) else {
        return false;
    };
    let Some(headers_end) = text.find("\r\n\r\n").map(|i| i + 4) else {
        return false;
    };
    match extract_content_length(&text[..headers_end]) {
        Some(content_length) => buffer.len() >= headers_end + content_length,
        None => short_read,
    }
}

fn extract_content_length(head: &str) -> Option<usize> {
    head.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

pub async fn handle_request(state: &AppState, request: &str) -> String {
    let Some(req) = HttpRequest::parse(request) else {
        return error_response(400, "Malformed HTTP request", "invalid_request", None);
    };
    let origin = allowed_origin(&state.cors_origins, req.origin);
    let origin = origin.as_deref();

    match (req.method, req.path) {
        ("OPTIONS", _) => create_response(200, "OK", "", origin),
        ("GET", "/health") => create_response(
            200,
            "OK",
            &serde_json::json!({"status": "ok", "service": "sqlgenie"}).to_string(),
            origin,
        ),
        ("GET", "/tables") => json_response(&state.chat.schema().tables_response(), origin),
        ("GET", "/schema") => json_response(state.chat.schema(), origin),
        ("POST", "/chat") => {
            let question = match serde_json::from_str::<ChatRequest>(req.body) {
                Ok(body) => body.question,
                Err(e) => {
                    let err = GenieError::InvalidRequest(format!("Invalid JSON body: {}", e));
                    return genie_error_response(&err, origin);
                }
            };
            match state.chat.ask(&question).await {
                Ok(answer) => json_response(&answer, origin),
                Err(err) => {
                    if err.status_code() >= 500 {
                        error!(error = %err, "Chat request failed");
                    }
                    genie_error_response(&err, origin)
                }
            }
        }
        _ => error_response(404, "Not found", "not_found", origin),
    }
}

/// The value for `Access-Control-Allow-Origin`, if any.
fn allowed_origin(allowed: &[String], origin: Option<&str>) -> Option<String> {
    if allowed.is_empty() {
        return Some("*".to_string());
    }
    origin
        .filter(|o| allowed.iter().any(|a| a == o))
        .map(str::to_string)
}

fn json_response<T: serde::Serialize + ?Sized>(value: &T, origin: Option<&str>) -> String {
    match serde_json::to_string(value) {
        Ok(body) => create_response(200, "OK", &body, origin),
        Err(e) => genie_error_response(&GenieError::Json(e), origin),
    }
}

fn genie_error_response(err: &GenieError, origin: Option<&str>) -> String {
    error_response(err.status_code(), &err.to_string(), err.kind(), origin)
}

fn error_response(status: u16, message: &str, kind: &str, origin: Option<&str>) -> String {
    let body = serde_json::json!({"error": message, "kind": kind}).to_string();
    create_response(status, status_text(status), &body, origin)
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        413 => "Payload Too Large",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Internal Server Error",
    }
}

fn create_response(status: u16, status_text: &str, body: &str, origin: Option<&str>) -> String {
    let cors = match origin {
        Some(origin) => format!(
            "Access-Control-Allow-Origin: {}\r\n\
             Vary: Origin\r\n\
             Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
             Access-Control-Allow-Headers: Content-Type\r\n",
            origin
        ),
        None => String::new(),
    };
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         {}\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        cors,
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_line_origin_and_body() {
        let raw = "POST /chat?x=1 HTTP/1.1\r\nHost: a\r\norigin: http://ui\r\n\r\n{\"question\":\"q\"}";
        let req = HttpRequest::parse(raw).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/chat");
        assert_eq!(req.origin, Some("http://ui"));
        assert_eq!(req.body, "{\"question\":\"q\"}");
    }

    #[test]
    fn request_completion_waits_for_body() {
        let head = b"POST /chat HTTP/1.1\r\nContent-Length: 4\r\n\r\n";
        assert!(!request_complete(head, false));
        let mut full = head.to_vec();
        full.extend_from_slice(b"abcd");
        assert!(request_complete(&full, false));
        assert!(!request_complete(b"GET / HTTP/1.1\r\n", true));
    }

    #[test]
    fn cors_origin_is_echoed_only_when_allowed() {
        let allowed = vec!["http://localhost:5173".to_string()];
        assert_eq!(
            allowed_origin(&allowed, Some("http://localhost:5173")).as_deref(),
            Some("http://localhost:5173")
        );
        assert_eq!(allowed_origin(&allowed, Some("http://evil")), None);
        assert_eq!(allowed_origin(&[], None).as_deref(), Some("*"));
    }

    #[test]
    fn response_has_length_and_optional_cors() {
        let response = create_response(200, "OK", "{}", None);
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Length: 2\r\n"));
        assert!(!response.contains("Access-Control-Allow-Origin"));
        assert!(response.ends_with("\r\n\r\n{}"));
    }
}
