//! Minimal HTTP/1.1 framing for the stream transport
//!
//! Requests are always sent with `Connection: close`, so a response is
//! complete once the server closes the stream.

use super::{OutboundRequest, TransportError, TransportResponse};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;

/// Headers written by the framing itself; caller copies are dropped
const MANAGED_HEADERS: [HeaderName; 3] = [
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
];

pub(crate) fn encode_request(
    request: &OutboundRequest,
    user_agent: &str,
) -> Result<Vec<u8>, TransportError> {
    let url = &request.url;
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidRequest("Missing host in URL".to_string()))?;
    let host_header = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let query = url.query().map(|q| format!("?{}", q)).unwrap_or_default();

    let mut head = format!(
        "{} {}{} HTTP/1.1\r\n\
         Host: {}\r\n\
         Connection: close\r\n",
        request.method,
        url.path(),
        query,
        host_header
    );

    if !request.headers.contains_key(header::USER_AGENT) {
        head.push_str(&format!("User-Agent: {}\r\n", user_agent));
    }
    if !request.headers.contains_key(header::ACCEPT) {
        head.push_str("Accept: */*\r\n");
    }

    for (name, value) in request.headers.iter() {
        if MANAGED_HEADERS.contains(name) {
            continue;
        }
        let value = value.to_str().map_err(|_| {
            TransportError::InvalidRequest(format!("Header {} is not visible ASCII", name))
        })?;
        head.push_str(&format!("{}: {}\r\n", name, value));
    }

    let bytes = match &request.body {
        Some(body) => {
            head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
            let mut bytes = head.into_bytes();
            bytes.extend_from_slice(body);
            bytes
        }
        None => {
            head.push_str("\r\n");
            head.into_bytes()
        }
    };
    Ok(bytes)
}

pub(crate) fn parse_response(raw: &[u8]) -> Result<TransportResponse, TransportError> {
    let header_end = find(raw, b"\r\n\r\n")
        .ok_or_else(|| invalid("Invalid HTTP response format"))?;

    let head = std::str::from_utf8(&raw[..header_end])
        .map_err(|_| invalid("Response headers are not UTF-8"))?;
    let body = &raw[header_end + 4..];

    let mut lines = head.split("\r\n");
    let status_line = lines.next().ok_or_else(|| invalid("Missing status line"))?;
    let status = parse_status_line(status_line)?;

    let mut headers = HeaderMap::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| invalid(&format!("Malformed header line: {}", line)))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| invalid(&format!("Bad header name: {}", e)))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| invalid(&format!("Bad header value: {}", e)))?;
        headers.append(name, value);
    }

    let chunked = headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("chunked"));

    let body = if chunked {
        decode_chunked(body)?
    } else if let Some(length) = headers.get(header::CONTENT_LENGTH) {
        let length: usize = length
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| invalid("Bad Content-Length"))?;
        if body.len() < length {
            return Err(invalid(&format!(
                "Truncated body: expected {} bytes, got {}",
                length,
                body.len()
            )));
        }
        body[..length].to_vec()
    } else {
        body.to_vec()
    };

    Ok(TransportResponse {
        status,
        headers,
        body,
    })
}

fn parse_status_line(line: &str) -> Result<StatusCode, TransportError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(invalid(&format!("Unsupported status line: {}", line)));
    }

    parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| invalid(&format!("Bad status code in: {}", line)))
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut out = Vec::new();

    loop {
        let line_end = find(data, b"\r\n").ok_or_else(|| invalid("Truncated chunk header"))?;
        let size_line = std::str::from_utf8(&data[..line_end])
            .map_err(|_| invalid("Chunk header is not UTF-8"))?;
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| invalid(&format!("Bad chunk size: {}", size_hex)))?;
        data = &data[line_end + 2..];

        if size == 0 {
            return Ok(out);
        }
        let framed = size
            .checked_add(2)
            .ok_or_else(|| invalid(&format!("Bad chunk size: {}", size_hex)))?;
        if data.len() < framed {
            return Err(invalid("Truncated chunk"));
        }
        out.extend_from_slice(&data[..size]);
        if &data[size..size + 2] != b"\r\n" {
            return Err(invalid("Chunk not terminated by CRLF"));
        }
        data = &data[size + 2..];
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn invalid(message: &str) -> TransportError {
    TransportError::InvalidResponse(message.to_string())
}
