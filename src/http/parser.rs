use crate::http::request::{Method, Request};
use std::collections::HashMap;

/// Upper bound on the request head; anything larger is rejected.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Upper bound on a request body, declared or de-chunked.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    InvalidChunk,
    /// `Transfer-Encoding` other than a final `chunked`, or sent together
    /// with `Content-Length`.
    UnsupportedFraming,
    HeadersTooLarge,
    BodyTooLarge,
    Incomplete,
}

/// Parse one request off the front of `buf`.
///
/// Returns the request and how many bytes it occupied, so pipelined
/// requests can be parsed from the remainder. `Incomplete` means more
/// bytes are needed.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let head_len = match buf.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(end) => end,
        None if buf.len() > MAX_HEADER_BYTES => return Err(ParseError::HeadersTooLarge),
        None => return Err(ParseError::Incomplete),
    };

    let head = std::str::from_utf8(&buf[..head_len]).map_err(|_| ParseError::InvalidRequest)?;
    let (request_line, header_lines) = head.split_once("\r\n").unwrap_or((head, ""));

    let (method, path, version) = parse_request_line(request_line)?;
    let mut headers = parse_headers(header_lines)?;

    let body_start = head_len + 4;
    let rest = &buf[body_start..];

    let (body, body_len) = if is_chunked(&headers)? {
        let (body, consumed) = decode_chunked(rest)?;
        // The body is re-framed by length from here on.
        headers.retain(|name, _| !name.eq_ignore_ascii_case("Transfer-Encoding"));
        headers.insert("Content-Length".to_string(), body.len().to_string());
        (body, consumed)
    } else {
        let len = content_length(&headers)?;
        let body = rest.get(..len).ok_or(ParseError::Incomplete)?;
        (body.to_vec(), len)
    };

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body,
    };

    let consumed = body_start
        .checked_add(body_len)
        .ok_or(ParseError::BodyTooLarge)?;
    Ok((request, consumed))
}

/// `METHOD SP target SP HTTP/x.y`
fn parse_request_line(line: &str) -> Result<(Method, &str, &str), ParseError> {
    let mut parts = line.split_whitespace();

    let (Some(method), Some(path), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::InvalidRequest);
    };

    if !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method).ok_or(ParseError::InvalidMethod)?;
    Ok((method, path, version))
}

fn parse_headers(lines: &str) -> Result<HashMap<String, String>, ParseError> {
    let mut headers = HashMap::new();

    for line in lines.split("\r\n").filter(|l| !l.is_empty()) {
        let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ParseError::InvalidHeader);
        }
        headers.insert(name.to_string(), value.trim().to_string());
    }

    Ok(headers)
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn content_length(headers: &HashMap<String, String>) -> Result<usize, ParseError> {
    let Some(raw) = find_header(headers, "Content-Length") else {
        return Ok(0);
    };

    let len = raw
        .parse::<usize>()
        .map_err(|_| ParseError::InvalidContentLength)?;
    if len > MAX_BODY_BYTES {
        return Err(ParseError::BodyTooLarge);
    }
    Ok(len)
}

/// Whether the body uses chunked framing. Any other transfer coding, or a
/// `Content-Length` next to `Transfer-Encoding`, cannot be framed safely.
fn is_chunked(headers: &HashMap<String, String>) -> Result<bool, ParseError> {
    let Some(codings) = find_header(headers, "Transfer-Encoding") else {
        return Ok(false);
    };

    let last = codings.rsplit(',').next().unwrap_or_default().trim();
    if !last.eq_ignore_ascii_case("chunked") || find_header(headers, "Content-Length").is_some() {
        return Err(ParseError::UnsupportedFraming);
    }
    Ok(true)
}

/// Decode a chunked body at the front of `buf`.
///
/// Returns the payload and the bytes consumed, trailer section included.
/// Chunk extensions and trailer fields are discarded.
fn decode_chunked(buf: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
    let incomplete = || {
        if buf.len() > MAX_BODY_BYTES + MAX_HEADER_BYTES {
            ParseError::BodyTooLarge
        } else {
            ParseError::Incomplete
        }
    };

    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let line = next_line(&buf[pos..]).ok_or_else(incomplete)?;
        let size = parse_chunk_size(line)?;
        pos += line.len() + 2;

        if size == 0 {
            break;
        }
        if body.len().saturating_add(size) > MAX_BODY_BYTES {
            return Err(ParseError::BodyTooLarge);
        }

        let data = buf.get(pos..pos + size + 2).ok_or_else(incomplete)?;
        if !data.ends_with(b"\r\n") {
            return Err(ParseError::InvalidChunk);
        }
        body.extend_from_slice(&data[..size]);
        pos += size + 2;
    }

    // Trailer fields, up to the empty line.
    loop {
        let line = next_line(&buf[pos..]).ok_or_else(incomplete)?;
        pos += line.len() + 2;
        if line.is_empty() {
            return Ok((body, pos));
        }
    }
}

/// The bytes before the next CRLF.
fn next_line(buf: &[u8]) -> Option<&[u8]> {
    buf.windows(2).position(|w| w == b"\r\n").map(|end| &buf[..end])
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidChunk)?;
    let digits = line.split(';').next().unwrap_or_default().trim();

    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidChunk);
    }
    usize::from_str_radix(digits, 16).map_err(|_| ParseError::InvalidChunk)
}
