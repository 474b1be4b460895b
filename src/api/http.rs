use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 16 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|v| v.as_str())
    }
}

/// Why a request could not be read. Each maps to a response status.
#[derive(Debug)]
pub enum ReadError {
    /// Body larger than the configured limit.
    TooLarge(usize),
    /// POST without a usable Content-Length.
    LengthRequired,
    Malformed(anyhow::Error),
}

impl From<std::io::Error> for ReadError {
    fn from(err: std::io::Error) -> Self {
        ReadError::Malformed(err.into())
    }
}

/// Read one request, including a body of at most `max_body` bytes.
pub fn read_request(stream: &mut TcpStream, max_body: usize) -> Result<HttpRequest, ReadError> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = find(&data, b"\r\n\r\n", 0) {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(ReadError::Malformed(anyhow!("request headers too large")));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(ReadError::Malformed(anyhow!("connection closed mid-headers")));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| ReadError::Malformed(anyhow!("empty request")))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| ReadError::Malformed(anyhow!("missing method")))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| ReadError::Malformed(anyhow!("missing path")))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();

    let mut body = data[header_end + 4..].to_vec();
    let content_length = match headers.get("content-length") {
        Some(value) => Some(
            value
                .parse::<usize>()
                .map_err(|_| ReadError::Malformed(anyhow!("invalid content-length")))?,
        ),
        None => None,
    };
    match content_length {
        Some(len) if len > max_body => return Err(ReadError::TooLarge(len)),
        Some(len) => {
            if headers
                .get("expect")
                .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
            {
                stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
            }
            while body.len() < len {
                let n = stream.read(&mut buf)?;
                if n == 0 {
                    return Err(ReadError::Malformed(anyhow!("connection closed mid-body")));
                }
                body.extend_from_slice(&buf[..n]);
            }
            body.truncate(len);
        }
        None if method == "POST" => return Err(ReadError::LengthRequired),
        None => body.clear(),
    }

    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    })
}

pub fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status = status,
        reason = reason_phrase(status),
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        411 => "Length Required",
        413 => "Payload Too Large",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

/// Byte-level substring search starting at `from`.
pub fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}
