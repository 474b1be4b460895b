//! Minimal `multipart/form-data` parsing for image uploads.

use anyhow::{anyhow, Result};

use super::http::find;

/// One form-data part.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Part {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Extract the boundary parameter from a `multipart/form-data` content type.
pub fn boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let media_type = params.next()?.trim();
    if !media_type.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Split a form-data body into parts.
pub fn parse(body: &[u8], boundary: &str) -> Result<Vec<Part>> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut closing = b"\r\n".to_vec();
    closing.extend_from_slice(&delimiter);

    let start =
        find(body, &delimiter, 0).ok_or_else(|| anyhow!("multipart boundary not found"))?;
    let mut pos = start + delimiter.len();
    let mut parts = Vec::new();
    loop {
        if body[pos..].starts_with(b"--") {
            break;
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err(anyhow!("malformed multipart delimiter"));
        }
        pos += 2;

        let header_end =
            find(body, b"\r\n\r\n", pos).ok_or_else(|| anyhow!("unterminated part headers"))?;
        let headers = String::from_utf8_lossy(&body[pos..header_end]).to_string();
        let data_start = header_end + 4;
        let data_end =
            find(body, &closing, data_start).ok_or_else(|| anyhow!("unterminated multipart body"))?;

        let mut part = Part {
            data: body[data_start..data_end].to_vec(),
            ..Part::default()
        };
        for line in headers.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            if key == "content-disposition" {
                for param in value.split(';').skip(1) {
                    if let Some((k, v)) = param.trim().split_once('=') {
                        let v = v.trim().trim_matches('"').to_string();
                        match k.trim() {
                            "name" => part.name = Some(v),
                            "filename" => part.filename = Some(v),
                            _ => {}
                        }
                    }
                }
            } else if key == "content-type" {
                part.content_type = Some(value.trim().to_string());
            }
        }
        parts.push(part);
        pos = data_end + closing.len();
    }
    Ok(parts)
}

/// The uploaded file: the part named `field`, else the first part with a filename.
pub fn file_part(parts: Vec<Part>, field: &str) -> Option<Part> {
    let index = parts
        .iter()
        .position(|p| p.name.as_deref() == Some(field))
        .or_else(|| parts.iter().position(|p| p.filename.is_some()))?;
    parts.into_iter().nth(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "----meal1234";

    fn body(parts: &[(&str, Option<&str>, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, filename, content_type, data) in parts {
            out.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", name);
            if let Some(filename) = filename {
                disposition.push_str(&format!("; filename=\"{}\"", filename));
            }
            out.extend_from_slice(disposition.as_bytes());
            out.extend_from_slice(b"\r\n");
            if let Some(ct) = content_type {
                out.extend_from_slice(format!("Content-Type: {}\r\n", ct).as_bytes());
            }
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        out
    }

    #[test]
    fn extracts_boundary() {
        assert_eq!(
            boundary("multipart/form-data; boundary=----meal1234").as_deref(),
            Some("----meal1234")
        );
        assert_eq!(
            boundary("multipart/form-data; charset=utf-8; boundary=\"abc\"").as_deref(),
            Some("abc")
        );
        assert_eq!(boundary("application/json"), None);
        assert_eq!(boundary("multipart/form-data"), None);
    }

    #[test]
    fn parses_file_and_field_parts() {
        let data: &[u8] = &[0xFF, 0xD8, b'\r', b'\n', 0x00, 0xFF, 0xD9];
        let raw = body(&[
            ("note", None, None, &b"lunch"[..]),
            ("file", Some("meal.jpg"), Some("image/jpeg"), data),
        ]);
        let parts = parse(&raw, BOUNDARY).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name.as_deref(), Some("note"));
        assert_eq!(parts[0].data, b"lunch");

        let file = file_part(parts, "file").unwrap();
        assert_eq!(file.filename.as_deref(), Some("meal.jpg"));
        assert_eq!(file.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(file.data, data);
    }

    #[test]
    fn falls_back_to_first_file_part() {
        let raw = body(&[("upload", Some("x.png"), Some("image/png"), &b"png"[..])]);
        let part = file_part(parse(&raw, BOUNDARY).unwrap(), "file").unwrap();
        assert_eq!(part.name.as_deref(), Some("upload"));
    }

    #[test]
    fn rejects_missing_boundary() {
        assert!(parse(b"no boundary here", BOUNDARY).is_err());
    }

    #[test]
    fn rejects_truncated_body() {
        let raw = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\nabc",
            BOUNDARY
        );
        assert!(parse(raw.as_bytes(), BOUNDARY).is_err());
    }
}
