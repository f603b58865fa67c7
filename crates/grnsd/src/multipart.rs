//! Minimal multipart/form-data parsing for attachment uploads.
//!
//! The body is buffered up to the configured memory ceiling before parsing;
//! larger uploads should use the `application/octet-stream` path, which
//! streams. Only the features the upload endpoint needs are implemented:
//! `name`, `filename`, and per-part `Content-Type`.

use grns_service::ServiceError;

/// One decoded part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Extracts the boundary parameter from a `Content-Type` header value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mut pieces = content_type.split(';');
    let kind = pieces.next()?.trim();
    if !kind.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    for piece in pieces {
        let piece = piece.trim();
        if let Some(value) = piece.strip_prefix("boundary=") {
            let value = value.trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_owned());
            }
        }
    }
    None
}

/// Parses a buffered multipart body into its parts.
pub fn parse(body: &[u8], boundary: &str) -> Result<Vec<Part>, ServiceError> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();

    // Split on the delimiter; the first chunk is a preamble, the last chunk
    // follows the closing "--" marker.
    let mut sections = split_on(body, delimiter.as_bytes());
    if sections.len() < 2 {
        return Err(ServiceError::invalid("malformed multipart body"));
    }
    sections.remove(0);

    for section in sections {
        // The closing delimiter is "--<boundary>--".
        if section.starts_with(b"--") {
            break;
        }
        // Each section starts with CRLF after the delimiter and ends with
        // CRLF before the next one.
        let section = strip_prefix(section, b"\r\n");
        let section = strip_suffix(section, b"\r\n");

        let Some(header_end) = find(section, b"\r\n\r\n") else {
            return Err(ServiceError::invalid("multipart part without headers"));
        };
        let (header_bytes, rest) = section.split_at(header_end);
        let data = rest[4..].to_vec();

        let mut name = String::new();
        let mut filename = None;
        let mut content_type = None;

        for line in std::str::from_utf8(header_bytes)
            .map_err(|_| ServiceError::invalid("multipart headers are not UTF-8"))?
            .split("\r\n")
        {
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if field.eq_ignore_ascii_case("Content-Disposition") {
                for param in value.split(';') {
                    let param = param.trim();
                    if let Some(v) = param.strip_prefix("name=") {
                        name = v.trim_matches('"').to_owned();
                    } else if let Some(v) = param.strip_prefix("filename=") {
                        filename = Some(v.trim_matches('"').to_owned());
                    }
                }
            } else if field.eq_ignore_ascii_case("Content-Type") {
                content_type = Some(value.to_owned());
            }
        }

        if name.is_empty() {
            return Err(ServiceError::invalid(
                "multipart part missing a field name",
            ));
        }

        parts.push(Part {
            name,
            filename,
            content_type,
            data,
        });
    }

    Ok(parts)
}

// ---------------------------------------------------------------------------
// Byte-slice helpers
// ---------------------------------------------------------------------------

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut sections = Vec::new();
    let mut rest = haystack;
    while let Some(pos) = find(rest, needle) {
        sections.push(&rest[..pos]);
        rest = &rest[pos + needle.len()..];
    }
    sections.push(rest);
    sections
}

fn strip_prefix<'a>(bytes: &'a [u8], prefix: &[u8]) -> &'a [u8] {
    bytes.strip_prefix(prefix).unwrap_or(bytes)
}

fn strip_suffix<'a>(bytes: &'a [u8], suffix: &[u8]) -> &'a [u8] {
    bytes.strip_suffix(suffix).unwrap_or(bytes)
}
