//! Meaningful-header extraction.
//!
//! # Responsibilities
//! - Classify a response's header pairs into the few signals the connection
//!   acts on: keep-alive hint, trailer announcement, content-length
//! - Detect conflicting `Content-Length` repetitions
//!
//! # Design Decisions
//! - Pure function over the ordered pair list; the result does not depend on
//!   header order
//! - Content-length presence is tracked separately from its value, because 0
//!   is also the "nothing declared" sentinel of the length enforcer

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// Signals extracted from a response header block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeaningfulHeaders {
    /// Raw `Keep-Alive` value, unless the response also said `Connection: close`.
    pub keep_alive: Option<Bytes>,
    /// Raw `Trailer` value.
    pub trailers: Option<Bytes>,
    /// Declared body length; 0 when absent or malformed.
    pub content_length: u64,
    /// Whether a well-formed `Content-Length` header was present.
    pub content_length_present: bool,
    /// `Connection: close` was among the connection directives.
    pub connection_close: bool,
    /// `Connection: keep-alive` was among the connection directives.
    pub connection_keep_alive: bool,
}

/// Header combinations the caller must surface as a protocol violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("conflicting content-length values {first} and {other}")]
    ConflictingContentLength { first: u64, other: u64 },
}

/// Extract the keep-alive, trailer and content-length signals from an
/// ordered list of header name/value pairs.
pub fn extract_meaningful_headers<N, V>(headers: &[(N, V)]) -> Result<MeaningfulHeaders, HeaderError>
where
    N: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let mut out = MeaningfulHeaders::default();
    let mut keep_alive = None;

    for (name, value) in headers {
        let name = name.as_ref();
        let value = value.as_ref();

        if name.eq_ignore_ascii_case(b"keep-alive") {
            keep_alive = Some(Bytes::copy_from_slice(value));
        } else if name.eq_ignore_ascii_case(b"trailer") {
            out.trailers = Some(Bytes::copy_from_slice(value));
        } else if name.eq_ignore_ascii_case(b"content-length") {
            let Some(parsed) = parse_content_length(value) else {
                continue;
            };
            if out.content_length_present {
                if parsed != out.content_length {
                    return Err(HeaderError::ConflictingContentLength {
                        first: out.content_length,
                        other: parsed,
                    });
                }
            } else {
                out.content_length = parsed;
                out.content_length_present = true;
            }
        } else if name.eq_ignore_ascii_case(b"connection") {
            for directive in value.split(|b| *b == b',') {
                let directive = directive.trim_ascii();
                if directive.eq_ignore_ascii_case(b"close") {
                    out.connection_close = true;
                } else if directive.eq_ignore_ascii_case(b"keep-alive") {
                    out.connection_keep_alive = true;
                }
            }
        }
    }

    if !out.connection_close {
        out.keep_alive = keep_alive;
    }
    Ok(out)
}

/// Parse a `Content-Length` value: ASCII digits only, optional surrounding
/// whitespace, no sign.
pub fn parse_content_length(value: &[u8]) -> Option<u64> {
    let value = value.trim_ascii();
    if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(value).ok()?.parse().ok()
}

/// Read the `timeout=N` parameter (seconds) of a `Keep-Alive` hint.
pub fn parse_keep_alive_timeout(hint: &[u8]) -> Option<Duration> {
    let text = std::str::from_utf8(hint).ok()?;
    text.split(',')
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("timeout"))
        .and_then(|(_, secs)| secs.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Split a `Trailer` header value into lowercase field names.
pub fn trailer_names(value: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(value)
        .split(',')
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&'static str, &'static str)]) -> Vec<(Bytes, Bytes)> {
        raw.iter()
            .map(|(n, v)| (Bytes::from_static(n.as_bytes()), Bytes::from_static(v.as_bytes())))
            .collect()
    }

    #[test]
    fn keep_alive_and_length() {
        let headers = pairs(&[
            ("Date", "Thu, 01 Jan 1970 00:00:01 GMT"),
            ("Connection", "keep-alive"),
            ("Keep-Alive", "timeout=5"),
            ("Content-Length", "2"),
        ]);
        let out = extract_meaningful_headers(&headers).unwrap();
        assert_eq!(out.keep_alive, Some(Bytes::from_static(b"timeout=5")));
        assert_eq!(out.trailers, None);
        assert_eq!(out.content_length, 2);
        assert!(out.content_length_present);
        assert!(out.connection_keep_alive);
    }

    #[test]
    fn trailer_only() {
        let out = extract_meaningful_headers(&pairs(&[("Trailer", "content-length")])).unwrap();
        assert_eq!(out.keep_alive, None);
        assert_eq!(out.trailers, Some(Bytes::from_static(b"content-length")));
        assert_eq!(out.content_length, 0);
        assert!(!out.content_length_present);
    }

    #[test]
    fn chunked_with_trailer_and_keep_alive() {
        let headers = pairs(&[
            ("Trailer", "content-length"),
            ("Date", "Sun, 18 Apr 2021 06:35:54 GMT"),
            ("Connection", "keep-alive"),
            ("Keep-Alive", "timeout=5"),
            ("Transfer-Encoding", "chunked"),
        ]);
        let out = extract_meaningful_headers(&headers).unwrap();
        assert_eq!(out.keep_alive, Some(Bytes::from_static(b"timeout=5")));
        assert_eq!(out.trailers, Some(Bytes::from_static(b"content-length")));
        assert_eq!(out.content_length, 0);
    }

    #[test]
    fn empty_yields_defaults() {
        let none: Vec<(Bytes, Bytes)> = Vec::new();
        assert_eq!(extract_meaningful_headers(&none).unwrap(), MeaningfulHeaders::default());
    }

    #[test]
    fn order_does_not_matter() {
        let base = [
            ("Keep-Alive", "timeout=5"),
            ("Trailer", "x-checksum"),
            ("Content-Length", "7"),
            ("Date", "now"),
            ("CONNECTION", "Keep-Alive"),
        ];
        let expected = extract_meaningful_headers(&pairs(&base)).unwrap();

        // every rotation and the reversal
        for shift in 0..base.len() {
            let mut rotated = base.to_vec();
            rotated.rotate_left(shift);
            assert_eq!(extract_meaningful_headers(&pairs(&rotated)).unwrap(), expected);
            rotated.reverse();
            assert_eq!(extract_meaningful_headers(&pairs(&rotated)).unwrap(), expected);
        }
    }

    #[test]
    fn conflicting_content_length_is_an_error() {
        let headers = pairs(&[("Content-Length", "4"), ("content-length", "5")]);
        assert_eq!(
            extract_meaningful_headers(&headers),
            Err(HeaderError::ConflictingContentLength { first: 4, other: 5 })
        );

        let same = pairs(&[("Content-Length", "4"), ("content-length", " 4 ")]);
        assert_eq!(extract_meaningful_headers(&same).unwrap().content_length, 4);
    }

    #[test]
    fn malformed_content_length_reads_as_absent() {
        let out = extract_meaningful_headers(&pairs(&[("Content-Length", "-3")])).unwrap();
        assert_eq!(out.content_length, 0);
        assert!(!out.content_length_present);
    }

    #[test]
    fn close_suppresses_keep_alive_hint() {
        let headers = pairs(&[("Connection", "close"), ("Keep-Alive", "timeout=5")]);
        let out = extract_meaningful_headers(&headers).unwrap();
        assert!(out.connection_close);
        assert_eq!(out.keep_alive, None);
    }

    #[test]
    fn keep_alive_timeout_parameter() {
        assert_eq!(parse_keep_alive_timeout(b"timeout=5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_keep_alive_timeout(b"max=100, Timeout = 30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_keep_alive_timeout(b"max=100"), None);
        assert_eq!(parse_keep_alive_timeout(b"timeout=soon"), None);
    }

    #[test]
    fn trailer_name_list() {
        assert_eq!(trailer_names(b"Content-MD5, X-Checksum"), vec!["content-md5", "x-checksum"]);
        assert!(trailer_names(b" , ").is_empty());
    }
}
