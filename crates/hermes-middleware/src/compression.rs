//! Response body compression.
//!
//! Buffered HTTP bodies are compressed with the configured algorithm when:
//!
//! - the client lists it in `Accept-Encoding` with a non-zero quality
//! - the body is at least `compression_min_size` bytes
//! - the content type is compressible and no `Content-Encoding` is set
//! - the compressed output is actually smaller
//!
//! `Vary: Accept-Encoding` is added whenever compression is enabled.

use std::io::Write;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use hermes_config::Compression;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, VARY};
use http::{HeaderMap, HeaderValue};
use thiserror::Error;

const BROTLI_QUALITY: i32 = 6;

const COMPRESSIBLE_TYPES: &[&str] = &[
    "text/plain",
    "text/html",
    "text/css",
    "text/javascript",
    "text/xml",
    "text/csv",
    "application/json",
    "application/javascript",
    "application/xml",
    "application/xhtml+xml",
    "application/ld+json",
    "application/graphql",
    "image/svg+xml",
];

/// Error type for compression operations.
#[derive(Debug, Error)]
pub enum CompressionError {
    /// I/O error while encoding.
    #[error("compression I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parses `Accept-Encoding` into `(token, quality)` pairs, best first.
fn parse_accept_encoding(header_value: &str) -> Vec<(String, f32)> {
    let mut encodings: Vec<(String, f32)> = header_value
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let token = pieces.next()?.trim().to_ascii_lowercase();
            if token.is_empty() {
                return None;
            }
            let quality = pieces
                .filter_map(|param| param.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .map_or(1.0, |q| q.clamp(0.0, 1.0));
            Some((token, quality))
        })
        .collect();
    encodings.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    encodings
}

/// Returns `true` if the client accepts `compression`.
fn accepts(compression: Compression, request_headers: &HeaderMap) -> bool {
    let Some(token) = compression.encoding() else {
        return false;
    };
    let Some(accept) = request_headers
        .get(ACCEPT_ENCODING)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    let encodings = parse_accept_encoding(accept);
    let quality_of = |name: &str| {
        encodings
            .iter()
            .find(|(encoding, _)| encoding == name)
            .map(|(_, quality)| *quality)
    };
    quality_of(token)
        .or_else(|| quality_of("*"))
        .is_some_and(|quality| quality > 0.0)
}

fn compressible(response_headers: &HeaderMap) -> bool {
    let Some(content_type) = response_headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    let base = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    COMPRESSIBLE_TYPES.contains(&base.as_str())
}

/// Compresses `data` with `compression`.
///
/// # Errors
///
/// Returns `CompressionError` if the encoder fails.
pub fn compress(data: &[u8], compression: Compression) -> Result<Vec<u8>, CompressionError> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        Compression::Brotli => {
            let mut output = Vec::new();
            let params = brotli::enc::BrotliEncoderParams {
                quality: BROTLI_QUALITY,
                ..Default::default()
            };
            brotli::BrotliCompress(&mut std::io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
    }
}

/// Compresses a buffered response body when negotiation allows it.
///
/// Updates `Content-Encoding`, `Content-Length` and `Vary` on
/// `response_headers` and returns the body to send.
pub fn apply(
    compression: Compression,
    min_size: usize,
    request_headers: &HeaderMap,
    response_headers: &mut HeaderMap,
    body: Bytes,
) -> Bytes {
    if compression == Compression::None {
        return body;
    }
    response_headers.append(VARY, HeaderValue::from_static("Accept-Encoding"));

    let eligible = body.len() >= min_size
        && !response_headers.contains_key(CONTENT_ENCODING)
        && compressible(response_headers)
        && accepts(compression, request_headers);
    if !eligible {
        return body;
    }

    let compressed = match compress(&body, compression) {
        Ok(compressed) => compressed,
        Err(err) => {
            tracing::warn!(error = %err, "compression failed, sending identity body");
            return body;
        }
    };
    if compressed.len() >= body.len() {
        return body;
    }

    if let Some(token) = compression.encoding() {
        response_headers.insert(CONTENT_ENCODING, HeaderValue::from_static(token));
    }
    response_headers.insert(CONTENT_LENGTH, HeaderValue::from(compressed.len()));
    Bytes::from(compressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn request(accept: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(accept));
        headers
    }

    fn json_response() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        headers
    }

    fn large_body() -> Bytes {
        Bytes::from(format!("[{}]", vec![r#"{"name":"hermes"}"#; 200].join(",")))
    }

    #[test]
    fn test_parse_accept_encoding_sorted_by_quality() {
        let parsed = parse_accept_encoding("gzip;q=0.5, br, identity;q=0");
        assert_eq!(parsed[0], ("br".to_string(), 1.0));
        assert_eq!(parsed[1], ("gzip".to_string(), 0.5));
        assert_eq!(parsed[2], ("identity".to_string(), 0.0));
    }

    #[test]
    fn test_accepts_respects_zero_quality() {
        assert!(accepts(Compression::Gzip, &request("gzip, br")));
        assert!(!accepts(Compression::Gzip, &request("gzip;q=0, br")));
        assert!(accepts(Compression::Brotli, &request("*")));
        assert!(!accepts(Compression::Gzip, &HeaderMap::new()));
    }

    #[test]
    fn test_gzip_round_trip() {
        let body = large_body();
        let mut headers = json_response();
        let compressed = apply(
            Compression::Gzip,
            1024,
            &request("gzip"),
            &mut headers,
            body.clone(),
        );

        assert_eq!(headers[CONTENT_ENCODING], "gzip");
        assert_eq!(headers[VARY], "Accept-Encoding");
        assert_eq!(headers[CONTENT_LENGTH], compressed.len().to_string().as_str());

        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_brotli_selected() {
        let mut headers = json_response();
        let compressed = apply(
            Compression::Brotli,
            1024,
            &request("br"),
            &mut headers,
            large_body(),
        );
        assert_eq!(headers[CONTENT_ENCODING], "br");
        assert!(compressed.len() < large_body().len());
    }

    #[test]
    fn test_small_body_untouched() {
        let mut headers = json_response();
        let body = Bytes::from_static(b"{\"a\":1}");
        let out = apply(Compression::Gzip, 1024, &request("gzip"), &mut headers, body.clone());
        assert_eq!(out, body);
        assert!(headers.get(CONTENT_ENCODING).is_none());
        assert_eq!(headers[VARY], "Accept-Encoding");
    }

    #[test]
    fn test_incompressible_type_untouched() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
        apply(Compression::Gzip, 0, &request("gzip"), &mut headers, large_body());
        assert!(headers.get(CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_disabled_adds_nothing() {
        let mut headers = json_response();
        apply(Compression::None, 0, &request("gzip"), &mut headers, large_body());
        assert!(headers.get(VARY).is_none());
    }
}
