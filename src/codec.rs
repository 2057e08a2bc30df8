//! Data-URL payloads and extension based content types.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use percent_encoding::percent_decode_str;

use crate::error::CodecError;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Decoded file payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    /// Declared media type without parameters, possibly empty.
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Encode bytes as a base64 `data:` URL.
pub fn encode(media_type: &str, data: &[u8]) -> String {
    let media_type = if media_type.is_empty() {
        OCTET_STREAM
    } else {
        media_type
    };
    format!("data:{};base64,{}", media_type, STANDARD.encode(data))
}

/// Decode a `data:` URL in either base64 or percent-encoded form.
pub fn decode(url: &str) -> Result<DataUrl, CodecError> {
    let rest = url
        .trim()
        .strip_prefix("data:")
        .ok_or(CodecError::MissingScheme)?;
    let (header, body) = rest.split_once(',').ok_or(CodecError::MissingSeparator)?;

    let mut params = header.split(';').map(str::trim);
    let media_type = params.next().unwrap_or_default().to_ascii_lowercase();
    let is_base64 = params.any(|p| p.eq_ignore_ascii_case("base64"));

    let data = if is_base64 {
        // Browsers may leave whitespace or percent-escapes in the payload.
        let cleaned: String = percent_decode_str(body)
            .decode_utf8_lossy()
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        STANDARD
            .decode(cleaned.as_bytes())
            .map_err(|e| CodecError::Base64(e.to_string()))?
    } else {
        percent_decode_str(body).collect()
    };

    Ok(DataUrl { media_type, data })
}

/// Final extension of the last path element, without the dot.
///
/// `"a/b.tar.gz"` gives `Some("gz")`, `"dir.v2/"` and `"readme"` give `None`.
pub fn extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rfind('.').map(|i| &name[i + 1..])
}

/// Guess a content type from a file extension. Empty when unknown.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "bmp" => "image/bmp",
        "avif" => "image/avif",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "wasm" => "application/wasm",
        _ => "",
    }
}

/// Content type for a path, or empty when the extension is unknown.
pub fn mime_for_path(path: &str) -> &'static str {
    extension(path).map(mime_for_extension).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_then_decode() {
        let url = encode("text/html", b"<h1>hi</h1>");
        assert_eq!(url, "data:text/html;base64,PGgxPmhpPC9oMT4=");

        let decoded = decode(&url).unwrap();
        assert_eq!(decoded.media_type, "text/html");
        assert_eq!(decoded.data, b"<h1>hi</h1>");
    }

    #[test]
    fn test_encode_defaults_media_type() {
        assert!(encode("", b"x").starts_with("data:application/octet-stream;base64,"));
    }

    #[test]
    fn test_decode_browser_forms() {
        let decoded = decode("data:text/plain;charset=utf-8;base64,aGVsbG8=").unwrap();
        assert_eq!(decoded.media_type, "text/plain");
        assert_eq!(decoded.data, b"hello");

        let decoded = decode("data:,hello%20world").unwrap();
        assert_eq!(decoded.media_type, "");
        assert_eq!(decoded.data, b"hello world");
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode("no such file"), Err(CodecError::MissingScheme));
        assert_eq!(decode("data:text/plain"), Err(CodecError::MissingSeparator));
        assert!(matches!(
            decode("data:text/plain;base64,@@@"),
            Err(CodecError::Base64(_))
        ));
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("index.html"), Some("html"));
        assert_eq!(extension("a/b.tar.gz"), Some("gz"));
        assert_eq!(extension("dir.v2/"), None);
        assert_eq!(extension("swift-otter/about"), None);
        assert_eq!(extension(""), None);
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path("css/site.CSS"), "text/css");
        assert_eq!(mime_for_path("img/logo.png"), "image/png");
        assert_eq!(mime_for_path("blob.unknown"), "");
        assert_eq!(mime_for_path("Makefile"), "");
    }
}
