//! Content-type sniffing for attachment bodies
//!
//! Magic-byte detection over the leading bytes of the body, falling back to
//! text/plain for valid UTF-8 and application/octet-stream otherwise.

/// Detect a MIME type from the leading bytes of a body.
///
/// Returns `Some(mime_type)` for recognized signatures, `None` otherwise.
pub fn detect_mime_type(data: &[u8]) -> Option<&'static str> {
    if data.len() < 4 {
        return None;
    }

    // Images
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if data.starts_with(b"RIFF") && data.len() >= 12 && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if data.starts_with(b"BM") && data.len() >= 6 {
        return Some("image/bmp");
    }

    // Audio / video
    if data.starts_with(&[0x49, 0x44, 0x33]) || data.starts_with(&[0xFF, 0xFB]) {
        return Some("audio/mpeg");
    }
    if data.starts_with(b"RIFF") && data.len() >= 12 && &data[8..12] == b"WAVE" {
        return Some("audio/wav");
    }
    if data.starts_with(b"OggS") {
        return Some("audio/ogg");
    }
    if data.starts_with(b"fLaC") {
        return Some("audio/flac");
    }
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        let brand = &data[8..12];
        if brand == b"mp41" || brand == b"mp42" || brand == b"isom" || brand == b"M4V " {
            return Some("video/mp4");
        }
        if brand == b"qt  " {
            return Some("video/quicktime");
        }
    }
    if data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some("video/webm");
    }

    // Documents and archives
    if data.starts_with(b"%PDF") {
        return Some("application/pdf");
    }
    if data.starts_with(&[0x50, 0x4B, 0x03, 0x04]) {
        return Some("application/zip");
    }
    if data.starts_with(&[0x1F, 0x8B]) {
        return Some("application/gzip");
    }
    if data.starts_with(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]) {
        return Some("application/x-7z-compressed");
    }

    None
}

/// Sniff a content type for an attachment body: magic bytes first, then
/// UTF-8 text, then the binary fallback.
pub fn sniff_content_type(data: &[u8]) -> &'static str {
    if let Some(mime) = detect_mime_type(data) {
        return mime;
    }
    if std::str::from_utf8(data).is_ok() {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

/// Canonical file extension (with leading dot) for a content type, used to
/// build download URLs when the publisher gave no filename
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/bmp" => ".bmp",
        "audio/mpeg" => ".mp3",
        "audio/wav" => ".wav",
        "audio/ogg" => ".ogg",
        "audio/flac" => ".flac",
        "video/mp4" => ".mp4",
        "video/quicktime" => ".mov",
        "video/webm" => ".webm",
        "application/pdf" => ".pdf",
        "application/zip" => ".zip",
        "application/gzip" => ".gz",
        "application/x-7z-compressed" => ".7z",
        "text/plain" => ".txt",
        _ => ".bin",
    }
}

/// Content type for a download, from the stored filename's extension
pub fn content_type_for_filename(name: &str) -> String {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_common_signatures() {
        assert_eq!(
            detect_mime_type(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]),
            Some("image/jpeg")
        );
        assert_eq!(detect_mime_type(b"%PDF-1.7 blah"), Some("application/pdf"));
        assert_eq!(
            detect_mime_type(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 1]),
            Some("image/png")
        );
        assert_eq!(detect_mime_type(b"plain old text"), None);
    }

    #[test]
    fn test_sniff_falls_back_to_text_or_binary() {
        assert_eq!(sniff_content_type(b"hello world, how are you"), "text/plain");
        assert_eq!(
            sniff_content_type(&[0x00, 0xFF, 0xFE, 0x01, 0x80]),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_extension_mapping() {
        assert_eq!(extension_for("image/jpeg"), ".jpg");
        assert_eq!(extension_for("application/vnd.weird"), ".bin");
    }

    #[test]
    fn test_content_type_from_filename() {
        assert_eq!(content_type_for_filename("cat.jpg"), "image/jpeg");
        assert_eq!(
            content_type_for_filename("noextension"),
            "application/octet-stream"
        );
    }
}
