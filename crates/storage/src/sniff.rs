//! MIME type detection from a payload header.

/// Fallback for payloads no signature matches.
pub const OCTET_STREAM: &str = "application/octet-stream";

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"PK\x03\x04", "application/zip"),
];

/// Guess a MIME type from the first bytes of a payload.
pub fn sniff_mime_type(header: &[u8]) -> &'static str {
    for (magic, mime) in SIGNATURES {
        if header.starts_with(magic) {
            return mime;
        }
    }
    if !header.is_empty() && looks_like_text(header) {
        return "text/plain";
    }
    OCTET_STREAM
}

/// UTF-8 without control characters other than whitespace.
///
/// The header may cut a multi-byte character in half, so an incomplete
/// sequence at the very end is accepted.
fn looks_like_text(header: &[u8]) -> bool {
    let valid = match std::str::from_utf8(header) {
        Ok(s) => s,
        Err(e) if e.error_len().is_none() => {
            // Only the trailing sequence is incomplete.
            match std::str::from_utf8(&header[..e.valid_up_to()]) {
                Ok(s) => s,
                Err(_) => return false,
            }
        }
        Err(_) => return false,
    };
    valid
        .chars()
        .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t' | '\x0c'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_signatures() {
        assert_eq!(sniff_mime_type(b"%PDF-1.7\n..."), "application/pdf");
        assert_eq!(sniff_mime_type(b"\x89PNG\r\n\x1a\n\0\0"), "image/png");
        assert_eq!(sniff_mime_type(b"\xff\xd8\xff\xe0"), "image/jpeg");
        assert_eq!(sniff_mime_type(b"GIF89a.."), "image/gif");
        assert_eq!(sniff_mime_type(b"PK\x03\x04rest"), "application/zip");
    }

    #[test]
    fn test_text_and_binary() {
        assert_eq!(sniff_mime_type(b"hello\nworld\t!"), "text/plain");
        assert_eq!(sniff_mime_type("caf\u{e9}".as_bytes()), "text/plain");
        assert_eq!(sniff_mime_type(b"\0\x01\x02binary"), OCTET_STREAM);
        assert_eq!(sniff_mime_type(b""), OCTET_STREAM);
    }

    #[test]
    fn test_truncated_multibyte_tail_is_still_text() {
        let mut header = b"price: ".to_vec();
        header.extend_from_slice(&"\u{20ac}".as_bytes()[..2]);
        assert_eq!(sniff_mime_type(&header), "text/plain");
    }
}
