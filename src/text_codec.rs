//! Best-effort text decoding and explicit text encoding for note bodies.
//!
//! Notes may come from legacy plain-text files of unknown charset, so
//! [`decode`] never fails: BOM first, then strict UTF-8, then a statistical
//! guess, and UTF-8 (lossy) as the last resort. [`encode`] always takes an
//! explicit encoding name chosen by the caller.

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Encoding name used when the caller does not pick one.
pub const DEFAULT_ENCODING: &str = "utf8";

/// A resolved, encodable character set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEncoding(&'static Encoding);

impl TextEncoding {
    /// Resolve a user-facing encoding name (`utf8`, `latin1`, `utf16le`,
    /// `windows-1252`, `shift_jis`, ...) to an encoding we can write.
    pub fn resolve(name: &str) -> SyncResult<Self> {
        let label = name.trim().to_ascii_lowercase();
        let encoding = match label.as_str() {
            "" | "utf8" | "utf-8" => Some(UTF_8),
            "ucs2" | "ucs-2" | "utf16le" | "utf-16le" => Some(UTF_16LE),
            "utf16be" | "utf-16be" => Some(UTF_16BE),
            "binary" | "latin1" | "ascii" => Some(WINDOWS_1252),
            other => Encoding::for_label(other.as_bytes()),
        };

        match encoding {
            Some(enc) if is_writable(enc) => Ok(Self(enc)),
            _ => Err(SyncError::InvalidEncoding(format!(
                "unsupported encoding '{}'",
                name
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn encode(&self, text: &str) -> Vec<u8> {
        if self.0 == UTF_16LE {
            return utf16_with_bom(text, u16::to_le_bytes, [0xFF, 0xFE]);
        }
        if self.0 == UTF_16BE {
            return utf16_with_bom(text, u16::to_be_bytes, [0xFE, 0xFF]);
        }
        let (bytes, _, _) = self.0.encode(text);
        bytes.into_owned()
    }
}

// encoding_rs maps UTF-16 and the replacement encoding to UTF-8 on output;
// UTF-16 is handled by hand, the rest cannot be produced.
fn is_writable(enc: &'static Encoding) -> bool {
    enc == UTF_16LE || enc == UTF_16BE || enc.output_encoding() == enc
}

fn utf16_with_bom(text: &str, unit: fn(u16) -> [u8; 2], bom: [u8; 2]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + text.len() * 2);
    out.extend_from_slice(&bom);
    for code in text.encode_utf16() {
        out.extend_from_slice(&unit(code));
    }
    out
}

/// Guess the encoding of `buf`.
pub fn detect(buf: &[u8]) -> &'static Encoding {
    if let Some((enc, _)) = Encoding::for_bom(buf) {
        return enc;
    }
    if std::str::from_utf8(buf).is_ok() {
        return UTF_8;
    }
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(buf, true);
    detector.guess(None, true)
}

/// Decode `buf` to text. Total: any input yields a string.
pub fn decode(buf: &[u8]) -> String {
    if buf.is_empty() {
        return String::new();
    }

    let (enc, bom_len) = match Encoding::for_bom(buf) {
        Some((enc, len)) => (enc, len),
        None => (detect(buf), 0),
    };

    let (text, had_errors) = enc.decode_without_bom_handling(&buf[bom_len..]);
    if had_errors {
        debug!(encoding = enc.name(), "decode had errors, falling back to utf-8");
        return String::from_utf8_lossy(buf).into_owned();
    }
    text.into_owned()
}

/// Encode `text` in the named encoding.
pub fn encode(text: &str, encoding: &str) -> SyncResult<Vec<u8>> {
    Ok(TextEncoding::resolve(encoding)?.encode(text))
}
