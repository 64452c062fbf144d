use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::io::{Cursor, Read, Write};
use tracing::warn;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{SyncError, SyncResult};
use crate::text_codec;

// ---- Format constants ----

/// Fixed slot holding the note body inside a container.
pub const NOTE_ENTRY: &str = "note.txt";
/// Namespace for attachment entries.
pub const ATTACHMENTS_PREFIX: &str = "attachments/";

pub const CONTAINER_EXTENSION: &str = "knote";
pub const TEXT_EXTENSION: &str = "txt";

pub const CONTAINER_MIME: &str = "application/zip";
pub const TEXT_MIME: &str = "text/plain";

const ZIP_MIME_TYPES: &[&str] = &["application/zip", "application/x-zip-compressed"];
const CONTAINER_SUFFIXES: &[&str] = &[".knote", ".zip"];
const TEXT_ENTRY_SUFFIXES: &[&str] = &[".txt", ".text", ".md"];

// ---- Classification ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    Container,
    PlainText,
}

impl FileKind {
    /// Representation used when writing a note: containers only when there is
    /// something to bundle.
    pub fn for_attachments(attachments: &[Attachment]) -> Self {
        if attachments.is_empty() {
            FileKind::PlainText
        } else {
            FileKind::Container
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::Container => CONTAINER_EXTENSION,
            FileKind::PlainText => TEXT_EXTENSION,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            FileKind::Container => CONTAINER_MIME,
            FileKind::PlainText => TEXT_MIME,
        }
    }
}

/// Decide how a stored file must be read. Both the name and the declared
/// content type are checked since either may be lost or normalized remotely.
pub fn classify(name: &str, mime_type: Option<&str>) -> FileKind {
    let lower = name.to_lowercase();
    let by_name = CONTAINER_SUFFIXES.iter().any(|s| lower.ends_with(s));
    let by_mime = mime_type
        .map(|m| {
            let m = m.trim().to_ascii_lowercase();
            ZIP_MIME_TYPES.iter().any(|z| m == *z)
        })
        .unwrap_or(false);

    if by_name || by_mime {
        FileKind::Container
    } else {
        FileKind::PlainText
    }
}

// ---- Attachments ----

/// A binary payload bundled with one note. Travels as `{name, dataBase64}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(
        rename = "dataBase64",
        serialize_with = "bytes_to_base64",
        deserialize_with = "bytes_from_base64"
    )]
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

fn bytes_to_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

fn bytes_from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
}

/// Final path segment of an entry or attachment name. Directory structure is
/// never honored.
pub fn flatten_name(name: &str) -> String {
    let last = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();
    if last.is_empty() || last == "." || last == ".." {
        "attachment".to_string()
    } else {
        last.to_string()
    }
}

// ---- Pack / unpack ----

/// Body and attachments read back from a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unpacked {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

/// Bundle a note body and its attachments into a zip archive.
pub fn pack(text: &str, attachments: &[Attachment], encoding: &str) -> SyncResult<Vec<u8>> {
    let body = text_codec::encode(text, encoding)?;

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    writer.start_file(NOTE_ENTRY, options)?;
    writer.write_all(&body)?;

    let mut seen = HashSet::new();
    for attachment in attachments {
        let name = flatten_name(&attachment.name);
        if !seen.insert(name.clone()) {
            warn!(attachment = %name, "duplicate attachment name, keeping the first");
            continue;
        }
        writer.start_file(format!("{}{}", ATTACHMENTS_PREFIX, name), options)?;
        writer.write_all(&attachment.bytes)?;
    }

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

/// Read a container back. Missing body yields empty text; an unreadable
/// archive is a [`SyncError::CorruptedContainer`].
pub fn unpack(bytes: &[u8]) -> SyncResult<Unpacked> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let mut body: Option<Vec<u8>> = None;
    let mut fallback_body: Option<Vec<u8>> = None;
    let mut attachments = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let entry_name = entry.name().to_string();

        if entry_name == NOTE_ENTRY {
            body = Some(read_entry(&mut entry, &entry_name)?);
        } else if entry_name.starts_with(ATTACHMENTS_PREFIX) {
            let data = read_entry(&mut entry, &entry_name)?;
            if fallback_body.is_none() && is_text_entry(&entry_name) {
                fallback_body = Some(data.clone());
            }
            attachments.push(Attachment::new(flatten_name(&entry_name), data));
        } else if fallback_body.is_none() && is_text_entry(&entry_name) {
            fallback_body = Some(read_entry(&mut entry, &entry_name)?);
        }
    }

    let text = body
        .or(fallback_body)
        .map(|b| text_codec::decode(&b))
        .unwrap_or_default();

    Ok(Unpacked { text, attachments })
}

fn read_entry<R: Read>(entry: &mut R, name: &str) -> SyncResult<Vec<u8>> {
    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .map_err(|e| SyncError::CorruptedContainer(format!("entry '{}': {}", name, e)))?;
    Ok(data)
}

fn is_text_entry(name: &str) -> bool {
    let lower = name.to_lowercase();
    TEXT_ENTRY_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

/// Encode a note for storage in the representation its attachments call for.
pub fn encode_note(
    text: &str,
    attachments: &[Attachment],
    encoding: &str,
) -> SyncResult<(FileKind, Vec<u8>)> {
    let kind = FileKind::for_attachments(attachments);
    let bytes = match kind {
        FileKind::Container => pack(text, attachments, encoding)?,
        FileKind::PlainText => text_codec::encode(text, encoding)?,
    };
    Ok((kind, bytes))
}

/// Decode stored bytes according to their classification.
pub fn decode_note(kind: FileKind, bytes: &[u8]) -> SyncResult<Unpacked> {
    match kind {
        FileKind::Container => unpack(bytes),
        FileKind::PlainText => Ok(Unpacked {
            text: text_codec::decode(bytes),
            attachments: Vec::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("0001 - a.knote", None), FileKind::Container);
        assert_eq!(classify("A.ZIP", Some("text/plain")), FileKind::Container);
        assert_eq!(classify("0001 - a.txt", Some("application/zip")), FileKind::Container);
        assert_eq!(
            classify("weird", Some("application/x-zip-compressed")),
            FileKind::Container
        );
        assert_eq!(classify("0001 - a.txt", Some("text/plain")), FileKind::PlainText);
        assert_eq!(classify("untyped", None), FileKind::PlainText);
    }

    #[test]
    fn test_flatten_name() {
        assert_eq!(flatten_name("photo.png"), "photo.png");
        assert_eq!(flatten_name("../../etc/passwd"), "passwd");
        assert_eq!(flatten_name("C:\\Users\\me\\pic.jpg"), "pic.jpg");
        assert_eq!(flatten_name("dir/"), "attachment");
    }

    #[test]
    fn test_pack_unpack() {
        let attachments = vec![
            Attachment::new("photo.png", vec![0x89, 0x50, 0x4E, 0x47]),
            Attachment::new("nested/dir/doc.pdf", b"%PDF".to_vec()),
        ];
        let bytes = pack("milk, eggs", &attachments, "utf8").unwrap();
        let unpacked = unpack(&bytes).unwrap();

        assert_eq!(unpacked.text, "milk, eggs");
        assert_eq!(unpacked.attachments.len(), 2);
        assert!(unpacked
            .attachments
            .contains(&Attachment::new("photo.png", vec![0x89, 0x50, 0x4E, 0x47])));
        assert!(unpacked
            .attachments
            .contains(&Attachment::new("doc.pdf", b"%PDF".to_vec())));
    }

    #[test]
    fn test_pack_keeps_first_duplicate() {
        let attachments = vec![
            Attachment::new("a/x.bin", vec![1]),
            Attachment::new("b/x.bin", vec![2]),
        ];
        let unpacked = unpack(&pack("", &attachments, "utf8").unwrap()).unwrap();
        assert_eq!(unpacked.attachments, vec![Attachment::new("x.bin", vec![1])]);
    }

    #[test]
    fn test_pack_latin1_body() {
        let bytes = pack("pão", &[Attachment::new("a", vec![0])], "latin1").unwrap();
        let unpacked = unpack(&bytes).unwrap();
        assert_eq!(unpacked.text, text_codec::decode(&text_codec::encode("pão", "latin1").unwrap()));
    }

    #[test]
    fn test_pack_invalid_encoding() {
        let err = pack("x", &[], "nope").unwrap_err();
        assert!(matches!(err, SyncError::InvalidEncoding(_)));
    }

    #[test]
    fn test_unpack_foreign_archive_uses_first_text_entry() {
        let bytes = zip_with(&[
            ("docs/", b""),
            ("image.png", b"\x89PNG"),
            ("docs/readme.TXT", b"hand built"),
            ("other.txt", b"second"),
            ("attachments/deep/inner/file.bin", b"\x00\x01"),
        ]);
        let unpacked = unpack(&bytes).unwrap();
        assert_eq!(unpacked.text, "hand built");
        assert_eq!(unpacked.attachments, vec![Attachment::new("file.bin", vec![0, 1])]);
    }

    #[test]
    fn test_unpack_canonical_entry_wins_over_fallback() {
        let bytes = zip_with(&[("aaa.txt", b"fallback"), ("note.txt", b"canonical")]);
        assert_eq!(unpack(&bytes).unwrap().text, "canonical");
    }

    #[test]
    fn test_unpack_attachment_text_fills_missing_body() {
        let bytes = zip_with(&[
            ("attachments/readme.txt", b"from attachment"),
            ("pic.png", b"p"),
        ]);
        let unpacked = unpack(&bytes).unwrap();
        assert_eq!(unpacked.text, "from attachment");
        assert_eq!(
            unpacked.attachments,
            vec![Attachment::new("readme.txt", b"from attachment".to_vec())]
        );

        let readme = Attachment::new("readme.txt", b"other".to_vec());
        let packed = pack("body", &[readme], "utf8").unwrap();
        assert_eq!(unpack(&packed).unwrap().text, "body");
    }

    #[test]
    fn test_unpack_without_text_is_empty() {
        let bytes = zip_with(&[("attachments/", b""), ("attachments/a.bin", b"z")]);
        let unpacked = unpack(&bytes).unwrap();
        assert_eq!(unpacked.text, "");
        assert_eq!(unpacked.attachments.len(), 1);
    }

    #[test]
    fn test_unpack_garbage_is_corrupted() {
        let err = unpack(b"definitely not a zip").unwrap_err();
        assert!(matches!(err, SyncError::CorruptedContainer(_)));
    }

    #[test]
    fn test_encode_note_picks_representation() {
        let (kind, bytes) = encode_note("hi", &[], "utf8").unwrap();
        assert_eq!(kind, FileKind::PlainText);
        assert_eq!(bytes, b"hi");

        let (kind, bytes) = encode_note("hi", &[Attachment::new("a.txt", vec![1])], "utf8").unwrap();
        assert_eq!(kind, FileKind::Container);
        assert_eq!(decode_note(kind, &bytes).unwrap().text, "hi");
    }

    #[test]
    fn test_attachment_wire_shape() {
        let json = serde_json::to_value(Attachment::new("a.bin", vec![1, 2, 3])).unwrap();
        assert_eq!(json, serde_json::json!({"name": "a.bin", "dataBase64": "AQID"}));
        let back: Attachment = serde_json::from_value(json).unwrap();
        assert_eq!(back.bytes, vec![1, 2, 3]);
    }
}
