//! `multipart/form-data` parsing over the captured request body.
//!
//! Text fields become form values. File parts are kept in memory while the
//! running total stays under the caller's threshold; larger files spill to
//! a temporary file that lives as long as the parsed form.

use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};

use tempfile::NamedTempFile;

use crate::marshal::{HeaderSet, ValueSet};

/// Default memory threshold for multipart parsing (32 MiB).
pub const DEFAULT_MAX_MEMORY: u64 = 32 << 20;

/// Text fields may use this much memory on top of the threshold.
const TEXT_FIELD_ALLOWANCE: u64 = 10 << 20;

/// A file retrieved from a multipart form.
///
/// Owns a copy of the bytes; nothing refers back to the form it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    filename: String,
    content_type: String,
    bytes: Vec<u8>,
}

impl UploadedFile {
    /// Creates a file record.
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Client-supplied file name, without directory components.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Content type from the part header.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// File contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Metadata of a file part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Client-supplied file name, without directory components
    pub filename: String,
    /// Content type, `application/octet-stream` when the part has none
    pub content_type: String,
    /// Size in bytes
    pub size: u64,
}

/// Why a multipart body could not be parsed or read.
#[derive(Debug)]
pub enum MultipartError {
    /// The content type is not `multipart/form-data`
    NotMultipart,
    /// The content type has no boundary parameter
    MissingBoundary,
    /// The body does not follow the multipart grammar
    Malformed(&'static str),
    /// Text fields exceed the memory allowance
    TooLarge,
    /// A temporary file could not be written or read
    Io(std::io::Error),
}

impl fmt::Display for MultipartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultipartError::NotMultipart => {
                write!(f, "request Content-Type isn't multipart/form-data")
            }
            MultipartError::MissingBoundary => write!(f, "no multipart boundary param in Content-Type"),
            MultipartError::Malformed(what) => write!(f, "multipart: {}", what),
            MultipartError::TooLarge => write!(f, "multipart: message too large"),
            MultipartError::Io(err) => write!(f, "multipart: {}", err),
        }
    }
}

impl std::error::Error for MultipartError {}

impl From<std::io::Error> for MultipartError {
    fn from(err: std::io::Error) -> Self {
        MultipartError::Io(err)
    }
}

enum Stored {
    Memory(Vec<u8>),
    Spilled(NamedTempFile),
}

impl fmt::Debug for Stored {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stored::Memory(bytes) => write!(f, "Memory({} bytes)", bytes.len()),
            Stored::Spilled(file) => write!(f, "Spilled({})", file.path().display()),
        }
    }
}

#[derive(Debug)]
struct FilePart {
    field: String,
    header: FileHeader,
    stored: Stored,
}

/// A parsed multipart form.
#[derive(Debug, Default)]
pub struct MultipartForm {
    values: ValueSet,
    files: Vec<FilePart>,
}

impl MultipartForm {
    /// Parses `body` according to `content_type`.
    ///
    /// # Errors
    ///
    /// See [`MultipartError`].
    pub fn parse(content_type: &str, body: &[u8], max_memory: u64) -> Result<Self, MultipartError> {
        let boundary = boundary(content_type)?;
        let delimiter = format!("--{}", boundary).into_bytes();
        let mut close = b"\r\n".to_vec();
        close.extend_from_slice(&delimiter);

        let mut memory_left = max_memory as i128;
        let mut text_left = max_memory as i128 + TEXT_FIELD_ALLOWANCE as i128;
        let mut form = MultipartForm::default();

        let mut pos = find(body, &delimiter, 0)
            .ok_or(MultipartError::Malformed("missing first boundary"))?
            + delimiter.len();

        loop {
            if body[pos..].starts_with(b"--") {
                break;
            }
            while matches!(body.get(pos), Some(b' ') | Some(b'\t')) {
                pos += 1;
            }
            if body[pos..].starts_with(b"\r\n") {
                pos += 2;
            } else if body[pos..].starts_with(b"\n") {
                pos += 1;
            } else {
                return Err(MultipartError::Malformed("malformed boundary line"));
            }

            let (raw_headers, content_start) = if body[pos..].starts_with(b"\r\n") {
                (&body[pos..pos], pos + 2)
            } else {
                let end = find(body, b"\r\n\r\n", pos)
                    .ok_or(MultipartError::Malformed("unexpected end of part headers"))?;
                (&body[pos..end], end + 4)
            };
            let content_end = find(body, &close, content_start)
                .ok_or(MultipartError::Malformed("unexpected end of body"))?;
            let content = &body[content_start..content_end];
            pos = content_end + close.len();

            let headers = part_headers(raw_headers)?;
            let params = disposition_params(headers.get("Content-Disposition"));
            let Some(name) = param(&params, "name") else {
                continue;
            };
            let filename = param(&params, "filename").map(base_name).unwrap_or_default();

            if filename.is_empty() {
                text_left -= content.len() as i128;
                if text_left < 0 {
                    return Err(MultipartError::TooLarge);
                }
                form.values
                    .add(name, String::from_utf8_lossy(content).into_owned());
                continue;
            }

            let content_type = match headers.get("Content-Type") {
                "" => "application/octet-stream".to_string(),
                ct => ct.to_string(),
            };
            let header = FileHeader {
                filename,
                content_type,
                size: content.len() as u64,
            };
            let stored = if (content.len() as i128) > memory_left {
                let mut file = NamedTempFile::new()?;
                file.write_all(content)?;
                file.flush()?;
                Stored::Spilled(file)
            } else {
                memory_left -= content.len() as i128;
                text_left -= content.len() as i128;
                Stored::Memory(content.to_vec())
            };
            form.files.push(FilePart {
                field: name.to_string(),
                header,
                stored,
            });
        }

        Ok(form)
    }

    /// Text field values.
    pub fn values(&self) -> &ValueSet {
        &self.values
    }

    /// Header of the first file uploaded under `field`.
    pub fn file_header(&self, field: &str) -> Option<&FileHeader> {
        self.part(field).map(|p| &p.header)
    }

    /// Returns `true` if any file part spilled to disk.
    pub fn has_spilled_files(&self) -> bool {
        self.files
            .iter()
            .any(|p| matches!(p.stored, Stored::Spilled(_)))
    }

    /// Reads the first file uploaded under `field`.
    ///
    /// Returns `None` when the form has no file under that name.
    pub fn read_file(&self, field: &str) -> Option<Result<UploadedFile, MultipartError>> {
        let part = self.part(field)?;
        let bytes = match &part.stored {
            Stored::Memory(bytes) => Ok(bytes.clone()),
            Stored::Spilled(file) => read_spilled(file),
        };
        Some(bytes.map(|bytes| {
            UploadedFile::new(
                part.header.filename.as_str(),
                part.header.content_type.as_str(),
                bytes,
            )
        }))
    }

    fn part(&self, field: &str) -> Option<&FilePart> {
        self.files.iter().find(|p| p.field == field)
    }
}

fn read_spilled(file: &NamedTempFile) -> Result<Vec<u8>, MultipartError> {
    let mut handle = file.reopen()?;
    handle.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    handle.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Extracts the boundary from a `multipart/form-data` content type.
fn boundary(content_type: &str) -> Result<String, MultipartError> {
    let params = disposition_params(content_type);
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if media_type != "multipart/form-data" && media_type != "multipart/mixed" {
        return Err(MultipartError::NotMultipart);
    }
    match param(&params, "boundary") {
        Some(b) if !b.is_empty() => Ok(b.to_string()),
        _ => Err(MultipartError::MissingBoundary),
    }
}

fn part_headers(raw: &[u8]) -> Result<HeaderSet, MultipartError> {
    let mut headers = HeaderSet::new();
    let text = String::from_utf8_lossy(raw);
    for line in text.split("\r\n").filter(|l| !l.is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or(MultipartError::Malformed("malformed part header"))?;
        headers.add(key.trim(), value.trim());
    }
    Ok(headers)
}

/// Parses `type; key=value; key="quoted"` parameters. Keys are lower-cased.
/// Separators inside quoted values belong to the value.
fn disposition_params(value: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let Some((_, mut rest)) = value.split_once(';') else {
        return params;
    };
    loop {
        rest = rest.trim_start_matches(|c: char| c == ';' || c.is_whitespace());
        if rest.is_empty() {
            return params;
        }
        let key_end = rest.find(|c: char| c == '=' || c == ';').unwrap_or(rest.len());
        let key = rest[..key_end].trim().to_ascii_lowercase();
        rest = &rest[key_end..];
        let Some(raw) = rest.strip_prefix('=') else {
            continue;
        };
        let raw = raw.trim_start();
        let (v, remaining) = match raw.strip_prefix('"') {
            Some(quoted) => unquote(quoted),
            None => {
                let end = raw.find(';').unwrap_or(raw.len());
                (raw[..end].trim_end().to_string(), &raw[end..])
            }
        };
        if !key.is_empty() {
            params.push((key, v));
        }
        rest = remaining;
    }
}

/// Reads a quoted-string body up to its closing quote, resolving `\x`
/// escapes. Returns the value and the input after the quote.
fn unquote(s: &str) -> (String, &str) {
    let mut out = String::new();
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return (out, &s[i + 1..]),
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    out.push(escaped);
                }
            }
            _ => out.push(c),
        }
    }
    (out, "")
}

fn param<'p>(params: &'p [(String, String)], key: &str) -> Option<&'p str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn base_name(path: &str) -> String {
    path.rsplit(['/', '\\']).next().unwrap_or(path).to_string()
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CT: &str = "multipart/form-data; boundary=XyZ";

    fn body() -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(b"--XyZ\r\n");
        b.extend_from_slice(b"Content-Disposition: form-data; name=\"title\"\r\n\r\n");
        b.extend_from_slice(b"Hello world\r\n");
        b.extend_from_slice(b"--XyZ\r\n");
        b.extend_from_slice(
            b"Content-Disposition: form-data; name=\"avatar\"; filename=\"C:\\\\pics\\\\me.png\"\r\n",
        );
        b.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
        b.extend_from_slice(b"\x89PNG-bytes\r\n");
        b.extend_from_slice(b"--XyZ--\r\n");
        b
    }

    #[test]
    fn parses_text_and_file_parts() {
        let form = MultipartForm::parse(CT, &body(), DEFAULT_MAX_MEMORY).unwrap();

        assert_eq!(form.values().get("title"), Some("Hello world"));
        let header = form.file_header("avatar").unwrap();
        assert_eq!(header.filename, "me.png");
        assert_eq!(header.content_type, "image/png");
        assert_eq!(header.size, 10);
        assert!(!form.has_spilled_files());

        let file = form.read_file("avatar").unwrap().unwrap();
        assert_eq!(file.bytes(), b"\x89PNG-bytes");
        assert_eq!(file.size(), 10);
        assert!(form.read_file("missing").is_none());
    }

    #[test]
    fn large_files_spill_to_disk() {
        let form = MultipartForm::parse(CT, &body(), 4).unwrap();
        assert!(form.has_spilled_files());

        let file = form.read_file("avatar").unwrap().unwrap();
        assert_eq!(file.bytes(), b"\x89PNG-bytes");
        assert_eq!(file.filename(), "me.png");
    }

    #[test]
    fn quoted_parameters_keep_separators_and_escapes() {
        let mut b = Vec::new();
        b.extend_from_slice(b"--a;b\r\n");
        b.extend_from_slice(
            b"Content-Disposition: form-data; name=\"pic\"; filename=\"a;b \\\"x\\\".png\"\r\n",
        );
        b.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
        b.extend_from_slice(b"png\r\n");
        b.extend_from_slice(b"--a;b--\r\n");

        let form = MultipartForm::parse(
            "multipart/form-data; boundary=\"a;b\"; charset=utf-8",
            &b,
            DEFAULT_MAX_MEMORY,
        )
        .unwrap();
        let header = form.file_header("pic").unwrap();
        assert_eq!(header.filename, "a;b \"x\".png");
        assert_eq!(header.content_type, "image/png");
        assert_eq!(header.size, 3);
    }

    #[test]
    fn parameter_scanner_edge_cases() {
        let params = disposition_params("form-data; name=plain ; flag; filename=\"open");
        assert_eq!(param(&params, "name"), Some("plain"));
        assert_eq!(param(&params, "flag"), None);
        assert_eq!(param(&params, "filename"), Some("open"));
        assert!(disposition_params("form-data").is_empty());
    }

    #[test]
    fn rejects_non_multipart() {
        let err = MultipartForm::parse("application/json", b"{}", DEFAULT_MAX_MEMORY).unwrap_err();
        assert!(matches!(err, MultipartError::NotMultipart));

        let err = MultipartForm::parse("multipart/form-data", b"", DEFAULT_MAX_MEMORY).unwrap_err();
        assert!(matches!(err, MultipartError::MissingBoundary));
    }

    #[test]
    fn rejects_truncated_body() {
        let truncated = b"--XyZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nno end";
        let err = MultipartForm::parse(CT, truncated, DEFAULT_MAX_MEMORY).unwrap_err();
        assert!(matches!(err, MultipartError::Malformed(_)));
    }

    #[test]
    fn quoted_boundary_and_empty_form() {
        let form = MultipartForm::parse(
            "multipart/form-data; boundary=\"a b\"",
            b"--a b--\r\n",
            DEFAULT_MAX_MEMORY,
        )
        .unwrap();
        assert!(form.values().is_empty());
    }
}
