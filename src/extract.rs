//! Candidate extraction: identity, comment health, and content digest.
//!
//! The pipeline only depends on [`CandidateExtractor`]. [`XmlPreviewExtractor`]
//! is the built-in implementation for XML preview files, where a
//! `PreviewClass` element carries the identity and `Comment`-like attributes
//! or elements carry the display names.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use std::time::SystemTime;

use crate::error::{IoResultExt, MergeError};
use crate::models::{CommentHealth, Extracted, Identity};

/// Attribute names counted as display-name-like fields.
const COMMENT_ATTRS: [&[u8]; 3] = [b"Comment", b"LORComment", b"Comments"];
/// Element names whose text counts as a display-name-like field.
const COMMENT_TAGS: [&[u8]; 2] = [b"Comment", b"Comments"];
const IDENTITY_TAG: &[u8] = b"PreviewClass";

/// Turns a file path into the tuple the pipeline works with.
///
/// Returns `None` when the file cannot be parsed or has no usable identity;
/// such files are dropped from the run, never fatal.
pub trait CandidateExtractor {
    fn extract(&self, path: &Path) -> Option<Extracted>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct XmlPreviewExtractor;

impl CandidateExtractor for XmlPreviewExtractor {
    fn extract(&self, path: &Path) -> Option<Extracted> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable candidate");
                return None;
            }
        };
        let metadata = std::fs::metadata(path).ok()?;
        let parsed = match parse_preview(&bytes) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "not a preview file");
                return None;
            }
        };
        let identity = parsed.identity?;
        identity.key()?;

        Some(Extracted {
            identity,
            content_digest: sha256_bytes(&bytes),
            size: metadata.len(),
            mtime: to_utc(metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
            comment_health: parsed.health,
        })
    }
}

#[derive(Debug, Default)]
struct ParsedPreview {
    identity: Option<Identity>,
    health: CommentHealth,
}

fn parse_preview(xml: &[u8]) -> Result<ParsedPreview, String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut out = ParsedPreview::default();
    let mut counter = HealthCounter::default();
    let mut saw_root = false;
    // Text collected for the currently open Comment element and its depth.
    let mut open_comment: Option<(usize, String)> = None;
    let mut depth = 0usize;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| e.to_string())? {
            Event::Start(e) => {
                saw_root = true;
                depth += 1;
                inspect_element(&e, &mut out, &mut counter);
                if open_comment.is_none() && COMMENT_TAGS.contains(&e.local_name().as_ref()) {
                    open_comment = Some((depth, String::new()));
                }
            }
            Event::Empty(e) => {
                saw_root = true;
                inspect_element(&e, &mut out, &mut counter);
                if COMMENT_TAGS.contains(&e.local_name().as_ref()) {
                    counter.observe("");
                }
            }
            Event::Text(t) => {
                if let Some((_, text)) = open_comment.as_mut() {
                    text.push_str(&t.unescape().map_err(|e| e.to_string())?);
                }
            }
            Event::CData(t) => {
                if let Some((_, text)) = open_comment.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::End(_) => {
                if matches!(open_comment, Some((d, _)) if d == depth) {
                    if let Some((_, text)) = open_comment.take() {
                        counter.observe(&text);
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof if depth != 0 => return Err("unexpected end of document".to_string()),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err("no root element".to_string());
    }
    out.health = counter.finish();
    Ok(out)
}

fn inspect_element(e: &BytesStart<'_>, out: &mut ParsedPreview, counter: &mut HealthCounter) {
    let is_identity = out.identity.is_none() && e.local_name().as_ref() == IDENTITY_TAG;
    let mut identity = Identity::default();

    for attr in e.attributes().flatten() {
        let key = attr.key.local_name();
        let value = attr
            .unescape_value()
            .map(|v| v.to_string())
            .unwrap_or_default();
        if COMMENT_ATTRS.contains(&key.as_ref()) {
            counter.observe(&value);
        }
        if is_identity {
            let value = Some(value).filter(|v| !v.is_empty());
            match key.as_ref() {
                b"id" => identity.opaque_id = value,
                b"Name" => identity.display_name = value,
                b"Revision" => identity.revision_raw = value,
                _ => {}
            }
        }
    }

    if is_identity {
        identity.revision_numeric = identity
            .revision_raw
            .as_deref()
            .and_then(|r| r.trim().parse::<f64>().ok())
            .filter(|r| r.is_finite());
        out.identity = Some(identity);
    }
}

#[derive(Debug, Default)]
struct HealthCounter {
    total: u32,
    filled: u32,
    no_space: u32,
}

impl HealthCounter {
    fn observe(&mut self, value: &str) {
        self.total += 1;
        let v = value.trim();
        if !v.is_empty() {
            self.filled += 1;
            if !v.chars().any(char::is_whitespace) {
                self.no_space += 1;
            }
        }
    }

    fn finish(self) -> CommentHealth {
        CommentHealth::new(self.total, self.filled, self.no_space)
    }
}

/// Lowercase hex SHA-256 of a byte slice.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Lowercase hex SHA-256 of a file, streamed in 1 MiB blocks.
pub fn sha256_file(path: &Path) -> Result<String, MergeError> {
    let mut file = std::fs::File::open(path).at("open", path)?;
    let mut hasher = Sha256::new();
    let mut block = vec![0u8; 1 << 20];
    loop {
        let n = file.read(&mut block).at("read", path)?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn to_utc(t: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}
