//! Output finalization: payload assembly and file naming.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::encoder::EncodedChunk;

/// Name used when sanitizing leaves nothing.
pub const EMPTY_NAME_FALLBACK: &str = "vizrec-export";

/// Concatenate chunks, in order, into one payload.
pub fn assemble_payload(chunks: &[EncodedChunk]) -> Arc<[u8]> {
    let total = chunks.iter().map(|c| c.data.len()).sum();
    let mut payload = Vec::with_capacity(total);
    for chunk in chunks {
        payload.extend_from_slice(&chunk.data);
    }
    Arc::from(payload)
}

/// File extension (with dot) for an encoding identifier.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let mime = mime_type.to_ascii_lowercase();
    if mime.contains("mp4") {
        ".mp4"
    } else if mime.contains("webm") {
        ".webm"
    } else if mime.contains("ogg") {
        ".ogv"
    } else {
        ".webm"
    }
}

/// Default base name for recordings made on `date`.
pub fn default_base_name(date: NaiveDate) -> String {
    format!("vizrec-export-{}", date.format("%Y-%m-%d"))
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, '_' | '-' | '(' | ')' | '[' | ']' | '.')
        || c.is_whitespace()
}

/// Make `name` safe to use as a file name.
///
/// Runs of disallowed characters become `-`, whitespace runs become `_`,
/// repeated `_` collapse, and leading/trailing `_`/`-` are trimmed.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_bad_run = false;
    for c in name.chars() {
        if is_allowed(c) {
            in_bad_run = false;
            out.push(c);
        } else if !in_bad_run {
            in_bad_run = true;
            out.push('-');
        }
    }

    let mut collapsed = String::with_capacity(out.len());
    let mut prev_underscore = false;
    for c in out.chars() {
        let c = if c.is_whitespace() { '_' } else { c };
        if c == '_' {
            if prev_underscore {
                continue;
            }
            prev_underscore = true;
        } else {
            prev_underscore = false;
        }
        collapsed.push(c);
    }

    let trimmed = collapsed.trim_matches(|c| c == '_' || c == '-');
    if trimmed.is_empty() {
        EMPTY_NAME_FALLBACK.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Resolve the final file name for an artifact.
///
/// Precedence: explicitly configured name, then the name frozen at start,
/// then a dated default.
pub fn resolve_file_name(
    configured: Option<&str>,
    start_name: Option<&str>,
    mime_type: &str,
    today: NaiveDate,
) -> String {
    fn usable(name: Option<&str>) -> Option<&str> {
        name.map(str::trim).filter(|n| !n.is_empty())
    }
    let base = usable(configured)
        .or_else(|| usable(start_name))
        .map(str::to_string)
        .unwrap_or_else(|| default_base_name(today));
    let mut name = sanitize_file_name(&base);
    let ext = extension_for_mime(mime_type);
    if !name.to_ascii_lowercase().ends_with(ext) {
        name.push_str(ext);
    }
    name
}
