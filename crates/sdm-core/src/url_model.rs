//! Local file names for URLs given on the command line.
//!
//! The last non-empty path segment of the URL is used, made safe for Linux.
//! URLs without a usable segment fall back to `download.bin`, and names that
//! collide within one batch get a numeric suffix before the extension.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Name used when the URL path yields nothing usable.
pub const FALLBACK_FILE_NAME: &str = "download.bin";

const NAME_MAX: usize = 255;

/// Last non-empty path segment of `url`, without query or fragment.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()?;
    match segment {
        "." | ".." => None,
        s => Some(s.to_string()),
    }
}

/// Make `name` safe as a single Linux path component.
///
/// Separators, NUL, control characters and whitespace become `_` (runs
/// collapse to one); leading and trailing dots and underscores are trimmed;
/// the result is cut to 255 bytes on a char boundary.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let unsafe_char = matches!(c, '\0' | '/' | '\\') || c.is_control() || c.is_whitespace();
        if unsafe_char {
            if !out.ends_with('_') {
                out.push('_');
            }
        } else {
            out.push(c);
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut end = trimmed.len().min(NAME_MAX);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

/// Sanitized file name for `url`, or [`FALLBACK_FILE_NAME`].
pub fn file_name_for(url: &str) -> String {
    file_name_from_url(url)
        .map(|raw| sanitize_file_name(&raw))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

/// Destination paths in `dir` for `urls`, in order, with no two alike.
pub fn destinations_for<S: AsRef<str>>(urls: &[S], dir: &Path) -> Vec<PathBuf> {
    let mut taken = HashSet::new();
    urls.iter()
        .map(|url| {
            let name = file_name_for(url.as_ref());
            let mut candidate = name.clone();
            let mut n = 1u32;
            while !taken.insert(candidate.clone()) {
                candidate = numbered(&name, n);
                n += 1;
            }
            dir.join(candidate)
        })
        .collect()
}

/// `archive.tar.gz` -> `archive-1.tar.gz`; `README` -> `README-1`.
fn numbered(name: &str, n: u32) -> String {
    match name.find('.') {
        Some(dot) if dot > 0 => format!("{}-{n}{}", &name[..dot], &name[dot..]),
        _ => format!("{name}-{n}"),
    }
}
