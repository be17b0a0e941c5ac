//! Path conventions for stored invocation paths.
//!
//! Records keep paths exactly as the capturing machine spelled them. The
//! helpers here only produce derived views: a host-friendly display form and
//! the machine-independent form used by the identity hash.

use serde::{Deserialize, Serialize};

/// Separator convention of the machine that produced an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStyle {
    Unix,
    Windows,
}

impl PathStyle {
    pub fn host() -> Self {
        if cfg!(windows) {
            PathStyle::Windows
        } else {
            PathStyle::Unix
        }
    }

    pub fn separator(self) -> char {
        match self {
            PathStyle::Unix => '/',
            PathStyle::Windows => '\\',
        }
    }

    pub(crate) fn flag(self) -> u32 {
        match self {
            PathStyle::Unix => 0,
            PathStyle::Windows => 1,
        }
    }

    pub(crate) fn from_flag(flags: u32) -> Self {
        if flags & 1 == 1 {
            PathStyle::Windows
        } else {
            PathStyle::Unix
        }
    }
}

impl Default for PathStyle {
    fn default() -> Self {
        PathStyle::host()
    }
}

/// Rewrites `stored` with the separators of `target`.
pub fn to_style(stored: &str, target: PathStyle) -> String {
    match target {
        PathStyle::Unix => stored.replace('\\', "/"),
        PathStyle::Windows => stored.replace('/', "\\"),
    }
}

/// Forward-slash form used for comparisons and hashing.
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// True for rooted paths of either convention (`/x`, `\\server\x`, `C:\x`, `C:/x`).
pub fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    if bytes.first().is_some_and(|b| *b == b'/' || *b == b'\\') {
        return true;
    }
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// Parent directory of `path` in normalized form, without a trailing slash.
pub fn parent_dir(path: &str) -> String {
    let normalized = normalize_separators(path);
    match normalized.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
        None => String::new(),
    }
}

/// Final component of `path` under either convention.
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Machine-independent spelling of `path` relative to `root`.
///
/// Paths under `root` become relative; other absolute paths collapse to
/// their final component; relative paths only get their separators fixed.
pub fn relativize(path: &str, root: &str) -> String {
    let normalized = normalize_separators(path);
    let root = normalize_separators(root);
    let root = root.trim_end_matches('/');
    if !root.is_empty() {
        if let Some(rest) = normalized.strip_prefix(root) {
            if let Some(rest) = rest.strip_prefix('/') {
                return rest.to_string();
            }
            if rest.is_empty() {
                return ".".to_string();
            }
        }
    }
    if is_absolute(&normalized) {
        return file_name(&normalized).to_string();
    }
    normalized
}

/// Replaces every absolute path embedded in free text (e.g. a reference
/// alias) with its relativized form.
pub fn canonicalize_text(text: &str, root: &str) -> String {
    if !text.contains(['/', '\\']) {
        return text.to_string();
    }
    text.split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|part| !part.is_empty())
        .map(|part| {
            if is_absolute(part) {
                relativize(part, root)
            } else {
                normalize_separators(part)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
