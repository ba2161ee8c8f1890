//! Key namespace construction.
//!
//! Every key the cache layer touches is built here so that cache entries,
//! locks, tag sets and counters from different subsystems can never collide.
//!
//! ## Key Format
//!
//! `{prefix}:{kind}:{part}:{part}...` — e.g. `murmur:cache:user:id:42`
//!
//! Parts are escaped (`%` → `%25`, `:` → `%3A`) so a part that contains the
//! delimiter cannot be confused with two parts.

use std::fmt;

/// Delimiter between key segments.
pub const DELIMITER: char = ':';

/// Resource kind a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// Cached payloads.
    Cache,
    /// Distributed lock records.
    Lock,
    /// Tag member-sets (`tag → {key}`).
    Tag,
    /// Per-key tag metadata (`key → {tag}`).
    TagMeta,
    /// Rate-limit window counters.
    RateLimit,
    /// Shared counters.
    Metrics,
}

impl KeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Lock => "lock",
            Self::Tag => "tag",
            Self::TagMeta => "tagmeta",
            Self::RateLimit => "ratelimit",
            Self::Metrics => "metrics",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic key builder bound to one global prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace {
    prefix: String,
}

impl KeyNamespace {
    /// Create a namespace. The prefix itself is escaped like any other part.
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: escape(prefix.as_ref()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build a key from a kind and its identifying parts.
    pub fn build<S: AsRef<str>>(&self, kind: KeyKind, parts: &[S]) -> String {
        let mut key = String::with_capacity(self.prefix.len() + 16);
        key.push_str(&self.prefix);
        key.push(DELIMITER);
        key.push_str(kind.as_str());
        for part in parts {
            key.push(DELIMITER);
            key.push_str(&escape(part.as_ref()));
        }
        key
    }

    #[inline]
    pub fn cache<S: AsRef<str>>(&self, parts: &[S]) -> String {
        self.build(KeyKind::Cache, parts)
    }

    #[inline]
    pub fn lock<S: AsRef<str>>(&self, parts: &[S]) -> String {
        self.build(KeyKind::Lock, parts)
    }

    /// Member-set key for a tag.
    #[inline]
    pub fn tag(&self, tag: &str) -> String {
        self.build(KeyKind::Tag, &[tag])
    }

    /// Metadata-set key recording which tags a full cache key carries.
    #[inline]
    pub fn tag_meta(&self, cache_key: &str) -> String {
        self.build(KeyKind::TagMeta, &[cache_key])
    }

    #[inline]
    pub fn rate_limit(&self, action: &str, identifier: &str) -> String {
        self.build(KeyKind::RateLimit, &[action, identifier])
    }

    #[inline]
    pub fn metrics<S: AsRef<str>>(&self, parts: &[S]) -> String {
        self.build(KeyKind::Metrics, parts)
    }

    /// Build a key from a delimiter-separated logical path such as
    /// `user:id:42`. Each segment is escaped on its own.
    pub fn path(&self, kind: KeyKind, path: &str) -> String {
        let parts: Vec<&str> = path.split(DELIMITER).collect();
        self.build(kind, &parts)
    }

    /// Inverse of [`path`](Self::path).
    pub fn strip_path(&self, kind: KeyKind, key: &str) -> Option<String> {
        self.strip(kind, key)
            .map(|parts| parts.join(&*DELIMITER.to_string()))
    }

    /// Glob pattern under a kind.
    ///
    /// The prefix is backslash-escaped so it only ever matches itself; the
    /// glob is appended verbatim so `*`, `?` and `[...]` keep their SCAN MATCH
    /// meaning.
    pub fn pattern(&self, kind: KeyKind, glob: &str) -> String {
        format!(
            "{}{DELIMITER}{}{DELIMITER}{glob}",
            escape_glob(&self.prefix),
            kind.as_str()
        )
    }

    /// Split a key built by this namespace back into its unescaped parts.
    ///
    /// Returns `None` if the key belongs to another prefix or kind.
    pub fn strip(&self, kind: KeyKind, key: &str) -> Option<Vec<String>> {
        let rest = key
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(DELIMITER)?
            .strip_prefix(kind.as_str())?;
        if rest.is_empty() {
            return Some(Vec::new());
        }
        let rest = rest.strip_prefix(DELIMITER)?;
        Some(rest.split(DELIMITER).map(unescape).collect())
    }
}

fn escape(part: &str) -> String {
    if !part.contains(['%', DELIMITER]) {
        return part.to_string();
    }
    let mut out = String::with_capacity(part.len() + 4);
    for c in part.chars() {
        match c {
            '%' => out.push_str("%25"),
            DELIMITER => out.push_str("%3A"),
            other => out.push(other),
        }
    }
    out
}

/// Escape SCAN MATCH metacharacters so `text` matches literally.
pub fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unescape(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let mut rest = part;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        if let Some(after) = tail.strip_prefix("%25") {
            out.push('%');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("%3A") {
            out.push(DELIMITER);
            rest = after;
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
