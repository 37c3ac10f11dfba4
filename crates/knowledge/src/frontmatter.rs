//! Minimal typed frontmatter for vault notes.
//!
//! Notes carry a `---`-fenced header of `key: value` lines with lists
//! rendered as `[a, b, c]`.  The parser is deliberately forgiving: malformed
//! lines are skipped and whatever parsed is returned — a half-readable note
//! is more useful than a read error.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum FrontmatterValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<String>),
}

impl fmt::Display for FrontmatterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrontmatterValue::Text(s) => write!(f, "{s}"),
            FrontmatterValue::Int(n) => write!(f, "{n}"),
            FrontmatterValue::Float(x) => write!(f, "{x}"),
            FrontmatterValue::Bool(b) => write!(f, "{b}"),
            FrontmatterValue::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

impl FrontmatterValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FrontmatterValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FrontmatterValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FrontmatterValue::List(items) => Some(items),
            _ => None,
        }
    }

    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            let items = inner
                .split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect();
            return FrontmatterValue::List(items);
        }
        if raw == "true" {
            return FrontmatterValue::Bool(true);
        }
        if raw == "false" {
            return FrontmatterValue::Bool(false);
        }
        if let Ok(n) = raw.parse::<i64>() {
            return FrontmatterValue::Int(n);
        }
        if let Ok(x) = raw.parse::<f64>() {
            return FrontmatterValue::Float(x);
        }
        FrontmatterValue::Text(raw.to_string())
    }
}

/// Insertion-ordered key/value header.  Keys are unique; re-inserting a key
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    entries: Vec<(String, FrontmatterValue)>,
}

impl Frontmatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FrontmatterValue) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn insert_text(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.insert(key, FrontmatterValue::Text(value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&FrontmatterValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FrontmatterValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the fenced header block, trailing newline included.
    pub fn render(&self) -> String {
        let mut out = String::from("---\n");
        for (key, value) in &self.entries {
            out.push_str(&format!("{key}: {value}\n"));
        }
        out.push_str("---\n");
        out
    }

    /// Best-effort parse of a fenced header.  Lines without a `:` separator
    /// or with an empty key are skipped; this function never fails.
    pub fn parse(block: &str) -> Self {
        let mut fm = Self::new();
        for line in block.lines() {
            let line = line.trim();
            if line.is_empty() || line == "---" {
                continue;
            }
            let Some((key, raw)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            fm.insert(key.to_string(), FrontmatterValue::parse(raw));
        }
        fm
    }
}

/// Split a note into `(frontmatter, body)`.  Notes without a leading fence
/// are treated as all-body with empty frontmatter.
pub fn split_note(content: &str) -> (Frontmatter, String) {
    let Some(rest) = content.strip_prefix("---\n") else {
        return (Frontmatter::new(), content.to_string());
    };
    // Closing fence at the start of a line; an empty header puts it at
    // offset zero.
    let end = if rest.starts_with("---\n") || rest == "---" {
        Some(0)
    } else {
        rest.find("\n---").map(|at| at + 1)
    };
    let Some(end) = end else {
        return (Frontmatter::new(), content.to_string());
    };
    let header = &rest[..end];
    let after_fence = &rest[end + "---".len()..];
    let body = after_fence.strip_prefix('\n').unwrap_or(after_fence);
    let body = body.strip_prefix('\n').unwrap_or(body);
    (Frontmatter::parse(header), body.to_string())
}
