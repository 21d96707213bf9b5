//! Paths inside a root.
//!
//! An [`EntryPath`] is a node in a persistent tree: every path points at its
//! parent, so the entries of an archive share their directory prefixes
//! instead of each owning a full string. Paths are always absolute, `/` is
//! the root of the tree.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

const HASH_MULTIPLIER: u32 = 31;

/// Hash of a normalized absolute path string.
///
/// This is the key of the path index. [`EntryPath::hash_code`] produces the
/// same value without rendering the path.
pub fn hash_str(path: &str) -> u32 {
    hash_bytes(0, path.as_bytes())
}

fn hash_bytes(seed: u32, bytes: &[u8]) -> u32 {
    bytes.iter().fold(seed, |hash, b| {
        hash.wrapping_mul(HASH_MULTIPLIER).wrapping_add(*b as u32)
    })
}

/// Normalize a lookup key into the absolute form used by the index.
///
/// Leading slashes are added, empty and `.` segments removed and `..` pops a
/// segment (never above the root). Only allocates when the input isn't
/// already normalized.
pub fn normalize(path: &str) -> Cow<'_, str> {
    if is_normalized(path) {
        return Cow::Borrowed(path);
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in segments_of(path) {
        match segment {
            ".." => {
                segments.pop();
            }
            name => segments.push(name),
        }
    }

    if segments.is_empty() {
        return Cow::Borrowed("/");
    }

    let mut out = String::with_capacity(path.len() + 1);
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    Cow::Owned(out)
}

fn is_normalized(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    if !path.starts_with('/') || path.ends_with('/') || path.contains('\\') {
        return false;
    }
    path[1..]
        .split('/')
        .all(|segment| !matches!(segment, "" | "." | ".."))
}

/// Non-empty segments of a path, `.` excluded, `\` treated as a separator.
pub(crate) fn segments_of(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
}

pub struct EntryPath {
    parent: Option<Arc<EntryPath>>,
    name: Box<str>,
    /// Length of the rendered absolute path.
    len: usize,
    depth: usize,
    hash: u32,
}

impl EntryPath {
    /// The root directory, `/`.
    pub fn root() -> Arc<EntryPath> {
        Arc::new(EntryPath {
            parent: None,
            name: "".into(),
            len: 1,
            depth: 0,
            hash: hash_str("/"),
        })
    }

    /// Parse a path, creating a fresh chain of parents.
    pub fn parse(path: &str) -> Arc<EntryPath> {
        let mut current = EntryPath::root();
        for segment in segments_of(path) {
            current = match segment {
                ".." => current.parent.clone().unwrap_or(current),
                name => EntryPath::child(&current, name),
            };
        }
        current
    }

    /// A path named `name` inside `parent`.
    pub fn child(parent: &Arc<EntryPath>, name: &str) -> Arc<EntryPath> {
        debug_assert!(!name.is_empty() && !name.contains('/'));

        let (seed, base_len) = if parent.is_root() {
            (0, 0)
        } else {
            (parent.hash, parent.len)
        };
        let hash = hash_bytes(hash_bytes(seed, b"/"), name.as_bytes());

        Arc::new(EntryPath {
            parent: Some(parent.clone()),
            name: name.into(),
            len: base_len + 1 + name.len(),
            depth: parent.depth + 1,
            hash,
        })
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn parent(&self) -> Option<&Arc<EntryPath>> {
        self.parent.as_ref()
    }

    /// The last segment, empty for the root.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of segments below the root.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Length in bytes of the rendered absolute path.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false, the shortest path is `/`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Same value as `hash_str(&self.to_string())`.
    pub fn hash_code(&self) -> u32 {
        self.hash
    }

    /// Whether this path renders as exactly `key`.
    ///
    /// Compares segments from the last one backwards, without rendering this
    /// path. `key` must be normalized.
    pub fn matches(&self, key: &str) -> bool {
        if key.len() != self.len {
            return false;
        }
        if self.is_root() {
            return key == "/";
        }

        let key = key.as_bytes();
        let mut offset = key.len();
        let mut current = self;
        while let Some(parent) = &current.parent {
            let name = current.name.as_bytes();
            let Some(start) = offset.checked_sub(name.len()) else {
                return false;
            };
            if &key[start..offset] != name {
                return false;
            }
            let Some(slash) = start.checked_sub(1) else {
                return false;
            };
            if key[slash] != b'/' {
                return false;
            }
            offset = slash;
            current = parent;
        }

        offset == 0
    }

    /// Whether both paths render to the same string.
    pub fn same_path(&self, other: &EntryPath) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        if self.hash != other.hash || self.len != other.len || self.depth != other.depth {
            return false;
        }

        let mut a = self;
        let mut b = other;
        loop {
            if std::ptr::eq(a, b) {
                return true;
            }
            if a.name != b.name {
                return false;
            }
            match (&a.parent, &b.parent) {
                (Some(pa), Some(pb)) => {
                    a = pa;
                    b = pb;
                }
                (None, None) => return true,
                _ => return false,
            }
        }
    }

    fn write_to(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            None => Ok(()),
            Some(parent) => {
                parent.write_to(f)?;
                write!(f, "/{}", self.name)
            }
        }
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("/")
        } else {
            self.write_to(f)
        }
    }
}

impl fmt::Debug for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryPath({self})")
    }
}

impl PartialEq for EntryPath {
    fn eq(&self, other: &Self) -> bool {
        self.same_path(other)
    }
}

impl Eq for EntryPath {}
