//! The path index: normalized path strings mapped to the roots defining them.
//!
//! Nodes are immutable once published. A `put` builds a replacement node for
//! the bucket and swaps it in, so a reader always sees either the old or the
//! new node, never a half-written one.

mod standard;
mod table;

use std::fmt::{self, Write as _};
use std::iter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) use standard::StandardFileMap;
pub(crate) use table::HashTableFileMap;

use crate::entry_path::EntryPath;
use crate::root::Root;

/// A root registered with a class path.
pub(crate) struct RootEntry<D> {
    /// Registration order, lower wins.
    pub ordinal: u64,
    pub root: Arc<dyn Root>,
    pub data: Option<Arc<D>>,
}

impl<D> fmt::Debug for RootEntry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.ordinal, self.root.name())
    }
}

/// A path inside a specific root.
pub(crate) struct Located<D> {
    pub path: Arc<EntryPath>,
    pub origin: Arc<RootEntry<D>>,
}

impl<D> Located<D> {
    pub fn new(path: Arc<EntryPath>, origin: Arc<RootEntry<D>>) -> Arc<Self> {
        Arc::new(Located { path, origin })
    }
}

impl<D> fmt::Debug for Located<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {:?}", self.path, self.origin)
    }
}

/// The same logical path defined by more than one root, in `put` order.
pub(crate) struct Overlap<D> {
    paths: Arc<[Arc<Located<D>>]>,
    warned: AtomicBool,
}

impl<D> Overlap<D> {
    /// Returns `true` the first time it is called on this overlap.
    pub fn claim_warning(&self) -> bool {
        !self.warned.swap(true, Ordering::Relaxed)
    }
}

/// Every root defining one logical path.
pub(crate) enum Entry<D> {
    Single(Arc<Located<D>>),
    Overlap(Arc<Overlap<D>>),
}

impl<D> Clone for Entry<D> {
    fn clone(&self) -> Self {
        match self {
            Entry::Single(located) => Entry::Single(located.clone()),
            Entry::Overlap(overlap) => Entry::Overlap(overlap.clone()),
        }
    }
}

impl<D> Entry<D> {
    pub fn locations(&self) -> &[Arc<Located<D>>] {
        match self {
            Entry::Single(located) => std::slice::from_ref(located),
            Entry::Overlap(overlap) => &overlap.paths,
        }
    }

    /// The path every location of this entry shares.
    pub fn path(&self) -> &Arc<EntryPath> {
        match self {
            Entry::Single(located) => &located.path,
            Entry::Overlap(overlap) => &overlap.paths[0].path,
        }
    }

    /// A new entry with `located` appended. The warning flag starts over.
    fn extend(&self, located: Arc<Located<D>>) -> Entry<D> {
        let paths: Arc<[Arc<Located<D>>]> = self
            .locations()
            .iter()
            .cloned()
            .chain(iter::once(located))
            .collect();
        Entry::Overlap(Arc::new(Overlap {
            paths,
            warned: AtomicBool::new(false),
        }))
    }
}

impl<D> fmt::Debug for Entry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Single(located) => write!(f, "single {located:?}"),
            Entry::Overlap(overlap) => f.debug_list().entries(overlap.paths.iter()).finish(),
        }
    }
}

/// The contents of a bucket.
pub(crate) enum Node<D> {
    Entry(Entry<D>),
    /// Distinct logical paths sharing a bucket.
    Collision(Box<[Entry<D>]>),
}

impl<D> Node<D> {
    pub fn entries(&self) -> &[Entry<D>] {
        match self {
            Node::Entry(entry) => std::slice::from_ref(entry),
            Node::Collision(entries) => entries,
        }
    }
}

impl<D> fmt::Debug for Node<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Entry(entry) => write!(f, "{entry:?}"),
            Node::Collision(entries) => {
                f.write_str("collision ")?;
                f.debug_list().entries(entries.iter()).finish()
            }
        }
    }
}

/// A concurrent map from normalized paths to the roots defining them.
pub(crate) trait FileMap<D>: Send + Sync {
    /// The entry for `key`, which must be normalized.
    fn get(&self, key: &str) -> Option<Entry<D>>;

    /// Record that `located.path` exists in `located.origin`. Never fails.
    fn put(&self, located: Arc<Located<D>>);

    /// Make room for `additional` more paths.
    fn reserve(&self, additional: usize);

    /// Number of paths put so far.
    fn len(&self) -> usize;

    /// Human readable state of the bucket `key` falls into.
    fn describe(&self, key: &str) -> String;
}

/// The node replacing `current` once `located` is put into its bucket.
pub(crate) fn compute_new_node<D>(current: Option<&Node<D>>, located: Arc<Located<D>>) -> Node<D> {
    match current {
        None => Node::Entry(Entry::Single(located)),
        Some(Node::Entry(entry)) => {
            if entry.path().same_path(&located.path) {
                Node::Entry(entry.extend(located))
            } else {
                Node::Collision(Box::new([entry.clone(), Entry::Single(located)]))
            }
        }
        Some(Node::Collision(entries)) => {
            let mut entries = entries.to_vec();
            match entries
                .iter()
                .position(|entry| entry.path().same_path(&located.path))
            {
                Some(i) => entries[i] = entries[i].extend(located),
                None => entries.push(Entry::Single(located)),
            }
            Node::Collision(entries.into_boxed_slice())
        }
    }
}

/// Find the entry for `key` inside a bucket.
///
/// With `check_segments` set every segment comparison is repeated as a plain
/// string comparison, and a disagreement is fatal.
pub(crate) fn lookup<D>(node: &Node<D>, key: &str, check_segments: bool) -> Option<Entry<D>> {
    node.entries()
        .iter()
        .find(|entry| entry_matches(entry, key, check_segments))
        .cloned()
}

fn entry_matches<D>(entry: &Entry<D>, key: &str, check_segments: bool) -> bool {
    let path = entry.path();
    let matched = path.matches(key);
    if check_segments {
        let rendered = path.to_string();
        if matched != (rendered == key) {
            panic!(
                "Segment comparison of '{rendered}' against '{key}' returned {matched}, but string comparison returned {}",
                !matched
            );
        }
    }
    matched
}

pub(crate) fn describe_bucket<D>(
    key: &str,
    hash: u32,
    bucket: Option<usize>,
    node: Option<&Node<D>>,
) -> String {
    let mut out = format!("key '{key}' hash {hash:#010x}");
    if let Some(bucket) = bucket {
        let _ = write!(out, " bucket {bucket}");
    }
    match node {
        None => out.push_str(": empty"),
        Some(node) => {
            let _ = write!(out, ": {node:?}");
        }
    }
    out
}
