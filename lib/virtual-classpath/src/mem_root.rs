//! In-memory roots.
//!
//! A read-only [`MemoryRoot`] is built once with a [`MemoryRootBuilder`] and
//! then indexed eagerly by the class path. A writable one can be changed at
//! any time, so the class path asks it on every lookup instead.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::entry_path::{segments_of, EntryPath};
use crate::root::{not_a_file, not_found, Root, RootKind};

#[derive(Debug, Clone)]
enum Node {
    Directory(Arc<EntryPath>),
    File { path: Arc<EntryPath>, contents: Bytes },
}

impl Node {
    fn path(&self) -> &Arc<EntryPath> {
        match self {
            Node::Directory(path) => path,
            Node::File { path, .. } => path,
        }
    }
}

/// Keyed by the rendered absolute path. `BTreeMap` ordering puts every
/// directory before its children.
struct MemoryRootInner {
    nodes: BTreeMap<String, Node>,
}

impl MemoryRootInner {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Directory(EntryPath::root()));
        Self { nodes }
    }

    /// Make sure every directory of `segments` exists, returning the deepest.
    fn create_dir_all<'a>(
        &mut self,
        segments: impl Iterator<Item = &'a str>,
    ) -> io::Result<(String, Arc<EntryPath>)> {
        let mut key = String::new();
        let mut current = EntryPath::root();
        for segment in segments {
            key.push('/');
            key.push_str(segment);
            current = match self.nodes.get(&key) {
                Some(Node::Directory(dir)) => dir.clone(),
                Some(Node::File { .. }) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{key} is a file, not a directory"),
                    ));
                }
                None => {
                    let dir = EntryPath::child(&current, segment);
                    self.nodes.insert(key.clone(), Node::Directory(dir.clone()));
                    dir
                }
            };
        }
        if key.is_empty() {
            key.push('/');
        }
        Ok((key, current))
    }

    fn insert_file(&mut self, path: &str, contents: Bytes) -> io::Result<()> {
        let segments: Vec<&str> = segments_of(path).collect();
        let Some((file_name, parents)) = segments.split_last() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot replace the root directory with a file",
            ));
        };
        let (parent_key, parent) = self.create_dir_all(parents.iter().copied())?;

        let key = if parent_key == "/" {
            format!("/{file_name}")
        } else {
            format!("{parent_key}/{file_name}")
        };
        match self.nodes.get_mut(&key) {
            Some(Node::Directory(_)) => Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{key} is a directory"),
            )),
            Some(Node::File { contents: old, .. }) => {
                *old = contents;
                Ok(())
            }
            None => {
                let path = EntryPath::child(&parent, file_name);
                self.nodes.insert(key, Node::File { path, contents });
                Ok(())
            }
        }
    }
}

/// An in-memory tree of files.
pub struct MemoryRoot {
    name: String,
    writable: bool,
    inner: RwLock<MemoryRootInner>,
}

impl MemoryRoot {
    /// Start building a read-only root.
    pub fn builder(name: impl Into<String>) -> MemoryRootBuilder {
        MemoryRootBuilder {
            root: MemoryRoot::new(name.into(), false),
            error: None,
        }
    }

    /// An empty root that can be written to after it was added.
    pub fn read_write(name: impl Into<String>) -> Arc<MemoryRoot> {
        Arc::new(MemoryRoot::new(name.into(), true))
    }

    fn new(name: String, writable: bool) -> Self {
        Self {
            name,
            writable,
            inner: RwLock::new(MemoryRootInner::new()),
        }
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Write (or replace) a file, creating its parent directories.
    pub fn write_file(&self, path: &str, contents: impl Into<Bytes>) -> io::Result<()> {
        self.check_writable()?;
        self.inner.write().insert_file(path, contents.into())
    }

    pub fn create_dir_all(&self, path: &str) -> io::Result<()> {
        self.check_writable()?;
        self.inner.write().create_dir_all(segments_of(path)).map(|_| ())
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is read-only", self.name),
            ))
        }
    }
}

impl fmt::Debug for MemoryRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRoot")
            .field("name", &self.name)
            .field("writable", &self.writable)
            .field("entries", &self.inner.read().nodes.len())
            .finish()
    }
}

impl Root for MemoryRoot {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RootKind<'_> {
        RootKind::Memory {
            writable: self.writable,
        }
    }

    fn entry_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    fn entry_paths(&self) -> Box<dyn Iterator<Item = Arc<EntryPath>> + '_> {
        let paths: Vec<_> = self
            .inner
            .read()
            .nodes
            .values()
            .map(|node| node.path().clone())
            .collect();
        Box::new(paths.into_iter())
    }

    fn resolve(&self, path: &str) -> Option<Arc<EntryPath>> {
        self.inner
            .read()
            .nodes
            .get(path)
            .map(|node| node.path().clone())
    }

    fn read(&self, path: &EntryPath) -> io::Result<Vec<u8>> {
        match self.inner.read().nodes.get(&path.to_string()) {
            Some(Node::File { contents, .. }) => Ok(contents.to_vec()),
            Some(Node::Directory(_)) => Err(not_a_file(self, path)),
            None => Err(not_found(self, path)),
        }
    }
}

/// Builds a read-only [`MemoryRoot`].
pub struct MemoryRootBuilder {
    root: MemoryRoot,
    error: Option<io::Error>,
}

impl MemoryRootBuilder {
    pub fn file(mut self, path: &str, contents: impl Into<Bytes>) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.root.inner.get_mut().insert_file(path, contents.into()) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn dir(mut self, path: &str) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.root.inner.get_mut().create_dir_all(segments_of(path)) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Finish the root, failing if any file clashed with a directory.
    pub fn build(self) -> io::Result<Arc<MemoryRoot>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(Arc::new(self.root)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_creates_parent_directories() {
        let root = MemoryRoot::builder("mem")
            .file("/com/example/Foo.class", &b"foo"[..])
            .file("README.md", &b"readme"[..])
            .build()
            .unwrap();

        let paths: Vec<String> = root.entry_paths().map(|p| p.to_string()).collect();
        assert_eq!(
            paths,
            ["/", "/README.md", "/com", "/com/example", "/com/example/Foo.class"]
        );
        assert_eq!(root.entry_count(), 5);

        let foo = root.resolve("/com/example/Foo.class").unwrap();
        assert_eq!(root.read(&foo).unwrap(), b"foo");
        assert!(root.resolve("/com/example/Bar.class").is_none());

        let dir = root.resolve("/com").unwrap();
        assert_eq!(
            root.read(&dir).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[test]
    fn entries_share_parents() {
        let root = MemoryRoot::builder("mem")
            .file("/a/One.class", &b"1"[..])
            .file("/a/Two.class", &b"2"[..])
            .build()
            .unwrap();

        let one = root.resolve("/a/One.class").unwrap();
        let two = root.resolve("/a/Two.class").unwrap();
        assert!(Arc::ptr_eq(one.parent().unwrap(), two.parent().unwrap()));
    }

    #[test]
    fn file_over_directory_is_rejected() {
        let err = MemoryRoot::builder("mem")
            .file("/a/b", &b""[..])
            .file("/a", &b""[..])
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn read_only_roots_reject_writes() {
        let root = MemoryRoot::builder("mem").build().unwrap();
        assert!(!root.is_writable());
        assert_eq!(
            root.write_file("/a", "b").unwrap_err().kind(),
            io::ErrorKind::PermissionDenied
        );
    }

    #[test]
    fn writable_roots_change_in_place() {
        let root = MemoryRoot::read_write("scratch");
        assert!(matches!(root.kind(), RootKind::Memory { writable: true }));
        assert!(root.resolve("/gen/Stub.class").is_none());

        root.write_file("/gen/Stub.class", "v1").unwrap();
        root.write_file("/gen/Stub.class", "v2").unwrap();

        let stub = root.resolve("/gen/Stub.class").unwrap();
        assert_eq!(root.read(&stub).unwrap(), b"v2");
    }
}
