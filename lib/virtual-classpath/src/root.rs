use std::fmt;
use std::io;
use std::sync::Arc;

use crate::entry_path::EntryPath;

/// How a root gets into the class path.
#[derive(Debug, Clone, Copy)]
pub enum RootKind<'a> {
    /// An aggregate of other roots, each added on its own.
    Composite(&'a [Arc<dyn Root>]),
    /// An in-memory tree. Read-only trees are indexed eagerly, writable ones
    /// are resolved on every lookup.
    Memory { writable: bool },
    /// A read-only archive, indexed by a background scan.
    Archive,
    /// Anything else, resolved on every lookup.
    Opaque,
}

/// Whether a walk should carry on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    Terminate,
}

/// Receives the entries of a root during [`Root::walk`], in pre-order.
pub trait RootVisitor {
    /// Called before the children of a directory. `name` is `None` for the
    /// root directory.
    fn pre_visit_dir(&mut self, name: Option<&str>) -> io::Result<WalkControl>;

    fn visit_file(&mut self, name: &str) -> io::Result<WalkControl>;

    /// Called once every child of the current directory has been visited.
    fn post_visit_dir(&mut self) -> io::Result<WalkControl>;
}

/// A tree of entries contributing paths to a class path.
///
/// The class path never mutates or closes a root, it only asks questions.
pub trait Root: fmt::Debug + Send + Sync + 'static {
    /// Human readable name, used in diagnostics.
    fn name(&self) -> &str;

    fn kind(&self) -> RootKind<'_>;

    /// Number of entries (files and directories) [`Root::entry_paths`] yields.
    fn entry_count(&self) -> usize {
        0
    }

    /// Every entry of the root, directories before their children.
    ///
    /// A read-only memory root that lists nothing here is not indexed, the
    /// class path asks it on every lookup instead.
    fn entry_paths(&self) -> Box<dyn Iterator<Item = Arc<EntryPath>> + '_> {
        Box::new(std::iter::empty())
    }

    /// Resolve a normalized absolute path, `None` if the root has no such
    /// entry.
    fn resolve(&self, path: &str) -> Option<Arc<EntryPath>>;

    /// Walk the whole tree, see [`RootVisitor`].
    fn walk(&self, _visitor: &mut dyn RootVisitor) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} cannot be walked", self.name()),
        ))
    }

    /// Read the contents of a file entry.
    fn read(&self, path: &EntryPath) -> io::Result<Vec<u8>>;
}

pub(crate) fn not_found(root: &dyn Root, path: &EntryPath) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{path} does not exist in {}", root.name()),
    )
}

pub(crate) fn not_a_file(root: &dyn Root, path: &EntryPath) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{path} is a directory in {}", root.name()),
    )
}
