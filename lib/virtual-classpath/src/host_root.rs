use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::entry_path::{segments_of, EntryPath};
use crate::root::{Root, RootKind};

/// A directory on the host filesystem.
///
/// Directories can change under our feet, so they are never indexed: every
/// lookup that misses the index asks the host.
#[derive(Debug, Clone)]
pub struct HostRoot {
    name: String,
    root: PathBuf,
}

pub fn canonicalize(path: &Path) -> io::Result<PathBuf> {
    if !path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        ));
    }
    dunce::canonicalize(path)
}

// Copied from cargo
// https://github.com/rust-lang/cargo/blob/fede83ccf973457de319ba6fa0e36ead454d2e20/src/cargo/util/paths.rs#L61
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        PathBuf::from(c.as_os_str())
    } else {
        PathBuf::new()
    };

    for component in components {
        match component {
            Component::Prefix(..) => unreachable!(),
            Component::RootDir => {
                ret.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                ret.pop();
            }
            Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}

impl HostRoot {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Arc<HostRoot>> {
        let root = canonicalize(&normalize_path(&root.into()))?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }

        Ok(Arc::new(HostRoot {
            name: root.display().to_string(),
            root,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Map a class path key onto the host, never escaping the root.
    fn host_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in segments_of(key) {
            if segment != ".." {
                path.push(segment);
            }
        }
        path
    }
}

impl Root for HostRoot {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RootKind<'_> {
        RootKind::Opaque
    }

    fn resolve(&self, path: &str) -> Option<Arc<EntryPath>> {
        fs::metadata(self.host_path(path))
            .ok()
            .map(|_| EntryPath::parse(path))
    }

    fn read(&self, path: &EntryPath) -> io::Result<Vec<u8>> {
        fs::read(self.host_path(&path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_and_read() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("com/example")).unwrap();
        fs::write(dir.path().join("com/example/Foo.class"), b"foo").unwrap();

        let root = HostRoot::new(dir.path()).unwrap();
        assert!(matches!(root.kind(), RootKind::Opaque));

        let foo = root.resolve("/com/example/Foo.class").unwrap();
        assert_eq!(foo.to_string(), "/com/example/Foo.class");
        assert_eq!(root.read(&foo).unwrap(), b"foo");
        assert!(root.resolve("/com/example").is_some());
        assert!(root.resolve("/com/example/Bar.class").is_none());
    }

    #[test]
    fn parent_segments_stay_inside_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("inner");
        fs::create_dir_all(&inner).unwrap();
        fs::write(dir.path().join("outside.txt"), b"secret").unwrap();

        let root = HostRoot::new(&inner).unwrap();
        assert!(root.resolve("/../outside.txt").is_none());
    }

    #[test]
    fn files_are_not_roots() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.txt");
        fs::write(&file, b"").unwrap();

        assert_eq!(
            HostRoot::new(&file).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
        assert_eq!(
            HostRoot::new(dir.path().join("missing")).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn normalize_path_drops_relative_components() {
        assert_eq!(
            normalize_path(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
    }
}
