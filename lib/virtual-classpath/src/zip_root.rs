//! Zip (and jar) archives as class path roots.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use zip::ZipArchive;

use crate::entry_path::{segments_of, EntryPath};
use crate::root::{not_a_file, not_found, Root, RootKind, RootVisitor, WalkControl};
use crate::Result;

/// Upper bound on the buffer reserved before reading an entry.
const MAX_PREALLOCATION: u64 = 64 * 1024;

trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

#[derive(Debug)]
struct ZipEntry {
    path: Arc<EntryPath>,
    /// Name of the entry inside the archive, `None` for directories.
    file_name: Option<String>,
}

#[derive(Debug, Default)]
struct DirNode {
    children: BTreeMap<String, TreeNode>,
}

#[derive(Debug)]
enum TreeNode {
    Dir(DirNode),
    File,
}

/// A read-only root backed by a zip archive.
///
/// The central directory is read once when the root is opened; file contents
/// are decompressed on demand.
pub struct ZipRoot {
    name: String,
    archive: Mutex<ZipArchive<Box<dyn ReadSeek>>>,
    entries: BTreeMap<String, ZipEntry>,
    tree: DirNode,
}

impl ZipRoot {
    /// Open an archive on the host filesystem.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<ZipRoot>> {
        let path = path.as_ref();
        let file = BufReader::new(File::open(path)?);
        Self::from_reader(path.display().to_string(), Box::new(file))
    }

    /// Use an archive that is already in memory.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Bytes>) -> Result<Arc<ZipRoot>> {
        Self::from_reader(name.into(), Box::new(Cursor::new(bytes.into())))
    }

    fn from_reader(name: String, reader: Box<dyn ReadSeek>) -> Result<Arc<ZipRoot>> {
        let archive = ZipArchive::new(reader)?;

        let mut entries = BTreeMap::new();
        let mut tree = DirNode::default();
        let root = EntryPath::root();
        entries.insert(
            "/".to_string(),
            ZipEntry {
                path: root.clone(),
                file_name: None,
            },
        );

        for file_name in archive.file_names() {
            if segments_of(file_name).any(|segment| segment == "..") {
                tracing::warn!(
                    archive = %name,
                    entry = file_name,
                    "Skipping archive entry which escapes the archive root"
                );
                continue;
            }
            let is_dir = file_name.ends_with('/') || file_name.ends_with('\\');
            insert_entry(&mut entries, &mut tree, &root, file_name, is_dir);
        }

        Ok(Arc::new(ZipRoot {
            name,
            archive: Mutex::new(archive),
            entries,
            tree,
        }))
    }

    fn walk_dir(
        &self,
        dir: &DirNode,
        name: Option<&str>,
        visitor: &mut dyn RootVisitor,
    ) -> io::Result<WalkControl> {
        if visitor.pre_visit_dir(name)? == WalkControl::Terminate {
            return Ok(WalkControl::Terminate);
        }
        for (child_name, child) in &dir.children {
            let control = match child {
                TreeNode::Dir(sub_dir) => self.walk_dir(sub_dir, Some(child_name), visitor)?,
                TreeNode::File => visitor.visit_file(child_name)?,
            };
            if control == WalkControl::Terminate {
                return Ok(WalkControl::Terminate);
            }
        }
        visitor.post_visit_dir()
    }
}

fn insert_entry(
    entries: &mut BTreeMap<String, ZipEntry>,
    tree: &mut DirNode,
    root: &Arc<EntryPath>,
    file_name: &str,
    is_dir: bool,
) {
    let segments: Vec<&str> = segments_of(file_name).collect();
    let mut key = String::with_capacity(file_name.len() + 1);
    let mut parent = root.clone();
    let mut node = tree;

    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        let dir = !last || is_dir;
        key.push('/');
        key.push_str(segment);

        let path = match entries.entry(key.clone()) {
            Entry::Occupied(existing) => {
                let existing = existing.get();
                if existing.file_name.is_some() && dir {
                    // A file is in the way of a directory, the archive is
                    // malformed. Keep whichever came first.
                    return;
                }
                existing.path.clone()
            }
            Entry::Vacant(vacant) => {
                let path = EntryPath::child(&parent, segment);
                vacant.insert(ZipEntry {
                    path: path.clone(),
                    file_name: (!dir).then(|| file_name.to_string()),
                });
                path
            }
        };

        let child = node
            .children
            .entry(segment.to_string())
            .or_insert_with(|| {
                if dir {
                    TreeNode::Dir(DirNode::default())
                } else {
                    TreeNode::File
                }
            });
        match child {
            TreeNode::Dir(sub_dir) => node = sub_dir,
            TreeNode::File => return,
        }
        parent = path;
    }
}

impl fmt::Debug for ZipRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipRoot")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Root for ZipRoot {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RootKind<'_> {
        RootKind::Archive
    }

    fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn entry_paths(&self) -> Box<dyn Iterator<Item = Arc<EntryPath>> + '_> {
        Box::new(self.entries.values().map(|entry| entry.path.clone()))
    }

    fn resolve(&self, path: &str) -> Option<Arc<EntryPath>> {
        self.entries.get(path).map(|entry| entry.path.clone())
    }

    fn walk(&self, visitor: &mut dyn RootVisitor) -> io::Result<()> {
        self.walk_dir(&self.tree, None, visitor).map(|_| ())
    }

    fn read(&self, path: &EntryPath) -> io::Result<Vec<u8>> {
        let entry = self
            .entries
            .get(&path.to_string())
            .ok_or_else(|| not_found(self, path))?;
        let file_name = entry
            .file_name
            .as_deref()
            .ok_or_else(|| not_a_file(self, path))?;

        let mut archive = self.archive.lock();
        let mut file = archive
            .by_name(file_name)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        // The declared size is only a hint from the archive.
        let mut contents = Vec::with_capacity(file.size().min(MAX_PREALLOCATION) as usize);
        file.read_to_end(&mut contents)?;
        Ok(contents)
    }
}
