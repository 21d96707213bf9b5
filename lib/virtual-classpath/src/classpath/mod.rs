//! The lookup facade over every root of a class path.

mod validation;

use std::any::{self, Any, TypeId};
use std::backtrace::Backtrace;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use self::validation::Validation;
use crate::config::ClassPathConfig;
use crate::entry_path::{normalize, EntryPath};
use crate::index::{Entry, FileMap, HashTableFileMap, Located, RootEntry, StandardFileMap};
use crate::registry::FallbackRegistry;
use crate::root::{Root, RootKind};
use crate::scanner::{ArchiveIndexer, ScanScheduler};
use crate::{ClassPathError, Result};

/// A path found in one of the roots of a [`ClassPath`].
pub struct PathResult<D = ()> {
    located: Arc<Located<D>>,
}

impl<D> PathResult<D> {
    fn new(located: Arc<Located<D>>) -> Self {
        PathResult { located }
    }

    pub fn path(&self) -> &Arc<EntryPath> {
        &self.located.path
    }

    /// The root the path was found in.
    pub fn root(&self) -> &Arc<dyn Root> {
        &self.located.origin.root
    }

    /// Metadata attached to the root when it was added.
    pub fn data(&self) -> Option<&Arc<D>> {
        self.located.origin.data.as_ref()
    }

    pub fn read(&self) -> io::Result<Vec<u8>> {
        self.located.origin.root.read(&self.located.path)
    }
}

impl<D> Clone for PathResult<D> {
    fn clone(&self) -> Self {
        PathResult::new(self.located.clone())
    }
}

impl<D> PartialEq for PathResult<D> {
    fn eq(&self, other: &Self) -> bool {
        self.located.origin.ordinal == other.located.origin.ordinal
            && self.located.path.same_path(&other.located.path)
    }
}

impl<D> Eq for PathResult<D> {}

impl<D> fmt::Debug for PathResult<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathResult")
            .field("path", &format_args!("{}", self.located.path))
            .field("root", &self.located.origin.root.name())
            .finish()
    }
}

/// Many roots overlaid into one namespace.
///
/// When several roots contain the same path, the root added first wins.
/// Read-only memory roots are indexed when added, archives are indexed by
/// background scans and every other root is asked directly on each lookup.
/// Lookups never wait for a scan: until an archive has been indexed it is
/// asked directly too.
///
/// `D` is the type of the metadata callers can attach to each root.
pub struct ClassPath<D = ()> {
    inner: Arc<Inner<D>>,
}

struct Inner<D> {
    config: ClassPathConfig,
    files: Box<dyn FileMap<D>>,
    fallback: FallbackRegistry<D>,
    scanner: ScanScheduler,
    /// Next registration ordinal. Held for the whole of an `add_root`.
    registration: Mutex<u64>,
    validation: Option<Validation<D>>,
    print_full_detail: AtomicBool,
}

impl<D: Send + Sync + 'static> Default for ClassPath<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Clone for ClassPath<D> {
    fn clone(&self) -> Self {
        ClassPath {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Send + Sync + 'static> ClassPath<D> {
    /// A class path configured from the environment, see
    /// [`ClassPathConfig::from_env`].
    pub fn new() -> Self {
        Self::with_config(ClassPathConfig::from_env())
    }

    pub fn with_config(config: ClassPathConfig) -> Self {
        let files: Box<dyn FileMap<D>> = if config.custom_table {
            Box::new(HashTableFileMap::new(config.validate))
        } else {
            Box::new(StandardFileMap::new(config.validate))
        };
        let validation = config.validate.then(Validation::new);

        ClassPath {
            inner: Arc::new(Inner {
                scanner: ScanScheduler::new(config.max_scanners),
                config,
                files,
                fallback: FallbackRegistry::new(),
                registration: Mutex::new(0),
                validation,
                print_full_detail: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ClassPathConfig {
        &self.inner.config
    }

    /// Add a root. Paths it shares with roots added earlier stay hidden by
    /// those.
    pub fn add_root(&self, root: Arc<dyn Root>, data: Option<D>) {
        self.inner.add_root(root, data.map(Arc::new));
    }

    /// Add a root with type-erased metadata, checking it is a `D`.
    pub fn add_root_any(
        &self,
        root: Arc<dyn Root>,
        data: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Result<()> {
        let data = match data {
            None => None,
            Some(_) if TypeId::of::<D>() == TypeId::of::<()>() => {
                return Err(ClassPathError::MetadataNotDeclared);
            }
            Some(data) => match data.downcast::<D>() {
                Ok(data) => Some(data),
                Err(_) => {
                    return Err(ClassPathError::MetadataTypeMismatch {
                        expected: any::type_name::<D>(),
                    });
                }
            },
        };
        self.inner.add_root(root, data);
        Ok(())
    }

    /// The winning resource for `path`, `None` if no root has it.
    ///
    /// # Panics
    ///
    /// With validation enabled, panics if the index disagrees with asking
    /// every root. See [`ClassPath::try_find_resource`].
    pub fn find_resource(&self, path: &str) -> Option<PathResult<D>> {
        match self.try_find_resource(path) {
            Ok(found) => found,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn try_find_resource(&self, path: &str) -> Result<Option<PathResult<D>>> {
        let key = normalize(path);
        let found = match &self.inner.validation {
            None => self.inner.find(&key),
            Some(validation) => validation.check_find(&self.inner, &key)?,
        };
        Ok(found.map(PathResult::new))
    }

    /// Every root's resource for `path`, in the order the roots were added.
    ///
    /// # Panics
    ///
    /// Like [`ClassPath::find_resource`].
    pub fn get_all_resources(&self, path: &str) -> Vec<PathResult<D>> {
        match self.try_get_all_resources(path) {
            Ok(found) => found,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn try_get_all_resources(&self, path: &str) -> Result<Vec<PathResult<D>>> {
        let key = normalize(path);
        let found = match &self.inner.validation {
            None => self.inner.get_all(&key),
            Some(validation) => validation.check_get_all(&self.inner, &key)?,
        };
        Ok(found.into_iter().map(PathResult::new).collect())
    }

    pub fn find_path(&self, path: &str) -> Option<Arc<EntryPath>> {
        self.find_resource(path).map(|found| found.path().clone())
    }

    pub fn get_resources(&self, path: &str) -> Vec<Arc<EntryPath>> {
        self.get_all_resources(path)
            .into_iter()
            .map(|found| found.path().clone())
            .collect()
    }

    /// The contents of the winning resource for `path`.
    pub fn read_resource(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match self.find_resource(path) {
            Some(found) => Ok(Some(found.read()?)),
            None => Ok(None),
        }
    }

    /// Wait until every queued archive scan has finished. Returns `false` if
    /// `timeout` elapsed first.
    pub fn wait_for_scans(&self, timeout: Duration) -> bool {
        self.inner.scanner.wait_idle(timeout)
    }

    /// Number of roots lookups still ask directly.
    pub fn pending_fallback_roots(&self) -> usize {
        self.inner.fallback.len()
    }

    /// Number of paths in the index.
    pub fn indexed_len(&self) -> usize {
        self.inner.files.len()
    }
}

impl<D> fmt::Debug for ClassPath<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassPath")
            .field("config", &self.inner.config)
            .field("indexed", &self.inner.files.len())
            .field("fallback", &self.inner.fallback.len())
            .field("scanner", &self.inner.scanner)
            .finish()
    }
}

impl<D: Send + Sync + 'static> Inner<D> {
    fn add_root(self: &Arc<Self>, root: Arc<dyn Root>, data: Option<Arc<D>>) {
        let mut next_ordinal = self.registration.lock();
        self.add_constituent(&root, data.as_ref(), &mut next_ordinal);
    }

    fn add_constituent(
        self: &Arc<Self>,
        root: &Arc<dyn Root>,
        data: Option<&Arc<D>>,
        next_ordinal: &mut u64,
    ) {
        let entry = match root.kind() {
            RootKind::Composite(members) => {
                for member in members {
                    self.add_constituent(member, data, next_ordinal);
                }
                return;
            }
            RootKind::Memory { writable: false } => {
                let entry = next_entry(root, data, next_ordinal);
                self.index_memory_root(&entry);
                entry
            }
            RootKind::Memory { writable: true } => {
                tracing::warn!(
                    root = %root.name(),
                    "Adding a read/write memory root to the class path, every lookup will have to ask it directly"
                );
                let entry = next_entry(root, data, next_ordinal);
                self.fallback.insert(entry.clone());
                entry
            }
            RootKind::Archive => {
                let entry = next_entry(root, data, next_ordinal);
                self.fallback.insert(entry.clone());
                let inner = self.clone();
                let scanned = entry.clone();
                self.scanner.submit(move || inner.scan_archive(&scanned));
                entry
            }
            RootKind::Opaque => {
                if !self.config.development {
                    tracing::warn!(
                        root = %root.name(),
                        "Adding an unindexed root to the class path, every lookup will have to ask it directly"
                    );
                }
                let entry = next_entry(root, data, next_ordinal);
                self.fallback.insert(entry.clone());
                entry
            }
        };

        if let Some(validation) = &self.validation {
            validation.push(entry);
        }
    }

    /// Index every entry of a read-only memory root. A root that lists no
    /// entries is asked directly instead.
    fn index_memory_root(&self, entry: &Arc<RootEntry<D>>) {
        let paths: Vec<_> = entry.root.entry_paths().collect();
        if paths.is_empty() {
            tracing::warn!(
                root = %entry.root.name(),
                "Read-only memory root lists no entries, every lookup will have to ask it directly"
            );
            self.fallback.insert(entry.clone());
            return;
        }

        self.files.reserve(paths.len());
        for path in paths {
            self.files.put(Located::new(path, entry.clone()));
        }
    }

    fn scan_archive(&self, entry: &Arc<RootEntry<D>>) {
        let start = Instant::now();
        let mut indexer = ArchiveIndexer::new(self.files.as_ref(), entry);
        match entry.root.walk(&mut indexer) {
            Ok(()) => {
                self.fallback.remove(entry.ordinal);
                tracing::info!(
                    root = %entry.root.name(),
                    folders = indexer.folders(),
                    files = indexer.files(),
                    elapsed = ?start.elapsed(),
                    "Indexed archive"
                );
            }
            Err(e) => {
                tracing::warn!(
                    root = %entry.root.name(),
                    error = &e as &dyn std::error::Error,
                    "Failed to index archive, lookups will keep asking it directly"
                );
            }
        }
    }

    fn full_detail(&self) -> bool {
        self.print_full_detail.load(Ordering::Relaxed)
    }

    /// The winner for an already normalized `key`.
    fn find(&self, key: &str) -> Option<Arc<Located<D>>> {
        // Snapshot the fallback roots before asking the index. A scan that
        // finishes in between then shows up in at least one of the two.
        let fallback = self.fallback.snapshot();
        let indexed = self.files.get(key).map(|entry| self.pick(key, &entry));
        let limit = indexed
            .as_ref()
            .map_or(u64::MAX, |located| located.origin.ordinal);

        let mut found = indexed;
        for root in fallback.iter().take_while(|root| root.ordinal < limit) {
            if let Some(path) = root.root.resolve(key) {
                found = Some(Located::new(path, root.clone()));
                break;
            }
        }

        if self.full_detail() {
            tracing::trace!(
                path = key,
                fallback = ?fallback,
                index = %self.files.describe(key),
                found = ?found,
                "find_resource"
            );
        }
        found
    }

    /// The location of `entry` that wins, warning once about ambiguity.
    fn pick(&self, key: &str, entry: &Entry<D>) -> Arc<Located<D>> {
        let locations = entry.locations();
        let mut winner = &locations[0];
        for located in &locations[1..] {
            if located.origin.ordinal < winner.origin.ordinal {
                winner = located;
            }
        }

        if let Entry::Overlap(overlap) = entry {
            if overlap.claim_warning() {
                let roots: Vec<&str> = locations.iter().map(|l| l.origin.root.name()).collect();
                if key == "/" {
                    tracing::warn!(
                        roots = ?roots,
                        backtrace = %Backtrace::capture(),
                        "Every root contains '/', but only a single one can be returned!"
                    );
                } else {
                    tracing::warn!(
                        roots = ?roots,
                        "Multiple paths added for '{key}', but only a single one can be returned!"
                    );
                }
            }
        }
        winner.clone()
    }

    fn get_all(&self, key: &str) -> Vec<Arc<Located<D>>> {
        let fallback = self.fallback.snapshot();
        let mut found = self
            .files
            .get(key)
            .map(|entry| entry.locations().to_vec())
            .unwrap_or_default();

        for root in fallback.iter() {
            // A root being scanned can be in both.
            if found.iter().any(|l| l.origin.ordinal == root.ordinal) {
                continue;
            }
            if let Some(path) = root.root.resolve(key) {
                found.push(Located::new(path, root.clone()));
            }
        }
        found.sort_by_key(|located| located.origin.ordinal);
        found.dedup_by_key(|located| located.origin.ordinal);

        if self.full_detail() {
            tracing::trace!(
                path = key,
                fallback = ?fallback,
                index = %self.files.describe(key),
                found = ?found,
                "get_all_resources"
            );
        }
        found
    }
}

fn next_entry<D>(
    root: &Arc<dyn Root>,
    data: Option<&Arc<D>>,
    next_ordinal: &mut u64,
) -> Arc<RootEntry<D>> {
    let entry = Arc::new(RootEntry {
        ordinal: *next_ordinal,
        root: root.clone(),
        data: data.cloned(),
    });
    *next_ordinal += 1;
    entry
}
