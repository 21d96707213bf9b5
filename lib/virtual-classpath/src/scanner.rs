//! Background indexing of archive roots.
//!
//! A [`ScanScheduler`] runs queued scans on a small pool of threads that only
//! exist while there is work. [`ArchiveIndexer`] is the visitor a scan walks
//! an archive with.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::entry_path::EntryPath;
use crate::index::{FileMap, Located, RootEntry};
use crate::root::{RootVisitor, WalkControl};

type ScanTask = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Default)]
struct PoolState {
    /// Workers alive, whether running a task or about to look for one.
    active: usize,
    /// Tasks pushed but not yet taken by a worker.
    queued: usize,
    spawned: u64,
}

struct Shared {
    queue: SegQueue<ScanTask>,
    state: Mutex<PoolState>,
    idle: Condvar,
    max_workers: usize,
}

/// Runs scan tasks on at most `max_workers` threads.
///
/// Threads are started lazily when a task is submitted and exit as soon as
/// the queue is empty. Every push, pop, spawn and exit decision is taken
/// under one lock, so a task can never be left in the queue with no worker
/// to run it.
#[derive(Clone)]
pub struct ScanScheduler {
    shared: Arc<Shared>,
}

impl ScanScheduler {
    pub fn new(max_workers: usize) -> Self {
        ScanScheduler {
            shared: Arc::new(Shared {
                queue: SegQueue::new(),
                state: Mutex::new(PoolState::default()),
                idle: Condvar::new(),
                max_workers: max_workers.max(1),
            }),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.shared.max_workers
    }

    /// Queue a task, starting a worker for it if the pool has room.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let worker = {
            let mut state = self.shared.state.lock();
            self.shared.queue.push(Box::new(task));
            state.queued += 1;

            if state.active < self.shared.max_workers && state.active < state.queued {
                state.active += 1;
                state.spawned += 1;
                Some(state.spawned)
            } else {
                None
            }
        };

        if let Some(id) = worker {
            let shared = self.shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("classpath-scanner#{id}"))
                .spawn(move || run_worker(&shared));
            if let Err(e) = spawned {
                tracing::warn!(
                    error = &e as &dyn std::error::Error,
                    "Unable to start a scanner thread, scanning on the caller instead"
                );
                run_worker(&self.shared);
            }
        }
    }

    /// Number of worker threads currently alive.
    pub fn active_workers(&self) -> usize {
        self.shared.state.lock().active
    }

    /// Number of tasks not yet picked up by a worker.
    pub fn queued_tasks(&self) -> usize {
        self.shared.state.lock().queued
    }

    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        state.active == 0 && state.queued == 0
    }

    /// Block until every submitted task has finished, or `timeout` elapsed.
    /// Returns whether the scheduler is idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.active > 0 || state.queued > 0 {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.active == 0 && state.queued == 0;
            }
        }
        true
    }
}

impl std::fmt::Debug for ScanScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ScanScheduler")
            .field("max_workers", &self.shared.max_workers)
            .field("active", &state.active)
            .field("queued", &state.queued)
            .finish()
    }
}

fn run_worker(shared: &Shared) {
    tracing::debug!("Scanner thread started");
    loop {
        let task = {
            let mut state = shared.state.lock();
            match shared.queue.pop() {
                Some(task) => {
                    state.queued -= 1;
                    task
                }
                None => {
                    state.active -= 1;
                    if state.active == 0 {
                        shared.idle.notify_all();
                    }
                    break;
                }
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!("A scan task panicked");
        }
    }
    tracing::debug!("Scanner thread exiting, nothing left to scan");
}

/// Puts every entry of an archive walk into the index.
///
/// Directories are put before anything inside them.
pub(crate) struct ArchiveIndexer<'a, D> {
    map: &'a dyn FileMap<D>,
    origin: &'a Arc<RootEntry<D>>,
    stack: Vec<Arc<EntryPath>>,
    folders: usize,
    files: usize,
}

impl<'a, D> ArchiveIndexer<'a, D> {
    pub fn new(map: &'a dyn FileMap<D>, origin: &'a Arc<RootEntry<D>>) -> Self {
        ArchiveIndexer {
            map,
            origin,
            stack: Vec::new(),
            folders: 0,
            files: 0,
        }
    }

    pub fn folders(&self) -> usize {
        self.folders
    }

    pub fn files(&self) -> usize {
        self.files
    }

    fn put(&self, path: Arc<EntryPath>) {
        self.map.put(Located::new(path, self.origin.clone()));
    }

    fn current_dir(&self) -> io::Result<&Arc<EntryPath>> {
        self.stack.last().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} yielded an entry outside of its root directory",
                    self.origin.root.name()
                ),
            )
        })
    }
}

impl<D> RootVisitor for ArchiveIndexer<'_, D> {
    fn pre_visit_dir(&mut self, name: Option<&str>) -> io::Result<WalkControl> {
        let path = match name {
            None if self.stack.is_empty() => EntryPath::root(),
            None if self.stack.len() == 1 => {
                tracing::info!(
                    root = %self.origin.root.name(),
                    folders = self.folders,
                    files = self.files,
                    "Ending the scan early, encountered the root directory multiple times"
                );
                return Ok(WalkControl::Terminate);
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "{} has multiple roots, found another one inside {}",
                        self.origin.root.name(),
                        self.current_dir()?
                    ),
                ));
            }
            Some(name) => EntryPath::child(self.current_dir()?, name),
        };

        self.folders += 1;
        self.put(path.clone());
        self.stack.push(path);
        Ok(WalkControl::Continue)
    }

    fn visit_file(&mut self, name: &str) -> io::Result<WalkControl> {
        let path = EntryPath::child(self.current_dir()?, name);
        self.files += 1;
        self.put(path);
        Ok(WalkControl::Continue)
    }

    fn post_visit_dir(&mut self) -> io::Result<WalkControl> {
        self.stack.pop();
        Ok(WalkControl::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::root_entry;
    use crate::index::HashTableFileMap;
    use crate::root::Root;
    use crate::zip_root::{tests::zip_bytes, ZipRoot};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    #[test]
    fn pool_never_exceeds_its_cap() {
        let scheduler = ScanScheduler::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            let done = done.clone();
            scheduler.submit(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            });
            assert!(scheduler.active_workers() <= 2);
        }

        assert!(scheduler.wait_idle(Duration::from_secs(10)));
        assert_eq!(done.load(Ordering::SeqCst), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(scheduler.active_workers(), 0);
        assert_eq!(scheduler.queued_tasks(), 0);
    }

    #[test]
    fn workers_are_named_and_restart_after_idling() {
        let scheduler = ScanScheduler::new(4);
        let names = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let names = names.clone();
            scheduler.submit(move || {
                let name = thread::current().name().map(str::to_string);
                names.lock().push(name);
            });
            assert!(scheduler.wait_idle(Duration::from_secs(10)));
        }

        let names = names.lock();
        assert_eq!(names.len(), 2);
        for name in names.iter() {
            let name = name.as_deref().unwrap();
            assert!(name.starts_with("classpath-scanner#"), "{name}");
        }
    }

    #[test]
    fn a_panicking_task_does_not_wedge_the_pool() {
        let scheduler = ScanScheduler::new(1);
        let done = Arc::new(AtomicUsize::new(0));

        scheduler.submit(|| panic!("boom"));
        let counter = done.clone();
        scheduler.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(scheduler.wait_idle(Duration::from_secs(10)));
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_idle_times_out() {
        let scheduler = ScanScheduler::new(1);
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        scheduler.submit(move || {
            let _ = rx.recv();
        });

        assert!(!scheduler.wait_idle(Duration::from_millis(20)));
        drop(tx);
        assert!(scheduler.wait_idle(Duration::from_secs(10)));
    }

    #[test]
    fn indexes_directories_before_their_contents() {
        let bytes = zip_bytes(&[("a/b/C.class", "c"), ("d.txt", "d")]);
        let root = ZipRoot::from_bytes("lib.jar", bytes).unwrap();
        let origin = root_entry(7, "lib.jar");
        let map = HashTableFileMap::new(true);

        let mut indexer = ArchiveIndexer::new(&map, &origin);
        root.walk(&mut indexer).unwrap();

        assert_eq!(indexer.folders(), 3);
        assert_eq!(indexer.files(), 2);
        assert_eq!(map.len(), 5);
        for path in ["/", "/a", "/a/b", "/a/b/C.class", "/d.txt"] {
            let entry = map.get(path).unwrap();
            assert_eq!(entry.locations()[0].origin.ordinal, 7);
        }
    }

    /// Replays a fixed sequence of walk events.
    #[derive(Debug)]
    struct ScriptedRoot(Vec<Event>);

    #[derive(Debug, Clone, Copy)]
    enum Event {
        Enter(Option<&'static str>),
        File(&'static str),
        Leave,
    }

    impl Root for ScriptedRoot {
        fn name(&self) -> &str {
            "scripted"
        }

        fn kind(&self) -> crate::root::RootKind<'_> {
            crate::root::RootKind::Archive
        }

        fn resolve(&self, _path: &str) -> Option<Arc<EntryPath>> {
            None
        }

        fn walk(&self, visitor: &mut dyn RootVisitor) -> io::Result<()> {
            for event in &self.0 {
                let control = match *event {
                    Event::Enter(name) => visitor.pre_visit_dir(name)?,
                    Event::File(name) => visitor.visit_file(name)?,
                    Event::Leave => visitor.post_visit_dir()?,
                };
                if control == WalkControl::Terminate {
                    break;
                }
            }
            Ok(())
        }

        fn read(&self, path: &EntryPath) -> io::Result<Vec<u8>> {
            Err(crate::root::not_found(self, path))
        }
    }

    #[test]
    #[traced_test]
    fn repeated_root_ends_the_scan_early() {
        use Event::*;
        let root = ScriptedRoot(vec![
            Enter(None),
            File("a.txt"),
            Enter(None),
            File("never.txt"),
            Leave,
            Leave,
        ]);
        let origin = root_entry(0, "scripted");
        let map = HashTableFileMap::new(true);

        let mut indexer = ArchiveIndexer::new(&map, &origin);
        root.walk(&mut indexer).unwrap();

        assert!(map.get("/a.txt").is_some());
        assert!(map.get("/never.txt").is_none());
        assert!(logs_contain("encountered the root directory multiple times"));
    }

    #[test]
    fn nested_second_root_is_an_error() {
        use Event::*;
        let root = ScriptedRoot(vec![Enter(None), Enter(Some("a")), Enter(None)]);
        let origin = root_entry(0, "scripted");
        let map = HashTableFileMap::new(true);

        let mut indexer = ArchiveIndexer::new(&map, &origin);
        let err = root.walk(&mut indexer).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("multiple roots"), "{err}");
    }

    #[test]
    fn entries_before_the_root_are_an_error() {
        use Event::*;
        let root = ScriptedRoot(vec![File("orphan.txt")]);
        let origin = root_entry(0, "scripted");
        let map = HashTableFileMap::new(true);

        let mut indexer = ArchiveIndexer::new(&map, &origin);
        assert!(root.walk(&mut indexer).is_err());
        assert_eq!(map.len(), 0);
    }
}
