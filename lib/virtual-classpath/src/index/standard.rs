use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;

use super::{compute_new_node, describe_bucket, lookup, Entry, FileMap, Located, Node};
use crate::entry_path::hash_str;

/// The path index on top of a [`DashMap`] keyed by path hash.
///
/// Uses more memory per path than [`super::HashTableFileMap`] but leans on a
/// well known map, which helps when the custom table is suspected of a bug.
pub(crate) struct StandardFileMap<D> {
    map: DashMap<u32, Arc<Node<D>>>,
    count: AtomicUsize,
    check_segments: bool,
}

impl<D: Send + Sync + 'static> StandardFileMap<D> {
    pub fn new(check_segments: bool) -> Self {
        StandardFileMap {
            map: DashMap::new(),
            count: AtomicUsize::new(0),
            check_segments,
        }
    }
}

impl<D: Send + Sync + 'static> FileMap<D> for StandardFileMap<D> {
    fn get(&self, key: &str) -> Option<Entry<D>> {
        let node = self.map.get(&hash_str(key))?;
        lookup(node.value(), key, self.check_segments)
    }

    fn put(&self, located: Arc<Located<D>>) {
        match self.map.entry(located.path.hash_code()) {
            MapEntry::Occupied(mut occupied) => {
                let node = compute_new_node(Some(&**occupied.get()), located);
                occupied.insert(Arc::new(node));
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Arc::new(compute_new_node(None, located)));
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn reserve(&self, _additional: usize) {}

    fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    fn describe(&self, key: &str) -> String {
        let hash = hash_str(key);
        let node = self.map.get(&hash).map(|node| node.value().clone());
        describe_bucket(key, hash, None, node.as_deref())
    }
}
