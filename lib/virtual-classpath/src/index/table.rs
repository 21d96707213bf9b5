use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;

use super::{compute_new_node, describe_bucket, lookup, Entry, FileMap, Located, Node};
use crate::entry_path::hash_str;

const INITIAL_CAPACITY: usize = 128;

/// Grow once more than `capacity * LOAD_NUMERATOR / LOAD_DENOMINATOR` paths
/// have been put.
const LOAD_NUMERATOR: usize = 3;
const LOAD_DENOMINATOR: usize = 4;

/// Largest up-front `reserve` honoured. Beyond it the table grows as paths
/// are put.
const MAX_RESERVE: usize = 1 << 16;

struct Table<D> {
    buckets: Box<[ArcSwapOption<Node<D>>]>,
}

impl<D> Table<D> {
    fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Table {
            buckets: (0..capacity).map(|_| ArcSwapOption::empty()).collect(),
        }
    }

    fn capacity(&self) -> usize {
        self.buckets.len()
    }

    fn index_of(&self, hash: u32) -> usize {
        let spread = hash ^ (hash >> 16);
        spread as usize & (self.buckets.len() - 1)
    }

    fn bucket(&self, hash: u32) -> &ArcSwapOption<Node<D>> {
        &self.buckets[self.index_of(hash)]
    }
}

fn threshold(capacity: usize) -> usize {
    capacity / LOAD_DENOMINATOR * LOAD_NUMERATOR
}

/// An open hash table of path nodes.
///
/// Readers never lock: they load the current table, then the bucket. Writers
/// take the `writer` lock (which also guards the path count), build a
/// replacement node and store it. Growing builds a complete new table and
/// publishes it with a single store, so a reader still holding the old table
/// sees a consistent, if stale, snapshot.
pub(crate) struct HashTableFileMap<D> {
    table: ArcSwap<Table<D>>,
    writer: Mutex<usize>,
    check_segments: bool,
}

impl<D: Send + Sync + 'static> HashTableFileMap<D> {
    pub fn new(check_segments: bool) -> Self {
        HashTableFileMap {
            table: ArcSwap::from_pointee(Table::with_capacity(INITIAL_CAPACITY)),
            writer: Mutex::new(0),
            check_segments,
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.table.load().capacity()
    }

    /// Grow until `needed` paths fit. Must be called with the writer lock held.
    fn ensure_capacity(&self, needed: usize) {
        let old = self.table.load_full();
        let mut capacity = old.capacity();
        while needed > threshold(capacity) {
            match capacity.checked_mul(2) {
                Some(doubled) => capacity = doubled,
                None => break,
            }
        }
        if capacity == old.capacity() {
            return;
        }

        let mut slots: Vec<Option<Node<D>>> = (0..capacity).map(|_| None).collect();
        let grown = Table::<D>::with_capacity(capacity);
        for bucket in old.buckets.iter() {
            let node = bucket.load();
            let Some(node) = node.as_deref() else {
                continue;
            };
            // Entries in one old bucket are distinct logical paths, and so are
            // entries in different buckets. Nothing merges while moving.
            for entry in node.entries() {
                let slot = &mut slots[grown.index_of(entry.path().hash_code())];
                *slot = Some(match slot.take() {
                    None => Node::Entry(entry.clone()),
                    Some(Node::Entry(existing)) => {
                        Node::Collision(Box::new([existing, entry.clone()]))
                    }
                    Some(Node::Collision(existing)) => {
                        let mut entries = existing.into_vec();
                        entries.push(entry.clone());
                        Node::Collision(entries.into_boxed_slice())
                    }
                });
            }
        }
        for (bucket, slot) in grown.buckets.iter().zip(slots) {
            bucket.store(slot.map(Arc::new));
        }

        tracing::trace!(
            from = old.capacity(),
            to = capacity,
            "Growing the path table"
        );
        self.table.store(Arc::new(grown));
    }
}

impl<D: Send + Sync + 'static> FileMap<D> for HashTableFileMap<D> {
    fn get(&self, key: &str) -> Option<Entry<D>> {
        let table = self.table.load();
        let node = table.bucket(hash_str(key)).load();
        node.as_deref()
            .and_then(|node| lookup(node, key, self.check_segments))
    }

    fn put(&self, located: Arc<Located<D>>) {
        let mut count = self.writer.lock();
        self.ensure_capacity(*count + 1);

        let table = self.table.load();
        let bucket = table.bucket(located.path.hash_code());
        let current = bucket.load_full();
        let node = compute_new_node(current.as_deref(), located);
        bucket.store(Some(Arc::new(node)));
        *count += 1;
    }

    fn reserve(&self, additional: usize) {
        let count = self.writer.lock();
        self.ensure_capacity(count.saturating_add(additional.min(MAX_RESERVE)));
    }

    fn len(&self) -> usize {
        *self.writer.lock()
    }

    fn describe(&self, key: &str) -> String {
        let hash = hash_str(key);
        let table = self.table.load();
        let node = table.bucket(hash).load();
        let mut out = describe_bucket(key, hash, Some(table.index_of(hash)), node.as_deref());
        out.push_str(&format!(
            " (capacity {}, {} paths)",
            table.capacity(),
            self.len()
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::{located, root_entry};

    #[test]
    fn starts_small() {
        let map = HashTableFileMap::<()>::new(false);
        assert_eq!(map.capacity(), INITIAL_CAPACITY);
        assert_eq!(threshold(INITIAL_CAPACITY), 96);
    }

    #[test]
    fn growth_keeps_every_path() {
        let a = root_entry(0, "a");
        let b = root_entry(1, "b");
        let map = HashTableFileMap::new(true);

        // Both roots define the even paths, so overlaps move with the table too.
        for i in 0..2_000 {
            map.put(located(&a, &format!("/pkg/Class{i}.class")));
            if i % 2 == 0 {
                map.put(located(&b, &format!("/pkg/Class{i}.class")));
            }
        }
        assert!(map.capacity() >= 4096, "capacity {}", map.capacity());

        for i in 0..2_000 {
            let key = format!("/pkg/Class{i}.class");
            let entry = map.get(&key).unwrap();
            assert_eq!(entry.path().to_string(), key);
            let origins: Vec<u64> = entry
                .locations()
                .iter()
                .map(|located| located.origin.ordinal)
                .collect();
            let expected: &[u64] = if i % 2 == 0 { &[0, 1] } else { &[0] };
            assert_eq!(origins, expected, "{key}");
        }
        assert!(map.get("/pkg/Class2000.class").is_none());
    }

    #[test]
    fn collisions_survive_growth() {
        let a = root_entry(0, "a");
        let map = HashTableFileMap::new(true);
        map.put(located(&a, "/Aa"));
        map.put(located(&a, "/BB"));

        map.reserve(10_000);
        assert!(map.capacity() >= 16_384);

        assert_eq!(map.get("/Aa").unwrap().path().to_string(), "/Aa");
        assert_eq!(map.get("/BB").unwrap().path().to_string(), "/BB");
    }

    #[test]
    fn reserve_grows_once_up_front() {
        let map = HashTableFileMap::<()>::new(false);
        map.reserve(97);
        assert_eq!(map.capacity(), 256);
        map.reserve(0);
        assert_eq!(map.capacity(), 256);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn absurd_reservations_are_capped() {
        let a = root_entry(0, "a");
        let map = HashTableFileMap::new(false);
        map.put(located(&a, "/kept"));

        map.reserve(usize::MAX);
        assert_eq!(map.capacity(), 1 << 17);
        map.reserve(usize::MAX);
        assert_eq!(map.capacity(), 1 << 17);

        map.put(located(&a, "/after"));
        assert_eq!(map.len(), 2);
        assert!(map.get("/kept").is_some());
        assert!(map.get("/after").is_some());
    }

    #[test]
    fn readers_see_a_consistent_table_while_it_grows() {
        let a = root_entry(0, "a");
        let map = HashTableFileMap::new(false);
        map.put(located(&a, "/always/here"));

        std::thread::scope(|scope| {
            let map = &map;
            let reader = scope.spawn(move || {
                for _ in 0..20_000 {
                    assert!(map.get("/always/here").is_some());
                }
            });
            for i in 0..5_000 {
                map.put(located(&a, &format!("/filler/{i}")));
            }
            reader.join().unwrap();
        });
    }
}
