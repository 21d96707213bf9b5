//! Roots that lookups must still ask directly.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::index::RootEntry;

/// Copy-on-write list of the roots that are not (yet) in the index, ordered
/// by registration ordinal.
///
/// Lookups take a snapshot without locking. Every change publishes a whole
/// new list, so a snapshot never changes under its holder.
pub(crate) struct FallbackRegistry<D> {
    roots: ArcSwap<Vec<Arc<RootEntry<D>>>>,
}

impl<D> FallbackRegistry<D> {
    pub fn new() -> Self {
        FallbackRegistry {
            roots: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<RootEntry<D>>>> {
        self.roots.load_full()
    }

    pub fn len(&self) -> usize {
        self.roots.load().len()
    }

    pub fn insert(&self, entry: Arc<RootEntry<D>>) {
        self.roots.rcu(|roots| {
            let mut roots = Vec::clone(roots);
            let at = roots.partition_point(|root| root.ordinal < entry.ordinal);
            roots.insert(at, entry.clone());
            roots
        });
    }

    /// Remove the root registered as `ordinal`, returning whether it was
    /// present.
    pub fn remove(&self, ordinal: u64) -> bool {
        let previous = self.roots.rcu(|roots| {
            roots
                .iter()
                .filter(|root| root.ordinal != ordinal)
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().any(|root| root.ordinal == ordinal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::root_entry;

    fn ordinals(registry: &FallbackRegistry<()>) -> Vec<u64> {
        registry.snapshot().iter().map(|root| root.ordinal).collect()
    }

    #[test]
    fn kept_in_ordinal_order() {
        let registry = FallbackRegistry::new();
        for ordinal in [3, 0, 2, 5, 1] {
            registry.insert(root_entry(ordinal, "r"));
        }
        assert_eq!(ordinals(&registry), [0, 1, 2, 3, 5]);
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn removed_exactly_once() {
        let registry = FallbackRegistry::new();
        registry.insert(root_entry(0, "a"));
        registry.insert(root_entry(1, "b"));

        let before = registry.snapshot();
        assert!(registry.remove(0));
        assert!(!registry.remove(0));
        assert_eq!(ordinals(&registry), [1]);

        // Snapshots taken earlier are unaffected.
        assert_eq!(before.len(), 2);
    }
}
