//! Cross-checks every lookup against asking each root in turn.

use std::fmt::Write as _;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::Inner;
use crate::index::{Located, RootEntry};
use crate::{ClassPathError, Result};

type Roots<D> = Arc<Vec<Arc<RootEntry<D>>>>;

pub(super) struct Validation<D> {
    /// Every root ever added, in ordinal order. A root is pushed once the
    /// fast path can see all of it.
    all_roots: ArcSwap<Vec<Arc<RootEntry<D>>>>,
}

impl<D: Send + Sync + 'static> Validation<D> {
    pub fn new() -> Self {
        Validation {
            all_roots: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn push(&self, entry: Arc<RootEntry<D>>) {
        self.all_roots.rcu(|roots| {
            let mut roots = Vec::clone(roots);
            roots.push(entry.clone());
            roots
        });
    }

    pub fn check_find(&self, inner: &Inner<D>, key: &str) -> Result<Option<Arc<Located<D>>>> {
        let roots = self.all_roots.load_full();
        let quick = visible(&roots, inner.find(key));
        let slow = roots.iter().find_map(|root| {
            root.root
                .resolve(key)
                .map(|path| Located::new(path, root.clone()))
        });

        let agree = match (&quick, &slow) {
            (None, None) => true,
            (Some(quick), Some(slow)) => same_location(quick, slow),
            _ => false,
        };
        if agree {
            return Ok(quick);
        }

        let again = inner.find(key);
        Err(self.inconsistent(
            inner,
            "find_resource",
            key,
            &roots,
            format!("{quick:?}"),
            format!("{slow:?}"),
            format!("{again:?}"),
        ))
    }

    pub fn check_get_all(&self, inner: &Inner<D>, key: &str) -> Result<Vec<Arc<Located<D>>>> {
        let roots = self.all_roots.load_full();
        let max = roots.last().map(|root| root.ordinal);
        let mut quick = inner.get_all(key);
        quick.retain(|located| max.is_some_and(|max| located.origin.ordinal <= max));
        let slow: Vec<_> = roots
            .iter()
            .filter_map(|root| {
                root.root
                    .resolve(key)
                    .map(|path| Located::new(path, root.clone()))
            })
            .collect();

        let agree = quick.len() == slow.len()
            && quick.iter().zip(&slow).all(|(q, s)| same_location(q, s));
        if agree {
            return Ok(quick);
        }

        let again = inner.get_all(key);
        Err(self.inconsistent(
            inner,
            "get_all_resources",
            key,
            &roots,
            format!("{quick:?}"),
            format!("{slow:?}"),
            format!("{again:?}"),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn inconsistent(
        &self,
        inner: &Inner<D>,
        operation: &'static str,
        key: &str,
        roots: &Roots<D>,
        quick: String,
        slow: String,
        again: String,
    ) -> ClassPathError {
        // Everything after this is worth tracing in full.
        inner.print_full_detail.store(true, Ordering::Relaxed);

        let mut report = String::new();
        let _ = writeln!(report, "quick1: {quick}");
        let _ = writeln!(report, "slow: {slow}");
        let _ = writeln!(report, "quick2: {again}");
        let _ = writeln!(report, "fallback roots: {:?}", inner.fallback.snapshot());
        let _ = writeln!(report, "all roots: {roots:?}");
        let _ = write!(report, "index: {}", inner.files.describe(key));

        tracing::error!(operation, path = key, "Class path lookup mismatch\n{report}");
        ClassPathError::Inconsistent {
            operation,
            path: key.to_string(),
            report,
        }
    }
}

/// Drop a fast answer from a root added after `roots` was loaded.
fn visible<D>(roots: &Roots<D>, found: Option<Arc<Located<D>>>) -> Option<Arc<Located<D>>> {
    let max = roots.last()?.ordinal;
    found.filter(|located| located.origin.ordinal <= max)
}

fn same_location<D>(a: &Located<D>, b: &Located<D>) -> bool {
    a.origin.ordinal == b.origin.ordinal && a.path.same_path(&b.path)
}
