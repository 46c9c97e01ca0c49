use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Process-wide per-root mutexes guaranteeing at most one transfer per
/// root at a time. Entries are created on first use and reclaimed when
/// the last holder releases.
#[derive(Clone, Debug, Default)]
pub struct RootLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl RootLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, root: &str) -> Arc<Mutex<()>> {
        self.inner
            .entry(root.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `root`.
    pub async fn lock(&self, root: &str) -> RootGuard {
        let mutex = self.entry(root);
        let guard = mutex.lock_owned().await;

        RootGuard {
            root: root.to_owned(),
            map: Arc::clone(&self.inner),
            guard: Some(guard),
        }
    }

    /// Take the lock only if nobody holds it.
    #[must_use]
    pub fn try_lock(&self, root: &str) -> Option<RootGuard> {
        let mutex = self.entry(root);
        let guard = mutex.try_lock_owned().ok()?;

        Some(RootGuard {
            root: root.to_owned(),
            map: Arc::clone(&self.inner),
            guard: Some(guard),
        })
    }

    /// Number of live lock entries, for tests and introspection.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Held lock over one root; dropping releases and reclaims the entry if
/// no other task holds or awaits it.
#[derive(Debug)]
pub struct RootGuard {
    root: String,
    map: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Waiters hold their own Arc clone, which keeps the count above
        // one and the entry alive.
        let _removed = self
            .map
            .remove_if(&self.root, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;

    #[tokio::test]
    async fn second_holder_waits_for_release() {
        let locks = RootLocks::new();

        let guard = locks.lock("broot").await;
        assert!(locks.try_lock("broot").is_none());

        let locks_clone = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = locks_clone.lock("broot").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter completes")
            .expect("no panic");
    }

    #[tokio::test]
    async fn entries_are_reclaimed_after_release() {
        let locks = RootLocks::new();

        {
            let _guard = locks.lock("broot").await;
            assert_eq!(locks.len(), 1);
        }

        assert!(locks.is_empty(), "entry reclaimed on last release");

        let a = locks.lock("ra").await;
        let b = locks.lock("rb").await;
        assert_eq!(locks.len(), 2);
        drop(a);
        assert_eq!(locks.len(), 1);
        drop(b);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_roots_do_not_contend() {
        let locks = RootLocks::new();

        let _a = locks.lock("ra").await;
        assert!(locks.try_lock("rb").is_some());
    }
}
