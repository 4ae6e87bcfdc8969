//! Explicit cancellation token threaded through every suspension point.
//!
//! Cancellation is cooperative: the token never interrupts a task, it only
//! becomes observable at the next check or awaited `cancelled()` future.
//! Child tokens let a fork cancel its sibling branches without touching the
//! parent execution.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Shared {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Shared {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Cooperative cancellation token.
///
/// Cloning shares the same cancellation state; [`child`](Self::child) creates
/// a token that observes this token's cancellation (and every ancestor's) but
/// can be cancelled independently.
#[derive(Clone, Debug)]
pub struct CancelToken {
    own: Arc<Shared>,
    /// Own state plus all ancestors; cancellation of any member cancels us.
    lineage: Vec<Arc<Shared>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        let own = Arc::new(Shared::default());
        Self {
            lineage: vec![own.clone()],
            own,
        }
    }

    /// Request cancellation; all clones and children observe it.
    pub fn cancel(&self) {
        self.own.cancelled.store(true, Ordering::Release);
        self.own.notify.notify_waiters();
    }

    /// Whether cancellation has been requested on this token or an ancestor.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.lineage.iter().any(|shared| shared.is_cancelled())
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            // Arm the notifications before the check so a cancel between the
            // check and the await cannot be missed.
            let waits = self
                .lineage
                .iter()
                .map(|shared| shared.notify.notified())
                .collect::<Vec<_>>();
            if self.is_cancelled() {
                return;
            }
            futures_util::future::select_all(waits.into_iter().map(Box::pin)).await;
        }
    }

    /// A token cancelled when either it or this token (or any ancestor of
    /// this token) is cancelled.
    #[must_use]
    pub fn child(&self) -> CancelToken {
        let own = Arc::new(Shared::default());
        let mut lineage = Vec::with_capacity(self.lineage.len() + 1);
        lineage.push(own.clone());
        lineage.extend(self.lineage.iter().cloned());
        Self { own, lineage }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn child_observes_parent_but_not_vice_versa() {
        let parent = CancelToken::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other_child = parent.child();
        parent.cancel();
        assert!(other_child.is_cancelled());
    }

    #[tokio::test]
    async fn grandchild_observes_root() {
        let root = CancelToken::new();
        let grandchild = root.child().child();
        root.cancel();
        assert!(grandchild.is_cancelled());
        grandchild.cancelled().await;
    }
}
