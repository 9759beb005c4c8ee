//! A fair, FIFO, asynchronously-acquired binary lock.
//!
//! This is deliberately not `tokio::sync::Mutex`: the engine needs a cheap non-blocking
//! [`Mutex::is_locked`] query so [`SerializingWrapper`](crate::serializing::SerializingWrapper)
//! can reject synchronous calls without awaiting anything, and it needs strict FIFO wakeup order
//! so a long queue of top-level operations resolves in the order callers issued them.

use std::collections::VecDeque;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::oneshot;

struct State {
    locked: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// A fair async binary lock. See the module docs for why this isn't `tokio::sync::Mutex`.
#[derive(Debug)]
pub struct Mutex {
    state: SyncMutex<State>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("locked", &self.locked)
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Mutex::new()
    }
}

impl Mutex {
    /// A free mutex.
    pub fn new() -> Self {
        Mutex {
            state: SyncMutex::new(State {
                locked: false,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Acquire the lock, waiting in strict FIFO order behind any earlier waiter. Always yields
    /// at least once before returning, even on uncontended acquisition, so that deeply recursive
    /// callers (cross-layer rename re-entering the engine) don't grow the call stack unbounded.
    pub async fn lock(&self) -> MutexGuard<'_> {
        let rx = {
            let mut state = self.state.lock();
            if !state.locked {
                state.locked = true;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            }
        };
        match rx {
            Some(rx) => {
                rx.await
                    .expect("Mutex dropped while a waiter was queued");
            }
            None => tokio::task::yield_now().await,
        }
        MutexGuard { mutex: self }
    }

    fn unlock(&self) {
        let mut state = self.state.lock();
        match state.waiters.pop_front() {
            Some(next) => {
                // Not all receivers are necessarily still listening; a send failure just means
                // the waiter's future was dropped, which is fine -- the lock stays held by
                // nobody and the next unlock will try the next waiter.
                let _ = next.send(());
            }
            None => state.locked = false,
        }
    }

    /// Non-blocking query of whether the mutex is currently held. Used to reject synchronous
    /// calls that would otherwise deadlock against an in-flight asynchronous one.
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }
}

/// RAII guard returned by [`Mutex::lock`]; releases the lock on drop.
#[derive(Debug)]
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn uncontended_lock_unlock() {
        let mutex = Mutex::new();
        assert!(!mutex.is_locked());
        let guard = mutex.lock().await;
        assert!(mutex.is_locked());
        drop(guard);
        assert!(!mutex.is_locked());
    }

    #[tokio::test]
    async fn fifo_wakeup_order() {
        let mutex = Arc::new(Mutex::new());
        let order = Arc::new(SyncMutex::new(Vec::new()));

        let first_guard = mutex.lock().await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let mutex = mutex.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _guard = mutex.lock().await;
                order.lock().push(i);
            }));
            // Give each spawned task a chance to register as a waiter before the next spawns,
            // so the queue order matches spawn order.
            tokio::task::yield_now().await;
        }

        drop(first_guard);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }
}
