//! Cooperative cancellation
//!
//! Every unit of work runs with a [`CancellationToken`] installed as the
//! thread's current token. Long-running code polls [`is_cancelled`] and
//! blocking waits use [`CancellationToken::wait_timeout`] so that a cancel
//! wakes them early.

use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

struct TokenInner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    signal: Condvar,
}

/// Shared cancellation flag. Cloning yields another handle to the same flag.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                lock: Mutex::new(()),
                signal: Condvar::new(),
            }),
        }
    }

    /// Set the flag and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        let _guard = self.inner.lock.lock();
        self.inner.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Sleep for `timeout` unless cancelled first.
    ///
    /// Returns `true` if the token was (or became) cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_cancelled() {
            if self.inner.signal.wait_until(&mut guard, deadline).timed_out() {
                return self.is_cancelled();
            }
        }
        true
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<CancellationToken>> = const { RefCell::new(None) };
}

/// Whether the unit of work running on this thread has been cancelled.
///
/// Always `false` outside of executor-managed work.
pub fn is_cancelled() -> bool {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    })
}

/// The token of the unit of work running on this thread, if any.
pub fn current_token() -> Option<CancellationToken> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Installs a token as current for the lifetime of the scope and restores
/// the previous one on drop, so nested caller-runs work keeps its own token.
pub(crate) struct TokenScope {
    previous: Option<CancellationToken>,
}

impl TokenScope {
    pub fn enter(token: CancellationToken) -> Self {
        let previous = CURRENT.with(|current| current.replace(Some(token)));
        Self { previous }
    }
}

impl Drop for TokenScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}
