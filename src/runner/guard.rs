//! The "is a run active" cell.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

static PROCESS_GUARD: LazyLock<Arc<RunGuard>> = LazyLock::new(|| Arc::new(RunGuard::new()));

/// Single atomic flag claimed on run start and released when the run resolves.
#[derive(Debug, Default)]
pub struct RunGuard {
    active: AtomicBool,
}

impl RunGuard {
    pub const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
        }
    }

    /// The guard shared by every engine in this process.
    pub fn process() -> Arc<RunGuard> {
        Arc::clone(&PROCESS_GUARD)
    }

    /// Claim the guard in one compare-and-swap. `None` if a run holds it.
    pub fn try_claim(self: &Arc<Self>) -> Option<RunClaim> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunClaim {
                guard: Arc::clone(self),
            })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Proof of ownership of a [`RunGuard`]; releases it on drop.
#[derive(Debug)]
pub struct RunClaim {
    guard: Arc<RunGuard>,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.guard.active.store(false, Ordering::Release);
    }
}
