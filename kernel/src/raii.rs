//! Generic scope-guard RAII helper.
//!
//! Everything else that previously lived here (frame/region/capability
//! guards) belonged to resource types this kernel doesn't have; PMM frames,
//! mappings, fds and pipes each already manage their own lifetime through
//! `Drop` impls on their own types (see `mm::pmm`, `fs::node::FdSlot`,
//! `fs::pipe::PipeEnd`).

/// Runs `$e` when the enclosing scope ends, regardless of how it's left.
#[macro_export]
macro_rules! defer {
    ($e:expr) => {
        let _guard = $crate::raii::ScopeGuard::new(|| $e);
    };
}

/// Generic scope guard that runs cleanup code on drop unless [`cancel`]led.
///
/// [`cancel`]: ScopeGuard::cancel
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    /// Disarms the guard; its cleanup closure will not run.
    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_guard_runs_cleanup_on_drop() {
        let mut cleaned = false;
        {
            let _guard = ScopeGuard::new(|| {
                cleaned = true;
            });
        }
        assert!(cleaned);
    }

    #[test]
    fn scope_guard_cancel_skips_cleanup() {
        let mut cleaned = false;
        {
            let guard = ScopeGuard::new(|| {
                cleaned = true;
            });
            guard.cancel();
        }
        assert!(!cleaned);
    }
}
