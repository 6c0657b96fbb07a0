use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop flag for bulk recalculation, bulk overrides, and the
/// cleaner worker loop.
///
/// Long-running operations poll [`CancellationToken::is_cancelled`] between
/// per-group commits and return their partial counts when it trips, so
/// everything committed before the stop stays committed. Clones share one
/// flag, which lets the ctrl-c handler hold a copy while the engine holds
/// another.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Trip the flag. Irrevocable for this token and all its clones.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_observe_cancel() {
        let token = CancellationToken::new();
        let held_by_handler = token.clone();
        assert!(!token.is_cancelled());
        held_by_handler.cancel();
        assert!(token.is_cancelled());
        assert!(held_by_handler.is_cancelled());
    }
}
