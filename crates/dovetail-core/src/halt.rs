use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative stop request checked by pattern matching and query loops.
///
/// Clones share the flag, so another thread can hold one and halt a long run.
#[derive(Debug, Clone, Default)]
pub struct HaltFlag(Arc<AtomicBool>);

impl HaltFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_halt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear_halt(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let flag = HaltFlag::new();
        let remote = flag.clone();
        assert!(!flag.is_halted());
        std::thread::spawn(move || remote.request_halt()).join().unwrap();
        assert!(flag.is_halted());
        flag.clear_halt();
        assert!(!flag.is_halted());
    }
}
