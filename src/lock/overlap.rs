use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// In-process flag keeping a task from running twice at once
#[derive(Debug, Clone, Default)]
pub struct OverlapGuard {
    running: Arc<AtomicBool>,
}

impl OverlapGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another permit is alive
    pub fn try_enter(&self) -> Option<OverlapPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| OverlapPermit {
                running: self.running.clone(),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct OverlapPermit {
    running: Arc<AtomicBool>,
}

impl Drop for OverlapPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}
