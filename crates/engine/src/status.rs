use core_types::StrategyStatus;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle status shared between the manager and a strategy's run loop.
///
/// The loop reads it once per pass; the manager flips it on start/stop and the
/// loop itself sets `Error` if it dies.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle(Arc<AtomicU8>);

impl StatusHandle {
    pub fn get(&self) -> StrategyStatus {
        StrategyStatus::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, status: StrategyStatus) {
        self.0.store(status.as_u8(), Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.get() == StrategyStatus::Active
    }
}
