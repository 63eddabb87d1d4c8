//! Process root
//!
//! The scheduler, storage manager and transaction manager are process-wide
//! singletons reached through one handle. Tests use [`Engine::reset`] to
//! return to a clean state between runs.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::scheduler::{ImmediateExecutionScheduler, Scheduler};
use crate::storage::{StorageManager, TransactionManager};

pub struct Engine {
    scheduler: RwLock<Arc<dyn Scheduler>>,
    storage_manager: StorageManager,
    transaction_manager: TransactionManager,
}

static ENGINE: OnceLock<Engine> = OnceLock::new();

/// The process-wide engine handle.
pub fn engine() -> &'static Engine {
    ENGINE.get_or_init(|| Engine {
        scheduler: RwLock::new(Arc::new(ImmediateExecutionScheduler::new())),
        storage_manager: StorageManager::new(),
        transaction_manager: TransactionManager::new(),
    })
}

impl Engine {
    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.scheduler.read())
    }

    /// Swap the active scheduler. The previous scheduler is drained and
    /// shut down before the call returns.
    pub fn set_scheduler(&self, scheduler: Arc<dyn Scheduler>) {
        let previous = {
            let mut guard = self.scheduler.write();
            std::mem::replace(&mut *guard, scheduler)
        };
        previous.finish();
    }

    pub fn storage_manager(&self) -> &StorageManager {
        &self.storage_manager
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.transaction_manager
    }

    /// Drop all registered tables and reinstall the inline scheduler.
    pub fn reset(&self) {
        self.set_scheduler(Arc::new(ImmediateExecutionScheduler::new()));
        self.storage_manager.clear();
    }
}
