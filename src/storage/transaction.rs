//! Transaction contexts
//!
//! The execution core is read-only; it consumes transaction contexts rather
//! than defining their full lifecycle. Contexts carry a snapshot commit id
//! for visibility checks and a phase that commit/rollback advance. The
//! surrounding pipeline rolls back on operator failure.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::common::{QuartzError, QuartzResult};
use crate::types::CommitId;

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    Active,
    Committed,
    RolledBack,
}

/// Why a transaction was rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackReason {
    User,
    Conflict,
}

#[derive(Debug)]
pub struct TransactionContext {
    transaction_id: TransactionId,
    snapshot_commit_id: CommitId,
    auto_commit: bool,
    phase: Mutex<TransactionPhase>,
    manager: Arc<TransactionManagerState>,
}

impl TransactionContext {
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn snapshot_commit_id(&self) -> CommitId {
        self.snapshot_commit_id
    }

    pub fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    pub fn phase(&self) -> TransactionPhase {
        *self.phase.lock()
    }

    pub fn commit(&self) -> QuartzResult<CommitId> {
        let mut phase = self.phase.lock();
        if *phase != TransactionPhase::Active {
            return Err(QuartzError::Transaction(
                "only active transactions can commit".to_string(),
            ));
        }
        *phase = TransactionPhase::Committed;
        Ok(self.manager.next_commit_id())
    }

    pub fn rollback(&self, _reason: RollbackReason) -> QuartzResult<()> {
        let mut phase = self.phase.lock();
        if *phase != TransactionPhase::Active {
            return Err(QuartzError::Transaction(
                "only active transactions can roll back".to_string(),
            ));
        }
        *phase = TransactionPhase::RolledBack;
        Ok(())
    }
}

#[derive(Debug)]
struct TransactionManagerState {
    last_commit_id: AtomicU32,
}

impl TransactionManagerState {
    fn next_commit_id(&self) -> CommitId {
        self.last_commit_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Issues transaction contexts and commit ids.
#[derive(Debug)]
pub struct TransactionManager {
    state: Arc<TransactionManagerState>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(TransactionManagerState {
                last_commit_id: AtomicU32::new(0),
            }),
        }
    }

    pub fn new_transaction_context(&self, auto_commit: bool) -> Arc<TransactionContext> {
        Arc::new(TransactionContext {
            transaction_id: Uuid::new_v4(),
            snapshot_commit_id: self.last_commit_id(),
            auto_commit,
            phase: Mutex::new(TransactionPhase::Active),
            manager: Arc::clone(&self.state),
        })
    }

    pub fn last_commit_id(&self) -> CommitId {
        self.state.last_commit_id.load(Ordering::SeqCst)
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
