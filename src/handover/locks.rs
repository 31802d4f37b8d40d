//! Per-role single-writer locks
//!
//! Serializes handovers of the same role inside this process. Handovers of
//! different roles take different locks and never wait on each other.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::Role;

pub struct RoleLocks {
    locks: [Arc<Mutex<()>>; Role::ALL.len()],
}

impl RoleLocks {
    pub fn new() -> Self {
        Self {
            locks: std::array::from_fn(|_| Arc::new(Mutex::new(()))),
        }
    }

    /// Wait for exclusive use of `role`; released when the guard drops
    pub async fn acquire(&self, role: Role) -> OwnedMutexGuard<()> {
        let guard = self.locks[role as usize].clone().lock_owned().await;
        tracing::debug!(role = %role, "Acquired role lock");
        guard
    }
}

impl Default for RoleLocks {
    fn default() -> Self {
        Self::new()
    }
}
