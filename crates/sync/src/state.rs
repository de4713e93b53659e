//! Observable sync state
//!
//! One [`SyncSnapshot`] is published on a watch channel. `syncing` is true
//! while any sync operation holds an [`OperationGuard`].

use coldchain_core::Timestamp;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSnapshot {
    pub online: bool,
    pub syncing: bool,
    pub last_sync_time: Option<Timestamp>,
    pub sync_error: Option<String>,
}

/// What the sync banner should show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncIndicator {
    Hidden,
    Offline,
    Failed,
    Syncing,
}

impl SyncIndicator {
    pub fn label(&self) -> &'static str {
        match self {
            SyncIndicator::Hidden => "Synced",
            SyncIndicator::Offline => "You are Offline",
            SyncIndicator::Failed => "Sync Failed. Retrying...",
            SyncIndicator::Syncing => "Syncing Data...",
        }
    }
}

impl SyncSnapshot {
    /// Offline wins over an error, an error over an active sync
    pub fn indicator(&self) -> SyncIndicator {
        if !self.online {
            SyncIndicator::Offline
        } else if self.sync_error.is_some() {
            SyncIndicator::Failed
        } else if self.syncing {
            SyncIndicator::Syncing
        } else {
            SyncIndicator::Hidden
        }
    }
}

/// Shared handle to the published sync state
#[derive(Clone)]
pub struct SyncState {
    tx: Arc<watch::Sender<SyncSnapshot>>,
    active_operations: Arc<AtomicUsize>,
}

impl SyncState {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(SyncSnapshot {
            online,
            ..SyncSnapshot::default()
        });
        Self {
            tx: Arc::new(tx),
            active_operations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.tx.subscribe()
    }

    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.online != online;
            s.online = online;
            changed
        });
    }

    /// Record a successful sync; clears any previous error
    pub fn record_success(&self, at: Timestamp) {
        self.tx.send_modify(|s| {
            s.last_sync_time = Some(at);
            s.sync_error = None;
        });
    }

    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|s| s.sync_error = Some(message));
    }

    /// Mark an operation in flight until the guard drops
    pub fn begin_operation(&self) -> OperationGuard {
        if self.active_operations.fetch_add(1, Ordering::SeqCst) == 0 {
            self.tx.send_modify(|s| s.syncing = true);
        }
        OperationGuard {
            state: self.clone(),
        }
    }
}

pub struct OperationGuard {
    state: SyncState,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if self.state.active_operations.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.state.tx.send_modify(|s| s.syncing = false);
        }
    }
}
