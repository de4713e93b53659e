//! Offline-tolerant custody sync
//!
//! - [`RemoteAuthority`]: the ledger RPC seam, plus [`SimulatedAuthority`]
//! - [`ConnectivityMonitor`]: the online signal and the reconnect trigger
//! - [`SyncState`]: the published `{online, syncing, last_sync_time, sync_error}`
//! - [`SyncReconciler`]: the outbox drain with pickup-before-completion ordering

pub mod authority;
pub mod connectivity;
pub mod reconciler;
pub mod state;

pub use authority::{Ack, AuthorityCall, AuthorityError, RemoteAuthority, SimulatedAuthority};
pub use connectivity::{spawn_reconnect_sync, ConnectivityMonitor};
pub use reconciler::{PassOutcome, QueueReason, SyncError, SyncOutcome, SyncReconciler};
pub use state::{OperationGuard, SyncIndicator, SyncSnapshot, SyncState};
