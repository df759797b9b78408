//! The Small POS - local-first order store and background sync engine.
//!
//! Orders are created and edited against a local SQLite store under a
//! client-generated frontend id, then pushed to the remote order service by
//! the reconciler. Failed pushes land in a durable retry queue that a
//! background loop sweeps on a capped backoff schedule.

pub mod config;
pub mod db;
pub mod error;
pub mod identifier;
pub mod logging;
pub mod models;
pub mod orders;
pub mod remote;
pub mod retry_queue;
pub mod sync;
pub mod sync_loop;

pub use config::{RemoteConfig, SyncConfig};
pub use db::DbState;
pub use error::{RemoteError, StoreError, StoreResult};
pub use models::{
    Billing, BillingPatch, CouponLine, LineItem, ListFilter, LocalOrder, MetaEntry, NewOrder,
    OrderData, OrderFacet, OrderPatch, OrderStatus, ShippingLine, SyncStatus, SyncStatusUpdate,
};
pub use orders::{OrderStore, SyncSummary};
pub use remote::{HttpConnectivity, HttpOrderService, OrderService, RemoteOrder};
pub use retry_queue::{RetryQueue, RetryQueueEntry};
pub use sync::{SyncEngine, SyncOptions, SyncResult};
pub use sync_loop::{AlwaysOnline, Connectivity, ListenerId, SyncListener, SyncLoop};
