//! Order sync reconciler.
//!
//! Pushes one local order at a time to the remote order service and folds
//! the result back into the local store and retry queue. Sync failures never
//! surface as errors: they become a durable `error` sync status plus a retry
//! queue entry, and callers get a `SyncResult` value.
//!
//! The first push of an order is a full create. After that the order-level
//! sync only sends the mutable envelope (status, metadata, note, billing);
//! line items, shipping lines and coupon lines go through `sync_facet` so a
//! reconciliation pass never overwrites newer server-side line state it has
//! not observed.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::error::{RemoteError, StoreError};
use crate::models::{
    CouponLine, LineItem, ListFilter, LocalOrder, OrderData, OrderFacet, ShippingLine,
    SyncStatus, SyncStatusUpdate,
};
use crate::orders::OrderStore;
use crate::remote::{OrderService, RemoteLine, RemoteOrder};
use crate::retry_queue::RetryQueue;

/// Default age after which an order left in `syncing` is considered stuck.
const DEFAULT_STALE_SYNCING_SECS: i64 = 120;

/// Outcome of one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub frontend_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    fn ok(frontend_id: &str, server_id: Option<i64>) -> Self {
        Self {
            success: true,
            frontend_id: frontend_id.to_string(),
            server_id,
            error: None,
        }
    }

    fn failed(frontend_id: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            frontend_id: frontend_id.to_string(),
            server_id: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Push even when the order is already `synced`.
    pub force: bool,
}

// ---------------------------------------------------------------------------
// Per-order locking
// ---------------------------------------------------------------------------

/// Single-flight guard keyed by frontend id. Holding the guard for the whole
/// attempt means a second caller sees the first caller's server id and takes
/// the update or short-circuit path instead of creating a duplicate.
#[derive(Default)]
struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = match self.inner.lock() {
                Ok(map) => map,
                Err(poisoned) => poisoned.into_inner(),
            };
            // Idle entries are referenced only by the map.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SyncEngine {
    store: OrderStore,
    queue: RetryQueue,
    remote: Arc<dyn OrderService>,
    locks: KeyedLocks,
    stale_syncing_after: ChronoDuration,
}

impl SyncEngine {
    pub fn new(store: OrderStore, queue: RetryQueue, remote: Arc<dyn OrderService>) -> Self {
        Self {
            store,
            queue,
            remote,
            locks: KeyedLocks::default(),
            stale_syncing_after: ChronoDuration::seconds(DEFAULT_STALE_SYNCING_SECS),
        }
    }

    /// Age after which a `syncing` order with no running attempt is retried.
    pub fn with_stale_syncing_after(mut self, after: std::time::Duration) -> Self {
        self.stale_syncing_after = ChronoDuration::from_std(after)
            .unwrap_or_else(|_| ChronoDuration::seconds(DEFAULT_STALE_SYNCING_SECS));
        self
    }

    pub fn store(&self) -> &OrderStore {
        &self.store
    }

    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    /// Push one order to the server. Never returns an error.
    pub async fn sync_order(&self, frontend_id: &str, options: SyncOptions) -> SyncResult {
        let _guard = self.locks.acquire(frontend_id).await;
        self.sync_order_locked(frontend_id, options).await
    }

    async fn sync_order_locked(&self, frontend_id: &str, options: SyncOptions) -> SyncResult {
        let order = match self.store.find(frontend_id) {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(frontend_id = %frontend_id, "Sync requested for unknown order");
                return SyncResult::failed(frontend_id, "not found");
            }
            Err(e) => return store_failure(frontend_id, e),
        };

        if order.sync_status == SyncStatus::Synced && !options.force {
            debug!(frontend_id = %frontend_id, "Order already synced, skipping");
            // A crash between "mark synced" and "dequeue" leaves a stale entry.
            if let Err(e) = self.queue.dequeue(frontend_id) {
                warn!(frontend_id = %frontend_id, error = %e, "Failed to drop stale retry entry");
            }
            return SyncResult::ok(frontend_id, order.server_id);
        }

        let attempt_at = Utc::now();
        let order = match self.store.update_sync_status(
            frontend_id,
            SyncStatus::Syncing,
            SyncStatusUpdate {
                last_sync_attempt: Some(attempt_at),
                ..Default::default()
            },
        ) {
            Ok(order) => order,
            Err(e) => return store_failure(frontend_id, e),
        };

        let pushed = match order.server_id {
            None => self.push_create(&order).await,
            Some(server_id) => self.push_update(&order, server_id).await,
        };

        match pushed {
            Ok(server_id) => self.finish_success(frontend_id, server_id),
            Err(e) => {
                let mut result = self.finish_failure(frontend_id, &e.to_string(), attempt_at);
                result.server_id = order.server_id;
                result
            }
        }
    }

    /// Create case: send the whole order, then fold server line ids back.
    async fn push_create(&self, order: &LocalOrder) -> Result<i64, RemoteError> {
        let payload = build_create_payload(order);
        let remote = self
            .remote
            .create_order(&payload, &idempotency_key(&order.frontend_id))
            .await?;

        let sent = order.data.clone();
        let folded = self.store.modify(&order.frontend_id, |current| {
            fold_server_line_ids(&mut current.data, &sent, &remote, &OrderFacet::ALL);
            // The create carried every facet.
            current.pending_facets.clear();
        });
        if let Err(e) = folded {
            warn!(frontend_id = %order.frontend_id, error = %e, "Failed to fold server line ids");
        }
        Ok(remote.id)
    }

    /// Update case: send the mutable envelope, then any facets whose own push
    /// failed earlier.
    async fn push_update(&self, order: &LocalOrder, server_id: i64) -> Result<i64, RemoteError> {
        self.remote
            .update_order(server_id, &build_update_payload(order))
            .await?;

        for facet in order.pending_facets.clone() {
            self.push_facet(order, server_id, facet).await?;
        }
        Ok(server_id)
    }

    async fn push_facet(
        &self,
        order: &LocalOrder,
        server_id: i64,
        facet: OrderFacet,
    ) -> Result<(), RemoteError> {
        let remote = self
            .remote
            .update_order(server_id, &build_facet_payload(&order.data, facet))
            .await?;

        let sent = order.data.clone();
        let folded = self.store.modify(&order.frontend_id, |current| {
            fold_server_line_ids(&mut current.data, &sent, &remote, &[facet]);
            current.pending_facets.retain(|f| *f != facet);
        });
        if let Err(e) = folded {
            warn!(frontend_id = %order.frontend_id, error = %e, "Failed to record facet push");
        }
        Ok(())
    }

    fn finish_success(&self, frontend_id: &str, server_id: i64) -> SyncResult {
        if let Err(e) = self.store.update_sync_status(
            frontend_id,
            SyncStatus::Synced,
            SyncStatusUpdate {
                server_id: Some(server_id),
                ..Default::default()
            },
        ) {
            error!(
                frontend_id = %frontend_id,
                server_id,
                error = %e,
                "Remote sync succeeded but local state could not be updated"
            );
            return store_failure(frontend_id, e);
        }
        if let Err(e) = self.queue.dequeue(frontend_id) {
            warn!(frontend_id = %frontend_id, error = %e, "Failed to dequeue synced order");
        }
        info!(frontend_id = %frontend_id, server_id, "Order synced");
        SyncResult::ok(frontend_id, Some(server_id))
    }

    fn finish_failure(&self, frontend_id: &str, message: &str, attempt_at: DateTime<Utc>) -> SyncResult {
        warn!(frontend_id = %frontend_id, error = %message, "Order sync failed");
        if let Err(e) = self.store.update_sync_status(
            frontend_id,
            SyncStatus::Error,
            SyncStatusUpdate {
                error: Some(message.to_string()),
                last_sync_attempt: Some(attempt_at),
                ..Default::default()
            },
        ) {
            error!(frontend_id = %frontend_id, error = %e, "Failed to record sync error");
        }
        if let Err(e) = self.queue.enqueue(frontend_id, message) {
            error!(frontend_id = %frontend_id, error = %e, "Failed to enqueue sync retry");
        }
        SyncResult::failed(frontend_id, message)
    }

    /// Push one line facet of an order that already exists remotely.
    ///
    /// Orders without a server id fall back to a full sync, since the create
    /// carries every facet. A failed push is remembered on the order and
    /// resent by the next order-level sync.
    pub async fn sync_facet(&self, frontend_id: &str, facet: OrderFacet) -> SyncResult {
        let _guard = self.locks.acquire(frontend_id).await;

        let order = match self.store.find(frontend_id) {
            Ok(Some(order)) => order,
            Ok(None) => return SyncResult::failed(frontend_id, "not found"),
            Err(e) => return store_failure(frontend_id, e),
        };

        let Some(server_id) = order.server_id else {
            debug!(frontend_id = %frontend_id, facet = facet.key(), "No server id yet, running full sync");
            return self
                .sync_order_locked(frontend_id, SyncOptions::default())
                .await;
        };

        match self.push_facet(&order, server_id, facet).await {
            Ok(()) => {
                debug!(frontend_id = %frontend_id, facet = facet.key(), "Facet synced");
                SyncResult::ok(frontend_id, Some(server_id))
            }
            Err(e) => {
                let marked = self.store.modify(frontend_id, |current| {
                    if !current.pending_facets.contains(&facet) {
                        current.pending_facets.push(facet);
                    }
                });
                if let Err(store_err) = marked {
                    error!(frontend_id = %frontend_id, error = %store_err, "Failed to remember pending facet");
                }
                let mut result = self.finish_failure(frontend_id, &e.to_string(), Utc::now());
                result.server_id = Some(server_id);
                result
            }
        }
    }

    /// Sweep the retry queue for due entries, then sync orders that were
    /// never attempted and orders stuck in `syncing`.
    pub async fn process_sync_queue(&self) -> Vec<SyncResult> {
        self.process_sync_queue_at(Utc::now()).await
    }

    pub(crate) async fn process_sync_queue_at(&self, now: DateTime<Utc>) -> Vec<SyncResult> {
        let mut results = Vec::new();
        let mut handled: HashSet<String> = HashSet::new();

        let due = self.queue.due(now).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read due retry entries");
            Vec::new()
        });
        for entry in due {
            if handled.insert(entry.frontend_id.clone()) {
                results.push(self.sync_order(&entry.frontend_id, SyncOptions::default()).await);
            }
        }

        // Orders with a queue entry that is not yet due are waiting on backoff.
        let waiting: HashSet<String> = match self.queue.list() {
            Ok(entries) => entries.into_iter().map(|e| e.frontend_id).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to read retry queue");
                HashSet::new()
            }
        };

        let never_attempted = self
            .store
            .list(&ListFilter {
                sync_status: Some(SyncStatus::Local),
                ..Default::default()
            })
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to list local orders");
                Vec::new()
            });
        let stuck = self
            .store
            .list_stuck_syncing(now - self.stale_syncing_after)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to list stuck orders");
                Vec::new()
            });
        if !stuck.is_empty() {
            info!(count = stuck.len(), "Retrying orders stuck in syncing");
        }

        // Oldest first so earlier orders reach the server first.
        for order in never_attempted.into_iter().rev().chain(stuck) {
            if waiting.contains(&order.frontend_id) || !handled.insert(order.frontend_id.clone()) {
                continue;
            }
            results.push(self.sync_order(&order.frontend_id, SyncOptions::default()).await);
        }

        results
    }

    /// Operator-triggered "sync now": every `local` or `error` order,
    /// regardless of backoff.
    pub async fn sync_all_pending_orders(&self) -> Vec<SyncResult> {
        let mut candidates = Vec::new();
        for status in [SyncStatus::Local, SyncStatus::Error] {
            match self.store.list(&ListFilter {
                sync_status: Some(status),
                ..Default::default()
            }) {
                Ok(orders) => candidates.extend(orders.into_iter().rev()),
                Err(e) => warn!(error = %e, sync_status = %status, "Failed to list pending orders"),
            }
        }

        info!(count = candidates.len(), "Syncing all pending orders");
        let mut results = Vec::with_capacity(candidates.len());
        for order in candidates {
            results.push(self.sync_order(&order.frontend_id, SyncOptions::default()).await);
        }
        results
    }
}

fn store_failure(frontend_id: &str, err: StoreError) -> SyncResult {
    error!(frontend_id = %frontend_id, error = %err, "Local store error during sync");
    SyncResult::failed(frontend_id, err.to_string())
}

pub(crate) fn idempotency_key(frontend_id: &str) -> String {
    format!("pos-{frontend_id}")
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

fn money(value: f64) -> String {
    format!("{value:.2}")
}

fn line_item_payload(item: &LineItem) -> Value {
    let mut obj = Map::new();
    if let Some(id) = item.id {
        obj.insert("id".into(), json!(id));
    }
    obj.insert("product_id".into(), json!(item.product_id));
    if let Some(variation_id) = item.variation_id {
        obj.insert("variation_id".into(), json!(variation_id));
    }
    obj.insert("quantity".into(), json!(item.quantity));
    obj.insert("subtotal".into(), json!(money(item.total())));
    obj.insert("total".into(), json!(money(item.total())));
    Value::Object(obj)
}

fn shipping_line_payload(line: &ShippingLine) -> Value {
    let mut obj = Map::new();
    if let Some(id) = line.id {
        obj.insert("id".into(), json!(id));
    }
    obj.insert("method_id".into(), json!(line.method_id));
    obj.insert("method_title".into(), json!(line.method_title));
    obj.insert("total".into(), json!(money(line.total)));
    Value::Object(obj)
}

fn coupon_line_payload(line: &CouponLine) -> Value {
    let mut obj = Map::new();
    if let Some(id) = line.id {
        obj.insert("id".into(), json!(id));
    }
    obj.insert("code".into(), json!(line.code));
    Value::Object(obj)
}

fn facet_value(data: &OrderData, facet: OrderFacet) -> Value {
    match facet {
        OrderFacet::LineItems => {
            Value::Array(data.line_items.iter().map(line_item_payload).collect())
        }
        OrderFacet::ShippingLines => {
            Value::Array(data.shipping_lines.iter().map(shipping_line_payload).collect())
        }
        OrderFacet::CouponLines => {
            Value::Array(data.coupon_lines.iter().map(coupon_line_payload).collect())
        }
    }
}

/// Full order for the first push. Local-only fields (display names, running
/// totals, coupon discounts) are left for the server to derive.
pub fn build_create_payload(order: &LocalOrder) -> Value {
    let mut payload = build_update_payload(order);
    if let Value::Object(obj) = &mut payload {
        for facet in OrderFacet::ALL {
            obj.insert(facet.key().into(), facet_value(&order.data, facet));
        }
    }
    payload
}

/// Mutable envelope for an order that already exists remotely. Line arrays
/// are deliberately absent.
pub fn build_update_payload(order: &LocalOrder) -> Value {
    json!({
        "status": order.status.as_str(),
        "meta_data": order.data.meta_data,
        "customer_note": order.data.customer_note,
        "billing": order.data.billing,
    })
}

pub fn build_facet_payload(data: &OrderData, facet: OrderFacet) -> Value {
    let mut obj = Map::new();
    obj.insert(facet.key().into(), facet_value(data, facet));
    Value::Object(obj)
}

/// A line that can carry a server-assigned id.
trait ServerLine: PartialEq {
    fn server_id_mut(&mut self) -> &mut Option<i64>;
}

impl ServerLine for LineItem {
    fn server_id_mut(&mut self) -> &mut Option<i64> {
        &mut self.id
    }
}

impl ServerLine for ShippingLine {
    fn server_id_mut(&mut self) -> &mut Option<i64> {
        &mut self.id
    }
}

impl ServerLine for CouponLine {
    fn server_id_mut(&mut self) -> &mut Option<i64> {
        &mut self.id
    }
}

fn assign_line_ids<T: ServerLine>(lines: &mut [T], sent: &[T], remote: &[RemoteLine]) {
    if lines[..] != sent[..] || lines.len() != remote.len() {
        return;
    }
    for (line, remote_line) in lines.iter_mut().zip(remote) {
        let id = line.server_id_mut();
        if id.is_none() {
            *id = Some(remote_line.id);
        }
    }
}

/// Copy server-assigned line ids into `current`, by position.
///
/// Only done for a facet that was not edited locally while the request was
/// in flight (it still matches `sent`) and whose count matches the response.
fn fold_server_line_ids(
    current: &mut OrderData,
    sent: &OrderData,
    remote: &RemoteOrder,
    facets: &[OrderFacet],
) {
    for facet in facets {
        match facet {
            OrderFacet::LineItems => {
                assign_line_ids(&mut current.line_items, &sent.line_items, &remote.line_items)
            }
            OrderFacet::ShippingLines => assign_line_ids(
                &mut current.shipping_lines,
                &sent.shipping_lines,
                &remote.shipping_lines,
            ),
            OrderFacet::CouponLines => {
                assign_line_ids(&mut current.coupon_lines, &sent.coupon_lines, &remote.coupon_lines)
            }
        }
    }
}
