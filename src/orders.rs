//! Local order store.
//!
//! The durable record of every order and the single source of truth for the
//! UI. All reads and writes are keyed by frontend id, with a secondary lookup
//! by server id. Every mutation is a read-modify-write under the database
//! mutex, so concurrent facet edits (items, note, billing) merge instead of
//! overwriting each other.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::DbState;
use crate::error::{StoreError, StoreResult};
use crate::identifier;
use crate::models::{
    format_ts, parse_ts, ListFilter, LocalOrder, MetaEntry, NewOrder, OrderData, OrderPatch,
    OrderStatus, SyncStatus, SyncStatusUpdate, META_FRONTEND_ID, META_SERVER_ID,
};

const ORDER_COLUMNS: &str = "frontend_id, server_id, status, sync_status, data, created_at, \
                             updated_at, last_sync_attempt, sync_error, pending_facets";

/// Per-status order counts plus retry queue depth, for a sync indicator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub local: i64,
    pub syncing: i64,
    pub synced: i64,
    pub error: i64,
    pub queued: i64,
}

#[derive(Clone)]
pub struct OrderStore {
    db: Arc<DbState>,
    id_max_attempts: u32,
}

impl OrderStore {
    pub fn new(db: Arc<DbState>) -> Self {
        Self {
            db,
            id_max_attempts: identifier::DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_id_attempts(mut self, attempts: u32) -> Self {
        self.id_max_attempts = attempts.max(1);
        self
    }

    pub fn db(&self) -> &Arc<DbState> {
        &self.db
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Create a new draft order with a fresh frontend id.
    pub fn create(&self, initial: NewOrder) -> StoreResult<LocalOrder> {
        let conn = self.db.lock()?;

        let frontend_id = identifier::generate_unique(self.id_max_attempts, |candidate| {
            order_exists(&conn, candidate)
        })?;

        let mut data = OrderData {
            id: None,
            line_items: initial.line_items,
            shipping_lines: initial.shipping_lines,
            coupon_lines: initial.coupon_lines,
            customer_note: initial.customer_note,
            billing: initial.billing,
            meta_data: vec![MetaEntry::new(META_FRONTEND_ID, frontend_id.as_str())],
            totals: Default::default(),
        };
        data.merge_meta(&without_identity_meta(&initial.meta_data), &frontend_id);
        data.recompute_totals();

        let now = Utc::now();
        let order = LocalOrder {
            frontend_id,
            server_id: None,
            status: OrderStatus::Draft,
            sync_status: SyncStatus::Local,
            data,
            created_at: now,
            updated_at: now,
            last_sync_attempt: None,
            sync_error: None,
            pending_facets: Vec::new(),
        };

        insert_order(&conn, &order)?;
        info!(frontend_id = %order.frontend_id, "Order created locally");
        Ok(order)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Load an order that the caller expects to exist.
    pub fn get(&self, frontend_id: &str) -> StoreResult<LocalOrder> {
        self.find(frontend_id)?
            .ok_or_else(|| StoreError::OrderNotFound(frontend_id.to_string()))
    }

    pub fn find(&self, frontend_id: &str) -> StoreResult<Option<LocalOrder>> {
        let conn = self.db.lock()?;
        load_order(&conn, frontend_id)
    }

    pub fn get_by_server_id(&self, server_id: i64) -> StoreResult<Option<LocalOrder>> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE server_id = ?1 LIMIT 1"),
                params![server_id],
                OrderRow::read,
            )
            .optional()?;
        row.map(OrderRow::into_order).transpose()
    }

    /// Matching orders, newest first by creation time.
    pub fn list(&self, filter: &ListFilter) -> StoreResult<Vec<LocalOrder>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(status.as_str().to_string());
        }
        if let Some(sync_status) = filter.sync_status {
            clauses.push("sync_status = ?");
            values.push(sync_status.as_str().to_string());
        }

        let mut sql = format!("SELECT {ORDER_COLUMNS} FROM orders");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), OrderRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(OrderRow::into_order).collect()
    }

    /// Orders stuck in `syncing` whose last attempt started before `cutoff`.
    ///
    /// A sync attempt always finishes with `synced` or `error`, so these are
    /// leftovers from a crash mid-attempt.
    pub fn list_stuck_syncing(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<LocalOrder>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE sync_status = 'syncing'
               AND (last_sync_attempt IS NULL OR last_sync_attempt < ?1)
             ORDER BY created_at ASC"
        ))?;
        let rows = stmt
            .query_map(params![format_ts(&cutoff)], OrderRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(OrderRow::into_order).collect()
    }

    pub fn sync_summary(&self) -> StoreResult<SyncSummary> {
        let conn = self.db.lock()?;
        let mut summary = SyncSummary::default();
        let mut stmt =
            conn.prepare("SELECT sync_status, COUNT(*) FROM orders GROUP BY sync_status")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (status, count) in counts {
            match status.parse::<SyncStatus>()? {
                SyncStatus::Local => summary.local = count,
                SyncStatus::Syncing => summary.syncing = count,
                SyncStatus::Synced => summary.synced = count,
                SyncStatus::Error => summary.error = count,
            }
        }
        summary.queued = conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Merge a partial update into an order.
    pub fn update(&self, frontend_id: &str, patch: OrderPatch) -> StoreResult<LocalOrder> {
        let order = self.modify(frontend_id, |order| {
            if let Some(status) = patch.status {
                order.status = status;
            }
            if let Some(note) = patch.customer_note {
                order.data.customer_note = note;
            }
            if let Some(items) = patch.line_items {
                order.data.line_items = items;
            }
            if let Some(lines) = patch.shipping_lines {
                order.data.shipping_lines = lines;
            }
            if let Some(coupons) = patch.coupon_lines {
                order.data.coupon_lines = coupons;
            }
            if let Some(billing) = &patch.billing {
                order.data.billing.merge(billing);
            }
            if let Some(meta) = &patch.meta_data {
                order
                    .data
                    .merge_meta(&without_identity_meta(meta), &order.frontend_id);
            }
            order.data.ensure_frontend_meta(&order.frontend_id);
            order.data.recompute_totals();
        })?;
        debug!(frontend_id = %frontend_id, "Order updated locally");
        Ok(order)
    }

    /// Move an order through its reconciliation lifecycle.
    ///
    /// The first transition into `synced` with a server id stamps `data.id`
    /// and appends the `pos_server_id` metadata entry. `sync_error` is cleared
    /// for every status other than `error`.
    pub fn update_sync_status(
        &self,
        frontend_id: &str,
        sync_status: SyncStatus,
        update: SyncStatusUpdate,
    ) -> StoreResult<LocalOrder> {
        self.modify(frontend_id, |order| {
            order.sync_status = sync_status;

            if let Some(at) = update.last_sync_attempt {
                order.last_sync_attempt = Some(at);
            }

            if sync_status == SyncStatus::Error {
                order.sync_error = update.error.clone();
            } else {
                order.sync_error = None;
            }

            if sync_status != SyncStatus::Synced {
                return;
            }
            let Some(server_id) = update.server_id else {
                return;
            };
            match order.server_id {
                None => {
                    order.server_id = Some(server_id);
                    order.data.id = Some(server_id);
                    order
                        .data
                        .upsert_meta(MetaEntry::new(META_SERVER_ID, server_id));
                    info!(frontend_id = %order.frontend_id, server_id, "Order linked to server id");
                }
                Some(existing) if existing != server_id => {
                    warn!(
                        frontend_id = %order.frontend_id,
                        existing,
                        received = server_id,
                        "Ignoring attempt to change server id"
                    );
                }
                Some(_) => {}
            }
        })
    }

    /// Administrative delete of an order and its retry queue entry.
    pub fn delete(&self, frontend_id: &str) -> StoreResult<bool> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM sync_queue WHERE frontend_id = ?1",
            params![frontend_id],
        )?;
        let removed = tx.execute(
            "DELETE FROM orders WHERE frontend_id = ?1",
            params![frontend_id],
        )?;
        tx.commit()?;
        if removed > 0 {
            info!(frontend_id = %frontend_id, "Order deleted");
        }
        Ok(removed > 0)
    }

    /// Read-modify-write one order under the database lock.
    pub(crate) fn modify<F>(&self, frontend_id: &str, apply: F) -> StoreResult<LocalOrder>
    where
        F: FnOnce(&mut LocalOrder),
    {
        let conn = self.db.lock()?;
        let mut order = load_order(&conn, frontend_id)?
            .ok_or_else(|| StoreError::OrderNotFound(frontend_id.to_string()))?;
        apply(&mut order);
        order.updated_at = Utc::now();
        save_order(&conn, &order)?;
        Ok(order)
    }
}

/// Caller-supplied metadata minus the identity keys the store owns.
fn without_identity_meta(entries: &[MetaEntry]) -> Vec<MetaEntry> {
    entries
        .iter()
        .filter(|m| m.key != META_FRONTEND_ID && m.key != META_SERVER_ID)
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct OrderRow {
    frontend_id: String,
    server_id: Option<i64>,
    status: String,
    sync_status: String,
    data: String,
    created_at: String,
    updated_at: String,
    last_sync_attempt: Option<String>,
    sync_error: Option<String>,
    pending_facets: String,
}

impl OrderRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            frontend_id: row.get(0)?,
            server_id: row.get(1)?,
            status: row.get(2)?,
            sync_status: row.get(3)?,
            data: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            last_sync_attempt: row.get(7)?,
            sync_error: row.get(8)?,
            pending_facets: row.get(9)?,
        })
    }

    fn into_order(self) -> StoreResult<LocalOrder> {
        Ok(LocalOrder {
            server_id: self.server_id,
            status: self.status.parse()?,
            sync_status: self.sync_status.parse()?,
            data: serde_json::from_str(&self.data)?,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
            last_sync_attempt: self
                .last_sync_attempt
                .as_deref()
                .map(|raw| parse_ts("last_sync_attempt", raw))
                .transpose()?,
            sync_error: self.sync_error,
            pending_facets: serde_json::from_str(&self.pending_facets)?,
            frontend_id: self.frontend_id,
        })
    }
}

fn order_exists(conn: &Connection, frontend_id: &str) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM orders WHERE frontend_id = ?1",
            params![frontend_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn load_order(conn: &Connection, frontend_id: &str) -> StoreResult<Option<LocalOrder>> {
    let row = conn
        .query_row(
            &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE frontend_id = ?1"),
            params![frontend_id],
            OrderRow::read,
        )
        .optional()?;
    row.map(OrderRow::into_order).transpose()
}

fn insert_order(conn: &Connection, order: &LocalOrder) -> StoreResult<()> {
    conn.execute(
        &format!("INSERT INTO orders ({ORDER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        params![
            &order.frontend_id,
            &order.server_id,
            order.status.as_str(),
            order.sync_status.as_str(),
            serde_json::to_string(&order.data)?,
            format_ts(&order.created_at),
            format_ts(&order.updated_at),
            order.last_sync_attempt.as_ref().map(format_ts),
            &order.sync_error,
            serde_json::to_string(&order.pending_facets)?,
        ],
    )?;
    Ok(())
}

fn save_order(conn: &Connection, order: &LocalOrder) -> StoreResult<()> {
    conn.execute(
        "UPDATE orders SET
            server_id = ?2,
            status = ?3,
            sync_status = ?4,
            data = ?5,
            updated_at = ?6,
            last_sync_attempt = ?7,
            sync_error = ?8,
            pending_facets = ?9
         WHERE frontend_id = ?1",
        params![
            &order.frontend_id,
            &order.server_id,
            order.status.as_str(),
            order.sync_status.as_str(),
            serde_json::to_string(&order.data)?,
            format_ts(&order.updated_at),
            order.last_sync_attempt.as_ref().map(format_ts),
            &order.sync_error,
            serde_json::to_string(&order.pending_facets)?,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Billing, BillingPatch, CouponLine, LineItem, ShippingLine};
    use serde_json::Value;

    fn test_store() -> OrderStore {
        OrderStore::new(Arc::new(DbState::open_in_memory().expect("open db")))
    }

    fn item(product_id: i64, quantity: i64, price: f64) -> LineItem {
        LineItem {
            id: None,
            product_id,
            variation_id: None,
            name: format!("Product {product_id}"),
            quantity,
            price,
        }
    }

    #[test]
    fn test_create_yields_local_draft_with_frontend_meta() {
        let store = test_store();
        let order = store.create(NewOrder::default()).unwrap();

        assert_eq!(order.status, OrderStatus::Draft);
        assert_eq!(order.sync_status, SyncStatus::Local);
        assert!(identifier::validate_format(&order.frontend_id));
        assert_eq!(
            order.data.meta(META_FRONTEND_ID),
            Some(&Value::from(order.frontend_id.as_str()))
        );
        assert!(order.server_id.is_none());
        assert!(order.data.line_items.is_empty());

        let loaded = store.get(&order.frontend_id).unwrap();
        assert_eq!(loaded.frontend_id, order.frontend_id);
        assert_eq!(loaded.data, order.data);
    }

    #[test]
    fn test_create_cannot_spoof_identity_metadata() {
        let store = test_store();
        let order = store
            .create(NewOrder {
                meta_data: vec![
                    MetaEntry::new(META_FRONTEND_ID, "ZZZZZZ"),
                    MetaEntry::new(META_SERVER_ID, 99),
                    MetaEntry::new("table", "4"),
                ],
                ..Default::default()
            })
            .unwrap();

        assert_eq!(
            order.data.meta(META_FRONTEND_ID),
            Some(&Value::from(order.frontend_id.as_str()))
        );
        assert!(order.data.meta(META_SERVER_ID).is_none());
        assert_eq!(order.data.meta("table"), Some(&Value::from("4")));
    }

    #[test]
    fn test_get_unknown_order_is_not_found() {
        let store = test_store();
        assert!(matches!(
            store.get("NOPE00"),
            Err(StoreError::OrderNotFound(id)) if id == "NOPE00"
        ));
        assert!(store.find("NOPE00").unwrap().is_none());
        assert!(store.get_by_server_id(42).unwrap().is_none());
    }

    #[test]
    fn test_update_billing_merges_field_by_field() {
        let store = test_store();
        let order = store
            .create(NewOrder {
                billing: Billing {
                    first_name: "Maria".into(),
                    phone: "000".into(),
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();

        let updated = store
            .update(
                &order.frontend_id,
                OrderPatch {
                    billing: Some(BillingPatch {
                        phone: Some("555".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.data.billing.first_name, "Maria");
        assert_eq!(updated.data.billing.phone, "555");
    }

    #[test]
    fn test_update_replaces_arrays_and_overwrites_scalars() {
        let store = test_store();
        let order = store
            .create(NewOrder {
                line_items: vec![item(1, 1, 3.0), item(2, 1, 4.0)],
                customer_note: "no onions".into(),
                ..Default::default()
            })
            .unwrap();

        let updated = store
            .update(
                &order.frontend_id,
                OrderPatch {
                    status: Some(OrderStatus::Processing),
                    line_items: Some(vec![item(3, 2, 5.0)]),
                    shipping_lines: Some(vec![ShippingLine {
                        id: None,
                        method_id: "table_service".into(),
                        method_title: "Table 12".into(),
                        total: 0.0,
                    }]),
                    coupon_lines: Some(vec![CouponLine {
                        id: None,
                        code: "TEN".into(),
                        discount: 1.0,
                    }]),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.status, OrderStatus::Processing);
        assert_eq!(updated.data.line_items.len(), 1);
        assert_eq!(updated.data.line_items[0].product_id, 3);
        assert_eq!(updated.data.shipping_lines[0].method_title, "Table 12");
        assert_eq!(updated.data.customer_note, "no onions");
        assert_eq!(updated.data.totals.subtotal, 10.0);
        assert_eq!(updated.data.totals.total, 9.0);
        assert!(updated.updated_at >= order.updated_at);
    }

    #[test]
    fn test_update_metadata_merges_by_key_and_keeps_frontend_id() {
        let store = test_store();
        let order = store
            .create(NewOrder {
                meta_data: vec![MetaEntry::new("table", "4")],
                ..Default::default()
            })
            .unwrap();

        let updated = store
            .update(
                &order.frontend_id,
                OrderPatch {
                    meta_data: Some(vec![
                        MetaEntry::new("table", "9"),
                        MetaEntry::new("guests", 3),
                    ]),
                    ..Default::default()
                },
            )
            .unwrap();

        let keys: Vec<&str> = updated.data.meta_data.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec![META_FRONTEND_ID, "table", "guests"]);
        assert_eq!(updated.data.meta("table"), Some(&Value::from("9")));
    }

    #[test]
    fn test_update_cannot_overwrite_identity_metadata() {
        let store = test_store();
        let order = store.create(NewOrder::default()).unwrap();

        let updated = store
            .update(
                &order.frontend_id,
                OrderPatch {
                    meta_data: Some(vec![
                        MetaEntry::new(META_FRONTEND_ID, "ZZZZZZ"),
                        MetaEntry::new(META_SERVER_ID, 99),
                        MetaEntry::new("table", "2"),
                    ]),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(
            updated.data.meta(META_FRONTEND_ID),
            Some(&Value::from(order.frontend_id.as_str()))
        );
        assert!(updated.data.meta(META_SERVER_ID).is_none());
        assert_eq!(updated.data.meta("table"), Some(&Value::from("2")));

        let stored = store.get(&order.frontend_id).unwrap();
        assert_eq!(stored.data.meta_data, updated.data.meta_data);
    }

    #[test]
    fn test_first_link_replaces_stale_server_id_metadata() {
        let store = test_store();
        let order = store.create(NewOrder::default()).unwrap();
        // Rows written by older builds may already carry the key.
        store
            .modify(&order.frontend_id, |o| {
                o.data.meta_data.push(MetaEntry::new(META_SERVER_ID, 99));
            })
            .unwrap();

        let synced = store
            .update_sync_status(
                &order.frontend_id,
                SyncStatus::Synced,
                SyncStatusUpdate {
                    server_id: Some(1001),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(synced.data.meta(META_SERVER_ID), Some(&Value::from(1001)));
        let entries = synced
            .data
            .meta_data
            .iter()
            .filter(|m| m.key == META_SERVER_ID)
            .count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_update_unknown_order_fails() {
        let store = test_store();
        let err = store.update("XXXXXX", OrderPatch::default()).unwrap_err();
        assert!(matches!(err, StoreError::OrderNotFound(_)));
    }

    #[test]
    fn test_update_sync_status_links_server_id_once() {
        let store = test_store();
        let order = store.create(NewOrder::default()).unwrap();
        let id = order.frontend_id.clone();

        store
            .update_sync_status(
                &id,
                SyncStatus::Error,
                SyncStatusUpdate {
                    error: Some("boom".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(store.get(&id).unwrap().sync_error.as_deref(), Some("boom"));

        let synced = store
            .update_sync_status(
                &id,
                SyncStatus::Synced,
                SyncStatusUpdate {
                    server_id: Some(501),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(synced.server_id, Some(501));
        assert_eq!(synced.data.id, Some(501));
        assert!(synced.sync_error.is_none());

        let again = store
            .update_sync_status(
                &id,
                SyncStatus::Synced,
                SyncStatusUpdate {
                    server_id: Some(777),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(again.server_id, Some(501));
        let server_meta = again
            .data
            .meta_data
            .iter()
            .filter(|m| m.key == META_SERVER_ID)
            .count();
        assert_eq!(server_meta, 1);

        assert_eq!(store.get_by_server_id(501).unwrap().unwrap().frontend_id, id);
    }

    #[test]
    fn test_list_filters_and_orders_newest_first() {
        let store = test_store();
        let first = store.create(NewOrder::default()).unwrap();
        let second = store.create(NewOrder::default()).unwrap();
        let third = store.create(NewOrder::default()).unwrap();
        store
            .update(
                &second.frontend_id,
                OrderPatch {
                    status: Some(OrderStatus::Completed),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .update_sync_status(&third.frontend_id, SyncStatus::Synced, Default::default())
            .unwrap();

        let all: Vec<String> = store
            .list(&ListFilter::default())
            .unwrap()
            .into_iter()
            .map(|o| o.frontend_id)
            .collect();
        assert_eq!(
            all,
            vec![
                third.frontend_id.clone(),
                second.frontend_id.clone(),
                first.frontend_id.clone()
            ]
        );

        let completed = store
            .list(&ListFilter {
                status: Some(OrderStatus::Completed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].frontend_id, second.frontend_id);

        let local = store
            .list(&ListFilter {
                sync_status: Some(SyncStatus::Local),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].frontend_id, second.frontend_id);
    }

    #[test]
    fn test_list_stuck_syncing_uses_last_attempt() {
        let store = test_store();
        let stale = store.create(NewOrder::default()).unwrap();
        let fresh = store.create(NewOrder::default()).unwrap();
        let now = Utc::now();

        store
            .update_sync_status(
                &stale.frontend_id,
                SyncStatus::Syncing,
                SyncStatusUpdate {
                    last_sync_attempt: Some(now - chrono::Duration::minutes(10)),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .update_sync_status(
                &fresh.frontend_id,
                SyncStatus::Syncing,
                SyncStatusUpdate {
                    last_sync_attempt: Some(now),
                    ..Default::default()
                },
            )
            .unwrap();

        let stuck = store
            .list_stuck_syncing(now - chrono::Duration::minutes(1))
            .unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].frontend_id, stale.frontend_id);
    }

    #[test]
    fn test_delete_and_summary() {
        let store = test_store();
        let a = store.create(NewOrder::default()).unwrap();
        let b = store.create(NewOrder::default()).unwrap();
        store
            .update_sync_status(&b.frontend_id, SyncStatus::Error, Default::default())
            .unwrap();

        let summary = store.sync_summary().unwrap();
        assert_eq!(summary.local, 1);
        assert_eq!(summary.error, 1);
        assert_eq!(summary.queued, 0);

        assert!(store.delete(&a.frontend_id).unwrap());
        assert!(!store.delete(&a.frontend_id).unwrap());
        assert_eq!(store.sync_summary().unwrap().local, 0);
    }
}
