//! Order data model: the local order record, its payload, and the patch
//! types the store merges into it.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Metadata key carrying the client-generated order id.
pub const META_FRONTEND_ID: &str = "pos_frontend_id";
/// Metadata key carrying the remote order id, added once after first sync.
pub const META_SERVER_ID: &str = "pos_server_id";

// ---------------------------------------------------------------------------
// Lifecycle enums
// ---------------------------------------------------------------------------

/// Business lifecycle of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    Draft,
    Pending,
    Processing,
    Completed,
    Cancelled,
    Refunded,
    Failed,
    OnHold,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Failed => "failed",
            OrderStatus::OnHold => "on-hold",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = StoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "draft" => Ok(OrderStatus::Draft),
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "refunded" => Ok(OrderStatus::Refunded),
            "failed" => Ok(OrderStatus::Failed),
            "on-hold" => Ok(OrderStatus::OnHold),
            other => Err(StoreError::InvalidValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconciliation lifecycle of an order, independent of its business status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Local,
    Syncing,
    Synced,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Local => "local",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = StoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "local" => Ok(SyncStatus::Local),
            "syncing" => Ok(SyncStatus::Syncing),
            "synced" => Ok(SyncStatus::Synced),
            "error" => Ok(SyncStatus::Error),
            other => Err(StoreError::InvalidValue {
                field: "sync_status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line arrays that are pushed to the server through their own update calls
/// once the order exists remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderFacet {
    LineItems,
    ShippingLines,
    CouponLines,
}

impl OrderFacet {
    pub const ALL: [OrderFacet; 3] = [
        OrderFacet::LineItems,
        OrderFacet::ShippingLines,
        OrderFacet::CouponLines,
    ];

    /// Payload key on the wire.
    pub fn key(&self) -> &'static str {
        match self {
            OrderFacet::LineItems => "line_items",
            OrderFacet::ShippingLines => "shipping_lines",
            OrderFacet::CouponLines => "coupon_lines",
        }
    }
}

// ---------------------------------------------------------------------------
// Order payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub key: String,
    pub value: Value,
}

impl MetaEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A product line. `id` is assigned by the server once the line exists there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub product_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<i64>,
    /// Display name cached from the local catalog; the server derives its own.
    #[serde(default)]
    pub name: String,
    pub quantity: i64,
    /// Unit price.
    pub price: f64,
}

impl LineItem {
    pub fn total(&self) -> f64 {
        self.price * self.quantity as f64
    }
}

/// Shipping or service line (delivery, dine-in table service, pickup).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub method_id: String,
    #[serde(default)]
    pub method_title: String,
    #[serde(default)]
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouponLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub code: String,
    /// Discount applied locally for the running total; recomputed by the server.
    #[serde(default)]
    pub discount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Billing {
    pub first_name: String,
    pub last_name: String,
    pub company: String,
    pub address_1: String,
    pub address_2: String,
    pub city: String,
    pub state: String,
    pub postcode: String,
    pub country: String,
    pub email: String,
    pub phone: String,
}

/// Field-wise billing update. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub address_1: Option<String>,
    pub address_2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postcode: Option<String>,
    pub country: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Billing {
    pub fn merge(&mut self, patch: &BillingPatch) {
        fn apply(target: &mut String, value: &Option<String>) {
            if let Some(v) = value {
                target.clone_from(v);
            }
        }
        apply(&mut self.first_name, &patch.first_name);
        apply(&mut self.last_name, &patch.last_name);
        apply(&mut self.company, &patch.company);
        apply(&mut self.address_1, &patch.address_1);
        apply(&mut self.address_2, &patch.address_2);
        apply(&mut self.city, &patch.city);
        apply(&mut self.state, &patch.state);
        apply(&mut self.postcode, &patch.postcode);
        apply(&mut self.country, &patch.country);
        apply(&mut self.email, &patch.email);
        apply(&mut self.phone, &patch.phone);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Totals {
    pub subtotal: f64,
    pub shipping_total: f64,
    pub discount_total: f64,
    pub total: f64,
}

/// The order payload as edited by the operator and mirrored to the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderData {
    /// Remote id, stamped on first successful sync.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub line_items: Vec<LineItem>,
    pub shipping_lines: Vec<ShippingLine>,
    pub coupon_lines: Vec<CouponLine>,
    pub customer_note: String,
    pub billing: Billing,
    pub meta_data: Vec<MetaEntry>,
    pub totals: Totals,
}

impl OrderData {
    pub fn recompute_totals(&mut self) {
        let subtotal: f64 = self.line_items.iter().map(LineItem::total).sum();
        let shipping_total: f64 = self.shipping_lines.iter().map(|l| l.total).sum();
        let discount_total: f64 = self.coupon_lines.iter().map(|c| c.discount).sum();
        self.totals = Totals {
            subtotal,
            shipping_total,
            discount_total,
            total: (subtotal + shipping_total - discount_total).max(0.0),
        };
    }

    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.meta_data.iter().find(|m| m.key == key).map(|m| &m.value)
    }

    /// Replace the entry with a matching key, or append a new one.
    pub fn upsert_meta(&mut self, entry: MetaEntry) {
        match self.meta_data.iter_mut().find(|m| m.key == entry.key) {
            Some(existing) => existing.value = entry.value,
            None => self.meta_data.push(entry),
        }
    }

    /// Merge by key, then make sure the frontend id entry is still present.
    pub fn merge_meta(&mut self, incoming: &[MetaEntry], frontend_id: &str) {
        for entry in incoming {
            self.upsert_meta(entry.clone());
        }
        self.ensure_frontend_meta(frontend_id);
    }

    pub fn ensure_frontend_meta(&mut self, frontend_id: &str) {
        if self.meta(META_FRONTEND_ID).is_none() {
            self.meta_data
                .push(MetaEntry::new(META_FRONTEND_ID, frontend_id));
        }
    }
}

// ---------------------------------------------------------------------------
// Local order record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalOrder {
    pub frontend_id: String,
    pub server_id: Option<i64>,
    pub status: OrderStatus,
    pub sync_status: SyncStatus,
    pub data: OrderData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub sync_error: Option<String>,
    /// Facets whose last dedicated push failed and still need resending.
    #[serde(default)]
    pub pending_facets: Vec<OrderFacet>,
}

/// Initial contents for a new order. Status always starts as draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewOrder {
    pub line_items: Vec<LineItem>,
    pub shipping_lines: Vec<ShippingLine>,
    pub coupon_lines: Vec<CouponLine>,
    pub customer_note: String,
    pub billing: Billing,
    pub meta_data: Vec<MetaEntry>,
}

/// Partial update merged into an existing order.
///
/// Item, shipping and coupon arrays replace the stored array wholesale when
/// present; billing merges field by field; metadata merges by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub customer_note: Option<String>,
    pub line_items: Option<Vec<LineItem>>,
    pub shipping_lines: Option<Vec<ShippingLine>>,
    pub coupon_lines: Option<Vec<CouponLine>>,
    pub billing: Option<BillingPatch>,
    pub meta_data: Option<Vec<MetaEntry>>,
}

/// Optional fields accompanying a sync status transition.
#[derive(Debug, Clone, Default)]
pub struct SyncStatusUpdate {
    pub server_id: Option<i64>,
    pub error: Option<String>,
    pub last_sync_attempt: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<OrderStatus>,
    pub sync_status: Option<SyncStatus>,
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// RFC 3339 with millisecond precision; sorts lexicographically.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(field: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidValue {
            field,
            value: raw.to_string(),
        })
}
