use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::OrderItem;
use crate::event_sourcing::core::{EventPayload, EventRegistry};

// ============================================================================
// Order Events - Domain Events for Order Aggregate
// ============================================================================
//
// Stored and delivered as "order.<verb>". The serialized form is adjacently
// tagged: {"type": "Created", "data": {...}}.
//
// ============================================================================

pub const ORDER_CREATED: &str = "order.created";
pub const ORDER_ITEMS_UPDATED: &str = "order.items_updated";
pub const ORDER_CONFIRMED: &str = "order.confirmed";
pub const ORDER_SHIPPED: &str = "order.shipped";
pub const ORDER_DELIVERED: &str = "order.delivered";
pub const ORDER_CANCELLED: &str = "order.cancelled";

pub const EVENT_TYPES: &[&str] = &[
    ORDER_CREATED,
    ORDER_ITEMS_UPDATED,
    ORDER_CONFIRMED,
    ORDER_SHIPPED,
    ORDER_DELIVERED,
    ORDER_CANCELLED,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Created {
        customer_id: Uuid,
        items: Vec<OrderItem>,
    },
    ItemsUpdated {
        items: Vec<OrderItem>,
        reason: Option<String>,
    },
    Confirmed {
        confirmed_at: DateTime<Utc>,
    },
    Shipped {
        tracking_number: String,
        carrier: String,
        shipped_at: DateTime<Utc>,
    },
    Delivered {
        delivered_at: DateTime<Utc>,
        signature: Option<String>,
    },
    Cancelled {
        reason: Option<String>,
        cancelled_by: Option<Uuid>,
    },
}

impl EventPayload for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Created { .. } => ORDER_CREATED,
            OrderEvent::ItemsUpdated { .. } => ORDER_ITEMS_UPDATED,
            OrderEvent::Confirmed { .. } => ORDER_CONFIRMED,
            OrderEvent::Shipped { .. } => ORDER_SHIPPED,
            OrderEvent::Delivered { .. } => ORDER_DELIVERED,
            OrderEvent::Cancelled { .. } => ORDER_CANCELLED,
        }
    }
}

/// Register every order event type for typed decoding.
pub fn register_order_events(registry: &mut EventRegistry) -> &mut EventRegistry {
    registry.register::<OrderEvent>(EVENT_TYPES)
}
