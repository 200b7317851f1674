use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::OrderEvent;
use super::value_objects::{OrderItem, OrderStatus};
use crate::event_sourcing::core::{Aggregate, DomainEvent, Event, EventPayload};

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct OrderAggregate {
    // Identity
    pub id: String,
    pub version: i64,

    // Current State (derived from events)
    pub customer_id: Uuid,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Optional fields
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub cancelled_reason: Option<String>,
}

impl OrderAggregate {
    /// Validate business rules before emitting events
    fn validate_items(items: &[OrderItem]) -> Result<(), OrderError> {
        if items.is_empty() {
            return Err(OrderError::EmptyItems);
        }

        for item in items {
            if item.quantity <= 0 {
                return Err(OrderError::InvalidQuantity(item.quantity));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for OrderAggregate {
    type Payload = OrderEvent;
    type Command = OrderCommand;
    type Error = OrderError;

    fn apply_first_event(event: &DomainEvent<OrderEvent>) -> Result<Self, Self::Error> {
        match event.data() {
            OrderEvent::Created { customer_id, items } => Ok(Self {
                id: event.aggregate_id().to_string(),
                version: event.sequence_no(),
                customer_id: *customer_id,
                items: items.clone(),
                status: OrderStatus::Created,
                created_at: event.created_at(),
                updated_at: event.created_at(),
                tracking_number: None,
                carrier: None,
                cancelled_reason: None,
            }),
            other => Err(OrderError::NotInitialized(other.event_type())),
        }
    }

    fn apply_event(&mut self, event: &DomainEvent<OrderEvent>) -> Result<(), Self::Error> {
        match event.data() {
            OrderEvent::Created { .. } => return Err(OrderError::AlreadyExists),
            OrderEvent::ItemsUpdated { items, .. } => {
                self.items = items.clone();
            }
            OrderEvent::Confirmed { .. } => {
                self.status = OrderStatus::Confirmed;
            }
            OrderEvent::Shipped {
                tracking_number,
                carrier,
                ..
            } => {
                self.status = OrderStatus::Shipped;
                self.tracking_number = Some(tracking_number.clone());
                self.carrier = Some(carrier.clone());
            }
            OrderEvent::Delivered { .. } => {
                self.status = OrderStatus::Delivered;
            }
            OrderEvent::Cancelled { reason, .. } => {
                self.status = OrderStatus::Cancelled;
                self.cancelled_reason = reason.clone();
            }
        }

        self.version = event.sequence_no();
        self.updated_at = event.created_at();
        Ok(())
    }

    fn handle_initial_command(command: &OrderCommand) -> Result<Vec<OrderEvent>, Self::Error> {
        match command {
            OrderCommand::CreateOrder { customer_id, items } => {
                Self::validate_items(items)?;

                Ok(vec![OrderEvent::Created {
                    customer_id: *customer_id,
                    items: items.clone(),
                }])
            }
            _ => Err(OrderError::NotFound),
        }
    }

    fn handle_command(&self, command: &OrderCommand) -> Result<Vec<OrderEvent>, Self::Error> {
        match command {
            OrderCommand::CreateOrder { .. } => Err(OrderError::AlreadyExists),

            OrderCommand::UpdateItems { items, reason } => {
                match self.status {
                    OrderStatus::Created => {}
                    OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
                    status => return Err(OrderError::InvalidStatusTransition(status)),
                }

                Self::validate_items(items)?;

                Ok(vec![OrderEvent::ItemsUpdated {
                    items: items.clone(),
                    reason: reason.clone(),
                }])
            }

            OrderCommand::ConfirmOrder => {
                match self.status {
                    OrderStatus::Created => {}
                    OrderStatus::Confirmed => return Err(OrderError::AlreadyConfirmed),
                    OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
                    status => return Err(OrderError::InvalidStatusTransition(status)),
                }

                Ok(vec![OrderEvent::Confirmed {
                    confirmed_at: Utc::now(),
                }])
            }

            OrderCommand::ShipOrder {
                tracking_number,
                carrier,
            } => {
                match self.status {
                    OrderStatus::Confirmed => {}
                    OrderStatus::Created => return Err(OrderError::NotConfirmed),
                    OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
                    status => return Err(OrderError::InvalidStatusTransition(status)),
                }

                Ok(vec![OrderEvent::Shipped {
                    tracking_number: tracking_number.clone(),
                    carrier: carrier.clone(),
                    shipped_at: Utc::now(),
                }])
            }

            OrderCommand::DeliverOrder { signature } => {
                if self.status != OrderStatus::Shipped {
                    return Err(OrderError::NotShipped);
                }

                Ok(vec![OrderEvent::Delivered {
                    delivered_at: Utc::now(),
                    signature: signature.clone(),
                }])
            }

            OrderCommand::CancelOrder { reason, cancelled_by } => {
                if self.status.is_terminal() {
                    return Err(match self.status {
                        OrderStatus::Cancelled => OrderError::AlreadyCancelled,
                        status => OrderError::InvalidStatusTransition(status),
                    });
                }

                Ok(vec![OrderEvent::Cancelled {
                    reason: reason.clone(),
                    cancelled_by: *cancelled_by,
                }])
            }
        }
    }

    fn aggregate_id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> i64 {
        self.version
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn created(id: &str) -> OrderAggregate {
        let payloads = OrderAggregate::handle_initial_command(&OrderCommand::CreateOrder {
            customer_id: Uuid::new_v4(),
            items: vec![OrderItem::new(Uuid::new_v4(), 2)],
        })
        .unwrap();
        OrderAggregate::apply_first_event(&DomainEvent::new(id, 1, payloads[0].clone())).unwrap()
    }

    fn apply(aggregate: &mut OrderAggregate, command: OrderCommand) -> Result<(), OrderError> {
        for payload in aggregate.handle_command(&command)? {
            let next = aggregate.version() + 1;
            let event = DomainEvent::new(aggregate.aggregate_id().to_string(), next, payload);
            aggregate.apply_event(&event)?;
        }
        Ok(())
    }

    #[test]
    fn test_create_order_validates_items() {
        let empty = OrderAggregate::handle_initial_command(&OrderCommand::CreateOrder {
            customer_id: Uuid::new_v4(),
            items: vec![],
        });
        assert_eq!(empty, Err(OrderError::EmptyItems));

        let negative = OrderAggregate::handle_initial_command(&OrderCommand::CreateOrder {
            customer_id: Uuid::new_v4(),
            items: vec![OrderItem::new(Uuid::new_v4(), -1)],
        });
        assert_eq!(negative, Err(OrderError::InvalidQuantity(-1)));
    }

    #[test]
    fn test_commands_require_existing_order() {
        assert_eq!(
            OrderAggregate::handle_initial_command(&OrderCommand::ConfirmOrder),
            Err(OrderError::NotFound)
        );
    }

    #[test]
    fn test_first_event_must_be_created() {
        let event = DomainEvent::new("o-1", 1, OrderEvent::Confirmed { confirmed_at: Utc::now() });
        assert_eq!(
            OrderAggregate::apply_first_event(&event),
            Err(OrderError::NotInitialized("order.confirmed"))
        );
    }

    #[test]
    fn test_full_lifecycle() {
        let mut order = created("o-1");
        assert_eq!(order.version(), 1);

        apply(&mut order, OrderCommand::ConfirmOrder).unwrap();
        apply(
            &mut order,
            OrderCommand::ShipOrder {
                tracking_number: "TRACK-1".into(),
                carrier: "UPS".into(),
            },
        )
        .unwrap();
        apply(&mut order, OrderCommand::DeliverOrder { signature: None }).unwrap();

        assert_eq!(order.status, OrderStatus::Delivered);
        assert_eq!(order.tracking_number.as_deref(), Some("TRACK-1"));
        assert_eq!(order.version(), 4);
    }

    #[test]
    fn test_delivered_order_cannot_be_cancelled() {
        let mut order = created("o-1");
        apply(&mut order, OrderCommand::ConfirmOrder).unwrap();
        apply(
            &mut order,
            OrderCommand::ShipOrder {
                tracking_number: "TRACK-1".into(),
                carrier: "UPS".into(),
            },
        )
        .unwrap();
        apply(&mut order, OrderCommand::DeliverOrder { signature: None }).unwrap();

        assert_eq!(
            order.handle_command(&OrderCommand::CancelOrder {
                reason: None,
                cancelled_by: None
            }),
            Err(OrderError::InvalidStatusTransition(OrderStatus::Delivered))
        );
        assert_eq!(order.version(), 4);
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut order = created("o-1");

        assert_eq!(
            apply(&mut order, OrderCommand::DeliverOrder { signature: None }),
            Err(OrderError::NotShipped)
        );
        assert_eq!(
            apply(
                &mut order,
                OrderCommand::ShipOrder {
                    tracking_number: "T".into(),
                    carrier: "C".into()
                }
            ),
            Err(OrderError::NotConfirmed)
        );

        apply(&mut order, OrderCommand::ConfirmOrder).unwrap();
        assert_eq!(apply(&mut order, OrderCommand::ConfirmOrder), Err(OrderError::AlreadyConfirmed));
        assert_eq!(
            apply(
                &mut order,
                OrderCommand::UpdateItems {
                    items: vec![OrderItem::new(Uuid::new_v4(), 1)],
                    reason: None
                }
            ),
            Err(OrderError::InvalidStatusTransition(OrderStatus::Confirmed))
        );
    }

    #[test]
    fn test_cancelled_order_rejects_further_commands() {
        let mut order = created("o-1");
        apply(
            &mut order,
            OrderCommand::CancelOrder {
                reason: Some("changed mind".into()),
                cancelled_by: None,
            },
        )
        .unwrap();

        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.cancelled_reason.as_deref(), Some("changed mind"));
        assert_eq!(apply(&mut order, OrderCommand::ConfirmOrder), Err(OrderError::AlreadyCancelled));
        assert_eq!(
            order.handle_command(&OrderCommand::CancelOrder {
                reason: None,
                cancelled_by: None
            }),
            Err(OrderError::AlreadyCancelled)
        );
    }

    #[test]
    fn test_create_twice_is_rejected() {
        let order = created("o-1");
        let again = order.handle_command(&OrderCommand::CreateOrder {
            customer_id: Uuid::new_v4(),
            items: vec![OrderItem::new(Uuid::new_v4(), 1)],
        });
        assert_eq!(again, Err(OrderError::AlreadyExists));
    }
}
