//! Lifecycle events.
//!
//! Services emit events over an mpsc channel; a background processor turns
//! them into transactional emails. Event delivery is fire-and-forget by
//! design: a full channel or a dead processor never blocks or fails the
//! financial state transition that produced the event.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::notifications::{Email, EmailDispatcher};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        customer_email: String,
    },
    OrderConfirmed {
        order_id: Uuid,
        order_number: String,
        customer_email: String,
        total: Decimal,
        currency: String,
    },
    OrderCancelled {
        order_id: Uuid,
        order_number: String,
        customer_email: String,
    },
    OrderRefunded {
        order_id: Uuid,
        order_number: String,
        customer_email: String,
        total: Decimal,
        currency: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        order_number: String,
        customer_email: String,
        old_status: String,
        new_status: String,
    },
    PaymentFailed {
        order_id: Uuid,
        order_number: String,
        reference: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event; failures are logged and swallowed.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!(error = %e, "event channel closed, dropping event");
        }
    }
}

/// Background processor: consumes lifecycle events and enqueues the matching
/// transactional emails.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, dispatcher: EmailDispatcher) {
    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated {
                order_id,
                order_number,
                ..
            } => {
                debug!(%order_id, %order_number, "order created");
            }
            Event::OrderConfirmed {
                order_id,
                order_number,
                customer_email,
                total,
                currency,
            } => {
                info!(%order_id, %order_number, "order confirmed");
                dispatcher
                    .enqueue(Email {
                        to: customer_email.clone(),
                        subject: format!("Order {order_number} confirmed"),
                        body: format!(
                            "Your order {order_number} has been confirmed and is being prepared."
                        ),
                    })
                    .await;
                dispatcher
                    .enqueue(Email {
                        to: customer_email,
                        subject: format!("Payment received for order {order_number}"),
                        body: format!(
                            "We received your payment of {total} {currency} for order {order_number}."
                        ),
                    })
                    .await;
            }
            Event::OrderCancelled {
                order_id,
                order_number,
                customer_email,
            } => {
                info!(%order_id, %order_number, "order cancelled");
                dispatcher
                    .enqueue(Email {
                        to: customer_email,
                        subject: format!("Order {order_number} cancelled"),
                        body: format!("Your order {order_number} has been cancelled."),
                    })
                    .await;
            }
            Event::OrderRefunded {
                order_id,
                order_number,
                customer_email,
                total,
                currency,
            } => {
                info!(%order_id, %order_number, "order refunded");
                dispatcher
                    .enqueue(Email {
                        to: customer_email,
                        subject: format!("Refund issued for order {order_number}"),
                        body: format!(
                            "A refund of {total} {currency} has been issued for order {order_number}."
                        ),
                    })
                    .await;
            }
            Event::OrderStatusChanged {
                order_id,
                order_number,
                customer_email,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
                dispatcher
                    .enqueue(Email {
                        to: customer_email,
                        subject: format!("Order {order_number} update"),
                        body: format!("Your order {order_number} is now {new_status}."),
                    })
                    .await;
            }
            Event::PaymentFailed {
                order_id,
                order_number,
                reference,
            } => {
                warn!(%order_id, %order_number, %reference, "payment failed");
            }
        }
    }
}
