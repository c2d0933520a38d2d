use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Handle for publishing domain events onto the in-process channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing channel failures to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event; a full or closed channel is logged and otherwise
    /// ignored. Event delivery is best-effort and never blocks a
    /// request path outcome.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("event dropped: {}", e);
        }
    }
}

/// Domain events published by the checkout pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded { cart_id: Uuid, product_id: Uuid },
    CartItemUpdated { cart_id: Uuid, item_id: Uuid },
    CartItemRemoved { cart_id: Uuid, item_id: Uuid },
    CartCleared(Uuid),
    CheckoutStarted(Uuid),
    CartCompleted(Uuid),
    CartsSwept { abandoned: u64 },

    // Payment events
    TransactionCreated { transaction_id: Uuid, cart_id: Uuid },
    PaymentApproved { transaction_id: Uuid, payment_id: String },
    PaymentFailed { transaction_id: Uuid, reason: String },
    RewardsSettled { shopper_id: Uuid, gst_tokens: Decimal },
}

/// Drains the event channel, logging each event. Integrations (push
/// notifications, analytics export) hook in here.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::PaymentApproved {
                transaction_id,
                payment_id,
            } => {
                info!(%transaction_id, %payment_id, "payment approved");
            }
            Event::PaymentFailed {
                transaction_id,
                reason,
            } => {
                info!(%transaction_id, %reason, "payment failed");
            }
            Event::RewardsSettled {
                shopper_id,
                gst_tokens,
            } => {
                info!(%shopper_id, %gst_tokens, "rewards settled");
            }
            Event::CartsSwept { abandoned } if *abandoned > 0 => {
                info!(abandoned, "expiry sweep abandoned carts");
            }
            other => {
                info!(event = ?other, "event");
            }
        }
    }

    info!("event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        sender
            .send(Event::CartCreated(Uuid::new_v4()))
            .await
            .expect("send should succeed");

        assert!(matches!(rx.recv().await, Some(Event::CartCreated(_))));
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        // Must not panic or error out.
        sender.send_or_log(Event::CartCleared(Uuid::new_v4())).await;
    }
}
