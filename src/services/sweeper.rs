use crate::{
    config::AppConfig,
    entities::{cart, cart::CartStatus, transaction, transaction::TransactionStatus, Cart, Transaction},
    errors::ServiceError,
    events::{Event, EventSender},
    services::payments::TransactionService,
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub carts_abandoned: u64,
    pub transactions_expired: u64,
}

/// Background reaper for deadlines nothing else enforces eagerly.
///
/// Abandons carts past their expiry and fails pending transactions whose
/// PIX window has closed. Both writes are conditional on the current
/// status, so a cart completed or a payment settled between reads is
/// never clobbered.
#[derive(Clone)]
pub struct ExpirySweeper {
    db: Arc<DatabaseConnection>,
    payments: Arc<TransactionService>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl ExpirySweeper {
    pub fn new(
        db: Arc<DatabaseConnection>,
        payments: Arc<TransactionService>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            payments,
            event_sender,
            config,
        }
    }

    /// Runs sweeps forever at the configured interval. Intended to be
    /// spawned once at startup.
    pub async fn run(self) {
        let period = std::time::Duration::from_secs(self.config.sweep_interval_secs);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(interval_secs = self.config.sweep_interval_secs, "expiry sweeper started");
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once(Utc::now()).await {
                error!(error = %e, "expiry sweep failed");
            }
        }
    }

    /// One full sweep pass at the given instant.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, ServiceError> {
        let carts_abandoned = self.abandon_expired_carts(now).await?;
        let transactions_expired = self.expire_stale_transactions(now).await?;

        if carts_abandoned > 0 {
            self.event_sender
                .send_or_log(Event::CartsSwept {
                    abandoned: carts_abandoned,
                })
                .await;
        }

        Ok(SweepReport {
            carts_abandoned,
            transactions_expired,
        })
    }

    async fn abandon_expired_carts(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let abandon = |filter_applied: sea_orm::UpdateMany<Cart>| {
            filter_applied.set(cart::ActiveModel {
                status: Set(CartStatus::Abandoned),
                updated_at: Set(now),
                ..Default::default()
            })
        };

        // Carts with an explicit deadline, whether open or frozen.
        let with_deadline = abandon(
            Cart::update_many()
                .filter(
                    cart::Column::Status.is_in([CartStatus::Active, CartStatus::Checkout]),
                )
                .filter(cart::Column::ExpiresAt.is_not_null())
                .filter(cart::Column::ExpiresAt.lt(now)),
        )
        .exec(&*self.db)
        .await?;

        // Legacy rows without a deadline age out from creation time.
        let cutoff = now - Duration::hours(self.config.cart_expiry_hours);
        let without_deadline = abandon(
            Cart::update_many()
                .filter(cart::Column::Status.eq(CartStatus::Active))
                .filter(cart::Column::ExpiresAt.is_null())
                .filter(cart::Column::CreatedAt.lt(cutoff)),
        )
        .exec(&*self.db)
        .await?;

        Ok(with_deadline.rows_affected + without_deadline.rows_affected)
    }

    /// Routes each stale pending transaction through the payment
    /// service so failure events and reasons stay consistent with the
    /// request paths.
    async fn expire_stale_transactions(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let stale: Vec<Uuid> = Transaction::find()
            .filter(transaction::Column::Status.eq(TransactionStatus::Pending))
            .filter(transaction::Column::PixExpiration.lt(now))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();

        let mut expired = 0;
        for transaction_id in stale {
            match self
                .payments
                .mark_as_failed(transaction_id, "PIX charge expired")
                .await
            {
                Ok(_) => expired += 1,
                // Settled by a racing path after our read.
                Err(ServiceError::InvalidOperation(_)) => {}
                Err(e) => {
                    warn!(%transaction_id, error = %e, "failed to expire transaction");
                }
            }
        }

        Ok(expired)
    }
}
