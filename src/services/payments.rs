use crate::{
    config::AppConfig,
    entities::{
        cart::CartStatus,
        transaction,
        transaction::TransactionStatus,
        Cart, Transaction, TransactionModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        carts::CartService,
        payment_gateway::{ChargeState, PaymentGateway, PixCharge, PollOutcome},
        rewards::RewardService,
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// How a gateway notification was applied to the referenced transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationDisposition {
    Applied,
    AlreadyProcessed,
    Ignored,
}

/// Payment lifecycle orchestration: issuing PIX charges against frozen
/// carts and driving each transaction to a terminal state exactly once.
///
/// Every status flip out of `pending` is a conditional update filtered
/// on the current status, so concurrent confirmations, webhooks, polls
/// and sweeps cannot double-settle.
#[derive(Clone)]
pub struct TransactionService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    carts: Arc<CartService>,
    rewards: RewardService,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl TransactionService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        carts: Arc<CartService>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            gateway,
            carts,
            rewards: RewardService::new(),
            event_sender,
            config,
        }
    }

    /// Issues a PIX charge, against either an explicitly named cart or
    /// the shopper's current one.
    ///
    /// An active cart is frozen to `checkout` first; a cart already in
    /// checkout may retry payment as long as no pending transaction
    /// exists for it.
    #[instrument(skip(self))]
    pub async fn create_pix(
        &self,
        shopper_id: Uuid,
        cart_id: Option<Uuid>,
    ) -> Result<TransactionModel, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let cart = match cart_id {
            Some(cart_id) => Cart::find_by_id(cart_id)
                .one(&txn)
                .await?
                .filter(|c| {
                    c.shopper_id == shopper_id
                        && matches!(c.status, CartStatus::Active | CartStatus::Checkout)
                })
                .ok_or_else(|| {
                    ServiceError::NotFound("Cart not found or not active".to_string())
                })?,
            None => self
                .carts
                .find_current(&txn, shopper_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound("No active cart".to_string()))?,
        };

        let pending = Transaction::find()
            .filter(transaction::Column::CartId.eq(cart.id))
            .filter(transaction::Column::Status.eq(TransactionStatus::Pending))
            .count(&txn)
            .await?;
        if pending > 0 {
            return Err(ServiceError::Conflict(
                "A pending transaction already exists for this cart".to_string(),
            ));
        }

        let cart = if cart.status == CartStatus::Active {
            self.carts.freeze_for_checkout(&txn, &cart, now).await?
        } else {
            if cart.is_empty() {
                return Err(ServiceError::InvalidOperation("Cart is empty".to_string()));
            }
            if cart.is_expired(now) {
                return Err(ServiceError::InvalidOperation(
                    "Cart has expired".to_string(),
                ));
            }
            cart
        };

        let transaction_id = Uuid::new_v4();
        let charge = self
            .create_charge_with_retry(cart.final_amount, transaction_id)
            .await?;

        let gst_tokens = self.gst_tokens_for(cart.final_amount)?;
        let invoice_number = format!(
            "NF-{}-{}",
            now.format("%Y%m%d"),
            &Uuid::new_v4().simple().to_string().to_uppercase()[..8]
        );

        let pending_charge = transaction::ActiveModel {
            id: Set(transaction_id),
            cart_id: Set(cart.id),
            shopper_id: Set(cart.shopper_id),
            store_id: Set(cart.store_id),
            amount: Set(cart.total_amount),
            final_amount: Set(cart.final_amount),
            payment_method: Set("pix".to_string()),
            payment_gateway: Set("simulated".to_string()),
            status: Set(TransactionStatus::Pending),
            payment_id: Set(charge.payment_id.clone()),
            pix_code: Set(charge.pix_code.clone()),
            pix_qr_code: Set(charge.qr_code.clone()),
            pix_expiration: Set(charge.expires_at),
            invoice_number: Set(invoice_number),
            esg_score: Set(cart.esg_score),
            gst_tokens_earned: Set(gst_tokens),
            failure_reason: Set(None),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // The pending count above is only a fast path; the partial
        // unique index on (cart_id) WHERE pending is what holds under
        // concurrent creates, so its violation maps to the same 409.
        let model = match pending_charge.insert(&txn).await {
            Ok(model) => model,
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                return Err(ServiceError::Conflict(
                    "A pending transaction already exists for this cart".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        txn.commit().await?;

        info!(
            transaction_id = %model.id,
            cart_id = %model.cart_id,
            amount = %model.final_amount,
            "created pix transaction"
        );
        self.event_sender
            .send_or_log(Event::CheckoutStarted(model.cart_id))
            .await;
        self.event_sender
            .send_or_log(Event::TransactionCreated {
                transaction_id: model.id,
                cart_id: model.cart_id,
            })
            .await;

        Ok(model)
    }

    /// Approves a pending transaction and settles its rewards, all in
    /// one database transaction. Safe to call from any number of racing
    /// paths; exactly one wins, the rest get `InvalidOperation`.
    #[instrument(skip(self, evidence))]
    pub async fn mark_as_paid(
        &self,
        transaction_id: Uuid,
        evidence: serde_json::Value,
    ) -> Result<TransactionModel, ServiceError> {
        let now = Utc::now();

        let model = Transaction::find_by_id(transaction_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Transaction not found".to_string()))?;

        if !model.is_pending() {
            return Err(ServiceError::InvalidOperation(format!(
                "Payment already {}",
                status_label(model.status)
            )));
        }

        if model.is_pix_expired(now) {
            // Expired charges are failed rather than approved, then the
            // caller is told the window has closed. Losing the rejection
            // race to another path is fine; anything else is logged.
            match self
                .fail_pending(transaction_id, TransactionStatus::Rejected, "PIX charge expired")
                .await
            {
                Ok(_) | Err(ServiceError::InvalidOperation(_)) => {}
                Err(e) => warn!(%transaction_id, error = %e, "could not reject expired charge"),
            }
            return Err(ServiceError::InvalidOperation(
                "PIX charge has expired".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let flipped = Transaction::update_many()
            .set(transaction::ActiveModel {
                status: Set(TransactionStatus::Approved),
                paid_at: Set(Some(now)),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(transaction::Column::Id.eq(transaction_id))
            .filter(transaction::Column::Status.eq(TransactionStatus::Pending))
            .exec(&txn)
            .await?;

        if flipped.rows_affected == 0 {
            return Err(ServiceError::InvalidOperation(
                "Payment already processed".to_string(),
            ));
        }

        let mut approved = model;
        approved.status = TransactionStatus::Approved;
        approved.paid_at = Some(now);
        approved.updated_at = now;

        self.rewards.settle(&txn, &approved).await?;
        txn.commit().await?;

        info!(
            %transaction_id,
            payment_id = %approved.payment_id,
            %evidence,
            "payment approved"
        );
        self.event_sender
            .send_or_log(Event::PaymentApproved {
                transaction_id,
                payment_id: approved.payment_id.clone(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::RewardsSettled {
                shopper_id: approved.shopper_id,
                gst_tokens: approved.gst_tokens_earned,
            })
            .await;
        self.event_sender
            .send_or_log(Event::CartCompleted(approved.cart_id))
            .await;

        Ok(approved)
    }

    /// Moves a pending transaction to `rejected` with a reason.
    #[instrument(skip(self))]
    pub async fn mark_as_failed(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<TransactionModel, ServiceError> {
        self.fail_pending(transaction_id, TransactionStatus::Rejected, reason)
            .await
    }

    /// Shopper-scoped manual confirmation, used when the payer reports
    /// the transfer out of band.
    #[instrument(skip(self))]
    pub async fn confirm(
        &self,
        shopper_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<TransactionModel, ServiceError> {
        self.find_owned(shopper_id, transaction_id).await?;
        self.mark_as_paid(
            transaction_id,
            json!({ "source": "manual_confirmation", "confirmed_at": Utc::now().to_rfc3339() }),
        )
        .await
    }

    /// Returns the current state of a transaction, polling the gateway
    /// first when it is still pending. The poll may approve or expire
    /// the charge as a side effect.
    #[instrument(skip(self))]
    pub async fn get_status(
        &self,
        shopper_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<TransactionModel, ServiceError> {
        let model = self.find_owned(shopper_id, transaction_id).await?;
        if !model.is_pending() {
            return Ok(model);
        }

        let now = Utc::now();
        let charge = ChargeState {
            payment_id: model.payment_id.clone(),
            created_at: model.created_at,
            pix_expiration: model.pix_expiration,
        };

        match self.gateway.poll(&charge, now).await? {
            PollOutcome::StillPending => Ok(model),
            PollOutcome::Approved { evidence } => {
                match self.mark_as_paid(transaction_id, evidence).await {
                    Ok(approved) => Ok(approved),
                    // Another path settled it between our read and the
                    // flip; report whatever state won.
                    Err(ServiceError::InvalidOperation(_)) => {
                        self.find_owned(shopper_id, transaction_id).await
                    }
                    Err(e) => Err(e),
                }
            }
            PollOutcome::Expired => {
                match self
                    .fail_pending(transaction_id, TransactionStatus::Rejected, "PIX charge expired")
                    .await
                {
                    Ok(failed) => Ok(failed),
                    Err(ServiceError::InvalidOperation(_)) => {
                        self.find_owned(shopper_id, transaction_id).await
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// The shopper's transactions, newest first.
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        shopper_id: Uuid,
        status: Option<TransactionStatus>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<TransactionModel>, ServiceError> {
        let mut query = Transaction::find()
            .filter(transaction::Column::ShopperId.eq(shopper_id))
            .order_by_desc(transaction::Column::CreatedAt);

        if let Some(status) = status {
            query = query.filter(transaction::Column::Status.eq(status));
        }

        Ok(query.limit(limit).offset(offset).all(&*self.db).await?)
    }

    /// Applies a gateway webhook notification addressed by gateway
    /// payment id. Unknown ids and repeated notifications are absorbed
    /// rather than errored, since gateways redeliver.
    #[instrument(skip(self))]
    pub async fn handle_gateway_notification(
        &self,
        payment_id: &str,
        status: &str,
    ) -> Result<NotificationDisposition, ServiceError> {
        let model = Transaction::find()
            .filter(transaction::Column::PaymentId.eq(payment_id))
            .one(&*self.db)
            .await?;

        let Some(model) = model else {
            warn!(payment_id, "webhook for unknown payment id ignored");
            return Ok(NotificationDisposition::Ignored);
        };

        let result = match status {
            "approved" => {
                self.mark_as_paid(model.id, json!({ "source": "webhook" }))
                    .await
                    .map(|_| ())
            }
            "cancelled" => self
                .fail_pending(model.id, TransactionStatus::Cancelled, "Cancelled by gateway")
                .await
                .map(|_| ()),
            "rejected" => self
                .fail_pending(model.id, TransactionStatus::Rejected, "Rejected by gateway")
                .await
                .map(|_| ()),
            other => {
                warn!(payment_id, status = other, "webhook with unknown status ignored");
                return Ok(NotificationDisposition::Ignored);
            }
        };

        match result {
            Ok(()) => Ok(NotificationDisposition::Applied),
            Err(ServiceError::InvalidOperation(_)) => {
                Ok(NotificationDisposition::AlreadyProcessed)
            }
            Err(e) => Err(e),
        }
    }

    async fn find_owned(
        &self,
        shopper_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<TransactionModel, ServiceError> {
        Transaction::find_by_id(transaction_id)
            .one(&*self.db)
            .await?
            .filter(|t| t.shopper_id == shopper_id)
            .ok_or_else(|| ServiceError::NotFound("Transaction not found".to_string()))
    }

    async fn fail_pending(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
        reason: &str,
    ) -> Result<TransactionModel, ServiceError> {
        let now = Utc::now();

        let flipped = Transaction::update_many()
            .set(transaction::ActiveModel {
                status: Set(status),
                failure_reason: Set(Some(reason.to_string())),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(transaction::Column::Id.eq(transaction_id))
            .filter(transaction::Column::Status.eq(TransactionStatus::Pending))
            .exec(&*self.db)
            .await?;

        if flipped.rows_affected == 0 {
            return Err(ServiceError::InvalidOperation(
                "Payment already processed".to_string(),
            ));
        }

        info!(%transaction_id, reason, "payment failed");
        self.event_sender
            .send_or_log(Event::PaymentFailed {
                transaction_id,
                reason: reason.to_string(),
            })
            .await;

        Transaction::find_by_id(transaction_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Transaction not found".to_string()))
    }

    async fn create_charge_with_retry(
        &self,
        amount: Decimal,
        reference: Uuid,
    ) -> Result<PixCharge, ServiceError> {
        match self.gateway.create_charge(amount, reference).await {
            Err(ServiceError::ExternalServiceError(first)) => {
                warn!(error = %first, "charge creation failed, retrying once");
                self.gateway.create_charge(amount, reference).await
            }
            other => other,
        }
    }

    fn gst_tokens_for(&self, final_amount: Decimal) -> Result<Decimal, ServiceError> {
        let rate = Decimal::try_from(self.config.gst_token_rate).map_err(|e| {
            ServiceError::InternalError(format!("invalid gst_token_rate: {}", e))
        })?;
        Ok((final_amount * rate).round_dp(2))
    }
}

fn status_label(status: TransactionStatus) -> &'static str {
    match status {
        TransactionStatus::Pending => "pending",
        TransactionStatus::Approved => "approved",
        TransactionStatus::Rejected => "rejected",
        TransactionStatus::Cancelled => "cancelled",
    }
}
