use crate::{
    entities::{cart, shopper, store, transaction::Model as TransactionModel, Cart, Shopper, Store},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};
use tracing::{info, warn};

/// Credits the outcome of an approved transaction to the parties around
/// it: the shopper's purchase counters and GST balance, the store's
/// revenue aggregates, and the cart's transition to `completed`.
///
/// Always runs on the caller's connection so the credits commit (or roll
/// back) together with the status flip that triggered them.
#[derive(Debug, Clone, Default)]
pub struct RewardService;

impl RewardService {
    pub fn new() -> Self {
        Self
    }

    pub async fn settle<C: ConnectionTrait>(
        &self,
        conn: &C,
        transaction: &TransactionModel,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();

        let shopper = Shopper::find_by_id(transaction.shopper_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Shopper {} not found", transaction.shopper_id))
            })?;

        let mut shopper_update: shopper::ActiveModel = shopper.clone().into();
        shopper_update.purchases_count = Set(shopper.purchases_count + 1);
        shopper_update.total_spent = Set(shopper.total_spent + transaction.final_amount);
        shopper_update.loyalty_points =
            Set(shopper.loyalty_points + transaction.gst_tokens_earned);
        shopper_update.updated_at = Set(now);
        shopper_update.update(conn).await?;

        let store = Store::find_by_id(transaction.store_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Store {} not found", transaction.store_id))
            })?;

        let mut store_update: store::ActiveModel = store.clone().into();
        store_update.transactions_count = Set(store.transactions_count + 1);
        store_update.total_revenue = Set(store.total_revenue + transaction.final_amount);
        store_update.updated_at = Set(now);
        store_update.update(conn).await?;

        // Conditional flip so a cart that was swept to abandoned in the
        // meantime is left alone rather than resurrected.
        let completed = Cart::update_many()
            .set(cart::ActiveModel {
                status: Set(cart::CartStatus::Completed),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(cart::Column::Id.eq(transaction.cart_id))
            .filter(cart::Column::Status.eq(cart::CartStatus::Checkout))
            .exec(conn)
            .await?;

        if completed.rows_affected == 0 {
            warn!(
                cart_id = %transaction.cart_id,
                "cart was not in checkout at settlement, leaving its status untouched"
            );
        }

        info!(
            shopper_id = %transaction.shopper_id,
            store_id = %transaction.store_id,
            amount = %transaction.final_amount,
            gst_tokens = %transaction.gst_tokens_earned,
            "settled rewards"
        );

        Ok(())
    }
}
