use crate::{
    config::AppConfig,
    entities::{
        cart, cart_item, cart::CartStatus, product, Cart, CartItem, CartItemModel, CartModel,
        Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog::{CatalogService, ProductSnapshot, DEFAULT_ESG_SCORE},
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Largest quantity a single line item may carry.
pub const MAX_ITEM_QUANTITY: i32 = 50;

/// A cart together with its line items, the shape most read paths want.
#[derive(Debug, Clone, Serialize)]
pub struct CartWithItems {
    #[serde(flatten)]
    pub cart: CartModel,
    pub items: Vec<CartItemModel>,
}

/// Aggregated view for the order review screen.
#[derive(Debug, Clone, Serialize)]
pub struct CartSummary {
    pub cart_id: Uuid,
    pub status: CartStatus,
    pub total_items: i32,
    pub unique_products: usize,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub esg_score: f64,
    pub esg_level: String,
    pub carbon_footprint_kg: f64,
    pub organic_items: i32,
    pub local_items: i32,
    pub recyclable_items: i32,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Cart lifecycle operations for a single shopper.
///
/// Every mutation runs inside a database transaction and ends with a
/// full recomputation of the cart's aggregate columns from its line
/// items, so the aggregates never drift from the rows beneath them.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<CatalogService>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<CatalogService>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            catalog,
            event_sender,
            config,
        }
    }

    /// Returns the shopper's active cart with its items. With a
    /// `store_id` a missing cart is opened on the spot instead of
    /// reported as absent.
    #[instrument(skip(self))]
    pub async fn get_active_cart(
        &self,
        shopper_id: Uuid,
        store_id: Option<Uuid>,
    ) -> Result<CartWithItems, ServiceError> {
        if let Some(cart) = self.find_active(&*self.db, shopper_id).await? {
            return self.with_items(&*self.db, cart).await;
        }

        let store_id =
            store_id.ok_or_else(|| ServiceError::NotFound("No active cart".to_string()))?;
        let cart = self
            .create_cart(&*self.db, shopper_id, store_id, Utc::now())
            .await?;
        self.event_sender
            .send_or_log(Event::CartCreated(cart.id))
            .await;

        // When the create lost a race and adopted the winner, the cart
        // may already carry items.
        self.with_items(&*self.db, cart).await
    }

    /// Adds a product to the shopper's active cart, creating the cart on
    /// first use. Adding a product already in the cart merges quantities
    /// into the existing line.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        shopper_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        store_id: Option<Uuid>,
    ) -> Result<CartWithItems, ServiceError> {
        validate_quantity(quantity)?;
        let snapshot = self.catalog.resolve(product_id).await?;

        let txn = self.db.begin().await?;
        let now = Utc::now();

        let cart = match self.find_active(&txn, shopper_id).await? {
            Some(cart) => {
                if cart.is_expired(now) {
                    return Err(ServiceError::InvalidOperation(
                        "Cart has expired".to_string(),
                    ));
                }
                cart
            }
            None => {
                let store_id = store_id.ok_or_else(|| {
                    ServiceError::ValidationError(
                        "store_id is required to open a new cart".to_string(),
                    )
                })?;
                let created = self.create_cart(&txn, shopper_id, store_id, now).await?;
                self.event_sender
                    .send_or_log(Event::CartCreated(created.id))
                    .await;
                created
            }
        };

        if cart.total_items + quantity > self.config.max_cart_items {
            return Err(ServiceError::ValidationError(format!(
                "Cart is full (limit {} items)",
                self.config.max_cart_items
            )));
        }

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        match existing {
            Some(item) => {
                let merged = item.quantity + quantity;
                validate_quantity(merged)?;
                let mut update: cart_item::ActiveModel = item.into();
                update.quantity = Set(merged);
                apply_line_amounts(&mut update, &snapshot, merged, now);
                update.update(&txn).await?;
            }
            None => {
                let mut item = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                    esg_score: Set(snapshot.esg_score),
                    carbon_footprint_kg: Set(snapshot.carbon_footprint_kg),
                    created_at: Set(now),
                    ..Default::default()
                };
                apply_line_amounts(&mut item, &snapshot, quantity, now);
                item.insert(&txn).await?;
            }
        }

        let cart = self.recompute_totals(&txn, cart.id).await?;
        let result = self.with_items(&txn, cart).await?;
        txn.commit().await?;

        info!(cart_id = %result.cart.id, %product_id, quantity, "added item to cart");
        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: result.cart.id,
                product_id,
            })
            .await;

        Ok(result)
    }

    /// Sets the quantity on an existing line item.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        shopper_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        validate_quantity(quantity)?;

        let txn = self.db.begin().await?;
        let now = Utc::now();
        let (cart, item) = self.find_owned_item(&txn, shopper_id, item_id).await?;

        let snapshot = ProductSnapshot {
            product_id: item.product_id,
            name: String::new(),
            unit_price: item.unit_price,
            unit_discount: per_unit_discount(&item),
            esg_score: item.esg_score,
            carbon_footprint_kg: item.carbon_footprint_kg,
        };

        let delta = quantity - item.quantity;
        if cart.total_items + delta > self.config.max_cart_items {
            return Err(ServiceError::ValidationError(format!(
                "Cart is full (limit {} items)",
                self.config.max_cart_items
            )));
        }

        let mut update: cart_item::ActiveModel = item.into();
        update.quantity = Set(quantity);
        apply_line_amounts(&mut update, &snapshot, quantity, now);
        update.update(&txn).await?;

        let cart = self.recompute_totals(&txn, cart.id).await?;
        let result = self.with_items(&txn, cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemUpdated {
                cart_id: result.cart.id,
                item_id,
            })
            .await;

        Ok(result)
    }

    /// Removes a line item from the active cart.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        shopper_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;
        let (cart, item) = self.find_owned_item(&txn, shopper_id, item_id).await?;

        CartItem::delete_by_id(item.id).exec(&txn).await?;

        let cart = self.recompute_totals(&txn, cart.id).await?;
        let result = self.with_items(&txn, cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: result.cart.id,
                item_id,
            })
            .await;

        Ok(result)
    }

    /// Empties the active cart. Clearing an already empty cart is a no-op.
    #[instrument(skip(self))]
    pub async fn clear(&self, shopper_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = self
            .find_active(&txn, shopper_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("No active cart".to_string()))?;

        if !cart.is_empty() {
            CartItem::delete_many()
                .filter(cart_item::Column::CartId.eq(cart.id))
                .exec(&txn)
                .await?;
        }

        let cart = self.recompute_totals(&txn, cart.id).await?;
        let result = self.with_items(&txn, cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared(result.cart.id))
            .await;

        Ok(result)
    }

    /// Freezes the active cart for payment, moving it to `checkout`.
    ///
    /// The flip is a conditional update on the `active` status so two
    /// concurrent checkouts cannot both succeed.
    #[instrument(skip(self))]
    pub async fn start_checkout(&self, shopper_id: Uuid) -> Result<CartModel, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();
        let cart = self
            .find_active(&txn, shopper_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("No active cart".to_string()))?;

        let cart = self.freeze_for_checkout(&txn, &cart, now).await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, "cart entered checkout");
        self.event_sender
            .send_or_log(Event::CheckoutStarted(cart.id))
            .await;

        Ok(cart)
    }

    /// Conditional `active → checkout` flip, shared with the payment
    /// path which freezes the cart inside its own transaction.
    pub(crate) async fn freeze_for_checkout<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart: &CartModel,
        now: DateTime<Utc>,
    ) -> Result<CartModel, ServiceError> {
        if cart.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".to_string()));
        }
        if cart.is_expired(now) {
            return Err(ServiceError::InvalidOperation(
                "Cart has expired".to_string(),
            ));
        }

        let expires_at = cart
            .expires_at
            .unwrap_or(now + Duration::hours(self.config.cart_expiry_hours));

        let flipped = Cart::update_many()
            .set(cart::ActiveModel {
                status: Set(CartStatus::Checkout),
                expires_at: Set(Some(expires_at)),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(cart::Column::Id.eq(cart.id))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .exec(conn)
            .await?;

        if flipped.rows_affected == 0 {
            return Err(ServiceError::InvalidOperation(
                "Cart is no longer active".to_string(),
            ));
        }

        Cart::find_by_id(cart.id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::InternalError("Cart vanished mid-checkout".to_string()))
    }

    /// Builds the order review summary for the active cart.
    #[instrument(skip(self))]
    pub async fn summary(&self, shopper_id: Uuid) -> Result<CartSummary, ServiceError> {
        let cart = self
            .find_active(&*self.db, shopper_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("No active cart".to_string()))?;

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&*self.db)
            .await?;

        let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        let products = if product_ids.is_empty() {
            Vec::new()
        } else {
            Product::find()
                .filter(product::Column::Id.is_in(product_ids))
                .all(&*self.db)
                .await?
        };

        let count_where = |pred: fn(&product::Model) -> bool| -> i32 {
            items
                .iter()
                .filter(|item| {
                    products
                        .iter()
                        .any(|p| p.id == item.product_id && pred(p))
                })
                .map(|item| item.quantity)
                .sum()
        };

        Ok(CartSummary {
            cart_id: cart.id,
            status: cart.status,
            total_items: cart.total_items,
            unique_products: items.len(),
            total_amount: cart.total_amount,
            discount_amount: cart.discount_amount,
            final_amount: cart.final_amount,
            esg_score: cart.esg_score,
            esg_level: cart.esg_level.clone(),
            carbon_footprint_kg: cart.carbon_footprint_kg,
            organic_items: count_where(|p| p.is_organic),
            local_items: count_where(|p| p.is_local),
            recyclable_items: count_where(|p| p.is_recyclable),
            expires_at: cart.expires_at,
        })
    }

    /// The shopper's cart that payment can act on, whether still open or
    /// already frozen for checkout.
    pub(crate) async fn find_current<C: ConnectionTrait>(
        &self,
        conn: &C,
        shopper_id: Uuid,
    ) -> Result<Option<CartModel>, ServiceError> {
        Ok(Cart::find()
            .filter(cart::Column::ShopperId.eq(shopper_id))
            .filter(cart::Column::Status.is_in([CartStatus::Active, CartStatus::Checkout]))
            .one(conn)
            .await?)
    }

    pub(crate) async fn find_active<C: ConnectionTrait>(
        &self,
        conn: &C,
        shopper_id: Uuid,
    ) -> Result<Option<CartModel>, ServiceError> {
        Ok(Cart::find()
            .filter(cart::Column::ShopperId.eq(shopper_id))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .one(conn)
            .await?)
    }

    async fn create_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        shopper_id: Uuid,
        store_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CartModel, ServiceError> {
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            shopper_id: Set(shopper_id),
            store_id: Set(store_id),
            status: Set(CartStatus::Active),
            total_items: Set(0),
            total_amount: Set(Decimal::ZERO),
            discount_amount: Set(Decimal::ZERO),
            final_amount: Set(Decimal::ZERO),
            esg_score: Set(DEFAULT_ESG_SCORE),
            esg_level: Set(esg_level_for(DEFAULT_ESG_SCORE).to_string()),
            carbon_footprint_kg: Set(0.0),
            expires_at: Set(Some(now + Duration::hours(self.config.cart_expiry_hours))),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // The partial unique index on (shopper_id) WHERE active means a
        // concurrent open may win the insert; adopt that cart instead.
        match cart.insert(conn).await {
            Ok(model) => Ok(model),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => self
                .find_active(conn, shopper_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::Conflict("An active cart already exists".to_string())
                }),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads an item and proves it belongs to the shopper's active cart.
    async fn find_owned_item<C: ConnectionTrait>(
        &self,
        conn: &C,
        shopper_id: Uuid,
        item_id: Uuid,
    ) -> Result<(CartModel, CartItemModel), ServiceError> {
        let not_found =
            || ServiceError::NotFound("Item not found in your active cart".to_string());

        let item = CartItem::find_by_id(item_id)
            .one(conn)
            .await?
            .ok_or_else(not_found)?;

        let cart = Cart::find_by_id(item.cart_id)
            .one(conn)
            .await?
            .filter(|c| c.shopper_id == shopper_id && c.status == CartStatus::Active)
            .ok_or_else(not_found)?;

        Ok((cart, item))
    }

    /// Recomputes every aggregate column on the cart from its line items
    /// and persists the result.
    async fn recompute_totals<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(conn)
            .await?;

        let total_items: i32 = items.iter().map(|i| i.quantity).sum();
        let total_amount: Decimal = items
            .iter()
            .map(|i| i.unit_price * Decimal::from(i.quantity))
            .sum();
        let discount_amount: Decimal = items.iter().map(|i| i.discount_amount).sum();
        let final_amount = (total_amount - discount_amount).max(Decimal::ZERO);

        let esg_score = if total_items == 0 {
            DEFAULT_ESG_SCORE
        } else {
            let weighted: f64 = items
                .iter()
                .map(|i| i.esg_score * f64::from(i.quantity))
                .sum();
            weighted / f64::from(total_items)
        };
        let carbon: f64 = items
            .iter()
            .map(|i| i.carbon_footprint_kg * f64::from(i.quantity))
            .sum();

        let mut update: cart::ActiveModel = cart.into();
        update.total_items = Set(total_items);
        update.total_amount = Set(total_amount);
        update.discount_amount = Set(discount_amount);
        update.final_amount = Set(final_amount);
        update.esg_score = Set(esg_score);
        update.esg_level = Set(esg_level_for(esg_score).to_string());
        update.carbon_footprint_kg = Set(carbon);
        update.updated_at = Set(Utc::now());

        Ok(update.update(conn).await?)
    }

    async fn with_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart: CartModel,
    ) -> Result<CartWithItems, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(conn)
            .await?;
        Ok(CartWithItems { cart, items })
    }
}

fn validate_quantity(quantity: i32) -> Result<(), ServiceError> {
    if !(1..=MAX_ITEM_QUANTITY).contains(&quantity) {
        return Err(ServiceError::ValidationError(format!(
            "Quantity must be between 1 and {}",
            MAX_ITEM_QUANTITY
        )));
    }
    Ok(())
}

fn per_unit_discount(item: &CartItemModel) -> Decimal {
    if item.quantity > 0 {
        item.discount_amount / Decimal::from(item.quantity)
    } else {
        Decimal::ZERO
    }
}

fn apply_line_amounts(
    line: &mut cart_item::ActiveModel,
    snapshot: &ProductSnapshot,
    quantity: i32,
    now: DateTime<Utc>,
) {
    let qty = Decimal::from(quantity);
    let discount = snapshot.unit_discount * qty;
    line.unit_price = Set(snapshot.unit_price);
    line.discount_amount = Set(discount);
    line.line_total = Set(snapshot.unit_price * qty - discount);
    line.updated_at = Set(now);
}

/// Maps a 0-100 sustainability score onto its display band.
pub fn esg_level_for(score: f64) -> &'static str {
    if score >= 80.0 {
        "excellent"
    } else if score >= 60.0 {
        "good"
    } else if score >= 40.0 {
        "moderate"
    } else {
        "low"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_bounds() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(50).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(51).is_err());
        assert!(validate_quantity(-3).is_err());
    }

    #[test]
    fn esg_bands() {
        assert_eq!(esg_level_for(92.0), "excellent");
        assert_eq!(esg_level_for(80.0), "excellent");
        assert_eq!(esg_level_for(60.0), "good");
        assert_eq!(esg_level_for(59.9), "moderate");
        assert_eq!(esg_level_for(40.0), "moderate");
        assert_eq!(esg_level_for(12.0), "low");
    }
}
