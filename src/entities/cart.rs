use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shopping cart entity
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "carts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub shopper_id: Uuid,
    pub store_id: Uuid,
    pub status: CartStatus,
    pub total_items: i32,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub final_amount: Decimal,
    pub esg_score: f64,
    pub esg_level: String,
    pub carbon_footprint_kg: f64,
    #[sea_orm(nullable)]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
    #[sea_orm(has_many = "super::transaction::Entity")]
    Transactions,
    #[sea_orm(
        belongs_to = "super::shopper::Entity",
        from = "Column::ShopperId",
        to = "super::shopper::Column::Id"
    )]
    Shopper,
    #[sea_orm(
        belongs_to = "super::store::Entity",
        from = "Column::StoreId",
        to = "super::store::Column::Id"
    )]
    Store,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl Related<super::transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl Related<super::shopper::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Shopper.def()
    }
}

impl Related<super::store::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Store.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether the cart has passed its expiry deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now > at).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.total_items == 0
    }

    /// A cart can enter checkout only while active, non-empty and unexpired.
    pub fn can_checkout(&self, now: DateTime<Utc>) -> bool {
        self.status == CartStatus::Active && !self.is_empty() && !self.is_expired(now)
    }
}

/// Cart lifecycle states.
///
/// `active → checkout → completed` on settlement; `active`/`checkout`
/// reach `abandoned` through the expiry sweep. Terminal states accept
/// no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum CartStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "checkout")]
    Checkout,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "abandoned")]
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn cart(status: CartStatus, total_items: i32, expires_at: Option<DateTime<Utc>>) -> Model {
        Model {
            id: Uuid::new_v4(),
            shopper_id: Uuid::new_v4(),
            store_id: Uuid::new_v4(),
            status,
            total_items,
            total_amount: dec!(10.00),
            discount_amount: Decimal::ZERO,
            final_amount: dec!(10.00),
            esg_score: 50.0,
            esg_level: "moderate".to_string(),
            carbon_footprint_kg: 0.0,
            expires_at,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn cart_without_deadline_never_expires() {
        let now = Utc::now();
        assert!(!cart(CartStatus::Active, 1, None).is_expired(now));
    }

    #[test]
    fn cart_expiry_respects_deadline() {
        let now = Utc::now();
        let fresh = cart(CartStatus::Active, 1, Some(now + Duration::hours(1)));
        let stale = cart(CartStatus::Active, 1, Some(now - Duration::hours(1)));
        assert!(!fresh.is_expired(now));
        assert!(stale.is_expired(now));
    }

    #[test]
    fn checkout_requires_active_non_empty_unexpired() {
        let now = Utc::now();
        assert!(cart(CartStatus::Active, 2, None).can_checkout(now));
        assert!(!cart(CartStatus::Active, 0, None).can_checkout(now));
        assert!(!cart(CartStatus::Checkout, 2, None).can_checkout(now));
        let expired = cart(CartStatus::Active, 2, Some(now - Duration::minutes(1)));
        assert!(!expired.can_checkout(now));
    }
}
