use crate::{
    entities::{product, Product},
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Fallback sustainability rating for products without one.
pub const DEFAULT_ESG_SCORE: f64 = 50.0;

/// Read-only view of a product at the moment it enters a cart.
///
/// Carts copy these values into their line items so that later catalog
/// changes never alter historical totals.
#[derive(Debug, Clone)]
pub struct ProductSnapshot {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    /// Promotional saving per unit, zero when no promotion applies
    pub unit_discount: Decimal,
    pub esg_score: f64,
    pub carbon_footprint_kg: f64,
}

/// Narrow gateway to the product catalog.
///
/// The catalog itself is an external concern; this service only answers
/// "given an id, what does it cost and how sustainable is it".
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Resolves a product id to a snapshot.
    ///
    /// Unavailable or inactive products surface as `NotFound`. A failing
    /// lookup is retried once before being reported as an upstream error.
    #[instrument(skip(self))]
    pub async fn resolve(&self, product_id: Uuid) -> Result<ProductSnapshot, ServiceError> {
        match self.lookup(product_id).await {
            Err(ServiceError::DatabaseError(first)) => {
                warn!(%product_id, error = %first, "catalog lookup failed, retrying once");
                match self.lookup(product_id).await {
                    Err(ServiceError::DatabaseError(second)) => {
                        Err(ServiceError::ExternalServiceError(second.to_string()))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn lookup(&self, product_id: Uuid) -> Result<ProductSnapshot, ServiceError> {
        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .filter(|p| p.is_active && p.is_available)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found or unavailable", product_id))
            })?;

        Ok(snapshot_from(product))
    }
}

fn snapshot_from(product: product::Model) -> ProductSnapshot {
    let unit_discount = product
        .discount_price
        .filter(|promo| *promo < product.price)
        .map(|promo| product.price - promo)
        .unwrap_or(Decimal::ZERO);

    ProductSnapshot {
        product_id: product.id,
        name: product.name,
        unit_price: product.price,
        unit_discount,
        esg_score: if product.esg_score > 0.0 {
            product.esg_score
        } else {
            DEFAULT_ESG_SCORE
        },
        carbon_footprint_kg: product.carbon_footprint_kg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn product(price: Decimal, discount: Option<Decimal>) -> product::Model {
        product::Model {
            id: Uuid::new_v4(),
            name: "Arroz Integral 1kg".to_string(),
            price,
            discount_price: discount,
            esg_score: 85.5,
            carbon_footprint_kg: 0.4,
            is_organic: true,
            is_local: false,
            is_recyclable: true,
            is_active: true,
            is_available: true,
            stock_quantity: 10,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn snapshot_without_promotion_has_zero_discount() {
        let snap = snapshot_from(product(dec!(12.99), None));
        assert_eq!(snap.unit_price, dec!(12.99));
        assert_eq!(snap.unit_discount, Decimal::ZERO);
    }

    #[test]
    fn snapshot_with_promotion_computes_per_unit_saving() {
        let snap = snapshot_from(product(dec!(12.99), Some(dec!(9.99))));
        assert_eq!(snap.unit_discount, dec!(3.00));
    }

    #[test]
    fn promotion_above_list_price_is_ignored() {
        let snap = snapshot_from(product(dec!(12.99), Some(dec!(15.00))));
        assert_eq!(snap.unit_discount, Decimal::ZERO);
    }

    #[test]
    fn missing_esg_score_falls_back_to_default() {
        let mut p = product(dec!(5.00), None);
        p.esg_score = 0.0;
        assert_eq!(snapshot_from(p).esg_score, DEFAULT_ESG_SCORE);
    }
}
