pub mod carts;
pub mod catalog;
pub mod payment_gateway;
pub mod payments;
pub mod rewards;
pub mod sweeper;

pub use carts::CartService;
pub use catalog::CatalogService;
pub use payment_gateway::{PaymentGateway, SimulatedPixGateway};
pub use payments::TransactionService;
pub use rewards::RewardService;
pub use sweeper::ExpirySweeper;

use crate::{config::AppConfig, events::EventSender};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// All services wired together, shared as application state.
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub carts: Arc<CartService>,
    pub payments: Arc<TransactionService>,
    pub sweeper: Arc<ExpirySweeper>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let catalog = Arc::new(CatalogService::new(db.clone()));
        let carts = Arc::new(CartService::new(
            db.clone(),
            catalog.clone(),
            event_sender.clone(),
            config.clone(),
        ));
        let payments = Arc::new(TransactionService::new(
            db.clone(),
            gateway,
            carts.clone(),
            event_sender.clone(),
            config.clone(),
        ));
        let sweeper = Arc::new(ExpirySweeper::new(db, payments.clone(), event_sender, config));

        Self {
            catalog,
            carts,
            payments,
            sweeper,
        }
    }
}
