use crate::config::AppConfig;
use crate::entities;
use crate::errors::ServiceError;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema,
};
use std::time::Duration;
use tracing::info;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool using the application configuration.
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let mut options = ConnectOptions::new(cfg.database_url.clone());
    options
        .max_connections(cfg.db_max_connections)
        .min_connections(cfg.db_min_connections)
        .connect_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let pool = Database::connect(options).await?;
    info!("database connection established");
    Ok(pool)
}

/// Idempotently creates every table from the entity definitions.
///
/// SQLite (tests) and Postgres both accept the generated
/// `CREATE TABLE IF NOT EXISTS` statements, so fresh environments
/// bootstrap without an external migration step.
pub async fn ensure_schema(db: &DbPool) -> Result<(), ServiceError> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    create_table(db, &schema, entities::shopper::Entity).await?;
    create_table(db, &schema, entities::store::Entity).await?;
    create_table(db, &schema, entities::product::Entity).await?;
    create_table(db, &schema, entities::cart::Entity).await?;
    create_table(db, &schema, entities::cart_item::Entity).await?;
    create_table(db, &schema, entities::transaction::Entity).await?;

    // Partial unique indexes back the lifecycle invariants at the
    // database level: one active cart per shopper, one pending
    // transaction per cart. SQLite and Postgres share this syntax.
    db.execute_unprepared(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_carts_active_shopper \
         ON carts (shopper_id) WHERE status = 'active'",
    )
    .await?;
    db.execute_unprepared(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_transactions_pending_cart \
         ON transactions (cart_id) WHERE status = 'pending'",
    )
    .await?;

    info!("database schema ensured");
    Ok(())
}

async fn create_table<E: EntityTrait>(
    db: &DbPool,
    schema: &Schema,
    entity: E,
) -> Result<(), ServiceError> {
    let backend = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(backend.build(&statement)).await?;
    Ok(())
}
