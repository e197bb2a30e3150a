use crate::config::AppConfig;
use crate::entities::{
    account, address, booking, cancel_type, contract, decor_service, labor_detail, material_detail,
    meeting, payment_transaction, product_detail, quotation, setting, time_slot, wallet,
    wallet_transaction,
};
use crate::errors::ServiceError;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, Schema, TransactionTrait,
};
use std::time::Duration;
use tracing::{debug, error, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
    /// Log every statement through sqlx
    pub sqlx_logging: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(8),
            sqlx_logging: false,
        }
    }
}

impl DbConfig {
    /// A private in-memory SQLite database on a single pooled connection.
    ///
    /// Every connection to `sqlite::memory:` opens its own database, so the
    /// pool must never grow past one.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
            sqlx_logging: cfg.log_level.eq_ignore_ascii_case("trace"),
        }
    }
}

/// Establishes a connection pool to the database
///
/// # Errors
/// Returns a `ServiceError::DatabaseError` if the connection cannot be established
pub async fn establish_connection(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("Configuring database connection with: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .sqlx_logging(config.sqlx_logging);

    info!(
        "Connecting to database with max_connections={}",
        config.max_connections
    );

    let pool = Database::connect(opt).await.map_err(|e| {
        error!("Database connection establishment failed: {}", e);
        ServiceError::DatabaseError(e)
    })?;

    info!("Database connection pool established successfully");
    Ok(pool)
}

async fn create_table<C, E>(db: &C, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(db.get_database_backend().build(&stmt)).await?;
    Ok(())
}

/// Creates every table the marketplace uses, skipping ones that already exist.
///
/// Referenced tables are created before the tables pointing at them.
pub async fn create_schema<C: ConnectionTrait>(db: &C) -> Result<(), ServiceError> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, account::Entity).await?;
    create_table(db, &schema, address::Entity).await?;
    create_table(db, &schema, cancel_type::Entity).await?;
    create_table(db, &schema, setting::Entity).await?;
    create_table(db, &schema, decor_service::Entity).await?;
    create_table(db, &schema, booking::Entity).await?;
    create_table(db, &schema, time_slot::Entity).await?;
    create_table(db, &schema, meeting::Entity).await?;
    create_table(db, &schema, quotation::Entity).await?;
    create_table(db, &schema, material_detail::Entity).await?;
    create_table(db, &schema, labor_detail::Entity).await?;
    create_table(db, &schema, product_detail::Entity).await?;
    create_table(db, &schema, contract::Entity).await?;
    create_table(db, &schema, wallet::Entity).await?;
    create_table(db, &schema, payment_transaction::Entity).await?;
    create_table(db, &schema, wallet_transaction::Entity).await?;

    info!("Database schema ready");
    Ok(())
}

/// Opens a transaction. Dropping the returned handle without committing rolls it back.
pub async fn begin(db: &DatabaseConnection) -> Result<DatabaseTransaction, ServiceError> {
    db.begin().await.map_err(|e| {
        error!("Failed to begin transaction: {}", e);
        ServiceError::TransactionFailed(format!("begin: {}", e))
    })
}

pub async fn commit(txn: DatabaseTransaction) -> Result<(), ServiceError> {
    txn.commit().await.map_err(|e| {
        error!("Failed to commit transaction: {}", e);
        ServiceError::TransactionFailed(format!("commit: {}", e))
    })
}
