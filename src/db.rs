use log::info;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::ClinicResult;

/// Connects to Postgres and brings the schema up to date.
pub async fn get_db_pool(database_url: &str) -> ClinicResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("database ready");
    Ok(pool)
}
