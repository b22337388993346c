//! Postgres access for every table the service owns. Queries are grouped by
//! area in the submodules, all as inherent methods on [`Database`].

mod coach;
mod garmin;
mod labs;
mod users;

pub use users::UserUpdate;

use service_core::error::AppError;
use sqlx::PgPool;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        crate::db::health_check(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))
    }
}

pub(crate) fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}
