use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::config::EngineConfig;
use crate::store::StoreError;

pub type DbPool = SqlitePool;

/// Open the connection pool and bring the schema up to date
pub async fn initialize_db(config: &EngineConfig) -> Result<DbPool, StoreError> {
  tracing::info!(
    url = %config.database_url,
    max_connections = config.max_connections,
    "initializing progression database"
  );

  let pool = SqlitePoolOptions::new()
    .max_connections(config.max_connections)
    .connect(&config.database_url)
    .await?;

  // Run migrations
  sqlx::migrate!("./migrations").run(&pool).await?;

  tracing::info!("progression database ready");

  Ok(pool)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_initialize_in_memory() {
    let config = EngineConfig {
      database_url: "sqlite::memory:".into(),
      max_connections: 1,
    };
    let pool = initialize_db(&config).await.expect("Should initialize");

    let tables: Vec<(String,)> =
      sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table'")
        .fetch_all(&pool)
        .await
        .unwrap();
    let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
    for expected in ["user_progressions", "failure_counters", "progression_logs"] {
      assert!(names.contains(&expected), "missing table {}", expected);
    }

    pool.close().await;
  }

  #[tokio::test]
  async fn test_bad_url_is_database_error() {
    let config = EngineConfig {
      database_url: "sqlite:///no-such-dir/progression.db".into(),
      max_connections: 1,
    };
    assert!(matches!(
      initialize_db(&config).await,
      Err(StoreError::Database(_))
    ));
  }
}
