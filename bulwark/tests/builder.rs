//! Tests for the guard builder

use bulwark::GuardOrchestratorBuilder;

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_builder_with_sqlite() {
    let guard = GuardOrchestratorBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite")
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build guard");

    guard.health_check().await.expect("Health check failed");
    assert!(guard.can_attempt_login("a@b.com", "10.0.0.5").await.unwrap());
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_builder_with_sqlite_pool() {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite");

    let guard = GuardOrchestratorBuilder::new()
        .with_sqlite_pool(pool)
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build guard");

    guard.health_check().await.expect("Health check failed");
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_builder_manual_migration() {
    // Without auto-migration (default)
    let guard = GuardOrchestratorBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite")
        .build()
        .await
        .expect("Failed to build guard");

    // Tables do not exist yet
    assert!(
        guard
            .can_attempt_login("a@b.com", "10.0.0.5")
            .await
            .unwrap_err()
            .is_storage_error()
    );

    guard.migrate().await.expect("Migration failed");
    assert!(guard.can_attempt_login("a@b.com", "10.0.0.5").await.unwrap());
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_builder_with_invalid_sqlite_url() {
    let result = GuardOrchestratorBuilder::new()
        .with_sqlite("sqlite:///nonexistent/dir/bulwark.db")
        .await;

    assert!(matches!(
        result,
        Err(bulwark::GuardOrchestratorBuilderError::StorageConnection(_))
    ));
}

#[tokio::test]
async fn test_builder_with_in_memory() {
    let guard = GuardOrchestratorBuilder::default()
        .with_in_memory()
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build guard");

    guard.health_check().await.expect("Health check failed");
    assert!(guard.cipher().is_none());
    assert_eq!(guard.tracker().config().max_failures, 5);
}
