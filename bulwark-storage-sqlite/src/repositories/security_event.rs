//! SQLite implementation of the append-only security event repository.

use async_trait::async_trait;
use bulwark_core::{
    Error,
    error::{StorageError, utilities::BackendResultExt},
    events::{NewSecurityEvent, SecurityEvent, SecurityEventType},
    id::{EVENT_PREFIX, validate_prefixed_id},
    repositories::SecurityEventRepository,
    storage::EventQuery,
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::login_attempt::from_millis;

pub struct SqliteSecurityEventRepository {
    pool: SqlitePool,
}

impl SqliteSecurityEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Internal struct for query results
#[derive(Debug, sqlx::FromRow)]
struct SqliteSecurityEvent {
    id: String,
    event_type: String,
    description: String,
    user_identifier: String,
    source_ip: String,
    user_agent: Option<String>,
    success: Option<bool>,
    occurred_at: i64,
    additional_data: Option<String>,
}

impl TryFrom<SqliteSecurityEvent> for SecurityEvent {
    type Error = Error;

    fn try_from(row: SqliteSecurityEvent) -> Result<Self, Self::Error> {
        if !validate_prefixed_id(&row.id, EVENT_PREFIX) {
            return Err(
                StorageError::Database(format!("Invalid security event id {}", row.id)).into(),
            );
        }

        let event_type = row.event_type.parse::<SecurityEventType>().map_err(|e| {
            tracing::error!(error = %e, event_id = %row.id, "Unreadable security event");
            StorageError::Database(format!("Unreadable security event {}", row.id))
        })?;

        Ok(SecurityEvent {
            id: row.id,
            event_type,
            description: row.description,
            user_identifier: row.user_identifier,
            source_ip: row.source_ip,
            user_agent: row.user_agent,
            success: row.success,
            occurred_at: from_millis(row.occurred_at)?,
            additional_data: row.additional_data,
        })
    }
}

#[async_trait]
impl SecurityEventRepository for SqliteSecurityEventRepository {
    async fn append(&self, event: NewSecurityEvent) -> Result<SecurityEvent, Error> {
        let event = event.into_event(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO security_events
                (id, event_type, description, user_identifier, source_ip, user_agent, success, occurred_at, additional_data)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(event.event_type.as_str())
        .bind(&event.description)
        .bind(&event.user_identifier)
        .bind(&event.source_ip)
        .bind(&event.user_agent)
        .bind(event.success)
        .bind(event.occurred_at.timestamp_millis())
        .bind(&event.additional_data)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, event_type = %event.event_type, "Failed to append security event");
            e
        })
        .map_audit_err()?;

        Ok(event)
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<SecurityEvent>, Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT id, event_type, description, user_identifier, source_ip, user_agent, success, occurred_at, additional_data
            FROM security_events
            WHERE 1 = 1
            "#,
        );

        if !query.event_types.is_empty() {
            builder.push(" AND event_type IN (");
            let mut types = builder.separated(", ");
            for event_type in &query.event_types {
                types.push_bind(event_type.as_str());
            }
            types.push_unseparated(")");
        }
        if let Some(identifier) = &query.user_identifier {
            builder.push(" AND user_identifier = ").push_bind(identifier.as_str());
        }
        if let Some(ip) = &query.source_ip {
            builder.push(" AND source_ip = ").push_bind(ip.as_str());
        }
        if let Some(from) = query.from {
            builder
                .push(" AND occurred_at >= ")
                .push_bind(from.timestamp_millis());
        }
        if let Some(to) = query.to {
            builder
                .push(" AND occurred_at <= ")
                .push_bind(to.timestamp_millis());
        }

        builder.push(if query.newest_first {
            " ORDER BY seq DESC"
        } else {
            " ORDER BY seq ASC"
        });

        if let Some(limit) = query.limit {
            builder
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = builder
            .build_query_as::<SqliteSecurityEvent>()
            .fetch_all(&self.pool)
            .await
            .map_db_err_with_context("Failed to query security events")?;

        rows.into_iter().map(SecurityEvent::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::{MigrationManager, SqliteMigrationManager, all_migrations};
    use chrono::Duration;

    async fn setup_test_db() -> SqlitePool {
        let _ = tracing_subscriber::fmt().try_init();
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("Failed to create pool");

        let manager = SqliteMigrationManager::new(pool.clone());
        manager
            .initialize()
            .await
            .expect("Failed to initialize migrations");
        manager
            .up(&all_migrations())
            .await
            .expect("Failed to run migrations");

        pool
    }

    async fn seed(repo: &SqliteSecurityEventRepository) {
        for (event_type, identifier, ip) in [
            (SecurityEventType::LoginFailure, "a@b.com", "10.0.0.5"),
            (SecurityEventType::SecurityViolation, "a@b.com", "10.0.0.6"),
            (SecurityEventType::LoginSuccess, "c@d.com", "10.0.0.5"),
            (SecurityEventType::UnauthorizedAccess, "anonymous", "10.0.0.7"),
        ] {
            repo.append(
                NewSecurityEvent::new(event_type, event_type.as_str(), identifier, ip)
                    .with_user_agent(Some("curl/8.5.0".to_string())),
            )
            .await
            .expect("Failed to append event");
        }
    }

    #[tokio::test]
    async fn test_append_round_trips_all_fields() {
        let repo = SqliteSecurityEventRepository::new(setup_test_db().await);

        let appended = repo
            .append(
                NewSecurityEvent::new(
                    SecurityEventType::AccountLocked,
                    "Account locked",
                    "a@b.com",
                    "10.0.0.5",
                )
                .with_success(false)
                .with_additional_data(r#"{"failures":5}"#),
            )
            .await
            .unwrap();

        let stored = repo.query(&EventQuery::new()).await.unwrap();
        assert_eq!(stored.len(), 1);
        let event = &stored[0];
        assert_eq!(event.id, appended.id);
        assert_eq!(event.event_type, SecurityEventType::AccountLocked);
        assert_eq!(event.success, Some(false));
        assert_eq!(event.user_agent, None);
        assert_eq!(event.additional_data.as_deref(), Some(r#"{"failures":5}"#));
        assert_eq!(
            event.occurred_at.timestamp_millis(),
            appended.occurred_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_query_filters_are_conjunctive() {
        let repo = SqliteSecurityEventRepository::new(setup_test_db().await);
        seed(&repo).await;

        let by_ip = repo
            .query(&EventQuery::new().with_source_ip("10.0.0.5"))
            .await
            .unwrap();
        assert_eq!(by_ip.len(), 2);

        let by_ip_and_identifier = repo
            .query(
                &EventQuery::new()
                    .with_source_ip("10.0.0.5")
                    .with_identifier("a@b.com"),
            )
            .await
            .unwrap();
        assert_eq!(by_ip_and_identifier.len(), 1);
        assert_eq!(
            by_ip_and_identifier[0].event_type,
            SecurityEventType::LoginFailure
        );

        let violations = repo
            .query(&EventQuery::new().with_types(SecurityEventType::VIOLATIONS))
            .await
            .unwrap();
        let types: Vec<_> = violations.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            [
                SecurityEventType::SecurityViolation,
                SecurityEventType::UnauthorizedAccess
            ]
        );
    }

    #[tokio::test]
    async fn test_query_time_range_and_limit() {
        let repo = SqliteSecurityEventRepository::new(setup_test_db().await);
        seed(&repo).await;

        let past = Utc::now() - Duration::hours(1);
        let future = Utc::now() + Duration::hours(1);

        assert_eq!(
            repo.query(&EventQuery::new().since(past).until(future))
                .await
                .unwrap()
                .len(),
            4
        );
        assert!(
            repo.query(&EventQuery::new().since(future))
                .await
                .unwrap()
                .is_empty()
        );

        let limited = repo
            .query(&EventQuery::new().with_limit(2))
            .await
            .unwrap();
        let identifiers: Vec<_> = limited.iter().map(|e| e.user_identifier.as_str()).collect();
        assert_eq!(identifiers, ["a@b.com", "a@b.com"]);

        let newest = repo
            .query(&EventQuery::new().newest_first().with_limit(2))
            .await
            .unwrap();
        let types: Vec<_> = newest.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            [
                SecurityEventType::UnauthorizedAccess,
                SecurityEventType::LoginSuccess
            ]
        );
    }

    #[tokio::test]
    async fn test_append_failure_is_audit_error() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        // No migrations: the table does not exist
        let repo = SqliteSecurityEventRepository::new(pool);

        let err = repo
            .append(NewSecurityEvent::new(
                SecurityEventType::Logout,
                "User logged out",
                "a@b.com",
                "10.0.0.5",
            ))
            .await
            .unwrap_err();
        assert!(err.is_audit_error());
    }

    #[tokio::test]
    async fn test_query_rejects_malformed_id() {
        let pool = setup_test_db().await;
        sqlx::query(
            r#"
            INSERT INTO security_events
                (id, event_type, description, user_identifier, source_ip, occurred_at)
            VALUES ('evt_1', 'LOGOUT', 'User logged out', 'a@b.com', '10.0.0.5', 0)
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let repo = SqliteSecurityEventRepository::new(pool);
        let err = repo.query(&EventQuery::new()).await.unwrap_err();
        assert!(err.is_storage_error());
    }
}
