//! Append-only security audit trail with query and aggregation helpers.

use std::{collections::HashMap, hash::Hash, sync::Arc};

use chrono::{DateTime, Duration, Utc};

use crate::{
    Error,
    error::AuditWriteFailure,
    events::{NewSecurityEvent, SecurityEvent, SecurityEventBus, SecurityEventType},
    repositories::SecurityEventRepository,
    storage::{EventQuery, SecurityStatistics},
};

/// Service over the security event log.
///
/// Appends are persisted first and then dispatched to the handlers registered
/// on the [`SecurityEventBus`]. Handler failures are logged and never turn a
/// successful append into an error.
pub struct SecurityAuditTrail<R: SecurityEventRepository> {
    repository: Arc<R>,
    event_bus: SecurityEventBus,
}

impl<R: SecurityEventRepository> SecurityAuditTrail<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self::with_event_bus(repository, SecurityEventBus::new())
    }

    pub fn with_event_bus(repository: Arc<R>, event_bus: SecurityEventBus) -> Self {
        Self {
            repository,
            event_bus,
        }
    }

    pub fn event_bus(&self) -> &SecurityEventBus {
        &self.event_bus
    }

    /// Persist an event.
    ///
    /// Any storage failure is reported as [`AuditWriteFailure`].
    pub async fn append(&self, event: NewSecurityEvent) -> Result<SecurityEvent, Error> {
        let event_type = event.event_type;
        let event = self.repository.append(event).await.map_err(|e| match e {
            Error::Audit(_) => e,
            other => Error::Audit(AuditWriteFailure::Persistence(other.to_string())),
        })?;

        tracing::debug!(
            event_id = %event.id,
            event_type = %event_type,
            ip = %event.source_ip,
            "Security event recorded"
        );

        self.event_bus.emit(&event).await;
        Ok(event)
    }

    pub async fn query(&self, query: &EventQuery) -> Result<Vec<SecurityEvent>, Error> {
        self.repository.query(query).await
    }

    pub async fn by_type(&self, event_type: SecurityEventType) -> Result<Vec<SecurityEvent>, Error> {
        self.query(&EventQuery::new().with_types([event_type])).await
    }

    pub async fn by_identifier(&self, identifier: &str) -> Result<Vec<SecurityEvent>, Error> {
        self.query(&EventQuery::new().with_identifier(identifier))
            .await
    }

    pub async fn by_ip(&self, ip: &str) -> Result<Vec<SecurityEvent>, Error> {
        self.query(&EventQuery::new().with_source_ip(ip)).await
    }

    /// Events with `from <= occurred_at <= to`.
    pub async fn in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, Error> {
        self.query(&EventQuery::new().since(from).until(to)).await
    }

    pub async fn by_identifier_in_range(
        &self,
        identifier: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, Error> {
        self.query(
            &EventQuery::new()
                .with_identifier(identifier)
                .since(from)
                .until(to),
        )
        .await
    }

    /// `SECURITY_VIOLATION` and `UNAUTHORIZED_ACCESS` events since `since`.
    pub async fn violations_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, Error> {
        self.query(
            &EventQuery::new()
                .with_types(SecurityEventType::VIOLATIONS)
                .since(since),
        )
        .await
    }

    pub async fn failed_logins_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, Error> {
        self.query(
            &EventQuery::new()
                .with_types([SecurityEventType::LoginFailure])
                .since(since),
        )
        .await
    }

    /// The most recent `limit` events, oldest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<SecurityEvent>, Error> {
        let mut events = self
            .query(&EventQuery::new().newest_first().with_limit(limit))
            .await?;
        events.reverse();
        Ok(events)
    }

    /// Aggregate the events of the trailing `window`.
    ///
    /// `top_source_ips` holds at most `top_n` entries ordered by event count;
    /// ties keep the order in which the IPs first appeared.
    pub async fn statistics(
        &self,
        window: Duration,
        top_n: usize,
    ) -> Result<SecurityStatistics, Error> {
        let window_start = Utc::now() - window;
        let events = self.query(&EventQuery::new().since(window_start)).await?;
        Ok(summarize(window_start, &events, top_n))
    }
}

fn summarize(
    window_start: DateTime<Utc>,
    events: &[SecurityEvent],
    top_n: usize,
) -> SecurityStatistics {
    let failed_logins = events
        .iter()
        .filter(|e| e.event_type == SecurityEventType::LoginFailure)
        .count() as u64;
    let violations = events.iter().filter(|e| e.event_type.is_violation()).count() as u64;

    let events_by_type = count_in_order(events.iter().map(|e| e.event_type));

    let mut top_source_ips = count_in_order(events.iter().map(|e| e.source_ip.clone()));
    // Stable sort keeps first-appearance order among equal counts
    top_source_ips.sort_by(|a, b| b.1.cmp(&a.1));
    top_source_ips.truncate(top_n);

    SecurityStatistics {
        window_start,
        total_events: events.len() as u64,
        failed_logins,
        violations,
        events_by_type,
        top_source_ips,
    }
}

/// Count occurrences, keeping keys in order of first appearance.
fn count_in_order<K: Eq + Hash + Clone>(items: impl Iterator<Item = K>) -> Vec<(K, u64)> {
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut counts: Vec<(K, u64)> = Vec::new();

    for item in items {
        match index.get(&item) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(item.clone(), counts.len());
                counts.push((item, 1));
            }
        }
    }

    counts
}
