/**
 * NOTIFICATIONS - Alertes transitoires présentées à l'utilisateur
 *
 * Les échecs de transport et les rejets serveur remontent ici, jamais via un
 * dialogue bloquant ni en corrompant le store. File bornée, entrées
 * expirables et supprimables.
 */

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: String,
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct Notifier {
    queue: Arc<Mutex<VecDeque<Notification>>>,
    capacity: usize,
    ttl: Duration,
}

impl Notifier {
    pub fn new(capacity: usize, ttl: std::time::Duration) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
            ttl: Duration::try_from(ttl).unwrap_or(Duration::minutes(1)),
        }
    }

    pub fn push(&self, level: NotificationLevel, title: impl Into<String>, message: impl Into<String>) -> String {
        let now = OffsetDateTime::now_utc();
        let n = Notification {
            id: Uuid::new_v4().to_string(),
            level,
            title: title.into(),
            message: message.into(),
            created_at: now,
            expires_at: now + self.ttl,
        };
        match level {
            NotificationLevel::Error | NotificationLevel::Warning => warn!("[notify] {}: {}", n.title, n.message),
            _ => info!("[notify] {}: {}", n.title, n.message),
        }

        let id = n.id.clone();
        let mut queue = self.queue.lock();
        while queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(n);
        id
    }

    pub fn error(&self, title: impl Into<String>, message: impl Into<String>) -> String {
        self.push(NotificationLevel::Error, title, message)
    }

    pub fn dismiss(&self, id: &str) -> bool {
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.retain(|n| n.id != id);
        queue.len() < before
    }

    /// Notifications non expirées, les plus anciennes d'abord
    pub fn active(&self) -> Vec<Notification> {
        self.active_at(OffsetDateTime::now_utc())
    }

    pub fn active_at(&self, now: OffsetDateTime) -> Vec<Notification> {
        let mut queue = self.queue.lock();
        queue.retain(|n| n.expires_at > now);
        queue.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_dismiss() {
        let notifier = Notifier::new(8, std::time::Duration::from_secs(30));
        let id = notifier.error("Failed to refresh nodes", "connection refused");
        assert_eq!(notifier.active().len(), 1);
        assert!(notifier.dismiss(&id));
        assert!(!notifier.dismiss(&id));
        assert!(notifier.active().is_empty());
    }

    #[test]
    fn test_bounded_queue_drops_oldest() {
        let notifier = Notifier::new(2, std::time::Duration::from_secs(30));
        notifier.push(NotificationLevel::Info, "a", "");
        notifier.push(NotificationLevel::Info, "b", "");
        notifier.push(NotificationLevel::Info, "c", "");
        let titles: Vec<String> = notifier.active().into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec!["b", "c"]);
    }

    #[test]
    fn test_expired_entries_pruned() {
        let notifier = Notifier::new(4, std::time::Duration::from_secs(5));
        notifier.push(NotificationLevel::Warning, "slow", "");
        let later = OffsetDateTime::now_utc() + Duration::seconds(10);
        assert!(notifier.active_at(later).is_empty());
    }
}
