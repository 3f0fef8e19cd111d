/**
 * CORRELATION TABLE - Requêtes en attente de réponse sur la connexion partagée
 *
 * RÔLE : Associer chaque message sortant (msg_id) à exactement une
 * complétion, la connexion WebSocket n'offrant aucun appariement natif.
 *
 * FONCTIONNEMENT :
 * - `register(id, completion)` : stocke la complétion (écrase si id déjà présent)
 * - `resolve(id, payload)` : retire l'entrée PUIS invoque la complétion
 * - Un id absent = message non sollicité, à router comme broadcast
 *
 * LIMITE CONNUE : pas d'expiration. Une requête jamais répondue reste dans
 * la table pour toute la session (`pending_count` la rend observable).
 */

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::debug;

/// Callback one-shot invoqué avec le message de réponse complet
pub type Completion = Box<dyn FnOnce(Value) + Send + 'static>;

#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, Completion>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: impl Into<String>, completion: Completion) {
        let id = id.into();
        if self.pending.lock().insert(id.clone(), completion).is_some() {
            debug!(msg_id = %id, "correlation id re-registered, previous completion dropped");
        }
    }

    /// Enregistre une complétion qui transfère la réponse dans un canal oneshot
    pub fn register_oneshot(&self, id: impl Into<String>) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.register(
            id,
            Box::new(move |payload| {
                // le receveur a pu abandonner (timeout) : rien à faire
                let _ = tx.send(payload);
            }),
        );
        rx
    }

    /// Retire la complétion sans l'invoquer
    pub fn take(&self, id: &str) -> Option<Completion> {
        self.pending.lock().remove(id)
    }

    pub fn resolve(&self, id: &str, payload: Value) -> bool {
        // verrou relâché avant d'exécuter le code appelant
        let Some(completion) = self.take(id) else {
            return false;
        };
        completion(payload);
        true
    }

    pub fn cancel(&self, id: &str) -> bool {
        self.take(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>, seen: &Arc<Mutex<Vec<Value>>>) -> Completion {
        let counter = counter.clone();
        let seen = seen.clone();
        Box::new(move |v| {
            counter.fetch_add(1, Ordering::SeqCst);
            seen.lock().push(v);
        })
    }

    #[test]
    fn test_resolve_fires_once() {
        let table = CorrelationTable::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        table.register("a", counting(&calls, &seen));

        assert!(table.resolve("a", serde_json::json!({"n": 1})));
        assert!(!table.resolve("a", serde_json::json!({"n": 2})));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock()[0]["n"], 1);
        assert_eq!(table.pending_count(), 0);
    }

    #[test]
    fn test_distinct_ids_resolve_in_any_order() {
        let table = CorrelationTable::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        for id in ["x", "y", "z"] {
            let hits = hits.clone();
            table.register(id, Box::new(move |_| hits.lock().push(id)));
        }

        assert!(table.resolve("z", Value::Null));
        assert!(table.resolve("x", Value::Null));
        assert!(table.resolve("y", Value::Null));
        assert_eq!(*hits.lock(), vec!["z", "x", "y"]);
    }

    #[test]
    fn test_unknown_id_not_consumed() {
        let table = CorrelationTable::new();
        assert!(!table.resolve("nope", Value::Null));
    }

    #[test]
    fn test_register_overwrites() {
        let table = CorrelationTable::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        table.register("dup", counting(&first, &seen));
        table.register("dup", counting(&second, &seen));

        assert!(table.resolve("dup", Value::Null));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_completion_may_reenter_table() {
        let table = Arc::new(CorrelationTable::new());
        let inner = table.clone();
        table.register("outer", Box::new(move |_| inner.register("follow-up", Box::new(|_| {}))));

        assert!(table.resolve("outer", Value::Null));
        assert!(table.contains("follow-up"));
    }

    #[test]
    fn test_unanswered_request_stays_pending() {
        let table = CorrelationTable::new();
        table.register("lost", Box::new(|_| {}));
        assert_eq!(table.pending_count(), 1);
        assert!(table.cancel("lost"));
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_register_oneshot() {
        let table = CorrelationTable::new();
        let rx = table.register_oneshot("m1");
        assert!(table.resolve("m1", serde_json::json!({"ok": true})));
        assert_eq!(rx.await.unwrap()["ok"], true);
    }
}
