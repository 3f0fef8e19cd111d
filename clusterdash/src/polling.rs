/**
 * POLLING SCHEDULER - Rafraîchissement périodique par classe de ressource
 *
 * RÔLE : Relancer un fetch toutes les N secondes (et à la demande), chaque
 * cycle ouvrant une nouvelle génération dans la garde de sa classe.
 *
 * FONCTIONNEMENT :
 * - `start(interval)` : premier cycle immédiat, puis un par tick
 * - `trigger_manual()` : cycle hors-bande (bouton "refresh")
 * - Les cycles ne s'attendent pas : seul le dernier émis peut committer
 * - `stop()` : coupe le timer et détache la garde (plus aucune écriture)
 * - Un fetch en échec est signalé au sink, le timer continue ; l'échec d'un
 *   cycle dépassé ou détaché est seulement journalisé
 */

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::guard::{CycleTicket, GuardSet};
use crate::models::{Listing, ResourceClass};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway returned HTTP {0}")]
    Status(u16),
    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("request failed: {0}")]
    Request(String),
    #[error("fetch abandoned")]
    Aborted,
}

pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Listing, FetchError>> + Send + Sync>;

/// Destination des résultats de cycle (implémenté par la session)
pub trait CycleSink: Send + Sync {
    /// Retourne true si la listing a été committée dans le store
    fn on_listing(&self, ticket: CycleTicket, listing: Listing) -> bool;
    fn on_failure(&self, class: ResourceClass, error: &FetchError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Committed,
    Superseded,
    Failed,
}

pub struct PollingScheduler {
    class: ResourceClass,
    guards: Arc<GuardSet>,
    fetcher: Fetcher,
    sink: Arc<dyn CycleSink>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl PollingScheduler {
    pub fn new(class: ResourceClass, guards: Arc<GuardSet>, fetcher: Fetcher, sink: Arc<dyn CycleSink>) -> Self {
        Self {
            class,
            guards,
            fetcher,
            sink,
            timer: Mutex::new(None),
        }
    }

    pub fn class(&self) -> ResourceClass {
        self.class
    }

    /// Démarre le timer ; un cycle immédiat puis un cycle par intervalle
    pub fn start(self: &Arc<Self>, interval: Duration) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if this.guards.get(this.class).is_stopped() {
                    break;
                }
                this.dispatch_cycle();
            }
        });
        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
        info!(class = %self.class, every_secs = interval.as_secs_f64(), "polling started");
    }

    pub fn trigger_manual(&self) -> JoinHandle<CycleOutcome> {
        debug!(class = %self.class, "manual refresh");
        self.dispatch_cycle()
    }

    /// Émet un cycle : ouvre une génération puis lance le fetch sans l'attendre
    pub fn dispatch_cycle(&self) -> JoinHandle<CycleOutcome> {
        let ticket = self.guards.begin_cycle(self.class);
        let fetch = (self.fetcher)();
        let sink = Arc::clone(&self.sink);
        let guards = Arc::clone(&self.guards);
        let class = self.class;
        tokio::spawn(async move {
            match fetch.await {
                Ok(listing) => {
                    if sink.on_listing(ticket, listing) {
                        CycleOutcome::Committed
                    } else {
                        CycleOutcome::Superseded
                    }
                }
                Err(e) if !guards.should_commit(&ticket) => {
                    debug!(class = %class, generation = ticket.generation, "stale cycle failed: {}", e);
                    CycleOutcome::Superseded
                }
                Err(e) => {
                    sink.on_failure(class, &e);
                    CycleOutcome::Failed
                }
            }
        })
    }

    pub fn stop(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
        self.guards.get(self.class).stop();
        info!(class = %self.class, "polling stopped");
    }

    pub fn is_running(&self) -> bool {
        self.timer.lock().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}
