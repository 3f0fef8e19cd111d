/**
 * DASHBOARD SESSION - Contexte injecté d'une session du dashboard
 *
 * RÔLE :
 * Construit une fois par session, il possède le store, les gardes, la table
 * de corrélation, le réconciliateur, les notifications et le canal sortant
 * de la connexion partagée. Tout composant qui en a besoin le reçoit en
 * paramètre : aucun état global.
 *
 * FONCTIONNEMENT :
 * - Actions UI -> `send_request` (msg_id frais + complétion) ou HTTP gateway
 * - Réponses corrélées et broadcasts -> `dispatcher()` -> store
 * - Polling -> `CycleSink` -> store (sous garde) -> réconciliateur
 * - `teardown()` détache tout : aucune écriture après démontage
 */

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DashboardConfig;
use crate::correlation::{Completion, CorrelationTable};
use crate::dispatch::{BroadcastRegistry, DispatchError, Dispatcher};
use crate::gateway::GatewayApi;
use crate::guard::{CycleTicket, GuardSet};
use crate::logs::{stream_pod_logs, LogBuffer, LogError, LogRequest, LogStreamEnd, LogStreamSignal};
use crate::models::{KernelSpec, Listing, ResourceClass, ResourceSpec, WorkloadRegistration};
use crate::notify::{NotificationLevel, Notifier};
use crate::polling::{CycleOutcome, CycleSink, FetchError, Fetcher, PollingScheduler};
use crate::protocol::{self, InboundFrame, OutboundFrame, ProtocolError, QueuedFrame, WorkloadsUpdate};
use crate::reconciler::{CreationKind, Reconciler};
use crate::store::{new_state, ResourceStore, Shared};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection closed, '{0}' not sent")]
    ConnectionClosed(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("no reply to '{op}' within {secs}s")]
    Timeout { op: String, secs: u64 },
    #[error("pending request '{0}' was dropped before a reply arrived")]
    Dropped(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("no poller registered for {0}")]
    NoPoller(ResourceClass),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub request_timeout: Option<Duration>,
    pub notification_capacity: usize,
    pub notification_ttl: Duration,
    pub log_buffer_lines: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&DashboardConfig::default())
    }
}

impl From<&DashboardConfig> for SessionOptions {
    fn from(cfg: &DashboardConfig) -> Self {
        Self {
            request_timeout: cfg.request_timeout(),
            notification_capacity: cfg.notifications.capacity,
            notification_ttl: Duration::from_secs(cfg.notifications.ttl_secs),
            log_buffer_lines: cfg.logs.buffer_lines,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PendingCreations {
    pub kernels: u32,
    pub workloads: u32,
}

pub struct DashboardSession {
    store: Arc<ResourceStore>,
    guards: Arc<GuardSet>,
    correlation: Arc<CorrelationTable>,
    reconciler: Shared<Reconciler>,
    notifier: Notifier,
    outbound: mpsc::UnboundedSender<QueuedFrame>,
    request_timeout: Option<Duration>,
    schedulers: Mutex<HashMap<ResourceClass, Arc<PollingScheduler>>>,
    log_signal: Mutex<LogStreamSignal>,
    log_buffer: LogBuffer,
}

impl DashboardSession {
    pub fn new(outbound: mpsc::UnboundedSender<QueuedFrame>, options: SessionOptions) -> Arc<Self> {
        Arc::new(Self {
            store: Arc::new(ResourceStore::new()),
            guards: Arc::new(GuardSet::new()),
            correlation: Arc::new(CorrelationTable::new()),
            reconciler: new_state(Reconciler::new()),
            notifier: Notifier::new(options.notification_capacity, options.notification_ttl),
            outbound,
            request_timeout: options.request_timeout,
            schedulers: Mutex::new(HashMap::new()),
            log_signal: Mutex::new(LogStreamSignal::new()),
            log_buffer: LogBuffer::new(options.log_buffer_lines),
        })
    }

    pub fn store(&self) -> &Arc<ResourceStore> {
        &self.store
    }

    pub fn guards(&self) -> &Arc<GuardSet> {
        &self.guards
    }

    pub fn correlation(&self) -> &Arc<CorrelationTable> {
        &self.correlation
    }

    pub fn reconciler(&self) -> &Shared<Reconciler> {
        &self.reconciler
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn log_buffer(&self) -> &LogBuffer {
        &self.log_buffer
    }

    pub fn pending_creations(&self) -> PendingCreations {
        let r = self.reconciler.lock();
        PendingCreations {
            kernels: r.pending(CreationKind::Kernel),
            workloads: r.pending(CreationKind::Workload),
        }
    }

    // ============ CONNEXION PARTAGÉE ============

    /// Envoie une requête et enregistre sa complétion sous un msg_id frais
    pub fn send_request(&self, op: &str, fields: Value, completion: Completion) -> Result<String, SessionError> {
        let queued = OutboundFrame::new(op, fields).queue()?;
        let msg_id = queued.msg_id.clone();
        self.correlation.register(msg_id.clone(), completion);

        if self.outbound.send(queued).is_err() {
            self.correlation.cancel(&msg_id);
            return Err(SessionError::ConnectionClosed(op.to_string()));
        }
        debug!(op, msg_id = %msg_id, "request sent");
        Ok(msg_id)
    }

    /// Envoie une requête et attend sa réponse (attente bornée si configurée)
    pub async fn request(&self, op: &str, fields: Value) -> Result<Value, SessionError> {
        let queued = OutboundFrame::new(op, fields).queue()?;
        let msg_id = queued.msg_id.clone();
        let reply = self.correlation.register_oneshot(msg_id.clone());

        if self.outbound.send(queued).is_err() {
            self.correlation.cancel(&msg_id);
            return Err(SessionError::ConnectionClosed(op.to_string()));
        }

        let received = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(r) => r,
                Err(_) => {
                    self.correlation.cancel(&msg_id);
                    return Err(SessionError::Timeout { op: op.to_string(), secs: limit.as_secs() });
                }
            },
            None => reply.await,
        };
        received.map_err(|_| SessionError::Dropped(op.to_string()))
    }

    /// Dispatcher à deux étages : corrélation puis broadcasts de la session
    pub fn dispatcher(self: &Arc<Self>) -> Dispatcher {
        let mut registry = BroadcastRegistry::new();

        let weak = Arc::downgrade(self);
        registry.register(
            protocol::ACTIVE_WORKLOADS_UPDATE,
            Box::new(move |frame: &InboundFrame| {
                let update: WorkloadsUpdate = serde_json::from_value(frame.body.clone()).map_err(|e| DispatchError::Shape {
                    op: protocol::ACTIVE_WORKLOADS_UPDATE.to_string(),
                    reason: e.to_string(),
                })?;
                if let Some(session) = weak.upgrade() {
                    debug!(count = update.workloads.len(), "workloads update pushed");
                    session.store.upsert_many(update.workloads);
                }
                Ok(())
            }),
        );

        let weak = Arc::downgrade(self);
        registry.register(
            protocol::ERROR_OP,
            Box::new(move |frame: &InboundFrame| {
                let message = protocol::rejection(&frame.body).unwrap_or_default();
                if let Some(session) = weak.upgrade() {
                    session.notifier.error("Gateway error", message);
                }
                Ok(())
            }),
        );

        Dispatcher::new(Arc::clone(&self.correlation), registry)
    }

    // ============ WORKLOADS (WebSocket) ============

    pub fn register_workload(self: &Arc<Self>, registration: WorkloadRegistration) -> Result<String, SessionError> {
        self.reconciler.lock().increment(CreationKind::Workload);

        let weak = Arc::downgrade(self);
        let name = registration.workload_name.clone();
        let sent = self.send_request(
            protocol::REGISTER_WORKLOAD,
            json!({ "workload_registration": registration }),
            Box::new(move |reply: Value| {
                if let Some(session) = weak.upgrade() {
                    session.complete_registration(&name, reply);
                }
            }),
        );

        if let Err(e) = &sent {
            self.reconciler.lock().abandon(CreationKind::Workload);
            self.notifier.error("Failed to register workload", e.to_string());
        }
        sent
    }

    fn complete_registration(&self, name: &str, reply: Value) {
        match protocol::workload_from_reply(&reply) {
            Ok(workload) => {
                let id = workload.id.clone();
                self.store.upsert(workload);
                self.reconciler
                    .lock()
                    .tracker_mut(CreationKind::Workload)
                    .observe_listing([id.clone()]);
                self.notifier.push(NotificationLevel::Success, "Workload registered", format!("{name} ({id})"));
            }
            Err(e) => {
                self.reconciler.lock().abandon(CreationKind::Workload);
                self.notifier.error(format!("Failed to register workload '{name}'"), e.to_string());
            }
        }
    }

    pub fn start_workload(self: &Arc<Self>, workload_id: &str) -> Result<String, SessionError> {
        self.workload_action(protocol::START_WORKLOAD, workload_id)
    }

    pub fn stop_workload(self: &Arc<Self>, workload_id: &str) -> Result<String, SessionError> {
        self.workload_action(protocol::STOP_WORKLOAD, workload_id)
    }

    fn workload_action(self: &Arc<Self>, op: &'static str, workload_id: &str) -> Result<String, SessionError> {
        let weak = Arc::downgrade(self);
        let target = workload_id.to_string();
        self.send_request(
            op,
            json!({ "workload_id": workload_id }),
            Box::new(move |reply: Value| {
                let Some(session) = weak.upgrade() else { return };
                match protocol::workload_from_reply(&reply) {
                    Ok(workload) => {
                        session.store.upsert(workload);
                    }
                    Err(e) => {
                        session.notifier.error(format!("'{op}' failed for workload {target}"), e.to_string());
                    }
                }
            }),
        )
    }

    /// Fetcher de polling des workloads, via `get_workloads` sur la connexion partagée
    pub fn workloads_fetcher(self: &Arc<Self>) -> Fetcher {
        let weak = Arc::downgrade(self);
        Arc::new(move || {
            let weak = weak.clone();
            async move {
                let session = weak.upgrade().ok_or(FetchError::Aborted)?;
                let reply = session
                    .request(protocol::GET_WORKLOADS, Value::Null)
                    .await
                    .map_err(|e| FetchError::Request(e.to_string()))?;
                let workloads = protocol::workloads_from_reply(&reply).map_err(|e| FetchError::Request(e.to_string()))?;
                Ok::<_, FetchError>(Listing::Workloads(workloads))
            }
            .boxed()
        })
    }

    // ============ ACTIONS HTTP ============

    pub async fn create_kernel(&self, api: &GatewayApi, spec: &KernelSpec) -> Result<(), SessionError> {
        let pending = self.reconciler.lock().increment(CreationKind::Kernel);
        debug!(pending, "kernel creation issued");

        match api.create_kernel(spec).await {
            Ok(()) => {
                self.refresh_if_polled(ResourceClass::Kernels);
                Ok(())
            }
            Err(e) => {
                self.reconciler.lock().abandon(CreationKind::Kernel);
                self.notifier.error("Failed to create kernel", e.to_string());
                Err(e.into())
            }
        }
    }

    pub async fn set_node_enabled(&self, api: &GatewayApi, node_id: &str, enabled: bool) -> Result<(), SessionError> {
        if let Err(e) = api.set_node_enabled(node_id, enabled).await {
            let verb = if enabled { "enable" } else { "disable" };
            self.notifier.error(format!("Failed to {verb} node {node_id}"), e.to_string());
            return Err(e.into());
        }
        self.refresh_if_polled(ResourceClass::Nodes);
        Ok(())
    }

    pub async fn adjust_node_capacity(&self, api: &GatewayApi, node_id: &str, capacity: &ResourceSpec) -> Result<(), SessionError> {
        if let Err(e) = api.adjust_node_capacity(node_id, capacity).await {
            self.notifier.error(format!("Failed to adjust capacity of node {node_id}"), e.to_string());
            return Err(e.into());
        }
        self.refresh_if_polled(ResourceClass::Nodes);
        Ok(())
    }

    // ============ POLLING ============

    /// Enregistre un poller pour la classe ; `None` = refresh manuel uniquement
    pub fn start_polling(self: &Arc<Self>, class: ResourceClass, interval: Option<Duration>, fetcher: Fetcher) -> Arc<PollingScheduler> {
        let sink: Arc<dyn CycleSink> = Arc::new(SessionSink(Arc::downgrade(self)));
        let scheduler = Arc::new(PollingScheduler::new(class, Arc::clone(&self.guards), fetcher, sink));
        if let Some(every) = interval {
            scheduler.start(every);
        }
        self.schedulers.lock().insert(class, Arc::clone(&scheduler));
        scheduler
    }

    pub fn refresh(&self, class: ResourceClass) -> Result<JoinHandle<CycleOutcome>, SessionError> {
        let scheduler = self
            .schedulers
            .lock()
            .get(&class)
            .cloned()
            .ok_or(SessionError::NoPoller(class))?;
        Ok(scheduler.trigger_manual())
    }

    fn refresh_if_polled(&self, class: ResourceClass) {
        if let Err(e) = self.refresh(class) {
            debug!("no follow-up refresh: {}", e);
        }
    }

    fn commit_listing(&self, ticket: CycleTicket, listing: Listing) -> bool {
        let kind = match ticket.class {
            ResourceClass::Kernels => Some(CreationKind::Kernel),
            ResourceClass::Workloads => Some(CreationKind::Workload),
            _ => None,
        };
        let ids = kind.map(|_| listing.ids());

        if !self.store.commit(&self.guards, &ticket, listing) {
            return false;
        }
        if let (Some(kind), Some(ids)) = (kind, ids) {
            self.reconciler.lock().observe_authoritative(kind, ids);
        }
        true
    }

    // ============ LOGS ============

    /// Ouvre une nouvelle session de streaming avec un signal neuf ;
    /// le signal de la session précédente est déclenché
    pub fn start_log_stream(&self, api: GatewayApi, request: LogRequest) -> JoinHandle<Result<LogStreamEnd, LogError>> {
        let signal = LogStreamSignal::new();
        let previous = std::mem::replace(&mut *self.log_signal.lock(), signal.clone());
        previous.stop();

        let buffer = self.log_buffer.clone();
        buffer.clear();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let result = stream_pod_logs(&api, &request, &signal, &buffer).await;
            if let Err(e) = &result {
                notifier.error(format!("Log stream for {} failed", request.pod), e.to_string());
            }
            result
        })
    }

    pub fn stop_logs(&self) {
        self.log_signal.lock().stop();
    }

    // ============ TEARDOWN ============

    /// Démontage : plus aucun résultat en vol ne peut écrire dans le store
    pub fn teardown(&self) {
        let schedulers: Vec<_> = self.schedulers.lock().drain().map(|(_, s)| s).collect();
        for scheduler in schedulers {
            scheduler.stop();
        }
        self.guards.stop_all();
        self.stop_logs();
        let leaked = self.correlation.pending_count();
        if leaked > 0 {
            warn!(leaked, "session torn down with unanswered requests");
        }
        info!("dashboard session torn down");
    }
}

/// Sink de polling ; référence faible pour ne pas retenir la session
struct SessionSink(Weak<DashboardSession>);

impl CycleSink for SessionSink {
    fn on_listing(&self, ticket: CycleTicket, listing: Listing) -> bool {
        match self.0.upgrade() {
            Some(session) => session.commit_listing(ticket, listing),
            None => false,
        }
    }

    fn on_failure(&self, class: ResourceClass, error: &FetchError) {
        if let Some(session) = self.0.upgrade() {
            session.notifier.error(format!("Failed to refresh {class}"), error.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DistributedKernel, Workload};

    fn session() -> (Arc<DashboardSession>, mpsc::UnboundedReceiver<QueuedFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DashboardSession::new(tx, SessionOptions::default()), rx)
    }

    fn sent(rx: &mut mpsc::UnboundedReceiver<QueuedFrame>) -> Value {
        serde_json::from_str(&rx.try_recv().unwrap().text).unwrap()
    }

    fn kernel(id: &str) -> DistributedKernel {
        serde_json::from_value(json!({"kernel_id": id})).unwrap()
    }

    #[test]
    fn test_register_workload_reply_lands_in_store() {
        let (session, mut rx) = session();
        let dispatcher = session.dispatcher();
        let registration = WorkloadRegistration {
            workload_name: "demo".into(),
            workload_preset_key: None,
            seed: None,
            debug_logging: false,
            timescale_adjustment_factor: 1.0,
        };

        let msg_id = session.register_workload(registration).unwrap();
        assert_eq!(session.pending_creations().workloads, 1);
        let frame = sent(&mut rx);
        assert_eq!(frame["op"], "register_workload");
        assert_eq!(frame["msg_id"], msg_id.as_str());
        assert_eq!(frame["workload_registration"]["workload_name"], "demo");

        dispatcher.dispatch_value(json!({
            "op": "register_workload_response",
            "msg_id": msg_id,
            "workload": {"id": "w1", "name": "demo"}
        }));
        let stored: Workload = session.store().get("w1").unwrap();
        assert_eq!(stored.name, "demo");
        assert_eq!(session.pending_creations().workloads, 0);
        assert_eq!(session.correlation().pending_count(), 0);
    }

    #[test]
    fn test_rejected_registration_abandons_slot() {
        let (session, mut rx) = session();
        let dispatcher = session.dispatcher();
        let registration = WorkloadRegistration {
            workload_name: "bad".into(),
            workload_preset_key: Some("missing".into()),
            seed: None,
            debug_logging: false,
            timescale_adjustment_factor: 1.0,
        };
        let msg_id = session.register_workload(registration).unwrap();
        let _ = sent(&mut rx);

        dispatcher.dispatch_value(json!({"op": "error", "msg_id": msg_id, "error_message": "unknown preset"}));
        assert_eq!(session.pending_creations().workloads, 0);
        assert_eq!(session.store().len::<Workload>(), 0);
        assert_eq!(session.notifier().active().len(), 1);
    }

    #[test]
    fn test_send_on_closed_connection_cleans_up() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let session = DashboardSession::new(tx, SessionOptions::default());
        let err = session.start_workload("w1").unwrap_err();
        assert!(matches!(err, SessionError::ConnectionClosed(_)));
        assert_eq!(session.correlation().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_times_out_and_forgets_entry() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let options = SessionOptions { request_timeout: Some(Duration::from_millis(20)), ..SessionOptions::default() };
        let session = DashboardSession::new(tx, options);

        let err = session.request(protocol::GET_WORKLOADS, Value::Null).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));
        assert_eq!(session.correlation().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_kernel_listing_reconciles_counter() {
        let (session, _rx) = session();
        for _ in 0..3 {
            session.reconciler().lock().increment(CreationKind::Kernel);
        }
        let ticket = session.guards().begin_cycle(ResourceClass::Kernels);
        assert!(session.commit_listing(ticket, Listing::Kernels(vec![kernel("k1"), kernel("k2")])));

        assert_eq!(session.pending_creations().kernels, 1);
        assert_eq!(session.reconciler().lock().underflow_count(), 0);
    }

    #[tokio::test]
    async fn test_first_listing_on_idle_session_clamps() {
        let (session, _rx) = session();
        let ticket = session.guards().begin_cycle(ResourceClass::Kernels);
        assert!(session.commit_listing(ticket, Listing::Kernels(vec![kernel("k1"), kernel("k2")])));

        assert_eq!(session.pending_creations().kernels, 0);
        assert_eq!(session.reconciler().lock().underflow_count(), 2);
    }

    #[tokio::test]
    async fn test_superseded_listing_does_not_reconcile() {
        let (session, _rx) = session();
        session.reconciler().lock().increment(CreationKind::Kernel);
        let stale = session.guards().begin_cycle(ResourceClass::Kernels);
        let _fresh = session.guards().begin_cycle(ResourceClass::Kernels);

        assert!(!session.commit_listing(stale, Listing::Kernels(vec![kernel("k1")])));
        assert_eq!(session.pending_creations().kernels, 1);
    }

    #[test]
    fn test_refresh_without_poller() {
        let (session, _rx) = session();
        assert!(matches!(session.refresh(ResourceClass::Presets), Err(SessionError::NoPoller(ResourceClass::Presets))));
    }

    #[tokio::test]
    async fn test_teardown_detaches_everything() {
        let (session, _rx) = session();
        let fetcher: Fetcher = Arc::new(|| async { Ok(Listing::Nodes(vec![])) }.boxed());
        session.start_polling(ResourceClass::Nodes, None, fetcher);
        let ticket = session.guards().begin_cycle(ResourceClass::Nodes);

        session.teardown();
        assert!(!session.commit_listing(ticket, Listing::Nodes(vec![])));
        assert!(matches!(session.refresh(ResourceClass::Nodes), Err(SessionError::NoPoller(_))));
    }
}
