/*!
Test Harness pour la session ClusterDash

Facilite l'écriture de tests de bout en bout avec:
- Une session réelle branchée sur une gateway simulée
- Des fetchers de polling complétés à la main, dans n'importe quel ordre
- Des raccourcis d'assertion sur le store et les compteurs
*/

use crate::mock_gateway::MockGateway;
use anyhow::Result;
use clusterdash::models::{ClusterNode, DistributedKernel, Workload};
use clusterdash::polling::{CycleOutcome, FetchError, Fetcher};
use clusterdash::reconciler::CreationKind;
use clusterdash::{DashboardSession, Listing, ResourceClass, SessionOptions};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type PendingFetch = oneshot::Sender<Result<Listing, FetchError>>;

/// Fetcher dont chaque appel reste en vol jusqu'à `complete`/`fail`
#[derive(Clone, Default)]
pub struct ControlledFetcher {
    calls: Arc<Mutex<Vec<Option<PendingFetch>>>>,
}

impl ControlledFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetcher(&self) -> Fetcher {
        let calls = self.calls.clone();
        Arc::new(move || {
            let (tx, rx) = oneshot::channel();
            calls.lock().push(Some(tx));
            async move { rx.await.unwrap_or(Err(FetchError::Aborted)) }.boxed()
        })
    }

    /// Nombre de fetchs émis depuis la création
    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn complete(&self, call: usize, listing: Listing) -> Result<()> {
        self.resolve(call, Ok(listing))
    }

    pub fn fail(&self, call: usize, error: FetchError) -> Result<()> {
        self.resolve(call, Err(error))
    }

    fn resolve(&self, call: usize, result: Result<Listing, FetchError>) -> Result<()> {
        let tx = self
            .calls
            .lock()
            .get_mut(call)
            .and_then(Option::take)
            .ok_or_else(|| anyhow::anyhow!("fetch #{} was never issued or is already resolved", call))?;
        tx.send(result).map_err(|_| anyhow::anyhow!("fetch #{} was abandoned by the scheduler", call))
    }
}

/// Harness de test : session + gateway simulée + pollers manuels
pub struct TestHarness {
    pub session: Arc<DashboardSession>,
    pub gateway: MockGateway,
    fetchers: HashMap<ResourceClass, ControlledFetcher>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_options(SessionOptions::default())
    }

    pub fn with_options(options: SessionOptions) -> Self {
        env_logger::try_init().ok(); // logs des tests

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let session = DashboardSession::new(tx, options);
        let dispatcher = Arc::new(session.dispatcher());
        Self {
            gateway: MockGateway::new(rx, dispatcher),
            session,
            fetchers: HashMap::new(),
        }
    }

    /// Enregistre un poller sans timer dont les fetchs sont pilotés par le test
    pub fn poll_manually(&mut self, class: ResourceClass) -> ControlledFetcher {
        let controlled = ControlledFetcher::new();
        self.session.start_polling(class, None, controlled.fetcher());
        self.fetchers.insert(class, controlled.clone());
        controlled
    }

    /// Poller des workloads via `get_workloads` sur la gateway simulée
    pub fn poll_workloads_over_socket(&self) {
        self.session
            .start_polling(ResourceClass::Workloads, None, self.session.workloads_fetcher());
    }

    pub fn fetcher(&self, class: ResourceClass) -> Option<&ControlledFetcher> {
        self.fetchers.get(&class)
    }

    pub fn refresh(&self, class: ResourceClass) -> Result<JoinHandle<CycleOutcome>> {
        Ok(self.session.refresh(class)?)
    }

    /// Laisse tourner les tâches déjà prêtes
    pub async fn settle(&self) {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    /// Listing typée à partir de fixtures JSON
    pub fn listing(class: ResourceClass, items: Vec<Value>) -> Result<Listing> {
        let items = Value::Array(items);
        Ok(match class {
            ResourceClass::Nodes => Listing::Nodes(serde_json::from_value(items)?),
            ResourceClass::Kernels => Listing::Kernels(serde_json::from_value(items)?),
            ResourceClass::Workloads => Listing::Workloads(serde_json::from_value(items)?),
            ResourceClass::Presets => Listing::Presets(serde_json::from_value(items)?),
        })
    }

    pub fn node_ids(&self) -> Vec<String> {
        sorted(self.session.store().list::<ClusterNode>().into_iter().map(|n| n.node_id))
    }

    pub fn kernel_ids(&self) -> Vec<String> {
        sorted(self.session.store().list::<DistributedKernel>().into_iter().map(|k| k.kernel_id))
    }

    pub fn workload_ids(&self) -> Vec<String> {
        sorted(self.session.store().list::<Workload>().into_iter().map(|w| w.id))
    }

    pub fn pending(&self, kind: CreationKind) -> u32 {
        self.session.reconciler().lock().pending(kind)
    }

    pub fn underflows(&self) -> usize {
        self.session.reconciler().lock().underflow_count()
    }

    pub fn get_stats(&self) -> Result<HarnessStats> {
        let frames = self.gateway.sent_frames()?;
        let mut op_counts = HashMap::new();
        for frame in &frames {
            *op_counts.entry(frame.op.clone()).or_insert(0) += 1;
        }
        Ok(HarnessStats {
            frames_sent: frames.len(),
            op_counts,
            pending_requests: self.session.correlation().pending_count(),
            store_revision: self.session.store().revision(),
        })
    }

    pub fn reset(&mut self) {
        self.gateway.clear();
        log::info!("test harness reset");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut ids: Vec<String> = ids.collect();
    ids.sort();
    ids
}

#[derive(Debug)]
pub struct HarnessStats {
    pub frames_sent: usize,
    pub op_counts: HashMap<String, usize>,
    pub pending_requests: usize,
    pub store_revision: u64,
}
