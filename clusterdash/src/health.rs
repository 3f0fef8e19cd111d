use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::models::ResourceClass;
use crate::reconciler::CreationKind;
use crate::session::DashboardSession;

#[derive(Debug, Serialize)]
pub struct DashboardHealth {
    pub uptime_seconds: u64,
    pub connection_status: String,
    pub reconnects: u32,
    pub pending_requests: usize,
    pub nodes_tracked: usize,
    pub kernels_tracked: usize,
    pub workloads_tracked: usize,
    pub presets_tracked: usize,
    pub kernels_creating: u32,
    pub workloads_registering: u32,
    pub counter_underflows: usize,
}

/// État de la connexion WebSocket partagée
#[derive(Clone)]
pub struct ConnectionHealth {
    start_time: Instant,
    reconnects: Arc<AtomicU32>,
    status: Arc<Mutex<String>>,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            reconnects: Arc::new(AtomicU32::new(0)),
            status: Arc::new(Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_connected(&self) {
        *self.status.lock() = "connected".to_string();
    }

    pub fn mark_disconnected(&self) {
        *self.status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        *self.status.lock() = "reconnecting".to_string();
    }

    pub fn status(&self) -> String {
        self.status.lock().clone()
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn get_health(&self, session: &DashboardSession) -> DashboardHealth {
        let snapshot = session.store().snapshot();
        let reconciler = session.reconciler().lock();
        DashboardHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            connection_status: self.status(),
            reconnects: self.reconnects(),
            pending_requests: session.correlation().pending_count(),
            nodes_tracked: snapshot.len_of(ResourceClass::Nodes),
            kernels_tracked: snapshot.len_of(ResourceClass::Kernels),
            workloads_tracked: snapshot.len_of(ResourceClass::Workloads),
            presets_tracked: snapshot.len_of(ResourceClass::Presets),
            kernels_creating: reconciler.pending(CreationKind::Kernel),
            workloads_registering: reconciler.pending(CreationKind::Workload),
            counter_underflows: reconciler.underflow_count(),
        }
    }
}
