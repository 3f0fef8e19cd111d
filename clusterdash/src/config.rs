use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

use crate::models::ResourceClass;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DashboardConfig {
    pub gateway: GatewayConf,
    pub polling: PollingConf,
    pub server: ServerConf,
    pub requests: RequestsConf,
    pub notifications: NotificationsConf,
    pub logs: LogsConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConf {
    pub http_base_url: String,
    pub websocket_url: String,
    pub reconnect_backoff_secs: u64,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConf {
    pub nodes_secs: u64,
    pub kernels_secs: u64,
    pub workloads_secs: u64,
    pub presets_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConf {
    pub bind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RequestsConf {
    /// Attente max d'une réponse corrélée ; `null` = attendre indéfiniment
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NotificationsConf {
    pub capacity: usize,
    pub ttl_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogsConf {
    pub buffer_lines: usize,
}

impl Default for GatewayConf {
    fn default() -> Self {
        Self {
            http_base_url: "http://localhost:8000".into(),
            websocket_url: "ws://localhost:8000/websocket/general".into(),
            reconnect_backoff_secs: 2,
            http_timeout_secs: 10,
        }
    }
}

impl Default for PollingConf {
    fn default() -> Self {
        Self { nodes_secs: 30, kernels_secs: 10, workloads_secs: 5, presets_secs: 300 }
    }
}

impl Default for ServerConf {
    fn default() -> Self {
        Self { bind: "127.0.0.1:8090".into() }
    }
}

impl Default for RequestsConf {
    fn default() -> Self {
        Self { timeout_secs: Some(30) }
    }
}

impl Default for NotificationsConf {
    fn default() -> Self {
        Self { capacity: 32, ttl_secs: 60 }
    }
}

impl Default for LogsConf {
    fn default() -> Self {
        Self { buffer_lines: 2000 }
    }
}

impl PollingConf {
    /// Intervalle de polling d'une classe ; 0 désactive le polling de cette classe
    pub fn interval(&self, class: ResourceClass) -> Option<Duration> {
        let secs = match class {
            ResourceClass::Nodes => self.nodes_secs,
            ResourceClass::Kernels => self.kernels_secs,
            ResourceClass::Workloads => self.workloads_secs,
            ResourceClass::Presets => self.presets_secs,
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

impl DashboardConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.requests.timeout_secs.map(Duration::from_secs)
    }

    /// Surcharges par variables d'environnement (après chargement du YAML)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CLUSTERDASH_GATEWAY_HTTP") {
            self.gateway.http_base_url = v;
        }
        if let Ok(v) = std::env::var("CLUSTERDASH_GATEWAY_WS") {
            self.gateway.websocket_url = v;
        }
        if let Ok(v) = std::env::var("CLUSTERDASH_BIND") {
            self.server.bind = v;
        }
    }
}

pub fn parse_config(txt: &str) -> DashboardConfig {
    if txt.trim().is_empty() {
        return DashboardConfig::default();
    }
    serde_yaml::from_str(txt).unwrap_or_else(|e| {
        warn!("invalid config, using defaults: {e}");
        DashboardConfig::default()
    })
}

pub async fn load_config_from(path: &Path) -> DashboardConfig {
    if path.exists() {
        let txt = fs::read_to_string(path).await.unwrap_or_default();
        parse_config(&txt)
    } else {
        warn!("no {} found, using default config", path.display());
        DashboardConfig::default()
    }
}

pub async fn load_config() -> DashboardConfig {
    let path = std::env::var("CLUSTERDASH_CONFIG").unwrap_or_else(|_| "clusterdash.yaml".into());
    let mut cfg = load_config_from(Path::new(&path)).await;
    cfg.apply_env_overrides();
    cfg
}
