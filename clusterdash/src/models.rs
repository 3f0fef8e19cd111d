/**
 * MODELS - Entités du cluster telles que vues par le dashboard
 *
 * RÔLE : Nodes, kernels (avec leurs replicas), workloads et presets, plus les
 * payloads des actions de mutation envoyées à la gateway.
 *
 * FONCTIONNEMENT :
 * - Chaque entité est identifiée par un id stable (clé du store)
 * - Tous les champs hors id sont `#[serde(default)]` : un payload partiel
 *   (ex: `{"id": "w1", "name": "demo"}`) reste valide
 * - `Listing` = réponse autoritative complète pour une classe de ressource
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::store::Collections;

/// Classe de ressource suivie par le dashboard (une garde + un poller par classe)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    Nodes,
    Kernels,
    Workloads,
    Presets,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 4] = [
        ResourceClass::Nodes,
        ResourceClass::Kernels,
        ResourceClass::Workloads,
        ResourceClass::Presets,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Nodes => "nodes",
            ResourceClass::Kernels => "kernels",
            ResourceClass::Workloads => "workloads",
            ResourceClass::Presets => "presets",
        }
    }

    /// Parse le segment d'URL utilisé par l'API locale (`/refresh/{class}`)
    pub fn parse(s: &str) -> Option<Self> {
        ResourceClass::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    pub millicpus: f64,
    pub memory_mb: f64,
    pub gpus: f64,
    pub vram_gb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub node_id: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub node_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub age: String,
    #[serde(default)]
    pub pods: Vec<String>,
    #[serde(default)]
    pub allocated: ResourceSpec,
    #[serde(default)]
    pub capacity: ResourceSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelReplica {
    pub replica_id: i32,
    #[serde(default)]
    pub pod_id: String,
    #[serde(default)]
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedKernel {
    pub kernel_id: String,
    #[serde(default)]
    pub num_replicas: u32,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub aggregate_busy_status: String,
    #[serde(default)]
    pub replicas: Vec<KernelReplica>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadState {
    #[default]
    Ready,
    Running,
    Finished,
    Erred,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub workload_state: WorkloadState,
    #[serde(default)]
    pub workload_preset_name: String,
    #[serde(default)]
    pub num_active_sessions: u32,
    #[serde(default)]
    pub num_events_processed: u64,
    #[serde(default)]
    pub registered_time: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub debug_logging_enabled: bool,
    #[serde(default)]
    pub seed: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadPreset {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub preset_type: String,
}

/// Entité stockable dans le `ResourceStore`
///
/// Chaque type connaît sa classe et la collection qui le contient, ce qui
/// permet au store d'exposer un `upsert` générique sans fusion de champs.
pub trait Entity: Clone + Send + Sync + 'static {
    const CLASS: ResourceClass;

    fn entity_id(&self) -> &str;
    fn collection(c: &Collections) -> &HashMap<String, Self>;
    fn collection_mut(c: &mut Collections) -> &mut HashMap<String, Self>;
}

impl Entity for ClusterNode {
    const CLASS: ResourceClass = ResourceClass::Nodes;

    fn entity_id(&self) -> &str {
        &self.node_id
    }
    fn collection(c: &Collections) -> &HashMap<String, Self> {
        &c.nodes
    }
    fn collection_mut(c: &mut Collections) -> &mut HashMap<String, Self> {
        &mut c.nodes
    }
}

impl Entity for DistributedKernel {
    const CLASS: ResourceClass = ResourceClass::Kernels;

    fn entity_id(&self) -> &str {
        &self.kernel_id
    }
    fn collection(c: &Collections) -> &HashMap<String, Self> {
        &c.kernels
    }
    fn collection_mut(c: &mut Collections) -> &mut HashMap<String, Self> {
        &mut c.kernels
    }
}

impl Entity for Workload {
    const CLASS: ResourceClass = ResourceClass::Workloads;

    fn entity_id(&self) -> &str {
        &self.id
    }
    fn collection(c: &Collections) -> &HashMap<String, Self> {
        &c.workloads
    }
    fn collection_mut(c: &mut Collections) -> &mut HashMap<String, Self> {
        &mut c.workloads
    }
}

impl Entity for WorkloadPreset {
    const CLASS: ResourceClass = ResourceClass::Presets;

    fn entity_id(&self) -> &str {
        &self.key
    }
    fn collection(c: &Collections) -> &HashMap<String, Self> {
        &c.presets
    }
    fn collection_mut(c: &mut Collections) -> &mut HashMap<String, Self> {
        &mut c.presets
    }
}

/// Réponse autoritative complète pour une classe (résultat d'un cycle de polling)
#[derive(Debug, Clone, PartialEq)]
pub enum Listing {
    Nodes(Vec<ClusterNode>),
    Kernels(Vec<DistributedKernel>),
    Workloads(Vec<Workload>),
    Presets(Vec<WorkloadPreset>),
}

impl Listing {
    pub fn class(&self) -> ResourceClass {
        match self {
            Listing::Nodes(_) => ResourceClass::Nodes,
            Listing::Kernels(_) => ResourceClass::Kernels,
            Listing::Workloads(_) => ResourceClass::Workloads,
            Listing::Presets(_) => ResourceClass::Presets,
        }
    }

    pub fn ids(&self) -> Vec<String> {
        fn collect<E: Entity>(items: &[E]) -> Vec<String> {
            items.iter().map(|e| e.entity_id().to_string()).collect()
        }
        match self {
            Listing::Nodes(v) => collect(v),
            Listing::Kernels(v) => collect(v),
            Listing::Workloads(v) => collect(v),
            Listing::Presets(v) => collect(v),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Listing::Nodes(v) => v.len(),
            Listing::Kernels(v) => v.len(),
            Listing::Workloads(v) => v.len(),
            Listing::Presets(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Payloads des actions de mutation (client -> gateway)

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_id: Option<String>,
    #[serde(default)]
    pub resource_spec: ResourceSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadRegistration {
    pub workload_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_preset_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default)]
    pub debug_logging: bool,
    #[serde(default = "default_timescale")]
    pub timescale_adjustment_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeToggle {
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_timescale() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_workload_parses() {
        let w: Workload = serde_json::from_value(serde_json::json!({"id": "w1", "name": "demo"})).unwrap();
        assert_eq!(w.id, "w1");
        assert_eq!(w.name, "demo");
        assert_eq!(w.workload_state, WorkloadState::Ready);
        assert!(w.started_at.is_none());
    }

    #[test]
    fn test_node_defaults_to_enabled() {
        let n: ClusterNode = serde_json::from_value(serde_json::json!({"node_id": "n1"})).unwrap();
        assert!(n.enabled);
        assert_eq!(n.capacity, ResourceSpec::default());
    }

    #[test]
    fn test_resource_class_parse() {
        assert_eq!(ResourceClass::parse("kernels"), Some(ResourceClass::Kernels));
        assert_eq!(ResourceClass::parse("presets"), Some(ResourceClass::Presets));
        assert_eq!(ResourceClass::parse("pods"), None);
    }

    #[test]
    fn test_listing_ids() {
        let listing = Listing::Kernels(vec![
            DistributedKernel {
                kernel_id: "k1".into(),
                num_replicas: 3,
                status: "idle".into(),
                aggregate_busy_status: "idle".into(),
                replicas: vec![],
            },
        ]);
        assert_eq!(listing.class(), ResourceClass::Kernels);
        assert_eq!(listing.ids(), vec!["k1".to_string()]);
        assert!(!listing.is_empty());
    }
}
