/**
 * RESOURCE STATE STORE - Collections canoniques du dashboard
 *
 * RÔLE : Nodes, kernels, workloads, presets indexés par id, mutés uniquement
 * par les handlers de complétion (polling, réponses corrélées, broadcasts).
 *
 * RÈGLE UNIQUE : une écriture (classe C, id I) insère ou remplace la valeur
 * entière. Jamais de fusion partielle de champs.
 *
 * Les lecteurs s'abonnent au numéro de révision (`subscribe`) et relisent un
 * snapshot à chaque changement.
 */

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::guard::{CycleTicket, GuardSet};
use crate::models::{ClusterNode, DistributedKernel, Entity, Listing, ResourceClass, Workload, WorkloadPreset};

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Collections {
    pub nodes: HashMap<String, ClusterNode>,
    pub kernels: HashMap<String, DistributedKernel>,
    pub workloads: HashMap<String, Workload>,
    pub presets: HashMap<String, WorkloadPreset>,
}

impl Collections {
    pub fn len_of(&self, class: ResourceClass) -> usize {
        match class {
            ResourceClass::Nodes => self.nodes.len(),
            ResourceClass::Kernels => self.kernels.len(),
            ResourceClass::Workloads => self.workloads.len(),
            ResourceClass::Presets => self.presets.len(),
        }
    }
}

pub struct ResourceStore {
    collections: Mutex<Collections>,
    revision: watch::Sender<u64>,
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            collections: Mutex::new(Collections::default()),
            revision,
        }
    }

    /// Insère ou remplace ; retourne true si une entrée existante a été remplacée
    pub fn upsert<E: Entity>(&self, entity: E) -> bool {
        let replaced = {
            let mut c = self.collections.lock();
            E::collection_mut(&mut c)
                .insert(entity.entity_id().to_string(), entity)
                .is_some()
        };
        self.bump();
        replaced
    }

    pub fn upsert_many<E: Entity>(&self, entities: Vec<E>) {
        if entities.is_empty() {
            return;
        }
        {
            let mut c = self.collections.lock();
            let map = E::collection_mut(&mut c);
            for e in entities {
                map.insert(e.entity_id().to_string(), e);
            }
        }
        self.bump();
    }

    /// Reconstruit la collection de la classe depuis une réponse autoritative
    pub fn replace_listing(&self, listing: Listing) {
        {
            let mut c = self.collections.lock();
            apply_listing(&mut c, listing);
        }
        self.bump();
    }

    /// Applique une réponse de fetch si et seulement si son cycle est encore le dernier émis
    ///
    /// La garde est consultée sous le verrou du store : un cycle qui passe la
    /// vérification écrit avant que tout commit plus récent ne puisse s'appliquer.
    pub fn commit(&self, guards: &GuardSet, ticket: &CycleTicket, listing: Listing) -> bool {
        {
            let mut c = self.collections.lock();
            if !guards.should_commit(ticket) {
                debug!(class = %ticket.class, generation = ticket.generation, "dropping superseded listing");
                return false;
            }
            apply_listing(&mut c, listing);
        }
        self.bump();
        true
    }

    pub fn get<E: Entity>(&self, id: &str) -> Option<E> {
        E::collection(&self.collections.lock()).get(id).cloned()
    }

    pub fn list<E: Entity>(&self) -> Vec<E> {
        E::collection(&self.collections.lock()).values().cloned().collect()
    }

    pub fn len<E: Entity>(&self) -> usize {
        E::collection(&self.collections.lock()).len()
    }

    pub fn snapshot(&self) -> Collections {
        self.collections.lock().clone()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}

fn apply_listing(c: &mut Collections, listing: Listing) {
    fn rebuild<E: Entity>(items: Vec<E>) -> HashMap<String, E> {
        items.into_iter().map(|e| (e.entity_id().to_string(), e)).collect()
    }
    match listing {
        Listing::Nodes(v) => c.nodes = rebuild(v),
        Listing::Kernels(v) => c.kernels = rebuild(v),
        Listing::Workloads(v) => c.workloads = rebuild(v),
        Listing::Presets(v) => c.presets = rebuild(v),
    }
}
