/**
 * STALE-RESPONSE GUARD - "Dernier fetch émis gagne" par classe de ressource
 *
 * RÔLE : Empêcher un résultat de fetch périmé (polling chevauchant, refresh
 * manuel) d'écraser un état plus récent dans le store.
 *
 * FONCTIONNEMENT :
 * - Une génération monotone par classe
 * - `begin_cycle()` incrémente et capture la génération dans un ticket
 * - Au retour du fetch, `should_commit(ticket)` n'est vrai que si aucun
 *   cycle plus récent n'a été émis entre-temps
 * - `stop()` détache définitivement la classe (teardown de la vue)
 *
 * Aucune annulation réseau : la suppression est purement logique.
 */

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::models::ResourceClass;

/// Génération capturée au moment où un fetch est émis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTicket {
    pub class: ResourceClass,
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct ResourceGuard {
    generation: AtomicU64,
    detached: AtomicBool,
}

impl ResourceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ouvre un nouveau cycle ; tout ticket émis avant devient périmé
    pub fn begin_cycle(&self, class: ResourceClass) -> CycleTicket {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        CycleTicket { class, generation }
    }

    /// Invalide les cycles en vol sans en ouvrir un nouveau
    pub fn supersede(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn should_commit(&self, ticket: &CycleTicket) -> bool {
        !self.detached.load(Ordering::Acquire)
            && self.generation.load(Ordering::Acquire) == ticket.generation
    }

    /// Détache la classe : plus aucun résultat ne sera accepté, jamais
    pub fn stop(&self) {
        self.detached.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// Une garde par classe de ressource
#[derive(Debug, Default)]
pub struct GuardSet {
    nodes: ResourceGuard,
    kernels: ResourceGuard,
    workloads: ResourceGuard,
    presets: ResourceGuard,
}

impl GuardSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, class: ResourceClass) -> &ResourceGuard {
        match class {
            ResourceClass::Nodes => &self.nodes,
            ResourceClass::Kernels => &self.kernels,
            ResourceClass::Workloads => &self.workloads,
            ResourceClass::Presets => &self.presets,
        }
    }

    pub fn begin_cycle(&self, class: ResourceClass) -> CycleTicket {
        self.get(class).begin_cycle(class)
    }

    pub fn should_commit(&self, ticket: &CycleTicket) -> bool {
        self.get(ticket.class).should_commit(ticket)
    }

    pub fn stop_all(&self) {
        for class in ResourceClass::ALL {
            self.get(class).stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_ticket_commits() {
        let guard = ResourceGuard::new();
        let ticket = guard.begin_cycle(ResourceClass::Nodes);
        assert!(guard.should_commit(&ticket));
    }

    #[test]
    fn test_newer_cycle_supersedes_older() {
        let guard = ResourceGuard::new();
        let a = guard.begin_cycle(ResourceClass::Nodes);
        let b = guard.begin_cycle(ResourceClass::Nodes);
        assert!(!guard.should_commit(&a));
        assert!(guard.should_commit(&b));
    }

    #[test]
    fn test_supersede_without_new_cycle() {
        let guard = ResourceGuard::new();
        let a = guard.begin_cycle(ResourceClass::Kernels);
        guard.supersede();
        assert!(!guard.should_commit(&a));
    }

    #[test]
    fn test_stop_is_permanent() {
        let guard = ResourceGuard::new();
        let a = guard.begin_cycle(ResourceClass::Presets);
        guard.stop();
        assert!(!guard.should_commit(&a));

        let b = guard.begin_cycle(ResourceClass::Presets);
        assert!(!guard.should_commit(&b));
        assert!(guard.is_stopped());
    }

    #[test]
    fn test_classes_are_independent() {
        let guards = GuardSet::new();
        let nodes = guards.begin_cycle(ResourceClass::Nodes);
        let _kernels = guards.begin_cycle(ResourceClass::Kernels);
        guards.get(ResourceClass::Kernels).stop();

        assert!(guards.should_commit(&nodes));
        assert_eq!(guards.get(ResourceClass::Nodes).current_generation(), 1);
    }

    #[test]
    fn test_n_outstanding_cycles_only_last_wins() {
        let guards = GuardSet::new();
        let tickets: Vec<_> = (0..5).map(|_| guards.begin_cycle(ResourceClass::Workloads)).collect();
        let committable: Vec<bool> = tickets.iter().map(|t| guards.should_commit(t)).collect();
        assert_eq!(committable, vec![false, false, false, false, true]);
    }
}
