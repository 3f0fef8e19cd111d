/**
 * OPTIMISTIC COUNTER RECONCILER - Créations en cours vs état autoritatif
 *
 * RÔLE : Compter les créations émises (kernels, workloads) avant toute
 * confirmation réseau, puis retirer un slot à chaque nouvel id observé.
 *
 * FONCTIONNEMENT :
 * - Machine à états par type : `Settled` | `Pending(n)`
 * - `increment` à l'émission, `decrement_on_sighting` par id jamais vu
 * - Sous-dépassement : clamp à `Settled` + warning + diagnostic enregistré
 * - L'ensemble des ids connus ne fait que croître (ids supposés non réutilisés)
 */

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use time::OffsetDateTime;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationKind {
    Kernel,
    Workload,
}

impl fmt::Display for CreationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreationKind::Kernel => f.write_str("kernel"),
            CreationKind::Workload => f.write_str("workload"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CreationState {
    #[default]
    Settled,
    Pending(u32),
}

impl CreationState {
    pub fn count(&self) -> u32 {
        match self {
            CreationState::Settled => 0,
            CreationState::Pending(n) => *n,
        }
    }
}

/// Résultat d'une tentative de décrément
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retirement {
    Retired,
    Clamped,
}

/// Trace d'un décrément qui aurait rendu le compteur négatif
#[derive(Debug, Clone, Serialize)]
pub struct UnderflowDiagnostic {
    pub kind: CreationKind,
    pub id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub new_ids: usize,
    pub retired: u32,
    pub clamped: u32,
}

#[derive(Debug)]
pub struct CreationTracker {
    kind: CreationKind,
    state: CreationState,
    known_ids: HashSet<String>,
    diagnostics: Vec<UnderflowDiagnostic>,
}

impl CreationTracker {
    pub fn new(kind: CreationKind) -> Self {
        Self {
            kind,
            state: CreationState::Settled,
            known_ids: HashSet::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn state(&self) -> CreationState {
        self.state
    }

    pub fn pending(&self) -> u32 {
        self.state.count()
    }

    pub fn diagnostics(&self) -> &[UnderflowDiagnostic] {
        &self.diagnostics
    }

    pub fn increment(&mut self) -> u32 {
        self.state = CreationState::Pending(self.state.count() + 1);
        self.state.count()
    }

    pub fn decrement_on_sighting(&mut self, id: Option<&str>) -> Retirement {
        match self.state {
            CreationState::Pending(1) => {
                self.state = CreationState::Settled;
                Retirement::Retired
            }
            CreationState::Pending(n) => {
                self.state = CreationState::Pending(n - 1);
                Retirement::Retired
            }
            CreationState::Settled => {
                warn!(kind = %self.kind, id = ?id, "pending-creation counter would go negative, clamping to zero");
                self.diagnostics.push(UnderflowDiagnostic {
                    kind: self.kind,
                    id: id.map(str::to_string),
                    at: OffsetDateTime::now_utc(),
                });
                Retirement::Clamped
            }
        }
    }

    /// Retire un slot dont la création a échoué définitivement (aucune entité n'apparaîtra)
    pub fn abandon(&mut self) -> Retirement {
        self.decrement_on_sighting(None)
    }

    pub fn observe_listing<I, S>(&mut self, ids: I) -> ReconcileReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut report = ReconcileReport::default();
        for id in ids {
            let id = id.into();
            if self.known_ids.contains(&id) {
                continue;
            }
            report.new_ids += 1;
            match self.decrement_on_sighting(Some(&id)) {
                Retirement::Retired => report.retired += 1,
                Retirement::Clamped => report.clamped += 1,
            }
            self.known_ids.insert(id);
        }
        if report.new_ids > 0 {
            debug!(kind = %self.kind, new = report.new_ids, pending = self.pending(), "reconciled listing");
        }
        report
    }
}

/// Un tracker par type de création
#[derive(Debug)]
pub struct Reconciler {
    trackers: HashMap<CreationKind, CreationTracker>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        let trackers = [CreationKind::Kernel, CreationKind::Workload]
            .into_iter()
            .map(|k| (k, CreationTracker::new(k)))
            .collect();
        Self { trackers }
    }

    pub fn tracker(&self, kind: CreationKind) -> &CreationTracker {
        &self.trackers[&kind]
    }

    pub fn tracker_mut(&mut self, kind: CreationKind) -> &mut CreationTracker {
        self.trackers.entry(kind).or_insert_with(|| CreationTracker::new(kind))
    }

    pub fn increment(&mut self, kind: CreationKind) -> u32 {
        self.tracker_mut(kind).increment()
    }

    pub fn abandon(&mut self, kind: CreationKind) -> Retirement {
        self.tracker_mut(kind).abandon()
    }

    pub fn pending(&self, kind: CreationKind) -> u32 {
        self.tracker(kind).pending()
    }

    /// Listing autoritative (polling), y compris la toute première
    pub fn observe_authoritative(&mut self, kind: CreationKind, ids: Vec<String>) -> ReconcileReport {
        self.tracker_mut(kind).observe_listing(ids)
    }

    pub fn underflow_count(&self) -> usize {
        self.trackers.values().map(|t| t.diagnostics().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_reconciliation() {
        let mut t = CreationTracker::new(CreationKind::Kernel);
        t.increment();
        t.increment();
        t.increment();
        assert_eq!(t.pending(), 3);

        let report = t.observe_listing(["k1", "k2"]);
        assert_eq!(report.retired, 2);
        assert_eq!(t.pending(), 1);
        assert!(t.diagnostics().is_empty());
    }

    #[test]
    fn test_underflow_clamps_and_records() {
        let mut t = CreationTracker::new(CreationKind::Kernel);
        let report = t.observe_listing(["k1", "k2"]);

        assert_eq!(t.pending(), 0);
        assert_eq!(t.state(), CreationState::Settled);
        assert_eq!(report.clamped, 2);
        assert_eq!(t.diagnostics().len(), 2);
        assert_eq!(t.diagnostics()[0].id.as_deref(), Some("k1"));
    }

    #[test]
    fn test_known_ids_are_not_counted_twice() {
        let mut t = CreationTracker::new(CreationKind::Workload);
        t.increment();
        t.increment();
        t.observe_listing(["w1"]);
        let again = t.observe_listing(["w1"]);

        assert_eq!(again.new_ids, 0);
        assert_eq!(t.pending(), 1);
    }

    #[test]
    fn test_known_ids_survive_disappearance() {
        let mut t = CreationTracker::new(CreationKind::Kernel);
        t.increment();
        t.observe_listing(["k1"]);
        t.observe_listing(Vec::<String>::new());
        t.increment();
        // k1 revient : déjà connu, le slot reste en attente
        t.observe_listing(["k1"]);
        assert_eq!(t.pending(), 1);
    }

    #[test]
    fn test_abandon_retires_slot() {
        let mut t = CreationTracker::new(CreationKind::Kernel);
        t.increment();
        assert_eq!(t.abandon(), Retirement::Retired);
        assert_eq!(t.abandon(), Retirement::Clamped);
        assert_eq!(t.pending(), 0);
        assert_eq!(t.diagnostics().len(), 1);
    }

    #[test]
    fn test_first_authoritative_listing_is_not_exempt() {
        let mut r = Reconciler::new();
        let first = r.observe_authoritative(CreationKind::Kernel, vec!["k1".into(), "k2".into()]);
        assert_eq!(first.clamped, 2);
        assert_eq!(r.pending(CreationKind::Kernel), 0);
        assert_eq!(r.underflow_count(), 2);

        // ids désormais connus : plus de diagnostic à la listing suivante
        r.increment(CreationKind::Kernel);
        let next = r.observe_authoritative(CreationKind::Kernel, vec!["k1".into(), "k2".into(), "k3".into()]);
        assert_eq!(next.retired, 1);
        assert_eq!(r.underflow_count(), 2);
    }

    #[test]
    fn test_first_listing_reconciles_when_creations_pending() {
        let mut r = Reconciler::new();
        r.increment(CreationKind::Kernel);
        let report = r.observe_authoritative(CreationKind::Kernel, vec!["k1".into()]);
        assert_eq!(report.retired, 1);
        assert_eq!(r.pending(CreationKind::Kernel), 0);
    }
}
