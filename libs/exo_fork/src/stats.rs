//! Statistiques de fork et de copy-on-write (par processus).

use crate::duppage::CloneKind;

/// Compteurs locaux au processus.
///
/// Ils vivent dans la mémoire du processus : l'enfant hérite des valeurs
/// du parent au moment du fork, puis les deux divergent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForkStats {
    /// Nombre de fork terminés (côté parent)
    pub forks: usize,
    /// Pages mappées telles quelles car marquées SHARE
    pub pages_shared: usize,
    /// Pages passées en copy-on-write
    pub pages_cow: usize,
    /// Pages en lecture seule partagées sans CoW
    pub pages_readonly: usize,
    /// Fautes CoW résolues par copie privée
    pub faults_resolved: usize,
}

impl ForkStats {
    pub const fn new() -> Self {
        Self {
            forks: 0,
            pages_shared: 0,
            pages_cow: 0,
            pages_readonly: 0,
            faults_resolved: 0,
        }
    }

    pub fn inc_forks(&mut self) {
        self.forks += 1;
    }

    pub fn inc_faults_resolved(&mut self) {
        self.faults_resolved += 1;
    }

    /// Comptabilise une page clonée
    pub fn record_clone(&mut self, kind: CloneKind) {
        match kind {
            CloneKind::Shared => self.pages_shared += 1,
            CloneKind::CopyOnWrite => self.pages_cow += 1,
            CloneKind::ReadOnly => self.pages_readonly += 1,
        }
    }

    /// Total des pages clonées
    pub fn pages_cloned(&self) -> usize {
        self.pages_shared + self.pages_cow + self.pages_readonly
    }
}
