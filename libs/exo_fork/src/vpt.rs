//! # Inspection des tables de pages
//!
//! Le noyau projette les tables de pages du processus courant en lecture
//! seule (UVPT/UVPD). Cette vue sert à interroger les flags d'une page sans
//! appel système ; toute modification passe par les appels de mappage.

use crate::layout::{pdx, NPTENTRIES};
use crate::pte::{Pte, PteFlags};
use exo_types::VirtAddr;

/// Vue en lecture seule, sans faute, des tables de pages du processus appelant
pub trait PageTableView {
    /// Entrée `pdx` du répertoire de pages
    fn pde(&self, pdx: usize) -> Pte;

    /// Entrée de la page virtuelle `pn`.
    ///
    /// Renvoie une entrée vide si la table de pages couvrant `pn` est absente.
    fn pte(&self, pn: usize) -> Pte;
}

/// La table de pages couvrant `pn` est-elle présente ?
pub fn table_present<V: PageTableView + ?Sized>(vpt: &V, pn: usize) -> bool {
    vpt.pde(pn / NPTENTRIES).is_present()
}

/// Flags de la page contenant `va`, si elle est présente
pub fn page_flags<V: PageTableView + ?Sized>(vpt: &V, va: VirtAddr) -> Option<PteFlags> {
    if !vpt.pde(pdx(va.as_usize())).is_present() {
        return None;
    }
    let pte = vpt.pte(va.page_number());
    pte.is_present().then(|| pte.flags())
}

/// Page présente et accessible en mode utilisateur
pub fn is_user_mapped<V: PageTableView + ?Sized>(vpt: &V, pn: usize) -> bool {
    if !table_present(vpt, pn) {
        return false;
    }
    let pte = vpt.pte(pn);
    pte.is_present() && pte.is_user()
}
