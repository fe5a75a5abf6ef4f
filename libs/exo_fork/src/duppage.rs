//! # Clonage d'une page vers l'enfant
//!
//! Pour chaque page utilisateur mappée, installe dans la cible le mappage
//! qui préserve l'invariant CoW :
//!
//! - `SHARE` : mappage identique (y compris `WRITABLE`) ;
//! - inscriptible ou déjà CoW : cible en `USER|PRESENT|COW`, puis la source
//!   remappée avec les mêmes droits restreints ;
//! - lecture seule : mappage identique, la source n'est pas touchée.
//!
//! L'ordre cible puis source est voulu. Entre les deux appels, la source est
//! encore inscriptible : une écriture du parent dans cette fenêtre modifie la
//! frame encore partagée et sera donc vue par l'enfant. L'enfant n'étant pas
//! exécutable à ce moment, aucune écriture de sa part ne peut s'y intercaler.

use crate::kernel::Syscalls;
use crate::pte::PteFlags;
use exo_types::{EnvId, Result, VirtAddr};

/// Droits d'un mappage copy-on-write
pub const PERM_COW: PteFlags = PteFlags::USER
    .union(PteFlags::PRESENT)
    .union(PteFlags::COW);

/// Nature du mappage installé chez l'enfant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneKind {
    Shared,
    CopyOnWrite,
    ReadOnly,
}

/// Mappe la page virtuelle `pn` de l'appelant dans `envid`, à la même adresse.
///
/// Échoue seulement si un appel de mappage échoue (ressources épuisées).
pub fn duppage<K: Syscalls + ?Sized>(kernel: &mut K, envid: EnvId, pn: usize) -> Result<CloneKind> {
    let pte = kernel.pte(pn);
    let va = VirtAddr::from_page_number(pn);
    let context = va.as_usize() as u64;

    if pte.is_shared() {
        kernel
            .page_map(0, va, envid, va, pte.syscall_perm())
            .map_err(|e| e.with_context(context))?;
        log::trace!("duppage: {:#010x} shared", va);
        Ok(CloneKind::Shared)
    } else if pte.is_writable() || pte.is_cow() {
        kernel
            .page_map(0, va, envid, va, PERM_COW)
            .map_err(|e| e.with_context(context))?;
        // Réaffirmé même si déjà CoW : la frame peut être partagée avec un
        // troisième processus depuis un fork précédent.
        kernel
            .page_map(0, va, 0, va, PERM_COW)
            .map_err(|e| e.with_context(context))?;
        log::trace!("duppage: {:#010x} copy-on-write", va);
        Ok(CloneKind::CopyOnWrite)
    } else {
        kernel
            .page_map(0, va, envid, va, pte.syscall_perm())
            .map_err(|e| e.with_context(context))?;
        log::trace!("duppage: {:#010x} read-only", va);
        Ok(CloneKind::ReadOnly)
    }
}
