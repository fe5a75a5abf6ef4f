//! # Résolution des fautes copy-on-write
//!
//! Invoqué sur la pile d'exception, sans tas. Une faute en écriture sur une
//! page CoW est résolue par une copie privée :
//!
//! 1. allouer une page en `PFTEMP` ;
//! 2. y copier la page fautive ;
//! 3. la remapper à l'adresse fautive en `USER|WRITABLE|PRESENT` ;
//! 4. démapper `PFTEMP`.
//!
//! Au retour, le noyau rejoue l'accès, qui réussit. Tout autre type de faute
//! révèle un bug ailleurs : le processus est abandonné.

use crate::fatal;
use crate::kernel::{Syscalls, Trap, UTrapframe, UserMemory};
use crate::layout::PFTEMP;
use crate::pte::PteFlags;
use crate::runtime::Runtime;
use crate::vpt::page_flags;
use exo_types::{ErrorCode, ExoError, VirtAddr};

/// Droits de la copie privée
pub const PERM_PRIVATE: PteFlags = PteFlags::USER
    .union(PteFlags::WRITABLE)
    .union(PteFlags::PRESENT);

pub fn pgfault<K: Syscalls + UserMemory>(rt: &mut Runtime<K>, utf: &UTrapframe) {
    let addr = utf.fault_va;
    let context = addr.as_usize() as u64;

    if !utf.is_write() {
        fatal(
            "pgfault",
            ExoError::with_message(ErrorCode::Fault, "not a write fault").with_context(context),
        );
    }
    let cow = page_flags(&rt.kernel, addr).map_or(false, |flags| flags.contains(PteFlags::COW));
    if !cow {
        fatal(
            "pgfault",
            ExoError::with_message(ErrorCode::Fault, "page not copy-on-write").with_context(context),
        );
    }

    let page = addr.page_floor();
    let scratch = VirtAddr::new(PFTEMP);

    if let Err(e) = rt.kernel.page_alloc(0, scratch, PERM_PRIVATE) {
        fatal("pgfault: sys_page_alloc", e.with_context(context));
    }
    if let Err(Trap::PageFault(tf) | Trap::Destroyed(tf)) = rt.kernel.copy_page(scratch, page) {
        fatal(
            "pgfault: copy",
            ExoError::new(ErrorCode::Fault).with_context(tf.fault_va.as_usize() as u64),
        );
    }
    if let Err(e) = rt.kernel.page_map(0, scratch, 0, page, PERM_PRIVATE) {
        fatal("pgfault: sys_page_map", e.with_context(context));
    }
    if let Err(e) = rt.kernel.page_unmap(0, scratch) {
        fatal("pgfault: sys_page_unmap", e.with_context(context));
    }

    rt.stats.inc_faults_resolved();
    log::debug!(
        "[{:08x}] pgfault: private copy of {:#010x}",
        rt.kernel.getenvid(),
        page
    );
}
