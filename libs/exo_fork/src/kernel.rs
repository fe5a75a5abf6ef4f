//! Interface consommée auprès du noyau.
//!
//! [`Syscalls`] regroupe les appels système utilisés par fork ; [`UserMemory`]
//! représente les accès mémoire ordinaires du processus (chargements,
//! écritures), qui peuvent être rejetés par les tables de pages.

use crate::pte::{FaultCode, PteFlags};
use crate::vpt::PageTableView;
use exo_types::{Env, EnvId, EnvStatus, Result, Upcall, VirtAddr};

/// Trame empilée par le noyau sur la pile d'exception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct UTrapframe {
    pub fault_va: VirtAddr,
    pub err: FaultCode,
    pub eip: usize,
    pub eflags: u32,
    pub esp: usize,
}

impl UTrapframe {
    pub fn new(fault_va: VirtAddr, err: FaultCode) -> Self {
        UTrapframe {
            fault_va,
            err,
            eip: 0,
            eflags: 0,
            esp: 0,
        }
    }

    pub fn is_write(&self) -> bool {
        self.err.contains(FaultCode::WRITE)
    }
}

/// Accès rejeté par les tables de pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    /// Faute livrée au point d'entrée utilisateur ; l'accès doit être rejoué
    PageFault(UTrapframe),
    /// Pas de point d'entrée ou pile d'exception inutilisable : environnement détruit
    Destroyed(UTrapframe),
}

/// Appels système du noyau (ABI fixe).
///
/// `0` comme identifiant d'environnement désigne l'appelant.
pub trait Syscalls: PageTableView {
    fn getenvid(&self) -> EnvId;

    /// Lecture de `envs[envx]`
    fn env(&self, envx: usize) -> Env;

    /// Adresse du trampoline de faute de ce programme
    fn pgfault_upcall_entry(&self) -> Upcall;

    /// Crée un environnement non exécutable, copie du contexte de l'appelant.
    ///
    /// Renvoie l'identifiant de l'enfant à l'appelant, `0` dans l'enfant.
    fn exofork(&mut self) -> Result<EnvId>;

    /// Alloue une page zéro et la mappe en `va` dans `env`
    fn page_alloc(&mut self, env: EnvId, va: VirtAddr, perm: PteFlags) -> Result<()>;

    /// Mappe la page `src_va` de `src_env` en `dst_va` dans `dst_env`
    fn page_map(
        &mut self,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<()>;

    fn page_unmap(&mut self, env: EnvId, va: VirtAddr) -> Result<()>;

    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> Result<()>;

    fn env_set_pgfault_upcall(&mut self, env: EnvId, upcall: Upcall) -> Result<()>;
}

/// Accès mémoire du processus dans son propre espace d'adressage
pub trait UserMemory {
    fn load(&self, va: VirtAddr, buf: &mut [u8]) -> core::result::Result<(), Trap>;

    fn store(&mut self, va: VirtAddr, data: &[u8]) -> core::result::Result<(), Trap>;

    /// Copie une page entière de `src` vers `dst` (adresses alignées)
    fn copy_page(&mut self, dst: VirtAddr, src: VirtAddr) -> core::result::Result<(), Trap>;
}
