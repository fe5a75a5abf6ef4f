//! # exo_fork
//!
//! `fork()` côté utilisateur avec copy-on-write.
//!
//! Le noyau ne fournit que des primitives : création d'environnement,
//! allocation/mappage/démappage de pages, statut, point d'entrée de faute.
//! Cette bibliothèque duplique l'espace d'adressage en partageant les pages
//! physiques, et résout les fautes d'écriture CoW par une copie privée.
//!
//! - [`vpt`] : vue en lecture seule des tables de pages du processus
//! - [`pgfault`] : résolution des fautes CoW
//! - [`duppage`] : clonage d'une page vers l'enfant
//! - [`fork`] : orchestration (`Runtime::fork`, `Runtime::sfork`)

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod duppage;
pub mod fork;
pub mod kernel;
pub mod layout;
pub mod pgfault;
pub mod pte;
pub mod runtime;
pub mod stats;
pub mod vpt;

#[cfg(target_os = "none")]
pub mod raw;

#[cfg(not(target_os = "none"))]
pub mod sim;

// Réexportations
pub use duppage::{duppage, CloneKind};
pub use exo_types::{Env, EnvId, EnvStatus, ErrorCode, ExoError, Result, Upcall, VirtAddr};
pub use kernel::{Syscalls, Trap, UTrapframe, UserMemory};
pub use pgfault::pgfault;
pub use pte::{FaultCode, Pte, PteFlags};
pub use runtime::{PgfaultHandler, Runtime};
pub use stats::ForkStats;
pub use vpt::PageTableView;

/// Abandon du processus avec diagnostic.
///
/// Appelé là où l'erreur ne peut être rendue à personne : depuis le
/// gestionnaire de fautes, ou au milieu d'un fork à moitié construit.
#[cold]
#[track_caller]
pub(crate) fn fatal(op: &str, err: ExoError) -> ! {
    log::error!("{}: {}", op, err);
    panic!("{}: {}", op, err)
}
