//! Noyau simulé pour l'exécution hôte (tests, outils).

mod kernel;
mod machine;

pub use kernel::{SimKernel, UPCALL_ENTRY};
pub use machine::{Machine, MachineConfig, SyscallRecord};
