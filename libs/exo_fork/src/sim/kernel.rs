//! Poignée d'appels système du noyau simulé, liée à un environnement.

use alloc::sync::Arc;
use spin::Mutex;

use super::machine::{Machine, MachineConfig};
use crate::kernel::{Syscalls, Trap, UserMemory};
use crate::pte::{Pte, PteFlags};
use crate::runtime::Runtime;
use crate::vpt::PageTableView;
use exo_types::{Env, EnvId, EnvStatus, Result, Upcall, VirtAddr};

/// Adresse rapportée pour le trampoline de faute des programmes simulés
pub const UPCALL_ENTRY: usize = 0x0080_0020;

/// Vue d'un environnement sur la machine simulée : ses appels système,
/// ses tables de pages et ses accès mémoire
#[derive(Clone)]
pub struct SimKernel {
    machine: Arc<Mutex<Machine>>,
    env: EnvId,
}

impl SimKernel {
    /// Démarre une machine et son premier environnement
    pub fn boot(config: MachineConfig) -> Result<Self> {
        let mut machine = Machine::new(config);
        let env = machine.create_env()?;
        Ok(SimKernel {
            machine: Arc::new(Mutex::new(machine)),
            env,
        })
    }

    pub fn env_id(&self) -> EnvId {
        self.env
    }

    pub fn machine(&self) -> Arc<Mutex<Machine>> {
        Arc::clone(&self.machine)
    }

    /// Accès noyau à la machine
    pub fn with_machine<R>(&self, f: impl FnOnce(&mut Machine) -> R) -> R {
        f(&mut self.machine.lock())
    }

    /// Ordonnance l'enfant `child`, qui doit être exécutable
    pub fn resume(&self, child: EnvId) -> Result<SimKernel> {
        self.machine.lock().schedule(child)?;
        Ok(SimKernel {
            machine: Arc::clone(&self.machine),
            env: child,
        })
    }
}

impl PageTableView for SimKernel {
    fn pde(&self, pdx: usize) -> Pte {
        self.machine.lock().pde_at(self.env, pdx)
    }

    fn pte(&self, pn: usize) -> Pte {
        self.machine
            .lock()
            .pte_of(self.env, VirtAddr::from_page_number(pn))
    }
}

impl Syscalls for SimKernel {
    fn getenvid(&self) -> EnvId {
        self.env
    }

    fn env(&self, envx: usize) -> Env {
        self.machine.lock().env_slot(envx)
    }

    fn pgfault_upcall_entry(&self) -> Upcall {
        Upcall::new(UPCALL_ENTRY)
    }

    fn exofork(&mut self) -> Result<EnvId> {
        self.machine.lock().sys_exofork(self.env)
    }

    fn page_alloc(&mut self, env: EnvId, va: VirtAddr, perm: PteFlags) -> Result<()> {
        self.machine.lock().sys_page_alloc(self.env, env, va, perm)
    }

    fn page_map(
        &mut self,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<()> {
        self.machine
            .lock()
            .sys_page_map(self.env, src_env, src_va, dst_env, dst_va, perm)
    }

    fn page_unmap(&mut self, env: EnvId, va: VirtAddr) -> Result<()> {
        self.machine.lock().sys_page_unmap(self.env, env, va)
    }

    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> Result<()> {
        self.machine.lock().sys_env_set_status(self.env, env, status)
    }

    fn env_set_pgfault_upcall(&mut self, env: EnvId, upcall: Upcall) -> Result<()> {
        self.machine
            .lock()
            .sys_env_set_pgfault_upcall(self.env, env, upcall)
    }
}

impl UserMemory for SimKernel {
    fn load(&self, va: VirtAddr, buf: &mut [u8]) -> core::result::Result<(), Trap> {
        self.machine.lock().user_load(self.env, va, buf)
    }

    fn store(&mut self, va: VirtAddr, data: &[u8]) -> core::result::Result<(), Trap> {
        self.machine.lock().user_store(self.env, va, data)
    }

    fn copy_page(&mut self, dst: VirtAddr, src: VirtAddr) -> core::result::Result<(), Trap> {
        self.machine.lock().user_copy_page(self.env, dst, src)
    }
}

impl Runtime<SimKernel> {
    /// Runtime de l'enfant `child`, une fois exécutable.
    ///
    /// La mémoire de l'enfant est celle du parent : son état local est donc
    /// celui de ce runtime, lié à la poignée de l'enfant. Sa première
    /// instruction est le retour d'`exofork`, d'où l'appel à `fork()` qui
    /// y rend 0 et rattache `thisenv`.
    pub fn resume_child(&self, child: EnvId) -> Result<Self> {
        let kernel = self.kernel.resume(child)?;
        Ok(Runtime {
            kernel,
            thisenv: self.thisenv,
            pgfault_handler: self.pgfault_handler,
            stats: self.stats.clone(),
        })
    }
}
