//! # État local au processus
//!
//! [`Runtime`] porte ce qu'un processus garde dans sa propre mémoire :
//! la référence vers son descripteur (`thisenv`), l'unique emplacement du
//! gestionnaire de fautes et les compteurs. Comme toute la mémoire du
//! processus, cet état est dupliqué tel quel chez l'enfant au moment de
//! `exofork` ; `thisenv` doit donc y être rattaché à nouveau.

use crate::kernel::{Syscalls, Trap, UTrapframe, UserMemory};
use crate::layout::{xstack_page, PGSIZE};
use crate::pte::PteFlags;
use crate::stats::ForkStats;
use crate::fatal;
use exo_types::{envx, Env, ErrorCode, ExoError, VirtAddr};

/// Gestionnaire de fautes de page utilisateur
pub type PgfaultHandler<K> = fn(&mut Runtime<K>, &UTrapframe);

/// Droits de la pile d'exception : jamais CoW ni partagée
pub const PERM_XSTACK: PteFlags = PteFlags::USER
    .union(PteFlags::WRITABLE)
    .union(PteFlags::PRESENT);

#[derive(Clone)]
pub struct Runtime<K> {
    pub(crate) kernel: K,
    /// Index de notre descripteur dans `envs[]`
    pub(crate) thisenv: usize,
    pub(crate) pgfault_handler: Option<PgfaultHandler<K>>,
    pub(crate) stats: ForkStats,
}

impl<K: Syscalls + UserMemory> Runtime<K> {
    /// Initialisation au démarrage du programme
    pub fn new(kernel: K) -> Self {
        let thisenv = envx(kernel.getenvid());
        Self {
            kernel,
            thisenv,
            pgfault_handler: None,
            stats: ForkStats::new(),
        }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    /// Descripteur de l'environnement courant
    pub fn thisenv(&self) -> Env {
        self.kernel.env(self.thisenv)
    }

    pub fn stats(&self) -> &ForkStats {
        &self.stats
    }

    pub fn pgfault_handler(&self) -> Option<PgfaultHandler<K>> {
        self.pgfault_handler
    }

    /// Installe `handler` comme gestionnaire de fautes de page.
    ///
    /// Au premier appel, alloue la pile d'exception et déclare le point
    /// d'entrée au noyau. Les appels suivants ne font que remplacer le
    /// gestionnaire, sans appel système.
    pub fn set_pgfault_handler(&mut self, handler: PgfaultHandler<K>) {
        if self.pgfault_handler.is_none() {
            if let Err(e) = self.kernel.page_alloc(0, xstack_page(), PERM_XSTACK) {
                fatal("set_pgfault_handler: sys_page_alloc", e);
            }
            let entry = self.kernel.pgfault_upcall_entry();
            if let Err(e) = self.kernel.env_set_pgfault_upcall(0, entry) {
                fatal("set_pgfault_handler: sys_env_set_pgfault_upcall", e);
            }
            log::debug!(
                "[{:08x}] exception stack at {:#010x}",
                self.kernel.getenvid(),
                xstack_page()
            );
        }
        self.pgfault_handler = Some(handler);
    }

    /// Point d'entrée utilisateur d'une faute livrée par le noyau
    pub fn pgfault_upcall(&mut self, utf: &UTrapframe) {
        match self.pgfault_handler {
            Some(handler) => handler(self, utf),
            None => fatal(
                "pgfault_upcall",
                ExoError::with_message(ErrorCode::Fault, "no page fault handler registered")
                    .with_context(utf.fault_va.as_usize() as u64),
            ),
        }
    }

    /// Lecture utilisateur ; les fautes passent par le gestionnaire puis l'accès est rejoué
    pub fn read(&mut self, va: VirtAddr, buf: &mut [u8]) {
        loop {
            match self.kernel.load(va, buf) {
                Ok(()) => return,
                Err(trap) => self.deliver(trap),
            }
        }
    }

    /// Écriture utilisateur ; les fautes passent par le gestionnaire puis l'accès est rejoué
    pub fn write(&mut self, va: VirtAddr, data: &[u8]) {
        loop {
            match self.kernel.store(va, data) {
                Ok(()) => return,
                Err(trap) => self.deliver(trap),
            }
        }
    }

    pub fn read_byte(&mut self, va: VirtAddr) -> u8 {
        let mut byte = [0u8; 1];
        self.read(va, &mut byte);
        byte[0]
    }

    pub fn write_byte(&mut self, va: VirtAddr, value: u8) {
        self.write(va, &[value]);
    }

    /// Lit la page entière contenant `va`
    pub fn read_page(&mut self, va: VirtAddr) -> [u8; PGSIZE] {
        let mut page = [0u8; PGSIZE];
        self.read(va.page_floor(), &mut page);
        page
    }

    fn deliver(&mut self, trap: Trap) {
        match trap {
            Trap::PageFault(utf) => self.pgfault_upcall(&utf),
            Trap::Destroyed(utf) => fatal(
                "user fault",
                ExoError::with_message(ErrorCode::Fault, "environment destroyed by the kernel")
                    .with_context(utf.fault_va.as_usize() as u64),
            ),
        }
    }
}
