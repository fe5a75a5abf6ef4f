//! # fork() copy-on-write
//!
//! 1. installer le gestionnaire de fautes (idempotent) ;
//! 2. `exofork` : créer l'enfant, non exécutable ;
//! 3. dans l'enfant : rattacher `thisenv` et rendre 0 ;
//! 4. dans le parent : cloner chaque page utilisateur de `UTEXT` à `USTACKTOP` ;
//! 5. allouer la pile d'exception de l'enfant (jamais clonée) ;
//! 6. copier le point d'entrée de faute du parent ;
//! 7. rendre l'enfant exécutable.
//!
//! Toute erreur après l'étape 2 abandonne le processus : l'enfant reste
//! non exécutable et n'est jamais observé à moitié construit.

use crate::duppage::duppage;
use crate::fatal;
use crate::kernel::{Syscalls, UserMemory};
use crate::layout::{pdx, pgaddr, pgnum, xstack_page, PGSIZE, USTACKTOP, UTEXT};
use crate::pgfault::pgfault;
use crate::runtime::{Runtime, PERM_XSTACK};
use crate::vpt::is_user_mapped;
use exo_types::{envx, EnvId, EnvStatus, ErrorCode, ExoError, Result};

impl<K: Syscalls + UserMemory> Runtime<K> {
    /// Duplique le processus courant.
    ///
    /// Renvoie l'identifiant de l'enfant au parent, 0 à l'enfant.
    pub fn fork(&mut self) -> EnvId {
        self.set_pgfault_handler(pgfault::<K>);

        let envid = match self.kernel.exofork() {
            Ok(envid) => envid,
            Err(e) => fatal("fork: sys_exofork", e),
        };

        if envid == 0 {
            // Nous sommes l'enfant : notre descripteur n'est pas celui du parent
            self.thisenv = envx(self.kernel.getenvid());
            log::debug!("[{:08x}] fork: child running", self.kernel.getenvid());
            return 0;
        }

        let parent = self.kernel.getenvid();
        log::debug!("[{:08x}] fork: cloning address space into [{:08x}]", parent, envid);
        let cloned = self.clone_address_space(envid);

        if let Err(e) = self.kernel.page_alloc(envid, xstack_page(), PERM_XSTACK) {
            fatal("fork: sys_page_alloc", e);
        }

        let upcall = match self.thisenv().env_pgfault_upcall {
            Some(upcall) => upcall,
            None => fatal(
                "fork",
                ExoError::with_message(ErrorCode::Invalid, "parent has no page fault upcall"),
            ),
        };
        if let Err(e) = self.kernel.env_set_pgfault_upcall(envid, upcall) {
            fatal("fork: sys_env_set_pgfault_upcall", e);
        }

        if let Err(e) = self.kernel.env_set_status(envid, EnvStatus::Runnable) {
            fatal("fork: sys_env_set_status", e);
        }

        self.stats.inc_forks();
        log::info!(
            "[{:08x}] fork: child [{:08x}] runnable ({} pages cloned)",
            parent,
            envid,
            cloned
        );
        envid
    }

    /// Fork à mémoire entièrement partagée : non supporté.
    ///
    /// Échoue immédiatement sans créer d'environnement.
    pub fn sfork(&mut self) -> Result<EnvId> {
        log::warn!("sfork: shared-memory fork is not implemented");
        Err(ExoError::with_message(ErrorCode::Invalid, "sfork not implemented"))
    }

    /// Parcourt la plage utilisateur ; une table de pages absente est sautée d'un bloc.
    ///
    /// Renvoie le nombre de pages clonées vers `envid`.
    fn clone_address_space(&mut self, envid: EnvId) -> usize {
        let mut cloned = 0;
        let mut va = UTEXT;
        while va < USTACKTOP {
            if !self.kernel.pde(pdx(va)).is_present() {
                va = pgaddr(pdx(va) + 1, 0);
                continue;
            }
            let pn = pgnum(va);
            if is_user_mapped(&self.kernel, pn) {
                match duppage(&mut self.kernel, envid, pn) {
                    Ok(kind) => self.stats.record_clone(kind),
                    Err(e) => fatal("fork: duppage", e),
                }
                cloned += 1;
            }
            va += PGSIZE;
        }
        cloned
    }
}
