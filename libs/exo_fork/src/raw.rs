//! Liaison directe avec le noyau (cibles bare-metal).
//!
//! Les appels système sont fournis par la bibliothèque d'exécution
//! (`sys_*`, convention C) ; les tables de pages sont lues à travers la
//! projection récursive UVPT/UVPD ; `envs[]` est lu en UENVS.

use core::ptr;

use crate::kernel::{Syscalls, Trap, UserMemory};
use crate::layout::{PGSIZE, UENVS, UVPD, UVPT};
use crate::pte::{Pte, PteFlags};
use crate::vpt::{table_present, PageTableView};
use exo_types::{Env, EnvId, EnvStatus, ErrorCode, ExoError, Result, Upcall, VirtAddr, NENV};

extern "C" {
    fn sys_getenvid() -> i32;
    fn sys_exofork() -> i32;
    fn sys_page_alloc(env: i32, va: usize, perm: u32) -> i32;
    fn sys_page_map(src_env: i32, src_va: usize, dst_env: i32, dst_va: usize, perm: u32) -> i32;
    fn sys_page_unmap(env: i32, va: usize) -> i32;
    fn sys_env_set_status(env: i32, status: u32) -> i32;
    fn sys_env_set_pgfault_upcall(env: i32, upcall: usize) -> i32;

    /// Trampoline assembleur : sauvegarde, appel du gestionnaire, retour
    fn _pgfault_upcall();
}

/// Disposition de `struct Env` côté noyau
#[repr(C)]
#[allow(dead_code)]
struct RawEnv {
    env_tf: [u8; 68],
    env_link: usize,
    env_id: i32,
    env_parent_id: i32,
    env_type: u32,
    env_status: u32,
    env_runs: u32,
    env_cpunum: i32,
    env_pgdir: usize,
    env_pgfault_upcall: usize,
}

fn to_result(ret: i32) -> Result<i32> {
    if ret < 0 {
        Err(ExoError::new(ErrorCode::from_raw(ret)))
    } else {
        Ok(ret)
    }
}

fn status_from_raw(raw: u32) -> EnvStatus {
    match raw {
        1 => EnvStatus::Dying,
        2 => EnvStatus::Runnable,
        3 => EnvStatus::Running,
        4 => EnvStatus::NotRunnable,
        _ => EnvStatus::Free,
    }
}

fn status_to_raw(status: EnvStatus) -> u32 {
    match status {
        EnvStatus::Free => 0,
        EnvStatus::Dying => 1,
        EnvStatus::Runnable => 2,
        EnvStatus::Running => 3,
        EnvStatus::NotRunnable => 4,
    }
}

/// Noyau réel ; les fautes matérielles sont livrées par le trampoline
#[derive(Debug, Clone, Copy, Default)]
pub struct RawKernel;

impl PageTableView for RawKernel {
    fn pde(&self, pdx: usize) -> Pte {
        // SAFE: UVPD est mappé en lecture seule dans tout environnement
        unsafe { Pte::from_bits(ptr::read_volatile((UVPD as *const u32).add(pdx))) }
    }

    fn pte(&self, pn: usize) -> Pte {
        // Lire UVPT sous une table absente provoquerait une faute
        if !table_present(self, pn) {
            return Pte::empty();
        }
        // SAFE: la table couvrant `pn` est présente
        unsafe { Pte::from_bits(ptr::read_volatile((UVPT as *const u32).add(pn))) }
    }
}

impl Syscalls for RawKernel {
    fn getenvid(&self) -> EnvId {
        unsafe { sys_getenvid() }
    }

    fn env(&self, envx: usize) -> Env {
        assert!(envx < NENV);
        // SAFE: UENVS est mappé en lecture seule, `envx` est borné
        let raw = unsafe { &*(UENVS as *const RawEnv).add(envx) };
        Env {
            env_id: raw.env_id,
            env_parent_id: raw.env_parent_id,
            env_status: status_from_raw(raw.env_status),
            env_pgfault_upcall: (raw.env_pgfault_upcall != 0)
                .then(|| Upcall::new(raw.env_pgfault_upcall)),
        }
    }

    fn pgfault_upcall_entry(&self) -> Upcall {
        Upcall::new(_pgfault_upcall as usize)
    }

    fn exofork(&mut self) -> Result<EnvId> {
        to_result(unsafe { sys_exofork() })
    }

    fn page_alloc(&mut self, env: EnvId, va: VirtAddr, perm: PteFlags) -> Result<()> {
        to_result(unsafe { sys_page_alloc(env, va.as_usize(), perm.bits()) }).map(|_| ())
    }

    fn page_map(
        &mut self,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<()> {
        to_result(unsafe {
            sys_page_map(src_env, src_va.as_usize(), dst_env, dst_va.as_usize(), perm.bits())
        })
        .map(|_| ())
    }

    fn page_unmap(&mut self, env: EnvId, va: VirtAddr) -> Result<()> {
        to_result(unsafe { sys_page_unmap(env, va.as_usize()) }).map(|_| ())
    }

    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> Result<()> {
        to_result(unsafe { sys_env_set_status(env, status_to_raw(status)) }).map(|_| ())
    }

    fn env_set_pgfault_upcall(&mut self, env: EnvId, upcall: Upcall) -> Result<()> {
        to_result(unsafe { sys_env_set_pgfault_upcall(env, upcall.entry()) }).map(|_| ())
    }
}

impl UserMemory for RawKernel {
    fn load(&self, va: VirtAddr, buf: &mut [u8]) -> core::result::Result<(), Trap> {
        // SAFE: une faute éventuelle est traitée par le trampoline puis l'accès rejoué
        unsafe { ptr::copy_nonoverlapping(va.as_usize() as *const u8, buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    fn store(&mut self, va: VirtAddr, data: &[u8]) -> core::result::Result<(), Trap> {
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), va.as_usize() as *mut u8, data.len()) };
        Ok(())
    }

    fn copy_page(&mut self, dst: VirtAddr, src: VirtAddr) -> core::result::Result<(), Trap> {
        unsafe { ptr::copy(src.as_usize() as *const u8, dst.as_usize() as *mut u8, PGSIZE) };
        Ok(())
    }
}
