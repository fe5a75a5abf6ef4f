//! # Noyau simulé
//!
//! Modèle hôte des primitives consommées par fork : frames physiques
//! comptées par références, table des environnements, tables de pages à deux
//! niveaux, contrôles de permission des appels système, et livraison des
//! fautes sur la pile d'exception.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use crate::kernel::{Trap, UTrapframe};
use crate::layout::{pdx, ptx, xstack_page, PGSIZE, UTOP};
use crate::pte::{FaultCode, Pte, PteFlags};
use exo_types::{
    envx, Env, EnvId, EnvStatus, ErrorCode, ExoError, PhysAddr, Result, Upcall, VirtAddr,
    ENVGENSHIFT, NENV,
};

/// Configuration du noyau simulé
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// Nombre de frames physiques disponibles
    pub nframes: usize,
    /// Taille de la table des environnements (puissance de 2, au plus `NENV`)
    pub nenv: usize,
}

impl MachineConfig {
    /// Configuration par défaut : 4 MiB de mémoire physique, table complète
    pub fn default_config() -> Self {
        MachineConfig {
            nframes: 1024,
            nenv: NENV,
        }
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Appel système réussi, tel qu'enregistré par la trace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallRecord {
    Exofork {
        parent: EnvId,
        child: EnvId,
    },
    PageAlloc {
        env: EnvId,
        va: VirtAddr,
        perm: PteFlags,
    },
    PageMap {
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    },
    PageUnmap {
        env: EnvId,
        va: VirtAddr,
    },
    SetStatus {
        env: EnvId,
        status: EnvStatus,
    },
    SetPgfaultUpcall {
        env: EnvId,
        upcall: Upcall,
    },
}

struct Frame {
    data: Box<[u8]>,
    refs: usize,
}

struct PageTable {
    frame: usize,
    entries: BTreeMap<usize, Pte>,
}

struct PageDirectory {
    frame: usize,
    tables: BTreeMap<usize, PageTable>,
}

#[derive(Default)]
struct EnvSlot {
    env: Env,
    pgdir: Option<PageDirectory>,
    /// Le contexte sauvegardé reprend au retour d'`exofork` avec la valeur 0
    resume_in_exofork: bool,
}

pub struct Machine {
    /// Index = numéro de frame ; la frame 0 n'est jamais allouée
    frames: Vec<Option<Frame>>,
    free_frames: Vec<usize>,
    frame_budget: Option<usize>,
    envs: Vec<EnvSlot>,
    trace: Option<Vec<SyscallRecord>>,
}

fn perm_is_valid(perm: PteFlags) -> bool {
    perm.contains(PteFlags::USER | PteFlags::PRESENT) && PteFlags::SYSCALL.contains(perm)
}

fn check_user_page(va: VirtAddr) -> Result<()> {
    if va.as_usize() >= UTOP || !va.is_page_aligned() {
        return Err(ExoError::with_message(ErrorCode::Invalid, "bad user page address")
            .with_context(va.as_usize() as u64));
    }
    Ok(())
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        assert!(config.nenv.is_power_of_two() && config.nenv <= NENV);
        let mut frames = Vec::with_capacity(config.nframes + 1);
        frames.resize_with(config.nframes + 1, || None);
        Machine {
            frames,
            // Pile : les plus petits numéros sortent en premier
            free_frames: (1..=config.nframes).rev().collect(),
            frame_budget: None,
            envs: (0..config.nenv).map(|_| EnvSlot::default()).collect(),
            trace: None,
        }
    }

    // ── Frames physiques ────────────────────────────────────────────────────

    fn alloc_frame(&mut self) -> Result<usize> {
        if self.frame_budget == Some(0) {
            return Err(ExoError::new(ErrorCode::NoMem));
        }
        let frame = self.free_frames.pop().ok_or(ExoError::new(ErrorCode::NoMem))?;
        if let Some(budget) = self.frame_budget.as_mut() {
            *budget -= 1;
        }
        self.frames[frame] = Some(Frame {
            data: vec![0u8; PGSIZE].into_boxed_slice(),
            refs: 0,
        });
        Ok(frame)
    }

    fn incref(&mut self, frame: usize) {
        if let Some(f) = self.frames[frame].as_mut() {
            f.refs += 1;
        }
    }

    fn decref(&mut self, frame: usize) {
        let free = match self.frames[frame].as_mut() {
            Some(f) => {
                f.refs -= 1;
                f.refs == 0
            }
            None => false,
        };
        if free {
            self.frames[frame] = None;
            self.free_frames.push(frame);
        }
    }

    fn frame_data(&self, frame: usize) -> &[u8] {
        match self.frames[frame].as_ref() {
            Some(f) => &f.data,
            None => panic!("sim: frame {} is not allocated", frame),
        }
    }

    fn frame_data_mut(&mut self, frame: usize) -> &mut [u8] {
        match self.frames[frame].as_mut() {
            Some(f) => &mut f.data,
            None => panic!("sim: frame {} is not allocated", frame),
        }
    }

    /// Nombre de frames encore libres
    pub fn free_frame_count(&self) -> usize {
        self.free_frames.len()
    }

    /// Nombre de mappages référençant la frame `pa`
    pub fn frame_refs(&self, pa: PhysAddr) -> usize {
        self.frames
            .get(pa.frame_number())
            .and_then(|f| f.as_ref())
            .map_or(0, |f| f.refs)
    }

    /// Limite le nombre d'allocations de frames à venir (`None` : illimité)
    pub fn set_frame_budget(&mut self, budget: Option<usize>) {
        self.frame_budget = budget;
    }

    // ── Trace ───────────────────────────────────────────────────────────────

    pub fn enable_trace(&mut self) {
        self.trace = Some(Vec::new());
    }

    /// Vide la trace enregistrée
    pub fn take_trace(&mut self) -> Vec<SyscallRecord> {
        self.trace.as_mut().map(core::mem::take).unwrap_or_default()
    }

    fn record(&mut self, record: SyscallRecord) {
        if let Some(trace) = self.trace.as_mut() {
            trace.push(record);
        }
    }

    // ── Environnements ──────────────────────────────────────────────────────

    fn alloc_env(&mut self, parent: EnvId) -> Result<EnvId> {
        let idx = self
            .envs
            .iter()
            .position(|slot| slot.env.env_status == EnvStatus::Free)
            .ok_or(ExoError::new(ErrorCode::NoFreeEnv))?;
        let pgdir = self.alloc_frame()?;
        self.incref(pgdir);

        let mut generation = (self.envs[idx].env.env_id + (1 << ENVGENSHIFT)) & !(NENV as EnvId - 1);
        if generation <= 0 {
            generation = 1 << ENVGENSHIFT;
        }
        let id = generation | idx as EnvId;

        self.envs[idx] = EnvSlot {
            env: Env {
                env_id: id,
                env_parent_id: parent,
                env_status: EnvStatus::NotRunnable,
                env_pgfault_upcall: None,
            },
            pgdir: Some(PageDirectory {
                frame: pgdir,
                tables: BTreeMap::new(),
            }),
            resume_in_exofork: false,
        };
        Ok(id)
    }

    /// Crée l'environnement initial, en cours d'exécution
    pub fn create_env(&mut self) -> Result<EnvId> {
        let id = self.alloc_env(0)?;
        self.envs[envx(id)].env.env_status = EnvStatus::Running;
        log::debug!("sim: created env [{:08x}]", id);
        Ok(id)
    }

    /// Détruit un environnement et libère toute sa mémoire
    pub fn destroy_env(&mut self, id: EnvId) -> Result<()> {
        let idx = self.lookup(id)?;
        if let Some(pgdir) = self.envs[idx].pgdir.take() {
            for table in pgdir.tables.into_values() {
                for pte in table.entries.into_values() {
                    self.decref(pte.addr().frame_number());
                }
                self.decref(table.frame);
            }
            self.decref(pgdir.frame);
        }
        let slot = &mut self.envs[idx];
        slot.env.env_status = EnvStatus::Free;
        slot.env.env_pgfault_upcall = None;
        slot.resume_in_exofork = false;
        log::debug!("sim: destroyed env [{:08x}]", id);
        Ok(())
    }

    fn lookup(&self, id: EnvId) -> Result<usize> {
        let idx = envx(id);
        match self.envs.get(idx) {
            Some(slot) if slot.env.env_status != EnvStatus::Free && slot.env.env_id == id => Ok(idx),
            _ => Err(ExoError::new(ErrorCode::BadEnv).with_context(id as u64)),
        }
    }

    /// Résout `id` pour l'appelant `cur` : lui-même ou l'un de ses enfants
    fn envid2env(&self, cur: EnvId, id: EnvId) -> Result<usize> {
        if id == 0 {
            return self.lookup(cur);
        }
        let idx = self.lookup(id)?;
        let env = &self.envs[idx].env;
        if env.env_id != cur && env.env_parent_id != cur {
            return Err(ExoError::new(ErrorCode::BadEnv).with_context(id as u64));
        }
        Ok(idx)
    }

    /// Descripteur de l'environnement `id`
    pub fn env_by_id(&self, id: EnvId) -> Option<Env> {
        self.lookup(id).ok().map(|idx| self.envs[idx].env)
    }

    pub fn env_status(&self, id: EnvId) -> Option<EnvStatus> {
        self.env_by_id(id).map(|env| env.env_status)
    }

    pub(crate) fn env_slot(&self, idx: usize) -> Env {
        self.envs.get(idx).map(|slot| slot.env).unwrap_or_default()
    }

    /// Passe un enfant exécutable à l'état « en cours »
    pub(crate) fn schedule(&mut self, id: EnvId) -> Result<()> {
        let idx = self.lookup(id)?;
        let env = &mut self.envs[idx].env;
        if env.env_status != EnvStatus::Runnable {
            return Err(ExoError::with_message(ErrorCode::BadEnv, "environment is not runnable")
                .with_context(id as u64));
        }
        env.env_status = EnvStatus::Running;
        Ok(())
    }

    // ── Tables de pages ─────────────────────────────────────────────────────

    fn lookup_pte(&self, idx: usize, va: VirtAddr) -> Pte {
        let va = va.as_usize();
        self.envs[idx]
            .pgdir
            .as_ref()
            .and_then(|pgdir| pgdir.tables.get(&pdx(va)))
            .and_then(|table| table.entries.get(&ptx(va)))
            .copied()
            .unwrap_or_default()
    }

    /// Entrée de table de pages de `va` dans l'environnement `id`
    pub fn pte_of(&self, id: EnvId, va: VirtAddr) -> Pte {
        match self.lookup(id) {
            Ok(idx) => self.lookup_pte(idx, va),
            Err(_) => Pte::empty(),
        }
    }

    pub(crate) fn pde_at(&self, id: EnvId, pdx: usize) -> Pte {
        let Ok(idx) = self.lookup(id) else {
            return Pte::empty();
        };
        self.envs[idx]
            .pgdir
            .as_ref()
            .and_then(|pgdir| pgdir.tables.get(&pdx))
            .map(|table| {
                Pte::new(
                    PhysAddr::from_frame_number(table.frame),
                    PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER,
                )
            })
            .unwrap_or_default()
    }

    /// Installe `frame` en `va`, en créant la table de pages si besoin
    fn page_insert(&mut self, idx: usize, frame: usize, va: VirtAddr, perm: PteFlags) -> Result<()> {
        let va = va.as_usize();
        let needs_table = self.envs[idx]
            .pgdir
            .as_ref()
            .map_or(true, |pgdir| !pgdir.tables.contains_key(&pdx(va)));
        if needs_table {
            let table_frame = self.alloc_frame()?;
            self.incref(table_frame);
            let pgdir = self.envs[idx]
                .pgdir
                .as_mut()
                .ok_or(ExoError::new(ErrorCode::BadEnv))?;
            pgdir.tables.insert(
                pdx(va),
                PageTable {
                    frame: table_frame,
                    entries: BTreeMap::new(),
                },
            );
        }

        // Référence prise avant de libérer l'ancienne : remapper la même frame est sûr
        self.incref(frame);
        let pte = Pte::new(PhysAddr::from_frame_number(frame), perm | PteFlags::PRESENT);
        let old = self.envs[idx]
            .pgdir
            .as_mut()
            .and_then(|pgdir| pgdir.tables.get_mut(&pdx(va)))
            .and_then(|table| table.entries.insert(ptx(va), pte));
        if let Some(old) = old {
            self.decref(old.addr().frame_number());
        }
        Ok(())
    }

    fn page_remove(&mut self, idx: usize, va: VirtAddr) {
        let va = va.as_usize();
        let old = self.envs[idx]
            .pgdir
            .as_mut()
            .and_then(|pgdir| pgdir.tables.get_mut(&pdx(va)))
            .and_then(|table| table.entries.remove(&ptx(va)));
        if let Some(old) = old {
            self.decref(old.addr().frame_number());
        }
    }

    // ── Appels système, exécutés pour le compte de `cur` ────────────────────

    pub(crate) fn sys_exofork(&mut self, cur: EnvId) -> Result<EnvId> {
        let cur_idx = self.lookup(cur)?;
        if self.envs[cur_idx].resume_in_exofork {
            self.envs[cur_idx].resume_in_exofork = false;
            return Ok(0);
        }
        let child = self.alloc_env(cur)?;
        self.envs[envx(child)].resume_in_exofork = true;
        self.record(SyscallRecord::Exofork { parent: cur, child });
        Ok(child)
    }

    pub(crate) fn sys_page_alloc(&mut self, cur: EnvId, env: EnvId, va: VirtAddr, perm: PteFlags) -> Result<()> {
        check_user_page(va)?;
        if !perm_is_valid(perm) {
            return Err(ExoError::with_message(ErrorCode::Invalid, "bad permissions"));
        }
        let idx = self.envid2env(cur, env)?;
        let frame = self.alloc_frame()?;
        if let Err(e) = self.page_insert(idx, frame, va, perm) {
            // Frame jamais référencée : la rendre directement
            self.frames[frame] = None;
            self.free_frames.push(frame);
            return Err(e);
        }
        self.record(SyscallRecord::PageAlloc {
            env: self.envs[idx].env.env_id,
            va,
            perm,
        });
        Ok(())
    }

    pub(crate) fn sys_page_map(
        &mut self,
        cur: EnvId,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<()> {
        check_user_page(src_va)?;
        check_user_page(dst_va)?;
        let src_idx = self.envid2env(cur, src_env)?;
        let dst_idx = self.envid2env(cur, dst_env)?;
        if !perm_is_valid(perm) {
            return Err(ExoError::with_message(ErrorCode::Invalid, "bad permissions"));
        }
        let src = self.lookup_pte(src_idx, src_va);
        if !src.is_present() {
            return Err(ExoError::with_message(ErrorCode::Invalid, "source page not mapped")
                .with_context(src_va.as_usize() as u64));
        }
        if perm.contains(PteFlags::WRITABLE) && !src.is_writable() {
            return Err(ExoError::with_message(ErrorCode::Invalid, "writable mapping of a read-only page")
                .with_context(src_va.as_usize() as u64));
        }
        self.page_insert(dst_idx, src.addr().frame_number(), dst_va, perm)?;
        self.record(SyscallRecord::PageMap {
            src_env: self.envs[src_idx].env.env_id,
            src_va,
            dst_env: self.envs[dst_idx].env.env_id,
            dst_va,
            perm,
        });
        Ok(())
    }

    pub(crate) fn sys_page_unmap(&mut self, cur: EnvId, env: EnvId, va: VirtAddr) -> Result<()> {
        check_user_page(va)?;
        let idx = self.envid2env(cur, env)?;
        self.page_remove(idx, va);
        self.record(SyscallRecord::PageUnmap {
            env: self.envs[idx].env.env_id,
            va,
        });
        Ok(())
    }

    pub(crate) fn sys_env_set_status(&mut self, cur: EnvId, env: EnvId, status: EnvStatus) -> Result<()> {
        if !matches!(status, EnvStatus::Runnable | EnvStatus::NotRunnable) {
            return Err(ExoError::with_message(ErrorCode::Invalid, "bad status"));
        }
        let idx = self.envid2env(cur, env)?;
        self.envs[idx].env.env_status = status;
        self.record(SyscallRecord::SetStatus {
            env: self.envs[idx].env.env_id,
            status,
        });
        Ok(())
    }

    pub(crate) fn sys_env_set_pgfault_upcall(&mut self, cur: EnvId, env: EnvId, upcall: Upcall) -> Result<()> {
        let idx = self.envid2env(cur, env)?;
        self.envs[idx].env.env_pgfault_upcall = Some(upcall);
        self.record(SyscallRecord::SetPgfaultUpcall {
            env: self.envs[idx].env.env_id,
            upcall,
        });
        Ok(())
    }

    // ── Accès mémoire utilisateur ───────────────────────────────────────────

    /// Frame d'une page accessible à `cur`, ou la faute correspondante
    fn translate(&mut self, cur: EnvId, va: VirtAddr, write: bool) -> core::result::Result<usize, Trap> {
        let idx = match self.lookup(cur) {
            Ok(idx) => idx,
            Err(_) => return Err(Trap::Destroyed(UTrapframe::new(va, FaultCode::USER))),
        };
        let pte = self.lookup_pte(idx, va);
        let allowed = pte.is_present() && pte.is_user() && (!write || pte.is_writable());
        if allowed {
            return Ok(pte.addr().frame_number());
        }

        let mut err = FaultCode::USER;
        if write {
            err |= FaultCode::WRITE;
        }
        if pte.is_present() {
            err |= FaultCode::PROTECTION;
        }
        Err(self.deliver_fault(idx, UTrapframe::new(va, err)))
    }

    /// Empile la trame sur la pile d'exception, ou détruit l'environnement
    fn deliver_fault(&mut self, idx: usize, utf: UTrapframe) -> Trap {
        let id = self.envs[idx].env.env_id;
        if self.envs[idx].env.env_pgfault_upcall.is_none() {
            log::debug!("sim: [{:08x}] unhandled fault at {:#010x}", id, utf.fault_va);
            // `id` vient du slot : la recherche ne peut pas échouer
            self.destroy_env(id).ok();
            return Trap::Destroyed(utf);
        }
        let xstack = self.lookup_pte(idx, xstack_page());
        if !(xstack.is_present() && xstack.is_user() && xstack.is_writable()) {
            log::debug!("sim: [{:08x}] exception stack unusable", id);
            self.destroy_env(id).ok();
            return Trap::Destroyed(utf);
        }

        let frame = self.frame_data_mut(xstack.addr().frame_number());
        let top = PGSIZE - 8;
        frame[top..top + 4].copy_from_slice(&(utf.fault_va.as_usize() as u32).to_le_bytes());
        frame[top + 4..].copy_from_slice(&utf.err.bits().to_le_bytes());
        Trap::PageFault(utf)
    }

    pub(crate) fn user_load(&mut self, cur: EnvId, va: VirtAddr, buf: &mut [u8]) -> core::result::Result<(), Trap> {
        let mut done = 0;
        while done < buf.len() {
            let at = va.offset(done);
            let frame = self.translate(cur, at, false)?;
            let off = at.page_offset();
            let n = (PGSIZE - off).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&self.frame_data(frame)[off..off + n]);
            done += n;
        }
        Ok(())
    }

    pub(crate) fn user_store(&mut self, cur: EnvId, va: VirtAddr, data: &[u8]) -> core::result::Result<(), Trap> {
        let mut done = 0;
        while done < data.len() {
            let at = va.offset(done);
            let frame = self.translate(cur, at, true)?;
            let off = at.page_offset();
            let n = (PGSIZE - off).min(data.len() - done);
            self.frame_data_mut(frame)[off..off + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }

    pub(crate) fn user_copy_page(&mut self, cur: EnvId, dst: VirtAddr, src: VirtAddr) -> core::result::Result<(), Trap> {
        let src_frame = self.translate(cur, src.page_floor(), false)?;
        let dst_frame = self.translate(cur, dst.page_floor(), true)?;
        if src_frame != dst_frame {
            let page: Vec<u8> = self.frame_data(src_frame).to_vec();
            self.frame_data_mut(dst_frame).copy_from_slice(&page);
        }
        Ok(())
    }

    /// Lecture noyau d'une page physique (inspection depuis les tests)
    pub fn frame_bytes(&self, pa: PhysAddr) -> Option<&[u8]> {
        self.frames
            .get(pa.frame_number())
            .and_then(|f| f.as_ref())
            .map(|f| &f.data[..])
    }
}
