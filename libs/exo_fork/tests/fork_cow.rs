//! Scénarios de bout en bout : fork, isolation, pages partagées, ordre des mappages.

mod common;

use common::*;
use exo_fork::duppage::PERM_COW;
use exo_fork::layout::{xstack_page, PGSIZE};
use exo_fork::sim::{MachineConfig, SimKernel, SyscallRecord};
use exo_fork::{
    pgfault, EnvId, EnvStatus, ErrorCode, PageTableView, Pte, PteFlags, Runtime, Syscalls, Trap,
    Upcall, UserMemory, VirtAddr,
};
use std::panic::{catch_unwind, AssertUnwindSafe};

#[test]
fn test_child_write_is_private() {
    let mut a = boot();
    let page = heap(0);
    map_page(&mut a, page, RW, &[0u8; PGSIZE]);

    let mut b = fork_and_resume(&mut a);
    b.write_byte(page, 0xFF);

    assert_eq!(a.read_byte(page), 0x00);
    assert_eq!(b.read_byte(page), 0xFF);

    let a_id = a.kernel().env_id();
    let b_id = b.kernel().env_id();
    a.kernel().with_machine(|m| {
        let a_env = m.env_by_id(a_id).unwrap();
        let b_env = m.env_by_id(b_id).unwrap();
        assert!(a_env.env_pgfault_upcall.is_some());
        assert_eq!(b_env.env_pgfault_upcall, a_env.env_pgfault_upcall);

        // Piles d'exception privées, jamais CoW
        let a_xs = m.pte_of(a_id, xstack_page());
        let b_xs = m.pte_of(b_id, xstack_page());
        assert_ne!(a_xs.addr(), b_xs.addr());
        for xs in [a_xs, b_xs] {
            assert!(xs.is_writable());
            assert!(!xs.is_cow());
            assert!(!xs.is_shared());
        }

        // Seul B a fauté : sa trame est sur sa pile, celle de A est intacte
        let a_stack = m.frame_bytes(a_xs.addr()).unwrap();
        assert!(a_stack.iter().all(|&b| b == 0));
        let b_stack = m.frame_bytes(b_xs.addr()).unwrap();
        let top = PGSIZE - 8;
        let fault_va = u32::from_le_bytes(b_stack[top..top + 4].try_into().unwrap());
        assert_eq!(fault_va as usize, page.as_usize());
    });
}

#[test]
fn test_parent_write_is_private() {
    let mut a = boot();
    let page = heap(0);
    map_page(&mut a, page, RW, &[7u8; PGSIZE]);

    let mut b = fork_and_resume(&mut a);
    a.write(page.offset(100), b"parent");

    let mut seen = [0u8; 6];
    b.read(page.offset(100), &mut seen);
    assert_eq!(&seen, &[7u8; 6]);
    a.read(page.offset(100), &mut seen);
    assert_eq!(&seen, b"parent");
}

#[test]
fn test_contents_identical_after_fork() {
    let mut a = boot();
    for n in 0..3 {
        let fill: Vec<u8> = (0..PGSIZE).map(|i| (i * (n + 3)) as u8).collect();
        map_page(&mut a, heap(n), RW, &fill);
    }
    map_page(&mut a, heap(5), RO, &[0x5a; PGSIZE]);

    let mut b = fork_and_resume(&mut a);
    for n in [0, 1, 2, 5] {
        assert_eq!(a.read_page(heap(n)), b.read_page(heap(n)));
    }
    // Les lectures de pages CoW ne fautent pas
    assert_eq!(b.stats().faults_resolved, 0);
    assert_eq!(a.stats().faults_resolved, 0);
}

#[test]
fn test_shared_page_is_mutually_visible() {
    let mut a = boot();
    let page = heap(0);
    map_page(&mut a, page, SHARED_RW, &[0u8; PGSIZE]);

    let mut b = fork_and_resume(&mut a);
    b.write_byte(page, 0x11);
    assert_eq!(a.read_byte(page), 0x11);
    a.write_byte(page.offset(1), 0x22);
    assert_eq!(b.read_byte(page.offset(1)), 0x22);

    let a_pte = a.kernel().pte(page.page_number());
    let b_pte = b.kernel().pte(page.page_number());
    assert_eq!(a_pte.addr(), b_pte.addr());
    assert!(a_pte.is_writable() && b_pte.is_writable());
    assert!(!a_pte.is_cow() && !b_pte.is_cow());
    assert_eq!(a.stats().pages_shared, 1);
}

#[test]
fn test_source_mapping_reasserted_cow() {
    let mut a = boot();
    let page = heap(0);
    map_page(&mut a, page, RW, &[1u8; PGSIZE]);
    let before = a.kernel().pte(page.page_number());
    assert!(before.is_writable());

    let child = a.fork();
    let parent_pte = a.kernel().pte(page.page_number());
    let child_pte = a.kernel().with_machine(|m| m.pte_of(child, page));

    for pte in [parent_pte, child_pte] {
        assert!(pte.is_cow());
        assert!(!pte.is_writable());
        assert!(pte.is_user() && pte.is_present());
    }
    assert_eq!(parent_pte.addr(), before.addr());
    assert_eq!(child_pte.addr(), before.addr());
    assert_eq!(a.stats().pages_cow, 1);
}

#[test]
fn test_readonly_page_shared_without_cow() {
    let mut a = boot();
    let text = heap(0);
    map_page(&mut a, text, RO, &[0x90; PGSIZE]);

    let child = a.fork();
    let parent_pte = a.kernel().pte(text.page_number());
    let child_pte = a.kernel().with_machine(|m| m.pte_of(child, text));
    assert_eq!(parent_pte, child_pte);
    assert!(!child_pte.is_cow());
    assert!(!child_pte.is_writable());
    assert_eq!(a.stats().pages_readonly, 1);
}

#[test]
fn test_child_thisenv_rebound() {
    let mut a = boot();
    map_page(&mut a, heap(0), RW, &[0u8; 16]);
    let a_id = a.kernel().env_id();

    let child_id = a.fork();
    let mut b = a.resume_child(child_id).unwrap();
    // Copie de la mémoire du parent : encore son descripteur
    assert_eq!(b.thisenv().env_id, a_id);
    assert_eq!(b.fork(), 0);
    assert_eq!(b.thisenv().env_id, child_id);
    assert_eq!(b.thisenv().env_parent_id, a_id);
    assert_eq!(a.thisenv().env_id, a_id);
}

#[test]
fn test_grandchild_of_cow_pages() {
    let mut a = boot();
    let page = heap(0);
    map_page(&mut a, page, RW, &[3u8; PGSIZE]);

    let mut b = fork_and_resume(&mut a);
    let c_id = b.fork();
    assert!(c_id > 0);
    let mut c = b.resume_child(c_id).unwrap();
    assert_eq!(c.fork(), 0);

    // Déjà CoW chez B : toujours CoW après le second fork
    let b_pte = b.kernel().pte(page.page_number());
    assert!(b_pte.is_cow() && !b_pte.is_writable());

    c.write_byte(page, 0xCC);
    b.write_byte(page, 0xBB);
    assert_eq!(a.read_byte(page), 3);
    assert_eq!(b.read_byte(page), 0xBB);
    assert_eq!(c.read_byte(page), 0xCC);
}

fn position(trace: &[SyscallRecord], pred: impl Fn(&SyscallRecord) -> bool) -> usize {
    trace.iter().position(|r| pred(r)).expect("record not traced")
}

#[test]
fn test_clone_order_and_activation_last() {
    let mut a = boot();
    let page = heap(0);
    map_page(&mut a, page, RW, &[0u8; 8]);
    let a_id = a.kernel().env_id();
    a.kernel().with_machine(|m| m.enable_trace());

    let child = a.fork();
    let trace = a.kernel().with_machine(|m| m.take_trace());

    let target_map = position(&trace, |r| {
        matches!(r, SyscallRecord::PageMap { dst_env, dst_va, perm, .. }
            if *dst_env == child && *dst_va == page && *perm == PERM_COW)
    });
    let source_map = position(&trace, |r| {
        matches!(r, SyscallRecord::PageMap { src_env, dst_env, dst_va, perm, .. }
            if *src_env == a_id && *dst_env == a_id && *dst_va == page && *perm == PERM_COW)
    });
    let xstack = position(&trace, |r| {
        matches!(r, SyscallRecord::PageAlloc { env, va, .. } if *env == child && *va == xstack_page())
    });
    let upcall = position(&trace, |r| matches!(r, SyscallRecord::SetPgfaultUpcall { env, .. } if *env == child));
    let runnable = position(&trace, |r| {
        matches!(r, SyscallRecord::SetStatus { env, status: EnvStatus::Runnable } if *env == child)
    });

    assert!(target_map < source_map);
    assert!(source_map < xstack);
    assert!(xstack < upcall);
    assert!(upcall < runnable);
    assert_eq!(runnable, trace.len() - 1);

    // La pile d'exception n'est jamais clonée
    assert!(!trace.iter().any(|r| matches!(r,
        SyscallRecord::PageMap { dst_va, .. } if *dst_va == xstack_page())));
}

#[test]
fn test_cow_page_reasserted_on_second_fork() {
    let mut a = boot();
    let page = heap(0);
    map_page(&mut a, page, RW, &[4u8; 16]);

    let mut b = fork_and_resume(&mut a);
    let b_id = b.kernel().env_id();
    assert!(b.kernel().pte(page.page_number()).is_cow());
    b.kernel().with_machine(|m| m.enable_trace());

    let c = b.fork();
    let trace = b.kernel().with_machine(|m| m.take_trace());

    let into_child = position(&trace, |r| {
        matches!(r, SyscallRecord::PageMap { src_env, dst_env, dst_va, perm, .. }
            if *src_env == b_id && *dst_env == c && *dst_va == page && *perm == PERM_COW)
    });
    let reasserted = position(&trace, |r| {
        matches!(r, SyscallRecord::PageMap { src_env, dst_env, dst_va, perm, .. }
            if *src_env == b_id && *dst_env == b_id && *dst_va == page && *perm == PERM_COW)
    });
    assert!(into_child < reasserted);
}

/// Noyau qui fait écrire le parent entre les deux remappages d'une page
struct WindowKernel {
    inner: SimKernel,
    poke: Option<(VirtAddr, u8)>,
}

impl PageTableView for WindowKernel {
    fn pde(&self, pdx: usize) -> Pte {
        self.inner.pde(pdx)
    }

    fn pte(&self, pn: usize) -> Pte {
        self.inner.pte(pn)
    }
}

impl Syscalls for WindowKernel {
    fn getenvid(&self) -> EnvId {
        self.inner.getenvid()
    }

    fn env(&self, envx: usize) -> exo_fork::Env {
        self.inner.env(envx)
    }

    fn pgfault_upcall_entry(&self) -> Upcall {
        self.inner.pgfault_upcall_entry()
    }

    fn exofork(&mut self) -> exo_fork::Result<EnvId> {
        self.inner.exofork()
    }

    fn page_alloc(&mut self, env: EnvId, va: VirtAddr, perm: PteFlags) -> exo_fork::Result<()> {
        self.inner.page_alloc(env, va, perm)
    }

    fn page_map(
        &mut self,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> exo_fork::Result<()> {
        self.inner.page_map(src_env, src_va, dst_env, dst_va, perm)?;
        if let Some((va, value)) = self.poke {
            if dst_env != 0 && dst_va == va && perm.contains(PteFlags::COW) {
                self.inner.store(va, &[value]).expect("source still writable");
                self.poke = None;
            }
        }
        Ok(())
    }

    fn page_unmap(&mut self, env: EnvId, va: VirtAddr) -> exo_fork::Result<()> {
        self.inner.page_unmap(env, va)
    }

    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> exo_fork::Result<()> {
        self.inner.env_set_status(env, status)
    }

    fn env_set_pgfault_upcall(&mut self, env: EnvId, upcall: Upcall) -> exo_fork::Result<()> {
        self.inner.env_set_pgfault_upcall(env, upcall)
    }
}

impl UserMemory for WindowKernel {
    fn load(&self, va: VirtAddr, buf: &mut [u8]) -> Result<(), Trap> {
        self.inner.load(va, buf)
    }

    fn store(&mut self, va: VirtAddr, data: &[u8]) -> Result<(), Trap> {
        self.inner.store(va, data)
    }

    fn copy_page(&mut self, dst: VirtAddr, src: VirtAddr) -> Result<(), Trap> {
        self.inner.copy_page(dst, src)
    }
}

#[test]
fn test_parent_write_between_remap_steps() {
    let inner = SimKernel::boot(MachineConfig::default_config()).unwrap();
    let page = heap(0);
    let mut a = Runtime::new(WindowKernel {
        inner: inner.clone(),
        poke: Some((page, 0x42)),
    });
    map_page(&mut a, page, RW, &[0u8; PGSIZE]);

    let child = a.fork();
    assert!(a.kernel().poke.is_none());

    // L'écriture tombée dans la fenêtre a atteint la frame encore partagée
    let b = inner.resume(child).unwrap();
    let mut seen = [0u8; 1];
    b.load(page, &mut seen).unwrap();
    assert_eq!(seen[0], 0x42);

    // Ensuite la source est CoW : l'écriture suivante du parent est privée
    assert!(a.kernel().pte(page.page_number()).is_cow());
    a.write_byte(page, 0x99);
    assert_eq!(a.stats().faults_resolved, 1);
    b.load(page, &mut seen).unwrap();
    assert_eq!(seen[0], 0x42);
    assert_eq!(a.read_byte(page), 0x99);
}

#[test]
fn test_exhaustion_leaves_child_not_runnable() {
    let mut a = boot();
    map_page(&mut a, heap(0), RW, &[0u8; 8]);
    a.set_pgfault_handler(pgfault::<SimKernel>);
    a.kernel().with_machine(|m| {
        m.enable_trace();
        // Le répertoire de pages de l'enfant, puis plus rien
        m.set_frame_budget(Some(1));
    });

    let result = catch_unwind(AssertUnwindSafe(|| a.fork()));
    assert!(result.is_err());

    let trace = a.kernel().with_machine(|m| m.take_trace());
    let child = trace
        .iter()
        .find_map(|r| match r {
            SyscallRecord::Exofork { child, .. } => Some(*child),
            _ => None,
        })
        .expect("child created");
    assert!(!trace.iter().any(|r| matches!(r, SyscallRecord::SetStatus { .. })));
    assert_eq!(
        a.kernel().with_machine(|m| m.env_status(child)),
        Some(EnvStatus::NotRunnable)
    );
    let err = a.kernel().resume(child).err().unwrap();
    assert_eq!(err.code(), ErrorCode::BadEnv);
}

#[test]
fn test_exception_stack_exhaustion_is_fatal() {
    let mut a = boot();
    map_page(&mut a, heap(0), RW, &[0u8; 8]);
    a.set_pgfault_handler(pgfault::<SimKernel>);
    // Répertoire + table de pages pour le tas de l'enfant, pas de pile d'exception
    a.kernel().with_machine(|m| m.set_frame_budget(Some(2)));

    let err = catch_unwind(AssertUnwindSafe(|| a.fork())).unwrap_err();
    let msg = err
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_default();
    assert!(msg.starts_with("fork: sys_page_alloc"), "{}", msg);
}

#[test]
#[should_panic(expected = "fork: sys_exofork")]
fn test_no_free_env_is_fatal() {
    let mut a = boot_with(MachineConfig {
        nframes: 64,
        nenv: 1,
    });
    a.fork();
}

#[test]
fn test_sfork_unsupported() {
    let mut a = boot();
    map_page(&mut a, heap(0), RW, &[0u8; 8]);
    a.kernel().with_machine(|m| m.enable_trace());

    let err = a.sfork().unwrap_err();
    assert_eq!(err.code(), ErrorCode::Invalid);
    assert!(a.kernel().with_machine(|m| m.take_trace()).is_empty());
    // Rien n'a été touché
    assert!(a.kernel().pte(heap(0).page_number()).is_writable());
}
