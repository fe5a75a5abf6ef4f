#![allow(dead_code)]

use exo_fork::layout::{PGSIZE, UTEXT};
use exo_fork::sim::{MachineConfig, SimKernel};
use exo_fork::{PteFlags, Runtime, Syscalls, UserMemory, VirtAddr};

pub const RW: PteFlags = PteFlags::USER
    .union(PteFlags::WRITABLE)
    .union(PteFlags::PRESENT);
pub const RO: PteFlags = PteFlags::USER.union(PteFlags::PRESENT);
pub const SHARED_RW: PteFlags = RW.union(PteFlags::SHARE);

pub fn boot() -> Runtime<SimKernel> {
    boot_with(MachineConfig::default_config())
}

pub fn boot_with(config: MachineConfig) -> Runtime<SimKernel> {
    Runtime::new(SimKernel::boot(config).expect("boot"))
}

/// `n`-ième page du tas de test
pub fn heap(n: usize) -> VirtAddr {
    VirtAddr::new(UTEXT + n * PGSIZE)
}

/// Alloue une page en `va`, la remplit avec `fill`, puis applique `perm`
pub fn map_page<K: Syscalls + UserMemory>(rt: &mut Runtime<K>, va: VirtAddr, perm: PteFlags, fill: &[u8]) {
    rt.kernel_mut()
        .page_alloc(0, va, RW | (perm & PteFlags::SHARE))
        .expect("page_alloc");
    rt.write(va, fill);
    if !perm.contains(PteFlags::WRITABLE) {
        rt.kernel_mut().page_map(0, va, 0, va, perm).expect("page_map");
    }
}

/// Fork puis reprise de l'enfant jusqu'au retour de `fork()`
pub fn fork_and_resume(parent: &mut Runtime<SimKernel>) -> Runtime<SimKernel> {
    let child_id = parent.fork();
    assert!(child_id > 0);
    let mut child = parent.resume_child(child_id).expect("child runnable");
    assert_eq!(child.fork(), 0);
    child
}
