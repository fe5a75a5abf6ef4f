//! # Disposition de l'espace d'adressage utilisateur
//!
//! ABI fixée par le noyau (x86 32 bits, tables de pages à deux niveaux).
//!
//! ```text
//!  ULIM     ----> +------------------------------+ 0xef800000
//!                 |  Page tables (UVPT) R-/R-    |
//!  UVPT     ----> +------------------------------+ 0xef400000
//!                 |  RO PAGES      R-/R-         |
//!  UPAGES   ----> +------------------------------+ 0xef000000
//!                 |  RO ENVS       R-/R-         |
//!  UTOP, UENVS, UXSTACKTOP
//!           ----> +------------------------------+ 0xeec00000
//!                 |  User exception stack RW/RW  |
//!                 +------------------------------+ 0xeebff000
//!                 |  Empty memory (guard)        |
//!  USTACKTOP ---> +------------------------------+ 0xeebfe000
//!                 |  Normal user stack  RW/RW    |
//!                 ~           ...                ~
//!  UTEXT    ----> +------------------------------+ 0x00800000
//!  PFTEMP   ----> |  Scratch page (faults)       | 0x007ff000
//!  UTEMP    ----> +------------------------------+ 0x00400000
//! ```

use exo_types::address::{PAGE_SHIFT, PAGE_SIZE};
use exo_types::VirtAddr;

pub const PGSIZE: usize = PAGE_SIZE;
pub const PGSHIFT: usize = PAGE_SHIFT;

/// Entrées par table de pages / par répertoire
pub const NPTENTRIES: usize = 1024;
pub const NPDENTRIES: usize = 1024;

/// Octets couverts par une table de pages (une entrée de répertoire)
pub const PTSIZE: usize = PGSIZE * NPTENTRIES;
pub const PTXSHIFT: usize = 12;
pub const PDXSHIFT: usize = 22;

pub const ULIM: usize = 0xef80_0000;
/// Projection récursive des tables de pages, en lecture seule
pub const UVPT: usize = ULIM - PTSIZE;
/// Répertoire de pages vu à travers UVPT
pub const UVPD: usize = UVPT + (UVPT >> PGSHIFT) * core::mem::size_of::<u32>();
pub const UPAGES: usize = UVPT - PTSIZE;
/// Table `envs[]` en lecture seule
pub const UENVS: usize = UPAGES - PTSIZE;

/// Limite haute de l'espace modifiable par l'utilisateur
pub const UTOP: usize = UENVS;
pub const UXSTACKTOP: usize = UTOP;
pub const USTACKTOP: usize = UTOP - 2 * PGSIZE;
pub const UTEXT: usize = 2 * PTSIZE;
pub const UTEMP: usize = PTSIZE;
/// Page temporaire utilisée par le gestionnaire de fautes CoW
pub const PFTEMP: usize = UTEMP + PTSIZE - PGSIZE;

/// Page de la pile d'exception
pub const fn xstack_page() -> VirtAddr {
    VirtAddr::new(UXSTACKTOP - PGSIZE)
}

pub const fn pgnum(va: usize) -> usize {
    va >> PGSHIFT
}

/// Index dans le répertoire de pages
pub const fn pdx(va: usize) -> usize {
    (va >> PDXSHIFT) & (NPDENTRIES - 1)
}

/// Index dans la table de pages
pub const fn ptx(va: usize) -> usize {
    (va >> PTXSHIFT) & (NPTENTRIES - 1)
}

/// Adresse virtuelle à partir des index répertoire/table
pub const fn pgaddr(pdx: usize, ptx: usize) -> usize {
    (pdx << PDXSHIFT) | (ptx << PTXSHIFT)
}

pub const fn round_down(value: usize, align: usize) -> usize {
    value - value % align
}

pub const fn round_up(value: usize, align: usize) -> usize {
    round_down(value + align - 1, align)
}
