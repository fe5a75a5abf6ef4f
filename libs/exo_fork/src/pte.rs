//! Entrées de table de pages et codes d'erreur de faute.

use bitflags::bitflags;
use core::fmt;
use exo_types::PhysAddr;

bitflags! {
    /// Bits d'une entrée de table de pages (x86, 32 bits)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PteFlags: u32 {
        const PRESENT       = 0x001;
        const WRITABLE      = 0x002;
        const USER          = 0x004;
        const WRITE_THROUGH = 0x008;
        const CACHE_DISABLE = 0x010;
        const ACCESSED      = 0x020;
        const DIRTY         = 0x040;
        const HUGE          = 0x080;
        const GLOBAL        = 0x100;

        /// Bits laissés libres au logiciel
        const AVAIL         = 0xE00;
        /// Page partagée physiquement, jamais copiée
        const SHARE         = 0x400;
        /// Copy-on-Write (bit AVAIL réservé aux processus)
        const COW           = 0x800;

        /// Bits acceptés par les appels système de mappage
        const SYSCALL = Self::AVAIL.bits()
            | Self::PRESENT.bits()
            | Self::WRITABLE.bits()
            | Self::USER.bits();
    }
}

bitflags! {
    /// Code d'erreur d'une faute de page
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FaultCode: u32 {
        /// Violation de protection (la page était présente)
        const PROTECTION = 0x1;
        /// Accès en écriture
        const WRITE      = 0x2;
        /// Faute survenue en mode utilisateur
        const USER       = 0x4;
    }
}

const PTE_ADDR_MASK: u32 = !0xFFF;

/// Entrée de table de pages : adresse de frame (20 bits hauts) + flags
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Pte(u32);

impl Pte {
    /// Entrée non présente
    pub const fn empty() -> Self {
        Pte(0)
    }

    pub fn new(frame: PhysAddr, flags: PteFlags) -> Self {
        Pte((frame.as_usize() as u32 & PTE_ADDR_MASK) | flags.bits())
    }

    pub const fn from_bits(bits: u32) -> Self {
        Pte(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn addr(&self) -> PhysAddr {
        PhysAddr::new((self.0 & PTE_ADDR_MASK) as usize)
    }

    pub const fn flags(&self) -> PteFlags {
        PteFlags::from_bits_retain(self.0 & !PTE_ADDR_MASK)
    }

    /// Permissions transmissibles à `sys_page_map`
    pub fn syscall_perm(&self) -> PteFlags {
        self.flags() & PteFlags::SYSCALL
    }

    pub fn is_present(&self) -> bool {
        self.flags().contains(PteFlags::PRESENT)
    }

    pub fn is_writable(&self) -> bool {
        self.flags().contains(PteFlags::WRITABLE)
    }

    pub fn is_user(&self) -> bool {
        self.flags().contains(PteFlags::USER)
    }

    pub fn is_cow(&self) -> bool {
        self.flags().contains(PteFlags::COW)
    }

    pub fn is_shared(&self) -> bool {
        self.flags().contains(PteFlags::SHARE)
    }
}

impl fmt::Debug for Pte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pte")
            .field("addr", &format_args!("{:#010x}", self.addr()))
            .field("flags", &self.flags())
            .finish()
    }
}
