// libs/exo_types/src/address.rs

use core::fmt;

/// Taille d'une page (4 KiB)
pub const PAGE_SIZE: usize = 4096;

/// Décalage d'un numéro de page dans une adresse
pub const PAGE_SHIFT: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(usize);

impl PhysAddr {
    pub const fn new(addr: usize) -> Self {
        PhysAddr(addr)
    }

    pub const fn as_usize(&self) -> usize {
        self.0
    }

    /// Numéro de frame physique contenant cette adresse
    pub const fn frame_number(&self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    pub const fn from_frame_number(frame: usize) -> Self {
        PhysAddr(frame << PAGE_SHIFT)
    }
}

impl From<usize> for PhysAddr {
    fn from(addr: usize) -> Self {
        PhysAddr(addr)
    }
}

impl From<PhysAddr> for usize {
    fn from(addr: PhysAddr) -> Self {
        addr.0
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    pub const fn new(addr: usize) -> Self {
        VirtAddr(addr)
    }

    pub const fn as_usize(&self) -> usize {
        self.0
    }

    /// Numéro de page virtuelle (adresse / taille de page)
    pub const fn page_number(&self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// Adresse du début de la page virtuelle `pn`
    pub const fn from_page_number(pn: usize) -> Self {
        VirtAddr(pn << PAGE_SHIFT)
    }

    /// Arrondit à la page inférieure
    pub const fn page_floor(&self) -> Self {
        VirtAddr(self.0 & !(PAGE_SIZE - 1))
    }

    /// Décalage dans la page
    pub const fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.page_offset() == 0
    }

    pub const fn offset(&self, bytes: usize) -> Self {
        VirtAddr(self.0 + bytes)
    }
}

impl From<usize> for VirtAddr {
    fn from(addr: usize) -> Self {
        VirtAddr(addr)
    }
}

impl From<VirtAddr> for usize {
    fn from(addr: VirtAddr) -> Self {
        addr.0
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
