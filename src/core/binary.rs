//! Format-independent descriptors shared by every object model.
//!
//! `Format`, `Arch` and `Endianness` describe what kind of image was parsed;
//! `Permissions` is the common vocabulary for segment and section access
//! rights across ELF `p_flags`, PE section characteristics and Mach-O
//! `initprot`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The container format of a binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    /// Executable and Linkable Format (Linux, Unix)
    ELF,
    /// Portable Executable (Windows)
    PE,
    /// Mach Object file format (macOS, iOS)
    MachO,
    /// Universal (fat) Mach-O wrapper holding one image per architecture
    FatMachO,
}

/// The CPU architecture of a binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    /// 32-bit x86
    X86,
    /// 64-bit x86
    X86_64,
    /// 32-bit ARM
    ARM,
    /// 64-bit ARM
    AArch64,
    /// MIPS (32-bit)
    MIPS,
    /// MIPS (64-bit)
    MIPS64,
    /// PowerPC (32-bit)
    PPC,
    /// PowerPC (64-bit)
    PPC64,
    /// RISC-V (32-bit)
    RISCV,
    /// RISC-V (64-bit)
    RISCV64,
    /// Unknown or unsupported architecture
    Unknown,
}

impl Arch {
    /// Native pointer width of the architecture in bits.
    pub fn bits(&self) -> u8 {
        match self {
            Arch::X86 | Arch::ARM | Arch::MIPS | Arch::PPC | Arch::RISCV => 32,
            Arch::X86_64 | Arch::AArch64 | Arch::MIPS64 | Arch::PPC64 | Arch::RISCV64 => 64,
            Arch::Unknown => 0,
        }
    }

    pub fn is_64_bit(&self) -> bool {
        self.bits() == 64
    }

    /// Map an ELF `e_machine` value, using the file class to split 32/64-bit families.
    pub fn from_elf_machine(machine: u16, is_64: bool) -> Self {
        match (machine, is_64) {
            (3, _) => Arch::X86,
            (62, _) => Arch::X86_64,
            (40, _) => Arch::ARM,
            (183, _) => Arch::AArch64,
            (8, false) => Arch::MIPS,
            (8, true) => Arch::MIPS64,
            (20, _) => Arch::PPC,
            (21, _) => Arch::PPC64,
            (243, false) => Arch::RISCV,
            (243, true) => Arch::RISCV64,
            _ => Arch::Unknown,
        }
    }

    /// Map a COFF `Machine` field.
    pub fn from_pe_machine(machine: u16) -> Self {
        match machine {
            0x014c => Arch::X86,
            0x8664 => Arch::X86_64,
            0x01c0 | 0x01c4 => Arch::ARM,
            0xaa64 => Arch::AArch64,
            0x0166 => Arch::MIPS,
            0x01f0 | 0x01f1 => Arch::PPC,
            0x5032 => Arch::RISCV,
            0x5064 => Arch::RISCV64,
            _ => Arch::Unknown,
        }
    }

    /// Map a Mach-O `cputype`.
    pub fn from_macho_cputype(cputype: u32) -> Self {
        const CPU_ARCH_ABI64: u32 = 0x0100_0000;
        match cputype {
            7 => Arch::X86,
            x if x == 7 | CPU_ARCH_ABI64 => Arch::X86_64,
            12 => Arch::ARM,
            x if x == 12 | CPU_ARCH_ABI64 => Arch::AArch64,
            18 => Arch::PPC,
            x if x == 18 | CPU_ARCH_ABI64 => Arch::PPC64,
            _ => Arch::Unknown,
        }
    }
}

/// Byte order of multi-byte fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endianness {
    Little,
    Big,
}

bitflags! {
    /// Access rights of a mapped region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Permissions: u8 {
        const READ = 1;
        const WRITE = 2;
        const EXECUTE = 4;
    }
}

impl Permissions {
    /// ELF `p_flags` use X=1, W=2, R=4.
    pub fn from_elf_flags(flags: u32) -> Self {
        let mut perms = Permissions::empty();
        if flags & 4 != 0 {
            perms |= Permissions::READ;
        }
        if flags & 2 != 0 {
            perms |= Permissions::WRITE;
        }
        if flags & 1 != 0 {
            perms |= Permissions::EXECUTE;
        }
        perms
    }

    pub fn to_elf_flags(self) -> u32 {
        let mut flags = 0;
        if self.contains(Permissions::READ) {
            flags |= 4;
        }
        if self.contains(Permissions::WRITE) {
            flags |= 2;
        }
        if self.contains(Permissions::EXECUTE) {
            flags |= 1;
        }
        flags
    }

    /// Mach-O `vm_prot_t` shares the READ=1, WRITE=2, EXECUTE=4 encoding.
    pub fn from_vm_prot(prot: u32) -> Self {
        Permissions::from_bits_truncate((prot & 7) as u8)
    }

    pub fn to_vm_prot(self) -> u32 {
        u32::from(self.bits())
    }

    /// PE section characteristics: MEM_EXECUTE, MEM_READ, MEM_WRITE.
    pub fn from_pe_characteristics(characteristics: u32) -> Self {
        let mut perms = Permissions::empty();
        if characteristics & 0x4000_0000 != 0 {
            perms |= Permissions::READ;
        }
        if characteristics & 0x8000_0000 != 0 {
            perms |= Permissions::WRITE;
        }
        if characteristics & 0x2000_0000 != 0 {
            perms |= Permissions::EXECUTE;
        }
        perms
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::ELF => write!(f, "ELF"),
            Format::PE => write!(f, "PE"),
            Format::MachO => write!(f, "MachO"),
            Format::FatMachO => write!(f, "FatMachO"),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::X86 => write!(f, "x86"),
            Arch::X86_64 => write!(f, "x86_64"),
            Arch::ARM => write!(f, "arm"),
            Arch::AArch64 => write!(f, "aarch64"),
            Arch::MIPS => write!(f, "mips"),
            Arch::MIPS64 => write!(f, "mips64"),
            Arch::PPC => write!(f, "ppc"),
            Arch::PPC64 => write!(f, "ppc64"),
            Arch::RISCV => write!(f, "riscv"),
            Arch::RISCV64 => write!(f, "riscv64"),
            Arch::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endianness::Little => write!(f, "Little"),
            Endianness::Big => write!(f, "Big"),
        }
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut perms = String::with_capacity(3);
        perms.push(if self.contains(Permissions::READ) { 'r' } else { '-' });
        perms.push(if self.contains(Permissions::WRITE) { 'w' } else { '-' });
        perms.push(if self.contains(Permissions::EXECUTE) { 'x' } else { '-' });
        f.write_str(&perms)
    }
}
