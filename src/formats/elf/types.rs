//! Core ELF types and constants

use crate::core::binary::Endianness;
use crate::error::{ParseError, ParseStage};

/// ELF magic number
pub const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// ELF class (32-bit or 64-bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32 = 1,
    Elf64 = 2,
}

impl ElfClass {
    pub fn from_u8(val: u8) -> Result<Self, ParseError> {
        match val {
            1 => Ok(ElfClass::Elf32),
            2 => Ok(ElfClass::Elf64),
            _ => Err(ParseError::header(
                ParseStage::Header,
                format!("unsupported ELF class {}", val),
            )),
        }
    }

    pub fn is_64(self) -> bool {
        self == ElfClass::Elf64
    }

    pub fn header_size(self) -> u64 {
        if self.is_64() {
            64
        } else {
            52
        }
    }

    pub fn phdr_size(self) -> u64 {
        if self.is_64() {
            56
        } else {
            32
        }
    }

    pub fn shdr_size(self) -> u64 {
        if self.is_64() {
            64
        } else {
            40
        }
    }

    pub fn sym_size(self) -> u64 {
        if self.is_64() {
            24
        } else {
            16
        }
    }

    pub fn rel_size(self, rela: bool) -> u64 {
        match (self.is_64(), rela) {
            (true, true) => 24,
            (true, false) => 16,
            (false, true) => 12,
            (false, false) => 8,
        }
    }

    pub fn dyn_size(self) -> u64 {
        if self.is_64() {
            16
        } else {
            8
        }
    }

    pub fn word_size(self) -> u64 {
        if self.is_64() {
            8
        } else {
            4
        }
    }
}

pub fn endianness_from_u8(val: u8) -> Result<Endianness, ParseError> {
    match val {
        1 => Ok(Endianness::Little),
        2 => Ok(Endianness::Big),
        _ => Err(ParseError::header(
            ParseStage::Header,
            format!("unsupported ELF data encoding {}", val),
        )),
    }
}

/// ELF file type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfType {
    None = 0,
    Relocatable = 1,
    Executable = 2,
    SharedObject = 3,
    Core = 4,
}

impl From<u16> for ElfType {
    fn from(val: u16) -> Self {
        match val {
            1 => ElfType::Relocatable,
            2 => ElfType::Executable,
            3 => ElfType::SharedObject,
            4 => ElfType::Core,
            _ => ElfType::None,
        }
    }
}

/// ELF header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfHeader {
    /// The full `e_ident` array, padding included.
    pub ident: [u8; 16],
    pub class: ElfClass,
    pub endian: Endianness,
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl ElfHeader {
    pub fn file_type(&self) -> ElfType {
        ElfType::from(self.e_type)
    }

    /// Object files address symbols and relocations relative to their section.
    pub fn is_relocatable(&self) -> bool {
        self.e_type == 1
    }
}

/// Section header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionHeader {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

/// Section types
pub const SHT_NULL: u32 = 0;
pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;
pub const SHT_HASH: u32 = 5;
pub const SHT_DYNAMIC: u32 = 6;
pub const SHT_NOTE: u32 = 7;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_REL: u32 = 9;
pub const SHT_SHLIB: u32 = 10;
pub const SHT_DYNSYM: u32 = 11;
pub const SHT_INIT_ARRAY: u32 = 14;
pub const SHT_FINI_ARRAY: u32 = 15;
pub const SHT_PREINIT_ARRAY: u32 = 16;
pub const SHT_GROUP: u32 = 17;
pub const SHT_SYMTAB_SHNDX: u32 = 18;
pub const SHT_RELR: u32 = 19;
pub const SHT_GNU_ATTRIBUTES: u32 = 0x6ffffff5;
pub const SHT_GNU_HASH: u32 = 0x6ffffff6;
pub const SHT_GNU_VERDEF: u32 = 0x6ffffffd;
pub const SHT_GNU_VERNEED: u32 = 0x6ffffffe;
pub const SHT_GNU_VERSYM: u32 = 0x6fffffff;

/// Section types whose contents we understand well enough to call them data.
pub const KNOWN_SECTION_TYPES: &[u32] = &[
    SHT_NULL,
    SHT_PROGBITS,
    SHT_SYMTAB,
    SHT_STRTAB,
    SHT_RELA,
    SHT_HASH,
    SHT_DYNAMIC,
    SHT_NOTE,
    SHT_NOBITS,
    SHT_REL,
    SHT_SHLIB,
    SHT_DYNSYM,
    SHT_INIT_ARRAY,
    SHT_FINI_ARRAY,
    SHT_PREINIT_ARRAY,
    SHT_GROUP,
    SHT_SYMTAB_SHNDX,
    SHT_RELR,
    SHT_GNU_ATTRIBUTES,
    SHT_GNU_HASH,
    SHT_GNU_VERDEF,
    SHT_GNU_VERNEED,
    SHT_GNU_VERSYM,
];

/// Section flags
pub const SHF_WRITE: u64 = 0x1;
pub const SHF_ALLOC: u64 = 0x2;
pub const SHF_EXECINSTR: u64 = 0x4;
pub const SHF_INFO_LINK: u64 = 0x40;
pub const SHF_TLS: u64 = 0x400;

/// Special section indices
pub const SHN_UNDEF: u16 = 0;
pub const SHN_LORESERVE: u16 = 0xff00;
pub const SHN_ABS: u16 = 0xfff1;
pub const SHN_COMMON: u16 = 0xfff2;
pub const SHN_XINDEX: u16 = 0xffff;

/// Program header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

/// Program header types
pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;
pub const PT_NOTE: u32 = 4;
pub const PT_PHDR: u32 = 6;
pub const PT_TLS: u32 = 7;

/// Program header flags
pub const PF_X: u32 = 0x1;
pub const PF_W: u32 = 0x2;
pub const PF_R: u32 = 0x4;

/// Symbol table entry as stored on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSymbol {
    pub st_name: u32,
    pub st_value: u64,
    pub st_size: u64,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
}

impl RawSymbol {
    pub fn st_bind(&self) -> u8 {
        self.st_info >> 4
    }

    pub fn st_type(&self) -> u8 {
        self.st_info & 0xf
    }
}

/// Symbol binding
pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;
pub const STB_WEAK: u8 = 2;

/// Symbol types
pub const STT_NOTYPE: u8 = 0;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;
pub const STT_SECTION: u8 = 3;
pub const STT_FILE: u8 = 4;
pub const STT_TLS: u8 = 6;

/// Dynamic tags
pub const DT_NULL: i64 = 0;
pub const DT_NEEDED: i64 = 1;
pub const DT_PLTRELSZ: i64 = 2;
pub const DT_PLTGOT: i64 = 3;
pub const DT_HASH: i64 = 4;
pub const DT_STRTAB: i64 = 5;
pub const DT_SYMTAB: i64 = 6;
pub const DT_RELA: i64 = 7;
pub const DT_RELASZ: i64 = 8;
pub const DT_RELAENT: i64 = 9;
pub const DT_STRSZ: i64 = 10;
pub const DT_SYMENT: i64 = 11;
pub const DT_INIT: i64 = 12;
pub const DT_FINI: i64 = 13;
pub const DT_SONAME: i64 = 14;
pub const DT_RPATH: i64 = 15;
pub const DT_REL: i64 = 17;
pub const DT_RELSZ: i64 = 18;
pub const DT_JMPREL: i64 = 23;
pub const DT_INIT_ARRAY: i64 = 25;
pub const DT_FINI_ARRAY: i64 = 26;
pub const DT_INIT_ARRAYSZ: i64 = 27;
pub const DT_FINI_ARRAYSZ: i64 = 28;
pub const DT_RUNPATH: i64 = 29;
pub const DT_PREINIT_ARRAY: i64 = 32;
pub const DT_PREINIT_ARRAYSZ: i64 = 33;
pub const DT_SYMTAB_SHNDX: i64 = 34;
pub const DT_RELRSZ: i64 = 35;
pub const DT_RELR: i64 = 36;
pub const DT_GNU_HASH: i64 = 0x6ffffef5;
pub const DT_VERSYM: i64 = 0x6ffffff0;
pub const DT_VERDEF: i64 = 0x6ffffffc;
pub const DT_VERNEED: i64 = 0x6ffffffe;

/// Relocation entry as stored on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawRelocation {
    pub r_offset: u64,
    pub r_info: u64,
    pub r_addend: Option<i64>,
}

impl RawRelocation {
    pub fn symbol_index(&self, class: ElfClass) -> u32 {
        match class {
            ElfClass::Elf64 => (self.r_info >> 32) as u32,
            ElfClass::Elf32 => (self.r_info >> 8) as u32,
        }
    }

    pub fn reloc_type(&self, class: ElfClass) -> u32 {
        match class {
            ElfClass::Elf64 => self.r_info as u32,
            ElfClass::Elf32 => (self.r_info & 0xff) as u32,
        }
    }

    pub fn info(class: ElfClass, symbol: u32, kind: u32) -> u64 {
        match class {
            ElfClass::Elf64 => (u64::from(symbol) << 32) | u64::from(kind),
            ElfClass::Elf32 => (u64::from(symbol) << 8) | u64::from(kind & 0xff),
        }
    }
}

/// Relocation types that store a load-base-relative address in the addend.
pub fn is_relative_reloc(machine: u16, kind: u32) -> bool {
    matches!(
        (machine, kind),
        (62, 8) | (62, 37)          // R_X86_64_RELATIVE, R_X86_64_IRELATIVE
            | (3, 8) | (3, 42)      // R_386_RELATIVE, R_386_IRELATIVE
            | (183, 1027) | (183, 1032) // R_AARCH64_RELATIVE, R_AARCH64_IRELATIVE
            | (40, 23) | (40, 160)  // R_ARM_RELATIVE, R_ARM_IRELATIVE
            | (243, 3) | (243, 58)  // R_RISCV_RELATIVE, R_RISCV_IRELATIVE
            | (20, 22) | (21, 22) // R_PPC_RELATIVE, R_PPC64_RELATIVE
    )
}
