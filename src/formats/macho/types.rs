//! Core Mach-O types and constants

use crate::core::binary::Endianness;

pub const MH_MAGIC: u32 = 0xfeed_face;
pub const MH_CIGAM: u32 = 0xcefa_edfe;
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
pub const MH_CIGAM_64: u32 = 0xcffa_edfe;
pub const FAT_MAGIC: u32 = 0xcafe_babe;
pub const FAT_MAGIC_64: u32 = 0xcafe_babf;

pub const MACH_HEADER_SIZE: u64 = 28;
pub const MACH_HEADER_64_SIZE: u64 = 32;
pub const FAT_HEADER_SIZE: u64 = 8;
pub const FAT_ARCH_SIZE: u64 = 20;

// File types
pub const MH_OBJECT: u32 = 0x1;
pub const MH_EXECUTE: u32 = 0x2;
pub const MH_DYLIB: u32 = 0x6;
pub const MH_BUNDLE: u32 = 0x8;

// CPU types
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;
pub const CPU_ARCH_ABI64_32: u32 = 0x0200_0000;
pub const CPU_TYPE_X86: u32 = 7;
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM: u32 = 12;
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM64_32: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64_32;

// Load commands
pub const LC_REQ_DYLD: u32 = 0x8000_0000;
pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_THREAD: u32 = 0x4;
pub const LC_UNIXTHREAD: u32 = 0x5;
pub const LC_DYSYMTAB: u32 = 0xb;
pub const LC_LOAD_DYLIB: u32 = 0xc;
pub const LC_ID_DYLIB: u32 = 0xd;
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_RPATH: u32 = 0x1c | LC_REQ_DYLD;
pub const LC_CODE_SIGNATURE: u32 = 0x1d;
pub const LC_SEGMENT_SPLIT_INFO: u32 = 0x1e;
pub const LC_REEXPORT_DYLIB: u32 = 0x1f | LC_REQ_DYLD;
pub const LC_LAZY_LOAD_DYLIB: u32 = 0x20;
pub const LC_DYLD_INFO: u32 = 0x22;
pub const LC_DYLD_INFO_ONLY: u32 = 0x22 | LC_REQ_DYLD;
pub const LC_LOAD_UPWARD_DYLIB: u32 = 0x23 | LC_REQ_DYLD;
pub const LC_FUNCTION_STARTS: u32 = 0x26;
pub const LC_MAIN: u32 = 0x28 | LC_REQ_DYLD;
pub const LC_DATA_IN_CODE: u32 = 0x29;
pub const LC_DYLIB_CODE_SIGN_DRS: u32 = 0x2b;
pub const LC_LINKER_OPTIMIZATION_HINT: u32 = 0x2e;
pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | LC_REQ_DYLD;
pub const LC_DYLD_CHAINED_FIXUPS: u32 = 0x34 | LC_REQ_DYLD;

/// Commands shaped like `linkedit_data_command`.
pub const LINKEDIT_DATA_COMMANDS: &[u32] = &[
    LC_CODE_SIGNATURE,
    LC_SEGMENT_SPLIT_INFO,
    LC_FUNCTION_STARTS,
    LC_DATA_IN_CODE,
    LC_DYLIB_CODE_SIGN_DRS,
    LC_LINKER_OPTIMIZATION_HINT,
    LC_DYLD_EXPORTS_TRIE,
    LC_DYLD_CHAINED_FIXUPS,
];

/// Commands shaped like `dylib_command`.
pub const DYLIB_COMMANDS: &[u32] = &[
    LC_LOAD_DYLIB,
    LC_ID_DYLIB,
    LC_LOAD_WEAK_DYLIB,
    LC_REEXPORT_DYLIB,
    LC_LAZY_LOAD_DYLIB,
    LC_LOAD_UPWARD_DYLIB,
];

pub const LOAD_COMMAND_HEADER_SIZE: u64 = 8;
pub const SEGMENT_COMMAND_SIZE: u64 = 56;
pub const SEGMENT_COMMAND_64_SIZE: u64 = 72;
pub const SECTION_SIZE: u64 = 68;
pub const SECTION_64_SIZE: u64 = 80;
pub const SYMTAB_COMMAND_SIZE: u64 = 24;
pub const DYSYMTAB_COMMAND_SIZE: u64 = 80;
pub const DYLD_INFO_COMMAND_SIZE: u64 = 48;
pub const LINKEDIT_DATA_COMMAND_SIZE: u64 = 16;
pub const DYLIB_COMMAND_SIZE: u64 = 24;
pub const RPATH_COMMAND_SIZE: u64 = 12;
pub const ENTRY_POINT_COMMAND_SIZE: u64 = 24;
pub const RELOCATION_INFO_SIZE: u64 = 8;

// Section types (low byte of flags)
pub const SECTION_TYPE: u32 = 0x0000_00ff;
pub const S_REGULAR: u32 = 0x0;
pub const S_ZEROFILL: u32 = 0x1;
pub const S_CSTRING_LITERALS: u32 = 0x2;
pub const S_NON_LAZY_SYMBOL_POINTERS: u32 = 0x6;
pub const S_LAZY_SYMBOL_POINTERS: u32 = 0x7;
pub const S_SYMBOL_STUBS: u32 = 0x8;
pub const S_GB_ZEROFILL: u32 = 0xc;
pub const S_THREAD_LOCAL_ZEROFILL: u32 = 0x12;
pub const S_ATTR_PURE_INSTRUCTIONS: u32 = 0x8000_0000;
pub const S_ATTR_SOME_INSTRUCTIONS: u32 = 0x0000_0400;

// VM protections
pub const VM_PROT_READ: u32 = 0x1;
pub const VM_PROT_WRITE: u32 = 0x2;
pub const VM_PROT_EXECUTE: u32 = 0x4;

// nlist n_type
pub const N_STAB: u8 = 0xe0;
pub const N_PEXT: u8 = 0x10;
pub const N_TYPE: u8 = 0x0e;
pub const N_EXT: u8 = 0x01;
pub const N_UNDF: u8 = 0x0;
pub const N_ABS: u8 = 0x2;
pub const N_SECT: u8 = 0xe;
pub const N_INDR: u8 = 0xa;
pub const NO_SECT: u8 = 0;
pub const MAX_SECT: usize = 255;

// Indirect symbol table markers
pub const INDIRECT_SYMBOL_LOCAL: u32 = 0x8000_0000;
pub const INDIRECT_SYMBOL_ABS: u32 = 0x4000_0000;

/// Scattered relocation marker in the first word.
pub const R_SCATTERED: u32 = 0x8000_0000;

/// Virtual memory page size used for segment alignment.
pub fn page_size(cputype: u32) -> u64 {
    match cputype {
        CPU_TYPE_ARM64 | CPU_TYPE_ARM64_32 => 0x4000,
        _ => 0x1000,
    }
}

/// Fixed-width name fields (`segname`, `sectname`) decode up to the first NUL.
pub fn fixed_name(raw: &[u8; 16]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Encode a name into a 16-byte field. `None` when it does not fit.
pub fn encode_fixed_name(name: &str) -> Option<[u8; 16]> {
    let bytes = name.as_bytes();
    if bytes.len() > 16 {
        return None;
    }
    let mut raw = [0u8; 16];
    raw[..bytes.len()].copy_from_slice(bytes);
    Some(raw)
}

/// Mach header (`mach_header` / `mach_header_64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachHeader {
    pub is_64: bool,
    pub endian: Endianness,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
    pub reserved: u32,
}

impl MachHeader {
    pub fn size(&self) -> u64 {
        if self.is_64 {
            MACH_HEADER_64_SIZE
        } else {
            MACH_HEADER_SIZE
        }
    }

    pub fn magic(&self) -> u32 {
        if self.is_64 {
            MH_MAGIC_64
        } else {
            MH_MAGIC
        }
    }

    pub fn is_object(&self) -> bool {
        self.filetype == MH_OBJECT
    }

    pub fn word_size(&self) -> u64 {
        if self.is_64 {
            8
        } else {
            4
        }
    }

    pub fn segment_command(&self) -> u32 {
        if self.is_64 {
            LC_SEGMENT_64
        } else {
            LC_SEGMENT
        }
    }

    pub fn segment_command_size(&self) -> u64 {
        if self.is_64 {
            SEGMENT_COMMAND_64_SIZE
        } else {
            SEGMENT_COMMAND_SIZE
        }
    }

    pub fn section_size(&self) -> u64 {
        if self.is_64 {
            SECTION_64_SIZE
        } else {
            SECTION_SIZE
        }
    }

    pub fn nlist_size(&self) -> u64 {
        if self.is_64 {
            16
        } else {
            12
        }
    }
}

/// Segment command fields, independent of width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSegment {
    pub segname: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: u32,
    pub initprot: u32,
    pub nsects: u32,
    pub flags: u32,
}

/// Section header fields, independent of width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSection {
    pub sectname: [u8; 16],
    pub segname: [u8; 16],
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    /// Power-of-two exponent.
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
}

impl RawSection {
    pub fn section_type(&self) -> u32 {
        self.flags & SECTION_TYPE
    }

    pub fn is_zerofill(&self) -> bool {
        is_zerofill(self.flags)
    }
}

pub fn is_zerofill(flags: u32) -> bool {
    matches!(
        flags & SECTION_TYPE,
        S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL
    )
}

/// `nlist` / `nlist_64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawNlist {
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
}

/// `relocation_info`, or a scattered entry kept as its two words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawRelocation {
    Plain {
        r_address: i32,
        r_symbolnum: u32,
        r_pcrel: bool,
        r_length: u8,
        r_extern: bool,
        r_type: u8,
    },
    Scattered([u32; 2]),
}

impl RawRelocation {
    pub fn decode(words: [u32; 2], endian: Endianness) -> Self {
        if words[0] & R_SCATTERED != 0 {
            return RawRelocation::Scattered(words);
        }
        let info = words[1];
        let (r_symbolnum, r_pcrel, r_length, r_extern, r_type) = match endian {
            Endianness::Little => (
                info & 0x00ff_ffff,
                (info >> 24) & 1 != 0,
                ((info >> 25) & 3) as u8,
                (info >> 27) & 1 != 0,
                (info >> 28) as u8,
            ),
            Endianness::Big => (
                info >> 8,
                (info >> 7) & 1 != 0,
                ((info >> 5) & 3) as u8,
                (info >> 4) & 1 != 0,
                (info & 0xf) as u8,
            ),
        };
        RawRelocation::Plain {
            r_address: words[0] as i32,
            r_symbolnum,
            r_pcrel,
            r_length,
            r_extern,
            r_type,
        }
    }

    pub fn encode(&self, endian: Endianness) -> [u32; 2] {
        match *self {
            RawRelocation::Scattered(words) => words,
            RawRelocation::Plain {
                r_address,
                r_symbolnum,
                r_pcrel,
                r_length,
                r_extern,
                r_type,
            } => {
                let info = match endian {
                    Endianness::Little => {
                        (r_symbolnum & 0x00ff_ffff)
                            | (u32::from(r_pcrel) << 24)
                            | (u32::from(r_length & 3) << 25)
                            | (u32::from(r_extern) << 27)
                            | (u32::from(r_type & 0xf) << 28)
                    }
                    Endianness::Big => {
                        (r_symbolnum << 8)
                            | (u32::from(r_pcrel) << 7)
                            | (u32::from(r_length & 3) << 5)
                            | (u32::from(r_extern) << 4)
                            | u32::from(r_type & 0xf)
                    }
                };
                [r_address as u32, info]
            }
        }
    }
}

/// One `fat_arch` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatArch {
    pub cputype: u32,
    pub cpusubtype: u32,
    pub offset: u32,
    pub size: u32,
    /// Power-of-two exponent.
    pub align: u32,
}
