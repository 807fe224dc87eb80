//! Hand-assembled ELF64 images for unit tests.

use crate::core::binary::Endianness;
use crate::core::layout::align_up;
use crate::core::strtab::StringTable;
use crate::formats::elf::dynamic::{encode_dynamic, DynamicTable};
use crate::formats::elf::headers::encode_header;
use crate::formats::elf::relocations::encode_relocation;
use crate::formats::elf::sections::{encode_section_header, SectionId};
use crate::formats::elf::segments::encode_program_header;
use crate::formats::elf::symbols::encode_symbol;
use crate::formats::elf::types::*;
use crate::stream::ByteWriter;

const LE: Endianness = Endianness::Little;

pub(crate) struct TestSection {
    pub name: &'static str,
    pub sh_type: u32,
    pub flags: u64,
    pub address: u64,
    pub offset: u64,
    pub data: Vec<u8>,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub align: u64,
    pub entsize: u64,
}

impl TestSection {
    pub fn new(name: &'static str, sh_type: u32, flags: u64, address: u64, offset: u64, data: Vec<u8>) -> Self {
        Self {
            name,
            sh_type,
            flags,
            address,
            offset,
            size: data.len() as u64,
            data,
            link: 0,
            info: 0,
            align: 1,
            entsize: 0,
        }
    }

    pub fn linked(mut self, link: u32, info: u32) -> Self {
        self.link = link;
        self.info = info;
        self
    }

    pub fn aligned(mut self, align: u64, entsize: u64) -> Self {
        self.align = align;
        self.entsize = entsize;
        self
    }
}

fn load(offset: u64, vaddr: u64, filesz: u64, memsz: u64, flags: u32) -> ProgramHeader {
    ProgramHeader {
        p_type: PT_LOAD,
        p_flags: flags,
        p_offset: offset,
        p_vaddr: vaddr,
        p_paddr: vaddr,
        p_filesz: filesz,
        p_memsz: memsz,
        p_align: 0x1000,
    }
}

/// Lay out `sections` at their given offsets, append `.shstrtab` and the
/// section header table, and put the program headers right after the ELF
/// header.
pub(crate) fn assemble(e_type: u16, entry: u64, phdrs: &[ProgramHeader], sections: &[TestSection]) -> Vec<u8> {
    let class = ElfClass::Elf64;
    let mut names = StringTable::new();
    let name_offsets: Vec<u32> = sections.iter().map(|s| names.intern(s.name)).collect();
    let shstrtab_name = names.intern(".shstrtab");

    let phoff = if phdrs.is_empty() { 0 } else { 64 };
    let end = sections
        .iter()
        .map(|s| if s.sh_type == SHT_NOBITS { s.offset } else { s.offset + s.size })
        .max()
        .unwrap_or(64)
        .max(64 + phdrs.len() as u64 * 56);
    let shstr_offset = end;
    let shoff = align_up(shstr_offset + names.len() as u64, 8);

    let mut ident = [0u8; 16];
    ident[..4].copy_from_slice(ELF_MAGIC);
    ident[4] = 2;
    ident[5] = 1;
    ident[6] = 1;
    let header = ElfHeader {
        ident,
        class,
        endian: LE,
        e_type,
        e_machine: 62,
        e_version: 1,
        e_entry: entry,
        e_phoff: phoff,
        e_shoff: shoff,
        e_flags: 0,
        e_ehsize: 64,
        e_phentsize: 56,
        e_phnum: phdrs.len() as u16,
        e_shentsize: 64,
        e_shnum: sections.len() as u16 + 2,
        e_shstrndx: sections.len() as u16 + 1,
    };

    let mut out = ByteWriter::new();
    encode_header(&header, &mut out);
    for (i, ph) in phdrs.iter().enumerate() {
        encode_program_header(&mut out, phoff + i as u64 * 56, ph, class, LE);
    }
    for s in sections {
        if s.sh_type != SHT_NOBITS {
            out.write_bytes(s.offset, &s.data);
        }
    }
    out.write_bytes(shstr_offset, names.as_bytes());

    let mut shdrs = vec![SectionHeader::default()];
    for (s, name) in sections.iter().zip(name_offsets) {
        shdrs.push(SectionHeader {
            sh_name: name,
            sh_type: s.sh_type,
            sh_flags: s.flags,
            sh_addr: s.address,
            sh_offset: s.offset,
            sh_size: s.size,
            sh_link: s.link,
            sh_info: s.info,
            sh_addralign: s.align,
            sh_entsize: s.entsize,
        });
    }
    shdrs.push(SectionHeader {
        sh_name: shstrtab_name,
        sh_type: SHT_STRTAB,
        sh_offset: shstr_offset,
        sh_size: names.len() as u64,
        sh_addralign: 1,
        ..SectionHeader::default()
    });
    for (i, sh) in shdrs.iter().enumerate() {
        encode_section_header(&mut out, shoff + i as u64 * 64, sh, class, LE);
    }
    out.into_inner()
}

fn symbols(entries: &[RawSymbol]) -> Vec<u8> {
    let mut out = ByteWriter::new();
    for (i, sym) in entries.iter().enumerate() {
        encode_symbol(&mut out, i as u64 * 24, sym, ElfClass::Elf64, LE);
    }
    out.into_inner()
}

/// `ET_EXEC` with `.text` (16 bytes at 0x1000 / 0x401000) as the only
/// member of its `PT_LOAD`, plus `.symtab` and `.strtab` right behind it.
pub(crate) fn minimal_exec() -> Vec<u8> {
    let start = RawSymbol {
        st_name: 1,
        st_value: 0x401000,
        st_size: 16,
        st_info: (STB_GLOBAL << 4) | STT_FUNC,
        st_other: 0,
        st_shndx: 1,
    };
    let sections = vec![
        TestSection::new(".text", SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, 0x401000, 0x1000, vec![0x90; 16])
            .aligned(16, 0),
        TestSection::new(".symtab", SHT_SYMTAB, 0, 0, 0x1010, symbols(&[RawSymbol::default(), start]))
            .linked(3, 1)
            .aligned(8, 24),
        TestSection::new(".strtab", SHT_STRTAB, 0, 0, 0x1040, b"\0_start\0".to_vec()),
    ];
    let phdrs = [load(0x1000, 0x401000, 0x10, 0x10, PF_R | PF_X)];
    assemble(2, 0x401000, &phdrs, &sections)
}

/// `ET_DYN` with a read-only `PT_LOAD` holding the headers and dynamic
/// linking tables, an executable one holding `.text` and a writable one
/// holding `.dynamic`, `.data` and `.bss`.
pub(crate) fn dynamic_exec() -> Vec<u8> {
    let dynsym = symbols(&[
        RawSymbol::default(),
        RawSymbol {
            st_name: 11,
            st_info: (STB_GLOBAL << 4) | STT_FUNC,
            ..RawSymbol::default()
        },
        RawSymbol {
            st_name: 16,
            st_value: 0x1000,
            st_size: 4,
            st_info: (STB_GLOBAL << 4) | STT_FUNC,
            st_other: 0,
            st_shndx: 4,
        },
    ]);
    let dynstr = b"\0libc.so.6\0puts\0exported\0".to_vec();

    let mut rela = ByteWriter::new();
    encode_relocation(
        &mut rela,
        0,
        &RawRelocation {
            r_offset: 0x20b0,
            r_info: RawRelocation::info(ElfClass::Elf64, 0, 8),
            r_addend: Some(0x1000),
        },
        ElfClass::Elf64,
        LE,
    );

    let table = DynamicTable::new(
        SectionId::new(0),
        vec![
            (DT_NEEDED, 1),
            (DT_STRTAB, 0x248),
            (DT_STRSZ, dynstr.len() as u64),
            (DT_SYMTAB, 0x200),
            (DT_SYMENT, 24),
            (DT_RELA, 0x268),
            (DT_RELASZ, 24),
            (DT_RELAENT, 24),
            (DT_NULL, 0),
            (DT_NULL, 0),
            (DT_NULL, 0),
        ],
    );
    let dynamic = encode_dynamic(&table.entries, ElfClass::Elf64, LE);

    let sections = vec![
        TestSection::new(".dynsym", SHT_DYNSYM, SHF_ALLOC, 0x200, 0x200, dynsym)
            .linked(2, 1)
            .aligned(8, 24),
        TestSection::new(".dynstr", SHT_STRTAB, SHF_ALLOC, 0x248, 0x248, dynstr),
        TestSection::new(".rela.dyn", SHT_RELA, SHF_ALLOC, 0x268, 0x268, rela.into_inner())
            .linked(1, 0)
            .aligned(8, 24),
        TestSection::new(".text", SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, 0x1000, 0x1000, vec![0xc3; 16])
            .aligned(16, 0),
        TestSection::new(".dynamic", SHT_DYNAMIC, SHF_ALLOC | SHF_WRITE, 0x2000, 0x2000, dynamic)
            .linked(2, 0)
            .aligned(8, 16),
        TestSection::new(".data", SHT_PROGBITS, SHF_ALLOC | SHF_WRITE, 0x20b0, 0x20b0, 0x1000u64.to_le_bytes().to_vec())
            .aligned(8, 0),
        TestSection {
            size: 0x48,
            ..TestSection::new(".bss", SHT_NOBITS, SHF_ALLOC | SHF_WRITE, 0x20b8, 0x20b8, Vec::new())
        }
        .aligned(8, 0),
    ];
    let phdrs = [
        load(0, 0, 0x280, 0x280, PF_R),
        load(0x1000, 0x1000, 0x10, 0x10, PF_R | PF_X),
        load(0x2000, 0x2000, 0xb8, 0x100, PF_R | PF_W),
        ProgramHeader {
            p_type: PT_DYNAMIC,
            p_flags: PF_R | PF_W,
            p_offset: 0x2000,
            p_vaddr: 0x2000,
            p_paddr: 0x2000,
            p_filesz: 0xb0,
            p_memsz: 0xb0,
            p_align: 8,
        },
    ];
    assemble(3, 0x1000, &phdrs, &sections)
}
