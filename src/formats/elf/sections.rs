//! Section headers and the section entity

use crate::config::ParseConfig;
use crate::core::arena::Id;
use crate::core::layout::Placement;
use crate::core::strtab::StringTable;
use crate::error::{ParseError, ParseStage};
use crate::formats::elf::segments::SegmentId;
use crate::formats::elf::types::*;
use crate::stream::{ByteStream, ByteWriter, StageExt};

const STAGE: ParseStage = ParseStage::SectionHeaders;

pub type SectionId = Id<ElfSection>;

/// A section index field (`sh_link`, `sh_info`) decoded to a handle when it
/// names a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionRef {
    None,
    Section(SectionId),
    Raw(u32),
}

/// Which symbol table a table section holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolTableKind {
    Static,
    Dynamic,
}

/// Section contents. Tables the model understands are regenerated from
/// entities at build time; everything else is owned bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum ElfSectionKind {
    Data(Vec<u8>),
    NoBits(u64),
    SymbolTable(SymbolTableKind),
    StringTable(StringTable),
    Relocations { rela: bool },
    Dynamic,
    /// Section of a type we do not know, kept with its type tag.
    Opaque(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct ElfSection {
    pub name: String,
    pub(crate) name_offset: Option<u32>,
    pub sh_type: u32,
    pub flags: u64,
    /// Address at parse time. New sections get theirs from the layout.
    pub address: u64,
    pub alignment: u64,
    pub entsize: u64,
    pub link: SectionRef,
    pub info: SectionRef,
    pub kind: ElfSectionKind,
    pub(crate) original: Option<Placement>,
    /// Owning `PT_LOAD` segment.
    pub(crate) segment: Option<SegmentId>,
}

impl ElfSection {
    pub fn is_alloc(&self) -> bool {
        self.flags & SHF_ALLOC != 0
    }

    pub fn is_nobits(&self) -> bool {
        matches!(self.kind, ElfSectionKind::NoBits(_))
    }

    /// Raw content for data-carrying sections.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.kind {
            ElfSectionKind::Data(bytes) | ElfSectionKind::Opaque(bytes) => Some(bytes),
            ElfSectionKind::StringTable(table) => Some(table.as_bytes()),
            _ => None,
        }
    }

    /// File offset the section was parsed from.
    pub fn original_offset(&self) -> Option<u64> {
        self.original.map(|p| p.offset)
    }

    pub fn original_size(&self) -> Option<u64> {
        self.original.map(|p| p.mem_size)
    }

    pub(crate) fn contains_address(&self, address: u64) -> bool {
        let Some(o) = self.original else { return false };
        self.is_alloc() && o.address <= address && address < o.address.saturating_add(o.mem_size)
    }
}

/// Parse one section header at `offset`.
pub fn parse_section_header(
    stream: &ByteStream<'_>,
    offset: u64,
    class: ElfClass,
    endian: crate::core::binary::Endianness,
) -> Result<SectionHeader, ParseError> {
    let wide = class.is_64();
    let w = class.word_size();
    let u32_at = |rel: u64| stream.read_u32(offset + rel, endian).stage(STAGE);
    let word_at = |rel: u64| stream.read_word(offset + rel, wide, endian).stage(STAGE);

    // name, type, flags, addr, offset, size, link, info, addralign, entsize
    let flags = 8;
    let addr = flags + w;
    let off = addr + w;
    let size = off + w;
    let link = size + w;
    Ok(SectionHeader {
        sh_name: u32_at(0)?,
        sh_type: u32_at(4)?,
        sh_flags: word_at(flags)?,
        sh_addr: word_at(addr)?,
        sh_offset: word_at(off)?,
        sh_size: word_at(size)?,
        sh_link: u32_at(link)?,
        sh_info: u32_at(link + 4)?,
        sh_addralign: word_at(link + 8)?,
        sh_entsize: word_at(link + 8 + w)?,
    })
}

pub fn encode_section_header(
    out: &mut ByteWriter,
    offset: u64,
    sh: &SectionHeader,
    class: ElfClass,
    endian: crate::core::binary::Endianness,
) {
    let wide = class.is_64();
    let w = class.word_size();
    let flags = 8;
    let addr = flags + w;
    let off = addr + w;
    let size = off + w;
    let link = size + w;
    out.write_u32(offset, sh.sh_name, endian);
    out.write_u32(offset + 4, sh.sh_type, endian);
    out.write_word(offset + flags, sh.sh_flags, wide, endian);
    out.write_word(offset + addr, sh.sh_addr, wide, endian);
    out.write_word(offset + off, sh.sh_offset, wide, endian);
    out.write_word(offset + size, sh.sh_size, wide, endian);
    out.write_u32(offset + link, sh.sh_link, endian);
    out.write_u32(offset + link + 4, sh.sh_info, endian);
    out.write_word(offset + link + 8, sh.sh_addralign, wide, endian);
    out.write_word(offset + link + 8 + w, sh.sh_entsize, wide, endian);
}

/// The raw section header table, including entry zero.
#[derive(Debug, Clone)]
pub struct RawSectionTable {
    pub headers: Vec<SectionHeader>,
    /// Index of the section-name string table, after extended-index decoding.
    pub shstrndx: Option<usize>,
}

/// Parse the section header table, honouring extended numbering where
/// `e_shnum`/`e_shstrndx` live in entry zero.
pub fn parse_section_table(
    stream: &ByteStream<'_>,
    header: &ElfHeader,
    config: &ParseConfig,
) -> Result<RawSectionTable, ParseError> {
    if header.e_shoff == 0 {
        return Ok(RawSectionTable {
            headers: Vec::new(),
            shstrndx: None,
        });
    }
    let entsize = header.class.shdr_size();
    let first = parse_section_header(stream, header.e_shoff, header.class, header.endian)?;
    let count = if header.e_shnum == 0 {
        first.sh_size
    } else {
        u64::from(header.e_shnum)
    };
    if count == 0 {
        return Ok(RawSectionTable {
            headers: Vec::new(),
            shstrndx: None,
        });
    }
    if count > config.max_sections as u64 {
        return Err(ParseError::table(
            STAGE,
            format!("{} section headers exceed limit {}", count, config.max_sections),
        ));
    }
    let total = count
        .checked_mul(entsize)
        .ok_or_else(|| ParseError::table(STAGE, "section table size overflows"))?;
    stream.read(header.e_shoff, total).stage(STAGE)?;

    let mut headers = Vec::with_capacity(count as usize);
    for i in 0..count {
        headers.push(parse_section_header(
            stream,
            header.e_shoff + i * entsize,
            header.class,
            header.endian,
        )?);
    }

    let shstrndx = if header.e_shstrndx == SHN_XINDEX {
        first.sh_link as usize
    } else {
        header.e_shstrndx as usize
    };
    let shstrndx = (shstrndx != 0 && shstrndx < headers.len()).then_some(shstrndx);
    Ok(RawSectionTable { headers, shstrndx })
}
