//! Program header table and the segment entity

use crate::config::ParseConfig;
use crate::core::arena::Id;
use crate::core::binary::{Endianness, Permissions};
use crate::core::layout::Placement;
use crate::error::{ParseError, ParseStage};
use crate::formats::elf::types::*;
use crate::stream::{ByteStream, ByteWriter, StageExt};

const STAGE: ParseStage = ParseStage::ProgramHeaders;

pub type SegmentId = Id<ElfSegment>;

#[derive(Debug, Clone)]
pub struct ElfSegment {
    pub p_type: u32,
    pub flags: u32,
    pub offset: u64,
    pub address: u64,
    pub physical_address: u64,
    pub file_size: u64,
    pub mem_size: u64,
    pub align: u64,
    pub(crate) original: Option<Placement>,
    /// Bytes of a segment created by an edit.
    pub(crate) payload: Option<Vec<u8>>,
    /// Address requested for a new segment.
    pub(crate) fixed_address: Option<u64>,
}

impl ElfSegment {
    pub(crate) fn from_header(ph: &ProgramHeader) -> Self {
        Self {
            p_type: ph.p_type,
            flags: ph.p_flags,
            offset: ph.p_offset,
            address: ph.p_vaddr,
            physical_address: ph.p_paddr,
            file_size: ph.p_filesz,
            mem_size: ph.p_memsz,
            align: ph.p_align,
            original: Some(Placement::new(ph.p_offset, ph.p_vaddr, ph.p_filesz, ph.p_memsz)),
            payload: None,
            fixed_address: None,
        }
    }

    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    pub fn permissions(&self) -> Permissions {
        Permissions::from_elf_flags(self.flags)
    }

    pub fn is_new(&self) -> bool {
        self.original.is_none()
    }

    /// Whether the original file image of this segment holds `[offset, offset + size)`.
    pub(crate) fn covers_file(&self, offset: u64, size: u64) -> bool {
        let Some(o) = self.original else { return false };
        let end = offset.saturating_add(size);
        if o.file_size == 0 {
            return false;
        }
        if size == 0 {
            return o.offset <= offset && offset < o.file_end();
        }
        o.offset <= offset && end <= o.file_end()
    }

    pub(crate) fn covers_address(&self, address: u64, size: u64) -> bool {
        let Some(o) = self.original else { return false };
        let end = address.saturating_add(size);
        o.mem_size > 0 && o.address <= address && end <= o.mem_end()
    }

    pub(crate) fn to_header(&self) -> ProgramHeader {
        ProgramHeader {
            p_type: self.p_type,
            p_flags: self.flags,
            p_offset: self.offset,
            p_vaddr: self.address,
            p_paddr: self.physical_address,
            p_filesz: self.file_size,
            p_memsz: self.mem_size,
            p_align: self.align,
        }
    }
}

/// Parse one program header at `offset`.
pub fn parse_program_header(
    stream: &ByteStream<'_>,
    offset: u64,
    class: ElfClass,
    endian: Endianness,
) -> Result<ProgramHeader, ParseError> {
    let u32_at = |rel: u64| stream.read_u32(offset + rel, endian).stage(STAGE);
    let word_at = |rel: u64| stream.read_word(offset + rel, class.is_64(), endian).stage(STAGE);

    // p_flags moved next to p_type in the 64-bit layout.
    match class {
        ElfClass::Elf32 => Ok(ProgramHeader {
            p_type: u32_at(0)?,
            p_offset: word_at(4)?,
            p_vaddr: word_at(8)?,
            p_paddr: word_at(12)?,
            p_filesz: word_at(16)?,
            p_memsz: word_at(20)?,
            p_flags: u32_at(24)?,
            p_align: word_at(28)?,
        }),
        ElfClass::Elf64 => Ok(ProgramHeader {
            p_type: u32_at(0)?,
            p_flags: u32_at(4)?,
            p_offset: word_at(8)?,
            p_vaddr: word_at(16)?,
            p_paddr: word_at(24)?,
            p_filesz: word_at(32)?,
            p_memsz: word_at(40)?,
            p_align: word_at(48)?,
        }),
    }
}

pub fn encode_program_header(
    out: &mut ByteWriter,
    offset: u64,
    ph: &ProgramHeader,
    class: ElfClass,
    endian: Endianness,
) {
    let wide = class.is_64();
    match class {
        ElfClass::Elf32 => {
            out.write_u32(offset, ph.p_type, endian);
            out.write_word(offset + 4, ph.p_offset, wide, endian);
            out.write_word(offset + 8, ph.p_vaddr, wide, endian);
            out.write_word(offset + 12, ph.p_paddr, wide, endian);
            out.write_word(offset + 16, ph.p_filesz, wide, endian);
            out.write_word(offset + 20, ph.p_memsz, wide, endian);
            out.write_u32(offset + 24, ph.p_flags, endian);
            out.write_word(offset + 28, ph.p_align, wide, endian);
        }
        ElfClass::Elf64 => {
            out.write_u32(offset, ph.p_type, endian);
            out.write_u32(offset + 4, ph.p_flags, endian);
            out.write_word(offset + 8, ph.p_offset, wide, endian);
            out.write_word(offset + 16, ph.p_vaddr, wide, endian);
            out.write_word(offset + 24, ph.p_paddr, wide, endian);
            out.write_word(offset + 32, ph.p_filesz, wide, endian);
            out.write_word(offset + 40, ph.p_memsz, wide, endian);
            out.write_word(offset + 48, ph.p_align, wide, endian);
        }
    }
}

/// Parse the whole program header table.
pub fn parse_program_headers(
    stream: &ByteStream<'_>,
    header: &ElfHeader,
    config: &ParseConfig,
) -> Result<Vec<ProgramHeader>, ParseError> {
    if header.e_phnum == 0 || header.e_phoff == 0 {
        return Ok(Vec::new());
    }
    let count = usize::from(header.e_phnum);
    if count > config.max_segments {
        return Err(ParseError::table(
            STAGE,
            format!("{} program headers exceed limit {}", count, config.max_segments),
        ));
    }
    let entsize = header.class.phdr_size();
    stream
        .read(header.e_phoff, entsize * count as u64)
        .stage(STAGE)?;

    let mut headers = Vec::with_capacity(count);
    for i in 0..count as u64 {
        let ph = parse_program_header(stream, header.e_phoff + i * entsize, header.class, header.endian)?;
        if ph.p_type == PT_LOAD && ph.p_filesz > ph.p_memsz {
            return Err(ParseError::table(
                STAGE,
                format!("PT_LOAD {} has p_filesz {:#x} > p_memsz {:#x}", i, ph.p_filesz, ph.p_memsz),
            ));
        }
        if ph.p_filesz > 0 && ph.p_type != PT_NULL {
            stream.read(ph.p_offset, ph.p_filesz).stage(STAGE)?;
        }
        headers.push(ph);
    }
    Ok(headers)
}
