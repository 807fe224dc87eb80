//! Relocation entries and the relocation entity

use crate::core::arena::Id;
use crate::core::binary::Endianness;
use crate::error::{ParseError, ParseStage};
use crate::formats::elf::sections::SectionId;
use crate::formats::elf::symbols::SymbolId;
use crate::formats::elf::types::*;
use crate::stream::{ByteStream, ByteWriter, StageExt};

const STAGE: ParseStage = ParseStage::Relocations;

pub type RelocationId = Id<ElfRelocation>;

/// Where a relocation applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationPlace {
    /// An offset inside a section; follows the section when it moves.
    Section { section: SectionId, offset: u64 },
    /// An address no section covers, kept verbatim.
    Address(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationSymbol {
    None,
    Symbol(SymbolId),
    /// Index into the linked symbol table that names no parsed symbol.
    Raw(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElfRelocation {
    /// The `SHT_REL`/`SHT_RELA` section holding this entry.
    pub owner: SectionId,
    pub place: RelocationPlace,
    pub symbol: RelocationSymbol,
    pub kind: u32,
    /// Explicit addend; `None` for `SHT_REL` entries.
    pub addend: Option<i64>,
}

/// Arguments for [`ElfBinary::add_relocation`](crate::formats::elf::ElfBinary::add_relocation).
#[derive(Debug, Clone, PartialEq)]
pub struct NewRelocation {
    pub owner: SectionId,
    pub place: RelocationPlace,
    pub symbol: RelocationSymbol,
    pub kind: u32,
    pub addend: Option<i64>,
}

pub fn parse_relocation(
    stream: &ByteStream<'_>,
    offset: u64,
    class: ElfClass,
    endian: Endianness,
    rela: bool,
) -> Result<RawRelocation, ParseError> {
    let wide = class.is_64();
    let w = class.word_size();
    let r_offset = stream.read_word(offset, wide, endian).stage(STAGE)?;
    let r_info = stream.read_word(offset + w, wide, endian).stage(STAGE)?;
    let r_addend = if rela {
        Some(if wide {
            stream.read_i64(offset + 2 * w, endian).stage(STAGE)?
        } else {
            i64::from(stream.read_i32(offset + 2 * w, endian).stage(STAGE)?)
        })
    } else {
        None
    };
    Ok(RawRelocation {
        r_offset,
        r_info,
        r_addend,
    })
}

pub fn encode_relocation(
    out: &mut ByteWriter,
    offset: u64,
    rel: &RawRelocation,
    class: ElfClass,
    endian: Endianness,
) {
    let wide = class.is_64();
    let w = class.word_size();
    out.write_word(offset, rel.r_offset, wide, endian);
    out.write_word(offset + w, rel.r_info, wide, endian);
    if let Some(addend) = rel.r_addend {
        if wide {
            out.write_i64(offset + 2 * w, addend, endian);
        } else {
            out.write_i32(offset + 2 * w, addend as i32, endian);
        }
    }
}

/// Parse the body of a relocation section.
pub fn parse_relocation_table(
    data: &[u8],
    class: ElfClass,
    endian: Endianness,
    rela: bool,
    max_relocations: usize,
) -> Result<Vec<RawRelocation>, ParseError> {
    let entsize = class.rel_size(rela);
    let len = data.len() as u64;
    if len % entsize != 0 {
        return Err(ParseError::table(
            STAGE,
            format!("table size {:#x} is not a multiple of {}", len, entsize),
        ));
    }
    let count = len / entsize;
    if count > max_relocations as u64 {
        return Err(ParseError::table(
            STAGE,
            format!("{} relocations exceed limit {}", count, max_relocations),
        ));
    }
    let stream = ByteStream::new(data);
    (0..count)
        .map(|i| parse_relocation(&stream, i * entsize, class, endian, rela))
        .collect()
}
