//! Per-section relocation entries of object files

use crate::core::arena::Id;
use crate::core::binary::Endianness;
use crate::error::{ParseError, ParseStage};
use crate::formats::macho::segments::SectionId;
use crate::formats::macho::symbols::SymbolId;
use crate::formats::macho::types::*;
use crate::stream::{ByteStream, ByteWriter, StageExt};

const STAGE: ParseStage = ParseStage::Relocations;

/// `ARM64_RELOC_ADDEND`: its symbol field holds an addend, not an index.
const ARM64_RELOC_ADDEND: u8 = 10;

pub type MachRelocationId = Id<MachRelocation>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationTarget {
    /// External relocation against a symbol table entry.
    Symbol(SymbolId),
    /// Local relocation against a section, by its final ordinal.
    Section(SectionId),
    /// Symbol field kept as read.
    Raw { symbolnum: u32, external: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachRelocation {
    /// Section the relocation applies to.
    pub section: SectionId,
    /// Offset within that section.
    pub offset: i32,
    pub target: RelocationTarget,
    pub pcrel: bool,
    /// log2 of the relocated width.
    pub length: u8,
    pub kind: u8,
    /// Scattered entries are carried as their two raw words.
    pub scattered: Option<[u32; 2]>,
}

/// Arguments for [`MachOBinary::add_relocation`](crate::formats::macho::MachOBinary::add_relocation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMachRelocation {
    pub section: SectionId,
    pub offset: i32,
    pub target: RelocationTarget,
    pub pcrel: bool,
    pub length: u8,
    pub kind: u8,
}

pub fn parse_relocations(
    data: &[u8],
    count: u32,
    endian: Endianness,
    max_relocations: usize,
) -> Result<Vec<RawRelocation>, ParseError> {
    if count as usize > max_relocations {
        return Err(ParseError::table(
            STAGE,
            format!("{} relocations exceed the limit of {}", count, max_relocations),
        ));
    }
    let stream = ByteStream::new(data);
    stream.read(0, u64::from(count) * RELOCATION_INFO_SIZE).stage(STAGE)?;
    (0..u64::from(count))
        .map(|i| {
            let at = i * RELOCATION_INFO_SIZE;
            let words = [
                stream.read_u32(at, endian).stage(STAGE)?,
                stream.read_u32(at + 4, endian).stage(STAGE)?,
            ];
            Ok(RawRelocation::decode(words, endian))
        })
        .collect()
}

pub fn encode_relocations(entries: &[RawRelocation], endian: Endianness) -> Vec<u8> {
    let mut out = ByteWriter::new();
    out.resize(entries.len() as u64 * RELOCATION_INFO_SIZE);
    for (i, entry) in entries.iter().enumerate() {
        let [first, second] = entry.encode(endian);
        let at = i as u64 * RELOCATION_INFO_SIZE;
        out.write_u32(at, first, endian);
        out.write_u32(at + 4, second, endian);
    }
    out.into_inner()
}

/// Whether the symbol field of a plain entry is something other than a
/// symbol or section index.
pub(crate) fn carries_immediate(cputype: u32, r_type: u8) -> bool {
    cputype == CPU_TYPE_ARM64 && r_type == ARM64_RELOC_ADDEND
}
