//! Symbol table (`nlist`) and indirect symbol table

use crate::core::arena::Id;
use crate::core::binary::Endianness;
use crate::error::{ParseError, ParseStage};
use crate::formats::macho::segments::SectionId;
use crate::formats::macho::types::*;
use crate::stream::{ByteStream, ByteWriter, StageExt};

const STAGE: ParseStage = ParseStage::Symbols;

pub type SymbolId = Id<MachSymbol>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachSymbol {
    pub name: String,
    pub(crate) name_offset: Option<u32>,
    pub n_type: u8,
    /// Defining section for `N_SECT` symbols.
    pub section: Option<SectionId>,
    /// `n_sect` as read, kept for symbols without a resolvable section.
    pub(crate) raw_sect: u8,
    pub desc: u16,
    pub value: u64,
}

impl MachSymbol {
    pub fn is_stab(&self) -> bool {
        self.n_type & N_STAB != 0
    }

    pub fn is_external(&self) -> bool {
        !self.is_stab() && self.n_type & N_EXT != 0
    }

    pub fn kind(&self) -> u8 {
        self.n_type & N_TYPE
    }

    pub fn is_undefined(&self) -> bool {
        !self.is_stab() && self.kind() == N_UNDF
    }

    pub fn is_defined(&self) -> bool {
        !self.is_stab() && self.kind() != N_UNDF
    }

    /// Group for the `LC_DYSYMTAB` ordering: locals, defined externals,
    /// then undefined externals.
    pub(crate) fn group(&self) -> u8 {
        if !self.is_external() {
            0
        } else if self.is_undefined() {
            2
        } else {
            1
        }
    }
}

/// Arguments for [`MachOBinary::add_symbol`](crate::formats::macho::MachOBinary::add_symbol).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMachSymbol {
    pub name: String,
    /// Defining section; `None` makes an undefined (imported) symbol.
    pub section: Option<SectionId>,
    /// Address, or the offset within a new section.
    pub value: u64,
    pub external: bool,
    pub desc: u16,
}

impl NewMachSymbol {
    pub fn defined(name: impl Into<String>, section: SectionId, value: u64) -> Self {
        Self {
            name: name.into(),
            section: Some(section),
            value,
            external: true,
            desc: 0,
        }
    }

    pub fn undefined(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            section: None,
            value: 0,
            external: true,
            desc: 0,
        }
    }

    pub fn local(mut self) -> Self {
        self.external = false;
        self
    }
}

/// Entry of the indirect symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndirectSymbol {
    Symbol(SymbolId),
    /// `INDIRECT_SYMBOL_LOCAL` / `INDIRECT_SYMBOL_ABS` markers, or an index
    /// that did not name a symbol.
    Raw(u32),
}

pub fn parse_nlists(
    data: &[u8],
    count: u32,
    header: &MachHeader,
    max_symbols: usize,
) -> Result<Vec<RawNlist>, ParseError> {
    if count as usize > max_symbols {
        return Err(ParseError::table(
            STAGE,
            format!("{} symbols exceed the limit of {}", count, max_symbols),
        ));
    }
    let stream = ByteStream::new(data);
    let e = header.endian;
    let size = header.nlist_size();
    stream.read(0, u64::from(count) * size).stage(STAGE)?;
    (0..u64::from(count))
        .map(|i| {
            let at = i * size;
            Ok(RawNlist {
                n_strx: stream.read_u32(at, e).stage(STAGE)?,
                n_type: stream.read_u8(at + 4).stage(STAGE)?,
                n_sect: stream.read_u8(at + 5).stage(STAGE)?,
                n_desc: stream.read_u16(at + 6, e).stage(STAGE)?,
                n_value: stream.read_word(at + 8, header.is_64, e).stage(STAGE)?,
            })
        })
        .collect()
}

pub fn encode_nlist(out: &mut ByteWriter, offset: u64, sym: &RawNlist, header: &MachHeader) {
    let e = header.endian;
    out.write_u32(offset, sym.n_strx, e);
    out.write_u8(offset + 4, sym.n_type);
    out.write_u8(offset + 5, sym.n_sect);
    out.write_u16(offset + 6, sym.n_desc, e);
    out.write_word(offset + 8, sym.n_value, header.is_64, e);
}

pub fn parse_indirect_symbols(data: &[u8], count: u32, endian: Endianness) -> Result<Vec<u32>, ParseError> {
    let stream = ByteStream::new(data);
    stream.read(0, u64::from(count) * 4).stage(STAGE)?;
    (0..u64::from(count))
        .map(|i| stream.read_u32(i * 4, endian).stage(STAGE))
        .collect()
}
