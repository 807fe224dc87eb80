//! Symbol table entries and the symbol entity

use crate::core::arena::Id;
use crate::core::binary::Endianness;
use crate::error::{ParseError, ParseStage};
use crate::formats::elf::sections::{SectionId, SymbolTableKind};
use crate::formats::elf::types::*;
use crate::stream::{ByteStream, ByteWriter, StageExt};

const STAGE: ParseStage = ParseStage::Symbols;

pub type SymbolId = Id<ElfSymbol>;

/// The section a symbol is defined relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolSection {
    Undefined,
    Section(SectionId),
    Absolute,
    Common,
    /// Reserved or out-of-range `st_shndx`, kept verbatim.
    Other(u16),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElfSymbol {
    pub name: String,
    pub(crate) name_offset: Option<u32>,
    /// Value as an address in the parse-time address space, or for symbols
    /// in new sections, an offset from the section start.
    pub value: u64,
    pub size: u64,
    pub binding: u8,
    pub kind: u8,
    pub other: u8,
    pub section: SymbolSection,
    pub table: SymbolTableKind,
}

impl ElfSymbol {
    pub fn is_undefined(&self) -> bool {
        self.section == SymbolSection::Undefined
    }

    pub fn is_local(&self) -> bool {
        self.binding == STB_LOCAL
    }

    pub fn is_global(&self) -> bool {
        matches!(self.binding, STB_GLOBAL | STB_WEAK)
    }

    pub fn is_function(&self) -> bool {
        self.kind == STT_FUNC
    }

    pub(crate) fn info(&self) -> u8 {
        (self.binding << 4) | (self.kind & 0xf)
    }
}

/// Arguments for [`ElfBinary::add_symbol`](crate::formats::elf::ElfBinary::add_symbol).
#[derive(Debug, Clone, PartialEq)]
pub struct NewSymbol {
    pub name: String,
    pub value: u64,
    pub size: u64,
    pub binding: u8,
    pub kind: u8,
    pub other: u8,
    pub section: SymbolSection,
}

impl NewSymbol {
    /// A global function symbol.
    pub fn function(name: impl Into<String>, section: SectionId, value: u64, size: u64) -> Self {
        Self {
            name: name.into(),
            value,
            size,
            binding: STB_GLOBAL,
            kind: STT_FUNC,
            other: 0,
            section: SymbolSection::Section(section),
        }
    }

    /// A global data object symbol.
    pub fn object(name: impl Into<String>, section: SectionId, value: u64, size: u64) -> Self {
        Self {
            kind: STT_OBJECT,
            ..Self::function(name, section, value, size)
        }
    }

    pub fn local(mut self) -> Self {
        self.binding = STB_LOCAL;
        self
    }
}

/// Parse one symbol table entry at `offset`.
pub fn parse_symbol(
    stream: &ByteStream<'_>,
    offset: u64,
    class: ElfClass,
    endian: Endianness,
) -> Result<RawSymbol, ParseError> {
    match class {
        ElfClass::Elf32 => Ok(RawSymbol {
            st_name: stream.read_u32(offset, endian).stage(STAGE)?,
            st_value: u64::from(stream.read_u32(offset + 4, endian).stage(STAGE)?),
            st_size: u64::from(stream.read_u32(offset + 8, endian).stage(STAGE)?),
            st_info: stream.read_u8(offset + 12).stage(STAGE)?,
            st_other: stream.read_u8(offset + 13).stage(STAGE)?,
            st_shndx: stream.read_u16(offset + 14, endian).stage(STAGE)?,
        }),
        ElfClass::Elf64 => Ok(RawSymbol {
            st_name: stream.read_u32(offset, endian).stage(STAGE)?,
            st_info: stream.read_u8(offset + 4).stage(STAGE)?,
            st_other: stream.read_u8(offset + 5).stage(STAGE)?,
            st_shndx: stream.read_u16(offset + 6, endian).stage(STAGE)?,
            st_value: stream.read_u64(offset + 8, endian).stage(STAGE)?,
            st_size: stream.read_u64(offset + 16, endian).stage(STAGE)?,
        }),
    }
}

pub fn encode_symbol(out: &mut ByteWriter, offset: u64, sym: &RawSymbol, class: ElfClass, endian: Endianness) {
    match class {
        ElfClass::Elf32 => {
            out.write_u32(offset, sym.st_name, endian);
            out.write_u32(offset + 4, sym.st_value as u32, endian);
            out.write_u32(offset + 8, sym.st_size as u32, endian);
            out.write_u8(offset + 12, sym.st_info);
            out.write_u8(offset + 13, sym.st_other);
            out.write_u16(offset + 14, sym.st_shndx, endian);
        }
        ElfClass::Elf64 => {
            out.write_u32(offset, sym.st_name, endian);
            out.write_u8(offset + 4, sym.st_info);
            out.write_u8(offset + 5, sym.st_other);
            out.write_u16(offset + 6, sym.st_shndx, endian);
            out.write_u64(offset + 8, sym.st_value, endian);
            out.write_u64(offset + 16, sym.st_size, endian);
        }
    }
}

/// Parse every entry of a symbol table section body.
pub fn parse_symbol_table(
    data: &[u8],
    class: ElfClass,
    endian: Endianness,
    max_symbols: usize,
) -> Result<Vec<RawSymbol>, ParseError> {
    let entsize = class.sym_size();
    let len = data.len() as u64;
    if len % entsize != 0 {
        return Err(ParseError::table(
            STAGE,
            format!("table size {:#x} is not a multiple of {}", len, entsize),
        ));
    }
    let count = len / entsize;
    if count > max_symbols as u64 {
        return Err(ParseError::table(
            STAGE,
            format!("{} symbols exceed limit {}", count, max_symbols),
        ));
    }
    let stream = ByteStream::new(data);
    (0..count)
        .map(|i| parse_symbol(&stream, i * entsize, class, endian))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawSymbol {
        RawSymbol {
            st_name: 1,
            st_value: 0x401000,
            st_size: 0x20,
            st_info: (STB_GLOBAL << 4) | STT_FUNC,
            st_other: 0,
            st_shndx: 5,
        }
    }

    #[test]
    fn test_symbol_layouts() {
        for class in [ElfClass::Elf32, ElfClass::Elf64] {
            let mut out = ByteWriter::new();
            encode_symbol(&mut out, 0, &raw(), class, Endianness::Little);
            assert_eq!(out.len(), class.sym_size());
            let parsed = parse_symbol(&ByteStream::new(out.as_slice()), 0, class, Endianness::Little).unwrap();
            assert_eq!(parsed, raw());
            assert_eq!(parsed.st_bind(), STB_GLOBAL);
            assert_eq!(parsed.st_type(), STT_FUNC);
        }
    }

    #[test]
    fn test_table_size_must_be_whole_entries() {
        let data = vec![0u8; 30];
        let err = parse_symbol_table(&data, ElfClass::Elf64, Endianness::Little, 100).unwrap_err();
        assert_eq!(err.stage(), Some(ParseStage::Symbols));
        let data = vec![0u8; 48];
        assert_eq!(parse_symbol_table(&data, ElfClass::Elf64, Endianness::Little, 100).unwrap().len(), 2);
        assert!(parse_symbol_table(&data, ElfClass::Elf64, Endianness::Little, 1).is_err());
    }

    #[test]
    fn test_new_symbol_helpers() {
        let id = SectionId::new(3);
        let sym = NewSymbol::object("counter", id, 0x10, 8).local();
        assert_eq!(sym.binding, STB_LOCAL);
        assert_eq!(sym.kind, STT_OBJECT);
        assert_eq!(sym.section, SymbolSection::Section(id));
    }
}
