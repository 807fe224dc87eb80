//! COFF symbol table (read only)

use crate::core::binary::Endianness;
use crate::error::{ParseError, ParseStage};
use crate::formats::pe::sections::SectionId;
use crate::formats::pe::types::*;
use crate::stream::{ByteStream, StageExt};

const STAGE: ParseStage = ParseStage::Symbols;
const LE: Endianness = Endianness::Little;
const MAX_NAME: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeSymbol {
    pub name: String,
    pub value: u32,
    /// Section the symbol is defined in; `None` for undefined, absolute and
    /// debug symbols.
    pub section: Option<SectionId>,
    pub section_number: i16,
    pub sym_type: u16,
    pub storage_class: u8,
    pub number_of_aux_symbols: u8,
}

impl PeSymbol {
    pub fn is_external(&self) -> bool {
        self.storage_class == 2
    }
}

/// Decode the records at `offset`, skipping auxiliary records.
pub fn parse_coff_symbols(
    stream: &ByteStream<'_>,
    offset: u64,
    count: u32,
    max_symbols: usize,
) -> Result<Vec<RawCoffSymbol>, ParseError> {
    if count as usize > max_symbols {
        return Err(ParseError::table(
            STAGE,
            format!("{} COFF symbols exceed the limit of {}", count, max_symbols),
        ));
    }
    stream.read(offset, u64::from(count) * COFF_SYMBOL_SIZE).stage(STAGE)?;

    let mut symbols = Vec::new();
    let mut i = 0u64;
    while i < u64::from(count) {
        let at = offset + i * COFF_SYMBOL_SIZE;
        let mut name = [0u8; 8];
        name.copy_from_slice(stream.read(at, 8).stage(STAGE)?);
        let sym = RawCoffSymbol {
            name,
            value: stream.read_u32(at + 8, LE).stage(STAGE)?,
            section_number: stream.read_u16(at + 12, LE).stage(STAGE)? as i16,
            sym_type: stream.read_u16(at + 14, LE).stage(STAGE)?,
            storage_class: stream.read_u8(at + 16).stage(STAGE)?,
            number_of_aux_symbols: stream.read_u8(at + 17).stage(STAGE)?,
        };
        i += 1 + u64::from(sym.number_of_aux_symbols);
        symbols.push(sym);
    }
    Ok(symbols)
}

/// Symbol name: inline, or an offset into the string table that follows
/// the records when the first four bytes are zero.
pub fn symbol_name(stream: &ByteStream<'_>, strings: u64, raw: &RawCoffSymbol) -> Result<String, ParseError> {
    if raw.name[..4] != [0; 4] {
        return Ok(section_name(&raw.name));
    }
    let offset = u32::from_le_bytes([raw.name[4], raw.name[5], raw.name[6], raw.name[7]]);
    let bytes = stream
        .read_cstr(strings + u64::from(offset), MAX_NAME)
        .stage(ParseStage::Strings)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}
