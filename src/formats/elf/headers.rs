//! ELF header parsing and encoding

use crate::error::{ParseError, ParseStage};
use crate::formats::elf::types::*;
use crate::stream::{ByteStream, ByteWriter, StageExt};

const STAGE: ParseStage = ParseStage::Header;

/// Parse the ELF file header.
pub fn parse_header(stream: &ByteStream<'_>) -> Result<ElfHeader, ParseError> {
    let ident_bytes = stream.read(0, 16).stage(STAGE)?;
    if &ident_bytes[0..4] != ELF_MAGIC {
        return Err(ParseError::header(STAGE, "invalid ELF magic"));
    }
    let mut ident = [0u8; 16];
    ident.copy_from_slice(ident_bytes);

    let class = ElfClass::from_u8(ident[4])?;
    let endian = endianness_from_u8(ident[5])?;
    stream.read(0, class.header_size()).stage(STAGE)?;

    let u16_at = |off: u64| stream.read_u16(off, endian).stage(STAGE);
    let u32_at = |off: u64| stream.read_u32(off, endian).stage(STAGE);
    let word_at = |off: u64| stream.read_word(off, class.is_64(), endian).stage(STAGE);

    // Fields after e_version sit at class-dependent offsets.
    let (entry, phoff, shoff, rest) = match class {
        ElfClass::Elf32 => (24, 28, 32, 36),
        ElfClass::Elf64 => (24, 32, 40, 48),
    };

    let header = ElfHeader {
        ident,
        class,
        endian,
        e_type: u16_at(16)?,
        e_machine: u16_at(18)?,
        e_version: u32_at(20)?,
        e_entry: word_at(entry)?,
        e_phoff: word_at(phoff)?,
        e_shoff: word_at(shoff)?,
        e_flags: u32_at(rest)?,
        e_ehsize: u16_at(rest + 4)?,
        e_phentsize: u16_at(rest + 6)?,
        e_phnum: u16_at(rest + 8)?,
        e_shentsize: u16_at(rest + 10)?,
        e_shnum: u16_at(rest + 12)?,
        e_shstrndx: u16_at(rest + 14)?,
    };

    if u64::from(header.e_ehsize) != class.header_size() {
        return Err(ParseError::header(
            STAGE,
            format!(
                "invalid e_ehsize: expected {}, got {}",
                class.header_size(),
                header.e_ehsize
            ),
        ));
    }
    if header.e_phnum > 0 && u64::from(header.e_phentsize) != class.phdr_size() {
        return Err(ParseError::header(
            STAGE,
            format!(
                "invalid e_phentsize: expected {}, got {}",
                class.phdr_size(),
                header.e_phentsize
            ),
        ));
    }
    if header.e_shoff != 0 && u64::from(header.e_shentsize) != class.shdr_size() {
        return Err(ParseError::header(
            STAGE,
            format!(
                "invalid e_shentsize: expected {}, got {}",
                class.shdr_size(),
                header.e_shentsize
            ),
        ));
    }

    Ok(header)
}

/// Write `header` at offset 0.
pub fn encode_header(header: &ElfHeader, out: &mut ByteWriter) {
    let endian = header.endian;
    let wide = header.class.is_64();
    let (entry, phoff, shoff, rest) = match header.class {
        ElfClass::Elf32 => (24, 28, 32, 36),
        ElfClass::Elf64 => (24, 32, 40, 48),
    };

    out.write_bytes(0, &header.ident);
    out.write_u16(16, header.e_type, endian);
    out.write_u16(18, header.e_machine, endian);
    out.write_u32(20, header.e_version, endian);
    out.write_word(entry, header.e_entry, wide, endian);
    out.write_word(phoff, header.e_phoff, wide, endian);
    out.write_word(shoff, header.e_shoff, wide, endian);
    out.write_u32(rest, header.e_flags, endian);
    out.write_u16(rest + 4, header.e_ehsize, endian);
    out.write_u16(rest + 6, header.e_phentsize, endian);
    out.write_u16(rest + 8, header.e_phnum, endian);
    out.write_u16(rest + 10, header.e_shentsize, endian);
    out.write_u16(rest + 12, header.e_shnum, endian);
    out.write_u16(rest + 14, header.e_shstrndx, endian);
}
