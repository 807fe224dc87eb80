//! PE header parsing and encoding

use crate::core::binary::Endianness;
use crate::error::{ParseError, ParseStage};
use crate::formats::pe::types::*;
use crate::stream::{ByteStream, ByteWriter, StageExt};

const STAGE: ParseStage = ParseStage::Header;
const LE: Endianness = Endianness::Little;

/// Parse the DOS header and check both signatures.
pub fn parse_dos_header(stream: &ByteStream<'_>) -> Result<DosHeader, ParseError> {
    stream.read(0, DOS_HEADER_SIZE).stage(STAGE)?;
    let e_magic = stream.read_u16(0, LE).stage(STAGE)?;
    if e_magic != DOS_SIGNATURE {
        return Err(ParseError::header(STAGE, "invalid DOS signature"));
    }
    let e_lfanew = stream.read_u32(60, LE).stage(STAGE)?;
    if u64::from(e_lfanew) < DOS_HEADER_SIZE {
        return Err(ParseError::header(
            STAGE,
            format!("e_lfanew {:#x} points into the DOS header", e_lfanew),
        ));
    }
    let signature = stream.read_u32(u64::from(e_lfanew), LE).stage(STAGE)?;
    if signature != PE_SIGNATURE {
        return Err(ParseError::header(STAGE, "invalid PE signature"));
    }
    Ok(DosHeader { e_magic, e_lfanew })
}

/// Parse the COFF file header at `offset`.
pub fn parse_coff_header(stream: &ByteStream<'_>, offset: u64) -> Result<CoffHeader, ParseError> {
    stream.read(offset, COFF_HEADER_SIZE).stage(STAGE)?;
    let u16_at = |off: u64| stream.read_u16(offset + off, LE).stage(STAGE);
    let u32_at = |off: u64| stream.read_u32(offset + off, LE).stage(STAGE);
    Ok(CoffHeader {
        machine: u16_at(0)?,
        number_of_sections: u16_at(2)?,
        time_date_stamp: u32_at(4)?,
        pointer_to_symbol_table: u32_at(8)?,
        number_of_symbols: u32_at(12)?,
        size_of_optional_header: u16_at(16)?,
        characteristics: u16_at(18)?,
    })
}

/// Parse a PE32 or PE32+ optional header of `size` bytes at `offset`.
pub fn parse_optional_header(stream: &ByteStream<'_>, offset: u64, size: u16) -> Result<OptionalHeader, ParseError> {
    let size = u64::from(size);
    stream.read(offset, size).stage(STAGE)?;
    if size < 2 {
        return Err(ParseError::header(STAGE, "optional header is missing"));
    }
    let magic = stream.read_u16(offset, LE).stage(STAGE)?;
    let is_64 = match magic {
        PE32_MAGIC => false,
        PE32PLUS_MAGIC => true,
        other => {
            return Err(ParseError::UnsupportedVariant(format!(
                "optional header magic {:#x}",
                other
            )))
        }
    };
    let dirs_offset = if is_64 { 112 } else { 96 };
    if size < dirs_offset {
        return Err(ParseError::header(
            STAGE,
            format!("optional header of {} bytes is too small", size),
        ));
    }

    let u8_at = |off: u64| stream.read_u8(offset + off).stage(STAGE);
    let u16_at = |off: u64| stream.read_u16(offset + off, LE).stage(STAGE);
    let u32_at = |off: u64| stream.read_u32(offset + off, LE).stage(STAGE);
    let word_at = |off: u64| stream.read_word(offset + off, is_64, LE).stage(STAGE);

    // Image base and the stack/heap sizes are words; everything else is fixed.
    let (base_of_data, image_base) = if is_64 {
        (None, stream.read_u64(offset + 24, LE).stage(STAGE)?)
    } else {
        (Some(u32_at(24)?), u64::from(u32_at(28)?))
    };
    let (stack_reserve, stack_commit, heap_reserve, heap_commit, loader_flags, count) = if is_64 {
        (72, 80, 88, 96, 104, 108)
    } else {
        (72, 76, 80, 84, 88, 92)
    };

    let number_of_rva_and_sizes = u32_at(count)?;
    let room = (size - dirs_offset) / DATA_DIRECTORY_SIZE;
    let dir_count = u64::from(number_of_rva_and_sizes).min(room);
    let mut data_directories = Vec::with_capacity(dir_count as usize);
    for i in 0..dir_count {
        let at = dirs_offset + i * DATA_DIRECTORY_SIZE;
        data_directories.push(DataDirectory {
            virtual_address: u32_at(at)?,
            size: u32_at(at + 4)?,
        });
    }

    Ok(OptionalHeader {
        magic,
        major_linker_version: u8_at(2)?,
        minor_linker_version: u8_at(3)?,
        size_of_code: u32_at(4)?,
        size_of_initialized_data: u32_at(8)?,
        size_of_uninitialized_data: u32_at(12)?,
        address_of_entry_point: u32_at(16)?,
        base_of_code: u32_at(20)?,
        base_of_data,
        image_base,
        section_alignment: u32_at(32)?,
        file_alignment: u32_at(36)?,
        major_operating_system_version: u16_at(40)?,
        minor_operating_system_version: u16_at(42)?,
        major_image_version: u16_at(44)?,
        minor_image_version: u16_at(46)?,
        major_subsystem_version: u16_at(48)?,
        minor_subsystem_version: u16_at(50)?,
        win32_version_value: u32_at(52)?,
        size_of_image: u32_at(56)?,
        size_of_headers: u32_at(60)?,
        checksum: u32_at(64)?,
        subsystem: u16_at(68)?,
        dll_characteristics: u16_at(70)?,
        size_of_stack_reserve: word_at(stack_reserve)?,
        size_of_stack_commit: word_at(stack_commit)?,
        size_of_heap_reserve: word_at(heap_reserve)?,
        size_of_heap_commit: word_at(heap_commit)?,
        loader_flags: u32_at(loader_flags)?,
        number_of_rva_and_sizes,
        data_directories,
    })
}

pub fn encode_coff_header(out: &mut ByteWriter, offset: u64, coff: &CoffHeader) {
    out.write_u16(offset, coff.machine, LE);
    out.write_u16(offset + 2, coff.number_of_sections, LE);
    out.write_u32(offset + 4, coff.time_date_stamp, LE);
    out.write_u32(offset + 8, coff.pointer_to_symbol_table, LE);
    out.write_u32(offset + 12, coff.number_of_symbols, LE);
    out.write_u16(offset + 16, coff.size_of_optional_header, LE);
    out.write_u16(offset + 18, coff.characteristics, LE);
}

/// Write every field of `opt`, including its data directories, at `offset`.
pub fn encode_optional_header(out: &mut ByteWriter, offset: u64, opt: &OptionalHeader) {
    let is_64 = opt.is_64();
    out.write_u16(offset, opt.magic, LE);
    out.write_u8(offset + 2, opt.major_linker_version);
    out.write_u8(offset + 3, opt.minor_linker_version);
    out.write_u32(offset + 4, opt.size_of_code, LE);
    out.write_u32(offset + 8, opt.size_of_initialized_data, LE);
    out.write_u32(offset + 12, opt.size_of_uninitialized_data, LE);
    out.write_u32(offset + 16, opt.address_of_entry_point, LE);
    out.write_u32(offset + 20, opt.base_of_code, LE);
    if is_64 {
        out.write_u64(offset + 24, opt.image_base, LE);
    } else {
        out.write_u32(offset + 24, opt.base_of_data.unwrap_or(0), LE);
        out.write_u32(offset + 28, opt.image_base as u32, LE);
    }
    out.write_u32(offset + 32, opt.section_alignment, LE);
    out.write_u32(offset + 36, opt.file_alignment, LE);
    out.write_u16(offset + 40, opt.major_operating_system_version, LE);
    out.write_u16(offset + 42, opt.minor_operating_system_version, LE);
    out.write_u16(offset + 44, opt.major_image_version, LE);
    out.write_u16(offset + 46, opt.minor_image_version, LE);
    out.write_u16(offset + 48, opt.major_subsystem_version, LE);
    out.write_u16(offset + 50, opt.minor_subsystem_version, LE);
    out.write_u32(offset + 52, opt.win32_version_value, LE);
    out.write_u32(offset + 56, opt.size_of_image, LE);
    out.write_u32(offset + 60, opt.size_of_headers, LE);
    out.write_u32(offset + CHECKSUM_OFFSET, opt.checksum, LE);
    out.write_u16(offset + 68, opt.subsystem, LE);
    out.write_u16(offset + 70, opt.dll_characteristics, LE);

    let words = [
        opt.size_of_stack_reserve,
        opt.size_of_stack_commit,
        opt.size_of_heap_reserve,
        opt.size_of_heap_commit,
    ];
    let width = if is_64 { 8 } else { 4 };
    for (i, value) in words.iter().enumerate() {
        out.write_word(offset + 72 + i as u64 * width, *value, is_64, LE);
    }
    let tail = 72 + 4 * width;
    out.write_u32(offset + tail, opt.loader_flags, LE);
    out.write_u32(offset + tail + 4, opt.number_of_rva_and_sizes, LE);

    let dirs = offset + opt.directories_offset();
    for (i, dir) in opt.data_directories.iter().enumerate() {
        let at = dirs + i as u64 * DATA_DIRECTORY_SIZE;
        out.write_u32(at, dir.virtual_address, LE);
        out.write_u32(at + 4, dir.size, LE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::pe::testutil::*;

    #[test]
    fn test_parse_headers_of_fixture() {
        let data = minimal_pe64();
        let stream = ByteStream::new(&data);
        let dos = parse_dos_header(&stream).unwrap();
        assert_eq!(dos.e_lfanew, 0x80);

        let coff = parse_coff_header(&stream, 0x84).unwrap();
        assert_eq!(coff.machine, IMAGE_FILE_MACHINE_AMD64);
        assert_eq!(coff.number_of_sections, 3);
        assert_eq!(coff.size_of_optional_header, 240);

        let opt = parse_optional_header(&stream, 0x98, coff.size_of_optional_header).unwrap();
        assert!(opt.is_64());
        assert_eq!(opt.image_base, 0x1_4000_0000);
        assert_eq!(opt.section_alignment, 0x1000);
        assert_eq!(opt.file_alignment, 0x200);
        assert_eq!(opt.data_directories.len(), 16);
        assert_eq!(opt.base_of_data, None);
    }

    #[test]
    fn test_encode_is_inverse_of_parse() {
        for data in [minimal_pe64(), minimal_pe32()] {
            let stream = ByteStream::new(&data);
            let coff = parse_coff_header(&stream, 0x84).unwrap();
            let opt = parse_optional_header(&stream, 0x98, coff.size_of_optional_header).unwrap();
            let mut out = ByteWriter::from_vec(data.clone());
            encode_coff_header(&mut out, 0x84, &coff);
            encode_optional_header(&mut out, 0x98, &opt);
            assert_eq!(out.as_slice(), &data[..]);
        }
    }

    #[test]
    fn test_bad_signatures() {
        let mut data = minimal_pe64();
        data[0x80] = b'X';
        let err = parse_dos_header(&ByteStream::new(&data)).unwrap_err();
        assert!(matches!(err, ParseError::MalformedHeader { .. }));

        let mut data = minimal_pe64();
        data[0x98] = 0x99;
        let err = parse_optional_header(&ByteStream::new(&data), 0x98, 240).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedVariant(_)));
    }

    #[test]
    fn test_directory_count_is_bounded_by_header_size() {
        let mut data = minimal_pe64();
        // Claim 0x1000 directories in a header with room for 16.
        data[0x98 + 108..0x98 + 112].copy_from_slice(&0x1000u32.to_le_bytes());
        let opt = parse_optional_header(&ByteStream::new(&data), 0x98, 240).unwrap();
        assert_eq!(opt.number_of_rva_and_sizes, 0x1000);
        assert_eq!(opt.data_directories.len(), 16);
    }
}
