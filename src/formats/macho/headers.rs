//! Mach header and fat header

use crate::core::binary::Endianness;
use crate::error::{ParseError, ParseStage};
use crate::formats::macho::types::*;
use crate::stream::{ByteStream, ByteWriter, StageExt};

/// Width and byte order announced by a thin magic, read big-endian.
pub fn thin_magic(magic: u32) -> Option<(bool, Endianness)> {
    match magic {
        MH_MAGIC_64 => Some((true, Endianness::Big)),
        MH_CIGAM_64 => Some((true, Endianness::Little)),
        MH_MAGIC => Some((false, Endianness::Big)),
        MH_CIGAM => Some((false, Endianness::Little)),
        _ => None,
    }
}

pub fn parse_header(stream: &ByteStream<'_>) -> Result<MachHeader, ParseError> {
    let stage = ParseStage::Header;
    let magic = stream.read_u32(0, Endianness::Big).stage(stage)?;
    let Some((is_64, endian)) = thin_magic(magic) else {
        return Err(ParseError::header(stage, format!("bad Mach-O magic {:#010x}", magic)));
    };
    let size = if is_64 { MACH_HEADER_64_SIZE } else { MACH_HEADER_SIZE };
    stream.read(0, size).stage(stage)?;
    let u32_at = |offset: u64| stream.read_u32(offset, endian).stage(stage);
    Ok(MachHeader {
        is_64,
        endian,
        cputype: u32_at(4)?,
        cpusubtype: u32_at(8)?,
        filetype: u32_at(12)?,
        ncmds: u32_at(16)?,
        sizeofcmds: u32_at(20)?,
        flags: u32_at(24)?,
        reserved: if is_64 { u32_at(28)? } else { 0 },
    })
}

pub fn encode_header(out: &mut ByteWriter, header: &MachHeader) {
    let e = header.endian;
    out.write_u32(0, header.magic(), e);
    out.write_u32(4, header.cputype, e);
    out.write_u32(8, header.cpusubtype, e);
    out.write_u32(12, header.filetype, e);
    out.write_u32(16, header.ncmds, e);
    out.write_u32(20, header.sizeofcmds, e);
    out.write_u32(24, header.flags, e);
    if header.is_64 {
        out.write_u32(28, header.reserved, e);
    }
}

/// Decode the `fat_arch` table. Fat headers are always big-endian.
pub fn parse_fat_header(stream: &ByteStream<'_>, max_arches: usize) -> Result<Vec<FatArch>, ParseError> {
    let stage = ParseStage::FatHeader;
    let be = Endianness::Big;
    match stream.read_u32(0, be).stage(stage)? {
        FAT_MAGIC => {}
        FAT_MAGIC_64 => return Err(ParseError::UnsupportedVariant("64-bit fat header".into())),
        other => return Err(ParseError::header(stage, format!("bad fat magic {:#010x}", other))),
    }
    let count = stream.read_u32(4, be).stage(stage)?;
    if count == 0 || count as usize > max_arches {
        // Java class files share the magic and have a large "count".
        return Err(ParseError::UnsupportedVariant(format!(
            "fat header declares {} architectures",
            count
        )));
    }
    stream
        .read(FAT_HEADER_SIZE, u64::from(count) * FAT_ARCH_SIZE)
        .stage(stage)?;

    let mut arches = Vec::with_capacity(count as usize);
    for i in 0..u64::from(count) {
        let at = FAT_HEADER_SIZE + i * FAT_ARCH_SIZE;
        let u32_at = |offset: u64| stream.read_u32(at + offset, be).stage(stage);
        let arch = FatArch {
            cputype: u32_at(0)?,
            cpusubtype: u32_at(4)?,
            offset: u32_at(8)?,
            size: u32_at(12)?,
            align: u32_at(16)?,
        };
        if arch.align > 31 {
            return Err(ParseError::table(
                stage,
                format!("slice {} has alignment 2^{}", i, arch.align),
            ));
        }
        stream
            .read(u64::from(arch.offset), u64::from(arch.size))
            .stage(stage)?;
        arches.push(arch);
    }
    Ok(arches)
}

pub fn encode_fat_header(out: &mut ByteWriter, arches: &[FatArch]) {
    let be = Endianness::Big;
    out.write_u32(0, FAT_MAGIC, be);
    out.write_u32(4, arches.len() as u32, be);
    for (i, arch) in arches.iter().enumerate() {
        let at = FAT_HEADER_SIZE + i as u64 * FAT_ARCH_SIZE;
        out.write_u32(at, arch.cputype, be);
        out.write_u32(at + 4, arch.cpusubtype, be);
        out.write_u32(at + 8, arch.offset, be);
        out.write_u32(at + 12, arch.size, be);
        out.write_u32(at + 16, arch.align, be);
    }
}
