//! Container formats.
//!
//! Each format has its own object model, parser and builder. [`detect`]
//! picks one from the leading magic bytes.

pub mod elf;
pub mod macho;
pub mod pe;

use crate::core::binary::{Endianness, Format};
use crate::error::{ParseError, ParseStage};
use crate::stream::{ByteStream, StageExt};

const ELF_MAGIC: &[u8] = b"\x7fELF";
const PE_SIGNATURE: &[u8] = b"PE\0\0";

/// Identify the container from its magic.
///
/// PE needs both the `MZ` stub and a `PE\0\0` signature at `e_lfanew`.
/// The fat magic is shared with Java class files; [`macho::FatBinary`]
/// rejects those by their architecture count.
pub fn detect(data: &[u8]) -> Result<Format, ParseError> {
    let stream = ByteStream::new(data);
    if data.starts_with(ELF_MAGIC) {
        return Ok(Format::ELF);
    }
    if data.starts_with(b"MZ") {
        let signature = stream
            .read_u32(0x3c, Endianness::Little)
            .and_then(|lfanew| stream.read(u64::from(lfanew), 4));
        return match signature {
            Ok(sig) if sig == PE_SIGNATURE => Ok(Format::PE),
            _ => Err(ParseError::UnsupportedVariant("MZ image without a PE signature".into())),
        };
    }
    let magic = stream.read_u32(0, Endianness::Big).stage(ParseStage::Detect)?;
    match magic {
        macho::FAT_MAGIC | macho::FAT_MAGIC_64 => Ok(Format::FatMachO),
        macho::MH_MAGIC | macho::MH_CIGAM | macho::MH_MAGIC_64 | macho::MH_CIGAM_64 => Ok(Format::MachO),
        other => Err(ParseError::UnsupportedVariant(format!("unknown magic {:#010x}", other))),
    }
}
