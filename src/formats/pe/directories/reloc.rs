//! Base relocation directory

use crate::core::binary::Endianness;
use crate::error::ParseError;
use crate::formats::pe::directories::{rva_add, ImageView, STAGE};
use crate::formats::pe::types::*;
use crate::stream::ByteWriter;

const BLOCK_HEADER_SIZE: u32 = 8;
const PAGE_MASK: u64 = !0xFFF;

/// One decoded base relocation. `ABSOLUTE` padding entries are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBaseRelocation {
    pub rva: u64,
    pub kind: u8,
    /// Extra slot carried by `HIGHADJ` entries.
    pub param: Option<u16>,
}

/// Width of the field a relocation of `kind` patches, if it is a pointer.
pub fn pointer_width(kind: u8) -> Option<u8> {
    match kind {
        IMAGE_REL_BASED_HIGHLOW => Some(4),
        IMAGE_REL_BASED_DIR64 => Some(8),
        _ => None,
    }
}

pub fn parse_base_relocations(
    view: &ImageView<'_>,
    dir: DataDirectory,
    max_relocations: usize,
) -> Result<Vec<RawBaseRelocation>, ParseError> {
    let mut relocs = Vec::new();
    let mut consumed = 0u32;
    while consumed + BLOCK_HEADER_SIZE <= dir.size {
        let block = rva_add(dir.virtual_address, u64::from(consumed))?;
        let page = view.u32(block)?;
        let block_size = view.u32(block + 4)?;
        if block_size < BLOCK_HEADER_SIZE || block_size % 2 != 0 || consumed + block_size > dir.size {
            return Err(ParseError::table(
                STAGE,
                format!("base relocation block at {:#x} has size {:#x}", block, block_size),
            ));
        }
        let count = (block_size - BLOCK_HEADER_SIZE) / 2;
        if relocs.len() + count as usize > max_relocations {
            return Err(ParseError::table(
                STAGE,
                format!("more than {} base relocations", max_relocations),
            ));
        }

        let mut i = 0;
        while i < count {
            let entry = view.u16(rva_add(block, u64::from(BLOCK_HEADER_SIZE + i * 2))?)?;
            i += 1;
            let kind = (entry >> 12) as u8;
            if kind == IMAGE_REL_BASED_ABSOLUTE {
                continue;
            }
            let param = if kind == IMAGE_REL_BASED_HIGHADJ && i < count {
                let value = view.u16(rva_add(block, u64::from(BLOCK_HEADER_SIZE + i * 2))?)?;
                i += 1;
                Some(value)
            } else {
                None
            };
            relocs.push(RawBaseRelocation {
                rva: u64::from(page) + u64::from(entry & 0x0FFF),
                kind,
                param,
            });
        }
        consumed += block_size;
    }
    Ok(relocs)
}

/// Encode relocations as page blocks, each padded to four bytes.
pub fn encode_base_relocations(relocs: &[RawBaseRelocation]) -> Vec<u8> {
    const LE: Endianness = Endianness::Little;
    let mut sorted = relocs.to_vec();
    sorted.sort_by_key(|r| r.rva);

    let mut out = ByteWriter::new();
    let mut start = 0;
    while start < sorted.len() {
        let page = sorted[start].rva & PAGE_MASK;
        let end = sorted[start..]
            .iter()
            .position(|r| r.rva & PAGE_MASK != page)
            .map_or(sorted.len(), |n| start + n);

        let mut entries: Vec<u16> = Vec::new();
        for r in &sorted[start..end] {
            entries.push((u16::from(r.kind) << 12) | (r.rva & 0xFFF) as u16);
            if let Some(param) = r.param {
                entries.push(param);
            }
        }
        if entries.len() % 2 != 0 {
            entries.push(0);
        }
        let block = out.len();
        out.write_u32(block, page as u32, LE);
        out.write_u32(block + 4, BLOCK_HEADER_SIZE + entries.len() as u32 * 2, LE);
        for (i, e) in entries.iter().enumerate() {
            out.write_u16(block + 8 + i as u64 * 2, *e, LE);
        }
        start = end;
    }
    out.into_inner()
}
