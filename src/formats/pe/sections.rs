//! Section table and the section entity

use crate::config::ParseConfig;
use crate::core::arena::Id;
use crate::core::binary::{Endianness, Permissions};
use crate::core::layout::Placement;
use crate::error::{ParseError, ParseStage};
use crate::formats::pe::types::*;
use crate::stream::{ByteStream, ByteWriter, StageExt};

const STAGE: ParseStage = ParseStage::SectionHeaders;
const LE: Endianness = Endianness::Little;

pub type SectionId = Id<PeSection>;

#[derive(Debug, Clone)]
pub struct PeSection {
    pub name: String,
    /// Name field as read, reused while `name` still decodes from it.
    pub(crate) raw_name: Option<[u8; 8]>,
    /// RVA at parse time. New sections get theirs from the layout.
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub characteristics: u32,
    pub(crate) content: Vec<u8>,
    /// `SizeOfRawData`: the content length rounded to the file alignment.
    pub(crate) raw_size: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_line_numbers: u32,
    pub number_of_relocations: u16,
    pub number_of_line_numbers: u16,
    pub(crate) original: Option<Placement>,
}

impl PeSection {
    /// Raw data as stored in the file, including alignment padding.
    pub fn data(&self) -> &[u8] {
        &self.content
    }

    pub fn raw_size(&self) -> u32 {
        self.raw_size
    }

    /// Bytes the loader maps. A zero `VirtualSize` means the raw size.
    pub fn mapped_size(&self) -> u32 {
        if self.virtual_size == 0 {
            self.raw_size
        } else {
            self.virtual_size
        }
    }

    pub fn original_offset(&self) -> Option<u64> {
        self.original.map(|o| o.offset)
    }

    pub fn is_new(&self) -> bool {
        self.original.is_none()
    }

    pub fn contains_code(&self) -> bool {
        self.characteristics & IMAGE_SCN_CNT_CODE != 0
    }

    pub fn is_executable(&self) -> bool {
        self.characteristics & IMAGE_SCN_MEM_EXECUTE != 0
    }

    pub fn is_writable(&self) -> bool {
        self.characteristics & IMAGE_SCN_MEM_WRITE != 0
    }

    pub fn permissions(&self) -> Permissions {
        Permissions::from_pe_characteristics(self.characteristics)
    }

    /// Whether `rva` falls inside the parse-time image of this section.
    pub fn contains_rva(&self, rva: u32) -> bool {
        match self.original {
            Some(o) => u64::from(rva) >= o.address && u64::from(rva) < o.mem_end(),
            None => false,
        }
    }

    /// Offset into `content` of a parse-time RVA, when it is backed by file data.
    pub fn content_offset(&self, rva: u32) -> Option<usize> {
        let start = self.original?.address;
        let rel = u64::from(rva).checked_sub(start)?;
        (rel < self.content.len() as u64).then_some(rel as usize)
    }

    pub(crate) fn name_bytes(&self) -> [u8; 8] {
        if let Some(raw) = self.raw_name {
            if section_name(&raw) == self.name {
                return raw;
            }
        }
        let mut raw = [0u8; 8];
        let bytes = self.name.as_bytes();
        let n = bytes.len().min(8);
        raw[..n].copy_from_slice(&bytes[..n]);
        raw
    }
}

/// Decode `count` section headers at `offset`.
pub fn parse_section_table(
    stream: &ByteStream<'_>,
    offset: u64,
    count: u16,
    config: &ParseConfig,
) -> Result<Vec<SectionHeader>, ParseError> {
    if usize::from(count) > config.max_sections {
        return Err(ParseError::table(
            STAGE,
            format!("{} sections exceed the limit of {}", count, config.max_sections),
        ));
    }
    stream
        .read(offset, u64::from(count) * SECTION_HEADER_SIZE)
        .stage(STAGE)?;

    let mut headers = Vec::with_capacity(usize::from(count));
    for i in 0..u64::from(count) {
        let at = offset + i * SECTION_HEADER_SIZE;
        let u16_at = |off: u64| stream.read_u16(at + off, LE).stage(STAGE);
        let u32_at = |off: u64| stream.read_u32(at + off, LE).stage(STAGE);
        let mut name = [0u8; 8];
        name.copy_from_slice(stream.read(at, 8).stage(STAGE)?);
        headers.push(SectionHeader {
            name,
            virtual_size: u32_at(8)?,
            virtual_address: u32_at(12)?,
            size_of_raw_data: u32_at(16)?,
            pointer_to_raw_data: u32_at(20)?,
            pointer_to_relocations: u32_at(24)?,
            pointer_to_line_numbers: u32_at(28)?,
            number_of_relocations: u16_at(32)?,
            number_of_line_numbers: u16_at(34)?,
            characteristics: u32_at(36)?,
        });
    }
    Ok(headers)
}

impl PeSection {
    pub(crate) fn from_header(stream: &ByteStream<'_>, sh: &SectionHeader) -> Result<Self, ParseError> {
        let content = if sh.size_of_raw_data == 0 {
            Vec::new()
        } else {
            stream
                .read(u64::from(sh.pointer_to_raw_data), u64::from(sh.size_of_raw_data))
                .stage(STAGE)?
                .to_vec()
        };
        let mut section = PeSection {
            name: sh.name(),
            raw_name: Some(sh.name),
            virtual_address: sh.virtual_address,
            virtual_size: sh.virtual_size,
            characteristics: sh.characteristics,
            content,
            raw_size: sh.size_of_raw_data,
            pointer_to_relocations: sh.pointer_to_relocations,
            pointer_to_line_numbers: sh.pointer_to_line_numbers,
            number_of_relocations: sh.number_of_relocations,
            number_of_line_numbers: sh.number_of_line_numbers,
            original: None,
        };
        section.original = Some(Placement::new(
            u64::from(sh.pointer_to_raw_data),
            u64::from(sh.virtual_address),
            u64::from(sh.size_of_raw_data),
            u64::from(section.mapped_size()),
        ));
        Ok(section)
    }
}

pub fn encode_section_header(out: &mut ByteWriter, offset: u64, sh: &SectionHeader) {
    out.write_bytes(offset, &sh.name);
    out.write_u32(offset + 8, sh.virtual_size, LE);
    out.write_u32(offset + 12, sh.virtual_address, LE);
    out.write_u32(offset + 16, sh.size_of_raw_data, LE);
    out.write_u32(offset + 20, sh.pointer_to_raw_data, LE);
    out.write_u32(offset + 24, sh.pointer_to_relocations, LE);
    out.write_u32(offset + 28, sh.pointer_to_line_numbers, LE);
    out.write_u16(offset + 32, sh.number_of_relocations, LE);
    out.write_u16(offset + 34, sh.number_of_line_numbers, LE);
    out.write_u32(offset + 36, sh.characteristics, LE);
}
