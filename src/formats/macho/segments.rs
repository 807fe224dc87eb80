//! Segment commands and their sections

use crate::core::arena::Id;
use crate::core::binary::Permissions;
use crate::core::layout::Placement;
use crate::error::{ParseError, ParseStage};
use crate::formats::macho::types::*;
use crate::stream::{ByteStream, ByteWriter, StageExt};

const STAGE: ParseStage = ParseStage::LoadCommands;

pub type SegmentId = Id<MachSegment>;
pub type SectionId = Id<MachSection>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachSegment {
    pub name: String,
    pub(crate) raw_name: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: u32,
    pub initprot: u32,
    pub flags: u32,
    pub(crate) original: Option<Placement>,
    /// Address requested for a new segment.
    pub(crate) fixed_address: Option<u64>,
}

impl MachSegment {
    pub(crate) fn from_raw(raw: &RawSegment) -> Self {
        Self {
            name: fixed_name(&raw.segname),
            raw_name: raw.segname,
            vmaddr: raw.vmaddr,
            vmsize: raw.vmsize,
            fileoff: raw.fileoff,
            filesize: raw.filesize,
            maxprot: raw.maxprot,
            initprot: raw.initprot,
            flags: raw.flags,
            original: Some(Placement::new(raw.fileoff, raw.vmaddr, raw.filesize, raw.vmsize)),
            fixed_address: None,
        }
    }

    pub fn permissions(&self) -> Permissions {
        Permissions::from_vm_prot(self.initprot)
    }

    pub fn is_linkedit(&self) -> bool {
        self.name == "__LINKEDIT"
    }

    pub fn is_new(&self) -> bool {
        self.original.is_none()
    }

    pub(crate) fn covers_file(&self, offset: u64, size: u64) -> bool {
        self.original
            .is_some_and(|o| o.file_size > 0 && offset >= o.offset && offset + size <= o.file_end())
    }

    /// Name field to write: the parsed bytes while `name` still matches them.
    pub(crate) fn name_bytes(&self) -> [u8; 16] {
        if fixed_name(&self.raw_name) == self.name {
            self.raw_name
        } else {
            encode_fixed_name(&self.name).unwrap_or(self.raw_name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachSection {
    pub name: String,
    pub(crate) raw_name: [u8; 16],
    /// `segname` as stored in the section header.
    pub(crate) raw_segname: [u8; 16],
    pub segment: SegmentId,
    /// Address at parse time. New sections get theirs from the layout.
    pub address: u64,
    /// Memory size; the file size too unless the section is zero-fill.
    pub size: u64,
    /// Power-of-two exponent.
    pub align: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
    pub(crate) content: Vec<u8>,
    /// `offset` field as read; zero-fill sections keep it.
    pub(crate) raw_offset: u32,
    /// `reloff` and `nreloc` as read, written back while the entries are
    /// opaque.
    pub(crate) raw_reloff: u32,
    pub(crate) raw_nreloc: u32,
    /// 1-based `n_sect` at parse time; 0 for new sections.
    pub(crate) parsed_ordinal: usize,
    pub(crate) original: Option<Placement>,
}

impl MachSection {
    pub fn is_zerofill(&self) -> bool {
        is_zerofill(self.flags)
    }

    pub fn section_type(&self) -> u32 {
        self.flags & SECTION_TYPE
    }

    pub fn data(&self) -> &[u8] {
        &self.content
    }

    pub fn file_size(&self) -> u64 {
        if self.is_zerofill() {
            0
        } else {
            self.content.len() as u64
        }
    }

    pub fn alignment(&self) -> u64 {
        1u64 << self.align.min(63)
    }

    pub fn original_offset(&self) -> Option<u64> {
        self.original.filter(|o| o.file_size > 0).map(|o| o.offset)
    }

    pub fn is_new(&self) -> bool {
        self.original.is_none()
    }

    pub fn contains_address(&self, address: u64) -> bool {
        self.original
            .is_some_and(|o| address >= o.address && address < o.mem_end())
    }

    pub(crate) fn name_bytes(&self) -> [u8; 16] {
        if fixed_name(&self.raw_name) == self.name {
            self.raw_name
        } else {
            encode_fixed_name(&self.name).unwrap_or(self.raw_name)
        }
    }
}

/// Decode a segment command and the section headers that follow it.
pub fn parse_segment_command(
    data: &[u8],
    header: &MachHeader,
    max_sections: usize,
) -> Result<(RawSegment, Vec<RawSection>), ParseError> {
    let stream = ByteStream::new(data);
    let e = header.endian;
    let wide = header.is_64;
    let word = |offset: u64| stream.read_word(offset, wide, e).stage(STAGE);
    let u32_at = |offset: u64| stream.read_u32(offset, e).stage(STAGE);
    let name_at = |offset: u64| -> Result<[u8; 16], ParseError> {
        let mut raw = [0u8; 16];
        raw.copy_from_slice(stream.read(offset, 16).stage(STAGE)?);
        Ok(raw)
    };

    let fields = 24;
    let step = header.word_size();
    let segment = RawSegment {
        segname: name_at(8)?,
        vmaddr: word(fields)?,
        vmsize: word(fields + step)?,
        fileoff: word(fields + 2 * step)?,
        filesize: word(fields + 3 * step)?,
        maxprot: u32_at(fields + 4 * step)?,
        initprot: u32_at(fields + 4 * step + 4)?,
        nsects: u32_at(fields + 4 * step + 8)?,
        flags: u32_at(fields + 4 * step + 12)?,
    };
    if segment.nsects as usize > max_sections {
        return Err(ParseError::table(
            STAGE,
            format!("segment declares {} sections", segment.nsects),
        ));
    }
    let fixed = header.segment_command_size();
    let needed = fixed + u64::from(segment.nsects) * header.section_size();
    if needed > data.len() as u64 {
        return Err(ParseError::table(
            STAGE,
            format!(
                "segment {} declares {} sections but its command holds {:#x} bytes",
                fixed_name(&segment.segname),
                segment.nsects,
                data.len()
            ),
        ));
    }

    let mut sections = Vec::with_capacity(segment.nsects as usize);
    for i in 0..u64::from(segment.nsects) {
        let at = fixed + i * header.section_size();
        let tail = at + 32 + 2 * step;
        sections.push(RawSection {
            sectname: name_at(at)?,
            segname: name_at(at + 16)?,
            addr: word(at + 32)?,
            size: word(at + 32 + step)?,
            offset: u32_at(tail)?,
            align: u32_at(tail + 4)?,
            reloff: u32_at(tail + 8)?,
            nreloc: u32_at(tail + 12)?,
            flags: u32_at(tail + 16)?,
            reserved1: u32_at(tail + 20)?,
            reserved2: u32_at(tail + 24)?,
            reserved3: if wide { u32_at(tail + 28)? } else { 0 },
        });
    }
    Ok((segment, sections))
}

/// Write a complete segment command at `offset`; returns its size.
pub fn encode_segment_command(
    out: &mut ByteWriter,
    offset: u64,
    header: &MachHeader,
    segment: &RawSegment,
    sections: &[RawSection],
) -> u64 {
    let e = header.endian;
    let wide = header.is_64;
    let step = header.word_size();
    let size = header.segment_command_size() + sections.len() as u64 * header.section_size();
    out.write_u32(offset, header.segment_command(), e);
    out.write_u32(offset + 4, size as u32, e);
    out.write_bytes(offset + 8, &segment.segname);
    let fields = offset + 24;
    out.write_word(fields, segment.vmaddr, wide, e);
    out.write_word(fields + step, segment.vmsize, wide, e);
    out.write_word(fields + 2 * step, segment.fileoff, wide, e);
    out.write_word(fields + 3 * step, segment.filesize, wide, e);
    out.write_u32(fields + 4 * step, segment.maxprot, e);
    out.write_u32(fields + 4 * step + 4, segment.initprot, e);
    out.write_u32(fields + 4 * step + 8, sections.len() as u32, e);
    out.write_u32(fields + 4 * step + 12, segment.flags, e);

    for (i, s) in sections.iter().enumerate() {
        let at = offset + header.segment_command_size() + i as u64 * header.section_size();
        out.write_bytes(at, &s.sectname);
        out.write_bytes(at + 16, &s.segname);
        out.write_word(at + 32, s.addr, wide, e);
        out.write_word(at + 32 + step, s.size, wide, e);
        let tail = at + 32 + 2 * step;
        out.write_u32(tail, s.offset, e);
        out.write_u32(tail + 4, s.align, e);
        out.write_u32(tail + 8, s.reloff, e);
        out.write_u32(tail + 12, s.nreloc, e);
        out.write_u32(tail + 16, s.flags, e);
        out.write_u32(tail + 20, s.reserved1, e);
        out.write_u32(tail + 24, s.reserved2, e);
        if wide {
            out.write_u32(tail + 28, s.reserved3, e);
        }
    }
    size
}
