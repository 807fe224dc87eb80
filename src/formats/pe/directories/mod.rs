//! Data directory parsers
//!
//! Directories are addressed by RVA, so every parser reads through an
//! [`ImageView`] of the parse-time section images. Besides the entities they
//! decode, parsers report the [`PointerSite`]s they walked: RVA-valued fields
//! stored inside section data that must follow their target when sections
//! move.

pub mod debug;
pub mod exception;
pub mod export;
pub mod import;
pub mod reloc;
pub mod resource;

use crate::core::arena::Arena;
use crate::core::binary::Endianness;
use crate::error::{ParseError, ParseStage};
use crate::formats::pe::sections::{PeSection, SectionId};
use crate::stream::{ByteStream, StageExt};

pub(crate) const STAGE: ParseStage = ParseStage::Directories;
const LE: Endianness = Endianness::Little;

/// What a pointer field stored in section data encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteKind {
    /// An RVA.
    Rva,
    /// A file offset.
    FileOffset,
}

/// A pointer field found while walking a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerSite {
    /// Where the field lives.
    pub rva: u32,
    /// Field width in bytes: 4 or 8.
    pub width: u8,
    pub kind: SiteKind,
}

impl PointerSite {
    pub fn rva32(rva: u32) -> Self {
        Self {
            rva,
            width: 4,
            kind: SiteKind::Rva,
        }
    }

    pub fn rva_word(rva: u32, wide: bool) -> Self {
        Self {
            rva,
            width: if wide { 8 } else { 4 },
            kind: SiteKind::Rva,
        }
    }

    pub fn file_offset(rva: u32) -> Self {
        Self {
            rva,
            width: 4,
            kind: SiteKind::FileOffset,
        }
    }
}

/// RVA-addressed reads over the file-backed part of each section.
pub(crate) struct ImageView<'a> {
    sections: Vec<(SectionId, &'a PeSection)>,
}

impl<'a> ImageView<'a> {
    pub fn new(sections: &'a Arena<PeSection>) -> Self {
        Self {
            sections: sections.iter().filter(|(_, s)| !s.is_new()).collect(),
        }
    }

    /// Section and content offset backing `rva`.
    pub fn locate(&self, rva: u32) -> Option<(SectionId, u32)> {
        self.sections
            .iter()
            .filter(|(_, s)| s.contains_rva(rva))
            .find_map(|(id, s)| s.content_offset(rva).map(|off| (*id, off as u32)))
    }

    /// Bytes at `rva`. A read must stay inside one section.
    pub fn read(&self, rva: u32, len: u64) -> Result<&'a [u8], ParseError> {
        let Some((id, off)) = self.locate(rva) else {
            return Err(ParseError::table(STAGE, format!("RVA {:#x} is not backed by file data", rva)));
        };
        let section = self
            .sections
            .iter()
            .find(|(sid, _)| *sid == id)
            .map(|(_, s)| *s)
            .ok_or_else(|| ParseError::table(STAGE, format!("RVA {:#x} has no section", rva)))?;
        ByteStream::new(section.data())
            .read(u64::from(off), len)
            .map_err(|_| ParseError::TruncatedData {
                stage: STAGE,
                offset: u64::from(rva),
                needed: len,
            })
    }

    pub fn u16(&self, rva: u32) -> Result<u16, ParseError> {
        ByteStream::new(self.read(rva, 2)?).read_u16(0, LE).stage(STAGE)
    }

    pub fn u32(&self, rva: u32) -> Result<u32, ParseError> {
        ByteStream::new(self.read(rva, 4)?).read_u32(0, LE).stage(STAGE)
    }

    pub fn word(&self, rva: u32, wide: bool) -> Result<u64, ParseError> {
        let len = if wide { 8 } else { 4 };
        ByteStream::new(self.read(rva, len)?)
            .read_word(0, wide, LE)
            .stage(STAGE)
    }

    /// NUL-terminated string of at most `max` bytes.
    pub fn cstr(&self, rva: u32, max: u64) -> Result<String, ParseError> {
        let Some((id, off)) = self.locate(rva) else {
            return Err(ParseError::table(STAGE, format!("string RVA {:#x} is not backed by file data", rva)));
        };
        let data = self
            .sections
            .iter()
            .find(|(sid, _)| *sid == id)
            .map_or(&[][..], |(_, s)| s.data());
        let bytes = ByteStream::new(data).read_cstr(u64::from(off), max).stage(STAGE)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Add `delta` to an RVA, failing on overflow.
pub(crate) fn rva_add(rva: u32, delta: u64) -> Result<u32, ParseError> {
    u64::from(rva)
        .checked_add(delta)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| ParseError::table(STAGE, format!("RVA {:#x} + {:#x} overflows", rva, delta)))
}
