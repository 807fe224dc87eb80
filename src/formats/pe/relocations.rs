//! Base relocation entities

use crate::core::arena::Id;
use crate::formats::pe::sections::SectionId;
use crate::formats::pe::types::*;

pub type BaseRelocationId = Id<PeBaseRelocation>;

/// Where a base relocation applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseRelocationPlace {
    /// Offset into a section's content; follows the section when it moves.
    Section { section: SectionId, offset: u32 },
    /// An RVA with no file-backed section behind it, kept as is.
    Rva(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeBaseRelocation {
    pub place: BaseRelocationPlace,
    /// `IMAGE_REL_BASED_*`.
    pub kind: u8,
    pub param: Option<u16>,
}

impl PeBaseRelocation {
    pub fn section(&self) -> Option<SectionId> {
        match self.place {
            BaseRelocationPlace::Section { section, .. } => Some(section),
            BaseRelocationPlace::Rva(_) => None,
        }
    }

    /// Bytes patched at the place.
    pub fn width(&self) -> u32 {
        match self.kind {
            IMAGE_REL_BASED_DIR64 => 8,
            IMAGE_REL_BASED_HIGHLOW => 4,
            _ => 2,
        }
    }
}

/// Arguments for [`PeBinary::add_base_relocation`](crate::formats::pe::PeBinary::add_base_relocation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewBaseRelocation {
    pub section: SectionId,
    pub offset: u32,
    pub kind: u8,
}

impl NewBaseRelocation {
    /// A pointer-sized relocation for an image of the given width.
    pub fn pointer(section: SectionId, offset: u32, wide: bool) -> Self {
        Self {
            section,
            offset,
            kind: if wide { IMAGE_REL_BASED_DIR64 } else { IMAGE_REL_BASED_HIGHLOW },
        }
    }
}
