//! Mutations of the PE object model.
//!
//! Edits record intent; RVAs and file offsets of new or grown sections are
//! assigned by the builder.

use crate::core::fixup::Anchor;
use crate::core::layout::{align_up, BlockKey, RemovedBlock};
use crate::error::EditError;
use crate::formats::pe::directories::reloc::pointer_width;
use crate::formats::pe::types::*;
use crate::formats::pe::utils::encode_section_name;
use crate::formats::pe::{
    BaseRelocationId, BaseRelocationPlace, NewBaseRelocation, PeBaseRelocation, PeBinary, PeSection, PeSlot,
    SectionId, SiteId,
};
use tracing::debug;

/// Arguments for [`PeBinary::add_section`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPeSection {
    pub name: String,
    pub characteristics: u32,
    pub content: Vec<u8>,
    /// Mapped size when larger than the content; the rest is zero-filled by
    /// the loader.
    pub virtual_size: Option<u32>,
}

impl NewPeSection {
    pub fn new(name: impl Into<String>, characteristics: u32, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            characteristics,
            content,
            virtual_size: None,
        }
    }

    /// Readable, executable code.
    pub fn code(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self::new(
            name,
            IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ,
            content,
        )
    }

    /// Readable, writable initialized data.
    pub fn data(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self::new(
            name,
            IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ | IMAGE_SCN_MEM_WRITE,
            content,
        )
    }

    pub fn with_virtual_size(mut self, size: u32) -> Self {
        self.virtual_size = Some(size);
        self
    }
}

impl PeBinary {
    fn live_section(&self, id: SectionId) -> Result<&PeSection, EditError> {
        self.sections
            .get(id)
            .ok_or_else(|| EditError::UnknownEntity(format!("section {:?}", id)))
    }

    fn padded(&self, mut content: Vec<u8>) -> Result<(Vec<u8>, u32), EditError> {
        let len = u32::try_from(content.len())
            .map_err(|_| EditError::InvalidValue(format!("{} bytes do not fit a PE section", content.len())))?;
        let raw = align_up(u64::from(len), u64::from(self.opt.file_alignment));
        content.resize(raw as usize, 0);
        Ok((content, len))
    }

    pub fn add_section(&mut self, spec: NewPeSection) -> Result<SectionId, EditError> {
        let raw_name = encode_section_name(&spec.name)?;
        let (content, len) = self.padded(spec.content)?;
        let virtual_size = spec.virtual_size.unwrap_or(len);
        if virtual_size < len {
            return Err(EditError::InvalidValue(format!(
                "virtual size {:#x} of {} is smaller than its {:#x} bytes of content",
                virtual_size, spec.name, len
            )));
        }
        let raw_size = content.len() as u32;
        let id = self.sections.push(PeSection {
            name: spec.name,
            raw_name: Some(raw_name),
            virtual_address: 0,
            virtual_size,
            characteristics: spec.characteristics,
            content,
            raw_size,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            original: None,
        });
        debug!(section = ?id, raw_size, virtual_size, "Added section");
        Ok(id)
    }

    /// Remove a section along with the pointer fields and base relocations
    /// located in it. Sections that anything else points into stay.
    pub fn remove_section(&mut self, id: SectionId) -> Result<(), EditError> {
        let section = self.live_section(id)?;
        let entity = format!("section {}", section.name);

        let own_sites: Vec<SiteId> = self
            .sites
            .iter()
            .filter(|(_, s)| s.section == id)
            .map(|(sid, _)| sid)
            .collect();
        let own_relocs: Vec<BaseRelocationId> = self
            .base_relocations
            .iter()
            .filter(|(_, r)| r.section() == Some(id))
            .map(|(rid, _)| rid)
            .collect();
        if let Some(field) = self.fixups.targeting(BlockKey::Section(id.index())).find(|f| match f.slot {
            PeSlot::Site(sid) => !own_sites.contains(&sid),
            PeSlot::Pointer(rid) => !own_relocs.contains(&rid),
            _ => true,
        }) {
            return Err(EditError::DanglingReference {
                entity,
                referrer: format!("{:?}", field.slot),
            });
        }

        for sid in own_sites {
            self.sites.remove(sid);
            self.fixups.unregister(&PeSlot::Site(sid));
        }
        if !own_relocs.is_empty() {
            self.base_relocs_edited = true;
        }
        for rid in own_relocs {
            self.base_relocations.remove(rid);
            self.fixups.unregister(&PeSlot::Pointer(rid));
        }
        if let Some(section) = self.sections.remove(id) {
            if let Some(original) = section.original.filter(|o| o.file_size > 0) {
                self.removed.push(RemovedBlock {
                    original,
                    segment: Some(id.index()),
                });
            }
            debug!(section = %section.name, "Removed section");
        }
        Ok(())
    }

    /// Replace a section's bytes. `VirtualSize` becomes the content length
    /// and `SizeOfRawData` its file-aligned size.
    pub fn set_section_content(&mut self, id: SectionId, content: Vec<u8>) -> Result<(), EditError> {
        let section = self.live_section(id)?;
        let entity = format!("section {}", section.name);
        let len = content.len() as u64;
        let dangling = |referrer: String| EditError::DanglingReference {
            entity: entity.clone(),
            referrer,
        };

        if let Some((_, site)) = self
            .sites
            .iter()
            .find(|(_, s)| s.section == id && u64::from(s.offset) + u64::from(s.width) > len)
        {
            return Err(dangling(format!("pointer field at +{:#x}", site.offset)));
        }
        if let Some((rid, _)) = self.base_relocations.iter().find(|(_, r)| match r.place {
            BaseRelocationPlace::Section { section, offset } => {
                section == id && u64::from(offset) + u64::from(r.width()) > len
            }
            BaseRelocationPlace::Rva(_) => false,
        }) {
            return Err(dangling(format!("base relocation {:?}", rid)));
        }
        if let Some(field) = self
            .fixups
            .targeting(BlockKey::Section(id.index()))
            .find(|f| matches!(f.anchor, Anchor::Address | Anchor::Offset) && f.delta > len as i64)
        {
            return Err(dangling(format!("{:?}", field.slot)));
        }

        let (content, len) = self.padded(content)?;
        if let Some(section) = self.sections.get_mut(id) {
            section.raw_size = content.len() as u32;
            section.content = content;
            section.virtual_size = len;
        }
        Ok(())
    }

    /// Truncate or zero-extend a section to `size` bytes.
    pub fn resize_section(&mut self, id: SectionId, size: u64) -> Result<(), EditError> {
        let len = usize::try_from(size).map_err(|_| EditError::InvalidValue(format!("size {:#x}", size)))?;
        let mut content = self.live_section(id)?.data().to_vec();
        content.resize(len, 0);
        self.set_section_content(id, content)
    }

    /// Point `AddressOfEntryPoint` at an RVA of the parse-time image.
    pub fn set_entrypoint(&mut self, rva: u64) -> Result<(), EditError> {
        let rva = u32::try_from(rva).map_err(|_| EditError::InvalidValue(format!("entry RVA {:#x}", rva)))?;
        self.opt.address_of_entry_point = rva;
        if !self.register_rva(PeSlot::Entry, rva) {
            self.fixups.unregister(&PeSlot::Entry);
        }
        Ok(())
    }

    /// Point `AddressOfEntryPoint` at `offset` bytes into `section`, wherever
    /// it ends up.
    pub fn set_entrypoint_at(&mut self, section: SectionId, offset: u64) -> Result<(), EditError> {
        let s = self.live_section(section)?;
        let size = u64::from(s.mapped_size());
        if offset >= size {
            return Err(EditError::InvalidValue(format!(
                "offset {:#x} is outside {} ({:#x} bytes)",
                offset, s.name, size
            )));
        }
        self.opt.address_of_entry_point = s.original.map_or(0, |o| o.address).wrapping_add(offset) as u32;
        self.fixups
            .register(PeSlot::Entry, BlockKey::Section(section.index()), Anchor::Address, offset as i64);
        Ok(())
    }

    /// Add a base relocation. The base relocation table is regenerated when
    /// the binary is built.
    pub fn add_base_relocation(&mut self, spec: NewBaseRelocation) -> Result<BaseRelocationId, EditError> {
        if !self.base_relocs_loaded {
            return Err(EditError::UnsupportedEdit("image has no base relocation directory".into()));
        }
        if !matches!(
            spec.kind,
            IMAGE_REL_BASED_HIGH | IMAGE_REL_BASED_LOW | IMAGE_REL_BASED_HIGHLOW | IMAGE_REL_BASED_DIR64
        ) {
            return Err(EditError::InvalidValue(format!(
                "base relocation type {} is not supported",
                spec.kind
            )));
        }
        let section = self.live_section(spec.section)?;
        let reloc = PeBaseRelocation {
            place: BaseRelocationPlace::Section {
                section: spec.section,
                offset: spec.offset,
            },
            kind: spec.kind,
            param: None,
        };
        if u64::from(spec.offset) + u64::from(reloc.width()) > section.data().len() as u64 {
            return Err(EditError::InvalidValue(format!(
                "base relocation at +{:#x} is outside {}",
                spec.offset, section.name
            )));
        }
        let existing = !section.is_new();
        let id = self.base_relocations.push(reloc);
        if existing {
            if let Some(width) = pointer_width(spec.kind) {
                self.register_relocated_pointer(id, width, self.opt.image_base);
            }
        }
        self.base_relocs_edited = true;
        Ok(id)
    }

    pub fn remove_base_relocation(&mut self, id: BaseRelocationId) -> Result<(), EditError> {
        self.base_relocations
            .remove(id)
            .ok_or_else(|| EditError::UnknownEntity(format!("base relocation {:?}", id)))?;
        self.fixups.unregister(&PeSlot::Pointer(id));
        self.base_relocs_edited = true;
        Ok(())
    }
}
