//! Mutations of the Mach-O object model.
//!
//! As with the other formats, edits validate what they can see locally and
//! leave offsets, ordinals and symbol indices to the builder.

use crate::core::binary::Permissions;
use crate::core::fixup::Anchor;
use crate::core::layout::{BlockKey, RemovedBlock};
use crate::error::EditError;
use crate::formats::macho::commands::dylib_command;
use crate::formats::macho::types::*;
use crate::formats::macho::{
    BlobKind, CommandKind, IndirectSymbol, LinkeditBlob, LoadCommand, MachOBinary, MachRelocation, MachRelocationId,
    MachSection, MachSegment, MachSlot, MachSymbol, NewMachRelocation, NewMachSymbol, RelocationTarget, SectionId,
    SegmentId, SymbolId,
};
use tracing::debug;

/// Arguments for [`MachOBinary::add_section`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMachSection {
    pub name: String,
    pub flags: u32,
    /// Power-of-two exponent.
    pub align: u32,
    pub content: Vec<u8>,
    /// Memory size of a zero-fill section.
    pub zerofill_size: u64,
}

impl NewMachSection {
    pub fn new(name: impl Into<String>, flags: u32, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            flags,
            align: 0,
            content,
            zerofill_size: 0,
        }
    }

    pub fn code(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self::new(name, S_REGULAR | S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS, content).with_align(4)
    }

    pub fn data(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self::new(name, S_REGULAR, content).with_align(3)
    }

    pub fn zerofill(name: impl Into<String>, size: u64) -> Self {
        Self {
            zerofill_size: size,
            ..Self::new(name, S_ZEROFILL, Vec::new()).with_align(3)
        }
    }

    pub fn with_align(mut self, align: u32) -> Self {
        self.align = align;
        self
    }
}

/// Arguments for [`MachOBinary::add_segment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMachSegment {
    pub name: String,
    pub permissions: Permissions,
    pub content: Vec<u8>,
    pub mem_size: u64,
    /// Requested address; the segment goes in front of `__LINKEDIT` when
    /// `None`.
    pub address: Option<u64>,
}

impl NewMachSegment {
    pub fn new(name: impl Into<String>, permissions: Permissions, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            permissions,
            mem_size: content.len() as u64,
            content,
            address: None,
        }
    }

    pub fn at(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }
}

fn check_name(what: &str, name: &str) -> Result<[u8; 16], EditError> {
    if name.is_empty() {
        return Err(EditError::InvalidValue(format!("{} name is empty", what)));
    }
    encode_fixed_name(name)
        .ok_or_else(|| EditError::InvalidValue(format!("{} name {} is longer than 16 bytes", what, name)))
}

impl MachOBinary {
    fn live_section(&self, id: SectionId) -> Result<&MachSection, EditError> {
        self.sections
            .get(id)
            .ok_or_else(|| EditError::UnknownEntity(format!("section {:?}", id)))
    }

    fn live_segment(&self, id: SegmentId) -> Result<&MachSegment, EditError> {
        self.segments
            .get(id)
            .ok_or_else(|| EditError::UnknownEntity(format!("segment {:?}", id)))
    }

    /// Symbols can only be added or removed while every table indexing them
    /// is regenerated.
    fn check_symbols_editable(&self) -> Result<(), EditError> {
        if self.symtab.command.is_none() {
            return Err(EditError::UnsupportedEdit("binary has no LC_SYMTAB".into()));
        }
        if !self.symtab.modelled {
            return Err(EditError::UnsupportedEdit("symbol table is kept as raw bytes".into()));
        }
        if self.symtab.opaque_indices {
            return Err(EditError::UnsupportedEdit(
                "tables kept as raw bytes refer to symbols by index".into(),
            ));
        }
        Ok(())
    }

    fn linkedit(&self) -> Option<SegmentId> {
        self.segments.iter().find(|(_, s)| s.is_linkedit()).map(|(id, _)| id)
    }

    /// Append a section to `segment`. Its address comes from the layout.
    pub fn add_section(&mut self, segment: SegmentId, spec: NewMachSection) -> Result<SectionId, EditError> {
        let raw_name = check_name("section", &spec.name)?;
        let seg = self.live_segment(segment)?;
        if seg.is_linkedit() {
            return Err(EditError::UnsupportedEdit("__LINKEDIT holds no sections".into()));
        }
        if spec.align > 31 {
            return Err(EditError::InvalidValue(format!("alignment 2^{} is too large", spec.align)));
        }
        let zerofill = is_zerofill(spec.flags);
        if zerofill && !spec.content.is_empty() {
            return Err(EditError::InvalidValue(format!(
                "zero-fill section {} cannot carry content",
                spec.name
            )));
        }
        let raw_segname = seg.name_bytes();
        let size = if zerofill {
            spec.zerofill_size
        } else {
            spec.content.len() as u64
        };
        let id = self.sections.push(MachSection {
            name: spec.name,
            raw_name,
            raw_segname,
            segment,
            address: 0,
            size,
            align: spec.align,
            flags: spec.flags,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
            content: spec.content,
            raw_offset: 0,
            raw_reloff: 0,
            raw_nreloc: 0,
            parsed_ordinal: 0,
            original: None,
        });
        debug!(section = ?id, segment = ?segment, "Added section");
        Ok(id)
    }

    pub fn remove_section(&mut self, id: SectionId) -> Result<(), EditError> {
        let section = self.live_section(id)?;
        let entity = format!("section {}", section.name);
        let dangling = |referrer: String| EditError::DanglingReference {
            entity: entity.clone(),
            referrer,
        };

        let key = BlockKey::Section(id.index());
        if let Some(field) = self.fixups.targeting(key).next() {
            return Err(dangling(format!("{:?}", field.slot)));
        }
        if let Some((_, sym)) = self.symbols.iter().find(|(_, s)| s.section == Some(id)) {
            return Err(dangling(format!("symbol {}", sym.name)));
        }
        if let Some((rid, _)) = self
            .relocations
            .iter()
            .find(|(_, r)| r.section != id && r.target == RelocationTarget::Section(id))
        {
            return Err(dangling(format!("relocation {:?}", rid)));
        }

        let owned: Vec<MachRelocationId> = self
            .relocations
            .iter()
            .filter(|(_, r)| r.section == id)
            .map(|(rid, _)| rid)
            .collect();
        for rid in owned {
            self.relocations.remove(rid);
        }
        // The table stays behind as an empty block so its bytes get cleared.
        if let Some(field) = self.fixups.unregister(&MachSlot::SectionRelocations(id)) {
            if let BlockKey::Blob(index) = field.target {
                let shared = self.fixups.targeting(field.target).next().is_some();
                if let Some(blob) = self.blobs.get_mut(index).filter(|_| !shared) {
                    blob.kind = BlobKind::Raw;
                    blob.data.clear();
                }
            }
        }
        if let Some(section) = self.sections.remove(id) {
            if let Some(original) = section.original.filter(|o| o.file_size > 0) {
                self.removed.push(RemovedBlock {
                    original,
                    segment: Some(section.segment.index()),
                });
            }
            debug!(section = %section.name, "Removed section");
        }
        Ok(())
    }

    /// Replace the bytes of a section; its size follows the content.
    pub fn set_section_content(&mut self, id: SectionId, content: Vec<u8>) -> Result<(), EditError> {
        let section = self
            .sections
            .get_mut(id)
            .ok_or_else(|| EditError::UnknownEntity(format!("section {:?}", id)))?;
        if section.is_zerofill() {
            return Err(EditError::UnsupportedEdit(format!(
                "zero-fill section {} has no file content",
                section.name
            )));
        }
        section.size = content.len() as u64;
        section.content = content;
        Ok(())
    }

    /// Truncate or zero-extend a section. Zero-fill sections change their
    /// memory size.
    pub fn resize_section(&mut self, id: SectionId, size: u64) -> Result<(), EditError> {
        let section = self
            .sections
            .get_mut(id)
            .ok_or_else(|| EditError::UnknownEntity(format!("section {:?}", id)))?;
        if !section.is_zerofill() {
            let len = usize::try_from(size).map_err(|_| EditError::InvalidValue(format!("size {:#x}", size)))?;
            section.content.resize(len, 0);
        }
        section.size = size;
        Ok(())
    }

    /// Create empty symbol and string blobs for a symbol table that had
    /// none.
    fn ensure_symbol_blobs(&mut self) {
        let (Some(command), segment) = (self.symtab.command, self.linkedit()) else {
            return;
        };
        let segment = segment.filter(|_| !self.is_object());
        for (kind, field) in [(BlobKind::Symbols, 8), (BlobKind::Strings, 16)] {
            let existing = match kind {
                BlobKind::Symbols => self.symtab.symbols_blob,
                _ => self.symtab.strings_blob,
            };
            if existing.is_some() {
                continue;
            }
            let index = self.blobs.len();
            self.blobs.push(LinkeditBlob {
                kind,
                data: Vec::new(),
                original: None,
                segment,
            });
            self.fixups
                .register(MachSlot::CommandOffset(command, field), BlockKey::Blob(index), Anchor::Offset, 0);
            match kind {
                BlobKind::Symbols => self.symtab.symbols_blob = Some(index),
                _ => self.symtab.strings_blob = Some(index),
            }
        }
    }

    pub fn add_symbol(&mut self, spec: NewMachSymbol) -> Result<SymbolId, EditError> {
        if spec.name.is_empty() {
            return Err(EditError::InvalidValue("symbol name is empty".into()));
        }
        self.check_symbols_editable()?;
        if let Some(sid) = spec.section {
            self.live_section(sid)?;
        }
        self.ensure_symbol_blobs();
        let mut n_type = if spec.section.is_some() { N_SECT } else { N_UNDF };
        if spec.external {
            n_type |= N_EXT;
        }
        self.symtab.edited = true;
        let id = self.symbols.push(MachSymbol {
            name: spec.name,
            name_offset: None,
            n_type,
            section: spec.section,
            raw_sect: NO_SECT,
            desc: spec.desc,
            value: spec.value,
        });
        debug!(symbol = ?id, "Added symbol");
        Ok(id)
    }

    pub fn remove_symbol(&mut self, id: SymbolId) -> Result<(), EditError> {
        let sym = self
            .symbols
            .get(id)
            .ok_or_else(|| EditError::UnknownEntity(format!("symbol {:?}", id)))?;
        self.check_symbols_editable()?;
        let dangling = |referrer: String| EditError::DanglingReference {
            entity: format!("symbol {}", sym.name),
            referrer,
        };
        if let Some((rid, _)) = self
            .relocations
            .iter()
            .find(|(_, r)| r.target == RelocationTarget::Symbol(id))
        {
            return Err(dangling(format!("relocation {:?}", rid)));
        }
        if let Some(slot) = self
            .indirect
            .iter()
            .position(|e| *e == IndirectSymbol::Symbol(id))
        {
            return Err(dangling(format!("indirect symbol {}", slot)));
        }
        self.symbols.remove(id);
        self.symtab.edited = true;
        Ok(())
    }

    /// Set a symbol value: an address for symbols of parsed sections, the
    /// offset within the section for new ones.
    pub fn set_symbol_value(&mut self, id: SymbolId, value: u64) -> Result<(), EditError> {
        let sym = self
            .symbols
            .get_mut(id)
            .ok_or_else(|| EditError::UnknownEntity(format!("symbol {:?}", id)))?;
        sym.value = value;
        Ok(())
    }

    /// Add a segment carrying `spec.content`, with its command placed in
    /// front of `__LINKEDIT`'s.
    pub fn add_segment(&mut self, spec: NewMachSegment) -> Result<SegmentId, EditError> {
        if self.is_object() {
            return Err(EditError::UnsupportedEdit("object files have a single segment".into()));
        }
        if self.commands.values().any(|c| c.cmd == LC_DYLD_CHAINED_FIXUPS) {
            return Err(EditError::UnsupportedEdit(
                "chained fixups index segments by position".into(),
            ));
        }
        let raw_name = check_name("segment", &spec.name)?;
        if self.segments.values().any(|s| s.name == spec.name) {
            return Err(EditError::InvalidValue(format!("segment {} already exists", spec.name)));
        }
        let page = page_size(self.header.cputype);
        if let Some(address) = spec.address {
            if address % page != 0 {
                return Err(EditError::InvalidValue(format!(
                    "address {:#x} is not aligned to {:#x}",
                    address, page
                )));
            }
        }

        let file_size = spec.content.len() as u64;
        let prot = spec.permissions.to_vm_prot();
        let id = self.segments.push(MachSegment {
            name: spec.name,
            raw_name,
            vmaddr: spec.address.unwrap_or(0),
            vmsize: spec.mem_size.max(file_size),
            fileoff: 0,
            filesize: file_size,
            maxprot: prot,
            initprot: prot,
            flags: 0,
            original: None,
            fixed_address: spec.address,
        });
        self.blobs.push(LinkeditBlob {
            kind: BlobKind::Payload(id),
            data: spec.content,
            original: None,
            segment: Some(id),
        });
        let command = self.commands.push(LoadCommand {
            cmd: self.header.segment_command(),
            kind: CommandKind::Segment(id),
            raw: Vec::new(),
            original_offset: None,
        });
        let linkedit = self.linkedit().and_then(|l| self.command_of_segment(l));
        let position = linkedit
            .and_then(|l| self.command_order.iter().position(|c| *c == l))
            .unwrap_or(self.command_order.len());
        self.command_order.insert(position, command);
        debug!(segment = ?id, "Added segment");
        Ok(id)
    }

    fn entry_command(&self) -> Result<u32, EditError> {
        self.commands()
            .find(|(_, c)| matches!(c.kind, CommandKind::Main | CommandKind::Thread))
            .map(|(_, c)| c.cmd)
            .ok_or_else(|| EditError::UnsupportedEdit("binary has no LC_MAIN or LC_UNIXTHREAD".into()))
    }

    fn point_entry(&mut self, section: SectionId, offset: u64) -> Result<(), EditError> {
        let cmd = self.entry_command()?;
        let s = self.live_section(section)?;
        let anchor = if cmd == LC_MAIN {
            if s.is_zerofill() {
                return Err(EditError::InvalidValue(format!(
                    "LC_MAIN cannot point into zero-fill section {}",
                    s.name
                )));
            }
            Anchor::Offset
        } else {
            Anchor::Address
        };
        self.fixups
            .register(MachSlot::Entry, BlockKey::Section(section.index()), anchor, offset as i64);
        debug!(section = ?section, offset, "Moved entry point");
        Ok(())
    }

    /// Point the entry at `address` in the parse-time address space.
    pub fn set_entrypoint(&mut self, address: u64) -> Result<(), EditError> {
        self.entry_command()?;
        let section = self
            .section_at_address(address)
            .ok_or_else(|| EditError::InvalidValue(format!("no section contains {:#x}", address)))?;
        let base = self.sections[section].original.map_or(0, |o| o.address);
        self.point_entry(section, address - base)
    }

    /// Point the entry at `offset` bytes into `section`, wherever it ends up.
    pub fn set_entrypoint_at(&mut self, section: SectionId, offset: u64) -> Result<(), EditError> {
        let s = self.live_section(section)?;
        if offset >= s.size {
            return Err(EditError::InvalidValue(format!(
                "offset {:#x} is outside {} ({:#x} bytes)",
                offset, s.name, s.size
            )));
        }
        self.point_entry(section, offset)
    }

    pub fn add_relocation(&mut self, spec: NewMachRelocation) -> Result<MachRelocationId, EditError> {
        if !self.is_object() {
            return Err(EditError::UnsupportedEdit(
                "section relocations exist only in object files".into(),
            ));
        }
        let section = self.live_section(spec.section)?;
        if spec.offset < 0 || spec.offset as u64 >= section.size {
            return Err(EditError::InvalidValue(format!(
                "offset {:#x} is outside {}",
                spec.offset, section.name
            )));
        }
        if spec.length > 3 {
            return Err(EditError::InvalidValue(format!("length 2^{} is too large", spec.length)));
        }
        if spec.kind > 15 {
            return Err(EditError::InvalidValue(format!("relocation type {} does not fit", spec.kind)));
        }
        match spec.target {
            RelocationTarget::Symbol(sid) => {
                if !self.symtab.modelled {
                    return Err(EditError::UnsupportedEdit("symbol table is kept as raw bytes".into()));
                }
                if !self.symbols.contains(sid) {
                    return Err(EditError::UnknownEntity(format!("symbol {:?}", sid)));
                }
            }
            RelocationTarget::Section(sid) => {
                self.live_section(sid)?;
            }
            RelocationTarget::Raw { .. } => {}
        }

        let slot = MachSlot::SectionRelocations(spec.section);
        match self.fixups.get(&slot).map(|f| f.target) {
            Some(BlockKey::Blob(index)) => {
                if self.blobs.get(index).map(|b| b.kind) != Some(BlobKind::Relocations(spec.section)) {
                    return Err(EditError::UnsupportedEdit(format!(
                        "relocations of {} are kept as raw bytes",
                        section.name
                    )));
                }
            }
            _ => {
                let index = self.blobs.len();
                self.blobs.push(LinkeditBlob {
                    kind: BlobKind::Relocations(spec.section),
                    data: Vec::new(),
                    original: None,
                    segment: None,
                });
                self.fixups.register(slot, BlockKey::Blob(index), Anchor::Offset, 0);
            }
        }
        let id = self.relocations.push(MachRelocation {
            section: spec.section,
            offset: spec.offset,
            target: spec.target,
            pcrel: spec.pcrel,
            length: spec.length,
            kind: spec.kind,
            scattered: None,
        });
        Ok(id)
    }

    pub fn remove_relocation(&mut self, id: MachRelocationId) -> Result<(), EditError> {
        self.relocations
            .remove(id)
            .ok_or_else(|| EditError::UnknownEntity(format!("relocation {:?}", id)))?;
        Ok(())
    }

    /// Add an `LC_LOAD_DYLIB` after the existing ones. Adding a library that
    /// is already loaded is a no-op.
    pub fn add_library(&mut self, name: &str) -> Result<(), EditError> {
        if name.is_empty() {
            return Err(EditError::InvalidValue("library name is empty".into()));
        }
        if self.is_object() {
            return Err(EditError::UnsupportedEdit("object files load no libraries".into()));
        }
        if self.libraries().iter().any(|l| l == name) {
            return Ok(());
        }
        let raw = dylib_command(LC_LOAD_DYLIB, name, 0x1_0000, 0x1_0000, &self.header);
        let id = self.commands.push(LoadCommand {
            cmd: LC_LOAD_DYLIB,
            kind: CommandKind::Dylib { name: name.to_string() },
            raw,
            original_offset: None,
        });
        let position = self
            .command_order
            .iter()
            .rposition(|c| self.commands.get(*c).is_some_and(|c| c.is_dylib_load()))
            .map_or(self.command_order.len(), |p| p + 1);
        self.command_order.insert(position, id);
        debug!(library = name, "Added LC_LOAD_DYLIB");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::macho::testutil::*;

    #[test]
    fn test_add_section_validates_locally() {
        let mut macho = MachOBinary::parse(&minimal_exec()).unwrap();
        let text = macho.segment_by_name("__TEXT").unwrap();
        let linkedit = macho.segment_by_name("__LINKEDIT").unwrap();
        assert!(matches!(
            macho.add_section(text, NewMachSection::code("", vec![])),
            Err(EditError::InvalidValue(_))
        ));
        assert!(matches!(
            macho.add_section(text, NewMachSection::code("__a_very_long_name", vec![])),
            Err(EditError::InvalidValue(_))
        ));
        assert!(matches!(
            macho.add_section(text, NewMachSection::new("__z", S_ZEROFILL, vec![1])),
            Err(EditError::InvalidValue(_))
        ));
        assert!(matches!(
            macho.add_section(linkedit, NewMachSection::data("__x", vec![1])),
            Err(EditError::UnsupportedEdit(_))
        ));
        let id = macho.add_section(text, NewMachSection::code("__hook", vec![0xc3])).unwrap();
        let section = macho.section(id).unwrap();
        assert!(section.is_new());
        assert_eq!(section.segment, text);
    }

    #[test]
    fn test_referenced_sections_cannot_be_removed() {
        let mut macho = MachOBinary::parse(&minimal_exec()).unwrap();
        let text = macho.section_by_name("__TEXT", "__text").unwrap();
        assert!(matches!(
            macho.remove_section(text),
            Err(EditError::DanglingReference { .. })
        ));
        let data = macho.section_by_name("__DATA", "__data").unwrap();
        let err = macho.remove_section(data).unwrap_err();
        assert!(matches!(err, EditError::DanglingReference { ref referrer, .. } if referrer == "symbol _counter"));

        let stubs = macho.section_by_name("__TEXT", "__stubs").unwrap();
        macho.remove_section(stubs).unwrap();
        assert!(macho.section(stubs).is_none());
        assert_eq!(macho.removed.len(), 1);
    }

    #[test]
    fn test_symbol_edits() {
        let mut macho = MachOBinary::parse(&minimal_exec()).unwrap();
        let text = macho.section_by_name("__TEXT", "__text").unwrap();
        let id = macho
            .add_symbol(NewMachSymbol::defined("_helper", text, TEXT_ADDR + 4))
            .unwrap();
        assert!(macho.symtab.edited);
        assert!(macho.symbol(id).unwrap().is_external());

        let printf = macho.symbol_by_name("_printf").unwrap();
        assert!(matches!(
            macho.remove_symbol(printf),
            Err(EditError::DanglingReference { .. })
        ));
        macho.remove_symbol(id).unwrap();
        assert!(macho.symbol_by_name("_helper").is_none());
        assert!(matches!(macho.remove_symbol(id), Err(EditError::UnknownEntity(_))));
    }

    #[test]
    fn test_symbols_blocked_while_opaque() {
        let config = crate::config::ParseConfig {
            parse_optional: false,
            ..Default::default()
        };
        let mut macho = MachOBinary::parse_with(&minimal_exec(), &config).unwrap();
        assert!(matches!(
            macho.add_symbol(NewMachSymbol::undefined("_x")),
            Err(EditError::UnsupportedEdit(_))
        ));
    }

    #[test]
    fn test_add_segment_goes_before_linkedit() {
        let mut macho = MachOBinary::parse(&minimal_exec()).unwrap();
        let id = macho
            .add_segment(NewMachSegment::new("__HOOK", Permissions::READ | Permissions::EXECUTE, vec![0xc3; 16]))
            .unwrap();
        let names: Vec<String> = macho
            .commands()
            .filter_map(|(_, c)| match c.kind {
                CommandKind::Segment(s) => macho.segment(s).map(|s| s.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names, ["__PAGEZERO", "__TEXT", "__DATA", "__HOOK", "__LINKEDIT"]);
        assert!(macho.segment(id).unwrap().is_new());
        assert!(matches!(
            macho.add_segment(NewMachSegment::new("__HOOK", Permissions::READ, vec![])),
            Err(EditError::InvalidValue(_))
        ));
        assert!(matches!(
            macho.add_segment(NewMachSegment::new("__X", Permissions::READ, vec![]).at(0x1234)),
            Err(EditError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_entry_point_moves_with_section() {
        let mut macho = MachOBinary::parse(&minimal_exec()).unwrap();
        macho.set_entrypoint(TEXT_ADDR + 4).unwrap();
        assert_eq!(macho.entry_point(), TEXT_ADDR + 4);
        assert!(matches!(macho.set_entrypoint(0x10), Err(EditError::InvalidValue(_))));
        let bss = macho.section_by_name("__DATA", "__bss").unwrap();
        assert!(matches!(macho.set_entrypoint_at(bss, 0), Err(EditError::InvalidValue(_))));
        let text = macho.section_by_name("__TEXT", "__text").unwrap();
        assert!(matches!(macho.set_entrypoint_at(text, 8), Err(EditError::InvalidValue(_))));
    }

    #[test]
    fn test_object_relocation_edits() {
        let mut macho = MachOBinary::parse(&minimal_object()).unwrap();
        let cstring = macho.section_by_name("__TEXT", "__cstring").unwrap();
        let text = macho.section_by_name("__TEXT", "__text").unwrap();
        let id = macho
            .add_relocation(NewMachRelocation {
                section: cstring,
                offset: 0,
                target: RelocationTarget::Section(text),
                pcrel: false,
                length: 2,
                kind: 0,
            })
            .unwrap();
        assert!(macho.fixups.get(&MachSlot::SectionRelocations(cstring)).is_some());
        assert!(matches!(
            macho.remove_section(text),
            Err(EditError::DanglingReference { .. })
        ));
        macho.remove_relocation(id).unwrap();
        assert!(macho.remove_relocation(id).is_err());

        let mut exec = MachOBinary::parse(&minimal_exec()).unwrap();
        let text = exec.section_by_name("__TEXT", "__text").unwrap();
        assert!(matches!(
            exec.add_relocation(NewMachRelocation {
                section: text,
                offset: 0,
                target: RelocationTarget::Section(text),
                pcrel: false,
                length: 2,
                kind: 0,
            }),
            Err(EditError::UnsupportedEdit(_))
        ));
    }

    #[test]
    fn test_add_library_is_idempotent() {
        let mut macho = MachOBinary::parse(&minimal_exec()).unwrap();
        let before = macho.commands().count();
        macho.add_library("/usr/lib/libSystem.B.dylib").unwrap();
        assert_eq!(macho.commands().count(), before);
        macho.add_library("/usr/lib/libz.1.dylib").unwrap();
        assert_eq!(macho.libraries().len(), 2);
        assert_eq!(macho.libraries()[1], "/usr/lib/libz.1.dylib");
    }
}
