//! Mutations of the ELF object model.
//!
//! Edits only check local constraints and record intent. Offsets, sizes and
//! indices are worked out by the builder, so edits can be applied in any
//! order.

use crate::core::binary::Permissions;
use crate::core::layout::{BlockKey, RemovedBlock};
use crate::core::strtab::StringTable;
use crate::error::EditError;
use crate::formats::elf::types::*;
use crate::formats::elf::{
    ElfBinary, ElfRelocation, ElfSection, ElfSectionKind, ElfSegment, ElfSlot, ElfSymbol, NewRelocation,
    NewSymbol, RelocationId, RelocationPlace, RelocationSymbol, SectionId, SectionRef, SegmentId, SymbolId,
    SymbolSection, SymbolTableInfo, SymbolTableKind,
};
use crate::core::fixup::Anchor;
use tracing::debug;

/// Arguments for [`ElfBinary::add_section`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewSection {
    pub name: String,
    pub sh_type: u32,
    pub flags: u64,
    pub alignment: u64,
    pub entsize: u64,
    pub content: Vec<u8>,
    /// Memory size of a `SHT_NOBITS` section.
    pub nobits_size: u64,
}

impl NewSection {
    pub fn progbits(name: impl Into<String>, flags: u64, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            sh_type: SHT_PROGBITS,
            flags,
            alignment: 1,
            entsize: 0,
            content,
            nobits_size: 0,
        }
    }

    pub fn nobits(name: impl Into<String>, flags: u64, size: u64) -> Self {
        Self {
            sh_type: SHT_NOBITS,
            nobits_size: size,
            ..Self::progbits(name, flags, Vec::new())
        }
    }

    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_type(mut self, sh_type: u32) -> Self {
        self.sh_type = sh_type;
        self
    }
}

/// Arguments for [`ElfBinary::add_segment`]: a new `PT_LOAD`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSegment {
    pub permissions: Permissions,
    pub content: Vec<u8>,
    pub mem_size: u64,
    pub align: u64,
    /// Requested virtual address; placed after the highest segment when `None`.
    pub address: Option<u64>,
}

impl NewSegment {
    pub fn new(permissions: Permissions, content: Vec<u8>) -> Self {
        Self {
            permissions,
            mem_size: content.len() as u64,
            content,
            align: 0x1000,
            address: None,
        }
    }

    pub fn at(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }
}

fn check_alignment(alignment: u64) -> Result<(), EditError> {
    if alignment > 1 && !alignment.is_power_of_two() {
        return Err(EditError::InvalidValue(format!(
            "alignment {:#x} is not a power of two",
            alignment
        )));
    }
    Ok(())
}

fn section_permissions(flags: u64) -> Permissions {
    let mut perms = Permissions::READ;
    if flags & SHF_WRITE != 0 {
        perms |= Permissions::WRITE;
    }
    if flags & SHF_EXECINSTR != 0 {
        perms |= Permissions::EXECUTE;
    }
    perms
}

impl ElfSection {
    /// Access rights implied by the section flags.
    pub fn permissions(&self) -> Permissions {
        if self.is_alloc() {
            section_permissions(self.flags)
        } else {
            Permissions::empty()
        }
    }
}

impl ElfBinary {
    fn live_section(&self, id: SectionId) -> Result<&ElfSection, EditError> {
        self.sections
            .get(id)
            .ok_or_else(|| EditError::UnknownEntity(format!("section {:?}", id)))
    }

    /// Allocated sections go into the last `PT_LOAD` with matching access
    /// rights, falling back to the last `PT_LOAD`.
    fn pick_segment(&self, perms: Permissions) -> Option<SegmentId> {
        let loads: Vec<(SegmentId, &ElfSegment)> = self.segments.iter().filter(|(_, s)| s.is_load()).collect();
        loads
            .iter()
            .rev()
            .find(|(_, s)| s.permissions() == perms)
            .or_else(|| loads.last())
            .map(|(id, _)| *id)
    }

    pub fn add_section(&mut self, spec: NewSection) -> Result<SectionId, EditError> {
        if spec.name.is_empty() {
            return Err(EditError::InvalidValue("section name is empty".into()));
        }
        check_alignment(spec.alignment)?;
        let kind = match spec.sh_type {
            SHT_NOBITS => ElfSectionKind::NoBits(spec.nobits_size),
            SHT_STRTAB => ElfSectionKind::StringTable(StringTable::from_bytes(spec.content)),
            SHT_REL | SHT_RELA => ElfSectionKind::Relocations {
                rela: spec.sh_type == SHT_RELA,
            },
            SHT_SYMTAB | SHT_DYNSYM | SHT_DYNAMIC => {
                return Err(EditError::UnsupportedEdit(format!(
                    "sections of type {:#x} are created by the model",
                    spec.sh_type
                )))
            }
            t if KNOWN_SECTION_TYPES.contains(&t) => ElfSectionKind::Data(spec.content),
            _ => ElfSectionKind::Opaque(spec.content),
        };
        let link = match kind {
            ElfSectionKind::Relocations { .. } => self
                .symbol_table(SymbolTableKind::Static)
                .map_or(SectionRef::None, |t| SectionRef::Section(t.section)),
            _ => SectionRef::None,
        };
        let entsize = match kind {
            ElfSectionKind::Relocations { rela } => self.header.class.rel_size(rela),
            _ => spec.entsize,
        };
        let segment = if spec.flags & SHF_ALLOC != 0 {
            self.pick_segment(section_permissions(spec.flags))
        } else {
            None
        };
        let id = self.sections.push(ElfSection {
            name: spec.name,
            name_offset: None,
            sh_type: spec.sh_type,
            flags: spec.flags,
            address: 0,
            alignment: spec.alignment,
            entsize,
            link,
            info: SectionRef::None,
            kind,
            original: None,
            segment,
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

        if self.shstrtab == Some(id) {
            return Err(dangling("e_shstrndx".into()));
        }
        match section.kind {
            ElfSectionKind::Dynamic | ElfSectionKind::SymbolTable(SymbolTableKind::Dynamic) => {
                return Err(EditError::UnsupportedEdit(format!(
                    "{} is required by the dynamic loader",
                    entity
                )))
            }
            _ => {}
        }
        if let Some((_, other)) = self
            .sections
            .iter()
            .find(|(o, s)| *o != id && (s.link == SectionRef::Section(id) || s.info == SectionRef::Section(id)))
        {
            return Err(dangling(format!("section {}", other.name)));
        }
        if let Some((_, sym)) = self
            .symbols
            .iter()
            .find(|(_, s)| s.section == SymbolSection::Section(id))
        {
            return Err(dangling(format!("symbol {}", sym.name)));
        }
        let owned: Vec<RelocationId> = self
            .relocations
            .iter()
            .filter(|(_, r)| r.owner == id)
            .map(|(rid, _)| rid)
            .collect();
        if let Some((rid, _)) = self.relocations.iter().find(|(rid, r)| {
            !owned.contains(rid) && matches!(r.place, RelocationPlace::Section { section, .. } if section == id)
        }) {
            return Err(dangling(format!("relocation {:?}", rid)));
        }
        let key = BlockKey::Section(id.index());
        if let Some(field) = self.fixups.targeting(key).find(|f| match f.slot {
            ElfSlot::Addend(rid) => !owned.contains(&rid),
            _ => true,
        }) {
            return Err(dangling(format!("{:?}", field.slot)));
        }

        let removes_static_table = section.kind == ElfSectionKind::SymbolTable(SymbolTableKind::Static);
        if removes_static_table {
            let statics: Vec<SymbolId> = self
                .symbols
                .iter()
                .filter(|(_, s)| s.table == SymbolTableKind::Static)
                .map(|(sid, _)| sid)
                .collect();
            if let Some((rid, _)) = self.relocations.iter().find(|(rid, r)| {
                !owned.contains(rid) && matches!(r.symbol, RelocationSymbol::Symbol(s) if statics.contains(&s))
            }) {
                return Err(dangling(format!("relocation {:?}", rid)));
            }
            for sid in statics {
                self.symbols.remove(sid);
            }
            self.symbol_tables.retain(|t| t.kind != SymbolTableKind::Static);
        }

        for rid in owned {
            self.relocations.remove(rid);
            self.fixups.unregister(&ElfSlot::Addend(rid));
        }
        if let Some(section) = self.sections.remove(id) {
            if let Some(original) = section.original.filter(|o| o.file_size > 0) {
                self.removed.push(RemovedBlock {
                    original,
                    segment: section.segment.map(|s| s.index()),
                });
            }
            debug!(section = %section.name, "Removed section");
        }
        Ok(())
    }

    /// Replace the bytes of a data-carrying section.
    pub fn set_section_content(&mut self, id: SectionId, content: Vec<u8>) -> Result<(), EditError> {
        let section = self
            .sections
            .get_mut(id)
            .ok_or_else(|| EditError::UnknownEntity(format!("section {:?}", id)))?;
        match &mut section.kind {
            ElfSectionKind::Data(bytes) | ElfSectionKind::Opaque(bytes) => *bytes = content,
            ElfSectionKind::StringTable(table) => *table = StringTable::from_bytes(content),
            _ => {
                return Err(EditError::UnsupportedEdit(format!(
                    "section {} has no raw content",
                    section.name
                )))
            }
        }
        Ok(())
    }

    /// Truncate or zero-extend a section to `size` bytes.
    pub fn resize_section(&mut self, id: SectionId, size: u64) -> Result<(), EditError> {
        let section = self
            .sections
            .get_mut(id)
            .ok_or_else(|| EditError::UnknownEntity(format!("section {:?}", id)))?;
        let len = usize::try_from(size).map_err(|_| EditError::InvalidValue(format!("size {:#x}", size)))?;
        match &mut section.kind {
            ElfSectionKind::Data(bytes) | ElfSectionKind::Opaque(bytes) => bytes.resize(len, 0),
            ElfSectionKind::NoBits(n) => *n = size,
            ElfSectionKind::StringTable(table) => {
                let mut bytes = table.as_bytes().to_vec();
                bytes.resize(len, 0);
                *table = StringTable::from_bytes(bytes);
            }
            _ => {
                return Err(EditError::UnsupportedEdit(format!(
                    "section {} is sized by its entries",
                    section.name
                )))
            }
        }
        Ok(())
    }

    /// Create `.symtab` and `.strtab` for a binary that has none.
    fn ensure_static_table(&mut self) -> SectionId {
        if let Some(table) = self.symbol_table(SymbolTableKind::Static) {
            return table.section;
        }
        let class = self.header.class;
        let strtab = self.sections.push(ElfSection {
            name: ".strtab".into(),
            name_offset: None,
            sh_type: SHT_STRTAB,
            flags: 0,
            address: 0,
            alignment: 1,
            entsize: 0,
            link: SectionRef::None,
            info: SectionRef::None,
            kind: ElfSectionKind::StringTable(StringTable::new()),
            original: None,
            segment: None,
        });
        let symtab = self.sections.push(ElfSection {
            name: ".symtab".into(),
            name_offset: None,
            sh_type: SHT_SYMTAB,
            flags: 0,
            address: 0,
            alignment: class.word_size(),
            entsize: class.sym_size(),
            link: SectionRef::Section(strtab),
            info: SectionRef::None,
            kind: ElfSectionKind::SymbolTable(SymbolTableKind::Static),
            original: None,
            segment: None,
        });
        self.symbol_tables.push(SymbolTableInfo {
            kind: SymbolTableKind::Static,
            section: symtab,
            null_entry: RawSymbol::default(),
            original_info: 0,
            edited: true,
        });
        debug!("Created static symbol table");
        symtab
    }

    /// Add a symbol to the static symbol table, creating it if needed.
    pub fn add_symbol(&mut self, spec: NewSymbol) -> Result<SymbolId, EditError> {
        if spec.name.is_empty() {
            return Err(EditError::InvalidValue("symbol name is empty".into()));
        }
        if let SymbolSection::Section(sid) = spec.section {
            self.live_section(sid)?;
        }
        self.ensure_static_table();
        if let Some(t) = self.symbol_tables.iter_mut().find(|t| t.kind == SymbolTableKind::Static) {
            t.edited = true;
        }
        Ok(self.symbols.push(ElfSymbol {
            name: spec.name,
            name_offset: None,
            value: spec.value,
            size: spec.size,
            binding: spec.binding,
            kind: spec.kind,
            other: spec.other,
            section: spec.section,
            table: SymbolTableKind::Static,
        }))
    }

    pub fn remove_symbol(&mut self, id: SymbolId) -> Result<(), EditError> {
        let sym = self
            .symbols
            .get(id)
            .ok_or_else(|| EditError::UnknownEntity(format!("symbol {:?}", id)))?;
        if sym.table == SymbolTableKind::Dynamic {
            return Err(EditError::UnsupportedEdit(format!(
                "dynamic symbol {} is indexed by the hash tables",
                sym.name
            )));
        }
        if let Some((rid, _)) = self
            .relocations
            .iter()
            .find(|(_, r)| r.symbol == RelocationSymbol::Symbol(id))
        {
            return Err(EditError::DanglingReference {
                entity: format!("symbol {}", sym.name),
                referrer: format!("relocation {:?}", rid),
            });
        }
        self.symbols.remove(id);
        if let Some(t) = self.symbol_tables.iter_mut().find(|t| t.kind == SymbolTableKind::Static) {
            t.edited = true;
        }
        Ok(())
    }

    pub fn set_symbol_value(&mut self, id: SymbolId, value: u64) -> Result<(), EditError> {
        let sym = self
            .symbols
            .get_mut(id)
            .ok_or_else(|| EditError::UnknownEntity(format!("symbol {:?}", id)))?;
        sym.value = value;
        Ok(())
    }

    /// Add a `PT_LOAD` carrying `spec.content`.
    pub fn add_segment(&mut self, spec: NewSegment) -> Result<SegmentId, EditError> {
        if self.header.is_relocatable() {
            return Err(EditError::UnsupportedEdit("object files have no segments".into()));
        }
        check_alignment(spec.align)?;
        if let Some(address) = spec.address {
            if spec.align > 1 && address % spec.align != 0 {
                return Err(EditError::InvalidValue(format!(
                    "address {:#x} is not aligned to {:#x}",
                    address, spec.align
                )));
            }
        }
        let file_size = spec.content.len() as u64;
        let id = self.segments.push(ElfSegment {
            p_type: PT_LOAD,
            flags: spec.permissions.to_elf_flags(),
            offset: 0,
            address: spec.address.unwrap_or(0),
            physical_address: spec.address.unwrap_or(0),
            file_size,
            mem_size: spec.mem_size.max(file_size),
            align: spec.align.max(1),
            original: None,
            payload: Some(spec.content),
            fixed_address: spec.address,
        });
        debug!(segment = ?id, "Added segment");
        Ok(id)
    }

    /// Point `e_entry` at `address` in the parse-time address space.
    pub fn set_entrypoint(&mut self, address: u64) -> Result<(), EditError> {
        self.header.e_entry = address;
        if self.header.is_relocatable() || !self.register_pointer(ElfSlot::Entry, address) {
            self.fixups.unregister(&ElfSlot::Entry);
        }
        Ok(())
    }

    /// Point `e_entry` at `offset` bytes into `section`, wherever it ends up.
    pub fn set_entrypoint_at(&mut self, section: SectionId, offset: u64) -> Result<(), EditError> {
        let s = self.live_section(section)?;
        let size = match &s.kind {
            ElfSectionKind::NoBits(n) => *n,
            _ => s.data().map_or(0, |d| d.len() as u64),
        };
        if offset >= size {
            return Err(EditError::InvalidValue(format!(
                "offset {:#x} is outside {} ({:#x} bytes)",
                offset, s.name, size
            )));
        }
        self.header.e_entry = s.original.map_or(0, |o| o.address).wrapping_add(offset);
        self.fixups
            .register(ElfSlot::Entry, BlockKey::Section(section.index()), Anchor::Address, offset as i64);
        Ok(())
    }

    pub fn add_relocation(&mut self, spec: NewRelocation) -> Result<RelocationId, EditError> {
        let owner = self.live_section(spec.owner)?;
        let ElfSectionKind::Relocations { rela } = owner.kind else {
            return Err(EditError::InvalidValue(format!("{} is not a relocation section", owner.name)));
        };
        if rela != spec.addend.is_some() {
            return Err(EditError::InvalidValue(format!(
                "{} entries {} an explicit addend",
                owner.name,
                if rela { "need" } else { "cannot carry" }
            )));
        }
        let owner_link = owner.link;
        if let RelocationPlace::Section { section, .. } = spec.place {
            self.live_section(section)?;
        }
        if let RelocationSymbol::Symbol(sid) = spec.symbol {
            let sym = self
                .symbols
                .get(sid)
                .ok_or_else(|| EditError::UnknownEntity(format!("symbol {:?}", sid)))?;
            let table = self.symbol_table(sym.table).map(|t| SectionRef::Section(t.section));
            if table != Some(owner_link) {
                return Err(EditError::InvalidValue(format!(
                    "symbol {} is not in the table linked by the relocation section",
                    sym.name
                )));
            }
        }
        let id = self.relocations.push(ElfRelocation {
            owner: spec.owner,
            place: spec.place,
            symbol: spec.symbol,
            kind: spec.kind,
            addend: spec.addend,
        });
        if !self.header.is_relocatable() && is_relative_reloc(self.header.e_machine, spec.kind) {
            if let Some(addend) = spec.addend {
                self.register_pointer(ElfSlot::Addend(id), addend as u64);
            }
        }
        Ok(id)
    }

    pub fn remove_relocation(&mut self, id: RelocationId) -> Result<(), EditError> {
        self.relocations
            .remove(id)
            .ok_or_else(|| EditError::UnknownEntity(format!("relocation {:?}", id)))?;
        self.fixups.unregister(&ElfSlot::Addend(id));
        Ok(())
    }

    /// Add a `DT_NEEDED` entry. Adding a library that is already needed is a no-op.
    pub fn add_library(&mut self, name: &str) -> Result<(), EditError> {
        if name.is_empty() {
            return Err(EditError::InvalidValue("library name is empty".into()));
        }
        if self.libraries().iter().any(|l| l == name) {
            return Ok(());
        }
        let table = self
            .dynamic
            .as_ref()
            .ok_or_else(|| EditError::UnsupportedEdit("binary has no dynamic section".into()))?;
        let strtab = match self.sections.get(table.section).map(|s| s.link) {
            Some(SectionRef::Section(link)) => link,
            _ => return Err(EditError::UnsupportedEdit("dynamic section has no string table".into())),
        };
        let offset = match self.sections.get_mut(strtab).map(|s| &mut s.kind) {
            Some(ElfSectionKind::StringTable(strings)) => strings.intern(name),
            _ => return Err(EditError::UnsupportedEdit("dynamic string table is not a string table".into())),
        };
        if let Some(table) = self.dynamic.as_mut() {
            table.insert_needed(offset);
        }
        debug!(library = name, "Added DT_NEEDED");
        Ok(())
    }
}
