//! ELF object model.
//!
//! [`ElfBinary::parse`] decodes the header, the program and section header
//! tables, symbol tables, relocation sections and the dynamic table into
//! arenas of entities. Sections keep their bytes; tables the model
//! understands are regenerated from entities when the binary is rebuilt.
//! Pointer-valued header and dynamic fields are recorded in a
//! [`FixupRegistry`] so they follow their target when the layout changes.

pub mod builder;
pub mod dynamic;
pub mod edit;
pub mod headers;
pub mod relocations;
pub mod sections;
pub mod segments;
pub mod symbols;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

use crate::config::ParseConfig;
use crate::core::arena::Arena;
use crate::core::binary::{Arch, Endianness};
use crate::core::fixup::{Anchor, FixupRegistry};
use crate::core::layout::{BlockKey, Placement, RemovedBlock};
use crate::core::strtab::StringTable;
use crate::error::{ParseError, ParseStage};
use crate::stream::{ByteStream, StageExt};
use bytes::Bytes;
use std::collections::HashMap;
use tracing::{debug, warn};

pub use dynamic::{DynamicEntry, DynamicTable};
pub use edit::{NewSection, NewSegment};
pub use relocations::{ElfRelocation, NewRelocation, RelocationId, RelocationPlace, RelocationSymbol};
pub use sections::{ElfSection, ElfSectionKind, SectionId, SectionRef, SymbolTableKind};
pub use segments::{ElfSegment, SegmentId};
pub use symbols::{ElfSymbol, NewSymbol, SymbolId, SymbolSection};
pub use types::*;

use headers::parse_header;
use sections::parse_section_table;
use segments::parse_program_headers;

/// Pointer fields the builder recomputes from block placements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElfSlot {
    Entry,
    /// Value of the dynamic entry with this serial.
    Dynamic(u32),
    /// Addend of a load-base-relative relocation.
    Addend(RelocationId),
}

/// Bookkeeping for one symbol table section.
#[derive(Debug, Clone)]
pub(crate) struct SymbolTableInfo {
    pub kind: SymbolTableKind,
    pub section: SectionId,
    /// Entry zero, kept verbatim.
    pub null_entry: RawSymbol,
    /// `sh_info` as read; rewritten only once symbols were added or removed.
    pub original_info: u32,
    pub edited: bool,
}

#[derive(Debug, Clone)]
pub struct ElfBinary {
    pub(crate) header: ElfHeader,
    pub(crate) original: Bytes,
    /// Section header zero, which carries extended counts.
    pub(crate) null_section: Option<SectionHeader>,
    pub(crate) sections: Arena<ElfSection>,
    pub(crate) segments: Arena<ElfSegment>,
    pub(crate) symbols: Arena<ElfSymbol>,
    pub(crate) relocations: Arena<ElfRelocation>,
    pub(crate) symbol_tables: Vec<SymbolTableInfo>,
    pub(crate) dynamic: Option<DynamicTable>,
    pub(crate) shstrtab: Option<SectionId>,
    /// `PT_LOAD` segments that map the file header and program headers.
    pub(crate) header_segment: Option<SegmentId>,
    pub(crate) phdr_segment: Option<SegmentId>,
    pub(crate) phdr_original: Option<Placement>,
    pub(crate) shdr_original: Option<Placement>,
    pub(crate) removed: Vec<RemovedBlock>,
    pub(crate) fixups: FixupRegistry<ElfSlot>,
    pub(crate) warnings: Vec<String>,
}

impl ElfBinary {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        Self::parse_with(data, &ParseConfig::default())
    }

    pub fn parse_with(data: &[u8], config: &ParseConfig) -> Result<Self, ParseError> {
        let stream = ByteStream::new(data);
        let header = parse_header(&stream)?;
        debug!(
            class = ?header.class,
            endian = ?header.endian,
            machine = header.e_machine,
            e_type = header.e_type,
            "Parsing ELF"
        );
        let phdrs = parse_program_headers(&stream, &header, config)?;
        let table = parse_section_table(&stream, &header, config)?;

        let mut elf = ElfBinary {
            header,
            original: Bytes::copy_from_slice(data),
            null_section: table.headers.first().copied(),
            sections: Arena::new(),
            segments: Arena::new(),
            symbols: Arena::new(),
            relocations: Arena::new(),
            symbol_tables: Vec::new(),
            dynamic: None,
            shstrtab: None,
            header_segment: None,
            phdr_segment: None,
            phdr_original: None,
            shdr_original: None,
            removed: Vec::new(),
            fixups: FixupRegistry::new(),
            warnings: Vec::new(),
        };

        elf.load_sections(&stream, &table)?;
        for ph in &phdrs {
            elf.segments.push(ElfSegment::from_header(ph));
        }
        elf.assign_segments();
        let symbol_maps = elf.load_symbols(config);
        if config.parse_optional {
            elf.load_relocations(config, &symbol_maps);
            elf.load_dynamic();
        }
        if !elf.header.is_relocatable() && elf.header.e_entry != 0 {
            elf.register_pointer(ElfSlot::Entry, elf.header.e_entry);
        }

        debug!(
            sections = elf.sections.len(),
            segments = elf.segments.len(),
            symbols = elf.symbols.len(),
            relocations = elf.relocations.len(),
            fixups = elf.fixups.len(),
            "Parsed ELF"
        );
        Ok(elf)
    }

    fn load_sections(
        &mut self,
        stream: &ByteStream<'_>,
        table: &sections::RawSectionTable,
    ) -> Result<(), ParseError> {
        let stage = ParseStage::SectionHeaders;
        let names = match table.shstrndx.and_then(|i| table.headers.get(i)) {
            Some(sh) if sh.sh_type != SHT_NOBITS && sh.sh_size > 0 => Some(StringTable::from_bytes(
                stream.read(sh.sh_offset, sh.sh_size).stage(stage)?.to_vec(),
            )),
            _ => None,
        };

        let mut ids = Vec::with_capacity(table.headers.len());
        for sh in table.headers.iter().skip(1) {
            let occupies_file = !matches!(sh.sh_type, SHT_NOBITS | SHT_NULL);
            let kind = if !occupies_file {
                ElfSectionKind::NoBits(sh.sh_size)
            } else {
                let bytes = if sh.sh_size == 0 {
                    Vec::new()
                } else {
                    stream.read(sh.sh_offset, sh.sh_size).stage(stage)?.to_vec()
                };
                match sh.sh_type {
                    SHT_STRTAB => ElfSectionKind::StringTable(StringTable::from_bytes(bytes)),
                    t if KNOWN_SECTION_TYPES.contains(&t) => ElfSectionKind::Data(bytes),
                    _ => ElfSectionKind::Opaque(bytes),
                }
            };
            let file_size = if occupies_file { sh.sh_size } else { 0 };
            let section = ElfSection {
                name: names
                    .as_ref()
                    .and_then(|n| n.get(sh.sh_name))
                    .unwrap_or_default(),
                name_offset: Some(sh.sh_name),
                sh_type: sh.sh_type,
                flags: sh.sh_flags,
                address: sh.sh_addr,
                alignment: sh.sh_addralign,
                entsize: sh.sh_entsize,
                link: SectionRef::None,
                info: SectionRef::None,
                kind,
                original: Some(Placement::new(sh.sh_offset, sh.sh_addr, file_size, sh.sh_size)),
                segment: None,
            };
            ids.push(self.sections.push(section));
        }

        let resolve = |raw: u32| -> SectionRef {
            match raw as usize {
                0 => SectionRef::None,
                i if i <= ids.len() => SectionRef::Section(ids[i - 1]),
                _ => SectionRef::Raw(raw),
            }
        };
        for (sh, &id) in table.headers.iter().skip(1).zip(&ids) {
            let links_info = matches!(sh.sh_type, SHT_REL | SHT_RELA) || sh.sh_flags & SHF_INFO_LINK != 0;
            let info = match sh.sh_info {
                0 => SectionRef::None,
                raw if links_info => resolve(raw),
                raw => SectionRef::Raw(raw),
            };
            let link = resolve(sh.sh_link);
            if let Some(section) = self.sections.get_mut(id) {
                section.link = link;
                section.info = info;
            }
        }

        self.shstrtab = table.shstrndx.and_then(|i| ids.get(i - 1).copied());
        if !table.headers.is_empty() {
            let size = table.headers.len() as u64 * self.header.class.shdr_size();
            self.shdr_original = Some(Placement::new(self.header.e_shoff, 0, size, size));
        }
        Ok(())
    }

    /// Attach each allocated section, the file header and the program
    /// header table to the `PT_LOAD` that maps them.
    fn assign_segments(&mut self) {
        let loads: Vec<(SegmentId, ElfSegment)> = self
            .segments
            .iter()
            .filter(|(_, s)| s.is_load())
            .map(|(id, s)| (id, s.clone()))
            .collect();

        for (_, section) in self.sections.iter_mut() {
            let Some(o) = section.original else { continue };
            if !section.is_alloc() {
                continue;
            }
            section.segment = loads
                .iter()
                .find(|(_, seg)| {
                    if section.is_nobits() {
                        seg.covers_address(o.address, o.mem_size)
                    } else {
                        seg.covers_file(o.offset, o.file_size)
                    }
                })
                .map(|(id, _)| *id);
        }

        let class = self.header.class;
        self.header_segment = loads
            .iter()
            .find(|(_, s)| s.covers_file(0, class.header_size()))
            .map(|(id, _)| *id);

        if self.header.e_phnum > 0 {
            let size = u64::from(self.header.e_phnum) * class.phdr_size();
            let offset = self.header.e_phoff;
            let covering = loads.iter().find(|(_, s)| s.covers_file(offset, size));
            self.phdr_segment = covering.map(|(id, _)| *id);
            let address = covering
                .and_then(|(_, s)| s.original)
                .map_or(0, |o| o.address + (offset - o.offset));
            self.phdr_original = Some(Placement::new(offset, address, size, size));
        }
    }

    fn load_symbols(&mut self, config: &ParseConfig) -> HashMap<SectionId, Vec<SymbolId>> {
        let ids = self.sections.ids();
        let section_count = ids.len();
        let mut maps = HashMap::new();
        let tables: Vec<(SectionId, SymbolTableKind)> = self
            .sections
            .iter()
            .filter(|(_, s)| matches!(s.kind, ElfSectionKind::Data(_)))
            .filter_map(|(id, s)| match s.sh_type {
                SHT_SYMTAB => Some((id, SymbolTableKind::Static)),
                SHT_DYNSYM => Some((id, SymbolTableKind::Dynamic)),
                _ => None,
            })
            .collect();

        for (id, kind) in tables {
            if self.symbol_tables.iter().any(|t| t.kind == kind) {
                self.warn(format!("ignoring additional {:?} symbol table {:?}", kind, id));
                continue;
            }
            let section = &self.sections[id];
            let strings = match section.link {
                SectionRef::Section(link) => match self.sections.get(link).map(|s| &s.kind) {
                    Some(ElfSectionKind::StringTable(t)) => Some(t.clone()),
                    _ => None,
                },
                _ => None,
            };
            let Some(strings) = strings else {
                self.warn(format!("symbol table {} has no string table", section.name));
                continue;
            };
            let raws = match symbols::parse_symbol_table(
                section.data().unwrap_or_default(),
                self.header.class,
                self.header.endian,
                config.max_symbols,
            ) {
                Ok(raws) => raws,
                Err(e) => {
                    let msg = format!("symbol table {}: {}", section.name, e);
                    self.warn(msg);
                    continue;
                }
            };

            let mut map = Vec::with_capacity(raws.len().saturating_sub(1));
            for raw in raws.iter().skip(1) {
                let section = match raw.st_shndx {
                    SHN_UNDEF => SymbolSection::Undefined,
                    SHN_ABS => SymbolSection::Absolute,
                    SHN_COMMON => SymbolSection::Common,
                    i if i < SHN_LORESERVE && usize::from(i) <= section_count => {
                        SymbolSection::Section(ids[usize::from(i) - 1])
                    }
                    other => SymbolSection::Other(other),
                };
                map.push(self.symbols.push(ElfSymbol {
                    name: strings.get(raw.st_name).unwrap_or_default(),
                    name_offset: Some(raw.st_name),
                    value: raw.st_value,
                    size: raw.st_size,
                    binding: raw.st_bind(),
                    kind: raw.st_type(),
                    other: raw.st_other,
                    section,
                    table: kind,
                }));
            }

            let original_info = match self.sections[id].info {
                SectionRef::Raw(v) => v,
                SectionRef::Section(s) => s.index() as u32 + 1,
                SectionRef::None => 0,
            };
            self.symbol_tables.push(SymbolTableInfo {
                kind,
                section: id,
                null_entry: raws.first().copied().unwrap_or_default(),
                original_info,
                edited: false,
            });
            if let Some(s) = self.sections.get_mut(id) {
                s.kind = ElfSectionKind::SymbolTable(kind);
                s.info = SectionRef::Raw(original_info);
            }
            debug!(table = ?kind, count = map.len(), "Loaded symbols");
            maps.insert(id, map);
        }
        maps
    }

    fn load_relocations(&mut self, config: &ParseConfig, symbol_maps: &HashMap<SectionId, Vec<SymbolId>>) {
        let tables: Vec<SectionId> = self
            .sections
            .iter()
            .filter(|(_, s)| matches!(s.sh_type, SHT_REL | SHT_RELA))
            .filter(|(_, s)| matches!(s.kind, ElfSectionKind::Data(_)))
            .map(|(id, _)| id)
            .collect();
        let relocatable = self.header.is_relocatable();
        let machine = self.header.e_machine;

        for id in tables {
            let section = &self.sections[id];
            let rela = section.sh_type == SHT_RELA;
            let raws = match relocations::parse_relocation_table(
                section.data().unwrap_or_default(),
                self.header.class,
                self.header.endian,
                rela,
                config.max_relocations,
            ) {
                Ok(raws) => raws,
                Err(e) => {
                    let msg = format!("relocation section {}: {}", section.name, e);
                    self.warn(msg);
                    continue;
                }
            };
            let symbol_map = match section.link {
                SectionRef::Section(link) => symbol_maps.get(&link),
                _ => None,
            };
            let target = match section.info {
                SectionRef::Section(t) => Some(t),
                _ => None,
            };

            let mut relative = Vec::new();
            for raw in &raws {
                let sym_index = raw.symbol_index(self.header.class);
                let symbol = match sym_index {
                    0 => RelocationSymbol::None,
                    i => symbol_map
                        .and_then(|m| m.get(i as usize - 1))
                        .map_or(RelocationSymbol::Raw(i), |s| RelocationSymbol::Symbol(*s)),
                };
                let place = if relocatable {
                    match target {
                        Some(section) => RelocationPlace::Section {
                            section,
                            offset: raw.r_offset,
                        },
                        None => RelocationPlace::Address(raw.r_offset),
                    }
                } else {
                    self.place_for_address(raw.r_offset)
                };
                let kind = raw.reloc_type(self.header.class);
                let rid = self.relocations.push(ElfRelocation {
                    owner: id,
                    place,
                    symbol,
                    kind,
                    addend: raw.r_addend,
                });
                if !relocatable && is_relative_reloc(machine, kind) {
                    if let Some(addend) = raw.r_addend {
                        relative.push((rid, addend as u64));
                    }
                }
            }
            for (rid, addend) in relative {
                self.register_pointer(ElfSlot::Addend(rid), addend);
            }
            if let Some(s) = self.sections.get_mut(id) {
                s.kind = ElfSectionKind::Relocations { rela };
            }
            debug!(section = ?id, count = raws.len(), rela, "Loaded relocations");
        }
    }

    fn load_dynamic(&mut self) {
        let Some((id, section)) = self
            .sections
            .iter()
            .find(|(_, s)| s.sh_type == SHT_DYNAMIC && matches!(s.kind, ElfSectionKind::Data(_)))
        else {
            return;
        };
        let raw = match dynamic::parse_dynamic(
            section.data().unwrap_or_default(),
            self.header.class,
            self.header.endian,
        ) {
            Ok(raw) => raw,
            Err(e) => {
                let msg = format!("dynamic section {}: {}", section.name, e);
                self.warn(msg);
                return;
            }
        };
        let table = DynamicTable::new(id, raw);

        for entry in table.live() {
            if dynamic::is_address_tag(entry.tag) && entry.value != 0 {
                self.register_pointer(ElfSlot::Dynamic(entry.serial), entry.value);
            } else if let Some(base_tag) = dynamic::size_tag_base(entry.tag) {
                let Some(base) = table.get(base_tag) else { continue };
                let Some(target) = self.section_starting_at(base) else { continue };
                let Some(o) = self.sections[target].original else { continue };
                if o.mem_size == entry.value && o.file_size == entry.value {
                    self.fixups.register(
                        ElfSlot::Dynamic(entry.serial),
                        BlockKey::Section(target.index()),
                        Anchor::FileSize,
                        0,
                    );
                }
            }
        }
        if let Some(s) = self.sections.get_mut(id) {
            s.kind = ElfSectionKind::Dynamic;
        }
        debug!(entries = table.entries.len(), "Loaded dynamic table");
        self.dynamic = Some(table);
    }

    pub(crate) fn warn(&mut self, message: String) {
        warn!(warning = %message, "ELF optional region skipped");
        self.warnings.push(message);
    }

    /// The allocated section covering `address` in the parse-time image.
    /// Thread-local `NOBITS` sections are skipped: they overlay later data.
    pub(crate) fn section_at_address(&self, address: u64) -> Option<SectionId> {
        let mut best: Option<(SectionId, u64)> = None;
        for (id, s) in self.sections.iter() {
            if s.flags & SHF_TLS != 0 && s.is_nobits() {
                continue;
            }
            if s.contains_address(address) {
                let start = s.original.map_or(0, |o| o.address);
                if best.map_or(true, |(_, b)| start > b) {
                    best = Some((id, start));
                }
            }
        }
        best.map(|(id, _)| id)
    }

    fn section_starting_at(&self, address: u64) -> Option<SectionId> {
        self.sections
            .iter()
            .find(|(_, s)| s.is_alloc() && s.original.is_some_and(|o| o.address == address && o.mem_size > 0))
            .map(|(id, _)| id)
    }

    /// Like [`section_at_address`](Self::section_at_address) but also
    /// accepts a pointer one past the end of a section.
    fn section_for_pointer(&self, address: u64) -> Option<SectionId> {
        self.section_at_address(address).or_else(|| {
            self.sections
                .iter()
                .find(|(_, s)| {
                    s.is_alloc()
                        && s.flags & SHF_TLS == 0
                        && s.original.is_some_and(|o| o.mem_size > 0 && o.mem_end() == address)
                })
                .map(|(id, _)| id)
        })
    }

    pub(crate) fn place_for_address(&self, address: u64) -> RelocationPlace {
        match self.section_at_address(address) {
            Some(section) => {
                let start = self.sections[section].original.map_or(0, |o| o.address);
                RelocationPlace::Section {
                    section,
                    offset: address - start,
                }
            }
            None => RelocationPlace::Address(address),
        }
    }

    /// Record that `slot` currently holds `value`, an address inside some
    /// section. Returns false when no section covers it.
    pub(crate) fn register_pointer(&mut self, slot: ElfSlot, value: u64) -> bool {
        let Some(id) = self.section_for_pointer(value) else {
            return false;
        };
        let Some(o) = self.sections[id].original else {
            return false;
        };
        self.fixups
            .register_value(slot, BlockKey::Section(id.index()), Anchor::Address, value, &o);
        true
    }

    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    pub fn class(&self) -> ElfClass {
        self.header.class
    }

    pub fn endianness(&self) -> Endianness {
        self.header.endian
    }

    pub fn arch(&self) -> Arch {
        Arch::from_elf_machine(self.header.e_machine, self.header.class.is_64())
    }

    pub fn file_type(&self) -> ElfType {
        self.header.file_type()
    }

    /// Entry address in the parse-time address space. An entry point set on
    /// a new section reports the offset within it.
    pub fn entry_point(&self) -> u64 {
        match self.fixups.get(&ElfSlot::Entry) {
            Some(field) => {
                let BlockKey::Section(index) = field.target else {
                    return self.header.e_entry;
                };
                let base = self
                    .sections
                    .get(SectionId::new(index))
                    .and_then(|s| s.original)
                    .map_or(0, |o| o.address);
                base.wrapping_add(field.delta as u64)
            }
            None => self.header.e_entry,
        }
    }

    pub fn sections(&self) -> impl Iterator<Item = (SectionId, &ElfSection)> + '_ {
        self.sections.iter()
    }

    pub fn section(&self, id: SectionId) -> Option<&ElfSection> {
        self.sections.get(id)
    }

    pub fn section_by_name(&self, name: &str) -> Option<SectionId> {
        self.sections.iter().find(|(_, s)| s.name == name).map(|(id, _)| id)
    }

    pub fn segments(&self) -> impl Iterator<Item = (SegmentId, &ElfSegment)> + '_ {
        self.segments.iter()
    }

    pub fn segment(&self, id: SegmentId) -> Option<&ElfSegment> {
        self.segments.get(id)
    }

    /// The `PT_LOAD` a section belongs to.
    pub fn segment_of(&self, id: SectionId) -> Option<SegmentId> {
        self.sections.get(id).and_then(|s| s.segment)
    }

    pub fn symbols(&self) -> impl Iterator<Item = (SymbolId, &ElfSymbol)> + '_ {
        self.symbols.iter()
    }

    pub fn symbol(&self, id: SymbolId) -> Option<&ElfSymbol> {
        self.symbols.get(id)
    }

    /// First symbol called `name`, static table first.
    pub fn symbol_by_name(&self, name: &str) -> Option<SymbolId> {
        let find = |table| {
            self.symbols
                .iter()
                .find(|(_, s)| s.table == table && s.name == name)
                .map(|(id, _)| id)
        };
        find(SymbolTableKind::Static).or_else(|| find(SymbolTableKind::Dynamic))
    }

    pub fn relocations(&self) -> impl Iterator<Item = (RelocationId, &ElfRelocation)> + '_ {
        self.relocations.iter()
    }

    pub fn relocation(&self, id: RelocationId) -> Option<&ElfRelocation> {
        self.relocations.get(id)
    }

    pub fn dynamic(&self) -> Option<&DynamicTable> {
        self.dynamic.as_ref()
    }

    /// String table the dynamic section refers to.
    pub fn dynamic_strings(&self) -> Option<&StringTable> {
        let table = self.dynamic.as_ref()?;
        let SectionRef::Section(link) = self.sections.get(table.section)?.link else {
            return None;
        };
        match &self.sections.get(link)?.kind {
            ElfSectionKind::StringTable(t) => Some(t),
            _ => None,
        }
    }

    /// `DT_NEEDED` library names.
    pub fn libraries(&self) -> Vec<String> {
        match (self.dynamic.as_ref(), self.dynamic_strings()) {
            (Some(table), Some(strings)) => table.needed(strings),
            _ => Vec::new(),
        }
    }

    pub fn soname(&self) -> Option<String> {
        let strings = self.dynamic_strings()?;
        self.dynamic.as_ref()?.string_values(DT_SONAME, strings).into_iter().next()
    }

    /// `DT_RUNPATH` entries, falling back to `DT_RPATH`.
    pub fn runpaths(&self) -> Vec<String> {
        let (Some(table), Some(strings)) = (self.dynamic.as_ref(), self.dynamic_strings()) else {
            return Vec::new();
        };
        let runpath = table.string_values(DT_RUNPATH, strings);
        if runpath.is_empty() {
            table.string_values(DT_RPATH, strings)
        } else {
            runpath
        }
    }

    /// Optional regions that failed to decode and were kept as raw bytes.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub(crate) fn symbol_table(&self, kind: SymbolTableKind) -> Option<&SymbolTableInfo> {
        self.symbol_tables.iter().find(|t| t.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::elf::testutil::*;

    #[test]
    fn test_parse_minimal_executable() {
        let data = minimal_exec();
        let elf = ElfBinary::parse(&data).unwrap();
        assert_eq!(elf.class(), ElfClass::Elf64);
        assert_eq!(elf.arch(), Arch::X86_64);
        assert_eq!(elf.entry_point(), 0x401000);

        let text = elf.section_by_name(".text").unwrap();
        let section = elf.section(text).unwrap();
        assert_eq!(section.data().unwrap(), &[0x90; 16]);
        assert_eq!(section.original_offset(), Some(0x1000));
        assert!(elf.segment_of(text).is_some());
        assert_eq!(elf.header_segment, None);
        assert!(elf.warnings().is_empty());
    }

    #[test]
    fn test_symbols_resolve_sections() {
        let elf = ElfBinary::parse(&minimal_exec()).unwrap();
        let id = elf.symbol_by_name("_start").unwrap();
        let sym = elf.symbol(id).unwrap();
        assert_eq!(sym.value, 0x401000);
        assert!(sym.is_global());
        assert_eq!(sym.section, SymbolSection::Section(elf.section_by_name(".text").unwrap()));
        assert_eq!(elf.symbol_table(SymbolTableKind::Static).unwrap().original_info, 1);
    }

    #[test]
    fn test_entry_is_tracked_as_fixup() {
        let elf = ElfBinary::parse(&minimal_exec()).unwrap();
        let field = elf.fixups.get(&ElfSlot::Entry).unwrap();
        assert_eq!(field.anchor, Anchor::Address);
        assert_eq!(field.delta, 0);
    }

    #[test]
    fn test_truncated_prefixes_never_panic() {
        let data = minimal_exec();
        for len in 0..data.len() {
            let _ = ElfBinary::parse(&data[..len]);
        }
    }

    #[test]
    fn test_optional_parsing_can_be_disabled() {
        let config = ParseConfig {
            parse_optional: false,
            ..ParseConfig::default()
        };
        let elf = ElfBinary::parse_with(&minimal_exec(), &config).unwrap();
        assert_eq!(elf.relocations().count(), 0);
        assert!(elf.dynamic().is_none());
    }
}
