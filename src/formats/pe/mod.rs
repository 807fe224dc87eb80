//! PE/COFF object model.
//!
//! [`PeBinary::parse`] decodes the DOS, COFF and optional headers, the
//! section table and, when optional parsing is enabled, the import, export,
//! exception, debug, resource and base relocation directories. Sections keep
//! their raw bytes. RVA-valued header fields and the RVA fields found inside
//! directory data are recorded in a [`FixupRegistry`] so that they follow
//! their section when the layout changes. Bytes past the last section are
//! kept as an opaque overlay.

pub mod builder;
pub mod directories;
pub mod edit;
pub mod headers;
pub mod relocations;
pub mod sections;
pub mod symbols;
pub mod types;
pub mod utils;

#[cfg(test)]
pub(crate) mod testutil;

use crate::config::ParseConfig;
use crate::core::arena::{Arena, Id};
use crate::core::binary::{Arch, Endianness};
use crate::core::fixup::{Anchor, FixupRegistry};
use crate::core::layout::{BlockKey, Placement, RemovedBlock};
use crate::error::{ParseError, ParseStage};
use crate::stream::ByteStream;
use bytes::Bytes;
use std::collections::HashSet;
use tracing::{debug, warn};

pub use directories::debug::DebugEntry;
pub use directories::export::{ExportTable, PeExport};
pub use directories::import::{ImportTable, PeImport};
pub use directories::SiteKind;
pub use edit::NewPeSection;
pub use relocations::{BaseRelocationId, BaseRelocationPlace, NewBaseRelocation, PeBaseRelocation};
pub use sections::{PeSection, SectionId};
pub use symbols::PeSymbol;
pub use types::*;

use directories::reloc::{parse_base_relocations, pointer_width};
use directories::{ImageView, PointerSite};
use headers::{parse_coff_header, parse_dos_header, parse_optional_header};
use sections::parse_section_table;

pub(crate) type SiteId = Id<PeSite>;

/// Pointer fields the builder recomputes from block placements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeSlot {
    Entry,
    BaseOfCode,
    BaseOfData,
    /// `VirtualAddress` of a data directory; a file offset for the
    /// certificate table.
    Directory(usize),
    /// `PointerToSymbolTable`.
    SymbolTable,
    /// An RVA or file offset stored in section data.
    Site(SiteId),
    /// The absolute address patched by a base relocation.
    Pointer(BaseRelocationId),
}

/// A pointer field inside section data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PeSite {
    pub section: SectionId,
    pub offset: u32,
    pub width: u8,
    pub kind: SiteKind,
}

/// Bytes after the last section's raw data.
#[derive(Debug, Clone)]
pub(crate) struct Overlay {
    pub data: Vec<u8>,
    pub original: Placement,
}

#[derive(Debug, Clone)]
pub struct PeBinary {
    pub(crate) dos: DosHeader,
    pub(crate) coff: CoffHeader,
    pub(crate) opt: OptionalHeader,
    pub(crate) original: Bytes,
    pub(crate) sections: Arena<PeSection>,
    pub(crate) sites: Arena<PeSite>,
    pub(crate) base_relocations: Arena<PeBaseRelocation>,
    pub(crate) imports: ImportTable,
    pub(crate) exports: ExportTable,
    pub(crate) debug_entries: Vec<DebugEntry>,
    pub(crate) symbols: Vec<PeSymbol>,
    pub(crate) overlay: Option<Overlay>,
    /// Offset of the section table.
    pub(crate) table_offset: u64,
    pub(crate) removed: Vec<RemovedBlock>,
    pub(crate) fixups: FixupRegistry<PeSlot>,
    pub(crate) warnings: Vec<String>,
    /// Base relocations were decoded and are regenerated on demand.
    pub(crate) base_relocs_loaded: bool,
    pub(crate) base_relocs_edited: bool,
}

impl PeBinary {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        Self::parse_with(data, &ParseConfig::default())
    }

    pub fn parse_with(data: &[u8], config: &ParseConfig) -> Result<Self, ParseError> {
        let stream = ByteStream::new(data);
        let dos = parse_dos_header(&stream)?;
        let coff_offset = u64::from(dos.e_lfanew) + 4;
        let coff = parse_coff_header(&stream, coff_offset)?;
        let opt_offset = coff_offset + COFF_HEADER_SIZE;
        let opt = parse_optional_header(&stream, opt_offset, coff.size_of_optional_header)?;
        if opt.file_alignment == 0 || opt.section_alignment == 0 {
            return Err(ParseError::header(
                ParseStage::Header,
                format!(
                    "file alignment {:#x} and section alignment {:#x} must be non-zero",
                    opt.file_alignment, opt.section_alignment
                ),
            ));
        }
        debug!(
            machine = coff.machine,
            pe32_plus = opt.is_64(),
            sections = coff.number_of_sections,
            "Parsing PE"
        );

        let table_offset = opt_offset + u64::from(coff.size_of_optional_header);
        let headers = parse_section_table(&stream, table_offset, coff.number_of_sections, config)?;
        let mut sections = Arena::new();
        for sh in &headers {
            sections.push(PeSection::from_header(&stream, sh)?);
        }

        let mut pe = PeBinary {
            dos,
            coff,
            opt,
            original: Bytes::copy_from_slice(data),
            sections,
            sites: Arena::new(),
            base_relocations: Arena::new(),
            imports: ImportTable::default(),
            exports: ExportTable::default(),
            debug_entries: Vec::new(),
            symbols: Vec::new(),
            overlay: None,
            table_offset,
            removed: Vec::new(),
            fixups: FixupRegistry::new(),
            warnings: Vec::new(),
            base_relocs_loaded: false,
            base_relocs_edited: false,
        };

        pe.load_overlay(data);
        pe.register_header_fields();
        if config.parse_optional {
            pe.load_directories(config);
            pe.load_base_relocations(config);
        }
        if pe.coff.pointer_to_symbol_table != 0 {
            pe.load_symbols(&stream, config);
        }

        debug!(
            sections = pe.sections.len(),
            imports = pe.imports.count(),
            exports = pe.exports.count(),
            base_relocations = pe.base_relocations.len(),
            fixups = pe.fixups.len(),
            overlay = pe.overlay.as_ref().map_or(0, |o| o.data.len()),
            "Parsed PE"
        );
        Ok(pe)
    }

    fn load_overlay(&mut self, data: &[u8]) {
        let len = data.len() as u64;
        let start = self
            .sections
            .values()
            .filter_map(|s| s.original)
            .filter(|o| o.file_size > 0)
            .map(|o| o.file_end())
            .fold(u64::from(self.opt.size_of_headers).min(len), u64::max);
        if start < len {
            self.overlay = Some(Overlay {
                data: data[start as usize..].to_vec(),
                original: Placement::new(start, 0, len - start, 0),
            });
        }
    }

    fn register_header_fields(&mut self) {
        let opt = self.opt.clone();
        if opt.address_of_entry_point != 0 {
            self.register_rva(PeSlot::Entry, opt.address_of_entry_point);
        }
        if opt.base_of_code != 0 {
            self.register_rva(PeSlot::BaseOfCode, opt.base_of_code);
        }
        if let Some(base) = opt.base_of_data.filter(|b| *b != 0) {
            self.register_rva(PeSlot::BaseOfData, base);
        }
        for (i, dir) in opt.data_directories.iter().enumerate() {
            if !dir.is_present() {
                continue;
            }
            if i == IMAGE_DIRECTORY_ENTRY_SECURITY {
                self.register_file_offset(PeSlot::Directory(i), u64::from(dir.virtual_address));
            } else {
                self.register_rva(PeSlot::Directory(i), dir.virtual_address);
            }
        }
        let symtab = self.coff.pointer_to_symbol_table;
        if symtab != 0 {
            self.register_file_offset(PeSlot::SymbolTable, u64::from(symtab));
        }
    }

    fn load_directories(&mut self, config: &ParseConfig) {
        let wide = self.opt.is_64();
        let image_base = self.opt.image_base;
        let dir = |i: usize| self.opt.directory(i).filter(|d| d.is_present());
        let (import_dir, delay_dir, export_dir) = (
            dir(IMAGE_DIRECTORY_ENTRY_IMPORT),
            dir(IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT),
            dir(IMAGE_DIRECTORY_ENTRY_EXPORT),
        );
        let (exception_dir, debug_dir, resource_dir) = (
            dir(IMAGE_DIRECTORY_ENTRY_EXCEPTION),
            dir(IMAGE_DIRECTORY_ENTRY_DEBUG),
            dir(IMAGE_DIRECTORY_ENTRY_RESOURCE),
        );

        let mut found: Vec<PointerSite> = Vec::new();
        let mut failures: Vec<String> = Vec::new();
        let view = ImageView::new(&self.sections);

        if let Some(d) = import_dir {
            match directories::import::parse_imports(&view, d, wide, config.max_symbols) {
                Ok(table) => self.imports = table,
                Err(e) => failures.push(format!("import directory: {}", e)),
            }
        }
        if let Some(d) = delay_dir {
            let mut table = self.imports.clone();
            match directories::import::parse_delay_imports(&view, d, wide, image_base, config.max_symbols, &mut table) {
                Ok(()) => self.imports = table,
                Err(e) => failures.push(format!("delay import directory: {}", e)),
            }
        }
        found.append(&mut self.imports.sites);

        if let Some(d) = export_dir {
            match directories::export::parse_exports(&view, d, config.max_symbols) {
                Ok(mut table) => {
                    found.append(&mut table.sites);
                    self.exports = table;
                }
                Err(e) => failures.push(format!("export directory: {}", e)),
            }
        }
        // Only the x64 layout of RUNTIME_FUNCTION is understood.
        if let Some(d) = exception_dir.filter(|_| self.coff.machine == IMAGE_FILE_MACHINE_AMD64) {
            match directories::exception::parse_exception_sites(&view, d, config.max_relocations) {
                Ok(sites) => found.extend(sites),
                Err(e) => failures.push(format!("exception directory: {}", e)),
            }
        }
        if let Some(d) = debug_dir {
            match directories::debug::parse_debug_directory(&view, d, config.max_sections) {
                Ok((entries, sites)) => {
                    self.debug_entries = entries;
                    found.extend(sites);
                }
                Err(e) => failures.push(format!("debug directory: {}", e)),
            }
        }
        if let Some(d) = resource_dir {
            match directories::resource::parse_resource_sites(&view, d, config.max_resource_depth, config.max_symbols)
            {
                Ok(sites) => found.extend(sites),
                Err(e) => failures.push(format!("resource directory: {}", e)),
            }
        }

        let located: Vec<(PointerSite, SectionId, u32)> = found
            .into_iter()
            .filter_map(|site| view.locate(site.rva).map(|(id, off)| (site, id, off)))
            .collect();
        for message in failures {
            self.warn(message);
        }

        let mut seen = HashSet::new();
        for (site, section, offset) in located {
            if !seen.insert(site.rva) {
                continue;
            }
            self.add_site(PeSite {
                section,
                offset,
                width: site.width,
                kind: site.kind,
            });
        }
        debug!(sites = self.sites.len(), "Loaded directory pointer sites");
    }

    /// Track a pointer field in section data. Fields whose value lies
    /// outside every section are left alone.
    pub(crate) fn add_site(&mut self, site: PeSite) -> Option<SiteId> {
        let data = self.sections.get(site.section)?.data();
        let value = ByteStream::new(data)
            .read_word(u64::from(site.offset), site.width == 8, Endianness::Little)
            .ok()?;
        let id = self.sites.push(site);
        let registered = match site.kind {
            SiteKind::Rva => u32::try_from(value).is_ok_and(|rva| self.register_rva(PeSlot::Site(id), rva)),
            SiteKind::FileOffset => self.register_file_offset(PeSlot::Site(id), value),
        };
        if registered {
            Some(id)
        } else {
            self.sites.remove(id);
            None
        }
    }

    fn load_base_relocations(&mut self, config: &ParseConfig) {
        let Some(dir) = self
            .opt
            .directory(IMAGE_DIRECTORY_ENTRY_BASERELOC)
            .filter(|d| d.is_present())
        else {
            return;
        };
        let view = ImageView::new(&self.sections);
        let parsed = parse_base_relocations(&view, dir, config.max_relocations).map(|raws| {
            raws.into_iter()
                .map(|raw| {
                    let place = u32::try_from(raw.rva)
                        .ok()
                        .and_then(|rva| {
                            view.locate(rva)
                                .map(|(section, offset)| BaseRelocationPlace::Section { section, offset })
                        })
                        .unwrap_or(BaseRelocationPlace::Rva(raw.rva as u32));
                    (raw, place)
                })
                .collect::<Vec<_>>()
        });
        let raws = match parsed {
            Ok(raws) => raws,
            Err(e) => {
                self.warn(format!("base relocation directory: {}", e));
                return;
            }
        };

        let image_base = self.opt.image_base;
        for (raw, place) in raws {
            let id = self.base_relocations.push(PeBaseRelocation {
                place,
                kind: raw.kind,
                param: raw.param,
            });
            if let Some(width) = pointer_width(raw.kind) {
                self.register_relocated_pointer(id, width, image_base);
            }
        }
        self.base_relocs_loaded = true;
        debug!(count = self.base_relocations.len(), "Loaded base relocations");
    }

    /// Record the address stored at a pointer relocation so that it follows
    /// the section it points into.
    pub(crate) fn register_relocated_pointer(&mut self, id: BaseRelocationId, width: u8, image_base: u64) -> bool {
        let Some(BaseRelocationPlace::Section { section, offset }) = self.base_relocations.get(id).map(|r| r.place)
        else {
            return false;
        };
        let Some(data) = self.sections.get(section).map(|s| s.data()) else {
            return false;
        };
        let Ok(value) = ByteStream::new(data).read_word(
            u64::from(offset),
            width == 8,
            Endianness::Little,
        ) else {
            return false;
        };
        match value.checked_sub(image_base).and_then(|rva| u32::try_from(rva).ok()) {
            Some(rva) => self.register_rva(PeSlot::Pointer(id), rva),
            None => false,
        }
    }

    fn load_symbols(&mut self, stream: &ByteStream<'_>, config: &ParseConfig) {
        let offset = u64::from(self.coff.pointer_to_symbol_table);
        let count = self.coff.number_of_symbols;
        let raws = match symbols::parse_coff_symbols(stream, offset, count, config.max_symbols) {
            Ok(raws) => raws,
            Err(e) => {
                self.warn(format!("COFF symbol table: {}", e));
                return;
            }
        };
        let strings = offset + u64::from(count) * COFF_SYMBOL_SIZE;
        let ids = self.sections.ids();
        for raw in &raws {
            let name = match symbols::symbol_name(stream, strings, raw) {
                Ok(name) => name,
                Err(e) => {
                    self.warn(format!("COFF symbol name: {}", e));
                    String::new()
                }
            };
            let section = usize::try_from(raw.section_number)
                .ok()
                .filter(|n| *n >= 1)
                .and_then(|n| ids.get(n - 1).copied());
            self.symbols.push(PeSymbol {
                name,
                value: raw.value,
                section,
                section_number: raw.section_number,
                sym_type: raw.sym_type,
                storage_class: raw.storage_class,
                number_of_aux_symbols: raw.number_of_aux_symbols,
            });
        }
        debug!(count = self.symbols.len(), "Loaded COFF symbols");
    }

    pub(crate) fn warn(&mut self, message: String) {
        warn!(warning = %message, "PE optional region skipped");
        self.warnings.push(message);
    }

    /// The section whose parse-time image holds `rva`, or ends exactly at it.
    pub(crate) fn section_for_rva(&self, rva: u32) -> Option<SectionId> {
        let inside = self
            .sections
            .iter()
            .find(|(_, s)| s.contains_rva(rva))
            .map(|(id, _)| id);
        inside.or_else(|| {
            self.sections
                .iter()
                .find(|(_, s)| s.original.is_some_and(|o| o.mem_size > 0 && o.mem_end() == u64::from(rva)))
                .map(|(id, _)| id)
        })
    }

    /// Register `slot` as holding `rva`. Returns false when no section covers it.
    pub(crate) fn register_rva(&mut self, slot: PeSlot, rva: u32) -> bool {
        let Some(id) = self.section_for_rva(rva) else {
            return false;
        };
        let Some(o) = self.sections[id].original else {
            return false;
        };
        self.fixups
            .register_value(slot, BlockKey::Section(id.index()), Anchor::Address, u64::from(rva), &o);
        true
    }

    /// Register `slot` as holding a file offset into a section's raw data or
    /// the overlay.
    pub(crate) fn register_file_offset(&mut self, slot: PeSlot, offset: u64) -> bool {
        if let Some(overlay) = &self.overlay {
            let o = overlay.original;
            if offset >= o.offset && offset <= o.file_end() {
                self.fixups.register_value(slot, BlockKey::Blob(0), Anchor::Offset, offset, &o);
                return true;
            }
        }
        let section = self.sections.iter().find_map(|(id, s)| {
            s.original
                .filter(|o| o.file_size > 0 && o.offset <= offset && offset < o.file_end())
                .map(|o| (id, o))
        });
        match section {
            Some((id, o)) => {
                self.fixups
                    .register_value(slot, BlockKey::Section(id.index()), Anchor::Offset, offset, &o);
                true
            }
            None => false,
        }
    }

    pub fn dos_header(&self) -> &DosHeader {
        &self.dos
    }

    pub fn coff_header(&self) -> &CoffHeader {
        &self.coff
    }

    pub fn optional_header(&self) -> &OptionalHeader {
        &self.opt
    }

    pub fn is_64(&self) -> bool {
        self.opt.is_64()
    }

    pub fn is_dll(&self) -> bool {
        self.coff.is_dll()
    }

    pub fn image_base(&self) -> u64 {
        self.opt.image_base
    }

    pub fn arch(&self) -> Arch {
        Arch::from_pe_machine(self.coff.machine)
    }

    /// Entry point RVA in the parse-time address space. An entry point set
    /// on a new section reports the offset within it.
    pub fn entry_point(&self) -> u64 {
        match self.fixups.get(&PeSlot::Entry) {
            Some(field) => {
                let BlockKey::Section(index) = field.target else {
                    return u64::from(self.opt.address_of_entry_point);
                };
                let base = self
                    .sections
                    .get(SectionId::new(index))
                    .and_then(|s| s.original)
                    .map_or(0, |o| o.address);
                base.wrapping_add(field.delta as u64)
            }
            None => u64::from(self.opt.address_of_entry_point),
        }
    }

    pub fn sections(&self) -> impl Iterator<Item = (SectionId, &PeSection)> + '_ {
        self.sections.iter()
    }

    pub fn section(&self, id: SectionId) -> Option<&PeSection> {
        self.sections.get(id)
    }

    pub fn section_by_name(&self, name: &str) -> Option<SectionId> {
        self.sections.iter().find(|(_, s)| s.name == name).map(|(id, _)| id)
    }

    pub fn imports(&self) -> &ImportTable {
        &self.imports
    }

    pub fn exports(&self) -> &ExportTable {
        &self.exports
    }

    /// Imported DLL names in descriptor order.
    pub fn libraries(&self) -> Vec<String> {
        self.imports.libraries.clone()
    }

    /// Import hash of the named imports, if there are any.
    pub fn imphash(&self) -> Option<String> {
        self.imports
            .imports
            .iter()
            .any(|i| i.name.is_some())
            .then(|| self.imports.import_hash())
    }

    pub fn base_relocations(&self) -> impl Iterator<Item = (BaseRelocationId, &PeBaseRelocation)> + '_ {
        self.base_relocations.iter()
    }

    pub fn base_relocation(&self, id: BaseRelocationId) -> Option<&PeBaseRelocation> {
        self.base_relocations.get(id)
    }

    pub fn debug_entries(&self) -> &[DebugEntry] {
        &self.debug_entries
    }

    /// COFF symbols; read only.
    pub fn symbols(&self) -> &[PeSymbol] {
        &self.symbols
    }

    /// Bytes after the last section, including any certificate table.
    pub fn overlay(&self) -> Option<&[u8]> {
        self.overlay.as_ref().map(|o| o.data.as_slice())
    }

    /// Whether the stored checksum matches the parsed bytes. Images with a
    /// zero checksum are not checked by the loader and report true.
    pub fn checksum_valid(&self) -> bool {
        if self.opt.checksum == 0 {
            return true;
        }
        let at = (self.table_offset - u64::from(self.coff.size_of_optional_header)) + CHECKSUM_OFFSET;
        utils::calculate_pe_checksum(&self.original, at as usize) == self.opt.checksum
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}
