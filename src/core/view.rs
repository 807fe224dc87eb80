//! Format-agnostic projection over the object models.
//!
//! [`AbstractView`] answers the questions every container can answer
//! (entry point, sections, segments, symbols, imports, exports, libraries,
//! relocations) and accepts the edits every container can express. Records
//! borrow names from the model instead of copying it. Addresses are the
//! format's own: virtual addresses for ELF and Mach-O, RVAs for PE.
//!
//! [`Binary`] is the closed set of parsed containers.

use crate::config::{BuildConfig, ParseConfig};
use crate::core::binary::{Arch, Endianness, Format, Permissions};
use crate::error::{BuildError, EditError, ParseError};
use crate::formats::detect;
use crate::formats::elf::{
    self, ElfBinary, ElfSectionKind, NewRelocation, NewSection, NewSegment, NewSymbol, RelocationPlace,
    RelocationSymbol, SectionRef, SymbolSection,
};
use crate::formats::macho::{
    self, FatBinary, MachOBinary, NewMachRelocation, NewMachSection, NewMachSegment, NewMachSymbol,
    RelocationTarget,
};
use crate::formats::pe::{self, BaseRelocationPlace, NewBaseRelocation, NewPeSection, PeBinary};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSection<'a> {
    pub name: &'a str,
    pub address: u64,
    /// Offset in the parsed file; `None` for sections without file bytes and
    /// sections added since.
    pub file_offset: Option<u64>,
    pub size: u64,
    pub alignment: u64,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSegment<'a> {
    /// Mach-O segment name; ELF and PE segments are unnamed.
    pub name: Option<&'a str>,
    pub address: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub mem_size: u64,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSymbol<'a> {
    pub name: &'a str,
    pub value: u64,
    pub section: Option<&'a str>,
    pub defined: bool,
    pub external: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewImport<'a> {
    /// `None` for PE imports by ordinal.
    pub name: Option<&'a str>,
    pub library: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewExport<'a> {
    pub name: &'a str,
    pub address: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewRelocation<'a> {
    /// Section holding the patched bytes, if any section does.
    pub section: Option<&'a str>,
    /// Offset within that section, or the raw address.
    pub offset: u64,
    pub target: Option<&'a str>,
    pub kind: u32,
    pub addend: Option<i64>,
}

/// A section added through the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSpec {
    pub name: String,
    pub permissions: Permissions,
    pub content: Vec<u8>,
    pub alignment: u64,
}

impl SectionSpec {
    pub fn new(name: impl Into<String>, permissions: Permissions, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            permissions,
            content,
            alignment: 16,
        }
    }

    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }
}

/// A segment added through the view. Mach-O segments need a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSpec {
    pub name: Option<String>,
    pub permissions: Permissions,
    pub content: Vec<u8>,
    pub address: Option<u64>,
}

impl SegmentSpec {
    pub fn new(permissions: Permissions, content: Vec<u8>) -> Self {
        Self {
            name: None,
            permissions,
            content,
            address: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn at(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }
}

/// A relocation added through the view, patching `section` at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationSpec {
    pub section: String,
    pub offset: u64,
    /// Symbol the relocation refers to. PE base relocations have none.
    pub target: Option<String>,
    pub kind: u32,
    pub addend: Option<i64>,
}

impl RelocationSpec {
    pub fn new(section: impl Into<String>, offset: u64, kind: u32) -> Self {
        Self {
            section: section.into(),
            offset,
            target: None,
            kind,
            addend: None,
        }
    }

    pub fn against(mut self, symbol: impl Into<String>) -> Self {
        self.target = Some(symbol.into());
        self
    }

    pub fn with_addend(mut self, addend: i64) -> Self {
        self.addend = Some(addend);
        self
    }
}

fn unknown(what: &str, name: &str) -> EditError {
    EditError::UnknownEntity(format!("{} {}", what, name))
}

/// Read/write projection shared by all containers.
pub trait AbstractView {
    fn format(&self) -> Format;
    fn arch(&self) -> Arch;
    fn endianness(&self) -> Endianness;
    fn entry_point(&self) -> u64;
    fn sections(&self) -> Vec<ViewSection<'_>>;
    fn segments(&self) -> Vec<ViewSegment<'_>>;
    fn symbols(&self) -> Vec<ViewSymbol<'_>>;
    fn imports(&self) -> Vec<ViewImport<'_>>;
    fn exports(&self) -> Vec<ViewExport<'_>>;
    fn libraries(&self) -> Vec<String>;
    fn relocations(&self) -> Vec<ViewRelocation<'_>>;
    /// Optional regions that failed to decode.
    fn warnings(&self) -> Vec<String>;

    fn set_entrypoint(&mut self, address: u64) -> Result<(), EditError>;
    fn add_section(&mut self, spec: SectionSpec) -> Result<(), EditError>;
    fn remove_section(&mut self, name: &str) -> Result<(), EditError>;
    fn set_section_content(&mut self, name: &str, content: Vec<u8>) -> Result<(), EditError>;
    fn resize_section(&mut self, name: &str, size: u64) -> Result<(), EditError>;
    fn add_symbol(&mut self, name: &str, section: &str, value: u64) -> Result<(), EditError>;
    fn remove_symbol(&mut self, name: &str) -> Result<(), EditError>;
    fn set_symbol_value(&mut self, name: &str, value: u64) -> Result<(), EditError>;
    fn add_segment(&mut self, spec: SegmentSpec) -> Result<(), EditError>;
    fn add_library(&mut self, name: &str) -> Result<(), EditError>;
    fn add_relocation(&mut self, spec: RelocationSpec) -> Result<(), EditError>;
    /// Remove every relocation patching `section` at `offset`.
    fn remove_relocation(&mut self, section: &str, offset: u64) -> Result<(), EditError>;

    fn section(&self, name: &str) -> Option<ViewSection<'_>> {
        self.sections().into_iter().find(|s| s.name == name)
    }

    /// Map a parse-time address to its file offset through the segments.
    fn address_to_offset(&self, address: u64) -> Option<u64> {
        self.segments().into_iter().find_map(|s| {
            let rel = address.checked_sub(s.address)?;
            (rel < s.file_size).then(|| s.file_offset + rel)
        })
    }

    fn offset_to_address(&self, offset: u64) -> Option<u64> {
        self.segments().into_iter().find_map(|s| {
            let rel = offset.checked_sub(s.file_offset)?;
            (rel < s.file_size).then(|| s.address + rel)
        })
    }
}

fn elf_permissions(flags: u64) -> Permissions {
    let mut perms = Permissions::empty();
    if flags & elf::SHF_ALLOC != 0 {
        perms |= Permissions::READ;
    }
    if flags & elf::SHF_WRITE != 0 {
        perms |= Permissions::WRITE;
    }
    if flags & elf::SHF_EXECINSTR != 0 {
        perms |= Permissions::EXECUTE;
    }
    perms
}

impl ElfBinary {
    fn section_named(&self, name: &str) -> Result<elf::SectionId, EditError> {
        self.section_by_name(name).ok_or_else(|| unknown("section", name))
    }

    fn symbol_named(&self, name: &str) -> Result<elf::SymbolId, EditError> {
        self.symbol_by_name(name).ok_or_else(|| unknown("symbol", name))
    }

    fn section_name(&self, id: elf::SectionId) -> Option<&str> {
        self.section(id).map(|s| s.name.as_str())
    }

    /// Symbols the loader sees, falling back to the static table.
    fn linkage_symbols(&self) -> Vec<&elf::ElfSymbol> {
        let dynamic: Vec<&elf::ElfSymbol> = self
            .symbols()
            .map(|(_, s)| s)
            .filter(|s| s.table == elf::SymbolTableKind::Dynamic)
            .collect();
        if dynamic.is_empty() {
            self.symbols().map(|(_, s)| s).collect()
        } else {
            dynamic
        }
    }
}

impl AbstractView for ElfBinary {
    fn format(&self) -> Format {
        Format::ELF
    }

    fn arch(&self) -> Arch {
        ElfBinary::arch(self)
    }

    fn endianness(&self) -> Endianness {
        ElfBinary::endianness(self)
    }

    fn entry_point(&self) -> u64 {
        ElfBinary::entry_point(self)
    }

    fn sections(&self) -> Vec<ViewSection<'_>> {
        ElfBinary::sections(self)
            .filter(|(_, s)| !s.name.is_empty())
            .map(|(_, s)| {
                let size = match &s.kind {
                    ElfSectionKind::Data(bytes) | ElfSectionKind::Opaque(bytes) => bytes.len() as u64,
                    ElfSectionKind::NoBits(size) => *size,
                    ElfSectionKind::StringTable(table) => table.len() as u64,
                    _ => s.original_size().unwrap_or(0),
                };
                ViewSection {
                    name: &s.name,
                    address: s.address,
                    file_offset: s.original_offset().filter(|_| !s.is_nobits()),
                    size,
                    alignment: s.alignment,
                    permissions: elf_permissions(s.flags),
                }
            })
            .collect()
    }

    fn segments(&self) -> Vec<ViewSegment<'_>> {
        ElfBinary::segments(self)
            .filter(|(_, s)| s.is_load())
            .map(|(_, s)| ViewSegment {
                name: None,
                address: s.address,
                file_offset: s.offset,
                file_size: s.file_size,
                mem_size: s.mem_size,
                permissions: s.permissions(),
            })
            .collect()
    }

    fn symbols(&self) -> Vec<ViewSymbol<'_>> {
        ElfBinary::symbols(self)
            .map(|(_, s)| ViewSymbol {
                name: &s.name,
                value: s.value,
                section: match s.section {
                    SymbolSection::Section(id) => self.section_name(id),
                    _ => None,
                },
                defined: !s.is_undefined(),
                external: !s.is_local(),
            })
            .collect()
    }

    fn imports(&self) -> Vec<ViewImport<'_>> {
        self.linkage_symbols()
            .into_iter()
            .filter(|s| s.is_undefined() && !s.is_local() && !s.name.is_empty())
            .map(|s| ViewImport {
                name: Some(&s.name),
                library: None,
            })
            .collect()
    }

    fn exports(&self) -> Vec<ViewExport<'_>> {
        self.linkage_symbols()
            .into_iter()
            .filter(|s| !s.is_undefined() && !s.is_local() && !s.name.is_empty())
            .map(|s| ViewExport {
                name: &s.name,
                address: s.value,
            })
            .collect()
    }

    fn libraries(&self) -> Vec<String> {
        ElfBinary::libraries(self)
    }

    fn relocations(&self) -> Vec<ViewRelocation<'_>> {
        ElfBinary::relocations(self)
            .map(|(_, r)| {
                let (section, offset) = match r.place {
                    elf::RelocationPlace::Section { section, offset } => (self.section_name(section), offset),
                    elf::RelocationPlace::Address(address) => (None, address),
                };
                ViewRelocation {
                    section,
                    offset,
                    target: match r.symbol {
                        elf::RelocationSymbol::Symbol(id) => self.symbol(id).map(|s| s.name.as_str()),
                        _ => None,
                    },
                    kind: r.kind,
                    addend: r.addend,
                }
            })
            .collect()
    }

    fn warnings(&self) -> Vec<String> {
        ElfBinary::warnings(self).to_vec()
    }

    fn set_entrypoint(&mut self, address: u64) -> Result<(), EditError> {
        ElfBinary::set_entrypoint(self, address)
    }

    fn add_section(&mut self, spec: SectionSpec) -> Result<(), EditError> {
        let mut flags = elf::SHF_ALLOC;
        if spec.permissions.contains(Permissions::WRITE) {
            flags |= elf::SHF_WRITE;
        }
        if spec.permissions.contains(Permissions::EXECUTE) {
            flags |= elf::SHF_EXECINSTR;
        }
        let section = NewSection::progbits(spec.name, flags, spec.content).with_alignment(spec.alignment);
        ElfBinary::add_section(self, section).map(|_| ())
    }

    fn remove_section(&mut self, name: &str) -> Result<(), EditError> {
        let id = self.section_named(name)?;
        ElfBinary::remove_section(self, id)
    }

    fn set_section_content(&mut self, name: &str, content: Vec<u8>) -> Result<(), EditError> {
        let id = self.section_named(name)?;
        ElfBinary::set_section_content(self, id, content)
    }

    fn resize_section(&mut self, name: &str, size: u64) -> Result<(), EditError> {
        let id = self.section_named(name)?;
        ElfBinary::resize_section(self, id, size)
    }

    fn add_symbol(&mut self, name: &str, section: &str, value: u64) -> Result<(), EditError> {
        let id = self.section_named(section)?;
        let code = self.section(id).is_some_and(|s| s.flags & elf::SHF_EXECINSTR != 0);
        let symbol = if code {
            NewSymbol::function(name, id, value, 0)
        } else {
            NewSymbol::object(name, id, value, 0)
        };
        ElfBinary::add_symbol(self, symbol).map(|_| ())
    }

    fn remove_symbol(&mut self, name: &str) -> Result<(), EditError> {
        let id = self.symbol_named(name)?;
        ElfBinary::remove_symbol(self, id)
    }

    fn set_symbol_value(&mut self, name: &str, value: u64) -> Result<(), EditError> {
        let id = self.symbol_named(name)?;
        ElfBinary::set_symbol_value(self, id, value)
    }

    fn add_segment(&mut self, spec: SegmentSpec) -> Result<(), EditError> {
        let mut segment = NewSegment::new(spec.permissions, spec.content);
        if let Some(address) = spec.address {
            segment = segment.at(address);
        }
        ElfBinary::add_segment(self, segment).map(|_| ())
    }

    fn add_library(&mut self, name: &str) -> Result<(), EditError> {
        ElfBinary::add_library(self, name)
    }

    /// The entry goes to the relocation section applying to `spec.section`,
    /// or to a loaded one (`.rela.dyn`) in linked images.
    fn add_relocation(&mut self, spec: RelocationSpec) -> Result<(), EditError> {
        let target = self.section_named(&spec.section)?;
        let rela = spec.addend.is_some();
        let candidates: Vec<(elf::SectionId, &elf::ElfSection)> = ElfBinary::sections(self)
            .filter(|(_, s)| s.kind == ElfSectionKind::Relocations { rela })
            .collect();
        let (owner, link) = candidates
            .iter()
            .find(|(_, s)| s.info == SectionRef::Section(target))
            .or_else(|| candidates.iter().find(|(_, s)| s.is_alloc()))
            .map(|(id, s)| (*id, s.link))
            .ok_or_else(|| {
                let table = if rela { "RELA" } else { "REL" };
                EditError::UnsupportedEdit(format!("no {} section applies to {}", table, spec.section))
            })?;
        let symbol = match &spec.target {
            None => RelocationSymbol::None,
            Some(name) => ElfBinary::symbols(self)
                .find(|(_, s)| {
                    s.name == *name
                        && self.symbol_table(s.table).map(|t| SectionRef::Section(t.section)) == Some(link)
                })
                .map(|(id, _)| RelocationSymbol::Symbol(id))
                .ok_or_else(|| unknown("symbol", name))?,
        };
        ElfBinary::add_relocation(
            self,
            NewRelocation {
                owner,
                place: RelocationPlace::Section {
                    section: target,
                    offset: spec.offset,
                },
                symbol,
                kind: spec.kind,
                addend: spec.addend,
            },
        )
        .map(|_| ())
    }

    fn remove_relocation(&mut self, section: &str, offset: u64) -> Result<(), EditError> {
        let target = self.section_named(section)?;
        let place = RelocationPlace::Section { section: target, offset };
        let ids: Vec<elf::RelocationId> = ElfBinary::relocations(self)
            .filter(|(_, r)| r.place == place)
            .map(|(id, _)| id)
            .collect();
        if ids.is_empty() {
            return Err(unknown("relocation at", &format!("{}+{:#x}", section, offset)));
        }
        ids.into_iter().try_for_each(|id| ElfBinary::remove_relocation(self, id))
    }
}

impl PeBinary {
    fn section_named(&self, name: &str) -> Result<pe::SectionId, EditError> {
        self.section_by_name(name).ok_or_else(|| unknown("section", name))
    }

    fn section_name(&self, id: pe::SectionId) -> Option<&str> {
        self.section(id).map(|s| s.name.as_str())
    }
}

impl AbstractView for PeBinary {
    fn format(&self) -> Format {
        Format::PE
    }

    fn arch(&self) -> Arch {
        PeBinary::arch(self)
    }

    fn endianness(&self) -> Endianness {
        Endianness::Little
    }

    fn entry_point(&self) -> u64 {
        PeBinary::entry_point(self)
    }

    fn sections(&self) -> Vec<ViewSection<'_>> {
        let alignment = u64::from(self.optional_header().section_alignment);
        PeBinary::sections(self)
            .map(|(_, s)| ViewSection {
                name: &s.name,
                address: u64::from(s.virtual_address),
                file_offset: s.original_offset().filter(|_| s.raw_size() > 0),
                size: u64::from(s.mapped_size()),
                alignment,
                permissions: s.permissions(),
            })
            .collect()
    }

    /// The header region, then one segment per section.
    fn segments(&self) -> Vec<ViewSegment<'_>> {
        let headers = u64::from(self.optional_header().size_of_headers);
        let mut segments = vec![ViewSegment {
            name: None,
            address: 0,
            file_offset: 0,
            file_size: headers,
            mem_size: headers,
            permissions: Permissions::READ,
        }];
        segments.extend(PeBinary::sections(self).map(|(_, s)| ViewSegment {
            name: None,
            address: u64::from(s.virtual_address),
            file_offset: s.original_offset().unwrap_or(0),
            file_size: u64::from(s.raw_size()),
            mem_size: u64::from(s.mapped_size()),
            permissions: s.permissions(),
        }));
        segments
    }

    fn symbols(&self) -> Vec<ViewSymbol<'_>> {
        PeBinary::symbols(self)
            .iter()
            .map(|s| ViewSymbol {
                name: &s.name,
                value: u64::from(s.value),
                section: s.section.and_then(|id| self.section_name(id)),
                defined: s.section_number != 0,
                external: s.is_external(),
            })
            .collect()
    }

    fn imports(&self) -> Vec<ViewImport<'_>> {
        PeBinary::imports(self)
            .imports
            .iter()
            .map(|i| ViewImport {
                name: i.name.as_deref(),
                library: Some(&i.library),
            })
            .collect()
    }

    fn exports(&self) -> Vec<ViewExport<'_>> {
        PeBinary::exports(self)
            .exports
            .iter()
            .filter_map(|e| {
                Some(ViewExport {
                    name: e.name.as_deref()?,
                    address: u64::from(e.rva),
                })
            })
            .collect()
    }

    fn libraries(&self) -> Vec<String> {
        PeBinary::libraries(self)
    }

    fn relocations(&self) -> Vec<ViewRelocation<'_>> {
        self.base_relocations()
            .map(|(_, r)| {
                let (section, offset) = match r.place {
                    BaseRelocationPlace::Section { section, offset } => (self.section_name(section), u64::from(offset)),
                    BaseRelocationPlace::Rva(rva) => (None, u64::from(rva)),
                };
                ViewRelocation {
                    section,
                    offset,
                    target: None,
                    kind: u32::from(r.kind),
                    addend: None,
                }
            })
            .collect()
    }

    fn warnings(&self) -> Vec<String> {
        PeBinary::warnings(self).to_vec()
    }

    fn set_entrypoint(&mut self, address: u64) -> Result<(), EditError> {
        PeBinary::set_entrypoint(self, address)
    }

    fn add_section(&mut self, spec: SectionSpec) -> Result<(), EditError> {
        let characteristics = if spec.permissions.contains(Permissions::EXECUTE) {
            pe::IMAGE_SCN_CNT_CODE | pe::IMAGE_SCN_MEM_EXECUTE | pe::IMAGE_SCN_MEM_READ
        } else if spec.permissions.contains(Permissions::WRITE) {
            pe::IMAGE_SCN_CNT_INITIALIZED_DATA | pe::IMAGE_SCN_MEM_READ | pe::IMAGE_SCN_MEM_WRITE
        } else {
            pe::IMAGE_SCN_CNT_INITIALIZED_DATA | pe::IMAGE_SCN_MEM_READ
        };
        PeBinary::add_section(self, NewPeSection::new(spec.name, characteristics, spec.content)).map(|_| ())
    }

    fn remove_section(&mut self, name: &str) -> Result<(), EditError> {
        let id = self.section_named(name)?;
        PeBinary::remove_section(self, id)
    }

    fn set_section_content(&mut self, name: &str, content: Vec<u8>) -> Result<(), EditError> {
        let id = self.section_named(name)?;
        PeBinary::set_section_content(self, id, content)
    }

    fn resize_section(&mut self, name: &str, size: u64) -> Result<(), EditError> {
        let id = self.section_named(name)?;
        PeBinary::resize_section(self, id, size)
    }

    fn add_symbol(&mut self, _name: &str, _section: &str, _value: u64) -> Result<(), EditError> {
        Err(EditError::UnsupportedEdit("the COFF symbol table is carried as bytes".into()))
    }

    fn remove_symbol(&mut self, _name: &str) -> Result<(), EditError> {
        Err(EditError::UnsupportedEdit("the COFF symbol table is carried as bytes".into()))
    }

    fn set_symbol_value(&mut self, _name: &str, _value: u64) -> Result<(), EditError> {
        Err(EditError::UnsupportedEdit("the COFF symbol table is carried as bytes".into()))
    }

    fn add_segment(&mut self, _spec: SegmentSpec) -> Result<(), EditError> {
        Err(EditError::UnsupportedEdit("PE maps sections, add a section instead".into()))
    }

    fn add_library(&mut self, _name: &str) -> Result<(), EditError> {
        Err(EditError::UnsupportedEdit("import directories are not regenerated".into()))
    }

    fn add_relocation(&mut self, spec: RelocationSpec) -> Result<(), EditError> {
        if spec.target.is_some() || spec.addend.is_some() {
            return Err(EditError::InvalidValue(
                "base relocations carry neither a symbol nor an addend".into(),
            ));
        }
        let section = self.section_named(&spec.section)?;
        let offset = u32::try_from(spec.offset)
            .map_err(|_| EditError::InvalidValue(format!("offset {:#x} does not fit an RVA", spec.offset)))?;
        let kind = u8::try_from(spec.kind)
            .map_err(|_| EditError::InvalidValue(format!("base relocation type {} does not fit", spec.kind)))?;
        PeBinary::add_base_relocation(self, NewBaseRelocation { section, offset, kind }).map(|_| ())
    }

    fn remove_relocation(&mut self, section: &str, offset: u64) -> Result<(), EditError> {
        let target = self.section_named(section)?;
        let ids: Vec<pe::BaseRelocationId> = self
            .base_relocations()
            .filter(|(_, r)| {
                matches!(r.place, BaseRelocationPlace::Section { section: id, offset: at }
                    if id == target && u64::from(at) == offset)
            })
            .map(|(id, _)| id)
            .collect();
        if ids.is_empty() {
            return Err(unknown("relocation at", &format!("{}+{:#x}", section, offset)));
        }
        ids.into_iter().try_for_each(|id| self.remove_base_relocation(id))
    }
}

impl MachOBinary {
    fn section_named(&self, name: &str) -> Result<macho::SectionId, EditError> {
        self.sections()
            .find(|(_, s)| s.name == name)
            .map(|(id, _)| id)
            .ok_or_else(|| unknown("section", name))
    }

    fn symbol_named(&self, name: &str) -> Result<macho::SymbolId, EditError> {
        self.symbol_by_name(name).ok_or_else(|| unknown("symbol", name))
    }

    fn section_name(&self, id: macho::SectionId) -> Option<&str> {
        self.section(id).map(|s| s.name.as_str())
    }

    /// Segment a view-added section goes to: `__TEXT` for code, `__DATA`
    /// otherwise, or the only segment of an object file.
    fn segment_for(&self, permissions: Permissions) -> Result<macho::SegmentId, EditError> {
        let preferred = if permissions.contains(Permissions::EXECUTE) {
            "__TEXT"
        } else {
            "__DATA"
        };
        let fallback = || match self.is_object() {
            true => self.segments().next().map(|(id, _)| id),
            false => None,
        };
        self.segment_by_name(preferred)
            .or_else(fallback)
            .ok_or_else(|| unknown("segment", preferred))
    }

    /// Install names in load order, indexed by two-level namespace ordinal.
    fn library_names(&self) -> Vec<&str> {
        self.commands()
            .filter(|(_, c)| c.is_dylib_load())
            .filter_map(|(_, c)| match &c.kind {
                macho::CommandKind::Dylib { name } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl AbstractView for MachOBinary {
    fn format(&self) -> Format {
        Format::MachO
    }

    fn arch(&self) -> Arch {
        MachOBinary::arch(self)
    }

    fn endianness(&self) -> Endianness {
        MachOBinary::endianness(self)
    }

    fn entry_point(&self) -> u64 {
        MachOBinary::entry_point(self)
    }

    fn sections(&self) -> Vec<ViewSection<'_>> {
        MachOBinary::sections(self)
            .map(|(_, s)| ViewSection {
                name: &s.name,
                address: s.address,
                file_offset: s.original_offset(),
                size: s.size,
                alignment: s.alignment(),
                permissions: self.segment(s.segment).map_or(Permissions::empty(), |g| g.permissions()),
            })
            .collect()
    }

    fn segments(&self) -> Vec<ViewSegment<'_>> {
        MachOBinary::segments(self)
            .map(|(_, s)| ViewSegment {
                name: Some(&s.name),
                address: s.vmaddr,
                file_offset: s.fileoff,
                file_size: s.filesize,
                mem_size: s.vmsize,
                permissions: s.permissions(),
            })
            .collect()
    }

    fn symbols(&self) -> Vec<ViewSymbol<'_>> {
        MachOBinary::symbols(self)
            .filter(|(_, s)| !s.is_stab())
            .map(|(_, s)| ViewSymbol {
                name: &s.name,
                value: s.value,
                section: s.section.and_then(|id| self.section_name(id)),
                defined: s.is_defined(),
                external: s.is_external(),
            })
            .collect()
    }

    fn imports(&self) -> Vec<ViewImport<'_>> {
        let libraries = self.library_names();
        MachOBinary::imports(self)
            .into_iter()
            .map(|s| ViewImport {
                name: Some(&s.name),
                library: usize::from(s.desc >> 8)
                    .checked_sub(1)
                    .and_then(|i| libraries.get(i).copied()),
            })
            .collect()
    }

    fn exports(&self) -> Vec<ViewExport<'_>> {
        MachOBinary::exports(self)
            .into_iter()
            .map(|s| ViewExport {
                name: &s.name,
                address: s.value,
            })
            .collect()
    }

    fn libraries(&self) -> Vec<String> {
        MachOBinary::libraries(self)
    }

    fn relocations(&self) -> Vec<ViewRelocation<'_>> {
        MachOBinary::relocations(self)
            .map(|(_, r)| ViewRelocation {
                section: self.section_name(r.section),
                offset: u64::from(r.offset as u32),
                target: match r.target {
                    RelocationTarget::Symbol(id) => self.symbol(id).map(|s| s.name.as_str()),
                    RelocationTarget::Section(id) => self.section_name(id),
                    RelocationTarget::Raw { .. } => None,
                },
                kind: u32::from(r.kind),
                addend: None,
            })
            .collect()
    }

    fn warnings(&self) -> Vec<String> {
        MachOBinary::warnings(self).to_vec()
    }

    fn set_entrypoint(&mut self, address: u64) -> Result<(), EditError> {
        MachOBinary::set_entrypoint(self, address)
    }

    fn add_section(&mut self, spec: SectionSpec) -> Result<(), EditError> {
        if !spec.alignment.is_power_of_two() {
            return Err(EditError::InvalidValue(format!(
                "alignment {} is not a power of two",
                spec.alignment
            )));
        }
        let segment = self.segment_for(spec.permissions)?;
        let section = if spec.permissions.contains(Permissions::EXECUTE) {
            NewMachSection::code(spec.name, spec.content)
        } else {
            NewMachSection::data(spec.name, spec.content)
        };
        let section = section.with_align(spec.alignment.trailing_zeros());
        MachOBinary::add_section(self, segment, section).map(|_| ())
    }

    fn remove_section(&mut self, name: &str) -> Result<(), EditError> {
        let id = self.section_named(name)?;
        MachOBinary::remove_section(self, id)
    }

    fn set_section_content(&mut self, name: &str, content: Vec<u8>) -> Result<(), EditError> {
        let id = self.section_named(name)?;
        MachOBinary::set_section_content(self, id, content)
    }

    fn resize_section(&mut self, name: &str, size: u64) -> Result<(), EditError> {
        let id = self.section_named(name)?;
        MachOBinary::resize_section(self, id, size)
    }

    fn add_symbol(&mut self, name: &str, section: &str, value: u64) -> Result<(), EditError> {
        let id = self.section_named(section)?;
        MachOBinary::add_symbol(self, NewMachSymbol::defined(name, id, value)).map(|_| ())
    }

    fn remove_symbol(&mut self, name: &str) -> Result<(), EditError> {
        let id = self.symbol_named(name)?;
        MachOBinary::remove_symbol(self, id)
    }

    fn set_symbol_value(&mut self, name: &str, value: u64) -> Result<(), EditError> {
        let id = self.symbol_named(name)?;
        MachOBinary::set_symbol_value(self, id, value)
    }

    fn add_segment(&mut self, spec: SegmentSpec) -> Result<(), EditError> {
        let name = spec
            .name
            .ok_or_else(|| EditError::InvalidValue("Mach-O segments need a name".into()))?;
        let mut segment = NewMachSegment::new(name, spec.permissions, spec.content);
        if let Some(address) = spec.address {
            segment = segment.at(address);
        }
        MachOBinary::add_segment(self, segment).map(|_| ())
    }

    fn add_library(&mut self, name: &str) -> Result<(), EditError> {
        MachOBinary::add_library(self, name)
    }

    /// Pointer-sized, absolute relocation against a symbol.
    fn add_relocation(&mut self, spec: RelocationSpec) -> Result<(), EditError> {
        let section = self.section_named(&spec.section)?;
        let name = spec
            .target
            .as_deref()
            .ok_or_else(|| EditError::InvalidValue("Mach-O relocations need a target symbol".into()))?;
        if spec.addend.is_some() {
            return Err(EditError::InvalidValue("Mach-O relocation addends live in the section bytes".into()));
        }
        let symbol = self.symbol_named(name)?;
        let offset = i32::try_from(spec.offset)
            .map_err(|_| EditError::InvalidValue(format!("offset {:#x} does not fit", spec.offset)))?;
        let kind = u8::try_from(spec.kind)
            .map_err(|_| EditError::InvalidValue(format!("relocation type {} does not fit", spec.kind)))?;
        let length = if self.is_64() { 3 } else { 2 };
        let reloc = NewMachRelocation {
            section,
            offset,
            target: RelocationTarget::Symbol(symbol),
            pcrel: false,
            length,
            kind,
        };
        MachOBinary::add_relocation(self, reloc).map(|_| ())
    }

    fn remove_relocation(&mut self, section: &str, offset: u64) -> Result<(), EditError> {
        let target = self.section_named(section)?;
        let ids: Vec<macho::MachRelocationId> = MachOBinary::relocations(self)
            .filter(|(_, r)| r.section == target && u64::try_from(r.offset) == Ok(offset))
            .map(|(id, _)| id)
            .collect();
        if ids.is_empty() {
            return Err(unknown("relocation at", &format!("{}+{:#x}", section, offset)));
        }
        ids.into_iter().try_for_each(|id| MachOBinary::remove_relocation(self, id))
    }
}

/// Universal binaries are viewed through their first slice; reach the
/// others with [`FatBinary::slices_mut`].
impl AbstractView for FatBinary {
    fn format(&self) -> Format {
        Format::FatMachO
    }

    fn arch(&self) -> Arch {
        self.primary().arch()
    }

    fn endianness(&self) -> Endianness {
        self.primary().endianness()
    }

    fn entry_point(&self) -> u64 {
        self.primary().entry_point()
    }

    fn sections(&self) -> Vec<ViewSection<'_>> {
        AbstractView::sections(self.primary())
    }

    fn segments(&self) -> Vec<ViewSegment<'_>> {
        AbstractView::segments(self.primary())
    }

    fn symbols(&self) -> Vec<ViewSymbol<'_>> {
        AbstractView::symbols(self.primary())
    }

    fn imports(&self) -> Vec<ViewImport<'_>> {
        AbstractView::imports(self.primary())
    }

    fn exports(&self) -> Vec<ViewExport<'_>> {
        AbstractView::exports(self.primary())
    }

    fn libraries(&self) -> Vec<String> {
        self.primary().libraries()
    }

    fn relocations(&self) -> Vec<ViewRelocation<'_>> {
        AbstractView::relocations(self.primary())
    }

    fn warnings(&self) -> Vec<String> {
        FatBinary::warnings(self)
    }

    fn set_entrypoint(&mut self, address: u64) -> Result<(), EditError> {
        self.primary_mut().set_entrypoint(address)
    }

    fn add_section(&mut self, spec: SectionSpec) -> Result<(), EditError> {
        AbstractView::add_section(self.primary_mut(), spec)
    }

    fn remove_section(&mut self, name: &str) -> Result<(), EditError> {
        AbstractView::remove_section(self.primary_mut(), name)
    }

    fn set_section_content(&mut self, name: &str, content: Vec<u8>) -> Result<(), EditError> {
        AbstractView::set_section_content(self.primary_mut(), name, content)
    }

    fn resize_section(&mut self, name: &str, size: u64) -> Result<(), EditError> {
        AbstractView::resize_section(self.primary_mut(), name, size)
    }

    fn add_symbol(&mut self, name: &str, section: &str, value: u64) -> Result<(), EditError> {
        AbstractView::add_symbol(self.primary_mut(), name, section, value)
    }

    fn remove_symbol(&mut self, name: &str) -> Result<(), EditError> {
        AbstractView::remove_symbol(self.primary_mut(), name)
    }

    fn set_symbol_value(&mut self, name: &str, value: u64) -> Result<(), EditError> {
        AbstractView::set_symbol_value(self.primary_mut(), name, value)
    }

    fn add_segment(&mut self, spec: SegmentSpec) -> Result<(), EditError> {
        AbstractView::add_segment(self.primary_mut(), spec)
    }

    fn add_library(&mut self, name: &str) -> Result<(), EditError> {
        self.primary_mut().add_library(name)
    }

    fn add_relocation(&mut self, spec: RelocationSpec) -> Result<(), EditError> {
        AbstractView::add_relocation(self.primary_mut(), spec)
    }

    fn remove_relocation(&mut self, section: &str, offset: u64) -> Result<(), EditError> {
        AbstractView::remove_relocation(self.primary_mut(), section, offset)
    }
}

/// A parsed container.
#[derive(Debug, Clone)]
pub enum Binary {
    Elf(ElfBinary),
    Pe(PeBinary),
    MachO(MachOBinary),
    Fat(FatBinary),
}

impl Binary {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        Self::parse_with(data, &ParseConfig::default())
    }

    pub fn parse_with(data: &[u8], config: &ParseConfig) -> Result<Self, ParseError> {
        let format = detect(data)?;
        let span = crate::span_trace!("parse", %format, size = data.len());
        let _guard = span.enter();
        debug!("Detected format");
        let parsed = match format {
            Format::ELF => ElfBinary::parse_with(data, config).map(Binary::Elf),
            Format::PE => PeBinary::parse_with(data, config).map(Binary::Pe),
            Format::MachO => MachOBinary::parse_with(data, config).map(Binary::MachO),
            Format::FatMachO => FatBinary::parse_with(data, config).map(Binary::Fat),
        };
        parsed.map_err(|e| crate::log_error!(e, "parse failed"))
    }

    pub fn build(&self) -> Result<Vec<u8>, BuildError> {
        self.build_with(&BuildConfig::default())
    }

    pub fn build_with(&self, config: &BuildConfig) -> Result<Vec<u8>, BuildError> {
        let span = crate::span_trace!("build", format = %self.format());
        let _guard = span.enter();
        let built = match self {
            Binary::Elf(b) => b.build_with(config),
            Binary::Pe(b) => b.build_with(config),
            Binary::MachO(b) => b.build_with(config),
            Binary::Fat(b) => b.build_with(config),
        };
        built.map_err(|e| crate::log_error!(e, "build failed"))
    }

    pub fn view(&self) -> &dyn AbstractView {
        match self {
            Binary::Elf(b) => b,
            Binary::Pe(b) => b,
            Binary::MachO(b) => b,
            Binary::Fat(b) => b,
        }
    }

    pub fn view_mut(&mut self) -> &mut dyn AbstractView {
        match self {
            Binary::Elf(b) => b,
            Binary::Pe(b) => b,
            Binary::MachO(b) => b,
            Binary::Fat(b) => b,
        }
    }

    pub fn format(&self) -> Format {
        self.view().format()
    }

    pub fn as_elf(&self) -> Option<&ElfBinary> {
        match self {
            Binary::Elf(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_pe(&self) -> Option<&PeBinary> {
        match self {
            Binary::Pe(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_macho(&self) -> Option<&MachOBinary> {
        match self {
            Binary::MachO(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_fat(&self) -> Option<&FatBinary> {
        match self {
            Binary::Fat(b) => Some(b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::elf::testutil::{dynamic_exec, minimal_exec as elf_exec};
    use crate::formats::macho::testutil::{minimal_exec as macho_exec, minimal_fat, TEXT_ADDR};
    use crate::formats::pe::testutil::{minimal_pe32, minimal_pe64};

    #[test]
    fn test_dispatch_by_magic() {
        assert_eq!(Binary::parse(&elf_exec()).unwrap().format(), Format::ELF);
        assert_eq!(Binary::parse(&minimal_pe32()).unwrap().format(), Format::PE);
        assert_eq!(Binary::parse(&macho_exec()).unwrap().format(), Format::MachO);
        assert_eq!(Binary::parse(&minimal_fat()).unwrap().format(), Format::FatMachO);
    }

    #[test]
    fn test_unedited_binaries_round_trip() {
        for data in [elf_exec(), minimal_pe32(), minimal_pe64(), macho_exec(), minimal_fat()] {
            assert_eq!(Binary::parse(&data).unwrap().build().unwrap(), data);
        }
    }

    #[test]
    fn test_elf_view_prefers_dynamic_symbols() {
        let binary = Binary::parse(&dynamic_exec()).unwrap();
        let view = binary.view();
        let imports: Vec<_> = view.imports().iter().filter_map(|i| i.name).collect();
        assert_eq!(imports, ["puts"]);
        let exports = view.exports();
        assert_eq!(exports.len(), 1);
        assert_eq!((exports[0].name, exports[0].address), ("exported", 0x1000));
        assert_eq!(view.libraries(), ["libc.so.6"]);

        let bss = view.section(".bss").unwrap();
        assert_eq!(bss.size, 0x48);
        assert_eq!(bss.file_offset, None);
        assert!(bss.permissions.contains(Permissions::WRITE));

        let relocations = view.relocations();
        assert_eq!(relocations.len(), 1);
        assert_eq!(relocations[0].kind, 8);
        assert_eq!(relocations[0].addend, Some(0x1000));
    }

    #[test]
    fn test_elf_edits_by_name() {
        let mut binary = Binary::parse(&elf_exec()).unwrap();
        let view = binary.view_mut();
        view.set_section_content(".text", vec![0xcc; 16]).unwrap();
        view.set_symbol_value("_start", 0x401008).unwrap();
        assert!(matches!(view.set_symbol_value("missing", 0), Err(EditError::UnknownEntity(_))));

        let rebuilt = Binary::parse(&binary.build().unwrap()).unwrap();
        let elf = rebuilt.as_elf().unwrap();
        let text = elf.section(elf.section_by_name(".text").unwrap()).unwrap();
        assert_eq!(text.data(), Some(&[0xcc; 16][..]));
        let start = rebuilt.view().symbols().into_iter().find(|s| s.name == "_start").unwrap();
        assert_eq!(start.value, 0x401008);
        assert_eq!(start.section, Some(".text"));
        assert!(start.defined && start.external);
    }

    #[test]
    fn test_macho_view() {
        let binary = Binary::parse(&macho_exec()).unwrap();
        let view = binary.view();
        assert_eq!(view.entry_point(), TEXT_ADDR);
        let text = view.section("__text").unwrap();
        assert_eq!(text.address, TEXT_ADDR);
        assert!(text.permissions.contains(Permissions::EXECUTE));
        assert_eq!(view.address_to_offset(TEXT_ADDR), Some(0xf00));
        assert_eq!(view.offset_to_address(0xf00), Some(TEXT_ADDR));

        let imports = view.imports();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].name, Some("_printf"));
        assert_eq!(imports[0].library, Some("/usr/lib/libSystem.B.dylib"));
        let exports: Vec<&str> = view.exports().iter().map(|e| e.name).collect();
        assert_eq!(exports, ["_main"]);
        assert_eq!(view.segments()[0].name, Some("__PAGEZERO"));
    }

    #[test]
    fn test_edits_through_the_view() {
        let mut binary = Binary::parse(&macho_exec()).unwrap();
        let view = binary.view_mut();
        view.add_section(SectionSpec::new("__hook", Permissions::READ | Permissions::EXECUTE, vec![0xc3; 4]))
            .unwrap();
        view.add_symbol("_hook", "__hook", 0).unwrap();
        assert!(matches!(
            view.add_segment(SegmentSpec::new(Permissions::READ, vec![1])),
            Err(EditError::InvalidValue(_))
        ));
        assert!(matches!(view.remove_section("__nope"), Err(EditError::UnknownEntity(_))));

        let rebuilt = Binary::parse(&binary.build().unwrap()).unwrap();
        let hook = rebuilt.view().section("__hook").unwrap();
        assert_eq!(hook.address, 0x1_0000_0f10);
        let symbol = rebuilt.view().symbols().into_iter().find(|s| s.name == "_hook").unwrap();
        assert_eq!(symbol.value, 0x1_0000_0f10);
        assert_eq!(symbol.section, Some("__hook"));
    }

    #[test]
    fn test_pe_base_relocation_edits() {
        let mut binary = Binary::parse(&minimal_pe64()).unwrap();
        let view = binary.view_mut();
        assert_eq!(view.relocations().len(), 1);
        view.add_relocation(RelocationSpec::new(".rdata", 0x1e8, 10)).unwrap();
        assert!(matches!(
            view.add_relocation(RelocationSpec::new(".rdata", 0, 10).against("x")),
            Err(EditError::InvalidValue(_))
        ));

        let rebuilt = Binary::parse(&binary.build().unwrap()).unwrap();
        let places: Vec<_> = rebuilt.view().relocations().iter().map(|r| (r.section, r.offset)).collect();
        assert_eq!(places.len(), 2);
        assert!(places.contains(&(Some(".rdata"), 0x1e8)));

        let view = binary.view_mut();
        view.remove_relocation(".rdata", 0x1f0).unwrap();
        assert!(matches!(view.remove_relocation(".rdata", 0x1f0), Err(EditError::UnknownEntity(_))));
    }

    #[test]
    fn test_pe_rejects_symbol_edits() {
        let mut binary = Binary::parse(&minimal_pe64()).unwrap();
        let view = binary.view_mut();
        assert!(matches!(view.add_symbol("x", ".text", 0), Err(EditError::UnsupportedEdit(_))));
        assert!(matches!(view.add_library("user32.dll"), Err(EditError::UnsupportedEdit(_))));
        assert_eq!(view.segments()[0].file_offset, 0);
    }
}
