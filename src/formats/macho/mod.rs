//! Mach-O object model.
//!
//! [`MachOBinary::parse`] decodes the Mach header and the load command
//! table into segments, sections, symbols and relocations. Data referenced
//! from load commands (mostly `__LINKEDIT` contents) is split into blobs:
//! the symbol table, string table, indirect symbol table and section
//! relocation tables are regenerated from entities, anything else is carried
//! as bytes. Every offset field pointing at a blob and the entry point are
//! recorded in a [`FixupRegistry`].
//!
//! Universal binaries are handled by [`fat::FatBinary`], which wraps one
//! `MachOBinary` per architecture.

pub mod builder;
pub mod commands;
pub mod edit;
pub mod fat;
pub mod headers;
pub mod relocations;
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
use tracing::{debug, warn};

pub use commands::{CommandId, CommandKind, LoadCommand};
pub use edit::{NewMachSection, NewMachSegment};
pub use fat::{FatBinary, FatSlice};
pub use relocations::{MachRelocation, MachRelocationId, NewMachRelocation, RelocationTarget};
pub use segments::{MachSection, MachSegment, SectionId, SegmentId};
pub use symbols::{IndirectSymbol, MachSymbol, NewMachSymbol, SymbolId};
pub use types::*;

use commands::{command_string, data_fields, parse_load_commands, thread_pc_field, RawCommand};
use headers::parse_header;
use segments::parse_segment_command;

/// Pointer fields the builder recomputes from block placements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachSlot {
    /// `LC_MAIN.entryoff` or the thread state program counter.
    Entry,
    /// A file offset field at this byte offset within a load command.
    CommandOffset(CommandId, u32),
    /// `reloff` of a section header.
    SectionRelocations(SectionId),
}

/// What a blob holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Symbols,
    Strings,
    IndirectSymbols,
    Relocations(SectionId),
    /// Contents of a segment created by an edit.
    Payload(SegmentId),
    Raw,
}

/// A range of file data referenced from a load command rather than
/// described by a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LinkeditBlob {
    pub kind: BlobKind,
    /// Bytes of raw blobs; modelled blobs are regenerated.
    pub data: Vec<u8>,
    pub original: Option<Placement>,
    pub segment: Option<SegmentId>,
}

impl LinkeditBlob {
    pub fn original_size(&self) -> u64 {
        self.original.map_or(0, |o| o.file_size)
    }
}

/// Where the model keeps `LC_SYMTAB` and `LC_DYSYMTAB` state.
#[derive(Debug, Clone, Default)]
pub(crate) struct SymtabInfo {
    pub command: Option<CommandId>,
    pub dysymtab: Option<CommandId>,
    pub symbols_blob: Option<usize>,
    pub strings_blob: Option<usize>,
    pub indirect_blob: Option<usize>,
    /// Symbols and strings were decoded and can be regenerated.
    pub modelled: bool,
    /// Symbols were added or removed; the table is regrouped.
    pub edited: bool,
    /// Tables kept as bytes refer to symbols by index.
    pub opaque_indices: bool,
}

#[derive(Debug, Clone)]
pub struct MachOBinary {
    pub(crate) header: MachHeader,
    pub(crate) original: Bytes,
    pub(crate) commands: Arena<LoadCommand>,
    /// Command table order.
    pub(crate) command_order: Vec<CommandId>,
    pub(crate) segments: Arena<MachSegment>,
    pub(crate) sections: Arena<MachSection>,
    pub(crate) symbols: Arena<MachSymbol>,
    pub(crate) strings: StringTable,
    pub(crate) indirect: Vec<IndirectSymbol>,
    pub(crate) relocations: Arena<MachRelocation>,
    pub(crate) blobs: Vec<LinkeditBlob>,
    pub(crate) symtab: SymtabInfo,
    /// Segment mapping the header and load commands.
    pub(crate) header_segment: Option<SegmentId>,
    pub(crate) removed: Vec<RemovedBlock>,
    pub(crate) fixups: FixupRegistry<MachSlot>,
    pub(crate) warnings: Vec<String>,
}

/// File range referenced by an offset field, collected while walking the
/// commands.
struct DataRef {
    slot: MachSlot,
    offset: u64,
    size: u64,
    kind: BlobKind,
}

impl DataRef {
    fn command(command: CommandId, field: u64, offset: u32, size: u64, kind: BlobKind) -> Self {
        Self {
            slot: MachSlot::CommandOffset(command, field as u32),
            offset: u64::from(offset),
            size,
            kind,
        }
    }
}

impl MachOBinary {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        Self::parse_with(data, &ParseConfig::default())
    }

    pub fn parse_with(data: &[u8], config: &ParseConfig) -> Result<Self, ParseError> {
        let stream = ByteStream::new(data);
        let header = parse_header(&stream)?;
        debug!(
            is_64 = header.is_64,
            endian = ?header.endian,
            cputype = header.cputype,
            filetype = header.filetype,
            ncmds = header.ncmds,
            "Parsing Mach-O"
        );
        let raw_commands = parse_load_commands(&stream, &header, config)?;

        let mut macho = MachOBinary {
            header,
            original: Bytes::copy_from_slice(data),
            commands: Arena::new(),
            command_order: Vec::with_capacity(raw_commands.len()),
            segments: Arena::new(),
            sections: Arena::new(),
            symbols: Arena::new(),
            strings: StringTable::new(),
            indirect: Vec::new(),
            relocations: Arena::new(),
            blobs: Vec::new(),
            symtab: SymtabInfo::default(),
            header_segment: None,
            removed: Vec::new(),
            fixups: FixupRegistry::new(),
            warnings: Vec::new(),
        };

        let mut refs = Vec::new();
        for raw in &raw_commands {
            macho.load_command(&stream, raw, config, &mut refs)?;
        }
        if macho.segments.len() > config.max_segments {
            return Err(ParseError::table(
                ParseStage::LoadCommands,
                format!("{} segments exceed the limit of {}", macho.segments.len(), config.max_segments),
            ));
        }
        let command_size = macho.header.size() + u64::from(macho.header.sizeofcmds);
        macho.header_segment = macho
            .segments
            .iter()
            .find(|(_, s)| s.covers_file(0, command_size))
            .map(|(id, _)| id);

        macho.load_blobs(&stream, refs)?;
        if config.parse_optional {
            macho.load_symbols(config);
            macho.load_relocations(config);
        } else {
            // Undecoded tables stay opaque.
            for blob in macho.blobs.iter_mut() {
                blob.kind = BlobKind::Raw;
            }
            macho.symtab = SymtabInfo {
                command: macho.symtab.command,
                dysymtab: macho.symtab.dysymtab,
                ..SymtabInfo::default()
            };
        }
        macho.load_entry(&raw_commands);

        debug!(
            commands = macho.commands.len(),
            segments = macho.segments.len(),
            sections = macho.sections.len(),
            symbols = macho.symbols.len(),
            relocations = macho.relocations.len(),
            blobs = macho.blobs.len(),
            fixups = macho.fixups.len(),
            "Parsed Mach-O"
        );
        Ok(macho)
    }

    fn load_command(
        &mut self,
        stream: &ByteStream<'_>,
        raw: &RawCommand<'_>,
        config: &ParseConfig,
        refs: &mut Vec<DataRef>,
    ) -> Result<(), ParseError> {
        let stage = ParseStage::LoadCommands;
        let header = self.header;
        let e = header.endian;
        let id = self.commands.push(LoadCommand {
            cmd: raw.cmd,
            kind: CommandKind::Raw,
            raw: raw.data.to_vec(),
            original_offset: Some(raw.offset),
        });
        self.command_order.push(id);

        let field = |offset: u64| ByteStream::new(raw.data).read_u32(offset, e).stage(stage);
        let kind = match raw.cmd {
            LC_SEGMENT | LC_SEGMENT_64 if raw.cmd == header.segment_command() => {
                let (segment, sections) = parse_segment_command(raw.data, &header, config.max_sections)?;
                let seg = MachSegment::from_raw(&segment);
                let seg_id = self.segments.push(seg);
                for s in &sections {
                    let mut section = self.load_section(stream, s, seg_id, &segment)?;
                    section.parsed_ordinal = self.sections.len() + 1;
                    let sid = self.sections.push(section);
                    refs.push(DataRef {
                        slot: MachSlot::SectionRelocations(sid),
                        offset: u64::from(s.reloff),
                        size: u64::from(s.nreloc) * RELOCATION_INFO_SIZE,
                        kind: BlobKind::Relocations(sid),
                    });
                    if self.sections.len() > config.max_sections {
                        return Err(ParseError::table(
                            stage,
                            format!("more than {} sections", config.max_sections),
                        ));
                    }
                }
                CommandKind::Segment(seg_id)
            }
            LC_SYMTAB => {
                self.symtab.command = Some(id);
                let nsyms = u64::from(field(12)?);
                refs.push(DataRef::command(id, 8, field(8)?, nsyms * header.nlist_size(), BlobKind::Symbols));
                refs.push(DataRef::command(id, 16, field(16)?, u64::from(field(20)?), BlobKind::Strings));
                CommandKind::Symtab
            }
            LC_DYSYMTAB => {
                self.symtab.dysymtab = Some(id);
                // ntoc, nmodtab, nextrefsyms, nextrel
                for count_field in [36, 44, 52, 68] {
                    if field(count_field)? != 0 {
                        self.symtab.opaque_indices = true;
                    }
                }
                for (off_field, count_field, entry) in data_fields(raw.cmd, &header) {
                    let kind = if off_field == 56 {
                        BlobKind::IndirectSymbols
                    } else {
                        BlobKind::Raw
                    };
                    let size = u64::from(field(count_field)?) * entry;
                    refs.push(DataRef::command(id, off_field, field(off_field)?, size, kind));
                }
                CommandKind::Dysymtab
            }
            LC_DYLD_INFO | LC_DYLD_INFO_ONLY => {
                for (off_field, size_field, _) in data_fields(raw.cmd, &header) {
                    let size = u64::from(field(size_field)?);
                    refs.push(DataRef::command(id, off_field, field(off_field)?, size, BlobKind::Raw));
                }
                CommandKind::DyldInfo
            }
            c if LINKEDIT_DATA_COMMANDS.contains(&c) => {
                refs.push(DataRef::command(id, 8, field(8)?, u64::from(field(12)?), BlobKind::Raw));
                CommandKind::LinkeditData
            }
            c if DYLIB_COMMANDS.contains(&c) => CommandKind::Dylib {
                name: command_string(raw.data, 8, e)?,
            },
            LC_RPATH => CommandKind::Rpath {
                path: command_string(raw.data, 8, e)?,
            },
            LC_MAIN => CommandKind::Main,
            LC_UNIXTHREAD => CommandKind::Thread,
            _ => CommandKind::Raw,
        };
        if let Some(command) = self.commands.get_mut(id) {
            command.kind = kind;
        }
        Ok(())
    }

    fn load_section(
        &self,
        stream: &ByteStream<'_>,
        s: &RawSection,
        segment: SegmentId,
        seg: &RawSegment,
    ) -> Result<MachSection, ParseError> {
        let stage = ParseStage::SectionHeaders;
        let zerofill = s.is_zerofill();
        let content = if zerofill || s.size == 0 {
            Vec::new()
        } else {
            stream.read(u64::from(s.offset), s.size).stage(stage)?.to_vec()
        };
        // Sections without file bytes sit at their address-implied offset.
        let original = if zerofill || s.size == 0 {
            let rel = s.addr.saturating_sub(seg.vmaddr);
            Placement::new(seg.fileoff + rel, s.addr, 0, s.size)
        } else {
            Placement::new(u64::from(s.offset), s.addr, s.size, s.size)
        };
        Ok(MachSection {
            name: fixed_name(&s.sectname),
            raw_name: s.sectname,
            raw_segname: s.segname,
            segment,
            address: s.addr,
            size: s.size,
            align: s.align,
            flags: s.flags,
            reserved1: s.reserved1,
            reserved2: s.reserved2,
            reserved3: s.reserved3,
            content,
            raw_offset: s.offset,
            raw_reloff: s.reloff,
            raw_nreloc: s.nreloc,
            parsed_ordinal: 0,
            original: Some(original),
        })
    }

    /// Turn the collected references into blobs. Overlapping ranges share
    /// one raw blob; offset fields point into it with a delta.
    fn load_blobs(&mut self, stream: &ByteStream<'_>, mut refs: Vec<DataRef>) -> Result<(), ParseError> {
        let stage = ParseStage::LoadCommands;
        refs.retain(|r| r.size > 0);
        refs.sort_by_key(|r| (r.offset, std::cmp::Reverse(r.size)));

        // (start, end, members)
        let mut clusters: Vec<(u64, u64, Vec<usize>)> = Vec::new();
        for (i, r) in refs.iter().enumerate() {
            let end = r.offset.checked_add(r.size).ok_or_else(|| {
                ParseError::table(stage, format!("linkedit range at {:#x} overflows", r.offset))
            })?;
            match clusters.last_mut() {
                Some(last) if r.offset < last.1 => {
                    last.1 = last.1.max(end);
                    last.2.push(i);
                }
                _ => clusters.push((r.offset, end, vec![i])),
            }
        }

        let segments: Vec<(SegmentId, MachSegment)> = self.segments.iter().map(|(id, s)| (id, s.clone())).collect();
        for (start, end, members) in clusters {
            let size = end - start;
            let data = stream.read(start, size).stage(stage)?.to_vec();
            let distinct = members
                .iter()
                .all(|&m| refs[m].offset == start && refs[m].size == size);
            let kind = match members.first().map(|&m| refs[m].kind) {
                Some(kind) if distinct && members.iter().all(|&m| refs[m].kind == kind) => kind,
                _ => BlobKind::Raw,
            };
            let segment = segments
                .iter()
                .find(|(_, s)| s.covers_file(start, size))
                .map(|(id, _)| *id);
            let address = segment
                .and_then(|id| self.segments.get(id))
                .and_then(|s| s.original)
                .map_or(0, |o| o.address + (start - o.offset));
            let index = self.blobs.len();
            self.blobs.push(LinkeditBlob {
                kind,
                data,
                original: Some(Placement::new(start, address, size, size)),
                segment,
            });
            match kind {
                BlobKind::Symbols => self.symtab.symbols_blob = Some(index),
                BlobKind::Strings => self.symtab.strings_blob = Some(index),
                BlobKind::IndirectSymbols => self.symtab.indirect_blob = Some(index),
                _ => {}
            }
            for &m in &members {
                let r = &refs[m];
                self.fixups
                    .register(r.slot, BlockKey::Blob(index), Anchor::Offset, (r.offset - start) as i64);
            }
        }
        debug!(blobs = self.blobs.len(), "Loaded linkedit blobs");
        Ok(())
    }

    fn blob_data(&self, index: Option<usize>) -> Option<&[u8]> {
        index.and_then(|i| self.blobs.get(i)).map(|b| b.data.as_slice())
    }

    fn load_symbols(&mut self, config: &ParseConfig) {
        let Some(command) = self.symtab.command.and_then(|id| self.commands.get(id)) else {
            return;
        };
        let e = self.header.endian;
        let nsyms = ByteStream::new(&command.raw).read_u32(12, e).unwrap_or(0);
        let header = self.header;
        let symbols_data = self.blob_data(self.symtab.symbols_blob).map(<[u8]>::to_vec);
        let strings_data = self.blob_data(self.symtab.strings_blob).map(<[u8]>::to_vec);

        let modelled_blobs = [self.symtab.symbols_blob, self.symtab.strings_blob]
            .iter()
            .flatten()
            .all(|&i| self.blobs[i].kind != BlobKind::Raw);
        if nsyms > 0 && (symbols_data.is_none() || !modelled_blobs) {
            self.demote_symbol_blobs();
            self.warn("symbol table shares its range with other data".into());
            return;
        }
        let raws = match symbols::parse_nlists(&symbols_data.unwrap_or_default(), nsyms, &header, config.max_symbols) {
            Ok(raws) => raws,
            Err(e) => {
                self.demote_symbol_blobs();
                self.warn(format!("symbol table: {}", e));
                return;
            }
        };
        self.strings = strings_data.map_or_else(StringTable::new, StringTable::from_bytes);

        let section_ids = self.section_ordinals();
        let mut ids = Vec::with_capacity(raws.len());
        for raw in &raws {
            let section = if raw.n_type & N_STAB == 0 && raw.n_type & N_TYPE == N_SECT {
                section_ids.get(usize::from(raw.n_sect).wrapping_sub(1)).copied()
            } else {
                None
            };
            ids.push(self.symbols.push(MachSymbol {
                name: self.strings.get(raw.n_strx).unwrap_or_default(),
                name_offset: Some(raw.n_strx),
                n_type: raw.n_type,
                section,
                raw_sect: raw.n_sect,
                desc: raw.n_desc,
                value: raw.n_value,
            }));
        }
        self.symtab.modelled = true;
        debug!(count = ids.len(), "Loaded symbols");
        self.load_indirect_symbols(&ids);
    }

    /// Keep the symbol, string and indirect tables as bytes.
    fn demote_symbol_blobs(&mut self) {
        for index in [self.symtab.symbols_blob, self.symtab.strings_blob, self.symtab.indirect_blob]
            .into_iter()
            .flatten()
        {
            self.blobs[index].kind = BlobKind::Raw;
        }
        self.symtab.symbols_blob = None;
        self.symtab.strings_blob = None;
        self.symtab.indirect_blob = None;
    }

    fn load_indirect_symbols(&mut self, ids: &[SymbolId]) {
        let Some(command) = self.symtab.dysymtab.and_then(|id| self.commands.get(id)) else {
            return;
        };
        let count = ByteStream::new(&command.raw).read_u32(60, self.header.endian).unwrap_or(0);
        if count == 0 {
            return;
        }
        let Some(index) = self.symtab.indirect_blob else {
            self.symtab.opaque_indices = true;
            self.warn("indirect symbol table shares its range with other data".into());
            return;
        };
        let entries = match symbols::parse_indirect_symbols(&self.blobs[index].data, count, self.header.endian) {
            Ok(entries) => entries,
            Err(e) => {
                self.warn(format!("indirect symbol table: {}", e));
                self.blobs[index].kind = BlobKind::Raw;
                self.symtab.indirect_blob = None;
                self.symtab.opaque_indices = true;
                return;
            }
        };
        self.indirect = entries
            .into_iter()
            .map(|raw| match ids.get(raw as usize) {
                Some(id) if raw & (INDIRECT_SYMBOL_LOCAL | INDIRECT_SYMBOL_ABS) == 0 => IndirectSymbol::Symbol(*id),
                _ => IndirectSymbol::Raw(raw),
            })
            .collect();
        debug!(count = self.indirect.len(), "Loaded indirect symbols");
    }

    fn load_relocations(&mut self, config: &ParseConfig) {
        let ordinals = self.section_ordinals();
        let symbol_ids = self.symbols.ids();
        let cputype = self.header.cputype;
        let e = self.header.endian;
        let tables: Vec<(usize, SectionId)> = self
            .blobs
            .iter()
            .enumerate()
            .filter_map(|(i, b)| match b.kind {
                BlobKind::Relocations(sid) => Some((i, sid)),
                _ => None,
            })
            .collect();

        for (index, sid) in tables {
            let count = self.sections[sid].raw_nreloc;
            let raws = match relocations::parse_relocations(&self.blobs[index].data, count, e, config.max_relocations) {
                Ok(raws) => raws,
                Err(err) => {
                    let name = self.sections[sid].name.clone();
                    self.warn(format!("relocations of {}: {}", name, err));
                    self.blobs[index].kind = BlobKind::Raw;
                    continue;
                }
            };
            for raw in raws {
                let relocation = match raw {
                    RawRelocation::Scattered(words) => MachRelocation {
                        section: sid,
                        offset: (words[0] & 0x00ff_ffff) as i32,
                        target: RelocationTarget::Raw {
                            symbolnum: words[1],
                            external: false,
                        },
                        pcrel: (words[0] >> 30) & 1 != 0,
                        length: ((words[0] >> 28) & 3) as u8,
                        kind: ((words[0] >> 24) & 0xf) as u8,
                        scattered: Some(words),
                    },
                    RawRelocation::Plain {
                        r_address,
                        r_symbolnum,
                        r_pcrel,
                        r_length,
                        r_extern,
                        r_type,
                    } => {
                        let target = if relocations::carries_immediate(cputype, r_type) {
                            None
                        } else if r_extern {
                            symbol_ids
                                .get(r_symbolnum as usize)
                                .filter(|_| self.symtab.modelled)
                                .map(|id| RelocationTarget::Symbol(*id))
                        } else {
                            ordinals
                                .get((r_symbolnum as usize).wrapping_sub(1))
                                .map(|id| RelocationTarget::Section(*id))
                        };
                        MachRelocation {
                            section: sid,
                            offset: r_address,
                            target: target.unwrap_or(RelocationTarget::Raw {
                                symbolnum: r_symbolnum,
                                external: r_extern,
                            }),
                            pcrel: r_pcrel,
                            length: r_length,
                            kind: r_type,
                            scattered: None,
                        }
                    }
                };
                self.relocations.push(relocation);
            }
            debug!(section = ?sid, count, "Loaded relocations");
        }
    }

    /// Record the entry point from `LC_MAIN` or a thread command.
    fn load_entry(&mut self, raw_commands: &[RawCommand<'_>]) {
        let e = self.header.endian;
        for raw in raw_commands {
            let stream = ByteStream::new(raw.data);
            match raw.cmd {
                LC_MAIN => {
                    let Ok(entryoff) = stream.read_u64(8, e) else { continue };
                    let target = self.sections.iter().find(|(_, s)| {
                        s.original
                            .is_some_and(|o| o.file_size > 0 && entryoff >= o.offset && entryoff < o.file_end())
                    });
                    if let Some((id, s)) = target {
                        let o = s.original.unwrap_or_default();
                        self.fixups
                            .register_value(MachSlot::Entry, BlockKey::Section(id.index()), Anchor::Offset, entryoff, &o);
                    }
                }
                LC_UNIXTHREAD => {
                    let Ok(flavor) = stream.read_u32(8, e) else { continue };
                    let Some((field, width)) = thread_pc_field(self.header.cputype, flavor) else {
                        continue;
                    };
                    let Ok(pc) = stream.read_word(field, width == 8, e) else { continue };
                    if let Some(id) = self.section_at_address(pc) {
                        let o = self.sections[id].original.unwrap_or_default();
                        self.fixups
                            .register_value(MachSlot::Entry, BlockKey::Section(id.index()), Anchor::Address, pc, &o);
                    }
                }
                _ => {}
            }
        }
    }

    pub(crate) fn warn(&mut self, message: String) {
        warn!(warning = %message, "Mach-O optional region skipped");
        self.warnings.push(message);
    }

    /// Sections by their 1-based `n_sect` ordinal: segment command order,
    /// then header order.
    pub(crate) fn section_ordinals(&self) -> Vec<SectionId> {
        let mut ordinals = Vec::with_capacity(self.sections.len());
        for id in &self.command_order {
            let Some(CommandKind::Segment(seg)) = self.commands.get(*id).map(|c| &c.kind) else {
                continue;
            };
            ordinals.extend(self.sections.iter().filter(|(_, s)| s.segment == *seg).map(|(sid, _)| sid));
        }
        ordinals
    }

    pub(crate) fn section_at_address(&self, address: u64) -> Option<SectionId> {
        self.sections
            .iter()
            .find(|(_, s)| s.contains_address(address))
            .map(|(id, _)| id)
    }

    pub(crate) fn command_of_segment(&self, segment: SegmentId) -> Option<CommandId> {
        self.commands
            .iter()
            .find(|(_, c)| c.kind == CommandKind::Segment(segment))
            .map(|(id, _)| id)
    }

    pub fn header(&self) -> &MachHeader {
        &self.header
    }

    pub fn is_64(&self) -> bool {
        self.header.is_64
    }

    pub fn endianness(&self) -> Endianness {
        self.header.endian
    }

    pub fn arch(&self) -> Arch {
        Arch::from_macho_cputype(self.header.cputype)
    }

    pub fn file_type(&self) -> u32 {
        self.header.filetype
    }

    pub fn is_object(&self) -> bool {
        self.header.is_object()
    }

    /// Entry address in the parse-time address space. An entry point set on
    /// a new section reports the offset within it.
    pub fn entry_point(&self) -> u64 {
        let Some(field) = self.fixups.get(&MachSlot::Entry) else {
            return 0;
        };
        let BlockKey::Section(index) = field.target else {
            return 0;
        };
        let Some(section) = self.sections.iter().find(|(id, _)| id.index() == index).map(|(_, s)| s) else {
            return 0;
        };
        let base = section.original.map_or(0, |o| o.address);
        base.wrapping_add(field.delta as u64)
    }

    pub fn commands(&self) -> impl Iterator<Item = (CommandId, &LoadCommand)> + '_ {
        self.command_order
            .iter()
            .filter_map(|id| self.commands.get(*id).map(|c| (*id, c)))
    }

    pub fn segments(&self) -> impl Iterator<Item = (SegmentId, &MachSegment)> + '_ {
        self.segments.iter()
    }

    pub fn segment(&self, id: SegmentId) -> Option<&MachSegment> {
        self.segments.get(id)
    }

    pub fn segment_by_name(&self, name: &str) -> Option<SegmentId> {
        self.segments.iter().find(|(_, s)| s.name == name).map(|(id, _)| id)
    }

    pub fn sections(&self) -> impl Iterator<Item = (SectionId, &MachSection)> + '_ {
        self.sections.iter()
    }

    pub fn section(&self, id: SectionId) -> Option<&MachSection> {
        self.sections.get(id)
    }

    /// Look up `segment,section`, e.g. `("__TEXT", "__text")`.
    pub fn section_by_name(&self, segment: &str, name: &str) -> Option<SectionId> {
        self.sections
            .iter()
            .find(|(_, s)| s.name == name && self.segments.get(s.segment).is_some_and(|seg| seg.name == segment))
            .map(|(id, _)| id)
    }

    pub fn symbols(&self) -> impl Iterator<Item = (SymbolId, &MachSymbol)> + '_ {
        self.symbols.iter()
    }

    pub fn symbol(&self, id: SymbolId) -> Option<&MachSymbol> {
        self.symbols.get(id)
    }

    pub fn symbol_by_name(&self, name: &str) -> Option<SymbolId> {
        self.symbols.iter().find(|(_, s)| s.name == name).map(|(id, _)| id)
    }

    pub fn indirect_symbols(&self) -> &[IndirectSymbol] {
        &self.indirect
    }

    pub fn relocations(&self) -> impl Iterator<Item = (MachRelocationId, &MachRelocation)> + '_ {
        self.relocations.iter()
    }

    pub fn relocation(&self, id: MachRelocationId) -> Option<&MachRelocation> {
        self.relocations.get(id)
    }

    /// Install names of loaded dylibs, in command order.
    pub fn libraries(&self) -> Vec<String> {
        self.commands()
            .filter(|(_, c)| c.is_dylib_load())
            .filter_map(|(_, c)| match &c.kind {
                CommandKind::Dylib { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// `LC_ID_DYLIB` name of a dylib.
    pub fn install_name(&self) -> Option<String> {
        self.commands().find_map(|(_, c)| match &c.kind {
            CommandKind::Dylib { name } if c.cmd == LC_ID_DYLIB => Some(name.clone()),
            _ => None,
        })
    }

    pub fn rpaths(&self) -> Vec<String> {
        self.commands()
            .filter_map(|(_, c)| match &c.kind {
                CommandKind::Rpath { path } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// Defined external symbols.
    pub fn exports(&self) -> Vec<&MachSymbol> {
        self.symbols
            .values()
            .filter(|s| s.is_external() && s.is_defined())
            .collect()
    }

    /// Undefined external symbols.
    pub fn imports(&self) -> Vec<&MachSymbol> {
        self.symbols
            .values()
            .filter(|s| s.is_external() && s.is_undefined())
            .collect()
    }

    pub fn has_code_signature(&self) -> bool {
        self.commands().any(|(_, c)| c.cmd == LC_CODE_SIGNATURE)
    }

    /// Optional regions that failed to decode and were kept as raw bytes.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::macho::testutil::*;

    #[test]
    fn test_parse_minimal_executable() {
        let data = minimal_exec();
        let macho = MachOBinary::parse(&data).unwrap();
        assert!(macho.is_64());
        assert_eq!(macho.arch(), Arch::X86_64);
        assert_eq!(macho.file_type(), MH_EXECUTE);
        assert_eq!(macho.segments().count(), 4);
        assert_eq!(macho.header_segment, macho.segment_by_name("__TEXT"));

        let text = macho.section_by_name("__TEXT", "__text").unwrap();
        let section = macho.section(text).unwrap();
        assert_eq!(section.data(), TEXT_BYTES);
        assert_eq!(section.original_offset(), Some(TEXT_OFFSET));
        assert_eq!(macho.entry_point(), TEXT_ADDR);
        assert_eq!(macho.libraries(), vec!["/usr/lib/libSystem.B.dylib".to_string()]);
        assert!(macho.warnings().is_empty());
    }

    #[test]
    fn test_zerofill_sections_have_no_file_bytes() {
        let macho = MachOBinary::parse(&minimal_exec()).unwrap();
        let bss = macho.section_by_name("__DATA", "__bss").unwrap();
        let section = macho.section(bss).unwrap();
        assert!(section.is_zerofill());
        assert_eq!(section.file_size(), 0);
        assert_eq!(section.original_offset(), None);
        assert_eq!(section.size, 0x100);
    }

    #[test]
    fn test_symbols_and_indirect_table() {
        let macho = MachOBinary::parse(&minimal_exec()).unwrap();
        assert!(macho.symtab.modelled);
        let main = macho.symbol_by_name("_main").unwrap();
        let sym = macho.symbol(main).unwrap();
        assert!(sym.is_external() && sym.is_defined());
        assert_eq!(sym.section, macho.section_by_name("__TEXT", "__text"));
        assert_eq!(sym.value, TEXT_ADDR);

        let printf = macho.symbol_by_name("_printf").unwrap();
        assert_eq!(macho.indirect_symbols(), &[IndirectSymbol::Symbol(printf)]);
        assert_eq!(macho.imports().len(), 1);
        assert_eq!(macho.exports().len(), 1);
    }

    #[test]
    fn test_linkedit_offsets_are_tracked() {
        let macho = MachOBinary::parse(&minimal_exec()).unwrap();
        let symtab = macho.symtab.command.unwrap();
        let field = macho.fixups.get(&MachSlot::CommandOffset(symtab, 8)).unwrap();
        assert_eq!(field.anchor, Anchor::Offset);
        assert_eq!(field.delta, 0);
        let linkedit = macho.segment_by_name("__LINKEDIT");
        assert!(macho.blobs.iter().all(|b| b.segment == linkedit));
        let entry = macho.fixups.get(&MachSlot::Entry).unwrap();
        assert_eq!(entry.anchor, Anchor::Offset);
    }

    #[test]
    fn test_parse_object_relocations() {
        let macho = MachOBinary::parse(&minimal_object()).unwrap();
        assert!(macho.is_object());
        let text = macho.section_by_name("__TEXT", "__text").unwrap();
        let puts = macho.symbol_by_name("_puts").unwrap();
        let relocs: Vec<&MachRelocation> = macho.relocations().map(|(_, r)| r).collect();
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].section, text);
        assert_eq!(relocs[0].offset, 1);
        assert_eq!(relocs[0].target, RelocationTarget::Symbol(puts));
        assert!(relocs[0].pcrel);
        assert!(macho.fixups.get(&MachSlot::SectionRelocations(text)).is_some());
    }

    #[test]
    fn test_truncated_prefixes_never_panic() {
        for data in [minimal_exec(), minimal_object()] {
            for len in 0..data.len() {
                let _ = MachOBinary::parse(&data[..len]);
            }
        }
    }

    #[test]
    fn test_optional_parsing_can_be_disabled() {
        let config = ParseConfig {
            parse_optional: false,
            ..ParseConfig::default()
        };
        let macho = MachOBinary::parse_with(&minimal_exec(), &config).unwrap();
        assert_eq!(macho.symbols().count(), 0);
        assert!(macho.blobs.iter().all(|b| b.kind == BlobKind::Raw));
    }
}
