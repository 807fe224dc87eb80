//! Mach-O serializer.
//!
//! Symbols are ordered and named, section ordinals assigned and every load
//! command sized before layout. Linked images keep their header and load
//! commands pinned at the start of the first mapped segment; object files
//! place them in a file-only pseudo segment in front of their single
//! segment. Contents go over a copy of the input, then the load commands and
//! the header are written with offsets taken from the plan.

use crate::config::BuildConfig;
use crate::core::layout::{self, align_up, prepare_output, Block, BlockKey, LayoutPlan, LayoutRequest, Placement, SegmentRequest};
use crate::core::strtab::StringTable;
use crate::error::BuildError;
use crate::formats::macho::commands::{thread_pc_field, CommandId};
use crate::formats::macho::headers::encode_header;
use crate::formats::macho::relocations::encode_relocations;
use crate::formats::macho::segments::encode_segment_command;
use crate::formats::macho::symbols::encode_nlist;
use crate::formats::macho::types::*;
use crate::formats::macho::{
    BlobKind, CommandKind, IndirectSymbol, LinkeditBlob, LoadCommand, MachOBinary, MachRelocationId, MachSection,
    MachSlot, RelocationTarget, SectionId, SegmentId, SymbolId,
};
use crate::stream::{ByteStream, ByteWriter};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info};

/// Segment key of the pseudo segment holding an object file's header.
const OBJECT_HEADER_SEGMENT: usize = usize::MAX;

/// Everything decided before layout.
#[derive(Default)]
struct Tables {
    symbol_order: Vec<SymbolId>,
    symbol_names: Vec<u32>,
    symbol_index: HashMap<SymbolId, u32>,
    /// `LC_DYSYMTAB` group sizes: locals, defined externals, undefined.
    groups: [u32; 3],
    strings: Vec<u8>,
    ordinals: HashMap<SectionId, u32>,
    relocations: HashMap<SectionId, Vec<MachRelocationId>>,
    /// Load commands in table order with their output size.
    commands: Vec<(CommandId, u64)>,
    sizeofcmds: u64,
}

impl Tables {
    fn ordinal(&self, id: SectionId) -> Result<u32, BuildError> {
        self.ordinals
            .get(&id)
            .copied()
            .ok_or_else(|| BuildError::UnresolvedReference(format!("section {:?}", id)))
    }

    fn index_of(&self, id: SymbolId) -> Result<u32, BuildError> {
        self.symbol_index
            .get(&id)
            .copied()
            .ok_or_else(|| BuildError::UnresolvedReference(format!("symbol {:?}", id)))
    }
}

fn field_u32(what: &str, value: u64) -> Result<u32, BuildError> {
    u32::try_from(value).map_err(|_| BuildError::LayoutOverflow {
        what: what.to_string(),
        value,
        limit: u64::from(u32::MAX),
    })
}

impl MachOBinary {
    pub fn build(&self) -> Result<Vec<u8>, BuildError> {
        self.build_with(&BuildConfig::default())
    }

    pub fn build_with(&self, config: &BuildConfig) -> Result<Vec<u8>, BuildError> {
        self.check_edits()?;
        let tables = self.materialize()?;
        self.check_command_room(&tables)?;
        let req = self.layout_request(&tables);
        let plan = layout::plan(&req)?;
        if plan.is_identity() {
            debug!("Mach-O layout unchanged");
        } else {
            info!(
                moves = plan.moves().len(),
                file_size = plan.file_size(),
                "Mach-O layout changed"
            );
        }

        let resolved: HashMap<MachSlot, u64> = self.fixups.resolve(&plan)?.into_iter().collect();
        let mut out = prepare_output(&self.original, &plan, config);
        self.write_contents(&mut out, &tables, &plan)?;
        self.write_commands(&mut out, &tables, &plan, &resolved)?;
        let mut header = self.header;
        header.ncmds = field_u32("ncmds", tables.commands.len() as u64)?;
        header.sizeofcmds = field_u32("sizeofcmds", tables.sizeofcmds)?;
        encode_header(&mut out, &header);
        Ok(out.into_inner())
    }

    fn command_field(&self, id: Option<CommandId>, field: u64) -> u32 {
        id.and_then(|id| self.commands.get(id))
            .and_then(|c| ByteStream::new(&c.raw).read_u32(field, self.header.endian).ok())
            .unwrap_or(0)
    }

    /// Blob holding the relocation entries of `id`, if it is regenerated.
    fn relocation_blob(&self, id: SectionId) -> Option<usize> {
        match self.fixups.get(&MachSlot::SectionRelocations(id))?.target {
            BlockKey::Blob(index) if self.blobs.get(index)?.kind == BlobKind::Relocations(id) => Some(index),
            _ => None,
        }
    }

    fn check_edits(&self) -> Result<(), BuildError> {
        let fresh: Vec<&MachSection> = self.sections.values().filter(|s| s.is_new()).collect();
        for (i, a) in fresh.iter().enumerate() {
            if fresh[i + 1..].iter().any(|b| b.name == a.name && b.segment == a.segment) {
                return Err(BuildError::ConflictingEdit(format!(
                    "section {} was added twice to the same segment",
                    a.name
                )));
            }
        }

        // Tables kept as bytes refer to sections by their parse-time ordinal.
        let raw_symbols = !self.symtab.modelled && self.command_field(self.symtab.command, 12) > 0;
        let raw_relocations = self
            .sections
            .ids()
            .into_iter()
            .any(|id| self.fixups.get(&MachSlot::SectionRelocations(id)).is_some() && self.relocation_blob(id).is_none());
        if raw_symbols || raw_relocations {
            let renumbered = self
                .section_ordinals()
                .iter()
                .enumerate()
                .any(|(i, id)| self.sections[*id].parsed_ordinal != i + 1);
            if renumbered {
                return Err(BuildError::UnsupportedEdit(
                    "section numbering changed but tables referring to it are kept as bytes".into(),
                ));
            }
        }

        if self.symtab.modelled && self.sections.len() > MAX_SECT && self.symbols.values().any(|s| s.section.is_some())
        {
            return Err(BuildError::UnsupportedEdit(format!(
                "{} sections cannot be numbered in nlist entries",
                self.sections.len()
            )));
        }
        Ok(())
    }

    fn materialize(&self) -> Result<Tables, BuildError> {
        let mut tables = Tables::default();
        for (i, id) in self.section_ordinals().into_iter().enumerate() {
            tables.ordinals.insert(id, i as u32 + 1);
        }

        if self.symtab.modelled {
            let mut order = self.symbols.ids();
            if self.symtab.edited {
                // Externals are looked up by name within their group.
                order.sort_by(|a, b| {
                    let (a, b) = (&self.symbols[*a], &self.symbols[*b]);
                    a.group().cmp(&b.group()).then_with(|| {
                        if a.group() == 0 {
                            Ordering::Equal
                        } else {
                            a.name.cmp(&b.name)
                        }
                    })
                });
            }
            let mut strings = self.strings.clone();
            for (i, id) in order.iter().enumerate() {
                let sym = &self.symbols[*id];
                let offset = match sym.name_offset {
                    Some(offset) if strings.get(offset).as_deref() == Some(sym.name.as_str()) => offset,
                    _ => strings.intern(&sym.name),
                };
                tables.symbol_names.push(offset);
                tables.symbol_index.insert(*id, i as u32);
                tables.groups[usize::from(sym.group())] += 1;
            }
            tables.strings = string_bytes(&strings, self.header.word_size());
            tables.symbol_order = order;
        }

        for (rid, rel) in self.relocations.iter() {
            tables.relocations.entry(rel.section).or_default().push(rid);
        }

        for id in &self.command_order {
            let Some(command) = self.commands.get(*id) else { continue };
            let size = match command.kind {
                CommandKind::Segment(seg) => self.segment_command_size(seg, command),
                _ => command.size(),
            };
            tables.commands.push((*id, size));
            tables.sizeofcmds += size;
        }
        Ok(tables)
    }

    fn sections_of(&self, segment: SegmentId) -> impl Iterator<Item = (SectionId, &MachSection)> + '_ {
        self.sections.iter().filter(move |(_, s)| s.segment == segment)
    }

    /// Size of a regenerated segment command. Padding after the section
    /// headers survives while the section count is unchanged.
    fn segment_command_size(&self, segment: SegmentId, command: &LoadCommand) -> u64 {
        let count = self.sections_of(segment).count() as u64;
        let standard = self.header.segment_command_size() + count * self.header.section_size();
        let nsects_field = 24 + 4 * self.header.word_size() + 8;
        let parsed = ByteStream::new(&command.raw)
            .read_u32(nsects_field, self.header.endian)
            .map(u64::from);
        match parsed {
            Ok(n) if n == count && command.size() > standard => command.size(),
            _ => standard,
        }
    }

    /// Linked images cannot move their sections to make room for load
    /// commands; the commands have to fit in front of the first one.
    fn check_command_room(&self, tables: &Tables) -> Result<(), BuildError> {
        if self.is_object() {
            return Ok(());
        }
        let end = self.header.size() + tables.sizeofcmds;
        let limit = self
            .sections
            .values()
            .filter_map(|s| s.original)
            .chain(self.blobs.iter().filter_map(|b| b.original))
            .filter(|o| o.file_size > 0)
            .map(|o| o.offset)
            .min()
            .unwrap_or(u64::MAX);
        if end > limit {
            return Err(BuildError::LayoutOverflow {
                what: "load commands".into(),
                value: end,
                limit,
            });
        }
        Ok(())
    }

    fn blob_size(&self, blob: &LinkeditBlob, tables: &Tables) -> u64 {
        match blob.kind {
            BlobKind::Symbols if self.symtab.modelled => tables.symbol_order.len() as u64 * self.header.nlist_size(),
            BlobKind::Strings if self.symtab.modelled => tables.strings.len() as u64,
            BlobKind::IndirectSymbols if self.symtab.modelled => self.indirect.len() as u64 * 4,
            BlobKind::Relocations(sid) => {
                tables.relocations.get(&sid).map_or(0, |r| r.len() as u64) * RELOCATION_INFO_SIZE
            }
            _ => blob.data.len() as u64,
        }
    }

    fn blob_block(&self, index: usize, blob: &LinkeditBlob, tables: &Tables) -> Block {
        let size = self.blob_size(blob, tables);
        let align = match blob.kind {
            BlobKind::Symbols => self.header.word_size(),
            BlobKind::IndirectSymbols | BlobKind::Relocations(_) => 4,
            _ => 1,
        };
        let mem = match blob.kind {
            BlobKind::Payload(seg) => self.segments.get(seg).map_or(size, |s| s.vmsize.max(size)),
            _ => size,
        };
        Block::new(BlockKey::Blob(index), size, mem, align).with_original(blob.original)
    }

    fn section_block(&self, id: SectionId, section: &MachSection) -> Block {
        let file = section.file_size();
        let mem = if section.is_zerofill() { section.size } else { file };
        Block::new(BlockKey::Section(id.index()), file, mem, section.alignment()).with_original(section.original)
    }

    fn header_blocks(&self, address: u64, tables: &Tables) -> [Block; 2] {
        let hsize = self.header.size();
        let old = u64::from(self.header.sizeofcmds);
        let mem = |size: u64| if self.is_object() { 0 } else { size };
        [
            Block::new(BlockKey::FileHeader, hsize, mem(hsize), 1)
                .with_original(Some(Placement::new(0, address, hsize, mem(hsize))))
                .pinned(),
            Block::new(BlockKey::LoadCommands, tables.sizeofcmds, mem(tables.sizeofcmds), 1)
                .with_original(Some(Placement::new(hsize, address + hsize, old, mem(old))))
                .pinned(),
        ]
    }

    fn layout_request(&self, tables: &Tables) -> LayoutRequest {
        let object = self.is_object();
        let page = page_size(self.header.cputype);
        let mut req = LayoutRequest::new(!object, self.header.is_64);
        req.preserve_size = self.original.len() as u64;
        req.removed = self.removed.clone();
        let max_section_align = self.sections.values().map(|s| s.alignment()).max().unwrap_or(1);
        req.file_align = if object {
            max_section_align.max(self.header.word_size()).min(page)
        } else {
            page
        };
        let linkedit = self
            .segments
            .iter()
            .find(|(_, s)| s.is_linkedit() && !s.is_new())
            .map(|(id, _)| id.index());

        if object {
            let hsize = self.header.size();
            let old = u64::from(self.header.sizeofcmds);
            let mut request = SegmentRequest::new(
                OBJECT_HEADER_SEGMENT,
                Some(Placement::new(0, 0, hsize + old, 0)),
                1,
            );
            request.exact_size = true;
            request.members = self.header_blocks(0, tables).to_vec();
            req.segments.push(request);
        }

        for id in &self.command_order {
            let Some(CommandKind::Segment(seg_id)) = self.commands.get(*id).map(|c| &c.kind) else {
                continue;
            };
            let seg_id = *seg_id;
            let Some(seg) = self.segments.get(seg_id) else { continue };
            let align = if object { max_section_align } else { page };
            let mut request = SegmentRequest::new(seg_id.index(), seg.original, align);
            request.round_to_align = !object && !seg.is_linkedit();
            request.fixed_address = seg.fixed_address;
            if seg.is_new() && seg.fixed_address.is_none() {
                request.before = linkedit;
            }

            let mut members: Vec<Block> = Vec::new();
            if !object && self.header_segment == Some(seg_id) {
                let address = seg.original.map_or(0, |o| o.address);
                members.extend(self.header_blocks(address, tables));
            }
            let mut existing: Vec<Block> = Vec::new();
            let mut fresh: Vec<Block> = Vec::new();
            for (sid, section) in self.sections_of(seg_id) {
                let block = self.section_block(sid, section);
                if block.original.is_some() {
                    existing.push(block);
                } else {
                    fresh.push(block);
                }
            }
            let mut payload = Vec::new();
            if !object {
                for (i, blob) in self.blobs.iter().enumerate().filter(|(_, b)| b.segment == Some(seg_id)) {
                    let block = self.blob_block(i, blob, tables);
                    match (blob.kind, block.original.is_some()) {
                        (BlobKind::Payload(_), _) => payload.push(block),
                        (_, true) => existing.push(block),
                        (_, false) => fresh.push(block),
                    }
                }
            }
            existing.sort_by_key(|b| b.original.map(|o| (o.offset, o.address)));
            members.extend(existing);
            members.extend(payload);
            members.extend(fresh);
            request.members = members;
            req.segments.push(request);
        }

        if !object && self.header_segment.is_none() {
            req.loose.extend(self.header_blocks(0, tables));
        }
        for (i, blob) in self.blobs.iter().enumerate() {
            if object || blob.segment.is_none() {
                req.loose.push(self.blob_block(i, blob, tables));
            }
        }
        req
    }

    fn placed(&self, plan: &LayoutPlan, key: BlockKey) -> Result<Placement, BuildError> {
        plan.block(key)
            .ok_or_else(|| BuildError::UnresolvedReference(format!("{:?} has no placement", key)))
    }

    /// Symbols of parsed sections follow their section; symbols of new
    /// sections hold an offset into it.
    fn symbol_value(&self, section: Option<SectionId>, value: u64, plan: &LayoutPlan) -> u64 {
        let Some(sid) = section else { return value };
        let key = BlockKey::Section(sid.index());
        match self.sections.get(sid) {
            Some(s) if s.is_new() => plan.block(key).map_or(value, |p| p.address.wrapping_add(value)),
            Some(_) => value.wrapping_add(plan.address_delta(key) as u64),
            None => value,
        }
    }

    fn encode_symbols(&self, tables: &Tables, plan: &LayoutPlan) -> Result<Vec<u8>, BuildError> {
        let size = self.header.nlist_size();
        let mut out = ByteWriter::new();
        out.resize(tables.symbol_order.len() as u64 * size);
        for (i, (id, name)) in tables.symbol_order.iter().zip(&tables.symbol_names).enumerate() {
            let sym = &self.symbols[*id];
            let n_sect = match sym.section {
                Some(sid) => u8::try_from(tables.ordinal(sid)?).map_err(|_| {
                    BuildError::UnsupportedEdit(format!("symbol {} is in a section past 255", sym.name))
                })?,
                None => sym.raw_sect,
            };
            let raw = RawNlist {
                n_strx: *name,
                n_type: sym.n_type,
                n_sect,
                n_desc: sym.desc,
                n_value: self.symbol_value(sym.section, sym.value, plan),
            };
            encode_nlist(&mut out, i as u64 * size, &raw, &self.header);
        }
        Ok(out.into_inner())
    }

    fn encode_indirect(&self, tables: &Tables) -> Result<Vec<u8>, BuildError> {
        let e = self.header.endian;
        let mut out = ByteWriter::new();
        for (i, entry) in self.indirect.iter().enumerate() {
            let value = match entry {
                IndirectSymbol::Symbol(id) => tables.index_of(*id)?,
                IndirectSymbol::Raw(raw) => *raw,
            };
            out.write_u32(i as u64 * 4, value, e);
        }
        Ok(out.into_inner())
    }

    fn encode_section_relocations(&self, section: SectionId, tables: &Tables) -> Result<Vec<u8>, BuildError> {
        let ids = tables.relocations.get(&section).map(Vec::as_slice).unwrap_or_default();
        let mut entries = Vec::with_capacity(ids.len());
        for rid in ids {
            let rel = &self.relocations[*rid];
            if let Some(words) = rel.scattered {
                entries.push(RawRelocation::Scattered(words));
                continue;
            }
            let (r_symbolnum, r_extern) = match rel.target {
                RelocationTarget::Symbol(sid) => (tables.index_of(sid)?, true),
                RelocationTarget::Section(sid) => (tables.ordinal(sid)?, false),
                RelocationTarget::Raw { symbolnum, external } => (symbolnum, external),
            };
            entries.push(RawRelocation::Plain {
                r_address: rel.offset,
                r_symbolnum,
                r_pcrel: rel.pcrel,
                r_length: rel.length,
                r_extern,
                r_type: rel.kind,
            });
        }
        Ok(encode_relocations(&entries, self.header.endian))
    }

    fn write_contents(&self, out: &mut ByteWriter, tables: &Tables, plan: &LayoutPlan) -> Result<(), BuildError> {
        for (id, section) in self.sections.iter() {
            if section.file_size() > 0 {
                let at = self.placed(plan, BlockKey::Section(id.index()))?.offset;
                out.write_bytes(at, &section.content);
            }
        }
        for (i, blob) in self.blobs.iter().enumerate() {
            let at = self.placed(plan, BlockKey::Blob(i))?.offset;
            let modelled = self.symtab.modelled;
            match blob.kind {
                BlobKind::Symbols if modelled => out.write_bytes(at, &self.encode_symbols(tables, plan)?),
                BlobKind::Strings if modelled => out.write_bytes(at, &tables.strings),
                BlobKind::IndirectSymbols if modelled => out.write_bytes(at, &self.encode_indirect(tables)?),
                BlobKind::Relocations(sid) => out.write_bytes(at, &self.encode_section_relocations(sid, tables)?),
                _ => out.write_bytes(at, &blob.data),
            }
        }
        Ok(())
    }

    fn write_commands(
        &self,
        out: &mut ByteWriter,
        tables: &Tables,
        plan: &LayoutPlan,
        resolved: &HashMap<MachSlot, u64>,
    ) -> Result<(), BuildError> {
        let start = self.header.size();
        let mut at = start;
        for (id, size) in &tables.commands {
            let command = &self.commands[*id];
            match command.kind {
                CommandKind::Segment(seg) => self.write_segment_command(out, at, *size, seg, command, tables, plan, resolved)?,
                _ => out.write_bytes(at, &self.patch_command(*id, command, tables, resolved)?),
            }
            at += size;
        }
        let old_end = start + u64::from(self.header.sizeofcmds);
        if at < old_end {
            out.fill(at..old_end, 0);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_segment_command(
        &self,
        out: &mut ByteWriter,
        at: u64,
        size: u64,
        seg_id: SegmentId,
        command: &LoadCommand,
        tables: &Tables,
        plan: &LayoutPlan,
        resolved: &HashMap<MachSlot, u64>,
    ) -> Result<(), BuildError> {
        let seg = &self.segments[seg_id];
        let placed = plan
            .segment(seg_id.index())
            .ok_or_else(|| BuildError::UnresolvedReference(format!("segment {} has no placement", seg.name)))?;
        let mut vmsize = placed.mem_size;
        if seg.is_linkedit() && seg.original.is_some_and(|o| placed.mem_size > o.mem_size) {
            vmsize = align_up(vmsize, page_size(self.header.cputype));
        }
        let fileoff = match seg.original {
            Some(_) if placed.file_size == 0 => seg.fileoff,
            None if placed.file_size == 0 => 0,
            _ => placed.offset,
        };

        let mut sections = Vec::new();
        for (sid, s) in self.sections_of(seg_id) {
            let key = BlockKey::Section(sid.index());
            let p = self.placed(plan, key)?;
            let offset = if s.is_zerofill() {
                s.raw_offset
            } else if s.file_size() > 0 || s.is_new() {
                field_u32("section offset", p.offset)?
            } else if s.raw_offset == 0 {
                0
            } else {
                field_u32(
                    "section offset",
                    u64::from(s.raw_offset).wrapping_add(plan.offset_delta(key) as u64),
                )?
            };
            let (reloff, nreloc) = match self.relocation_blob(sid) {
                Some(_) => {
                    let count = tables.relocations.get(&sid).map_or(0, |r| r.len()) as u32;
                    let reloff = match resolved.get(&MachSlot::SectionRelocations(sid)) {
                        Some(value) if count > 0 => field_u32("reloff", *value)?,
                        _ => 0,
                    };
                    (reloff, count)
                }
                None => match resolved.get(&MachSlot::SectionRelocations(sid)) {
                    Some(value) => (field_u32("reloff", *value)?, s.raw_nreloc),
                    None => (s.raw_reloff, s.raw_nreloc),
                },
            };
            sections.push(RawSection {
                sectname: s.name_bytes(),
                segname: s.raw_segname,
                addr: p.address,
                size: if s.is_zerofill() { s.size } else { s.file_size() },
                offset,
                align: s.align,
                reloff,
                nreloc,
                flags: s.flags,
                reserved1: s.reserved1,
                reserved2: s.reserved2,
                reserved3: s.reserved3,
            });
        }

        let raw = RawSegment {
            segname: seg.name_bytes(),
            vmaddr: placed.address,
            vmsize,
            fileoff,
            filesize: placed.file_size,
            maxprot: seg.maxprot,
            initprot: seg.initprot,
            nsects: sections.len() as u32,
            flags: seg.flags,
        };
        if size > self.header.segment_command_size() + sections.len() as u64 * self.header.section_size() {
            out.write_bytes(at, &command.raw);
        }
        encode_segment_command(out, at, &self.header, &raw, &sections);
        out.write_u32(at + 4, field_u32("cmdsize", size)?, self.header.endian);
        Ok(())
    }

    /// Command bytes with offset fields, counts and the entry point brought
    /// up to date.
    fn patch_command(
        &self,
        id: CommandId,
        command: &LoadCommand,
        tables: &Tables,
        resolved: &HashMap<MachSlot, u64>,
    ) -> Result<Vec<u8>, BuildError> {
        let e = self.header.endian;
        let mut out = ByteWriter::from_vec(command.raw.clone());
        for field in self.fixups.iter() {
            let MachSlot::CommandOffset(owner, offset) = field.slot else { continue };
            if owner != id {
                continue;
            }
            if let Some(value) = resolved.get(&field.slot) {
                out.write_u32(u64::from(offset), field_u32("load command offset", *value)?, e);
            }
        }

        match command.kind {
            CommandKind::Symtab if self.symtab.modelled => {
                out.write_u32(12, tables.symbol_order.len() as u32, e);
                if self.symtab.strings_blob.is_some() {
                    out.write_u32(20, field_u32("strsize", tables.strings.len() as u64)?, e);
                }
            }
            CommandKind::Dysymtab if self.symtab.modelled => {
                if self.symtab.edited {
                    let [locals, defined, undefined] = tables.groups;
                    for (field, value) in [
                        (8, 0),
                        (12, locals),
                        (16, locals),
                        (20, defined),
                        (24, locals + defined),
                        (28, undefined),
                    ] {
                        out.write_u32(field, value, e);
                    }
                }
                if self.symtab.indirect_blob.is_some() {
                    out.write_u32(60, self.indirect.len() as u32, e);
                }
            }
            CommandKind::Main => {
                if let Some(value) = resolved.get(&MachSlot::Entry) {
                    out.write_u64(8, *value, e);
                }
            }
            CommandKind::Thread => {
                let flavor = ByteStream::new(&command.raw).read_u32(8, e).unwrap_or(0);
                if let (Some((field, width)), Some(value)) =
                    (thread_pc_field(self.header.cputype, flavor), resolved.get(&MachSlot::Entry))
                {
                    if field + width <= command.size() {
                        out.write_word(field, *value, width == 8, e);
                    }
                }
            }
            _ => {}
        }
        Ok(out.into_inner())
    }
}

/// String table bytes; grown tables are padded to the pointer size.
fn string_bytes(strings: &StringTable, word: u64) -> Vec<u8> {
    let mut bytes = strings.as_bytes().to_vec();
    if strings.is_modified() {
        bytes.resize(align_up(bytes.len() as u64, word) as usize, 0);
    }
    bytes
}
