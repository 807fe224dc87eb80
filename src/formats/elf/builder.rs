//! ELF serializer.
//!
//! Building happens in three steps. Tables the model owns (string tables,
//! symbol tables, relocation sections, the dynamic table) are sized first so
//! the planner knows how large every block is. The planner then places
//! every block. Finally contents are written over a copy of the input,
//! followed by the section header table, the program headers and the ELF
//! header, with pointer fields resolved against the plan.

use crate::config::BuildConfig;
use crate::core::layout::{self, prepare_output, Block, BlockKey, LayoutPlan, LayoutRequest, Placement, SegmentRequest};
use crate::core::strtab::StringTable;
use crate::error::BuildError;
use crate::formats::elf::dynamic::encode_dynamic;
use crate::formats::elf::headers::encode_header;
use crate::formats::elf::relocations::encode_relocation;
use crate::formats::elf::sections::encode_section_header;
use crate::formats::elf::segments::encode_program_header;
use crate::formats::elf::symbols::encode_symbol;
use crate::formats::elf::types::*;
use crate::formats::elf::{
    ElfBinary, ElfSection, ElfSectionKind, ElfSlot, RelocationId, RelocationPlace, RelocationSymbol, SectionId,
    SectionRef, SymbolId, SymbolSection,
};
use crate::stream::{ByteStream, ByteWriter};
use std::collections::HashMap;
use tracing::{debug, info};

/// A symbol table as it will be written.
struct SymbolTableLayout {
    order: Vec<SymbolId>,
    names: Vec<u32>,
    /// `sh_info`: index of the first non-local symbol.
    info: u32,
    null_entry: RawSymbol,
}

/// Everything decided before layout.
#[derive(Default)]
struct Tables {
    /// Section header index of each live section.
    index: HashMap<SectionId, u32>,
    section_names: HashMap<SectionId, u32>,
    /// String tables after interning, keyed by their section.
    strings: HashMap<SectionId, StringTable>,
    symbols: HashMap<SectionId, SymbolTableLayout>,
    symbol_index: HashMap<SymbolId, u32>,
    relocations: HashMap<SectionId, Vec<RelocationId>>,
}

impl Tables {
    fn strings_for(&mut self, elf: &ElfBinary, id: SectionId) -> Option<&mut StringTable> {
        if !self.strings.contains_key(&id) {
            let ElfSectionKind::StringTable(table) = &elf.sections.get(id)?.kind else {
                return None;
            };
            self.strings.insert(id, table.clone());
        }
        self.strings.get_mut(&id)
    }

    /// Offset of `name` in the string table `table`, reusing `existing`
    /// while it still reads back as `name`.
    fn name_offset(
        &mut self,
        elf: &ElfBinary,
        table: Option<SectionId>,
        name: &str,
        existing: Option<u32>,
    ) -> Result<u32, BuildError> {
        let Some(strings) = table.and_then(|t| self.strings_for(elf, t)) else {
            return match existing {
                Some(offset) => Ok(offset),
                None if name.is_empty() => Ok(0),
                None => Err(BuildError::UnsupportedEdit(format!("no string table to hold name {}", name))),
            };
        };
        if let Some(offset) = existing {
            if strings.get(offset).unwrap_or_default() == name {
                return Ok(offset);
            }
        }
        Ok(strings.intern(name))
    }

    fn index_of(&self, id: SectionId) -> Result<u32, BuildError> {
        self.index
            .get(&id)
            .copied()
            .ok_or_else(|| BuildError::UnresolvedReference(format!("section {:?}", id)))
    }

    fn section_ref(&self, r: SectionRef) -> Result<u32, BuildError> {
        match r {
            SectionRef::None => Ok(0),
            SectionRef::Section(id) => self.index_of(id),
            SectionRef::Raw(v) => Ok(v),
        }
    }
}

fn linked(section: &ElfSection) -> Option<SectionId> {
    match section.link {
        SectionRef::Section(id) => Some(id),
        _ => None,
    }
}

impl ElfBinary {
    pub fn build(&self) -> Result<Vec<u8>, BuildError> {
        self.build_with(&BuildConfig::default())
    }

    pub fn build_with(&self, config: &BuildConfig) -> Result<Vec<u8>, BuildError> {
        self.check_new_sections()?;
        let tables = self.materialize()?;
        let req = self.layout_request(&tables)?;
        let plan = layout::plan(&req)?;
        if plan.is_identity() {
            debug!("ELF layout unchanged");
        } else {
            info!(
                moves = plan.moves().len(),
                file_size = plan.file_size(),
                "ELF layout changed"
            );
        }

        let resolved: HashMap<ElfSlot, u64> = self.fixups.resolve(&plan)?.into_iter().collect();
        let mut out = prepare_output(&self.original, &plan, config);
        self.write_contents(&mut out, &tables, &plan, &resolved)?;
        self.patch_implicit_addends(&mut out, &plan)?;
        self.write_section_headers(&mut out, &tables, &plan)?;
        let phnum = self.write_program_headers(&mut out, &plan, &req)?;
        self.write_header(&mut out, &tables, &plan, &resolved, phnum)?;
        Ok(out.into_inner())
    }

    /// Two new sections with the same name in the same place are ambiguous.
    fn check_new_sections(&self) -> Result<(), BuildError> {
        let fresh: Vec<&ElfSection> = self.sections.values().filter(|s| s.original.is_none()).collect();
        for (i, a) in fresh.iter().enumerate() {
            if fresh[i + 1..].iter().any(|b| b.name == a.name && b.segment == a.segment) {
                return Err(BuildError::ConflictingEdit(format!(
                    "section {} was added twice to the same segment",
                    a.name
                )));
            }
        }
        Ok(())
    }

    fn materialize(&self) -> Result<Tables, BuildError> {
        let mut tables = Tables::default();
        for (i, (id, _)) in self.sections.iter().enumerate() {
            tables.index.insert(id, i as u32 + 1);
        }

        for (id, section) in self.sections.iter() {
            let offset = tables.name_offset(self, self.shstrtab, &section.name, section.name_offset)?;
            tables.section_names.insert(id, offset);
        }

        for info in &self.symbol_tables {
            let Some(section) = self.sections.get(info.section) else { continue };
            let strtab = linked(section);
            let mut order: Vec<SymbolId> = self
                .symbols
                .iter()
                .filter(|(_, s)| s.table == info.kind)
                .map(|(id, _)| id)
                .collect();
            let sh_info = if info.edited {
                // Locals must precede globals.
                order.sort_by_key(|id| !self.symbols[*id].is_local());
                order.iter().filter(|id| self.symbols[**id].is_local()).count() as u32 + 1
            } else {
                info.original_info
            };
            let mut names = Vec::with_capacity(order.len());
            for (i, id) in order.iter().enumerate() {
                let sym = &self.symbols[*id];
                names.push(tables.name_offset(self, strtab, &sym.name, sym.name_offset)?);
                tables.symbol_index.insert(*id, i as u32 + 1);
            }
            tables.symbols.insert(
                info.section,
                SymbolTableLayout {
                    order,
                    names,
                    info: sh_info,
                    null_entry: info.null_entry,
                },
            );
        }

        for (rid, rel) in self.relocations.iter() {
            tables.relocations.entry(rel.owner).or_default().push(rid);
        }
        Ok(tables)
    }

    /// File and memory size of a section as it will be written.
    fn content_size(&self, id: SectionId, section: &ElfSection, tables: &Tables) -> (u64, u64) {
        let class = self.header.class;
        let file = match &section.kind {
            ElfSectionKind::Data(bytes) | ElfSectionKind::Opaque(bytes) => bytes.len() as u64,
            ElfSectionKind::NoBits(size) => return (0, *size),
            ElfSectionKind::StringTable(table) => tables.strings.get(&id).unwrap_or(table).len() as u64,
            ElfSectionKind::SymbolTable(_) => {
                let count = tables.symbols.get(&id).map_or(0, |t| t.order.len());
                (count as u64 + 1) * class.sym_size()
            }
            ElfSectionKind::Relocations { rela } => {
                let count = tables.relocations.get(&id).map_or(0, |r| r.len());
                count as u64 * class.rel_size(*rela)
            }
            ElfSectionKind::Dynamic => self.dynamic.as_ref().map_or(0, |d| d.byte_size(class)),
        };
        (file, file)
    }

    fn section_block(&self, id: SectionId, section: &ElfSection, tables: &Tables) -> Block {
        let (file, mem) = self.content_size(id, section, tables);
        Block::new(BlockKey::Section(id.index()), file, mem, section.alignment).with_original(section.original)
    }

    fn program_header_count(&self) -> usize {
        self.segments.len()
    }

    fn layout_request(&self, tables: &Tables) -> Result<LayoutRequest, BuildError> {
        let class = self.header.class;
        let mut req = LayoutRequest::new(true, class.is_64());
        req.preserve_size = self.original.len() as u64;
        req.removed = self.removed.clone();

        let ehsize = class.header_size();
        let header_block = |address: u64| {
            Block::new(BlockKey::FileHeader, ehsize, ehsize, 1)
                .with_original(Some(Placement::new(0, address, ehsize, ehsize)))
                .pinned()
        };
        let phdr_size = self.program_header_count() as u64 * class.phdr_size();
        let phdr_block = Block::new(BlockKey::ProgramHeaders, phdr_size, phdr_size, class.word_size())
            .with_original(self.phdr_original);

        for (seg_id, seg) in self.segments.iter().filter(|(_, s)| s.is_load()) {
            let mut request = SegmentRequest::new(seg_id.index(), seg.original, seg.align);
            request.fixed_address = seg.fixed_address;

            let mut members: Vec<Block> = Vec::new();
            if self.header_segment == Some(seg_id) {
                members.push(header_block(seg.original.map_or(0, |o| o.address)));
            }
            if self.phdr_segment == Some(seg_id) {
                members.push(phdr_block.clone());
            }
            let mut fresh = Vec::new();
            for (id, section) in self.sections.iter().filter(|(_, s)| s.segment == Some(seg_id)) {
                let block = self.section_block(id, section, tables);
                if block.original.is_some() {
                    members.push(block);
                } else {
                    fresh.push(block);
                }
            }
            members.sort_by_key(|b| b.original.map(|o| o.offset));
            if let Some(payload) = &seg.payload {
                members.push(Block::new(
                    BlockKey::Blob(seg_id.index()),
                    payload.len() as u64,
                    seg.mem_size.max(payload.len() as u64),
                    1,
                ));
            }
            members.extend(fresh);
            request.members = members;
            req.segments.push(request);
        }

        if self.header_segment.is_none() {
            req.loose.push(header_block(0));
        }
        if self.phdr_segment.is_none() && (self.phdr_original.is_some() || !self.segments.is_empty()) {
            req.loose.push(phdr_block);
        }
        for (id, section) in self.sections.iter().filter(|(_, s)| s.segment.is_none()) {
            req.loose.push(self.section_block(id, section, tables));
        }
        if self.shdr_original.is_some() || !self.sections.is_empty() {
            let size = (self.sections.len() as u64 + 1) * class.shdr_size();
            req.loose.push(
                Block::new(BlockKey::SectionHeaders, size, size, class.word_size()).with_original(self.shdr_original),
            );
        }
        Ok(req)
    }

    fn placed(&self, plan: &LayoutPlan, key: BlockKey) -> Result<Placement, BuildError> {
        plan.block(key)
            .ok_or_else(|| BuildError::UnresolvedReference(format!("{:?} has no placement", key)))
    }

    /// Final value of a symbol. Values of symbols in existing sections follow
    /// their section's address; symbols of new sections hold an offset.
    fn symbol_value(&self, sym_section: SymbolSection, value: u64, kind: u8, plan: &LayoutPlan) -> u64 {
        let SymbolSection::Section(sid) = sym_section else {
            return value;
        };
        if self.header.is_relocatable() || kind == STT_TLS {
            return value;
        }
        let key = BlockKey::Section(sid.index());
        match self.sections.get(sid).and_then(|s| s.original) {
            Some(_) => value.wrapping_add(plan.address_delta(key) as u64),
            None => plan.block(key).map_or(value, |p| p.address.wrapping_add(value)),
        }
    }

    fn encode_symbols(&self, layout: &SymbolTableLayout, tables: &Tables, plan: &LayoutPlan) -> Result<Vec<u8>, BuildError> {
        let class = self.header.class;
        let endian = self.header.endian;
        let entsize = class.sym_size();
        let mut out = ByteWriter::new();
        encode_symbol(&mut out, 0, &layout.null_entry, class, endian);
        for (i, (id, name)) in layout.order.iter().zip(&layout.names).enumerate() {
            let sym = &self.symbols[*id];
            let st_shndx = match sym.section {
                SymbolSection::Undefined => SHN_UNDEF,
                SymbolSection::Absolute => SHN_ABS,
                SymbolSection::Common => SHN_COMMON,
                SymbolSection::Other(raw) => raw,
                SymbolSection::Section(sid) => {
                    let index = tables.index_of(sid)?;
                    if index >= u32::from(SHN_LORESERVE) {
                        return Err(BuildError::UnsupportedEdit(format!(
                            "symbol {} needs an extended section index",
                            sym.name
                        )));
                    }
                    index as u16
                }
            };
            let raw = RawSymbol {
                st_name: *name,
                st_value: self.symbol_value(sym.section, sym.value, sym.kind, plan),
                st_size: sym.size,
                st_info: sym.info(),
                st_other: sym.other,
                st_shndx,
            };
            encode_symbol(&mut out, (i as u64 + 1) * entsize, &raw, class, endian);
        }
        Ok(out.into_inner())
    }

    fn encode_relocations(
        &self,
        ids: &[RelocationId],
        rela: bool,
        tables: &Tables,
        plan: &LayoutPlan,
        resolved: &HashMap<ElfSlot, u64>,
    ) -> Result<Vec<u8>, BuildError> {
        let class = self.header.class;
        let entsize = class.rel_size(rela);
        let mut out = ByteWriter::new();
        for (i, rid) in ids.iter().enumerate() {
            let rel = &self.relocations[*rid];
            let r_offset = match rel.place {
                RelocationPlace::Address(address) => address,
                RelocationPlace::Section { offset, .. } if self.header.is_relocatable() => offset,
                RelocationPlace::Section { section, offset } => {
                    self.placed(plan, BlockKey::Section(section.index()))?.address.wrapping_add(offset)
                }
            };
            let symbol = match rel.symbol {
                RelocationSymbol::None => 0,
                RelocationSymbol::Raw(index) => index,
                RelocationSymbol::Symbol(sid) => tables
                    .symbol_index
                    .get(&sid)
                    .copied()
                    .ok_or_else(|| BuildError::UnresolvedReference(format!("symbol {:?}", sid)))?,
            };
            let r_addend = match resolved.get(&ElfSlot::Addend(*rid)) {
                Some(value) => Some(*value as i64),
                None => rel.addend,
            };
            let raw = RawRelocation {
                r_offset,
                r_info: RawRelocation::info(class, symbol, rel.kind),
                r_addend: if rela { Some(r_addend.unwrap_or(0)) } else { None },
            };
            encode_relocation(&mut out, i as u64 * entsize, &raw, class, self.header.endian);
        }
        Ok(out.into_inner())
    }

    fn write_contents(
        &self,
        out: &mut ByteWriter,
        tables: &Tables,
        plan: &LayoutPlan,
        resolved: &HashMap<ElfSlot, u64>,
    ) -> Result<(), BuildError> {
        let class = self.header.class;
        for (id, section) in self.sections.iter() {
            let at = self.placed(plan, BlockKey::Section(id.index()))?.offset;
            match &section.kind {
                ElfSectionKind::Data(bytes) | ElfSectionKind::Opaque(bytes) => out.write_bytes(at, bytes),
                ElfSectionKind::NoBits(_) => {}
                ElfSectionKind::StringTable(table) => {
                    out.write_bytes(at, tables.strings.get(&id).unwrap_or(table).as_bytes())
                }
                ElfSectionKind::SymbolTable(_) => {
                    if let Some(layout) = tables.symbols.get(&id) {
                        out.write_bytes(at, &self.encode_symbols(layout, tables, plan)?);
                    }
                }
                ElfSectionKind::Relocations { rela } => {
                    let ids = tables.relocations.get(&id).map(Vec::as_slice).unwrap_or_default();
                    out.write_bytes(at, &self.encode_relocations(ids, *rela, tables, plan, resolved)?);
                }
                ElfSectionKind::Dynamic => {
                    if let Some(table) = &self.dynamic {
                        let mut entries = table.entries.clone();
                        for entry in entries.iter_mut() {
                            if let Some(value) = resolved.get(&ElfSlot::Dynamic(entry.serial)) {
                                entry.value = *value;
                            }
                        }
                        out.write_bytes(at, &encode_dynamic(&entries, class, self.header.endian));
                    }
                }
            }
        }
        for (seg_id, seg) in self.segments.iter() {
            if let Some(payload) = &seg.payload {
                let at = self.placed(plan, BlockKey::Blob(seg_id.index()))?.offset;
                out.write_bytes(at, payload);
            }
        }
        Ok(())
    }

    /// `SHT_REL` relative relocations keep their addend in the relocated
    /// word; move it along with the section it points into.
    fn patch_implicit_addends(&self, out: &mut ByteWriter, plan: &LayoutPlan) -> Result<(), BuildError> {
        if self.header.is_relocatable() {
            return Ok(());
        }
        let class = self.header.class;
        let endian = self.header.endian;
        let width = class.word_size();
        for (_, rel) in self.relocations.iter() {
            if rel.addend.is_some() || !is_relative_reloc(self.header.e_machine, rel.kind) {
                continue;
            }
            let RelocationPlace::Section { section, offset } = rel.place else { continue };
            let Some(data) = self.sections.get(section).and_then(|s| s.data()) else { continue };
            let Ok(word) = ByteStream::new(data).read_word(offset, class.is_64(), endian) else {
                continue;
            };
            let Some(target) = self.section_for_pointer(word) else { continue };
            let delta = plan.address_delta(BlockKey::Section(target.index()));
            if delta == 0 {
                continue;
            }
            let at = self.placed(plan, BlockKey::Section(section.index()))?.offset + offset;
            if at + width <= out.len() {
                out.write_word(at, word.wrapping_add(delta as u64), class.is_64(), endian);
            }
        }
        Ok(())
    }

    fn write_section_headers(&self, out: &mut ByteWriter, tables: &Tables, plan: &LayoutPlan) -> Result<(), BuildError> {
        let Some(table) = plan.block(BlockKey::SectionHeaders) else {
            return Ok(());
        };
        let class = self.header.class;
        let endian = self.header.endian;
        let entsize = class.shdr_size();

        let mut null = self.null_section.unwrap_or_default();
        let count = self.sections.len() as u64 + 1;
        let was_extended = self.header.e_shnum == 0 && self.null_section.is_some_and(|n| n.sh_size != 0);
        if count >= u64::from(SHN_LORESERVE) {
            null.sh_size = count;
        } else if was_extended {
            null.sh_size = 0;
        }
        let shstrndx = self.shstrtab.map(|id| tables.index_of(id)).transpose()?.unwrap_or(0);
        if shstrndx >= u32::from(SHN_LORESERVE) {
            null.sh_link = shstrndx;
        } else if self.header.e_shstrndx == SHN_XINDEX {
            null.sh_link = 0;
        }
        encode_section_header(out, table.offset, &null, class, endian);

        for (i, (id, section)) in self.sections.iter().enumerate() {
            let placed = self.placed(plan, BlockKey::Section(id.index()))?;
            let sh_info = match tables.symbols.get(&id) {
                Some(layout) => layout.info,
                None => tables.section_ref(section.info)?,
            };
            let sh = SectionHeader {
                sh_name: tables.section_names.get(&id).copied().unwrap_or(0),
                sh_type: section.sh_type,
                sh_flags: section.flags,
                sh_addr: placed.address,
                sh_offset: placed.offset,
                sh_size: if section.is_nobits() { placed.mem_size } else { placed.file_size },
                sh_link: tables.section_ref(section.link)?,
                sh_info,
                sh_addralign: section.alignment,
                sh_entsize: section.entsize,
            };
            encode_section_header(out, table.offset + (i as u64 + 1) * entsize, &sh, class, endian);
        }
        Ok(())
    }

    /// Where a non-`PT_LOAD` segment ends up: its first and last covered
    /// blocks keep the same distance to its edges.
    fn follow_segment(&self, o: Placement, plan: &LayoutPlan, req: &LayoutRequest) -> Placement {
        let mut placed = o;
        let mut file_blocks: Vec<(BlockKey, Placement)> = Vec::new();
        let mut mem_blocks: Vec<(BlockKey, Placement)> = Vec::new();
        for seg in &req.segments {
            for b in &seg.members {
                if let Some(orig) = b.original {
                    file_blocks.push((b.key, orig));
                    mem_blocks.push((b.key, orig));
                }
            }
        }
        for b in &req.loose {
            if let Some(orig) = b.original {
                file_blocks.push((b.key, orig));
            }
        }

        let covering_load = |offset: u64| {
            req.segments
                .iter()
                .filter_map(|s| s.original.map(|so| (s.key, so)))
                .find(|(_, so)| so.offset <= offset && offset < so.file_end())
                .and_then(|(key, so)| plan.segment(key).map(|p| (so, p)))
        };

        if o.file_size > 0 {
            let covered: Vec<&(BlockKey, Placement)> = file_blocks
                .iter()
                .filter(|(_, b)| b.file_size > 0 && o.offset <= b.offset && b.file_end() <= o.file_end())
                .collect();
            let first = covered.iter().min_by_key(|(_, b)| b.offset);
            let last = covered.iter().max_by_key(|(_, b)| b.file_end());
            match (first, last) {
                (Some((fk, fo)), Some((lk, lo))) => {
                    if let (Some(f), Some(l)) = (plan.block(*fk), plan.block(*lk)) {
                        let start = f.offset.wrapping_sub(fo.offset - o.offset);
                        let end = l.file_end().wrapping_add(o.file_end() - lo.file_end());
                        placed.offset = start;
                        placed.file_size = end.saturating_sub(start);
                    }
                }
                _ => {
                    if let Some((so, p)) = covering_load(o.offset) {
                        placed.offset = o.offset.wrapping_add(p.offset.wrapping_sub(so.offset));
                    }
                }
            }
        }

        if o.mem_size > 0 {
            let covered: Vec<&(BlockKey, Placement)> = mem_blocks
                .iter()
                .filter(|(_, b)| b.mem_size > 0 && o.address <= b.address && b.mem_end() <= o.mem_end())
                .collect();
            let first = covered.iter().min_by_key(|(_, b)| b.address);
            let last = covered.iter().max_by_key(|(_, b)| b.mem_end());
            match (first, last) {
                (Some((fk, fo)), Some((lk, lo))) => {
                    if let (Some(f), Some(l)) = (plan.block(*fk), plan.block(*lk)) {
                        let start = f.address.wrapping_sub(fo.address - o.address);
                        let end = l.mem_end().wrapping_add(o.mem_end() - lo.mem_end());
                        placed.address = start;
                        placed.mem_size = end.saturating_sub(start);
                    }
                }
                _ => {
                    if let Some((so, p)) = covering_load(o.offset) {
                        placed.address = o.address.wrapping_add(p.address.wrapping_sub(so.address));
                    }
                }
            }
        }
        placed
    }

    /// Write the program header table and return its entry count.
    fn write_program_headers(&self, out: &mut ByteWriter, plan: &LayoutPlan, req: &LayoutRequest) -> Result<u16, BuildError> {
        let count = self.program_header_count();
        let phnum = u16::try_from(count).ok().filter(|n| *n != u16::MAX).ok_or(BuildError::LayoutOverflow {
            what: "program header count".into(),
            value: count as u64,
            limit: u64::from(u16::MAX) - 1,
        })?;
        let Some(table) = plan.block(BlockKey::ProgramHeaders) else {
            return Ok(0);
        };
        let class = self.header.class;

        let mut headers = Vec::with_capacity(count);
        for (seg_id, seg) in self.segments.iter() {
            let mut ph = seg.to_header();
            let placed = if seg.is_load() {
                plan.segment(seg_id.index())
            } else {
                seg.original.map(|o| self.follow_segment(o, plan, req))
            };
            if let Some(p) = placed {
                let original_address = seg.original.map_or(p.address, |o| o.address);
                ph.p_offset = p.offset;
                ph.p_vaddr = p.address;
                ph.p_paddr = seg.physical_address.wrapping_add(p.address.wrapping_sub(original_address));
                if seg.is_new() {
                    ph.p_paddr = p.address;
                }
                ph.p_filesz = p.file_size;
                ph.p_memsz = p.mem_size;
            }
            headers.push(ph);
        }

        // The loader wants PT_LOAD entries in ascending address order.
        let slots: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.p_type == PT_LOAD)
            .map(|(i, _)| i)
            .collect();
        let mut loads: Vec<ProgramHeader> = slots.iter().map(|&i| headers[i]).collect();
        loads.sort_by_key(|h| h.p_vaddr);
        for (slot, ph) in slots.into_iter().zip(loads) {
            headers[slot] = ph;
        }

        for (i, ph) in headers.iter().enumerate() {
            encode_program_header(out, table.offset + i as u64 * class.phdr_size(), ph, class, self.header.endian);
        }
        Ok(phnum)
    }

    fn write_header(
        &self,
        out: &mut ByteWriter,
        tables: &Tables,
        plan: &LayoutPlan,
        resolved: &HashMap<ElfSlot, u64>,
        phnum: u16,
    ) -> Result<(), BuildError> {
        let class = self.header.class;
        let mut header = self.header;
        header.e_entry = resolved.get(&ElfSlot::Entry).copied().unwrap_or(self.header.e_entry);

        match plan.block(BlockKey::ProgramHeaders) {
            Some(p) if phnum > 0 => {
                header.e_phoff = p.offset;
                header.e_phnum = phnum;
                if header.e_phentsize == 0 {
                    header.e_phentsize = class.phdr_size() as u16;
                }
            }
            _ => {
                header.e_phoff = 0;
                header.e_phnum = 0;
            }
        }

        match plan.block(BlockKey::SectionHeaders) {
            Some(p) => {
                let count = self.sections.len() as u64 + 1;
                header.e_shoff = p.offset;
                header.e_shnum = if count >= u64::from(SHN_LORESERVE) { 0 } else { count as u16 };
                if header.e_shentsize == 0 {
                    header.e_shentsize = class.shdr_size() as u16;
                }
                let shstrndx = self.shstrtab.map(|id| tables.index_of(id)).transpose()?.unwrap_or(0);
                header.e_shstrndx = if shstrndx >= u32::from(SHN_LORESERVE) {
                    SHN_XINDEX
                } else {
                    shstrndx as u16
                };
            }
            None => {
                header.e_shoff = 0;
                header.e_shnum = 0;
                header.e_shstrndx = 0;
            }
        }
        encode_header(&header, out);
        Ok(())
    }
}
