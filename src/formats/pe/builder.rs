//! PE serializer.
//!
//! Each section is its own layout segment aligned to `SectionAlignment`, so a
//! grown section pushes the file offsets of later sections by whole file
//! alignment units and their RVAs by whole section alignment units. The
//! headers form a pinned segment at offset zero and the overlay trails
//! everything. After layout, section contents are written at their new
//! offsets, the tracked pointer fields are patched, the base relocation
//! table is regenerated when needed and the headers are rewritten last.

use crate::config::BuildConfig;
use crate::core::layout::{self, align_up, prepare_output, Block, BlockKey, LayoutPlan, LayoutRequest, Placement, SegmentRequest};
use crate::error::BuildError;
use crate::formats::pe::directories::reloc::{encode_base_relocations, pointer_width, RawBaseRelocation};
use crate::formats::pe::headers::{encode_coff_header, encode_optional_header};
use crate::formats::pe::sections::encode_section_header;
use crate::formats::pe::types::*;
use crate::formats::pe::utils::calculate_pe_checksum;
use crate::formats::pe::{BaseRelocationPlace, PeBinary, PeSection, PeSlot, SectionId, SiteKind};
use crate::core::binary::Endianness;
use crate::stream::ByteWriter;
use std::collections::HashMap;
use tracing::{debug, info};

const LE: Endianness = Endianness::Little;
const HEADER_SEGMENT: usize = usize::MAX;

/// Where the regenerated base relocation table goes.
#[derive(Debug, Clone, Copy)]
struct RelocTable {
    host: SectionId,
    /// Offset of the table inside the host section.
    offset: u64,
    /// Bytes set aside for the table.
    reserve: u64,
}

/// Output sizes of one section.
#[derive(Debug, Clone, Copy)]
struct SectionSize {
    raw: u64,
    mapped: u64,
    virtual_size: u32,
}

fn fit32(what: &str, value: u64) -> Result<u32, BuildError> {
    u32::try_from(value).map_err(|_| BuildError::LayoutOverflow {
        what: what.to_string(),
        value,
        limit: u64::from(u32::MAX),
    })
}

impl PeBinary {
    pub fn build(&self) -> Result<Vec<u8>, BuildError> {
        self.build_with(&BuildConfig::default())
    }

    pub fn build_with(&self, config: &BuildConfig) -> Result<Vec<u8>, BuildError> {
        self.check_new_sections()?;
        let reloc_table = self.reloc_table()?;
        let sizes = self.section_sizes(reloc_table);
        let req = self.layout_request(&sizes);
        let plan = layout::plan(&req)?;
        if plan.is_identity() {
            debug!("PE layout unchanged");
        } else {
            info!(
                moves = plan.moves().len(),
                file_size = plan.file_size(),
                "PE layout changed"
            );
        }

        let resolved: HashMap<PeSlot, u64> = self.fixups.resolve(&plan)?.into_iter().collect();
        let mut out = prepare_output(&self.original, &plan, config);
        self.write_sections(&mut out, &plan)?;
        self.write_sites(&mut out, &plan, &resolved)?;
        self.write_relocated_pointers(&mut out, &plan, &resolved)?;
        let reloc_size = match reloc_table {
            Some(table) if self.relocs_need_rewrite(&plan) => Some(self.write_base_relocations(&mut out, &plan, table)?),
            _ => None,
        };
        if let Some(overlay) = &self.overlay {
            let at = self.placed(&plan, BlockKey::Blob(0))?.offset;
            out.write_bytes(at, &overlay.data);
        }
        self.write_headers(&mut out, &plan, &resolved, &sizes, reloc_size)?;

        let mut bytes = out.into_inner();
        if config.recompute_pe_checksum && self.opt.checksum != 0 && bytes[..] != self.original[..] {
            let at = self.optional_header_offset() + CHECKSUM_OFFSET;
            let sum = calculate_pe_checksum(&bytes, at as usize);
            bytes[at as usize..at as usize + 4].copy_from_slice(&sum.to_le_bytes());
            debug!(checksum = sum, "Recomputed PE checksum");
        }
        Ok(bytes)
    }

    fn optional_header_offset(&self) -> u64 {
        self.table_offset - u64::from(self.coff.size_of_optional_header)
    }

    /// Two new sections with the same name are ambiguous.
    fn check_new_sections(&self) -> Result<(), BuildError> {
        let fresh: Vec<&PeSection> = self.sections.values().filter(|s| s.is_new()).collect();
        for (i, a) in fresh.iter().enumerate() {
            if fresh[i + 1..].iter().any(|b| b.name == a.name) {
                return Err(BuildError::ConflictingEdit(format!("section {} was added twice", a.name)));
            }
        }
        Ok(())
    }

    fn placed(&self, plan: &LayoutPlan, key: BlockKey) -> Result<Placement, BuildError> {
        plan.block(key)
            .ok_or_else(|| BuildError::UnresolvedReference(format!("{:?} has no placement", key)))
    }

    /// RVAs relocations would get if no existing section moved, with new
    /// sections packed after the image. Page membership survives section
    /// shifts, so this sizes the regenerated table.
    fn estimated_relocations(&self) -> Vec<RawBaseRelocation> {
        let align = u64::from(self.opt.section_alignment);
        let mut next = self
            .sections
            .values()
            .filter_map(|s| s.original)
            .map(|o| o.mem_end())
            .fold(u64::from(self.opt.size_of_headers), u64::max);
        let mut fake: HashMap<SectionId, u64> = HashMap::new();
        for (id, s) in self.sections.iter() {
            match s.original {
                Some(o) => {
                    fake.insert(id, o.address);
                }
                None => {
                    let address = align_up(next, align);
                    next = address + u64::from(s.mapped_size());
                    fake.insert(id, address);
                }
            }
        }
        self.base_relocations
            .values()
            .map(|r| RawBaseRelocation {
                rva: match r.place {
                    BaseRelocationPlace::Section { section, offset } => {
                        fake.get(&section).copied().unwrap_or(0) + u64::from(offset)
                    }
                    BaseRelocationPlace::Rva(rva) => u64::from(rva),
                },
                kind: r.kind,
                param: r.param,
            })
            .collect()
    }

    fn reloc_table(&self) -> Result<Option<RelocTable>, BuildError> {
        if !self.base_relocs_loaded {
            return Ok(None);
        }
        let Some(field) = self.fixups.get(&PeSlot::Directory(IMAGE_DIRECTORY_ENTRY_BASERELOC)) else {
            return Ok(None);
        };
        let BlockKey::Section(index) = field.target else {
            return Ok(None);
        };
        let host = SectionId::new(index);
        if self.sections.get(host).is_none() {
            return Err(BuildError::UnresolvedReference(format!(
                "base relocation directory points into removed section {:?}",
                host
            )));
        }
        let original = self
            .opt
            .directory(IMAGE_DIRECTORY_ENTRY_BASERELOC)
            .map_or(0, |d| u64::from(d.size));
        let estimate = encode_base_relocations(&self.estimated_relocations()).len() as u64;
        Ok(Some(RelocTable {
            host,
            offset: field.delta as u64,
            reserve: original.max(estimate),
        }))
    }

    fn section_sizes(&self, reloc_table: Option<RelocTable>) -> HashMap<SectionId, SectionSize> {
        let file_align = u64::from(self.opt.file_alignment);
        let mut sizes = HashMap::new();
        for (id, s) in self.sections.iter() {
            let mut size = SectionSize {
                raw: u64::from(s.raw_size()),
                mapped: u64::from(s.mapped_size()),
                virtual_size: s.virtual_size,
            };
            if let Some(table) = reloc_table.filter(|t| t.host == id) {
                let end = table.offset + table.reserve;
                if end > size.raw {
                    size.raw = align_up(end, file_align);
                }
                if end > size.mapped {
                    size.mapped = end;
                    size.virtual_size = end as u32;
                }
            }
            sizes.insert(id, size);
        }
        sizes
    }

    fn header_size(&self) -> u64 {
        let table_end = self.table_offset + self.sections.len() as u64 * SECTION_HEADER_SIZE;
        u64::from(self.opt.size_of_headers).max(align_up(table_end, u64::from(self.opt.file_alignment)))
    }

    fn layout_request(&self, sizes: &HashMap<SectionId, SectionSize>) -> LayoutRequest {
        let section_align = u64::from(self.opt.section_alignment);
        let mut req = LayoutRequest::new(false, false);
        req.file_align = u64::from(self.opt.file_alignment);
        req.removed = self.removed.clone();

        let soh = u64::from(self.opt.size_of_headers);
        let original = Some(Placement::new(0, 0, soh, soh));
        let header_size = self.header_size();
        let mut headers = SegmentRequest::new(HEADER_SEGMENT, original, section_align);
        headers.exact_size = true;
        headers.members.push(
            Block::new(BlockKey::FileHeader, header_size, header_size, 1)
                .with_original(original)
                .pinned(),
        );
        req.segments.push(headers);

        for (id, s) in self.sections.iter() {
            let Some(size) = sizes.get(&id) else { continue };
            let mut seg = SegmentRequest::new(id.index(), s.original, section_align);
            seg.exact_size = true;
            seg.members.push(
                Block::new(BlockKey::Section(id.index()), size.raw, size.mapped, 1).with_original(s.original),
            );
            req.segments.push(seg);
        }

        if let Some(overlay) = &self.overlay {
            let len = overlay.data.len() as u64;
            req.trailing
                .push(Block::new(BlockKey::Blob(0), len, 0, 8).with_original(Some(overlay.original)));
        }
        req
    }

    fn write_sections(&self, out: &mut ByteWriter, plan: &LayoutPlan) -> Result<(), BuildError> {
        for (id, s) in self.sections.iter() {
            if s.data().is_empty() {
                continue;
            }
            let at = self.placed(plan, BlockKey::Section(id.index()))?.offset;
            out.write_bytes(at, s.data());
        }
        Ok(())
    }

    fn write_sites(&self, out: &mut ByteWriter, plan: &LayoutPlan, resolved: &HashMap<PeSlot, u64>) -> Result<(), BuildError> {
        for (sid, site) in self.sites.iter() {
            let Some(value) = resolved.get(&PeSlot::Site(sid)).copied() else { continue };
            let at = self.placed(plan, BlockKey::Section(site.section.index()))?.offset + u64::from(site.offset);
            if site.width == 8 {
                out.write_u64(at, value, LE);
            } else {
                let what = match site.kind {
                    SiteKind::Rva => "RVA field",
                    SiteKind::FileOffset => "file offset field",
                };
                out.write_u32(at, fit32(what, value)?, LE);
            }
        }
        Ok(())
    }

    fn write_relocated_pointers(
        &self,
        out: &mut ByteWriter,
        plan: &LayoutPlan,
        resolved: &HashMap<PeSlot, u64>,
    ) -> Result<(), BuildError> {
        for (rid, reloc) in self.base_relocations.iter() {
            let Some(rva) = resolved.get(&PeSlot::Pointer(rid)).copied() else { continue };
            let BaseRelocationPlace::Section { section, offset } = reloc.place else { continue };
            let Some(width) = pointer_width(reloc.kind) else { continue };
            let at = self.placed(plan, BlockKey::Section(section.index()))?.offset + u64::from(offset);
            let value = self.opt.image_base.wrapping_add(rva);
            if width == 8 {
                out.write_u64(at, value, LE);
            } else {
                out.write_u32(at, fit32("relocated pointer", value)?, LE);
            }
        }
        Ok(())
    }

    fn relocs_need_rewrite(&self, plan: &LayoutPlan) -> bool {
        self.base_relocs_edited
            || self.base_relocations.values().any(|r| match r.section() {
                Some(section) => {
                    self.sections.get(section).map_or(true, PeSection::is_new)
                        || plan.address_delta(BlockKey::Section(section.index())) != 0
                }
                None => false,
            })
    }

    /// Write the regenerated table and return its size.
    fn write_base_relocations(&self, out: &mut ByteWriter, plan: &LayoutPlan, table: RelocTable) -> Result<u64, BuildError> {
        let mut raws = Vec::with_capacity(self.base_relocations.len());
        for reloc in self.base_relocations.values() {
            let rva = match reloc.place {
                BaseRelocationPlace::Section { section, offset } => {
                    self.placed(plan, BlockKey::Section(section.index()))?.address + u64::from(offset)
                }
                BaseRelocationPlace::Rva(rva) => u64::from(rva),
            };
            fit32("base relocation RVA", rva)?;
            raws.push(RawBaseRelocation {
                rva,
                kind: reloc.kind,
                param: reloc.param,
            });
        }
        let bytes = encode_base_relocations(&raws);
        let size = bytes.len() as u64;
        if size > table.reserve {
            return Err(BuildError::UnsupportedEdit(format!(
                "base relocation table needs {:#x} bytes but only {:#x} are reserved",
                size, table.reserve
            )));
        }
        let at = self.placed(plan, BlockKey::Section(table.host.index()))?.offset + table.offset;
        out.write_bytes(at, &bytes);
        out.fill(at + size..at + table.reserve, 0);
        debug!(relocations = raws.len(), size, "Regenerated base relocation table");
        Ok(size)
    }

    fn write_headers(
        &self,
        out: &mut ByteWriter,
        plan: &LayoutPlan,
        resolved: &HashMap<PeSlot, u64>,
        sizes: &HashMap<SectionId, SectionSize>,
        reloc_size: Option<u64>,
    ) -> Result<(), BuildError> {
        let mut coff = self.coff;
        let mut opt = self.opt.clone();
        let rva = |slot: PeSlot, current: u32| -> Result<u32, BuildError> {
            match resolved.get(&slot) {
                Some(value) => fit32(&format!("{:?}", slot), *value),
                None => Ok(current),
            }
        };

        opt.address_of_entry_point = rva(PeSlot::Entry, opt.address_of_entry_point)?;
        opt.base_of_code = rva(PeSlot::BaseOfCode, opt.base_of_code)?;
        if let Some(base) = opt.base_of_data {
            opt.base_of_data = Some(rva(PeSlot::BaseOfData, base)?);
        }
        for (i, dir) in opt.data_directories.iter_mut().enumerate() {
            dir.virtual_address = rva(PeSlot::Directory(i), dir.virtual_address)?;
        }
        if let (Some(size), Some(dir)) = (reloc_size, opt.data_directories.get_mut(IMAGE_DIRECTORY_ENTRY_BASERELOC)) {
            dir.size = size as u32;
        }
        coff.pointer_to_symbol_table = rva(PeSlot::SymbolTable, coff.pointer_to_symbol_table)?;
        coff.number_of_sections = u16::try_from(self.sections.len()).map_err(|_| BuildError::LayoutOverflow {
            what: "section count".into(),
            value: self.sections.len() as u64,
            limit: u64::from(u16::MAX),
        })?;

        let header = self.placed(plan, BlockKey::FileHeader)?;
        let file_align = u64::from(opt.file_alignment);
        let mut headers = Vec::with_capacity(self.sections.len());
        let (mut code, mut init, mut uninit) = (0u64, 0u64, 0u64);
        let mut image_end = header.mem_end();
        for (id, s) in self.sections.iter() {
            let placed = self.placed(plan, BlockKey::Section(id.index()))?;
            let size = sizes
                .get(&id)
                .copied()
                .ok_or_else(|| BuildError::UnresolvedReference(format!("size of section {}", s.name)))?;
            if s.characteristics & IMAGE_SCN_CNT_CODE != 0 {
                code += size.raw;
            }
            if s.characteristics & IMAGE_SCN_CNT_INITIALIZED_DATA != 0 {
                init += size.raw;
            }
            if s.characteristics & IMAGE_SCN_CNT_UNINITIALIZED_DATA != 0 {
                uninit += align_up(size.mapped, file_align);
            }
            image_end = image_end.max(placed.address + size.mapped);
            headers.push(SectionHeader {
                name: s.name_bytes(),
                virtual_size: size.virtual_size,
                virtual_address: fit32("section RVA", placed.address)?,
                size_of_raw_data: fit32("section raw size", size.raw)?,
                pointer_to_raw_data: if size.raw == 0 {
                    s.original.map_or(0, |o| o.offset as u32)
                } else {
                    fit32("section file offset", placed.offset)?
                },
                pointer_to_relocations: s.pointer_to_relocations,
                pointer_to_line_numbers: s.pointer_to_line_numbers,
                number_of_relocations: s.number_of_relocations,
                number_of_line_numbers: s.number_of_line_numbers,
                characteristics: s.characteristics,
            });
        }

        if !plan.is_identity() {
            opt.size_of_image = fit32("SizeOfImage", align_up(image_end, u64::from(opt.section_alignment)))?;
            opt.size_of_headers = fit32("SizeOfHeaders", header.file_size)?;
            opt.size_of_code = fit32("SizeOfCode", code)?;
            opt.size_of_initialized_data = fit32("SizeOfInitializedData", init)?;
            opt.size_of_uninitialized_data = fit32("SizeOfUninitializedData", uninit)?;
        }

        let opt_offset = self.optional_header_offset();
        encode_coff_header(out, opt_offset - COFF_HEADER_SIZE, &coff);
        encode_optional_header(out, opt_offset, &opt);
        for (i, sh) in headers.iter().enumerate() {
            encode_section_header(out, self.table_offset + i as u64 * SECTION_HEADER_SIZE, sh);
        }
        // Entries of removed sections, and any header growth, read as zeros.
        let table_end = self.table_offset + headers.len() as u64 * SECTION_HEADER_SIZE;
        let old_end = self.table_offset + u64::from(self.coff.number_of_sections) * SECTION_HEADER_SIZE;
        let soh = u64::from(self.opt.size_of_headers);
        if old_end > table_end {
            out.fill(table_end..old_end, 0);
        }
        if header.file_size > soh {
            out.fill(table_end.max(soh)..header.file_size, 0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::pe::testutil::*;
    use crate::formats::pe::{NewBaseRelocation, NewPeSection};
    use crate::stream::ByteStream;

    fn u32_at(data: &[u8], offset: u64) -> u32 {
        ByteStream::new(data).read_u32(offset, LE).unwrap()
    }

    fn u64_at(data: &[u8], offset: u64) -> u64 {
        ByteStream::new(data).read_u64(offset, LE).unwrap()
    }

    #[test]
    fn test_unedited_builds_are_identical() {
        for data in [minimal_pe64(), minimal_pe32()] {
            let pe = PeBinary::parse(&data).unwrap();
            assert_eq!(pe.build().unwrap(), data);
        }
    }

    #[test]
    fn test_rewriting_relocations_in_place_is_identical() {
        let data = minimal_pe32();
        let mut pe = PeBinary::parse(&data).unwrap();
        pe.base_relocs_edited = true;
        assert_eq!(pe.build().unwrap(), data);
    }

    #[test]
    fn test_file_growth_moves_later_sections_in_the_file_only() {
        let mut pe = PeBinary::parse(&minimal_pe64()).unwrap();
        let text = pe.section_by_name(".text").unwrap();
        pe.resize_section(text, 0x300).unwrap();
        let out = pe.build().unwrap();

        let again = PeBinary::parse(&out).unwrap();
        let rdata = again.section(again.section_by_name(".rdata").unwrap()).unwrap();
        assert_eq!(rdata.original_offset(), Some(0x800));
        assert_eq!(rdata.virtual_address, 0x2000);
        assert_eq!(again.imports().libraries, vec!["KERNEL32.dll".to_string()]);
        assert_eq!(again.overlay().unwrap(), pe.overlay().unwrap());
        let security = again.optional_header().directory(IMAGE_DIRECTORY_ENTRY_SECURITY).unwrap();
        assert_eq!(security.virtual_address, 0xc00);
        assert!(again.checksum_valid());
        assert!(again.warnings().is_empty(), "{:?}", again.warnings());
    }

    #[test]
    fn test_growth_past_a_page_shifts_rvas() {
        let mut pe = PeBinary::parse(&minimal_pe64()).unwrap();
        let text = pe.section_by_name(".text").unwrap();
        pe.resize_section(text, 0x1100).unwrap();
        let out = pe.build().unwrap();

        let again = PeBinary::parse(&out).unwrap();
        let rdata_id = again.section_by_name(".rdata").unwrap();
        let rdata = again.section(rdata_id).unwrap();
        assert_eq!(rdata.virtual_address, 0x3000);
        assert_eq!(again.optional_header().size_of_image, 0x5000);
        assert_eq!(again.entry_point(), 0x1000);

        let import = &again.imports().imports[0];
        assert_eq!(import.name.as_deref(), Some("ExitProcess"));
        assert_eq!(import.iat_rva, 0x3058);
        let iat = again.optional_header().directory(IMAGE_DIRECTORY_ENTRY_IAT).unwrap();
        assert_eq!(iat.virtual_address, 0x3058);
        let run = again.exports().get_by_name("run").unwrap();
        assert_eq!(run.rva, 0x1010);
        assert_eq!(again.exports().dll_name.as_deref(), Some("demo.dll"));

        // RUNTIME_FUNCTION.UnwindInfo followed .rdata.
        let pdata = rdata.original_offset().unwrap() + 0x180;
        assert_eq!(u32_at(&out, pdata + 8), 0x3190);
        let (_, reloc) = again.base_relocations().next().unwrap();
        assert_eq!(reloc.place, BaseRelocationPlace::Section { section: rdata_id, offset: 0x1f0 });
        let pointer = rdata.original_offset().unwrap() + 0x1f0;
        assert_eq!(u64_at(&out, pointer), 0x1_4000_1010);
    }

    #[test]
    fn test_add_section_goes_after_the_image() {
        let mut pe = PeBinary::parse(&minimal_pe64()).unwrap();
        let hook = pe.add_section(NewPeSection::code(".hook", vec![0xcc, 0xc3])).unwrap();
        pe.set_entrypoint_at(hook, 1).unwrap();
        let out = pe.build().unwrap();

        let again = PeBinary::parse(&out).unwrap();
        assert_eq!(again.coff_header().number_of_sections, 4);
        let s = again.section(again.section_by_name(".hook").unwrap()).unwrap();
        assert_eq!(s.virtual_address, 0x4000);
        assert_eq!(s.original_offset(), Some(0xa00));
        assert_eq!(&s.data()[..2], &[0xcc, 0xc3]);
        assert_eq!(again.entry_point(), 0x4001);
        assert_eq!(again.optional_header().size_of_image, 0x5000);
        assert_eq!(again.optional_header().size_of_code, 0x400);
        assert_eq!(again.overlay().map(<[u8]>::len), Some(0x40));
        assert!(again.checksum_valid());
    }

    #[test]
    fn test_removed_section_is_zeroed() {
        let data = minimal_pe32();
        let mut pe = PeBinary::parse(&data).unwrap();
        pe.remove_section(pe.section_by_name(".pad").unwrap()).unwrap();
        let out = pe.build().unwrap();
        // .pad was last in the file, so the output ends where it began.
        assert_eq!(out.len(), 0xc00);
        // The fifth section header is gone.
        assert!(out[0x178 + 4 * 40..0x178 + 5 * 40].iter().all(|&b| b == 0));

        let again = PeBinary::parse(&out).unwrap();
        assert_eq!(again.sections().count(), 4);
        assert!(again.section_by_name(".pad").is_none());
        assert_eq!(again.base_relocations().count(), 2);
    }

    #[test]
    fn test_added_relocation_grows_the_table() {
        let mut pe = PeBinary::parse(&minimal_pe64()).unwrap();
        let text = pe.section_by_name(".text").unwrap();
        pe.add_base_relocation(NewBaseRelocation::pointer(text, 0x18, true)).unwrap();
        let out = pe.build().unwrap();

        let again = PeBinary::parse(&out).unwrap();
        let dir = again.optional_header().directory(IMAGE_DIRECTORY_ENTRY_BASERELOC).unwrap();
        assert_eq!(dir.size, 24);
        let reloc = again.section(again.section_by_name(".reloc").unwrap()).unwrap();
        assert_eq!(reloc.virtual_size, 24);
        let places: Vec<BaseRelocationPlace> = again.base_relocations().map(|(_, r)| r.place).collect();
        assert_eq!(places.len(), 2);
        assert!(places.contains(&BaseRelocationPlace::Section {
            section: again.section_by_name(".text").unwrap(),
            offset: 0x18
        }));
    }

    #[test]
    fn test_relocations_in_new_sections_are_placed() {
        let mut pe = PeBinary::parse(&minimal_pe32()).unwrap();
        let blob = pe.add_section(NewPeSection::data(".blob", vec![0; 8])).unwrap();
        pe.add_base_relocation(NewBaseRelocation::pointer(blob, 4, false)).unwrap();
        let out = pe.build().unwrap();

        let again = PeBinary::parse(&out).unwrap();
        let blob = again.section_by_name(".blob").unwrap();
        assert_eq!(again.section(blob).unwrap().virtual_address, 0x6000);
        assert!(again
            .base_relocations()
            .any(|(_, r)| r.place == BaseRelocationPlace::Section { section: blob, offset: 4 }));
    }

    #[test]
    fn test_duplicate_new_sections_conflict() {
        let mut pe = PeBinary::parse(&minimal_pe64()).unwrap();
        pe.add_section(NewPeSection::data(".x", vec![1])).unwrap();
        pe.add_section(NewPeSection::data(".x", vec![2])).unwrap();
        assert!(matches!(pe.build(), Err(BuildError::ConflictingEdit(_))));
    }

    #[test]
    fn test_checksum_recompute_can_be_disabled() {
        let mut pe = PeBinary::parse(&minimal_pe64()).unwrap();
        pe.add_section(NewPeSection::data(".x", vec![1])).unwrap();
        let config = BuildConfig {
            recompute_pe_checksum: false,
            ..BuildConfig::default()
        };
        let out = pe.build_with(&config).unwrap();
        let again = PeBinary::parse(&out).unwrap();
        assert_eq!(again.optional_header().checksum, pe.optional_header().checksum);
        assert!(!again.checksum_valid());
    }
}
