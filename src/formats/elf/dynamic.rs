//! The `.dynamic` table

use crate::core::binary::Endianness;
use crate::core::strtab::StringTable;
use crate::error::{ParseError, ParseStage};
use crate::formats::elf::sections::SectionId;
use crate::formats::elf::types::*;
use crate::stream::{ByteStream, ByteWriter, StageExt};

const STAGE: ParseStage = ParseStage::Dynamic;

/// One `Elf_Dyn` entry. `serial` identifies the entry across insertions so
/// pointer fixups keep naming the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicEntry {
    pub tag: i64,
    pub value: u64,
    pub(crate) serial: u32,
}

#[derive(Debug, Clone)]
pub struct DynamicTable {
    pub section: SectionId,
    /// Every entry of the section, including trailing `DT_NULL`s.
    pub entries: Vec<DynamicEntry>,
    next_serial: u32,
}

impl DynamicTable {
    pub fn new(section: SectionId, raw: Vec<(i64, u64)>) -> Self {
        let entries: Vec<DynamicEntry> = raw
            .into_iter()
            .enumerate()
            .map(|(i, (tag, value))| DynamicEntry {
                tag,
                value,
                serial: i as u32,
            })
            .collect();
        let next_serial = entries.len() as u32;
        Self {
            section,
            entries,
            next_serial,
        }
    }

    /// First value carried by `tag`, stopping at the terminating `DT_NULL`.
    pub fn get(&self, tag: i64) -> Option<u64> {
        self.live().find(|e| e.tag == tag).map(|e| e.value)
    }

    /// Entries up to the first `DT_NULL`.
    pub fn live(&self) -> impl Iterator<Item = &DynamicEntry> + '_ {
        self.entries.iter().take_while(|e| e.tag != DT_NULL)
    }

    /// Names of `DT_NEEDED` entries, resolved through `strings`.
    pub fn needed(&self, strings: &StringTable) -> Vec<String> {
        self.string_values(DT_NEEDED, strings)
    }

    pub fn string_values(&self, tag: i64, strings: &StringTable) -> Vec<String> {
        self.live()
            .filter(|e| e.tag == tag)
            .filter_map(|e| u32::try_from(e.value).ok().and_then(|o| strings.get(o)))
            .collect()
    }

    /// Insert a `DT_NEEDED` after the existing ones, reusing a spare
    /// trailing `DT_NULL` when there is one.
    pub(crate) fn insert_needed(&mut self, name_offset: u32) {
        let live = self.live().count();
        let at = self.entries[..live]
            .iter()
            .rposition(|e| e.tag == DT_NEEDED)
            .map_or(0, |i| i + 1);
        let trailing_nulls = self.entries.len() - live;
        if trailing_nulls >= 2 {
            self.entries.pop();
        }
        let serial = self.next_serial;
        self.next_serial += 1;
        self.entries.insert(
            at,
            DynamicEntry {
                tag: DT_NEEDED,
                value: u64::from(name_offset),
                serial,
            },
        );
    }

    pub fn byte_size(&self, class: ElfClass) -> u64 {
        self.entries.len() as u64 * class.dyn_size()
    }
}

/// Tags whose value is a virtual address.
pub fn is_address_tag(tag: i64) -> bool {
    matches!(
        tag,
        DT_PLTGOT
            | DT_HASH
            | DT_STRTAB
            | DT_SYMTAB
            | DT_RELA
            | DT_INIT
            | DT_FINI
            | DT_REL
            | DT_JMPREL
            | DT_INIT_ARRAY
            | DT_FINI_ARRAY
            | DT_PREINIT_ARRAY
            | DT_SYMTAB_SHNDX
            | DT_RELR
            | DT_GNU_HASH
            | DT_VERSYM
            | DT_VERDEF
            | DT_VERNEED
    )
}

/// The address tag whose table a size tag measures.
pub fn size_tag_base(tag: i64) -> Option<i64> {
    match tag {
        DT_STRSZ => Some(DT_STRTAB),
        DT_RELASZ => Some(DT_RELA),
        DT_RELSZ => Some(DT_REL),
        DT_PLTRELSZ => Some(DT_JMPREL),
        DT_RELRSZ => Some(DT_RELR),
        DT_INIT_ARRAYSZ => Some(DT_INIT_ARRAY),
        DT_FINI_ARRAYSZ => Some(DT_FINI_ARRAY),
        DT_PREINIT_ARRAYSZ => Some(DT_PREINIT_ARRAY),
        _ => None,
    }
}

/// Parse every entry of a dynamic section body.
pub fn parse_dynamic(data: &[u8], class: ElfClass, endian: Endianness) -> Result<Vec<(i64, u64)>, ParseError> {
    let entsize = class.dyn_size();
    let len = data.len() as u64;
    if len % entsize != 0 {
        return Err(ParseError::table(
            STAGE,
            format!("table size {:#x} is not a multiple of {}", len, entsize),
        ));
    }
    let stream = ByteStream::new(data);
    let wide = class.is_64();
    let mut entries = Vec::with_capacity((len / entsize) as usize);
    for i in 0..len / entsize {
        let at = i * entsize;
        let tag = if wide {
            stream.read_i64(at, endian).stage(STAGE)?
        } else {
            i64::from(stream.read_i32(at, endian).stage(STAGE)?)
        };
        let value = stream.read_word(at + class.word_size(), wide, endian).stage(STAGE)?;
        entries.push((tag, value));
    }
    if !entries.iter().any(|(tag, _)| *tag == DT_NULL) {
        return Err(ParseError::table(STAGE, "no terminating DT_NULL"));
    }
    Ok(entries)
}

pub fn encode_dynamic(entries: &[DynamicEntry], class: ElfClass, endian: Endianness) -> Vec<u8> {
    let mut out = ByteWriter::new();
    let wide = class.is_64();
    for (i, entry) in entries.iter().enumerate() {
        let at = i as u64 * class.dyn_size();
        if wide {
            out.write_i64(at, entry.tag, endian);
        } else {
            out.write_i32(at, entry.tag as i32, endian);
        }
        out.write_word(at + class.word_size(), entry.value, wide, endian);
    }
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> DynamicTable {
        DynamicTable::new(
            SectionId::new(4),
            vec![(DT_NEEDED, 1), (DT_STRTAB, 0x400300), (DT_NULL, 0), (DT_NULL, 0), (DT_NULL, 0)],
        )
    }

    #[test]
    fn test_dynamic_encoding_matches_parsing() {
        let t = table();
        for class in [ElfClass::Elf32, ElfClass::Elf64] {
            let bytes = encode_dynamic(&t.entries, class, Endianness::Little);
            assert_eq!(bytes.len() as u64, t.byte_size(class));
            let parsed = parse_dynamic(&bytes, class, Endianness::Little).unwrap();
            assert_eq!(parsed[1], (DT_STRTAB, 0x400300));
        }
    }

    #[test]
    fn test_insert_needed_reuses_spare_null() {
        let mut t = table();
        t.insert_needed(9);
        assert_eq!(t.entries.len(), 5);
        assert_eq!(t.entries[1].tag, DT_NEEDED);
        assert_eq!(t.entries[1].value, 9);
        assert_eq!(t.entries[1].serial, 5);
        t.insert_needed(12);
        // Only one DT_NULL was spare; the table grows now.
        t.insert_needed(15);
        assert_eq!(t.entries.len(), 6);
        assert_eq!(t.entries.iter().filter(|e| e.tag == DT_NULL).count(), 1);
    }

    #[test]
    fn test_needed_names_and_tags() {
        let mut strings = StringTable::new();
        let libc = strings.intern("libc.so.6");
        let t = DynamicTable::new(SectionId::new(0), vec![(DT_NEEDED, u64::from(libc)), (DT_NULL, 0)]);
        assert_eq!(t.needed(&strings), vec!["libc.so.6".to_string()]);
        assert!(is_address_tag(DT_GNU_HASH));
        assert!(!is_address_tag(DT_NEEDED));
        assert_eq!(size_tag_base(DT_STRSZ), Some(DT_STRTAB));
        assert!(parse_dynamic(&[0u8; 15], ElfClass::Elf64, Endianness::Little).is_err());
    }
}
