//! Hand-assembled PE images for unit tests.

use crate::core::binary::Endianness;
use crate::core::layout::align_up;
use crate::formats::pe::directories::reloc::{encode_base_relocations, RawBaseRelocation};
use crate::formats::pe::headers::{encode_coff_header, encode_optional_header};
use crate::formats::pe::sections::encode_section_header;
use crate::formats::pe::types::*;
use crate::formats::pe::utils::calculate_pe_checksum;
use crate::stream::ByteWriter;

const LE: Endianness = Endianness::Little;
pub(crate) const FILE_ALIGN: u32 = 0x200;
pub(crate) const SECTION_ALIGN: u32 = 0x1000;

pub(crate) struct TestSection {
    pub name: &'static str,
    pub rva: u32,
    pub virtual_size: u32,
    pub characteristics: u32,
    pub data: Vec<u8>,
}

impl TestSection {
    pub fn new(name: &'static str, rva: u32, characteristics: u32, data: Vec<u8>) -> Self {
        Self {
            name,
            rva,
            virtual_size: data.len() as u32,
            characteristics,
            data,
        }
    }
}

pub(crate) struct TestImage {
    pub wide: bool,
    pub image_base: u64,
    pub entry: u32,
    pub size_of_headers: u32,
    pub sections: Vec<TestSection>,
    pub directories: Vec<(usize, u32, u32)>,
    pub overlay: Vec<u8>,
    pub checksum: bool,
}

pub(crate) const CODE: u32 = IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ;
pub(crate) const RDATA: u32 = IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ;
pub(crate) const DATA: u32 = IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ | IMAGE_SCN_MEM_WRITE;
pub(crate) const RELOC: u32 = RDATA | IMAGE_SCN_MEM_DISCARDABLE;

/// Lay out headers, then each section's raw data back to back from
/// `size_of_headers`, then the overlay.
pub(crate) fn assemble(img: &TestImage) -> Vec<u8> {
    let opt_size: u16 = if img.wide { 240 } else { 224 };
    let table = 0x98 + u64::from(opt_size);

    let mut out = ByteWriter::new();
    out.write_u16(0, DOS_SIGNATURE, LE);
    out.write_u32(60, 0x80, LE);
    out.write_bytes(0x40, b"\x0e\x1f\xba\x0e\x00\xb4\x09\xcd\x21\xb8\x01\x4c\xcd\x21This program cannot be run in DOS mode.");
    out.write_u32(0x80, PE_SIGNATURE, LE);

    let mut headers = Vec::new();
    let mut raw_at = img.size_of_headers;
    let (mut code, mut init, mut image_end) = (0u32, 0u32, 0u64);
    for s in &img.sections {
        let raw = align_up(s.data.len() as u64, u64::from(FILE_ALIGN)) as u32;
        let mut name = [0u8; 8];
        name[..s.name.len()].copy_from_slice(s.name.as_bytes());
        headers.push(SectionHeader {
            name,
            virtual_size: s.virtual_size,
            virtual_address: s.rva,
            size_of_raw_data: raw,
            pointer_to_raw_data: if raw == 0 { 0 } else { raw_at },
            characteristics: s.characteristics,
            ..SectionHeader::default()
        });
        out.write_bytes(u64::from(raw_at), &s.data);
        out.resize(u64::from(raw_at + raw));
        if s.characteristics & IMAGE_SCN_CNT_CODE != 0 {
            code += raw;
        }
        if s.characteristics & IMAGE_SCN_CNT_INITIALIZED_DATA != 0 {
            init += raw;
        }
        image_end = image_end.max(u64::from(s.rva) + u64::from(s.virtual_size));
        raw_at += raw;
    }
    out.resize(u64::from(raw_at));
    out.write_bytes(u64::from(raw_at), &img.overlay);

    let coff = CoffHeader {
        machine: if img.wide { IMAGE_FILE_MACHINE_AMD64 } else { 0x014c },
        number_of_sections: img.sections.len() as u16,
        size_of_optional_header: opt_size,
        characteristics: if img.wide { 0x0022 } else { 0x0102 },
        ..CoffHeader::default()
    };
    encode_coff_header(&mut out, 0x84, &coff);

    let mut data_directories = vec![DataDirectory::default(); IMAGE_NUMBEROF_DIRECTORY_ENTRIES];
    for (index, rva, size) in &img.directories {
        data_directories[*index] = DataDirectory {
            virtual_address: *rva,
            size: *size,
        };
    }
    let opt = OptionalHeader {
        magic: if img.wide { PE32PLUS_MAGIC } else { PE32_MAGIC },
        major_linker_version: 14,
        size_of_code: code,
        size_of_initialized_data: init,
        address_of_entry_point: img.entry,
        base_of_code: 0x1000,
        base_of_data: if img.wide { None } else { Some(0x2000) },
        image_base: img.image_base,
        section_alignment: SECTION_ALIGN,
        file_alignment: FILE_ALIGN,
        major_operating_system_version: 6,
        major_subsystem_version: 6,
        size_of_image: align_up(image_end, u64::from(SECTION_ALIGN)) as u32,
        size_of_headers: img.size_of_headers,
        subsystem: 3,
        dll_characteristics: 0x8160,
        size_of_stack_reserve: 0x100000,
        size_of_stack_commit: 0x1000,
        size_of_heap_reserve: 0x100000,
        size_of_heap_commit: 0x1000,
        number_of_rva_and_sizes: IMAGE_NUMBEROF_DIRECTORY_ENTRIES as u32,
        data_directories,
        ..OptionalHeader::default()
    };
    encode_optional_header(&mut out, 0x98, &opt);
    for (i, sh) in headers.iter().enumerate() {
        encode_section_header(&mut out, table + i as u64 * SECTION_HEADER_SIZE, sh);
    }

    let mut bytes = out.into_inner();
    if img.checksum {
        let at = 0x98 + CHECKSUM_OFFSET as usize;
        let sum = calculate_pe_checksum(&bytes, at);
        bytes[at..at + 4].copy_from_slice(&sum.to_le_bytes());
    }
    bytes
}

fn dir64(rva: u64) -> RawBaseRelocation {
    RawBaseRelocation {
        rva,
        kind: IMAGE_REL_BASED_DIR64,
        param: None,
    }
}

fn highlow(rva: u64) -> RawBaseRelocation {
    RawBaseRelocation {
        rva,
        kind: IMAGE_REL_BASED_HIGHLOW,
        param: None,
    }
}

/// `.rdata` of the PE32+ fixture: imports at 0x2000, exports at 0x20a0,
/// one `RUNTIME_FUNCTION` at 0x2180 and a pointer to `run` at 0x21f0.
fn rdata64(image_base: u64) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.resize(0x200);
    // Import descriptor, then a zero terminator.
    w.write_u32(0x00, 0x2040, LE);
    w.write_u32(0x0c, 0x2070, LE);
    w.write_u32(0x10, 0x2058, LE);
    for table in [0x40, 0x58] {
        w.write_u64(table, 0x2080, LE);
        w.write_u64(table + 8, 0x8000_0000_0000_0007, LE);
    }
    w.write_bytes(0x70, b"KERNEL32.dll\0");
    w.write_bytes(0x82, b"ExitProcess\0");

    // Export directory.
    w.write_u32(0xac, 0x20f0, LE);
    w.write_u32(0xb0, 1, LE);
    w.write_u32(0xb4, 1, LE);
    w.write_u32(0xb8, 1, LE);
    w.write_u32(0xbc, 0x20c8, LE);
    w.write_u32(0xc0, 0x20cc, LE);
    w.write_u32(0xc4, 0x20d0, LE);
    w.write_u32(0xc8, 0x1010, LE);
    w.write_u32(0xcc, 0x20e0, LE);
    w.write_u16(0xd0, 0, LE);
    w.write_bytes(0xe0, b"run\0");
    w.write_bytes(0xf0, b"demo.dll\0");

    w.write_u32(0x180, 0x1000, LE);
    w.write_u32(0x184, 0x1020, LE);
    w.write_u32(0x188, 0x2190, LE);
    w.write_bytes(0x190, &[1, 0, 0, 0]);

    w.write_u64(0x1f0, image_base + 0x1010, LE);
    w.into_inner()
}

/// PE32+ image with `.text`, `.rdata` and `.reloc`, an import, an export, an
/// exception entry, one `DIR64` base relocation, a certificate overlay and a
/// valid checksum.
pub(crate) fn minimal_pe64() -> Vec<u8> {
    let image_base = 0x1_4000_0000;
    let mut text = vec![0x90u8; 0x10];
    text.extend_from_slice(&[0xc3; 0x10]);
    let relocs = encode_base_relocations(&[dir64(0x21f0)]);
    let mut certificate = vec![0xabu8; 0x40];
    certificate[..8].copy_from_slice(&[0x40, 0, 0, 0, 0, 2, 2, 0]);

    assemble(&TestImage {
        wide: true,
        image_base,
        entry: 0x1000,
        size_of_headers: 0x400,
        sections: vec![
            TestSection::new(".text", 0x1000, CODE, text),
            TestSection::new(".rdata", 0x2000, RDATA, rdata64(image_base)),
            TestSection::new(".reloc", 0x3000, RELOC, relocs.clone()),
        ],
        directories: vec![
            (IMAGE_DIRECTORY_ENTRY_EXPORT, 0x20a0, 0x60),
            (IMAGE_DIRECTORY_ENTRY_IMPORT, 0x2000, 0x28),
            (IMAGE_DIRECTORY_ENTRY_EXCEPTION, 0x2180, 12),
            (IMAGE_DIRECTORY_ENTRY_SECURITY, 0xa00, 0x40),
            (IMAGE_DIRECTORY_ENTRY_BASERELOC, 0x3000, relocs.len() as u32),
            (IMAGE_DIRECTORY_ENTRY_IAT, 0x2058, 0x18),
        ],
        overlay: certificate,
        checksum: true,
    })
}

/// PE32 image with `.text`, `.data`, `.rsrc` and `.reloc`: two `HIGHLOW`
/// relocations, a CodeView debug entry, a one-leaf resource tree and an
/// unreferenced `.pad` section.
pub(crate) fn minimal_pe32() -> Vec<u8> {
    let image_base = 0x40_0000u64;
    let mut text = vec![0xa1, 0x00, 0x20, 0x40, 0x00, 0xc3];
    text.resize(0x10, 0xcc);

    let mut data = ByteWriter::new();
    data.resize(0x80);
    data.write_u32(0, (image_base + 0x1000) as u32, LE);
    // IMAGE_DEBUG_DIRECTORY at 0x20.
    data.write_u32(0x20 + 12, 2, LE);
    data.write_u32(0x20 + 16, 0x18, LE);
    data.write_u32(0x20 + 20, 0x2060, LE);
    data.write_u32(0x20 + 24, 0x660, LE);
    data.write_bytes(0x60, b"RSDS");

    let mut rsrc = ByteWriter::new();
    rsrc.resize(0x40);
    rsrc.write_u16(14, 1, LE);
    rsrc.write_u32(16, 3, LE);
    rsrc.write_u32(20, 0x18, LE);
    rsrc.write_u32(0x18, 0x3030, LE);
    rsrc.write_u32(0x1c, 4, LE);
    rsrc.write_bytes(0x30, b"ICON");

    let relocs = encode_base_relocations(&[highlow(0x1001), highlow(0x2000)]);
    assemble(&TestImage {
        wide: false,
        image_base,
        entry: 0x1000,
        size_of_headers: 0x400,
        sections: vec![
            TestSection::new(".text", 0x1000, CODE, text),
            TestSection::new(".data", 0x2000, DATA, data.into_inner()),
            TestSection::new(".rsrc", 0x3000, RDATA, rsrc.into_inner()),
            TestSection::new(".reloc", 0x4000, RELOC, relocs.clone()),
            TestSection::new(".pad", 0x5000, RDATA, b"scratch area".to_vec()),
        ],
        directories: vec![
            (IMAGE_DIRECTORY_ENTRY_RESOURCE, 0x3000, 0x40),
            (IMAGE_DIRECTORY_ENTRY_BASERELOC, 0x4000, relocs.len() as u32),
            (IMAGE_DIRECTORY_ENTRY_DEBUG, 0x2020, 28),
        ],
        overlay: Vec::new(),
        checksum: false,
    })
}
