//! Hand-assembled Mach-O images for unit tests.

use crate::core::binary::Endianness;
use crate::core::layout::align_up;
use crate::formats::macho::commands::dylib_command;
use crate::formats::macho::headers::{encode_fat_header, encode_header};
use crate::formats::macho::segments::encode_segment_command;
use crate::formats::macho::symbols::encode_nlist;
use crate::formats::macho::types::*;
use crate::stream::ByteWriter;

const LE: Endianness = Endianness::Little;

pub(crate) const TEXT_OFFSET: u64 = 0xf00;
pub(crate) const TEXT_ADDR: u64 = 0x1_0000_0f00;
pub(crate) const TEXT_BYTES: &[u8] = &[0x55, 0x48, 0x89, 0xe5, 0x31, 0xc0, 0x5d, 0xc3];
pub(crate) const LINKEDIT_OFFSET: u64 = 0x2000;
pub(crate) const EXEC_LEN: u64 = 0x2058;
pub(crate) const OBJECT_LEN: u64 = 0x1d3;

fn header(filetype: u32, ncmds: u32, sizeofcmds: u32) -> MachHeader {
    MachHeader {
        is_64: true,
        endian: LE,
        cputype: CPU_TYPE_X86_64,
        cpusubtype: 3,
        filetype,
        ncmds,
        sizeofcmds,
        flags: if filetype == MH_EXECUTE { 0x0020_0085 } else { 0 },
        reserved: 0,
    }
}

fn name(text: &str) -> [u8; 16] {
    encode_fixed_name(text).unwrap()
}

fn segment(segname: &str, vmaddr: u64, vmsize: u64, fileoff: u64, filesize: u64, prot: u32) -> RawSegment {
    RawSegment {
        segname: name(segname),
        vmaddr,
        vmsize,
        fileoff,
        filesize,
        maxprot: prot,
        initprot: prot,
        nsects: 0,
        flags: 0,
    }
}

fn section(sectname: &str, segname: &str, addr: u64, size: u64, offset: u32, align: u32, flags: u32) -> RawSection {
    RawSection {
        sectname: name(sectname),
        segname: name(segname),
        addr,
        size,
        offset,
        align,
        flags,
        ..RawSection::default()
    }
}

fn nlist(n_strx: u32, n_type: u8, n_sect: u8, n_desc: u16, n_value: u64) -> RawNlist {
    RawNlist {
        n_strx,
        n_type,
        n_sect,
        n_desc,
        n_value,
    }
}

/// Write a small command (`cmd`, `cmdsize` and u32 fields) at `at`.
fn command(out: &mut ByteWriter, at: u64, cmd: u32, size: u32, fields: &[(u64, u32)]) -> u64 {
    out.write_u32(at, cmd, LE);
    out.write_u32(at + 4, size, LE);
    for (offset, value) in fields {
        out.write_u32(at + offset, *value, LE);
    }
    at + u64::from(size)
}

/// x86_64 executable: `__PAGEZERO`, `__TEXT` (`__text`, `__stubs`),
/// `__DATA` (`__data`, `__bss`) and `__LINKEDIT` holding symbols, function
/// starts, one indirect symbol and strings. Entry via `LC_MAIN`.
pub(crate) fn minimal_exec() -> Vec<u8> {
    let h = header(MH_EXECUTE, 9, 0x328);
    let mut out = ByteWriter::new();
    out.resize(EXEC_LEN);
    encode_header(&mut out, &h);

    let mut at = h.size();
    at += encode_segment_command(&mut out, at, &h, &segment("__PAGEZERO", 0, 0x1_0000_0000, 0, 0, 0), &[]);
    let code = S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS;
    let mut stubs = section("__stubs", "__TEXT", 0x1_0000_0f08, 6, 0xf08, 1, S_SYMBOL_STUBS | code);
    stubs.reserved2 = 6;
    at += encode_segment_command(
        &mut out,
        at,
        &h,
        &segment("__TEXT", 0x1_0000_0000, 0x1000, 0, 0x1000, 5),
        &[section("__text", "__TEXT", TEXT_ADDR, 8, TEXT_OFFSET as u32, 4, code), stubs],
    );
    at += encode_segment_command(
        &mut out,
        at,
        &h,
        &segment("__DATA", 0x1_0000_1000, 0x1000, 0x1000, 0x1000, 3),
        &[
            section("__data", "__DATA", 0x1_0000_1000, 0x10, 0x1000, 3, S_REGULAR),
            section("__bss", "__DATA", 0x1_0000_1010, 0x100, 0, 3, S_ZEROFILL),
        ],
    );
    at += encode_segment_command(
        &mut out,
        at,
        &h,
        &segment("__LINKEDIT", 0x1_0000_2000, 0x1000, LINKEDIT_OFFSET, EXEC_LEN - LINKEDIT_OFFSET, 1),
        &[],
    );
    at = command(&mut out, at, LC_SYMTAB, 24, &[(8, 0x2000), (12, 3), (16, 0x2040), (20, 24)]);
    at = command(
        &mut out,
        at,
        LC_DYSYMTAB,
        80,
        &[(8, 0), (12, 1), (16, 1), (20, 1), (24, 2), (28, 1), (56, 0x2038), (60, 1)],
    );
    let dylib = dylib_command(LC_LOAD_DYLIB, "/usr/lib/libSystem.B.dylib", 0x0501_0000, 0x0001_0000, &h);
    out.write_bytes(at, &dylib);
    at += dylib.len() as u64;
    at = command(&mut out, at, LC_MAIN, 24, &[(8, TEXT_OFFSET as u32)]);
    at = command(&mut out, at, LC_FUNCTION_STARTS, 16, &[(8, 0x2030), (12, 8)]);
    assert_eq!(at, h.size() + u64::from(h.sizeofcmds));

    out.write_bytes(TEXT_OFFSET, TEXT_BYTES);
    out.write_bytes(0xf08, &[0xff, 0x25, 0xf2, 0x00, 0x00, 0x00]);
    out.write_u64(0x1000, 0x1_0000_0f00, LE);

    encode_nlist(&mut out, 0x2000, &nlist(1, N_SECT, 3, 0, 0x1_0000_1000), &h);
    encode_nlist(&mut out, 0x2010, &nlist(10, N_SECT | N_EXT, 1, 0, TEXT_ADDR), &h);
    encode_nlist(&mut out, 0x2020, &nlist(16, N_UNDF | N_EXT, NO_SECT, 0x100, 0), &h);
    out.write_bytes(0x2030, &[0x80, 0x1e, 0, 0, 0, 0, 0, 0]);
    out.write_u32(0x2038, 2, LE);
    out.write_bytes(0x2040, b"\0_counter\0_main\0_printf\0");
    out.into_inner()
}

/// x86_64 object: one unnamed segment with `__text` and `__cstring`, a
/// branch relocation against `_puts`, and three symbols.
pub(crate) fn minimal_object() -> Vec<u8> {
    let h = header(MH_OBJECT, 3, 0x150);
    let mut out = ByteWriter::new();
    out.resize(OBJECT_LEN);
    encode_header(&mut out, &h);

    let mut text = section("__text", "__TEXT", 0, 0x10, 0x170, 4, S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS);
    text.reloff = 0x188;
    text.nreloc = 1;
    let cstring = section("__cstring", "__TEXT", 0x10, 6, 0x180, 0, S_CSTRING_LITERALS);
    let mut at = h.size();
    at += encode_segment_command(&mut out, at, &h, &segment("", 0, 0x16, 0x170, 0x16, 7), &[text, cstring]);
    at = command(&mut out, at, LC_SYMTAB, 24, &[(8, 0x190), (12, 3), (16, 0x1c0), (20, 19)]);
    at = command(
        &mut out,
        at,
        LC_DYSYMTAB,
        80,
        &[(8, 0), (12, 1), (16, 1), (20, 1), (24, 2), (28, 1)],
    );
    assert_eq!(at, h.size() + u64::from(h.sizeofcmds));

    let mut code = vec![0xe8, 0, 0, 0, 0, 0xc3];
    code.resize(0x10, 0x90);
    out.write_bytes(0x170, &code);
    out.write_bytes(0x180, b"hello\0");
    let reloc = RawRelocation::Plain {
        r_address: 1,
        r_symbolnum: 2,
        r_pcrel: true,
        r_length: 2,
        r_extern: true,
        r_type: 2,
    }
    .encode(LE);
    out.write_u32(0x188, reloc[0], LE);
    out.write_u32(0x18c, reloc[1], LE);

    encode_nlist(&mut out, 0x190, &nlist(1, N_SECT, 2, 0, 0x10), &h);
    encode_nlist(&mut out, 0x1a0, &nlist(7, N_SECT | N_EXT, 1, 0, 0), &h);
    encode_nlist(&mut out, 0x1b0, &nlist(13, N_UNDF | N_EXT, NO_SECT, 0, 0), &h);
    out.write_bytes(0x1c0, b"\0L_str\0_main\0_puts\0");
    out.into_inner()
}

/// Universal wrapper around `slices`, each aligned to 2^`align`.
pub(crate) fn fat(slices: &[(Vec<u8>, u32, u32)]) -> Vec<u8> {
    let mut arches = Vec::new();
    let mut end = FAT_HEADER_SIZE + slices.len() as u64 * FAT_ARCH_SIZE;
    for (data, cputype, align) in slices {
        let offset = align_up(end, 1u64 << align);
        arches.push(FatArch {
            cputype: *cputype,
            cpusubtype: 3,
            offset: offset as u32,
            size: data.len() as u32,
            align: *align,
        });
        end = offset + data.len() as u64;
    }
    let mut out = ByteWriter::new();
    out.resize(end);
    encode_fat_header(&mut out, &arches);
    for (arch, (data, _, _)) in arches.iter().zip(slices) {
        out.write_bytes(u64::from(arch.offset), data);
    }
    out.into_inner()
}

/// Executable and object slices, page aligned.
pub(crate) fn minimal_fat() -> Vec<u8> {
    fat(&[
        (minimal_exec(), CPU_TYPE_X86_64, 12),
        (minimal_object(), CPU_TYPE_X86_64, 12),
    ])
}
