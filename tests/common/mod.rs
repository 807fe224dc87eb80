//! Byte-level fixtures shared by the integration tests.
//!
//! Images are written field by field with no help from the crate, so a
//! successful parse checks the readers against the on-disk formats rather
//! than against the crate's own encoders.

#![allow(dead_code)]

/// Little- or big-endian scratch buffer that grows on write.
pub struct Image {
    bytes: Vec<u8>,
    big: bool,
}

impl Image {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
            big: false,
        }
    }

    pub fn big_endian(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
            big: true,
        }
    }

    fn put(&mut self, at: usize, le: &[u8]) {
        if self.bytes.len() < at + le.len() {
            self.bytes.resize(at + le.len(), 0);
        }
        let dst = &mut self.bytes[at..at + le.len()];
        dst.copy_from_slice(le);
        if self.big {
            dst.reverse();
        }
    }

    pub fn u8(&mut self, at: usize, v: u8) -> &mut Self {
        self.put(at, &[v]);
        self
    }

    pub fn u16(&mut self, at: usize, v: u16) -> &mut Self {
        self.put(at, &v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, at: usize, v: u32) -> &mut Self {
        self.put(at, &v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, at: usize, v: u64) -> &mut Self {
        self.put(at, &v.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, at: usize, data: &[u8]) -> &mut Self {
        if self.bytes.len() < at + data.len() {
            self.bytes.resize(at + data.len(), 0);
        }
        self.bytes[at..at + data.len()].copy_from_slice(data);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

pub fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

pub fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(data[at..at + 4].try_into().unwrap())
}

pub fn read_u64(data: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(data[at..at + 8].try_into().unwrap())
}

pub const SHF_WRITE: u64 = 1;
pub const SHF_ALLOC: u64 = 2;
pub const SHF_EXECINSTR: u64 = 4;

pub const ELF_TEXT_OFFSET: u64 = 0x1000;
pub const ELF64_TEXT_ADDR: u64 = 0x40_1000;
pub const ELF32_TEXT_ADDR: u64 = 0x804_9000;

const SHSTRTAB: &[u8] = b"\0.text\0.symtab\0.strtab\0.shstrtab\0";

/// `ET_EXEC` with 16 bytes of `.text` at file offset 0x1000 as the only
/// member of one `PT_LOAD`, and `.symtab`/`.strtab` holding `_start` right
/// behind it. Section headers close the file.
pub fn elf_exec(wide: bool) -> Vec<u8> {
    let text_addr = if wide { ELF64_TEXT_ADDR } else { ELF32_TEXT_ADDR };
    let (ehsize, phentsize, shentsize, symsize) = if wide { (64, 56, 64, 24) } else { (52, 32, 40, 16) };
    let symtab = 0x1010usize;
    let strtab = symtab + 2 * symsize;
    let shstrtab = strtab + 8;
    let align = if wide { 8 } else { 4 };
    let shoff = (shstrtab + SHSTRTAB.len()).div_ceil(align) * align;

    let mut img = Image::new(shoff + 5 * shentsize);
    img.bytes(0, b"\x7fELF")
        .u8(4, if wide { 2 } else { 1 })
        .u8(5, 1)
        .u8(6, 1)
        .u16(16, 2)
        .u16(18, if wide { 62 } else { 3 })
        .u32(20, 1);
    let words = if wide {
        img.u64(24, text_addr).u64(32, ehsize as u64).u64(40, shoff as u64);
        48
    } else {
        img.u32(24, text_addr as u32).u32(28, ehsize as u32).u32(32, shoff as u32);
        36
    };
    img.u32(words, 0)
        .u16(words + 4, ehsize as u16)
        .u16(words + 6, phentsize as u16)
        .u16(words + 8, 1)
        .u16(words + 10, shentsize as u16)
        .u16(words + 12, 5)
        .u16(words + 14, 4);

    // PT_LOAD, R+X.
    let ph = ehsize;
    if wide {
        img.u32(ph, 1)
            .u32(ph + 4, 5)
            .u64(ph + 8, ELF_TEXT_OFFSET)
            .u64(ph + 16, text_addr)
            .u64(ph + 24, text_addr)
            .u64(ph + 32, 0x10)
            .u64(ph + 40, 0x10)
            .u64(ph + 48, 0x1000);
    } else {
        img.u32(ph, 1)
            .u32(ph + 4, ELF_TEXT_OFFSET as u32)
            .u32(ph + 8, text_addr as u32)
            .u32(ph + 12, text_addr as u32)
            .u32(ph + 16, 0x10)
            .u32(ph + 20, 0x10)
            .u32(ph + 24, 5)
            .u32(ph + 28, 0x1000);
    }

    img.bytes(ELF_TEXT_OFFSET as usize, &[0x90; 16]);
    // Null symbol, then _start: global function in section 1.
    let start = symtab + symsize;
    if wide {
        img.u32(start, 1)
            .u8(start + 4, 0x12)
            .u16(start + 6, 1)
            .u64(start + 8, text_addr)
            .u64(start + 16, 16);
    } else {
        img.u32(start, 1)
            .u32(start + 4, text_addr as u32)
            .u32(start + 8, 16)
            .u8(start + 12, 0x12)
            .u16(start + 14, 1);
    }
    img.bytes(strtab, b"\0_start\0");
    img.bytes(shstrtab, SHSTRTAB);

    // name, type, flags, addr, offset, size, link, info, align, entsize
    let headers: [(u32, u32, u64, u64, usize, usize, u32, u32, u64, u64); 4] = [
        (1, 1, SHF_ALLOC | SHF_EXECINSTR, text_addr, ELF_TEXT_OFFSET as usize, 16, 0, 0, 16, 0),
        (7, 2, 0, 0, symtab, 2 * symsize, 3, 1, align as u64, symsize as u64),
        (15, 3, 0, 0, strtab, 8, 0, 0, 1, 0),
        (23, 3, 0, 0, shstrtab, SHSTRTAB.len(), 0, 0, 1, 0),
    ];
    for (i, h) in headers.iter().enumerate() {
        let at = shoff + (i + 1) * shentsize;
        img.u32(at, h.0).u32(at + 4, h.1);
        if wide {
            img.u64(at + 8, h.2)
                .u64(at + 16, h.3)
                .u64(at + 24, h.4 as u64)
                .u64(at + 32, h.5 as u64)
                .u32(at + 40, h.6)
                .u32(at + 44, h.7)
                .u64(at + 48, h.8)
                .u64(at + 56, h.9);
        } else {
            img.u32(at + 8, h.2 as u32)
                .u32(at + 12, h.3 as u32)
                .u32(at + 16, h.4 as u32)
                .u32(at + 20, h.5 as u32)
                .u32(at + 24, h.6)
                .u32(at + 28, h.7)
                .u32(at + 32, h.8 as u32)
                .u32(at + 36, h.9 as u32);
        }
    }
    img.finish()
}

pub fn elf64_exec() -> Vec<u8> {
    elf_exec(true)
}

pub fn elf32_exec() -> Vec<u8> {
    elf_exec(false)
}

pub const PE_FILE_ALIGN: u32 = 0x200;
pub const PE_SECTION_ALIGN: u32 = 0x1000;
pub const PE_OPTIONAL: usize = 0x98;
pub const IMAGE_SCN_CNT_CODE: u32 = 0x20;
pub const IMAGE_SCN_CNT_INITIALIZED_DATA: u32 = 0x40;
pub const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;
pub const IMAGE_SCN_MEM_READ: u32 = 0x4000_0000;
pub const IMAGE_SCN_MEM_WRITE: u32 = 0x8000_0000;

/// Offset of the section table for a PE32 (`wide == false`) or PE32+ image.
pub fn pe_section_table(wide: bool) -> usize {
    PE_OPTIONAL + if wide { 240 } else { 224 }
}

/// PE image with `.text` (RVA 0x1000, file 0x400) and `.data` (RVA 0x2000,
/// file 0x600), one file-aligned block each, and no data directories.
pub fn pe_image(wide: bool) -> Vec<u8> {
    let mut img = Image::new(0x800);
    img.bytes(0, b"MZ").u32(0x3c, 0x80).bytes(0x80, b"PE\0\0");

    let opt_size: u16 = if wide { 240 } else { 224 };
    img.u16(0x84, if wide { 0x8664 } else { 0x14c })
        .u16(0x86, 2)
        .u16(0x94, opt_size)
        .u16(0x96, if wide { 0x22 } else { 0x102 });

    let o = PE_OPTIONAL;
    img.u16(o, if wide { 0x20b } else { 0x10b })
        .u8(o + 2, 14)
        .u32(o + 4, 0x200)
        .u32(o + 8, 0x200)
        .u32(o + 16, 0x1000)
        .u32(o + 20, 0x1000);
    if wide {
        img.u64(o + 24, 0x1_4000_0000);
    } else {
        img.u32(o + 24, 0x2000).u32(o + 28, 0x40_0000);
    }
    img.u32(o + 32, PE_SECTION_ALIGN)
        .u32(o + 36, PE_FILE_ALIGN)
        .u16(o + 40, 6)
        .u16(o + 48, 6)
        .u32(o + 56, 0x3000)
        .u32(o + 60, 0x400)
        .u16(o + 68, 3)
        .u16(o + 70, 0x8160);
    if wide {
        img.u64(o + 72, 0x10_0000)
            .u64(o + 80, 0x1000)
            .u64(o + 88, 0x10_0000)
            .u64(o + 96, 0x1000)
            .u32(o + 108, 16);
    } else {
        img.u32(o + 72, 0x10_0000)
            .u32(o + 76, 0x1000)
            .u32(o + 80, 0x10_0000)
            .u32(o + 84, 0x1000)
            .u32(o + 92, 16);
    }

    let table = pe_section_table(wide);
    let sections: [(&[u8], u32, u32, u32); 2] = [
        (b".text", 0x1000, 0x400, IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ),
        (
            b".data",
            0x2000,
            0x600,
            IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ | IMAGE_SCN_MEM_WRITE,
        ),
    ];
    for (i, (name, rva, raw, characteristics)) in sections.iter().enumerate() {
        let at = table + i * 40;
        img.bytes(at, name)
            .u32(at + 8, 0x20)
            .u32(at + 12, *rva)
            .u32(at + 16, PE_FILE_ALIGN)
            .u32(at + 20, *raw)
            .u32(at + 36, *characteristics);
    }
    let mut code = vec![0x90u8; 0x1f];
    code.push(0xc3);
    img.bytes(0x400, &code);
    img.bytes(0x600, b"binweave data block 0123456789ab");
    img.finish()
}

pub fn pe32_image() -> Vec<u8> {
    pe_image(false)
}

pub fn pe64_image() -> Vec<u8> {
    pe_image(true)
}

pub const MACHO_TEXT_ADDR: u64 = 0x1_0000_0f00;
pub const MACHO_TEXT_OFFSET: u64 = 0xf00;
pub const MACHO_LINKEDIT_OFFSET: u64 = 0x1000;
pub const MACHO_LEN: usize = 0x1030;
pub const CPU_TYPE_X86_64: u32 = 0x0100_0007;
pub const CPU_TYPE_ARM64: u32 = 0x0100_000c;
pub const LIBSYSTEM: &str = "/usr/lib/libSystem.B.dylib";

fn segment_64(img: &mut Image, at: usize, name: &str, vm: (u64, u64), file: (u64, u64), prot: u32, nsects: u32) {
    img.u32(at, 0x19)
        .u32(at + 4, 72 + 80 * nsects)
        .bytes(at + 8, name.as_bytes())
        .u64(at + 24, vm.0)
        .u64(at + 32, vm.1)
        .u64(at + 40, file.0)
        .u64(at + 48, file.1)
        .u32(at + 56, prot)
        .u32(at + 60, prot)
        .u32(at + 64, nsects);
}

/// 64-bit `MH_EXECUTE` for `cputype`: `__PAGEZERO`, `__TEXT` with an 8-byte
/// `__text` at 0xf00, and `__LINKEDIT` holding `_main` (defined) and
/// `_printf` (from libSystem). Entry through `LC_MAIN`.
pub fn macho_exec(cputype: u32) -> Vec<u8> {
    let mut img = Image::new(MACHO_LEN);
    img.u32(0, 0xfeed_facf)
        .u32(4, cputype)
        .u32(8, if cputype == CPU_TYPE_X86_64 { 3 } else { 0 })
        .u32(12, 2)
        .u32(16, 7)
        .u32(20, 0x1e0)
        .u32(24, 0x0020_0085);

    let mut at = 32;
    segment_64(&mut img, at, "__PAGEZERO", (0, 0x1_0000_0000), (0, 0), 0, 0);
    at += 72;
    segment_64(&mut img, at, "__TEXT", (0x1_0000_0000, 0x1000), (0, 0x1000), 5, 1);
    let sect = at + 72;
    img.bytes(sect, b"__text")
        .bytes(sect + 16, b"__TEXT")
        .u64(sect + 32, MACHO_TEXT_ADDR)
        .u64(sect + 40, 8)
        .u32(sect + 48, MACHO_TEXT_OFFSET as u32)
        .u32(sect + 52, 4)
        .u32(sect + 64, 0x8000_0400);
    at += 152;
    segment_64(
        &mut img,
        at,
        "__LINKEDIT",
        (0x1_0000_1000, 0x1000),
        (MACHO_LINKEDIT_OFFSET, MACHO_LEN as u64 - MACHO_LINKEDIT_OFFSET),
        1,
        0,
    );
    at += 72;
    // LC_SYMTAB
    img.u32(at, 2).u32(at + 4, 24).u32(at + 8, 0x1000).u32(at + 12, 2).u32(at + 16, 0x1020).u32(at + 20, 16);
    at += 24;
    // LC_DYSYMTAB: no locals, one extdef, one undef.
    img.u32(at, 0xb)
        .u32(at + 4, 80)
        .u32(at + 16, 0)
        .u32(at + 20, 1)
        .u32(at + 24, 1)
        .u32(at + 28, 1);
    at += 80;
    // LC_LOAD_DYLIB
    img.u32(at, 0xc)
        .u32(at + 4, 56)
        .u32(at + 8, 24)
        .u32(at + 12, 2)
        .u32(at + 16, 0x0501_0000)
        .u32(at + 20, 0x0001_0000)
        .bytes(at + 24, LIBSYSTEM.as_bytes());
    at += 56;
    // LC_MAIN
    img.u32(at, 0x8000_0028).u32(at + 4, 24).u64(at + 8, MACHO_TEXT_OFFSET);
    at += 24;
    assert_eq!(at, 32 + 0x1e0);

    img.bytes(MACHO_TEXT_OFFSET as usize, &[0x55, 0x48, 0x89, 0xe5, 0x31, 0xc0, 0x5d, 0xc3]);
    img.u32(0x1000, 1).u8(0x1004, 0x0f).u8(0x1005, 1).u64(0x1008, MACHO_TEXT_ADDR);
    img.u32(0x1010, 7).u8(0x1014, 0x01).u16(0x1016, 0x0100);
    img.bytes(0x1020, b"\0_main\0_printf\0\0");
    img.finish()
}

pub fn macho64_exec() -> Vec<u8> {
    macho_exec(CPU_TYPE_X86_64)
}

/// Universal binary with x86_64 and arm64 slices, both page aligned.
pub fn fat_macho() -> Vec<u8> {
    let slices = [macho_exec(CPU_TYPE_X86_64), macho_exec(CPU_TYPE_ARM64)];
    let cputypes = [CPU_TYPE_X86_64, CPU_TYPE_ARM64];
    let mut img = Image::big_endian(8 + 2 * 20);
    img.u32(0, 0xcafe_babe).u32(4, 2);
    let mut offset = 0x1000usize;
    let mut placed = Vec::new();
    for (i, slice) in slices.iter().enumerate() {
        let at = 8 + i * 20;
        img.u32(at, cputypes[i])
            .u32(at + 4, if i == 0 { 3 } else { 0 })
            .u32(at + 8, offset as u32)
            .u32(at + 12, slice.len() as u32)
            .u32(at + 16, 12);
        placed.push(offset);
        offset = (offset + slice.len()).div_ceil(0x1000) * 0x1000;
    }
    let mut out = img.finish();
    for (slice, at) in slices.iter().zip(placed) {
        if out.len() < at + slice.len() {
            out.resize(at + slice.len(), 0);
        }
        out[at..at + slice.len()].copy_from_slice(slice);
    }
    out
}

/// Every fixture, labelled.
pub fn all_fixtures() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("elf64", elf64_exec()),
        ("elf32", elf32_exec()),
        ("pe32", pe32_image()),
        ("pe64", pe64_image()),
        ("macho64", macho64_exec()),
        ("fat", fat_macho()),
    ]
}
