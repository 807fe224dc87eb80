mod common;

use anyhow::Result;
use binweave::core::binary::{Format, Permissions};
use binweave::core::view::{SectionSpec, SegmentSpec};
use binweave::{AbstractView, EditError};
use common::*;
use object::read::macho::{FatArch, MachOFatFile32};
use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol};

#[test]
fn unedited_images_are_identical() -> Result<()> {
    for data in [macho64_exec(), macho_exec(CPU_TYPE_ARM64), fat_macho()] {
        let binary = binweave::parse(&data)?;
        assert_eq!(binweave::build(&binary)?, data);
    }
    Ok(())
}

#[test]
fn hook_section_fills_text_padding() -> Result<()> {
    let mut binary = binweave::parse(&macho64_exec())?;
    binary
        .view_mut()
        .add_section(SectionSpec::new("__hook", Permissions::READ | Permissions::EXECUTE, vec![0xc3; 4]))?;
    let once = binweave::build(&binary)?;
    assert_eq!(once.len(), MACHO_LEN);

    // The entry can only move into the section once it has an address.
    let mut rebuilt = binweave::parse(&once)?;
    rebuilt.view_mut().set_entrypoint(MACHO_TEXT_ADDR + 0x10)?;
    let out = binweave::build(&rebuilt)?;
    let rebuilt = binweave::parse(&out)?;
    let hook = rebuilt.view().section("__hook").unwrap();
    assert_eq!(hook.address, MACHO_TEXT_ADDR + 0x10);
    assert_eq!(hook.file_offset, Some(MACHO_TEXT_OFFSET + 0x10));
    assert_eq!(rebuilt.view().entry_point(), MACHO_TEXT_ADDR + 0x10);

    let file = object::File::parse(&*out)?;
    let section = file.section_by_name("__hook").unwrap();
    assert_eq!(section.address(), MACHO_TEXT_ADDR + 0x10);
    assert_eq!(section.data()?, &[0xc3; 4][..]);
    Ok(())
}

#[test]
fn added_library_takes_a_load_command() -> Result<()> {
    let mut binary = binweave::parse(&macho64_exec())?;
    binary.view_mut().add_library("/usr/lib/libz.1.dylib")?;
    let out = binweave::build(&binary)?;
    assert_eq!(out.len(), MACHO_LEN);
    assert_eq!(read_u32(&out, 16), 8);
    assert_eq!(read_u32(&out, 20), 0x1e0 + 0x30);

    let rebuilt = binweave::parse(&out)?;
    assert_eq!(
        rebuilt.view().libraries(),
        vec![LIBSYSTEM.to_string(), "/usr/lib/libz.1.dylib".to_string()]
    );
    // The undefined symbol still resolves against libSystem.
    let imports = rebuilt.view().imports();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].library, Some(LIBSYSTEM));
    Ok(())
}

#[test]
fn new_segment_pushes_linkedit() -> Result<()> {
    let mut binary = binweave::parse(&macho64_exec())?;
    binary
        .view_mut()
        .add_segment(SegmentSpec::new(Permissions::READ | Permissions::EXECUTE, vec![0xcc; 0x20]).named("__HOOK"))?;
    let out = binweave::build(&binary)?;
    assert_eq!(&out[0x1000..0x1020], &[0xcc; 0x20]);

    let rebuilt = binweave::parse(&out)?;
    let view = rebuilt.view();
    let names: Vec<Option<&str>> = view.segments().iter().map(|s| s.name).collect();
    assert_eq!(
        names,
        [Some("__PAGEZERO"), Some("__TEXT"), Some("__HOOK"), Some("__LINKEDIT")]
    );
    let hook = view.segments()[2];
    assert_eq!((hook.file_offset, hook.address), (0x1000, 0x1_0000_1000));
    let linkedit = view.segments()[3];
    assert_eq!((linkedit.file_offset, linkedit.address), (0x2000, 0x1_0000_2000));
    assert_eq!(view.exports().iter().map(|e| e.name).collect::<Vec<_>>(), ["_main"]);

    let file = object::File::parse(&*out)?;
    assert!(file.segments().any(|s| s.name().ok().flatten() == Some("__HOOK")));
    let main = file.symbols().find(|s| s.name().ok() == Some("_main")).unwrap();
    assert_eq!(main.address(), MACHO_TEXT_ADDR);
    Ok(())
}

#[test]
fn unnamed_segments_are_rejected() -> Result<()> {
    let mut binary = binweave::parse(&macho64_exec())?;
    let err = binary
        .view_mut()
        .add_segment(SegmentSpec::new(Permissions::READ, vec![0; 16]))
        .unwrap_err();
    assert!(matches!(err, EditError::InvalidValue(_)));
    Ok(())
}

#[test]
fn fat_edits_touch_the_primary_slice() -> Result<()> {
    let data = fat_macho();
    let mut binary = binweave::parse(&data)?;
    assert_eq!(binary.format(), Format::FatMachO);
    binary.view_mut().add_library("/usr/lib/libz.1.dylib")?;
    let out = binweave::build(&binary)?;
    assert_eq!(out.len(), data.len());

    let fat = MachOFatFile32::parse(&*out)?;
    let ranges: Vec<(u64, u64)> = fat.arches().iter().map(|a| a.file_range()).collect();
    assert_eq!(ranges, [(0x1000, MACHO_LEN as u64), (0x3000, MACHO_LEN as u64)]);
    // The second slice is untouched.
    assert_eq!(&out[0x3000..], &data[0x3000..]);

    let first = fat.arches()[0].data(&*out)?;
    let first = object::File::parse(first)?;
    assert_eq!(first.format(), object::BinaryFormat::MachO);
    assert_eq!(binweave::parse(fat.arches()[0].data(&*out)?)?.view().libraries().len(), 2);
    Ok(())
}

#[test]
fn grown_primary_pushes_the_next_slice() -> Result<()> {
    let mut binary = binweave::parse(&fat_macho())?;
    binary
        .view_mut()
        .add_segment(SegmentSpec::new(Permissions::READ, vec![0xcc; 0x10]).named("__HOOK"))?;
    let out = binweave::build(&binary)?;

    let fat = MachOFatFile32::parse(&*out)?;
    let arches = fat.arches();
    assert_eq!(arches[0].offset(), 0x1000);
    assert_eq!(arches[0].size(), 0x2030);
    assert_eq!(arches[1].offset(), 0x4000);
    assert_eq!(arches[1].data(&*out)?, &macho_exec(CPU_TYPE_ARM64)[..]);
    assert_eq!(binweave::build(&binweave::parse(&out)?)?, out);
    Ok(())
}
