mod common;

use anyhow::Result;
use binweave::core::binary::{Format, Permissions};
use binweave::core::view::{RelocationSpec, SectionSpec};
use binweave::{AbstractView, EditError};
use common::*;
use object::{Object, ObjectSection};

#[test]
fn unedited_images_are_identical() -> Result<()> {
    for data in [pe32_image(), pe64_image()] {
        let binary = binweave::parse(&data)?;
        assert_eq!(binary.format(), Format::PE);
        assert_eq!(binweave::build(&binary)?, data);
    }
    Ok(())
}

#[test]
fn hook_section_goes_after_the_image() -> Result<()> {
    let mut binary = binweave::parse(&pe64_image())?;
    binary.view_mut().add_section(SectionSpec::new(
        ".hook",
        Permissions::READ | Permissions::EXECUTE,
        vec![0xcc, 0xc3],
    ))?;
    let out = binweave::build(&binary)?;

    let rebuilt = binweave::parse(&out)?;
    let view = rebuilt.view();
    assert_eq!(view.sections().len(), 3);
    let hook = view.section(".hook").unwrap();
    assert_eq!(hook.address, 0x3000);
    assert_eq!(hook.file_offset, Some(0x800));
    assert!(hook.permissions.contains(Permissions::EXECUTE));
    // SizeOfImage covers the new section.
    assert_eq!(read_u32(&out, PE_OPTIONAL + 56), 0x4000);
    assert_eq!(read_u16(&out, 0x86), 3);

    let file = object::File::parse(&*out)?;
    let section = file.section_by_name(".hook").unwrap();
    assert_eq!(section.address(), 0x1_4000_3000);
    assert!(section.data()?.starts_with(&[0xcc, 0xc3]));
    Ok(())
}

#[test]
fn pe32_hook_and_entry() -> Result<()> {
    let mut binary = binweave::parse(&pe32_image())?;
    let view = binary.view_mut();
    view.add_section(SectionSpec::new(".hook", Permissions::READ | Permissions::EXECUTE, vec![0xc3; 4]))?;
    view.set_entrypoint(0x3000)?;
    let out = binweave::build(&binary)?;

    let file = object::File::parse(&*out)?;
    assert!(!file.is_64());
    assert_eq!(file.entry(), 0x40_3000);
    assert_eq!(binweave::parse(&out)?.view().entry_point(), 0x3000);
    Ok(())
}

#[test]
fn file_growth_keeps_rvas() -> Result<()> {
    let mut binary = binweave::parse(&pe64_image())?;
    binary.view_mut().set_section_content(".text", vec![0x90; 0x300])?;
    let out = binweave::build(&binary)?;

    let rebuilt = binweave::parse(&out)?;
    let view = rebuilt.view();
    let data = view.section(".data").unwrap();
    assert_eq!(data.file_offset, Some(0x800));
    assert_eq!(data.address, 0x2000);
    assert_eq!(&out[0x800..0x800 + 32], b"binweave data block 0123456789ab");
    let text = view.section(".text").unwrap();
    assert_eq!(text.size, 0x300);
    Ok(())
}

#[test]
fn symbol_edits_are_unsupported() -> Result<()> {
    let mut binary = binweave::parse(&pe64_image())?;
    let view = binary.view_mut();
    assert!(matches!(
        view.add_symbol("hook", ".text", 0),
        Err(EditError::UnsupportedEdit(_))
    ));
    assert!(matches!(view.add_library("user32.dll"), Err(EditError::UnsupportedEdit(_))));
    // Base relocations carry no symbol.
    let spec = RelocationSpec::new(".data", 8, 10).against("hook");
    assert!(matches!(view.add_relocation(spec), Err(EditError::InvalidValue(_))));
    assert_eq!(binweave::build(&binary)?, pe64_image());
    Ok(())
}

#[test]
fn relocations_need_a_directory() -> Result<()> {
    let mut binary = binweave::parse(&pe64_image())?;
    assert!(binary.view().relocations().is_empty());
    let err = binary
        .view_mut()
        .add_relocation(RelocationSpec::new(".data", 8, 10))
        .unwrap_err();
    assert!(matches!(err, EditError::UnsupportedEdit(_)));
    Ok(())
}
