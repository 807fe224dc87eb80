//! Debug directory

use crate::error::ParseError;
use crate::formats::pe::directories::{rva_add, ImageView, PointerSite, STAGE};
use crate::formats::pe::types::DataDirectory;

const DEBUG_ENTRY_SIZE: u32 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugEntry {
    pub debug_type: u32,
    pub size_of_data: u32,
    pub address_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
}

/// Decode debug entries and the RVA and file-offset fields they carry.
pub fn parse_debug_directory(
    view: &ImageView<'_>,
    dir: DataDirectory,
    max_entries: usize,
) -> Result<(Vec<DebugEntry>, Vec<PointerSite>), ParseError> {
    let count = dir.size / DEBUG_ENTRY_SIZE;
    if count as usize > max_entries {
        return Err(ParseError::table(
            STAGE,
            format!("{} debug entries exceed the limit of {}", count, max_entries),
        ));
    }
    let mut entries = Vec::with_capacity(count as usize);
    let mut sites = Vec::new();
    for i in 0..count {
        let at = rva_add(dir.virtual_address, u64::from(i * DEBUG_ENTRY_SIZE))?;
        let entry = DebugEntry {
            debug_type: view.u32(at + 12)?,
            size_of_data: view.u32(at + 16)?,
            address_of_raw_data: view.u32(at + 20)?,
            pointer_to_raw_data: view.u32(at + 24)?,
        };
        if entry.address_of_raw_data != 0 {
            sites.push(PointerSite::rva32(at + 20));
        }
        if entry.pointer_to_raw_data != 0 {
            sites.push(PointerSite::file_offset(at + 24));
        }
        entries.push(entry);
    }
    Ok((entries, sites))
}
