//! Resource tree walk
//!
//! Offsets inside the tree are relative to the directory and survive a
//! move; only the data entries hold RVAs.

use crate::error::ParseError;
use crate::formats::pe::directories::{rva_add, ImageView, PointerSite, STAGE};
use crate::formats::pe::types::DataDirectory;
use std::collections::HashSet;

const SUBDIRECTORY: u32 = 0x8000_0000;

/// Collect the `OffsetToData` field of every resource data entry.
pub fn parse_resource_sites(
    view: &ImageView<'_>,
    dir: DataDirectory,
    max_depth: usize,
    max_entries: usize,
) -> Result<Vec<PointerSite>, ParseError> {
    let mut sites = Vec::new();
    let mut seen = HashSet::new();
    walk(view, dir.virtual_address, 0, 0, max_depth, max_entries, &mut seen, &mut sites)?;
    Ok(sites)
}

#[allow(clippy::too_many_arguments)]
fn walk(
    view: &ImageView<'_>,
    base: u32,
    table: u32,
    depth: usize,
    max_depth: usize,
    max_entries: usize,
    seen: &mut HashSet<u32>,
    sites: &mut Vec<PointerSite>,
) -> Result<(), ParseError> {
    if depth > max_depth {
        return Err(ParseError::table(STAGE, format!("resource tree deeper than {}", max_depth)));
    }
    // Loops in a hostile tree would never terminate.
    if !seen.insert(table) {
        return Err(ParseError::table(STAGE, format!("resource table {:#x} is revisited", table)));
    }
    let at = rva_add(base, u64::from(table))?;
    let named = u32::from(view.u16(at + 12)?);
    let ids = u32::from(view.u16(at + 14)?);
    for i in 0..named + ids {
        if sites.len() >= max_entries {
            return Err(ParseError::table(STAGE, format!("more than {} resources", max_entries)));
        }
        let entry = rva_add(at, 16 + u64::from(i) * 8)?;
        let target = view.u32(entry + 4)?;
        if target & SUBDIRECTORY != 0 {
            walk(view, base, target & !SUBDIRECTORY, depth + 1, max_depth, max_entries, seen, sites)?;
        } else {
            let data_entry = rva_add(base, u64::from(target))?;
            view.read(data_entry, 16)?;
            if view.u32(data_entry)? != 0 {
                sites.push(PointerSite::rva32(data_entry));
            }
        }
    }
    Ok(())
}
