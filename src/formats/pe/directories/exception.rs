//! x64 exception directory (`.pdata`)

use crate::error::ParseError;
use crate::formats::pe::directories::{rva_add, ImageView, PointerSite, STAGE};
use crate::formats::pe::types::DataDirectory;

const RUNTIME_FUNCTION_SIZE: u32 = 12;

/// Collect the begin, end and unwind-info RVAs of every `RUNTIME_FUNCTION`.
pub fn parse_exception_sites(
    view: &ImageView<'_>,
    dir: DataDirectory,
    max_entries: usize,
) -> Result<Vec<PointerSite>, ParseError> {
    let count = dir.size / RUNTIME_FUNCTION_SIZE;
    if count as usize > max_entries {
        return Err(ParseError::table(
            STAGE,
            format!("{} exception entries exceed the limit of {}", count, max_entries),
        ));
    }
    view.read(dir.virtual_address, u64::from(count * RUNTIME_FUNCTION_SIZE))?;
    let mut sites = Vec::with_capacity(count as usize * 3);
    for i in 0..count {
        let entry = rva_add(dir.virtual_address, u64::from(i * RUNTIME_FUNCTION_SIZE))?;
        for field in [0, 4, 8] {
            if view.u32(entry + field)? != 0 {
                sites.push(PointerSite::rva32(entry + field));
            }
        }
    }
    Ok(sites)
}
