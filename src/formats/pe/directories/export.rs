//! Export directory

use crate::error::ParseError;
use crate::formats::pe::directories::{rva_add, ImageView, PointerSite, STAGE};
use crate::formats::pe::types::DataDirectory;

const MAX_NAME: u64 = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeExport {
    pub name: Option<String>,
    pub ordinal: u32,
    pub rva: u32,
    /// `DLL.Function` when the entry forwards to another module.
    pub forwarder: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    pub dll_name: Option<String>,
    pub ordinal_base: u32,
    pub exports: Vec<PeExport>,
    pub(crate) sites: Vec<PointerSite>,
}

impl ExportTable {
    pub fn get_by_name(&self, name: &str) -> Option<&PeExport> {
        self.exports.iter().find(|e| e.name.as_deref() == Some(name))
    }

    pub fn get_by_ordinal(&self, ordinal: u32) -> Option<&PeExport> {
        self.exports.iter().find(|e| e.ordinal == ordinal)
    }

    pub fn count(&self) -> usize {
        self.exports.len()
    }

    pub fn named_count(&self) -> usize {
        self.exports.iter().filter(|e| e.name.is_some()).count()
    }
}

/// Decode the export directory described by `dir`.
pub fn parse_exports(view: &ImageView<'_>, dir: DataDirectory, max_exports: usize) -> Result<ExportTable, ParseError> {
    let base = dir.virtual_address;
    view.read(base, 40)?;
    let name_rva = view.u32(base + 12)?;
    let ordinal_base = view.u32(base + 16)?;
    let number_of_functions = view.u32(base + 20)? as usize;
    let number_of_names = view.u32(base + 24)? as usize;
    let functions_rva = view.u32(base + 28)?;
    let names_rva = view.u32(base + 32)?;
    let ordinals_rva = view.u32(base + 36)?;

    if number_of_functions > max_exports || number_of_names > max_exports {
        return Err(ParseError::table(
            STAGE,
            format!(
                "{} exports exceed the limit of {}",
                number_of_functions.max(number_of_names),
                max_exports
            ),
        ));
    }

    let mut table = ExportTable {
        ordinal_base,
        ..ExportTable::default()
    };
    for (field, value) in [(12, name_rva), (28, functions_rva), (32, names_rva), (36, ordinals_rva)] {
        if value != 0 {
            table.sites.push(PointerSite::rva32(base + field));
        }
    }
    if name_rva != 0 {
        table.dll_name = Some(view.cstr(name_rva, MAX_NAME)?);
    }

    let in_directory = |rva: u32| {
        u64::from(rva) >= u64::from(base) && u64::from(rva) < u64::from(base) + u64::from(dir.size)
    };

    let mut addresses = Vec::with_capacity(number_of_functions);
    for i in 0..number_of_functions as u64 {
        let slot = rva_add(functions_rva, i * 4)?;
        let rva = view.u32(slot)?;
        if rva != 0 {
            table.sites.push(PointerSite::rva32(slot));
        }
        addresses.push(rva);
    }

    let mut names: Vec<Option<String>> = vec![None; number_of_functions];
    for i in 0..number_of_names as u64 {
        let name_slot = rva_add(names_rva, i * 4)?;
        let name_ptr = view.u32(name_slot)?;
        let index = usize::from(view.u16(rva_add(ordinals_rva, i * 2)?)?);
        table.sites.push(PointerSite::rva32(name_slot));
        let name = view.cstr(name_ptr, MAX_NAME)?;
        if let Some(slot) = names.get_mut(index) {
            *slot = Some(name);
        }
    }

    for (i, (rva, name)) in addresses.into_iter().zip(names).enumerate() {
        if rva == 0 {
            continue;
        }
        let forwarder = if in_directory(rva) {
            Some(view.cstr(rva, MAX_NAME)?)
        } else {
            None
        };
        table.exports.push(PeExport {
            name,
            ordinal: ordinal_base.wrapping_add(i as u32),
            rva,
            forwarder,
        });
    }
    Ok(table)
}
