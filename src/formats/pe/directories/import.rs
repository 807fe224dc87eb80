//! Import and delay-import tables

use crate::error::ParseError;
use crate::formats::pe::directories::{rva_add, ImageView, PointerSite};
use crate::formats::pe::types::DataDirectory;

const DESCRIPTOR_SIZE: u64 = 20;
const DELAY_DESCRIPTOR_SIZE: u64 = 32;
const MAX_NAME: u64 = 256;

/// One imported function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeImport {
    pub library: String,
    pub name: Option<String>,
    pub ordinal: Option<u16>,
    pub hint: Option<u16>,
    /// RVA of the address table slot the loader fills in.
    pub iat_rva: u32,
    pub delayed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImportTable {
    pub imports: Vec<PeImport>,
    /// Imported libraries in descriptor order.
    pub libraries: Vec<String>,
    pub(crate) sites: Vec<PointerSite>,
}

impl ImportTable {
    pub fn count(&self) -> usize {
        self.imports.len()
    }

    pub fn has_import(&self, name: &str) -> bool {
        self.imports.iter().any(|i| i.name.as_deref() == Some(name))
    }

    pub fn imports_from(&self, library: &str) -> impl Iterator<Item = &PeImport> + '_ {
        let library = library.to_ascii_lowercase();
        self.imports
            .iter()
            .filter(move |i| i.library.to_ascii_lowercase() == library)
    }

    /// MD5 over the sorted `library.function` pairs of named imports.
    pub fn import_hash(&self) -> String {
        let mut entries: Vec<String> = self
            .imports
            .iter()
            .filter_map(|i| {
                let name = i.name.as_ref()?;
                Some(format!(
                    "{}.{}",
                    i.library.to_ascii_lowercase(),
                    name.to_ascii_lowercase()
                ))
            })
            .collect();
        entries.sort();
        let joined = entries.join(",");
        format!("{:032x}", md5::compute(joined.as_bytes()))
    }
}

fn ordinal_flag(wide: bool) -> u64 {
    if wide {
        1u64 << 63
    } else {
        1u64 << 31
    }
}

/// Walk the import descriptors of `dir`.
pub fn parse_imports(
    view: &ImageView<'_>,
    dir: DataDirectory,
    wide: bool,
    max_imports: usize,
) -> Result<ImportTable, ParseError> {
    let mut table = ImportTable::default();
    let mut at = dir.virtual_address;
    loop {
        let raw = view.read(at, DESCRIPTOR_SIZE)?;
        if raw.iter().all(|&b| b == 0) {
            break;
        }
        let original_first_thunk = view.u32(at)?;
        let time_date_stamp = view.u32(at + 4)?;
        let name_rva = view.u32(at + 12)?;
        let first_thunk = view.u32(at + 16)?;

        if name_rva != 0 {
            let library = view.cstr(name_rva, MAX_NAME)?;
            table.sites.push(PointerSite::rva32(at + 12));
            if original_first_thunk != 0 {
                table.sites.push(PointerSite::rva32(at));
            }
            if first_thunk != 0 {
                table.sites.push(PointerSite::rva32(at + 16));
            }
            let bound = time_date_stamp != 0;
            parse_thunks(
                view,
                &library,
                original_first_thunk,
                first_thunk,
                wide,
                bound,
                max_imports,
                &mut table,
            )?;
            table.libraries.push(library);
        }

        if table.imports.len() >= max_imports {
            break;
        }
        at = rva_add(at, DESCRIPTOR_SIZE)?;
    }
    Ok(table)
}

#[allow(clippy::too_many_arguments)]
fn parse_thunks(
    view: &ImageView<'_>,
    library: &str,
    original_first_thunk: u32,
    first_thunk: u32,
    wide: bool,
    bound: bool,
    max_imports: usize,
    table: &mut ImportTable,
) -> Result<(), ParseError> {
    // Prefer the lookup table; the address table may already be bound.
    let lookup = if original_first_thunk != 0 {
        original_first_thunk
    } else {
        first_thunk
    };
    if lookup == 0 {
        return Ok(());
    }
    let entry_size = if wide { 8u32 } else { 4 };
    let mut index = 0u32;
    while table.imports.len() < max_imports {
        let step = u64::from(index) * u64::from(entry_size);
        let slot = rva_add(lookup, step)?;
        let value = view.word(slot, wide)?;
        if value == 0 {
            break;
        }
        let iat_rva = if first_thunk != 0 { rva_add(first_thunk, step)? } else { 0 };

        let (name, ordinal, hint) = if value & ordinal_flag(wide) != 0 {
            (None, Some((value & 0xFFFF) as u16), None)
        } else {
            let hint_rva = (value & 0x7FFF_FFFF) as u32;
            let hint = view.u16(hint_rva)?;
            let name = view.cstr(rva_add(hint_rva, 2)?, MAX_NAME)?;
            table.sites.push(PointerSite::rva_word(slot, wide));
            // An unbound address table repeats the lookup entry.
            if !bound && iat_rva != 0 && iat_rva != slot && view.word(iat_rva, wide)? == value {
                table.sites.push(PointerSite::rva_word(iat_rva, wide));
            }
            (Some(name), None, Some(hint))
        };

        table.imports.push(PeImport {
            library: library.to_string(),
            name,
            ordinal,
            hint,
            iat_rva,
            delayed: false,
        });
        index += 1;
    }
    Ok(())
}

/// Walk the delay-load descriptors of `dir` into `table`.
pub fn parse_delay_imports(
    view: &ImageView<'_>,
    dir: DataDirectory,
    wide: bool,
    image_base: u64,
    max_imports: usize,
    table: &mut ImportTable,
) -> Result<(), ParseError> {
    let mut at = dir.virtual_address;
    loop {
        let raw = view.read(at, DELAY_DESCRIPTOR_SIZE)?;
        if raw.iter().all(|&b| b == 0) {
            break;
        }
        let attributes = view.u32(at)?;
        // Version 1 descriptors hold RVAs; older ones hold VAs.
        let rva_based = attributes & 1 != 0;
        let to_rva = |value: u32| -> u32 {
            if rva_based {
                value
            } else {
                (u64::from(value).wrapping_sub(image_base)) as u32
            }
        };
        let name_rva = to_rva(view.u32(at + 4)?);
        let iat = to_rva(view.u32(at + 12)?);
        let int = to_rva(view.u32(at + 16)?);
        if rva_based {
            for field in (4..28).step_by(4) {
                if view.u32(at + field)? != 0 {
                    table.sites.push(PointerSite::rva32(at + field));
                }
            }
        }

        if name_rva != 0 && int != 0 {
            let library = view.cstr(name_rva, MAX_NAME)?;
            let entry_size = if wide { 8u32 } else { 4 };
            let mut index = 0u32;
            while table.imports.len() < max_imports {
                let step = u64::from(index) * u64::from(entry_size);
                let slot = rva_add(int, step)?;
                let value = view.word(slot, wide)?;
                if value == 0 {
                    break;
                }
                let (name, ordinal, hint) = if value & ordinal_flag(wide) != 0 {
                    (None, Some((value & 0xFFFF) as u16), None)
                } else {
                    let hint_rva = to_rva((value & 0x7FFF_FFFF) as u32);
                    if rva_based {
                        table.sites.push(PointerSite::rva_word(slot, wide));
                    }
                    (
                        Some(view.cstr(rva_add(hint_rva, 2)?, MAX_NAME)?),
                        None,
                        Some(view.u16(hint_rva)?),
                    )
                };
                table.imports.push(PeImport {
                    library: library.clone(),
                    name,
                    ordinal,
                    hint,
                    iat_rva: if iat != 0 { rva_add(iat, step)? } else { 0 },
                    delayed: true,
                });
                index += 1;
            }
            table.libraries.push(library);
        }

        if table.imports.len() >= max_imports {
            break;
        }
        at = rva_add(at, DELAY_DESCRIPTOR_SIZE)?;
    }
    Ok(())
}
