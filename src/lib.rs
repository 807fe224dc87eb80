//! binweave: parse, edit and rebuild ELF, PE and Mach-O binaries.
//!
//! Each format is parsed into an object model that owns its sections,
//! segments, symbols and relocations. Edits touch only the model; a build
//! plans a new layout, rewrites every pointer field that names a moved
//! block, and emits bytes. An unedited binary rebuilds byte for byte.
//!
//! ```no_run
//! use binweave::core::binary::Permissions;
//! use binweave::core::view::SectionSpec;
//!
//! let data = std::fs::read("a.out").unwrap();
//! let mut binary = binweave::parse(&data).unwrap();
//! binary
//!     .view_mut()
//!     .add_section(SectionSpec::new(".extra", Permissions::READ, vec![0; 64]))
//!     .unwrap();
//! let out = binweave::build(&binary).unwrap();
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod formats;
pub mod io;
pub mod logging;
pub mod stream;

pub use crate::config::{BuildConfig, ParseConfig, WeaveConfig};
pub use crate::core::view::{AbstractView, Binary};
pub use crate::error::{BuildError, EditError, Error, ParseError, Result};

use rayon::prelude::*;
use std::path::Path;
use tracing::debug;

/// Batches below this size are processed on the calling thread.
const PAR_THRESHOLD: usize = 4;

/// Parse any supported container with default limits.
pub fn parse(data: &[u8]) -> std::result::Result<Binary, ParseError> {
    Binary::parse(data)
}

pub fn parse_with(data: &[u8], config: &ParseConfig) -> std::result::Result<Binary, ParseError> {
    Binary::parse_with(data, config)
}

pub fn build(binary: &Binary) -> std::result::Result<Vec<u8>, BuildError> {
    binary.build()
}

pub fn build_with(binary: &Binary, config: &BuildConfig) -> std::result::Result<Vec<u8>, BuildError> {
    binary.build_with(config)
}

/// Read and parse a file, bounded by `limits`.
pub fn parse_file<P: AsRef<Path>>(path: P, limits: &io::IoLimits, config: &ParseConfig) -> Result<Binary> {
    let data = io::read_binary(path, limits)?;
    Ok(Binary::parse_with(&data, config)?)
}

/// Build `binary` and write it to `path`.
pub fn build_file<P: AsRef<Path>>(binary: &Binary, path: P, config: &BuildConfig) -> Result<()> {
    let out = binary.build_with(config)?;
    io::write_binary(path, &out)?;
    Ok(())
}

/// Parse independent inputs in parallel. Results keep the input order.
pub fn parse_many<T>(inputs: &[T], config: &ParseConfig) -> Vec<std::result::Result<Binary, ParseError>>
where
    T: AsRef<[u8]> + Sync,
{
    debug!(count = inputs.len(), "Parsing batch");
    if inputs.len() < PAR_THRESHOLD {
        return inputs.iter().map(|d| Binary::parse_with(d.as_ref(), config)).collect();
    }
    inputs
        .par_iter()
        .map(|d| Binary::parse_with(d.as_ref(), config))
        .collect()
}

/// Build independent binaries in parallel. Results keep the input order.
pub fn build_many(binaries: &[Binary], config: &BuildConfig) -> Vec<std::result::Result<Vec<u8>, BuildError>> {
    debug!(count = binaries.len(), "Building batch");
    if binaries.len() < PAR_THRESHOLD {
        return binaries.iter().map(|b| b.build_with(config)).collect();
    }
    binaries.par_iter().map(|b| b.build_with(config)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::binary::Format;
    use crate::formats::elf::testutil::minimal_exec;
    use crate::formats::macho::testutil::minimal_fat;
    use crate::formats::pe::testutil::minimal_pe64;

    #[test]
    fn test_parse_many_keeps_order() {
        let inputs = vec![minimal_exec(), minimal_pe64(), b"junk".to_vec(), minimal_fat(), minimal_exec()];
        let parsed = parse_many(&inputs, &ParseConfig::default());
        let formats: Vec<Option<Format>> = parsed.iter().map(|r| r.as_ref().ok().map(|b| b.format())).collect();
        assert_eq!(
            formats,
            [Some(Format::ELF), Some(Format::PE), None, Some(Format::FatMachO), Some(Format::ELF)]
        );
    }

    #[test]
    fn test_build_many_round_trips() {
        let inputs = vec![minimal_exec(), minimal_pe64(), minimal_fat(), minimal_exec()];
        let binaries: Vec<Binary> = parse_many(&inputs, &ParseConfig::default())
            .into_iter()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        let built = build_many(&binaries, &BuildConfig::default());
        for (out, input) in built.into_iter().zip(&inputs) {
            assert_eq!(&out.unwrap(), input);
        }
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        let output = dir.path().join("out.bin");
        std::fs::write(&input, minimal_pe64()).unwrap();

        let binary = parse_file(&input, &io::IoLimits::default(), &ParseConfig::default()).unwrap();
        build_file(&binary, &output, &BuildConfig::default()).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), minimal_pe64());
    }
}
