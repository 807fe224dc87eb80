//! Bounded file access for reading inputs and writing rebuilt images.
//!
//! Inputs are memory-mapped and copied into a reference-counted [`Bytes`]
//! buffer once the size check passes, so the parser works on an immutable
//! in-memory image and the file can be replaced underneath without
//! invalidating it. Outputs are written through a temporary sibling and
//! renamed into place.

pub mod error;

use crate::io::error::{IoError, Result};
use bytes::Bytes;
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Defines the resource limits for reading inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoLimits {
    /// The absolute maximum file size that can be opened.
    pub max_file_size: u64,
}

impl Default for IoLimits {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024 * 1024, // 1GB
        }
    }
}

/// Read a whole binary into memory, refusing files above `limits.max_file_size`.
pub fn read_binary<P: AsRef<Path>>(path: P, limits: &IoLimits) -> Result<Bytes> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();

    debug!(
        path = %path.display(),
        size = file_size,
        limits.max_file_size = limits.max_file_size,
        "Opening binary"
    );

    if file_size > limits.max_file_size {
        warn!(
            path = %path.display(),
            size = file_size,
            limit = limits.max_file_size,
            "File is too large"
        );
        return Err(IoError::FileTooLarge {
            limit: limits.max_file_size,
            found: file_size,
        });
    }
    // memmap cannot map empty files.
    if file_size == 0 {
        return Err(IoError::Empty(path.display().to_string()));
    }

    // Safety: read-only map of a regular file; the bytes are copied out before
    // the map is dropped.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(Bytes::copy_from_slice(&mmap[..]))
}

/// Write `bytes` to `path`, replacing any existing file atomically.
pub fn write_binary<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".binweave-tmp");
    let tmp = Path::new(&tmp_name);

    {
        let mut out = File::create(tmp)?;
        out.write_all(bytes)?;
        out.sync_all()?;
    }
    copy_permissions(path, tmp);
    fs::rename(tmp, path)?;
    debug!(path = %path.display(), size = bytes.len(), "Wrote binary");
    Ok(())
}

/// Keep the executable bit of a file being replaced.
fn copy_permissions(from: &Path, to: &Path) {
    if let Ok(meta) = fs::metadata(from) {
        if let Err(e) = fs::set_permissions(to, meta.permissions()) {
            warn!(path = %to.display(), error = %e, "Could not copy permissions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_file(content: &[u8]) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content).unwrap();
        temp_file
    }

    #[test]
    fn read_file_successfully() {
        let file = create_temp_file(b"\x7fELF hello");
        let data = read_binary(file.path(), &IoLimits::default()).unwrap();
        assert_eq!(&data[..], b"\x7fELF hello");
    }

    #[test]
    fn read_file_too_large() {
        let file = create_temp_file(&[0; 100]);
        let limits = IoLimits { max_file_size: 50 };
        let result = read_binary(file.path(), &limits);
        assert!(matches!(result, Err(IoError::FileTooLarge { found: 100, .. })));
    }

    #[test]
    fn read_empty_file_is_an_error() {
        let file = create_temp_file(b"");
        assert!(matches!(
            read_binary(file.path(), &IoLimits::default()),
            Err(IoError::Empty(_))
        ));
    }

    #[test]
    fn write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        write_binary(&path, b"first").unwrap();
        write_binary(&path, b"second").unwrap();
        let data = read_binary(&path, &IoLimits::default()).unwrap();
        assert_eq!(&data[..], b"second");
        assert!(!dir.path().join("out.bin.binweave-tmp").exists());
    }
}
