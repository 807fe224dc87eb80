//! Universal (fat) Mach-O containers.

use crate::config::{BuildConfig, ParseConfig};
use crate::core::layout::align_up;
use crate::error::{BuildError, ParseError, ParseStage};
use crate::formats::macho::headers::{encode_fat_header, parse_fat_header};
use crate::formats::macho::types::{FatArch, FAT_ARCH_SIZE, FAT_HEADER_SIZE};
use crate::formats::macho::MachOBinary;
use crate::stream::{ByteStream, ByteWriter, StageExt};
use bytes::Bytes;
use tracing::{debug, info};

/// One architecture of a universal binary.
#[derive(Debug, Clone)]
pub struct FatSlice {
    /// Table entry as read. `offset` and `size` are recomputed on build.
    pub arch: FatArch,
    pub binary: MachOBinary,
}

#[derive(Debug, Clone)]
pub struct FatBinary {
    slices: Vec<FatSlice>,
    original: Bytes,
}

impl FatBinary {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        Self::parse_with(data, &ParseConfig::default())
    }

    pub fn parse_with(data: &[u8], config: &ParseConfig) -> Result<Self, ParseError> {
        let stream = ByteStream::new(data);
        let arches = parse_fat_header(&stream, config.max_fat_arches)?;
        debug!(count = arches.len(), "Parsing fat Mach-O");
        let mut slices = Vec::with_capacity(arches.len());
        for arch in arches {
            let bytes = stream
                .read(u64::from(arch.offset), u64::from(arch.size))
                .stage(ParseStage::FatHeader)?;
            let binary = MachOBinary::parse_with(bytes, config)?;
            slices.push(FatSlice { arch, binary });
        }
        Ok(Self {
            slices,
            original: Bytes::copy_from_slice(data),
        })
    }

    pub fn slices(&self) -> &[FatSlice] {
        &self.slices
    }

    pub fn slices_mut(&mut self) -> &mut [FatSlice] {
        &mut self.slices
    }

    /// The first slice. Parsing rejects empty tables, so there always is one.
    pub fn primary(&self) -> &MachOBinary {
        &self.slices[0].binary
    }

    pub fn primary_mut(&mut self) -> &mut MachOBinary {
        &mut self.slices[0].binary
    }

    /// First slice for `cputype`.
    pub fn slice(&self, cputype: u32) -> Option<&FatSlice> {
        self.slices.iter().find(|s| s.arch.cputype == cputype)
    }

    pub fn slice_mut(&mut self, cputype: u32) -> Option<&mut FatSlice> {
        self.slices.iter_mut().find(|s| s.arch.cputype == cputype)
    }

    /// Slice warnings, prefixed with the slice's CPU type.
    pub fn warnings(&self) -> Vec<String> {
        self.slices
            .iter()
            .flat_map(|s| {
                s.binary
                    .warnings()
                    .iter()
                    .map(move |w| format!("cputype {:#x}: {}", s.arch.cputype, w))
            })
            .collect()
    }

    pub fn build(&self) -> Result<Vec<u8>, BuildError> {
        self.build_with(&BuildConfig::default())
    }

    /// Rebuild every slice and lay them out behind a fresh `fat_arch` table.
    /// Slices keep their offset unless an earlier slice grew into it.
    pub fn build_with(&self, config: &BuildConfig) -> Result<Vec<u8>, BuildError> {
        let built = self
            .slices
            .iter()
            .map(|s| s.binary.build_with(config))
            .collect::<Result<Vec<_>, _>>()?;

        let unchanged = self.slices.iter().zip(&built).all(|(s, bytes)| {
            let start = s.arch.offset as usize;
            self.original.get(start..start + s.arch.size as usize) == Some(bytes.as_slice())
        });
        if unchanged {
            debug!("fat layout unchanged");
            return Ok(self.original.to_vec());
        }

        let mut arches = Vec::with_capacity(built.len());
        let mut end = FAT_HEADER_SIZE + built.len() as u64 * FAT_ARCH_SIZE;
        for (slice, bytes) in self.slices.iter().zip(&built) {
            let offset = u64::from(slice.arch.offset).max(align_up(end, 1u64 << slice.arch.align));
            let size = bytes.len() as u64;
            let to_u32 = |what: &str, value: u64| {
                u32::try_from(value).map_err(|_| BuildError::LayoutOverflow {
                    what: what.to_string(),
                    value,
                    limit: u64::from(u32::MAX),
                })
            };
            arches.push(FatArch {
                offset: to_u32("fat slice offset", offset)?,
                size: to_u32("fat slice size", size)?,
                ..slice.arch
            });
            end = offset + size;
        }
        info!(slices = arches.len(), file_size = end, "fat layout changed");

        let mut out = ByteWriter::new();
        out.resize(end);
        out.fill(0..end, config.fill_byte);
        encode_fat_header(&mut out, &arches);
        for (arch, bytes) in arches.iter().zip(&built) {
            out.write_bytes(u64::from(arch.offset), bytes);
        }
        Ok(out.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::macho::testutil::*;
    use crate::formats::macho::types::{CPU_TYPE_ARM64, CPU_TYPE_X86_64};

    #[test]
    fn test_parse_slices() {
        let fat = FatBinary::parse(&minimal_fat()).unwrap();
        assert_eq!(fat.slices().len(), 2);
        assert_eq!(fat.slices()[0].arch.offset, 0x1000);
        assert_eq!(fat.slices()[1].arch.offset, 0x4000);
        assert!(fat.slices()[1].binary.is_object());
        assert_eq!(fat.slice(CPU_TYPE_X86_64).unwrap().arch.size as u64, EXEC_LEN);
        assert!(fat.slice(CPU_TYPE_ARM64).is_none());
        assert!(fat.warnings().is_empty());
    }

    #[test]
    fn test_unedited_build_is_identity() {
        let data = minimal_fat();
        assert_eq!(FatBinary::parse(&data).unwrap().build().unwrap(), data);
    }

    #[test]
    fn test_grown_slice_pushes_the_next_one() {
        let mut fat = FatBinary::parse(&minimal_fat()).unwrap();
        let exec = &mut fat.slices_mut()[0].binary;
        let seg = exec.segment_by_name("__TEXT").unwrap();
        exec.add_segment(crate::formats::macho::NewMachSegment::new(
            "__HOOK",
            crate::core::binary::Permissions::READ,
            vec![0xcc; 0x10],
        ))
        .unwrap();
        assert!(exec.segment(seg).is_some());

        let out = fat.build().unwrap();
        let rebuilt = FatBinary::parse(&out).unwrap();
        let slices = rebuilt.slices();
        assert_eq!(slices[0].arch.offset, 0x1000);
        assert_eq!(slices[0].arch.size, 0x3058);
        // 0x1000 + 0x3058 rounds up to the next page.
        assert_eq!(slices[1].arch.offset, 0x5000);
        assert_eq!(slices[1].arch.size as u64, OBJECT_LEN);
        assert!(slices[0].binary.segment_by_name("__HOOK").is_some());
        assert_eq!(out, rebuilt.build().unwrap());
    }

    #[test]
    fn test_bad_slice_fails_the_parse() {
        let mut data = minimal_fat();
        data[0x1000..0x1004].copy_from_slice(&[0, 0, 0, 0]);
        assert!(FatBinary::parse(&data).is_err());
        assert!(FatBinary::parse(&data[..0x20]).is_err());
    }
}
