//! Load command table
//!
//! Commands the model understands are decoded into [`CommandKind`]
//! variants; every command also keeps the bytes it was read from so that
//! fields the model does not own serialize back untouched.

use crate::config::ParseConfig;
use crate::core::arena::Id;
use crate::core::binary::Endianness;
use crate::core::layout::align_up;
use crate::error::{ParseError, ParseStage};
use crate::formats::macho::segments::SegmentId;
use crate::formats::macho::types::*;
use crate::stream::{ByteStream, ByteWriter, StageExt};

const STAGE: ParseStage = ParseStage::LoadCommands;
const MAX_PATH: u64 = 4096;

pub type CommandId = Id<LoadCommand>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Segment(SegmentId),
    Symtab,
    Dysymtab,
    DyldInfo,
    LinkeditData,
    Dylib { name: String },
    Rpath { path: String },
    Main,
    Thread,
    /// Any other command, carried as bytes.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCommand {
    pub cmd: u32,
    pub kind: CommandKind,
    /// Command bytes, including `cmd` and `cmdsize`. Segment commands are
    /// regenerated from the model; those created by edits have none.
    pub(crate) raw: Vec<u8>,
    /// Offset from the start of the image at parse time.
    pub(crate) original_offset: Option<u64>,
}

impl LoadCommand {
    pub fn size(&self) -> u64 {
        self.raw.len() as u64
    }

    pub fn is_dylib_load(&self) -> bool {
        matches!(self.kind, CommandKind::Dylib { .. }) && self.cmd != LC_ID_DYLIB
    }
}

/// A command as found in the table.
#[derive(Debug, Clone, Copy)]
pub struct RawCommand<'a> {
    pub offset: u64,
    pub cmd: u32,
    pub data: &'a [u8],
}

/// Walk `ncmds` commands following the header.
pub fn parse_load_commands<'a>(
    stream: &ByteStream<'a>,
    header: &MachHeader,
    config: &ParseConfig,
) -> Result<Vec<RawCommand<'a>>, ParseError> {
    if header.ncmds as usize > config.max_load_commands {
        return Err(ParseError::table(
            STAGE,
            format!("{} load commands exceed the limit of {}", header.ncmds, config.max_load_commands),
        ));
    }
    let start = header.size();
    let table = stream.slice(start, u64::from(header.sizeofcmds)).stage(STAGE)?;
    let e = header.endian;

    let mut commands = Vec::with_capacity(header.ncmds as usize);
    let mut at = 0u64;
    for i in 0..header.ncmds {
        let cmd = table.read_u32(at, e).stage(STAGE)?;
        let size = u64::from(table.read_u32(at + 4, e).stage(STAGE)?);
        if size < LOAD_COMMAND_HEADER_SIZE || size % 4 != 0 {
            return Err(ParseError::table(
                STAGE,
                format!("load command {} ({:#x}) has size {:#x}", i, cmd, size),
            ));
        }
        let data = table.read(at, size).stage(STAGE)?;
        commands.push(RawCommand {
            offset: start + at,
            cmd,
            data,
        });
        at += size;
    }
    Ok(commands)
}

/// Read a `lc_str` whose offset is stored at `field` within the command.
pub fn command_string(data: &[u8], field: u64, endian: Endianness) -> Result<String, ParseError> {
    let stream = ByteStream::new(data);
    let offset = u64::from(stream.read_u32(field, endian).stage(STAGE)?);
    if offset >= data.len() as u64 {
        return Err(ParseError::table(STAGE, format!("string offset {:#x} outside command", offset)));
    }
    let bytes = stream.read_cstr(offset, MAX_PATH).stage(STAGE)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// A command carrying a string after `fixed` bytes of fields, padded to the
/// pointer size.
fn string_command(cmd: u32, fixed: u64, text: &str, header: &MachHeader) -> ByteWriter {
    let size = align_up(fixed + text.len() as u64 + 1, header.word_size());
    let mut out = ByteWriter::new();
    out.resize(size);
    out.write_u32(0, cmd, header.endian);
    out.write_u32(4, size as u32, header.endian);
    out.write_u32(8, fixed as u32, header.endian);
    out.write_bytes(fixed, text.as_bytes());
    out
}

/// `dylib_command` for `name`.
pub fn dylib_command(cmd: u32, name: &str, current: u32, compat: u32, header: &MachHeader) -> Vec<u8> {
    let mut out = string_command(cmd, DYLIB_COMMAND_SIZE, name, header);
    // Timestamp 2 is what linkers write for load commands.
    out.write_u32(12, 2, header.endian);
    out.write_u32(16, current, header.endian);
    out.write_u32(20, compat, header.endian);
    out.into_inner()
}

pub fn rpath_command(path: &str, header: &MachHeader) -> Vec<u8> {
    string_command(LC_RPATH, RPATH_COMMAND_SIZE, path, header).into_inner()
}

/// Offset/size field pairs within a command that locate linkedit data,
/// as (offset field, size or count field, entry size).
pub fn data_fields(cmd: u32, header: &MachHeader) -> Vec<(u64, u64, u64)> {
    match cmd {
        LC_SYMTAB => vec![(8, 12, header.nlist_size()), (16, 20, 1)],
        LC_DYSYMTAB => {
            let modtab = if header.is_64 { 56 } else { 52 };
            vec![
                (32, 36, 8),
                (40, 44, modtab),
                (48, 52, 4),
                (56, 60, 4),
                (64, 68, RELOCATION_INFO_SIZE),
                (72, 76, RELOCATION_INFO_SIZE),
            ]
        }
        LC_DYLD_INFO | LC_DYLD_INFO_ONLY => vec![(8, 12, 1), (16, 20, 1), (24, 28, 1), (32, 36, 1), (40, 44, 1)],
        c if LINKEDIT_DATA_COMMANDS.contains(&c) => vec![(8, 12, 1)],
        _ => Vec::new(),
    }
}

/// Offset of the thread entry register within an `LC_UNIXTHREAD`, and its
/// width, for the thread-state flavors we know.
pub fn thread_pc_field(cputype: u32, flavor: u32) -> Option<(u64, u64)> {
    const STATE: u64 = 16;
    match (cputype, flavor) {
        // x86_THREAD_STATE64: rip follows 16 general registers.
        (CPU_TYPE_X86_64, 4) => Some((STATE + 16 * 8, 8)),
        // ARM_THREAD_STATE64: x0-x28, fp, lr, sp, then pc.
        (CPU_TYPE_ARM64, 6) => Some((STATE + 32 * 8, 8)),
        // i386_THREAD_STATE: eip is the eleventh register.
        (CPU_TYPE_X86, 1) => Some((STATE + 10 * 4, 4)),
        // ARM_THREAD_STATE: r0-r12, sp, lr, then pc.
        (CPU_TYPE_ARM, 1) => Some((STATE + 15 * 4, 4)),
        _ => None,
    }
}
