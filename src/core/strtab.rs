//! NUL-terminated string pools (`.strtab`, `.dynstr`, `.shstrtab`, Mach-O
//! string tables).
//!
//! A table keeps its original bytes verbatim. Interning only ever appends, so
//! every offset handed out at parse time stays valid and an untouched table
//! serializes to exactly what was read.

use memchr::memmem;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StringTable {
    bytes: Vec<u8>,
    appended: bool,
}

impl StringTable {
    pub fn new() -> Self {
        // Offset 0 is the empty string in every format we handle.
        Self {
            bytes: vec![0],
            appended: false,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            appended: false,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether anything was interned since the table was read.
    pub fn is_modified(&self) -> bool {
        self.appended
    }

    /// Raw bytes of the string starting at `offset`, without the terminator.
    pub fn get_bytes(&self, offset: u32) -> Option<&[u8]> {
        let tail = self.bytes.get(offset as usize..)?;
        let end = memchr::memchr(0, tail).unwrap_or(tail.len());
        Some(&tail[..end])
    }

    /// String at `offset`, lossily decoded.
    pub fn get(&self, offset: u32) -> Option<String> {
        self.get_bytes(offset)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Offset of an existing occurrence of `name`, including suffix matches
    /// inside a longer string.
    pub fn offset_of(&self, name: &str) -> Option<u32> {
        if name.is_empty() {
            return memchr::memchr(0, &self.bytes).map(|p| p as u32);
        }
        let mut needle = Vec::with_capacity(name.len() + 1);
        needle.extend_from_slice(name.as_bytes());
        needle.push(0);
        memmem::find(&self.bytes, &needle).map(|p| p as u32)
    }

    /// Offset of `name`, appending it if the table does not contain it yet.
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(offset) = self.offset_of(name) {
            return offset;
        }
        if self.bytes.last().is_some_and(|&b| b != 0) {
            // Unterminated tail; never let a new string merge with it.
            self.bytes.push(0);
        }
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(name.as_bytes());
        self.bytes.push(0);
        self.appended = true;
        offset
    }
}
