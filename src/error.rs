//! Error types for binweave.
//!
//! Every failure falls into one of three families, matching the three phases
//! of a rewrite: reading an image ([`ParseError`]), mutating the object model
//! ([`EditError`]) and serializing it again ([`BuildError`]). [`Error`] wraps
//! all of them plus file I/O for callers that don't care about the phase.

use std::fmt;
use thiserror::Error;

/// The part of a container a parser was decoding when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseStage {
    Detect,
    Header,
    ProgramHeaders,
    SectionHeaders,
    LoadCommands,
    Symbols,
    Strings,
    Relocations,
    Dynamic,
    Directories,
    FatHeader,
}

impl fmt::Display for ParseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseStage::Detect => "format detection",
            ParseStage::Header => "file header",
            ParseStage::ProgramHeaders => "program headers",
            ParseStage::SectionHeaders => "section headers",
            ParseStage::LoadCommands => "load commands",
            ParseStage::Symbols => "symbol table",
            ParseStage::Strings => "string table",
            ParseStage::Relocations => "relocations",
            ParseStage::Dynamic => "dynamic table",
            ParseStage::Directories => "data directories",
            ParseStage::FatHeader => "fat header",
        };
        f.write_str(name)
    }
}

/// Errors raised while decoding an input image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The input is not one of the supported containers.
    #[error("Unsupported variant: {0}")]
    UnsupportedVariant(String),

    #[error("Malformed {stage}: {message}")]
    MalformedHeader { stage: ParseStage, message: String },

    #[error("Malformed {stage}: {message}")]
    MalformedTable { stage: ParseStage, message: String },

    /// A read ran past the end of the input.
    #[error("Truncated {stage}: need {needed} bytes at {offset:#x}")]
    TruncatedData {
        stage: ParseStage,
        offset: u64,
        needed: u64,
    },
}

impl ParseError {
    pub fn header(stage: ParseStage, message: impl Into<String>) -> Self {
        ParseError::MalformedHeader {
            stage,
            message: message.into(),
        }
    }

    pub fn table(stage: ParseStage, message: impl Into<String>) -> Self {
        ParseError::MalformedTable {
            stage,
            message: message.into(),
        }
    }

    /// Stage at which the error was raised, if any.
    pub fn stage(&self) -> Option<ParseStage> {
        match self {
            ParseError::UnsupportedVariant(_) => None,
            ParseError::MalformedHeader { stage, .. }
            | ParseError::MalformedTable { stage, .. }
            | ParseError::TruncatedData { stage, .. } => Some(*stage),
        }
    }
}

/// Errors raised by object-model mutations. The model is unchanged when one
/// of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Conflicting edit: {0}")]
    ConflictingEdit(String),

    #[error("Unsupported edit: {0}")]
    UnsupportedEdit(String),

    /// The entity is still referenced and cannot be removed.
    #[error("Dangling reference: {entity} is still referenced by {referrer}")]
    DanglingReference { entity: String, referrer: String },

    /// The handle does not name a live entity.
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),
}

/// Errors raised while laying out and serializing a model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// An offset, address or size no longer fits the container's field width.
    #[error("Layout overflow: {what} = {value:#x} exceeds {limit:#x}")]
    LayoutOverflow { what: String, value: u64, limit: u64 },

    /// A pointer field names a block that has no placement.
    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    #[error("Unsupported edit: {0}")]
    UnsupportedEdit(String),

    /// Two pending edits claim the same slot.
    #[error("Conflicting edit: {0}")]
    ConflictingEdit(String),
}

/// Umbrella error for callers that chain parse, edit and build.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("I/O error: {0}")]
    Io(#[from] crate::io::error::IoError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for binweave operations
pub type Result<T> = std::result::Result<T, Error>;
