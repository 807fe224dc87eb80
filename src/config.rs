//! Configuration for parsing and building.
//!
//! Both halves have conservative defaults and can be loaded from JSON so that
//! batch drivers can ship one file describing how binaries are handled.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Master configuration for a parse/build pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaveConfig {
    pub parse: ParseConfig,
    pub build: BuildConfig,
}

impl WeaveConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Limits and switches applied while decoding.
///
/// Declared counts above these limits are treated as malformed rather than
/// trusted, which bounds the work done on hostile input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseConfig {
    pub max_sections: usize,
    pub max_segments: usize,
    pub max_symbols: usize,
    pub max_relocations: usize,
    pub max_load_commands: usize,
    pub max_fat_arches: usize,
    /// Decode imports, exports, base relocations, dynamic entries and other
    /// optional regions. When off they are kept as raw bytes only.
    pub parse_optional: bool,
    /// Nesting limit for the PE resource tree walk.
    pub max_resource_depth: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            max_sections: 65_535,
            max_segments: 65_535,
            max_symbols: 4_000_000,
            max_relocations: 8_000_000,
            max_load_commands: 65_535,
            max_fat_arches: 64,
            parse_optional: true,
            max_resource_depth: 32,
        }
    }
}

impl ParseConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Switches applied while serializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Byte used for alignment padding and vacated ranges.
    pub fill_byte: u8,
    /// Zero (fill) ranges left behind by moved or removed blocks.
    pub clear_vacated: bool,
    /// Recompute the PE optional-header checksum when the layout changed.
    pub recompute_pe_checksum: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            fill_byte: 0,
            clear_vacated: true,
            recompute_pe_checksum: true,
        }
    }
}

impl BuildConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = WeaveConfig::default();
        assert!(cfg.parse.parse_optional);
        assert_eq!(cfg.build.fill_byte, 0);
        assert!(cfg.build.clear_vacated);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = BuildConfig::from_json(r#"{ "fill_byte": 204 }"#).unwrap();
        assert_eq!(cfg.fill_byte, 0xcc);
        assert!(cfg.recompute_pe_checksum);

        let cfg = WeaveConfig::from_json(r#"{ "parse": { "max_sections": 8 } }"#).unwrap();
        assert_eq!(cfg.parse.max_sections, 8);
        assert_eq!(cfg.parse.max_symbols, ParseConfig::default().max_symbols);
    }

    #[test]
    fn test_json_round_trip_and_errors() {
        let cfg = WeaveConfig::default();
        let json = cfg.to_json().unwrap();
        assert_eq!(WeaveConfig::from_json(&json).unwrap(), cfg);
        assert!(matches!(
            ParseConfig::from_json("{ not json"),
            Err(Error::Config(_))
        ));
    }
}
