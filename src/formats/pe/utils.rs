//! Helpers shared by the PE parser and builder

use crate::error::EditError;

/// The optional-header checksum: a folded 16-bit one's complement sum over
/// the whole file, skipping the checksum field, plus the file length.
pub fn calculate_pe_checksum(data: &[u8], checksum_offset: usize) -> u32 {
    let mut sum = 0u64;
    let mut i = 0;

    while i < data.len() {
        if i == checksum_offset || i == checksum_offset + 1 {
            i += 2;
            continue;
        }

        let word = if i + 1 < data.len() {
            u16::from_le_bytes([data[i], data[i + 1]]) as u64
        } else {
            data[i] as u64
        };

        sum = sum.wrapping_add(word);
        sum = (sum & 0xFFFF) + (sum >> 16);
        i += 2;
    }

    sum = sum.wrapping_add(data.len() as u64);
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    sum as u32
}

/// Encode a section name into the fixed eight-byte header field.
pub fn encode_section_name(name: &str) -> Result<[u8; 8], EditError> {
    if name.is_empty() {
        return Err(EditError::InvalidValue("section name is empty".into()));
    }
    let bytes = name.as_bytes();
    if bytes.len() > 8 {
        return Err(EditError::InvalidValue(format!(
            "section name {} is longer than 8 bytes",
            name
        )));
    }
    let mut raw = [0u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    Ok(raw)
}

/// Decode a NUL-terminated ASCII string, lossily.
pub fn lossy_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_skips_its_own_field() {
        let mut data = vec![0u8; 0x100];
        data[0x10] = 0x34;
        data[0x11] = 0x12;
        let sum = calculate_pe_checksum(&data, 0x40);
        assert_eq!(sum, 0x1234 + 0x100);

        // Bytes in the checksum field don't contribute.
        data[0x40] = 0xff;
        data[0x41] = 0xff;
        assert_eq!(calculate_pe_checksum(&data, 0x40), sum);
    }

    #[test]
    fn test_checksum_folds_carries() {
        let data = vec![0xffu8; 8];
        // Three words of 0xffff plus the length, folded.
        let mut expected = 0u64;
        for _ in 0..3 {
            expected += 0xffff;
            expected = (expected & 0xffff) + (expected >> 16);
        }
        expected += 8;
        assert_eq!(calculate_pe_checksum(&data, 6), expected as u32);
    }

    #[test]
    fn test_encode_section_name() {
        assert_eq!(&encode_section_name(".text").unwrap()[..6], b".text\0");
        assert_eq!(&encode_section_name(".textbss").unwrap(), b".textbss");
        assert!(matches!(
            encode_section_name(".toolongname"),
            Err(EditError::InvalidValue(_))
        ));
        assert!(encode_section_name("").is_err());
    }
}
