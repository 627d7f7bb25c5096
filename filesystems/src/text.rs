// Text decoding for files read out of an image (answer files, .inf, .ini).

use isoedit_core::IsoEditError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    /// UTF-16 with the byte order taken from a BOM; little-endian without one.
    Utf16,
    Latin1,
}

impl TextEncoding {
    pub fn decode(self, bytes: &[u8]) -> Result<String, IsoEditError> {
        match self {
            TextEncoding::Utf8 => {
                let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| IsoEditError::InvalidInput(format!("not valid UTF-8: {}", e)))
            }
            TextEncoding::Utf16Le => decode_utf16(strip_bom(bytes, [0xFF, 0xFE]), u16::from_le_bytes),
            TextEncoding::Utf16Be => decode_utf16(strip_bom(bytes, [0xFE, 0xFF]), u16::from_be_bytes),
            TextEncoding::Utf16 => match bytes {
                [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
                [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
                _ => decode_utf16(bytes, u16::from_le_bytes),
            },
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

fn strip_bom(bytes: &[u8], bom: [u8; 2]) -> &[u8] {
    bytes.strip_prefix(&bom).unwrap_or(bytes)
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, IsoEditError> {
    if bytes.len() % 2 != 0 {
        return Err(IsoEditError::InvalidInput(
            "UTF-16 text has an odd number of bytes".to_string(),
        ));
    }
    let units: Vec<u16> = bytes.chunks_exact(2).map(|p| unit([p[0], p[1]])).collect();
    String::from_utf16(&units)
        .map_err(|e| IsoEditError::InvalidInput(format!("not valid UTF-16: {}", e)))
}

impl FromStr for TextEncoding {
    type Err = IsoEditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "utf-16le" | "utf16le" | "utf-16-le" => Ok(TextEncoding::Utf16Le),
            "utf-16be" | "utf16be" | "utf-16-be" => Ok(TextEncoding::Utf16Be),
            "utf-16" | "utf16" | "unicode" => Ok(TextEncoding::Utf16),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(TextEncoding::Latin1),
            other => Err(IsoEditError::InvalidInput(format!("unknown text encoding '{}'", other))),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf16Le => "utf-16le",
            TextEncoding::Utf16Be => "utf-16be",
            TextEncoding::Utf16 => "utf-16",
            TextEncoding::Latin1 => "latin-1",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_sniffs_bom() {
        assert_eq!(TextEncoding::Utf16.decode(&[0xFE, 0xFF, 0, b'h', 0, b'i']).unwrap(), "hi");
        assert_eq!(TextEncoding::Utf16.decode(&[0xFF, 0xFE, b'h', 0, b'i', 0]).unwrap(), "hi");
        assert_eq!(TextEncoding::Utf16.decode(&[b'o', 0, b'k', 0]).unwrap(), "ok");
    }

    #[test]
    fn test_utf8_bom_and_latin1() {
        assert_eq!(TextEncoding::Utf8.decode(b"\xEF\xBB\xBF[Version]").unwrap(), "[Version]");
        assert_eq!(TextEncoding::Latin1.decode(&[0x63, 0x61, 0x66, 0xE9]).unwrap(), "caf\u{e9}");
        assert!(TextEncoding::Utf8.decode(&[0xC3]).is_err());
    }

    #[test]
    fn test_odd_utf16_is_rejected() {
        assert!(matches!(
            TextEncoding::Utf16Le.decode(&[0x41, 0x00, 0x42]),
            Err(IsoEditError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_parse_labels() {
        assert_eq!("UTF-16LE".parse::<TextEncoding>().unwrap(), TextEncoding::Utf16Le);
        assert_eq!("utf_16".parse::<TextEncoding>().unwrap(), TextEncoding::Utf16);
        assert_eq!("ISO-8859-1".parse::<TextEncoding>().unwrap(), TextEncoding::Latin1);
        assert!("ebcdic".parse::<TextEncoding>().is_err());
        // cp1252 differs from Latin-1 in 0x80..0x9F
        assert!("cp1252".parse::<TextEncoding>().is_err());
    }
}
