// El Torito boot catalog
// One catalog sector: validation entry, initial/default entry, then any
// number of section headers each followed by their section entries.

use crate::facade::CatalogEntry;
use byteorder::{ByteOrder, LittleEndian};
use isoedit_core::IsoEditError;
use log::debug;

const ENTRY_SIZE: usize = 32;

const HEADER_VALIDATION: u8 = 0x01;
const HEADER_SECTION: u8 = 0x90;
const HEADER_FINAL_SECTION: u8 = 0x91;
const ENTRY_EXTENSION: u8 = 0x44;
const INDICATOR_BOOTABLE: u8 = 0x88;

/// Parse a catalog sector into its boot entries in catalog order.
pub fn parse_catalog(sector: &[u8]) -> Result<Vec<CatalogEntry>, IsoEditError> {
    if sector.len() < 2 * ENTRY_SIZE {
        return Err(IsoEditError::MalformedImage(
            "boot catalog shorter than two entries".to_string(),
        ));
    }

    let validation = &sector[..ENTRY_SIZE];
    if validation[0] != HEADER_VALIDATION || validation[30] != 0x55 || validation[31] != 0xAA {
        return Err(IsoEditError::MalformedImage(
            "boot catalog validation entry missing".to_string(),
        ));
    }
    let checksum = validation
        .chunks_exact(2)
        .fold(0u16, |sum, word| sum.wrapping_add(LittleEndian::read_u16(word)));
    if checksum != 0 {
        return Err(IsoEditError::MalformedImage(format!(
            "boot catalog checksum mismatch ({:#06x})",
            checksum
        )));
    }

    let mut entries = vec![parse_entry(validation[1], &sector[ENTRY_SIZE..2 * ENTRY_SIZE])];

    let mut offset = 2 * ENTRY_SIZE;
    while offset + ENTRY_SIZE <= sector.len() {
        let header = &sector[offset..offset + ENTRY_SIZE];
        offset += ENTRY_SIZE;

        match header[0] {
            HEADER_SECTION | HEADER_FINAL_SECTION => {
                let platform = header[1];
                let count = LittleEndian::read_u16(&header[2..4]) as usize;
                debug!("Boot catalog section: platform {:#04x}, {} entries", platform, count);

                let mut remaining = count;
                while remaining > 0 && offset + ENTRY_SIZE <= sector.len() {
                    let raw = &sector[offset..offset + ENTRY_SIZE];
                    offset += ENTRY_SIZE;
                    if raw[0] == ENTRY_EXTENSION {
                        continue;
                    }
                    entries.push(parse_entry(platform, raw));
                    remaining -= 1;
                }

                if header[0] == HEADER_FINAL_SECTION {
                    break;
                }
            }
            _ => break,
        }
    }

    Ok(entries)
}

fn parse_entry(platform_id: u8, raw: &[u8]) -> CatalogEntry {
    let media_type = raw[1] & 0x0F;
    CatalogEntry {
        platform_id,
        bootable: raw[0] == INDICATOR_BOOTABLE,
        media_type,
        no_emulation: media_type == 0,
        load_segment: LittleEndian::read_u16(&raw[2..4]),
        sector_count: LittleEndian::read_u16(&raw[6..8]),
        load_rba: LittleEndian::read_u32(&raw[8..12]),
    }
}

/// Build a validation entry whose words sum to zero.
pub fn validation_entry(platform_id: u8) -> [u8; ENTRY_SIZE] {
    let mut entry = [0u8; ENTRY_SIZE];
    entry[0] = HEADER_VALIDATION;
    entry[1] = platform_id;
    entry[30] = 0x55;
    entry[31] = 0xAA;
    let sum = entry
        .chunks_exact(2)
        .fold(0u16, |sum, word| sum.wrapping_add(LittleEndian::read_u16(word)));
    LittleEndian::write_u16(&mut entry[28..30], 0u16.wrapping_sub(sum));
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot_entry(sectors: u16, rba: u32) -> [u8; ENTRY_SIZE] {
        let mut e = [0u8; ENTRY_SIZE];
        e[0] = INDICATOR_BOOTABLE;
        e[6..8].copy_from_slice(&sectors.to_le_bytes());
        e[8..12].copy_from_slice(&rba.to_le_bytes());
        e
    }

    fn section(final_section: bool, platform: u8, count: u16) -> [u8; ENTRY_SIZE] {
        let mut h = [0u8; ENTRY_SIZE];
        h[0] = if final_section { HEADER_FINAL_SECTION } else { HEADER_SECTION };
        h[1] = platform;
        h[2..4].copy_from_slice(&count.to_le_bytes());
        h
    }

    #[test]
    fn test_dual_mode_catalog() {
        let mut sector = Vec::new();
        sector.extend_from_slice(&validation_entry(CatalogEntry::PLATFORM_X86));
        sector.extend_from_slice(&boot_entry(8, 40));
        sector.extend_from_slice(&section(true, CatalogEntry::PLATFORM_EFI, 1));
        sector.extend_from_slice(&boot_entry(2880, 41));
        sector.resize(2048, 0);

        let entries = parse_catalog(&sector).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].platform_id, CatalogEntry::PLATFORM_X86);
        assert!(entries[0].bootable);
        assert!(entries[0].no_emulation);
        assert_eq!(entries[0].sector_count, 8);
        assert_eq!(entries[0].load_rba, 40);
        assert!(entries[1].is_efi());
        assert_eq!(entries[1].sector_count, 2880);
    }

    #[test]
    fn test_extension_entries_are_skipped() {
        let mut sector = Vec::new();
        sector.extend_from_slice(&validation_entry(0));
        sector.extend_from_slice(&boot_entry(4, 30));
        sector.extend_from_slice(&section(true, 0xEF, 1));
        let mut extension = [0u8; ENTRY_SIZE];
        extension[0] = ENTRY_EXTENSION;
        sector.extend_from_slice(&extension);
        sector.extend_from_slice(&boot_entry(1, 31));
        sector.resize(2048, 0);

        let entries = parse_catalog(&sector).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].load_rba, 31);
    }

    #[test]
    fn test_bad_checksum_is_rejected() {
        let mut sector = validation_entry(0).to_vec();
        sector[4] ^= 0xFF;
        sector.extend_from_slice(&boot_entry(4, 30));
        assert!(matches!(parse_catalog(&sector), Err(IsoEditError::MalformedImage(_))));
    }

    #[test]
    fn test_emulated_media_type() {
        let mut sector = validation_entry(0).to_vec();
        let mut floppy = boot_entry(1, 30);
        floppy[1] = 0x02;
        sector.extend_from_slice(&floppy);
        let entries = parse_catalog(&sector).unwrap();
        assert_eq!(entries[0].media_type, 2);
        assert!(!entries[0].no_emulation);
    }
}
