// Volume descriptor scan
// ISO 9660 descriptors start at sector 16 and run to the set terminator; a
// UDF volume recognition sequence (BEA01 / NSR0x / TEA01) may follow them.

use super::SECTOR_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use isoedit_core::IsoEditError;
use log::debug;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

const VOLUME_DESCRIPTOR_START: u64 = 16;
const MAX_DESCRIPTORS: u64 = 64;

const TYPE_BOOT_RECORD: u8 = 0;
const TYPE_PRIMARY: u8 = 1;
const TYPE_SUPPLEMENTARY: u8 = 2;
const TYPE_TERMINATOR: u8 = 255;

const ISO_MAGIC: &[u8; 5] = b"CD001";
const EL_TORITO_ID: &[u8] = b"EL TORITO SPECIFICATION";

/// Location of a directory tree root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootRecord {
    pub lba: u32,
    pub length: u32,
}

#[derive(Debug, Clone, Default)]
pub struct VolumeSet {
    pub primary: Option<RootRecord>,
    pub joliet: Option<RootRecord>,
    pub joliet_level: Option<u8>,
    pub boot_catalog_lba: Option<u32>,
    pub volume_label: Option<String>,
    pub logical_block_size: u32,
    pub volume_space_size: u32,
    /// `NSR02` or `NSR03` when a UDF recognition sequence was found.
    pub udf_revision: Option<String>,
}

impl VolumeSet {
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.udf_revision.is_none()
    }
}

/// Read the descriptor area of an image.
pub fn scan<R: Read + Seek>(reader: &mut R) -> Result<VolumeSet, IsoEditError> {
    let mut set = VolumeSet {
        logical_block_size: SECTOR_SIZE as u32,
        ..Default::default()
    };
    let mut buffer = [0u8; SECTOR_SIZE as usize];
    let mut terminated = false;

    for sector in VOLUME_DESCRIPTOR_START..VOLUME_DESCRIPTOR_START + MAX_DESCRIPTORS {
        reader.seek(SeekFrom::Start(sector * SECTOR_SIZE))?;
        match reader.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(IsoEditError::IoError(e)),
        }

        let identifier = &buffer[1..6];
        if identifier == ISO_MAGIC {
            match buffer[0] {
                TYPE_BOOT_RECORD => {
                    if buffer[7..7 + EL_TORITO_ID.len()] == *EL_TORITO_ID {
                        let lba = LittleEndian::read_u32(&buffer[71..75]);
                        debug!("El Torito boot record at sector {}, catalog at {}", sector, lba);
                        set.boot_catalog_lba = Some(lba);
                    }
                }
                TYPE_PRIMARY => {
                    if set.primary.is_none() {
                        set.primary = Some(root_record(&buffer));
                        set.volume_label = trimmed_label(&buffer[40..72]);
                        set.volume_space_size = LittleEndian::read_u32(&buffer[80..84]);
                        let block = LittleEndian::read_u16(&buffer[128..130]) as u32;
                        if block != 0 {
                            set.logical_block_size = block;
                        }
                    }
                }
                TYPE_SUPPLEMENTARY => {
                    if let Some(level) = joliet_level(&buffer[88..91]) {
                        if set.joliet.is_none() {
                            debug!("Joliet level {} descriptor at sector {}", level, sector);
                            set.joliet = Some(root_record(&buffer));
                            set.joliet_level = Some(level);
                        }
                    }
                }
                TYPE_TERMINATOR => terminated = true,
                _ => {}
            }
            continue;
        }

        match identifier {
            b"BEA01" => {}
            b"NSR02" | b"NSR03" => {
                let revision = String::from_utf8_lossy(identifier).into_owned();
                debug!("UDF recognition sequence {} at sector {}", revision, sector);
                set.udf_revision = Some(revision);
            }
            b"TEA01" => break,
            _ => {
                // Past the ISO terminator, anything that is not part of a
                // recognition sequence ends the descriptor area.
                if terminated || set.primary.is_none() {
                    break;
                }
            }
        }
    }

    Ok(set)
}

fn root_record(descriptor: &[u8]) -> RootRecord {
    let record = &descriptor[156..190];
    RootRecord {
        lba: LittleEndian::read_u32(&record[2..6]),
        length: LittleEndian::read_u32(&record[10..14]),
    }
}

/// Joliet escape sequences `%/@`, `%/C`, `%/E` mark UCS-2 levels 1 to 3.
fn joliet_level(escape: &[u8]) -> Option<u8> {
    match escape {
        [0x25, 0x2F, 0x40] => Some(1),
        [0x25, 0x2F, 0x43] => Some(2),
        [0x25, 0x2F, 0x45] => Some(3),
        _ => None,
    }
}

fn trimmed_label(bytes: &[u8]) -> Option<String> {
    let label = String::from_utf8_lossy(bytes);
    let label = label.trim_end_matches([' ', '\0']).to_string();
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn descriptor(kind: u8, id: &[u8; 5]) -> Vec<u8> {
        let mut sector = vec![0u8; SECTOR_SIZE as usize];
        sector[0] = kind;
        sector[1..6].copy_from_slice(id);
        sector[6] = 1;
        sector
    }

    fn image(descriptors: &[Vec<u8>]) -> Cursor<Vec<u8>> {
        let mut data = vec![0u8; 16 * SECTOR_SIZE as usize];
        for d in descriptors {
            data.extend_from_slice(d);
        }
        Cursor::new(data)
    }

    #[test]
    fn test_scan_primary_joliet_boot_and_udf() {
        let mut pvd = descriptor(TYPE_PRIMARY, ISO_MAGIC);
        pvd[40..47].copy_from_slice(b"CCCOMA_");
        pvd[47..72].fill(b' ');
        pvd[80..84].copy_from_slice(&1000u32.to_le_bytes());
        pvd[128..130].copy_from_slice(&2048u16.to_le_bytes());
        pvd[156 + 2..156 + 6].copy_from_slice(&20u32.to_le_bytes());
        pvd[156 + 10..156 + 14].copy_from_slice(&2048u32.to_le_bytes());

        let mut boot = descriptor(TYPE_BOOT_RECORD, ISO_MAGIC);
        boot[7..7 + EL_TORITO_ID.len()].copy_from_slice(EL_TORITO_ID);
        boot[71..75].copy_from_slice(&30u32.to_le_bytes());

        let mut svd = descriptor(TYPE_SUPPLEMENTARY, ISO_MAGIC);
        svd[88..91].copy_from_slice(&[0x25, 0x2F, 0x45]);
        svd[156 + 2..156 + 6].copy_from_slice(&21u32.to_le_bytes());

        let mut reader = image(&[
            pvd,
            boot,
            svd,
            descriptor(TYPE_TERMINATOR, ISO_MAGIC),
            descriptor(0, b"BEA01"),
            descriptor(0, b"NSR02"),
            descriptor(0, b"TEA01"),
        ]);

        let set = scan(&mut reader).unwrap();
        assert_eq!(set.primary, Some(RootRecord { lba: 20, length: 2048 }));
        assert_eq!(set.joliet.map(|r| r.lba), Some(21));
        assert_eq!(set.joliet_level, Some(3));
        assert_eq!(set.boot_catalog_lba, Some(30));
        assert_eq!(set.volume_label.as_deref(), Some("CCCOMA_"));
        assert_eq!(set.volume_space_size, 1000);
        assert_eq!(set.udf_revision.as_deref(), Some("NSR02"));
    }

    #[test]
    fn test_scan_garbage_finds_nothing() {
        let mut reader = Cursor::new(vec![0xAAu8; 40 * SECTOR_SIZE as usize]);
        let set = scan(&mut reader).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_supplementary_without_joliet_escape_is_ignored() {
        let svd = descriptor(TYPE_SUPPLEMENTARY, ISO_MAGIC);
        let mut reader = image(&[
            descriptor(TYPE_PRIMARY, ISO_MAGIC),
            svd,
            descriptor(TYPE_TERMINATOR, ISO_MAGIC),
        ]);
        let set = scan(&mut reader).unwrap();
        assert!(set.primary.is_some());
        assert!(set.joliet.is_none());
    }
}
