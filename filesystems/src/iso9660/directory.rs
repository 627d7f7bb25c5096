// ISO 9660 / Joliet directory records
//
// Record layout (byte offsets):
//   0  record length          25 file flags
//   1  extended attr length   26 file unit size
//   2  extent LBA (LE, BE)    27 interleave gap
//  10  data length (LE, BE)   28 volume sequence (LE, BE)
//  18  recording date (7)     32 identifier length, 33.. identifier

use super::stream::Extent;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use chrono::{NaiveDate, NaiveDateTime};
use isoedit_core::IsoEditError;

const MIN_RECORD_LENGTH: usize = 34;

const FLAG_DIRECTORY: u8 = 0x02;
const FLAG_MULTI_EXTENT: u8 = 0x80;

/// One directory entry with all of its extents merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoRecord {
    pub name: String,
    pub is_dir: bool,
    pub extents: Vec<Extent>,
    pub size: u64,
    pub recorded: Option<NaiveDateTime>,
}

/// Parse the records of one directory extent.
///
/// `.` and `..` are skipped. Records flagged as not-final are merged with the
/// records that follow them, so files above 4 GiB come back as one entry.
pub fn parse_directory(data: &[u8], block_size: u64, joliet: bool) -> Result<Vec<IsoRecord>, IsoEditError> {
    let sector = block_size as usize;
    let mut records: Vec<IsoRecord> = Vec::new();
    let mut continuing = false;
    let mut offset = 0usize;

    while offset < data.len() {
        let length = data[offset] as usize;
        if length == 0 {
            // Records never straddle a sector; zero fill pads to the next one
            offset = (offset / sector + 1) * sector;
            continue;
        }
        if length < MIN_RECORD_LENGTH || offset + length > data.len() {
            return Err(IsoEditError::MalformedImage(format!(
                "directory record of length {} at offset {}",
                length, offset
            )));
        }

        let record = &data[offset..offset + length];
        offset += length;

        let id_len = record[32] as usize;
        if 33 + id_len > length {
            return Err(IsoEditError::MalformedImage(
                "directory record identifier overruns record".to_string(),
            ));
        }
        let identifier = &record[33..33 + id_len];
        if id_len == 1 && (identifier[0] == 0x00 || identifier[0] == 0x01) {
            continue;
        }

        let flags = record[25];
        let lba = LittleEndian::read_u32(&record[2..6]) as u64;
        let data_length = LittleEndian::read_u32(&record[10..14]) as u64;
        let extent = Extent::data(lba * block_size, data_length);
        let name = decode_identifier(identifier, joliet);

        if continuing {
            if let Some(last) = records.last_mut() {
                if last.name == name {
                    last.extents.push(extent);
                    last.size += data_length;
                    continuing = flags & FLAG_MULTI_EXTENT != 0;
                    continue;
                }
            }
        }

        continuing = flags & FLAG_MULTI_EXTENT != 0;
        records.push(IsoRecord {
            name,
            is_dir: flags & FLAG_DIRECTORY != 0,
            extents: vec![extent],
            size: data_length,
            recorded: decode_datetime(&record[18..25]),
        });
    }

    Ok(records)
}

fn decode_identifier(identifier: &[u8], joliet: bool) -> String {
    let raw = if joliet {
        let units: Vec<u16> = identifier
            .chunks_exact(2)
            .map(BigEndian::read_u16)
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(identifier).into_owned()
    };
    strip_version(&raw).to_string()
}

/// Strip the version suffix: `SETUP.EXE;1` -> `SETUP.EXE`, `README.;1` -> `README`.
pub fn strip_version(name: &str) -> &str {
    let base = name.split(';').next().unwrap_or(name);
    match base.strip_suffix('.') {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => base,
    }
}

/// Seven-byte recording date: years since 1900, month, day, hour, minute,
/// second, GMT offset in 15 minute units. All zero means "not recorded".
pub fn decode_datetime(bytes: &[u8]) -> Option<NaiveDateTime> {
    if bytes.len() < 6 {
        return None;
    }
    NaiveDate::from_ymd_opt(1900 + bytes[0] as i32, bytes[1] as u32, bytes[2] as u32)?
        .and_hms_opt(bytes[3] as u32, bytes[4] as u32, bytes[5] as u32)
}

/// The root `.` record starts its system use area with a SUSP `SP` entry
/// when Rock Ridge extensions are recorded.
pub fn has_rock_ridge(root_data: &[u8]) -> bool {
    let Some(&length) = root_data.first() else {
        return false;
    };
    let length = length as usize;
    if length < MIN_RECORD_LENGTH || length > root_data.len() {
        return false;
    }
    let id_len = root_data[32] as usize;
    let padding = if id_len % 2 == 0 { 1 } else { 0 };
    let su_start = 33 + id_len + padding;
    if su_start + 7 > length {
        return false;
    }
    let su = &root_data[su_start..length];
    &su[0..2] == b"SP" && su[4] == 0xBE && su[5] == 0xEF
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(lba: u32, size: u32, flags: u8, id: &[u8]) -> Vec<u8> {
        let mut length = 33 + id.len();
        if length % 2 != 0 {
            length += 1;
        }
        let mut r = vec![0u8; length];
        r[0] = length as u8;
        r[2..6].copy_from_slice(&lba.to_le_bytes());
        r[6..10].copy_from_slice(&lba.to_be_bytes());
        r[10..14].copy_from_slice(&size.to_le_bytes());
        r[14..18].copy_from_slice(&size.to_be_bytes());
        r[18..25].copy_from_slice(&[124, 3, 15, 10, 30, 0, 0]);
        r[25] = flags;
        r[32] = id.len() as u8;
        r[33..33 + id.len()].copy_from_slice(id);
        r
    }

    #[test]
    fn test_parse_skips_dot_entries_and_strips_versions() {
        let mut data = Vec::new();
        data.extend(record(20, 2048, FLAG_DIRECTORY, &[0]));
        data.extend(record(19, 2048, FLAG_DIRECTORY, &[1]));
        data.extend(record(30, 2048, FLAG_DIRECTORY, b"SOURCES"));
        data.extend(record(40, 11, 0, b"SETUP.EXE;1"));
        data.resize(2048, 0);

        let records = parse_directory(&data, 2048, false).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "SOURCES");
        assert!(records[0].is_dir);
        assert_eq!(records[1].name, "SETUP.EXE");
        assert_eq!(records[1].extents, vec![Extent::data(40 * 2048, 11)]);
        assert_eq!(
            records[1].recorded,
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(10, 30, 0)
        );
    }

    #[test]
    fn test_parse_joliet_names() {
        let name: Vec<u8> = "install.wim;1"
            .encode_utf16()
            .flat_map(|u| u.to_be_bytes())
            .collect();
        let mut data = record(50, 5, 0, &name);
        data.resize(2048, 0);

        let records = parse_directory(&data, 2048, true).unwrap();
        assert_eq!(records[0].name, "install.wim");
    }

    #[test]
    fn test_multi_extent_records_merge() {
        let mut data = Vec::new();
        data.extend(record(100, 4096, FLAG_MULTI_EXTENT, b"INSTALL.WIM;1"));
        data.extend(record(102, 4096, FLAG_MULTI_EXTENT, b"INSTALL.WIM;1"));
        data.extend(record(104, 100, 0, b"INSTALL.WIM;1"));
        data.extend(record(110, 1, 0, b"NEXT.TXT;1"));
        data.resize(2048, 0);

        let records = parse_directory(&data, 2048, false).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].size, 8292);
        assert_eq!(records[0].extents.len(), 3);
        assert_eq!(records[1].name, "NEXT.TXT");
    }

    #[test]
    fn test_records_continue_in_next_sector() {
        let mut data = record(30, 1, 0, b"A.TXT;1");
        data.resize(2048, 0);
        data.extend(record(31, 1, 0, b"B.TXT;1"));
        data.resize(4096, 0);

        let names: Vec<_> = parse_directory(&data, 2048, false)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["A.TXT", "B.TXT"]);
    }

    #[test]
    fn test_truncated_record_is_malformed() {
        let mut data = record(30, 1, 0, b"A.TXT;1");
        data[0] = 200;
        assert!(matches!(
            parse_directory(&data, 2048, false),
            Err(IsoEditError::MalformedImage(_))
        ));
    }

    #[test]
    fn test_strip_version() {
        assert_eq!(strip_version("README.;1"), "README");
        assert_eq!(strip_version("BOOTMGR"), "BOOTMGR");
        assert_eq!(strip_version("a.b;1"), "a.b");
    }

    #[test]
    fn test_rock_ridge_detection() {
        let mut root = record(20, 2048, FLAG_DIRECTORY, &[0]);
        assert!(!has_rock_ridge(&root));

        // "." record with an SP entry in its system use area
        root.extend_from_slice(&[b'S', b'P', 7, 1, 0xBE, 0xEF, 0]);
        root.push(0);
        root[0] = root.len() as u8;
        assert!(has_rock_ridge(&root));
    }
}
