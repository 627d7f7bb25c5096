// UDF reader (ECMA-167 / OSTA UDF 1.02 - 2.01)
// Enough of the format to walk the file set of install media: anchor,
// volume descriptor sequence, file set descriptor, (extended) file entries
// and file identifier descriptors. Metadata and virtual partitions are not
// supported; such volumes are reported as NotSupported and the caller falls
// back to the ISO 9660 trees.

use super::stream::Extent;
use super::SECTOR_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use chrono::{NaiveDate, NaiveDateTime};
use isoedit_core::IsoEditError;
use log::{debug, info};
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

const ANCHOR_SECTOR: u64 = 256;

const TAG_ANCHOR: u16 = 2;
const TAG_PARTITION: u16 = 5;
const TAG_LOGICAL_VOLUME: u16 = 6;
const TAG_TERMINATING: u16 = 8;
const TAG_FILE_SET: u16 = 256;
const TAG_FILE_IDENTIFIER: u16 = 257;
const TAG_FILE_ENTRY: u16 = 261;
const TAG_EXTENDED_FILE_ENTRY: u16 = 266;

const FILE_TYPE_DIRECTORY: u8 = 4;

const FID_DIRECTORY: u8 = 0x02;
const FID_DELETED: u8 = 0x04;
const FID_PARENT: u8 = 0x08;

const MAX_DESCRIPTOR_SEQUENCE: u64 = 64;

/// Address of a block inside a partition plus the extent length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongAd {
    pub length: u32,
    pub block: u32,
    pub partition_ref: u16,
}

impl LongAd {
    fn parse(raw: &[u8]) -> Self {
        Self {
            length: LittleEndian::read_u32(&raw[0..4]) & 0x3FFF_FFFF,
            block: LittleEndian::read_u32(&raw[4..8]),
            partition_ref: LittleEndian::read_u16(&raw[8..10]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdfData {
    Extents(Vec<Extent>),
    /// Content embedded in the file entry itself.
    Inline(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdfFileEntry {
    pub is_dir: bool,
    pub size: u64,
    pub data: UdfData,
    pub modified: Option<NaiveDateTime>,
}

/// One live child of a UDF directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdfChild {
    pub name: String,
    pub is_dir: bool,
    pub icb: LongAd,
}

#[derive(Debug, Clone)]
pub struct UdfVolume {
    pub revision: String,
    pub label: Option<String>,
    pub block_size: u32,
    pub root: LongAd,
    /// Partition map index -> partition number.
    maps: Vec<u16>,
    /// Partition number -> starting sector.
    starts: HashMap<u16, u32>,
}

impl UdfVolume {
    /// Locate the anchor and walk the main volume descriptor sequence.
    pub fn mount<R: Read + Seek>(reader: &mut R, revision: &str) -> Result<Self, IsoEditError> {
        let anchor = read_block(reader, ANCHOR_SECTOR * SECTOR_SIZE, SECTOR_SIZE as usize)?;
        expect_tag(&anchor, TAG_ANCHOR, "anchor volume descriptor pointer")?;

        let sequence_length = LittleEndian::read_u32(&anchor[16..20]) as u64;
        let sequence_start = LittleEndian::read_u32(&anchor[20..24]) as u64;
        let sequence_sectors = (sequence_length / SECTOR_SIZE).clamp(1, MAX_DESCRIPTOR_SEQUENCE);

        let mut starts = HashMap::new();
        let mut logical_volume = None;

        for sector in sequence_start..sequence_start + sequence_sectors {
            let descriptor = read_block(reader, sector * SECTOR_SIZE, SECTOR_SIZE as usize)?;
            match tag_id(&descriptor) {
                TAG_PARTITION => {
                    let number = LittleEndian::read_u16(&descriptor[22..24]);
                    let start = LittleEndian::read_u32(&descriptor[188..192]);
                    debug!("UDF partition {} starts at sector {}", number, start);
                    starts.insert(number, start);
                }
                TAG_LOGICAL_VOLUME => logical_volume = Some(descriptor),
                TAG_TERMINATING => break,
                _ => {}
            }
        }

        let lvd = logical_volume.ok_or_else(|| {
            IsoEditError::MalformedImage("UDF logical volume descriptor missing".to_string())
        })?;
        if starts.is_empty() {
            return Err(IsoEditError::MalformedImage(
                "UDF partition descriptor missing".to_string(),
            ));
        }

        let block_size = LittleEndian::read_u32(&lvd[212..216]);
        if block_size as u64 != SECTOR_SIZE {
            return Err(IsoEditError::NotSupported(format!(
                "UDF logical block size {}",
                block_size
            )));
        }
        let label = decode_dstring(&lvd[84..212]);
        let file_set = LongAd::parse(&lvd[248..264]);

        let map_count = LittleEndian::read_u32(&lvd[268..272]) as usize;
        let mut maps = Vec::with_capacity(map_count);
        let mut offset = 440;
        for _ in 0..map_count {
            if offset + 2 > lvd.len() {
                return Err(IsoEditError::MalformedImage(
                    "UDF partition map table overruns its descriptor".to_string(),
                ));
            }
            let map_type = lvd[offset];
            let map_length = lvd[offset + 1] as usize;
            if map_type != 1 {
                return Err(IsoEditError::NotSupported(format!(
                    "UDF partition map type {}",
                    map_type
                )));
            }
            if offset + 6 > lvd.len() {
                return Err(IsoEditError::MalformedImage(
                    "UDF partition map table overruns its descriptor".to_string(),
                ));
            }
            maps.push(LittleEndian::read_u16(&lvd[offset + 4..offset + 6]));
            offset += map_length.max(6);
        }

        let mut volume = Self {
            revision: revision.to_string(),
            label,
            block_size,
            root: file_set,
            maps,
            starts,
        };

        let fsd = volume.read_descriptor(reader, file_set)?;
        expect_tag(&fsd, TAG_FILE_SET, "file set descriptor")?;
        volume.root = LongAd::parse(&fsd[400..416]);

        info!(
            "Mounted UDF {} volume {:?}, root ICB at block {}",
            volume.revision, volume.label, volume.root.block
        );
        Ok(volume)
    }

    /// Absolute byte offset of a partition-relative block.
    fn block_offset(&self, partition_ref: u16, block: u32) -> Result<u64, IsoEditError> {
        let number = self
            .maps
            .get(partition_ref as usize)
            .copied()
            .unwrap_or(partition_ref);
        let start = self.starts.get(&number).ok_or_else(|| {
            IsoEditError::MalformedImage(format!("UDF partition reference {} unknown", partition_ref))
        })?;
        Ok((*start as u64 + block as u64) * self.block_size as u64)
    }

    fn read_descriptor<R: Read + Seek>(&self, reader: &mut R, at: LongAd) -> Result<Vec<u8>, IsoEditError> {
        let offset = self.block_offset(at.partition_ref, at.block)?;
        read_block(reader, offset, self.block_size as usize)
    }

    /// Read the (extended) file entry an ICB points at.
    pub fn read_file_entry<R: Read + Seek>(&self, reader: &mut R, icb: LongAd) -> Result<UdfFileEntry, IsoEditError> {
        let entry = self.read_descriptor(reader, icb)?;

        let (modified_at, ea_length_at, base) = match tag_id(&entry) {
            TAG_FILE_ENTRY => (84, 168, 176),
            TAG_EXTENDED_FILE_ENTRY => (92, 208, 216),
            other => {
                return Err(IsoEditError::MalformedImage(format!(
                    "expected UDF file entry at block {}, found tag {}",
                    icb.block, other
                )))
            }
        };

        let is_dir = entry[27] == FILE_TYPE_DIRECTORY;
        let flags = LittleEndian::read_u16(&entry[34..36]);
        let size = LittleEndian::read_u64(&entry[56..64]);
        let modified = decode_timestamp(&entry[modified_at..modified_at + 12]);
        let ea_length = LittleEndian::read_u32(&entry[ea_length_at..ea_length_at + 4]) as usize;
        let ad_length = LittleEndian::read_u32(&entry[ea_length_at + 4..ea_length_at + 8]) as usize;

        let ad_start = base + ea_length;
        let ad_end = ad_start + ad_length;
        if ad_end > entry.len() {
            return Err(IsoEditError::MalformedImage(format!(
                "UDF file entry at block {} overruns its block",
                icb.block
            )));
        }
        let descriptors = &entry[ad_start..ad_end];

        let data = match flags & 0x7 {
            0 => UdfData::Extents(self.short_extents(descriptors, icb.partition_ref, size)?),
            1 => UdfData::Extents(self.long_extents(descriptors, size)?),
            3 => {
                let len = (size as usize).min(descriptors.len());
                UdfData::Inline(descriptors[..len].to_vec())
            }
            other => {
                return Err(IsoEditError::NotSupported(format!(
                    "UDF allocation descriptor type {}",
                    other
                )))
            }
        };

        Ok(UdfFileEntry { is_dir, size, data, modified })
    }

    fn short_extents(&self, raw: &[u8], partition_ref: u16, size: u64) -> Result<Vec<Extent>, IsoEditError> {
        let mut extents = Vec::new();
        let mut remaining = size;
        for ad in raw.chunks_exact(8) {
            let word = LittleEndian::read_u32(&ad[0..4]);
            let position = LittleEndian::read_u32(&ad[4..8]);
            if !push_extent(self, &mut extents, &mut remaining, word, partition_ref, position)? {
                break;
            }
        }
        Ok(extents)
    }

    fn long_extents(&self, raw: &[u8], size: u64) -> Result<Vec<Extent>, IsoEditError> {
        let mut extents = Vec::new();
        let mut remaining = size;
        for ad in raw.chunks_exact(16) {
            let word = LittleEndian::read_u32(&ad[0..4]);
            let block = LittleEndian::read_u32(&ad[4..8]);
            let partition_ref = LittleEndian::read_u16(&ad[8..10]);
            if !push_extent(self, &mut extents, &mut remaining, word, partition_ref, block)? {
                break;
            }
        }
        Ok(extents)
    }

    /// Content of a file entry, fully buffered.
    pub fn read_content<R: Read + Seek>(&self, reader: &mut R, entry: &UdfFileEntry) -> Result<Vec<u8>, IsoEditError> {
        match &entry.data {
            UdfData::Inline(bytes) => Ok(bytes.clone()),
            UdfData::Extents(extents) => Ok(super::stream::read_extents(reader, extents)?),
        }
    }

    /// Live children of a directory entry; deleted and parent FIDs are dropped.
    pub fn read_directory<R: Read + Seek>(&self, reader: &mut R, entry: &UdfFileEntry) -> Result<Vec<UdfChild>, IsoEditError> {
        let data = self.read_content(reader, entry)?;
        let mut children = Vec::new();
        let mut offset = 0usize;

        while offset + 38 <= data.len() {
            let fid = &data[offset..];
            if tag_id(fid) != TAG_FILE_IDENTIFIER {
                break;
            }
            let characteristics = fid[18];
            let name_length = fid[19] as usize;
            let icb = LongAd::parse(&fid[20..36]);
            let impl_length = LittleEndian::read_u16(&fid[36..38]) as usize;
            let name_start = 38 + impl_length;
            let total = (name_start + name_length + 3) & !3;
            if offset + name_start + name_length > data.len() {
                return Err(IsoEditError::MalformedImage(
                    "UDF file identifier overruns directory".to_string(),
                ));
            }
            offset += total;

            if characteristics & (FID_DELETED | FID_PARENT) != 0 {
                continue;
            }
            children.push(UdfChild {
                name: decode_cs0(&fid[name_start..name_start + name_length]),
                is_dir: characteristics & FID_DIRECTORY != 0,
                icb,
            });
        }

        Ok(children)
    }
}

/// Append one allocation descriptor; returns false once the list should end.
fn push_extent(
    volume: &UdfVolume,
    extents: &mut Vec<Extent>,
    remaining: &mut u64,
    word: u32,
    partition_ref: u16,
    block: u32,
) -> Result<bool, IsoEditError> {
    let length = (word & 0x3FFF_FFFF) as u64;
    let kind = word >> 30;
    if length == 0 || *remaining == 0 {
        return Ok(false);
    }
    if kind == 3 {
        // Continuation of the descriptor list; install media never needs it.
        debug!("UDF allocation descriptor continuation ignored at block {}", block);
        return Ok(false);
    }

    let length = length.min(*remaining);
    *remaining -= length;
    if kind == 0 {
        extents.push(Extent::data(volume.block_offset(partition_ref, block)?, length));
    } else {
        extents.push(Extent::sparse(length));
    }
    Ok(true)
}

fn read_block<R: Read + Seek>(reader: &mut R, offset: u64, len: usize) -> Result<Vec<u8>, IsoEditError> {
    let mut block = vec![0u8; len];
    reader.seek(SeekFrom::Start(offset))?;
    reader.read_exact(&mut block)?;
    Ok(block)
}

fn tag_id(descriptor: &[u8]) -> u16 {
    LittleEndian::read_u16(&descriptor[0..2])
}

fn expect_tag(descriptor: &[u8], expected: u16, what: &str) -> Result<(), IsoEditError> {
    let found = tag_id(descriptor);
    if found != expected {
        return Err(IsoEditError::MalformedImage(format!(
            "{} has tag {} (expected {})",
            what, found, expected
        )));
    }
    Ok(())
}

/// OSTA compressed unicode: compression id 8 is one byte per character,
/// 16 is UTF-16 big-endian.
pub fn decode_cs0(raw: &[u8]) -> String {
    match raw.split_first() {
        Some((8, rest)) | Some((254, rest)) => rest.iter().map(|&b| b as char).collect(),
        Some((16, rest)) | Some((255, rest)) => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => String::new(),
    }
}

/// Fixed-size dstring: CS0 content with its used length in the last byte.
fn decode_dstring(field: &[u8]) -> Option<String> {
    let used = *field.last()? as usize;
    if used == 0 || used >= field.len() {
        return None;
    }
    let text = decode_cs0(&field[..used]);
    let text = text.trim_end_matches(['\0', ' ']).to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn decode_timestamp(raw: &[u8]) -> Option<NaiveDateTime> {
    let year = LittleEndian::read_i16(&raw[2..4]) as i32;
    NaiveDate::from_ymd_opt(year, raw[4] as u32, raw[5] as u32)?
        .and_hms_opt(raw[6] as u32, raw[7] as u32, raw[8] as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_cs0() {
        assert_eq!(decode_cs0(&[8, b'b', b'o', b'o', b't']), "boot");
        assert_eq!(decode_cs0(&[16, 0x00, b'e', 0x00, b'f', 0x00, b'i']), "efi");
        assert_eq!(decode_cs0(&[16, 0x04, 0x1F]), "\u{041F}");
        assert_eq!(decode_cs0(&[]), "");
    }

    #[test]
    fn test_decode_dstring() {
        let mut field = [0u8; 128];
        field[0] = 8;
        field[1..8].copy_from_slice(b"CCCOMA_");
        field[127] = 8;
        assert_eq!(decode_dstring(&field).as_deref(), Some("CCCOMA_"));
        assert_eq!(decode_dstring(&[0u8; 128]), None);
    }

    #[test]
    fn test_decode_timestamp() {
        let mut raw = [0u8; 12];
        raw[2..4].copy_from_slice(&2023i16.to_le_bytes());
        raw[4] = 11;
        raw[5] = 2;
        raw[6] = 8;
        assert_eq!(
            decode_timestamp(&raw),
            NaiveDate::from_ymd_opt(2023, 11, 2).unwrap().and_hms_opt(8, 0, 0)
        );
    }

    #[test]
    fn test_short_extents_map_through_partition_and_clip_to_size() {
        let volume = UdfVolume {
            revision: "NSR02".to_string(),
            label: None,
            block_size: 2048,
            root: LongAd { length: 2048, block: 0, partition_ref: 0 },
            maps: vec![0],
            starts: HashMap::from([(0u16, 100u32)]),
        };

        let mut raw = Vec::new();
        raw.extend_from_slice(&4096u32.to_le_bytes());
        raw.extend_from_slice(&5u32.to_le_bytes());
        raw.extend_from_slice(&((1u32 << 30) | 2048).to_le_bytes());
        raw.extend_from_slice(&0u32.to_le_bytes());
        raw.extend_from_slice(&4096u32.to_le_bytes());
        raw.extend_from_slice(&9u32.to_le_bytes());

        let extents = volume.short_extents(&raw, 0, 5000).unwrap();
        assert_eq!(
            extents,
            vec![Extent::data(105 * 2048, 4096), Extent::sparse(904)]
        );
    }

    #[test]
    fn test_partition_map_overrunning_descriptor_is_malformed() {
        let sector = SECTOR_SIZE as usize;
        let mut image = vec![0u8; 259 * sector];

        let anchor = 256 * sector;
        image[anchor..anchor + 2].copy_from_slice(&TAG_ANCHOR.to_le_bytes());
        image[anchor + 16..anchor + 20].copy_from_slice(&(2 * SECTOR_SIZE as u32).to_le_bytes());
        image[anchor + 20..anchor + 24].copy_from_slice(&257u32.to_le_bytes());

        let partition = 257 * sector;
        image[partition..partition + 2].copy_from_slice(&TAG_PARTITION.to_le_bytes());

        // Seven maps walk the table to four bytes before the end of the block
        let lvd = 258 * sector;
        image[lvd..lvd + 2].copy_from_slice(&TAG_LOGICAL_VOLUME.to_le_bytes());
        image[lvd + 212..lvd + 216].copy_from_slice(&2048u32.to_le_bytes());
        image[lvd + 268..lvd + 272].copy_from_slice(&8u32.to_le_bytes());
        let mut offset = 440;
        for length in [255u8, 255, 255, 255, 255, 255, 74] {
            image[lvd + offset] = 1;
            image[lvd + offset + 1] = length;
            offset += length as usize;
        }
        assert_eq!(offset, sector - 4);
        image[lvd + offset] = 1;
        image[lvd + offset + 1] = 6;

        let result = UdfVolume::mount(&mut std::io::Cursor::new(image), "NSR02");
        assert!(matches!(result, Err(IsoEditError::MalformedImage(_))));
    }
}
