//! Disc image authoring for tests.
//!
//! `IsoAuthor` writes small but structurally complete images: an ISO 9660
//! primary tree, an optional Joliet tree, an optional UDF 1.02 file set and
//! an optional El Torito catalog with BIOS and UEFI entries. All trees share
//! the same file extents, the way mastering tools lay them out.

use crate::iso9660::eltorito::validation_entry;
use crate::facade::CatalogEntry;
use isoedit_core::normalize_image_path;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const SECTOR: u64 = 2048;
const DATA_START: u64 = 300;
const UDF_ANCHOR: u64 = 256;
const UDF_SEQUENCE: u64 = 260;
const UDF_FILE_SET: u64 = 263;
const MAX_AD_LENGTH: u64 = 0x3FFF_F800;

/// 2024-01-01 00:00:00 as a seven byte directory record date.
const RECORD_DATE: [u8; 7] = [124, 1, 1, 0, 0, 0, 0];

#[derive(Debug, Clone)]
enum Content {
    Bytes(Vec<u8>),
    Local(PathBuf),
}

impl Content {
    fn len(&self) -> io::Result<u64> {
        match self {
            Content::Bytes(b) => Ok(b.len() as u64),
            Content::Local(p) => Ok(fs::metadata(p)?.len()),
        }
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Dir(BTreeMap<String, Entry>),
    File(Content),
}

/// Builder for test disc images.
#[derive(Debug, Clone)]
pub struct IsoAuthor {
    label: String,
    joliet: bool,
    udf: bool,
    root: BTreeMap<String, Entry>,
    bios: Option<(String, u16)>,
    uefi: Option<String>,
    uefi_in_catalog: bool,
}

impl IsoAuthor {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            joliet: false,
            udf: false,
            root: BTreeMap::new(),
            bios: None,
            uefi: None,
            uefi_in_catalog: true,
        }
    }

    /// Author from a local directory tree, e.g. a staging directory.
    pub fn from_directory(label: &str, root: &Path) -> io::Result<Self> {
        let mut author = Self::new(label);
        author.add_local_tree(root, "/")?;
        Ok(author)
    }

    fn add_local_tree(&mut self, dir: &Path, image_dir: &str) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let image_path = if image_dir == "/" {
                format!("/{}", name)
            } else {
                format!("{}/{}", image_dir, name)
            };
            if entry.file_type()?.is_dir() {
                self.insert(&image_path, None);
                self.add_local_tree(&entry.path(), &image_path)?;
            } else {
                self.insert(&image_path, Some(Content::Local(entry.path())));
            }
        }
        Ok(())
    }

    pub fn with_joliet(mut self) -> Self {
        self.joliet = true;
        self
    }

    pub fn with_udf(mut self) -> Self {
        self.udf = true;
        self
    }

    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        self.insert(path, Some(Content::Bytes(content.to_vec())));
        self
    }

    pub fn local_file(mut self, path: &str, local: impl Into<PathBuf>) -> Self {
        self.insert(path, Some(Content::Local(local.into())));
        self
    }

    pub fn dir(mut self, path: &str) -> Self {
        self.insert(path, None);
        self
    }

    /// Legacy boot entry with an explicit load size in 512-byte sectors.
    pub fn bios_boot(mut self, path: &str, load_size: u16) -> Self {
        self.bios = Some((normalize_image_path(path), load_size));
        self
    }

    pub fn uefi_boot(mut self, path: &str) -> Self {
        self.uefi = Some(normalize_image_path(path));
        self
    }

    /// Leave the UEFI loader out of the catalog while keeping the file.
    pub fn uefi_in_catalog(mut self, present: bool) -> Self {
        self.uefi_in_catalog = present;
        self
    }

    fn insert(&mut self, path: &str, content: Option<Content>) {
        let normalized = normalize_image_path(path);
        let components: Vec<&str> = normalized.split('/').filter(|c| !c.is_empty()).collect();
        let Some((leaf, parents)) = components.split_last() else {
            return;
        };

        let mut dir = &mut self.root;
        for component in parents {
            let entry = dir
                .entry(component.to_string())
                .or_insert_with(|| Entry::Dir(BTreeMap::new()));
            if !matches!(entry, Entry::Dir(_)) {
                *entry = Entry::Dir(BTreeMap::new());
            }
            dir = match entry {
                Entry::Dir(children) => children,
                Entry::File(_) => return,
            };
        }

        match content {
            Some(content) => {
                dir.insert(leaf.to_string(), Entry::File(content));
            }
            None => {
                dir.entry(leaf.to_string())
                    .or_insert_with(|| Entry::Dir(BTreeMap::new()));
            }
        }
    }

    pub fn write_to(&self, output: &Path) -> io::Result<()> {
        let tree = FlatTree::build(&self.root)?;
        let boot = self.bios.is_some() || self.uefi.is_some();

        // Sector allocation
        let mut next = DATA_START;
        let mut alloc = |bytes: u64| {
            let lba = next;
            next += bytes.div_ceil(SECTOR);
            lba
        };

        let catalog_lba = if boot { Some(alloc(SECTOR)) } else { None };

        let mut layout = Layout::new(tree.nodes.len());
        for (i, node) in tree.nodes.iter().enumerate() {
            if node.is_dir() {
                let size = tree.directory_extent(i, false, &layout).len() as u64;
                layout.plain[i] = (alloc(size), size);
            }
        }
        if self.joliet {
            for (i, node) in tree.nodes.iter().enumerate() {
                if node.is_dir() {
                    let size = tree.directory_extent(i, true, &layout).len() as u64;
                    layout.joliet[i] = (alloc(size), size);
                }
            }
        }
        if self.udf {
            for (i, node) in tree.nodes.iter().enumerate() {
                layout.udf_entry[i] = alloc(SECTOR);
                if node.is_dir() {
                    let size = tree.fid_stream(i, &layout).len() as u64;
                    layout.udf_dir[i] = (alloc(size), size);
                }
            }
        }
        for (i, node) in tree.nodes.iter().enumerate() {
            if let Node::File { size, .. } = node {
                layout.data[i] = alloc(*size);
            }
        }
        let total_sectors = next;

        let mut out = File::create(output)?;
        out.set_len(total_sectors * SECTOR)?;

        // Volume descriptors
        let mut sector = 16;
        put(&mut out, sector, &self.primary_descriptor(&layout, total_sectors, false))?;
        sector += 1;
        if let Some(lba) = catalog_lba {
            put(&mut out, sector, &boot_record(lba))?;
            sector += 1;
        }
        if self.joliet {
            put(&mut out, sector, &self.primary_descriptor(&layout, total_sectors, true))?;
            sector += 1;
        }
        put(&mut out, sector, &terminator())?;
        sector += 1;
        if self.udf {
            for id in [b"BEA01", b"NSR02", b"TEA01"] {
                let mut d = vec![0u8; SECTOR as usize];
                d[1..6].copy_from_slice(id);
                d[6] = 1;
                put(&mut out, sector, &d)?;
                sector += 1;
            }
        }

        // Directory extents
        for (i, node) in tree.nodes.iter().enumerate() {
            if !node.is_dir() {
                continue;
            }
            put(&mut out, layout.plain[i].0, &tree.directory_extent(i, false, &layout))?;
            if self.joliet {
                put(&mut out, layout.joliet[i].0, &tree.directory_extent(i, true, &layout))?;
            }
        }

        if self.udf {
            self.write_udf(&mut out, &tree, &layout, total_sectors)?;
        }

        // File data
        for (i, node) in tree.nodes.iter().enumerate() {
            if let Node::File { content, .. } = node {
                out.seek(SeekFrom::Start(layout.data[i] * SECTOR))?;
                match content {
                    Content::Bytes(bytes) => out.write_all(bytes)?,
                    Content::Local(path) => {
                        io::copy(&mut File::open(path)?, &mut out)?;
                    }
                }
            }
        }

        if let Some(lba) = catalog_lba {
            let catalog = self.catalog(&tree, &layout)?;
            put(&mut out, lba, &catalog)?;
        }

        out.flush()
    }

    fn primary_descriptor(&self, layout: &Layout, total_sectors: u64, joliet: bool) -> Vec<u8> {
        let mut d = vec![0u8; SECTOR as usize];
        d[0] = if joliet { 2 } else { 1 };
        d[1..6].copy_from_slice(b"CD001");
        d[6] = 1;
        d[8..40].fill(b' ');

        if joliet {
            d[40..72].fill(0);
            let units: Vec<u8> = self
                .label
                .encode_utf16()
                .take(16)
                .flat_map(|u| u.to_be_bytes())
                .collect();
            d[40..40 + units.len()].copy_from_slice(&units);
            d[88..91].copy_from_slice(&[0x25, 0x2F, 0x45]);
        } else {
            d[40..72].fill(b' ');
            let label = self.label.as_bytes();
            let len = label.len().min(32);
            d[40..40 + len].copy_from_slice(&label[..len]);
        }

        both_u32(&mut d[80..88], total_sectors as u32);
        both_u16(&mut d[120..124], 1);
        both_u16(&mut d[124..128], 1);
        both_u16(&mut d[128..132], SECTOR as u16);

        let (lba, size) = if joliet { layout.joliet[0] } else { layout.plain[0] };
        d[156..190].copy_from_slice(&dir_record(&[0], lba as u32, size as u32, true));
        d[881] = 1;
        d
    }

    fn catalog(&self, tree: &FlatTree, layout: &Layout) -> io::Result<Vec<u8>> {
        let lookup = |path: &str| {
            tree.find(path).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("boot file {} not in tree", path))
            })
        };

        let mut entries: Vec<(u8, u32, u16)> = Vec::new();
        if let Some((path, load_size)) = &self.bios {
            let i = lookup(path)?;
            entries.push((CatalogEntry::PLATFORM_X86, layout.data[i] as u32, *load_size));
        }
        if let Some(path) = &self.uefi {
            let i = lookup(path)?;
            if self.uefi_in_catalog || entries.is_empty() {
                let sectors = tree.nodes[i].size().div_ceil(512).min(u16::MAX as u64) as u16;
                entries.push((CatalogEntry::PLATFORM_EFI, layout.data[i] as u32, sectors));
            }
        }

        let mut catalog = vec![0u8; SECTOR as usize];
        let Some(first) = entries.first() else {
            return Ok(catalog);
        };
        catalog[0..32].copy_from_slice(&validation_entry(first.0));
        catalog[32..64].copy_from_slice(&boot_entry(first.1, first.2));

        let mut offset = 64;
        for (position, (platform, rba, sectors)) in entries.iter().enumerate().skip(1) {
            catalog[offset] = if position + 1 == entries.len() { 0x91 } else { 0x90 };
            catalog[offset + 1] = *platform;
            catalog[offset + 2..offset + 4].copy_from_slice(&1u16.to_le_bytes());
            offset += 32;
            catalog[offset..offset + 32].copy_from_slice(&boot_entry(*rba, *sectors));
            offset += 32;
        }
        Ok(catalog)
    }

    fn write_udf(&self, out: &mut File, tree: &FlatTree, layout: &Layout, total_sectors: u64) -> io::Result<()> {
        let mut anchor = vec![0u8; SECTOR as usize];
        anchor[16..20].copy_from_slice(&(3 * SECTOR as u32).to_le_bytes());
        anchor[20..24].copy_from_slice(&(UDF_SEQUENCE as u32).to_le_bytes());
        anchor[24..28].copy_from_slice(&(3 * SECTOR as u32).to_le_bytes());
        anchor[28..32].copy_from_slice(&(UDF_SEQUENCE as u32).to_le_bytes());
        tag(&mut anchor, 2, UDF_ANCHOR as u32);
        put(out, UDF_ANCHOR, &anchor)?;

        let mut partition = vec![0u8; SECTOR as usize];
        partition[22..24].copy_from_slice(&0u16.to_le_bytes());
        partition[188..192].copy_from_slice(&0u32.to_le_bytes());
        partition[192..196].copy_from_slice(&(total_sectors as u32).to_le_bytes());
        tag(&mut partition, 5, UDF_SEQUENCE as u32);
        put(out, UDF_SEQUENCE, &partition)?;

        let mut logical = vec![0u8; SECTOR as usize];
        let label: Vec<u8> = std::iter::once(8u8).chain(self.label.bytes().take(126)).collect();
        logical[84..84 + label.len()].copy_from_slice(&label);
        logical[211] = label.len() as u8;
        logical[212..216].copy_from_slice(&(SECTOR as u32).to_le_bytes());
        logical[248..264].copy_from_slice(&long_ad(SECTOR as u32, UDF_FILE_SET as u32));
        logical[264..268].copy_from_slice(&6u32.to_le_bytes());
        logical[268..272].copy_from_slice(&1u32.to_le_bytes());
        logical[440] = 1;
        logical[441] = 6;
        logical[442..444].copy_from_slice(&1u16.to_le_bytes());
        logical[444..446].copy_from_slice(&0u16.to_le_bytes());
        tag(&mut logical, 6, UDF_SEQUENCE as u32 + 1);
        put(out, UDF_SEQUENCE + 1, &logical)?;

        let mut terminating = vec![0u8; SECTOR as usize];
        tag(&mut terminating, 8, UDF_SEQUENCE as u32 + 2);
        put(out, UDF_SEQUENCE + 2, &terminating)?;

        let mut file_set = vec![0u8; SECTOR as usize];
        file_set[400..416].copy_from_slice(&long_ad(SECTOR as u32, layout.udf_entry[0] as u32));
        tag(&mut file_set, 256, UDF_FILE_SET as u32);
        put(out, UDF_FILE_SET, &file_set)?;

        for (i, node) in tree.nodes.iter().enumerate() {
            let (is_dir, size, start) = match node {
                Node::Dir { .. } => {
                    put(out, layout.udf_dir[i].0, &tree.fid_stream(i, layout))?;
                    (true, layout.udf_dir[i].1, layout.udf_dir[i].0)
                }
                Node::File { size, .. } => (false, *size, layout.data[i]),
            };
            put(out, layout.udf_entry[i], &file_entry(layout.udf_entry[i], is_dir, size, start))?;
        }
        Ok(())
    }
}

#[derive(Debug)]
enum Node {
    Dir { name: String, parent: usize, children: Vec<usize> },
    File { name: String, size: u64, content: Content },
}

impl Node {
    fn is_dir(&self) -> bool {
        matches!(self, Node::Dir { .. })
    }

    fn name(&self) -> &str {
        match self {
            Node::Dir { name, .. } | Node::File { name, .. } => name,
        }
    }

    fn size(&self) -> u64 {
        match self {
            Node::File { size, .. } => *size,
            Node::Dir { .. } => 0,
        }
    }
}

/// Arena of nodes; index 0 is the root directory.
struct FlatTree {
    nodes: Vec<Node>,
    paths: HashMap<String, usize>,
}

impl FlatTree {
    fn build(root: &BTreeMap<String, Entry>) -> io::Result<Self> {
        let mut tree = Self {
            nodes: vec![Node::Dir { name: String::new(), parent: 0, children: Vec::new() }],
            paths: HashMap::new(),
        };
        tree.add_children(0, "", root)?;
        Ok(tree)
    }

    fn add_children(&mut self, parent: usize, prefix: &str, entries: &BTreeMap<String, Entry>) -> io::Result<()> {
        for (name, entry) in entries {
            let index = self.nodes.len();
            let path = format!("{}/{}", prefix, name);
            match entry {
                Entry::Dir(children) => {
                    self.nodes.push(Node::Dir { name: name.clone(), parent, children: Vec::new() });
                    self.attach(parent, index);
                    self.paths.insert(path.clone(), index);
                    self.add_children(index, &path, children)?;
                }
                Entry::File(content) => {
                    let size = content.len()?;
                    self.nodes.push(Node::File { name: name.clone(), size, content: content.clone() });
                    self.attach(parent, index);
                    self.paths.insert(path, index);
                }
            }
        }
        Ok(())
    }

    fn attach(&mut self, parent: usize, child: usize) {
        if let Node::Dir { children, .. } = &mut self.nodes[parent] {
            children.push(child);
        }
    }

    fn find(&self, path: &str) -> Option<usize> {
        self.paths.get(path).copied()
    }

    fn children(&self, dir: usize) -> &[usize] {
        match &self.nodes[dir] {
            Node::Dir { children, .. } => children,
            Node::File { .. } => &[],
        }
    }

    fn parent(&self, dir: usize) -> usize {
        match &self.nodes[dir] {
            Node::Dir { parent, .. } => *parent,
            Node::File { .. } => 0,
        }
    }

    /// Directory records of one ISO 9660 or Joliet directory, sector padded.
    fn directory_extent(&self, dir: usize, joliet: bool, layout: &Layout) -> Vec<u8> {
        let table = if joliet { &layout.joliet } else { &layout.plain };
        let (own_lba, own_size) = table[dir];
        let (parent_lba, parent_size) = table[self.parent(dir)];

        let mut records = vec![
            dir_record(&[0], own_lba as u32, own_size as u32, true),
            dir_record(&[1], parent_lba as u32, parent_size as u32, true),
        ];
        for &child in self.children(dir) {
            let node = &self.nodes[child];
            let name = match node {
                Node::Dir { name, .. } => name.clone(),
                Node::File { name, .. } => format!("{};1", name),
            };
            let id: Vec<u8> = if joliet {
                name.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
            } else {
                name.into_bytes()
            };
            let (lba, size) = match node {
                Node::Dir { .. } => table[child],
                Node::File { size, .. } => (layout.data[child], *size),
            };
            records.push(dir_record(&id, lba as u32, size as u32, node.is_dir()));
        }

        let mut data: Vec<u8> = Vec::new();
        for record in records {
            let used = data.len() % SECTOR as usize;
            if used + record.len() > SECTOR as usize {
                data.resize(data.len() + SECTOR as usize - used, 0);
            }
            data.extend_from_slice(&record);
        }
        let padded = (data.len() as u64).div_ceil(SECTOR).max(1) * SECTOR;
        data.resize(padded as usize, 0);
        data
    }

    /// UDF file identifier descriptors of one directory, unpadded.
    fn fid_stream(&self, dir: usize, layout: &Layout) -> Vec<u8> {
        let mut data = fid(0x0A, None, layout.udf_entry[self.parent(dir)] as u32);
        for &child in self.children(dir) {
            let node = &self.nodes[child];
            let characteristics = if node.is_dir() { 0x02 } else { 0x00 };
            data.extend(fid(characteristics, Some(node.name()), layout.udf_entry[child] as u32));
        }
        data
    }
}

/// Sector assignments per node index.
struct Layout {
    plain: Vec<(u64, u64)>,
    joliet: Vec<(u64, u64)>,
    udf_entry: Vec<u64>,
    udf_dir: Vec<(u64, u64)>,
    data: Vec<u64>,
}

impl Layout {
    fn new(len: usize) -> Self {
        Self {
            plain: vec![(0, 0); len],
            joliet: vec![(0, 0); len],
            udf_entry: vec![0; len],
            udf_dir: vec![(0, 0); len],
            data: vec![0; len],
        }
    }
}

fn put(out: &mut File, sector: u64, bytes: &[u8]) -> io::Result<()> {
    out.seek(SeekFrom::Start(sector * SECTOR))?;
    out.write_all(bytes)
}

fn both_u16(field: &mut [u8], value: u16) {
    field[0..2].copy_from_slice(&value.to_le_bytes());
    field[2..4].copy_from_slice(&value.to_be_bytes());
}

fn both_u32(field: &mut [u8], value: u32) {
    field[0..4].copy_from_slice(&value.to_le_bytes());
    field[4..8].copy_from_slice(&value.to_be_bytes());
}

fn dir_record(id: &[u8], lba: u32, size: u32, is_dir: bool) -> Vec<u8> {
    let mut length = 33 + id.len();
    if length % 2 != 0 {
        length += 1;
    }
    let mut r = vec![0u8; length];
    r[0] = length as u8;
    both_u32(&mut r[2..10], lba);
    both_u32(&mut r[10..18], size);
    r[18..25].copy_from_slice(&RECORD_DATE);
    r[25] = if is_dir { 0x02 } else { 0x00 };
    both_u16(&mut r[28..32], 1);
    r[32] = id.len() as u8;
    r[33..33 + id.len()].copy_from_slice(id);
    r
}

fn boot_record(catalog_lba: u64) -> Vec<u8> {
    let mut d = vec![0u8; SECTOR as usize];
    d[1..6].copy_from_slice(b"CD001");
    d[6] = 1;
    let id = b"EL TORITO SPECIFICATION";
    d[7..7 + id.len()].copy_from_slice(id);
    d[71..75].copy_from_slice(&(catalog_lba as u32).to_le_bytes());
    d
}

fn terminator() -> Vec<u8> {
    let mut d = vec![0u8; SECTOR as usize];
    d[0] = 255;
    d[1..6].copy_from_slice(b"CD001");
    d[6] = 1;
    d
}

fn boot_entry(rba: u32, sectors: u16) -> [u8; 32] {
    let mut e = [0u8; 32];
    e[0] = 0x88;
    e[6..8].copy_from_slice(&sectors.to_le_bytes());
    e[8..12].copy_from_slice(&rba.to_le_bytes());
    e
}

/// Descriptor tag with identifier, version 2, location and header checksum.
fn tag(descriptor: &mut [u8], id: u16, location: u32) {
    descriptor[0..2].copy_from_slice(&id.to_le_bytes());
    descriptor[2..4].copy_from_slice(&2u16.to_le_bytes());
    descriptor[12..16].copy_from_slice(&location.to_le_bytes());
    let checksum = descriptor[0..16]
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 4)
        .fold(0u8, |sum, (_, b)| sum.wrapping_add(*b));
    descriptor[4] = checksum;
}

fn long_ad(length: u32, block: u32) -> [u8; 16] {
    let mut ad = [0u8; 16];
    ad[0..4].copy_from_slice(&length.to_le_bytes());
    ad[4..8].copy_from_slice(&block.to_le_bytes());
    ad
}

fn fid(characteristics: u8, name: Option<&str>, icb_block: u32) -> Vec<u8> {
    let identifier: Vec<u8> = match name {
        Some(name) => std::iter::once(16u8)
            .chain(name.encode_utf16().flat_map(|u| u.to_be_bytes()))
            .collect(),
        None => Vec::new(),
    };
    let length = (38 + identifier.len() + 3) & !3;
    let mut f = vec![0u8; length];
    f[16..18].copy_from_slice(&1u16.to_le_bytes());
    f[18] = characteristics;
    f[19] = identifier.len() as u8;
    f[20..36].copy_from_slice(&long_ad(SECTOR as u32, icb_block));
    f[38..38 + identifier.len()].copy_from_slice(&identifier);
    tag(&mut f, 257, 0);
    f
}

/// File entry with short allocation descriptors over one contiguous run.
fn file_entry(location: u64, is_dir: bool, size: u64, start: u64) -> Vec<u8> {
    let mut e = vec![0u8; SECTOR as usize];
    e[27] = if is_dir { 4 } else { 5 };
    e[56..64].copy_from_slice(&size.to_le_bytes());
    e[84..86].copy_from_slice(&0x1000u16.to_le_bytes());
    e[86..88].copy_from_slice(&2024i16.to_le_bytes());
    e[88] = 1;
    e[89] = 1;

    let mut descriptors = Vec::new();
    let mut remaining = size;
    let mut block = start;
    while remaining > 0 {
        let length = remaining.min(MAX_AD_LENGTH);
        descriptors.extend_from_slice(&(length as u32).to_le_bytes());
        descriptors.extend_from_slice(&(block as u32).to_le_bytes());
        remaining -= length;
        block += length / SECTOR;
    }
    e[172..176].copy_from_slice(&(descriptors.len() as u32).to_le_bytes());
    e[176..176 + descriptors.len()].copy_from_slice(&descriptors);
    tag(&mut e, 261, location as u32);
    e
}
