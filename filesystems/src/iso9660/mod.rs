// Native disc image reader
// ISO 9660 primary tree, Joliet supplementary tree, UDF file set and the
// El Torito boot catalog, all served through the DiscFacade trait.

pub mod directory;
pub mod eltorito;
pub mod stream;
pub mod udf;
pub mod volume;

use crate::facade::{CatalogEntry, DiscFacade, FileStream, RawName, RecordMetadata, VolumeSummary};
use chrono::NaiveDateTime;
use directory::{has_rock_ridge, parse_directory};
use isoedit_core::{FilesystemVariant, IsoEditError};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use stream::{read_extents, Extent, ExtentStream};
use udf::{LongAd, UdfData, UdfVolume};
use volume::{RootRecord, VolumeSet};

pub const SECTOR_SIZE: u64 = 2048;

#[derive(Debug, Clone)]
enum NodeSource {
    Record {
        extents: Vec<Extent>,
        recorded: Option<NaiveDateTime>,
    },
    Udf(LongAd),
}

/// A resolved directory child.
#[derive(Debug, Clone)]
struct Node {
    name: String,
    is_dir: bool,
    size: Option<u64>,
    source: NodeSource,
}

impl Node {
    fn raw_name(&self, variant: FilesystemVariant) -> RawName {
        if variant.uses_wide_names() {
            self.name.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
        } else {
            self.name.as_bytes().to_vec()
        }
    }
}

/// An opened disc image file.
pub struct IsoImage {
    path: PathBuf,
    file: Option<File>,
    volumes: VolumeSet,
    udf: Option<UdfVolume>,
    rock_ridge: bool,
    dir_cache: HashMap<(FilesystemVariant, String), Vec<Node>>,
}

impl IsoImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IsoEditError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(IsoEditError::SourceNotFound(path.display().to_string()));
        }

        let mut file = File::open(path)?;
        let volumes = volume::scan(&mut file)?;
        if volumes.is_empty() {
            return Err(IsoEditError::LibraryUnavailable(format!(
                "{} carries no ISO 9660 or UDF volume",
                path.display()
            )));
        }

        let udf = match &volumes.udf_revision {
            Some(revision) => match UdfVolume::mount(&mut file, revision) {
                Ok(volume) => Some(volume),
                Err(e) => {
                    warn!("UDF recognition sequence present but volume unusable: {}", e);
                    None
                }
            },
            None => None,
        };

        let rock_ridge = match volumes.primary {
            Some(root) => {
                let data = read_extents(&mut file, &[root_extent(root)])?;
                has_rock_ridge(&data)
            }
            None => false,
        };

        info!(
            "Opened {} (primary: {}, joliet: {:?}, udf: {:?}, boot catalog: {})",
            path.display(),
            volumes.primary.is_some(),
            volumes.joliet_level,
            udf.as_ref().map(|u| u.revision.as_str()),
            volumes.boot_catalog_lba.is_some()
        );

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            volumes,
            udf,
            rock_ridge,
            dir_cache: HashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut File, IsoEditError> {
        self.file
            .as_mut()
            .ok_or_else(|| IsoEditError::LibraryUnavailable("image handle is closed".to_string()))
    }

    fn root_node(&self, variant: FilesystemVariant) -> Result<Node, IsoEditError> {
        let record = |root: Option<RootRecord>, what: &str| {
            root.map(|r| Node {
                name: String::new(),
                is_dir: true,
                size: Some(r.length as u64),
                source: NodeSource::Record {
                    extents: vec![root_extent(r)],
                    recorded: None,
                },
            })
            .ok_or_else(|| IsoEditError::NotSupported(format!("image has no {} tree", what)))
        };

        match variant {
            FilesystemVariant::Plain => record(self.volumes.primary, "ISO 9660"),
            FilesystemVariant::ExtendedNames => record(self.volumes.joliet, "Joliet"),
            FilesystemVariant::ExtendedAttributes => self
                .udf
                .as_ref()
                .map(|udf| Node {
                    name: String::new(),
                    is_dir: true,
                    size: None,
                    source: NodeSource::Udf(udf.root),
                })
                .ok_or_else(|| IsoEditError::NotSupported("image has no UDF tree".to_string())),
        }
    }

    /// Children of a directory node, cached per variant and path.
    fn children(&mut self, variant: FilesystemVariant, path: &str, node: &Node) -> Result<Vec<Node>, IsoEditError> {
        let key = (variant, path.to_string());
        if let Some(cached) = self.dir_cache.get(&key) {
            return Ok(cached.clone());
        }

        let block_size = self.volumes.logical_block_size as u64;
        let children: Vec<Node> = match &node.source {
            NodeSource::Record { extents, .. } => {
                let file = self.file()?;
                let data = read_extents(file, extents)?;
                parse_directory(&data, block_size, variant == FilesystemVariant::ExtendedNames)?
                    .into_iter()
                    .map(|record| Node {
                        name: record.name,
                        is_dir: record.is_dir,
                        size: Some(record.size),
                        source: NodeSource::Record {
                            extents: record.extents,
                            recorded: record.recorded,
                        },
                    })
                    .collect()
            }
            NodeSource::Udf(icb) => {
                let icb = *icb;
                let udf = self.udf.clone().ok_or_else(|| {
                    IsoEditError::NotSupported("image has no UDF tree".to_string())
                })?;
                let file = self.file()?;
                let entry = udf.read_file_entry(file, icb)?;
                udf.read_directory(file, &entry)?
                    .into_iter()
                    .map(|child| Node {
                        name: child.name,
                        is_dir: child.is_dir,
                        size: None,
                        source: NodeSource::Udf(child.icb),
                    })
                    .collect()
            }
        };

        debug!("Cached {} entries for {} ({})", children.len(), path, variant);
        self.dir_cache.insert(key, children.clone());
        Ok(children)
    }

    /// Walk from the root to `path`. Exact names win over case-folded ones.
    fn resolve(&mut self, variant: FilesystemVariant, path: &str) -> Result<Node, IsoEditError> {
        self.file()?;
        let mut node = self.root_node(variant)?;
        let mut current = String::from("/");

        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !node.is_dir {
                return Err(IsoEditError::PathNotFound(path.to_string()));
            }
            let children = self.children(variant, &current, &node)?;
            let found = children
                .iter()
                .find(|c| c.name == component)
                .or_else(|| children.iter().find(|c| c.name.eq_ignore_ascii_case(component)))
                .cloned()
                .ok_or_else(|| IsoEditError::PathNotFound(path.to_string()))?;

            if current.len() > 1 {
                current.push('/');
            }
            current.push_str(&found.name);
            node = found;
        }

        Ok(node)
    }
}

fn root_extent(root: RootRecord) -> Extent {
    Extent::data(root.lba as u64 * SECTOR_SIZE, root.length as u64)
}

impl DiscFacade for IsoImage {
    fn has_extended_names(&self) -> bool {
        self.volumes.joliet.is_some()
    }

    fn has_extended_attributes(&self) -> bool {
        self.udf.is_some()
    }

    fn list_children(&mut self, variant: FilesystemVariant, path: &str) -> Result<Vec<RawName>, IsoEditError> {
        let node = self.resolve(variant, path)?;
        if !node.is_dir {
            return Err(IsoEditError::InvalidInput(format!("{} is not a directory", path)));
        }
        let children = self.children(variant, path, &node)?;
        Ok(children.iter().map(|c| c.raw_name(variant)).collect())
    }

    fn open_stream(&mut self, variant: FilesystemVariant, path: &str) -> Result<FileStream, IsoEditError> {
        let node = self.resolve(variant, path)?;
        if node.is_dir {
            return Err(IsoEditError::InvalidInput(format!("{} is a directory", path)));
        }

        match node.source {
            NodeSource::Record { extents, .. } => {
                let len = node.size.unwrap_or(0);
                let file = File::open(&self.path)?;
                Ok(Box::new(ExtentStream::new(file, extents, len)))
            }
            NodeSource::Udf(icb) => {
                let udf = self.udf.clone().ok_or_else(|| {
                    IsoEditError::NotSupported("image has no UDF tree".to_string())
                })?;
                let entry = udf.read_file_entry(self.file()?, icb)?;
                match entry.data {
                    UdfData::Inline(bytes) => Ok(Box::new(Cursor::new(bytes))),
                    UdfData::Extents(extents) => {
                        let file = File::open(&self.path)?;
                        Ok(Box::new(ExtentStream::new(file, extents, entry.size)))
                    }
                }
            }
        }
    }

    fn get_record_metadata(&mut self, variant: FilesystemVariant, path: &str) -> Result<RecordMetadata, IsoEditError> {
        let node = self.resolve(variant, path)?;
        match node.source {
            NodeSource::Record { recorded, .. } => Ok(RecordMetadata {
                is_directory: node.is_dir,
                size: if node.is_dir { None } else { node.size },
                modified: recorded,
            }),
            NodeSource::Udf(icb) => {
                let udf = self.udf.clone().ok_or_else(|| {
                    IsoEditError::NotSupported("image has no UDF tree".to_string())
                })?;
                let entry = udf.read_file_entry(self.file()?, icb)?;
                Ok(RecordMetadata {
                    is_directory: entry.is_dir,
                    size: if entry.is_dir { None } else { Some(entry.size) },
                    modified: entry.modified,
                })
            }
        }
    }

    fn boot_catalog(&mut self) -> Result<Option<Vec<CatalogEntry>>, IsoEditError> {
        let Some(lba) = self.volumes.boot_catalog_lba else {
            return Ok(None);
        };
        let file = self.file()?;
        let mut sector = vec![0u8; SECTOR_SIZE as usize];
        file.seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE))?;
        file.read_exact(&mut sector)?;
        eltorito::parse_catalog(&sector).map(Some)
    }

    fn summary(&self) -> VolumeSummary {
        VolumeSummary {
            volume_label: self
                .volumes
                .volume_label
                .clone()
                .or_else(|| self.udf.as_ref().and_then(|u| u.label.clone())),
            joliet_level: self.volumes.joliet_level,
            udf_revision: self.udf.as_ref().map(|u| u.revision.clone()),
            has_rock_ridge: self.rock_ridge,
            logical_block_size: self.volumes.logical_block_size,
            volume_space_size: self.volumes.volume_space_size,
            has_boot_catalog: self.volumes.boot_catalog_lba.is_some(),
        }
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed {}", self.path.display());
        }
        self.dir_cache.clear();
    }

    fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

impl Drop for IsoImage {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::IsoAuthor;
    use std::io::Read;

    fn names(raw: Vec<RawName>) -> Vec<String> {
        raw.into_iter()
            .map(|n| String::from_utf8(n).unwrap())
            .collect()
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = IsoImage::open(dir.path().join("absent.iso"));
        assert!(matches!(result, Err(IsoEditError::SourceNotFound(_))));
    }

    #[test]
    fn test_open_non_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.iso");
        std::fs::write(&path, vec![0u8; 64 * 1024]).unwrap();
        let result = IsoImage::open(&path);
        assert!(matches!(result, Err(IsoEditError::LibraryUnavailable(_))));
    }

    #[test]
    fn test_plain_tree_listing_and_streams() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.iso");
        IsoAuthor::new("PLAIN")
            .file("/README.TXT", b"hello")
            .file("/SOURCES/BOOT.WIM", &[7u8; 5000])
            .write_to(&path)
            .unwrap();

        let mut image = IsoImage::open(&path).unwrap();
        assert!(!image.has_extended_names());
        assert!(!image.has_extended_attributes());

        let root = names(image.list_children(FilesystemVariant::Plain, "/").unwrap());
        assert_eq!(root, vec!["README.TXT", "SOURCES"]);

        let mut content = Vec::new();
        image
            .open_stream(FilesystemVariant::Plain, "/sources/boot.wim")
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content.len(), 5000);

        let meta = image.get_record_metadata(FilesystemVariant::Plain, "/SOURCES").unwrap();
        assert!(meta.is_directory);

        assert!(matches!(
            image.list_children(FilesystemVariant::ExtendedNames, "/"),
            Err(IsoEditError::NotSupported(_))
        ));
    }

    #[test]
    fn test_udf_tree_names_are_wide() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("udf.iso");
        IsoAuthor::new("UDF")
            .with_udf()
            .file("/efi/boot/bootx64.efi", b"efi")
            .write_to(&path)
            .unwrap();

        let mut image = IsoImage::open(&path).unwrap();
        assert!(image.has_extended_attributes());

        let raw = image.list_children(FilesystemVariant::ExtendedAttributes, "/efi").unwrap();
        assert_eq!(raw, vec![vec![0, b'b', 0, b'o', 0, b'o', 0, b't']]);

        let meta = image
            .get_record_metadata(FilesystemVariant::ExtendedAttributes, "/efi/boot/bootx64.efi")
            .unwrap();
        assert_eq!(meta.size, Some(3));
    }

    #[test]
    fn test_closed_image_refuses_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("closed.iso");
        IsoAuthor::new("CLOSED").file("/A.TXT", b"a").write_to(&path).unwrap();

        let mut image = IsoImage::open(&path).unwrap();
        image.close();
        assert!(image.is_closed());
        assert!(matches!(
            image.list_children(FilesystemVariant::Plain, "/"),
            Err(IsoEditError::LibraryUnavailable(_))
        ));
    }

    #[test]
    fn test_boot_catalog_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.iso");
        IsoAuthor::new("BOOT")
            .file("/boot/etfsboot.com", &[0xB0; 4096])
            .file("/efi/microsoft/boot/efisys.bin", &[0xEF; 2048])
            .bios_boot("/boot/etfsboot.com", 8)
            .uefi_boot("/efi/microsoft/boot/efisys.bin")
            .write_to(&path)
            .unwrap();

        let mut image = IsoImage::open(&path).unwrap();
        let entries = image.boot_catalog().unwrap().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].is_efi());
        assert!(entries[1].is_efi());
        assert!(image.summary().has_boot_catalog);
    }
}
