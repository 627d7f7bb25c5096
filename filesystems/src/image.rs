// Opened disc image handle

use crate::boot;
use crate::detection::BoundFacade;
use crate::facade::DiscFacade;
use crate::iso9660::IsoImage;
use crate::reader::{DirectoryListing, ImageReader};
use crate::text::TextEncoding;
use isoedit_core::{BootInfo, EditorConfig, FilesystemInfo, FilesystemVariant, IsoEditError};
use log::info;
use std::path::Path;

/// A source image opened for reading.
///
/// Owns the selected variant and the analyzed boot information. Dropping the
/// handle or calling `close` releases the file exactly once.
pub struct DiscImage {
    reader: ImageReader,
    boot: BootInfo,
}

impl DiscImage {
    pub fn open(path: impl AsRef<Path>, config: &EditorConfig) -> Result<Self, IsoEditError> {
        let path = path.as_ref();
        config.validate()?;
        let facade = IsoImage::open(path)?;
        Self::from_facade(path, Box::new(facade), config)
    }

    /// Wrap an already opened facade.
    pub fn from_facade(
        path: &Path,
        facade: Box<dyn DiscFacade>,
        config: &EditorConfig,
    ) -> Result<Self, IsoEditError> {
        let bound = BoundFacade::select(facade)?;
        let mut reader = ImageReader::new(path.to_path_buf(), bound, config.clone());
        let boot = boot::analyze(&mut reader)?;

        info!(
            "Opened {} as {} ({})",
            path.display(),
            reader.variant(),
            if boot.is_bootable() { "bootable" } else { "not bootable" }
        );
        Ok(Self { reader, boot })
    }

    pub fn path(&self) -> &Path {
        self.reader.source()
    }

    pub fn variant(&self) -> FilesystemVariant {
        self.reader.variant()
    }

    pub fn boot_info(&self) -> &BootInfo {
        &self.boot
    }

    pub fn config(&self) -> &EditorConfig {
        self.reader.config()
    }

    pub fn list_directory(&mut self, path: &str) -> DirectoryListing {
        self.reader.list_directory(path)
    }

    pub fn file_exists(&mut self, path: &str) -> bool {
        self.reader.file_exists(path)
    }

    pub fn directory_exists(&mut self, path: &str) -> bool {
        self.reader.directory_exists(path)
    }

    pub fn get_file_size(&mut self, path: &str) -> Result<u64, IsoEditError> {
        self.reader.get_file_size(path)
    }

    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>, IsoEditError> {
        self.reader.read_file(path)
    }

    pub fn read_file_text(&mut self, path: &str, encoding: TextEncoding) -> Result<String, IsoEditError> {
        self.reader.read_file_text(path, encoding)
    }

    pub async fn extract_file(&mut self, path: &str, output: &Path) -> Result<(), IsoEditError> {
        self.reader.extract_file(path, output).await
    }

    pub fn get_filesystem_info(&self) -> FilesystemInfo {
        self.reader.get_filesystem_info()
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_closed()
    }

    pub fn close(mut self) {
        self.reader.close();
    }
}

impl Drop for DiscImage {
    fn drop(&mut self) {
        self.reader.close();
    }
}
