// Reading facade over disc images.
// One trait so the selector, reader and boot analyzer never depend on a
// particular on-disc parser.

use chrono::NaiveDateTime;
use isoedit_core::{FilesystemVariant, IsoEditError};
use std::io::{Read, Seek};

/// Raw child name as stored by the facade.
///
/// ExtendedAttributes names are 16-bit big-endian code units; Plain and
/// ExtendedNames names are UTF-8 bytes.
pub type RawName = Vec<u8>;

pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Byte stream over one file's content.
pub type FileStream = Box<dyn ReadSeek>;

/// Per-record metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub is_directory: bool,
    /// Data length straight from the record, when the format stores one.
    pub size: Option<u64>,
    pub modified: Option<NaiveDateTime>,
}

/// One El Torito catalog entry, in catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub platform_id: u8,
    pub bootable: bool,
    pub media_type: u8,
    pub no_emulation: bool,
    pub load_segment: u16,
    /// Virtual 512-byte sectors to load; zero when the author left it unset.
    pub sector_count: u16,
    pub load_rba: u32,
}

impl CatalogEntry {
    pub const PLATFORM_X86: u8 = 0x00;
    pub const PLATFORM_EFI: u8 = 0xEF;

    pub fn is_efi(&self) -> bool {
        self.platform_id == Self::PLATFORM_EFI
    }
}

/// Volume-level facts the facade can report without walking the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeSummary {
    pub volume_label: Option<String>,
    pub joliet_level: Option<u8>,
    pub udf_revision: Option<String>,
    pub has_rock_ridge: bool,
    pub logical_block_size: u32,
    pub volume_space_size: u32,
    pub has_boot_catalog: bool,
}

/// Read-only access to an opened disc image.
///
/// Every path argument is normalized and starts with `/`. `variant` picks
/// which of the coexisting directory trees the call reads.
pub trait DiscFacade: Send {
    /// The image carries a Joliet supplementary tree.
    fn has_extended_names(&self) -> bool;

    /// The image carries a UDF tree.
    fn has_extended_attributes(&self) -> bool;

    fn list_children(&mut self, variant: FilesystemVariant, path: &str) -> Result<Vec<RawName>, IsoEditError>;

    fn open_stream(&mut self, variant: FilesystemVariant, path: &str) -> Result<FileStream, IsoEditError>;

    fn get_record_metadata(&mut self, variant: FilesystemVariant, path: &str) -> Result<RecordMetadata, IsoEditError>;

    /// Catalog entries in order, or `None` when the image has no boot record.
    fn boot_catalog(&mut self) -> Result<Option<Vec<CatalogEntry>>, IsoEditError>;

    fn summary(&self) -> VolumeSummary;

    /// Release the underlying handle. Later calls fail with `LibraryUnavailable`.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}
