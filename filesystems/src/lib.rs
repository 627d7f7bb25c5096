// Disc image reading: ISO 9660, Joliet, UDF and El Torito.

pub mod boot;
pub mod detection;
pub mod facade;
pub mod image;
pub mod iso9660;
pub mod reader;
pub mod text;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use boot::{analyze as analyze_boot, resolve_boot_descriptors, BIOS_CANDIDATES, UEFI_CANDIDATES};
pub use detection::{select_variant, BoundFacade};
pub use facade::{CatalogEntry, DiscFacade, FileStream, RawName, RecordMetadata, VolumeSummary};
pub use image::DiscImage;
pub use iso9660::IsoImage;
pub use reader::{decode_name, DirectoryListing, ImageReader, ARCHIVE_TOOLS};
pub use text::TextEncoding;
