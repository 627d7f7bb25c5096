// Copy-on-rebuild editing of disc images: staging, queued operations and
// packaging into a new bootable image.

pub mod editor;
pub mod packager;
pub mod rebuild;
pub mod staging;

pub use editor::DiscImageEditor;
pub use packager::{build_arguments, ImagePackager, MkisofsPackager, PackagerFlavor, PackagingRequest, PACKAGING_TOOLS};
pub use rebuild::ImageRebuilder;
pub use staging::{apply_queue, extract_tree, ExtractionStats, NodeCache, ProbedNode, StagingTree};
