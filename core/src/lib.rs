pub mod config;
pub mod error;
pub mod filesystem;
pub mod operations;
pub mod tools;

pub use config::{EditorConfig, ExtractionMode, MIB};
pub use error::{IsoEditError, Result};
pub use filesystem::{BootDescriptor, BootInfo, BootKind, FilesystemInfo, FilesystemVariant, RebuildResult};
pub use operations::{
    join_image_path, local_path_for, normalize_image_path, parent_image_path, FileOperation,
    OperationQueue, SkipSet,
};
pub use tools::{ExternalTool, ToolOutput};
