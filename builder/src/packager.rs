// Packaging tool abstraction
// A packager serializes a staging tree plus boot parameters into a new
// image. The shipped implementation drives xorriso or genisoimage/mkisofs.

use async_trait::async_trait;
use isoedit_core::{BootDescriptor, EditorConfig, ExternalTool, FilesystemVariant, IsoEditError, ToolOutput};
use log::debug;
use std::path::PathBuf;
use std::time::Duration;

pub const PACKAGING_TOOLS: &[&str] = &["xorriso", "genisoimage", "mkisofs"];

const CATALOG_NAME: &str = "boot.catalog";

/// Everything a packager needs for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagingRequest {
    pub staging_dir: PathBuf,
    pub output: PathBuf,
    pub variant: FilesystemVariant,
    pub volume_label: String,
    pub bios: Option<BootDescriptor>,
    pub uefi: Option<BootDescriptor>,
}

impl PackagingRequest {
    pub fn has_boot(&self) -> bool {
        self.bios.is_some() || self.uefi.is_some()
    }
}

#[async_trait]
pub trait ImagePackager: Send + Sync {
    fn name(&self) -> &str;

    fn requires_external_tools(&self) -> bool;

    /// Produce `request.output`. A tool that ran but failed reports it through
    /// `ToolOutput::success`; errors are reserved for not being able to run.
    async fn package(&self, request: &PackagingRequest) -> Result<ToolOutput, IsoEditError>;
}

/// Command-line dialect of the packaging tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackagerFlavor {
    /// xorriso in its mkisofs emulation mode.
    Xorriso,
    Genisoimage,
    Mkisofs,
}

impl PackagerFlavor {
    pub fn from_tool_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.contains("xorriso") {
            PackagerFlavor::Xorriso
        } else if name.contains("genisoimage") {
            PackagerFlavor::Genisoimage
        } else {
            PackagerFlavor::Mkisofs
        }
    }
}

/// Boot image paths are given relative to the source directory.
fn relative(image_path: &str) -> String {
    image_path.trim_start_matches('/').to_string()
}

/// Arguments for one packaging run, in the order the tool expects them.
pub fn build_arguments(flavor: PackagerFlavor, request: &PackagingRequest) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    if flavor == PackagerFlavor::Xorriso {
        push(&["-as", "mkisofs"]);
    }

    // Level 3 allows multi-extent files above 4 GiB
    push(&["-iso-level", "3"]);

    match request.variant {
        FilesystemVariant::Plain => {}
        FilesystemVariant::ExtendedNames => push(&["-J", "-joliet-long"]),
        // No UDF output in mkisofs mode; Joliet plus Rock Ridge keeps long
        // names and large files
        FilesystemVariant::ExtendedAttributes => push(&["-J", "-joliet-long", "-R"]),
    }

    push(&["-V", request.volume_label.as_str()]);

    if request.has_boot() && flavor != PackagerFlavor::Xorriso {
        push(&[
            "-c",
            CATALOG_NAME,
            "-hide",
            CATALOG_NAME,
            "-hide-joliet",
            CATALOG_NAME,
        ]);
    }

    if let Some(bios) = &request.bios {
        push(&["-b", relative(&bios.image_path).as_str()]);
        if bios.no_emulation {
            push(&["-no-emul-boot", "-boot-load-size", bios.load_size.to_string().as_str()]);
        }
        if bios.uses_info_table {
            push(&["-boot-info-table"]);
        }
    }

    if let Some(uefi) = &request.uefi {
        if request.bios.is_some() {
            push(&["-eltorito-alt-boot"]);
        }
        push(&["-e", relative(&uefi.image_path).as_str(), "-no-emul-boot"]);
    }

    push(&["-o", request.output.display().to_string().as_str()]);
    push(&[request.staging_dir.display().to_string().as_str()]);
    args
}

/// Packager backed by xorriso, genisoimage or mkisofs.
pub struct MkisofsPackager {
    tool: ExternalTool,
    flavor: PackagerFlavor,
    timeout: Duration,
}

impl MkisofsPackager {
    pub fn new(tool: ExternalTool, timeout: Duration) -> Self {
        let flavor = PackagerFlavor::from_tool_name(&tool.name);
        Self { tool, flavor, timeout }
    }

    /// Find a packaging tool from the configuration or `PATH`.
    pub fn locate(config: &EditorConfig) -> Result<Self, IsoEditError> {
        let tool = ExternalTool::locate(config.packager.as_deref(), PACKAGING_TOOLS)?;
        Ok(Self::new(tool, config.packager_timeout()))
    }

    pub fn flavor(&self) -> PackagerFlavor {
        self.flavor
    }
}

#[async_trait]
impl ImagePackager for MkisofsPackager {
    fn name(&self) -> &str {
        &self.tool.name
    }

    fn requires_external_tools(&self) -> bool {
        true
    }

    async fn package(&self, request: &PackagingRequest) -> Result<ToolOutput, IsoEditError> {
        let args = build_arguments(self.flavor, request);
        debug!("{} {}", self.tool.name, args.join(" "));
        self.tool.run(&args, self.timeout).await
    }
}
