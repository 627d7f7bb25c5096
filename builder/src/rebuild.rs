// Image rebuild from a staging tree

use crate::packager::{ImagePackager, PackagingRequest};
use crate::staging::StagingTree;
use isoedit_core::{
    BootDescriptor, BootInfo, EditorConfig, ExtractionMode, FilesystemVariant, IsoEditError,
    RebuildResult,
};
use isoedit_filesystems::DiscImage;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Drives one packaging run and checks what it produced.
pub struct ImageRebuilder<'a> {
    packager: &'a dyn ImagePackager,
    config: &'a EditorConfig,
}

impl<'a> ImageRebuilder<'a> {
    pub fn new(packager: &'a dyn ImagePackager, config: &'a EditorConfig) -> Self {
        Self { packager, config }
    }

    /// Keep each descriptor whose loader is staged, with the path as staged.
    fn revalidate(
        staging: &StagingTree,
        descriptor: Option<&BootDescriptor>,
        warnings: &mut Vec<String>,
    ) -> Option<BootDescriptor> {
        let descriptor = descriptor?;
        match staging.staged_image_path(&descriptor.image_path) {
            Some(path) if staging.resolve(&path).is_file() => Some(BootDescriptor {
                image_path: path,
                ..descriptor.clone()
            }),
            _ => {
                let warning = format!(
                    "{} loader {} is missing from the staged tree; its boot entry is dropped",
                    descriptor.kind, descriptor.image_path
                );
                warn!("{}", warning);
                warnings.push(warning);
                None
            }
        }
    }

    pub async fn rebuild(
        &self,
        staging: &StagingTree,
        variant: FilesystemVariant,
        boot: &BootInfo,
        volume_label: &str,
        output: &Path,
    ) -> Result<RebuildResult, IsoEditError> {
        let mut warnings = boot.warnings.clone();
        let bios = Self::revalidate(staging, boot.bios.as_ref(), &mut warnings);
        let uefi = Self::revalidate(staging, boot.uefi.as_ref(), &mut warnings);

        let parent = match output.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;
        // The packager writes into a scratch directory beside the output; an
        // existing file at `output` is only replaced once packaging succeeded
        let scratch = tempfile::Builder::new()
            .prefix(".isoedit-output-")
            .tempdir_in(&parent)?;
        let file_name = output
            .file_name()
            .ok_or_else(|| IsoEditError::InvalidInput(format!("{} is not a file path", output.display())))?;
        let packaged = scratch.path().join(file_name);

        let request = PackagingRequest {
            staging_dir: staging.path().to_path_buf(),
            output: packaged.clone(),
            variant,
            volume_label: volume_label.to_string(),
            bios,
            uefi,
        };

        info!(
            "Packaging {} with {} (variant {}, BIOS: {}, UEFI: {})",
            output.display(),
            self.packager.name(),
            variant,
            request.bios.is_some(),
            request.uefi.is_some()
        );
        let result = self.packager.package(&request).await?;
        if !result.success {
            return Err(IsoEditError::PackagingFailed(result.diagnostics()));
        }
        if !packaged.is_file() {
            return Err(IsoEditError::OutputMissing(output.display().to_string()));
        }
        fs::rename(&packaged, output)?;
        let output_size = fs::metadata(output)?.len();

        if self.config.verify_output {
            warnings.extend(self.verify(output, &request));
        }

        info!("Rebuilt {} ({} bytes)", output.display(), output_size);
        Ok(RebuildResult {
            success: true,
            message: format!("Rebuilt image written to {}", output.display()),
            output_path: output.display().to_string(),
            output_size,
            warnings,
        })
    }

    /// Reopen the produced image; problems become warnings.
    fn verify(&self, output: &Path, request: &PackagingRequest) -> Vec<String> {
        let config = EditorConfig {
            extraction: ExtractionMode::Stream,
            ..self.config.clone()
        };
        let mut notes = Vec::new();
        match DiscImage::open(output, &config) {
            Ok(image) => {
                if request.has_boot() && !image.boot_info().has_catalog {
                    notes.push("output image carries no boot catalog".to_string());
                }
                image.close();
            }
            Err(e) => notes.push(format!("output image could not be reopened: {}", e)),
        }
        for note in &notes {
            warn!("{}", note);
        }
        notes
    }
}
