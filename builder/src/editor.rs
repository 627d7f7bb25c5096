// Builder-style write path over a source image

use crate::packager::{ImagePackager, MkisofsPackager};
use crate::rebuild::ImageRebuilder;
use crate::staging::{apply_queue, extract_tree, StagingTree};
use isoedit_core::{
    normalize_image_path, EditorConfig, FileOperation, IsoEditError, OperationQueue,
    RebuildResult,
};
use isoedit_filesystems::DiscImage;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_VOLUME_LABEL: &str = "ISOEDIT";

/// Queues file operations against a source image and rebuilds it.
///
/// The source is never written. `rebuild` consumes the editor, so the image
/// handle is closed exactly once whatever the outcome.
pub struct DiscImageEditor {
    image: DiscImage,
    queue: OperationQueue,
    packager: Option<Box<dyn ImagePackager>>,
    config: EditorConfig,
}

impl DiscImageEditor {
    pub fn open(path: impl AsRef<Path>, config: EditorConfig) -> Result<Self, IsoEditError> {
        let image = DiscImage::open(path, &config)?;
        Ok(Self {
            image,
            queue: OperationQueue::new(),
            packager: None,
            config,
        })
    }

    /// Use this packager instead of locating one at rebuild time.
    pub fn with_packager(mut self, packager: impl ImagePackager + 'static) -> Self {
        self.packager = Some(Box::new(packager));
        self
    }

    pub fn image(&mut self) -> &mut DiscImage {
        &mut self.image
    }

    pub fn pending(&self) -> &OperationQueue {
        &self.queue
    }

    pub fn queue_add(&mut self, local: impl Into<PathBuf>, image_path: &str) -> Result<(), IsoEditError> {
        let image_path = normalize_image_path(image_path);
        if self.image.file_exists(&image_path) {
            debug!("Add of {} overwrites the file already in the image", image_path);
        }
        self.queue.add(local, &image_path)
    }

    /// Replace a file. A path the source does not have is added instead.
    pub fn queue_replace(&mut self, image_path: &str, local: impl Into<PathBuf>) -> Result<(), IsoEditError> {
        let image_path = normalize_image_path(image_path);
        if !self.image.file_exists(&image_path) {
            warn!("{} is not in the source image; queuing it as an add", image_path);
            return self.queue.add(local, &image_path);
        }
        self.queue.replace(&image_path, local)
    }

    /// Remove a file or directory. Removing a path nobody has is a no-op.
    pub fn queue_remove(&mut self, image_path: &str) -> Result<(), IsoEditError> {
        let image_path = normalize_image_path(image_path);
        let in_source = self.image.file_exists(&image_path) || self.image.directory_exists(&image_path);
        let queued = self.queue.get(&image_path).is_some();

        if !in_source && !queued {
            warn!("{} is not in the source image; nothing to remove", image_path);
            return Ok(());
        }
        if self.image.boot_info().is_boot_path(&image_path) {
            warn!("Removing boot loader {}; the rebuilt image loses that boot entry", image_path);
        }
        self.queue.remove(&image_path)
    }

    /// Stage, mutate and package the image at `output`.
    ///
    /// The staging tree is removed and the source closed on every path out.
    pub async fn rebuild(self, output: impl AsRef<Path>) -> Result<RebuildResult, IsoEditError> {
        let Self { mut image, queue, packager, config } = self;
        let output = output.as_ref();

        let outcome = run_rebuild(&mut image, &queue, packager, &config, output).await;
        image.close();

        match &outcome {
            Ok(result) => info!("{}", result.message),
            Err(e) => warn!("Rebuild of {} failed: {}", output.display(), e),
        }
        outcome
    }
}

async fn run_rebuild(
    image: &mut DiscImage,
    queue: &OperationQueue,
    packager: Option<Box<dyn ImagePackager>>,
    config: &EditorConfig,
    output: &Path,
) -> Result<RebuildResult, IsoEditError> {
    let packager: Box<dyn ImagePackager> = match packager {
        Some(packager) => packager,
        None => Box::new(MkisofsPackager::locate(config)?),
    };

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    if same_file(output, image.path()) {
        return Err(IsoEditError::InvalidInput(format!(
            "the output {} is the source image",
            output.display()
        )));
    }

    let label = config
        .volume_label
        .clone()
        .or_else(|| image.get_filesystem_info().volume_label)
        .unwrap_or_else(|| DEFAULT_VOLUME_LABEL.to_string());
    let staging = StagingTree::create(config.staging_root.as_deref())?;
    let outcome = stage_and_package(image, queue, packager.as_ref(), config, &staging, &label, output).await;

    if let Err(e) = staging.remove() {
        warn!("Could not remove staging tree: {}", e);
    }
    outcome
}

async fn stage_and_package(
    image: &mut DiscImage,
    queue: &OperationQueue,
    packager: &dyn ImagePackager,
    config: &EditorConfig,
    staging: &StagingTree,
    label: &str,
    output: &Path,
) -> Result<RebuildResult, IsoEditError> {
    let variant = image.variant();
    let boot = image.boot_info().clone();

    extract_tree(image, &queue.skip_set(), staging).await?;
    apply_queue(queue, staging)?;
    let (adds, replaces, deletes) = count_operations(queue);
    debug!("Applied {} adds, {} replaces, {} deletes", adds, replaces, deletes);

    ImageRebuilder::new(packager, config)
        .rebuild(staging, variant, &boot, label, output)
        .await
}

/// Whether two paths name the same file, however each is spelled.
fn same_file(a: &Path, b: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let (Ok(x), Ok(y)) = (fs::metadata(a), fs::metadata(b)) {
            return x.dev() == y.dev() && x.ino() == y.ino();
        }
    }
    match (canonical_target(a), canonical_target(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Canonical form of a path that may not exist yet: its canonical parent
/// joined with the file name.
fn canonical_target(path: &Path) -> Option<PathBuf> {
    if let Ok(canonical) = fs::canonicalize(path) {
        return Some(canonical);
    }
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Some(fs::canonicalize(parent).ok()?.join(path.file_name()?))
}

fn count_operations(queue: &OperationQueue) -> (usize, usize, usize) {
    queue.iter().fold((0, 0, 0), |(a, r, d), op| match op {
        FileOperation::Add { .. } => (a + 1, r, d),
        FileOperation::Replace { .. } => (a, r + 1, d),
        FileOperation::Delete { .. } => (a, r, d + 1),
    })
}
