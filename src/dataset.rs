//! YOLO dataset layout helpers shared by the augmenters and the splitter

use crate::{Metrics, ToolError};
use futures::stream::{self, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// JPEG quality used for every re-encoded image
pub const JPEG_QUALITY: u8 = 95;

/// Stem markers of images written by the augmenters
pub const VARIANT_MARKERS: &[&str] = &["__aug_", "__gray", "__Lrand"];

/// The `images/<split>` and `labels/<split>` pair of one split
#[derive(Debug, Clone)]
pub struct SplitDirs {
    pub images: PathBuf,
    pub labels: PathBuf,
}

impl SplitDirs {
    pub fn new(root: &Path, split: &str) -> Self {
        Self {
            images: root.join("images").join(split),
            labels: root.join("labels").join(split),
        }
    }

    pub fn ensure_exists(&self) -> Result<(), ToolError> {
        if self.images.is_dir() && self.labels.is_dir() {
            Ok(())
        } else {
            Err(ToolError::MissingSplitDirs {
                images: self.images.clone(),
                labels: self.labels.clone(),
            })
        }
    }

    pub fn label_for(&self, image: &Path) -> PathBuf {
        label_for(image, &self.labels)
    }
}

/// Normalize a comma separated extension list to lowercase `.ext` entries
pub fn parse_extensions(list: &str) -> Vec<String> {
    list.split(',')
        .map(|ext| ext.trim().to_lowercase())
        .filter(|ext| !ext.is_empty())
        .map(|ext| {
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{ext}")
            }
        })
        .collect()
}

/// Lowercased extension of `path` with its leading dot, or an empty string
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Regular files directly inside `dir` whose extension is in `exts`, sorted
pub fn list_images(dir: &Path, exts: &[String]) -> Result<Vec<PathBuf>, ToolError> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if exts.iter().any(|ext| *ext == dotted_extension(&path)) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Label file paired with an image
pub fn label_for(image: &Path, label_dir: &Path) -> PathBuf {
    label_dir.join(format!("{}.txt", file_stem(image)))
}

/// Whether a stem was produced by one of the augmenters
pub fn is_derived(stem: &str) -> bool {
    VARIANT_MARKERS.iter().any(|marker| stem.contains(marker))
}

/// Output image and label paths of the variant `tag` of `image`
///
/// The variant keeps the source extension, lowercased when `lowercase_ext`
/// is set.
pub fn variant_paths(
    image: &Path,
    image_dir: &Path,
    label_dir: &Path,
    tag: &str,
    lowercase_ext: bool,
) -> (PathBuf, PathBuf) {
    let stem = file_stem(image);
    let ext = match image.extension() {
        Some(ext) if lowercase_ext => format!(".{}", ext.to_string_lossy().to_lowercase()),
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => String::new(),
    };
    (
        image_dir.join(format!("{stem}__{tag}{ext}")),
        label_dir.join(format!("{stem}__{tag}.txt")),
    )
}

pub fn load_rgb(path: &Path) -> Result<RgbImage, ToolError> {
    Ok(image::open(path)?.to_rgb8())
}

/// Encode by extension, JPEG at [`JPEG_QUALITY`]
pub fn save_rgb(img: &RgbImage, path: &Path) -> Result<(), ToolError> {
    match dotted_extension(path).as_str() {
        ".jpg" | ".jpeg" => {
            let mut writer = BufWriter::new(File::create(path)?);
            JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY).encode_image(img)?;
            Ok(())
        }
        _ => Ok(img.save(path)?),
    }
}

/// 32-bit FNV-1a hash of a file stem
///
/// Stable across processes and platforms, so a dataset augmented twice gets
/// the same variants.
pub fn stable_seed(stem: &str) -> u32 {
    const OFFSET: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    stem.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ byte as u32).wrapping_mul(PRIME))
}

/// `EXDEV`: rename across mount points
const CROSS_DEVICE_LINK: i32 = 18;

/// Move a file, falling back to copy and remove across filesystems
///
/// Any other rename error is returned as-is.
pub fn move_file(from: &Path, to: &Path) -> Result<(), ToolError> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_LINK) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)?;
            Ok(())
        }
        Err(e) => Err(ToolError::IoError(format!(
            "moving {} to {}: {e}",
            from.display(),
            to.display()
        ))),
    }
}

/// What happened to one source image during an augmentation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOutcome {
    /// Variants written for a labeled image
    Created(usize),
    /// No label file next to the image
    Unlabeled,
    /// The image is itself a generated variant
    Derived,
}

/// Counts reported by the augmenters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VariantReport {
    /// Labeled originals that received variants
    pub sources: usize,
    /// New images written
    pub created: usize,
    pub skipped_unlabeled: usize,
    pub skipped_derived: usize,
    /// Images that failed to decode, encode, or copy
    pub failed: usize,
}

impl VariantReport {
    pub fn record(&mut self, outcome: &ImageOutcome) {
        match outcome {
            ImageOutcome::Created(n) => {
                self.sources += 1;
                self.created += n;
            }
            ImageOutcome::Unlabeled => self.skipped_unlabeled += 1,
            ImageOutcome::Derived => self.skipped_derived += 1,
        }
    }
}

/// Run `work` for every image on the blocking pool, at most `jobs` at once
///
/// Failures are logged and counted per image; they never abort the run.
pub async fn process_images<F>(
    images: Vec<PathBuf>,
    jobs: usize,
    metrics: &Metrics,
    work: F,
) -> VariantReport
where
    F: Fn(&Path) -> Result<ImageOutcome, ToolError> + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let mut results = stream::iter(images)
        .map(|path| {
            let work = work.clone();
            async move {
                let outcome = tokio::task::spawn_blocking({
                    let path = path.clone();
                    move || work(&path)
                })
                .await
                .map_err(ToolError::from)
                .and_then(|result| result);
                (path, outcome)
            }
        })
        .buffer_unordered(jobs.max(1));

    let mut report = VariantReport::default();
    while let Some((path, outcome)) = results.next().await {
        match outcome {
            Ok(outcome) => {
                debug!(image = %path.display(), ?outcome, "image processed");
                if let ImageOutcome::Created(n) = outcome {
                    metrics.record_images_created(n);
                }
                report.record(&outcome);
            }
            Err(e) => {
                warn!(image = %path.display(), error = %e, "image failed");
                metrics.record_image_failed();
                report.failed += 1;
            }
        }
    }
    report
}
