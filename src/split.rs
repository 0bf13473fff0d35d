//! Train/val splitter for a flat YOLO dataset

use crate::dataset::{label_for, list_images, move_file};
use crate::{SplitSettings, ToolError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const SPLITS: [&str; 2] = ["train", "val"];

/// Assignment of every image to exactly one split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    pub train: Vec<PathBuf>,
    pub val: Vec<PathBuf>,
}

impl SplitPlan {
    fn entries(&self) -> impl Iterator<Item = (&'static str, &PathBuf)> {
        self.train
            .iter()
            .map(|p| ("train", p))
            .chain(self.val.iter().map(|p| ("val", p)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SplitReport {
    /// Images planned for train
    pub train: usize,
    /// Images planned for val
    pub val: usize,
    /// Image and label pairs moved
    pub moved: usize,
    /// Images left in place because their label is missing
    pub missing_labels: Vec<PathBuf>,
    pub dry_run: bool,
}

/// Shuffle `images` with `seed` and cut at `floor(ratio * n)`
pub fn plan_split(mut images: Vec<PathBuf>, seed: u64, train_ratio: f64) -> SplitPlan {
    images.shuffle(&mut StdRng::seed_from_u64(seed));
    let k = ((train_ratio.clamp(0.0, 1.0) * images.len() as f64).floor() as usize).min(images.len());
    let val = images.split_off(k);
    SplitPlan { train: images, val }
}

/// Move an image and its label; the image goes back if the label cannot follow
fn move_pair(image: &Path, label: &Path, root: &Path, split: &str) -> Result<(), ToolError> {
    let image_dest = root
        .join("images")
        .join(split)
        .join(image.file_name().unwrap_or_default());
    let label_dest = root
        .join("labels")
        .join(split)
        .join(label.file_name().unwrap_or_default());

    move_file(image, &image_dest)?;
    if let Err(e) = move_file(label, &label_dest) {
        if let Err(undo) = move_file(&image_dest, image) {
            error!(image = %image_dest.display(), error = %undo, "could not move image back");
        }
        return Err(e);
    }
    Ok(())
}

/// Partition `<root>/images` and `<root>/labels` into train and val
///
/// With `dry_run` the plan is reported but nothing on disk changes.
pub fn split_dataset(settings: &SplitSettings, dry_run: bool) -> Result<SplitReport, ToolError> {
    let root = &settings.dataset;
    let image_dir = root.join("images");
    let label_dir = root.join("labels");
    if !image_dir.is_dir() || !label_dir.is_dir() {
        return Err(ToolError::MissingDatasetDirs {
            images: image_dir,
            labels: label_dir,
        });
    }

    let images = list_images(&image_dir, &settings.exts)?;
    if images.is_empty() {
        return Err(ToolError::NoImages(image_dir));
    }

    let plan = plan_split(images, settings.seed, settings.train_ratio);
    let mut report = SplitReport {
        train: plan.train.len(),
        val: plan.val.len(),
        dry_run,
        ..Default::default()
    };

    if !dry_run {
        for split in SPLITS {
            std::fs::create_dir_all(image_dir.join(split))?;
            std::fs::create_dir_all(label_dir.join(split))?;
        }
    }

    for (split, image) in plan.entries() {
        let label = label_for(image, &label_dir);
        if !label.exists() {
            warn!("label missing for {}", image.display());
            report.missing_labels.push(image.clone());
            continue;
        }
        if dry_run {
            debug!(image = %image.display(), split, "would move");
        } else {
            move_pair(image, &label, root, split)?;
        }
        report.moved += 1;
    }

    info!(
        "Split complete. Train={}, Val={}, moved={}{}",
        report.train,
        report.val,
        report.moved,
        if dry_run { " (dry run)" } else { "" }
    );
    Ok(report)
}
