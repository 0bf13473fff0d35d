//! Color-only augmentation
//!
//! Writes up to four recolored copies of every labeled image in a split.
//! Geometry never changes, so each variant reuses its source label file
//! verbatim.

use crate::color::{enhance_brightness, enhance_color, enhance_contrast, hue_shift, tint, to_gray3};
use crate::dataset::{
    file_stem, is_derived, list_images, load_rgb, process_images, save_rgb, stable_seed,
    variant_paths, ImageOutcome, SplitDirs, VariantReport,
};
use crate::{AugmentSettings, Metrics, ToolError};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tracing::info;

pub type AugmentReport = VariantReport;

/// Number of variants in the pool
pub const POOL_SIZE: usize = 4;

const HUE_DEGREES: [f32; 4] = [30.0, 60.0, 120.0, 180.0];

const TINT_COLORS: [[u8; 3]; 3] = [[230, 240, 255], [255, 240, 230], [235, 255, 240]];

const TINT_ALPHA: f32 = 0.15;

/// Seed of the RNG that orders the pool
const ORDER_SEED_MASK: u32 = 0xA5A5_A5A5;

/// One recoloring with all of its random parameters resolved
#[derive(Debug, Clone, PartialEq)]
pub enum ColorVariant {
    Hue { degrees: f32 },
    Jitter { saturation: f32, brightness: f32, contrast: f32 },
    Gray,
    Tint { color: [u8; 3] },
}

impl ColorVariant {
    pub fn tag(&self) -> &'static str {
        match self {
            ColorVariant::Hue { .. } => "hue",
            ColorVariant::Jitter { .. } => "jitter",
            ColorVariant::Gray => "gray",
            ColorVariant::Tint { .. } => "tint",
        }
    }

    pub fn render(&self, img: &RgbImage) -> RgbImage {
        match self {
            ColorVariant::Hue { degrees } => hue_shift(img, *degrees),
            ColorVariant::Jitter {
                saturation,
                brightness,
                contrast,
            } => {
                let out = enhance_color(img, *saturation);
                let out = enhance_brightness(&out, *brightness);
                enhance_contrast(&out, *contrast)
            }
            ColorVariant::Gray => to_gray3(img),
            ColorVariant::Tint { color } => tint(img, *color, TINT_ALPHA),
        }
    }
}

fn clamp02(x: f32) -> f32 {
    x.clamp(0.0, 2.0)
}

/// Draw the full pool for `seed`, then keep the first `k` in shuffled order
pub fn plan_variants(seed: u32, k: usize) -> Vec<ColorVariant> {
    let mut rng = StdRng::seed_from_u64(seed as u64);
    let hue = HUE_DEGREES[rng.gen_range(0..HUE_DEGREES.len())];
    let saturation = clamp02(0.8 + rng.gen::<f32>() * 0.6);
    let brightness = clamp02(0.9 + rng.gen::<f32>() * 0.4);
    let contrast = clamp02(0.9 + rng.gen::<f32>() * 0.4);
    let color = TINT_COLORS[rng.gen_range(0..TINT_COLORS.len())];

    let pool = [
        ColorVariant::Hue { degrees: hue },
        ColorVariant::Jitter {
            saturation,
            brightness,
            contrast,
        },
        ColorVariant::Gray,
        ColorVariant::Tint { color },
    ];

    let mut order: Vec<usize> = (0..POOL_SIZE).collect();
    order.shuffle(&mut StdRng::seed_from_u64((seed ^ ORDER_SEED_MASK) as u64));
    order
        .into_iter()
        .take(k.min(POOL_SIZE))
        .map(|i| pool[i].clone())
        .collect()
}

/// Augment one image in place, returning how many variants were written
pub fn augment_image(
    image: &Path,
    dirs: &SplitDirs,
    per_image: usize,
    base_seed: u32,
    include_variants: bool,
) -> Result<ImageOutcome, ToolError> {
    let stem = file_stem(image);
    if !include_variants && is_derived(&stem) {
        return Ok(ImageOutcome::Derived);
    }
    let label = dirs.label_for(image);
    if !label.exists() {
        return Ok(ImageOutcome::Unlabeled);
    }

    let source = load_rgb(image)?;
    let variants = plan_variants(stable_seed(&stem) ^ base_seed, per_image);
    for variant in &variants {
        let tag = format!("aug_{}", variant.tag());
        let (out_image, out_label) = variant_paths(image, &dirs.images, &dirs.labels, &tag, true);
        save_rgb(&variant.render(&source), &out_image)?;
        std::fs::copy(&label, &out_label)?;
    }
    Ok(ImageOutcome::Created(variants.len()))
}

/// Color-augment every labeled image of a split
pub async fn augment_split(
    settings: &AugmentSettings,
    metrics: &Metrics,
) -> Result<AugmentReport, ToolError> {
    let dirs = SplitDirs::new(&settings.dataset, &settings.split);
    dirs.ensure_exists()?;

    let images = list_images(&dirs.images, &settings.exts)?;
    info!(
        "Augmenting {} images in '{}' ({} per image)",
        images.len(),
        settings.split,
        settings.per_image.min(POOL_SIZE)
    );

    let per_image = settings.per_image;
    let seed = settings.seed;
    let include_variants = settings.include_variants;
    let work_dirs = dirs.clone();
    let report = process_images(images, settings.jobs, metrics, move |image| {
        augment_image(image, &work_dirs, per_image, seed, include_variants)
    })
    .await;

    info!(
        sources = report.sources,
        created = report.created,
        skipped_unlabeled = report.skipped_unlabeled,
        failed = report.failed,
        "Augmented {} originals into {} new images in '{}'",
        report.sources,
        report.created,
        settings.split
    );
    Ok(report)
}
