//! Color-removal augmentation
//!
//! Each labeled image gets two variants that keep its structure but not its
//! colors: a gray copy (`__gray`) and a copy with the luma kept and the
//! chroma pushed by a random offset (`__Lrand`). A light brightness and
//! contrast jitter and an optional channel shuffle are applied to both.

use crate::color::{
    enhance_brightness, enhance_contrast, permute_channels, shift_chroma, to_gray3,
    CHANNEL_ORDERS,
};
use crate::dataset::{
    file_stem, is_derived, list_images, load_rgb, process_images, save_rgb, stable_seed,
    variant_paths, ImageOutcome, SplitDirs, VariantReport,
};
use crate::{DecolorizeSettings, GainRange, Metrics, ToolError};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tracing::info;

pub type DecolorizeReport = VariantReport;

/// Random parameters shared by both variants of one image
#[derive(Debug, Clone, Copy)]
struct Jitter {
    b_gain: Option<GainRange>,
    c_gain: Option<GainRange>,
    p_shuffle: f64,
}

impl Jitter {
    fn from_settings(settings: &DecolorizeSettings) -> Self {
        Self {
            b_gain: settings.b_gain,
            c_gain: settings.c_gain,
            p_shuffle: settings.p_shuffle,
        }
    }
}

/// Brightness, then contrast, each by a factor drawn from its range when set
pub fn apply_bc<R: Rng>(
    img: RgbImage,
    b_gain: Option<GainRange>,
    c_gain: Option<GainRange>,
    rng: &mut R,
) -> RgbImage {
    let mut out = img;
    if let Some(range) = b_gain {
        out = enhance_brightness(&out, rng.gen_range(range.min..=range.max));
    }
    if let Some(range) = c_gain {
        out = enhance_contrast(&out, rng.gen_range(range.min..=range.max));
    }
    out
}

/// With probability `p`, reorder the RGB channels by a random permutation
pub fn maybe_channel_shuffle<R: Rng>(img: RgbImage, p: f64, rng: &mut R) -> RgbImage {
    if rng.gen::<f64>() >= p {
        return img;
    }
    match CHANNEL_ORDERS.choose(rng) {
        Some(order) => permute_channels(&img, *order),
        None => img,
    }
}

/// Keep luma, move Cb and Cr by offsets drawn from `-ab_amp..=ab_amp`
pub fn randomize_chroma<R: Rng>(img: &RgbImage, ab_amp: i32, rng: &mut R) -> RgbImage {
    let amp = ab_amp.abs();
    let d_cb = rng.gen_range(-amp..=amp);
    let d_cr = rng.gen_range(-amp..=amp);
    shift_chroma(img, d_cb, d_cr)
}

fn render_pair(source: &RgbImage, ab_amp: i32, jitter: Jitter, rng: &mut StdRng) -> [RgbImage; 2] {
    let gray = apply_bc(to_gray3(source), jitter.b_gain, jitter.c_gain, rng);
    let gray = maybe_channel_shuffle(gray, jitter.p_shuffle, rng);

    let lrand = randomize_chroma(source, ab_amp, rng);
    let lrand = apply_bc(lrand, jitter.b_gain, jitter.c_gain, rng);
    let lrand = maybe_channel_shuffle(lrand, jitter.p_shuffle, rng);

    [gray, lrand]
}

fn decolorize_image(
    image: &Path,
    dirs: &SplitDirs,
    settings: &DecolorizeSettings,
) -> Result<ImageOutcome, ToolError> {
    let stem = file_stem(image);
    if !settings.include_variants && is_derived(&stem) {
        return Ok(ImageOutcome::Derived);
    }
    let label = dirs.label_for(image);
    if !label.exists() {
        return Ok(ImageOutcome::Unlabeled);
    }

    let source = load_rgb(image)?;
    let mut rng = StdRng::seed_from_u64(settings.seed ^ stable_seed(&stem) as u64);
    let variants = render_pair(&source, settings.ab_amp, Jitter::from_settings(settings), &mut rng);

    for (tag, variant) in ["gray", "Lrand"].iter().zip(variants.iter()) {
        let (out_image, out_label) = variant_paths(image, &dirs.images, &dirs.labels, tag, false);
        save_rgb(variant, &out_image)?;
        std::fs::copy(&label, &out_label)?;
    }
    Ok(ImageOutcome::Created(variants.len()))
}

/// Write `__gray` and `__Lrand` variants for every labeled image of a split
pub async fn decolorize_split(
    settings: &DecolorizeSettings,
    metrics: &Metrics,
) -> Result<DecolorizeReport, ToolError> {
    let dirs = SplitDirs::new(&settings.dataset, settings.split.as_str());
    dirs.ensure_exists()?;

    let images = list_images(&dirs.images, &settings.exts)?;
    info!("Decolorizing {} images in '{}'", images.len(), settings.split);

    let work_dirs = dirs.clone();
    let work_settings = settings.clone();
    let report = process_images(images, settings.jobs, metrics, move |image| {
        decolorize_image(image, &work_dirs, &work_settings)
    })
    .await;

    info!(
        created = report.created,
        skipped_unlabeled = report.skipped_unlabeled,
        skipped_derived = report.skipped_derived,
        failed = report.failed,
        "Created {} variants in '{}'. Skipped (no label): {}",
        report.created,
        settings.split,
        report.skipped_unlabeled
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::grayscale_luma;
    use crate::SplitName;
    use image::Rgb;

    fn sample() -> RgbImage {
        RgbImage::from_fn(10, 10, |x, y| Rgb([(x * 25) as u8, 200, (y * 25) as u8]))
    }

    #[test]
    fn test_apply_bc_without_ranges_is_identity() {
        let img = sample();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(apply_bc(img.clone(), None, None, &mut rng), img);
    }

    #[test]
    fn test_apply_bc_unit_range_is_identity() {
        let img = sample();
        let unit = Some(GainRange::new(1.0, 1.0));
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(apply_bc(img.clone(), unit, unit, &mut rng), img);
    }

    #[test]
    fn test_shuffle_probability_bounds() {
        let img = sample();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            assert_eq!(maybe_channel_shuffle(img.clone(), 0.0, &mut rng), img);
        }

        // with p = 1 the result is always some permutation of the channels
        let shuffled = maybe_channel_shuffle(img.clone(), 1.0, &mut rng);
        let mut before: Vec<u8> = img.get_pixel(3, 7).0.to_vec();
        let mut after: Vec<u8> = shuffled.get_pixel(3, 7).0.to_vec();
        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn test_randomize_chroma_zero_amp_keeps_gray_gray() {
        let gray = to_gray3(&sample());
        let mut rng = StdRng::seed_from_u64(9);
        let out = randomize_chroma(&gray, 0, &mut rng);
        for (a, b) in gray.pixels().zip(out.pixels()) {
            let diff = (a[0] as i32 - b[0] as i32).abs();
            assert!(diff <= 1, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn test_gray_variant_has_equal_channels() {
        let settings = DecolorizeSettings::default();
        let mut rng = StdRng::seed_from_u64(42);
        let [gray, _] = render_pair(&sample(), 20, Jitter::from_settings(&settings), &mut rng);
        for p in gray.pixels() {
            assert_eq!(p[0], p[1]);
            assert_eq!(p[1], p[2]);
        }
    }

    #[test]
    fn test_lrand_keeps_luma_close() {
        let source = sample();
        let jitter = Jitter {
            b_gain: None,
            c_gain: None,
            p_shuffle: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(42);
        let [_, lrand] = render_pair(&source, 20, jitter, &mut rng);
        for (a, b) in source.pixels().zip(lrand.pixels()) {
            let la = grayscale_luma(a[0], a[1], a[2]) as i32;
            let lb = grayscale_luma(b[0], b[1], b[2]) as i32;
            // clamping of saturated channels may move luma a little
            assert!((la - lb).abs() <= 40, "{a:?} vs {b:?}");
        }
    }

    #[tokio::test]
    async fn test_decolorize_split_writes_pairs() {
        let root = tempfile::tempdir().unwrap();
        let dirs = SplitDirs::new(root.path(), "val");
        std::fs::create_dir_all(&dirs.images).unwrap();
        std::fs::create_dir_all(&dirs.labels).unwrap();
        sample().save(dirs.images.join("shot.JPG")).unwrap();
        std::fs::write(dirs.labels.join("shot.txt"), "1 0.1 0.1 0.1 0.1\n").unwrap();
        sample().save(dirs.images.join("orphan.png")).unwrap();

        let settings = DecolorizeSettings {
            dataset: root.path().to_path_buf(),
            split: SplitName::Val,
            jobs: 2,
            ..Default::default()
        };
        let report = decolorize_split(&settings, &Metrics::new()).await.unwrap();

        assert_eq!(report.created, 2);
        assert_eq!(report.skipped_unlabeled, 1);
        assert_eq!(report.failed, 0);
        // original extension case is kept
        assert!(dirs.images.join("shot__gray.JPG").exists());
        assert!(dirs.images.join("shot__Lrand.JPG").exists());
        assert_eq!(
            std::fs::read_to_string(dirs.labels.join("shot__Lrand.txt")).unwrap(),
            "1 0.1 0.1 0.1 0.1\n"
        );
    }

    #[tokio::test]
    async fn test_decolorize_is_reproducible() {
        let root = tempfile::tempdir().unwrap();
        let dirs = SplitDirs::new(root.path(), "train");
        std::fs::create_dir_all(&dirs.images).unwrap();
        std::fs::create_dir_all(&dirs.labels).unwrap();
        sample().save(dirs.images.join("a.png")).unwrap();
        std::fs::write(dirs.labels.join("a.txt"), "").unwrap();

        let settings = DecolorizeSettings {
            dataset: root.path().to_path_buf(),
            jobs: 1,
            ..Default::default()
        };
        decolorize_split(&settings, &Metrics::new()).await.unwrap();
        let first = std::fs::read(dirs.images.join("a__Lrand.png")).unwrap();
        let second_run = decolorize_split(&settings, &Metrics::new()).await.unwrap();
        let second = std::fs::read(dirs.images.join("a__Lrand.png")).unwrap();

        assert_eq!(first, second);
        assert_eq!(second_run.skipped_derived, 2);
    }

    #[tokio::test]
    async fn test_corrupt_image_is_counted_not_fatal() {
        let root = tempfile::tempdir().unwrap();
        let dirs = SplitDirs::new(root.path(), "train");
        std::fs::create_dir_all(&dirs.images).unwrap();
        std::fs::create_dir_all(&dirs.labels).unwrap();
        sample().save(dirs.images.join("good.png")).unwrap();
        std::fs::write(dirs.labels.join("good.txt"), "0 0.5 0.5 0.1 0.1\n").unwrap();
        std::fs::write(dirs.images.join("bad.jpg"), b"\xff\xd8 truncated").unwrap();
        std::fs::write(dirs.labels.join("bad.txt"), "0 0.5 0.5 0.1 0.1\n").unwrap();

        let settings = DecolorizeSettings {
            dataset: root.path().to_path_buf(),
            jobs: 2,
            ..Default::default()
        };
        let report = decolorize_split(&settings, &Metrics::new()).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 2);
        assert!(dirs.images.join("good__gray.png").exists());
        assert!(!dirs.images.join("bad__gray.jpg").exists());
        assert!(!dirs.labels.join("bad__gray.txt").exists());
    }
}
