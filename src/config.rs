//! Configuration management with serde serialization/deserialization
//!
//! This module provides the configuration structures for every dataset tool,
//! the Chromium launch arguments used by the capture workers, and validation
//! of user supplied values.

use crate::ToolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default dataset root, relative to the working directory
pub const DEFAULT_DATASET_ROOT: &str = "datasets";

/// Desktop Chrome user agent presented to captured sites
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36";

/// Main configuration structure for the dataset tool
///
/// Every section falls back to its defaults when missing from the JSON file,
/// so a config file only needs to name the values it changes.
///
/// # Examples
///
/// ```rust
/// use dataset_tool::Config;
///
/// let config: Config = serde_json::from_str(r#"{ "split": { "train_ratio": 0.9 } }"#).unwrap();
/// assert_eq!(config.split.train_ratio, 0.9);
/// assert_eq!(config.capture.concurrency, 6);
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Color-only augmentation settings
    pub augment: AugmentSettings,

    /// Color-removal augmentation settings
    pub decolorize: DecolorizeSettings,

    /// Train/val split settings
    pub split: SplitSettings,

    /// Webpage capture settings
    pub capture: CaptureSettings,
}

/// Settings for the color-only augmenter
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AugmentSettings {
    /// Dataset root containing `images/<split>` and `labels/<split>`
    pub dataset: PathBuf,

    /// Split to augment in place (default: train)
    pub split: String,

    /// Number of variants written per labeled image (default: 2, clamped to 4)
    pub per_image: usize,

    /// Accepted image extensions
    pub exts: Vec<String>,

    /// Mixed into every per-image seed (default: 0)
    pub seed: u32,

    /// Images processed concurrently (default: CPU count)
    pub jobs: usize,

    /// Also augment images that are themselves generated variants
    pub include_variants: bool,
}

impl Default for AugmentSettings {
    fn default() -> Self {
        Self {
            dataset: PathBuf::from(DEFAULT_DATASET_ROOT),
            split: "train".to_string(),
            per_image: 2,
            exts: vec![".jpg".into(), ".jpeg".into(), ".png".into()],
            seed: 0,
            jobs: num_cpus::get(),
            include_variants: false,
        }
    }
}

/// Dataset split a decolorization run may target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SplitName {
    Train,
    Val,
}

impl SplitName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitName::Train => "train",
            SplitName::Val => "val",
        }
    }
}

impl fmt::Display for SplitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range of enhancement factors
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct GainRange {
    pub min: f32,
    pub max: f32,
}

impl GainRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Build a range from a two element CLI value list
    pub fn from_pair(values: &[f32]) -> Option<Self> {
        match values {
            [min, max] => Some(Self::new(*min, *max)),
            _ => None,
        }
    }
}

/// Settings for the color-removal augmenter
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecolorizeSettings {
    pub dataset: PathBuf,

    /// Split to process (default: train)
    pub split: SplitName,

    /// Chroma offsets are drawn from `-ab_amp..=ab_amp` (default: 20)
    pub ab_amp: i32,

    /// Probability of an RGB channel shuffle (default: 0.0)
    pub p_shuffle: f64,

    /// Brightness gain range, `None` disables the brightness step
    pub b_gain: Option<GainRange>,

    /// Contrast gain range, `None` disables the contrast step
    pub c_gain: Option<GainRange>,

    /// Base seed (default: 42)
    pub seed: u64,

    pub exts: Vec<String>,

    pub jobs: usize,

    pub include_variants: bool,
}

impl Default for DecolorizeSettings {
    fn default() -> Self {
        Self {
            dataset: PathBuf::from(DEFAULT_DATASET_ROOT),
            split: SplitName::Train,
            ab_amp: 20,
            p_shuffle: 0.0,
            b_gain: Some(GainRange::new(0.95, 1.05)),
            c_gain: Some(GainRange::new(0.95, 1.05)),
            seed: 42,
            exts: vec![
                ".jpg".into(),
                ".jpeg".into(),
                ".png".into(),
                ".bmp".into(),
                ".webp".into(),
            ],
            jobs: num_cpus::get(),
            include_variants: false,
        }
    }
}

/// Settings for the train/val splitter
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SplitSettings {
    /// Dataset root containing flat `images/` and `labels/` folders
    pub dataset: PathBuf,

    /// Shuffle seed (default: 42)
    pub seed: u64,

    /// Fraction of images assigned to train (default: 0.8)
    pub train_ratio: f64,

    pub exts: Vec<String>,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            dataset: PathBuf::from(DEFAULT_DATASET_ROOT),
            seed: 42,
            train_ratio: 0.8,
            exts: vec![".jpg".into(), ".jpeg".into(), ".png".into()],
        }
    }
}

/// Lazy-load scrolling parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScrollSettings {
    /// Upper bound on scroll steps (default: 40)
    pub max_steps: usize,

    /// Pixels scrolled per step (default: 1200)
    pub step_px: u32,

    /// Pause after each step in milliseconds (default: 200)
    pub pause_ms: u64,
}

impl Default for ScrollSettings {
    fn default() -> Self {
        Self {
            max_steps: 40,
            step_px: 1200,
            pause_ms: 200,
        }
    }
}

/// Settings for the concurrent webpage capturer
///
/// # Examples
///
/// ```rust
/// use dataset_tool::CaptureSettings;
///
/// let settings = CaptureSettings {
///     concurrency: 2,
///     jpeg: true,
///     ..Default::default()
/// };
/// assert_eq!(settings.extension(), "jpg");
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Viewport width in pixels (default: 1440)
    pub width: u32,

    /// Viewport height in pixels before full-page expansion (default: 900)
    pub height: u32,

    /// Per-navigation timeout in milliseconds (default: 20000)
    pub timeout_ms: u64,

    /// Save JPEG instead of PNG
    pub jpeg: bool,

    /// Number of workers, each owning one browser (default: 6)
    pub concurrency: usize,

    /// Times a failed URL is re-queued (default: 1)
    pub retries: u32,

    /// Extra navigation attempts inside one capture (default: 1)
    pub goto_retries: u32,

    /// Delay between jobs per worker in milliseconds (default: 100)
    pub throttle_ms: u64,

    /// Only take the first N URLs, 0 for all
    pub limit: usize,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    pub user_agent: String,

    /// Accept-Language presented by every context (default: en-US)
    pub locale: String,

    pub scroll: ScrollSettings,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 1440,
            height: 900,
            timeout_ms: 20_000,
            jpeg: false,
            concurrency: 6,
            retries: 1,
            goto_retries: 1,
            throttle_ms: 100,
            limit: 0,
            chrome_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            locale: "en-US".to_string(),
            scroll: ScrollSettings::default(),
        }
    }
}

impl CaptureSettings {
    pub fn nav_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// File extension of written screenshots
    pub fn extension(&self) -> &'static str {
        if self.jpeg {
            "jpg"
        } else {
            "png"
        }
    }
}

/// Check every section for values the tools cannot work with
pub fn validate_config(config: &Config) -> Result<(), ToolError> {
    let invalid = |msg: String| Err(ToolError::ConfigurationError(msg));

    if config.augment.jobs == 0 || config.decolorize.jobs == 0 {
        return invalid("jobs must be greater than 0".to_string());
    }
    if config.decolorize.ab_amp < 0 || config.decolorize.ab_amp > 255 {
        return invalid(format!(
            "decolorize.ab_amp must be within 0..=255, got {}",
            config.decolorize.ab_amp
        ));
    }
    if !(0.0..=1.0).contains(&config.decolorize.p_shuffle) {
        return invalid(format!(
            "decolorize.p_shuffle must be within [0, 1], got {}",
            config.decolorize.p_shuffle
        ));
    }
    for (name, range) in [
        ("b_gain", config.decolorize.b_gain),
        ("c_gain", config.decolorize.c_gain),
    ] {
        if let Some(range) = range {
            if !(range.min >= 0.0 && range.min <= range.max && range.max.is_finite()) {
                return invalid(format!(
                    "decolorize.{name} must satisfy 0 <= min <= max, got {} {}",
                    range.min, range.max
                ));
            }
        }
    }
    if !(0.0..=1.0).contains(&config.split.train_ratio) {
        return invalid(format!(
            "split.train_ratio must be within [0, 1], got {}",
            config.split.train_ratio
        ));
    }
    if config.capture.width == 0 || config.capture.height == 0 {
        return invalid("Viewport dimensions must be greater than 0".to_string());
    }
    if config.capture.timeout_ms == 0 {
        return invalid("Navigation timeout must be greater than 0".to_string());
    }
    if config.capture.concurrency == 0 {
        return invalid("Capture concurrency must be greater than 0".to_string());
    }

    Ok(())
}

/// Generate Chromium command-line arguments for one capture worker
///
/// Each worker gets its own user data and temp directories so browsers
/// launched side by side never trip over the process singleton.
pub fn get_chrome_args(settings: &CaptureSettings, instance_tag: &str) -> Vec<String> {
    vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--disable-process-singleton-dialog".to_string(),
        "--disable-features=ProcessSingleton".to_string(),
        "--ignore-certificate-errors".to_string(),
        "--hide-scrollbars".to_string(),
        format!("--lang={}", settings.locale),
        format!("--window-size={},{}", settings.width, settings.height),
        format!("--temp-dir={}", instance_temp_dir(instance_tag).display()),
    ]
}

/// Per-instance user data directory
pub fn instance_user_data_dir(instance_tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("dataset-tool-chromium-{instance_tag}"))
}

fn instance_temp_dir(instance_tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("dataset-tool-chromium-temp-{instance_tag}"))
}

pub fn create_browser_config(
    settings: &CaptureSettings,
    instance_tag: &str,
) -> Result<chromiumoxide::browser::BrowserConfig, ToolError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(settings.width, settings.height)
        .user_data_dir(instance_user_data_dir(instance_tag))
        .request_timeout(settings.nav_timeout() + Duration::from_secs(10))
        .args(get_chrome_args(settings, instance_tag));

    if let Some(chrome_path) = &settings.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(ToolError::BrowserLaunchFailed)
}
