use crate::{
    augment_split, capture_one, check_gpu, decolorize_split, format_duration, parse_extensions,
    prepare_urls, read_url_list, split_dataset, validate_config, CapturePool, ChromeLauncher,
    Config, GainRange, Metrics, Shutdown, SplitName, SystemRunner, ToolError,
};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tracing::info;

#[derive(Parser)]
#[command(name = "dataset-tool")]
#[command(about = "Dataset preparation utilities for YOLO-style image datasets")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Write Prometheus metrics to this file on exit")]
    pub metrics_out: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write color-only variants of every labeled image in a split
    Augment(AugmentArgs),

    /// Write grayscale and chroma-randomized variants of every labeled image
    Decolorize(DecolorizeArgs),

    /// Move a flat dataset into train/val splits
    Split(SplitArgs),

    /// Take normalized full-page screenshots of URLs from a file
    Capture(CaptureArgs),

    /// Take a single normalized full-page screenshot
    CaptureOne(CaptureOneArgs),

    /// Report CUDA GPU availability
    Gpu {
        #[arg(long, help = "Print the report as JSON")]
        json: bool,

        #[arg(long, help = "Exit non-zero when no GPU is available")]
        require: bool,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate a configuration file
    Check { file: PathBuf },

    /// Print the effective configuration as JSON
    Show,
}

#[derive(Args, Debug, Clone, Default)]
pub struct AugmentArgs {
    #[arg(long, help = "Dataset root")]
    pub dataset: Option<PathBuf>,

    #[arg(long, help = "Split to augment in place")]
    pub split: Option<String>,

    #[arg(long, help = "Variants per image (0-4)")]
    pub per_image: Option<usize>,

    #[arg(long, help = "Comma separated image extensions")]
    pub exts: Option<String>,

    #[arg(long)]
    pub seed: Option<u32>,

    #[arg(long, help = "Images processed concurrently")]
    pub jobs: Option<usize>,

    #[arg(long, help = "Also augment generated variants")]
    pub include_variants: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DecolorizeArgs {
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub split: Option<SplitName>,

    #[arg(long, help = "± range for chroma jitter")]
    pub ab_amp: Option<i32>,

    #[arg(long, help = "Probability of an RGB channel shuffle")]
    pub p_shuffle: Option<f64>,

    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], help = "Brightness gain range")]
    pub b_gain: Option<Vec<f32>>,

    #[arg(long, conflicts_with = "b_gain", help = "Skip the brightness jitter")]
    pub no_b_gain: bool,

    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], help = "Contrast gain range")]
    pub c_gain: Option<Vec<f32>>,

    #[arg(long, conflicts_with = "c_gain", help = "Skip the contrast jitter")]
    pub no_c_gain: bool,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub exts: Option<String>,

    #[arg(long)]
    pub jobs: Option<usize>,

    #[arg(long)]
    pub include_variants: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SplitArgs {
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, help = "Fraction of images assigned to train")]
    pub train_ratio: Option<f64>,

    #[arg(long)]
    pub exts: Option<String>,

    #[arg(long, help = "Report the plan without moving files")]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct PageArgs {
    #[arg(long, help = "Viewport width")]
    pub width: Option<u32>,

    #[arg(long, help = "Per-page navigation timeout (ms)")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Save JPEG (default PNG)")]
    pub jpeg: bool,

    #[arg(long, help = "Extra navigation attempts per capture")]
    pub goto_retries: Option<u32>,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CaptureArgs {
    #[arg(long = "in", help = "Text file with one URL per line")]
    pub input: PathBuf,

    #[arg(long = "out", help = "Output folder")]
    pub output: PathBuf,

    #[command(flatten)]
    pub page: PageArgs,

    #[arg(long, help = "Number of parallel workers/browsers")]
    pub concurrency: Option<usize>,

    #[arg(long, help = "Retries per URL on failure")]
    pub retries: Option<u32>,

    #[arg(long, help = "Delay (ms) between jobs per worker")]
    pub throttle: Option<u64>,

    #[arg(long, help = "Only capture the first N URLs")]
    pub limit: Option<usize>,

    #[arg(long, help = "Write a JSON run report to this file")]
    pub report: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CaptureOneArgs {
    #[arg(long, help = "URL to capture")]
    pub url: String,

    #[arg(long, short, help = "Output file path")]
    pub output: PathBuf,

    #[command(flatten)]
    pub page: PageArgs,
}

impl AugmentArgs {
    pub fn apply(&self, config: &mut Config) {
        let settings = &mut config.augment;
        if let Some(dataset) = &self.dataset {
            settings.dataset = dataset.clone();
        }
        if let Some(split) = &self.split {
            settings.split = split.clone();
        }
        if let Some(per_image) = self.per_image {
            settings.per_image = per_image;
        }
        if let Some(exts) = &self.exts {
            settings.exts = parse_extensions(exts);
        }
        if let Some(seed) = self.seed {
            settings.seed = seed;
        }
        if let Some(jobs) = self.jobs {
            settings.jobs = jobs;
        }
        settings.include_variants |= self.include_variants;
    }
}

impl DecolorizeArgs {
    pub fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        let settings = &mut config.decolorize;
        if let Some(dataset) = &self.dataset {
            settings.dataset = dataset.clone();
        }
        if let Some(split) = self.split {
            settings.split = split;
        }
        if let Some(ab_amp) = self.ab_amp {
            settings.ab_amp = ab_amp;
        }
        if let Some(p) = self.p_shuffle {
            settings.p_shuffle = p;
        }
        if let Some(values) = &self.b_gain {
            settings.b_gain = Some(
                GainRange::from_pair(values).context("--b-gain takes exactly two values")?,
            );
        }
        if self.no_b_gain {
            settings.b_gain = None;
        }
        if let Some(values) = &self.c_gain {
            settings.c_gain = Some(
                GainRange::from_pair(values).context("--c-gain takes exactly two values")?,
            );
        }
        if self.no_c_gain {
            settings.c_gain = None;
        }
        if let Some(seed) = self.seed {
            settings.seed = seed;
        }
        if let Some(exts) = &self.exts {
            settings.exts = parse_extensions(exts);
        }
        if let Some(jobs) = self.jobs {
            settings.jobs = jobs;
        }
        settings.include_variants |= self.include_variants;
        Ok(())
    }
}

impl SplitArgs {
    pub fn apply(&self, config: &mut Config) {
        let settings = &mut config.split;
        if let Some(dataset) = &self.dataset {
            settings.dataset = dataset.clone();
        }
        if let Some(seed) = self.seed {
            settings.seed = seed;
        }
        if let Some(ratio) = self.train_ratio {
            settings.train_ratio = ratio;
        }
        if let Some(exts) = &self.exts {
            settings.exts = parse_extensions(exts);
        }
    }
}

impl PageArgs {
    pub fn apply(&self, config: &mut Config) {
        let settings = &mut config.capture;
        if let Some(width) = self.width {
            settings.width = width;
        }
        if let Some(timeout) = self.timeout {
            settings.timeout_ms = timeout;
        }
        settings.jpeg |= self.jpeg;
        if let Some(goto_retries) = self.goto_retries {
            settings.goto_retries = goto_retries;
        }
        if let Some(chrome_path) = &self.chrome_path {
            settings.chrome_path = Some(chrome_path.clone());
        }
    }
}

impl CaptureArgs {
    pub fn apply(&self, config: &mut Config) {
        self.page.apply(config);
        let settings = &mut config.capture;
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency;
        }
        if let Some(retries) = self.retries {
            settings.retries = retries;
        }
        if let Some(throttle) = self.throttle {
            settings.throttle_ms = throttle;
        }
        if let Some(limit) = self.limit {
            settings.limit = limit;
        }
    }
}

impl Commands {
    /// Fold this command's flags into `config`
    pub fn apply_overrides(&self, config: &mut Config) -> anyhow::Result<()> {
        match self {
            Commands::Augment(args) => args.apply(config),
            Commands::Decolorize(args) => args.apply(config)?,
            Commands::Split(args) => args.apply(config),
            Commands::Capture(args) => args.apply(config),
            Commands::CaptureOne(args) => args.page.apply(config),
            Commands::Gpu { .. } | Commands::Config { .. } => {}
        }
        Ok(())
    }

    /// Commands that run browsers and must close them before exiting
    pub fn owns_browsers(&self) -> bool {
        matches!(self, Commands::Capture(_) | Commands::CaptureOne(_))
    }
}

pub struct CliRunner {
    pub config: Config,
    pub metrics: Arc<Metrics>,
    pub shutdown: Shutdown,
}

impl CliRunner {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            metrics: Arc::new(Metrics::new()),
            shutdown: Shutdown::never(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Augment(_) => self.run_augment().await,
            Commands::Decolorize(_) => self.run_decolorize().await,
            Commands::Split(args) => self.run_split(args.dry_run),
            Commands::Capture(args) => self.run_capture(args).await,
            Commands::CaptureOne(args) => self.run_capture_one(args).await,
            Commands::Gpu { json, require } => self.run_gpu(json, require),
            Commands::Config { action } => match action {
                ConfigAction::Check { file } => self.check_config(file).await,
                ConfigAction::Show => self.show_config(),
            },
        }
    }

    pub async fn run_augment(&self) -> anyhow::Result<()> {
        let settings = &self.config.augment;
        let report = augment_split(settings, &self.metrics).await?;
        println!(
            "Created {} augmented images from {} originals in '{}'. Skipped (no label): {}, skipped (variants): {}, failed: {}",
            report.created,
            report.sources,
            settings.split,
            report.skipped_unlabeled,
            report.skipped_derived,
            report.failed
        );
        Ok(())
    }

    pub async fn run_decolorize(&self) -> anyhow::Result<()> {
        let settings = &self.config.decolorize;
        let report = decolorize_split(settings, &self.metrics).await?;
        println!(
            "Created {} variants in '{}'. Skipped (no label): {}, skipped (variants): {}, failed: {}",
            report.created,
            settings.split,
            report.skipped_unlabeled,
            report.skipped_derived,
            report.failed
        );
        Ok(())
    }

    pub fn run_split(&self, dry_run: bool) -> anyhow::Result<()> {
        let report = split_dataset(&self.config.split, dry_run)?;
        println!(
            "Split {}. Train={}, Val={}, moved={}",
            if dry_run { "planned" } else { "complete" },
            report.train,
            report.val,
            report.moved
        );
        Ok(())
    }

    pub async fn run_capture(&self, args: CaptureArgs) -> anyhow::Result<()> {
        let settings = self.config.capture.clone();
        let urls = read_url_list(&args.input)
            .with_context(|| format!("reading {}", args.input.display()))?;
        let loaded = urls.len();
        let urls = prepare_urls(urls, settings.limit);
        info!(
            "Loaded {} URLs from {} ({} after limit and de-duplication)",
            loaded,
            args.input.display(),
            urls.len()
        );

        let start = Instant::now();
        let factory = Arc::new(ChromeLauncher::new(settings.clone()));
        let pool = CapturePool::new(settings, args.output.clone(), factory, self.metrics.clone())
            .with_shutdown(self.shutdown.clone());
        let report = pool.run(urls).await?;

        if let Some(path) = &args.report {
            report
                .write_json(path)
                .with_context(|| format!("writing report {}", path.display()))?;
            info!("Report written to {}", path.display());
        }

        println!(
            "Capture completed in {}. OK: {}, skipped: {}, retried: {}, failed: {}",
            format_duration(start.elapsed()),
            report.ok,
            report.skipped,
            report.retried,
            report.failed
        );
        for failure in &report.failures {
            println!("  FAILED {} -> {}", failure.url, failure.error);
        }
        if report.interrupted {
            return Err(ToolError::Interrupted.into());
        }
        Ok(())
    }

    pub async fn run_capture_one(&self, args: CaptureOneArgs) -> anyhow::Result<()> {
        info!("Taking screenshot of: {}", args.url);
        let start = Instant::now();
        capture_one(&self.config.capture, &args.url, &args.output, &self.shutdown).await?;

        println!("Screenshot captured successfully:");
        println!("  URL: {}", args.url);
        println!("  Output: {}", args.output.display());
        println!("  Duration: {}", format_duration(start.elapsed()));
        Ok(())
    }

    pub fn run_gpu(&self, json: bool, require: bool) -> anyhow::Result<()> {
        let report = check_gpu(&SystemRunner);
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            for line in report.lines() {
                println!("{line}");
            }
        }
        if require && !report.cuda_available {
            bail!("no CUDA GPU available");
        }
        Ok(())
    }

    pub async fn check_config(&self, path: PathBuf) -> anyhow::Result<()> {
        println!("Validating configuration: {}", path.display());

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        validate_config(&config)?;

        println!("Configuration is valid:");
        println!(
            "  Augment: {} per image, split '{}'",
            config.augment.per_image, config.augment.split
        );
        println!(
            "  Decolorize: ab_amp {}, p_shuffle {}, split '{}'",
            config.decolorize.ab_amp, config.decolorize.p_shuffle, config.decolorize.split
        );
        println!(
            "  Split: ratio {}, seed {}",
            config.split.train_ratio, config.split.seed
        );
        println!(
            "  Capture: {} workers, {}x{} viewport, {} ms timeout, {}",
            config.capture.concurrency,
            config.capture.width,
            config.capture.height,
            config.capture.timeout_ms,
            config.capture.extension()
        );
        Ok(())
    }

    pub fn show_config(&self) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(&self.config)?);
        Ok(())
    }
}

pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}
