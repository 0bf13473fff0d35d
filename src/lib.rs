//! # Dataset Tool
//!
//! Preparation utilities for YOLO-style object detection datasets laid out as
//! `images/<split>/*.jpg` next to `labels/<split>/*.txt`.
//!
//! - **Color augmentation**: writes hue, jitter, grayscale and tint variants of
//!   every labeled image, copying its label unchanged.
//! - **Decolorization**: writes a grayscale and a chroma-randomized variant of
//!   every labeled image so a detector stops leaning on color.
//! - **Train/val split**: moves a flat dataset into seeded train and val splits.
//! - **Webpage capture**: takes normalized full-page screenshots of many URLs
//!   with a fixed set of headless Chromium workers, retrying failures.
//! - **GPU check**: reports whether a CUDA device is usable for training.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dataset_tool::{augment_split, AugmentSettings, Metrics};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = AugmentSettings {
//!         dataset: "datasets".into(),
//!         per_image: 2,
//!         ..Default::default()
//!     };
//!     let report = augment_split(&settings, &Metrics::new()).await?;
//!     println!("created {} variants", report.created);
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! dataset-tool augment --dataset datasets --split train --per-image 2
//! dataset-tool decolorize --split val --ab-amp 12 --p-shuffle 0.5
//! dataset-tool split --dataset datasets --train-ratio 0.8 --seed 42
//! dataset-tool capture --in urls.txt --out shots --concurrency 6 --jpeg
//! dataset-tool gpu --require
//! ```

/// Configuration and settings for every subcommand
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Dataset layout, image I/O and the per-image worker loop
pub mod dataset;

/// Pixel-level color transforms
pub mod color;

/// Color-only augmentation
pub mod augment;

/// Grayscale and chroma-randomized variants
pub mod decolorize;

/// Train/val splitting
pub mod split;

/// URL list handling
pub mod urls;

/// Browser lifecycle for capture workers
pub mod browser;

/// Page navigation, layout normalization and screenshots
pub mod capture_service;

/// Capture job queue and worker pool
pub mod worker;

/// CUDA availability check
pub mod gpu;

/// Command-line interface implementation
pub mod cli;

/// Counters and the Prometheus exporter
pub mod metrics;


pub use augment::*;
pub use browser::*;
pub use capture_service::*;
pub use cli::*;
pub use color::*;
pub use config::*;
pub use dataset::*;
pub use decolorize::*;
pub use error::*;
pub use gpu::*;
pub use metrics::*;
pub use split::*;
pub use urls::*;
pub use worker::*;
