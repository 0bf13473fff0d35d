//! Browser ownership for the capture workers
//!
//! Every worker owns exactly one headless Chromium for its whole lifetime.
//! The [`CapturerFactory`] and [`PageCapturer`] traits are the seam between
//! the worker pool and the browser, so the pool can be driven without one.

use crate::{capture_once, create_browser_config, instance_user_data_dir, CaptureSettings, ToolError};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Captures URLs to files with one long-lived browser
#[async_trait]
pub trait PageCapturer: Send {
    async fn capture(&mut self, url: &str, output: &Path) -> Result<(), ToolError>;

    /// Release the browser; called once when the worker exits
    async fn close(&mut self);
}

/// Launches one [`PageCapturer`] per worker
#[async_trait]
pub trait CapturerFactory: Send + Sync {
    async fn launch(&self, worker_id: usize) -> Result<Box<dyn PageCapturer>, ToolError>;
}

pub struct ChromeLauncher {
    settings: CaptureSettings,
}

impl ChromeLauncher {
    pub fn new(settings: CaptureSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl CapturerFactory for ChromeLauncher {
    async fn launch(&self, worker_id: usize) -> Result<Box<dyn PageCapturer>, ToolError> {
        let tag = format!("{}-{}-{}", std::process::id(), worker_id, Uuid::new_v4().simple());
        let user_data_dir = instance_user_data_dir(&tag);
        tokio::fs::create_dir_all(&user_data_dir).await.map_err(|e| {
            ToolError::BrowserLaunchFailed(format!("Failed to create user data dir: {e}"))
        })?;

        let config = create_browser_config(&self.settings, &tag)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ToolError::BrowserLaunchFailed(e.to_string()))?;

        // The handler is a stream that drives all CDP traffic and must be
        // polled for the browser to make progress.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Handler error: {}", e);
                }
            }
            debug!("Handler stream ended");
        });

        info!(worker = worker_id, "browser launched");
        Ok(Box::new(ChromeCapturer {
            worker_id,
            browser,
            handler,
            user_data_dir,
            settings: self.settings.clone(),
        }))
    }
}

pub struct ChromeCapturer {
    worker_id: usize,
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
    settings: CaptureSettings,
}

#[async_trait]
impl PageCapturer for ChromeCapturer {
    async fn capture(&mut self, url: &str, output: &Path) -> Result<(), ToolError> {
        if self.handler.is_finished() {
            return Err(ToolError::BrowserProcessDied(format!(
                "browser of worker {} is gone",
                self.worker_id
            )));
        }
        capture_once(&self.browser, url, output, &self.settings).await
    }

    async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            debug!(worker = self.worker_id, error = %e, "browser close failed");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
        if let Err(e) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
            debug!(worker = self.worker_id, error = %e, "user data dir cleanup failed");
        }
        info!(worker = self.worker_id, "browser closed");
    }
}
