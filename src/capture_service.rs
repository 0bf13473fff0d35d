//! Single-page capture pipeline
//!
//! Everything that happens to one URL inside one browser: a fresh browser
//! context, page setup, navigation with fallback wait conditions, layout
//! normalization, lazy-load scrolling and the full-page screenshot.

use crate::{
    CaptureSettings, CapturerFactory, ChromeLauncher, ScrollSettings, Shutdown, ToolError,
};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::css::{
    CreateStyleSheetParams, EnableParams as CssEnableParams, SetStyleSheetTextParams,
};
use chromiumoxide::cdp::browser_protocol::dom::EnableParams as DomEnableParams;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventLifecycleEvent, NavigateParams, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Pause before another navigation attempt
pub const RETRY_PAUSE: Duration = Duration::from_millis(500);

/// Settle time after scrolling back to the top
const SETTLE_AFTER_SCROLL: Duration = Duration::from_millis(250);

const SCREENSHOT_QUALITY: i64 = 95;

/// Stylesheet that pins headers and sticky bars in DOM order and hides
/// cookie, consent, chat and subscribe overlays
pub const NORMALIZE_CSS: &str = r#"
  * { scroll-behavior: auto !important; }
  :where(header, nav, [role="banner"], .header, .navbar) {
    position: static !important; top: auto !important; bottom: auto !important; inset: auto !important;
  }
  :where([class*="sticky"], [id*="sticky"], [class*="fixed"], [id*="fixed"]) {
    position: static !important; top: auto !important; bottom: auto !important; inset: auto !important;
  }
  :where([id*="cookie"], [class*="cookie"], [aria-label*="cookie"],
         [id*="consent"], [class*="consent"],
         [class*="chat"], [aria-label*="chat"], [id*="chat"],
         [class*="subscribe"], [id*="subscribe"],
         [role="dialog"], [aria-modal="true"]) {
    display: none !important;
  }
"#;

/// Forces every computed fixed or sticky element to static positioning
const UNPIN_SCRIPT: &str = r#"(() => {
  for (const el of Array.from(document.querySelectorAll('*'))) {
    try {
      const s = getComputedStyle(el);
      if (s && (s.position === 'fixed' || s.position === 'sticky')) {
        el.style.position = 'static';
        el.style.top = 'auto'; el.style.bottom = 'auto'; el.style.inset = 'auto';
      }
    } catch (e) {}
  }
  return true;
})()"#;

/// Lifecycle milestones tried in order by [`robust_goto`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    DomContentLoaded,
    NetworkIdle,
    Load,
}

impl WaitCondition {
    pub const ORDER: [WaitCondition; 3] = [
        WaitCondition::DomContentLoaded,
        WaitCondition::NetworkIdle,
        WaitCondition::Load,
    ];

    /// Name of the matching `Page.lifecycleEvent`
    pub fn event_name(&self) -> &'static str {
        match self {
            WaitCondition::DomContentLoaded => "DOMContentLoaded",
            WaitCondition::NetworkIdle => "networkIdle",
            WaitCondition::Load => "load",
        }
    }
}

/// Script that appends the normalization stylesheet and unpins elements,
/// reporting failures as `{ __err__: "..." }`
pub fn normalize_script() -> String {
    let css = serde_json::Value::String(NORMALIZE_CSS.to_string()).to_string();
    format!(
        r#"(() => {{
  try {{
    const style = document.createElement('style');
    style.type = 'text/css';
    style.textContent = {css};
    const head = document.head || document.getElementsByTagName('head')[0] || document.documentElement;
    head.appendChild(style);
    {UNPIN_SCRIPT};
    return true;
  }} catch (e) {{
    return {{ __err__: String(e) }};
  }}
}})()"#
    )
}

/// Script that scrolls one step down and returns the new offset
pub fn scroll_step_script(step_px: u32) -> String {
    format!(
        r#"(() => {{
  const h = document.documentElement.scrollHeight || document.body.scrollHeight;
  const y0 = window.scrollY || window.pageYOffset || 0;
  const next = Math.min(h, y0 + {step_px});
  window.scrollTo(0, next);
  return next;
}})()"#
    )
}

async fn evaluate_script(page: &Page, script: &str) -> Result<serde_json::Value, ToolError> {
    let result = page.evaluate(script).await?;
    let value = result.value().cloned().unwrap_or(serde_json::Value::Null);
    if let Some(err) = value.get("__err__").and_then(|e| e.as_str()) {
        return Err(ToolError::PageError(err.to_string()));
    }
    Ok(value)
}

/// Viewport, user agent and lifecycle events for a fresh page
pub async fn setup_page(page: &Page, settings: &CaptureSettings) -> Result<(), ToolError> {
    page.execute(SetLifecycleEventsEnabledParams::new(true)).await?;

    let metrics = SetDeviceMetricsOverrideParams::builder()
        .width(settings.width)
        .height(settings.height)
        .device_scale_factor(1.0)
        .mobile(false)
        .build()
        .map_err(ToolError::PageError)?;
    page.execute(metrics).await?;

    let user_agent = SetUserAgentOverrideParams::builder()
        .user_agent(settings.user_agent.clone())
        .accept_language(settings.locale.clone())
        .build()
        .map_err(ToolError::PageError)?;
    page.execute(user_agent).await?;

    Ok(())
}

/// Navigate once and wait for `condition` on the new document
async fn goto_until(
    page: &Page,
    url: &str,
    condition: WaitCondition,
    nav_timeout: Duration,
) -> Result<(), ToolError> {
    let mut events = page.event_listener::<EventLifecycleEvent>().await?;

    let navigation = async {
        let response = page.execute(NavigateParams::new(url)).await?;
        if let Some(error) = &response.result.error_text {
            return Err(ToolError::NavigationFailed(format!("{url}: {error}")));
        }
        let frame_id = response.result.frame_id.clone();
        let loader_id = response.result.loader_id.clone();

        while let Some(event) = events.next().await {
            let same_document = loader_id.as_ref().map_or(true, |id| *id == event.loader_id);
            if event.frame_id == frame_id && same_document && event.name == condition.event_name()
            {
                return Ok(());
            }
        }
        Err(ToolError::BrowserProcessDied(
            "lifecycle event stream closed".to_string(),
        ))
    };

    timeout(nav_timeout, navigation)
        .await
        .map_err(|_| ToolError::NavigationTimeout(nav_timeout))?
}

/// What [`robust_goto`] does after a failed navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavStep {
    /// Try the next wait condition in the same attempt
    NextCondition,
    /// Pause, then start over from the first condition
    NewAttempt(Duration),
    GiveUp,
}

/// Decide the next step after `err` at `ORDER[condition]` of `attempt`
///
/// Only a timeout falls through to the next wait condition. A destroyed
/// execution context waits twice as long before the next attempt.
pub fn after_failure(err: &ToolError, condition: usize, attempt: u32, retries: u32) -> NavStep {
    let timed_out = matches!(err, ToolError::NavigationTimeout(_));
    if timed_out && condition + 1 < WaitCondition::ORDER.len() {
        NavStep::NextCondition
    } else if attempt >= retries {
        NavStep::GiveUp
    } else if err.is_context_destroyed() {
        NavStep::NewAttempt(RETRY_PAUSE * 2)
    } else {
        NavStep::NewAttempt(RETRY_PAUSE)
    }
}

/// Navigate with fallback wait conditions and whole-attempt retries
///
/// Returns the last error once `retries + 1` attempts are used up.
pub async fn robust_goto(
    page: &Page,
    url: &str,
    nav_timeout: Duration,
    retries: u32,
) -> Result<(), ToolError> {
    let mut attempt = 0;
    let mut condition = 0;
    loop {
        let wait = WaitCondition::ORDER[condition];
        let err = match goto_until(page, url, wait, nav_timeout).await {
            Ok(()) => {
                debug!(url, wait = wait.event_name(), "navigation complete");
                return Ok(());
            }
            Err(e) => e,
        };
        debug!(url, wait = wait.event_name(), attempt, error = %err, "navigation failed");

        match after_failure(&err, condition, attempt, retries) {
            NavStep::NextCondition => condition += 1,
            NavStep::NewAttempt(pause) => {
                sleep(pause).await;
                attempt += 1;
                condition = 0;
            }
            NavStep::GiveUp => return Err(err),
        }
    }
}

/// Add the stylesheet through the CSS domain, which page CSP does not govern
async fn inject_stylesheet(page: &Page, css: &str) -> Result<(), ToolError> {
    let frame_id = page
        .mainframe()
        .await?
        .ok_or_else(|| ToolError::PageError("page has no main frame".to_string()))?;

    page.execute(DomEnableParams::default()).await?;
    page.execute(CssEnableParams::default()).await?;
    let sheet = page.execute(CreateStyleSheetParams::new(frame_id)).await?;
    page.execute(SetStyleSheetTextParams::new(
        sheet.result.style_sheet_id.clone(),
        css,
    ))
    .await?;
    Ok(())
}

/// The page operations layout normalization needs
#[async_trait]
pub trait StyleTarget: Sync {
    async fn run_script(&self, script: &str) -> Result<serde_json::Value, ToolError>;

    async fn add_stylesheet(&self, css: &str) -> Result<(), ToolError>;
}

#[async_trait]
impl StyleTarget for Page {
    async fn run_script(&self, script: &str) -> Result<serde_json::Value, ToolError> {
        evaluate_script(self, script).await
    }

    async fn add_stylesheet(&self, css: &str) -> Result<(), ToolError> {
        inject_stylesheet(self, css).await
    }
}

/// Neutralize sticky/fixed positioning and hide overlays
pub async fn normalize_layout<T: StyleTarget + ?Sized>(target: &T) -> Result<(), ToolError> {
    let eval_err = match target.run_script(&normalize_script()).await {
        Ok(_) => return Ok(()),
        Err(e) => e,
    };
    debug!(error = %eval_err, "script injection failed, using CSS domain");

    match target.add_stylesheet(NORMALIZE_CSS).await {
        Ok(()) => {
            if let Err(e) = target.run_script(UNPIN_SCRIPT).await {
                warn!(error = %e, "could not unpin fixed elements");
            }
            Ok(())
        }
        Err(add_err) => Err(ToolError::NormalizeFailed(format!(
            "evaluate_err={eval_err} stylesheet_err={add_err}"
        ))),
    }
}

/// Scroll down in steps so lazy content loads, then return to the top
///
/// Stops early once the offset stops changing. Script errors end the scroll
/// without failing the capture.
pub async fn scroll_to_bottom(page: &Page, scroll: &ScrollSettings) {
    let script = scroll_step_script(scroll.step_px);
    let pause = Duration::from_millis(scroll.pause_ms);
    let mut last_y: Option<f64> = None;

    for _ in 0..scroll.max_steps {
        let y = match evaluate_script(page, &script).await {
            Ok(value) => value.as_f64(),
            Err(e) => {
                debug!(error = %e, "scroll step failed");
                return;
            }
        };
        if y.is_none() || y == last_y {
            break;
        }
        last_y = y;
        sleep(pause).await;
    }

    if evaluate_script(page, "window.scrollTo(0, 0)").await.is_ok() {
        sleep(SETTLE_AFTER_SCROLL).await;
    }
}

pub async fn take_screenshot(page: &Page, output: &Path, jpeg: bool) -> Result<(), ToolError> {
    let params = if jpeg {
        ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Jpeg)
            .quality(SCREENSHOT_QUALITY)
            .full_page(true)
            .build()
    } else {
        ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build()
    };

    let data = page
        .screenshot(params)
        .await
        .map_err(|e| ToolError::CaptureFailed(e.to_string()))?;
    tokio::fs::write(output, &data).await?;
    Ok(())
}

async fn drive_page(
    page: &Page,
    url: &str,
    output: &Path,
    settings: &CaptureSettings,
) -> Result<(), ToolError> {
    setup_page(page, settings).await?;
    robust_goto(page, url, settings.nav_timeout(), settings.goto_retries).await?;
    normalize_layout(page).await?;
    scroll_to_bottom(page, &settings.scroll).await;
    take_screenshot(page, output, settings.jpeg).await
}

async fn capture_in_context(
    browser: &Browser,
    context_id: &BrowserContextId,
    url: &str,
    output: &Path,
    settings: &CaptureSettings,
) -> Result<(), ToolError> {
    let target = CreateTargetParams::builder()
        .url("about:blank")
        .browser_context_id(context_id.clone())
        .build()
        .map_err(ToolError::PageError)?;
    let page = browser.new_page(target).await?;

    let result = drive_page(&page, url, output, settings).await;

    if let Err(e) = page.close().await {
        debug!(error = %e, "page close failed");
    }
    result
}

/// Capture `url` to `output` inside a fresh, isolated browser context
pub async fn capture_once(
    browser: &Browser,
    url: &str,
    output: &Path,
    settings: &CaptureSettings,
) -> Result<(), ToolError> {
    let context_id = browser
        .execute(CreateBrowserContextParams::default())
        .await?
        .result
        .browser_context_id
        .clone();

    let result = capture_in_context(browser, &context_id, url, output, settings).await;

    if let Err(e) = browser
        .execute(DisposeBrowserContextParams::new(context_id))
        .await
    {
        debug!(error = %e, "browser context dispose failed");
    }
    result
}

/// Launch a browser, capture a single URL and shut the browser down
///
/// A raised `shutdown` abandons the page but still closes the browser.
pub async fn capture_one(
    settings: &CaptureSettings,
    url: &str,
    output: &Path,
    shutdown: &Shutdown,
) -> Result<(), ToolError> {
    crate::validate_url(url)?;
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let launcher = ChromeLauncher::new(settings.clone());
    let mut capturer = launcher.launch(0).await?;
    let result = tokio::select! {
        result = capturer.capture(url, output) => result,
        _ = shutdown.requested() => Err(ToolError::Interrupted),
    };
    capturer.close().await;

    if result.is_ok() {
        info!("Screenshot saved to: {}", output.display());
    }
    result
}
