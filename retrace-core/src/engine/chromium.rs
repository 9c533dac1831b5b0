use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::element::Element;
use chromiumoxide::page::{Page, ScreenshotParams};
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::config::ChromiumSection;
use crate::run::{BrowserEngine, RecordedAction, Recording};

use super::{
    ActionFailure, EngineActionError, EngineError, EngineReport, EngineResult, EngineStatus,
    ExecutionEngine, ExecutionOptions, Reporter, ScreenshotCapture,
};

const TARGET_ATTRIBUTE: &str = "data-retrace-target";
const TEXT_CANDIDATES: &str = "a,button,label,span,div,p,li,td,th,h1,h2,h3,h4,h5,option,input";

/// Replays recordings in a fresh Chromium instance over CDP. One browser
/// process is launched per execution with a throwaway profile directory.
#[derive(Debug, Clone)]
pub struct ChromiumEngine {
    config: Arc<ChromiumSection>,
}

impl ChromiumEngine {
    pub fn new(config: ChromiumSection) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn build_chromium_config(&self, headless: bool, profile: &Path) -> EngineResult<ChromiumConfig> {
        let [width, height] = self.config.window;
        let mut builder = ChromiumConfig::builder()
            .user_data_dir(profile)
            .window_size(width, height);

        if let Some(executable) = &self.config.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.config.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = vec![
            "--no-first-run".to_string(),
            "--password-store=basic".to_string(),
            "--disable-background-timer-throttling".to_string(),
        ];
        if self.config.disable_gpu {
            args.push("--disable-gpu".into());
        }
        args.extend(self.config.extra_args.iter().cloned());
        builder = builder.args(args);

        builder.build().map_err(EngineError::Configuration)
    }

    async fn replay(
        &self,
        browser: &Browser,
        recording: &Recording,
        options: &ExecutionOptions,
        reporter: &mut dyn Reporter,
    ) -> EngineResult<EngineReport> {
        let total = recording.actions.len();
        let mut report = EngineReport::new(EngineStatus::Success, total as i64);
        let page = browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?;
        reporter.on_start(total);
        navigate(&page, &recording.url).await?;

        let mut halted = false;
        for (index, action) in recording.actions.iter().enumerate() {
            if options.cancel.is_cancelled() {
                return Err(EngineError::cancelled());
            }
            if halted {
                reporter.on_action_skipped(action, index, "previous action failed");
                report.actions_skipped += 1;
                continue;
            }

            reporter.on_action_start(action, index);
            let started = Instant::now();
            let step = tokio::select! {
                result = perform(&page, action) => result,
                _ = options.cancel.cancelled() => return Err(EngineError::cancelled()),
            };
            report.actions_executed += 1;

            match step {
                Ok(()) => reporter.on_action_success(action, index, started.elapsed()),
                Err(err) => {
                    report.actions_failed += 1;
                    let failure = ActionFailure {
                        message: err.to_string(),
                        stack: err.stack().map(str::to_string),
                        screenshot_path: None,
                    };
                    // Screenshots are reported with the final result and
                    // attached to the action record afterwards.
                    if options.capture_screenshots {
                        match capture(&page, &options.artifacts_dir, &action.id).await {
                            Ok(path) => report.screenshots.push(ScreenshotCapture {
                                action_id: action.id.clone(),
                                path,
                            }),
                            Err(err) => {
                                warn!(action_id = %action.id, error = %err, "failure screenshot not captured")
                            }
                        }
                    }
                    report.errors.push(EngineActionError {
                        action_id: action.id.clone(),
                        error: failure.message.clone(),
                        stack: failure.stack.clone(),
                    });
                    reporter.on_action_error(action, index, &failure, started.elapsed());
                    halted = true;
                }
            }
        }

        if report.actions_failed > 0 {
            report.status = EngineStatus::Failure;
        }
        if let Err(err) = page.close().await {
            debug!(error = %err, "page close failed");
        }
        Ok(report)
    }
}

#[async_trait]
impl ExecutionEngine for ChromiumEngine {
    async fn execute(
        &self,
        recording: &Recording,
        options: &ExecutionOptions,
        reporter: &mut dyn Reporter,
    ) -> EngineResult<EngineReport> {
        if options.browser != BrowserEngine::Chromium {
            return Err(EngineError::Unsupported(options.browser));
        }
        if options.cancel.is_cancelled() {
            return Err(EngineError::cancelled());
        }

        let started = Instant::now();
        let profile = tempfile::Builder::new()
            .prefix("retrace-chromium-")
            .tempdir()?;
        let chromium_config = self.build_chromium_config(options.headless, profile.path())?;
        info!(
            recording_id = %recording.recording_id,
            actions = recording.actions.len(),
            headless = options.headless,
            "Launching Chromium instance"
        );

        let (mut browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| EngineError::Launch(err.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        let outcome = self.replay(&browser, recording, options, reporter).await;

        if let Err(err) = browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Err(err) = handler_task.await {
            warn!(error = %err, "Browser handler join error");
        }

        let mut report = outcome?;
        report.duration_ms = started.elapsed().as_millis() as i64;
        reporter.on_complete(&report);
        Ok(report)
    }
}

async fn navigate(page: &Page, url: &str) -> EngineResult<()> {
    let params = NavigateParams::builder()
        .url(url)
        .build()
        .map_err(EngineError::Configuration)?;
    page.goto(params).await?;
    page.wait_for_navigation().await?;
    Ok(())
}

async fn perform(page: &Page, action: &RecordedAction) -> EngineResult<()> {
    match action.action_type.to_ascii_lowercase().as_str() {
        "navigate" | "goto" | "visit" => {
            let url = action
                .url
                .as_deref()
                .or(action.value.as_deref())
                .ok_or_else(|| action_error(action, "navigate action has no url"))?;
            navigate(page, url).await
        }
        "click" | "dblclick" => {
            locate(page, action).await?.click().await?;
            Ok(())
        }
        "type" | "fill" | "input" => {
            let element = locate(page, action).await?;
            element.click().await?;
            element
                .type_str(action.value.as_deref().unwrap_or_default())
                .await?;
            Ok(())
        }
        "press" | "keypress" => {
            let key = action.value.as_deref().unwrap_or("Enter");
            locate(page, action).await?.press_key(key).await?;
            Ok(())
        }
        "select" => {
            let value = serde_json::to_string(action.value.as_deref().unwrap_or_default())
                .map_err(|err| action_error(action, err.to_string()))?;
            locate(page, action)
                .await?
                .call_js_fn(
                    format!(
                        "function() {{ this.value = {value}; this.dispatchEvent(new Event('change', {{ bubbles: true }})); }}"
                    ),
                    false,
                )
                .await?;
            Ok(())
        }
        "scroll" => {
            if action.selectors.primary().is_some() {
                locate(page, action).await?.scroll_into_view().await?;
            } else {
                let delta: i64 = action
                    .value
                    .as_deref()
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(400);
                page.evaluate(format!("window.scrollBy(0, {delta})")).await?;
            }
            Ok(())
        }
        "wait" => {
            let millis: u64 = action
                .value
                .as_deref()
                .and_then(|value| value.parse().ok())
                .unwrap_or(500);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(())
        }
        "assert_text" => {
            let expected = action.value.as_deref().unwrap_or_default();
            let text = locate(page, action)
                .await?
                .inner_text()
                .await?
                .unwrap_or_default();
            if text.contains(expected) {
                Ok(())
            } else {
                Err(action_error(
                    action,
                    format!("Expected text {expected:?} but found {text:?}"),
                ))
            }
        }
        "assert_visible" => locate(page, action).await.map(|_| ()),
        other => Err(action_error(
            action,
            format!("Unsupported action type: {other}"),
        )),
    }
}

async fn locate(page: &Page, action: &RecordedAction) -> EngineResult<Element> {
    let selector = action
        .selectors
        .primary()
        .ok_or_else(|| action_error(action, "action has no selector"))?;
    let css = match selector.kind.as_str() {
        "id" => attribute_selector("id", &selector.value),
        "test_id" => attribute_selector("data-testid", &selector.value),
        "aria_label" => attribute_selector("aria-label", &selector.value),
        "name" => attribute_selector("name", &selector.value),
        "css" => selector.value.clone(),
        kind => {
            // XPath and text locators are resolved in the page and tagged so
            // the element can be fetched through a plain CSS query.
            let marker = format!("{}-{}", action.id, Utc::now().timestamp_millis());
            let value = to_js_literal(action, &selector.value)?;
            let marker_literal = to_js_literal(action, &marker)?;
            let lookup = if kind == "xpath" {
                format!(
                    "document.evaluate({value}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue"
                )
            } else {
                format!(
                    "Array.from(document.querySelectorAll('{TEXT_CANDIDATES}')).find(el => (el.innerText || el.value || '').trim() === {value})"
                )
            };
            let script = format!(
                "(() => {{ const node = {lookup}; if (!node) {{ return false; }} node.setAttribute('{TARGET_ATTRIBUTE}', {marker_literal}); return true; }})()"
            );
            let found: bool = page
                .evaluate(script)
                .await?
                .into_value()
                .map_err(|err| action_error(action, err.to_string()))?;
            if !found {
                return Err(action_error(
                    action,
                    format!("Element not found: {} {}", selector.kind, selector.value),
                ));
            }
            attribute_selector(TARGET_ATTRIBUTE, &marker)
        }
    };
    page.find_element(css.as_str())
        .await
        .map_err(|_| action_error(action, format!("Element not found: {css}")))
}

async fn capture(page: &Page, dir: &Path, action_id: &str) -> EngineResult<String> {
    tokio::fs::create_dir_all(dir).await?;
    let file_name = format!(
        "{}-{}.png",
        action_id.replace(|c: char| !c.is_ascii_alphanumeric() && c != '_' && c != '-', "_"),
        Utc::now().timestamp_millis()
    );
    let path = dir.join(file_name);
    page.save_screenshot(ScreenshotParams::builder().full_page(true).build(), &path)
        .await?;
    Ok(path.display().to_string())
}

fn attribute_selector(attribute: &str, value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("[{attribute}=\"{escaped}\"]")
}

fn to_js_literal(action: &RecordedAction, value: &str) -> EngineResult<String> {
    serde_json::to_string(value).map_err(|err| action_error(action, err.to_string()))
}

fn action_error(action: &RecordedAction, message: impl Into<String>) -> EngineError {
    EngineError::Action {
        action_id: Some(action.id.clone()),
        message: message.into(),
        stack: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_selectors_escape_quotes() {
        assert_eq!(attribute_selector("id", "submit"), "[id=\"submit\"]");
        assert_eq!(
            attribute_selector("aria-label", "Say \"hi\""),
            "[aria-label=\"Say \\\"hi\\\"\"]"
        );
    }

    #[test]
    fn chromium_config_builds_with_defaults() {
        let engine = ChromiumEngine::new(ChromiumSection::default());
        let profile = tempfile::tempdir().unwrap();
        // Building only resolves arguments; nothing is launched.
        let result = engine.build_chromium_config(true, profile.path());
        if let Err(EngineError::Configuration(message)) = &result {
            // No Chromium binary on the host is the only acceptable failure.
            assert!(message.to_lowercase().contains("chrom"), "{message}");
        }
    }
}
