//! Playwright browser automation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};

/// One browser interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum UiStep {
    /// Navigate to a URL relative to the frontend base
    Navigate { url: String },

    Fill { selector: String, value: String },

    Click { selector: String },

    WaitFor {
        selector: String,
        #[serde(default)]
        state: WaitState,
        timeout_ms: u64,
    },

    /// Wait for visible text, e.g. a success toast
    WaitForText { text: String, timeout_ms: u64 },

    SetInputFiles { selector: String, path: PathBuf },
}

impl UiStep {
    pub fn name(&self) -> String {
        match self {
            UiStep::Navigate { url } => format!("navigate:{}", url),
            UiStep::Fill { selector, .. } => format!("fill:{}", selector),
            UiStep::Click { selector } => format!("click:{}", selector),
            UiStep::WaitFor { selector, .. } => format!("wait:{}", selector),
            UiStep::WaitForText { text, .. } => format!("wait_text:{}", text),
            UiStep::SetInputFiles { selector, .. } => format!("upload:{}", selector),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// A step threw inside the browser script
    #[error("step {index} failed: {message}")]
    StepFailed { index: usize, message: String },

    #[error("browser script failed:\nstdout: {stdout}\nstderr: {stderr}")]
    Script { stdout: String, stderr: String },

    #[error("browser script timed out after {0} ms")]
    Timeout(u64),

    #[error("could not launch browser script: {0}")]
    Launch(String),
}

/// Capability set the UI actuator needs from a browser
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Run the steps in order inside one page session
    async fn run(&self, steps: &[UiStep]) -> Result<(), DriverError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    pub base_url: String,
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Storage state saved by an external login step (cookies, localStorage)
    pub storage_state: Option<PathBuf>,
    pub node_binary: String,
    /// Upper bound for one script run
    pub script_timeout_ms: u64,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5173".to_string(),
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            storage_state: Some(PathBuf::from("auth.json")),
            node_binary: "node".to_string(),
            script_timeout_ms: 60_000,
        }
    }
}

/// Drives Playwright by rendering steps into a Node script
pub struct PlaywrightDriver {
    config: PlaywrightConfig,
}

impl PlaywrightDriver {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }

    /// Check that `npx playwright` is available
    pub async fn verify_installation() -> HarnessResult<()> {
        let status = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(HarnessError::PlaywrightNotFound),
        }
    }

    /// Build the Playwright script for a set of steps
    pub fn build_script(&self, steps: &[UiStep]) -> String {
        let mut context_options = format!(
            "viewport: {{ width: {}, height: {} }}",
            self.config.viewport_width, self.config.viewport_height
        );
        if let Some(state) = &self.config.storage_state {
            context_options.push_str(&format!(
                ", storageState: {}",
                js_string(&state.to_string_lossy())
            ));
        }

        let mut script = format!(
            r#"
const {{ chromium, firefox, webkit }} = require('playwright');

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{ {context_options} }});
  const page = await context.newPage();
  const baseUrl = {base_url};
  let step = -1;

  try {{
"#,
            browser = self.config.browser.as_str(),
            headless = self.config.headless,
            context_options = context_options,
            base_url = js_string(self.config.base_url.trim_end_matches('/')),
        );

        for (i, step) in steps.iter().enumerate() {
            script.push_str(&format!("\n    // Step {}: {}\n", i + 1, step.name()));
            script.push_str(&format!("    step = {};\n", i));
            script.push_str(&step_to_js(step));
            script.push('\n');
        }

        script.push_str(
            r#"
    console.log(JSON.stringify({ success: true }));
  } catch (error) {
    console.error(JSON.stringify({ success: false, step, error: error.message }));
    process.exitCode = 1;
  } finally {
    await browser.close();
  }
})();
"#,
        );

        script
    }

    async fn run_script(&self, script: &str) -> Result<(), DriverError> {
        // Node resolves `require('playwright')` from the script's directory, so
        // the script lives under the working directory next to node_modules.
        let cwd = std::env::current_dir().map_err(|e| DriverError::Launch(e.to_string()))?;
        let temp_dir = tempfile::Builder::new()
            .prefix(".driftcheck-")
            .tempdir_in(&cwd)
            .map_err(|e| DriverError::Launch(e.to_string()))?;
        let script_path = temp_dir.path().join("actuation.js");
        tokio::fs::write(&script_path, script)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        debug!("Running Playwright script: {}", script_path.display());

        let child = Command::new(&self.config.node_binary)
            .arg(&script_path)
            .current_dir(&cwd)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(Duration::from_millis(self.config.script_timeout_ms), child)
            .await
            .map_err(|_| DriverError::Timeout(self.config.script_timeout_ms))?
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        if output.status.success() {
            return Ok(());
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        Err(parse_failure(&stderr).unwrap_or(DriverError::Script { stdout, stderr }))
    }
}

#[async_trait]
impl BrowserDriver for PlaywrightDriver {
    async fn run(&self, steps: &[UiStep]) -> Result<(), DriverError> {
        let script = self.build_script(steps);
        self.run_script(&script).await
    }
}

/// Convert a step to JavaScript code
fn step_to_js(step: &UiStep) -> String {
    match step {
        UiStep::Navigate { url } => {
            format!("    await page.goto(baseUrl + {});", js_string(url))
        }
        UiStep::Fill { selector, value } => {
            format!("    await page.fill({}, {});", js_string(selector), js_string(value))
        }
        UiStep::Click { selector } => {
            format!("    await page.locator({}).click();", js_string(selector))
        }
        UiStep::WaitFor {
            selector,
            state,
            timeout_ms,
        } => format!(
            "    await page.waitForSelector({}, {{ state: '{}', timeout: {} }});",
            js_string(selector),
            state.as_str(),
            timeout_ms
        ),
        UiStep::WaitForText { text, timeout_ms } => format!(
            "    await page.getByText({}).first().waitFor({{ state: 'visible', timeout: {} }});",
            js_string(text),
            timeout_ms
        ),
        UiStep::SetInputFiles { selector, path } => format!(
            "    await page.setInputFiles({}, {});",
            js_string(selector),
            js_string(&path.to_string_lossy())
        ),
    }
}

/// Quote a value as a JavaScript string literal. JSON string syntax is a
/// subset of JS string syntax, so quotes and backslashes are escaped.
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[derive(Deserialize)]
struct ScriptFailure {
    step: i64,
    error: Option<String>,
}

/// Pick the structured failure line the script prints on error
fn parse_failure(stderr: &str) -> Option<DriverError> {
    stderr
        .lines()
        .rev()
        .filter_map(|line| serde_json::from_str::<ScriptFailure>(line.trim()).ok())
        .find(|failure| failure.step >= 0)
        .map(|failure| DriverError::StepFailed {
            index: failure.step as usize,
            message: failure.error.unwrap_or_default(),
        })
}
