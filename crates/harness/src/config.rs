//! Harness configuration

use driftcheck_common::CollectionSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::actuate::{ActionRoutes, Route};
use crate::error::{HarnessError, HarnessResult};
use crate::playwright::PlaywrightConfig;
use crate::policy::RetryPolicy;
use crate::rest::{HttpMethod, RestClient};
use crate::schema::SchemaEndpoints;
use crate::ui::UiRoutes;

/// Harness configuration, usually read from `driftcheck.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Backend API base URL
    pub backend_url: String,

    /// Admin frontend base URL, used by the UI actuator
    pub frontend_url: String,

    /// Environment variable holding the bearer token
    pub auth_token_env: String,

    /// Per-request HTTP timeout
    pub request_timeout_ms: u64,

    /// Plans run at the same time
    pub concurrency: usize,

    /// Directory for result files
    pub output_dir: PathBuf,

    /// Default retry policy; plans may override it
    pub policy: RetryPolicy,

    /// Collection descriptors, overriding presets of the same name
    pub collections: BTreeMap<String, CollectionSpec>,

    /// API routes per collection
    pub routes: BTreeMap<String, ActionRoutes>,

    /// UI selectors per collection
    pub ui: BTreeMap<String, UiRoutes>,

    pub schemas: SchemaEndpoints,

    pub playwright: PlaywrightConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let factor_routes = ActionRoutes {
            create: Some(Route::new(HttpMethod::Post, "/createFactorId")),
            created_id_field: Some("data.factor_type_id".to_string()),
            ..ActionRoutes::default()
        };

        Self {
            backend_url: "http://localhost:8080".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            auth_token_env: "DRIFTCHECK_TOKEN".to_string(),
            request_timeout_ms: 10_000,
            concurrency: 4,
            output_dir: PathBuf::from("reconcile-results"),
            policy: RetryPolicy::default(),
            collections: BTreeMap::new(),
            routes: BTreeMap::from([("factors".to_string(), factor_routes)]),
            ui: BTreeMap::from([
                ("factors".to_string(), UiRoutes::factors()),
                ("services".to_string(), UiRoutes::services()),
            ]),
            schemas: SchemaEndpoints::default(),
            playwright: PlaywrightConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when the file
    /// does not exist
    pub fn load(path: &Path) -> HarnessResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> HarnessResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.concurrency == 0 {
            return Err(HarnessError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(HarnessError::InvalidConfig(
                "request_timeout_ms must be non-zero".to_string(),
            ));
        }
        self.policy.validate()
    }

    /// Collection by name: configured entries first, then presets
    pub fn collection(&self, name: &str) -> HarnessResult<CollectionSpec> {
        if let Some(spec) = self.collections.get(name) {
            let mut spec = spec.clone();
            spec.name = name.to_string();
            return Ok(spec);
        }
        CollectionSpec::preset(name).ok_or_else(|| HarnessError::UnknownCollection(name.to_string()))
    }

    /// Bearer token from the configured environment variable, if set
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.auth_token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// REST client for the backend with the token attached
    pub fn rest_client(&self) -> HarnessResult<RestClient> {
        RestClient::new(&self.backend_url, self.token(), self.request_timeout())
    }

    /// Playwright settings pointed at the configured frontend
    pub fn playwright_config(&self) -> PlaywrightConfig {
        PlaywrightConfig {
            base_url: self.frontend_url.clone(),
            ..self.playwright.clone()
        }
    }
}
