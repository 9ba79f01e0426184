//! Plan runner: loads plans and reconciles them with bounded concurrency

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::actuate::RestActuator;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::fetch::{Fetcher, RestFetcher};
use crate::plan::{DriverKind, ReconcilePlan};
use crate::playwright::PlaywrightDriver;
use crate::reconciler::{ReconcileRequest, Reconciler, ReconciliationResult};
use crate::ui::UiActuator;

/// Outcome of one plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseReport {
    pub name: String,
    pub collection: String,
    pub driver: DriverKind,
    pub duration_ms: u64,
    /// Present whenever the plan got as far as reconciling
    pub result: Option<ReconciliationResult>,
    /// Setup failure that kept the plan from running
    pub error: Option<String>,
}

impl CaseReport {
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.result.as_ref().map_or(false, |r| r.succeeded)
    }

    /// Short failure description for logs and tables
    pub fn failure(&self) -> Option<String> {
        if let Some(e) = &self.error {
            return Some(e.clone());
        }
        let result = self.result.as_ref()?;
        result
            .last_error
            .as_ref()
            .map(|e| format!("{} after {} attempt(s)", e, result.attempts))
    }
}

/// Result of running a set of plans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<CaseReport>,
}

impl SuiteReport {
    pub fn from_cases(results: Vec<CaseReport>, duration_ms: u64) -> Self {
        let passed = results.iter().filter(|r| r.passed()).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration_ms,
            results,
        }
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Runs reconciliation plans against one backend
pub struct PlanRunner {
    config: HarnessConfig,
    api: Reconciler,
    ui: Option<Reconciler>,
    plans_dir: PathBuf,
    cancel: CancellationToken,
}

impl PlanRunner {
    pub fn new(config: HarnessConfig, api: Reconciler, ui: Option<Reconciler>, plans_dir: &Path) -> Self {
        Self {
            config,
            api,
            ui,
            plans_dir: plans_dir.to_path_buf(),
            cancel: CancellationToken::new(),
        }
    }

    /// Wire REST and Playwright adapters from configuration
    pub fn from_config(config: HarnessConfig, plans_dir: &Path) -> HarnessResult<Self> {
        config.validate()?;
        let client = config.rest_client()?;

        let fetcher: Arc<dyn Fetcher> = Arc::new(RestFetcher::new(client.clone()));
        let api = Reconciler::new(
            fetcher.clone(),
            Arc::new(RestActuator::new(client.clone(), config.routes.clone())),
        );

        let driver = Arc::new(PlaywrightDriver::new(config.playwright_config()));
        let ui = Reconciler::new(
            fetcher,
            Arc::new(UiActuator::new(driver, client, config.ui.clone())),
        );

        Ok(Self::new(config, api, Some(ui), plans_dir))
    }

    /// Share a cancellation token, e.g. one tripped by Ctrl-C
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run all plans in the plans directory
    pub async fn run_all(&self) -> HarnessResult<SuiteReport> {
        let plans = ReconcilePlan::load_all(&self.plans_dir)?;
        Ok(self.run_plans(&plans).await)
    }

    /// Run plans carrying a tag
    pub async fn run_tagged(&self, tag: &str) -> HarnessResult<SuiteReport> {
        let plans = ReconcilePlan::filter_by_tag(ReconcilePlan::load_all(&self.plans_dir)?, tag);
        Ok(self.run_plans(&plans).await)
    }

    /// Run one plan by name
    pub async fn run_named(&self, name: &str) -> HarnessResult<CaseReport> {
        let plan = ReconcilePlan::load_all(&self.plans_dir)?
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| HarnessError::PlanNotFound(name.to_string()))?;
        Ok(self.run_plan(&plan).await)
    }

    /// Run plans, at most `concurrency` at a time. Reports keep plan order.
    pub async fn run_plans(&self, plans: &[ReconcilePlan]) -> SuiteReport {
        let start = Instant::now();
        info!("Running {} plan(s)...", plans.len());

        let results: Vec<CaseReport> = stream::iter(plans)
            .map(|plan| self.run_plan(plan))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let report = SuiteReport::from_cases(results, start.elapsed().as_millis() as u64);
        info!(
            "Reconcile results: {} passed, {} failed ({} ms)",
            report.passed, report.failed, report.duration_ms
        );
        report
    }

    /// Run a single plan. Setup problems are reported, not returned.
    pub async fn run_plan(&self, plan: &ReconcilePlan) -> CaseReport {
        let start = Instant::now();
        debug!("Running plan: {}", plan.name);

        let outcome = self.reconcile_plan(plan).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let report = match outcome {
            Ok(result) => CaseReport {
                name: plan.name.clone(),
                collection: plan.collection.clone(),
                driver: plan.driver,
                duration_ms,
                result: Some(result),
                error: None,
            },
            Err(e) => CaseReport {
                name: plan.name.clone(),
                collection: plan.collection.clone(),
                driver: plan.driver,
                duration_ms,
                result: None,
                error: Some(e.to_string()),
            },
        };

        match report.failure() {
            None => info!("✓ {} ({} ms)", report.name, report.duration_ms),
            Some(reason) => error!("✗ {} - {}", report.name, reason),
        }
        report
    }

    async fn reconcile_plan(&self, plan: &ReconcilePlan) -> HarnessResult<ReconciliationResult> {
        let collection = self.config.collection(&plan.collection)?;
        let reconciler = match plan.driver {
            DriverKind::Api => &self.api,
            DriverKind::Ui => self.ui.as_ref().ok_or_else(|| {
                HarnessError::InvalidConfig("UI driver is not configured".to_string())
            })?,
        };
        let policy = plan.policy.as_ref().unwrap_or(&self.config.policy);

        let request = ReconcileRequest::new(
            collection,
            plan.target.clone(),
            plan.action.clone(),
            plan.expect.clone(),
        )
        .with_filter(plan.filter.clone());

        Ok(reconciler.reconcile(&request, policy, &self.cancel).await)
    }

    /// Write the suite report to `reconcile-results.json`
    pub fn write_results(&self, report: &SuiteReport) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("reconcile-results.json");
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}
