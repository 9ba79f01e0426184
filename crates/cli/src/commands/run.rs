//! Run Commands

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

use driftcheck_harness::{CaseReport, PlanRunner, SuiteReport};

use crate::output::{print_list, print_success, print_warning, TableDisplay};
use crate::Context;

#[derive(Args)]
pub struct RunArgs {
    /// Directory holding plan files
    #[arg(short, long, default_value = "plans")]
    pub plans: PathBuf,

    /// Run only plans carrying this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Run only the plan with this name
    #[arg(short, long, conflicts_with = "tag")]
    pub name: Option<String>,

    /// Output directory for results
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Plans reconciled at the same time
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Override the retry budget of plans without their own policy
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

/// One result row
#[derive(Serialize)]
pub struct CaseRow {
    pub name: String,
    pub collection: String,
    pub driver: String,
    pub passed: bool,
    pub attempts: Option<u32>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl From<&CaseReport> for CaseRow {
    fn from(case: &CaseReport) -> Self {
        Self {
            name: case.name.clone(),
            collection: case.collection.clone(),
            driver: format!("{:?}", case.driver).to_lowercase(),
            passed: case.passed(),
            attempts: case.result.as_ref().map(|r| r.attempts),
            duration_ms: case.duration_ms,
            error: case.failure(),
        }
    }
}

impl TableDisplay for CaseRow {
    fn headers() -> Vec<&'static str> {
        vec!["Plan", "Collection", "Driver", "Result", "Attempts", "Duration", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.collection.clone(),
            self.driver.clone(),
            if self.passed { "pass" } else { "FAIL" }.to_string(),
            self.attempts.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string()),
            format!("{} ms", self.duration_ms),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

pub async fn execute(args: RunArgs, ctx: &Context) -> Result<()> {
    let mut config = ctx.config.clone();
    if let Some(dir) = args.output {
        config.output_dir = dir;
    }
    if let Some(n) = args.concurrency {
        config.concurrency = n;
    }
    if let Some(n) = args.max_attempts {
        config.policy.max_attempts = n;
    }

    let runner = PlanRunner::from_config(config, &args.plans)?.with_cancellation(ctx.cancel.clone());

    let report = match (&args.name, &args.tag) {
        (Some(name), _) => {
            let start = Instant::now();
            let case = runner.run_named(name).await?;
            SuiteReport::from_cases(vec![case], start.elapsed().as_millis() as u64)
        }
        (None, Some(tag)) => runner.run_tagged(tag).await?,
        (None, None) => runner.run_all().await?,
    };

    let path = runner.write_results(&report)?;

    let rows: Vec<CaseRow> = report.results.iter().map(CaseRow::from).collect();
    print_list(&rows, ctx.format)?;

    if report.total == 0 {
        print_warning(&format!("No plans found in {}", args.plans.display()));
        return Ok(());
    }
    if !report.success() {
        bail!(
            "{} of {} plan(s) failed; see {}",
            report.failed,
            report.total,
            path.display()
        );
    }

    print_success(&format!(
        "{} plan(s) reconciled in {} ms",
        report.passed, report.duration_ms
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftcheck_harness::DriverKind;

    #[test]
    fn test_setup_failure_row() {
        let case = CaseReport {
            name: "toggle-factor-42".to_string(),
            collection: "contracts".to_string(),
            driver: DriverKind::Ui,
            duration_ms: 3,
            result: None,
            error: Some("Unknown collection: contracts".to_string()),
        };

        let row = CaseRow::from(&case);
        assert!(!row.passed);
        assert_eq!(row.driver, "ui");
        assert_eq!(row.row()[3], "FAIL");
        assert_eq!(row.row()[4], "-");
        assert_eq!(row.row()[6], "Unknown collection: contracts");
    }
}
