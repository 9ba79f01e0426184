//! Declarative YAML reconciliation plans

use driftcheck_common::{Action, EntityRef, Expectation, Filter};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{HarnessError, HarnessResult};
use crate::policy::RetryPolicy;

/// Which actuator carries out a plan's action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    #[default]
    Api,
    Ui,
}

/// One reconciliation case parsed from YAML
///
/// ```yaml
/// name: toggle-factor-42
/// tags: [factors, smoke]
/// collection: factors
/// target: { id: 42 }
/// action: { kind: toggle }
/// expect: { kind: toggled }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilePlan {
    /// Unique name for this plan
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering plans
    #[serde(default)]
    pub tags: Vec<String>,

    /// Collection preset or configured collection name
    pub collection: String,

    pub target: EntityRef,

    pub action: Action,

    pub expect: Expectation,

    /// Narrowing for the polls
    #[serde(default)]
    pub filter: Filter,

    /// Overrides the configured policy for this plan only
    #[serde(default)]
    pub policy: Option<RetryPolicy>,

    #[serde(default)]
    pub driver: DriverKind,
}

impl ReconcilePlan {
    /// Parse a plan from a YAML string
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let plan: Self = serde_yaml::from_str(yaml).map_err(|e| HarnessError::PlanParse(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Parse a plan from a YAML file
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| HarnessError::PlanParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all plans under a directory, sorted by name
    pub fn load_all(dir: &Path) -> HarnessResult<Vec<Self>> {
        if !dir.is_dir() {
            return Err(HarnessError::PlanNotFound(dir.display().to_string()));
        }

        let mut plans = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            plans.push(Self::from_file(entry.path())?);
        }

        plans.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(dup) = plans.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(HarnessError::PlanParse(format!(
                "duplicate plan name '{}'",
                dup[0].name
            )));
        }
        Ok(plans)
    }

    /// Keep plans carrying `tag`
    pub fn filter_by_tag(plans: Vec<Self>, tag: &str) -> Vec<Self> {
        plans
            .into_iter()
            .filter(|p| p.tags.iter().any(|t| t == tag))
            .collect()
    }

    fn validate(&self) -> HarnessResult<()> {
        if self.name.trim().is_empty() {
            return Err(HarnessError::PlanParse("plan name is empty".to_string()));
        }
        if let Some(policy) = &self.policy {
            policy
                .validate()
                .map_err(|e| HarnessError::PlanParse(format!("{}: {}", self.name, e)))?;
        }
        Ok(())
    }
}
