//! Reconciler: actuate once, then poll until the expectation holds
//!
//! ```text
//! actuate ──► wait(backoff[0]) ──► fetch ──► locate ──► evaluate ──► done
//!                 ▲                                        │
//!                 └──────────── mismatch ◄─────────────────┘
//! ```
//!
//! Structural failures (rejected or ambiguous actions, schema drift, a target
//! that vanished) end the run at once. Only "not applied yet" and transient
//! fetch failures consume the retry budget.

use chrono::{DateTime, Utc};
use driftcheck_common::{
    locate, resolve_target, Action, ActuationError, ActuationReceipt, CollectionSpec, Entity,
    EntityId, EntityRef, Expectation, FetchError, Filter, Snapshot,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::actuate::Actuator;
use crate::fetch::Fetcher;
use crate::policy::RetryPolicy;

/// Why a reconciliation run did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileError {
    #[error("fetch of {collection} failed: {reason}")]
    FetchFailed { collection: String, reason: String },

    #[error("unexpected payload shape for {collection}: {reason}")]
    SchemaMismatch { collection: String, reason: String },

    #[error("target not found: {target}")]
    TargetNotFound { target: String },

    #[error("ambiguous target {target}: {} candidates", .candidates.len())]
    AmbiguousTarget {
        target: String,
        candidates: Vec<EntityId>,
    },

    #[error("action rejected: {reason}")]
    ActionRejected { status: Option<u16>, reason: String },

    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// The entity existed when the action was issued and is gone now
    #[error("target {id} vanished from the collection")]
    TargetVanished { id: EntityId },

    #[error("cancelled")]
    Cancelled,

    #[error("expected state not observed after {attempts} attempt(s)")]
    RetryBudgetExhausted {
        attempts: u32,
        /// Last transient fetch failure, when the final polls could not read
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_fetch_error: Option<String>,
    },
}

impl ReconcileError {
    /// Stable snake_case name, as written in result files
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::FetchFailed { .. } => "fetch_failed",
            ReconcileError::SchemaMismatch { .. } => "schema_mismatch",
            ReconcileError::TargetNotFound { .. } => "target_not_found",
            ReconcileError::AmbiguousTarget { .. } => "ambiguous_target",
            ReconcileError::ActionRejected { .. } => "action_rejected",
            ReconcileError::Transport { .. } => "transport",
            ReconcileError::TargetVanished { .. } => "target_vanished",
            ReconcileError::Cancelled => "cancelled",
            ReconcileError::RetryBudgetExhausted { .. } => "retry_budget_exhausted",
        }
    }
}

impl From<FetchError> for ReconcileError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::FetchFailed { collection, reason } => {
                ReconcileError::FetchFailed { collection, reason }
            }
            FetchError::SchemaMismatch { collection, reason } => {
                ReconcileError::SchemaMismatch { collection, reason }
            }
        }
    }
}

impl From<ActuationError> for ReconcileError {
    fn from(e: ActuationError) -> Self {
        match e {
            ActuationError::TargetNotFound { target } => ReconcileError::TargetNotFound { target },
            ActuationError::AmbiguousTarget { target, candidates } => {
                ReconcileError::AmbiguousTarget { target, candidates }
            }
            ActuationError::ActionRejected { status, reason } => {
                ReconcileError::ActionRejected { status, reason }
            }
            ActuationError::Transport(reason) => ReconcileError::Transport { reason },
        }
    }
}

/// One reconciliation: which entity, what to do, what to observe afterwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileRequest {
    pub collection: CollectionSpec,
    pub target: EntityRef,
    pub action: Action,
    pub expected: Expectation,
    /// Narrowing for the polls. `All` lets the reconciler pick a name search
    /// when the collection can search server-side.
    #[serde(default)]
    pub filter: Filter,
}

impl ReconcileRequest {
    pub fn new(collection: CollectionSpec, target: EntityRef, action: Action, expected: Expectation) -> Self {
        Self {
            collection,
            target,
            action,
            expected,
            filter: Filter::All,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
}

/// Outcome of one run, handed back to the calling test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub run_id: Uuid,
    pub succeeded: bool,
    /// Polls performed, never below 1
    pub attempts: u32,
    /// Last snapshot observed, if any poll succeeded in reading
    pub final_snapshot: Option<Snapshot>,
    pub last_error: Option<ReconcileError>,
    pub receipt: Option<ActuationReceipt>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl ReconciliationResult {
    /// The tracked entity in the final snapshot, when it is there
    pub fn observed(&self) -> Option<&Entity> {
        let id = self.receipt.as_ref()?.entity_id.as_ref();
        let snapshot = self.final_snapshot.as_ref()?;
        match id {
            Some(id) => locate(snapshot, id),
            None => None,
        }
    }
}

/// Follows the acted-on entity across polls. Creates without a returned id
/// are tracked by name until they first show up, then pinned to their id.
struct Tracker {
    id: Option<EntityId>,
    name: Option<String>,
    seen: bool,
}

impl Tracker {
    fn new(target: &EntityRef, receipt: &ActuationReceipt) -> Self {
        let name = match target {
            EntityRef::Name(name) => Some(name.clone()),
            EntityRef::Id(_) => receipt.before.as_ref().map(|e| e.name.clone()),
        };
        Self {
            id: receipt.entity_id.clone(),
            name,
            seen: receipt.before.is_some(),
        }
    }

    fn observe<'s>(&mut self, snapshot: &'s Snapshot) -> Result<Option<&'s Entity>, ReconcileError> {
        if let Some(id) = &self.id {
            let found = locate(snapshot, id);
            if found.is_some() {
                self.seen = true;
            }
            return Ok(found);
        }

        let Some(name) = &self.name else {
            return Ok(None);
        };
        match resolve_target(snapshot.entities(), &EntityRef::Name(name.clone())) {
            Ok(entity) => {
                debug!(id = %entity.id, "created entity appeared");
                self.id = Some(entity.id.clone());
                self.seen = true;
                Ok(Some(entity))
            }
            Err(ActuationError::TargetNotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Drives one actuation and the polling that confirms it
#[derive(Clone)]
pub struct Reconciler {
    fetcher: Arc<dyn Fetcher>,
    actuator: Arc<dyn Actuator>,
}

impl Reconciler {
    pub fn new(fetcher: Arc<dyn Fetcher>, actuator: Arc<dyn Actuator>) -> Self {
        Self { fetcher, actuator }
    }

    /// Run one reconciliation. Never returns `Err`: every failure is
    /// reported inside the result so callers can print attempts and cause.
    pub async fn reconcile(
        &self,
        request: &ReconcileRequest,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> ReconciliationResult {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "reconcile",
            %run_id,
            collection = %request.collection.name,
            target = %request.target,
            action = %request.action.kind(),
        );

        let started_at = Utc::now();
        let start = Instant::now();
        let outcome = self.run(request, policy, cancel).instrument(span).await;

        ReconciliationResult {
            run_id,
            succeeded: outcome.error.is_none(),
            attempts: outcome.attempts,
            final_snapshot: outcome.snapshot,
            last_error: outcome.error,
            receipt: outcome.receipt,
            started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn run(&self, request: &ReconcileRequest, policy: &RetryPolicy, cancel: &CancellationToken) -> Outcome {
        if cancel.is_cancelled() {
            info!("cancelled before actuation");
            return Outcome::failed(1, None, None, ReconcileError::Cancelled);
        }

        let actuation = tokio::time::timeout(
            policy.actuate_timeout(),
            self.actuator
                .actuate(&request.collection, &request.target, &request.action),
        )
        .await;

        let receipt = match actuation {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                error!("actuation failed: {}", e);
                return Outcome::failed(1, None, None, e.into());
            }
            Err(_) => {
                let reason = format!("actuation timed out after {} ms", policy.actuate_timeout_ms);
                error!("{}", reason);
                return Outcome::failed(1, None, None, ReconcileError::Transport { reason });
            }
        };

        let filter = self.poll_filter(request, &receipt);
        let mut tracker = Tracker::new(&request.target, &receipt);
        let mut last_snapshot: Option<Snapshot> = None;
        let mut last_fetch_error: Option<String> = None;
        let max_attempts = policy.max_attempts.max(1);

        for index in 0..max_attempts {
            let attempt = index + 1;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(attempt, "cancelled during backoff");
                    return Outcome::failed(index.max(1), last_snapshot, Some(receipt), ReconcileError::Cancelled);
                }
                _ = tokio::time::sleep(policy.backoff.delay(index)) => {}
            }

            let fetched = tokio::time::timeout(
                policy.fetch_timeout(),
                self.fetcher.fetch(&request.collection, &filter),
            )
            .await;

            let snapshot = match fetched {
                Ok(Ok(snapshot)) => snapshot,
                Ok(Err(e @ FetchError::SchemaMismatch { .. })) => {
                    error!(attempt, "{}", e);
                    return Outcome::failed(attempt, last_snapshot, Some(receipt), e.into());
                }
                Ok(Err(e)) => {
                    warn!(attempt, "poll failed: {}", e);
                    last_fetch_error = Some(e.to_string());
                    continue;
                }
                Err(_) => {
                    let reason = format!("fetch timed out after {} ms", policy.fetch_timeout_ms);
                    warn!(attempt, "poll failed: {}", reason);
                    last_fetch_error = Some(reason);
                    continue;
                }
            };
            last_fetch_error = None;

            let observed = match tracker.observe(&snapshot) {
                Ok(observed) => observed.cloned(),
                Err(e) => {
                    error!(attempt, "{}", e);
                    return Outcome::failed(attempt, Some(snapshot), Some(receipt), e);
                }
            };

            if request
                .expected
                .evaluate(observed.as_ref(), receipt.before.as_ref())
            {
                info!(attempt, "expected state observed");
                return Outcome {
                    attempts: attempt,
                    snapshot: Some(snapshot),
                    receipt: Some(receipt),
                    error: None,
                };
            }

            if observed.is_none() && tracker.seen && !request.expected.expects_absence() {
                let id = tracker
                    .id
                    .clone()
                    .unwrap_or_else(|| EntityId::new(request.target.to_string()));
                error!(attempt, %id, "target vanished");
                return Outcome::failed(attempt, Some(snapshot), Some(receipt), ReconcileError::TargetVanished { id });
            }

            debug!(attempt, present = observed.is_some(), "expected state not observed yet");
            last_snapshot = Some(snapshot);
        }

        warn!(attempts = max_attempts, "retry budget exhausted");
        Outcome::failed(
            max_attempts,
            last_snapshot,
            Some(receipt),
            ReconcileError::RetryBudgetExhausted {
                attempts: max_attempts,
                last_fetch_error,
            },
        )
    }

    /// An explicit filter wins. On a paged listing a known id is polled by
    /// id, which survives renames and pages; a create without an id yet is
    /// polled by its name where the listing can search.
    fn poll_filter(&self, request: &ReconcileRequest, receipt: &ActuationReceipt) -> Filter {
        if request.filter != Filter::All || !request.collection.is_paged() {
            return request.filter.clone();
        }
        if let Some(id) = &receipt.entity_id {
            return Filter::Id(id.clone());
        }
        match &request.target {
            EntityRef::Name(name) if request.collection.search_param.is_some() => Filter::search(name),
            _ => Filter::All,
        }
    }
}

struct Outcome {
    attempts: u32,
    snapshot: Option<Snapshot>,
    receipt: Option<ActuationReceipt>,
    error: Option<ReconcileError>,
}

impl Outcome {
    fn failed(
        attempts: u32,
        snapshot: Option<Snapshot>,
        receipt: Option<ActuationReceipt>,
        error: ReconcileError,
    ) -> Self {
        Self {
            attempts,
            snapshot,
            receipt,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftcheck_common::ActionKind;

    #[test]
    fn test_error_kind_matches_serde_tag() {
        let errors = vec![
            ReconcileError::Cancelled,
            ReconcileError::TargetVanished { id: "42".into() },
            ReconcileError::RetryBudgetExhausted {
                attempts: 3,
                last_fetch_error: None,
            },
            ReconcileError::Transport {
                reason: "reset".to_string(),
            },
        ];
        for e in errors {
            let json = serde_json::to_value(&e).unwrap();
            assert_eq!(json["kind"], e.kind());
        }
    }

    #[test]
    fn test_actuation_errors_convert() {
        let e: ReconcileError = ActuationError::AmbiguousTarget {
            target: "name:Factor_X".to_string(),
            candidates: vec!["7".into(), "9".into()],
        }
        .into();
        assert_eq!(e.kind(), "ambiguous_target");

        let e: ReconcileError = ActuationError::Transport("timeout".to_string()).into();
        assert_eq!(
            e,
            ReconcileError::Transport {
                reason: "timeout".to_string()
            }
        );
    }

    #[test]
    fn test_tracker_pins_created_entity_by_name() {
        let receipt = ActuationReceipt::new(ActionKind::Create, EntityRef::Name("New".into()), None);
        let mut tracker = Tracker::new(&receipt.target, &receipt);
        assert!(!tracker.seen);

        let empty = Snapshot::capture("factors", vec![], None);
        assert_eq!(tracker.observe(&empty).unwrap(), None);

        let listed = Snapshot::capture("factors", vec![Entity::new("5", "New", false)], None);
        assert_eq!(tracker.observe(&listed).unwrap().map(|e| e.id.clone()), Some("5".into()));
        assert_eq!(tracker.id, Some("5".into()));
        assert!(tracker.seen);
    }

    #[test]
    fn test_tracker_rejects_ambiguous_name() {
        let receipt = ActuationReceipt::new(ActionKind::Create, EntityRef::Name("Dup".into()), None);
        let mut tracker = Tracker::new(&receipt.target, &receipt);
        let snapshot = Snapshot::capture(
            "factors",
            vec![Entity::new("1", "Dup", true), Entity::new("2", "Dup", true)],
            None,
        );
        assert!(matches!(
            tracker.observe(&snapshot),
            Err(ReconcileError::AmbiguousTarget { .. })
        ));
    }

    #[test]
    fn test_result_round_trips_through_json() {
        let result = ReconciliationResult {
            run_id: Uuid::new_v4(),
            succeeded: false,
            attempts: 3,
            final_snapshot: None,
            last_error: Some(ReconcileError::RetryBudgetExhausted {
                attempts: 3,
                last_fetch_error: Some("HTTP 503 from /getFactorsList".to_string()),
            }),
            receipt: None,
            started_at: Utc::now(),
            elapsed_ms: 12,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"kind\":\"retry_budget_exhausted\""));
        let back: ReconciliationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
