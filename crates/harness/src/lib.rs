//! driftcheck reconciliation harness
//!
//! Confirms that an action issued against a web admin backend was actually
//! applied, without fixed sleeps:
//! - Fetchers read a collection into an immutable `Snapshot`
//! - Actuators issue exactly one mutation, through the REST API or the UI
//! - The `Reconciler` actuates once, then polls with backoff until the
//!   expectation holds or the retry budget runs out
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        PlanRunner                           │
//! │    ├── ReconcilePlan (YAML) ─► ReconcileRequest             │
//! │    └── SuiteReport ─► reconcile-results.json                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Reconciler                                                 │
//! │    ├── Actuator::actuate   (RestActuator | UiActuator)      │
//! │    │                                  └── BrowserDriver     │
//! │    ├── Backoff::delay      (cancellable)                    │
//! │    └── Fetcher::fetch      (RestFetcher)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RestClient (reqwest)        PlaywrightDriver (node)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod actuate;
pub mod config;
pub mod error;
pub mod fetch;
pub mod plan;
pub mod playwright;
pub mod policy;
pub mod reconciler;
pub mod rest;
pub mod runner;
pub mod schema;
pub mod ui;

pub use actuate::{ActionRoutes, Actuator, RestActuator, Route};
pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult};
pub use fetch::{Fetcher, RestFetcher};
pub use plan::{DriverKind, ReconcilePlan};
pub use playwright::{BrowserDriver, DriverError, PlaywrightConfig, PlaywrightDriver, UiStep};
pub use policy::{Backoff, RetryPolicy};
pub use reconciler::{ReconcileError, ReconcileRequest, Reconciler, ReconciliationResult};
pub use rest::{HttpMethod, RestClient, RestResponse};
pub use runner::{CaseReport, PlanRunner, SuiteReport};
pub use schema::{available_schemas, InputSchema, SchemaCatalog, SchemaEndpoints, SelectedSchema};
pub use ui::{UiActuator, UiRoutes};
