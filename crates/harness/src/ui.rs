//! UI-driven actuator: clicks and form submits through a browser driver

use async_trait::async_trait;
use driftcheck_common::{
    Action, ActionKind, ActuationError, ActuationReceipt, CollectionSpec, Entity, EntityRef,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::actuate::{ensure_name_free, namesakes, resolve_existing, Actuator};
use crate::playwright::{BrowserDriver, DriverError, UiStep, WaitState};
use crate::rest::RestClient;

/// Selectors for one collection's pages. `{name}` in `row_selector` is
/// replaced with the entity's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiRoutes {
    /// Listing page, relative to the frontend URL
    pub page: String,
    pub row_selector: String,
    pub toggle_selector: String,
    pub delete_menu_selector: Option<String>,
    pub delete_confirm_selector: Option<String>,
    pub upload_input_selector: Option<String>,
    pub edit_selector: Option<String>,
    /// Page holding the create form
    pub create_page: Option<String>,
    pub submit_selector: Option<String>,
    pub step_timeout_ms: u64,
    /// Payload key -> input selector
    pub form_fields: BTreeMap<String, String>,
    /// Action name -> text shown once the backend accepted the action
    pub success_text: BTreeMap<String, String>,
}

impl Default for UiRoutes {
    fn default() -> Self {
        Self {
            page: "/".to_string(),
            row_selector: r#"section:has-text("| {name}")"#.to_string(),
            toggle_selector: "img#enabled, img#disabled".to_string(),
            delete_menu_selector: None,
            delete_confirm_selector: None,
            upload_input_selector: None,
            edit_selector: None,
            create_page: None,
            form_fields: BTreeMap::new(),
            submit_selector: None,
            success_text: BTreeMap::new(),
            step_timeout_ms: 5000,
        }
    }
}

impl UiRoutes {
    /// Factor listing and add pages
    pub fn factors() -> Self {
        Self {
            page: "/listoffactors".to_string(),
            create_page: Some("/addfactors".to_string()),
            submit_selector: Some(r#"button[type="submit"]"#.to_string()),
            ..Self::default()
        }
    }

    /// Service listing with its per-row menu and delete modal
    pub fn services() -> Self {
        Self {
            page: "/listofservices".to_string(),
            row_selector: r#"section:has-text("{name}")"#.to_string(),
            delete_menu_selector: Some(".service_dots".to_string()),
            delete_confirm_selector: Some("#serviceDeleteButton".to_string()),
            success_text: BTreeMap::from([(
                "delete".to_string(),
                "Service deleted successfully!".to_string(),
            )]),
            ..Self::default()
        }
    }

    pub fn row(&self, name: &str) -> String {
        self.row_selector.replace("{name}", &css_text(name))
    }

    fn within_row(&self, name: &str, selector: &str) -> String {
        format!("{} >> {}", self.row(name), selector)
    }

    fn required<'a>(&self, value: &'a Option<String>, what: &str) -> Result<&'a str, ActuationError> {
        value.as_deref().ok_or_else(|| ActuationError::ActionRejected {
            status: None,
            reason: format!("no {} selector configured", what),
        })
    }

    /// Translate one action into browser steps. Returns the steps and whether
    /// the last step waits for the backend's success message.
    pub fn steps_for(
        &self,
        action: &Action,
        entity: Option<&Entity>,
        create_name: Option<&str>,
    ) -> Result<(Vec<UiStep>, bool), ActuationError> {
        let timeout_ms = self.step_timeout_ms;
        let mut steps = Vec::new();
        let name = entity.map(|e| e.name.as_str()).unwrap_or_default();

        match action {
            Action::Toggle => {
                steps.push(UiStep::Navigate { url: self.page.clone() });
                steps.push(UiStep::WaitFor {
                    selector: self.row(name),
                    state: WaitState::Visible,
                    timeout_ms,
                });
                steps.push(UiStep::Click {
                    selector: self.within_row(name, &self.toggle_selector),
                });
            }
            Action::Delete => {
                let menu = self.required(&self.delete_menu_selector, "delete menu")?;
                let confirm = self.required(&self.delete_confirm_selector, "delete confirm")?;
                steps.push(UiStep::Navigate { url: self.page.clone() });
                steps.push(UiStep::Click {
                    selector: self.within_row(name, menu),
                });
                steps.push(UiStep::Click {
                    selector: confirm.to_string(),
                });
            }
            Action::Upload { file } => {
                let input = self.required(&self.upload_input_selector, "upload input")?;
                steps.push(UiStep::Navigate { url: self.page.clone() });
                steps.push(UiStep::SetInputFiles {
                    selector: self.within_row(name, input),
                    path: file.clone(),
                });
            }
            Action::Create { payload } => {
                let page = self.required(&self.create_page, "create page")?;
                steps.push(UiStep::Navigate { url: page.to_string() });
                steps.extend(self.fill_form(payload, create_name));
                steps.push(UiStep::Click {
                    selector: self.required(&self.submit_selector, "submit")?.to_string(),
                });
            }
            Action::Edit { payload } => {
                let edit = self.required(&self.edit_selector, "edit")?;
                steps.push(UiStep::Navigate { url: self.page.clone() });
                steps.push(UiStep::Click {
                    selector: self.within_row(name, edit),
                });
                steps.extend(self.fill_form(payload, None));
                steps.push(UiStep::Click {
                    selector: self.required(&self.submit_selector, "submit")?.to_string(),
                });
            }
        }

        let waits_for_success = match self.success_text.get(&action.kind().to_string()) {
            Some(text) => {
                steps.push(UiStep::WaitForText {
                    text: text.clone(),
                    timeout_ms,
                });
                true
            }
            None => false,
        };

        Ok((steps, waits_for_success))
    }

    /// Fill mapped form fields from the payload. `name` is used for the
    /// mapped `name` field when the payload does not carry one.
    fn fill_form(&self, payload: &Value, name: Option<&str>) -> Vec<UiStep> {
        self.form_fields
            .iter()
            .filter_map(|(key, selector)| {
                let value = match payload.get(key) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None if key == "name" => name?.to_string(),
                    Some(Value::Null) | None => return None,
                    Some(other) => other.to_string(),
                };
                Some(UiStep::Fill {
                    selector: selector.clone(),
                    value,
                })
            })
            .collect()
    }
}

/// Escape a display name for use inside a quoted `:has-text("...")`
fn css_text(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Actuator that drives the admin UI through a [`BrowserDriver`].
///
/// Rows are located by their visible name, so the target is first resolved
/// against the backend listing and a name shared by several ids is refused.
pub struct UiActuator {
    driver: Arc<dyn BrowserDriver>,
    lookup: RestClient,
    routes: BTreeMap<String, UiRoutes>,
}

impl UiActuator {
    pub fn new(driver: Arc<dyn BrowserDriver>, lookup: RestClient, routes: BTreeMap<String, UiRoutes>) -> Self {
        Self { driver, lookup, routes }
    }

    fn routes(&self, collection: &CollectionSpec) -> Result<&UiRoutes, ActuationError> {
        self.routes
            .get(&collection.name)
            .ok_or_else(|| ActuationError::ActionRejected {
                status: None,
                reason: format!("no UI routes configured for {}", collection.name),
            })
    }
}

/// A failure on the final success-message wait means the UI refused the
/// action; anything earlier is a driver problem.
fn classify(err: DriverError, success_step: Option<usize>) -> ActuationError {
    match err {
        DriverError::StepFailed { index, message } if Some(index) == success_step => {
            ActuationError::ActionRejected {
                status: None,
                reason: format!("success message not shown: {}", message),
            }
        }
        other => ActuationError::Transport(other.to_string()),
    }
}

#[async_trait]
impl Actuator for UiActuator {
    async fn actuate(
        &self,
        collection: &CollectionSpec,
        target: &EntityRef,
        action: &Action,
    ) -> Result<ActuationReceipt, ActuationError> {
        let routes = self.routes(collection)?;
        let kind = action.kind();

        let before = if kind == ActionKind::Create {
            ensure_name_free(&self.lookup, collection, target).await?;
            None
        } else {
            let entity = resolve_existing(&self.lookup, collection, target).await?;
            let shared = namesakes(&self.lookup, collection, &entity.name).await?;
            if shared.len() > 1 {
                return Err(ActuationError::AmbiguousTarget {
                    target: format!("row '{}'", entity.name),
                    candidates: shared,
                });
            }
            Some(entity)
        };

        let create_name = match target {
            EntityRef::Name(name) => Some(name.as_str()),
            EntityRef::Id(_) => None,
        };
        let (steps, waits_for_success) = routes.steps_for(action, before.as_ref(), create_name)?;
        let success_step = waits_for_success.then(|| steps.len() - 1);

        self.driver
            .run(&steps)
            .await
            .map_err(|e| classify(e, success_step))?;

        info!(collection = %collection.name, %target, action = %kind, "UI action issued");
        Ok(ActuationReceipt::new(kind, target.clone(), before))
    }
}
