//! Actuator: exactly one state-changing action per call

use async_trait::async_trait;
use driftcheck_common::{
    collection::lookup, resolve_target, Action, ActionKind, ActuationError, ActuationReceipt,
    CollectionSpec, Entity, EntityId, EntityRef, FetchError, Filter,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::fetch::read_every_page;
use crate::rest::{HttpMethod, RestClient, RestResponse};

/// Issues one mutation and returns without waiting for it to settle.
///
/// Implementations never retry internally: a second attempt could submit the
/// same form twice.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn actuate(
        &self,
        collection: &CollectionSpec,
        target: &EntityRef,
        action: &Action,
    ) -> Result<ActuationReceipt, ActuationError>;
}

/// Endpoint for one action; `{id}` in the path is replaced with the target id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub method: HttpMethod,
    pub path: String,
}

impl Route {
    pub fn new(method: HttpMethod, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
        }
    }

    pub fn path_for(&self, id: Option<&EntityId>) -> String {
        match id {
            Some(id) => self.path.replace("{id}", id.as_str()),
            None => self.path.clone(),
        }
    }
}

/// API routes for the actions of one collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionRoutes {
    /// Multipart field carrying the uploaded file
    pub upload_field: Option<String>,

    /// Dotted path of the new id in a create response
    pub created_id_field: Option<String>,

    pub toggle: Option<Route>,
    pub upload: Option<Route>,
    pub create: Option<Route>,
    pub edit: Option<Route>,
    pub delete: Option<Route>,
}

impl ActionRoutes {
    pub fn route(&self, kind: ActionKind) -> Option<&Route> {
        match kind {
            ActionKind::Toggle => self.toggle.as_ref(),
            ActionKind::Upload => self.upload.as_ref(),
            ActionKind::Create => self.create.as_ref(),
            ActionKind::Edit => self.edit.as_ref(),
            ActionKind::Delete => self.delete.as_ref(),
        }
    }
}

/// Read the collection and resolve the target for a non-create action.
///
/// Name targets are narrowed with a server-side search first; id targets
/// walk the pages of a paged listing until the id turns up.
pub(crate) async fn resolve_existing(
    client: &RestClient,
    collection: &CollectionSpec,
    target: &EntityRef,
) -> Result<Entity, ActuationError> {
    let filter = match target {
        EntityRef::Name(name) if collection.search_param.is_some() => Filter::search(name),
        EntityRef::Name(_) => Filter::All,
        EntityRef::Id(id) => Filter::Id(id.clone()),
    };
    let snapshot = read_every_page(client, collection, &filter)
        .await
        .map_err(lookup_failure)?;
    Ok(resolve_target(snapshot.entities(), target)?.clone())
}

/// Ids of every entity displayed under exactly `name`, across all pages
pub(crate) async fn namesakes(
    client: &RestClient,
    collection: &CollectionSpec,
    name: &str,
) -> Result<Vec<EntityId>, ActuationError> {
    let filter = match collection.search_param {
        Some(_) => Filter::search(name),
        None => Filter::All,
    };
    let snapshot = read_every_page(client, collection, &filter)
        .await
        .map_err(lookup_failure)?;
    Ok(snapshot
        .entities()
        .iter()
        .filter(|e| e.name == name)
        .map(|e| e.id.clone())
        .collect())
}

/// Reject creates whose name already exists: the backend forbids duplicate
/// names and answering that locally keeps the mutation from being issued.
pub(crate) async fn ensure_name_free(
    client: &RestClient,
    collection: &CollectionSpec,
    target: &EntityRef,
) -> Result<(), ActuationError> {
    let name = match target {
        EntityRef::Name(name) => name,
        EntityRef::Id(_) => {
            return Err(ActuationError::ActionRejected {
                status: None,
                reason: "create needs a name target".to_string(),
            })
        }
    };

    if !namesakes(client, collection, name).await?.is_empty() {
        return Err(ActuationError::ActionRejected {
            status: None,
            reason: format!("{} named '{}' already exists", collection.name, name),
        });
    }
    Ok(())
}

fn lookup_failure(e: FetchError) -> ActuationError {
    ActuationError::Transport(format!("target lookup failed: {}", e))
}

/// Message from a backend error body (`message`, `error` or `msg`), falling
/// back to the raw text
fn backend_message(response: &RestResponse) -> String {
    let body = response.json_or_null();
    ["message", "error", "msg"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| response.text.chars().take(200).collect())
}

/// Map a backend response to accept/reject. A 2xx whose body says
/// `status: "error"` or `success: false` is still a rejection.
pub(crate) fn judge(response: &RestResponse) -> Result<(), ActuationError> {
    let body = response.json_or_null();
    let body_rejects = body.get("status").and_then(Value::as_str) == Some("error")
        || body.get("success").and_then(Value::as_bool) == Some(false);

    if response.is_success() && !body_rejects {
        Ok(())
    } else {
        Err(ActuationError::ActionRejected {
            status: Some(response.status),
            reason: backend_message(response),
        })
    }
}

/// Actuator that calls the backend API directly
#[derive(Clone)]
pub struct RestActuator {
    client: RestClient,
    routes: BTreeMap<String, ActionRoutes>,
}

impl RestActuator {
    pub fn new(client: RestClient, routes: BTreeMap<String, ActionRoutes>) -> Self {
        Self { client, routes }
    }

    fn route(&self, collection: &CollectionSpec, kind: ActionKind) -> Result<(&ActionRoutes, &Route), ActuationError> {
        let routes = self.routes.get(&collection.name);
        routes
            .and_then(|r| r.route(kind).map(|route| (r, route)))
            .ok_or_else(|| ActuationError::ActionRejected {
                status: None,
                reason: format!("no API route configured for {} on {}", kind, collection.name),
            })
    }

    async fn send(
        &self,
        routes: &ActionRoutes,
        route: &Route,
        id: Option<&EntityId>,
        action: &Action,
        before: Option<&Entity>,
        collection: &CollectionSpec,
    ) -> Result<RestResponse, ActuationError> {
        let path = route.path_for(id);
        let result = match action {
            Action::Toggle => {
                let enabled = before.map_or(true, |e| !e.enabled);
                let mut body = Map::new();
                body.insert(collection.enabled_field.clone(), Value::Bool(enabled));
                self.client
                    .send_json(route.method, &path, Some(&Value::Object(body)))
                    .await
            }
            Action::Upload { file } => {
                let field = routes.upload_field.as_deref().unwrap_or("file");
                self.client.post_multipart(route.method, &path, field, file).await
            }
            Action::Create { payload } | Action::Edit { payload } => {
                self.client.send_json(route.method, &path, Some(payload)).await
            }
            Action::Delete => self.client.send_json(route.method, &path, None).await,
        };
        result.map_err(|e| ActuationError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Actuator for RestActuator {
    async fn actuate(
        &self,
        collection: &CollectionSpec,
        target: &EntityRef,
        action: &Action,
    ) -> Result<ActuationReceipt, ActuationError> {
        let kind = action.kind();
        let (routes, route) = self.route(collection, kind)?;

        if kind == ActionKind::Create {
            ensure_name_free(&self.client, collection, target).await?;
            let response = self.send(routes, route, None, action, None, collection).await?;
            judge(&response)?;

            let mut receipt = ActuationReceipt::new(kind, target.clone(), None).with_status(response.status);
            if let Some(id) = routes
                .created_id_field
                .as_deref()
                .and_then(|path| lookup(&response.json_or_null(), path).and_then(EntityId::from_json))
            {
                receipt = receipt.with_entity_id(id);
            }
            info!(collection = %collection.name, %target, "create issued");
            return Ok(receipt);
        }

        let before = resolve_existing(&self.client, collection, target).await?;
        debug!(collection = %collection.name, id = %before.id, "target resolved");

        let response = self
            .send(routes, route, Some(&before.id), action, Some(&before), collection)
            .await?;
        judge(&response)?;

        info!(collection = %collection.name, id = %before.id, action = %kind, "action issued");
        Ok(ActuationReceipt::new(kind, target.clone(), Some(before)).with_status(response.status))
    }
}
