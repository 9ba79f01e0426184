//! Backend collection descriptors and payload normalization

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::FetchError;
use crate::types::{Entity, EntityId, Snapshot};

/// How to read one backend collection and turn its payload into entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    /// Short name used in plans and logs (`factors`, `services`). May be
    /// left out where the surrounding table key names the collection.
    #[serde(default)]
    pub name: String,

    /// Endpoint path relative to the backend URL
    pub path: String,

    /// Query parameter carrying a search term, if the endpoint supports one
    #[serde(default)]
    pub search_param: Option<String>,

    /// Dotted path to the array of items in the response body
    pub items_field: String,

    /// Dotted path to the entity object inside each item, for listings that
    /// wrap entities (`{"service": {...}}`)
    #[serde(default)]
    pub entity_field: Option<String>,

    pub id_field: String,
    pub name_field: String,

    #[serde(default = "default_enabled_field")]
    pub enabled_field: String,

    /// Dotted path to a total count, if the payload reports one
    #[serde(default)]
    pub total_field: Option<String>,

    /// Query parameter selecting the page, for listings that paginate
    #[serde(default)]
    pub page_param: Option<String>,

    /// Query parameter holding the page size
    #[serde(default)]
    pub limit_param: Option<String>,

    /// Fixed query parameters sent with every read
    #[serde(default)]
    pub query: BTreeMap<String, String>,
}

fn default_enabled_field() -> String {
    "enabled".to_string()
}

impl CollectionSpec {
    /// Factor listing (`GET /getFactorsList?search=&page=1&limit=10`)
    pub fn factors() -> Self {
        Self {
            name: "factors".to_string(),
            path: "/getFactorsList".to_string(),
            query: paging(),
            search_param: Some("search".to_string()),
            items_field: "factorList".to_string(),
            entity_field: None,
            id_field: "factor_type_id".to_string(),
            name_field: "factor_name".to_string(),
            enabled_field: default_enabled_field(),
            total_field: None,
            page_param: Some("page".to_string()),
            limit_param: Some("limit".to_string()),
        }
    }

    /// Factor search endpoint; same payload shape as the listing
    pub fn factor_search() -> Self {
        Self {
            name: "factor_search".to_string(),
            path: "/factorSearch".to_string(),
            ..Self::factors()
        }
    }

    /// Service listing (`GET /listservices?searchterm&page=1&limit=10`),
    /// whose items look like `{"service": {"service_id": .., "service_name": ..}}`
    pub fn services() -> Self {
        Self {
            name: "services".to_string(),
            path: "/listservices".to_string(),
            query: paging(),
            search_param: Some("searchterm".to_string()),
            items_field: "data".to_string(),
            entity_field: Some("service".to_string()),
            id_field: "service_id".to_string(),
            name_field: "service_name".to_string(),
            enabled_field: default_enabled_field(),
            total_field: None,
            page_param: Some("page".to_string()),
            limit_param: Some("limit".to_string()),
        }
    }

    /// Built-in descriptors, keyed by name
    pub fn presets() -> Vec<Self> {
        vec![Self::factors(), Self::factor_search(), Self::services()]
    }

    pub fn preset(name: &str) -> Option<Self> {
        Self::presets().into_iter().find(|c| c.name == name)
    }

    /// Whether one read can miss entities because of pagination
    pub fn is_paged(&self) -> bool {
        self.page_param.is_some()
    }

    /// Page size sent with every read, when the listing is paged
    pub fn page_size(&self) -> Option<usize> {
        self.limit_param
            .as_ref()
            .and_then(|param| self.query.get(param))
            .and_then(|limit| limit.parse().ok())
            .filter(|&limit| limit > 0)
    }

    /// Validate a response body and normalize it into a snapshot.
    ///
    /// Any structural problem fails the whole payload; a partially parsed
    /// listing is never returned.
    pub fn parse_snapshot(&self, body: &Value) -> Result<Snapshot, FetchError> {
        if !body.is_object() {
            return Err(FetchError::schema(&self.name, "response body is not a JSON object"));
        }

        let items = lookup(body, &self.items_field)
            .ok_or_else(|| {
                FetchError::schema(&self.name, format!("missing field `{}`", self.items_field))
            })?
            .as_array()
            .ok_or_else(|| {
                FetchError::schema(&self.name, format!("field `{}` is not an array", self.items_field))
            })?;

        let entities = items
            .iter()
            .enumerate()
            .map(|(index, item)| self.parse_entity(index, item))
            .collect::<Result<Vec<_>, _>>()?;

        let reported_total = self
            .total_field
            .as_deref()
            .and_then(|path| lookup(body, path))
            .and_then(Value::as_u64);

        Ok(Snapshot::capture(self.name.clone(), entities, reported_total))
    }

    fn parse_entity(&self, index: usize, item: &Value) -> Result<Entity, FetchError> {
        let object = match &self.entity_field {
            Some(path) => lookup(item, path).ok_or_else(|| {
                FetchError::schema(&self.name, format!("item {} has no `{}`", index, path))
            })?,
            None => item,
        };

        let fields = object
            .as_object()
            .ok_or_else(|| FetchError::schema(&self.name, format!("item {} is not an object", index)))?;

        let id = lookup(object, &self.id_field)
            .and_then(EntityId::from_json)
            .ok_or_else(|| {
                FetchError::schema(
                    &self.name,
                    format!("item {} has no scalar `{}`", index, self.id_field),
                )
            })?;

        let name = match lookup(object, &self.name_field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        let enabled = match lookup(object, &self.enabled_field) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) if n.as_u64() == Some(0) => false,
            Some(Value::Number(n)) if n.as_u64() == Some(1) => true,
            Some(other) => {
                return Err(FetchError::schema(
                    &self.name,
                    format!("item {} has non-boolean `{}`: {}", index, self.enabled_field, other),
                ))
            }
        };

        Ok(Entity {
            id,
            name,
            enabled,
            fields: fields.clone(),
        })
    }
}

fn paging() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("page".to_string(), "1".to_string()),
        ("limit".to_string(), "10".to_string()),
    ])
}

/// Follow a dotted path through nested JSON objects
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}
