//! Input schemas still free for a new factor

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::rest::RestClient;

/// One entry of the schema catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    pub input_schema_id: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InputSchema {
    pub fn new(input_schema_id: i64) -> Self {
        Self {
            input_schema_id,
            extra: Map::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        ["input_schema_name", "schema_name", "name"]
            .iter()
            .find_map(|key| self.extra.get(*key).and_then(Value::as_str))
    }
}

/// A schema already bound to a factor. `primary_mapping` holds the schema id
/// as a string or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedSchema {
    #[serde(default)]
    pub primary_mapping: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SelectedSchema {
    pub fn new(primary_mapping: Value) -> Self {
        Self {
            primary_mapping,
            extra: Map::new(),
        }
    }

    /// Schema id this mapping points at, read like an integer prefix:
    /// `" 12"`, `"12abc"` and `12.9` all mean 12; `"abc"` means nothing.
    pub fn schema_id(&self) -> Option<i64> {
        match &self.primary_mapping {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
            Value::String(s) => integer_prefix(s),
            _ => None,
        }
    }
}

fn integer_prefix(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

/// Schemas from `all` that no entry of `used` maps to, in catalogue order
pub fn available_schemas(all: &[InputSchema], used: &[SelectedSchema]) -> Vec<InputSchema> {
    let taken: Vec<i64> = used.iter().filter_map(SelectedSchema::schema_id).collect();
    all.iter()
        .filter(|schema| !taken.contains(&schema.input_schema_id))
        .cloned()
        .collect()
}

/// Where the catalogue and the used mappings are served
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaEndpoints {
    pub all_path: String,
    pub all_field: String,
    pub selected_path: String,
    pub selected_field: String,
}

impl Default for SchemaEndpoints {
    fn default() -> Self {
        Self {
            all_path: "/getAllSchemas".to_string(),
            all_field: "schemas".to_string(),
            selected_path: "/getSelectedInputSchema".to_string(),
            selected_field: "selectedInputSchema".to_string(),
        }
    }
}

/// Both schema lists as read at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    pub all: Vec<InputSchema>,
    pub used: Vec<SelectedSchema>,
}

impl SchemaCatalog {
    pub async fn load(client: &RestClient, endpoints: &SchemaEndpoints) -> HarnessResult<Self> {
        let all_body = read_json(client, &endpoints.all_path).await?;
        let used_body = read_json(client, &endpoints.selected_path).await?;

        let catalog = Self {
            all: list_field(&all_body, &endpoints.all_field)?,
            used: list_field(&used_body, &endpoints.selected_field)?,
        };
        debug!(
            all = catalog.all.len(),
            used = catalog.used.len(),
            "schema catalog loaded"
        );
        Ok(catalog)
    }

    pub fn available(&self) -> Vec<InputSchema> {
        available_schemas(&self.all, &self.used)
    }
}

async fn read_json(client: &RestClient, path: &str) -> HarnessResult<Value> {
    let response = client.get(path, &[]).await?;
    if !response.is_success() {
        return Err(HarnessError::BackendStatus {
            url: client.url(path),
            status: response.status,
        });
    }
    Ok(response.json()?)
}

/// A missing or null list reads as empty
fn list_field<T: serde::de::DeserializeOwned>(body: &Value, field: &str) -> HarnessResult<Vec<T>> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(list) => Ok(serde_json::from_value(list.clone())?),
    }
}
