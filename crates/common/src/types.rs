//! Core types for driftcheck

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Opaque entity identifier.
///
/// Backends hand out numeric or string ids; both normalize to the same
/// textual form so `42` and `"42"` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Normalize a JSON scalar into an id. Objects, arrays, booleans, null
    /// and empty strings are not ids.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for EntityId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Str(s) => EntityId(s),
            Raw::Unsigned(n) => EntityId(n.to_string()),
            Raw::Signed(n) => EntityId(n.to_string()),
        })
    }
}

/// A named resource under test (a factor, a service, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub enabled: bool,
    /// Raw backend object, kept for field-level expectations
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Entity {
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>, enabled: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Look up a dotted path (`service.status`) in the raw fields
    pub fn field(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.fields.get(first)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }
}

/// Entities returned by one fetch, in backend order.
///
/// Fields are private and there are no mutating accessors: a snapshot is
/// frozen at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    collection: String,
    entities: Vec<Entity>,
    captured_at: DateTime<Utc>,
    #[serde(default)]
    reported_total: Option<u64>,
}

impl Snapshot {
    pub fn capture(
        collection: impl Into<String>,
        entities: Vec<Entity>,
        reported_total: Option<u64>,
    ) -> Self {
        Self {
            collection: collection.into(),
            entities,
            captured_at: Utc::now(),
            reported_total,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Total count the backend claimed, when the payload carried one
    pub fn reported_total(&self) -> Option<u64> {
        self.reported_total
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Derive a narrowed snapshot. The capture time is preserved since no new
    /// read happened.
    pub fn retain(&self, keep: impl Fn(&Entity) -> bool) -> Self {
        Self {
            collection: self.collection.clone(),
            entities: self.entities.iter().filter(|e| keep(e)).cloned().collect(),
            captured_at: self.captured_at,
            reported_total: self.reported_total,
        }
    }
}

/// Optional narrowing applied to a fetch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    #[default]
    All,
    Search(String),
    Id(EntityId),
}

impl Filter {
    /// A blank search term means "no filter"
    pub fn search(term: &str) -> Self {
        let term = term.trim();
        if term.is_empty() {
            Filter::All
        } else {
            Filter::Search(term.to_string())
        }
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Filter::All => true,
            Filter::Search(term) => entity.name.to_lowercase().contains(&term.to_lowercase()),
            Filter::Id(id) => &entity.id == id,
        }
    }
}

/// How a caller names the entity to act on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRef {
    Id(EntityId),
    Name(String),
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityRef::Id(id) => write!(f, "id:{}", id),
            EntityRef::Name(name) => write!(f, "name:{}", name),
        }
    }
}

/// A single state-changing operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Toggle,
    Upload { file: PathBuf },
    Create { payload: Value },
    Edit { payload: Value },
    Delete,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Toggle => ActionKind::Toggle,
            Action::Upload { .. } => ActionKind::Upload,
            Action::Create { .. } => ActionKind::Create,
            Action::Edit { .. } => ActionKind::Edit,
            Action::Delete => ActionKind::Delete,
        }
    }
}

/// Payload-free discriminant of [`Action`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Toggle,
    Upload,
    Create,
    Edit,
    Delete,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Toggle => write!(f, "toggle"),
            ActionKind::Upload => write!(f, "upload"),
            ActionKind::Create => write!(f, "create"),
            ActionKind::Edit => write!(f, "edit"),
            ActionKind::Delete => write!(f, "delete"),
        }
    }
}

/// Predicate a reconciliation run must observe on its entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expectation {
    Enabled { value: bool },
    /// `enabled` is the negation of its value before the action
    Toggled,
    FieldEquals { field: String, value: Value },
    FieldPresent { field: String },
    Present,
    Absent,
    All { of: Vec<Expectation> },
}

impl Expectation {
    /// Evaluate against the entity observed in a snapshot (`None` when it is
    /// missing) and the entity as it was before the action, if known.
    pub fn evaluate(&self, observed: Option<&Entity>, before: Option<&Entity>) -> bool {
        match self {
            Expectation::Absent => observed.is_none(),
            Expectation::Present => observed.is_some(),
            Expectation::Enabled { value } => observed.map_or(false, |e| e.enabled == *value),
            Expectation::Toggled => match (observed, before) {
                (Some(now), Some(then)) => now.enabled != then.enabled,
                _ => false,
            },
            Expectation::FieldEquals { field, value } => {
                observed.and_then(|e| e.field(field)) == Some(value)
            }
            Expectation::FieldPresent { field } => {
                observed.map_or(false, |e| e.field(field).is_some())
            }
            Expectation::All { of } => of.iter().all(|x| x.evaluate(observed, before)),
        }
    }

    /// Whether a missing entity is the goal rather than a failure
    pub fn expects_absence(&self) -> bool {
        match self {
            Expectation::Absent => true,
            Expectation::All { of } => of.iter().any(Expectation::expects_absence),
            _ => false,
        }
    }
}

/// Proof that an action was issued, returned without waiting for the backend
/// to settle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuationReceipt {
    pub action: ActionKind,
    pub target: EntityRef,
    /// Id of the acted-on entity; for creates, the id the backend returned
    pub entity_id: Option<EntityId>,
    /// Entity as resolved just before the action
    pub before: Option<Entity>,
    /// HTTP status for API-driven actions
    pub status: Option<u16>,
    pub issued_at: DateTime<Utc>,
}

impl ActuationReceipt {
    pub fn new(action: ActionKind, target: EntityRef, before: Option<Entity>) -> Self {
        Self {
            action,
            target,
            entity_id: before.as_ref().map(|e| e.id.clone()),
            before,
            status: None,
            issued_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_entity_id(mut self, id: EntityId) -> Self {
        self.entity_id = Some(id);
        self
    }
}
