//! REST and UI adapters against a local fake backend

use async_trait::async_trait;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use driftcheck_common::{
    Action, ActuationError, CollectionSpec, EntityId, EntityRef, Expectation, FetchError, Filter,
};
use driftcheck_harness::{
    ActionRoutes, Actuator, BrowserDriver, DriverError, Fetcher, HttpMethod, ReconcileRequest,
    Reconciler, RestActuator, RestClient, RestFetcher, RetryPolicy, Route, SchemaCatalog,
    SchemaEndpoints, UiActuator, UiRoutes, UiStep,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Backend {
    factors: Vec<Value>,
    services: Vec<Value>,
    next_id: u64,
    auth: Vec<Option<String>>,
    creates: usize,
    uploads: Vec<(u64, String, String, usize)>,
}

type Shared = Arc<Mutex<Backend>>;

fn seeded() -> Backend {
    Backend {
        factors: vec![
            json!({"factor_type_id": 42, "factor_name": "F1", "enabled": false}),
            json!({"factor_type_id": 43, "factor_name": "F2", "enabled": true}),
        ],
        services: vec![
            json!({"service": {"service_id": 7, "service_name": "Dialysis", "enabled": 1}}),
            json!({"service": {"service_id": 8, "service_name": "Radiology", "enabled": 1}}),
            json!({"service": {"service_id": 9, "service_name": "Dialysis", "enabled": 0}}),
        ],
        next_id: 100,
        ..Backend::default()
    }
}

fn name_matches(value: &Value, term: &str) -> bool {
    value
        .as_str()
        .unwrap_or_default()
        .to_lowercase()
        .contains(&term.to_lowercase())
}

/// Slice a listing the way the backend does for `page`/`limit`
fn paginate(list: Vec<Value>, query: &HashMap<String, String>) -> Vec<Value> {
    let page: usize = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1).max(1);
    match query.get("limit").and_then(|l| l.parse::<usize>().ok()) {
        Some(limit) => list.into_iter().skip((page - 1) * limit).take(limit).collect(),
        None => list,
    }
}

async fn list_factors(
    State(db): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut db = db.lock();
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    db.auth.push(auth);

    let term = query.get("search").cloned().unwrap_or_default();
    let list: Vec<Value> = db
        .factors
        .iter()
        .filter(|f| name_matches(&f["factor_name"], &term))
        .cloned()
        .collect();
    Json(json!({"status": "success", "factorList": paginate(list, &query)}))
}

async fn toggle_factor(
    State(db): State<Shared>,
    Path(id): Path<u64>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut db = db.lock();
    match db.factors.iter_mut().find(|f| f["factor_type_id"] == id) {
        Some(factor) => {
            factor["enabled"] = body["enabled"].clone();
            (StatusCode::OK, Json(json!({"status": "success"})))
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "message": "Factor not found"})),
        ),
    }
}

async fn create_factor(State(db): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut db = db.lock();
    db.creates += 1;
    let Some(name) = body["factor_name"].as_str().map(str::to_string) else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"status": "error", "message": "factor_name is required"})),
        );
    };
    if db.factors.iter().any(|f| f["factor_name"] == name.as_str()) {
        return (
            StatusCode::OK,
            Json(json!({"status": "error", "message": "Factor name already exists"})),
        );
    }
    let id = db.next_id;
    db.next_id += 1;
    db.factors
        .push(json!({"factor_type_id": id, "factor_name": name, "enabled": true}));
    (
        StatusCode::OK,
        Json(json!({"success": true, "data": {"factor_type_id": id}})),
    )
}

async fn upload_codes(State(db): State<Shared>, Path(id): Path<u64>, mut multipart: Multipart) -> Json<Value> {
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().unwrap_or_default().to_string();
        let size = field.bytes().await.map(|b| b.len()).unwrap_or_default();
        db.lock().uploads.push((id, name, file_name, size));
    }
    Json(json!({"status": "success"}))
}

async fn list_services(State(db): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let db = db.lock();
    let term = query.get("searchterm").cloned().unwrap_or_default();
    let list: Vec<Value> = db
        .services
        .iter()
        .filter(|s| name_matches(&s["service"]["service_name"], &term))
        .cloned()
        .collect();
    Json(json!({"status": "success", "data": paginate(list, &query)}))
}

async fn delete_service(State(db): State<Shared>, Path(id): Path<u64>) -> Json<Value> {
    db.lock().services.retain(|s| s["service"]["service_id"] != id);
    Json(json!({"status": "success", "message": "Service deleted successfully!"}))
}

async fn spawn_backend(backend: Backend) -> (String, Shared) {
    let shared = Arc::new(Mutex::new(backend));
    let app = Router::new()
        .route("/getFactorsList", get(list_factors))
        .route("/toggleFactor/:id", put(toggle_factor))
        .route("/createFactorId", post(create_factor))
        .route("/uploadCodes/:id", post(upload_codes))
        .route("/listservices", get(list_services))
        .route("/deleteService/:id", delete(delete_service))
        .route(
            "/getAllSchemas",
            get(|| async {
                Json(json!({"schemas": [
                    {"input_schema_id": 1, "input_schema_name": "Claims"},
                    {"input_schema_id": 2, "input_schema_name": "Members"},
                    {"input_schema_id": 3, "input_schema_name": "Providers"}
                ]}))
            }),
        )
        .route(
            "/getSelectedInputSchema",
            get(|| async { Json(json!({"selectedInputSchema": [{"primary_mapping": "2"}]})) }),
        )
        .route("/emptySelected", get(|| async { Json(json!({"status": "success"})) }))
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route("/html", get(|| async { "<html>login</html>" }))
        .with_state(shared.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), shared)
}

fn client(url: &str) -> RestClient {
    RestClient::new(url, Some("secret".to_string()), Duration::from_secs(5)).unwrap()
}

fn routes() -> BTreeMap<String, ActionRoutes> {
    BTreeMap::from([
        (
            "factors".to_string(),
            ActionRoutes {
                toggle: Some(Route::new(HttpMethod::Put, "/toggleFactor/{id}")),
                create: Some(Route::new(HttpMethod::Post, "/createFactorId")),
                upload: Some(Route::new(HttpMethod::Post, "/uploadCodes/{id}")),
                upload_field: Some("codes".to_string()),
                created_id_field: Some("data.factor_type_id".to_string()),
                ..ActionRoutes::default()
            },
        ),
        (
            "services".to_string(),
            ActionRoutes {
                delete: Some(Route::new(HttpMethod::Delete, "/deleteService/{id}")),
                ..ActionRoutes::default()
            },
        ),
    ])
}

#[tokio::test]
async fn fetch_normalizes_listing_and_sends_token() {
    let (url, db) = spawn_backend(seeded()).await;
    let fetcher = RestFetcher::new(client(&url));

    let snapshot = fetcher.fetch(&CollectionSpec::factors(), &Filter::All).await.unwrap();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.entities()[0].id, EntityId::from("42"));
    assert!(!snapshot.entities()[0].enabled);

    let searched = fetcher
        .fetch(&CollectionSpec::factors(), &Filter::search("f2"))
        .await
        .unwrap();
    assert_eq!(searched.len(), 1);
    assert_eq!(searched.entities()[0].name, "F2");

    let by_id = fetcher
        .fetch(&CollectionSpec::services(), &Filter::Id("9".into()))
        .await
        .unwrap();
    assert_eq!(by_id.len(), 1);
    assert!(!by_id.entities()[0].enabled);

    assert_eq!(db.lock().auth[0].as_deref(), Some("Bearer secret"));
}

#[tokio::test]
async fn fetch_errors_are_classified() {
    let (url, _db) = spawn_backend(seeded()).await;
    let fetcher = RestFetcher::new(client(&url));

    let broken = CollectionSpec {
        name: "broken".to_string(),
        path: "/broken".to_string(),
        ..CollectionSpec::factors()
    };
    assert!(matches!(
        fetcher.fetch(&broken, &Filter::All).await,
        Err(FetchError::FetchFailed { .. })
    ));

    let html = CollectionSpec {
        name: "html".to_string(),
        path: "/html".to_string(),
        ..CollectionSpec::factors()
    };
    assert!(matches!(
        fetcher.fetch(&html, &Filter::All).await,
        Err(FetchError::SchemaMismatch { .. })
    ));

    let wrong_shape = CollectionSpec {
        items_field: "data".to_string(),
        ..CollectionSpec::factors()
    };
    assert!(matches!(
        fetcher.fetch(&wrong_shape, &Filter::All).await,
        Err(FetchError::SchemaMismatch { .. })
    ));
}

#[tokio::test]
async fn fetch_against_closed_port_fails() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let fetcher = RestFetcher::new(client(&format!("http://{}", addr)));
    assert!(matches!(
        fetcher.fetch(&CollectionSpec::factors(), &Filter::All).await,
        Err(FetchError::FetchFailed { .. })
    ));
}

#[tokio::test]
async fn toggle_round_trip_through_api() {
    let (url, db) = spawn_backend(seeded()).await;
    let client = client(&url);
    let reconciler = Reconciler::new(
        Arc::new(RestFetcher::new(client.clone())),
        Arc::new(RestActuator::new(client, routes())),
    );

    let request = ReconcileRequest::new(
        CollectionSpec::factors(),
        EntityRef::Id("42".into()),
        Action::Toggle,
        Expectation::Enabled { value: true },
    );
    let result = reconciler
        .reconcile(&request, &RetryPolicy::immediate(3), &CancellationToken::new())
        .await;

    assert!(result.succeeded, "{:?}", result.last_error);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.receipt.and_then(|r| r.status), Some(200));
    assert_eq!(db.lock().factors[0]["enabled"], json!(true));
}

#[tokio::test]
async fn create_reports_new_id_and_refuses_duplicates() {
    let (url, db) = spawn_backend(seeded()).await;
    let actuator = RestActuator::new(client(&url), routes());
    let factors = CollectionSpec::factors();

    let receipt = actuator
        .actuate(
            &factors,
            &EntityRef::Name("Factor_New".to_string()),
            &Action::Create {
                payload: json!({"factor_name": "Factor_New"}),
            },
        )
        .await
        .unwrap();
    assert_eq!(receipt.entity_id, Some(EntityId::from("100")));

    let duplicate = actuator
        .actuate(
            &factors,
            &EntityRef::Name("F1".to_string()),
            &Action::Create {
                payload: json!({"factor_name": "F1"}),
            },
        )
        .await;
    assert!(matches!(duplicate, Err(ActuationError::ActionRejected { status: None, .. })));
    assert_eq!(db.lock().creates, 1);

    let invalid = actuator
        .actuate(
            &factors,
            &EntityRef::Name("Nameless".to_string()),
            &Action::Create { payload: json!({}) },
        )
        .await;
    assert_eq!(
        invalid.unwrap_err(),
        ActuationError::ActionRejected {
            status: Some(422),
            reason: "factor_name is required".to_string(),
        }
    );
}

#[tokio::test]
async fn upload_sends_multipart_file() {
    let (url, db) = spawn_backend(seeded()).await;
    let actuator = RestActuator::new(client(&url), routes());

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("codes.csv");
    std::fs::write(&file, "code,desc\nA01,Cholera\n").unwrap();

    actuator
        .actuate(
            &CollectionSpec::factors(),
            &EntityRef::Name("F2".to_string()),
            &Action::Upload { file: file.clone() },
        )
        .await
        .unwrap();

    let uploads = db.lock().uploads.clone();
    assert_eq!(
        uploads,
        vec![(43, "codes".to_string(), "codes.csv".to_string(), 22)]
    );
}

#[tokio::test]
async fn missing_route_and_missing_target_are_rejected() {
    let (url, _db) = spawn_backend(seeded()).await;
    let actuator = RestActuator::new(client(&url), routes());

    let no_route = actuator
        .actuate(&CollectionSpec::factors(), &EntityRef::Id("42".into()), &Action::Delete)
        .await;
    assert!(matches!(no_route, Err(ActuationError::ActionRejected { .. })));

    let missing = actuator
        .actuate(&CollectionSpec::factors(), &EntityRef::Id("999".into()), &Action::Toggle)
        .await;
    assert!(matches!(missing, Err(ActuationError::TargetNotFound { .. })));

    let ambiguous = actuator
        .actuate(
            &CollectionSpec::services(),
            &EntityRef::Name("Dialysis".to_string()),
            &Action::Delete,
        )
        .await;
    assert!(matches!(ambiguous, Err(ActuationError::AmbiguousTarget { .. })));
}

#[tokio::test]
async fn delete_round_trip_waits_for_absence() {
    let (url, db) = spawn_backend(seeded()).await;
    let client = client(&url);
    let reconciler = Reconciler::new(
        Arc::new(RestFetcher::new(client.clone())),
        Arc::new(RestActuator::new(client, routes())),
    );

    let request = ReconcileRequest::new(
        CollectionSpec::services(),
        EntityRef::Id("8".into()),
        Action::Delete,
        Expectation::Absent,
    );
    let result = reconciler
        .reconcile(&request, &RetryPolicy::immediate(3), &CancellationToken::new())
        .await;

    assert!(result.succeeded, "{:?}", result.last_error);
    assert_eq!(db.lock().services.len(), 2);
}

#[tokio::test]
async fn schema_catalog_lists_free_schemas() {
    let (url, _db) = spawn_backend(seeded()).await;
    let catalog = SchemaCatalog::load(&client(&url), &SchemaEndpoints::default())
        .await
        .unwrap();

    let available: Vec<i64> = catalog.available().iter().map(|s| s.input_schema_id).collect();
    assert_eq!(available, vec![1, 3]);

    let endpoints = SchemaEndpoints {
        selected_path: "/emptySelected".to_string(),
        ..SchemaEndpoints::default()
    };
    let catalog = SchemaCatalog::load(&client(&url), &endpoints).await.unwrap();
    assert!(catalog.used.is_empty());
    assert_eq!(catalog.available().len(), 3);
}

#[derive(Default)]
struct RecordingDriver {
    runs: Mutex<Vec<Vec<UiStep>>>,
    fail_at: Option<usize>,
}

#[async_trait]
impl BrowserDriver for RecordingDriver {
    async fn run(&self, steps: &[UiStep]) -> Result<(), DriverError> {
        self.runs.lock().push(steps.to_vec());
        match self.fail_at {
            Some(index) => Err(DriverError::StepFailed {
                index,
                message: "Timeout 5000ms exceeded".to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn ui_routes() -> BTreeMap<String, UiRoutes> {
    BTreeMap::from([("services".to_string(), UiRoutes::services())])
}

#[tokio::test]
async fn ui_delete_drives_the_named_row() {
    let (url, _db) = spawn_backend(seeded()).await;
    let driver = Arc::new(RecordingDriver::default());
    let actuator = UiActuator::new(driver.clone(), client(&url), ui_routes());

    let receipt = actuator
        .actuate(
            &CollectionSpec::services(),
            &EntityRef::Name("Radiology".to_string()),
            &Action::Delete,
        )
        .await
        .unwrap();
    assert_eq!(receipt.entity_id, Some(EntityId::from("8")));

    let runs = driver.runs.lock();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].contains(&UiStep::Click {
        selector: r#"section:has-text("Radiology") >> .service_dots"#.to_string()
    }));
}

#[tokio::test]
async fn ui_refuses_rows_with_shared_display_names() {
    let (url, _db) = spawn_backend(seeded()).await;
    let driver = Arc::new(RecordingDriver::default());
    let actuator = UiActuator::new(driver.clone(), client(&url), ui_routes());

    let result = actuator
        .actuate(&CollectionSpec::services(), &EntityRef::Id("7".into()), &Action::Delete)
        .await;

    match result {
        Err(ActuationError::AmbiguousTarget { candidates, .. }) => {
            assert_eq!(candidates, vec![EntityId::from("7"), EntityId::from("9")]);
        }
        other => panic!("expected AmbiguousTarget, got {:?}", other),
    }
    assert!(driver.runs.lock().is_empty());
}

#[tokio::test]
async fn ui_missing_success_message_is_a_rejection() {
    let (url, _db) = spawn_backend(seeded()).await;
    let driver = Arc::new(RecordingDriver {
        fail_at: Some(3),
        ..RecordingDriver::default()
    });
    let actuator = UiActuator::new(driver, client(&url), ui_routes());

    let result = actuator
        .actuate(
            &CollectionSpec::services(),
            &EntityRef::Name("Radiology".to_string()),
            &Action::Delete,
        )
        .await;
    assert!(matches!(result, Err(ActuationError::ActionRejected { .. })));
}

fn crowded() -> Backend {
    let factors = (1..=12)
        .map(|n| json!({"factor_type_id": 100 + n, "factor_name": format!("Factor_{n:02}"), "enabled": false}))
        .collect();
    let mut services: Vec<Value> = (1..=11)
        .map(|n| json!({"service": {"service_id": n, "service_name": format!("Service {n}"), "enabled": 1}}))
        .collect();
    services.push(json!({"service": {"service_id": 12, "service_name": "Service 3", "enabled": 1}}));
    Backend {
        factors,
        services,
        next_id: 200,
        ..Backend::default()
    }
}

#[tokio::test]
async fn id_targets_past_the_first_page_are_resolved() {
    let (url, db) = spawn_backend(crowded()).await;
    let client = client(&url);

    let first_page = RestFetcher::new(client.clone())
        .fetch(&CollectionSpec::factors(), &Filter::All)
        .await
        .unwrap();
    assert_eq!(first_page.len(), 10);

    let reconciler = Reconciler::new(
        Arc::new(RestFetcher::new(client.clone())),
        Arc::new(RestActuator::new(client, routes())),
    );
    let request = ReconcileRequest::new(
        CollectionSpec::factors(),
        EntityRef::Id("112".into()),
        Action::Toggle,
        Expectation::Enabled { value: true },
    );
    let result = reconciler
        .reconcile(&request, &RetryPolicy::immediate(3), &CancellationToken::new())
        .await;

    assert!(result.succeeded, "{:?}", result.last_error);
    assert_eq!(result.receipt.and_then(|r| r.entity_id), Some(EntityId::from("112")));
    assert_eq!(db.lock().factors[11]["enabled"], json!(true));
}

#[tokio::test]
async fn ui_sees_namesakes_on_later_pages() {
    let (url, _db) = spawn_backend(crowded()).await;
    let driver = Arc::new(RecordingDriver::default());
    let actuator = UiActuator::new(driver.clone(), client(&url), ui_routes());
    let unsearchable = CollectionSpec {
        search_param: None,
        ..CollectionSpec::services()
    };

    let result = actuator
        .actuate(&unsearchable, &EntityRef::Id("3".into()), &Action::Delete)
        .await;

    match result {
        Err(ActuationError::AmbiguousTarget { candidates, .. }) => {
            assert_eq!(candidates, vec![EntityId::from("3"), EntityId::from("12")]);
        }
        other => panic!("expected AmbiguousTarget, got {:?}", other),
    }
    assert!(driver.runs.lock().is_empty());
}
