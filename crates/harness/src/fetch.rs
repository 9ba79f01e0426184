//! Fetcher: one logical read of a backend collection per call

use async_trait::async_trait;
use driftcheck_common::{CollectionSpec, Entity, EntityId, FetchError, Filter, Snapshot};
use std::collections::HashSet;
use tracing::debug;

use crate::rest::RestClient;

/// Read-only view of a backend collection.
///
/// Implementations perform one logical read per call and never cache.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, collection: &CollectionSpec, filter: &Filter) -> Result<Snapshot, FetchError>;
}

/// Fetcher backed by the collection's REST listing endpoint.
///
/// Id lookups on a paged listing walk the pages: an entity past the first
/// page must not look missing.
#[derive(Clone)]
pub struct RestFetcher {
    client: RestClient,
}

impl RestFetcher {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for RestFetcher {
    async fn fetch(&self, collection: &CollectionSpec, filter: &Filter) -> Result<Snapshot, FetchError> {
        match filter {
            Filter::Id(_) => read_every_page(&self.client, collection, filter).await,
            _ => read_snapshot(&self.client, collection, filter).await,
        }
    }
}

/// Upper bound on pages walked for one read
const MAX_PAGES: u32 = 500;

/// Query parameters for one read: the fixed ones plus the search term when
/// the endpoint can search server-side, and the page number when walking
fn query_for(collection: &CollectionSpec, filter: &Filter, page: Option<u32>) -> Vec<(String, String)> {
    let mut query: Vec<(String, String)> = collection
        .query
        .iter()
        .filter(|(k, _)| page.is_none() || collection.page_param.as_ref() != Some(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if let Some(param) = &collection.search_param {
        let term = match filter {
            Filter::Search(term) => term.clone(),
            _ => String::new(),
        };
        query.push((param.clone(), term));
    }

    if let (Some(param), Some(page)) = (&collection.page_param, page) {
        query.push((param.clone(), page.to_string()));
    }

    query
}

/// GET one listing page and validate it, without any client-side narrowing
async fn read_page(
    client: &RestClient,
    collection: &CollectionSpec,
    filter: &Filter,
    page: Option<u32>,
) -> Result<Snapshot, FetchError> {
    let response = client
        .get(&collection.path, &query_for(collection, filter, page))
        .await
        .map_err(|e| FetchError::failed(&collection.name, e.to_string()))?;

    if !response.is_success() {
        return Err(FetchError::failed(
            &collection.name,
            format!("HTTP {} from {}", response.status, collection.path),
        ));
    }

    let body = response
        .json()
        .map_err(|e| FetchError::schema(&collection.name, format!("body is not JSON: {}", e)))?;

    collection.parse_snapshot(&body)
}

/// Apply whatever part of the filter the server could not
fn narrow(snapshot: Snapshot, collection: &CollectionSpec, filter: &Filter) -> Snapshot {
    let server_side_search = collection.search_param.is_some() && matches!(filter, Filter::Search(_));
    if matches!(filter, Filter::All) || server_side_search {
        snapshot
    } else {
        snapshot.retain(|e| filter.matches(e))
    }
}

/// GET the listing with its fixed query, validate it, then narrow it.
pub(crate) async fn read_snapshot(
    client: &RestClient,
    collection: &CollectionSpec,
    filter: &Filter,
) -> Result<Snapshot, FetchError> {
    let snapshot = read_page(client, collection, filter, None).await?;
    debug!(
        collection = %collection.name,
        entities = snapshot.len(),
        "snapshot captured"
    );
    Ok(narrow(snapshot, collection, filter))
}

/// Read a paged listing page by page and merge the pages into one snapshot.
///
/// Stops at an empty or short page, once the reported total is reached, when
/// a page brings no unseen id (the backend ignored the page parameter), or
/// as soon as an id filter's entity turned up.
pub(crate) async fn read_every_page(
    client: &RestClient,
    collection: &CollectionSpec,
    filter: &Filter,
) -> Result<Snapshot, FetchError> {
    if !collection.is_paged() {
        return read_snapshot(client, collection, filter).await;
    }

    let page_size = collection.page_size();
    let mut entities: Vec<Entity> = Vec::new();
    let mut seen: HashSet<EntityId> = HashSet::new();
    let mut reported_total = None;
    let mut pages = 0;

    for page in 1..=MAX_PAGES {
        let snapshot = read_page(client, collection, filter, Some(page)).await?;
        pages = page;
        reported_total = reported_total.or(snapshot.reported_total());

        let fetched = snapshot.len();
        let mut fresh = 0;
        for entity in snapshot.entities() {
            if seen.insert(entity.id.clone()) {
                entities.push(entity.clone());
                fresh += 1;
            }
        }

        let short = page_size.map_or(false, |size| fetched < size);
        let complete = reported_total.map_or(false, |total| entities.len() as u64 >= total);
        let found = matches!(filter, Filter::Id(id) if seen.contains(id));
        if fetched == 0 || fresh == 0 || short || complete || found {
            break;
        }
    }

    debug!(
        collection = %collection.name,
        pages,
        entities = entities.len(),
        "paged snapshot captured"
    );
    let snapshot = Snapshot::capture(collection.name.clone(), entities, reported_total);
    Ok(narrow(snapshot, collection, filter))
}
