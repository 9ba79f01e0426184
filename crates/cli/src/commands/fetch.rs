//! Fetch Commands

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use driftcheck_common::{Entity, Filter};
use driftcheck_harness::{Fetcher, RestFetcher};

use crate::output::{print_list, print_serialized, OutputFormat, TableDisplay};
use crate::Context;

#[derive(Args)]
pub struct FetchArgs {
    /// Collection name (factors, factor_search, services, or one from the config)
    pub collection: String,

    /// Search term passed to the backend
    #[arg(short, long)]
    pub search: Option<String>,

    /// Only the entity with this id
    #[arg(long, conflicts_with = "search")]
    pub id: Option<String>,
}

impl FetchArgs {
    fn filter(&self) -> Filter {
        match (&self.id, &self.search) {
            (Some(id), _) => Filter::Id(id.as_str().into()),
            (None, Some(term)) => Filter::search(term),
            (None, None) => Filter::All,
        }
    }
}

/// Entity display wrapper for serialization
#[derive(Serialize)]
pub struct EntityRow {
    pub id: String,
    pub name: String,
    pub enabled: bool,
}

impl From<&Entity> for EntityRow {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id.to_string(),
            name: entity.name.clone(),
            enabled: entity.enabled,
        }
    }
}

impl TableDisplay for EntityRow {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Enabled"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            if self.enabled { "✓" } else { "✗" }.to_string(),
        ]
    }
}

pub async fn execute(args: FetchArgs, ctx: &Context) -> Result<()> {
    let collection = ctx.config.collection(&args.collection)?;
    let fetcher = RestFetcher::new(ctx.config.rest_client()?);
    let snapshot = fetcher.fetch(&collection, &args.filter()).await?;

    match ctx.format {
        OutputFormat::Json | OutputFormat::Yaml => print_serialized(&snapshot, ctx.format)?,
        _ => {
            let rows: Vec<EntityRow> = snapshot.entities().iter().map(EntityRow::from).collect();
            print_list(&rows, ctx.format)?;
            println!(
                "{} entities from {} at {}",
                snapshot.len(),
                snapshot.collection(),
                snapshot.captured_at().format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }
    Ok(())
}
