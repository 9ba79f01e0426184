//! Schema Commands

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use driftcheck_harness::{InputSchema, SchemaCatalog};

use crate::output::{print_list, TableDisplay};
use crate::Context;

#[derive(Args)]
pub struct SchemasArgs {
    /// List every schema, marking the ones already mapped
    #[arg(long)]
    pub all: bool,
}

#[derive(Serialize)]
pub struct SchemaRow {
    pub input_schema_id: i64,
    pub name: String,
    pub available: bool,
}

impl SchemaRow {
    fn new(schema: &InputSchema, available: bool) -> Self {
        Self {
            input_schema_id: schema.input_schema_id,
            name: schema.name().unwrap_or_default().to_string(),
            available,
        }
    }
}

impl TableDisplay for SchemaRow {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Available"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.input_schema_id.to_string(),
            self.name.clone(),
            if self.available { "yes" } else { "no" }.to_string(),
        ]
    }
}

/// Rows for either the free schemas only or the whole catalogue
fn rows(catalog: &SchemaCatalog, all: bool) -> Vec<SchemaRow> {
    let available = catalog.available();
    if all {
        catalog
            .all
            .iter()
            .map(|s| SchemaRow::new(s, available.contains(s)))
            .collect()
    } else {
        available.iter().map(|s| SchemaRow::new(s, true)).collect()
    }
}

pub async fn execute(args: SchemasArgs, ctx: &Context) -> Result<()> {
    let client = ctx.config.rest_client()?;
    let catalog = SchemaCatalog::load(&client, &ctx.config.schemas).await?;
    print_list(&rows(&catalog, args.all), ctx.format)
}
