//! Config Commands

use anyhow::{bail, Result};
use clap::Subcommand;
use std::path::Path;

use driftcheck_harness::HarnessConfig;

use crate::output::{print_serialized, print_success, OutputFormat};
use crate::Context;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    HarnessConfig::default().save(path)?;
    Ok(())
}

pub fn execute(cmd: ConfigCommands, ctx: &Context) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let format = match ctx.format {
                OutputFormat::Yaml => OutputFormat::Yaml,
                _ => OutputFormat::Json,
            };
            print_serialized(&ctx.config, format)
        }
        ConfigCommands::Init { force } => {
            init(&ctx.config_path, force)?;
            print_success(&format!("Wrote {}", ctx.config_path.display()));
            Ok(())
        }
    }
}
