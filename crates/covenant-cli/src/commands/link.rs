//! Link command - Load a set of co-resident modules.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::Serialize;

use covenant_host::prelude::*;

use super::{ReturnType, call_export, load_config, print_json, value_to_json};
use crate::OutputFormat;

/// Arguments for the link command.
#[derive(Args)]
pub struct LinkArgs {
    /// Load symbols.wasm, query.wasm and mutation.wasm from this directory
    /// instead of the configured links
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Export to call once linked, as `module.export`
    #[arg(long)]
    pub call: Option<String>,

    /// String argument for --call, repeatable
    #[arg(long = "arg", requires = "call")]
    pub args: Vec<String>,

    /// How to decode the result of --call
    #[arg(long, value_enum, default_value = "unit")]
    pub returns: ReturnType,
}

#[derive(Debug, Serialize)]
struct LinkedModule {
    name: String,
    generation: u64,
    granted: usize,
    denied: usize,
    peers: usize,
}

/// Execute the link command.
pub fn execute(args: LinkArgs, config: Option<&Path>, format: OutputFormat, quiet: bool) -> Result<()> {
    let mut config = load_config(config)?;
    if let Some(dir) = &args.dir {
        config.links = LinkSpec::default_set(dir);
    }
    if config.links.is_empty() {
        bail!("Nothing to link; pass --config with [[links]] entries or --dir");
    }

    let mut host = Host::from_config(&config).context("Failed to create host")?;
    let handles = host
        .load_linked(&config.links)
        .context("Failed to link modules")?;

    let mut linked = Vec::with_capacity(handles.len());
    for handle in &handles {
        let report = host.report(handle.name())?;
        linked.push(LinkedModule {
            name: handle.name().to_string(),
            generation: handle.generation(),
            granted: report.count(BindingKind::Granted),
            denied: report.denied_count(),
            peers: report.count(BindingKind::Peer),
        });
    }

    let called = match &args.call {
        Some(target) => {
            let (module, export) = target
                .split_once('.')
                .with_context(|| format!("Expected module.export, got {target}"))?;
            let handle = host.module(module)?;
            let value = call_export(&mut host, &handle, export, &args.args, args.returns)
                .with_context(|| format!("Call to {target} failed"))?;
            Some(value)
        }
        None => None,
    };

    match format {
        OutputFormat::Human => {
            if !quiet {
                for module in &linked {
                    println!(
                        "{}@{}: {} granted, {} denied, {} peer imports",
                        module.name, module.generation, module.granted, module.denied, module.peers
                    );
                }
            }
            if let Some(value) = &called {
                println!("{}", value_to_json(value));
            }
        }
        OutputFormat::Json | OutputFormat::JsonCompact => {
            let output = serde_json::json!({
                "modules": linked,
                "result": called.as_ref().map(value_to_json),
            });
            print_json(&output, format)?;
        }
    }

    Ok(())
}
