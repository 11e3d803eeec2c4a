//! Inspect command - Show what a module imports, exports and is granted.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use covenant_host::covenant_core::CompiledModule;
use covenant_host::prelude::*;

use super::{load_config, module_name, print_json};
use crate::OutputFormat;

/// Arguments for the inspect command.
#[derive(Args)]
pub struct InspectArgs {
    /// Path to the WebAssembly module
    #[arg(required = true)]
    pub module: PathBuf,

    /// Name the module would be loaded under (default: the file stem)
    #[arg(short, long)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
struct Inspection {
    path: String,
    exports: Vec<EntryDisplay>,
    imports: Vec<EntryDisplay>,
    report: LoadReport,
}

#[derive(Debug, Serialize)]
struct EntryDisplay {
    name: String,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
}

fn exports(module: &CompiledModule) -> Vec<EntryDisplay> {
    module
        .exports()
        .iter()
        .map(|export| EntryDisplay {
            name: export.name.clone(),
            kind: export.kind.to_string(),
            signature: export.kind.arity(),
        })
        .collect()
}

fn imports(module: &CompiledModule) -> Vec<EntryDisplay> {
    module
        .imports()
        .iter()
        .map(|import| EntryDisplay {
            name: import.qualified_name(),
            kind: import.kind.to_string(),
            signature: import.kind.arity(),
        })
        .collect()
}

/// Execute the inspect command.
pub fn execute(args: InspectArgs, config: Option<&Path>, format: OutputFormat) -> Result<()> {
    let config = load_config(config)?;
    let host = Host::from_config(&config).context("Failed to create host")?;

    let name = module_name(&args.module, args.name.as_deref())?;
    let module = host
        .compile_file(&name, &args.module)
        .context("Failed to compile module")?;
    let report = host
        .inspect(&name, &module)
        .context("Failed to probe module")?;

    let inspection = Inspection {
        path: args.module.display().to_string(),
        exports: exports(&module),
        imports: imports(&module),
        report,
    };

    match format {
        OutputFormat::Human => {
            println!("Path: {}", inspection.path);
            print!("{}", inspection.report.to_text());

            println!("\nSignatures:");
            for entry in inspection.imports.iter().chain(&inspection.exports) {
                match &entry.signature {
                    Some(sig) => println!("  {} [{}]: {}", entry.name, entry.kind, sig),
                    None => println!("  {} [{}]", entry.name, entry.kind),
                }
            }
        }
        OutputFormat::Json | OutputFormat::JsonCompact => print_json(&inspection, format)?,
    }

    Ok(())
}
