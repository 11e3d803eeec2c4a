//! Run command - Load a module and call one of its exports.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde_json::json;

use covenant_host::prelude::*;

use super::{ReturnType, call_export, load_config, module_name, print_json, value_to_json};
use crate::OutputFormat;

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Path to the WebAssembly module
    #[arg(required = true)]
    pub module: PathBuf,

    /// Export to call (default: main, _start, or the first function export)
    #[arg(short = 'e', long)]
    pub export: Option<String>,

    /// Name to register the module under (default: the file stem)
    #[arg(short, long)]
    pub name: Option<String>,

    /// String argument to pass, repeatable
    #[arg(long = "arg")]
    pub args: Vec<String>,

    /// How to decode the export's result
    #[arg(long, value_enum, default_value = "unit")]
    pub returns: ReturnType,

    /// Log denied calls and return defaults instead of trapping
    #[arg(long, conflicts_with = "permissive")]
    pub warn_only: bool,

    /// Bind every import regardless of the module's declared effects
    #[arg(long)]
    pub permissive: bool,

    /// Scope the filesystem provider to this directory
    #[arg(long)]
    pub fs_root: Option<PathBuf>,

    /// Allow writes under --fs-root
    #[arg(long, requires = "fs_root")]
    pub fs_writable: bool,

    /// Host the network provider may reach, repeatable
    #[arg(long = "allow-host")]
    pub allow_hosts: Vec<String>,

    /// Show host call metrics
    #[arg(long)]
    pub metrics: bool,
}

/// Execute the run command.
pub fn execute(args: RunArgs, config: Option<&Path>, format: OutputFormat, quiet: bool) -> Result<()> {
    let mut config = load_config(config)?;

    if args.permissive {
        config.policy = GatePolicy::permissive();
    } else if args.warn_only {
        config.policy = GatePolicy::warn_only();
    }
    if let Some(root) = &args.fs_root {
        config.providers.fs_root = Some(root.clone());
        config.providers.fs_writable = args.fs_writable;
    }
    config.providers.allow_hosts.extend(args.allow_hosts.iter().cloned());

    let denials = Arc::new(CollectingSubscriber::default());
    let mut host = HostBuilder::from_config(&config)
        .context("Failed to configure host")?
        .with_event_subscriber(denials.clone())
        .build()
        .context("Failed to create host")?;

    if !config.links.is_empty() {
        host.load_linked(&config.links).context("Failed to load linked modules")?;
    }

    let name = module_name(&args.module, args.name.as_deref())?;
    let module = host
        .compile_file(&name, &args.module)
        .context("Failed to compile module")?;

    let export = match args.export.clone() {
        Some(export) => export,
        None => default_export(&module)?,
    };

    let handle = host
        .load_compiled(&name, module, &[])
        .context("Failed to load module")?;

    if !quiet {
        tracing::info!(
            module = %args.module.display(),
            export = %export,
            policy = ?config.policy.mode(),
            "Calling export"
        );
    }

    let result = call_export(&mut host, &handle, &export, &args.args, args.returns);
    let denied: Vec<String> = denials.denied_imports().iter().map(|i| i.to_string()).collect();
    let metrics = host.metrics();

    match format {
        OutputFormat::Human => {
            match &result {
                Ok(AbiValue::Unit) => {
                    if !quiet {
                        println!("{handle}.{export} completed");
                    }
                }
                Ok(value) => println!("{}", value_to_json(value)),
                Err(e) => println!("{handle}.{export} failed: {e}"),
            }
            if !denied.is_empty() && !quiet {
                println!("Denied imports: {}", denied.join(", "));
            }
            if args.metrics {
                println!("\nMetrics:");
                println!("  Host calls: {}", metrics.total_host_calls());
                println!("  Denials: {}", metrics.total_denials());
                for (import, calls) in &metrics.host_calls {
                    println!("  {import}: {} calls, {} errors", calls.calls, calls.errors);
                }
            }
        }
        OutputFormat::Json | OutputFormat::JsonCompact => {
            let mut output = json!({
                "module": name,
                "export": export,
                "ok": result.is_ok(),
                "denied": denied,
            });
            match &result {
                Ok(value) => output["result"] = value_to_json(value),
                Err(e) => output["error"] = json!(e.to_string()),
            }
            if args.metrics {
                output["metrics"] = serde_json::to_value(&metrics)?;
            }
            print_json(&output, format)?;
        }
    }

    result
        .map(|_| ())
        .with_context(|| format!("Call to {name}.{export} failed"))
}

fn default_export(module: &covenant_host::covenant_core::CompiledModule) -> Result<String> {
    for candidate in ["main", "_start"] {
        if module.has_export(candidate) {
            return Ok(candidate.to_string());
        }
    }

    let first = module.function_exports().find(|name| !name.starts_with('_'));
    match first {
        Some(export) => Ok(export.to_string()),
        None => bail!("Module has no callable export; pass one with --export"),
    }
}
