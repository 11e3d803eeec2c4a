//! Validate command - Check that a module can be loaded.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::Args;
use serde::Serialize;

use covenant_host::covenant_capability::ManifestSource;
use covenant_host::prelude::*;

use super::{load_config, module_name, print_json};
use crate::OutputFormat;

/// Arguments for the validate command.
#[derive(Args)]
pub struct ValidateArgs {
    /// Path to the WebAssembly module
    #[arg(required = true)]
    pub module: PathBuf,

    /// Treat missing or unreadable metadata as an error
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Default, Serialize)]
struct ValidationResult {
    valid: bool,
    path: String,
    metadata: String,
    effects: Vec<String>,
    granted: Vec<String>,
    denied: Vec<String>,
    warnings: Vec<String>,
    errors: Vec<String>,
}

/// Execute the validate command.
pub fn execute(args: ValidateArgs, config: Option<&Path>, format: OutputFormat) -> Result<()> {
    let config = load_config(config)?;
    let host = Host::from_config(&config)?;
    let name = module_name(&args.module, None)?;

    let mut result = ValidationResult {
        valid: true,
        path: args.module.display().to_string(),
        ..Default::default()
    };

    let report = host
        .compile_file(&name, &args.module)
        .and_then(|module| host.inspect(&name, &module));

    match report {
        Ok(report) => {
            let manifest = &report.manifest;
            result.effects = manifest.effects().map(String::from).collect();
            result.granted = manifest.imports().map(|i| i.to_string()).collect();
            result.denied = report.imports_with(BindingKind::Denied).map(|i| i.to_string()).collect();

            result.metadata = match manifest.source() {
                ManifestSource::Embedded { symbols } => format!("embedded ({symbols} symbols)"),
                ManifestSource::NoMetadata => {
                    let message = "Module embeds no capability metadata; every gated import is denied";
                    if args.strict {
                        result.errors.push(message.to_string());
                    } else {
                        result.warnings.push(message.to_string());
                    }
                    "none".to_string()
                }
                ManifestSource::Degraded { reason } => {
                    let message = format!("Capability metadata is unreadable: {reason}");
                    if args.strict {
                        result.errors.push(message);
                    } else {
                        result.warnings.push(message);
                    }
                    "degraded".to_string()
                }
                ManifestSource::Explicit => "explicit".to_string(),
            };

            if !result.denied.is_empty() {
                result.warnings.push(format!(
                    "{} imports are not covered by declared effects and will be denied",
                    result.denied.len()
                ));
            }
        }
        Err(e) => result.errors.push(e.to_string()),
    }
    result.valid = result.errors.is_empty();

    match format {
        OutputFormat::Human => {
            if result.valid {
                println!("Module is valid: {}", result.path);
                println!("  Metadata: {}", result.metadata);
                if !result.effects.is_empty() {
                    println!("  Effects: {}", result.effects.join(", "));
                }
                println!("  Granted imports: {}", result.granted.len());
            } else {
                println!("Module is INVALID: {}", result.path);
                for error in &result.errors {
                    println!("  Error: {error}");
                }
            }

            if !result.warnings.is_empty() {
                println!("\nWarnings:");
                for warning in &result.warnings {
                    println!("  - {warning}");
                }
            }
        }
        OutputFormat::Json | OutputFormat::JsonCompact => print_json(&result, format)?,
    }

    if !result.valid {
        bail!("Validation failed");
    }
    Ok(())
}
