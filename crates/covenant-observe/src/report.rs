//! Per-module load reports.

use std::fmt::Write as _;

use covenant_capability::{CapabilityManifest, ImportId, ManifestSource};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How one guest import was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    /// Granted by the manifest; bound to the real host function.
    Granted,
    /// Not granted, but bound to the real function because enforcement is off.
    Permitted,
    /// Not granted; bound to a stub that traps.
    Denied,
    /// Not granted; bound to a stub that reports and returns zero.
    Warned,
    /// A runtime intrinsic, bound unconditionally.
    Intrinsic,
    /// Wired to another module's export.
    Peer,
    /// Probe-phase stub that does nothing.
    Inert,
}

impl BindingKind {
    /// Lower-case label used in text output.
    pub fn label(self) -> &'static str {
        match self {
            BindingKind::Granted => "granted",
            BindingKind::Permitted => "permitted",
            BindingKind::Denied => "denied",
            BindingKind::Warned => "warned",
            BindingKind::Intrinsic => "intrinsic",
            BindingKind::Peer => "peer",
            BindingKind::Inert => "inert",
        }
    }

    /// True for stubs standing in for a gated import.
    pub fn is_denial(self) -> bool {
        matches!(self, BindingKind::Denied | BindingKind::Warned)
    }
}

impl std::fmt::Display for BindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One guest import and what it was bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRecord {
    /// The import.
    pub import: ImportId,
    /// How it was bound.
    pub kind: BindingKind,
}

impl BindingRecord {
    /// Create a record.
    pub fn new(import: ImportId, kind: BindingKind) -> Self {
        Self { import, kind }
    }
}

/// What the host decided when it loaded a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    /// Unique report ID.
    pub report_id: Uuid,
    /// Registry name.
    pub module: String,
    /// Registry generation.
    pub generation: u64,
    /// The manifest the module runs under.
    pub manifest: CapabilityManifest,
    /// Every import and its binding, in declaration order.
    pub bindings: Vec<BindingRecord>,
    /// Exported function names.
    pub exports: Vec<String>,
}

impl LoadReport {
    /// Create a report.
    pub fn new(
        module: impl Into<String>,
        generation: u64,
        manifest: CapabilityManifest,
        bindings: Vec<BindingRecord>,
        exports: Vec<String>,
    ) -> Self {
        Self {
            report_id: Uuid::new_v4(),
            module: module.into(),
            generation,
            manifest,
            bindings,
            exports,
        }
    }

    /// Imports bound with `kind`.
    pub fn imports_with(&self, kind: BindingKind) -> impl Iterator<Item = &ImportId> {
        self.bindings
            .iter()
            .filter(move |b| b.kind == kind)
            .map(|b| &b.import)
    }

    /// Number of imports bound with `kind`.
    pub fn count(&self, kind: BindingKind) -> usize {
        self.imports_with(kind).count()
    }

    /// Number of gated imports bound to a stub.
    pub fn denied_count(&self) -> usize {
        self.bindings.iter().filter(|b| b.kind.is_denial()).count()
    }

    /// Format as human-readable text.
    pub fn to_text(&self) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "Module: {} (generation {})", self.module, self.generation);

        let source = match self.manifest.source() {
            ManifestSource::Embedded { symbols } => format!("embedded metadata, {symbols} symbols"),
            ManifestSource::NoMetadata => "no metadata export (deny-all)".to_string(),
            ManifestSource::Degraded { reason } => format!("degraded (deny-all): {reason}"),
            ManifestSource::Explicit => "explicit".to_string(),
        };
        let _ = writeln!(output, "Manifest: {source}");

        let effects: Vec<&str> = self.manifest.effects().collect();
        if !effects.is_empty() {
            let _ = writeln!(output, "  Effects: {}", effects.join(", "));
        }
        for import in self.manifest.imports() {
            let _ = writeln!(output, "  + {import}");
        }

        if !self.bindings.is_empty() {
            output.push_str("\nImports:\n");
            let width = self
                .bindings
                .iter()
                .map(|b| b.import.as_str().len())
                .max()
                .unwrap_or(0);
            for binding in &self.bindings {
                let _ = writeln!(
                    output,
                    "  {:<width$}  {}",
                    binding.import.as_str(),
                    binding.kind,
                    width = width
                );
            }
        }

        if !self.exports.is_empty() {
            let _ = writeln!(output, "\nExports: {}", self.exports.join(", "));
        }

        output
    }

    /// Format as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Format as pretty JSON string.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LoadReport {
        let manifest = CapabilityManifest::builder().with_effect("console").build();
        LoadReport::new(
            "query",
            2,
            manifest,
            vec![
                BindingRecord::new(ImportId::new("console.println"), BindingKind::Granted),
                BindingRecord::new(ImportId::new("http.get"), BindingKind::Denied),
                BindingRecord::new(ImportId::new("mem.alloc"), BindingKind::Intrinsic),
                BindingRecord::new(ImportId::new("symbols.lookup"), BindingKind::Peer),
            ],
            vec!["run".to_string()],
        )
    }

    #[test]
    fn test_counts() {
        let report = sample();
        assert_eq!(report.count(BindingKind::Granted), 1);
        assert_eq!(report.denied_count(), 1);
        assert_eq!(
            report.imports_with(BindingKind::Peer).collect::<Vec<_>>(),
            vec![&ImportId::new("symbols.lookup")]
        );
    }

    #[test]
    fn test_text_lists_every_binding() {
        let text = sample().to_text();
        assert!(text.contains("Module: query (generation 2)"));
        assert!(text.contains("Effects: console"));
        assert!(text.contains("+ console.println"));
        assert!(text.lines().any(|l| l.contains("http.get") && l.ends_with("denied")));
    }

    #[test]
    fn test_json_shape() {
        let json = sample().to_json();
        assert_eq!(json["module"], "query");
        assert_eq!(json["bindings"][1]["kind"], "denied");
        assert_eq!(json["bindings"][1]["import"], "http.get");
    }
}
