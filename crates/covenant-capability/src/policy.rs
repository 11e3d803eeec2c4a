//! Enforcement policy for denied imports.

use serde::{Deserialize, Serialize};

/// How the gate treats a gated import missing from the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Bind a stub that traps with a capability violation.
    Deny,
    /// Bind a stub that logs, reports, and returns the safe default.
    Warn,
    /// Bind the real implementation anyway.
    Permissive,
}

impl EnforcementMode {
    /// True when denied imports still reach the real implementation.
    pub fn binds_real(self) -> bool {
        self == Self::Permissive
    }
}

/// Gate configuration.
///
/// Defaults to `strict = true, warn_only = false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
    /// Enforce the manifest at all. `false` disables enforcement, for
    /// trusted or offline tooling.
    pub strict: bool,
    /// When enforcing, log and return defaults instead of trapping.
    pub warn_only: bool,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self::strict()
    }
}

impl GatePolicy {
    /// Trap on every denied call.
    pub fn strict() -> Self {
        Self {
            strict: true,
            warn_only: false,
        }
    }

    /// Warn and return defaults on denied calls.
    pub fn warn_only() -> Self {
        Self {
            strict: true,
            warn_only: true,
        }
    }

    /// Bind every import regardless of the manifest.
    pub fn permissive() -> Self {
        Self {
            strict: false,
            warn_only: false,
        }
    }

    /// The resulting enforcement mode.
    pub fn mode(&self) -> EnforcementMode {
        match (self.strict, self.warn_only) {
            (false, _) => EnforcementMode::Permissive,
            (true, true) => EnforcementMode::Warn,
            (true, false) => EnforcementMode::Deny,
        }
    }
}
