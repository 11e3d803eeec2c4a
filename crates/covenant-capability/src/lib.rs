//! Covenant Capability System
//!
//! Guest modules carry their own security metadata: a JSON array of
//! [`EmbeddableSymbol`] records, each listing the effects the symbol
//! declares. This crate turns those declarations into a
//! [`CapabilityManifest`], the set of host imports the module may call.
//!
//! # Model
//!
//! - Every effect maps to a fixed set of imports ([`Effect::imports`])
//! - A module is granted the union over all of its symbols
//! - Missing or unreadable metadata grants nothing
//! - Imports outside every effect namespace are intrinsics, never gated
//!
//! Granularity is per module: the host cannot tell which guest function
//! issued a call, so a "pure" export may use any import another symbol in
//! the same module declared.

pub mod effect;
pub mod error;
pub mod import_id;
pub mod manifest;
pub mod policy;
pub mod symbol;

pub use effect::{
    ENV_MEMORY, Effect, GATED_NAMESPACES, INTRINSIC_NAMESPACES, effects_to_imports, is_gated,
    is_intrinsic, is_reserved_namespace,
};
pub use error::{CapabilityError, CapabilityResult};
pub use import_id::ImportId;
pub use manifest::{CapabilityManifest, ManifestBuilder, ManifestSource, build_manifest_from_symbols};
pub use policy::{EnforcementMode, GatePolicy};
pub use symbol::{EmbeddableSymbol, parse_symbols};
