//! Covenant Gate
//!
//! Builds the import table a guest module is instantiated against. Every
//! import is bound to exactly one of:
//!
//! - a real host function, when the module's manifest grants it
//! - a denial stub, when it does not (trapping or warning per policy)
//! - a runtime intrinsic, which needs no grant
//! - another module's export, through a bridge that resolves the peer on
//!   every call
//!
//! The probe phase uses [`CapabilityGate::inert_table`], where every
//! function is a stub that returns zeros.

pub mod context;
pub mod error;
pub mod gate;
pub mod peer;
pub mod table;

pub use context::{caller_memory, copy_fat_ptr, with_marshaller};
pub use error::{CapabilityDenied, GateError, GateResult, HostTrap};
pub use gate::{CapabilityGate, DeniedCallback, LinkContext, MEM_ALLOC};
pub use peer::{LiveInstance, PeerDirectory};
pub use table::ImportTable;
