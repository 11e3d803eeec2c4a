//! Covenant ABI
//!
//! Everything needed to move values across the host/guest boundary:
//!
//! - [`FatPtr`]: `(offset << 32) | len` references into one instance's memory
//! - [`Arena`]: the per-instance bump allocator behind host writes and `mem.alloc`
//! - [`GuestMemory`]: bounds-checked access to linear memory
//! - [`Marshaller`]: string, collection and map layouts
//! - [`Signature`] / [`AbiValue`]: how host function types lower to wasm
//!
//! # Example
//!
//! ```
//! use covenant_abi::{Arena, Marshaller, VecMemory};
//!
//! let mut memory = VecMemory::default();
//! let mut arena = Arena::new(1024);
//! let mut m = Marshaller::new(&mut memory, &mut arena);
//!
//! let fp = m.write_collection(&["a", "b"]).unwrap();
//! assert_eq!(m.read_collection(fp).unwrap(), vec!["a", "b"]);
//! ```

pub mod arena;
pub mod error;
pub mod fatptr;
pub mod marshal;
pub mod memory;
pub mod value;

pub use arena::{ARENA_ALIGN, Arena, DEFAULT_ARENA_BASE, SharedArena, shared_arena};
pub use error::{AbiError, AbiResult};
pub use fatptr::{FatPtr, pack_fat_ptr, unpack_fat_ptr};
pub use marshal::Marshaller;
pub use memory::{GuestMemory, VecMemory, WASM_PAGE_SIZE, WasmMemory};
pub use value::{
    AbiType, AbiValue, Signature, lift_params, lift_result, lower_params, lower_result, read_indirect,
    write_indirect, zero_val,
};
