//! Guest memory access from inside a host call.

use covenant_abi::{AbiResult, FatPtr, GuestMemory, Marshaller, SharedArena, WasmMemory};
use covenant_core::{MEMORY_EXPORT, StoreData};
use wasmtime::{AsContextMut, Caller, Extern, Memory};

/// The calling instance's exported memory, if it has one.
pub fn caller_memory(caller: &mut Caller<'_, StoreData>) -> Option<Memory> {
    caller.get_export(MEMORY_EXPORT).and_then(Extern::into_memory)
}

/// Run `f` with a marshaller over the caller's memory and `arena`.
///
/// Without a memory export the marshaller is detached: reads yield empty
/// values and writes yield null pointers.
pub fn with_marshaller<R>(
    caller: &mut Caller<'_, StoreData>,
    arena: &SharedArena,
    f: impl FnOnce(&mut Marshaller<'_>) -> AbiResult<R>,
) -> AbiResult<R> {
    let memory = caller_memory(caller);
    let mut arena = arena.lock();

    match memory {
        Some(memory) => {
            let mut view = WasmMemory::new(memory, &mut *caller);
            let mut m = Marshaller::new(&mut view, &mut arena);
            f(&mut m)
        }
        None => {
            let mut m = Marshaller::detached(&mut arena);
            f(&mut m)
        }
    }
}

/// Copy the bytes `fp` covers from one memory into another memory's arena.
///
/// Null pointers stay null. Both memories must belong to `store`.
pub fn copy_fat_ptr(
    mut store: impl AsContextMut,
    from: Memory,
    to: Memory,
    to_arena: &SharedArena,
    fp: FatPtr,
) -> AbiResult<FatPtr> {
    if fp.is_empty() {
        return Ok(FatPtr::NULL);
    }

    let bytes = WasmMemory::new(from, &mut store).read(fp.ptr as usize, fp.len as usize)?;

    let mut arena = to_arena.lock();
    let mut view = WasmMemory::new(to, &mut store);
    Marshaller::new(&mut view, &mut arena).write_bytes(&bytes)
}
