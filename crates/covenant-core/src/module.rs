//! Guest module compilation.
//!
//! A module is compiled once and the resulting [`CompiledModule`] is reused
//! for both the probe instantiation and the real one. The import and export
//! lists are captured at compile time so the gate and the CLI can plan
//! bindings without touching wasmtime types.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};
use wasmtime::{ExternType, Module};

use crate::engine::CovenantEngine;
use crate::error::{ModuleError, ModuleResult};

/// Name of the linear memory export every guest must provide.
pub const MEMORY_EXPORT: &str = "memory";

/// What an import or export refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternKind {
    /// A function, with its arity.
    Function {
        /// Number of parameters.
        params: usize,
        /// Number of results.
        results: usize,
    },
    /// A linear memory.
    Memory,
    /// A global.
    Global,
    /// A table.
    Table,
    /// Anything else the engine reports.
    Other,
}

impl ExternKind {
    fn of(ty: ExternType) -> Self {
        match ty {
            ExternType::Func(func) => Self::Function {
                params: func.params().len(),
                results: func.results().len(),
            },
            ExternType::Memory(_) => Self::Memory,
            ExternType::Global(_) => Self::Global,
            ExternType::Table(_) => Self::Table,
            #[allow(unreachable_patterns)]
            _ => Self::Other,
        }
    }

    /// True for functions.
    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function { .. })
    }

    /// `"N params -> M results"` for functions.
    pub fn arity(&self) -> Option<String> {
        match self {
            Self::Function { params, results } => {
                Some(format!("{params} params -> {results} results"))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ExternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Function { .. } => "function",
            Self::Memory => "memory",
            Self::Global => "global",
            Self::Table => "table",
            Self::Other => "other",
        })
    }
}

/// An item the module exports.
#[derive(Debug, Clone)]
pub struct ExportInfo {
    /// Export name.
    pub name: String,
    /// What is exported.
    pub kind: ExternKind,
}

/// An item the module imports.
#[derive(Debug, Clone)]
pub struct ImportInfo {
    /// Import namespace.
    pub module: String,
    /// Import name.
    pub name: String,
    /// What is imported.
    pub kind: ExternKind,
}

impl ImportInfo {
    /// The fully-qualified `namespace.function` identifier.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }
}

/// A compiled WebAssembly module ready for instantiation.
#[derive(Clone)]
pub struct CompiledModule {
    inner: Module,
    exports: Vec<ExportInfo>,
    imports: Vec<ImportInfo>,
}

impl CompiledModule {
    fn new(inner: Module) -> Self {
        let exports = inner
            .exports()
            .map(|export| ExportInfo {
                name: export.name().to_string(),
                kind: ExternKind::of(export.ty()),
            })
            .collect();
        let imports = inner
            .imports()
            .map(|import| ImportInfo {
                module: import.module().to_string(),
                name: import.name().to_string(),
                kind: ExternKind::of(import.ty()),
            })
            .collect();

        Self {
            inner,
            exports,
            imports,
        }
    }

    /// The underlying Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }

    /// Exports, in declaration order.
    pub fn exports(&self) -> &[ExportInfo] {
        &self.exports
    }

    /// Imports, in declaration order.
    pub fn imports(&self) -> &[ImportInfo] {
        &self.imports
    }

    /// Names of the exported functions.
    pub fn function_exports(&self) -> impl Iterator<Item = &str> {
        self.exports
            .iter()
            .filter(|e| e.kind.is_function())
            .map(|e| e.name.as_str())
    }

    /// Check if the module has a specific export.
    pub fn has_export(&self, name: &str) -> bool {
        self.exports.iter().any(|e| e.name == name)
    }

    /// Check if the module exports its linear memory under [`MEMORY_EXPORT`].
    pub fn exports_memory(&self) -> bool {
        self.exports
            .iter()
            .any(|e| e.name == MEMORY_EXPORT && e.kind == ExternKind::Memory)
    }
}

impl fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledModule")
            .field("exports", &self.exports.len())
            .field("imports", &self.imports.len())
            .finish()
    }
}

/// Compiles guest modules against a shared engine.
pub struct ModuleLoader {
    engine: Arc<CovenantEngine>,
}

impl ModuleLoader {
    /// Create a loader for `engine`.
    pub fn new(engine: Arc<CovenantEngine>) -> Self {
        Self { engine }
    }

    /// Compile a module from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Compile`] if the bytes are not a valid module.
    pub fn load_bytes(&self, bytes: &[u8]) -> ModuleResult<CompiledModule> {
        let module = Module::new(self.engine.inner(), bytes).map_err(ModuleError::Compile)?;
        let module = CompiledModule::new(module);

        info!(
            size = bytes.len(),
            exports = module.exports.len(),
            imports = module.imports.len(),
            "Compiled WASM module"
        );
        Ok(module)
    }

    /// Compile a module from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not compile.
    pub fn load_file(&self, path: &Path) -> ModuleResult<CompiledModule> {
        debug!(path = %path.display(), "Compiling WASM module from file");
        let bytes = std::fs::read(path)?;
        self.load_bytes(&bytes)
    }

    /// Compile a module from WAT.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Invalid`] if the text does not parse.
    pub fn load_wat(&self, wat: &str) -> ModuleResult<CompiledModule> {
        let wasm = wat::parse_str(wat).map_err(|e| ModuleError::Invalid(e.to_string()))?;
        self.load_bytes(&wasm)
    }
}
