//! Typed references to loaded modules.

/// A reference to one generation of a loaded module.
///
/// Handles are cheap to clone and hold no instance. Every call through a
/// handle is checked against the registry, so a handle fetched before a
/// swap fails with [`HostError::StaleHandle`](crate::HostError::StaleHandle)
/// instead of silently reaching the new instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleHandle {
    name: String,
    generation: u64,
}

impl ModuleHandle {
    pub(crate) fn new(name: impl Into<String>, generation: u64) -> Self {
        Self {
            name: name.into(),
            generation,
        }
    }

    /// Registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generation of the instance this handle was issued for.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.generation)
    }
}
