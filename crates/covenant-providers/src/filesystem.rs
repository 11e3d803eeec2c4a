//! Filesystem access: `fs.*`.
//!
//! Guest paths are always relative to a root chosen by the host. Absolute
//! guest paths are re-rooted and `..` components are refused outright.
//! Symlinks are followed only when their target is still under the root.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use covenant_abi::AbiValue;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HostCallError, HostCallResult};
use crate::function::{Args, FunctionKind, HostFunctionTable, host_functions};

/// Metadata reported by `fs.stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Size in bytes.
    pub size: u64,
    /// True for directories.
    pub is_dir: bool,
    /// True for regular files.
    pub is_file: bool,
    /// True when the file cannot be written.
    pub readonly: bool,
}

impl FileStat {
    fn into_pairs(self) -> Vec<(String, String)> {
        vec![
            ("size".into(), self.size.to_string()),
            ("is_dir".into(), self.is_dir.to_string()),
            ("is_file".into(), self.is_file.to_string()),
            ("readonly".into(), self.readonly.to_string()),
        ]
    }
}

/// Filesystem operations available to guests.
pub trait Filesystem: Send + Sync {
    /// Read a file as UTF-8.
    fn read(&self, path: &str) -> HostCallResult<String>;
    /// Create or truncate a file.
    fn write(&self, path: &str, contents: &str) -> HostCallResult<()>;
    /// Remove a file.
    fn remove_file(&self, path: &str) -> HostCallResult<()>;
    /// Remove a file or a directory tree.
    fn remove_all(&self, path: &str) -> HostCallResult<()>;
    /// Check whether a path exists.
    fn exists(&self, path: &str) -> HostCallResult<bool>;
    /// List entry names in a directory, sorted.
    fn read_dir(&self, path: &str) -> HostCallResult<Vec<String>>;
    /// Create a directory and any missing parents.
    fn create_dir(&self, path: &str) -> HostCallResult<()>;
    /// Remove an empty directory.
    fn remove_dir(&self, path: &str) -> HostCallResult<()>;
    /// Rename or move a path.
    fn rename(&self, from: &str, to: &str) -> HostCallResult<()>;
    /// Read metadata.
    fn stat(&self, path: &str) -> HostCallResult<FileStat>;
    /// Copy a file, returning the number of bytes copied.
    fn copy(&self, from: &str, to: &str) -> HostCallResult<u64>;
}

/// What a scoped filesystem lets guests do under its root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsAccess {
    /// Allow reads, listing and metadata.
    pub read: bool,
    /// Allow creating and writing files and directories.
    pub write: bool,
    /// Allow removing files and directories.
    pub delete: bool,
}

impl FsAccess {
    /// Read, list and stat only.
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            delete: false,
        }
    }

    /// Read and write, but not delete.
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            delete: false,
        }
    }

    /// Everything.
    pub fn full() -> Self {
        Self {
            read: true,
            write: true,
            delete: true,
        }
    }
}

/// A filesystem confined to one directory.
#[derive(Debug, Clone)]
pub struct ScopedFilesystem {
    root: PathBuf,
    access: FsAccess,
}

impl ScopedFilesystem {
    /// Confine guests to `root` with the given access.
    ///
    /// An existing root is canonicalized here, once.
    pub fn new(root: impl Into<PathBuf>, access: FsAccess) -> Self {
        let root = root.into();
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        Self { root, access }
    }

    /// Read-only access under `root`.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self::new(root, FsAccess::read_only())
    }

    /// Full access under `root`.
    pub fn full(root: impl Into<PathBuf>) -> Self {
        Self::new(root, FsAccess::full())
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a guest path onto the host filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`HostCallError::AccessDenied`] for paths containing `..`
    /// and for paths that reach outside the root through a symlink.
    pub fn resolve(&self, path: &str) -> HostCallResult<PathBuf> {
        let mut lexical = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => lexical.push(part),
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => return Err(escapes(path)),
            }
        }
        self.confine(lexical, path)
    }

    /// Canonicalize the deepest existing ancestor of `lexical` and check it
    /// is still under the root. The missing tail is appended unchanged.
    fn confine(&self, lexical: PathBuf, path: &str) -> HostCallResult<PathBuf> {
        let existing = lexical
            .ancestors()
            .take_while(|a| a.starts_with(&self.root))
            .find(|a| a.symlink_metadata().is_ok())
            .map(Path::to_path_buf);

        // Nothing under a missing root can be a link.
        let Some(existing) = existing else {
            return Ok(lexical);
        };

        // Dangling links fail here.
        let canonical = std::fs::canonicalize(&existing).map_err(|_| escapes(path))?;
        if !canonical.starts_with(&self.root) {
            return Err(escapes(path));
        }

        match lexical.strip_prefix(&existing) {
            Ok(rest) if rest.as_os_str().is_empty() => Ok(canonical),
            Ok(rest) => Ok(canonical.join(rest)),
            Err(_) => Err(escapes(path)),
        }
    }

    fn check(&self, allowed: bool, op: &str, path: &str) -> HostCallResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(HostCallError::AccessDenied(format!("{op} not permitted: {path}")))
        }
    }

    fn readable(&self, path: &str) -> HostCallResult<PathBuf> {
        self.check(self.access.read, "read", path)?;
        self.resolve(path)
    }

    fn writable(&self, path: &str) -> HostCallResult<PathBuf> {
        self.check(self.access.write, "write", path)?;
        self.resolve(path)
    }

    fn deletable(&self, path: &str) -> HostCallResult<PathBuf> {
        self.check(self.access.delete, "delete", path)?;
        let resolved = self.resolve(path)?;
        if resolved == self.root {
            return Err(HostCallError::AccessDenied(
                "cannot remove the filesystem root".into(),
            ));
        }
        Ok(resolved)
    }
}

impl Filesystem for ScopedFilesystem {
    fn read(&self, path: &str) -> HostCallResult<String> {
        Ok(std::fs::read_to_string(self.readable(path)?)?)
    }

    fn write(&self, path: &str, contents: &str) -> HostCallResult<()> {
        let target = self.writable(path)?;
        debug!(path = %target.display(), bytes = contents.len(), "Guest file write");
        Ok(std::fs::write(target, contents)?)
    }

    fn remove_file(&self, path: &str) -> HostCallResult<()> {
        Ok(std::fs::remove_file(self.deletable(path)?)?)
    }

    fn remove_all(&self, path: &str) -> HostCallResult<()> {
        let target = self.deletable(path)?;
        if target.is_dir() {
            std::fs::remove_dir_all(target)?;
        } else {
            std::fs::remove_file(target)?;
        }
        Ok(())
    }

    fn exists(&self, path: &str) -> HostCallResult<bool> {
        Ok(self.readable(path)?.exists())
    }

    fn read_dir(&self, path: &str) -> HostCallResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.readable(path)?)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn create_dir(&self, path: &str) -> HostCallResult<()> {
        Ok(std::fs::create_dir_all(self.writable(path)?)?)
    }

    fn remove_dir(&self, path: &str) -> HostCallResult<()> {
        Ok(std::fs::remove_dir(self.deletable(path)?)?)
    }

    fn rename(&self, from: &str, to: &str) -> HostCallResult<()> {
        let source = self.deletable(from)?;
        let target = self.writable(to)?;
        Ok(std::fs::rename(source, target)?)
    }

    fn stat(&self, path: &str) -> HostCallResult<FileStat> {
        let meta = std::fs::metadata(self.readable(path)?)?;
        Ok(FileStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            readonly: meta.permissions().readonly(),
        })
    }

    fn copy(&self, from: &str, to: &str) -> HostCallResult<u64> {
        let source = self.readable(from)?;
        let target = self.writable(to)?;
        Ok(std::fs::copy(source, target)?)
    }
}

fn escapes(path: &str) -> HostCallError {
    HostCallError::AccessDenied(format!("path escapes filesystem root: {path}"))
}

/// A filesystem that refuses every operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFilesystem;

impl NoFilesystem {
    fn refuse<T>(&self) -> HostCallResult<T> {
        Err(HostCallError::Unavailable(
            "no filesystem is configured for this host".into(),
        ))
    }
}

impl Filesystem for NoFilesystem {
    fn read(&self, _: &str) -> HostCallResult<String> {
        self.refuse()
    }
    fn write(&self, _: &str, _: &str) -> HostCallResult<()> {
        self.refuse()
    }
    fn remove_file(&self, _: &str) -> HostCallResult<()> {
        self.refuse()
    }
    fn remove_all(&self, _: &str) -> HostCallResult<()> {
        self.refuse()
    }
    fn exists(&self, _: &str) -> HostCallResult<bool> {
        self.refuse()
    }
    fn read_dir(&self, _: &str) -> HostCallResult<Vec<String>> {
        self.refuse()
    }
    fn create_dir(&self, _: &str) -> HostCallResult<()> {
        self.refuse()
    }
    fn remove_dir(&self, _: &str) -> HostCallResult<()> {
        self.refuse()
    }
    fn rename(&self, _: &str, _: &str) -> HostCallResult<()> {
        self.refuse()
    }
    fn stat(&self, _: &str) -> HostCallResult<FileStat> {
        self.refuse()
    }
    fn copy(&self, _: &str, _: &str) -> HostCallResult<u64> {
        self.refuse()
    }
}

pub(crate) fn register(table: &mut HostFunctionTable, fs: Arc<dyn Filesystem>) {
    host_functions!(table, FunctionKind::Effect, "fs", with fs, {
        "read" => (Str) -> Str, move |a| Ok(AbiValue::Str(fs.read(a.str(0)?)?));
        "write" => (Str, Str) -> Unit, move |a| {
            fs.write(a.str(0)?, a.str(1)?)?;
            Ok(AbiValue::Unit)
        };
        "delete" => (Str) -> Unit, move |a| {
            fs.remove_file(a.str(0)?)?;
            Ok(AbiValue::Unit)
        };
        "remove" => (Str) -> Unit, move |a| {
            fs.remove_all(a.str(0)?)?;
            Ok(AbiValue::Unit)
        };
        "exists" => (Str) -> Bool, move |a| Ok(AbiValue::Bool(fs.exists(a.str(0)?)?));
        "read_dir" => (Str) -> List, move |a| Ok(AbiValue::List(fs.read_dir(a.str(0)?)?));
        "create_dir" => (Str) -> Unit, move |a| {
            fs.create_dir(a.str(0)?)?;
            Ok(AbiValue::Unit)
        };
        "mkdir" => (Str) -> Unit, move |a| {
            fs.create_dir(a.str(0)?)?;
            Ok(AbiValue::Unit)
        };
        "remove_dir" => (Str) -> Unit, move |a| {
            fs.remove_dir(a.str(0)?)?;
            Ok(AbiValue::Unit)
        };
        "rename" => (Str, Str) -> Unit, move |a| {
            fs.rename(a.str(0)?, a.str(1)?)?;
            Ok(AbiValue::Unit)
        };
        "stat" => (Str) -> Map, move |a| Ok(AbiValue::Map(fs.stat(a.str(0)?)?.into_pairs()));
        "copy" => (Str, Str) -> Int, move |a| {
            let bytes = fs.copy(a.str(0)?, a.str(1)?)?;
            Ok(AbiValue::Int(i64::try_from(bytes).unwrap_or(i64::MAX)))
        };
    });
}
