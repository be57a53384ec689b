//! Library references requested by a snippet.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One external library a snippet depends on.
///
/// Ordering is structural, so a [`LibrarySet`] iterates in the same order
/// no matter how it was filled.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LibraryRef {
    /// A registry crate, e.g. `serde` with requirement `1.0`.
    Package { id: String, version_req: String },

    /// A crate shipped with the toolchain sysroot (`alloc`, `proc_macro`, ...).
    Framework { name: String },

    /// A local crate directory, used as a path dependency.
    File { path: PathBuf },
}

/// Ordered, de-duplicated set of library references.
pub type LibrarySet = BTreeSet<LibraryRef>;

impl LibraryRef {
    pub fn package(id: impl Into<String>, version_req: impl Into<String>) -> Self {
        LibraryRef::Package {
            id: id.into(),
            version_req: version_req.into(),
        }
    }

    pub fn framework(name: impl Into<String>) -> Self {
        LibraryRef::Framework { name: name.into() }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        LibraryRef::File { path: path.into() }
    }

    /// Name the crate is imported under (`extern crate` / `--extern` name).
    pub fn crate_name(&self) -> String {
        match self {
            LibraryRef::Package { id, .. } => id.replace('-', "_"),
            LibraryRef::Framework { name } => name.clone(),
            LibraryRef::File { path } => file_crate_name(path),
        }
    }

    /// Whether resolving this reference needs the external build tool.
    pub fn needs_restore(&self) -> bool {
        !matches!(self, LibraryRef::Framework { .. })
    }

    /// Check the invariants of a file reference: absolute and existing.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            LibraryRef::File { path } if !path.is_absolute() => Err(format!(
                "file reference '{}' must be an absolute path",
                path.display()
            )),
            LibraryRef::File { path } if !path.exists() => Err(format!(
                "file reference '{}' does not exist",
                path.display()
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for LibraryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryRef::Package { id, version_req } if version_req.is_empty() => {
                write!(f, "crate {id}")
            }
            LibraryRef::Package { id, version_req } => write!(f, "crate {id} {version_req}"),
            LibraryRef::Framework { name } => write!(f, "framework {name}"),
            LibraryRef::File { path } => write!(f, "file {}", path.display()),
        }
    }
}

/// Crate directory of a file reference: the path itself, or a `.rs` file's
/// parent.
pub fn file_crate_dir(path: &Path) -> &Path {
    if path.extension().is_some_and(|e| e == "rs") {
        path.parent().unwrap_or(path)
    } else {
        path
    }
}

/// Package name of a local crate, taken from its directory name.
pub fn file_package_name(path: &Path) -> String {
    file_crate_dir(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "local".to_string())
}

/// Crate name scripts use for a local crate.
pub fn file_crate_name(path: &Path) -> String {
    file_package_name(path).replace('-', "_")
}
