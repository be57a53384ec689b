//! Dependency restore: descriptor generation and the on-disk cache.

pub mod cache;
pub mod descriptor;
pub mod references;

pub use cache::{BuildCacheEntry, RestoreCache, Resolution, cache_key};
pub use descriptor::{ProjectDescriptor, build_descriptor};
pub use references::{ResolvedReference, ResolvedReferences};

use crate::compile::Diagnostic;
use crate::error::{Error, Result};
use crate::library::LibrarySet;

/// Check file references before a restore.
///
/// Invalid entries fail the restore when `strict`; otherwise they are
/// dropped and reported as warnings.
pub fn validate_libraries(
    libraries: &LibrarySet,
    strict: bool,
) -> Result<(LibrarySet, Vec<Diagnostic>)> {
    let mut valid = LibrarySet::new();
    let mut problems = Vec::new();

    for lib in libraries {
        match lib.validate() {
            Ok(()) => {
                valid.insert(lib.clone());
            }
            Err(message) if strict => {
                problems.push(Diagnostic::error(message).with_code("reference"));
            }
            Err(message) => {
                tracing::warn!("Dropping library reference: {}", message);
                problems.push(Diagnostic::warning(message).with_code("reference"));
            }
        }
    }

    if strict && !problems.is_empty() {
        return Err(Error::Restore(problems));
    }
    Ok((valid, problems))
}
