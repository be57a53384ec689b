//! Content-addressed restore cache.
//!
//! Each distinct (descriptor, platform, host version) triple maps to one
//! directory under the cache root, named by the hex blake3 hash of the
//! triple. An entry is valid only once its zero-byte marker exists; the
//! marker is written strictly after the reference record, so an
//! interrupted restore is simply a cache miss next time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cancel::Ticket;
use crate::compile::build_tool::{BuildTool, RestoreInvocation};
use crate::compile::diagnostics::{Diagnostic, parse_build_log, truncate};
use crate::error::{Error, Result};
use crate::platform::ExecutionPlatform;

use super::descriptor::ProjectDescriptor;
use super::references::{ResolvedReferences, parse_artifacts};

/// Marks a completed entry. Only its existence matters.
pub const MARKER_FILE: &str = ".restored";

/// Serialized [`ResolvedReferences`] of an entry.
pub const RECORD_FILE: &str = "references.json";

/// Standard error of the restore run.
pub const RESTORE_LOG: &str = "restore.log";

/// Location and state of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCacheEntry {
    pub hash: String,
    pub directory: PathBuf,
    pub marker_present: bool,
}

impl BuildCacheEntry {
    pub fn marker_path(&self) -> PathBuf {
        self.directory.join(MARKER_FILE)
    }

    pub fn record_path(&self) -> PathBuf {
        self.directory.join(RECORD_FILE)
    }

    pub fn target_dir(&self) -> PathBuf {
        self.directory.join("target")
    }
}

/// Outcome of a successful resolve.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// `None` when the set needed no restore at all.
    pub entry: Option<BuildCacheEntry>,
    pub references: ResolvedReferences,
    pub cache_hit: bool,
}

/// Cache key for a descriptor on a platform and host version.
pub fn cache_key(
    descriptor: &ProjectDescriptor,
    platform: &ExecutionPlatform,
    host_version: &str,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(descriptor.serialized().as_bytes());
    hasher.update(&[0]);
    hasher.update(platform.description.as_bytes());
    hasher.update(&[0]);
    hasher.update(host_version.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Resolves library sets through a [`BuildTool`], caching results on disk.
#[derive(Clone)]
pub struct RestoreCache {
    root: PathBuf,
    tool: Arc<dyn BuildTool>,
}

impl RestoreCache {
    pub fn new(root: impl Into<PathBuf>, tool: Arc<dyn BuildTool>) -> Self {
        Self {
            root: root.into(),
            tool,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Inspect the entry for `hash` without modifying it.
    pub fn entry(&self, hash: &str) -> BuildCacheEntry {
        let directory = self.root.join(hash);
        let marker_present = directory.join(MARKER_FILE).exists();
        BuildCacheEntry {
            hash: hash.to_string(),
            directory,
            marker_present,
        }
    }

    /// Resolve `descriptor` for `platform`.
    ///
    /// Cancellation via `ticket` is honored until the tool finishes; the
    /// record and marker writes that follow always complete.
    pub async fn resolve(
        &self,
        descriptor: &ProjectDescriptor,
        platform: &ExecutionPlatform,
        host_version: &str,
        ticket: &Ticket,
    ) -> Result<Resolution> {
        ticket.check()?;

        if !descriptor.needs_restore {
            tracing::debug!("library set needs no restore");
            return Ok(Resolution {
                entry: None,
                references: ResolvedReferences::default(),
                cache_hit: false,
            });
        }

        let hash = cache_key(descriptor, platform, host_version);
        let mut entry = self.entry(&hash);

        if entry.marker_present {
            match read_record(&entry.record_path()).await {
                Ok(references) => {
                    tracing::debug!(%hash, "restore cache hit");
                    return Ok(Resolution {
                        entry: Some(entry),
                        references,
                        cache_hit: true,
                    });
                }
                Err(e) => {
                    tracing::warn!(%hash, "Discarding unreadable restore record: {}", e);
                    let _ = tokio::fs::remove_file(entry.marker_path()).await;
                    entry.marker_present = false;
                }
            }
        }

        tracing::info!("Restoring {} for {}", hash_prefix(&hash), platform);

        tokio::fs::create_dir_all(entry.directory.join("src")).await?;
        tokio::fs::write(entry.directory.join("Cargo.toml"), &descriptor.manifest).await?;
        tokio::fs::write(entry.directory.join("src").join("lib.rs"), &descriptor.lib_source)
            .await?;

        let invocation = RestoreInvocation {
            project_dir: entry.directory.clone(),
            target_dir: entry.target_dir(),
            target: platform.moniker.clone(),
            log_file: entry.directory.join(RESTORE_LOG),
        };

        ticket.check()?;
        let output = tokio::select! {
            biased;
            _ = ticket.cancelled() => return Err(Error::Cancelled),
            output = self.tool.restore(&invocation) => output?,
        };

        if !output.success() {
            let log = tokio::fs::read_to_string(&invocation.log_file)
                .await
                .unwrap_or_default();
            let errors = restore_errors(&log, &output.stderr, output.exit_code);
            tracing::info!(%hash, "restore failed with {} error(s)", errors.len());
            return Err(Error::Restore(errors));
        }

        let references = parse_artifacts(&output.stdout);

        // Record first, marker last.
        write_record(&entry.directory, &references).await?;
        tokio::fs::write(entry.marker_path(), b"").await?;
        entry.marker_present = true;

        tracing::info!(
            %hash,
            references = references.references.len(),
            analyzers = references.analyzers.len(),
            "restore complete"
        );

        Ok(Resolution {
            entry: Some(entry),
            references,
            cache_hit: false,
        })
    }
}

/// Errors from a failed restore: structured log lines if any, else the raw
/// standard error as a single error.
pub fn restore_errors(log: &str, stderr: &str, exit_code: i32) -> Vec<Diagnostic> {
    let structured: Vec<_> = parse_build_log(log)
        .into_iter()
        .filter(Diagnostic::is_error)
        .collect();
    if !structured.is_empty() {
        return structured;
    }

    let raw = stderr.trim();
    let message = if raw.is_empty() {
        format!("restore failed with exit code {exit_code}")
    } else {
        raw.to_string()
    };
    vec![Diagnostic::error(message).with_code("restore")]
}

async fn read_record(path: &Path) -> Result<ResolvedReferences> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write the record via a unique temp file and rename.
async fn write_record(dir: &Path, references: &ResolvedReferences) -> Result<()> {
    let json = serde_json::to_vec_pretty(references)?;
    let tmp = dir.join(format!("{RECORD_FILE}.{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, &json).await?;
    if let Err(e) = tokio::fs::rename(&tmp, dir.join(RECORD_FILE)).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

fn hash_prefix(hash: &str) -> &str {
    truncate(hash, 12)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{LibraryRef, LibrarySet};
    use crate::restore::descriptor::build_descriptor;

    fn descriptor(libs: &[LibraryRef]) -> ProjectDescriptor {
        let set: LibrarySet = libs.iter().cloned().collect();
        build_descriptor(&set, "x86_64-unknown-linux-gnu", &[])
    }

    #[test]
    fn test_cache_key_is_stable_and_sensitive() {
        let platform = ExecutionPlatform::for_target("x86_64-unknown-linux-gnu", None);
        let d = descriptor(&[LibraryRef::package("serde", "1.0")]);

        let a = cache_key(&d, &platform, "0.1.0");
        let b = cache_key(&d, &platform, "0.1.0");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        assert_ne!(a, cache_key(&d, &platform, "0.2.0"));
        let other = ExecutionPlatform::for_target("aarch64-unknown-linux-gnu", None);
        assert_ne!(a, cache_key(&d, &other, "0.1.0"));
    }

    #[test]
    fn test_restore_errors_prefers_structured_lines() {
        let log = "    Updating crates.io index\nsrc/lib.rs:2:1: error[E0463]: can't find crate for `nope`\n";
        let errors = restore_errors(log, "irrelevant", 101);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code.as_deref(), Some("E0463"));
        assert_eq!(errors[0].line, Some(2));
    }

    #[test]
    fn test_restore_errors_falls_back_to_stderr() {
        let stderr = "error: no matching package named `nope` found\n";
        let errors = restore_errors("nothing structured", stderr, 101);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "error: no matching package named `nope` found");

        let errors = restore_errors("", "", 3);
        assert!(errors[0].message.contains("exit code 3"));
    }
}
