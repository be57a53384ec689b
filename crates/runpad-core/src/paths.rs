//! On-disk layout of a host session.
//!
//! ```text
//! <build_root>/
//! └── <session name>/   # script.rs, loaded modules, artifact
//!                       # or Cargo.toml, src/, build logs
//! <cache_root>/
//! └── <hash>/           # Cargo.toml, src/lib.rs, target/, restore.log,
//!                       # references.json, .restored
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Directories used by one host session.
#[derive(Debug, Clone)]
pub struct HostDirs {
    /// Build directory of the current session.
    pub build_dir: PathBuf,

    /// Root of the shared restore cache.
    pub cache_root: PathBuf,
}

impl HostDirs {
    /// Layout for session `name`. Creates the directories.
    ///
    /// # Errors
    /// Returns an error if directory creation fails.
    pub fn new(build_root: &Path, cache_root: &Path, name: &str) -> Result<Self> {
        let dirs = Self::layout(build_root, cache_root, name);
        fs::create_dir_all(&dirs.build_dir)?;
        fs::create_dir_all(&dirs.cache_root)?;
        Ok(dirs)
    }

    /// Layout for session `name` without touching the disk.
    pub fn layout(build_root: &Path, cache_root: &Path, name: &str) -> Self {
        Self {
            build_dir: build_root.join(sanitize_name(name)),
            cache_root: cache_root.to_path_buf(),
        }
    }

    /// Remove everything in the build directory and recreate it.
    pub fn clean_build(&self) -> Result<()> {
        if self.build_dir.exists() {
            fs::remove_dir_all(&self.build_dir)?;
        }
        fs::create_dir_all(&self.build_dir)?;
        Ok(())
    }

    /// Directory of the restore cache entry `hash`.
    pub fn cache_entry(&self, hash: &str) -> PathBuf {
        self.cache_root.join(hash)
    }
}

/// Make a session name safe as a single path component.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        "session".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_creates_dirs() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let dirs = HostDirs::new(&temp.path().join("build"), &temp.path().join("cache"), "demo")
            .expect("Failed to create dirs");

        assert!(dirs.build_dir.ends_with("build/demo"));
        assert!(dirs.build_dir.exists());
        assert!(dirs.cache_root.exists());
        assert_eq!(dirs.cache_entry("abc"), temp.path().join("cache").join("abc"));
    }

    #[test]
    fn test_clean_build() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let dirs = HostDirs::new(&temp.path().join("build"), &temp.path().join("cache"), "demo")
            .expect("Failed to create dirs");

        let stale = dirs.build_dir.join("script.rs");
        fs::write(&stale, "fn main() {}").expect("Failed to write test file");
        let cached = dirs.cache_entry("h");
        fs::create_dir_all(&cached).unwrap();

        dirs.clean_build().expect("Failed to clean");
        assert!(!stale.exists());
        assert!(dirs.build_dir.exists());
        assert!(cached.exists());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("My Query #1"), "My_Query__1");
        assert_eq!(sanitize_name("../../etc"), "______etc");
        assert_eq!(sanitize_name(""), "session");
        assert_eq!(sanitize_name("///"), "session");
    }
}
