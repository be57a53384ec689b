//! Host configuration.

use std::collections::BTreeSet;
use std::path::PathBuf;

/// Overrides the restore cache root.
pub const CACHE_DIR_ENV: &str = "RUNPAD_CACHE_DIR";

/// Overrides the build root.
pub const BUILD_DIR_ENV: &str = "RUNPAD_BUILD_DIR";

/// Set to `1` or `true` to fail restores on invalid file references.
pub const STRICT_FILE_REFS_ENV: &str = "RUNPAD_STRICT_FILE_REFS";

/// Set to `1` or `true` to run the build tool without network access.
pub const OFFLINE_ENV: &str = "RUNPAD_OFFLINE";

/// Configuration for an execution host.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Root of the content-addressed restore cache.
    pub cache_root: PathBuf,

    /// Root under which each session gets its build directory.
    pub build_root: PathBuf,

    /// Paths imported into every snippet (`use <path>;`).
    pub imports: Vec<String>,

    /// Diagnostic codes (rustc codes or lint names) never reported.
    pub disabled_codes: BTreeSet<String>,

    /// Fail the restore when a file reference is relative or missing,
    /// instead of dropping it with a warning.
    pub strict_file_references: bool,

    /// Share the restore cache target directory with program builds.
    pub cache_program_builds: bool,

    /// Optimization level for script (in-process) compilation.
    pub opt_level: u8,

    /// Restore and build from already-downloaded crates only.
    pub offline: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        let cache_root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("runpad")
            .join("restore");
        Self {
            cache_root,
            build_root: std::env::temp_dir().join("runpad").join("build"),
            imports: Vec::new(),
            disabled_codes: BTreeSet::new(),
            strict_file_references: false,
            cache_program_builds: true,
            opt_level: 0,
            offline: false,
        }
    }
}

impl HostConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            config.cache_root = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var(BUILD_DIR_ENV) {
            config.build_root = PathBuf::from(dir);
        }
        if let Ok(value) = std::env::var(STRICT_FILE_REFS_ENV) {
            config.strict_file_references = is_truthy(&value);
        }
        if let Ok(value) = std::env::var(OFFLINE_ENV) {
            config.offline = is_truthy(&value);
        }
        config
    }

    /// Keep both roots under one directory (handy for tests and sandboxes).
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            cache_root: root.join("cache"),
            build_root: root.join("build"),
            ..Self::default()
        }
    }

    pub fn with_imports<I, S>(mut self, imports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.imports = imports.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_disabled_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_strict_file_references(mut self, strict: bool) -> Self {
        self.strict_file_references = strict;
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_cache_program_builds(mut self, enabled: bool) -> Self {
        self.cache_program_builds = enabled;
        self
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rooted_at() {
        let config = HostConfig::rooted_at("/work/.runpad")
            .with_imports(["std::collections::HashMap"])
            .with_disabled_codes(["dead_code"]);
        assert_eq!(config.cache_root, PathBuf::from("/work/.runpad/cache"));
        assert_eq!(config.build_root, PathBuf::from("/work/.runpad/build"));
        assert_eq!(config.imports, vec!["std::collections::HashMap".to_string()]);
        assert!(config.disabled_codes.contains("dead_code"));
        assert!(!config.strict_file_references);
        assert!(!config.offline);
        assert!(HostConfig::rooted_at("/w").with_offline(true).offline);
    }

    #[test]
    fn test_default_roots_are_distinct() {
        let config = HostConfig::default();
        assert_ne!(config.cache_root, config.build_root);
        assert!(config.cache_root.ends_with("runpad/restore"));
    }
}
