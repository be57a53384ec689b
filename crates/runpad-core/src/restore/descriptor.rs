//! Project descriptor generation.
//!
//! A descriptor is the stub crate handed to the build tool to resolve a
//! library set: a `Cargo.toml` and a `src/lib.rs`. Its serialized form is
//! the main input of the restore cache key, so generation is pure and
//! deterministic: the same set, target and imports always produce the same
//! bytes.

use std::fmt::Write as _;

use crate::library::{LibraryRef, LibrarySet, file_crate_dir, file_package_name};

/// Package name of the restore stub crate.
pub const RESTORE_PACKAGE: &str = "runpad_restore";

/// Separator between manifest and library source in the serialized form.
const SERIALIZED_SEPARATOR: &str = "\n# ---- src/lib.rs ----\n";

/// Stub project describing a library set for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDescriptor {
    /// Contents of `Cargo.toml`.
    pub manifest: String,

    /// Contents of `src/lib.rs`.
    pub lib_source: String,

    /// Whether any reference needs the build tool.
    pub needs_restore: bool,
}

impl ProjectDescriptor {
    /// Byte-stable serialization used for hashing.
    pub fn serialized(&self) -> String {
        let mut out = String::with_capacity(
            self.manifest.len() + SERIALIZED_SEPARATOR.len() + self.lib_source.len(),
        );
        out.push_str(&self.manifest);
        out.push_str(SERIALIZED_SEPARATOR);
        out.push_str(&self.lib_source);
        out
    }
}

/// Build the restore descriptor for `libraries` on target `moniker`.
pub fn build_descriptor(
    libraries: &LibrarySet,
    moniker: &str,
    imports: &[String],
) -> ProjectDescriptor {
    let config = ManifestConfig {
        name: RESTORE_PACKAGE,
        lib: true,
        standalone_workspace: true,
        ..Default::default()
    };

    let mut manifest = generate_cargo_toml(&config, libraries);

    // Metadata keeps everything that influences the restore in one document.
    let frameworks: Vec<_> = framework_names(libraries).collect();
    manifest.push_str("\n[package.metadata.runpad]\n");
    let _ = writeln!(manifest, "target = {}", toml_string(moniker));
    let _ = writeln!(manifest, "frameworks = {}", toml_array(frameworks.iter().copied()));
    let _ = writeln!(
        manifest,
        "imports = {}",
        toml_array(imports.iter().map(String::as_str))
    );

    let mut lib_source = String::from("#![allow(unused_extern_crates)]\n");
    for name in frameworks {
        let _ = writeln!(lib_source, "extern crate {name};");
    }

    ProjectDescriptor {
        manifest,
        lib_source,
        needs_restore: libraries.iter().any(LibraryRef::needs_restore),
    }
}

/// Names of framework references, in set order.
pub fn framework_names(libraries: &LibrarySet) -> impl Iterator<Item = &str> {
    libraries.iter().filter_map(|lib| match lib {
        LibraryRef::Framework { name } => Some(name.as_str()),
        _ => None,
    })
}

/// Options for the release profile in Cargo.toml.
#[derive(Debug, Clone)]
pub struct ReleaseProfile {
    /// Optimization level (0-3).
    pub opt_level: u8,
    /// Enable Link-Time Optimization.
    pub lto: bool,
    /// Number of codegen units.
    pub codegen_units: u32,
}

impl Default for ReleaseProfile {
    fn default() -> Self {
        Self {
            opt_level: 3,
            lto: false,
            codegen_units: 16,
        }
    }
}

/// Configuration for generating a Cargo manifest.
#[derive(Debug, Clone)]
pub struct ManifestConfig<'a> {
    /// Package name.
    pub name: &'a str,
    /// Package version.
    pub version: &'a str,
    /// Rust edition.
    pub edition: &'a str,
    /// Emit a `[lib]` section.
    pub lib: bool,
    /// Release profile settings.
    pub release_profile: Option<ReleaseProfile>,
    /// Whether to add an empty [workspace] table.
    pub standalone_workspace: bool,
}

impl Default for ManifestConfig<'_> {
    fn default() -> Self {
        Self {
            name: "generated",
            version: "0.1.0",
            edition: "2021",
            lib: false,
            release_profile: None,
            standalone_workspace: false,
        }
    }
}

/// Generate a Cargo.toml manifest with one dependency per package or file
/// reference, in set order. Framework references need no entry.
pub fn generate_cargo_toml(config: &ManifestConfig<'_>, libraries: &LibrarySet) -> String {
    let mut toml = String::new();

    toml.push_str("[package]\n");
    let _ = writeln!(toml, "name = {}", toml_string(config.name));
    let _ = writeln!(toml, "version = {}", toml_string(config.version));
    let _ = writeln!(toml, "edition = {}", toml_string(config.edition));
    toml.push_str("publish = false\n\n");

    if config.lib {
        toml.push_str("[lib]\npath = \"src/lib.rs\"\n\n");
    }

    if let Some(profile) = &config.release_profile {
        toml.push_str("[profile.release]\n");
        let _ = writeln!(toml, "opt-level = {}", profile.opt_level);
        if profile.lto {
            toml.push_str("lto = true\n");
        }
        let _ = writeln!(toml, "codegen-units = {}", profile.codegen_units);
        toml.push('\n');
    }

    toml.push_str("[dependencies]\n");
    for lib in libraries {
        format_dependency(&mut toml, lib);
    }

    // Standalone workspace table (prevents being part of parent workspace)
    if config.standalone_workspace {
        toml.push_str("\n[workspace]\n");
    }

    toml
}

fn format_dependency(toml: &mut String, lib: &LibraryRef) {
    match lib {
        LibraryRef::Package { id, version_req } => {
            let req = if version_req.trim().is_empty() {
                "*"
            } else {
                version_req.trim()
            };
            let _ = writeln!(toml, "{} = {}", toml_key(id), toml_string(req));
        }
        LibraryRef::File { path } => {
            let name = lib.crate_name();
            let package = file_package_name(path);
            let rename = if package == name {
                String::new()
            } else {
                format!("package = {}, ", toml_string(&package))
            };
            let _ = writeln!(
                toml,
                "{} = {{ {}path = {} }}",
                toml_key(&name),
                rename,
                toml_string(&file_crate_dir(path).to_string_lossy())
            );
        }
        LibraryRef::Framework { .. } => {}
    }
}

fn toml_key(key: &str) -> String {
    if !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        key.to_string()
    } else {
        toml_string(key)
    }
}

/// Basic TOML string with escapes.
pub(crate) fn toml_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn toml_array<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let items: Vec<_> = items.map(toml_string).collect();
    format!("[{}]", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: Vec<LibraryRef>) -> LibrarySet {
        items.into_iter().collect()
    }

    #[test]
    fn test_descriptor_is_order_independent() {
        let a = set(vec![
            LibraryRef::package("serde", "1.0"),
            LibraryRef::package("anyhow", "1"),
            LibraryRef::framework("alloc"),
            LibraryRef::file("/libs/geo"),
        ]);
        let b = set(vec![
            LibraryRef::file("/libs/geo"),
            LibraryRef::framework("alloc"),
            LibraryRef::package("anyhow", "1"),
            LibraryRef::package("serde", "1.0"),
        ]);
        let imports = vec!["std::fmt::Write".to_string()];

        let da = build_descriptor(&a, "x86_64-unknown-linux-gnu", &imports);
        let db = build_descriptor(&b, "x86_64-unknown-linux-gnu", &imports);
        assert_eq!(da.serialized(), db.serialized());
    }

    #[test]
    fn test_descriptor_contents() {
        let libs = set(vec![
            LibraryRef::package("serde", "1.0"),
            LibraryRef::package("itertools", ""),
            LibraryRef::framework("alloc"),
            LibraryRef::file("/libs/geo-utils"),
        ]);
        let d = build_descriptor(&libs, "wasm32-wasip1", &[]);

        assert!(d.manifest.contains("name = \"runpad_restore\""));
        assert!(d.manifest.contains("serde = \"1.0\""));
        assert!(d.manifest.contains("itertools = \"*\""));
        assert!(d.manifest.contains(
            "geo_utils = { package = \"geo-utils\", path = \"/libs/geo-utils\" }"
        ));
        assert!(d.manifest.contains("target = \"wasm32-wasip1\""));
        assert!(d.manifest.contains("frameworks = [\"alloc\"]"));
        assert!(d.manifest.contains("[workspace]"));
        assert!(d.lib_source.contains("extern crate alloc;"));
        assert!(d.needs_restore);
    }

    #[test]
    fn test_file_reference_points_at_crate_dir() {
        let libs = set(vec![LibraryRef::file("/libs/geo/lib.rs")]);
        let d = build_descriptor(&libs, "x86_64-unknown-linux-gnu", &[]);

        assert!(d.manifest.contains("geo = { path = \"/libs/geo\" }"));
        assert!(!d.manifest.contains("package ="));
    }

    #[test]
    fn test_inputs_change_serialization() {
        let libs = set(vec![LibraryRef::package("serde", "1.0")]);
        let base = build_descriptor(&libs, "x86_64-unknown-linux-gnu", &[]).serialized();

        let other_target = build_descriptor(&libs, "aarch64-apple-darwin", &[]).serialized();
        let other_imports =
            build_descriptor(&libs, "x86_64-unknown-linux-gnu", &["serde::Serialize".into()])
                .serialized();
        let other_version = build_descriptor(
            &set(vec![LibraryRef::package("serde", "1.0.200")]),
            "x86_64-unknown-linux-gnu",
            &[],
        )
        .serialized();

        assert_ne!(base, other_target);
        assert_ne!(base, other_imports);
        assert_ne!(base, other_version);
    }

    #[test]
    fn test_framework_only_needs_no_restore() {
        let libs = set(vec![LibraryRef::framework("alloc")]);
        assert!(!build_descriptor(&libs, "x86_64-unknown-linux-gnu", &[]).needs_restore);
        let empty = LibrarySet::new();
        assert!(!build_descriptor(&empty, "x86_64-unknown-linux-gnu", &[]).needs_restore);
    }

    #[test]
    fn test_release_profile() {
        let config = ManifestConfig {
            release_profile: Some(ReleaseProfile {
                lto: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        let toml = generate_cargo_toml(&config, &LibrarySet::new());
        assert!(toml.contains("[profile.release]"));
        assert!(toml.contains("opt-level = 3"));
        assert!(toml.contains("lto = true"));
    }

    #[test]
    fn test_toml_string_escapes() {
        assert_eq!(toml_string(r#"C:\libs\"x""#), r#""C:\\libs\\\"x\"""#);
    }
}
