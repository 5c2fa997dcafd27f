//! Main-dex set computation and the effective minimum-API policy.
//!
//! Runtimes older than API 21 load only the first dex file natively, so a
//! multi-dex build must tell the dexer which classes belong in it: the
//! user's compiled screens, the language and component runtimes, and a
//! handful of androidx compatibility classes that must be reachable before
//! the secondary dex files are installed.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Oldest API level any build may target.
pub const PLATFORM_FLOOR_API: u32 = 14;

/// Companion (interpreter) builds are pinned here so their main-dex
/// splitting strategy is always valid.
pub const COMPANION_API: u32 = 20;

/// First API level whose runtime loads multiple dex files natively.
pub const NATIVE_MULTIDEX_API: u32 = 21;

/// The one minimum-API policy for the whole pipeline.
///
/// Companion builds are always pinned to [`COMPANION_API`]. Regular builds
/// take the explicit override, else the project's declared minimum, else
/// the platform floor, and are clamped up to the floor either way.
pub fn effective_min_api(
    project_min: Option<u32>,
    override_min: Option<u32>,
    for_companion: bool,
) -> u32 {
    if for_companion {
        return COMPANION_API;
    }
    override_min
        .or(project_min)
        .unwrap_or(PLATFORM_FLOOR_API)
        .max(PLATFORM_FLOOR_API)
}

/// Whether the effective API requires main-dex splitting.
pub fn requires_main_dex(min_api: u32) -> bool {
    min_api < NATIVE_MULTIDEX_API
}

/// Class-name patterns that must always land in the primary dex when
/// multi-dex splitting is in effect, plus the project's launcher class.
pub fn runtime_patterns(main_class: &str) -> Vec<String> {
    vec![
        // Component runtime
        "com.blockbuild.components.runtime.*".to_string(),
        "com.blockbuild.components.runtime.**.*".to_string(),
        // Language interpreter runtime
        "kawa.**.*".to_string(),
        // Compatibility classes reachable before secondary dex install
        "androidx.core.content.FileProvider".to_string(),
        "androidx.appcompat.**.*".to_string(),
        "androidx.collection.*".to_string(),
        "androidx.vectordrawable.**.*".to_string(),
        main_class.to_string(),
    ]
}

/// A set of class names (or package-glob patterns) destined for the
/// primary dex file.
#[derive(Debug, Default)]
pub struct MainDexSpec {
    entries: BTreeSet<String>,
}

impl MainDexSpec {
    pub fn insert(&mut self, entry: impl Into<String>) {
        self.entries.insert(entry.into());
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.contains(entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Record every `.class` file under a compiled-classes tree as a
    /// fully-qualified class name.
    pub fn record_class_tree(&mut self, classes_dir: &Path) {
        for entry in WalkDir::new(classes_dir)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "class") {
                if let Ok(relative) = path.strip_prefix(classes_dir) {
                    self.entries.insert(class_name_of(relative));
                }
            }
        }
    }

    /// Record every class packaged in a jar.
    pub fn record_jar(&mut self, jar: &Path) -> Result<()> {
        let file =
            File::open(jar).with_context(|| format!("open {} for class listing", jar.display()))?;
        let mut archive = zip::ZipArchive::new(file)
            .with_context(|| format!("read {} as a jar", jar.display()))?;
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            let name = entry.name();
            if name.ends_with(".class") && !name.starts_with("META-INF/") {
                self.entries.insert(class_name_of(Path::new(name)));
            }
        }
        Ok(())
    }

    /// Write the set as proguard-style keep rules (the modern dexer's
    /// `--main-dex-rules` input).
    pub fn write_rules(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join("main-dex-rules.txt");
        let mut file = File::create(&path)?;
        for entry in &self.entries {
            writeln!(file, "-keep class {entry} {{ *; }}")?;
        }
        Ok(path)
    }

    /// Write the set as a concrete class list (the legacy dexer's
    /// `--main-dex-list` input). Glob patterns have no meaning here and
    /// are skipped.
    pub fn write_list(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join("main-dex-list.txt");
        let mut file = File::create(&path)?;
        for entry in &self.entries {
            if entry.contains('*') {
                continue;
            }
            writeln!(file, "{}.class", entry.replace('.', "/"))?;
        }
        Ok(path)
    }
}

/// `com/example/Screen1.class` -> `com.example.Screen1`.
fn class_name_of(relative: &Path) -> String {
    let mut name = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join(".");
    if let Some(stripped) = name.strip_suffix(".class") {
        name = stripped.to_string();
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn effective_api_prefers_override_then_project() {
        assert_eq!(effective_min_api(Some(23), None, false), 23);
        assert_eq!(effective_min_api(Some(23), Some(26), false), 26);
        assert_eq!(effective_min_api(None, None, false), PLATFORM_FLOOR_API);
    }

    #[test]
    fn effective_api_clamps_to_floor() {
        assert_eq!(effective_min_api(Some(8), None, false), PLATFORM_FLOOR_API);
        assert_eq!(effective_min_api(None, Some(10), false), PLATFORM_FLOOR_API);
    }

    #[test]
    fn companion_is_pinned_regardless_of_declarations() {
        assert_eq!(effective_min_api(Some(30), Some(30), true), COMPANION_API);
        assert!(requires_main_dex(COMPANION_API));
    }

    #[test]
    fn multidex_threshold() {
        assert!(requires_main_dex(20));
        assert!(!requires_main_dex(21));
        assert!(!requires_main_dex(23));
    }

    #[test]
    fn records_class_tree_as_qualified_names() {
        let tmp = tempdir().unwrap();
        let classes = tmp.path().join("classes");
        std::fs::create_dir_all(classes.join("com/example")).unwrap();
        std::fs::write(classes.join("com/example/Screen1.class"), b"").unwrap();
        std::fs::write(classes.join("com/example/Screen1$1.class"), b"").unwrap();
        std::fs::write(classes.join("com/example/notes.txt"), b"").unwrap();

        let mut spec = MainDexSpec::default();
        spec.record_class_tree(&classes);

        assert_eq!(spec.len(), 2);
        assert!(spec.contains("com.example.Screen1"));
        assert!(spec.contains("com.example.Screen1$1"));
    }

    #[test]
    fn records_jar_entries() {
        let tmp = tempdir().unwrap();
        let jar = tmp.path().join("runtime.jar");
        let file = File::create(&jar).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("com/runtime/Core.class", options).unwrap();
        writer.start_file("META-INF/MANIFEST.MF", options).unwrap();
        writer.start_file("com/runtime/data.bin", options).unwrap();
        writer.finish().unwrap();

        let mut spec = MainDexSpec::default();
        spec.record_jar(&jar).unwrap();

        assert_eq!(spec.len(), 1);
        assert!(spec.contains("com.runtime.Core"));
    }

    #[test]
    fn rules_file_keeps_every_entry() {
        let tmp = tempdir().unwrap();
        let mut spec = MainDexSpec::default();
        spec.insert("com.example.Screen1");
        spec.insert("kawa.**.*");

        let path = spec.write_rules(tmp.path()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("-keep class com.example.Screen1 { *; }"));
        assert!(text.contains("-keep class kawa.**.* { *; }"));
    }

    #[test]
    fn list_file_skips_patterns() {
        let tmp = tempdir().unwrap();
        let mut spec = MainDexSpec::default();
        spec.insert("com.example.Screen1");
        spec.insert("kawa.**.*");

        let path = spec.write_list(tmp.path()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("com/example/Screen1.class"));
        assert!(!text.contains('*'));
    }

    #[test]
    fn runtime_patterns_include_the_main_class() {
        let patterns = runtime_patterns("com.example.Screen1");
        assert!(patterns.contains(&"com.example.Screen1".to_string()));
        assert!(patterns.iter().any(|p| p.starts_with("androidx.appcompat")));
    }
}
