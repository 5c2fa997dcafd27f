//! Tool and runtime-jar locator.
//!
//! The pipeline never bundles the Android SDK; it is pointed at an existing
//! tool tree. By convention the tree is flat (`android.jar`, `d8.jar`,
//! `aapt`, ... under one root) and a `tools.toml` next to it may override
//! any individual location.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid tools manifest: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Resolved locations of every external tool and jar the stages invoke.
#[derive(Debug, Clone)]
pub struct Resources {
    /// Root of the tool tree; relative overrides resolve against it.
    pub root: PathBuf,
    /// Platform API stub jar the dexer links against.
    pub android_jar: PathBuf,
    /// Modern dexer jar. `None` means the capability is absent and the
    /// legacy dexer must be used.
    pub d8_jar: Option<PathBuf>,
    /// Legacy dexer jar.
    pub dx_jar: Option<PathBuf>,
    /// The block-language interpreter runtime (Kawa).
    pub language_runtime_jar: PathBuf,
    /// The component runtime library.
    pub components_runtime_jar: PathBuf,
    /// Crash-reporting runtime (ACRA), companion builds only.
    pub crash_report_jar: PathBuf,
    /// Directory holding the support/vendor jars below.
    pub support_dir: PathBuf,
    /// Support jar names, relative to `support_dir`.
    pub support_jars: Vec<String>,
    /// The subset of `support_jars` every practical deployment needs; these
    /// are recorded into the main-dex set.
    pub critical_jars: BTreeSet<String>,
    /// Native libraries shipped with components, keyed `<abi>/<name>.so`.
    pub native_dir: PathBuf,
    /// Assets shipped with components.
    pub component_assets_dir: PathBuf,
    pub aapt: PathBuf,
    pub aapt2: PathBuf,
    pub zipalign: PathBuf,
    pub apksigner: PathBuf,
    pub bundletool_jar: PathBuf,
    pub keystore: PathBuf,
    pub keystore_pass: String,
    pub key_alias: String,
    /// The `java` launcher used to run jar-packaged tools.
    pub java: PathBuf,
    pub javac: PathBuf,
}

impl Resources {
    /// Conventional flat layout under a single tool root.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let java = which::which("java").unwrap_or_else(|_| PathBuf::from("java"));
        let javac = which::which("javac").unwrap_or_else(|_| PathBuf::from("javac"));
        Self {
            android_jar: root.join("android.jar"),
            d8_jar: Some(root.join("d8.jar")),
            dx_jar: Some(root.join("dx.jar")),
            language_runtime_jar: root.join("kawa-runtime.jar"),
            components_runtime_jar: root.join("components-runtime.jar"),
            crash_report_jar: root.join("acra.jar"),
            support_dir: root.join("support"),
            support_jars: Vec::new(),
            critical_jars: BTreeSet::new(),
            native_dir: root.join("native"),
            component_assets_dir: root.join("component-assets"),
            aapt: root.join("aapt"),
            aapt2: root.join("aapt2"),
            zipalign: root.join("zipalign"),
            apksigner: root.join("apksigner"),
            bundletool_jar: root.join("bundletool.jar"),
            keystore: root.join("debug.keystore"),
            keystore_pass: "android".to_string(),
            key_alias: "androiddebugkey".to_string(),
            java,
            javac,
            root,
        }
    }

    /// Load a `tools.toml`, layering its overrides on the conventional
    /// layout rooted at the manifest's directory.
    pub fn from_file(path: &Path) -> Result<Self, ResourceError> {
        let text = std::fs::read_to_string(path)?;
        let raw: RawResources = toml::from_str(&text)?;
        let root = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        Ok(raw.apply(Self::rooted(root)))
    }

    /// Absolute path of a support jar by name.
    pub fn support_jar_path(&self, name: &str) -> PathBuf {
        self.support_dir.join(name)
    }

    /// Required locations that do not exist on disk. Used by environment
    /// checks before a build is attempted; the dexer jars are judged by
    /// capability, so only "neither dexer present" counts as missing.
    pub fn missing_required(&self) -> Vec<PathBuf> {
        let mut missing = Vec::new();
        for path in [
            &self.android_jar,
            &self.language_runtime_jar,
            &self.components_runtime_jar,
        ] {
            if !path.is_file() {
                missing.push(path.clone());
            }
        }
        let d8 = self.d8_jar.as_deref().is_some_and(Path::is_file);
        let dx = self.dx_jar.as_deref().is_some_and(Path::is_file);
        if !d8 && !dx {
            missing.push(self.root.join("d8.jar (or dx.jar)"));
        }
        missing
    }
}

fn resolve(root: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Raw `tools.toml` contents; every field optional.
#[derive(Debug, Default, Deserialize)]
struct RawResources {
    android_jar: Option<String>,
    d8_jar: Option<String>,
    dx_jar: Option<String>,
    language_runtime_jar: Option<String>,
    components_runtime_jar: Option<String>,
    crash_report_jar: Option<String>,
    support_dir: Option<String>,
    #[serde(default)]
    support_jars: Vec<String>,
    #[serde(default)]
    critical_jars: Vec<String>,
    native_dir: Option<String>,
    component_assets_dir: Option<String>,
    aapt: Option<String>,
    aapt2: Option<String>,
    zipalign: Option<String>,
    apksigner: Option<String>,
    bundletool_jar: Option<String>,
    keystore: Option<String>,
    keystore_pass: Option<String>,
    key_alias: Option<String>,
    java: Option<String>,
    javac: Option<String>,
}

impl RawResources {
    fn apply(self, mut base: Resources) -> Resources {
        let root = base.root.clone();
        if let Some(v) = self.android_jar.as_deref() {
            base.android_jar = resolve(&root, v);
        }
        if let Some(v) = self.d8_jar.as_deref() {
            base.d8_jar = Some(resolve(&root, v));
        }
        if let Some(v) = self.dx_jar.as_deref() {
            base.dx_jar = Some(resolve(&root, v));
        }
        if let Some(v) = self.language_runtime_jar.as_deref() {
            base.language_runtime_jar = resolve(&root, v);
        }
        if let Some(v) = self.components_runtime_jar.as_deref() {
            base.components_runtime_jar = resolve(&root, v);
        }
        if let Some(v) = self.crash_report_jar.as_deref() {
            base.crash_report_jar = resolve(&root, v);
        }
        if let Some(v) = self.support_dir.as_deref() {
            base.support_dir = resolve(&root, v);
        }
        if !self.support_jars.is_empty() {
            base.support_jars = self.support_jars;
        }
        if !self.critical_jars.is_empty() {
            base.critical_jars = self.critical_jars.into_iter().collect();
        }
        if let Some(v) = self.native_dir.as_deref() {
            base.native_dir = resolve(&root, v);
        }
        if let Some(v) = self.component_assets_dir.as_deref() {
            base.component_assets_dir = resolve(&root, v);
        }
        if let Some(v) = self.aapt.as_deref() {
            base.aapt = resolve(&root, v);
        }
        if let Some(v) = self.aapt2.as_deref() {
            base.aapt2 = resolve(&root, v);
        }
        if let Some(v) = self.zipalign.as_deref() {
            base.zipalign = resolve(&root, v);
        }
        if let Some(v) = self.apksigner.as_deref() {
            base.apksigner = resolve(&root, v);
        }
        if let Some(v) = self.bundletool_jar.as_deref() {
            base.bundletool_jar = resolve(&root, v);
        }
        if let Some(v) = self.keystore.as_deref() {
            base.keystore = resolve(&root, v);
        }
        if let Some(v) = self.keystore_pass {
            base.keystore_pass = v;
        }
        if let Some(v) = self.key_alias {
            base.key_alias = v;
        }
        if let Some(v) = self.java.as_deref() {
            base.java = resolve(&root, v);
        }
        if let Some(v) = self.javac.as_deref() {
            base.javac = resolve(&root, v);
        }
        base
    }
}
