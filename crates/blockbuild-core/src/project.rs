//! Project descriptor parsing.
//!
//! A block-language project arrives at the pipeline as a directory of
//! compiled classes plus a `project.toml` descriptor naming the app, its
//! launcher class, and everything the project's components declared they
//! need (library jars, native libraries, archive libraries, assets).

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid descriptor: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid descriptor: {0}")]
    Validation(String),
}

/// Everything the project's declared components need at packaging time.
///
/// Entries are names relative to the tool tree (library jars, archive
/// libraries, component assets) or `<abi>/<libname>.so` pairs for native
/// libraries. The component metadata database that produced these lives
/// outside the pipeline; here they are plain lists.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComponentInfo {
    /// Library jars required on the dex input list.
    #[serde(default)]
    pub libraries: Vec<String>,
    /// Native shared objects, as `<abi>/<file>.so`.
    #[serde(default)]
    pub native_libraries: Vec<String>,
    /// Android archive (.aar) libraries to unpack and merge.
    #[serde(default)]
    pub archives: Vec<String>,
    /// Asset files shipped by components.
    #[serde(default)]
    pub assets: Vec<String>,
}

/// The parsed `project.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectDescriptor {
    /// App display name, also used for the output artifact filename.
    pub name: String,
    /// Java package id of the application (e.g. `com.example.paint`).
    pub package: String,
    /// Fully-qualified name of the launcher screen class.
    pub main_class: String,
    #[serde(default = "default_version_code")]
    pub version_code: u32,
    #[serde(default = "default_version_name")]
    pub version_name: String,
    /// Minimum API level requested by the project, if any.
    #[serde(default)]
    pub min_api: Option<u32>,
    /// Android permissions declared by the project's components.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Launcher icon, relative to the project root.
    #[serde(default)]
    pub icon: Option<String>,
    /// Project asset files, relative to the project root.
    #[serde(default)]
    pub assets: Vec<String>,
    /// External extension component types used by the project.
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub components: ComponentInfo,
}

fn default_version_code() -> u32 {
    1
}

fn default_version_name() -> String {
    "1.0".to_string()
}

impl ProjectDescriptor {
    /// Load and validate a descriptor from a `project.toml` file.
    pub fn from_file(path: &Path) -> Result<Self, DescriptorError> {
        let text = std::fs::read_to_string(path)?;
        let descriptor: Self = toml::from_str(&text)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<(), DescriptorError> {
        if self.name.trim().is_empty() {
            return Err(DescriptorError::Validation("name must not be empty".into()));
        }
        if self.package.trim().is_empty() || !self.package.contains('.') {
            return Err(DescriptorError::Validation(format!(
                "package must be a dotted java package id, got {:?}",
                self.package
            )));
        }
        if !self.main_class.contains('.') {
            return Err(DescriptorError::Validation(format!(
                "main_class must be fully qualified, got {:?}",
                self.main_class
            )));
        }
        Ok(())
    }

    /// The unqualified name of the launcher class.
    pub fn simple_main_class(&self) -> &str {
        self.main_class
            .rsplit('.')
            .next()
            .unwrap_or(&self.main_class)
    }
}
